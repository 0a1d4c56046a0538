use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use wallslot_common::{
    error::ConfigError, MonitorQuery, Paths, Result, WallslotError, DATA_ROOT_ENV, THEME_ROOT_ENV,
};

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub monitors: MonitorsConfig,
}

/// Directory overrides. Both are superseded by their environment
/// variables.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct PathsConfig {
    pub data_root: Option<String>,
    pub theme_root: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MonitorsConfig {
    #[serde(default = "default_program")]
    pub program: String,
    #[serde(default = "default_attempts")]
    pub attempts: Vec<Vec<String>>,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

fn default_program() -> String {
    MonitorQuery::default().program
}

fn default_attempts() -> Vec<Vec<String>> {
    MonitorQuery::default().attempts
}

fn default_timeout() -> Duration {
    MonitorQuery::default().timeout
}

impl Default for MonitorsConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            attempts: default_attempts(),
            timeout: default_timeout(),
        }
    }
}

impl Config {
    /// Loads `$XDG_CONFIG_HOME/wallslot/config.toml`. The file is
    /// optional; without it every setting takes its default.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            log::debug!("No config file at {:?}, using defaults", config_path);
            return Ok(Self::default());
        }

        Self::load_from_path(&config_path)
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            WallslotError::Config(ConfigError::FileRead {
                path: path.to_path_buf(),
                source: e,
            })
        })?;

        let config: Config = toml::from_str(&content)?;

        config.validate()?;
        log::debug!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or(WallslotError::Config(ConfigError::NoConfigDir))?
            .join("wallslot");

        Ok(config_dir.join("config.toml"))
    }

    pub fn validate(&self) -> Result<()> {
        self.paths.validate()?;
        self.monitors.validate()
    }

    /// Resolves directories from the process environment, this config
    /// and the XDG defaults, in that order of precedence.
    pub fn resolve_paths(&self) -> Result<Paths> {
        self.resolve_paths_with(|key| std::env::var(key).ok())
    }

    pub fn resolve_paths_with<F>(&self, env: F) -> Result<Paths>
    where
        F: Fn(&str) -> Option<String>,
    {
        let home = dirs::home_dir();
        let lookup = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        let data_root = match lookup(DATA_ROOT_ENV).or_else(|| self.paths.data_root.clone()) {
            Some(value) => expand_tilde(&value, home.as_deref()),
            None => dirs::data_dir()
                .ok_or(WallslotError::Config(ConfigError::NoDataDir))?
                .join("wallslot"),
        };
        let theme_root = match lookup(THEME_ROOT_ENV).or_else(|| self.paths.theme_root.clone()) {
            Some(value) => expand_tilde(&value, home.as_deref()),
            None => data_root.join("themes"),
        };

        log::debug!("Data root: {:?}, theme root: {:?}", data_root, theme_root);
        Ok(Paths::new(data_root, theme_root))
    }

    pub fn monitor_query(&self) -> MonitorQuery {
        MonitorQuery {
            program: self.monitors.program.clone(),
            attempts: self.monitors.attempts.clone(),
            timeout: self.monitors.timeout,
        }
    }
}

impl PathsConfig {
    fn validate(&self) -> Result<()> {
        let fields = [
            ("paths.data_root", &self.data_root),
            ("paths.theme_root", &self.theme_root),
        ];
        for (field, value) in fields {
            if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
                return Err(invalid(field, "\"\""));
            }
        }
        Ok(())
    }
}

impl MonitorsConfig {
    fn validate(&self) -> Result<()> {
        if self.program.trim().is_empty() {
            return Err(invalid("monitors.program", &format!("{:?}", self.program)));
        }

        if self.attempts.is_empty() {
            return Err(invalid("monitors.attempts", "[]"));
        }
        if let Some(i) = self.attempts.iter().position(|a| a.is_empty()) {
            return Err(invalid(&format!("monitors.attempts[{}]", i), "[]"));
        }

        if self.timeout < Duration::from_millis(1) {
            return Err(invalid(
                "monitors.timeout",
                &humantime::format_duration(self.timeout).to_string(),
            ));
        }

        Ok(())
    }
}

fn invalid(field: &str, value: &str) -> WallslotError {
    WallslotError::Config(ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
    })
}

/// Expands a leading `~` to `home`. Other paths, and `~user` forms, are
/// returned as written.
pub fn expand_tilde(value: &str, home: Option<&Path>) -> PathBuf {
    let Some(home) = home else {
        return PathBuf::from(value);
    };
    if value == "~" {
        return home.to_path_buf();
    }
    match value.strip_prefix("~/") {
        Some(rest) => home.join(rest),
        None => PathBuf::from(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::tempdir;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_full_config_parses() {
        let toml_str = r#"
            [paths]
            data_root = "/srv/wall"
            theme_root = "/srv/themes"

            [monitors]
            program = "hyprctl"
            attempts = [["monitors", "-j"]]
            timeout = "500ms"
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();

        assert_eq!(config.paths.data_root.as_deref(), Some("/srv/wall"));
        assert_eq!(config.monitors.attempts, vec![vec!["monitors", "-j"]]);
        assert_eq!(config.monitors.timeout, Duration::from_millis(500));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();

        assert_eq!(config, Config::default());
        assert_eq!(config.monitor_query(), MonitorQuery::default());
        assert_eq!(config.monitors.timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_partial_monitors_section_keeps_defaults() {
        let config: Config = toml::from_str("[monitors]\ntimeout = \"5s\"\n").unwrap();

        assert_eq!(config.monitors.program, "hyprctl");
        assert_eq!(config.monitors.attempts.len(), 3);
        assert_eq!(config.monitor_query().timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.monitors.timeout = Duration::from_secs(0);
        assert!(config.validate().is_err());

        config.monitors.timeout = Duration::from_secs(2);
        config.monitors.program = "  ".to_string();
        assert!(config.validate().is_err());

        config.monitors.program = "hyprctl".to_string();
        config.monitors.attempts = vec![vec!["monitors".to_string()], vec![]];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("monitors.attempts[1]"));

        config.monitors.attempts = Vec::new();
        assert!(config.validate().is_err());

        config = Config::default();
        config.paths.theme_root = Some(String::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_timeout_string_is_parse_error() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "[monitors]\ntimeout = \"soon\"\n").unwrap();

        match Config::load_from_path(&path).unwrap_err() {
            WallslotError::Config(ConfigError::TomlParse { .. }) => {}
            other => panic!("Expected TomlParse, got {:?}", other),
        }
    }

    #[test]
    fn test_load_from_path_validates() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "[monitors]\nattempts = []\n").unwrap();

        assert!(matches!(
            Config::load_from_path(&path).unwrap_err(),
            WallslotError::Config(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            Config::load_from_path(&temp_dir.path().join("missing.toml")).unwrap_err(),
            WallslotError::Config(ConfigError::FileRead { .. })
        ));
    }

    #[test]
    fn test_environment_overrides_file() {
        let config = Config {
            paths: PathsConfig {
                data_root: Some("/from/file".to_string()),
                theme_root: Some("/themes/from/file".to_string()),
            },
            ..Config::default()
        };

        let paths = config
            .resolve_paths_with(env_from(&[(DATA_ROOT_ENV, "/from/env")]))
            .unwrap();
        assert_eq!(paths.data_root(), Path::new("/from/env"));
        assert_eq!(paths.theme_root(), Path::new("/themes/from/file"));

        let paths = config
            .resolve_paths_with(env_from(&[(THEME_ROOT_ENV, "/themes/from/env")]))
            .unwrap();
        assert_eq!(paths.data_root(), Path::new("/from/file"));
        assert_eq!(paths.theme_root(), Path::new("/themes/from/env"));
    }

    #[test]
    fn test_theme_root_defaults_under_data_root() {
        let config = Config::default();

        let paths = config
            .resolve_paths_with(env_from(&[(DATA_ROOT_ENV, "/data"), (THEME_ROOT_ENV, "")]))
            .unwrap();

        assert_eq!(paths.theme_root(), Path::new("/data/themes"));
        assert_eq!(paths.state_file(), PathBuf::from("/data/Loaded/state.json"));
    }

    #[test]
    fn test_expand_tilde() {
        let home = Path::new("/home/me");

        assert_eq!(expand_tilde("~", Some(home)), PathBuf::from("/home/me"));
        assert_eq!(expand_tilde("~/walls", Some(home)), PathBuf::from("/home/me/walls"));
        assert_eq!(expand_tilde("~other/walls", Some(home)), PathBuf::from("~other/walls"));
        assert_eq!(expand_tilde("/abs/~/x", Some(home)), PathBuf::from("/abs/~/x"));
        assert_eq!(expand_tilde("~/walls", None), PathBuf::from("~/walls"));
    }
}
