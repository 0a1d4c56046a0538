//! Monitor registry: asks the host which monitors exist.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

use crate::error::{MonitorError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Monitor {
    pub name: String,
    pub is_connected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Monitor {
    pub fn connected(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_connected: true,
            description: None,
        }
    }
}

/// Anything that can enumerate the live monitor set.
///
/// Implementations must fail instead of returning an empty list when the
/// host cannot be queried; slot counts are derived from the result.
pub trait MonitorSource: Send + Sync {
    fn list_monitors(&self) -> impl Future<Output = Result<Vec<Monitor>>> + Send;
}

/// How to run the host enumeration tool.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorQuery {
    pub program: String,
    /// Argument lists tried in order; the first successful one wins.
    pub attempts: Vec<Vec<String>>,
    pub timeout: Duration,
}

impl Default for MonitorQuery {
    fn default() -> Self {
        Self {
            program: "hyprctl".to_string(),
            attempts: vec![
                vec!["monitors".to_string(), "all".to_string(), "-j".to_string()],
                vec!["monitors".to_string(), "-j".to_string()],
                vec!["-j".to_string(), "monitors".to_string()],
            ],
            timeout: Duration::from_secs(2),
        }
    }
}

/// Queries Hyprland through `hyprctl ... -j`.
pub struct HyprctlSource {
    query: MonitorQuery,
}

impl HyprctlSource {
    pub fn new(query: MonitorQuery) -> Self {
        Self { query }
    }

    fn locate(&self) -> std::result::Result<PathBuf, MonitorError> {
        which::which(&self.query.program).map_err(|_| MonitorError::ToolMissing {
            program: self.query.program.clone(),
        })
    }

    async fn run_attempt(
        &self,
        program: &Path,
        args: &[String],
    ) -> std::result::Result<Vec<Monitor>, MonitorError> {
        let command = format!("{} {}", self.query.program, args.join(" "));
        log::debug!("Executing: {}", command);

        // The child is killed if the timeout drops the pending output.
        let pending = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = match timeout(self.query.timeout, pending).await {
            Ok(result) => result.map_err(|e| MonitorError::Spawn {
                command: command.clone(),
                source: e,
            })?,
            Err(_) => {
                return Err(MonitorError::Timeout {
                    command,
                    after: self.query.timeout,
                });
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(MonitorError::NonZeroExit {
                command,
                code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        parse_hyprctl_monitors(&String::from_utf8_lossy(&output.stdout))
            .map_err(|message| MonitorError::MalformedResponse { command, message })
    }
}

impl MonitorSource for HyprctlSource {
    async fn list_monitors(&self) -> Result<Vec<Monitor>> {
        let program = self.locate()?;

        let mut last = None;
        for args in &self.query.attempts {
            match self.run_attempt(&program, args).await {
                Ok(monitors) => {
                    if monitors.is_empty() {
                        log::warn!("{} reported no monitors", self.query.program);
                    }
                    log::info!(
                        "Found monitors: {:?}",
                        monitors.iter().map(|m| m.name.as_str()).collect::<Vec<_>>()
                    );
                    return Ok(monitors);
                }
                Err(e) => {
                    log::debug!("Monitor query attempt failed: {}", e);
                    last = Some(e);
                }
            }
        }

        let last = last.unwrap_or_else(|| MonitorError::MalformedResponse {
            command: self.query.program.clone(),
            message: "no query attempts configured".to_string(),
        });
        Err(MonitorError::AllAttemptsFailed { last: Box::new(last) }.into())
    }
}

#[derive(Deserialize)]
struct HyprMonitor {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    disabled: bool,
}

/// Parses `hyprctl monitors -j` output. Items that are not objects, lack
/// a usable `name`, or repeat an earlier name are skipped; only a
/// non-array document is an error.
pub fn parse_hyprctl_monitors(json: &str) -> std::result::Result<Vec<Monitor>, String> {
    let value: serde_json::Value =
        serde_json::from_str(json).map_err(|e| format!("invalid JSON: {}", e))?;
    let items = value
        .as_array()
        .ok_or_else(|| "expected a JSON array of monitors".to_string())?;

    let mut seen = HashSet::new();
    let mut monitors = Vec::new();
    for item in items {
        let Ok(raw) = serde_json::from_value::<HyprMonitor>(item.clone()) else {
            continue;
        };
        let name = raw.name.trim();
        if name.is_empty() || !seen.insert(name.to_string()) {
            continue;
        }
        monitors.push(Monitor {
            name: name.to_string(),
            is_connected: !raw.disabled,
            description: raw.description.filter(|d| !d.is_empty()),
        });
    }
    Ok(monitors)
}

/// Fixed monitor set.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    monitors: Vec<Monitor>,
}

impl StaticSource {
    pub fn new(monitors: Vec<Monitor>) -> Self {
        Self { monitors }
    }

    pub fn connected<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(names.into_iter().map(Monitor::connected).collect())
    }
}

impl MonitorSource for StaticSource {
    async fn list_monitors(&self) -> Result<Vec<Monitor>> {
        Ok(self.monitors.clone())
    }
}
