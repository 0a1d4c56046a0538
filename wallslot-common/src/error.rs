use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::layout::Slot;

/// Main error type for wallslot operations
#[derive(Error, Debug)]
pub enum WallslotError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Monitor environment unavailable: {0}")]
    Monitor(#[from] MonitorError),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Materialization error: {0}")]
    Materialize(#[from] MaterializeError),

    #[error("Theme error: {0}")]
    Theme(#[from] ThemeError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {path:?}")]
    FileRead { path: PathBuf, source: std::io::Error },

    #[error("Failed to parse TOML configuration: {message}")]
    TomlParse { message: String },

    #[error("Invalid configuration value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Could not determine data directory; set WALLSLOT_DATA_ROOT")]
    NoDataDir,
}

fn human(duration: &Duration) -> humantime::FormattedDuration {
    humantime::format_duration(*duration)
}

/// Failures of the host monitor query. Every variant means the live
/// monitor set is unknown, never that it is empty.
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("{program} not found in PATH")]
    ToolMissing { program: String },

    #[error("Failed to run {command}")]
    Spawn { command: String, source: std::io::Error },

    #[error("{command} exited with code {code}: {stderr}")]
    NonZeroExit { command: String, code: i32, stderr: String },

    #[error("{command} timed out after {}", human(.after))]
    Timeout { command: String, after: Duration },

    #[error("Malformed response from {command}: {message}")]
    MalformedResponse { command: String, message: String },

    #[error("All monitor queries failed; last error: {last}")]
    AllAttemptsFailed { last: Box<MonitorError> },
}

/// State persistence errors
#[derive(Error, Debug)]
pub enum StateError {
    #[error("Failed to read state file: {path:?}")]
    FileRead { path: PathBuf, source: std::io::Error },

    #[error("Failed to write state file: {path:?}")]
    FileWrite { path: PathBuf, source: std::io::Error },

    #[error("State file is corrupted: {path:?}: {message}")]
    Corrupt { path: PathBuf, message: String },

    #[error("State file {path:?} has unsupported version {version}")]
    UnsupportedVersion { path: PathBuf, version: u64 },

    #[error("Slot {slot} is not active (active slots: {slot_count})")]
    SlotOutOfRange { slot: Slot, slot_count: u32 },
}

/// Materialization errors
#[derive(Error, Debug)]
pub enum MaterializeError {
    #[error("Source image not found: {path:?}")]
    SourceNotFound { path: PathBuf },

    #[error("Unsupported or unreadable image {path:?}: {message}")]
    UnsupportedFormat { path: PathBuf, message: String },

    #[error("Failed to write wallpaper {path:?}")]
    WriteFailed { path: PathBuf, source: std::io::Error },

    #[error("Materialization of slot {slot} was cancelled")]
    Cancelled { slot: Slot },
}

/// Theme catalog errors
#[derive(Error, Debug)]
pub enum ThemeError {
    #[error("Theme not found: {name} (looked in {path:?})")]
    ThemeNotFound { name: String, path: PathBuf },

    #[error("Failed to read directory: {path:?}")]
    DirectoryRead { path: PathBuf, source: std::io::Error },
}

/// Validation errors
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Invalid slot: {value} (slots start at 1)")]
    InvalidSlot { value: String },

    #[error("Invalid image path: {path:?}")]
    InvalidImagePath { path: PathBuf },

    #[error("{path:?} is not inside the theme root {theme_root:?}")]
    OutsideThemeRoot { path: PathBuf, theme_root: PathBuf },

    #[error("Too many slots: {count} (at most {max})")]
    TooManySlots { count: u32, max: u32 },

    #[error("Validation failed: {message}")]
    General { message: String },
}

// Convenience type alias
pub type Result<T> = std::result::Result<T, WallslotError>;

impl WallslotError {
    /// True when the live monitor set could not be obtained; the caller
    /// can keep running with stored bindings only.
    pub fn is_environment_unavailable(&self) -> bool {
        matches!(self, WallslotError::Monitor(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, WallslotError::Materialize(MaterializeError::Cancelled { .. }))
    }
}

impl From<toml::de::Error> for WallslotError {
    fn from(err: toml::de::Error) -> Self {
        WallslotError::Config(ConfigError::TomlParse {
            message: err.to_string(),
        })
    }
}

// Error reporting utilities
pub trait ErrorReporting {
    fn log_error(&self, context: &str);
    fn user_friendly_message(&self) -> String;
}

impl ErrorReporting for WallslotError {
    fn log_error(&self, context: &str) {
        log::error!("{}: {:?}", context, self);
    }

    fn user_friendly_message(&self) -> String {
        match self {
            WallslotError::Config(ConfigError::TomlParse { message }) => {
                format!("Invalid configuration format: {}", message)
            }
            WallslotError::Monitor(MonitorError::ToolMissing { program }) => {
                format!(
                    "Cannot list monitors: '{}' is not installed or not in PATH. \
                     Stored bindings are still shown.",
                    program
                )
            }
            WallslotError::Monitor(e) => {
                format!("Cannot list monitors ({}). Is the compositor running?", e)
            }
            WallslotError::State(StateError::Corrupt { path, .. }) => {
                format!(
                    "State file {:?} is unreadable; starting with an empty mapping. \
                     It will be replaced on the next change.",
                    path
                )
            }
            WallslotError::State(StateError::UnsupportedVersion { path, version }) => {
                format!(
                    "State file {:?} has unknown version {}; starting with an empty mapping.",
                    path, version
                )
            }
            WallslotError::State(StateError::SlotOutOfRange { slot, slot_count }) => {
                if *slot_count == 0 {
                    format!("Slot {} does not exist yet. Run `wallslot resize` first.", slot)
                } else {
                    format!("Slot {} does not exist; valid slots are 1..={}.", slot, slot_count)
                }
            }
            WallslotError::State(StateError::FileWrite { path, source }) => {
                format!("Could not save state to {:?}: {}", path, source)
            }
            WallslotError::Materialize(MaterializeError::SourceNotFound { path }) => {
                format!("Image not found: {:?}", path)
            }
            WallslotError::Materialize(MaterializeError::UnsupportedFormat { path, message }) => {
                format!(
                    "Cannot read {:?} as an image ({}). Pick a JPEG, PNG or WebP file.",
                    path, message
                )
            }
            WallslotError::Materialize(MaterializeError::WriteFailed { path, source }) => {
                format!(
                    "Could not write {:?}: {}. Check free space and permissions.",
                    path, source
                )
            }
            WallslotError::Theme(ThemeError::ThemeNotFound { name, path }) => {
                format!("No theme named '{}' under {:?}", name, path)
            }
            _ => self.to_string(),
        }
    }
}
