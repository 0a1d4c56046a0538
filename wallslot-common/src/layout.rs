//! On-disk layout: the data root, the theme root and the fixed
//! per-slot output paths the compositor helper reads.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::ValidationError;

pub const DATA_ROOT_ENV: &str = "WALLSLOT_DATA_ROOT";
pub const THEME_ROOT_ENV: &str = "WALLSLOT_THEME_ROOT";

const LOADED_DIR: &str = "Loaded";
const STATE_FILE: &str = "state.json";

/// Stable 1-based monitor slot. Zero is unrepresentable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Slot(u32);

impl Slot {
    pub fn new(value: u32) -> Option<Self> {
        (value > 0).then_some(Self(value))
    }

    pub fn get(self) -> u32 {
        self.0
    }

    /// Dense range `1..=count`.
    pub fn range(count: u32) -> impl Iterator<Item = Slot> {
        (1..=count).map(Slot)
    }

    pub fn file_name(self) -> String {
        format!("monitor_{}.png", self.0)
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u32> for Slot {
    type Error = ValidationError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Slot::new(value).ok_or(ValidationError::InvalidSlot {
            value: value.to_string(),
        })
    }
}

impl From<Slot> for u32 {
    fn from(slot: Slot) -> Self {
        slot.0
    }
}

impl FromStr for Slot {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u32>()
            .ok()
            .and_then(Slot::new)
            .ok_or_else(|| ValidationError::InvalidSlot { value: s.to_string() })
    }
}

/// Resolved directories every component is constructed with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    data_root: PathBuf,
    theme_root: PathBuf,
}

impl Paths {
    pub fn new(data_root: impl Into<PathBuf>, theme_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
            theme_root: theme_root.into(),
        }
    }

    /// Layout with themes in `<data_root>/themes`.
    pub fn with_data_root(data_root: impl Into<PathBuf>) -> Self {
        let data_root = data_root.into();
        let theme_root = data_root.join("themes");
        Self { data_root, theme_root }
    }

    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    pub fn theme_root(&self) -> &Path {
        &self.theme_root
    }

    pub fn loaded_dir(&self) -> PathBuf {
        self.data_root.join(LOADED_DIR)
    }

    pub fn state_file(&self) -> PathBuf {
        self.loaded_dir().join(STATE_FILE)
    }

    /// Canonical output for `slot`. Depends on nothing but the slot number.
    pub fn output_path(&self, slot: Slot) -> PathBuf {
        self.loaded_dir().join(slot.file_name())
    }

    pub fn theme_dir(&self, theme: &str) -> PathBuf {
        self.theme_root.join(theme)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_rejects_zero() {
        assert!(Slot::new(0).is_none());
        assert!("0".parse::<Slot>().is_err());
        assert!("-1".parse::<Slot>().is_err());
        assert!("two".parse::<Slot>().is_err());
        assert_eq!(" 2 ".parse::<Slot>().unwrap().get(), 2);
    }

    #[test]
    fn test_slot_range_is_dense() {
        let slots: Vec<u32> = Slot::range(3).map(Slot::get).collect();
        assert_eq!(slots, vec![1, 2, 3]);
        assert_eq!(Slot::range(0).count(), 0);
    }

    #[test]
    fn test_slot_serde_rejects_zero() {
        assert!(serde_json::from_str::<Slot>("0").is_err());
        assert_eq!(serde_json::from_str::<Slot>("4").unwrap(), Slot::new(4).unwrap());
        assert_eq!(serde_json::to_string(&Slot::new(4).unwrap()).unwrap(), "4");
    }

    #[test]
    fn test_output_path_is_canonical() {
        let paths = Paths::with_data_root("/home/me/.local/share/wallslot");
        let slot = Slot::new(2).unwrap();

        assert_eq!(
            paths.output_path(slot),
            PathBuf::from("/home/me/.local/share/wallslot/Loaded/monitor_2.png")
        );
        assert_eq!(
            paths.state_file(),
            PathBuf::from("/home/me/.local/share/wallslot/Loaded/state.json")
        );
        assert_eq!(paths.theme_root(), Path::new("/home/me/.local/share/wallslot/themes"));
    }
}
