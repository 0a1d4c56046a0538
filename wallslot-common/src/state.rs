use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{StateError, ValidationError};
use crate::fsutil;
use crate::layout::{Paths, Slot};
use crate::monitor::Monitor;
use crate::Result;

/// Schema version written by this build.
pub const STATE_VERSION: u64 = 3;

/// Upper bound on `slot_count`. Every active slot gets a record.
pub const MAX_SLOTS: u32 = 64;

/// Persisted per-slot binding and selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionRecord {
    pub slot: Slot,
    pub monitor_name: Option<String>,
    pub theme_name: Option<String>,
    /// Image path relative to `<theme-root>/<theme_name>`.
    pub image_relpath: Option<String>,
    /// Always the canonical output path of `slot`.
    pub output_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl SelectionRecord {
    fn empty(slot: Slot, paths: &Paths) -> Self {
        Self {
            slot,
            monitor_name: None,
            theme_name: None,
            image_relpath: None,
            output_path: paths.output_path(slot),
            updated_at: None,
        }
    }

    pub fn has_selection(&self) -> bool {
        self.image_relpath.is_some()
    }

    pub fn is_blank(&self) -> bool {
        self.monitor_name.is_none() && self.theme_name.is_none() && self.image_relpath.is_none()
    }
}

/// The full slot mapping. Records above `slot_count` are retained but
/// inactive so a returning monitor can get its old slot back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateDocument {
    slot_count: u32,
    records: BTreeMap<Slot, SelectionRecord>,
}

#[derive(Serialize, Deserialize)]
struct StateFile {
    version: u64,
    slot_count: u32,
    records: Vec<SelectionRecord>,
}

impl StateDocument {
    pub fn slot_count(&self) -> u32 {
        self.slot_count
    }

    pub fn is_empty(&self) -> bool {
        self.slot_count == 0 && self.records.values().all(SelectionRecord::is_blank)
    }

    pub fn is_active(&self, slot: Slot) -> bool {
        slot.get() <= self.slot_count
    }

    pub fn active_slots(&self) -> impl Iterator<Item = Slot> {
        Slot::range(self.slot_count)
    }

    pub fn record(&self, slot: Slot) -> Option<&SelectionRecord> {
        self.records.get(&slot)
    }

    pub fn records(&self) -> impl Iterator<Item = &SelectionRecord> {
        self.records.values()
    }

    pub fn active_records(&self) -> impl Iterator<Item = &SelectionRecord> {
        self.records.values().filter(|r| self.is_active(r.slot))
    }

    /// Inactive records that still carry a binding or a selection.
    pub fn retained_records(&self) -> impl Iterator<Item = &SelectionRecord> {
        self.records
            .values()
            .filter(|r| !self.is_active(r.slot) && !r.is_blank())
    }

    /// Active slot the monitor is bound to.
    pub fn slot_of(&self, monitor_name: &str) -> Option<Slot> {
        self.active_records()
            .find(|r| r.monitor_name.as_deref() == Some(monitor_name))
            .map(|r| r.slot)
    }

    fn ensure_active(&self, slot: Slot) -> std::result::Result<(), StateError> {
        if self.is_active(slot) {
            Ok(())
        } else {
            Err(StateError::SlotOutOfRange {
                slot,
                slot_count: self.slot_count,
            })
        }
    }

    fn record_mut(&mut self, paths: &Paths, slot: Slot) -> &mut SelectionRecord {
        self.records
            .entry(slot)
            .or_insert_with(|| SelectionRecord::empty(slot, paths))
    }

    fn fill_active(&mut self, paths: &Paths) {
        for slot in Slot::range(self.slot_count) {
            self.record_mut(paths, slot);
        }
    }

    pub(crate) fn bind(
        &mut self,
        paths: &Paths,
        slot: Slot,
        monitor_name: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let monitor_name = monitor_name.trim();
        if monitor_name.is_empty() {
            return Err(ValidationError::General {
                message: "monitor name must not be empty".to_string(),
            }
            .into());
        }
        self.ensure_active(slot)?;

        for record in self.records.values_mut() {
            if record.slot != slot && record.monitor_name.as_deref() == Some(monitor_name) {
                log::info!(
                    "Clearing previous binding of {} to slot {}",
                    monitor_name,
                    record.slot
                );
                record.monitor_name = None;
                record.updated_at = Some(now);
            }
        }

        let record = self.record_mut(paths, slot);
        if let Some(previous) = record.monitor_name.as_deref().filter(|p| *p != monitor_name) {
            log::info!("Slot {} no longer bound to {}", slot, previous);
        }
        record.monitor_name = Some(monitor_name.to_string());
        record.updated_at = Some(now);
        Ok(())
    }

    pub(crate) fn unbind(&mut self, paths: &Paths, slot: Slot, now: DateTime<Utc>) -> Result<()> {
        self.ensure_active(slot)?;
        let record = self.record_mut(paths, slot);
        record.monitor_name = None;
        record.updated_at = Some(now);
        Ok(())
    }

    pub(crate) fn set_selection(
        &mut self,
        paths: &Paths,
        slot: Slot,
        theme_name: &str,
        image_relpath: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.ensure_active(slot)?;
        let record = self.record_mut(paths, slot);
        record.theme_name = Some(theme_name.to_string());
        record.image_relpath = Some(image_relpath.to_string());
        record.updated_at = Some(now);
        Ok(())
    }

    /// Never removes records; slots above `monitor_count` just go inactive.
    pub(crate) fn resize(&mut self, paths: &Paths, monitor_count: u32) -> Result<()> {
        if monitor_count > MAX_SLOTS {
            return Err(ValidationError::TooManySlots {
                count: monitor_count,
                max: MAX_SLOTS,
            }
            .into());
        }
        self.slot_count = monitor_count;
        self.fill_active(paths);
        Ok(())
    }

    /// Binds connected monitors without an active slot to free active
    /// slots, lowest slot first, monitors in case-insensitive name order.
    pub(crate) fn autofill(
        &mut self,
        paths: &Paths,
        monitors: &[Monitor],
        now: DateTime<Utc>,
    ) -> Result<Vec<(Slot, String)>> {
        let mut candidates: Vec<&str> = monitors
            .iter()
            .filter(|m| m.is_connected && self.slot_of(&m.name).is_none())
            .map(|m| m.name.as_str())
            .collect();
        candidates.sort_by_key(|name| name.to_lowercase());
        candidates.dedup();

        let mut assigned = Vec::new();
        for name in candidates {
            let free = self
                .active_slots()
                .find(|slot| self.record(*slot).is_none_or(|r| r.monitor_name.is_none()));
            let Some(slot) = free else {
                break;
            };
            self.bind(paths, slot, name, now)?;
            assigned.push((slot, name.to_string()));
        }
        Ok(assigned)
    }

    fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        let file = StateFile {
            version: STATE_VERSION,
            slot_count: self.slot_count,
            records: self.records.values().cloned().collect(),
        };
        serde_json::to_string_pretty(&file)
    }

    /// Versioned decode. Current documents are decoded strictly, legacy
    /// ones migrated, anything newer rejected.
    fn decode(text: &str, path: &Path, paths: &Paths) -> std::result::Result<Self, StateError> {
        let corrupt = |message: String| StateError::Corrupt {
            path: path.to_path_buf(),
            message,
        };

        let value: Value = serde_json::from_str(text).map_err(|e| corrupt(e.to_string()))?;
        if !value.is_object() {
            return Err(corrupt("top level is not an object".to_string()));
        }

        let version = match value.get("version") {
            None => None,
            Some(v) => Some(
                v.as_u64()
                    .ok_or_else(|| corrupt(format!("invalid version marker {}", v)))?,
            ),
        };

        match version {
            None | Some(1) | Some(2) => {
                if value.get("mapping").is_none() && value.get("monitors").is_none() {
                    return Err(corrupt("no version, mapping or monitors".to_string()));
                }
                Ok(Self::migrate_legacy(&value, paths))
            }
            Some(STATE_VERSION) => Self::decode_current(value, paths).map_err(corrupt),
            Some(version) => Err(StateError::UnsupportedVersion {
                path: path.to_path_buf(),
                version,
            }),
        }
    }

    fn decode_current(value: Value, paths: &Paths) -> std::result::Result<Self, String> {
        let file: StateFile = serde_json::from_value(value).map_err(|e| e.to_string())?;
        if file.slot_count > MAX_SLOTS {
            return Err(format!(
                "slot_count {} exceeds the maximum of {}",
                file.slot_count, MAX_SLOTS
            ));
        }

        let mut doc = StateDocument {
            slot_count: file.slot_count,
            records: BTreeMap::new(),
        };
        for mut record in file.records {
            if doc.records.contains_key(&record.slot) {
                return Err(format!("duplicate record for slot {}", record.slot));
            }
            let canonical = paths.output_path(record.slot);
            if record.output_path != canonical {
                log::warn!(
                    "Slot {} output path {:?} is not canonical, using {:?}",
                    record.slot,
                    record.output_path,
                    canonical
                );
                record.output_path = canonical;
            }
            doc.records.insert(record.slot, record);
        }

        let mut seen = HashSet::new();
        for record in doc.records.values_mut() {
            if let Some(name) = &record.monitor_name {
                if !seen.insert(name.clone()) {
                    log::warn!(
                        "{} is bound to more than one slot; dropping it from slot {}",
                        name,
                        record.slot
                    );
                    record.monitor_name = None;
                }
            }
        }

        doc.fill_active(paths);
        Ok(doc)
    }

    /// Reads the `{"mapping": {monitor: slot}, "monitors": {monitor: {...}}}`
    /// documents written by earlier releases.
    fn migrate_legacy(value: &Value, paths: &Paths) -> Self {
        log::info!("Migrating legacy state document to version {}", STATE_VERSION);
        let mut doc = StateDocument::default();

        let as_slot = |v: &Value| {
            v.as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .filter(|n| *n <= MAX_SLOTS)
                .and_then(Slot::new)
        };

        let mut bindings: BTreeMap<&str, Slot> = BTreeMap::new();
        if let Some(mapping) = value.get("mapping").and_then(Value::as_object) {
            for (name, slot) in mapping {
                if let Some(slot) = as_slot(slot).filter(|_| !name.trim().is_empty()) {
                    bindings.insert(name.as_str(), slot);
                }
            }
        }
        for (name, slot) in &bindings {
            let record = doc.record_mut(paths, *slot);
            if let Some(existing) = &record.monitor_name {
                log::warn!(
                    "Legacy slot {} claimed by {} and {}; keeping {}",
                    slot,
                    existing,
                    name,
                    existing
                );
                continue;
            }
            record.monitor_name = Some((*name).to_string());
        }

        if let Some(monitors) = value.get("monitors").and_then(Value::as_object) {
            let mut names: Vec<&String> = monitors.keys().collect();
            names.sort();
            for name in names {
                let entry = &monitors[name.as_str()];
                let slot = entry
                    .get("slot")
                    .and_then(as_slot)
                    .or_else(|| bindings.get(name.as_str()).copied());
                let theme = entry
                    .get("theme")
                    .and_then(Value::as_str)
                    .filter(|t| !t.is_empty());
                let source = entry.get("source_path").and_then(Value::as_str);
                let (Some(slot), Some(theme), Some(source)) = (slot, theme, source) else {
                    log::debug!("Skipping legacy selection for {} without a slot or source", name);
                    continue;
                };
                if !paths.output_path(slot).is_file() {
                    log::warn!(
                        "Legacy selection for slot {} has no output file; dropping it",
                        slot
                    );
                    continue;
                }

                let source = Path::new(source);
                let relpath = source
                    .strip_prefix(paths.theme_dir(theme))
                    .ok()
                    .and_then(|p| p.to_str())
                    .or_else(|| source.file_name().and_then(|n| n.to_str()))
                    .map(str::to_string);
                let Some(relpath) = relpath else {
                    continue;
                };

                let record = doc.record_mut(paths, slot);
                record.theme_name = Some(theme.to_string());
                record.image_relpath = Some(relpath);
            }
        }

        doc.slot_count = doc.records.keys().next_back().map_or(0, |s| s.get());
        doc.fill_active(paths);
        doc
    }
}

/// Reads the state file. `Ok(None)` when there is none yet.
pub fn read_document(paths: &Paths) -> std::result::Result<Option<StateDocument>, StateError> {
    let path = paths.state_file();
    let text = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) if e.kind() == io::ErrorKind::InvalidData => {
            return Err(StateError::Corrupt {
                path,
                message: "not valid UTF-8".to_string(),
            })
        }
        Err(e) => return Err(StateError::FileRead { path, source: e }),
    };
    StateDocument::decode(&text, &path, paths).map(Some)
}

/// Sole owner of the state document and its file. All mutations are
/// serialized and written with the temp-then-rename discipline.
pub struct StateStore {
    paths: Paths,
    document: Mutex<StateDocument>,
    load_warning: Mutex<Option<StateError>>,
}

impl StateStore {
    /// Creates the store and loads whatever is on disk.
    pub fn open(paths: &Paths) -> Result<Self> {
        let store = Self {
            paths: paths.clone(),
            document: Mutex::new(StateDocument::default()),
            load_warning: Mutex::new(None),
        };
        store.load()?;
        Ok(store)
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    /// Re-reads the file. A missing file gives an empty document; a
    /// corrupt or unknown-version file also gives an empty document and
    /// leaves a warning for [`StateStore::take_load_warning`].
    pub fn load(&self) -> Result<StateDocument> {
        let state_file = self.paths.state_file();
        let (document, warning) = match read_document(&self.paths) {
            Ok(Some(document)) => {
                log::info!("State loaded from {:?}", state_file);
                (document, None)
            }
            Ok(None) => {
                log::info!("No state file found, starting fresh");
                (StateDocument::default(), None)
            }
            Err(e @ (StateError::Corrupt { .. } | StateError::UnsupportedVersion { .. })) => {
                log::warn!("{}; starting with an empty document", e);
                (StateDocument::default(), Some(e))
            }
            Err(e) => return Err(e.into()),
        };

        *self.lock() = document.clone();
        *self.load_warning.lock().unwrap_or_else(PoisonError::into_inner) = warning;
        Ok(document)
    }

    pub fn take_load_warning(&self) -> Option<StateError> {
        self.load_warning
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn snapshot(&self) -> StateDocument {
        self.lock().clone()
    }

    pub fn save(&self, doc: StateDocument) -> Result<()> {
        let mut guard = self.lock();
        self.write(&doc)?;
        *guard = doc;
        Ok(())
    }

    pub fn bind(&self, slot: Slot, monitor_name: &str) -> Result<StateDocument> {
        let result = self.mutate(|doc, paths, now| doc.bind(paths, slot, monitor_name, now))?;
        log::info!("Bound {} to slot {}", monitor_name.trim(), slot);
        Ok(result)
    }

    pub fn unbind(&self, slot: Slot) -> Result<StateDocument> {
        let result = self.mutate(|doc, paths, now| doc.unbind(paths, slot, now))?;
        log::info!("Cleared binding of slot {}", slot);
        Ok(result)
    }

    pub fn set_selection(
        &self,
        slot: Slot,
        theme_name: &str,
        image_relpath: &str,
    ) -> Result<StateDocument> {
        let result = self.mutate(|doc, paths, now| {
            doc.set_selection(paths, slot, theme_name, image_relpath, now)
        })?;
        log::info!("Slot {} now shows {}/{}", slot, theme_name, image_relpath);
        Ok(result)
    }

    pub fn resize(&self, monitor_count: u32) -> Result<StateDocument> {
        let result = self.mutate(|doc, paths, _| doc.resize(paths, monitor_count))?;
        log::info!("Active slots: 1..={}", monitor_count);
        Ok(result)
    }

    pub fn autofill(&self, monitors: &[Monitor]) -> Result<(StateDocument, Vec<(Slot, String)>)> {
        let mut assigned = Vec::new();
        let result = self.mutate(|doc, paths, now| {
            assigned = doc.autofill(paths, monitors, now)?;
            Ok(())
        })?;
        for (slot, name) in &assigned {
            log::info!("Auto-assigned {} to slot {}", name, slot);
        }
        Ok((result, assigned))
    }

    /// Applies `op` to a copy and swaps it in only once it is on disk.
    fn mutate<F>(&self, op: F) -> Result<StateDocument>
    where
        F: FnOnce(&mut StateDocument, &Paths, DateTime<Utc>) -> Result<()>,
    {
        let mut guard = self.lock();
        let mut next = guard.clone();
        op(&mut next, &self.paths, Utc::now())?;
        self.write(&next)?;
        *guard = next.clone();
        Ok(next)
    }

    fn write(&self, doc: &StateDocument) -> std::result::Result<(), StateError> {
        let path = self.paths.state_file();
        let json = doc.to_json().map_err(|e| StateError::FileWrite {
            path: path.clone(),
            source: io::Error::new(io::ErrorKind::InvalidData, e),
        })?;
        fsutil::atomic_write(&path, json.as_bytes()).map_err(|e| StateError::FileWrite {
            path: path.clone(),
            source: e,
        })?;
        log::debug!("State saved to {:?}", path);
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, StateDocument> {
        self.document.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WallslotError;
    use tempfile::tempdir;

    fn slot(n: u32) -> Slot {
        Slot::new(n).unwrap()
    }

    fn store_in(dir: &Path) -> StateStore {
        StateStore::open(&Paths::with_data_root(dir)).unwrap()
    }

    #[test]
    fn test_first_run_is_empty() {
        let temp_dir = tempdir().unwrap();
        let store = store_in(temp_dir.path());

        let doc = store.load().unwrap();

        assert_eq!(doc.slot_count(), 0);
        assert!(doc.is_empty());
        assert!(store.take_load_warning().is_none());
        assert!(!store.paths().state_file().exists());
    }

    #[test]
    fn test_save_load_round_trip() {
        let temp_dir = tempdir().unwrap();
        let store = store_in(temp_dir.path());

        store.resize(3).unwrap();
        store.bind(slot(1), "eDP-1").unwrap();
        store.bind(slot(3), "HDMI-A-1").unwrap();
        let doc = store.set_selection(slot(1), "Beach", "sub/sunset.jpg").unwrap();

        store.save(doc.clone()).unwrap();
        let reopened = store_in(temp_dir.path());

        assert_eq!(reopened.load().unwrap(), doc);
        assert_eq!(reopened.snapshot(), doc);
    }

    #[test]
    fn test_bind_moves_monitor() {
        let temp_dir = tempdir().unwrap();
        let store = store_in(temp_dir.path());
        store.resize(2).unwrap();

        store.bind(slot(1), "DP-1").unwrap();
        let doc = store.bind(slot(2), "DP-1").unwrap();

        assert_eq!(doc.record(slot(1)).unwrap().monitor_name, None);
        assert_eq!(doc.record(slot(2)).unwrap().monitor_name.as_deref(), Some("DP-1"));
        assert_eq!(doc.slot_of("DP-1"), Some(slot(2)));
    }

    #[test]
    fn test_bind_replaces_occupant() {
        let temp_dir = tempdir().unwrap();
        let store = store_in(temp_dir.path());
        store.resize(2).unwrap();

        store.bind(slot(1), "DP-1").unwrap();
        let doc = store.bind(slot(1), "DP-2").unwrap();

        assert_eq!(doc.slot_of("DP-1"), None);
        assert_eq!(doc.slot_of("DP-2"), Some(slot(1)));
    }

    #[test]
    fn test_bind_keeps_selection_and_selection_keeps_binding() {
        let temp_dir = tempdir().unwrap();
        let store = store_in(temp_dir.path());
        store.resize(1).unwrap();

        store.set_selection(slot(1), "Beach", "a.jpg").unwrap();
        store.bind(slot(1), "eDP-1").unwrap();
        let doc = store.set_selection(slot(1), "Alps", "b.png").unwrap();

        let record = doc.record(slot(1)).unwrap();
        assert_eq!(record.monitor_name.as_deref(), Some("eDP-1"));
        assert_eq!(record.theme_name.as_deref(), Some("Alps"));
        assert_eq!(record.image_relpath.as_deref(), Some("b.png"));
    }

    #[test]
    fn test_bind_out_of_range_is_rejected_without_write() {
        let temp_dir = tempdir().unwrap();
        let store = store_in(temp_dir.path());

        let err = store.bind(slot(1), "eDP-1").unwrap_err();

        assert!(matches!(
            err,
            WallslotError::State(StateError::SlotOutOfRange { slot_count: 0, .. })
        ));
        assert!(!store.paths().state_file().exists());
        assert!(store.bind(slot(1), "  ").is_err());
    }

    #[test]
    fn test_resize_is_non_destructive() {
        let temp_dir = tempdir().unwrap();
        let store = store_in(temp_dir.path());

        store.resize(3).unwrap();
        store.bind(slot(1), "eDP-1").unwrap();
        store.bind(slot(2), "DP-1").unwrap();
        let before = store.bind(slot(3), "DP-2").unwrap();

        let shrunk = store.resize(1).unwrap();
        assert_eq!(shrunk.active_records().count(), 1);
        assert_eq!(shrunk.retained_records().count(), 2);
        assert_eq!(shrunk.slot_of("DP-2"), None);

        let restored = store.resize(3).unwrap();
        assert_eq!(restored, before);
        assert_eq!(restored.slot_of("DP-2"), Some(slot(3)));
    }

    #[test]
    fn test_resize_above_maximum_is_rejected() {
        let temp_dir = tempdir().unwrap();
        let store = store_in(temp_dir.path());
        let before = store.resize(2).unwrap();

        let err = store.resize(4_000_000_000).unwrap_err();

        assert!(matches!(
            err,
            WallslotError::Validation(ValidationError::TooManySlots { count: 4_000_000_000, .. })
        ));
        assert_eq!(store.snapshot(), before);
        assert!(store.resize(MAX_SLOTS).is_ok());
    }

    #[test]
    fn test_resize_does_not_touch_output_files() {
        let temp_dir = tempdir().unwrap();
        let store = store_in(temp_dir.path());
        let output = store.paths().output_path(slot(2));
        fs::create_dir_all(output.parent().unwrap()).unwrap();
        fs::write(&output, b"png").unwrap();

        store.resize(2).unwrap();
        store.resize(1).unwrap();

        assert_eq!(fs::read(&output).unwrap(), b"png");
    }

    #[test]
    fn test_autofill_fills_free_slots() {
        let temp_dir = tempdir().unwrap();
        let store = store_in(temp_dir.path());
        store.resize(3).unwrap();
        store.bind(slot(1), "HDMI-A-1").unwrap();

        let monitors = vec![
            Monitor::connected("HDMI-A-1"),
            Monitor::connected("eDP-1"),
            Monitor {
                name: "DP-9".to_string(),
                is_connected: false,
                description: None,
            },
            Monitor::connected("DP-1"),
        ];
        let (doc, assigned) = store.autofill(&monitors).unwrap();

        assert_eq!(
            assigned,
            vec![(slot(2), "DP-1".to_string()), (slot(3), "eDP-1".to_string())]
        );
        assert_eq!(doc.slot_of("HDMI-A-1"), Some(slot(1)));
        assert_eq!(doc.slot_of("DP-9"), None);
    }

    #[test]
    fn test_interrupted_save_keeps_previous_document() {
        let temp_dir = tempdir().unwrap();
        let store = store_in(temp_dir.path());
        store.resize(1).unwrap();
        let committed = store.bind(slot(1), "eDP-1").unwrap();

        // Crash after the temp file is written but before the rename.
        let mut next = committed.clone();
        next.resize(store.paths(), 4).unwrap();
        let json = next.to_json().unwrap();
        let staged = fsutil::stage(&store.paths().state_file(), json.as_bytes()).unwrap();
        staged.into_temp_path().keep().unwrap();

        let reopened = store_in(temp_dir.path());
        assert_eq!(reopened.snapshot(), committed);
        assert!(reopened.take_load_warning().is_none());
    }

    #[test]
    fn test_failed_save_leaves_memory_unchanged() {
        let temp_dir = tempdir().unwrap();
        let store = store_in(temp_dir.path());
        let before = store.resize(1).unwrap();

        // A directory where the state file should be makes the rename fail.
        let state_file = store.paths().state_file();
        fs::remove_file(&state_file).unwrap();
        fs::create_dir(&state_file).unwrap();

        assert!(store.bind(slot(1), "eDP-1").is_err());
        assert_eq!(store.snapshot(), before);
    }

    #[test]
    fn test_corrupt_file_recovers_with_warning() {
        let temp_dir = tempdir().unwrap();
        let paths = Paths::with_data_root(temp_dir.path());
        fs::create_dir_all(paths.loaded_dir()).unwrap();
        fs::write(paths.state_file(), "{\"version\": 3, \"slot_count\": ").unwrap();

        let store = StateStore::open(&paths).unwrap();

        assert!(store.snapshot().is_empty());
        assert!(matches!(
            store.take_load_warning(),
            Some(StateError::Corrupt { .. })
        ));
        assert!(store.take_load_warning().is_none());
        // Untouched until the next successful save.
        assert!(fs::read_to_string(paths.state_file()).unwrap().ends_with(": "));
    }

    #[test]
    fn test_unknown_version_is_rejected() {
        let temp_dir = tempdir().unwrap();
        let paths = Paths::with_data_root(temp_dir.path());
        fs::create_dir_all(paths.loaded_dir()).unwrap();
        fs::write(paths.state_file(), r#"{"version": 99, "anything": []}"#).unwrap();

        let store = StateStore::open(&paths).unwrap();

        assert!(matches!(
            store.take_load_warning(),
            Some(StateError::UnsupportedVersion { version: 99, .. })
        ));
    }

    #[test]
    fn test_oversized_slot_count_recovers_as_corrupt() {
        let temp_dir = tempdir().unwrap();
        let paths = Paths::with_data_root(temp_dir.path());
        fs::create_dir_all(paths.loaded_dir()).unwrap();
        fs::write(
            paths.state_file(),
            r#"{"version": 3, "slot_count": 4294967295, "records": []}"#,
        )
        .unwrap();

        let store = StateStore::open(&paths).unwrap();

        assert!(store.snapshot().is_empty());
        assert_eq!(store.snapshot().records().count(), 0);
        assert!(matches!(
            store.take_load_warning(),
            Some(StateError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_unversioned_object_without_legacy_keys_is_corrupt() {
        let paths = Paths::with_data_root("/data");

        let err = StateDocument::decode(r#"{"foo": 1}"#, Path::new("state.json"), &paths)
            .unwrap_err();
        assert!(matches!(err, StateError::Corrupt { .. }));

        let doc = StateDocument::decode(r#"{"mapping": {}}"#, Path::new("state.json"), &paths)
            .unwrap();
        assert!(doc.is_empty());
    }

    #[test]
    fn test_legacy_slots_above_maximum_are_dropped() {
        let paths = Paths::with_data_root("/data");
        let json = r#"{"mapping": {"DP-1": 1, "DP-2": 4000000000}}"#;

        let doc = StateDocument::decode(json, Path::new("state.json"), &paths).unwrap();

        assert_eq!(doc.slot_count(), 1);
        assert_eq!(doc.slot_of("DP-1"), Some(slot(1)));
        assert_eq!(doc.records().count(), 1);
    }

    #[test]
    fn test_duplicate_slots_are_corrupt() {
        let paths = Paths::with_data_root("/data");
        let json = r#"{"version": 3, "slot_count": 1, "records": [
            {"slot": 1, "monitor_name": null, "theme_name": null, "image_relpath": null, "output_path": "/data/Loaded/monitor_1.png"},
            {"slot": 1, "monitor_name": null, "theme_name": null, "image_relpath": null, "output_path": "/data/Loaded/monitor_1.png"}
        ]}"#;

        let err = StateDocument::decode(json, Path::new("state.json"), &paths).unwrap_err();
        assert!(matches!(err, StateError::Corrupt { .. }));
    }

    #[test]
    fn test_decode_repairs_output_path_and_duplicate_binding() {
        let paths = Paths::with_data_root("/data");
        let json = r#"{"version": 3, "slot_count": 2, "records": [
            {"slot": 1, "monitor_name": "DP-1", "theme_name": null, "image_relpath": null, "output_path": "/old/Loaded/monitor_1.png"},
            {"slot": 2, "monitor_name": "DP-1", "theme_name": null, "image_relpath": null, "output_path": "/data/Loaded/monitor_2.png"}
        ]}"#;

        let doc = StateDocument::decode(json, Path::new("state.json"), &paths).unwrap();

        assert_eq!(
            doc.record(slot(1)).unwrap().output_path,
            PathBuf::from("/data/Loaded/monitor_1.png")
        );
        assert_eq!(doc.slot_of("DP-1"), Some(slot(1)));
        assert_eq!(doc.record(slot(2)).unwrap().monitor_name, None);
    }

    #[test]
    fn test_migrates_legacy_document() {
        let temp_dir = tempdir().unwrap();
        let paths = Paths::with_data_root(temp_dir.path());
        fs::create_dir_all(paths.loaded_dir()).unwrap();
        fs::write(paths.output_path(slot(2)), b"png").unwrap();

        let legacy = serde_json::json!({
            "version": 2,
            "mapping": {"DP-1": 1, "HDMI-A-1": 2, "ghost": 0},
            "monitors": {
                "HDMI-A-1": {
                    "theme": "Beach",
                    "slot": 2,
                    "source_path": paths.theme_dir("Beach").join("sunset.jpg"),
                    "loaded_path": paths.output_path(slot(2)),
                },
                "DP-1": {
                    "theme": "Alps",
                    "slot": 1,
                    "source_path": "/somewhere/else/peak.png",
                    "loaded_path": paths.output_path(slot(1)),
                }
            }
        });
        fs::write(paths.state_file(), legacy.to_string()).unwrap();

        let store = StateStore::open(&paths).unwrap();
        let doc = store.snapshot();

        assert_eq!(doc.slot_count(), 2);
        assert_eq!(doc.slot_of("DP-1"), Some(slot(1)));
        assert_eq!(doc.slot_of("HDMI-A-1"), Some(slot(2)));
        assert_eq!(doc.slot_of("ghost"), None);
        let second = doc.record(slot(2)).unwrap();
        assert_eq!(second.theme_name.as_deref(), Some("Beach"));
        assert_eq!(second.image_relpath.as_deref(), Some("sunset.jpg"));
        // monitor_1.png was never written, so the selection cannot be trusted.
        assert!(!doc.record(slot(1)).unwrap().has_selection());

        // The next save upgrades the file.
        store.bind(slot(1), "DP-1").unwrap();
        let text = fs::read_to_string(paths.state_file()).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["version"], STATE_VERSION);
    }
}
