//! Read-only projection of stored bindings onto the live monitor list.
//!
//! Nothing here mutates the document. A binding whose monitor has gone
//! away is reported, never dropped.

use std::collections::HashMap;

use crate::layout::Slot;
use crate::monitor::Monitor;
use crate::state::{SelectionRecord, StateDocument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    /// Bound monitor is listed and connected.
    Present,
    /// Bound monitor is listed as disabled or not listed at all.
    Disconnected,
    Unassigned,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotView {
    pub slot: Slot,
    pub monitor_name: Option<String>,
    pub status: SlotStatus,
    pub theme_name: Option<String>,
    pub image_relpath: Option<String>,
    pub output_missing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub slots: Vec<SlotView>,
    /// Connected monitors not bound to any active slot.
    pub unassigned_monitors: Vec<Monitor>,
    pub retained: Vec<SelectionRecord>,
    pub slot_count: u32,
    pub connected_count: usize,
}

impl Reconciliation {
    pub fn count_mismatch(&self) -> bool {
        self.slot_count as usize != self.connected_count
    }
}

pub fn reconcile(doc: &StateDocument, monitors: &[Monitor]) -> Reconciliation {
    let live: HashMap<&str, &Monitor> = monitors.iter().map(|m| (m.name.as_str(), m)).collect();

    let slots = doc
        .active_slots()
        .map(|slot| {
            let record = doc.record(slot);
            let monitor_name = record.and_then(|r| r.monitor_name.clone());
            let status = match monitor_name.as_deref() {
                None => SlotStatus::Unassigned,
                Some(name) => match live.get(name) {
                    Some(m) if m.is_connected => SlotStatus::Present,
                    _ => SlotStatus::Disconnected,
                },
            };
            SlotView {
                slot,
                monitor_name,
                status,
                theme_name: record.and_then(|r| r.theme_name.clone()),
                image_relpath: record.and_then(|r| r.image_relpath.clone()),
                output_missing: record.is_some_and(output_missing),
            }
        })
        .collect();

    let mut unassigned_monitors: Vec<Monitor> = monitors
        .iter()
        .filter(|m| m.is_connected && doc.slot_of(&m.name).is_none())
        .cloned()
        .collect();
    unassigned_monitors.sort_by_key(|m| m.name.to_lowercase());

    Reconciliation {
        slots,
        unassigned_monitors,
        retained: doc.retained_records().cloned().collect(),
        slot_count: doc.slot_count(),
        connected_count: monitors.iter().filter(|m| m.is_connected).count(),
    }
}

/// Bound monitors first in slot order, then the rest by name,
/// case-insensitively.
pub fn order_monitors(doc: &StateDocument, monitors: &[Monitor]) -> Vec<Monitor> {
    let mut ordered = monitors.to_vec();
    ordered.sort_by_cached_key(|m| match doc.slot_of(&m.name) {
        Some(slot) => (0, slot.get(), m.name.to_lowercase()),
        None => (1, 0, m.name.to_lowercase()),
    });
    ordered
}

/// A selection is recorded but its output file has gone missing.
pub fn output_missing(record: &SelectionRecord) -> bool {
    record.has_selection() && !record.output_path.is_file()
}
