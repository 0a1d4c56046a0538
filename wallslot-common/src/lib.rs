pub mod layout;
pub mod monitor;
pub mod theme;
pub mod state;
pub mod reconcile;
pub mod materialize;
pub mod jobs;
pub mod fsutil;
pub mod error;

pub use layout::{Paths, Slot, DATA_ROOT_ENV, THEME_ROOT_ENV};
pub use monitor::{HyprctlSource, Monitor, MonitorQuery, MonitorSource, StaticSource};
pub use theme::ThemeCatalog;
pub use state::{SelectionRecord, StateDocument, StateStore, MAX_SLOTS, STATE_VERSION};
pub use reconcile::{
    order_monitors, output_missing, reconcile, Reconciliation, SlotStatus, SlotView,
};
pub use materialize::{CancelToken, Materializer};
pub use jobs::{Delivery, JobId, MaterializeQueue};
pub use error::{WallslotError, Result, ErrorReporting};
