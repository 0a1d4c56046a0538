//! Background materialization with at most one live job per slot.
//!
//! Jobs run on tokio's blocking pool and report back over a channel.
//! Submitting for a busy slot cancels the running job; whatever it
//! eventually reports is handed out as [`Delivery::Discarded`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::WallslotError;
use crate::layout::Slot;
use crate::materialize::{CancelToken, Materializer};
use crate::Result;

pub type JobId = u64;

#[derive(Debug)]
pub enum Delivery {
    Completed {
        id: JobId,
        slot: Slot,
        output: PathBuf,
    },
    Failed {
        id: JobId,
        slot: Slot,
        error: WallslotError,
    },
    /// Result of a superseded or cancelled job. `committed` is set when
    /// the job had already written its output before it was cancelled.
    Discarded {
        id: JobId,
        slot: Slot,
        committed: bool,
    },
}

impl Delivery {
    pub fn id(&self) -> JobId {
        match self {
            Delivery::Completed { id, .. }
            | Delivery::Failed { id, .. }
            | Delivery::Discarded { id, .. } => *id,
        }
    }

    pub fn slot(&self) -> Slot {
        match self {
            Delivery::Completed { slot, .. }
            | Delivery::Failed { slot, .. }
            | Delivery::Discarded { slot, .. } => *slot,
        }
    }
}

struct Finished {
    id: JobId,
    slot: Slot,
    result: Result<PathBuf>,
}

pub struct MaterializeQueue {
    materializer: Arc<Materializer>,
    in_flight: HashMap<Slot, (JobId, CancelToken)>,
    next_id: JobId,
    outstanding: usize,
    sender: mpsc::UnboundedSender<Finished>,
    receiver: mpsc::UnboundedReceiver<Finished>,
}

impl MaterializeQueue {
    pub fn new(materializer: Arc<Materializer>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            materializer,
            in_flight: HashMap::new(),
            next_id: 1,
            outstanding: 0,
            sender,
            receiver,
        }
    }

    /// Must be called from within a tokio runtime.
    pub fn submit(
        &mut self,
        slot: Slot,
        theme: impl Into<String>,
        image_relpath: impl Into<String>,
    ) -> JobId {
        let id = self.next_id;
        self.next_id += 1;

        if let Some((previous, token)) = self.in_flight.remove(&slot) {
            token.cancel();
            log::debug!("Job {} for slot {} superseded by job {}", previous, slot, id);
        }

        let token = CancelToken::new();
        self.in_flight.insert(slot, (id, token.clone()));
        self.outstanding += 1;

        let theme = theme.into();
        let image_relpath = image_relpath.into();
        let materializer = Arc::clone(&self.materializer);
        let sender = self.sender.clone();
        log::debug!("Job {} queued: slot {} <- {}/{}", id, slot, theme, image_relpath);
        tokio::task::spawn_blocking(move || {
            let result = materializer.materialize_selection(slot, &theme, &image_relpath, &token);
            // The receiver lives in the queue; a closed channel means it was dropped.
            let _ = sender.send(Finished { id, slot, result });
        });
        id
    }

    /// Cancels the live job for `slot`, if any.
    pub fn cancel(&mut self, slot: Slot) -> bool {
        match self.in_flight.remove(&slot) {
            Some((id, token)) => {
                token.cancel();
                log::info!("Cancelled job {} for slot {}", id, slot);
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&mut self) -> usize {
        let cancelled = self.in_flight.len();
        for (_, (_, token)) in self.in_flight.drain() {
            token.cancel();
        }
        cancelled
    }

    pub fn is_busy(&self, slot: Slot) -> bool {
        self.in_flight.contains_key(&slot)
    }

    /// Jobs submitted but not yet delivered, including discarded ones.
    pub fn pending(&self) -> usize {
        self.outstanding
    }

    /// Waits for the next finished job. `None` once nothing is outstanding.
    pub async fn next(&mut self) -> Option<Delivery> {
        if self.outstanding == 0 {
            return None;
        }
        let finished = self.receiver.recv().await?;
        self.outstanding -= 1;

        let current = matches!(
            self.in_flight.get(&finished.slot),
            Some((id, _)) if *id == finished.id
        );
        if !current {
            return Some(Delivery::Discarded {
                id: finished.id,
                slot: finished.slot,
                committed: finished.result.is_ok(),
            });
        }
        self.in_flight.remove(&finished.slot);

        Some(match finished.result {
            Ok(output) => Delivery::Completed {
                id: finished.id,
                slot: finished.slot,
                output,
            },
            Err(error) => Delivery::Failed {
                id: finished.id,
                slot: finished.slot,
                error,
            },
        })
    }
}
