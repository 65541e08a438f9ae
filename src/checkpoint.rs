//! Per-dataset collapse watermarks.
//!
//! The watermark is the `created_at` of the last event a cycle fully
//! processed. Fetches resume from it inclusively, so the boundary rows are
//! looked at twice; flagging is idempotent, so that overlap is harmless.

use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::core::errors::Result;
use crate::model::{DatasetCheckpoint, DatasetId, Timestamp};
use crate::storage::EventStore;

pub struct CheckpointManager {
    store: Arc<dyn EventStore>,
    known: DashMap<DatasetId, Timestamp>,
}

impl CheckpointManager {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self {
            store,
            known: DashMap::new(),
        }
    }

    /// Current watermark, `None` for a dataset that was never collapsed (or was reset)
    pub async fn load(&self, dataset_id: DatasetId) -> Result<Option<Timestamp>> {
        let stored = self
            .store
            .get_checkpoint(dataset_id)
            .await?
            .map(|checkpoint| checkpoint.last_collapsed);

        // the store is authoritative here, an external reset may have removed the row
        match stored {
            Some(ts) => {
                self.known.insert(dataset_id, ts);
            }
            None => {
                self.known.remove(&dataset_id);
            }
        }
        Ok(stored)
    }

    /// Overwrite the watermark with `candidate`.
    ///
    /// Returns `false` without writing when `candidate` is older than the
    /// watermark already known for this dataset. Writing the same candidate
    /// twice is allowed and leaves the store unchanged.
    pub async fn advance(&self, dataset_id: DatasetId, candidate: Timestamp) -> Result<bool> {
        if let Some(current) = self.known.get(&dataset_id).map(|entry| *entry) {
            if candidate < current {
                warn!(
                    dataset_id = %dataset_id,
                    current = %current,
                    candidate = %candidate,
                    "refusing to move checkpoint backwards"
                );
                return Ok(false);
            }
        }

        self.store
            .set_checkpoint(&DatasetCheckpoint::new(dataset_id, candidate))
            .await?;
        self.remember(dataset_id, candidate);

        debug!(dataset_id = %dataset_id, last_collapsed = %candidate, "checkpoint advanced");
        Ok(true)
    }

    /// Watermark last seen by this manager, without a store round trip
    pub fn cached(&self, dataset_id: DatasetId) -> Option<Timestamp> {
        self.known.get(&dataset_id).map(|entry| *entry)
    }

    fn remember(&self, dataset_id: DatasetId, ts: Timestamp) {
        self.known
            .entry(dataset_id)
            .and_modify(|current| {
                if ts > *current {
                    *current = ts;
                }
            })
            .or_insert(ts);
    }
}
