//! Storage layer for the collapse job
//!
//! The job only talks to the event log through [`EventStore`]: ordered pages
//! in, duplicate flags and checkpoints out. `SledEventStore` is the embedded
//! implementation used for local runs and tests.

pub mod connect;
pub mod sled_store;

pub use connect::{acquire_with_retry, RetryPolicy};
pub use sled_store::{ContentFilter, SledEventStore};

use async_trait::async_trait;

use crate::core::errors::Result;
use crate::model::{DatasetCheckpoint, DatasetId, EventId, EventRow, Timestamp};

/// Narrow read/write interface over the query event log
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Every dataset with at least one event
    async fn list_datasets(&self) -> Result<Vec<DatasetId>>;

    /// Up to `limit` non-duplicate rows passing the dataset content filter,
    /// ordered by `(created_at, query length)`. `since` is inclusive.
    async fn fetch_events(
        &self,
        dataset_id: DatasetId,
        since: Option<Timestamp>,
        limit: usize,
    ) -> Result<Vec<EventRow>>;

    /// Set `is_duplicate` on the given rows. Safe to repeat; unknown ids are ignored.
    async fn mark_duplicates(&self, ids: &[EventId]) -> Result<()>;

    /// Current watermark row for a dataset
    async fn get_checkpoint(&self, dataset_id: DatasetId) -> Result<Option<DatasetCheckpoint>>;

    /// Replace the watermark row for `checkpoint.dataset_id`
    async fn set_checkpoint(&self, checkpoint: &DatasetCheckpoint) -> Result<()>;

    /// Best-effort merge/flush hint after a dataset has been collapsed
    async fn compact(&self, _dataset_id: DatasetId) -> Result<()> {
        Ok(())
    }
}
