//! Collapse search-as-you-type query sequences.
//!
//! Search UIs log one event per keystroke-triggered query, so a user typing
//! "cats" leaves `c`, `ca`, `cat`, `cats` in the log. This crate finds such
//! sequences and flags every event except the most complete one as a
//! duplicate, dataset by dataset, resuming from a persisted watermark.

// Core infrastructure modules
pub mod core {
    pub mod errors;
}

pub mod config;
pub mod model;

// Grouping pipeline
pub mod relatedness; // pairwise "same typing sequence" test
pub mod grouping; // windowed union-find and survivor selection

// Persistence and orchestration
pub mod storage;
pub mod checkpoint;
pub mod driver;

// Re-exports for convenience
pub use crate::core::errors::{CollapseError, Result};
pub use checkpoint::CheckpointManager;
pub use config::{CollapseConfig, CollapseConfigBuilder};
pub use driver::{CollapseDriver, DatasetOutcome, DatasetReport, RunSummary, ShutdownSignal};
pub use grouping::{SequenceGroup, SequenceGrouper};
pub use model::{DatasetCheckpoint, DatasetId, EventId, EventRow, QueryEvent, Timestamp};
pub use relatedness::Relatedness;
pub use storage::{acquire_with_retry, ContentFilter, EventStore, RetryPolicy, SledEventStore};
