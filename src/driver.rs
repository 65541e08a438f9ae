//! Collapse driver
//!
//! Runs the per-dataset cycle `FETCH -> GROUP -> FLAG -> CHECKPOINT` until the
//! log is exhausted. Datasets fail independently: an error aborts only the
//! dataset it happened in, leaves its watermark untouched, and the run moves on.

use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::checkpoint::CheckpointManager;
use crate::config::CollapseConfig;
use crate::core::errors::Result;
use crate::grouping::SequenceGrouper;
use crate::model::{DatasetId, EventId, EventRow, QueryEvent, Timestamp};
use crate::storage::EventStore;

/// Cooperative stop request, honoured between batches
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    flag: Arc<AtomicBool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// How a dataset's cycle loop ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DatasetOutcome {
    Completed,
    Cancelled,
    Failed { category: String, reason: String },
}

/// Per-dataset result of one run
#[derive(Debug, Clone, Serialize)]
pub struct DatasetReport {
    pub dataset_id: DatasetId,
    pub outcome: DatasetOutcome,
    pub batches: usize,
    pub events_scanned: usize,
    pub malformed_events: usize,
    pub duplicates_marked: usize,
    pub starting_checkpoint: Option<Timestamp>,
    pub final_checkpoint: Option<Timestamp>,
}

impl DatasetReport {
    fn new(dataset_id: DatasetId) -> Self {
        Self {
            dataset_id,
            outcome: DatasetOutcome::Completed,
            batches: 0,
            events_scanned: 0,
            malformed_events: 0,
            duplicates_marked: 0,
            starting_checkpoint: None,
            final_checkpoint: None,
        }
    }
}

/// Totals for one run over every dataset
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub datasets_processed: usize,
    pub datasets_failed: usize,
    pub datasets_cancelled: usize,
    pub batches: usize,
    pub events_scanned: usize,
    pub malformed_events: usize,
    pub duplicates_marked: usize,
    pub reports: Vec<DatasetReport>,
}

impl RunSummary {
    fn record(&mut self, report: DatasetReport) {
        match report.outcome {
            DatasetOutcome::Completed => self.datasets_processed += 1,
            DatasetOutcome::Cancelled => self.datasets_cancelled += 1,
            DatasetOutcome::Failed { .. } => self.datasets_failed += 1,
        }
        self.batches += report.batches;
        self.events_scanned += report.events_scanned;
        self.malformed_events += report.malformed_events;
        self.duplicates_marked += report.duplicates_marked;
        self.reports.push(report);
    }

    /// No dataset failed
    pub fn is_clean(&self) -> bool {
        self.datasets_failed == 0
    }

    pub fn report(&self, dataset_id: DatasetId) -> Option<&DatasetReport> {
        self.reports.iter().find(|r| r.dataset_id == dataset_id)
    }
}

pub struct CollapseDriver {
    store: Arc<dyn EventStore>,
    grouper: SequenceGrouper,
    checkpoints: CheckpointManager,
    config: Arc<CollapseConfig>,
    shutdown: ShutdownSignal,
}

impl CollapseDriver {
    /// Create a driver over `store`; fails if the configuration is invalid
    pub fn new(store: Arc<dyn EventStore>, config: CollapseConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            grouper: SequenceGrouper::from_config(&config),
            checkpoints: CheckpointManager::new(store.clone()),
            store,
            config: Arc::new(config),
            shutdown: ShutdownSignal::new(),
        })
    }

    /// Share an externally owned stop signal
    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    pub fn config(&self) -> &CollapseConfig {
        &self.config
    }

    /// Collapse every dataset in the store.
    ///
    /// Only a failure to list datasets fails the run; everything else is
    /// reported per dataset in the summary.
    pub async fn run(&self) -> Result<RunSummary> {
        let datasets = self.store.list_datasets().await?;
        info!(
            "Collapsing {} datasets ({} at a time)",
            datasets.len(),
            self.config.max_concurrent_datasets
        );

        let reports: Vec<DatasetReport> = stream::iter(datasets)
            .map(|dataset_id| self.collapse_dataset(dataset_id))
            .buffered(self.config.max_concurrent_datasets)
            .collect()
            .await;

        let mut summary = RunSummary::default();
        for report in reports {
            summary.record(report);
        }

        info!(
            processed = summary.datasets_processed,
            failed = summary.datasets_failed,
            cancelled = summary.datasets_cancelled,
            duplicates = summary.duplicates_marked,
            "Collapse run finished"
        );
        Ok(summary)
    }

    /// Collapse one dataset, turning any error into a failed report
    pub async fn collapse_dataset(&self, dataset_id: DatasetId) -> DatasetReport {
        let mut report = DatasetReport::new(dataset_id);

        report.outcome = match self.run_cycles(dataset_id, &mut report).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(
                    dataset_id = %dataset_id,
                    category = e.category(),
                    "Failed to collapse dataset: {}",
                    e
                );
                DatasetOutcome::Failed {
                    category: e.category().to_string(),
                    reason: e.to_string(),
                }
            }
        };

        if report.outcome == DatasetOutcome::Completed && self.config.compact_after_run {
            if let Err(e) = self.store.compact(dataset_id).await {
                warn!(dataset_id = %dataset_id, "Compaction hint failed: {}", e);
            }
        }

        info!(
            dataset_id = %dataset_id,
            batches = report.batches,
            "Processed dataset {}, marked {} duplicates",
            dataset_id,
            report.duplicates_marked
        );
        report
    }

    async fn run_cycles(
        &self,
        dataset_id: DatasetId,
        report: &mut DatasetReport,
    ) -> Result<DatasetOutcome> {
        let mut since = self.checkpoints.load(dataset_id).await?;
        report.starting_checkpoint = since;
        report.final_checkpoint = since;
        info!(dataset_id = %dataset_id, since = ?since, "Collapsing dataset");

        let mut previous_last: Option<EventId> = None;

        loop {
            if self.shutdown.is_triggered() {
                info!(dataset_id = %dataset_id, "Stop requested, leaving dataset");
                return Ok(DatasetOutcome::Cancelled);
            }

            // FETCH
            let rows = self
                .store
                .fetch_events(dataset_id, since, self.config.batch_size)
                .await?;
            let Some(last_row) = rows.last() else {
                break;
            };
            if previous_last == Some(last_row.id) {
                debug!(dataset_id = %dataset_id, "Page did not move forward, dataset exhausted");
                break;
            }
            previous_last = Some(last_row.id);
            report.events_scanned += rows.len();

            // GROUP
            let events = self.decode_batch(dataset_id, rows, report);
            let duplicates = self.grouper.duplicate_ids(&events);

            // FLAG
            if !duplicates.is_empty() {
                self.store.mark_duplicates(&duplicates).await?;
                report.duplicates_marked += duplicates.len();
            }

            // CHECKPOINT
            if let Some(last) = events.last() {
                let watermark = last.created_at;
                if self.checkpoints.advance(dataset_id, watermark).await? {
                    report.final_checkpoint = Some(watermark);
                }
                // a refused (older) watermark must not pull the cursor back
                since = since.max(Some(watermark));
            }

            report.batches += 1;
            debug!(
                dataset_id = %dataset_id,
                batch = report.batches,
                events = events.len(),
                duplicates = duplicates.len(),
                "Batch collapsed"
            );
        }

        Ok(DatasetOutcome::Completed)
    }

    /// Decode a fetched page, dropping rows that cannot be grouped
    fn decode_batch(
        &self,
        dataset_id: DatasetId,
        rows: Vec<EventRow>,
        report: &mut DatasetReport,
    ) -> Vec<QueryEvent> {
        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            match row.decode() {
                Ok(event) => events.push(event),
                Err(e) => {
                    warn!(dataset_id = %dataset_id, "Skipping event: {}", e);
                    report.malformed_events += 1;
                }
            }
        }

        // grouping relies on (created_at, query length) order; a no-op for a conforming store
        events.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.query.chars().count().cmp(&b.query.chars().count()))
        });
        events
    }
}
