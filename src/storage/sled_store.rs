//! Sled-backed event log
//!
//! Rows live in the `events` tree under a key that sorts them the way the
//! collapse job reads them:
//!
//! ```text
//! dataset_id (16 bytes) | created_at text | 0x00 | query length (u32 BE) | event id (16 bytes)
//! ```
//!
//! `created_at` uses the fixed-width store layout, so byte order is time order
//! and an inclusive `since` scan is a plain range scan.

use async_trait::async_trait;
use std::path::Path;
use tracing::{debug, info};
use uuid::Uuid;

use super::EventStore;
use crate::core::errors::{CollapseError, Result};
use crate::model::{
    format_timestamp, parse_timestamp, DatasetCheckpoint, DatasetId, EventId, EventRow, Timestamp,
};

const EVENTS_TREE: &str = "events";
const EVENT_INDEX_TREE: &str = "event_index";
const DATASETS_TREE: &str = "datasets";
const CHECKPOINTS_TREE: &str = "checkpoints";

/// Rows never handed to the collapse job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentFilter {
    pub excluded_search_types: Vec<String>,
}

impl Default for ContentFilter {
    fn default() -> Self {
        Self {
            excluded_search_types: vec!["rag".to_string()],
        }
    }
}

impl ContentFilter {
    pub fn new(excluded_search_types: Vec<String>) -> Self {
        Self {
            excluded_search_types,
        }
    }

    pub fn admits(&self, row: &EventRow) -> bool {
        !self
            .excluded_search_types
            .iter()
            .any(|t| t == &row.search_type)
    }
}

/// Embedded [`EventStore`] on sled
pub struct SledEventStore {
    db: sled::Db,
    events: sled::Tree,
    event_index: sled::Tree,
    datasets: sled::Tree,
    checkpoints: sled::Tree,
    filter: ContentFilter,
}

impl SledEventStore {
    /// Open (or create) the store at `path`
    pub fn open(path: impl AsRef<Path>, filter: ContentFilter) -> Result<Self> {
        info!("Opening event store at: {:?}", path.as_ref());
        let db = sled::open(path)?;
        Self::from_db(db, filter)
    }

    /// Store that lives only as long as the process
    pub fn temporary(filter: ContentFilter) -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db, filter)
    }

    fn from_db(db: sled::Db, filter: ContentFilter) -> Result<Self> {
        Ok(Self {
            events: db.open_tree(EVENTS_TREE)?,
            event_index: db.open_tree(EVENT_INDEX_TREE)?,
            datasets: db.open_tree(DATASETS_TREE)?,
            checkpoints: db.open_tree(CHECKPOINTS_TREE)?,
            db,
            filter,
        })
    }

    pub fn filter(&self) -> &ContentFilter {
        &self.filter
    }

    /// Append a row to the log; writer-side entry point.
    ///
    /// A parseable `created_at` is rewritten in the canonical layout so the
    /// key sorts in time order. Unparseable text is kept as-is.
    pub fn insert_event(&self, row: &EventRow) -> Result<()> {
        let mut row = row.clone();
        if let Ok(ts) = parse_timestamp(&row.created_at) {
            row.created_at = format_timestamp(&ts);
        }
        let key = event_key(&row);
        let value = serde_json::to_vec(&row)?;
        self.events.insert(&key, value)?;
        self.event_index.insert(row.id.as_bytes(), key)?;
        self.datasets.insert(row.dataset_id.as_bytes(), Vec::<u8>::new())?;
        Ok(())
    }

    /// Look up a single row, duplicates included
    pub fn get_event(&self, id: EventId) -> Result<Option<EventRow>> {
        let Some(key) = self.event_index.get(id.as_bytes())? else {
            return Ok(None);
        };
        match self.events.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Every row of a dataset in log order, duplicates and filtered rows included
    pub fn events(&self, dataset_id: DatasetId) -> Result<Vec<EventRow>> {
        self.events
            .scan_prefix(dataset_id.as_bytes())
            .map(|entry| {
                let (_, bytes) = entry?;
                Ok(serde_json::from_slice(&bytes)?)
            })
            .collect()
    }

    /// Ids currently flagged as duplicates in a dataset
    pub fn duplicate_ids(&self, dataset_id: DatasetId) -> Result<Vec<EventId>> {
        Ok(self
            .events(dataset_id)?
            .into_iter()
            .filter(|row| row.is_duplicate)
            .map(|row| row.id)
            .collect())
    }
}

#[async_trait]
impl EventStore for SledEventStore {
    async fn list_datasets(&self) -> Result<Vec<DatasetId>> {
        self.datasets
            .iter()
            .keys()
            .map(|key| {
                let key = key?;
                Uuid::from_slice(&key).map_err(|e| CollapseError::serialization("uuid", e))
            })
            .collect()
    }

    async fn fetch_events(
        &self,
        dataset_id: DatasetId,
        since: Option<Timestamp>,
        limit: usize,
    ) -> Result<Vec<EventRow>> {
        let prefix = dataset_id.as_bytes().to_vec();
        let mut start = prefix.clone();
        if let Some(since) = since {
            start.extend_from_slice(format_timestamp(&since).as_bytes());
        }

        let mut rows = Vec::with_capacity(limit.min(1024));
        for entry in self.events.range(start..) {
            if rows.len() >= limit {
                break;
            }
            let (key, bytes) = entry?;
            if !key.starts_with(&prefix) {
                break;
            }
            let row: EventRow = serde_json::from_slice(&bytes)?;
            if row.is_duplicate || !self.filter.admits(&row) {
                continue;
            }
            rows.push(row);
        }

        debug!(
            dataset_id = %dataset_id,
            since = ?since,
            fetched = rows.len(),
            "fetched event page"
        );
        Ok(rows)
    }

    async fn mark_duplicates(&self, ids: &[EventId]) -> Result<()> {
        for id in ids {
            let Some(key) = self.event_index.get(id.as_bytes())? else {
                debug!(event_id = %id, "skipping unknown event");
                continue;
            };
            self.events.fetch_and_update(key, |current| {
                let bytes = current?;
                match serde_json::from_slice::<EventRow>(bytes) {
                    Ok(mut row) if !row.is_duplicate => {
                        row.is_duplicate = true;
                        serde_json::to_vec(&row).ok().or_else(|| Some(bytes.to_vec()))
                    }
                    _ => Some(bytes.to_vec()),
                }
            })?;
        }
        Ok(())
    }

    async fn get_checkpoint(&self, dataset_id: DatasetId) -> Result<Option<DatasetCheckpoint>> {
        match self.checkpoints.get(dataset_id.as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn set_checkpoint(&self, checkpoint: &DatasetCheckpoint) -> Result<()> {
        let bytes = bincode::serialize(checkpoint)?;
        self.checkpoints
            .insert(checkpoint.dataset_id.as_bytes(), bytes)?;
        Ok(())
    }

    async fn compact(&self, dataset_id: DatasetId) -> Result<()> {
        let flushed = self.db.flush_async().await?;
        debug!(dataset_id = %dataset_id, flushed_bytes = flushed, "flushed event store");
        Ok(())
    }
}

fn event_key(row: &EventRow) -> Vec<u8> {
    let query_len = row.query.chars().count().min(u32::MAX as usize) as u32;
    let mut key = Vec::with_capacity(16 + row.created_at.len() + 1 + 4 + 16);
    key.extend_from_slice(row.dataset_id.as_bytes());
    key.extend_from_slice(row.created_at.as_bytes());
    key.push(0);
    key.extend_from_slice(&query_len.to_be_bytes());
    key.extend_from_slice(row.id.as_bytes());
    key
}
