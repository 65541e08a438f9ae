//! Event and checkpoint records shared by the store, grouper and driver.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::errors::{CollapseError, Result};

// Type aliases
pub type EventId = Uuid;
pub type DatasetId = Uuid;
pub type Timestamp = DateTime<Utc>;

/// Textual layout of `created_at` as exchanged with the store.
///
/// Fixed width, so lexicographic order matches chronological order.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Render a timestamp in the canonical store layout
pub fn format_timestamp(ts: &Timestamp) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a store timestamp. Accepts the canonical layout (with or without
/// fractional seconds) and RFC 3339.
pub fn parse_timestamp(raw: &str) -> std::result::Result<Timestamp, chrono::ParseError> {
    let raw = raw.trim();
    match NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f") {
        Ok(naive) => Ok(naive.and_utc()),
        Err(_) => DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc)),
    }
}

/// Fields carried through unchanged; the collapse logic never reads them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    pub top_score: f32,
    pub latency: f32,
    pub request_params: serde_json::Value,
    pub results: Vec<String>,
    pub query_vector: Vec<f32>,
    pub query_rating: Option<String>,
}

/// A search-query row as the store hands it over
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRow {
    pub id: EventId,
    pub dataset_id: DatasetId,
    pub query: String,
    /// Store-rendered timestamp, see [`TIMESTAMP_FORMAT`]
    pub created_at: String,
    pub search_type: String,
    pub is_duplicate: bool,
    #[serde(default)]
    pub payload: EventPayload,
}

impl EventRow {
    /// Build a well-formed row for the given instant
    pub fn new(
        dataset_id: DatasetId,
        query: impl Into<String>,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            dataset_id,
            query: query.into(),
            created_at: format_timestamp(&created_at),
            search_type: "search".to_string(),
            is_duplicate: false,
            payload: EventPayload::default(),
        }
    }

    pub fn with_search_type(mut self, search_type: impl Into<String>) -> Self {
        self.search_type = search_type.into();
        self
    }

    /// Decode into a [`QueryEvent`], rejecting rows whose timestamp does not parse
    pub fn decode(&self) -> Result<QueryEvent> {
        let created_at = parse_timestamp(&self.created_at).map_err(|e| {
            CollapseError::malformed(
                self.id,
                format!("unparseable created_at {:?}: {}", self.created_at, e),
            )
        })?;

        Ok(QueryEvent {
            id: self.id,
            dataset_id: self.dataset_id,
            query: self.query.clone(),
            created_at,
            search_type: self.search_type.clone(),
            is_duplicate: self.is_duplicate,
            payload: self.payload.clone(),
        })
    }
}

/// One logged search action, ready for grouping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryEvent {
    pub id: EventId,
    pub dataset_id: DatasetId,
    pub query: String,
    pub created_at: Timestamp,
    pub search_type: String,
    pub is_duplicate: bool,
    pub payload: EventPayload,
}

impl QueryEvent {
    /// Trimmed, lowercased query text
    pub fn normalized_query(&self) -> String {
        normalize(&self.query)
    }
}

/// Case and whitespace folding applied before any text comparison
pub fn normalize(query: &str) -> String {
    query.trim().to_lowercase()
}

/// Per-dataset watermark row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetCheckpoint {
    pub dataset_id: DatasetId,
    pub last_collapsed: Timestamp,
    pub updated_at: Timestamp,
}

impl DatasetCheckpoint {
    pub fn new(dataset_id: DatasetId, last_collapsed: Timestamp) -> Self {
        Self {
            dataset_id,
            last_collapsed,
            updated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamp_round_trip_keeps_micros() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 5).unwrap()
            + chrono::Duration::microseconds(1234);
        let text = format_timestamp(&ts);
        assert_eq!(text, "2024-03-01 12:30:05.001234");
        assert_eq!(parse_timestamp(&text).unwrap(), ts);
    }

    #[test]
    fn test_parse_accepts_clickhouse_and_rfc3339() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 5).unwrap();
        assert_eq!(parse_timestamp("2024-03-01 12:30:05").unwrap(), expected);
        assert_eq!(parse_timestamp("2024-03-01T14:30:05+02:00").unwrap(), expected);
    }

    #[test]
    fn test_decode_rejects_bad_timestamp() {
        let mut row = EventRow::new(Uuid::new_v4(), "cats", Utc::now());
        row.created_at = "yesterday-ish".to_string();
        match row.decode() {
            Err(CollapseError::MalformedEvent { id, .. }) => assert_eq!(id, row.id),
            other => panic!("expected malformed event, got {:?}", other),
        }
    }

    #[test]
    fn test_normalize_folds_case_and_whitespace() {
        assert_eq!(normalize("  Search Terms \n"), "search terms");
    }
}
