use thiserror::Error;
use uuid::Uuid;

/// Unified error type for the collapse job
#[derive(Debug, Error)]
pub enum CollapseError {
    /// Store I/O failures (connection loss, timeouts, rejected writes)
    #[error("Store operation failed: {operation} - {message}")]
    Store { operation: String, message: String },

    /// Embedded database errors
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    /// Encoding or decoding of persisted rows
    #[error("Serialization failed ({format}): {message}")]
    Serialization { format: String, message: String },

    /// A single event that cannot take part in grouping
    #[error("Malformed event {id}: {reason}")]
    MalformedEvent { id: Uuid, reason: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// Store acquisition gave up after exhausting its retry budget
    #[error("Could not acquire {what} after {attempts} attempts: {message}")]
    Connection {
        what: String,
        attempts: u32,
        message: String,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CollapseError {
    /// Create a store error
    pub fn store<S: Into<String>, M: Into<String>>(operation: S, message: M) -> Self {
        Self::Store {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization<S: Into<String>, E: std::fmt::Display>(format: S, source: E) -> Self {
        Self::Serialization {
            format: format.into(),
            message: source.to_string(),
        }
    }

    /// Create a malformed event error
    pub fn malformed<R: Into<String>>(id: Uuid, reason: R) -> Self {
        Self::MalformedEvent {
            id,
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
            field: None,
        }
    }

    /// Create a configuration error naming the offending field
    pub fn configuration_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Configuration {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Whether retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Store { .. } | Self::Database(_) => true,
            Self::Serialization { .. }
            | Self::MalformedEvent { .. }
            | Self::Configuration { .. }
            | Self::Connection { .. } => false,
            Self::Other(e) => !e.to_string().contains("fatal"),
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Store { .. } => "store",
            Self::Database(_) => "database",
            Self::Serialization { .. } => "serialization",
            Self::MalformedEvent { .. } => "malformed_event",
            Self::Configuration { .. } => "configuration",
            Self::Connection { .. } => "connection",
            Self::Other(_) => "other",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, CollapseError>;

impl From<serde_json::Error> for CollapseError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization("json", err)
    }
}

impl From<bincode::Error> for CollapseError {
    fn from(err: bincode::Error) -> Self {
        Self::serialization("bincode", err)
    }
}

impl From<serde_yaml::Error> for CollapseError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::configuration(format!("invalid yaml: {}", err))
    }
}
