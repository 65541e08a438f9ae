use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::errors::{CollapseError, Result};
use crate::grouping::DEFAULT_LOOK_WINDOW;
use crate::relatedness::{DEFAULT_OVERLAP_THRESHOLD, DEFAULT_TIME_WINDOW_SECS};
use crate::storage::connect::RetryPolicy;

/// Collapse job configuration with all tuning parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollapseConfig {
    // Relatedness
    /// Maximum time between two events of one typing sequence
    #[serde(with = "duration_secs")]
    pub time_window: Duration,
    /// Distinct-character overlap ratio that must be exceeded for non-prefix matches
    pub overlap_threshold: f64,

    // Grouping
    /// Neighbouring rows compared in each direction
    pub look_window: usize,

    // Driver
    /// Maximum events fetched per cycle
    pub batch_size: usize,
    /// Datasets collapsed at the same time (1 = sequential)
    pub max_concurrent_datasets: usize,
    /// Issue a store compaction hint once a dataset finishes
    pub compact_after_run: bool,

    // Storage
    /// Database path for the embedded store
    pub db_path: Option<PathBuf>,
    /// Search types never considered for collapsing
    pub excluded_search_types: Vec<String>,

    // Store acquisition retry
    /// Attempts before giving up on opening the store
    pub connect_attempts: u32,
    /// Initial retry delay
    #[serde(with = "duration_secs")]
    pub retry_delay: Duration,
    /// Maximum retry delay
    #[serde(with = "duration_secs")]
    pub max_retry_delay: Duration,
    /// Retry backoff multiplier
    pub retry_backoff_multiplier: f64,
}

impl Default for CollapseConfig {
    fn default() -> Self {
        Self {
            time_window: Duration::from_secs(DEFAULT_TIME_WINDOW_SECS as u64),
            overlap_threshold: DEFAULT_OVERLAP_THRESHOLD,

            look_window: DEFAULT_LOOK_WINDOW,

            batch_size: 5000,
            max_concurrent_datasets: 1,
            compact_after_run: true,

            db_path: None,
            excluded_search_types: vec!["rag".to_string()],

            connect_attempts: 5,
            retry_delay: Duration::from_millis(500),
            max_retry_delay: Duration::from_secs(30),
            retry_backoff_multiplier: 2.0,
        }
    }
}

impl CollapseConfig {
    /// Create a new builder for CollapseConfig
    pub fn builder() -> CollapseConfigBuilder {
        CollapseConfigBuilder::new()
    }

    /// Parse a YAML document; missing keys keep their defaults
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            CollapseError::configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&text)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.time_window.is_zero() {
            return Err(CollapseError::configuration_field(
                "time_window must be greater than 0",
                "time_window",
            ));
        }
        if chrono::Duration::from_std(self.time_window).is_err() {
            return Err(CollapseError::configuration_field(
                "time_window is out of range",
                "time_window",
            ));
        }
        if !(0.0..1.0).contains(&self.overlap_threshold) {
            return Err(CollapseError::configuration_field(
                "overlap_threshold must be in [0.0, 1.0)",
                "overlap_threshold",
            ));
        }
        if self.look_window == 0 {
            return Err(CollapseError::configuration_field(
                "look_window must be greater than 0",
                "look_window",
            ));
        }
        if self.batch_size < 2 {
            return Err(CollapseError::configuration_field(
                "batch_size must be at least 2",
                "batch_size",
            ));
        }
        if self.max_concurrent_datasets == 0 {
            return Err(CollapseError::configuration_field(
                "max_concurrent_datasets must be greater than 0",
                "max_concurrent_datasets",
            ));
        }

        // Retry validation
        if self.connect_attempts == 0 {
            return Err(CollapseError::configuration_field(
                "connect_attempts must be greater than 0",
                "connect_attempts",
            ));
        }
        if self.retry_backoff_multiplier < 1.0 {
            return Err(CollapseError::configuration_field(
                "retry_backoff_multiplier must be >= 1.0",
                "retry_backoff_multiplier",
            ));
        }
        if self.retry_delay > self.max_retry_delay {
            return Err(CollapseError::configuration_field(
                "retry_delay cannot exceed max_retry_delay",
                "retry_delay",
            ));
        }

        Ok(())
    }

    /// Retry policy used when acquiring the store
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.connect_attempts,
            initial_delay: self.retry_delay,
            max_delay: self.max_retry_delay,
            multiplier: self.retry_backoff_multiplier,
        }
    }
}

/// Builder for CollapseConfig
pub struct CollapseConfigBuilder {
    config: CollapseConfig,
}

impl Default for CollapseConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CollapseConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self {
            config: CollapseConfig::default(),
        }
    }

    pub fn time_window(mut self, window: Duration) -> Self {
        self.config.time_window = window;
        self
    }

    pub fn overlap_threshold(mut self, threshold: f64) -> Self {
        self.config.overlap_threshold = threshold;
        self
    }

    pub fn look_window(mut self, look_window: usize) -> Self {
        self.config.look_window = look_window;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.config.batch_size = batch_size;
        self
    }

    pub fn max_concurrent_datasets(mut self, count: usize) -> Self {
        self.config.max_concurrent_datasets = count;
        self
    }

    pub fn compact_after_run(mut self, enabled: bool) -> Self {
        self.config.compact_after_run = enabled;
        self
    }

    /// Set database path
    pub fn db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.db_path = Some(path.into());
        self
    }

    pub fn excluded_search_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.excluded_search_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Set retry attempts and delays for store acquisition
    pub fn retries(mut self, attempts: u32, initial: Duration, max: Duration) -> Self {
        self.config.connect_attempts = attempts;
        self.config.retry_delay = initial;
        self.config.max_retry_delay = max;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<CollapseConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Durations as (fractional) seconds in config files
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CollapseConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.time_window, Duration::from_secs(10));
        assert_eq!(config.look_window, 10);
        assert_eq!(config.batch_size, 5000);
        assert_eq!(config.overlap_threshold, 0.8);
    }

    #[test]
    fn test_validation_errors() {
        let mut config = CollapseConfig::default();

        config.look_window = 0;
        assert!(config.validate().is_err());
        config.look_window = 10;

        config.overlap_threshold = 1.5;
        match config.validate() {
            Err(CollapseError::Configuration { field, .. }) => {
                assert_eq!(field.as_deref(), Some("overlap_threshold"))
            }
            other => panic!("expected configuration error, got {:?}", other),
        }
        config.overlap_threshold = 0.8;

        config.time_window = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builder() {
        let config = CollapseConfig::builder()
            .time_window(Duration::from_secs(5))
            .look_window(4)
            .batch_size(100)
            .max_concurrent_datasets(8)
            .excluded_search_types(["rag", "autocomplete"])
            .db_path("/tmp/collapse_db")
            .build()
            .unwrap();

        assert_eq!(config.time_window, Duration::from_secs(5));
        assert_eq!(config.look_window, 4);
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.max_concurrent_datasets, 8);
        assert_eq!(config.excluded_search_types, vec!["rag", "autocomplete"]);
    }

    #[test]
    fn test_yaml_overrides_defaults() {
        let config = CollapseConfig::from_yaml_str(
            "time_window: 2.5\nbatch_size: 250\nexcluded_search_types: []\n",
        )
        .unwrap();
        assert_eq!(config.time_window, Duration::from_millis(2500));
        assert_eq!(config.batch_size, 250);
        assert!(config.excluded_search_types.is_empty());
        assert_eq!(config.look_window, DEFAULT_LOOK_WINDOW);
    }

    #[test]
    fn test_yaml_rejects_invalid_values() {
        assert!(CollapseConfig::from_yaml_str("look_window: 0\n").is_err());
        assert!(CollapseConfig::from_yaml_str("time_window: [1, 2]\n").is_err());
    }
}
