//! Typing-sequence relatedness between two query events.
//!
//! Two events are related when they are close in time and their normalized
//! text is either a prefix of the other or shares most of its distinct
//! characters. The classifier is a plain value; construct one per run and pass
//! it to the grouper.

use std::collections::HashSet;

use chrono::Duration;

use crate::config::CollapseConfig;
use crate::model::{normalize, QueryEvent, Timestamp};

/// Default time gate between two related events
pub const DEFAULT_TIME_WINDOW_SECS: i64 = 10;

/// Default distinct-character overlap ratio that must be exceeded
pub const DEFAULT_OVERLAP_THRESHOLD: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Relatedness {
    time_window: Duration,
    overlap_threshold: f64,
}

impl Default for Relatedness {
    fn default() -> Self {
        Self::new(
            Duration::seconds(DEFAULT_TIME_WINDOW_SECS),
            DEFAULT_OVERLAP_THRESHOLD,
        )
    }
}

impl Relatedness {
    pub fn new(time_window: Duration, overlap_threshold: f64) -> Self {
        Self {
            time_window,
            overlap_threshold,
        }
    }

    /// Build the classifier described by a validated config
    pub fn from_config(config: &CollapseConfig) -> Self {
        let window = Duration::from_std(config.time_window)
            .unwrap_or_else(|_| Duration::seconds(DEFAULT_TIME_WINDOW_SECS));
        Self::new(window, config.overlap_threshold)
    }

    pub fn time_window(&self) -> Duration {
        self.time_window
    }

    pub fn overlap_threshold(&self) -> f64 {
        self.overlap_threshold
    }

    /// Whether two instants are close enough to be compared at all
    pub fn within_window(&self, a: &Timestamp, b: &Timestamp) -> bool {
        (*b - *a).abs() <= self.time_window
    }

    /// `a` is expected to occur no later than `b`; the gate is symmetric anyway.
    pub fn related(&self, a: &QueryEvent, b: &QueryEvent) -> bool {
        if !self.within_window(&a.created_at, &b.created_at) {
            return false;
        }
        self.related_text(&normalize(&a.query), &normalize(&b.query))
    }

    /// Text-only part of the policy. Both inputs must already be normalized.
    pub fn related_text(&self, a: &str, b: &str) -> bool {
        // an empty query would be a prefix of everything and bridge unrelated groups
        if a.is_empty() || b.is_empty() {
            return false;
        }
        if a.starts_with(b) || b.starts_with(a) {
            return true;
        }
        char_overlap(a, b) > self.overlap_threshold
    }
}

/// Shared distinct characters over the larger distinct-character count.
pub fn char_overlap(a: &str, b: &str) -> f64 {
    let left: HashSet<char> = a.chars().collect();
    let right: HashSet<char> = b.chars().collect();
    let larger = left.len().max(right.len());
    if larger == 0 {
        return 0.0;
    }
    let shared = left.intersection(&right).count();
    shared as f64 / larger as f64
}
