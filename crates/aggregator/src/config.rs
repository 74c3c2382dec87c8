//! Aggregation engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for a Handel run. Zero-valued numeric fields are replaced by
/// their defaults when the engine is constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Period of the dissemination ticker in milliseconds.
    pub update_period_ms: u64,
    /// Peers contacted per level when an improvement is pushed upward.
    pub candidate_count: usize,
    /// Percentage of participants a final aggregate must contain, `1..=100`.
    pub contributions_percentage: usize,
    /// Capacity of the queue feeding the verification pipeline.
    pub pending_capacity: usize,
    /// Capacity of the verified-aggregate queue.
    pub verified_capacity: usize,
    /// Capacity of the final-signature output channel.
    pub output_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            update_period_ms: 100,
            candidate_count: 10,
            contributions_percentage: 51,
            pending_capacity: 256,
            verified_capacity: 256,
            output_capacity: 100,
        }
    }
}

impl Config {
    /// Replace unset (zero) fields with their defaults.
    pub fn merge_with_default(mut self) -> Self {
        let defaults = Self::default();
        if self.update_period_ms == 0 {
            self.update_period_ms = defaults.update_period_ms;
        }
        if self.candidate_count == 0 {
            self.candidate_count = defaults.candidate_count;
        }
        if self.contributions_percentage == 0 {
            self.contributions_percentage = defaults.contributions_percentage;
        }
        if self.pending_capacity == 0 {
            self.pending_capacity = defaults.pending_capacity;
        }
        if self.verified_capacity == 0 {
            self.verified_capacity = defaults.verified_capacity;
        }
        if self.output_capacity == 0 {
            self.output_capacity = defaults.output_capacity;
        }
        self
    }

    /// Contribution count a final aggregate must reach for `n` participants.
    pub fn threshold(&self, n: usize) -> usize {
        (n * self.contributions_percentage / 100).max(1)
    }

    pub fn update_period(&self) -> Duration {
        Duration::from_millis(self.update_period_ms)
    }
}
