//! Engine tuning knobs.

use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Materialization engine configuration, shared by both domains.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EtlConfig {
    /// Width of one backfill window, in hours.
    #[serde(default = "default_batch_window_hours")]
    pub batch_window_hours: i64,
    /// Incremental re-scan overlap, in minutes.
    #[serde(default = "default_overlap_minutes")]
    pub overlap_minutes: i64,
    /// Backfill fan-out: batches in flight at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Pause after each batch, success or failure, in milliseconds.
    #[serde(default = "default_batch_pause_ms")]
    pub batch_pause_ms: u64,
    /// Watermark metadata table name.
    #[serde(default = "default_watermark_table")]
    pub watermark_table: String,
}

fn default_batch_window_hours() -> i64 {
    240 // 10 days
}

fn default_overlap_minutes() -> i64 {
    45
}

fn default_concurrency() -> usize {
    2
}

fn default_batch_pause_ms() -> u64 {
    200
}

fn default_watermark_table() -> String {
    "etl_watermarks".to_string()
}

impl Default for EtlConfig {
    fn default() -> Self {
        Self {
            batch_window_hours: default_batch_window_hours(),
            overlap_minutes: default_overlap_minutes(),
            concurrency: default_concurrency(),
            batch_pause_ms: default_batch_pause_ms(),
            watermark_table: default_watermark_table(),
        }
    }
}

impl EtlConfig {
    pub fn batch_window(&self) -> Duration {
        Duration::hours(self.batch_window_hours)
    }

    pub fn overlap(&self) -> Duration {
        Duration::minutes(self.overlap_minutes)
    }

    pub fn batch_pause(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.batch_pause_ms)
    }
}
