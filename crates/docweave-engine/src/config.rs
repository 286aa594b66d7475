use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::{Backoff, RetryPolicy};

/// Tuning knobs for one conversion, passed explicitly to every stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Deepest nesting level the destination accepts in a single write.
    pub max_depth: usize,
    /// Number of recently emitted blocks checked for duplicates.
    pub dedupe_window: usize,
    /// Maximum blocks per append call.
    pub batch_size: usize,
    pub append_attempts: u32,
    pub cleanup_attempts: u32,
    pub transient_backoff_ms: u64,
    pub rate_limit_backoff_ms: u64,
    pub rate_limit_backoff_cap_ms: u64,
    pub inter_chunk_delay_ms: u64,
    pub inter_marker_delay_ms: u64,
    pub list_page_size: usize,
    /// Log full tree outlines at debug level.
    pub debug: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_depth: 2,
            dedupe_window: 5,
            batch_size: 100,
            append_attempts: 3,
            cleanup_attempts: 3,
            transient_backoff_ms: 250,
            rate_limit_backoff_ms: 5_000,
            rate_limit_backoff_cap_ms: 30_000,
            inter_chunk_delay_ms: 100,
            inter_marker_delay_ms: 500,
            list_page_size: 100,
            debug: false,
        }
    }
}

impl PipelineConfig {
    /// Retry policy for chunk appends: linear transient backoff.
    pub fn append_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.append_attempts.max(1),
            backoff: Backoff::Linear(Duration::from_millis(self.transient_backoff_ms)),
            rate_limit_base: Duration::from_millis(self.rate_limit_backoff_ms),
            rate_limit_cap: Duration::from_millis(self.rate_limit_backoff_cap_ms),
        }
    }

    /// Retry policy for page creation and tree reads: exponential transient
    /// backoff, same rate-limit schedule as appends.
    pub fn request_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.append_attempts.max(1),
            backoff: Backoff::Exponential(Duration::from_millis(self.transient_backoff_ms)),
            rate_limit_base: Duration::from_millis(self.rate_limit_backoff_ms),
            rate_limit_cap: Duration::from_millis(self.rate_limit_backoff_cap_ms),
        }
    }

    /// Retry policy for marker cleanup: exponential backoff.
    pub fn cleanup_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.cleanup_attempts.max(1),
            backoff: Backoff::Exponential(Duration::from_millis(self.transient_backoff_ms)),
            rate_limit_base: Duration::from_millis(self.rate_limit_backoff_ms),
            rate_limit_cap: Duration::from_millis(self.rate_limit_backoff_cap_ms),
        }
    }

    pub fn inter_chunk_delay(&self) -> Duration {
        Duration::from_millis(self.inter_chunk_delay_ms)
    }

    pub fn inter_marker_delay(&self) -> Duration {
        Duration::from_millis(self.inter_marker_delay_ms)
    }

    /// Batch size clamped to at least one block.
    pub fn chunk_size(&self) -> usize {
        self.batch_size.max(1)
    }

    /// Nesting limit; the top level and its direct children always fit.
    pub fn depth_limit(&self) -> usize {
        self.max_depth.max(2)
    }
}
