//! Pipeline metrics.
//!
//! Counters and histograms for chunk outcomes and pipeline attempts. With no
//! recorder installed these are no-ops.

use std::time::Duration;

use metrics::{counter, histogram};

/// Metric name constants for consistency.
pub mod names {
    /// Chunks finished, by outcome.
    pub const CHUNKS_TOTAL: &str = "fanclip_chunks_total";

    /// Wall time per chunk in seconds.
    pub const CHUNK_SECONDS: &str = "fanclip_chunk_seconds";

    /// Pipeline attempts, by outcome.
    pub const ATTEMPTS_TOTAL: &str = "fanclip_attempts_total";
}

pub fn record_chunk(outcome: &'static str, elapsed: Duration) {
    counter!(names::CHUNKS_TOTAL, "outcome" => outcome).increment(1);
    histogram!(names::CHUNK_SECONDS).record(elapsed.as_secs_f64());
}

pub fn record_attempt(outcome: &'static str) {
    counter!(names::ATTEMPTS_TOTAL, "outcome" => outcome).increment(1);
}
