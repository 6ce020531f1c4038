//! Queue Metrics and Performance Monitoring
//!
//! Counters describing how batches flow through the engine, and a timer for
//! the slow network-bound steps.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Live counters, updated from the consumer thread and background tasks
#[derive(Debug, Default)]
pub struct EngineStats {
    refills_started: AtomicU64,
    refills_failed: AtomicU64,
    refills_coalesced: AtomicU64,
    candidates_fetched: AtomicU64,
    filtered_shown: AtomicU64,
    filtered_duplicate: AtomicU64,
    history_clears: AtomicU64,
    dropped_no_cover: AtomicU64,
    dropped_image_failed: AtomicU64,
    enqueued: AtomicU64,
    decisions: AtomicU64,
}

/// Copy of the counters at one point in time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub refills_started: u64,
    pub refills_failed: u64,
    pub refills_coalesced: u64,
    pub candidates_fetched: u64,
    pub filtered_shown: u64,
    pub filtered_duplicate: u64,
    pub history_clears: u64,
    pub dropped_no_cover: u64,
    pub dropped_image_failed: u64,
    pub enqueued: u64,
    pub decisions: u64,
}

/// Counter names, for call sites that record increments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    RefillStarted,
    RefillFailed,
    RefillCoalesced,
    CandidatesFetched,
    FilteredShown,
    FilteredDuplicate,
    HistoryCleared,
    DroppedNoCover,
    DroppedImageFailed,
    Enqueued,
    Decision,
}

impl EngineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(&self, counter: Counter) {
        self.add(counter, 1);
    }

    pub fn add(&self, counter: Counter, n: u64) {
        if n == 0 {
            return;
        }
        let slot = match counter {
            Counter::RefillStarted => &self.refills_started,
            Counter::RefillFailed => &self.refills_failed,
            Counter::RefillCoalesced => &self.refills_coalesced,
            Counter::CandidatesFetched => &self.candidates_fetched,
            Counter::FilteredShown => &self.filtered_shown,
            Counter::FilteredDuplicate => &self.filtered_duplicate,
            Counter::HistoryCleared => &self.history_clears,
            Counter::DroppedNoCover => &self.dropped_no_cover,
            Counter::DroppedImageFailed => &self.dropped_image_failed,
            Counter::Enqueued => &self.enqueued,
            Counter::Decision => &self.decisions,
        };
        slot.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            refills_started: load(&self.refills_started),
            refills_failed: load(&self.refills_failed),
            refills_coalesced: load(&self.refills_coalesced),
            candidates_fetched: load(&self.candidates_fetched),
            filtered_shown: load(&self.filtered_shown),
            filtered_duplicate: load(&self.filtered_duplicate),
            history_clears: load(&self.history_clears),
            dropped_no_cover: load(&self.dropped_no_cover),
            dropped_image_failed: load(&self.dropped_image_failed),
            enqueued: load(&self.enqueued),
            decisions: load(&self.decisions),
        }
    }
}

impl StatsSnapshot {
    /// Share of fetched candidates that made it into the ready queue
    pub fn yield_ratio(&self) -> f32 {
        if self.candidates_fetched == 0 {
            return 0.0;
        }
        self.enqueued as f32 / self.candidates_fetched as f32
    }
}

/// Performance timer for tracking operation duration
pub struct PerformanceTimer {
    start: Instant,
    label: String,
}

impl PerformanceTimer {
    pub fn new(label: &str) -> Self {
        Self {
            start: Instant::now(),
            label: label.to_string(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    pub fn log_if_slow(&self, threshold_ms: u64) {
        let elapsed = self.elapsed_ms();
        if elapsed > threshold_ms {
            tracing::warn!(
                "Slow operation: {} took {}ms (threshold: {}ms)",
                self.label,
                elapsed,
                threshold_ms
            );
        }
    }
}

impl Drop for PerformanceTimer {
    fn drop(&mut self) {
        let elapsed = self.elapsed_ms();
        tracing::debug!("{} completed in {}ms", self.label, elapsed);
    }
}
