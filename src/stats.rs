//! Engine counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of engine counters since construction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Wire chunks delivered to subscribers.
    pub chunks_emitted: u64,
    /// Capture buffers dropped by the playback gate.
    pub buffers_gated: u64,
    /// Capture buffers dropped because the capture ring was full.
    pub capture_overflows: u64,
    /// Buffers dropped because conversion failed or no converter was
    /// available.
    pub conversion_failures: u64,
    /// Wire chunks accepted for bot playback.
    pub playback_chunks: u64,
    /// Mix-format samples dropped because the playback queue was full.
    pub playback_overflow_samples: u64,
}

/// Shared counters. Updated from both the real-time and control contexts.
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub chunks_emitted: AtomicU64,
    pub buffers_gated: AtomicU64,
    pub capture_overflows: AtomicU64,
    pub conversion_failures: AtomicU64,
    pub playback_chunks: AtomicU64,
    pub playback_overflow_samples: AtomicU64,
}

impl StatsCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> EngineStats {
        EngineStats {
            chunks_emitted: self.chunks_emitted.load(Ordering::SeqCst),
            buffers_gated: self.buffers_gated.load(Ordering::SeqCst),
            capture_overflows: self.capture_overflows.load(Ordering::SeqCst),
            conversion_failures: self.conversion_failures.load(Ordering::SeqCst),
            playback_chunks: self.playback_chunks.load(Ordering::SeqCst),
            playback_overflow_samples: self.playback_overflow_samples.load(Ordering::SeqCst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_snapshot() {
        let counters = StatsCounters::new();
        StatsCounters::incr(&counters.chunks_emitted);
        StatsCounters::incr(&counters.chunks_emitted);
        StatsCounters::add(&counters.playback_overflow_samples, 128);

        let stats = counters.snapshot();
        assert_eq!(stats.chunks_emitted, 2);
        assert_eq!(stats.playback_overflow_samples, 128);
        assert_eq!(stats.buffers_gated, 0);
    }

    #[test]
    fn test_stats_default() {
        let stats = EngineStats::default();
        assert_eq!(stats.chunks_emitted, 0);
        assert_eq!(stats.conversion_failures, 0);
    }
}
