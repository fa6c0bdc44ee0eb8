//! Status - ディスパッチャの観測用カウンタ

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Snapshot of the dispatcher's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherStatus {
    pub started_at: DateTime<Utc>,
    pub in_flight: usize,
    pub limit: usize,
    pub admitted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub timed_out: u64,
}

/// Monotonic counters shared by the loops and the processor.
#[derive(Debug)]
pub struct DispatchStats {
    started_at: DateTime<Utc>,
    admitted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
}

impl Default for DispatchStats {
    fn default() -> Self {
        Self {
            started_at: Utc::now(),
            admitted: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            timed_out: AtomicU64::new(0),
        }
    }
}

impl DispatchStats {
    pub fn record_admitted(&self) {
        self.admitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_succeeded(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    /// Timeouts count as failures too.
    pub fn record_failed(&self, timed_out: bool) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        if timed_out {
            self.timed_out.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self, in_flight: usize, limit: usize) -> DispatcherStatus {
        DispatcherStatus {
            started_at: self.started_at,
            in_flight,
            limit,
            admitted: self.admitted.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_are_counted_as_failures() {
        let stats = DispatchStats::default();
        stats.record_admitted();
        stats.record_admitted();
        stats.record_succeeded();
        stats.record_failed(true);

        let status = stats.snapshot(0, 2);
        assert_eq!((status.admitted, status.succeeded), (2, 1));
        assert_eq!((status.failed, status.timed_out), (1, 1));
        assert!(status.started_at <= Utc::now());
    }
}
