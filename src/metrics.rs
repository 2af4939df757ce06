//! Pipeline counters.
//!
//! One [`PipelineMetrics`] instance is created per bridge and shared by the
//! batcher, queue and dispatcher. All counters are relaxed atomics; a
//! [`MetricsSnapshot`] is a point-in-time copy for logging and tests.
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

#[derive(Debug, Default)]
pub struct PipelineMetrics {
    chunks_received: AtomicU64,
    batches_flushed: AtomicU64,
    jobs_accepted: AtomicU64,
    jobs_dropped: AtomicU64,
    deliveries_ok: AtomicU64,
    deliveries_failed: AtomicU64,
    deliveries_skipped: AtomicU64,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_chunks_received(&self) {
        self.chunks_received.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_batches_flushed(&self) {
        self.batches_flushed.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_jobs_accepted(&self) {
        self.jobs_accepted.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_jobs_dropped(&self) {
        self.jobs_dropped.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_deliveries_ok(&self) {
        self.deliveries_ok.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_deliveries_failed(&self) {
        self.deliveries_failed.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_deliveries_skipped(&self) {
        self.deliveries_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Mark a dispatch as started; returns the new in-flight count.
    pub fn dispatch_started(&self) -> usize {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        now
    }

    pub fn dispatch_finished(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            chunks_received: self.chunks_received.load(Ordering::Relaxed),
            batches_flushed: self.batches_flushed.load(Ordering::Relaxed),
            jobs_accepted: self.jobs_accepted.load(Ordering::Relaxed),
            jobs_dropped: self.jobs_dropped.load(Ordering::Relaxed),
            deliveries_ok: self.deliveries_ok.load(Ordering::Relaxed),
            deliveries_failed: self.deliveries_failed.load(Ordering::Relaxed),
            deliveries_skipped: self.deliveries_skipped.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::SeqCst),
            peak_in_flight: self.peak_in_flight.load(Ordering::SeqCst),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub chunks_received: u64,
    pub batches_flushed: u64,
    pub jobs_accepted: u64,
    pub jobs_dropped: u64,
    pub deliveries_ok: u64,
    pub deliveries_failed: u64,
    pub deliveries_skipped: u64,
    pub in_flight: usize,
    pub peak_in_flight: usize,
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "chunks={} batches={} accepted={} dropped={} ok={} failed={} skipped={} in_flight={} peak={}",
            self.chunks_received,
            self.batches_flushed,
            self.jobs_accepted,
            self.jobs_dropped,
            self.deliveries_ok,
            self.deliveries_failed,
            self.deliveries_skipped,
            self.in_flight,
            self.peak_in_flight
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_flight_tracks_peak() {
        let m = PipelineMetrics::new();
        assert_eq!(m.dispatch_started(), 1);
        assert_eq!(m.dispatch_started(), 2);
        m.dispatch_finished();
        assert_eq!(m.dispatch_started(), 2);
        m.dispatch_finished();
        m.dispatch_finished();

        let snap = m.snapshot();
        assert_eq!(snap.in_flight, 0);
        assert_eq!(snap.peak_in_flight, 2);
    }

    #[test]
    fn counters_increment_independently() {
        let m = PipelineMetrics::new();
        m.inc_jobs_accepted();
        m.inc_jobs_accepted();
        m.inc_jobs_dropped();
        m.inc_deliveries_failed();
        let snap = m.snapshot();
        assert_eq!(snap.jobs_accepted, 2);
        assert_eq!(snap.jobs_dropped, 1);
        assert_eq!(snap.deliveries_failed, 1);
        assert_eq!(snap.deliveries_ok, 0);
    }
}
