//! Process-wide counters and the admission snapshot (C1).
//!
//! `Stats` holds monotonic counters plus one live gauge (`open_conns`) and
//! the backpressure snapshot `bp`. `bp` is replaced as a single unit via
//! `ArcSwap` so readers never observe a torn tuple — the admission
//! controller is the only writer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;

/// The 5-tuple load/admission snapshot, published atomically by the
/// admission controller (C9) once per tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backpressure {
    /// 1-minute load average, normalised to percent-of-CPU-count.
    pub avg1: f64,
    /// 5-minute load average, normalised to percent-of-CPU-count.
    pub avg5: f64,
    /// 15-minute load average, normalised to percent-of-CPU-count.
    pub avg15: f64,
    /// Pressure accumulator driving admission/shutdown decisions.
    pub adj: i64,
    /// Current per-listener connection cap.
    pub max_conns: u32,
}

impl Default for Backpressure {
    fn default() -> Self {
        Backpressure {
            avg1: 0.0,
            avg5: 0.0,
            avg15: 0.0,
            adj: 0,
            max_conns: 0,
        }
    }
}

/// Process-wide counters. Every field besides `open_conns` is monotonic;
/// `open_conns` is a live gauge incremented on track and decremented on
/// close.
#[derive(Debug)]
pub struct Stats {
    reqs: AtomicU64,
    checks: AtomicU64,
    tls_errors: AtomicU64,
    drops: AtomicU64,
    total_conns: AtomicU64,
    open_conns: AtomicU64,
    timeouts: AtomicU64,
    heap_snaps: AtomicU64,
    bp: ArcSwap<Backpressure>,
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

impl Stats {
    /// Builds a zeroed counter block with a zero-valued backpressure snapshot.
    pub fn new() -> Self {
        Stats {
            reqs: AtomicU64::new(0),
            checks: AtomicU64::new(0),
            tls_errors: AtomicU64::new(0),
            drops: AtomicU64::new(0),
            total_conns: AtomicU64::new(0),
            open_conns: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            heap_snaps: AtomicU64::new(0),
            bp: ArcSwap::from_pointee(Backpressure::default()),
        }
    }

    /// Bumped once per resolver dispatch (the heartbeat, C4.10).
    pub fn inc_reqs(&self) {
        self.reqs.fetch_add(1, Ordering::Relaxed);
    }

    /// Bumped once per health-check hit.
    pub fn inc_checks(&self) {
        self.checks.fetch_add(1, Ordering::Relaxed);
    }

    /// Bumped on a TLS handshake or client error.
    pub fn inc_tls_errors(&self) {
        self.tls_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Bumped when a connection is refused by admission control. Per spec
    /// design note (a): a drop also counts toward `total_conns` — this is
    /// a deliberate choice preserved from the source, not an oversight.
    pub fn inc_drops(&self) {
        self.drops.fetch_add(1, Ordering::Relaxed);
        self.total_conns.fetch_add(1, Ordering::Relaxed);
    }

    /// Bumped on every successfully tracked connection.
    pub fn inc_total_conns(&self) {
        self.total_conns.fetch_add(1, Ordering::Relaxed);
    }

    /// Live gauge: a connection was tracked.
    pub fn inc_open_conns(&self) {
        self.open_conns.fetch_add(1, Ordering::Relaxed);
    }

    /// Live gauge: a connection closed.
    pub fn dec_open_conns(&self) {
        self.open_conns.fetch_sub(1, Ordering::Relaxed);
    }

    /// Bumped on an idle-timeout close.
    pub fn inc_timeouts(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Bumped when the gated heap-snapshot path fires; callers must check
    /// `heap_snaps() < 20` before calling.
    pub fn inc_heap_snaps(&self) {
        self.heap_snaps.fetch_add(1, Ordering::Relaxed);
    }

    /// Current open connection count.
    pub fn open_conns(&self) -> u64 {
        self.open_conns.load(Ordering::Relaxed)
    }

    /// Number of heap snapshots emitted so far this process.
    pub fn heap_snaps(&self) -> u64 {
        self.heap_snaps.load(Ordering::Relaxed)
    }

    /// Total requests dispatched to the resolver.
    pub fn reqs(&self) -> u64 {
        self.reqs.load(Ordering::Relaxed)
    }

    /// Reads the current backpressure snapshot.
    pub fn backpressure(&self) -> Arc<Backpressure> {
        self.bp.load_full()
    }

    /// Replaces the backpressure snapshot as a single unit. Called once per
    /// admission tick (C9); never partially updated.
    pub fn publish_backpressure(&self, bp: Backpressure) {
        self.bp.store(Arc::new(bp));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_counts_toward_total() {
        let s = Stats::new();
        s.inc_drops();
        assert_eq!(s.open_conns(), 0);
        let bp = s.backpressure();
        assert_eq!(bp.max_conns, 0);
    }

    #[test]
    fn backpressure_replaces_as_one_unit() {
        let s = Stats::new();
        s.publish_backpressure(Backpressure {
            avg1: 10.0,
            avg5: 5.0,
            avg15: 1.0,
            adj: 3,
            max_conns: 64,
        });
        let bp = s.backpressure();
        assert_eq!(bp.adj, 3);
        assert_eq!(bp.max_conns, 64);
    }

    #[test]
    fn open_conns_gauge_tracks_track_and_close() {
        let s = Stats::new();
        s.inc_open_conns();
        s.inc_open_conns();
        assert_eq!(s.open_conns(), 2);
        s.dec_open_conns();
        assert_eq!(s.open_conns(), 1);
    }
}
