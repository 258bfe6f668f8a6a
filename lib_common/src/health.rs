//! Health and heartbeat (C4.10): the `/` health-check handler, and the
//! heartbeat called at the top of every resolver dispatch.
//!
//! The heap-snapshot path is a rare, gated diagnostic affordance — see
//! spec §9's "Heap snapshots" design note — never on the hot path.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::info;

use crate::stats::Stats;

/// Cap on heap snapshots emitted per process, per spec §4.10.
pub const MAX_HEAP_SNAPS: u64 = 20;

/// Controls whether/when the heartbeat takes a heap snapshot.
#[derive(Debug, Clone, Copy)]
pub struct HeapSnapshotPolicy {
    /// Whether snapshotting is enabled at all (`FRONTEND_MEASURE_HEAP`).
    pub measure_heap: bool,
    /// Whether this process is running outside a cloud environment.
    pub on_local: bool,
    /// Snapshot every `max_conns * multiplier` requests.
    pub multiplier: u64,
}

/// Calls the heartbeat: bumps `reqs`, and — when `policy` allows it and
/// the request count lands on the snapshot boundary — requests a heap
/// snapshot via `take_snapshot`, respecting the 20-snapshot cap.
///
/// `take_snapshot` is injected because actually capturing a heap
/// snapshot is a platform/runtime affordance outside this crate's scope;
/// this function only owns the gating decision.
pub fn heartbeat(
    stats: &Stats,
    policy: HeapSnapshotPolicy,
    max_conns: u32,
    high_memory_pressure: bool,
    take_snapshot: impl FnOnce(),
) {
    stats.inc_reqs();

    if !policy.measure_heap {
        return;
    }
    if !(policy.on_local || high_memory_pressure) {
        return;
    }
    if stats.heap_snaps() >= MAX_HEAP_SNAPS {
        return;
    }
    let boundary = (max_conns as u64).saturating_mul(policy.multiplier).max(1);
    if stats.reqs() % boundary != 0 {
        return;
    }
    take_snapshot();
    stats.inc_heap_snaps();
}

/// The `/` health-check handler body: bump `checks` and reply `200`.
/// Exposed as a plain function so both the `axum` handler in `servers`
/// and tests can call it without standing up a full router.
pub fn handle_health_check(stats: &Stats) -> &'static str {
    stats.inc_checks();
    "OK"
}

/// Periodically logs `Stats` at `info!`, the way `restream.rs`'s
/// `spawn_watchdog` runs a background `loop` + `sleep`. Intended to be
/// spawned once at startup and run for the process lifetime.
pub async fn spawn_stats_logger(stats: Arc<Stats>, period: std::time::Duration) {
    let tick: AtomicU64 = AtomicU64::new(0);
    loop {
        tokio::time::sleep(period).await;
        let n = tick.fetch_add(1, Ordering::Relaxed);
        let bp = stats.backpressure();
        info!(
            tick = n,
            reqs = stats.reqs(),
            open_conns = stats.open_conns(),
            avg1 = bp.avg1,
            avg5 = bp.avg5,
            adj = bp.adj,
            max_conns = bp.max_conns,
            "stats snapshot"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(measure_heap: bool, on_local: bool) -> HeapSnapshotPolicy {
        HeapSnapshotPolicy {
            measure_heap,
            on_local,
            multiplier: 1,
        }
    }

    #[test]
    fn disabled_policy_never_snapshots() {
        let stats = Stats::new();
        let mut fired = false;
        for _ in 0..10 {
            heartbeat(&stats, policy(false, true), 1, false, || fired = true);
        }
        assert!(!fired);
        assert_eq!(stats.heap_snaps(), 0);
    }

    #[test]
    fn gated_snapshot_fires_on_boundary() {
        let stats = Stats::new();
        let mut fires = 0;
        for _ in 0..5 {
            heartbeat(&stats, policy(true, true), 1, false, || fires += 1);
        }
        assert_eq!(fires, 5);
        assert_eq!(stats.heap_snaps(), 5);
    }

    #[test]
    fn snapshot_capped_at_twenty() {
        let stats = Stats::new();
        let mut fires = 0;
        for _ in 0..30 {
            heartbeat(&stats, policy(true, true), 1, false, || fires += 1);
        }
        assert_eq!(fires, MAX_HEAP_SNAPS as usize);
    }

    #[test]
    fn remote_low_pressure_skips_snapshot() {
        let stats = Stats::new();
        let mut fired = false;
        heartbeat(&stats, policy(true, false), 1, false, || fired = true);
        assert!(!fired);
    }

    #[test]
    fn health_check_increments_checks() {
        let stats = Stats::new();
        assert_eq!(handle_health_check(&stats), "OK");
        assert_eq!(handle_health_check(&stats), "OK");
    }
}
