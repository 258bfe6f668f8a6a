//! Periodic admission tick (C9 driver): samples OS load/memory every five
//! seconds, publishes the resulting `Backpressure` snapshot, applies the
//! new cap to every tracked listener, and — on sustained overload —
//! begins the same graceful drain a `stop` lifecycle event would trigger.
//!
//! Grounded on `servers/src/restream.rs`'s `spawn_watchdog` background
//! `loop` + `tokio::time::sleep` idiom, generalised from a fixed
//! once-a-day restart check to a continuously retuned admission cap.

use std::sync::Arc;
use std::time::Duration;

use lib_common::admission::{AdmissionConfig, AdmissionController};
use lib_common::shutdown::{graceful_drain, ListenerCloser};
use lib_common::stats::Stats;
use lib_common::tracker::Tracker;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How often the admission controller resamples load/memory.
pub const TICK_PERIOD: Duration = Duration::from_secs(5);

/// Runs the admission tick loop until `admission_cancel` fires, or until
/// sustained overload triggers a graceful drain (which never returns).
pub async fn run(
    config: AdmissionConfig,
    stats: Arc<Stats>,
    tracker: Arc<Tracker>,
    admission_cancel: CancellationToken,
    listener_closers: Vec<Arc<dyn ListenerCloser>>,
    shutdown_timeout: Duration,
) {
    let mut controller = AdmissionController::new(config);
    let mut interval = tokio::time::interval(TICK_PERIOD);

    loop {
        tokio::select! {
            _ = admission_cancel.cancelled() => {
                info!("admission loop cancelled");
                return;
            }
            _ = interval.tick() => {
                let decision = controller.tick();
                stats.publish_backpressure(decision.bp);

                for listener in tracker.servers().await {
                    listener.set_max_conns(decision.bp.max_conns);
                }

                if decision.elevated {
                    warn!(
                        adj = decision.bp.adj,
                        avg1 = decision.bp.avg1,
                        avg5 = decision.bp.avg5,
                        max_conns = decision.bp.max_conns,
                        "admission pressure elevated"
                    );
                }

                if decision.should_shutdown {
                    warn!(adj = decision.bp.adj, "sustained overload, starting graceful drain");
                    graceful_drain(
                        &tracker,
                        &admission_cancel,
                        &listener_closers,
                        shutdown_timeout,
                        || {},
                    )
                    .await;
                }
            }
        }
    }
}
