//! Shutdown (graceful drain, C4.11): triggered by the `stop` lifecycle
//! event. Arms a hard timeout, cancels the admission timer, caps every
//! listener to one accepted connection (health checks only), atomically
//! ends the tracker, force-closes every live connection, closes every
//! listener, and exits the process with status 0 regardless of pending
//! handles.
//!
//! Grounded on `servers/src/yahoo_logic/upstream.rs`'s `tokio::select!`
//! shutdown-receiver pattern, plus `restream.rs`'s `axum_server::Handle`
//! graceful-shutdown idiom generalised to five listener flavours instead
//! of one.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::tracker::Tracker;

/// A listener's process-level close hook (e.g. `axum_server::Handle::shutdown`,
/// or dropping a raw `TcpListener`'s accept task). Implemented once per
/// listener flavour in the `servers` binary.
pub trait ListenerCloser: Send + Sync {
    /// Stops this listener from accepting any further connections.
    fn close(&self);
}

/// Connections force-closed and listeners capped/closed during one drain,
/// returned for logging and tests.
#[derive(Debug, Default)]
pub struct DrainSummary {
    pub listeners_capped: usize,
    pub connections_closed: usize,
    pub listeners_closed: usize,
}

/// Everything `stop` does except the final `std::process::exit` — factored
/// out so it is unit-testable. Per spec §4.11:
/// 1. cancel the admission timer;
/// 2. `adjustMaxConns(1)` on every live listener (still listening, capped
///    to exactly one connection — health checks keep working);
/// 3. atomically `end()` the tracker;
/// 4. force-close every connection that was live at the moment of `end()`;
/// 5. close every listener.
pub async fn drain_once(
    tracker: &Tracker,
    admission_cancel: &CancellationToken,
    listener_closers: &[Arc<dyn ListenerCloser>],
) -> DrainSummary {
    admission_cancel.cancel();

    let mut summary = DrainSummary::default();
    for listener in tracker.servers().await {
        listener.set_max_conns(1);
        summary.listeners_capped += 1;
    }

    let prior = tracker.end().await;
    for (_listener, handles) in &prior {
        for handle in handles {
            handle.force_close();
            summary.connections_closed += 1;
        }
    }

    for closer in listener_closers {
        closer.close();
        summary.listeners_closed += 1;
    }

    summary
}

/// Runs `drain_once` under a hard timeout and then exits the process with
/// status 0, exactly as spec §4.11 requires ("exit with status 0
/// regardless of pending handles"). `final_snapshot` is an optional,
/// already-gated diagnostic hook (spec §9: heap snapshots are a rare
/// diagnostic affordance, never mandatory).
pub async fn graceful_drain(
    tracker: &Tracker,
    admission_cancel: &CancellationToken,
    listener_closers: &[Arc<dyn ListenerCloser>],
    shutdown_timeout: Duration,
    final_snapshot: impl FnOnce() + Send + 'static,
) -> ! {
    let hard_exit = tokio::spawn(async move {
        tokio::time::sleep(shutdown_timeout).await;
        warn!("shutdown timeout elapsed before drain finished, forcing exit");
        std::process::exit(0);
    });

    let summary = drain_once(tracker, admission_cancel, listener_closers).await;
    tracing::info!(
        listeners_capped = summary.listeners_capped,
        connections_closed = summary.connections_closed,
        listeners_closed = summary.listeners_closed,
        "graceful drain complete"
    );

    final_snapshot();
    hard_exit.abort();
    std::process::exit(0);
}
