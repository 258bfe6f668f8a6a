//! Lifecycle bus (A6): `prepare` / `go` / `stop` events, generalising the
//! teacher's `Registry`/`UpstreamManager` pattern of a shared, cancellable
//! state machine into a plain broadcast channel. The publish/subscribe
//! bus itself is an external collaborator per spec §1 — this module only
//! models the three events the front-end reacts to.

use tokio::sync::broadcast;

/// The three lifecycle events the front-end subscribes to. `Prepare` is
/// published once at boot; `Go` starts the listener supervisor; `Stop`
/// triggers graceful drain (C2/C4.11).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Published once at process boot, before listeners bind.
    Prepare,
    /// Starts the listener supervisor.
    Go,
    /// Triggers graceful drain and process exit.
    Stop,
}

/// A thin wrapper around a broadcast channel carrying `LifecycleEvent`s.
/// Every subscriber gets every event from the point of subscription
/// onward; events before boot are not buffered.
#[derive(Clone)]
pub struct LifecycleBus {
    tx: broadcast::Sender<LifecycleEvent>,
}

impl LifecycleBus {
    /// Builds a bus with room for a handful of in-flight events —
    /// `prepare`/`go`/`stop` are rare, so a small buffer is sufficient.
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(8);
        LifecycleBus { tx }
    }

    /// Subscribes a new listener to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.tx.subscribe()
    }

    /// Publishes an event to every current subscriber. Errors (no
    /// subscribers left) are not fatal — a lifecycle bus with nobody
    /// listening is a boot-ordering quirk, not a process error.
    pub fn publish(&self, event: LifecycleEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for LifecycleBus {
    fn default() -> Self {
        Self::new()
    }
}
