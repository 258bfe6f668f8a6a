//! Connection tracker (C2): registry of live listeners and per-listener
//! connection maps. Drives graceful drain.
//!
//! Grounded on `lib_common/src/core/registry.rs`'s `Arc<Mutex<HashMap<...>>>`
//! registry and `upstream_manager.rs`'s `Arc<RwLock<OperationMode>>`
//! shared-state pattern, generalised to two nesting levels (listener, then
//! connection) per spec §3/§4.1.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;

use crate::error::TrackerError;

/// The kind of listener a `ListenerRecord` represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerKind {
    /// Plain DNS-over-TCP, no TLS.
    DotCleartext,
    /// DNS-over-TLS.
    Dot,
    /// DNS-over-TLS behind a PROXYv2 splice.
    DotProxyProto,
    /// DNS-over-HTTPS over TLS, ALPN `h2`.
    Doh,
    /// DNS-over-HTTPS over cleartext h2c.
    DohCleartext,
    /// The `/` health-check listener.
    Health,
}

/// The sentinel "not tracked" listener id, per spec §4.1.
pub const ZERO_ID: &str = "";

/// Identity of a connection: `remoteAddr|remotePort`, per spec §3.
pub fn conn_key(addr: SocketAddr) -> String {
    format!("{}|{}", addr.ip(), addr.port())
}

/// A handle a tracked connection registers so the tracker can force-close
/// it during drain. `notify` fires exactly once.
pub struct ConnHandle {
    close: tokio::sync::Notify,
    closed: AtomicBool,
}

impl ConnHandle {
    fn new() -> Arc<Self> {
        Arc::new(ConnHandle {
            close: tokio::sync::Notify::new(),
            closed: AtomicBool::new(false),
        })
    }

    /// Forces this connection closed. Idempotent.
    pub fn force_close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.close.notify_waiters();
        }
    }

    /// Resolves once `force_close` has been called.
    pub async fn closed(&self) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        self.close.notified().await;
    }

    /// Synchronous check of whether `force_close` has already fired.
    pub fn is_force_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// One bound listener: its kind, bound address, a listening flag, and a
/// map of live connections keyed by `conn_key`.
pub struct ListenerRecord {
    id: String,
    kind: ListenerKind,
    bound_addr: SocketAddr,
    listening: AtomicBool,
    max_conns: AtomicU32,
    conns: DashMap<String, Arc<ConnHandle>>,
}

impl ListenerRecord {
    /// The bound-port id, as a decimal string.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// This listener's protocol variant.
    pub fn kind(&self) -> ListenerKind {
        self.kind
    }

    /// The address this listener is bound to.
    pub fn bound_addr(&self) -> SocketAddr {
        self.bound_addr
    }

    /// Whether this listener is currently accepting connections.
    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::Relaxed)
    }

    /// Stops this listener from accepting further connections. Does not
    /// touch already-tracked connections.
    pub fn stop_listening(&self) {
        self.listening.store(false, Ordering::Relaxed);
    }

    /// Current per-listener connection cap, applied by the admission
    /// controller (C9). Takes effect on subsequent accepts only.
    pub fn max_conns(&self) -> u32 {
        self.max_conns.load(Ordering::Relaxed)
    }

    /// Sets the per-listener connection cap.
    pub fn set_max_conns(&self, n: u32) {
        self.max_conns.store(n, Ordering::Relaxed);
    }

    /// Number of connections currently tracked on this listener.
    pub fn conn_count(&self) -> usize {
        self.conns.len()
    }
}

/// Registry of live listeners and, per listener, live connections.
///
/// `end()` atomically swaps out both the listener list and every
/// connection map, returning the prior state so the caller can force-close
/// everything that was live at the moment of the swap.
pub struct Tracker {
    listeners: RwLock<Vec<Arc<ListenerRecord>>>,
    ended: AtomicBool,
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new()
    }
}

impl Tracker {
    /// Builds an empty, not-yet-ended tracker.
    pub fn new() -> Self {
        Tracker {
            listeners: RwLock::new(Vec::new()),
            ended: AtomicBool::new(false),
        }
    }

    /// Registers a newly bound listener and returns its record. Returns
    /// `None` if the tracker has already been ended.
    pub async fn track_server(
        &self,
        kind: ListenerKind,
        bound_addr: SocketAddr,
    ) -> Option<Arc<ListenerRecord>> {
        if self.ended.load(Ordering::SeqCst) {
            return None;
        }
        let record = Arc::new(ListenerRecord {
            id: bound_addr.port().to_string(),
            kind,
            bound_addr,
            listening: AtomicBool::new(true),
            max_conns: AtomicU32::new(0),
            conns: DashMap::new(),
        });
        self.listeners.write().await.push(record.clone());
        Some(record)
    }

    /// Tracks a newly accepted connection on `listener`. Returns the
    /// zero-id if the tracker has been ended, the listener is not
    /// listening, or `peer` has no remote endpoint — callers receiving the
    /// zero-id **must** close the socket.
    pub fn track_conn(
        &self,
        listener: &Arc<ListenerRecord>,
        peer: Option<SocketAddr>,
    ) -> Result<(String, Arc<ConnHandle>), TrackerError> {
        let Some(peer) = peer else {
            return Err(TrackerError::NoPeerAddr);
        };
        if self.ended.load(Ordering::SeqCst) || !listener.is_listening() {
            return Ok((ZERO_ID.to_string(), ConnHandle::new()));
        }
        let key = conn_key(peer);
        let handle = ConnHandle::new();
        listener.conns.insert(key.clone(), handle.clone());
        Ok((key, handle))
    }

    /// Removes a connection from its listener's map on close.
    pub fn untrack_conn(&self, listener: &Arc<ListenerRecord>, key: &str) {
        listener.conns.remove(key);
    }

    /// All currently registered listeners.
    pub async fn servers(&self) -> Vec<Arc<ListenerRecord>> {
        self.listeners.read().await.clone()
    }

    /// Atomically replaces the listener list with an empty one and returns
    /// the prior listeners plus every connection handle that was live on
    /// each, so the caller can force-close them. After this call, every
    /// subsequent `track_conn` returns the zero-id.
    pub async fn end(&self) -> Vec<(Arc<ListenerRecord>, Vec<Arc<ConnHandle>>)> {
        self.ended.store(true, Ordering::SeqCst);
        let mut guard = self.listeners.write().await;
        let prior = std::mem::take(&mut *guard);
        drop(guard);
        prior
            .into_iter()
            .map(|l| {
                let handles: Vec<_> = l.conns.iter().map(|e| e.value().clone()).collect();
                (l, handles)
            })
            .collect()
    }

    /// Whether `end()` has already been called.
    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }
}
