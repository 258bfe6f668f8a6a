//! Ticket-key rotator (C10): weekly recomputation of TLS session-ticket
//! keys from a seed plus a monthly context string.
//!
//! Grounded on `servers/src/yahoo_logic/upstream.rs`'s `tokio::select!`
//! periodic-loop-with-shutdown pattern. Cryptographic derivation itself is
//! out of scope (spec §1) and lives behind the `TicketKeyDeriver` trait.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, Utc};
use tokio::sync::broadcast;
use tracing::warn;

use crate::error::TicketRotationError;

/// One week, the rotation period spec §4.5 specifies.
pub const ROTATION_PERIOD: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Derives a 48-byte TLS session-ticket key from a seed and a context
/// string. Cryptographic derivation is an external collaborator per spec
/// §1; this crate only specifies the call shape and the rotation cadence.
#[async_trait]
pub trait TicketKeyDeriver: Send + Sync {
    /// Derives the 48-byte key. `seed` is the base64 secret if configured,
    /// else the TLS private key bytes. `context` is
    /// `"<UTC-year> <UTC-month><image-ref>"`, or empty if no image ref is
    /// configured.
    async fn derive(&self, seed: &[u8], context: &str) -> anyhow::Result<[u8; 48]>;
}

/// A single TLS listener this rotator can install a new ticket key on.
/// `install` wraps whatever the platform TLS API calls for (here,
/// swapping the ticketer on an `rustls::ServerConfig` via interior
/// mutability at the call site — the exact listener plumbing lives in
/// `listener.rs`).
#[async_trait]
pub trait TicketKeyTarget: Send + Sync {
    /// A name used only for logging on install failure.
    fn name(&self) -> &str;
    /// Installs `key` as this listener's active session-ticket key.
    async fn install(&self, key: [u8; 48]) -> Result<(), TicketRotationError>;
}

/// Builds the `"<UTC-year> <UTC-month><image-ref>"` context string, or an
/// empty string if `image_ref` is `None`.
pub fn build_context(image_ref: Option<&str>) -> String {
    match image_ref {
        None => String::new(),
        Some(image_ref) => {
            let now = Utc::now();
            format!("{} {}{}", now.year(), now.month(), image_ref)
        }
    }
}

/// Runs the weekly rotation loop until `shutdown` fires. Failures are
/// logged at `warn!` and do not abort the loop — the tick simply repeats
/// next period, matching spec "Failures are logged and do not abort."
pub async fn run_rotation_loop(
    deriver: Arc<dyn TicketKeyDeriver>,
    targets: Vec<Arc<dyn TicketKeyTarget>>,
    seed: Vec<u8>,
    image_ref: Option<String>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut interval = tokio::time::interval(ROTATION_PERIOD);
    // The first tick fires immediately; skip it so the first real rotation
    // happens a full period after startup.
    interval.tick().await;
    loop {
        tokio::select! {
            _ = interval.tick() => {
                rotate_once(&deriver, &targets, &seed, image_ref.as_deref()).await;
            }
            _ = shutdown.recv() => {
                break;
            }
        }
    }
}

async fn rotate_once(
    deriver: &Arc<dyn TicketKeyDeriver>,
    targets: &[Arc<dyn TicketKeyTarget>],
    seed: &[u8],
    image_ref: Option<&str>,
) {
    let context = build_context(image_ref);
    let key = match deriver.derive(seed, &context).await {
        Ok(key) => key,
        Err(e) => {
            warn!(error = %e, "ticket key derivation failed, will retry next rotation");
            return;
        }
    };
    for target in targets {
        if let Err(e) = target.install(key).await {
            warn!(listener = target.name(), error = %e, "failed to install rotated ticket key");
        }
    }
}
