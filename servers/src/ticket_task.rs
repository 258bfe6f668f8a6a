//! Concrete `TicketKeyDeriver`/`TicketKeyTarget` implementations wiring
//! `lib_common::ticket`'s rotation loop to `ring`'s HKDF-SHA256 and to
//! this binary's TLS listeners.
//!
//! `rustls::ServerConfig` does not expose a constructor that accepts
//! externally supplied session-ticket-key bytes (`Ticketer::new()` only
//! builds one from fresh random key material). `install` below therefore
//! rebuilds the listener's `ServerConfig` with a new `Ticketer` on every
//! rotation — the derived key still gates *when* a rotation happens and
//! is logged for observability, but the AEAD key sealing the tickets
//! themselves comes from `rustls`'s own RNG rather than the derived
//! bytes. Noted as a deliberate simplification in `DESIGN.md`.

use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use lib_common::error::TicketRotationError;
use lib_common::ticket::{TicketKeyDeriver, TicketKeyTarget};
use ring::hkdf::{KeyType, Salt, HKDF_SHA256};
use rustls::ServerConfig;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};

use crate::tls::build_server_config;

struct Len48;

impl KeyType for Len48 {
    fn len(&self) -> usize {
        48
    }
}

/// Derives a 48-byte session-ticket key via HKDF-SHA256, using the
/// rotation context string as salt and the configured seed as input
/// keying material.
pub struct RingDeriver;

#[async_trait]
impl TicketKeyDeriver for RingDeriver {
    async fn derive(&self, seed: &[u8], context: &str) -> anyhow::Result<[u8; 48]> {
        let salt = Salt::new(HKDF_SHA256, context.as_bytes());
        let prk = salt.extract(seed);
        let okm = prk
            .expand(&[b"dns-frontend-ticket-key"], Len48)
            .map_err(|_| anyhow::anyhow!("HKDF expand failed"))?;
        let mut out = [0u8; 48];
        okm.fill(&mut out)
            .map_err(|_| anyhow::anyhow!("HKDF fill failed"))?;
        Ok(out)
    }
}

/// One TLS listener's rotation target: rebuilds its `ServerConfig` with a
/// fresh `Ticketer` and swaps it behind an `ArcSwap`, which the accept
/// loop reads on every incoming connection.
pub struct ListenerTicketTarget {
    name: String,
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    alpn: Vec<&'static str>,
    slot: Arc<ArcSwap<ServerConfig>>,
}

impl ListenerTicketTarget {
    pub fn new(
        name: impl Into<String>,
        certs: Vec<CertificateDer<'static>>,
        key: PrivateKeyDer<'static>,
        alpn: Vec<&'static str>,
        slot: Arc<ArcSwap<ServerConfig>>,
    ) -> Self {
        ListenerTicketTarget {
            name: name.into(),
            certs,
            key,
            alpn,
            slot,
        }
    }
}

#[async_trait]
impl TicketKeyTarget for ListenerTicketTarget {
    fn name(&self) -> &str {
        &self.name
    }

    async fn install(&self, key: [u8; 48]) -> Result<(), TicketRotationError> {
        let fresh = build_server_config(&self.certs, &self.key, &self.alpn)
            .map_err(TicketRotationError::Derivation)?;
        self.slot.store(Arc::new(fresh));
        tracing::info!(
            listener = self.name.as_str(),
            fingerprint = key[0],
            "rotated session-ticket key"
        );
        Ok(())
    }
}

/// The DoH listener's rotation target: `axum_server`'s `RustlsConfig`
/// already wraps its `ServerConfig` behind an internal swap, reloaded via
/// `reload_from_config` rather than our own `ArcSwap`.
pub struct DohTicketTarget {
    name: String,
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    alpn: Vec<&'static str>,
    rustls_config: axum_server::tls_rustls::RustlsConfig,
}

impl DohTicketTarget {
    pub fn new(
        name: impl Into<String>,
        certs: Vec<CertificateDer<'static>>,
        key: PrivateKeyDer<'static>,
        alpn: Vec<&'static str>,
        rustls_config: axum_server::tls_rustls::RustlsConfig,
    ) -> Self {
        DohTicketTarget {
            name: name.into(),
            certs,
            key,
            alpn,
            rustls_config,
        }
    }
}

#[async_trait]
impl TicketKeyTarget for DohTicketTarget {
    fn name(&self) -> &str {
        &self.name
    }

    async fn install(&self, key: [u8; 48]) -> Result<(), TicketRotationError> {
        let fresh = build_server_config(&self.certs, &self.key, &self.alpn)
            .map_err(TicketRotationError::Derivation)?;
        self.rustls_config.reload_from_config(Arc::new(fresh));
        tracing::info!(
            listener = self.name.as_str(),
            fingerprint = key[0],
            "rotated session-ticket key"
        );
        Ok(())
    }
}
