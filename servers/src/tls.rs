//! TLS material loading and `rustls::ServerConfig` construction.
//!
//! Grounded on `servers/src/server_dummy.rs`'s `load_rustls_config`
//! (PKCS8-then-PKCS1 private key fallback) and `restream.rs`'s
//! `RustlsConfig::from_pem_file` usage, adapted to raw `tokio_rustls`
//! acceptors for the DoT/PROXYv2 listeners alongside `axum_server`'s
//! config type for the DoH listener.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use rustls::ServerConfig;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};

/// Loads a PEM certificate chain.
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path).with_context(|| format!("opening cert file {}", path.display()))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("parsing cert chain {}", path.display()))
}

/// Loads a PEM private key, trying PKCS8 first and falling back to PKCS1
/// (RSA) — the same fallback order `server_dummy.rs`'s `load_rustls_config`
/// uses.
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path).with_context(|| format!("opening key file {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut pkcs8 = rustls_pemfile::pkcs8_private_keys(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("parsing PKCS8 keys in {}", path.display()))?;
    if let Some(key) = pkcs8.pop() {
        return Ok(PrivateKeyDer::Pkcs8(key));
    }

    let file = File::open(path).with_context(|| format!("re-opening key file {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut rsa = rustls_pemfile::rsa_private_keys(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("parsing RSA keys in {}", path.display()))?;
    rsa.pop()
        .map(PrivateKeyDer::Pkcs1)
        .ok_or_else(|| anyhow::anyhow!("no private key found in {}", path.display()))
}

/// Builds a fresh `rustls::ServerConfig` for one listener, optionally
/// restricting ALPN to `h2` (the DoH listener; spec §6 "ALPN advertises
/// `h2` on DoH; DoT carries raw DNS" — the DoT listener passes an empty
/// ALPN list here).
pub fn build_server_config(
    certs: &[CertificateDer<'static>],
    key: &PrivateKeyDer<'static>,
    alpn: &[&str],
) -> Result<ServerConfig> {
    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs.to_vec(), key.clone_key())
        .context("building rustls ServerConfig")?;
    config.alpn_protocols = alpn.iter().map(|p| p.as_bytes().to_vec()).collect();
    // Session ticket lifetime is reset by the weekly rotator (C10); this
    // installs a usable ticketer immediately so the first week of traffic
    // can resume sessions too.
    config.ticketer = rustls::crypto::ring::Ticketer::new()
        .map_err(|e| anyhow::anyhow!("installing initial session ticketer: {e:?}"))?;
    Ok(config)
}

/// Installs the global `ring` crypto provider once at process start. Every
/// teacher binary that touches `rustls` 0.23 does this explicitly (see
/// `restream.rs`, `server_dummy.rs`) since rustls 0.23 no longer picks a
/// default provider implicitly.
pub fn install_crypto_provider() -> Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls ring crypto provider"))
}

/// Wraps `config` for use with raw `tokio_rustls` acceptors (DoT, PROXYv2
/// DoT backend).
pub fn acceptor(config: ServerConfig) -> tokio_rustls::TlsAcceptor {
    tokio_rustls::TlsAcceptor::from(Arc::new(config))
}

/// Builds an acceptor directly from a shared config, so the ticket-key
/// rotator's `ArcSwap` can be read fresh on every accept without cloning
/// the (non-`Clone`) `ServerConfig` itself.
pub fn acceptor_from_arc(config: Arc<ServerConfig>) -> tokio_rustls::TlsAcceptor {
    tokio_rustls::TlsAcceptor::from(config)
}
