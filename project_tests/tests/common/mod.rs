//! Shared fixtures for the end-to-end scenario tests (S1-S6 in spec §8):
//! a self-signed cert generator, a recording `Resolver`, and a client-side
//! `rustls::ClientConfig` that trusts that cert as its own root.
//!
//! Each `tests/*.rs` file boots real listeners from the `servers` crate on
//! an ephemeral port and drives them with a real TCP/TLS client, instead
//! of calling pipeline internals directly the way `lib_common`'s inline
//! unit tests do.

use std::sync::{Mutex, Once};

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use lib_common::resolver::{Resolver, ResolverRequest, ResolverResponse};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

static CRYPTO_PROVIDER: Once = Once::new();

/// Installs the process-wide `ring` crypto provider exactly once, the way
/// `servers::run` does at startup.
pub fn install_crypto_provider() {
    CRYPTO_PROVIDER.call_once(|| {
        servers::tls::install_crypto_provider().expect("installing rustls ring provider");
    });
}

/// A self-signed certificate/key pair plus the decoded DER for both,
/// suitable for a `servers::tls::build_server_config` call and as the
/// client's own trust root (it is its own CA, signed with `rcgen`).
pub struct TestCert {
    pub certs: Vec<CertificateDer<'static>>,
    pub key: PrivateKeyDer<'static>,
}

/// Generates a self-signed certificate carrying exactly the given DNS
/// SANs — e.g. `["a.example", "*.max.example"]` to cover both an exact
/// and a wildcard match in one listener, per spec §8 property 5.
pub fn gen_cert(sans: Vec<String>) -> TestCert {
    let rcgen::CertifiedKey { cert, key_pair } =
        rcgen::generate_simple_self_signed(sans).expect("generating self-signed test cert");
    let cert_der = cert.der().clone();
    let key_der = PrivatePkcs8KeyDer::from(key_pair.serialize_der());
    TestCert {
        certs: vec![cert_der],
        key: PrivateKeyDer::Pkcs8(key_der),
    }
}

/// A client-side TLS config that trusts `root` as its only root — the
/// test's self-signed server cert, instead of disabling verification.
pub fn client_tls_config(root: &CertificateDer<'static>) -> rustls::ClientConfig {
    let mut roots = rustls::RootCertStore::empty();
    roots.add(root.clone()).expect("adding test root cert");
    rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth()
}

/// One observed call into the fake resolver: the request's authority
/// host, the leftmost path segment (the DoT pipeline's `flag`), and the
/// request body.
#[derive(Debug, Clone)]
pub struct ObservedCall {
    pub host: String,
    pub path: String,
    pub body: Vec<u8>,
}

/// A `Resolver` that records every call it receives and echoes the query
/// body back as the answer, so a round-trip test can assert on both the
/// metadata the pipeline derived and the bytes it wrote back.
#[derive(Default)]
pub struct RecordingResolver {
    calls: Mutex<Vec<ObservedCall>>,
}

impl RecordingResolver {
    pub fn new() -> Self {
        RecordingResolver::default()
    }

    pub fn calls(&self) -> Vec<ObservedCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Resolver for RecordingResolver {
    async fn handle(&self, query: ResolverRequest) -> ResolverResponse {
        let host = query.url.host().unwrap_or_default().to_string();
        let path = query.url.path().trim_start_matches('/').to_string();
        self.calls.lock().unwrap().push(ObservedCall {
            host,
            path,
            body: query.body.to_vec(),
        });
        ResolverResponse {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::from(query.body.to_vec()),
        }
    }
}

/// Builds a 12-byte minimal DNS header — the smallest body the framing
/// buffer accepts — padded to `len` bytes total, with the first two bytes
/// serving as a recognisable query id.
pub fn dns_query(len: usize, id: u16) -> Vec<u8> {
    let mut body = vec![0u8; len.max(12)];
    body[0..2].copy_from_slice(&id.to_be_bytes());
    body
}

/// Writes `<2-byte-len><body>` the way an RFC 7766 client would.
pub fn wire(body: &[u8]) -> Vec<u8> {
    let mut out = (body.len() as u16).to_be_bytes().to_vec();
    out.extend_from_slice(body);
    out
}
