//! S1 (DoT exact SNI) and S2 (DoT wildcard SNI) from spec §8: a real TLS
//! handshake against `servers::listeners::spawn_dot_tls`, driven by an
//! SNI the certificate's SAN set resolves to an exact or wildcard match,
//! asserting the pipeline derives the right `host`/`flag` metadata and
//! round-trips the query bytes as the answer.

mod common;

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use lib_common::health::HeapSnapshotPolicy;
use lib_common::resolver::Resolver;
use lib_common::sni::SniMatcher;
use lib_common::stats::Stats;
use lib_common::tracker::Tracker;
use rustls_pki_types::ServerName;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use common::{client_tls_config, dns_query, gen_cert, install_crypto_provider, wire, RecordingResolver};

fn heap_policy() -> HeapSnapshotPolicy {
    HeapSnapshotPolicy {
        measure_heap: false,
        on_local: true,
        multiplier: 1,
    }
}

/// Spins up one DoT TLS listener on an ephemeral port with a cert whose
/// SANs are `a.example` (exact) and `*.max.example` (wildcard), returning
/// its bound address and the resolver that recorded whatever it saw.
async fn spawn_listener() -> (std::net::SocketAddr, Arc<RecordingResolver>, rustls_pki_types::CertificateDer<'static>) {
    install_crypto_provider();
    let cert = gen_cert(vec!["a.example".to_string(), "*.max.example".to_string()]);
    let root = cert.certs[0].clone();

    let server_config =
        servers::tls::build_server_config(&cert.certs, &cert.key, &[]).expect("building server config");
    let tls_slot = Arc::new(ArcSwap::from_pointee(server_config));
    let sni = Arc::new(SniMatcher::from_certificate_der(&cert.certs[0]).expect("parsing test cert SANs"));

    let tracker = Arc::new(Tracker::new());
    let resolver = Arc::new(RecordingResolver::new());
    let resolver_dyn: Arc<dyn Resolver> = resolver.clone();
    let stats = Arc::new(Stats::new());

    let (record, _closer) = servers::listeners::spawn_dot_tls(
        ([127, 0, 0, 1], 0).into(),
        tls_slot,
        sni,
        tracker,
        resolver_dyn,
        stats,
        heap_policy(),
        Duration::from_secs(5),
    )
    .await
    .expect("spawning DoT TLS listener");

    (record.bound_addr(), resolver, root)
}

async fn round_trip(addr: std::net::SocketAddr, root: &rustls_pki_types::CertificateDer<'static>, sni: &str, body: &[u8]) -> Vec<u8> {
    let client_config = client_tls_config(root);
    let connector = TlsConnector::from(Arc::new(client_config));
    let tcp = TcpStream::connect(addr).await.expect("connecting to DoT listener");
    let domain = ServerName::try_from(sni.to_string()).expect("valid DNS name");
    let mut tls = connector.connect(domain, tcp).await.expect("TLS handshake");

    tls.write_all(&wire(body)).await.expect("writing query");

    let mut len_buf = [0u8; 2];
    tls.read_exact(&mut len_buf).await.expect("reading answer length prefix");
    let len = u16::from_be_bytes(len_buf) as usize;
    let mut answer = vec![0u8; len];
    tls.read_exact(&mut answer).await.expect("reading answer body");
    answer
}

/// S1: TLS handshake to `a.example`, SAN `DNS:a.example` -> exact match,
/// `host="a.example"`, `flag=""`.
#[tokio::test]
async fn s1_dot_exact_sni_round_trips_and_routes_correctly() {
    let (addr, resolver, root) = spawn_listener().await;
    let body = dns_query(28, 0x1234);

    let answer = round_trip(addr, &root, "a.example", &body).await;
    assert_eq!(answer, body, "resolver echoed the query, so the answer must match");

    let calls = resolver.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].host, "a.example");
    assert_eq!(calls[0].path, "", "flag must be empty for an exact SNI match");
    assert_eq!(calls[0].body, body);
}

/// S2: SNI `1-abc.max.example`, SAN `DNS:*.max.example` -> wildcard
/// match, `host="max.example"`, `flag="1-abc"`.
#[tokio::test]
async fn s2_dot_wildcard_sni_extracts_flag_and_host() {
    let (addr, resolver, root) = spawn_listener().await;
    let body = dns_query(40, 0xABCD);

    let answer = round_trip(addr, &root, "1-abc.max.example", &body).await;
    assert_eq!(answer, body);

    let calls = resolver.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].host, "max.example");
    assert_eq!(calls[0].path, "1-abc");
}

/// Property 2 / spec §8: an oversize declared length (>65535 is
/// unrepresentable in a u16, so the smallest observable violation is the
/// `<12` undersize case) closes the socket with zero resolver calls.
#[tokio::test]
async fn undersize_prefix_over_real_tls_closes_without_invoking_resolver() {
    let (addr, resolver, root) = spawn_listener().await;
    let client_config = client_tls_config(&root);
    let connector = TlsConnector::from(Arc::new(client_config));
    let tcp = TcpStream::connect(addr).await.unwrap();
    let domain = ServerName::try_from("a.example".to_string()).unwrap();
    let mut tls = connector.connect(domain, tcp).await.unwrap();

    tls.write_all(&wire(&[0u8; 5])).await.unwrap();

    let mut buf = [0u8; 16];
    // The server drops the connection on a framing violation without
    // writing anything back; the client observes either a clean EOF or a
    // reset, never an answer.
    let n = tls.read(&mut buf).await.unwrap_or(0);
    assert_eq!(n, 0, "socket must be closed, not answered");
    assert!(resolver.calls().is_empty());
}
