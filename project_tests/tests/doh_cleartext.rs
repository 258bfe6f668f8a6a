//! S4 (DoH POST) from spec §8: a real HTTP/1.1 request (hyper/axum's h2c
//! listener auto-negotiates h1 the same as h2c) against
//! `servers::listeners::spawn_doh_cleartext`, asserting the resolver sees
//! the right path/method/body and the client gets the answer back.

mod common;

use std::sync::Arc;

use lib_common::doh::DohContext;
use lib_common::health::HeapSnapshotPolicy;
use lib_common::resolver::Resolver;
use lib_common::stats::Stats;
use lib_common::tracker::Tracker;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use common::{dns_query, RecordingResolver};

fn heap_policy() -> HeapSnapshotPolicy {
    HeapSnapshotPolicy {
        measure_heap: false,
        on_local: true,
        multiplier: 1,
    }
}

async fn spawn_listener() -> (std::net::SocketAddr, Arc<RecordingResolver>) {
    let tracker = Arc::new(Tracker::new());
    let resolver = Arc::new(RecordingResolver::new());
    let resolver_dyn: Arc<dyn Resolver> = resolver.clone();
    let stats = Arc::new(Stats::new());

    let ctx = Arc::new(DohContext {
        resolver: resolver_dyn,
        stats,
        heap_policy: heap_policy(),
    });

    let (record, _closer) = servers::listeners::spawn_doh_cleartext(
        ([127, 0, 0, 1], 0).into(),
        ctx,
        tracker,
    )
    .await
    .expect("spawning DoH-cleartext listener");

    (record.bound_addr(), resolver)
}

/// Splits a raw HTTP/1.1 response into `(status_code, body)`, trusting
/// `Connection: close` to make a plain `read_to_end` sufficient.
fn parse_response(raw: &[u8]) -> (u16, Vec<u8>) {
    let split = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("response must have a header/body separator");
    let head = std::str::from_utf8(&raw[..split]).expect("headers must be ASCII/UTF-8");
    let status_line = head.lines().next().expect("response must have a status line");
    let status: u16 = status_line
        .split_whitespace()
        .nth(1)
        .expect("status line must have a code")
        .parse()
        .expect("status code must be numeric");
    (status, raw[split + 4..].to_vec())
}

/// S4: `POST /flagX` with a 28-byte `application/dns-message` body.
#[tokio::test]
async fn post_dns_query_round_trips_through_real_http() {
    let (addr, resolver) = spawn_listener().await;
    let body = dns_query(28, 0x4242);

    let mut client = TcpStream::connect(addr).await.expect("connecting to DoH listener");
    let request = format!(
        "POST /flagX HTTP/1.1\r\nHost: example.com\r\nContent-Type: application/dns-message\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    client.write_all(request.as_bytes()).await.expect("writing request head");
    client.write_all(&body).await.expect("writing request body");

    let mut raw = Vec::new();
    client.read_to_end(&mut raw).await.expect("reading response");
    let (status, resp_body) = parse_response(&raw);

    assert_eq!(status, 200);
    assert_eq!(resp_body, body, "echo resolver must return the query bytes verbatim");

    let calls = resolver.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].path, "flagX");
    assert_eq!(calls[0].body, body);
}

/// Spec §4.8 step 2: an oversize `POST` body closes with the DoH oversize
/// status and never reaches the resolver.
#[tokio::test]
async fn oversize_post_is_rejected_before_reaching_resolver() {
    let (addr, resolver) = spawn_listener().await;
    let body = vec![0u8; 3]; // below the 12-byte DNS minimum

    let mut client = TcpStream::connect(addr).await.expect("connecting to DoH listener");
    let request = format!(
        "POST /flagX HTTP/1.1\r\nHost: example.com\r\nContent-Type: application/dns-message\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    client.write_all(request.as_bytes()).await.expect("writing request head");
    client.write_all(&body).await.expect("writing request body");

    let mut raw = Vec::new();
    client.read_to_end(&mut raw).await.expect("reading response");
    let (status, _body) = parse_response(&raw);

    assert_eq!(status, lib_common::doh::OVERSIZE_STATUS.as_u16());
    assert!(resolver.calls().is_empty());
}
