//! Listener supervisor (C5): binds each of the five public listener
//! flavours plus the health check, and wires accepted sockets into the
//! DoT/DoH pipelines.
//!
//! Grounded on `servers/src/redis2ws.rs`'s raw `TcpListener` accept-loop
//! idiom for the DoT/PROXYv2 listeners, and on `restream.rs`'s
//! `axum_server::Handle` graceful-shutdown idiom for the HTTP-shaped
//! listeners (DoH, DoH-cleartext, health).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use axum::routing::get;
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use rustls::ServerConfig;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use lib_common::dot::{self, ConnMetadata};
use lib_common::health::{handle_health_check, HeapSnapshotPolicy};
use lib_common::proxyproto;
use lib_common::resolver::Resolver;
use lib_common::sni::{Match, SniMatcher};
use lib_common::shutdown::ListenerCloser;
use lib_common::stats::Stats;
use lib_common::tracker::{ListenerKind, Tracker, ZERO_ID};

use crate::tls::acceptor_from_arc;

/// Cancels a background accept loop on `close()`.
pub struct TokenCloser(pub CancellationToken);

impl ListenerCloser for TokenCloser {
    fn close(&self) {
        self.0.cancel();
    }
}

/// Triggers `axum_server`'s immediate shutdown on `close()`.
pub struct HandleCloser(pub axum_server::Handle);

impl ListenerCloser for HandleCloser {
    fn close(&self) {
        self.0.shutdown();
    }
}

fn classify_metadata(sni: &SniMatcher, server_name: Option<&str>) -> ConnMetadata {
    match server_name {
        None => dot::cleartext_metadata(),
        Some(name) => match sni.classify(name) {
            Match::None => dot::cleartext_metadata(),
            Match::Exact | Match::Wildcard => {
                let (flag, host) = SniMatcher::get_metadata(name);
                dot::routed_metadata(flag, host)
            }
        },
    }
}

/// Binds the cleartext DNS-over-TCP listener (no TLS): used standalone
/// when `FRONTEND_IS_CLEARTEXT` is set, and as the PROXYv2 listener's
/// splice backend.
pub async fn spawn_dot_cleartext(
    bind_addr: SocketAddr,
    tracker: Arc<Tracker>,
    resolver: Arc<dyn Resolver>,
    stats: Arc<Stats>,
    heap_policy: HeapSnapshotPolicy,
    io_timeout: Duration,
) -> anyhow::Result<(Arc<lib_common::tracker::ListenerRecord>, Arc<dyn ListenerCloser>)> {
    let listener = TcpListener::bind(bind_addr).await?;
    let bound = listener.local_addr()?;
    let record = tracker
        .track_server(ListenerKind::DotCleartext, bound)
        .await
        .ok_or_else(|| anyhow::anyhow!("tracker already ended"))?;

    let cancel = CancellationToken::new();
    let closer: Arc<dyn ListenerCloser> = Arc::new(TokenCloser(cancel.clone()));

    let record_task = record.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => {
                    let (socket, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => { debug!(error = %e, "DoT-cleartext accept failed"); continue; }
                    };
                    let (key, handle) = match tracker.track_conn(&record_task, Some(peer)) {
                        Ok(pair) => pair,
                        Err(_) => { stats.inc_drops(); continue; }
                    };
                    if key == ZERO_ID {
                        stats.inc_drops();
                        continue;
                    }
                    let _ = dot::apply_socket_options(&socket);
                    stats.inc_total_conns();
                    stats.inc_open_conns();
                    let resolver = resolver.clone();
                    let stats2 = stats.clone();
                    let record2 = record_task.clone();
                    let tracker2 = tracker.clone();
                    tokio::spawn(async move {
                        let max_conns = record2.max_conns().max(1);
                        tokio::select! {
                            _ = handle.closed() => {}
                            _ = dot::run_connection(
                                socket,
                                resolver,
                                stats2.clone(),
                                heap_policy,
                                max_conns,
                                dot::cleartext_metadata(),
                                io_timeout,
                            ) => {}
                        }
                        stats2.dec_open_conns();
                        tracker2.untrack_conn(&record2, &key);
                    });
                }
            }
        }
    });

    Ok((record, closer))
}

/// Binds the TLS DoT listener. SNI is read off the completed handshake
/// and classified against `sni` to pick the connection's routed
/// `host`/`flag` metadata.
#[allow(clippy::too_many_arguments)]
pub async fn spawn_dot_tls(
    bind_addr: SocketAddr,
    tls_slot: Arc<ArcSwap<ServerConfig>>,
    sni: Arc<SniMatcher>,
    tracker: Arc<Tracker>,
    resolver: Arc<dyn Resolver>,
    stats: Arc<Stats>,
    heap_policy: HeapSnapshotPolicy,
    io_timeout: Duration,
) -> anyhow::Result<(Arc<lib_common::tracker::ListenerRecord>, Arc<dyn ListenerCloser>)> {
    let listener = TcpListener::bind(bind_addr).await?;
    let bound = listener.local_addr()?;
    let record = tracker
        .track_server(ListenerKind::Dot, bound)
        .await
        .ok_or_else(|| anyhow::anyhow!("tracker already ended"))?;

    let cancel = CancellationToken::new();
    let closer: Arc<dyn ListenerCloser> = Arc::new(TokenCloser(cancel.clone()));

    let record_task = record.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => {
                    let (socket, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => { debug!(error = %e, "DoT accept failed"); continue; }
                    };
                    let (key, handle) = match tracker.track_conn(&record_task, Some(peer)) {
                        Ok(pair) => pair,
                        Err(_) => { stats.inc_drops(); continue; }
                    };
                    if key == ZERO_ID {
                        stats.inc_drops();
                        continue;
                    }
                    let _ = dot::apply_socket_options(&socket);

                    let acceptor = acceptor_from_arc(tls_slot.load_full());
                    let sni = sni.clone();
                    let resolver = resolver.clone();
                    let stats2 = stats.clone();
                    let record2 = record_task.clone();
                    let tracker2 = tracker.clone();
                    tokio::spawn(async move {
                        stats2.inc_total_conns();
                        match acceptor.accept(socket).await {
                            Ok(tls_stream) => {
                                stats2.inc_open_conns();
                                let server_name = tls_stream
                                    .get_ref()
                                    .1
                                    .server_name()
                                    .map(|s| s.to_string());
                                let meta = classify_metadata(&sni, server_name.as_deref());
                                let max_conns = record2.max_conns().max(1);
                                tokio::select! {
                                    _ = handle.closed() => {}
                                    _ = dot::run_connection(
                                        tls_stream,
                                        resolver,
                                        stats2.clone(),
                                        heap_policy,
                                        max_conns,
                                        meta,
                                        io_timeout,
                                    ) => {}
                                }
                                stats2.dec_open_conns();
                            }
                            Err(e) => {
                                debug!(error = %e, "DoT TLS handshake failed");
                                stats2.inc_tls_errors();
                            }
                        }
                        tracker2.untrack_conn(&record2, &key);
                    });
                }
            }
        }
    });

    Ok((record, closer))
}

/// Binds the PROXYv2 listener: unwraps the header, then splices the
/// remainder to `backend_addr` — the cleartext DoT listener bound on
/// loopback, per spec §9's "splices to plaintext DoT backend".
pub async fn spawn_dot_proxyproto(
    bind_addr: SocketAddr,
    backend_addr: SocketAddr,
    tracker: Arc<Tracker>,
    stats: Arc<Stats>,
) -> anyhow::Result<(Arc<lib_common::tracker::ListenerRecord>, Arc<dyn ListenerCloser>)> {
    let listener = TcpListener::bind(bind_addr).await?;
    let bound = listener.local_addr()?;
    let record = tracker
        .track_server(ListenerKind::DotProxyProto, bound)
        .await
        .ok_or_else(|| anyhow::anyhow!("tracker already ended"))?;

    let cancel = CancellationToken::new();
    let closer: Arc<dyn ListenerCloser> = Arc::new(TokenCloser(cancel.clone()));

    let record_task = record.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => {
                    let (client, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => { debug!(error = %e, "PROXYv2 accept failed"); continue; }
                    };
                    let (key, handle) = match tracker.track_conn(&record_task, Some(peer)) {
                        Ok(pair) => pair,
                        Err(_) => { stats.inc_drops(); continue; }
                    };
                    if key == ZERO_ID {
                        stats.inc_drops();
                        continue;
                    }
                    stats.inc_total_conns();
                    stats.inc_open_conns();

                    let stats2 = stats.clone();
                    let record2 = record_task.clone();
                    let tracker2 = tracker.clone();
                    tokio::spawn(async move {
                        match tokio::net::TcpStream::connect(backend_addr).await {
                            Ok(upstream) => {
                                tokio::select! {
                                    _ = handle.closed() => {}
                                    result = proxyproto::splice_after_header(client, upstream) => {
                                        if let Err(e) = result {
                                            debug!(error = %e, "PROXYv2 splice failed");
                                        }
                                    }
                                }
                            }
                            Err(e) => {
                                warn!(error = %e, "PROXYv2 backend connect failed");
                            }
                        }
                        stats2.dec_open_conns();
                        tracker2.untrack_conn(&record2, &key);
                    });
                }
            }
        }
    });

    Ok((record, closer))
}

/// Binds the TLS DoH listener (ALPN `h2`) with `axum_server`.
pub async fn spawn_doh(
    bind_addr: SocketAddr,
    rustls_config: RustlsConfig,
    doh_ctx: Arc<lib_common::doh::DohContext>,
    tracker: Arc<Tracker>,
) -> anyhow::Result<(Arc<lib_common::tracker::ListenerRecord>, Arc<dyn ListenerCloser>)> {
    let record = tracker
        .track_server(ListenerKind::Doh, bind_addr)
        .await
        .ok_or_else(|| anyhow::anyhow!("tracker already ended"))?;

    let app = Router::new()
        .route("/dns-query", get(lib_common::doh::doh_handler).post(lib_common::doh::doh_handler))
        .fallback(lib_common::doh::doh_handler)
        .with_state(doh_ctx);

    let handle = axum_server::Handle::new();
    let closer: Arc<dyn ListenerCloser> = Arc::new(HandleCloser(handle.clone()));

    let bound = record.bound_addr();
    tokio::spawn(async move {
        if let Err(e) = axum_server::bind_rustls(bound, rustls_config)
            .handle(handle)
            .serve(app.into_make_service())
            .await
        {
            warn!(error = %e, "DoH listener stopped");
        }
    });

    Ok((record, closer))
}

/// Binds the cleartext DoH listener (h2c, auto-negotiated by
/// `axum_server` alongside HTTP/1.1 — no bespoke protocol sniffing).
pub async fn spawn_doh_cleartext(
    bind_addr: SocketAddr,
    doh_ctx: Arc<lib_common::doh::DohContext>,
    tracker: Arc<Tracker>,
) -> anyhow::Result<(Arc<lib_common::tracker::ListenerRecord>, Arc<dyn ListenerCloser>)> {
    let record = tracker
        .track_server(ListenerKind::DohCleartext, bind_addr)
        .await
        .ok_or_else(|| anyhow::anyhow!("tracker already ended"))?;

    let app = Router::new()
        .route("/dns-query", get(lib_common::doh::doh_handler).post(lib_common::doh::doh_handler))
        .fallback(lib_common::doh::doh_handler)
        .with_state(doh_ctx);

    let handle = axum_server::Handle::new();
    let closer: Arc<dyn ListenerCloser> = Arc::new(HandleCloser(handle.clone()));

    let bound = record.bound_addr();
    tokio::spawn(async move {
        if let Err(e) = axum_server::bind(bound)
            .handle(handle)
            .serve(app.into_make_service())
            .await
        {
            warn!(error = %e, "DoH-cleartext listener stopped");
        }
    });

    Ok((record, closer))
}

/// Binds the `/` health-check listener.
pub async fn spawn_health(
    bind_addr: SocketAddr,
    stats: Arc<Stats>,
    tracker: Arc<Tracker>,
) -> anyhow::Result<(Arc<lib_common::tracker::ListenerRecord>, Arc<dyn ListenerCloser>)> {
    let record = tracker
        .track_server(ListenerKind::Health, bind_addr)
        .await
        .ok_or_else(|| anyhow::anyhow!("tracker already ended"))?;

    let app = Router::new()
        .route("/", get(move || {
            let stats = stats.clone();
            async move { handle_health_check(&stats) }
        }));

    let handle = axum_server::Handle::new();
    let closer: Arc<dyn ListenerCloser> = Arc::new(HandleCloser(handle.clone()));

    let bound = record.bound_addr();
    tokio::spawn(async move {
        if let Err(e) = axum_server::bind(bound)
            .handle(handle)
            .serve(app.into_make_service())
            .await
        {
            warn!(error = %e, "health listener stopped");
        }
    });

    Ok((record, closer))
}
