//! The listener supervisor binary's library half: everything `main.rs`
//! wires together, factored out so integration tests can drive real
//! listeners without a subprocess.

pub mod admission_task;
pub mod listeners;
pub mod resolver_stub;
pub mod ticket_task;
pub mod tls;

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use axum_server::tls_rustls::RustlsConfig;
use base64::Engine;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::info;

use lib_common::admission::AdmissionConfig;
use lib_common::config::Config;
use lib_common::lifecycle::{LifecycleBus, LifecycleEvent};
use lib_common::resolver::Resolver;
use lib_common::shutdown::{graceful_drain, ListenerCloser};
use lib_common::sni::SniMatcher;
use lib_common::stats::Stats;
use lib_common::ticket::{run_rotation_loop, TicketKeyDeriver, TicketKeyTarget};
use lib_common::tracker::Tracker;

use listeners::{
    spawn_dot_cleartext, spawn_dot_proxyproto, spawn_dot_tls, spawn_doh, spawn_doh_cleartext,
    spawn_health,
};
use ticket_task::{DohTicketTarget, ListenerTicketTarget, RingDeriver};

const ALPN_DOT: &[&str] = &[];
const ALPN_DOH: &[&str] = &["h2"];

/// Initializes the `tracing` subscriber from `RUST_LOG`, defaulting to
/// `info`. Call once per process.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// The ticket-key derivation seed: the configured base64 secret if set,
/// else the raw TLS private key bytes (spec §4.5's documented fallback).
fn ticket_seed(config: &Config, key_bytes: &[u8]) -> anyhow::Result<Vec<u8>> {
    match &config.secret_b64 {
        Some(b64) => base64::engine::general_purpose::STANDARD
            .decode(b64)
            .map_err(|e| anyhow::anyhow!("decoding FRONTEND_SECRET_B64: {e}")),
        None => Ok(key_bytes.to_vec()),
    }
}

/// Everything this binary does between config parse and process exit:
/// binds every listener `config` calls for, runs the admission and
/// ticket-rotation background tasks, and blocks on `shutdown` before
/// draining. Returns once the drain completes (it never does — `stop`
/// always ends the process via `graceful_drain`), except when no TLS
/// material is configured and `Config::is_cleartext` is false, which is
/// reported as an error before anything binds.
pub async fn run(
    config: Config,
    resolver: Arc<dyn Resolver>,
    shutdown: impl std::future::Future<Output = ()>,
) -> anyhow::Result<()> {
    tls::install_crypto_provider().ok();
    info!(?config, "starting dns_frontend");

    let stats = Arc::new(Stats::new());
    let tracker = Arc::new(Tracker::new());
    let lifecycle = LifecycleBus::new();
    lifecycle.publish(LifecycleEvent::Prepare);

    let heap_policy = lib_common::health::HeapSnapshotPolicy {
        measure_heap: config.measure_heap,
        on_local: config.on_local,
        multiplier: 1,
    };
    let io_timeout = Duration::from_millis(config.io_timeout_ms);
    let shutdown_timeout = Duration::from_millis(config.shutdown_timeout_ms);

    let mut listener_closers: Vec<Arc<dyn ListenerCloser>> = Vec::new();
    let mut ticket_targets: Vec<Arc<dyn TicketKeyTarget>> = Vec::new();
    let ticket_seed_bytes;

    if config.is_cleartext {
        let (_record, closer) = spawn_dot_cleartext(
            ([0, 0, 0, 0], config.dot_cleartext_port).into(),
            tracker.clone(),
            resolver.clone(),
            stats.clone(),
            heap_policy,
            io_timeout,
        )
        .await?;
        listener_closers.push(closer);

        let (_record, closer) = spawn_doh_cleartext(
            ([0, 0, 0, 0], config.doh_cleartext_port).into(),
            Arc::new(lib_common::doh::DohContext {
                resolver: resolver.clone(),
                stats: stats.clone(),
                heap_policy,
            }),
            tracker.clone(),
        )
        .await?;
        listener_closers.push(closer);

        ticket_seed_bytes = Vec::new();
    } else {
        let tls_key_path = config.tls_key.clone().ok_or_else(|| {
            anyhow::anyhow!("FRONTEND_TLS_KEY is required unless FRONTEND_IS_CLEARTEXT is set")
        })?;
        let tls_crt_path = config.tls_crt.clone().ok_or_else(|| {
            anyhow::anyhow!("FRONTEND_TLS_CRT is required unless FRONTEND_IS_CLEARTEXT is set")
        })?;

        let certs = tls::load_certs(&tls_crt_path)?;
        let key = tls::load_private_key(&tls_key_path)?;
        let key_bytes = match &key {
            rustls_pki_types::PrivateKeyDer::Pkcs8(k) => k.secret_pkcs8_der().to_vec(),
            rustls_pki_types::PrivateKeyDer::Pkcs1(k) => k.secret_pkcs1_der().to_vec(),
            rustls_pki_types::PrivateKeyDer::Sec1(k) => k.secret_sec1_der().to_vec(),
            _ => Vec::new(),
        };
        ticket_seed_bytes = ticket_seed(&config, &key_bytes)?;

        let leaf_cert = certs.first().ok_or_else(|| {
            anyhow::anyhow!("{} contains no certificates", tls_crt_path.display())
        })?;
        let sni = Arc::new(SniMatcher::from_certificate_der(leaf_cert).unwrap_or_default());

        // DoT TLS listener's config lives behind an `ArcSwap` so the ticket
        // rotator can replace it without restarting the accept loop.
        let dot_config = tls::build_server_config(&certs, &key, ALPN_DOT)?;
        let dot_tls_slot = Arc::new(ArcSwap::from_pointee(dot_config));

        // The DoT-cleartext listener always runs as the splice backend for
        // PROXYv2, bound to loopback regardless of `is_dot_over_proxyproto`,
        // so a later config flip doesn't require a restart to add it.
        let (dot_cleartext_record, dot_cleartext_closer) = spawn_dot_cleartext(
            ([127, 0, 0, 1], 0).into(),
            tracker.clone(),
            resolver.clone(),
            stats.clone(),
            heap_policy,
            io_timeout,
        )
        .await?;
        let dot_backend_addr = dot_cleartext_record.bound_addr();

        if config.is_dot_over_proxyproto {
            let (_record, closer) = spawn_dot_proxyproto(
                ([0, 0, 0, 0], config.dot_proxyproto_port).into(),
                dot_backend_addr,
                tracker.clone(),
                stats.clone(),
            )
            .await?;
            listener_closers.push(closer);
            listener_closers.push(dot_cleartext_closer);
        } else {
            // Not fronting PROXYv2: the loopback cleartext listener only
            // exists to be spliced into, so close it immediately and run
            // the real TLS DoT listener on the public port instead.
            dot_cleartext_closer.close();
            let (_record, closer) = spawn_dot_tls(
                ([0, 0, 0, 0], config.dot_port).into(),
                dot_tls_slot.clone(),
                sni.clone(),
                tracker.clone(),
                resolver.clone(),
                stats.clone(),
                heap_policy,
                io_timeout,
            )
            .await?;
            listener_closers.push(closer);

            ticket_targets.push(Arc::new(ListenerTicketTarget::new(
                "dot",
                certs.clone(),
                key.clone_key(),
                ALPN_DOT.to_vec(),
                dot_tls_slot,
            )));
        }

        let doh_server_config = tls::build_server_config(&certs, &key, ALPN_DOH)?;
        let rustls_config = RustlsConfig::from_config(Arc::new(doh_server_config));
        let (_record, closer) = spawn_doh(
            ([0, 0, 0, 0], config.doh_port).into(),
            rustls_config.clone(),
            Arc::new(lib_common::doh::DohContext {
                resolver: resolver.clone(),
                stats: stats.clone(),
                heap_policy,
            }),
            tracker.clone(),
        )
        .await?;
        listener_closers.push(closer);

        ticket_targets.push(Arc::new(DohTicketTarget::new(
            "doh",
            certs.clone(),
            key.clone_key(),
            ALPN_DOH.to_vec(),
            rustls_config,
        )));
    }

    let (_record, closer) = spawn_health(
        ([0, 0, 0, 0], config.http_check_port).into(),
        stats.clone(),
        tracker.clone(),
    )
    .await?;
    listener_closers.push(closer);

    let admission_cancel = CancellationToken::new();
    let admission_config = AdmissionConfig {
        min_conns: config.min_conns,
        max_conns: config.max_conns,
        is_cloud: config.is_cloud(),
    };
    let admission_handle = tokio::spawn(admission_task::run(
        admission_config,
        stats.clone(),
        tracker.clone(),
        admission_cancel.clone(),
        listener_closers.clone(),
        shutdown_timeout,
    ));

    let (ticket_shutdown_tx, ticket_shutdown_rx) = broadcast::channel::<()>(1);
    let ticket_handle = if ticket_targets.is_empty() {
        None
    } else {
        let deriver: Arc<dyn TicketKeyDeriver> = Arc::new(RingDeriver);
        Some(tokio::spawn(run_rotation_loop(
            deriver,
            ticket_targets,
            ticket_seed_bytes,
            config.image_ref.clone(),
            ticket_shutdown_rx,
        )))
    };

    tokio::spawn(lib_common::health::spawn_stats_logger(
        stats.clone(),
        Duration::from_secs(60),
    ));

    lifecycle.publish(LifecycleEvent::Go);

    shutdown.await;
    lifecycle.publish(LifecycleEvent::Stop);
    info!("shutdown signal received, starting graceful drain");

    let _ = ticket_shutdown_tx.send(());
    admission_handle.abort();
    if let Some(h) = ticket_handle {
        h.abort();
    }

    graceful_drain(
        &tracker,
        &admission_cancel,
        &listener_closers,
        shutdown_timeout,
        || {},
    )
    .await;
}
