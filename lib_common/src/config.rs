//! Runtime configuration (A1), read from the environment the way
//! `servers/src/yahoo_logic/config.rs` lays out a `clap::Parser` struct
//! with `env = "..."` attributes — one field per spec §6 config table
//! entry.

use std::path::PathBuf;

use clap::Parser;

/// Listener ports, timeouts, connection bounds, and TLS material for the
/// connection front-end.
#[derive(Parser, Debug, Clone)]
#[command(name = "dns_frontend", about = "DNS-over-HTTPS/TLS connection front-end")]
pub struct Config {
    /// Port for the DNS-over-TLS listener.
    #[clap(long, env = "FRONTEND_DOT_PORT", default_value = "10853")]
    pub dot_port: u16,

    /// Port for the PROXYv2-wrapped DNS-over-TLS listener.
    #[clap(long, env = "FRONTEND_DOT_PROXYPROTO_PORT", default_value = "10854")]
    pub dot_proxyproto_port: u16,

    /// Port for the DNS-over-HTTPS listener (TLS, ALPN `h2`).
    #[clap(long, env = "FRONTEND_DOH_PORT", default_value = "8443")]
    pub doh_port: u16,

    /// Port for the cleartext DNS-over-TCP listener.
    #[clap(long, env = "FRONTEND_DOT_CLEARTEXT_PORT", default_value = "10853")]
    pub dot_cleartext_port: u16,

    /// Port for the cleartext (h2c) DNS-over-HTTPS listener.
    #[clap(long, env = "FRONTEND_DOH_CLEARTEXT_PORT", default_value = "8080")]
    pub doh_cleartext_port: u16,

    /// Port for the `/` health-check listener.
    #[clap(long, env = "FRONTEND_HTTP_CHECK_PORT", default_value = "8081")]
    pub http_check_port: u16,

    /// TCP accept backlog applied to every listener.
    #[clap(long, env = "FRONTEND_TCP_BACKLOG", default_value = "511")]
    pub tcp_backlog: u32,

    /// Per-socket idle timeout, in milliseconds.
    #[clap(long, env = "FRONTEND_IO_TIMEOUT_MS", default_value = "30000")]
    pub io_timeout_ms: u64,

    /// Hard timeout for graceful drain, in milliseconds, after which the
    /// process force-exits regardless of pending handles.
    #[clap(long, env = "FRONTEND_SHUTDOWN_TIMEOUT_MS", default_value = "10000")]
    pub shutdown_timeout_ms: u64,

    /// Floor for the per-listener connection cap.
    #[clap(long, env = "FRONTEND_MIN_CONNS", default_value = "10")]
    pub min_conns: u32,

    /// Ceiling for the per-listener connection cap.
    #[clap(long, env = "FRONTEND_MAX_CONNS", default_value = "2000")]
    pub max_conns: u32,

    /// When set, TLS is terminated upstream and this process only serves
    /// the cleartext listeners.
    #[clap(long, env = "FRONTEND_IS_CLEARTEXT", action = clap::ArgAction::Set, default_value_t = false)]
    pub is_cleartext: bool,

    /// When set, the DoT listener expects a PROXYv2 header before the TLS
    /// ClientHello.
    #[clap(long, env = "FRONTEND_IS_DOT_OVER_PROXYPROTO", action = clap::ArgAction::Set, default_value_t = false)]
    pub is_dot_over_proxyproto: bool,

    /// Path to the PEM-encoded TLS private key.
    #[clap(long, env = "FRONTEND_TLS_KEY")]
    pub tls_key: Option<PathBuf>,

    /// Path to the PEM-encoded TLS certificate chain.
    #[clap(long, env = "FRONTEND_TLS_CRT")]
    pub tls_crt: Option<PathBuf>,

    /// Base64-encoded secret used as the ticket-key derivation seed;
    /// falls back to the TLS private key bytes when unset.
    #[clap(long, env = "FRONTEND_SECRET_B64")]
    pub secret_b64: Option<String>,

    /// Container image reference folded into the ticket-key derivation
    /// context string.
    #[clap(long, env = "FRONTEND_IMAGE_REF")]
    pub image_ref: Option<String>,

    /// Enables the gated heap-snapshot diagnostic path.
    #[clap(long, env = "FRONTEND_MEASURE_HEAP", action = clap::ArgAction::Set, default_value_t = false)]
    pub measure_heap: bool,

    /// Marks this process as running outside a cloud environment —
    /// relaxes the `veryLowRam` immediate-shutdown escalation and widens
    /// the heap-snapshot gate.
    #[clap(long, env = "FRONTEND_ON_LOCAL", action = clap::ArgAction::Set, default_value_t = false)]
    pub on_local: bool,
}

impl Config {
    /// Parses configuration from CLI args and environment variables
    /// (`.env` loaded first via `dotenvy`, the way every binary in this
    /// workspace bootstraps config).
    pub fn load() -> Self {
        let _ = dotenvy::dotenv();
        Config::parse()
    }

    /// Whether the admission controller should treat this process as
    /// running in a cloud environment.
    pub fn is_cloud(&self) -> bool {
        !self.on_local
    }
}
