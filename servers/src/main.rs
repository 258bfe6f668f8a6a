//! Entry point: loads configuration from the environment and runs the
//! listener supervisor until SIGINT/SIGTERM.
//!
//! Grounded on `servers/src/restream.rs`'s `main()` bootstrap shape
//! (tracing init, config parse, signal-racing shutdown).

use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};

use lib_common::config::Config;
use lib_common::resolver::Resolver;
use servers::resolver_stub::StubResolver;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    servers::init_tracing();
    let config = Config::load();
    let resolver: Arc<dyn Resolver> = Arc::new(StubResolver);
    servers::run(config, resolver, wait_for_shutdown_signal()).await
}

/// Races SIGINT and SIGTERM, resolving on whichever arrives first — the
/// same signal set `restream.rs`'s shutdown race covers.
async fn wait_for_shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    let mut term = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(_) => {
            let _ = ctrl_c.await;
            return;
        }
    };
    tokio::select! {
        _ = ctrl_c => {}
        _ = term.recv() => {}
    }
}
