//! `redfish_core` — the HTTP/HTTPS connection and request-dispatch engine
//! for a Redfish-compliant BMC management server (spec §1): accepts TCP
//! connections, opportunistically upgrades to TLS (with optional
//! mutual-TLS), parses HTTP/1.1, dispatches via a parameterized URL trie
//! with per-route privilege gating, supports WebSocket upgrades, and writes
//! responses under per-connection time/resource budgets.
//!
//! Building the actual Redfish resource tree (`/redfish/v1/...` schema
//! objects, the user directory, the object broker) is out of scope (spec
//! §1 Non-goals); this crate exposes [`Router`]/[`Rule`] for a caller to
//! register whatever routes it needs, and [`run_server`] to drive them.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;

pub mod adaptor;
pub mod cli;
pub mod config;
pub mod connection;
pub mod date_cache;
pub mod error;
pub mod headers;
pub mod managers;
pub mod memory;
pub mod monitor;
pub mod params;
pub mod privilege;
pub mod request;
pub mod response;
pub mod router;
pub mod rule;
pub mod server;
pub mod session;
pub mod timer;
pub mod trie;
pub mod websocket;

pub use cli::Cli;
pub use config::Config;
pub use error::{ProtocolFault, RegistrationFault, SessionFault, TransportFault};
pub use managers::{Managers, ShutdownHook};
pub use params::Params;
pub use privilege::{privilege_allows, resolve_role, PrivilegeSet};
pub use request::{Method, Request};
pub use response::Response;
pub use router::Router;
pub use rule::{MethodMask, Rule};
pub use server::{HttpServer, ServerHandle};
pub use session::{PersistenceType, SessionStore, UserSession};

/// Boots the server end to end: parses CLI args, builds the TLS acceptor
/// and shared state, binds and starts the acceptor/worker pool, then blocks
/// until SIGINT/SIGTERM triggers graceful shutdown.
///
/// `build_router` registers every route the embedding application needs;
/// this function calls [`Router::finalize`] on the result before serving.
pub async fn run_server<F>(build_router: F) -> Result<()>
where
    F: FnOnce() -> Result<Router>,
{
    env_logger::Builder::from_default_env().init();

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        log::debug!("rustls crypto provider already installed");
    }

    let cli = Cli::parse();

    let mut router = build_router()?;
    router.finalize();
    let router = Arc::new(router);

    let idle_timeout = Duration::from_secs(cli.idle_session_timeout_mins * 60);
    let sessions = Arc::new(SessionStore::with_timeout(idle_timeout));
    let config = Arc::new(Config::from_cli(&cli));

    let server = HttpServer::new(router, sessions, config, &cli)?;
    let handle = server.serve(cli.bind, cli.worker_count(), cli.shutdown_timeout()).await?;

    log::info!("redfish_core running on {}", cli.bind);
    wait_for_shutdown_signal().await?;
    log::info!("shutdown signal received, draining connections (timeout: {:?})", cli.shutdown_timeout());

    match handle.shutdown().await {
        Ok(()) => {
            log::info!("shutdown complete");
            Ok(())
        }
        Err(elapsed) => Err(anyhow::anyhow!("shutdown timed out after {elapsed:?}")),
    }
}

/// Programmatic entry point for embedders that already have their own CLI
/// parsing and want a running server without going through [`run_server`]'s
/// signal-handling loop. Returns the [`ServerHandle`] immediately.
pub async fn create_server(
    router: Router,
    sessions: Arc<SessionStore>,
    config: Arc<Config>,
    cli: &Cli,
    addr: SocketAddr,
) -> Result<ServerHandle> {
    let mut router = router;
    router.finalize();
    let server = HttpServer::new(Arc::new(router), sessions, config, cli)?;
    server.serve(addr, cli.worker_count(), cli.shutdown_timeout()).await
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => log::info!("received SIGTERM"),
            _ = sigint.recv() => log::info!("received SIGINT"),
        }
    }

    #[cfg(windows)]
    {
        use tokio::signal::windows;

        let mut ctrl_c = windows::ctrl_c()?;
        let mut ctrl_break = windows::ctrl_break()?;

        tokio::select! {
            _ = ctrl_c.recv() => log::info!("received CTRL+C"),
            _ = ctrl_break.recv() => log::info!("received CTRL+BREAK"),
        }
    }

    Ok(())
}
