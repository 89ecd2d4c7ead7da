//! C9 — Acceptor / Worker Pool (spec §5: "single-threaded cooperative,
//! N-way sharded").
//!
//! Grounded on `crow::Server::run`/`startAcceptOp` in
//! `examples/original_source/crow/include/crow/http_server.h`, which binds
//! one listener and round-robins accepted sockets across a fixed pool of
//! `io_service` threads, each driving its own timer queue and date cache.
//! Rust's async model has no direct equivalent of a shared `io_service`
//! pool running `!Send` handler state, so each worker gets its own
//! single-threaded Tokio runtime plus a `LocalSet` to host the worker-local
//! `Rc<RefCell<TimerQueue>>`/`Rc<RefCell<DateCache>>` the spec requires
//! (§5: "worker-local and unsynchronized by design"). The acceptor itself
//! runs as an ordinary task on the process's multi-thread runtime and hands
//! off accepted sockets to workers over a channel.

use std::cell::RefCell;
use std::net::SocketAddr;
use std::path::Path;
use std::rc::Rc;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;

use crate::cli::Cli;
use crate::config::Config;
use crate::connection::{stage_mtls_session, Connection};
use crate::date_cache::DateCache;
use crate::monitor::spawn_memory_monitor;
use crate::router::Router;
use crate::session::SessionStore;
use crate::timer::TimerQueue;

/// Owns the frozen, process-wide state every worker shares (spec §5:
/// "the Router's rule table + trie (frozen after startup; readers are
/// lock-free)... the Session Store (synchronized)... process-global
/// configuration (read-only after init)") and the optional TLS acceptor.
pub struct HttpServer {
    router: Arc<Router>,
    sessions: Arc<SessionStore>,
    config: Arc<Config>,
    tls_acceptor: Option<TlsAcceptor>,
}

impl HttpServer {
    /// `router` must already be finalized ([`Router::finalize`]).
    pub fn new(router: Arc<Router>, sessions: Arc<SessionStore>, config: Arc<Config>, cli: &Cli) -> Result<Self> {
        let tls_acceptor = build_tls_acceptor(cli)?;
        Ok(Self { router, sessions, config, tls_acceptor })
    }

    /// Binds `addr` and starts the acceptor plus `worker_count` workers.
    /// Returns immediately with a [`ServerHandle`] for graceful shutdown;
    /// the server itself runs in background tasks/threads.
    pub async fn serve(self, addr: SocketAddr, worker_count: usize, shutdown_timeout: Duration) -> Result<ServerHandle> {
        let worker_count = worker_count.max(1);
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("binding {addr}"))?;
        info!(
            "listening on {addr} ({} worker{})",
            worker_count,
            if worker_count == 1 { "" } else { "s" }
        );

        let ct = CancellationToken::new();
        let requests_processed = Arc::new(AtomicU64::new(0));
        spawn_memory_monitor(requests_processed.clone(), ct.clone());

        let mut senders = Vec::with_capacity(worker_count);
        let mut join_handles = Vec::with_capacity(worker_count);
        for id in 0..worker_count {
            let (tx, rx) = mpsc::unbounded_channel::<TcpStream>();
            senders.push(tx);
            let worker = Worker {
                id,
                router: self.router.clone(),
                sessions: self.sessions.clone(),
                config: self.config.clone(),
                tls_acceptor: self.tls_acceptor.clone(),
                requests_processed: requests_processed.clone(),
                ct: ct.clone(),
            };
            let handle = std::thread::Builder::new()
                .name(format!("redfish-worker-{id}"))
                .spawn(move || worker.run(rx))
                .with_context(|| format!("spawning worker thread {id}"))?;
            join_handles.push(handle);
        }

        let (completion_tx, completion_rx) = oneshot::channel();
        let acceptor_ct = ct.clone();
        tokio::spawn(async move {
            run_acceptor(listener, senders, acceptor_ct).await;
            for handle in join_handles {
                if let Err(err) = handle.join() {
                    error!("worker thread panicked: {err:?}");
                }
            }
            let _ = completion_tx.send(());
        });

        Ok(ServerHandle::new(ct, completion_rx, shutdown_timeout))
    }
}

/// Accepts connections and round-robins them across workers until
/// cancelled (spec §9 open question 1: "Leave round-robin"). Runs on the
/// process's ordinary multi-thread runtime — it never touches `!Send`
/// worker-local state itself, only hands off the raw stream.
async fn run_acceptor(listener: tokio::net::TcpListener, senders: Vec<mpsc::UnboundedSender<TcpStream>>, ct: CancellationToken) {
    let mut next = 0usize;
    loop {
        tokio::select! {
            _ = ct.cancelled() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _peer)) => {
                        let sender = &senders[next % senders.len()];
                        next = next.wrapping_add(1);
                        if sender.send(stream).is_err() {
                            warn!("worker channel closed; dropping accepted connection");
                        }
                    }
                    Err(err) => warn!("accept failed: {err}"),
                }
            }
        }
    }
}

struct Worker {
    id: usize,
    router: Arc<Router>,
    sessions: Arc<SessionStore>,
    config: Arc<Config>,
    tls_acceptor: Option<TlsAcceptor>,
    requests_processed: Arc<AtomicU64>,
    ct: CancellationToken,
}

impl Worker {
    /// Runs on its own OS thread with a single-threaded runtime: the
    /// worker-local `TimerQueue`/`DateCache` are `Rc`-based and must never
    /// cross threads (spec §5).
    fn run(self, rx: mpsc::UnboundedReceiver<TcpStream>) {
        let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(rt) => rt,
            Err(err) => {
                error!("worker {} failed to start its runtime: {err}", self.id);
                return;
            }
        };
        let local = tokio::task::LocalSet::new();
        local.block_on(&rt, self.main_loop(rx));
    }

    async fn main_loop(self, mut rx: mpsc::UnboundedReceiver<TcpStream>) {
        let timers = Rc::new(RefCell::new(TimerQueue::with_quantum(self.config.deadline_quantum)));
        let dates = Rc::new(RefCell::new(DateCache::new()));

        {
            let timers = timers.clone();
            let quantum = self.config.deadline_quantum;
            let ct = self.ct.clone();
            tokio::task::spawn_local(async move {
                let mut interval = tokio::time::interval(quantum);
                loop {
                    tokio::select! {
                        _ = ct.cancelled() => break,
                        _ = interval.tick() => timers.borrow_mut().tick(),
                    }
                }
            });
        }

        loop {
            tokio::select! {
                _ = self.ct.cancelled() => break,
                accepted = rx.recv() => {
                    let Some(stream) = accepted else { break };
                    let router = self.router.clone();
                    let sessions = self.sessions.clone();
                    let config = self.config.clone();
                    let tls_acceptor = self.tls_acceptor.clone();
                    let requests_processed = self.requests_processed.clone();
                    let timers = timers.clone();
                    let dates = dates.clone();
                    tokio::task::spawn_local(async move {
                        accept_one(stream, router, sessions, config, tls_acceptor, timers, dates, requests_processed).await;
                    });
                }
            }
        }
    }
}

/// S1/S2: peeks the first byte to decide plain vs TLS, then runs the
/// Connection state machine to completion.
async fn accept_one(
    stream: TcpStream,
    router: Arc<Router>,
    sessions: Arc<SessionStore>,
    config: Arc<Config>,
    tls_acceptor: Option<TlsAcceptor>,
    timers: Rc<RefCell<TimerQueue>>,
    dates: Rc<RefCell<DateCache>>,
    requests_processed: Arc<AtomicU64>,
) {
    let mut peek_buf = [0u8; 1];
    let first_byte = match stream.peek(&mut peek_buf).await {
        Ok(1) => peek_buf[0],
        _ => return,
    };
    let (adaptor, mtls_identity) = match Connection::detect_and_handshake(stream, first_byte, tls_acceptor.as_ref()).await {
        Ok(result) => result,
        Err(err) => {
            debug!("handshake failed: {err}");
            return;
        }
    };
    let staged_token = mtls_identity.map(|identity| stage_mtls_session(&sessions, identity));
    let connection = Connection::new(adaptor, router, sessions, config, timers, dates, staged_token)
        .with_request_counter(requests_processed);
    connection.run().await;
}

fn build_tls_acceptor(cli: &Cli) -> Result<Option<TlsAcceptor>> {
    let Some((cert_path, key_path)) = cli.tls_config() else {
        return Ok(None);
    };
    let certs = load_certs(&cert_path)?;
    let key = load_private_key(&key_path)?;

    let server_config = if let Some(trust_certs) = cli.load_mtls_trust_store()? {
        let mut roots = rustls::RootCertStore::empty();
        for cert in trust_certs {
            roots.add(cert).context("adding mTLS trust anchor")?;
        }
        let verifier = rustls::server::WebPkiClientVerifier::builder(Arc::new(roots))
            .allow_unauthenticated()
            .build()
            .context("building client certificate verifier")?;
        rustls::ServerConfig::builder()
            .with_client_cert_verifier(verifier)
            .with_single_cert(certs, key)
            .context("building mTLS-enabled server config")?
    } else {
        rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .context("building server config")?
    };

    Ok(Some(TlsAcceptor::from(Arc::new(server_config))))
}

fn load_certs(path: &Path) -> Result<Vec<rustls::pki_types::CertificateDer<'static>>> {
    let bytes = std::fs::read(path).with_context(|| format!("reading certificate chain {path:?}"))?;
    rustls_pemfile::certs(&mut bytes.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("parsing certificate chain {path:?}"))
}

fn load_private_key(path: &Path) -> Result<rustls::pki_types::PrivateKeyDer<'static>> {
    let bytes = std::fs::read(path).with_context(|| format!("reading private key {path:?}"))?;
    rustls_pemfile::private_key(&mut bytes.as_slice())
        .with_context(|| format!("parsing private key {path:?}"))?
        .ok_or_else(|| anyhow::anyhow!("no private key found in {path:?}"))
}

/// Handle for managing server lifecycle: graceful shutdown via a
/// `CancellationToken`, completion signaled once the acceptor and every
/// worker thread have stopped (spec §5: "the acceptor stops first, then
/// each worker's event loop is stopped").
pub struct ServerHandle {
    cancellation_token: CancellationToken,
    completion_rx: oneshot::Receiver<()>,
    default_timeout: Duration,
}

impl ServerHandle {
    fn new(cancellation_token: CancellationToken, completion_rx: oneshot::Receiver<()>, default_timeout: Duration) -> Self {
        Self { cancellation_token, completion_rx, default_timeout }
    }

    pub fn cancel(&self) {
        self.cancellation_token.cancel();
    }

    pub async fn wait_for_completion(mut self, timeout: Duration) -> Result<(), Duration> {
        tokio::time::timeout(timeout, &mut self.completion_rx).await.map_err(|_| timeout)?.map_err(|_| timeout)
    }

    /// Convenience for callers that don't want to plumb their own timeout
    /// through twice (bind-time default from [`Cli::shutdown_timeout`]).
    pub async fn shutdown(self) -> Result<(), Duration> {
        let timeout = self.default_timeout;
        self.cancel();
        self.wait_for_completion(timeout).await
    }
}
