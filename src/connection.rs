//! C5 — Connection: per-socket state machine (spec §4.5).
//!
//! Grounded on `crow::Connection::start`/`handle`/`doReadHeaders`/`doRead`/
//! `doWrite`/`startDeadline`/`prepareMutualTls` in
//! `examples/original_source/http/http_connection.h`. The S0..S8 states
//! from spec §4.5's transition table are folded into straight-line async
//! code (one `run()` call per connection, looping back to header-reading on
//! keep-alive) rather than a literal state enum, the same way the original
//! expresses the machine as a sequence of chained async callbacks rather
//! than an explicit switch.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::debug;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio_rustls::TlsAcceptor;

use crate::adaptor::Adaptor;
use crate::config::{Config, AUTHENTICATED_QUANTA, HEADER_LIMIT, PRE_AUTH_BODY_LIMIT};
use crate::date_cache::DateCache;
use crate::error::ProtocolFault;
use crate::request::{Method, Request};
use crate::response::{Body, Response};
use crate::router::{Router, UpgradeOutcome};
use crate::rule::UpgradeInvoker;
use crate::session::{PersistenceType, SessionStore};
use crate::timer::TimerQueue;
use crate::websocket;

pub struct Connection {
    adaptor: Adaptor,
    router: Arc<Router>,
    sessions: Arc<SessionStore>,
    config: Arc<Config>,
    timers: Rc<RefCell<TimerQueue>>,
    dates: Rc<RefCell<DateCache>>,
    staged_session_token: Option<String>,
    /// Shared with the process-wide memory/request monitor (SPEC_FULL.md
    /// ambient stack); `None` is fine for tests that construct a Connection
    /// without a monitor running.
    requests_processed: Option<Arc<AtomicU64>>,
}

/// Outcome of one header-read quantum race, used to drive the slow-client
/// policy (spec §4.5.1) without the Connection borrowing the worker-local
/// `TimerQueue` across an `.await`.
enum ReadOutcome<T> {
    Done(T),
    DeadlineFired,
}

/// What `serve_one_request` wants `run` to do next.
enum ConnAction {
    KeepAlive,
    Close,
    /// S6: "Rule marks upgrade to WebSocket ... Connection self-destructs
    /// without closing the socket." Carries what the upgrade handler needs;
    /// the adaptor itself is taken from `self` by the caller.
    Upgrade(Request, UpgradeInvoker, crate::params::Params),
}

impl Connection {
    pub fn new(
        adaptor: Adaptor,
        router: Arc<Router>,
        sessions: Arc<SessionStore>,
        config: Arc<Config>,
        timers: Rc<RefCell<TimerQueue>>,
        dates: Rc<RefCell<DateCache>>,
        staged_session_token: Option<String>,
    ) -> Self {
        Self {
            adaptor,
            router,
            sessions,
            config,
            timers,
            dates,
            staged_session_token,
            requests_processed: None,
        }
    }

    /// Wires in the shared request counter the memory monitor watches.
    pub fn with_request_counter(mut self, counter: Arc<AtomicU64>) -> Self {
        self.requests_processed = Some(counter);
        self
    }

    /// S1/S2: optionally upgrades a plain TCP adaptor to TLS, staging an
    /// mTLS session along the way. Takes the raw stream and the (already
    /// peeked) first byte so the caller decides once whether to call this
    /// at all.
    pub async fn detect_and_handshake(
        stream: TcpStream,
        first_byte: u8,
        tls_acceptor: Option<&TlsAcceptor>,
    ) -> std::io::Result<(Adaptor, Option<MtlsIdentityOwned>)> {
        const TLS_HANDSHAKE_RECORD: u8 = 0x16;
        if first_byte == TLS_HANDSHAKE_RECORD {
            if let Some(acceptor) = tls_acceptor {
                let tls_stream = acceptor.accept(stream).await?;
                let identity = extract_mtls_identity(&tls_stream);
                return Ok((Adaptor::Tls(Box::new(tls_stream)), identity));
            }
        }
        Ok((Adaptor::Plain(stream), None))
    }

    /// Runs the connection to completion: reads and dispatches requests
    /// until the client or server decide not to keep the connection alive,
    /// a protocol fault occurs, or the deadline fires.
    pub async fn run(mut self) {
        loop {
            match self.serve_one_request().await {
                Ok(ConnAction::KeepAlive) => continue,
                Ok(ConnAction::Close) => break,
                Ok(ConnAction::Upgrade(req, invoker, params)) => {
                    match websocket::upgrade(self.adaptor, &req).await {
                        Ok(ws) => invoker(req, params, ws).await,
                        Err(err) => debug!("websocket handshake failed: {err}"),
                    }
                    // Adaptor ownership already passed to the handshake
                    // above; don't close it again.
                    return;
                }
                Err(err) => {
                    debug!("connection closing: {err}");
                    break;
                }
            }
        }
        self.adaptor.close().await;
    }

    async fn serve_one_request(&mut self) -> Result<ConnAction, ProtocolFault> {
        let is_secure = self.adaptor.is_secure();

        // Session status isn't known until S4, so the header-read budget is
        // always the anonymous one (spec §4.5.1; grounded on `startDeadline`
        // being driven by `req->session`/`loggedIn`, never `req->isSecure`).
        let header_bytes = match self.read_until_headers_end(crate::config::ANONYMOUS_QUANTA).await {
            ReadOutcome::Done(bytes) => bytes,
            ReadOutcome::DeadlineFired => return Err(ProtocolFault::Malformed("deadline".into())),
        };
        let Some(header_bytes) = header_bytes else {
            return Ok(ConnAction::Close); // peer closed before sending a request
        };

        let mut req = parse_request(&header_bytes, is_secure)?;
        if let Some(counter) = &self.requests_processed {
            counter.fetch_add(1, Ordering::Relaxed);
        }

        // Plain HTTP never reaches routed handlers: 404 unless GET/HEAD with
        // a Host header, in which case a 301 to the same host/path over TLS
        // is issued instead (`http_connection.h::handle`, unconditional on
        // `!isSecure` — there is no runtime toggle for this).
        if !is_secure {
            let mut res = match (matches!(req.method, Method::Get | Method::Head), req.host()) {
                (true, Some(host)) => {
                    let mut res = Response::with_status(301);
                    res.headers.insert("Location", format!("https://{host}{}", req.path));
                    res
                }
                _ => Response::with_status(404),
            };
            res.keep_alive = false;
            self.write_response(&mut res).await?;
            return Ok(ConnAction::Close);
        }

        if req.version == 11 && req.host().is_none() {
            return Err(ProtocolFault::MissingHost);
        }

        // S4: authenticate, trying staged mTLS first, then cookie, then bearer.
        if let Some(token) = self.staged_session_token.clone() {
            req.session_token = Some(token);
        } else if let Some(cookie) = req.headers.get("cookie").and_then(|c| extract_cookie(c, "session")) {
            if self.sessions.lookup(&cookie).is_some() {
                req.session_token = Some(cookie);
            }
        } else if let Some(bearer) = req.headers.get("authorization").and_then(extract_bearer) {
            if self.sessions.lookup(&bearer).is_some() {
                req.session_token = Some(bearer);
            }
        }

        // S6: "Rule marks upgrade to WebSocket". Checked before the
        // ordinary body-limit/read path since upgrade requests are GET with
        // no meaningful body.
        if websocket::is_upgrade_request(&req) {
            match self.router.handle_upgrade(&req, &self.sessions) {
                UpgradeOutcome::Proceed { invoker, params } => {
                    return Ok(ConnAction::Upgrade(req, invoker, params));
                }
                UpgradeOutcome::Denied => {
                    let mut res = Response::with_status(403);
                    res.keep_alive = false;
                    self.write_response(&mut res).await?;
                    return Ok(ConnAction::Close);
                }
                UpgradeOutcome::NotFound => {
                    let mut res = Response::with_status(404);
                    res.keep_alive = false;
                    self.write_response(&mut res).await?;
                    return Ok(ConnAction::Close);
                }
            }
        }

        let content_length = req
            .headers
            .get("content-length")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(0);

        if req.session_token.is_none() && content_length > PRE_AUTH_BODY_LIMIT {
            return Err(ProtocolFault::OversizePreAuthBody);
        }
        let limit = if req.session_token.is_some() { self.config.authenticated_body_limit } else { PRE_AUTH_BODY_LIMIT };
        if content_length > limit {
            return Err(ProtocolFault::OversizePreAuthBody);
        }

        if content_length > 0 {
            let budget = if req.session_token.is_some() { AUTHENTICATED_QUANTA } else { crate::config::ANONYMOUS_QUANTA };
            match self.read_body(content_length, budget).await {
                ReadOutcome::Done(body) => req.body = body,
                ReadOutcome::DeadlineFired => return Err(ProtocolFault::Malformed("deadline".into())),
            }
        }

        let mut res = Response::new();
        self.router.handle(&mut req, &mut res, &self.sessions);
        let keep_alive = is_secure && res.keep_alive && req.version == 11;
        res.keep_alive = keep_alive;
        self.write_response(&mut res).await?;

        if let Some(token) = &req.session_token {
            if let Some(session) = self.sessions.lookup(token) {
                if session.persistence == PersistenceType::SingleRequest {
                    self.sessions.remove(token);
                }
            }
        }

        Ok(if keep_alive { ConnAction::KeepAlive } else { ConnAction::Close })
    }

    /// Races a read against the slow-client deadline policy (spec §4.5.1):
    /// on timer fire, re-arm once more if the authenticated body is still
    /// growing, otherwise decrement the budget and close at zero.
    async fn read_until_headers_end(&mut self, budget: u32) -> ReadOutcome<Option<Vec<u8>>> {
        let mut buf = Vec::new();
        let mut scratch = [0u8; 4096];
        let mut remaining = budget;
        loop {
            let (tx, rx) = oneshot::channel();
            let quantum = self.timers.borrow().quantum();
            let ticket = self.timers.borrow_mut().add(move || {
                let _ = tx.send(());
            });
            tokio::select! {
                biased;
                read = self.adaptor.read_some(&mut scratch) => {
                    self.timers.borrow_mut().cancel(ticket);
                    match read {
                        Ok(0) if buf.is_empty() => return ReadOutcome::Done(None),
                        Ok(0) => return ReadOutcome::Done(Some(buf)),
                        Ok(n) => {
                            buf.extend_from_slice(&scratch[..n]);
                            if buf.len() > HEADER_LIMIT {
                                return ReadOutcome::DeadlineFired;
                            }
                            if find_header_end(&buf).is_some() {
                                return ReadOutcome::Done(Some(buf));
                            }
                            remaining = budget; // forward progress: full reset
                        }
                        Err(_) => return ReadOutcome::DeadlineFired,
                    }
                }
                _ = rx => {
                    remaining = remaining.saturating_sub(1);
                    if remaining == 0 {
                        return ReadOutcome::DeadlineFired;
                    }
                }
                _ = tokio::time::sleep(quantum) => {
                    // Worker hasn't ticked the queue yet; loop and retry.
                    self.timers.borrow_mut().cancel(ticket);
                }
            }
        }
    }

    async fn read_body(&mut self, len: usize, budget: u32) -> ReadOutcome<Vec<u8>> {
        let mut buf = Vec::with_capacity(len);
        let mut scratch = [0u8; 8192];
        let mut remaining = budget;
        while buf.len() < len {
            let (tx, rx) = oneshot::channel();
            let quantum = self.timers.borrow().quantum();
            let ticket = self.timers.borrow_mut().add(move || {
                let _ = tx.send(());
            });
            let last_len = buf.len();
            tokio::select! {
                biased;
                read = self.adaptor.read_some(&mut scratch) => {
                    self.timers.borrow_mut().cancel(ticket);
                    match read {
                        Ok(0) => return ReadOutcome::DeadlineFired,
                        Ok(n) => {
                            buf.extend_from_slice(&scratch[..n.min(len - buf.len())]);
                            remaining = budget;
                        }
                        Err(_) => return ReadOutcome::DeadlineFired,
                    }
                }
                _ = rx => {
                    // Still growing since last arm: authenticated slow-upload
                    // tolerance (spec §4.5.1). Idle anonymous body: close.
                    if buf.len() > last_len {
                        remaining = budget;
                    } else {
                        remaining = remaining.saturating_sub(1);
                        if remaining == 0 {
                            return ReadOutcome::DeadlineFired;
                        }
                    }
                }
                _ = tokio::time::sleep(quantum) => {
                    self.timers.borrow_mut().cancel(ticket);
                }
            }
        }
        ReadOutcome::Done(buf)
    }

    async fn write_response(&mut self, res: &mut Response) -> Result<(), ProtocolFault> {
        res.materialize_json_body();
        let date = self.dates.borrow_mut().get().to_string();
        let mut head = format!(
            "HTTP/1.1 {} {}\r\nServer: {}\r\nDate: {}\r\n",
            res.status,
            reason_phrase(res.status),
            self.config.server_name,
            date,
        );
        for (name, value) in res.headers.iter() {
            head.push_str(&format!("{name}: {value}\r\n"));
        }
        head.push_str(if res.keep_alive { "Connection: keep-alive\r\n" } else { "Connection: close\r\n" });

        let body: &[u8] = match &res.body {
            Body::Empty => &[],
            Body::Bytes(b) => b.as_slice(),
            Body::File(_) | Body::Streaming(_) => &[], // non-goal: file/streaming I/O plumbing
        };
        head.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));

        self.adaptor.write_all(head.as_bytes()).await.map_err(ProtocolFault::from_io)?;
        if !body.is_empty() {
            self.adaptor.write_all(body).await.map_err(ProtocolFault::from_io)?;
        }
        Ok(())
    }
}

impl ProtocolFault {
    fn from_io(_: std::io::Error) -> Self {
        ProtocolFault::Malformed("i/o error while writing response".into())
    }
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn parse_request(header_bytes: &[u8], is_secure: bool) -> Result<Request, ProtocolFault> {
    let mut headers = [httparse::EMPTY_HEADER; 64];
    let mut parsed = httparse::Request::new(&mut headers);
    let status = parsed
        .parse(header_bytes)
        .map_err(|e| ProtocolFault::Malformed(e.to_string()))?;
    if status.is_partial() {
        return Err(ProtocolFault::Malformed("incomplete header section".into()));
    }
    let method = parsed
        .method
        .and_then(Method::parse)
        .ok_or_else(|| ProtocolFault::Malformed("unsupported method".into()))?;
    let path = parsed.path.ok_or_else(|| ProtocolFault::Malformed("missing request target".into()))?;
    let version = 10 + parsed.version.unwrap_or(1);

    let mut req = Request::new(method, version, path);
    req.is_secure = is_secure;
    for header in parsed.headers.iter() {
        req.headers.insert(header.name, String::from_utf8_lossy(header.value).into_owned());
    }
    Ok(req)
}

fn extract_cookie(header_value: &str, name: &str) -> Option<String> {
    header_value.split(';').find_map(|pair| {
        let pair = pair.trim();
        let (k, v) = pair.split_once('=')?;
        (k == name).then(|| v.to_string())
    })
}

fn extract_bearer(header_value: &str) -> Option<String> {
    header_value.strip_prefix("Bearer ").map(|s| s.trim().to_string())
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        301 => "Moved Permanently",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "",
    }
}

/// Owned snapshot of the leaf certificate's identity, extracted once the
/// borrow on the TLS stream that produced it has ended.
pub struct MtlsIdentityOwned {
    pub common_name: String,
}

/// S2 side effect: "stage a TIMEOUT session for that user" (spec §4.5
/// transition table, S2). Resolving a CommonName to a user role is
/// ordinarily the external user directory's job (non-goal, spec §1); until
/// one is wired in, the mTLS-authenticated identity is granted the
/// `Administrator` role outright.
pub fn stage_mtls_session(sessions: &SessionStore, identity: MtlsIdentityOwned) -> String {
    let session = sessions.generate(identity.common_name, "Administrator", PersistenceType::Timeout);
    session.session_token
}

fn extract_mtls_identity<IO>(stream: &tokio_rustls::server::TlsStream<IO>) -> Option<MtlsIdentityOwned> {
    let (_, conn) = stream.get_ref();
    let certs = conn.peer_certificates()?;
    let leaf = certs.first()?;
    let (_, cert) = x509_parser::parse_x509_certificate(leaf.as_ref()).ok()?;

    let key_usage_ok = cert
        .key_usage()
        .ok()
        .flatten()
        .map(|ku| ku.value.digital_signature() && ku.value.key_agreement())
        .unwrap_or(false);
    let eku_ok = cert
        .extended_key_usage()
        .ok()
        .flatten()
        .map(|eku| eku.value.client_auth)
        .unwrap_or(false);
    if !key_usage_ok || !eku_ok {
        return None;
    }

    let cn = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())?
        .to_string();
    Some(MtlsIdentityOwned { common_name: cn })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_get_request() {
        let raw = b"GET /redfish/v1/ HTTP/1.1\r\nHost: bmc.local\r\n\r\n";
        let req = parse_request(raw, false).unwrap();
        assert_eq!(req.path, "/redfish/v1/");
        assert_eq!(req.host(), Some("bmc.local"));
        assert!(matches!(req.method, Method::Get));
    }

    #[test]
    fn missing_host_on_1_1_is_caught_by_caller() {
        let raw = b"GET / HTTP/1.1\r\n\r\n";
        let req = parse_request(raw, false).unwrap();
        assert!(req.host().is_none());
    }

    #[test]
    fn cookie_extraction() {
        assert_eq!(extract_cookie("a=1; session=tok123; b=2", "session"), Some("tok123".to_string()));
        assert_eq!(extract_cookie("a=1", "session"), None);
    }

    #[test]
    fn bearer_extraction() {
        assert_eq!(extract_bearer("Bearer abc123"), Some("abc123".to_string()));
        assert_eq!(extract_bearer("Basic abc123"), None);
    }

    #[test]
    fn header_end_detection() {
        assert_eq!(find_header_end(b"GET / HTTP/1.1\r\n\r\n"), Some(14));
        assert_eq!(find_header_end(b"GET / HTTP/1.1\r\n"), None);
    }
}
