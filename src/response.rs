//! Response data model (spec §3), grounded on `crow::Response` as used from
//! `examples/original_source/http/http_connection.h` (`completeRequestHandler`,
//! `isAliveHelper`, `jsonValue`, `keepAlive()`) re-expressed as an owned,
//! non-Boost type.

use std::path::PathBuf;

use crate::headers::Headers;

/// The four body shapes a handler can produce.
pub enum Body {
    Empty,
    Bytes(Vec<u8>),
    File(PathBuf),
    /// Pull-based chunk producer for large or generated payloads; returns
    /// `None` when exhausted.
    Streaming(Box<dyn FnMut() -> Option<Vec<u8>> + Send>),
}

impl std::fmt::Debug for Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Body::Empty => write!(f, "Body::Empty"),
            Body::Bytes(b) => write!(f, "Body::Bytes({} bytes)", b.len()),
            Body::File(p) => write!(f, "Body::File({p:?})"),
            Body::Streaming(_) => write!(f, "Body::Streaming(..)"),
        }
    }
}

pub struct Response {
    pub status: u16,
    pub headers: Headers,
    pub body: Body,
    /// Structured value serialized to JSON lazily at send time, taking
    /// priority over `body` when present (mirrors `res.jsonValue` in the
    /// original).
    pub json: Option<serde_json::Value>,
    pub completed: bool,
    pub keep_alive: bool,
    /// Invoked by the handler to signal "response ready to ship".
    completion_hook: Option<Box<dyn FnOnce() + Send>>,
    /// Invoked by the core to ask "is the underlying transport still open?".
    liveness_probe: Option<Box<dyn Fn() -> bool + Send>>,
}

impl Response {
    pub fn new() -> Self {
        Self {
            status: 200,
            headers: Headers::new(),
            body: Body::Empty,
            json: None,
            completed: false,
            keep_alive: true,
            completion_hook: None,
            liveness_probe: None,
        }
    }

    pub fn with_status(status: u16) -> Self {
        let mut res = Self::new();
        res.status = status;
        res
    }

    pub fn set_body(&mut self, bytes: impl Into<Vec<u8>>) {
        self.body = Body::Bytes(bytes.into());
    }

    pub fn set_json(&mut self, value: serde_json::Value) {
        self.json = Some(value);
    }

    /// Installed once per request, matching `handle()` wiring
    /// `res.completeRequestHandler`/`res.isAliveHelper` in the original.
    pub fn set_completion_hook(&mut self, hook: impl FnOnce() + Send + 'static) {
        self.completion_hook = Some(Box::new(hook));
    }

    pub fn set_liveness_probe(&mut self, probe: impl Fn() -> bool + Send + 'static) {
        self.liveness_probe = Some(Box::new(probe));
    }

    /// Called by the handler; marks the response complete and fires the
    /// completion hook exactly once.
    pub fn end(&mut self) {
        if self.completed {
            return;
        }
        self.completed = true;
        if let Some(hook) = self.completion_hook.take() {
            hook();
        }
    }

    pub fn is_alive(&self) -> bool {
        self.liveness_probe.as_ref().map(|probe| probe()).unwrap_or(true)
    }

    /// Invalidates the hooks, matching `completeRequest()` tearing down
    /// `completeRequestHandler`/`isAliveHelper` once the response has been
    /// written.
    pub fn invalidate_hooks(&mut self) {
        self.completion_hook = None;
        self.liveness_probe = None;
    }

    /// Serializes the staged JSON value into the body, if one was set.
    /// Called lazily, immediately before the response is written.
    pub fn materialize_json_body(&mut self) {
        if let Some(value) = self.json.take() {
            self.headers.insert("Content-Type", "application/json");
            self.body = Body::Bytes(serde_json::to_vec(&value).unwrap_or_default());
        }
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn end_fires_completion_hook_once() {
        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();
        let mut res = Response::new();
        res.set_completion_hook(move || fired_clone.store(true, Ordering::SeqCst));
        res.end();
        assert!(fired.load(Ordering::SeqCst));
        res.end(); // second call must not panic or double-fire
    }

    #[test]
    fn liveness_probe_defaults_to_alive() {
        let res = Response::new();
        assert!(res.is_alive());
    }

    #[test]
    fn json_materializes_to_bytes() {
        let mut res = Response::new();
        res.set_json(serde_json::json!({"Id": "1"}));
        res.materialize_json_body();
        assert!(matches!(res.body, Body::Bytes(_)));
        assert_eq!(res.headers.get("content-type"), Some("application/json"));
    }
}
