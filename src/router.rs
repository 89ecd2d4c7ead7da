//! C7 — Router: owns the trie + rule table, dispatch contract (spec §4.7).
//!
//! Grounded on `crow::Router::handle`/`handle_upgrade` in
//! `examples/original_source/crow/include/crow/routing.h`: 404 on no rule,
//! 301 on the reserved redirect index, 404 (never 405) on method mismatch,
//! 403 on privilege failure, uncaught-handler-failure trapped to 500.

use log::{debug, error};

use crate::params::Params;
use crate::privilege::{privilege_allows, PrivilegeSet};
use crate::request::Request;
use crate::response::Response;
use crate::rule::{Rule, UpgradeInvoker};
use crate::session::SessionStore;
use crate::trie::{Trie, NO_RULE, REDIRECT_SLASH};

/// Outcome of [`Router::handle_upgrade`] (spec §4.7's `handle_upgrade`
/// variant of the dispatch contract).
pub enum UpgradeOutcome {
    /// No rule, method mismatch, not TLS, or the matched rule isn't an
    /// upgrade rule — the caller should treat this like a 404.
    NotFound,
    /// Privilege check failed.
    Denied,
    /// Dispatch may proceed: the handshake response should be written and
    /// the adaptor handed to `invoker`.
    Proceed { invoker: UpgradeInvoker, params: Params },
}

pub struct Router {
    trie: Trie,
    rules: Vec<Option<Rule>>,
}

impl Router {
    pub fn new() -> Self {
        // Indices 0 and 1 are reserved (no-rule / trailing-slash redirect),
        // matching `Router() : rules_(2)` in the original.
        Self { trie: Trie::new(), rules: vec![None, None] }
    }

    /// Registers `rule`, binding its pattern to a fresh index and, per
    /// SPEC_FULL.md §10.4, also binding the slashless form to the same
    /// index as the reserved redirect rule when the pattern ends in `/`
    /// and is longer than a bare `/`.
    pub fn register(&mut self, rule: Rule) -> Result<(), crate::error::RegistrationFault> {
        let pattern = rule.pattern.clone();
        self.rules.push(Some(rule));
        let index = (self.rules.len() - 1) as u32;
        self.trie.add(&pattern, index)?;
        if pattern.len() > 2 && pattern.ends_with('/') {
            self.trie.add(&pattern[..pattern.len() - 1], REDIRECT_SLASH)?;
        }
        Ok(())
    }

    /// Must run once, after every route is registered and before the first
    /// request is served.
    pub fn finalize(&mut self) {
        self.trie.validate_and_optimize();
    }

    pub fn find_routes_under(&self, prefix: &str) -> Vec<u32> {
        self.trie.find_routes_under(prefix)
    }

    /// The dispatch contract from spec §4.7, transcribed directly.
    pub fn handle(&self, req: &mut Request, res: &mut Response, sessions: &SessionStore) {
        let (idx, params) = self.trie.find(&req.path);

        if idx == NO_RULE {
            *res = Response::with_status(404);
            return;
        }
        if idx == REDIRECT_SLASH {
            let mut redirect = Response::with_status(301);
            redirect.headers.insert("Location", format!("{}/", req.path));
            *res = redirect;
            return;
        }

        let rule = match self.rules.get(idx as usize).and_then(|r| r.as_ref()) {
            Some(rule) => rule,
            None => {
                *res = Response::with_status(404);
                return;
            }
        };

        if !rule.methods.has(req.method) || rule.is_upgrade() {
            // Method mismatch is hidden as not-found, by design (spec §9).
            // An upgrade rule reached through ordinary dispatch (e.g. a
            // plain-HTTP request to a WebSocket-only route) is likewise
            // treated as though no handler exists for it here.
            *res = Response::with_status(404);
            return;
        }

        let granted = req
            .session_token
            .as_deref()
            .and_then(|token| sessions.lookup(token))
            .map(|session| session.granted())
            .unwrap_or(crate::privilege::PrivilegeSet::NONE);

        if !privilege_allows(&rule.privileges, granted) {
            *res = Response::with_status(403);
            return;
        }

        debug!("dispatching {:?} {} -> rule {idx}", req.method, req.path);
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            rule.invoke(req, res, &params);
        }));
        if outcome.is_err() {
            error!("handler for rule {idx} panicked; returning 500");
            *res = Response::with_status(500);
        }
    }

    /// The `handle_upgrade` variant of the dispatch contract (spec §4.7):
    /// "instead of invoke, it transfers ownership of the adaptor to the
    /// rule's upgrade handler". This resolves the rule and checks
    /// privileges without touching the adaptor; the caller (Connection)
    /// does the actual ownership transfer.
    pub fn handle_upgrade(&self, req: &Request, sessions: &SessionStore) -> UpgradeOutcome {
        if !req.is_secure {
            return UpgradeOutcome::NotFound;
        }
        let (idx, params) = self.trie.find(&req.path);
        if idx == NO_RULE || idx == REDIRECT_SLASH {
            return UpgradeOutcome::NotFound;
        }
        let Some(rule) = self.rules.get(idx as usize).and_then(|r| r.as_ref()) else {
            return UpgradeOutcome::NotFound;
        };
        if !rule.is_upgrade() || !rule.methods.has(req.method) {
            return UpgradeOutcome::NotFound;
        }

        let granted = req
            .session_token
            .as_deref()
            .and_then(|token| sessions.lookup(token))
            .map(|session| session.granted())
            .unwrap_or(PrivilegeSet::NONE);
        if !privilege_allows(&rule.privileges, granted) {
            return UpgradeOutcome::Denied;
        }

        UpgradeOutcome::Proceed { invoker: rule.upgrade_invoker().expect("checked is_upgrade above"), params }
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::privilege::PrivilegeSet;
    use crate::request::Method;
    use crate::rule::MethodMask;
    use crate::session::PersistenceType;

    fn get_mask() -> MethodMask {
        MethodMask::default().with(Method::Get)
    }

    #[test]
    fn no_rule_is_404() {
        let mut router = Router::new();
        router.finalize();
        let sessions = SessionStore::new();
        let mut req = Request::new(Method::Get, 11, "/nope");
        let mut res = Response::new();
        router.handle(&mut req, &mut res, &sessions);
        assert_eq!(res.status, 404);
    }

    #[test]
    fn method_mismatch_is_404_not_405() {
        let mut router = Router::new();
        router
            .register(Rule::new_value("/redfish/v1/Chassis", get_mask(), vec![PrivilegeSet::NO_AUTH], || "ok".to_string()).unwrap())
            .unwrap();
        router.finalize();
        let sessions = SessionStore::new();
        let mut req = Request::new(Method::Post, 11, "/redfish/v1/Chassis");
        let mut res = Response::new();
        router.handle(&mut req, &mut res, &sessions);
        assert_eq!(res.status, 404);
    }

    #[test]
    fn trailing_slash_redirects() {
        let mut router = Router::new();
        router
            .register(Rule::new_value("/redfish/v1/Chassis/", get_mask(), vec![PrivilegeSet::NO_AUTH], || "ok".to_string()).unwrap())
            .unwrap();
        router.finalize();
        let sessions = SessionStore::new();
        let mut req = Request::new(Method::Get, 11, "/redfish/v1/Chassis");
        let mut res = Response::new();
        router.handle(&mut req, &mut res, &sessions);
        assert_eq!(res.status, 301);
        assert_eq!(res.headers.get("location"), Some("/redfish/v1/Chassis/"));
    }

    #[test]
    fn privilege_denied_is_403() {
        let mut router = Router::new();
        router
            .register(
                Rule::new_value(
                    "/redfish/v1/AccountService",
                    get_mask(),
                    vec![PrivilegeSet::CONFIGURE_USERS],
                    || "ok".to_string(),
                )
                .unwrap(),
            )
            .unwrap();
        router.finalize();
        let sessions = SessionStore::new();
        let session = sessions.generate("u", "ReadOnly", PersistenceType::Timeout);
        let mut req = Request::new(Method::Get, 11, "/redfish/v1/AccountService");
        req.session_token = Some(session.session_token);
        let mut res = Response::new();
        router.handle(&mut req, &mut res, &sessions);
        assert_eq!(res.status, 403);
    }

    #[test]
    fn matched_rule_runs_handler() {
        let mut router = Router::new();
        router
            .register(
                Rule::new_value("/redfish/v1", get_mask(), vec![PrivilegeSet::NO_AUTH], || "root".to_string()).unwrap(),
            )
            .unwrap();
        router.finalize();
        let sessions = SessionStore::new();
        let mut req = Request::new(Method::Get, 11, "/redfish/v1");
        let mut res = Response::new();
        router.handle(&mut req, &mut res, &sessions);
        assert_eq!(res.status, 200);
        assert!(res.completed);
    }

    #[test]
    fn upgrade_requires_tls() {
        let mut router = Router::new();
        router
            .register(Rule::new_upgrade("/ws", vec![PrivilegeSet::NO_AUTH], |_req, _params, _ws| async {}).unwrap())
            .unwrap();
        router.finalize();
        let sessions = SessionStore::new();
        let req = Request::new(Method::Get, 11, "/ws");
        assert!(matches!(router.handle_upgrade(&req, &sessions), UpgradeOutcome::NotFound));
    }

    #[test]
    fn plain_dispatch_to_an_upgrade_only_route_is_404() {
        let mut router = Router::new();
        router
            .register(Rule::new_upgrade("/ws", vec![PrivilegeSet::NO_AUTH], |_req, _params, _ws| async {}).unwrap())
            .unwrap();
        router.finalize();
        let sessions = SessionStore::new();
        let mut req = Request::new(Method::Get, 11, "/ws");
        req.is_secure = true;
        let mut res = Response::new();
        router.handle(&mut req, &mut res, &sessions);
        assert_eq!(res.status, 404);
    }

    #[test]
    fn upgrade_resolves_when_tls_and_privileges_match() {
        let mut router = Router::new();
        router
            .register(Rule::new_upgrade("/ws", vec![PrivilegeSet::NO_AUTH], |_req, _params, _ws| async {}).unwrap())
            .unwrap();
        router.finalize();
        let sessions = SessionStore::new();
        let mut req = Request::new(Method::Get, 11, "/ws");
        req.is_secure = true;
        assert!(matches!(router.handle_upgrade(&req, &sessions), UpgradeOutcome::Proceed { .. }));
    }

    #[test]
    fn handler_panic_becomes_500() {
        let mut router = Router::new();
        router
            .register(
                Rule::new_full(
                    "/redfish/v1/boom",
                    get_mask(),
                    vec![PrivilegeSet::NO_AUTH],
                    |_req: &mut Request, _res: &mut Response| {
                        panic!("handler exploded")
                    },
                )
                .unwrap(),
            )
            .unwrap();
        router.finalize();
        let sessions = SessionStore::new();
        let mut req = Request::new(Method::Get, 11, "/redfish/v1/boom");
        let mut res = Response::new();
        router.handle(&mut req, &mut res, &sessions);
        assert_eq!(res.status, 500);
    }
}
