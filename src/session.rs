//! C3 — Session Store.
//!
//! Grounded on `examples/original_source/include/sessions.hpp`:
//! `UserSession`/`PersistenceType`/`SessionStore::generateUserSession`/
//! `loginSessionByToken`/`applySessionTimeouts`. Token shapes and eviction
//! cadence follow SPEC_FULL.md §10 points 1-2 exactly (20-char token/CSRF,
//! 10-char unique id, 62-char alphanumeric alphabet, <=1 sweep/minute,
//! TIMEOUT-only eviction, 60 minute default).

use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use rand::Rng;

use crate::privilege::{resolve_role, PrivilegeSet};

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
const TOKEN_LEN: usize = 20;
const UID_LEN: usize = 10;
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// How long a session survives idle time. `SingleRequest` sessions (e.g.
/// ones created to satisfy one mTLS-authenticated request) are never swept
/// by the timeout sweep; they're removed explicitly once their request
/// completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistenceType {
    Timeout,
    SingleRequest,
}

#[derive(Debug, Clone)]
pub struct UserSession {
    pub unique_id: String,
    pub session_token: String,
    pub csrf_token: String,
    pub username: String,
    pub role: String,
    pub persistence: PersistenceType,
    last_used: Instant,
}

impl UserSession {
    pub fn last_used(&self) -> Instant {
        self.last_used
    }

    /// Resolves this session's role to its granted privilege set.
    pub fn granted(&self) -> PrivilegeSet {
        resolve_role(&self.role)
    }
}

fn random_token(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| {
            let idx = rng.random_range(0..ALPHABET.len());
            ALPHABET[idx] as char
        })
        .collect()
}

/// Concurrent session map, shared across all workers (sessions must be
/// visible regardless of which worker accepted the connection that created
/// them or the one handling a later request bearing the token).
pub struct SessionStore {
    by_token: DashMap<String, UserSession>,
    last_sweep: Mutex<Instant>,
    idle_timeout: Duration,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(idle_timeout: Duration) -> Self {
        Self {
            by_token: DashMap::new(),
            last_sweep: Mutex::new(Instant::now()),
            idle_timeout,
        }
    }

    /// Creates a new session, regenerating tokens on the vanishingly
    /// unlikely event of a collision. `role` is the user-role string looked
    /// up from the user directory (spec §4.3); resolving it to a granted
    /// privilege set happens lazily via [`UserSession::granted`].
    pub fn generate(
        &self,
        username: impl Into<String>,
        role: impl Into<String>,
        persistence: PersistenceType,
    ) -> UserSession {
        let username = username.into();
        let role = role.into();
        loop {
            let token = random_token(TOKEN_LEN);
            if self.by_token.contains_key(&token) {
                continue;
            }
            let session = UserSession {
                unique_id: random_token(UID_LEN),
                session_token: token.clone(),
                csrf_token: random_token(TOKEN_LEN),
                username: username.clone(),
                role: role.clone(),
                persistence,
                last_used: Instant::now(),
            };
            self.by_token.insert(token, session.clone());
            return session;
        }
    }

    /// Looks up a session by bearer token, bumping its last-use time.
    /// Performs an opportunistic eviction sweep first (at most once per
    /// minute, `Timeout` sessions only).
    pub fn lookup(&self, token: &str) -> Option<UserSession> {
        self.sweep_if_due();
        let mut entry = self.by_token.get_mut(token)?;
        entry.last_used = Instant::now();
        Some(entry.clone())
    }

    pub fn remove(&self, token: &str) {
        self.by_token.remove(token);
    }

    /// Returns every session with the given persistence type (spec §4.3).
    pub fn sessions_by_persistence(&self, persistence: PersistenceType) -> Vec<UserSession> {
        self.by_token
            .iter()
            .filter(|entry| entry.persistence == persistence)
            .map(|entry| entry.clone())
            .collect()
    }

    fn sweep_if_due(&self) {
        let mut last = self.last_sweep.lock();
        if last.elapsed() < SWEEP_INTERVAL {
            return;
        }
        *last = Instant::now();
        let idle_timeout = self.idle_timeout;
        self.by_token.retain(|_, session| {
            session.persistence != PersistenceType::Timeout
                || session.last_used.elapsed() < idle_timeout
        });
    }

    pub fn len(&self) -> usize {
        self.by_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_token.is_empty()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_tokens_meet_entropy_floor() {
        let store = SessionStore::new();
        let session = store.generate("admin", "Administrator", PersistenceType::Timeout);
        assert_eq!(session.session_token.len(), TOKEN_LEN);
        assert_eq!(session.csrf_token.len(), TOKEN_LEN);
        assert_ne!(session.session_token, session.csrf_token);
    }

    #[test]
    fn lookup_bumps_last_used_and_round_trips() {
        let store = SessionStore::new();
        let session = store.generate("admin", "Administrator", PersistenceType::Timeout);
        let found = store.lookup(&session.session_token).expect("session present");
        assert_eq!(found.username, "admin");
        assert!(found.granted().contains(PrivilegeSet::CONFIGURE_USERS));
    }

    #[test]
    fn remove_is_unconditional() {
        let store = SessionStore::new();
        let session = store.generate("admin", "Administrator", PersistenceType::SingleRequest);
        store.remove(&session.session_token);
        assert!(store.lookup(&session.session_token).is_none());
    }

    #[test]
    fn two_sessions_get_distinct_tokens() {
        let store = SessionStore::new();
        let a = store.generate("a", "Administrator", PersistenceType::Timeout);
        let b = store.generate("b", "Administrator", PersistenceType::Timeout);
        assert_ne!(a.session_token, b.session_token);
    }

    #[test]
    fn sessions_by_persistence_filters_correctly() {
        let store = SessionStore::new();
        let timeout = store.generate("a", "Administrator", PersistenceType::Timeout);
        let single = store.generate("b", "Administrator", PersistenceType::SingleRequest);

        let timeouts = store.sessions_by_persistence(PersistenceType::Timeout);
        assert_eq!(timeouts.len(), 1);
        assert_eq!(timeouts[0].session_token, timeout.session_token);

        let singles = store.sessions_by_persistence(PersistenceType::SingleRequest);
        assert_eq!(singles.len(), 1);
        assert_eq!(singles[0].session_token, single.session_token);
    }
}
