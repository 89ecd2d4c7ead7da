//! Process-global configuration, read-only after init (spec §5: "process
//! global configuration (read-only after init)" is one of the three kinds
//! of shared mutable state the model allows — this one isn't even mutable).

use std::time::Duration;

use crate::cli::Cli;

/// Pre-auth body cap (spec §4.5.3 / SPEC_FULL.md §10.6), matching
/// `loggedOutPostBodyLimit` in the original.
pub const PRE_AUTH_BODY_LIMIT: usize = 4096;
/// Header section cap, matching `httpHeaderLimit` in the original.
pub const HEADER_LIMIT: usize = 8192;
/// Anonymous slow-client budget, in timer quanta (spec §4.5.1).
pub const ANONYMOUS_QUANTA: u32 = 15;
/// Authenticated slow-client budget, in timer quanta (spec §4.5.1).
pub const AUTHENTICATED_QUANTA: u32 = 60;

#[derive(Debug, Clone)]
pub struct Config {
    pub server_name: String,
    pub deadline_quantum: Duration,
    pub idle_session_timeout: Duration,
    /// Authenticated-request body cap; configurable since there's no
    /// build-packaging layer here to fix it at compile time
    /// (SPEC_FULL.md §10.6).
    pub authenticated_body_limit: usize,
    pub mtls_enabled: bool,
}

impl Config {
    pub fn from_cli(cli: &Cli) -> Self {
        Self {
            server_name: cli.server_name.clone(),
            deadline_quantum: Duration::from_secs(cli.deadline_quantum_secs.max(1)),
            idle_session_timeout: Duration::from_secs(cli.idle_session_timeout_mins * 60),
            authenticated_body_limit: 64 * 1024 * 1024,
            mtls_enabled: cli.mtls_trust_store.is_some(),
        }
    }
}

#[cfg(test)]
impl Default for Config {
    fn default() -> Self {
        Self {
            server_name: "redfish_core".to_string(),
            deadline_quantum: Duration::from_secs(1),
            idle_session_timeout: Duration::from_secs(3600),
            authenticated_body_limit: 64 * 1024 * 1024,
            mtls_enabled: false,
        }
    }
}
