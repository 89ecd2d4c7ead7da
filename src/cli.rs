use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

/// Command-line configuration, extended from the teacher's `Cli` (bind
/// address, TLS cert/key, shutdown timeout) with the fields the connection
/// engine needs: worker concurrency, the deadline quantum, idle-session
/// timeout, and an optional mTLS trust store.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// HTTP/HTTPS server bind address (e.g., 0.0.0.0:443)
    #[arg(long, value_name = "ADDRESS")]
    pub bind: SocketAddr,

    /// Path to the TLS certificate chain (PEM). Required to accept TLS.
    #[arg(long, value_name = "PATH", requires = "tls_key")]
    pub tls_cert: Option<PathBuf>,

    /// Path to the TLS private key (PEM).
    #[arg(long, value_name = "PATH", requires = "tls_cert")]
    pub tls_key: Option<PathBuf>,

    /// PEM bundle of CA certificates trusted for mutual-TLS client auth.
    /// Presence of this flag is what turns mTLS on (spec §4.5.2).
    #[arg(long, value_name = "PATH")]
    pub mtls_trust_store: Option<PathBuf>,

    /// Number of worker event loops (C9). Defaults to available parallelism.
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,

    /// Timer quantum in seconds (spec §4.1: >= 1, a few seconds at most).
    #[arg(long, default_value = "1")]
    pub deadline_quantum_secs: u64,

    /// Idle session timeout in minutes (spec §4.3 default: 60).
    #[arg(long, default_value = "60")]
    pub idle_session_timeout_mins: u64,

    /// Value sent in the `Server:` response header.
    #[arg(long, default_value = "redfish_core")]
    pub server_name: String,

    /// Graceful shutdown timeout in seconds.
    #[arg(long, value_name = "SECONDS", default_value = "30")]
    pub shutdown_timeout_secs: u64,
}

impl Cli {
    pub fn tls_config(&self) -> Option<(PathBuf, PathBuf)> {
        match (&self.tls_cert, &self.tls_key) {
            (Some(cert), Some(key)) => Some((cert.clone(), key.clone())),
            _ => None,
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(|| std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1))
    }

    /// Loads `mtls_trust_store`, if configured. Errors are fatal at
    /// startup, matching `RegistrationFault`'s sibling startup-only faults.
    pub fn load_mtls_trust_store(&self) -> Result<Option<Vec<rustls::pki_types::CertificateDer<'static>>>> {
        let Some(path) = &self.mtls_trust_store else {
            return Ok(None);
        };
        let bytes = std::fs::read(path)
            .with_context(|| format!("reading mTLS trust store {path:?}"))?;
        let certs: Result<Vec<_>, _> = rustls_pemfile::certs(&mut bytes.as_slice()).collect();
        let certs = certs.with_context(|| format!("parsing mTLS trust store {path:?}"))?;
        Ok(Some(certs))
    }
}
