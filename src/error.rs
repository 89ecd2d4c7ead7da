//! Error kinds for the connection engine (spec §7).
//!
//! `TransportFault`/`DeadlineExceeded` are recovered locally by the
//! Connection and never reach a client. `ProtocolFault` and
//! `RegistrationFault` do cross an API boundary (startup, or the 400
//! response path) and so carry enough detail to report.

use thiserror::Error;

/// Faults raised while reading/writing the socket or performing the TLS
/// handshake. Always fatal to the Connection; never surfaced as a response.
#[derive(Debug, Error)]
pub enum TransportFault {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("tls handshake failed: {0}")]
    Tls(#[from] rustls::Error),
}

/// Faults in the HTTP wire format itself.
#[derive(Debug, Error)]
pub enum ProtocolFault {
    #[error("malformed request: {0}")]
    Malformed(String),
    #[error("missing Host header on HTTP/1.1 request")]
    MissingHost,
    #[error("request body exceeds the pre-authentication limit")]
    OversizePreAuthBody,
    #[error("header section exceeds the configured limit")]
    OversizeHeaders,
}

/// Raised only at startup, by route/rule registration. Fatal to the process.
#[derive(Debug, Error)]
pub enum RegistrationFault {
    #[error("a rule is already registered for pattern {0:?}")]
    DuplicateRoute(String),
    #[error("handler signature does not match the typed holes of pattern {0:?}")]
    SignatureMismatch(String),
    #[error("pattern {0:?} is not well-formed")]
    MalformedPattern(String),
}

/// Raised by the Session Store.
#[derive(Debug, Error)]
pub enum SessionFault {
    #[error("user directory unreachable")]
    Io,
}
