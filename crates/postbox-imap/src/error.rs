//! IMAP client errors.

use thiserror::Error;

/// Failure of an IMAP exchange.
#[derive(Debug, Error)]
pub enum Error {
    /// Socket read or write failed, including the TLS handshake.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS configuration rejected by rustls.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Host is not usable as a TLS server name.
    #[error("Invalid DNS name: {0}")]
    InvalidDnsName(#[from] rustls::pki_types::InvalidDnsNameError),

    /// Server bytes did not match the response grammar.
    #[error("Parse error at byte {position}: {message}")]
    Parse {
        /// Offset into the response line.
        position: usize,
        /// What the parser expected.
        message: String,
    },

    /// Tagged `NO`: the command was understood and refused.
    #[error("NO: {0}")]
    No(String),

    /// Tagged `BAD`: the command was malformed or unknown.
    #[error("BAD: {0}")]
    Bad(String),

    /// Server closed the session with `BYE`.
    #[error("BYE: {0}")]
    Bye(String),

    /// Greeting or response not allowed in the client's state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Response well-formed but not what the command needs.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Result alias for IMAP operations.
pub type Result<T> = std::result::Result<T, Error>;
