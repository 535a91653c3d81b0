//! Error types for the core library.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur in core operations.
///
/// Missing header fields are not errors: the message parser substitutes
/// placeholder values and logs a warning instead.
#[derive(Debug, Error)]
pub enum Error {
    /// The mailbox session could not be established.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// A session command (open folder, search, fetch) failed.
    #[error("Command failed: {0}")]
    Command(String),

    /// Required request parameters are missing or malformed.
    #[error("{0}")]
    Validation(String),

    /// The requested message or attachment does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Staging directory or file I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The send channel rejected or failed to deliver a message.
    #[error("Send failed: {0}")]
    Send(String),

    /// A CDN download failed.
    #[error("Download failed: {0}")]
    Fetch(String),

    /// A session command exceeded its deadline.
    #[error("Command timed out after {0:?}")]
    Timeout(Duration),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The folder hierarchy nests deeper than the resolver allows.
    #[error("Folder hierarchy exceeds {0} levels")]
    FolderDepth(usize),
}

impl Error {
    /// HTTP status code that best describes this error.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::NotFound(_) => 404,
            Self::Timeout(_) => 504,
            Self::Connection(_) | Self::Fetch(_) => 502,
            Self::Command(_)
            | Self::Io(_)
            | Self::Send(_)
            | Self::Config(_)
            | Self::FolderDepth(_) => 500,
        }
    }

    /// True for errors caused by the request rather than the server.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::NotFound(_))
    }
}

impl From<postbox_smtp::Error> for Error {
    fn from(err: postbox_smtp::Error) -> Self {
        Self::Send(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::Fetch(err.to_string())
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::Validation("x".into()).status_code(), 400);
        assert_eq!(Error::NotFound("x".into()).status_code(), 404);
        assert_eq!(Error::Timeout(Duration::from_secs(1)).status_code(), 504);
        assert_eq!(Error::Connection("x".into()).status_code(), 502);
        assert_eq!(Error::Fetch("x".into()).status_code(), 502);
        assert_eq!(Error::Command("x".into()).status_code(), 500);
        assert_eq!(Error::FolderDepth(64).status_code(), 500);
    }

    #[test]
    fn test_client_errors() {
        assert!(Error::Validation("x".into()).is_client_error());
        assert!(!Error::Send("x".into()).is_client_error());
    }

    #[test]
    fn test_smtp_error_maps_to_send() {
        let err: Error = postbox_smtp::Error::smtp(550, "no such user").into();
        assert!(matches!(err, Error::Send(ref msg) if msg.contains("550")));
    }
}
