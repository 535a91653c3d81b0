//! Runtime configuration read from the environment.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Security/encryption mode for connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Security {
    /// Implicit TLS (connect directly with TLS).
    #[default]
    Tls,
    /// STARTTLS upgrade after plaintext connect.
    StartTls,
}

impl Security {
    /// Implicit TLS on the well-known TLS ports, STARTTLS elsewhere.
    #[must_use]
    pub const fn for_smtp_port(port: u16) -> Self {
        match port {
            465 => Self::Tls,
            _ => Self::StartTls,
        }
    }
}

/// Host, port and credentials for one server.
#[derive(Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Server hostname.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Security mode.
    pub security: Security,
    /// Username for authentication.
    pub username: String,
    /// Password for authentication.
    pub password: String,
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("security", &self.security)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Everything the service needs at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Mailbox (IMAP) server.
    pub imap: ServerConfig,
    /// Send channel (SMTP) server.
    pub smtp: ServerConfig,
    /// Base URL for CDN-hosted attachments.
    pub img_cdn: Option<String>,
    /// Root for per-request staging directories and pre-staged files.
    pub staging_dir: PathBuf,
    /// Deadline for each mailbox command.
    pub command_timeout: Duration,
    /// HTTP listen address.
    pub bind_addr: SocketAddr,
    /// Origin allowed by CORS.
    pub cors_origin: String,
}

impl Config {
    /// Reads configuration from process environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when a required variable is missing or a
    /// value does not parse.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads configuration through `lookup`, which maps a variable name to its value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when a required variable is missing or a
    /// value does not parse.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let required = |key: &str| {
            var(key).ok_or_else(|| Error::Config(format!("{key} must be set")))
        };

        let username = required("EMAIL_USER")?;
        let password = required("EMAIL_PWD")?;

        let imap_port = parse_var(&var, "IMAP_PORT", 993)?;
        let smtp_port = parse_var(&var, "SMTP_PORT", 465)?;
        let timeout_secs: u64 = parse_var(&var, "COMMAND_TIMEOUT_SECS", 60)?;
        if timeout_secs == 0 {
            return Err(Error::Config("COMMAND_TIMEOUT_SECS must be positive".into()));
        }

        let bind_addr = var("BIND_ADDR")
            .unwrap_or_else(|| "0.0.0.0:3000".to_string())
            .parse()
            .map_err(|e| Error::Config(format!("BIND_ADDR: {e}")))?;

        Ok(Self {
            imap: ServerConfig {
                host: var("IMAP_HOST").unwrap_or_else(|| "imap.gmail.com".to_string()),
                port: imap_port,
                security: Security::Tls,
                username: username.clone(),
                password: password.clone(),
            },
            smtp: ServerConfig {
                host: var("SMTP_HOST").unwrap_or_else(|| "smtp.gmail.com".to_string()),
                port: smtp_port,
                security: Security::for_smtp_port(smtp_port),
                username,
                password,
            },
            img_cdn: var("IMG_CDN").map(|url| url.trim_end_matches('/').to_string()),
            staging_dir: var("STAGING_DIR").map_or_else(|| PathBuf::from("target"), PathBuf::from),
            command_timeout: Duration::from_secs(timeout_secs),
            bind_addr,
            cors_origin: var("CORS_ORIGIN")
                .unwrap_or_else(|| "http://localhost:3000".to_string()),
        })
    }
}

fn parse_var<T, F>(var: &F, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    var(key).map_or(Ok(default), |value| {
        value
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("{key}: {e}")))
    })
}

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
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config =
            Config::from_lookup(lookup(&[("EMAIL_USER", "me@example.com"), ("EMAIL_PWD", "pw")]))
                .unwrap();
        assert_eq!(config.imap.host, "imap.gmail.com");
        assert_eq!(config.imap.port, 993);
        assert_eq!(config.smtp.port, 465);
        assert_eq!(config.smtp.security, Security::Tls);
        assert_eq!(config.staging_dir, PathBuf::from("target"));
        assert_eq!(config.command_timeout, Duration::from_secs(60));
        assert_eq!(config.bind_addr.port(), 3000);
        assert!(config.img_cdn.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("EMAIL_USER", "me@example.com"),
            ("EMAIL_PWD", "pw"),
            ("SMTP_HOST", "mail.example.com"),
            ("SMTP_PORT", "587"),
            ("IMG_CDN", "https://cdn.example.com/img/"),
            ("COMMAND_TIMEOUT_SECS", "5"),
        ]))
        .unwrap();
        assert_eq!(config.smtp.host, "mail.example.com");
        assert_eq!(config.smtp.security, Security::StartTls);
        assert_eq!(config.img_cdn.as_deref(), Some("https://cdn.example.com/img"));
        assert_eq!(config.command_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_missing_credentials() {
        let err = Config::from_lookup(lookup(&[("EMAIL_USER", "me@example.com")])).unwrap_err();
        assert!(matches!(err, Error::Config(ref msg) if msg.contains("EMAIL_PWD")));
    }

    #[test]
    fn test_bad_port() {
        let err = Config::from_lookup(lookup(&[
            ("EMAIL_USER", "me"),
            ("EMAIL_PWD", "pw"),
            ("IMAP_PORT", "imap"),
        ]))
        .unwrap_err();
        assert!(matches!(err, Error::Config(ref msg) if msg.starts_with("IMAP_PORT")));
    }

    #[test]
    fn test_password_redacted() {
        let config =
            Config::from_lookup(lookup(&[("EMAIL_USER", "me"), ("EMAIL_PWD", "hunter2")])).unwrap();
        assert!(!format!("{config:?}").contains("hunter2"));
    }
}
