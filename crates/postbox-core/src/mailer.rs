//! Send channels for rendered mail.

use std::future::Future;

use postbox_smtp::{Address, Authenticated, Client, connect, connect_tls};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::composer::OutgoingMail;
use crate::config::{Security, ServerConfig};
use crate::error::{Error, Result};

/// Name announced in EHLO.
const CLIENT_HOSTNAME: &str = "localhost";

/// Delivers rendered mail.
pub trait SendChannel: Send + Sync {
    /// Sends `mail` and returns its message id.
    fn send(&self, mail: &OutgoingMail) -> impl Future<Output = Result<String>> + Send;
}

/// Sends through an SMTP submission server with PLAIN authentication.
#[derive(Debug, Clone)]
pub struct SmtpChannel {
    config: ServerConfig,
}

impl SmtpChannel {
    /// Creates a channel for `config`.
    #[must_use]
    pub const fn new(config: ServerConfig) -> Self {
        Self { config }
    }
}

fn address(addr: &str) -> Result<Address> {
    Address::new(addr).map_err(|e| Error::Validation(format!("invalid address '{addr}': {e}")))
}

impl SendChannel for SmtpChannel {
    async fn send(&self, mail: &OutgoingMail) -> Result<String> {
        let config = &self.config;
        let from = address(&mail.from)?;
        let recipients = mail
            .recipients
            .iter()
            .map(|addr| address(addr))
            .collect::<Result<Vec<_>>>()?;

        let connection = |e: postbox_smtp::Error| Error::Connection(e.to_string());
        let client = match config.security {
            Security::Tls => {
                let stream = connect_tls(&config.host, config.port).await.map_err(connection)?;
                Client::from_stream(stream)
                    .await
                    .map_err(connection)?
                    .ehlo(CLIENT_HOSTNAME)
                    .await
                    .map_err(connection)?
            }
            Security::StartTls => {
                let stream = connect(&config.host, config.port).await.map_err(connection)?;
                Client::from_stream(stream)
                    .await
                    .map_err(connection)?
                    .ehlo(CLIENT_HOSTNAME)
                    .await
                    .map_err(connection)?
                    .starttls(&config.host, CLIENT_HOSTNAME)
                    .await
                    .map_err(connection)?
            }
        };

        let client = client
            .auth_plain(&config.username, &config.password)
            .await
            .map_err(connection)?;
        submit(client, from, recipients, mail).await
    }
}

/// Runs one mail transaction on an authenticated client and quits.
async fn submit<S>(
    client: Client<S, Authenticated>,
    from: Address,
    recipients: Vec<Address>,
    mail: &OutgoingMail,
) -> Result<String>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (client, reply) = client.send_mail(from, recipients, &mail.raw).await?;
    tracing::info!(
        message_id = %mail.message_id,
        recipients = mail.recipients.len(),
        reply = %reply.message_text(),
        "message accepted"
    );
    if let Err(e) = client.quit().await {
        tracing::debug!(error = %e, "QUIT failed after send");
    }
    Ok(mail.message_id.clone())
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
    use tokio_test::io::{Builder, Mock};

    use super::*;

    fn mail() -> OutgoingMail {
        OutgoingMail {
            from: "me@example.com".to_string(),
            recipients: vec!["you@example.org".to_string()],
            message_id: "<1.2@example.com>".to_string(),
            raw: b"Subject: hi\r\n\r\nbody\r\n".to_vec(),
        }
    }

    fn handshake() -> Builder {
        let mut builder = Builder::new();
        builder
            .read(b"220 mx.example.com ESMTP\r\n")
            .write(b"EHLO localhost\r\n")
            .read(b"250-mx.example.com\r\n250 AUTH PLAIN\r\n")
            .write(b"AUTH PLAIN AHUAcA==\r\n")
            .read(b"235 ok\r\n");
        builder
    }

    async fn authenticated(mock: Mock) -> Client<Mock, Authenticated> {
        Client::from_stream(mock)
            .await
            .unwrap()
            .ehlo(CLIENT_HOSTNAME)
            .await
            .unwrap()
            .auth_plain("u", "p")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_submit_returns_message_id() {
        let mock = handshake()
            .write(b"MAIL FROM:<me@example.com>\r\n")
            .read(b"250 ok\r\n")
            .write(b"RCPT TO:<you@example.org>\r\n")
            .read(b"250 ok\r\n")
            .write(b"DATA\r\n")
            .read(b"354 go ahead\r\n")
            .write(b"Subject: hi\r\n\r\nbody\r\n.\r\n")
            .read(b"250 queued as 42\r\n")
            .write(b"QUIT\r\n")
            .read(b"221 bye\r\n")
            .build();
        let client = authenticated(mock).await;
        let mail = mail();
        let id = submit(
            client,
            address(&mail.from).unwrap(),
            vec![address("you@example.org").unwrap()],
            &mail,
        )
        .await
        .unwrap();
        assert_eq!(id, "<1.2@example.com>");
    }

    #[tokio::test]
    async fn test_rejected_recipient_is_send_error() {
        let mock = handshake()
            .write(b"MAIL FROM:<me@example.com>\r\n")
            .read(b"250 ok\r\n")
            .write(b"RCPT TO:<you@example.org>\r\n")
            .read(b"550 no such user\r\n")
            .build();
        let client = authenticated(mock).await;
        let mail = mail();
        let err = submit(
            client,
            address(&mail.from).unwrap(),
            vec![address("you@example.org").unwrap()],
            &mail,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Send(_)));
    }

    #[test]
    fn test_invalid_address() {
        assert!(matches!(address("not an address"), Err(Error::Validation(_))));
    }
}
