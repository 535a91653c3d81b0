//! Type-state SMTP client.

use super::{ServerInfo, SmtpStream};
use crate::command::Command;
use crate::error::{Error, Result};
use crate::parser::{is_last_reply_line, parse_reply};
use crate::types::{Address, AuthMechanism, Extension, Reply, ReplyCode};
use base64::Engine;
use std::marker::PhantomData;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};

/// Longest reply line accepted, CRLF included.
const MAX_REPLY_LINE: usize = 4096;

/// Type-state marker for connected state.
#[derive(Debug)]
pub struct Connected;

/// Type-state marker for authenticated state.
#[derive(Debug)]
pub struct Authenticated;

/// Type-state marker for mail transaction started.
#[derive(Debug)]
pub struct MailTransaction;

/// Type-state marker for recipient added.
#[derive(Debug)]
pub struct RecipientAdded;

/// Type-state marker for data mode.
#[derive(Debug)]
pub struct Data;

/// SMTP client with type-state pattern.
#[derive(Debug)]
pub struct Client<S, State> {
    stream: BufReader<S>,
    server_info: ServerInfo,
    _state: PhantomData<State>,
}

impl<S, State> Client<S, State>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Server information gathered so far.
    #[must_use]
    pub const fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    fn transition<Next>(self) -> Client<S, Next> {
        Client {
            stream: self.stream,
            server_info: self.server_info,
            _state: PhantomData,
        }
    }

    async fn send_command(&mut self, cmd: &Command) -> Result<Reply> {
        if cmd.is_sensitive() {
            tracing::debug!("sending AUTH");
        } else {
            tracing::debug!(?cmd, "sending SMTP command");
        }
        let writer = self.stream.get_mut();
        writer.write_all(&cmd.serialize()).await?;
        writer.flush().await?;
        self.read_reply().await
    }

    async fn read_reply(&mut self) -> Result<Reply> {
        let mut lines = Vec::new();
        loop {
            let mut raw = Vec::new();
            let n = (&mut self.stream)
                .take(MAX_REPLY_LINE as u64)
                .read_until(b'\n', &mut raw)
                .await?;
            if n == 0 {
                return Err(Error::Io(std::io::ErrorKind::UnexpectedEof.into()));
            }
            if !raw.ends_with(b"\n") {
                return Err(Error::Protocol("reply line too long".into()));
            }

            let line = String::from_utf8_lossy(&raw).trim_end().to_string();
            if line.is_empty() {
                continue;
            }
            let is_last = is_last_reply_line(&line);
            lines.push(line);
            if is_last {
                break;
            }
        }

        parse_reply(&lines)
    }

    /// Sends QUIT and closes the connection (available in any state).
    ///
    /// # Errors
    ///
    /// Returns an error if the QUIT command fails.
    pub async fn quit(mut self) -> Result<()> {
        // 221 is the usual answer; any 2xx is accepted.
        self.send_command(&Command::Quit).await?.expect_success()?;
        Ok(())
    }
}

impl<S> Client<S, Connected>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a client from a stream and reads the server greeting.
    ///
    /// # Errors
    ///
    /// Returns an error if reading the greeting fails or if the server returns an error.
    pub async fn from_stream(stream: S) -> Result<Self> {
        let mut client = Self {
            stream: BufReader::new(stream),
            server_info: ServerInfo::default(),
            _state: PhantomData,
        };

        let greeting = client.read_reply().await?.expect_code(ReplyCode::SERVICE_READY)?;
        client.server_info.hostname = greeting
            .message
            .first()
            .and_then(|msg| msg.split_whitespace().next())
            .unwrap_or("unknown")
            .to_string();

        Ok(client)
    }

    /// Sends EHLO and records the advertised extensions.
    ///
    /// # Errors
    ///
    /// Returns an error if the EHLO command fails.
    pub async fn ehlo(mut self, client_hostname: &str) -> Result<Self> {
        let cmd = Command::Ehlo {
            hostname: client_hostname.to_string(),
        };
        let reply = self.send_command(&cmd).await?.expect_success()?;

        // First line is the server's greeting.
        self.server_info.extensions = reply
            .message
            .iter()
            .skip(1)
            .map(|line| Extension::parse(line))
            .collect();
        Ok(self)
    }

    /// Authenticates using the PLAIN mechanism.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AuthNotSupported`] if PLAIN is not advertised, or an
    /// SMTP error if the credentials are rejected.
    pub async fn auth_plain(
        mut self,
        username: &str,
        password: &str,
    ) -> Result<Client<S, Authenticated>> {
        if !self.server_info.auth_mechanisms().contains(&AuthMechanism::Plain) {
            return Err(Error::AuthNotSupported("PLAIN"));
        }

        let credentials = format!("\0{username}\0{password}");
        let encoded = base64::engine::general_purpose::STANDARD.encode(credentials.as_bytes());
        let cmd = Command::Auth {
            mechanism: AuthMechanism::Plain,
            initial_response: Some(encoded),
        };

        self.send_command(&cmd).await?.expect_code(ReplyCode::AUTH_SUCCESS)?;
        tracing::debug!(server = %self.server_info.hostname, "SMTP authenticated");
        Ok(self.transition())
    }
}

impl Client<SmtpStream, Connected> {
    /// Upgrades the connection to TLS using STARTTLS and repeats EHLO.
    ///
    /// # Errors
    ///
    /// Returns an error if STARTTLS is not supported or if the upgrade fails.
    pub async fn starttls(mut self, hostname: &str, client_hostname: &str) -> Result<Self> {
        if !self.server_info.supports_starttls() {
            return Err(Error::Protocol("server does not offer STARTTLS".into()));
        }
        self.send_command(&Command::StartTls)
            .await?
            .expect_code(ReplyCode::SERVICE_READY)?;

        let stream = self.stream.into_inner().upgrade_to_tls(hostname).await?;
        let client = Self {
            stream: BufReader::new(stream),
            server_info: ServerInfo {
                hostname: self.server_info.hostname,
                extensions: Vec::new(),
            },
            _state: PhantomData,
        };
        client.ehlo(client_hostname).await
    }
}

impl<S> Client<S, Authenticated>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Starts a mail transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the MAIL FROM command fails.
    pub async fn mail_from(mut self, from: Address) -> Result<Client<S, MailTransaction>> {
        let cmd = Command::MailFrom { from, size: None };
        self.send_command(&cmd).await?.expect_success()?;
        Ok(self.transition())
    }

    /// Sends one message to `recipients` and returns to the authenticated state.
    ///
    /// Returns the server's final reply, which usually carries its queue id.
    ///
    /// # Errors
    ///
    /// Returns an error if there are no recipients or any step is rejected.
    pub async fn send_mail(
        self,
        from: Address,
        recipients: Vec<Address>,
        message: &[u8],
    ) -> Result<(Self, Reply)> {
        let mut recipients = recipients.into_iter();
        let first = recipients
            .next()
            .ok_or_else(|| Error::InvalidAddress("no recipients".into()))?;

        let mut client = self.mail_from(from).await?.rcpt_to(first).await?;
        for to in recipients {
            client = client.rcpt_to(to).await?;
        }
        client.data().await?.send_message(message).await
    }
}

impl<S> Client<S, MailTransaction>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Adds a recipient to the transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the RCPT TO command fails.
    pub async fn rcpt_to(mut self, to: Address) -> Result<Client<S, RecipientAdded>> {
        self.send_command(&Command::RcptTo { to })
            .await?
            .expect_success()?;
        Ok(self.transition())
    }

    /// Abandons the transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the RSET command fails.
    pub async fn reset(mut self) -> Result<Client<S, Authenticated>> {
        self.send_command(&Command::Rset).await?.expect_success()?;
        Ok(self.transition())
    }
}

impl<S> Client<S, RecipientAdded>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Adds another recipient to the transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the RCPT TO command fails.
    pub async fn rcpt_to(mut self, to: Address) -> Result<Self> {
        self.send_command(&Command::RcptTo { to })
            .await?
            .expect_success()?;
        Ok(self)
    }

    /// Begins sending message data.
    ///
    /// # Errors
    ///
    /// Returns an error if the DATA command fails.
    pub async fn data(mut self) -> Result<Client<S, Data>> {
        self.send_command(&Command::Data)
            .await?
            .expect_code(ReplyCode::START_DATA)?;
        Ok(self.transition())
    }
}

impl<S> Client<S, Data>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Sends the message content and completes the transaction.
    ///
    /// Line endings are normalized to CRLF, lines starting with `.` are
    /// dot-stuffed and the terminating `.` line is added.
    ///
    /// # Errors
    ///
    /// Returns an error if sending the message fails or server rejects it.
    pub async fn send_message(mut self, message: &[u8]) -> Result<(Client<S, Authenticated>, Reply)> {
        let payload = dot_stuff(message);
        let writer = self.stream.get_mut();
        writer.write_all(&payload).await?;
        writer.flush().await?;

        let reply = self.read_reply().await?.expect_success()?;
        tracing::debug!(reply = %reply.message_text(), "message accepted");
        Ok((self.transition(), reply))
    }
}

/// Normalizes line ends, escapes leading dots and appends `.\r\n`.
fn dot_stuff(message: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(message.len() + message.len() / 64 + 5);
    let body = message.strip_suffix(b"\n").unwrap_or(message);
    let body = body.strip_suffix(b"\r").unwrap_or(body);

    if !body.is_empty() {
        for line in body.split(|&b| b == b'\n') {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            if line.first() == Some(&b'.') {
                out.push(b'.');
            }
            out.extend_from_slice(line);
            out.extend_from_slice(b"\r\n");
        }
    }
    out.extend_from_slice(b".\r\n");
    out
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
    use tokio_test::io::Builder;

    use super::*;

    fn handshake() -> Builder {
        let mut builder = Builder::new();
        builder
            .read(b"220 smtp.example.com ESMTP ready\r\n")
            .write(b"EHLO client.local\r\n")
            .read(b"250-smtp.example.com greets you\r\n250-SIZE 1000\r\n250-AUTH LOGIN PLAIN\r\n250 8BITMIME\r\n")
            // "\0user\0pass"
            .write(b"AUTH PLAIN AHVzZXIAcGFzcw==\r\n")
            .read(b"235 2.7.0 Accepted\r\n");
        builder
    }

    #[test]
    fn test_dot_stuff() {
        assert_eq!(dot_stuff(b"a\n.b\r\n..c"), b"a\r\n..b\r\n...c\r\n.\r\n");
        assert_eq!(dot_stuff(b"line\r\n"), b"line\r\n.\r\n");
        assert_eq!(dot_stuff(b""), b".\r\n");
    }

    #[tokio::test]
    async fn test_full_transaction() {
        let mock = handshake()
            .write(b"MAIL FROM:<user@example.com>\r\n")
            .read(b"250 OK\r\n")
            .write(b"RCPT TO:<a@example.com>\r\n")
            .read(b"250 OK\r\n")
            .write(b"RCPT TO:<b@example.com>\r\n")
            .read(b"250 OK\r\n")
            .write(b"DATA\r\n")
            .read(b"354 Go ahead\r\n")
            .write(b"Subject: hi\r\n\r\n..dot\r\n.\r\n")
            .read(b"250 2.0.0 OK queued as 42\r\n")
            .write(b"QUIT\r\n")
            .read(b"221 bye\r\n")
            .build();

        let client = Client::from_stream(mock).await.unwrap();
        assert_eq!(client.server_info().hostname, "smtp.example.com");
        let client = client.ehlo("client.local").await.unwrap();
        assert_eq!(client.server_info().max_message_size(), Some(1000));
        let client = client.auth_plain("user", "pass").await.unwrap();

        let (client, reply) = client
            .send_mail(
                Address::new("user@example.com").unwrap(),
                vec![
                    Address::new("a@example.com").unwrap(),
                    Address::new("b@example.com").unwrap(),
                ],
                b"Subject: hi\n\n.dot\n",
            )
            .await
            .unwrap();
        assert_eq!(reply.message_text(), "2.0.0 OK queued as 42");
        client.quit().await.unwrap();
    }

    #[tokio::test]
    async fn test_greeting_rejected() {
        let mock = Builder::new().read(b"554 no service\r\n").build();
        let err = Client::from_stream(mock).await.unwrap_err();
        assert!(err.is_permanent());
    }

    #[tokio::test]
    async fn test_auth_rejected() {
        let mock = handshake_with_auth_reply(b"535 5.7.8 Bad credentials\r\n");
        let client = Client::from_stream(mock).await.unwrap();
        let client = client.ehlo("client.local").await.unwrap();
        let err = client.auth_plain("user", "pass").await.unwrap_err();
        assert!(matches!(err, Error::Smtp { code: 535, .. }));
    }

    fn handshake_with_auth_reply(reply: &[u8]) -> tokio_test::io::Mock {
        Builder::new()
            .read(b"220 smtp.example.com ESMTP\r\n")
            .write(b"EHLO client.local\r\n")
            .read(b"250-smtp.example.com\r\n250 AUTH PLAIN\r\n")
            .write(b"AUTH PLAIN AHVzZXIAcGFzcw==\r\n")
            .read(reply)
            .build()
    }

    #[tokio::test]
    async fn test_auth_not_offered() {
        let mock = Builder::new()
            .read(b"220 smtp.example.com ESMTP\r\n")
            .write(b"EHLO client.local\r\n")
            .read(b"250 smtp.example.com\r\n")
            .build();
        let client = Client::from_stream(mock).await.unwrap();
        let client = client.ehlo("client.local").await.unwrap();
        let err = client.auth_plain("user", "pass").await.unwrap_err();
        assert!(matches!(err, Error::AuthNotSupported("PLAIN")));
    }

    #[tokio::test]
    async fn test_recipient_rejected() {
        let mock = handshake()
            .write(b"MAIL FROM:<user@example.com>\r\n")
            .read(b"250 OK\r\n")
            .write(b"RCPT TO:<nobody@example.com>\r\n")
            .read(b"550 5.1.1 No such user\r\n")
            .build();

        let client = Client::from_stream(mock).await.unwrap();
        let client = client.ehlo("client.local").await.unwrap();
        let client = client.auth_plain("user", "pass").await.unwrap();
        let err = client
            .send_mail(
                Address::new("user@example.com").unwrap(),
                vec![Address::new("nobody@example.com").unwrap()],
                b"x",
            )
            .await
            .unwrap_err();
        assert!(err.is_permanent());
    }
}
