//! # postbox-smtp
//!
//! Async SMTP submission client (RFC 5321) used to deliver composed
//! messages.
//!
//! ```ignore
//! use postbox_smtp::{Address, Client, connect_tls};
//!
//! let stream = connect_tls("smtp.example.com", 465).await?;
//! let client = Client::from_stream(stream).await?.ehlo("postbox.local").await?;
//! let client = client.auth_plain("user@example.com", "secret").await?;
//! let (client, _reply) = client
//!     .send_mail(
//!         Address::new("user@example.com")?,
//!         vec![Address::new("friend@example.com")?],
//!         b"Subject: hi\r\n\r\nHello\r\n",
//!     )
//!     .await?;
//! client.quit().await?;
//! ```
//!
//! ## Connection States
//!
//! ```text
//! Connected ── auth_plain() ──→ Authenticated ── mail_from() ──→ MailTransaction
//!                                     ↑                               │
//!                                     │                          rcpt_to()
//!                             send_message()                          ↓
//!                                     └──── Data ←── data() ──── RecipientAdded
//! ```
//!
//! The client is generic over its stream so any `AsyncRead + AsyncWrite`
//! transport works, including in-memory mocks.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod command;
pub mod connection;
mod error;
pub mod parser;
pub mod types;

pub use connection::{
    Authenticated, Client, Connected, Data, MailTransaction, RecipientAdded, ServerInfo,
    SmtpStream, connect, connect_tls,
};
pub use error::{Error, Result};
pub use types::{Address, AuthMechanism, Extension, Reply, ReplyCode};
