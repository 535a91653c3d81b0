//! # postbox-imap
//!
//! Async IMAP client covering what a mailbox gateway needs: login, folder
//! listing, SELECT/EXAMINE, SEARCH, and FETCH with message bodies streamed
//! one response at a time.
//!
//! ## Quick Start
//!
//! ```ignore
//! use postbox_imap::{Client, FetchAttribute, SearchKey, SequenceSet};
//!
//! #[tokio::main]
//! async fn main() -> postbox_imap::Result<()> {
//!     let stream = postbox_imap::connect_tls("imap.example.com", 993).await?;
//!     let client = Client::from_stream(stream).await?;
//!     let mut client = client.login("user@example.com", "password").await?;
//!
//!     for folder in client.list("", "*").await? {
//!         println!("{}", folder.mailbox);
//!     }
//!
//!     let (mut client, status) = client.examine("INBOX").await?;
//!     println!("{} messages", status.exists);
//!
//!     let ids = client.search(&[SearchKey::Unseen]).await?;
//!     let mut stream = client
//!         .fetch_stream(&SequenceSet::from_numbers(&ids), vec![FetchAttribute::Uid])
//!         .await?;
//!     while let Some((seq, items)) = stream.next().await? {
//!         println!("{}: {items:?}", seq.get());
//!     }
//!
//!     client.logout().await
//! }
//! ```
//!
//! ## Connection States
//!
//! ```text
//! ┌─────────────────────┐
//! │   NotAuthenticated  │ ─── login() ───→ Authenticated
//! └─────────────────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │    Authenticated    │ ─── select()/examine() ───→ Selected
//! └─────────────────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │      Selected       │ ─── logout() ───→ (closed)
//! └─────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`command`]: command builders and search keys
//! - [`connection`]: streams, framing and the type-state client
//! - [`parser`]: sans-I/O response parser
//! - [`types`]: identifiers, mailboxes, sequence sets

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod command;
pub mod connection;
mod error;
pub mod parser;
pub mod types;

pub use command::{Command, FetchAttribute, SearchKey, TagGenerator};
pub use connection::{
    Authenticated, Client, FetchStream, FramedStream, ImapStream, NotAuthenticated,
    ResponseAccumulator, Selected, connect_tls,
};
pub use error::{Error, Result};
pub use parser::{
    BodyStructure, Disposition, FetchItem, Response, ResponseParser, SinglePart, UntaggedResponse,
};
pub use types::{
    ListResponse, Mailbox, MailboxAttribute, MailboxStatus, ResponseCode, SeqNum, SequenceSet,
    Status, Tag, Uid,
};
