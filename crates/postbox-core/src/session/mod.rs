//! Mailbox session abstraction.
//!
//! A [`MailSession`] is one live, exclusively owned connection to a mail
//! store. Sessions are produced by a [`SessionConnector`] and driven by the
//! [`SessionManager`], which owns the lifecycle:
//!
//! ```text
//! Disconnected ──→ Connecting ──→ Ready ⇄ Busy(command)
//!       ↑                           │
//!       └──────── Closing ←─────────┘
//! ```
//!
//! Fetches report their progress as [`FetchEvent`]s over a channel, so the
//! consumer can assemble messages while the session is still reading.

mod imap;
mod manager;

use std::future::Future;

use bytes::Bytes;
use postbox_imap::BodyStructure;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::folders::FolderEntry;
use crate::search::SearchTerm;

pub use imap::{ImapConnector, ImapSession};
pub use manager::{
    CommandKind, DownloadTarget, FetchMessages, FetchOutcome, ListFolders, MailConfig,
    SessionCommand, SessionLifecycle, SessionManager, SessionState,
};

/// Named block of a message delivered by a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    /// The header block.
    Header,
    /// The full text after the header block.
    Text,
}

/// What a fetch retrieves for each message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchQuery {
    /// Also deliver the [`Section::Text`] block.
    pub include_body: bool,
}

/// Progress of a streamed fetch, keyed by 1-based sequence number.
///
/// For one message the order is `Started`, then any interleaving of
/// `Chunk`/`SectionEnd` per section and `Attributes`, then `Finished`.
/// Events of different messages may interleave freely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchEvent {
    /// A message began arriving.
    Started {
        /// Sequence number.
        seq: u32,
    },
    /// Bytes of one section.
    Chunk {
        /// Sequence number.
        seq: u32,
        /// Section the bytes belong to.
        section: Section,
        /// Raw bytes.
        bytes: Bytes,
    },
    /// A section has been delivered completely.
    SectionEnd {
        /// Sequence number.
        seq: u32,
        /// Completed section.
        section: Section,
    },
    /// Unique id and structure of the message.
    Attributes {
        /// Sequence number.
        seq: u32,
        /// Unique id, stable across sessions.
        uid: u32,
        /// MIME structure.
        structure: BodyStructure,
    },
    /// Every event of the message has been sent.
    Finished {
        /// Sequence number.
        seq: u32,
    },
}

impl FetchEvent {
    /// Sequence number the event refers to.
    #[must_use]
    pub const fn seq(&self) -> u32 {
        match self {
            Self::Started { seq }
            | Self::Chunk { seq, .. }
            | Self::SectionEnd { seq, .. }
            | Self::Attributes { seq, .. }
            | Self::Finished { seq } => *seq,
        }
    }
}

/// State of an opened folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FolderStatus {
    /// Number of messages in the folder.
    pub total: u32,
}

/// One live connection to a mail store.
pub trait MailSession: Send {
    /// Lists every folder.
    fn list_folders(&mut self) -> impl Future<Output = Result<Vec<FolderEntry>>> + Send;

    /// Opens a folder for the following commands.
    fn open_folder(
        &mut self,
        name: &str,
        read_only: bool,
    ) -> impl Future<Output = Result<FolderStatus>> + Send;

    /// Returns the sequence numbers matching every term.
    fn search(&mut self, terms: &[SearchTerm]) -> impl Future<Output = Result<Vec<u32>>> + Send;

    /// Fetches `seqs`, reporting progress on `events`.
    ///
    /// Returns once the server has completed the fetch; `events` is dropped
    /// then, which ends the consumer's stream.
    fn fetch(
        &mut self,
        seqs: &[u32],
        query: FetchQuery,
        events: mpsc::Sender<FetchEvent>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Streams the raw bytes of one body part into `sink`, returning the count.
    fn fetch_part(
        &mut self,
        uid: u32,
        part_id: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> impl Future<Output = Result<u64>> + Send;

    /// Ends the session.
    fn close(self) -> impl Future<Output = Result<()>> + Send;
}

/// Opens new sessions.
pub trait SessionConnector: Send + Sync {
    /// Session type produced.
    type Session: MailSession;

    /// Connects and authenticates.
    fn connect(&self) -> impl Future<Output = Result<Self::Session>> + Send;
}
