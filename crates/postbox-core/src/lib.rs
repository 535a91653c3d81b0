//! # postbox-core
//!
//! Session engine behind the `postbox` mailbox API.
//!
//! This crate provides:
//! - Search criteria and their translation into IMAP search terms
//! - A session manager with an explicit connection lifecycle and timeouts
//! - Streamed assembly of fetched messages into JSON-ready records
//! - Attachment decoding into per-request staging directories
//! - Outbound composition, CDN downloads and SMTP submission
//! - Folder hierarchy flattening

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod attachment;
pub mod composer;
pub mod config;
mod error;
pub mod folders;
pub mod mailer;
pub mod message;
pub mod parser;
pub mod search;
pub mod service;
pub mod session;
pub mod staging;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use attachment::{StagedAttachment, stream_attachment};
pub use composer::{OutgoingMail, SendRequest};
pub use config::{Config, Security, ServerConfig};
pub use error::{Error, Result};
pub use folders::{FolderEntry, MAX_FOLDER_DEPTH};
pub use mailer::{SendChannel, SmtpChannel};
pub use message::{EmailAttachment, EmailMessage};
pub use search::{DateOperator, DatePredicate, MessageType, SearchCriteria, SearchTerm};
pub use service::{AttachmentDownload, EmailList, EmailQuery, FolderList, MailService};
pub use session::{
    ImapConnector, MailConfig, MailSession, SessionConnector, SessionManager, SessionState,
};
pub use staging::{StagingArea, StagingDir};
