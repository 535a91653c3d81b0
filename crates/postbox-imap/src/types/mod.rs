//! Core IMAP types.

mod identifiers;
mod mailbox;
mod sequence;
mod status;

pub use identifiers::{SeqNum, Tag, Uid};
pub use mailbox::{ListResponse, Mailbox, MailboxAttribute, MailboxStatus};
pub use sequence::SequenceSet;
pub use status::{ResponseCode, Status};
