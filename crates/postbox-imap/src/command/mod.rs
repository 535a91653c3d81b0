//! IMAP commands and their wire serialization.

mod search;
mod tag_generator;

pub use search::{SearchKey, format_search_date};
pub use tag_generator::TagGenerator;

use crate::types::{Mailbox, SequenceSet};

/// A message data item requested by FETCH.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchAttribute {
    /// `UID`
    Uid,
    /// `BODYSTRUCTURE`
    BodyStructure,
    /// `RFC822.SIZE`
    Rfc822Size,
    /// `BODY.PEEK[section]`; the section is `HEADER`, `TEXT` or a part id.
    BodyPeek(String),
}

/// Commands this client can issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `LOGIN user password`
    Login {
        /// User name.
        username: String,
        /// Password.
        password: String,
    },
    /// `LIST reference pattern`
    List {
        /// Reference name, usually empty.
        reference: String,
        /// Mailbox pattern with wildcards.
        pattern: String,
    },
    /// `SELECT mailbox`
    Select {
        /// Mailbox to open read-write.
        mailbox: Mailbox,
    },
    /// `EXAMINE mailbox`
    Examine {
        /// Mailbox to open read-only.
        mailbox: Mailbox,
    },
    /// `SEARCH keys`
    Search {
        /// Keys, combined with AND.
        keys: Vec<SearchKey>,
    },
    /// `FETCH` or `UID FETCH`
    Fetch {
        /// Messages to fetch.
        sequence: SequenceSet,
        /// Items to return.
        items: Vec<FetchAttribute>,
        /// Interpret `sequence` as UIDs.
        uid: bool,
    },
    /// `LOGOUT`
    Logout,
}

impl Command {
    /// Serializes the command with its tag, CRLF included.
    #[must_use]
    pub fn serialize(&self, tag: &str) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(tag.as_bytes());
        buf.push(b' ');

        match self {
            Self::Login { username, password } => {
                buf.extend_from_slice(b"LOGIN ");
                write_astring(&mut buf, username);
                buf.push(b' ');
                write_astring(&mut buf, password);
            }
            Self::List { reference, pattern } => {
                buf.extend_from_slice(b"LIST ");
                write_quoted(&mut buf, reference);
                buf.push(b' ');
                write_quoted(&mut buf, pattern);
            }
            Self::Select { mailbox } => {
                buf.extend_from_slice(b"SELECT ");
                write_astring(&mut buf, mailbox.as_str());
            }
            Self::Examine { mailbox } => {
                buf.extend_from_slice(b"EXAMINE ");
                write_astring(&mut buf, mailbox.as_str());
            }
            Self::Search { keys } => {
                buf.extend_from_slice(b"SEARCH");
                if keys.iter().any(SearchKey::needs_utf8) {
                    buf.extend_from_slice(b" CHARSET UTF-8");
                }
                if keys.is_empty() {
                    buf.extend_from_slice(b" ALL");
                }
                for key in keys {
                    buf.push(b' ');
                    key.write(&mut buf);
                }
            }
            Self::Fetch {
                sequence,
                items,
                uid,
            } => {
                if *uid {
                    buf.extend_from_slice(b"UID ");
                }
                buf.extend_from_slice(b"FETCH ");
                buf.extend_from_slice(sequence.to_string().as_bytes());
                buf.extend_from_slice(b" (");
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        buf.push(b' ');
                    }
                    write_fetch_attribute(&mut buf, item);
                }
                buf.push(b')');
            }
            Self::Logout => buf.extend_from_slice(b"LOGOUT"),
        }

        buf.extend_from_slice(b"\r\n");
        buf
    }
}

fn write_fetch_attribute(buf: &mut Vec<u8>, attr: &FetchAttribute) {
    match attr {
        FetchAttribute::Uid => buf.extend_from_slice(b"UID"),
        FetchAttribute::BodyStructure => buf.extend_from_slice(b"BODYSTRUCTURE"),
        FetchAttribute::Rfc822Size => buf.extend_from_slice(b"RFC822.SIZE"),
        FetchAttribute::BodyPeek(section) => {
            buf.extend_from_slice(b"BODY.PEEK[");
            buf.extend_from_slice(section.as_bytes());
            buf.push(b']');
        }
    }
}

/// Writes an atom when possible, otherwise a quoted string.
pub(crate) fn write_astring(buf: &mut Vec<u8>, s: &str) {
    if s.is_empty() || s.bytes().any(needs_quoting) {
        write_quoted(buf, s);
    } else {
        buf.extend_from_slice(s.as_bytes());
    }
}

/// Writes a quoted string, escaping `"` and `\`.
pub(crate) fn write_quoted(buf: &mut Vec<u8>, s: &str) {
    buf.push(b'"');
    for b in s.bytes() {
        if b == b'"' || b == b'\\' {
            buf.push(b'\\');
        }
        buf.push(b);
    }
    buf.push(b'"');
}

const fn needs_quoting(b: u8) -> bool {
    matches!(
        b,
        b' ' | b'"' | b'\\' | b'(' | b')' | b'{' | b'%' | b'*' | b']'
    ) || b < 0x20
        || b >= 0x7F
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
    use chrono::NaiveDate;

    use super::*;

    fn wire(cmd: &Command) -> String {
        String::from_utf8(cmd.serialize("A0001")).unwrap()
    }

    #[test]
    fn test_login_quotes_when_needed() {
        let cmd = Command::Login {
            username: "user@example.com".into(),
            password: "p ss\"word".into(),
        };
        assert_eq!(
            wire(&cmd),
            "A0001 LOGIN user@example.com \"p ss\\\"word\"\r\n"
        );
    }

    #[test]
    fn test_select_mailbox_with_space() {
        let cmd = Command::Select {
            mailbox: Mailbox::new("[Gmail]/Sent Mail"),
        };
        assert_eq!(wire(&cmd), "A0001 SELECT \"[Gmail]/Sent Mail\"\r\n");
    }

    #[test]
    fn test_list_all() {
        let cmd = Command::List {
            reference: String::new(),
            pattern: "*".into(),
        };
        assert_eq!(wire(&cmd), "A0001 LIST \"\" \"*\"\r\n");
    }

    #[test]
    fn test_search_keys_in_order() {
        let cmd = Command::Search {
            keys: vec![
                SearchKey::All,
                SearchKey::SentSince(NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()),
                SearchKey::Header("message-id".into(), "<m1@x>".into()),
            ],
        };
        assert_eq!(
            wire(&cmd),
            "A0001 SEARCH ALL SENTSINCE 15-Jan-2024 HEADER \"message-id\" \"<m1@x>\"\r\n"
        );
    }

    #[test]
    fn test_search_utf8_charset() {
        let cmd = Command::Search {
            keys: vec![SearchKey::All, SearchKey::Subject("café".into())],
        };
        assert!(wire(&cmd).starts_with("A0001 SEARCH CHARSET UTF-8 ALL SUBJECT"));
    }

    #[test]
    fn test_fetch_sections() {
        let cmd = Command::Fetch {
            sequence: SequenceSet::from_numbers(&[1, 2, 3, 7]),
            items: vec![
                FetchAttribute::Uid,
                FetchAttribute::BodyStructure,
                FetchAttribute::BodyPeek("HEADER".into()),
            ],
            uid: false,
        };
        assert_eq!(
            wire(&cmd),
            "A0001 FETCH 1:3,7 (UID BODYSTRUCTURE BODY.PEEK[HEADER])\r\n"
        );
    }

    #[test]
    fn test_uid_fetch_part() {
        let cmd = Command::Fetch {
            sequence: SequenceSet::single(4021),
            items: vec![FetchAttribute::BodyPeek("2".into())],
            uid: true,
        };
        assert_eq!(wire(&cmd), "A0001 UID FETCH 4021 (BODY.PEEK[2])\r\n");
    }
}
