//! Mailbox names, LIST entries and SELECT results.

/// Mailbox name as sent on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Mailbox(pub String);

impl Mailbox {
    /// Creates a mailbox name. `inbox` in any case is normalized to `INBOX`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        if name.eq_ignore_ascii_case("INBOX") {
            Self("INBOX".to_string())
        } else {
            Self(name)
        }
    }

    /// Returns the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Mailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Mailbox state reported by SELECT or EXAMINE.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MailboxStatus {
    /// Number of messages in the mailbox.
    pub exists: u32,
    /// Number of recent messages.
    pub recent: u32,
    /// `UIDVALIDITY` value, if announced.
    pub uid_validity: Option<u32>,
    /// Predicted next UID, if announced.
    pub uid_next: Option<u32>,
    /// True when the server opened the mailbox read-only.
    pub read_only: bool,
}

/// One untagged LIST reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListResponse {
    /// Mailbox attributes such as `\HasChildren`.
    pub attributes: Vec<MailboxAttribute>,
    /// Hierarchy delimiter, `None` for a flat namespace.
    pub delimiter: Option<char>,
    /// Full mailbox name.
    pub mailbox: Mailbox,
}

/// LIST mailbox attribute.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MailboxAttribute {
    /// `\Noselect`: the name exists only as a hierarchy node.
    NoSelect,
    /// `\HasChildren`.
    HasChildren,
    /// `\HasNoChildren`.
    HasNoChildren,
    /// `\Noinferiors`.
    NoInferiors,
    /// Any other attribute, special-use flags included.
    Other(String),
}

impl MailboxAttribute {
    /// Parses an attribute atom.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "\\NOSELECT" => Self::NoSelect,
            "\\HASCHILDREN" => Self::HasChildren,
            "\\HASNOCHILDREN" => Self::HasNoChildren,
            "\\NOINFERIORS" => Self::NoInferiors,
            _ => Self::Other(s.to_string()),
        }
    }
}

impl ListResponse {
    /// Splits the mailbox name into hierarchy segments.
    #[must_use]
    pub fn segments(&self) -> Vec<&str> {
        match self.delimiter {
            Some(delim) => self.mailbox.as_str().split(delim).collect(),
            None => vec![self.mailbox.as_str()],
        }
    }
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
    use super::*;

    #[test]
    fn test_inbox_normalized() {
        assert_eq!(Mailbox::new("inbox").as_str(), "INBOX");
        assert_eq!(Mailbox::new("Archive").as_str(), "Archive");
    }

    #[test]
    fn test_segments() {
        let entry = ListResponse {
            attributes: vec![MailboxAttribute::HasNoChildren],
            delimiter: Some('/'),
            mailbox: Mailbox::new("[Gmail]/Sent Mail"),
        };
        assert_eq!(entry.segments(), vec!["[Gmail]", "Sent Mail"]);

        let flat = ListResponse {
            attributes: vec![],
            delimiter: None,
            mailbox: Mailbox::new("a/b"),
        };
        assert_eq!(flat.segments(), vec!["a/b"]);
    }

    #[test]
    fn test_attribute_parse() {
        assert_eq!(MailboxAttribute::parse("\\Noselect"), MailboxAttribute::NoSelect);
        assert_eq!(
            MailboxAttribute::parse("\\Sent"),
            MailboxAttribute::Other("\\Sent".to_string())
        );
    }
}
