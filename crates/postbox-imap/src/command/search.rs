//! SEARCH keys.

use chrono::NaiveDate;

use super::write_quoted;

/// One SEARCH key. A key list is an implicit AND.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchKey {
    /// `ALL`
    All,
    /// `DELETED`
    Deleted,
    /// `UNSEEN`
    Unseen,
    /// `SENTBEFORE date`
    SentBefore(NaiveDate),
    /// `SENTON date`
    SentOn(NaiveDate),
    /// `SENTSINCE date`
    SentSince(NaiveDate),
    /// `HEADER field value`
    Header(String, String),
    /// `SUBJECT text`
    Subject(String),
    /// `FROM text`
    From(String),
    /// `TO text`
    To(String),
    /// `BODY text`
    Body(String),
}

impl SearchKey {
    /// Appends the wire form of this key.
    pub fn write(&self, buf: &mut Vec<u8>) {
        match self {
            Self::All => buf.extend_from_slice(b"ALL"),
            Self::Deleted => buf.extend_from_slice(b"DELETED"),
            Self::Unseen => buf.extend_from_slice(b"UNSEEN"),
            Self::SentBefore(date) => write_dated(buf, b"SENTBEFORE ", *date),
            Self::SentOn(date) => write_dated(buf, b"SENTON ", *date),
            Self::SentSince(date) => write_dated(buf, b"SENTSINCE ", *date),
            Self::Header(field, value) => {
                buf.extend_from_slice(b"HEADER ");
                write_quoted(buf, field);
                buf.push(b' ');
                write_quoted(buf, value);
            }
            Self::Subject(text) => write_text(buf, b"SUBJECT ", text),
            Self::From(text) => write_text(buf, b"FROM ", text),
            Self::To(text) => write_text(buf, b"TO ", text),
            Self::Body(text) => write_text(buf, b"BODY ", text),
        }
    }

    /// True when the key carries text outside ASCII.
    #[must_use]
    pub fn needs_utf8(&self) -> bool {
        match self {
            Self::Header(field, value) => !field.is_ascii() || !value.is_ascii(),
            Self::Subject(text) | Self::From(text) | Self::To(text) | Self::Body(text) => {
                !text.is_ascii()
            }
            _ => false,
        }
    }
}

/// Formats a date the way RFC 3501 `date` wants it: `1-Feb-2024`.
#[must_use]
pub fn format_search_date(date: NaiveDate) -> String {
    date.format("%-d-%b-%Y").to_string()
}

fn write_dated(buf: &mut Vec<u8>, keyword: &[u8], date: NaiveDate) {
    buf.extend_from_slice(keyword);
    buf.extend_from_slice(format_search_date(date).as_bytes());
}

fn write_text(buf: &mut Vec<u8>, keyword: &[u8], text: &str) {
    buf.extend_from_slice(keyword);
    write_quoted(buf, text);
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

    fn render(key: &SearchKey) -> String {
        let mut buf = Vec::new();
        key.write(&mut buf);
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_date_format() {
        let date = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        assert_eq!(format_search_date(date), "1-Feb-2024");
        assert_eq!(render(&SearchKey::SentSince(date)), "SENTSINCE 1-Feb-2024");
    }

    #[test]
    fn test_header_key_is_quoted() {
        let key = SearchKey::Header("message-id".into(), "<abc@host>".into());
        assert_eq!(render(&key), "HEADER \"message-id\" \"<abc@host>\"");
    }

    #[test]
    fn test_quotes_escaped() {
        let key = SearchKey::Subject("say \"hi\"".into());
        assert_eq!(render(&key), "SUBJECT \"say \\\"hi\\\"\"");
    }

    #[test]
    fn test_needs_utf8() {
        assert!(SearchKey::Subject("héllo".into()).needs_utf8());
        assert!(!SearchKey::All.needs_utf8());
    }
}
