//! Outgoing message construction.
//!
//! ```
//! use postbox_mime::{Attachment, MessageBuilder};
//!
//! let raw = MessageBuilder::new()
//!     .from("\"Ops\" <ops@example.com>")
//!     .to("dev@example.com")
//!     .subject("Nightly report")
//!     .html_body("<p>See attached.</p>")
//!     .attach(Attachment::new("report.csv", b"a,b\n1,2\n".to_vec()))
//!     .build()
//!     .unwrap();
//! assert!(String::from_utf8_lossy(&raw).contains("multipart/mixed"));
//! ```
//!
//! Layout:
//! - no attachments: a single text or HTML part
//! - content-id images: `multipart/related` around the body and the images
//! - other attachments: `multipart/mixed` around the body (or the related
//!   container) and the files

use chrono::{DateTime, Utc};

use crate::content_type::ContentType;
use crate::date::format_date;
use crate::encoding::{encode_base64_wrapped, encode_quoted_printable, encode_rfc2047};
use crate::error::{Error, Result};
use crate::header::Headers;

/// A file to attach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// File name shown to the recipient.
    pub filename: String,
    /// Content type, inferred from the file name by default.
    pub content_type: ContentType,
    /// Raw (unencoded) file bytes.
    pub data: Vec<u8>,
    /// Content-ID for images referenced from the HTML body.
    pub content_id: Option<String>,
}

impl Attachment {
    /// Creates a regular attachment.
    #[must_use]
    pub fn new(filename: impl Into<String>, data: Vec<u8>) -> Self {
        let filename = filename.into();
        Self {
            content_type: ContentType::from_extension(&filename),
            filename,
            data,
            content_id: None,
        }
    }

    /// Marks the attachment as inline, referenced as `cid:<content_id>`.
    #[must_use]
    pub fn inline(mut self, content_id: impl Into<String>) -> Self {
        self.content_id = Some(content_id.into());
        self
    }

    /// Overrides the inferred content type.
    #[must_use]
    pub fn with_content_type(mut self, content_type: ContentType) -> Self {
        self.content_type = content_type;
        self
    }

    fn write_part(&self, out: &mut String) {
        let filename = quoted(&encode_rfc2047(&self.filename));
        let mut headers = Headers::new();
        headers.add("Content-Type", format!("{}; name={filename}", self.content_type));
        headers.add("Content-Transfer-Encoding", "base64");
        match &self.content_id {
            Some(cid) => {
                headers.add("Content-ID", format!("<{cid}>"));
                headers.add("Content-Disposition", format!("inline; filename={filename}"));
            }
            None => headers.add("Content-Disposition", format!("attachment; filename={filename}")),
        }
        out.push_str(&headers.to_string());
        out.push_str("\r\n");
        out.push_str(&encode_base64_wrapped(&self.data));
        out.push_str("\r\n");
    }
}

/// Quoted-string form of a parameter value.
fn quoted(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if matches!(c, '"' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    /// `text/plain`
    Text(String),
    /// `text/html`
    Html(String),
}

impl Body {
    fn write_part(&self, out: &mut String) {
        let (content_type, text) = match self {
            Self::Text(text) => (ContentType::text_plain(), text),
            Self::Html(html) => (ContentType::text_html(), html),
        };
        out.push_str(&format!("Content-Type: {content_type}\r\n"));
        out.push_str("Content-Transfer-Encoding: quoted-printable\r\n\r\n");
        out.push_str(&encode_quoted_printable(text));
        out.push_str("\r\n");
    }
}

/// Builder for an RFC 5322 message.
#[derive(Debug, Clone, Default)]
pub struct MessageBuilder {
    from: Option<String>,
    to: Vec<String>,
    cc: Vec<String>,
    bcc: Vec<String>,
    subject: Option<String>,
    message_id: Option<String>,
    date: Option<DateTime<Utc>>,
    body: Option<Body>,
    attachments: Vec<Attachment>,
}

impl MessageBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the `From` mailbox, optionally with a display name.
    #[must_use]
    pub fn from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    /// Adds `To` recipients. A comma-separated list is split.
    #[must_use]
    pub fn to(mut self, to: impl AsRef<str>) -> Self {
        self.to.extend(split_addresses(to.as_ref()));
        self
    }

    /// Adds `Cc` recipients. A comma-separated list is split.
    #[must_use]
    pub fn cc(mut self, cc: impl AsRef<str>) -> Self {
        self.cc.extend(split_addresses(cc.as_ref()));
        self
    }

    /// Adds blind recipients. They only reach the envelope.
    #[must_use]
    pub fn bcc(mut self, bcc: impl AsRef<str>) -> Self {
        self.bcc.extend(split_addresses(bcc.as_ref()));
        self
    }

    /// Sets the subject.
    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Sets the `Message-ID`, angle brackets included.
    #[must_use]
    pub fn message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    /// Sets the `Date`. Defaults to the build time.
    #[must_use]
    pub const fn date(mut self, date: DateTime<Utc>) -> Self {
        self.date = Some(date);
        self
    }

    /// Sets a plain-text body.
    #[must_use]
    pub fn text_body(mut self, text: impl Into<String>) -> Self {
        self.body = Some(Body::Text(text.into()));
        self
    }

    /// Sets an HTML body.
    #[must_use]
    pub fn html_body(mut self, html: impl Into<String>) -> Self {
        self.body = Some(Body::Html(html.into()));
        self
    }

    /// Adds an attachment.
    #[must_use]
    pub fn attach(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Bare sender address for the SMTP envelope.
    #[must_use]
    pub fn envelope_from(&self) -> Option<String> {
        self.from.as_deref().map(bare_address)
    }

    /// Bare addresses of every recipient, blind ones included.
    #[must_use]
    pub fn envelope_recipients(&self) -> Vec<String> {
        self.to
            .iter()
            .chain(&self.cc)
            .chain(&self.bcc)
            .map(|addr| bare_address(addr))
            .collect()
    }

    /// Renders the message with CRLF line endings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHeader`] when the sender or every recipient
    /// is missing.
    pub fn build(&self) -> Result<Vec<u8>> {
        let from = self
            .from
            .as_deref()
            .filter(|from| !from.trim().is_empty())
            .ok_or_else(|| Error::InvalidHeader("missing From".to_string()))?;
        if self.to.is_empty() && self.cc.is_empty() && self.bcc.is_empty() {
            return Err(Error::InvalidHeader("no recipients".to_string()));
        }

        let mut headers = Headers::new();
        headers.add("From", from);
        if !self.to.is_empty() {
            headers.add("To", self.to.join(", "));
        }
        if !self.cc.is_empty() {
            headers.add("Cc", self.cc.join(", "));
        }
        headers.add(
            "Subject",
            encode_rfc2047(self.subject.as_deref().unwrap_or_default()),
        );
        headers.add("Date", format_date(&self.date.unwrap_or_else(Utc::now)));
        if let Some(id) = &self.message_id {
            headers.add("Message-ID", id.as_str());
        }
        headers.add("MIME-Version", "1.0");

        let body = self.body.clone().unwrap_or_else(|| Body::Text(String::new()));
        let (inline, files): (Vec<&Attachment>, Vec<&Attachment>) = self
            .attachments
            .iter()
            .partition(|attachment| attachment.content_id.is_some());

        let mut out = headers.to_string();

        let content = if inline.is_empty() {
            render(|buf| body.write_part(buf))
        } else {
            let boundary = generate_boundary();
            let mut related = format!(
                "Content-Type: {}\r\n\r\n",
                ContentType::multipart_related(&boundary).with_parameter("type", "text/html")
            );
            let mut parts = vec![render(|buf| body.write_part(buf))];
            parts.extend(inline.iter().map(|a| render(|buf| a.write_part(buf))));
            write_multipart(&mut related, &boundary, &parts);
            related
        };

        if files.is_empty() {
            out.push_str(&content);
        } else {
            let boundary = generate_boundary();
            out.push_str(&format!(
                "Content-Type: {}\r\n\r\n",
                ContentType::multipart_mixed(&boundary)
            ));
            let mut parts = vec![content];
            parts.extend(files.iter().map(|a| render(|buf| a.write_part(buf))));
            write_multipart(&mut out, &boundary, &parts);
        }

        Ok(out.into_bytes())
    }
}

fn render(write: impl FnOnce(&mut String)) -> String {
    let mut buf = String::new();
    write(&mut buf);
    buf
}

fn write_multipart(out: &mut String, boundary: &str, parts: &[String]) {
    out.push_str("This is a multi-part message in MIME format.\r\n");
    for part in parts {
        out.push_str(&format!("--{boundary}\r\n"));
        out.push_str(part);
    }
    out.push_str(&format!("--{boundary}--\r\n"));
}

fn generate_boundary() -> String {
    format!("=_postbox_{:032x}", rand::random::<u128>())
}

/// Generates a `Message-ID` value: `<{millis}.{random}@{domain}>`.
#[must_use]
pub fn generate_message_id(domain: &str) -> String {
    let domain = if domain.is_empty() { "localhost" } else { domain };
    format!(
        "<{}.{:016x}@{domain}>",
        Utc::now().timestamp_millis(),
        rand::random::<u64>()
    )
}

/// Extracts `user@host` from `"Name" <user@host>` or returns the input trimmed.
#[must_use]
pub fn bare_address(mailbox: &str) -> String {
    match (mailbox.rfind('<'), mailbox.rfind('>')) {
        (Some(start), Some(end)) if start < end => mailbox[start + 1..end].trim().to_string(),
        _ => mailbox.trim().to_string(),
    }
}

/// Splits an address list on commas outside quoted display names.
#[must_use]
pub fn split_addresses(list: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut angle = false;

    for c in list.chars() {
        match c {
            '"' => quoted = !quoted,
            '<' if !quoted => angle = true,
            '>' if !quoted => angle = false,
            ',' if !quoted && !angle => {
                out.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    out.push(current);

    out.into_iter()
        .map(|addr| addr.trim().to_string())
        .filter(|addr| !addr.is_empty())
        .collect()
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
    use chrono::TimeZone;

    use super::*;
    use crate::encoding::decode_base64;

    fn text(raw: &[u8]) -> String {
        String::from_utf8(raw.to_vec()).unwrap()
    }

    fn boundary_of(raw: &str, subtype: &str) -> String {
        let marker = format!("multipart/{subtype}; boundary=\"");
        let start = raw.find(&marker).unwrap() + marker.len();
        let end = raw[start..].find('"').unwrap();
        raw[start..start + end].to_string()
    }

    #[test]
    fn test_single_part_text() {
        let raw = MessageBuilder::new()
            .from("a@example.com")
            .to("b@example.com")
            .subject("Hi")
            .date(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap())
            .message_id("<1.2@example.com>")
            .text_body("hello")
            .build()
            .unwrap();
        let raw = text(&raw);

        assert!(raw.starts_with("From: a@example.com\r\nTo: b@example.com\r\nSubject: Hi\r\n"));
        assert!(raw.contains("Date: Tue, 2 Jan 2024 03:04:05 +0000\r\n"));
        assert!(raw.contains("Message-ID: <1.2@example.com>\r\n"));
        assert!(raw.contains("Content-Type: text/plain; charset=utf-8\r\n"));
        assert!(raw.ends_with("\r\n\r\nhello\r\n"));
        assert!(!raw.contains("multipart"));
    }

    #[test]
    fn test_mixed_with_attachment() {
        let raw = MessageBuilder::new()
            .from("a@example.com")
            .to("b@example.com")
            .html_body("<b>hi</b>")
            .attach(Attachment::new("data.pdf", vec![0, 1, 2, 255]))
            .build()
            .unwrap();
        let raw = text(&raw);
        let boundary = boundary_of(&raw, "mixed");

        assert_eq!(raw.matches(&format!("--{boundary}\r\n")).count(), 2);
        assert!(raw.ends_with(&format!("--{boundary}--\r\n")));
        assert!(raw.contains("Content-Type: text/html; charset=utf-8"));
        assert!(raw.contains("Content-Type: application/pdf; name=\"data.pdf\""));
        assert!(raw.contains("Content-Disposition: attachment; filename=\"data.pdf\""));

        let encoded = raw
            .split("filename=\"data.pdf\"\r\n\r\n")
            .nth(1)
            .unwrap()
            .split("\r\n--")
            .next()
            .unwrap();
        assert_eq!(decode_base64(encoded.as_bytes()).unwrap(), vec![0, 1, 2, 255]);
    }

    #[test]
    fn test_related_for_inline_images() {
        let raw = MessageBuilder::new()
            .from("a@example.com")
            .to("b@example.com")
            .html_body("<img src=\"cid:logo.png\">")
            .attach(Attachment::new("logo.png", vec![1, 2, 3]).inline("logo.png"))
            .attach(Attachment::new("terms.txt", b"terms".to_vec()))
            .build()
            .unwrap();
        let raw = text(&raw);

        let mixed = boundary_of(&raw, "mixed");
        let related = boundary_of(&raw, "related");
        assert_ne!(mixed, related);
        assert!(raw.find("multipart/mixed").unwrap() < raw.find("multipart/related").unwrap());
        assert!(raw.contains("Content-ID: <logo.png>"));
        assert!(raw.contains("Content-Disposition: inline; filename=\"logo.png\""));
        assert!(raw.contains("Content-Disposition: attachment; filename=\"terms.txt\""));
    }

    #[test]
    fn test_missing_sender_or_recipients() {
        let err = MessageBuilder::new().to("b@example.com").build().unwrap_err();
        assert!(matches!(err, Error::InvalidHeader(_)));
        let err = MessageBuilder::new().from("a@example.com").build().unwrap_err();
        assert!(matches!(err, Error::InvalidHeader(_)));
    }

    #[test]
    fn test_bcc_only_in_envelope() {
        let builder = MessageBuilder::new()
            .from("\"Ann\" <ann@example.com>")
            .to("\"Doe, John\" <john@example.com>, jane@example.com")
            .bcc("audit@example.com");
        let raw = text(&builder.build().unwrap());

        assert!(!raw.contains("audit@example.com"));
        assert_eq!(builder.envelope_from().as_deref(), Some("ann@example.com"));
        assert_eq!(
            builder.envelope_recipients(),
            vec!["john@example.com", "jane@example.com", "audit@example.com"]
        );
    }

    #[test]
    fn test_encoded_subject() {
        let raw = MessageBuilder::new()
            .from("a@example.com")
            .to("b@example.com")
            .subject("Café")
            .build()
            .unwrap();
        assert!(text(&raw).contains("Subject: =?utf-8?B?Q2Fmw6k=?=\r\n"));
    }

    #[test]
    fn test_message_id_shape() {
        let id = generate_message_id("example.com");
        assert!(id.starts_with('<'));
        assert!(id.ends_with("@example.com>"));
        assert_ne!(id, generate_message_id("example.com"));
        assert!(generate_message_id("").ends_with("@localhost>"));
    }

    #[test]
    fn test_address_helpers() {
        assert_eq!(bare_address("\"A\" <a@x.io>"), "a@x.io");
        assert_eq!(bare_address(" a@x.io "), "a@x.io");
        assert_eq!(split_addresses("a@x.io, ,b@x.io"), vec!["a@x.io", "b@x.io"]);
    }

    #[test]
    fn test_filename_parameters_escaped() {
        let raw = MessageBuilder::new()
            .from("a@example.com")
            .to("b@example.com")
            .text_body("see attached")
            .attach(Attachment::new("q\"uote\\d.txt", b"x".to_vec()))
            .build()
            .unwrap();
        let raw = text(&raw);
        assert!(raw.contains("; name=\"q\\\"uote\\\\d.txt\"\r\n"));
        assert!(raw.contains("Content-Disposition: attachment; filename=\"q\\\"uote\\\\d.txt\"\r\n"));
    }

    #[test]
    fn test_quoted() {
        assert_eq!(quoted("a.pdf"), "\"a.pdf\"");
        assert_eq!(quoted("a\"b\\c"), "\"a\\\"b\\\\c\"");
    }
}
