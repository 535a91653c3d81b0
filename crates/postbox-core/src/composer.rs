//! Outbound message composition.
//!
//! [`compose`] turns a loosely typed [`SendRequest`] into a [`SendSpec`] and
//! the list of CDN downloads it depends on. [`fetch_cdn`] must complete
//! before [`render`] reads the attachments from disk.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::Utc;
use postbox_mime::{Attachment, MessageBuilder, TransferEncoding, bare_address, generate_message_id};
use serde::Deserialize;
use serde_json::Value;
use tokio::task::JoinSet;

use crate::error::{Error, Result};
use crate::staging::StagingDir;

/// Send request as received over HTTP.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    /// Sender address.
    pub from: Option<String>,
    /// Sender display name.
    pub from_name: Option<String>,
    /// Comma-separated recipients.
    pub to: Option<String>,
    /// Comma-separated copy recipients.
    pub cc: Option<String>,
    /// Comma-separated blind copy recipients.
    pub bcc: Option<String>,
    /// Subject line.
    pub subject: Option<String>,
    /// Plain-text body, ignored when `html` is set.
    pub text: Option<String>,
    /// HTML body.
    pub html: Option<String>,
    /// Attachment directives: a JSON-encoded array or the array itself.
    pub attachments: Option<Value>,
}

/// How one attachment is to be sourced.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentDirective {
    /// Source file name in the staging area, also the CDN object name.
    pub filename: String,
    /// Name shown to the recipient instead of `filename`.
    #[serde(default)]
    pub display_file_name: Option<String>,
    /// Download the file from the CDN first.
    #[serde(default, rename = "useCDN")]
    pub use_cdn: bool,
    /// Attach inline with `filename` as the content id.
    #[serde(default)]
    pub embedded_image: bool,
    /// Literal base64 content.
    #[serde(default)]
    pub base64_content: Option<String>,
}

/// Where the bytes of an attachment come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentSource {
    /// A staged file sent inline, referenced by content id.
    Embedded {
        /// Staged file.
        path: PathBuf,
        /// Content id, the directive's source file name.
        cid: String,
    },
    /// Literal base64 content.
    Base64(String),
    /// A staged file.
    File {
        /// Staged file.
        path: PathBuf,
    },
}

/// One resolved attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentSpec {
    /// Name shown to the recipient.
    pub filename: String,
    /// Source of the content.
    pub source: AttachmentSource,
}

/// Message body; HTML wins when both were given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MailBody {
    /// HTML body.
    Html(String),
    /// Plain-text body.
    Text(String),
}

/// A fully resolved outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendSpec {
    /// `From` header, with the display name if one was given.
    pub from: String,
    /// Recipients.
    pub to: String,
    /// Copy recipients.
    pub cc: Option<String>,
    /// Blind copy recipients.
    pub bcc: Option<String>,
    /// Subject line.
    pub subject: String,
    /// Body.
    pub body: MailBody,
    /// Attachments in directive order.
    pub attachments: Vec<AttachmentSpec>,
    /// Generated `Message-ID`.
    pub message_id: String,
}

/// A file to download from the CDN before sending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CdnFetch {
    /// Source URL.
    pub url: String,
    /// Destination in the request's staging directory.
    pub path: PathBuf,
}

/// Output of [`compose`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Composition {
    /// The message to send.
    pub spec: SendSpec,
    /// Downloads that must finish first. Each path appears once.
    pub cdn_fetches: Vec<CdnFetch>,
}

/// A rendered message ready for a send channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    /// Envelope sender.
    pub from: String,
    /// Envelope recipients, blind ones included.
    pub recipients: Vec<String>,
    /// `Message-ID` header value.
    pub message_id: String,
    /// RFC 5322 message.
    pub raw: Vec<u8>,
}

fn required<'a>(value: Option<&'a str>, field: &str) -> Result<&'a str> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| Error::Validation(format!("'{field}' is required")))
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty()).cloned()
}

/// Parses the `attachments` field.
///
/// # Errors
///
/// Returns [`Error::Validation`] if the field is not an array of directives.
pub fn parse_directives(value: Option<&Value>) -> Result<Vec<AttachmentDirective>> {
    let parsed = match value {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::String(text)) if text.trim().is_empty() => return Ok(Vec::new()),
        Some(Value::String(text)) => serde_json::from_str(text),
        Some(other) => serde_json::from_value(other.clone()),
    };
    parsed.map_err(|e| Error::Validation(format!("invalid attachments: {e}")))
}

/// Resolves a send request against a staging directory.
///
/// CDN directives need `cdn_base`. A file fetched from the CDN lands in the
/// request's own directory; other path-based files are looked up there and
/// then in the staging root.
///
/// # Errors
///
/// Returns [`Error::Validation`] for a missing sender or recipient, malformed
/// directives, or a CDN directive without a CDN base URL.
pub fn compose(
    request: &SendRequest,
    staging: &StagingDir,
    cdn_base: Option<&str>,
) -> Result<Composition> {
    let from = required(request.from.as_deref(), "from")?;
    let to = required(request.to.as_deref(), "to")?;
    let sender = match request.from_name.as_deref().filter(|name| !name.is_empty()) {
        Some(name) => format!("\"{name}\" <{from}>"),
        None => format!("<{from}>"),
    };
    let body = match non_empty(request.html.as_ref()) {
        Some(html) => MailBody::Html(html),
        None => MailBody::Text(request.text.clone().unwrap_or_default()),
    };

    let mut attachments = Vec::new();
    let mut cdn_fetches = Vec::new();
    let mut fetched = HashSet::new();
    for directive in parse_directives(request.attachments.as_ref())? {
        let path = if directive.use_cdn {
            staging.file_path(&directive.filename)?
        } else {
            staging.resolve(&directive.filename)?
        };

        if directive.use_cdn && fetched.insert(path.clone()) {
            let base = cdn_base.ok_or_else(|| {
                Error::Validation(format!(
                    "'{}' is to be fetched from the CDN but no CDN is configured",
                    directive.filename
                ))
            })?;
            cdn_fetches.push(CdnFetch {
                url: format!("{base}/{}", directive.filename),
                path: path.clone(),
            });
        }

        let source = if directive.embedded_image {
            AttachmentSource::Embedded {
                path,
                cid: directive.filename.clone(),
            }
        } else if let Some(content) = non_empty(directive.base64_content.as_ref()) {
            AttachmentSource::Base64(content)
        } else {
            AttachmentSource::File { path }
        };
        attachments.push(AttachmentSpec {
            filename: directive
                .display_file_name
                .filter(|name| !name.is_empty())
                .unwrap_or(directive.filename),
            source,
        });
    }

    let domain = bare_address(from)
        .rsplit_once('@')
        .map(|(_, domain)| domain.to_string())
        .unwrap_or_default();

    Ok(Composition {
        spec: SendSpec {
            from: sender,
            to: to.to_string(),
            cc: non_empty(request.cc.as_ref()),
            bcc: non_empty(request.bcc.as_ref()),
            subject: request.subject.clone().unwrap_or_default(),
            body,
            attachments,
            message_id: generate_message_id(&domain),
        },
        cdn_fetches,
    })
}

/// Downloads every CDN file concurrently and waits for all of them.
///
/// # Errors
///
/// Returns [`Error::Fetch`] for the first failed download, after every
/// download has ended.
pub async fn fetch_cdn(client: &reqwest::Client, fetches: &[CdnFetch]) -> Result<()> {
    let mut tasks = JoinSet::new();
    for fetch in fetches {
        let client = client.clone();
        let fetch = fetch.clone();
        tasks.spawn(async move {
            let response = client.get(&fetch.url).send().await?.error_for_status()?;
            let bytes = response.bytes().await?;
            tokio::fs::write(&fetch.path, &bytes).await?;
            tracing::debug!(url = %fetch.url, bytes = bytes.len(), "fetched CDN attachment");
            Ok::<_, Error>(())
        });
    }

    let mut first_error = None;
    while let Some(joined) = tasks.join_next().await {
        let outcome = joined.map_err(|e| Error::Fetch(e.to_string())).and_then(|r| r);
        if let Err(e) = outcome {
            tracing::warn!(error = %e, "CDN download failed");
            first_error.get_or_insert(match e {
                Error::Io(io) => Error::Fetch(io.to_string()),
                other => other,
            });
        }
    }
    first_error.map_or(Ok(()), Err)
}

async fn read_staged(path: &Path, filename: &str) -> Result<Vec<u8>> {
    tokio::fs::read(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::NotFound(format!("attachment source '{filename}'"))
        } else {
            Error::Io(e)
        }
    })
}

/// Reads the attachments and renders the message.
///
/// # Errors
///
/// Returns [`Error::NotFound`] for a missing staged file and
/// [`Error::Validation`] for bad base64 content or addresses.
pub async fn render(spec: &SendSpec) -> Result<OutgoingMail> {
    let mut builder = MessageBuilder::new()
        .from(spec.from.as_str())
        .to(&spec.to)
        .subject(spec.subject.as_str())
        .message_id(spec.message_id.as_str())
        .date(Utc::now());
    if let Some(cc) = &spec.cc {
        builder = builder.cc(cc);
    }
    if let Some(bcc) = &spec.bcc {
        builder = builder.bcc(bcc);
    }
    builder = match &spec.body {
        MailBody::Html(html) => builder.html_body(html.as_str()),
        MailBody::Text(text) => builder.text_body(text.as_str()),
    };

    for attachment in &spec.attachments {
        let filename = attachment.filename.as_str();
        let part = match &attachment.source {
            AttachmentSource::Embedded { path, cid } => {
                Attachment::new(filename, read_staged(path, filename).await?).inline(cid.as_str())
            }
            AttachmentSource::Base64(content) => {
                let data = TransferEncoding::parse("base64")
                    .decode(content.as_bytes())
                    .map_err(|e| Error::Validation(format!("bad base64 for '{filename}': {e}")))?;
                Attachment::new(filename, data)
            }
            AttachmentSource::File { path } => {
                Attachment::new(filename, read_staged(path, filename).await?)
            }
        };
        builder = builder.attach(part);
    }

    let raw = builder
        .build()
        .map_err(|e| Error::Validation(e.to_string()))?;
    let from = builder
        .envelope_from()
        .ok_or_else(|| Error::Validation("'from' is required".to_string()))?;
    Ok(OutgoingMail {
        from,
        recipients: builder.envelope_recipients(),
        message_id: spec.message_id.clone(),
        raw,
    })
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
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;
    use crate::staging::StagingArea;

    fn request(attachments: Option<Value>) -> SendRequest {
        SendRequest {
            from: Some("me@example.com".into()),
            from_name: Some("Me".into()),
            to: Some("you@example.org, them@example.net".into()),
            subject: Some("Hello".into()),
            text: Some("plain".into()),
            attachments,
            ..SendRequest::default()
        }
    }

    #[test]
    fn test_sender_and_body_precedence() {
        let root = tempfile::tempdir().unwrap();
        let dir = StagingArea::new(root.path()).scoped().unwrap();
        let mut req = request(None);
        req.html = Some("<b>hi</b>".into());

        let spec = compose(&req, &dir, None).unwrap().spec;
        assert_eq!(spec.from, "\"Me\" <me@example.com>");
        assert_eq!(spec.body, MailBody::Html("<b>hi</b>".into()));
        assert!(spec.message_id.ends_with("@example.com>"));

        req.from_name = None;
        req.html = None;
        let spec = compose(&req, &dir, None).unwrap().spec;
        assert_eq!(spec.from, "<me@example.com>");
        assert_eq!(spec.body, MailBody::Text("plain".into()));
    }

    #[test]
    fn test_directive_priority() {
        let root = tempfile::tempdir().unwrap();
        let dir = StagingArea::new(root.path()).scoped().unwrap();
        let directives = json!([
            {"filename": "logo.png", "embeddedImage": true, "base64Content": "aGk="},
            {"filename": "note.txt", "displayFileName": "Note.txt", "base64Content": "aGk="},
            {"filename": "report.pdf"}
        ]);
        let spec = compose(&request(Some(Value::String(directives.to_string()))), &dir, None)
            .unwrap()
            .spec;

        assert_eq!(
            spec.attachments[0].source,
            AttachmentSource::Embedded {
                path: dir.path().join("logo.png"),
                cid: "logo.png".into(),
            }
        );
        assert_eq!(spec.attachments[1].filename, "Note.txt");
        assert_eq!(spec.attachments[1].source, AttachmentSource::Base64("aGk=".into()));
        assert_eq!(
            spec.attachments[2].source,
            AttachmentSource::File {
                path: dir.path().join("report.pdf")
            }
        );
    }

    #[test]
    fn test_cdn_fetches_deduplicated() {
        let root = tempfile::tempdir().unwrap();
        let dir = StagingArea::new(root.path()).scoped().unwrap();
        let directives = json!([
            {"filename": "banner.png", "useCDN": true, "embeddedImage": true},
            {"filename": "banner.png", "useCDN": true},
            {"filename": "local.pdf"}
        ]);
        let composition =
            compose(&request(Some(directives)), &dir, Some("https://cdn.example.com")).unwrap();
        assert_eq!(
            composition.cdn_fetches,
            vec![CdnFetch {
                url: "https://cdn.example.com/banner.png".into(),
                path: dir.path().join("banner.png"),
            }]
        );
    }

    #[test]
    fn test_cdn_without_base_rejected() {
        let root = tempfile::tempdir().unwrap();
        let dir = StagingArea::new(root.path()).scoped().unwrap();
        let err = compose(&request(Some(json!([{"filename": "a.png", "useCDN": true}]))), &dir, None)
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_missing_fields_rejected() {
        let root = tempfile::tempdir().unwrap();
        let dir = StagingArea::new(root.path()).scoped().unwrap();
        let mut req = request(None);
        req.to = Some("  ".into());
        assert!(matches!(compose(&req, &dir, None), Err(Error::Validation(_))));
        assert!(parse_directives(Some(&json!("not json"))).is_err());
        assert!(parse_directives(Some(&json!(""))).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_render_reads_staged_files() {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("report.pdf"), b"%PDF-1.4").unwrap();
        let dir = StagingArea::new(root.path()).scoped().unwrap();
        let mut req = request(Some(json!([
            {"filename": "report.pdf"},
            {"filename": "hi.txt", "base64Content": "aGVsbG8="}
        ])));
        req.bcc = Some("hidden@example.com".into());

        let spec = compose(&req, &dir, None).unwrap().spec;
        let mail = render(&spec).await.unwrap();
        assert_eq!(mail.from, "me@example.com");
        assert_eq!(
            mail.recipients,
            vec!["you@example.org", "them@example.net", "hidden@example.com"]
        );
        let raw = String::from_utf8(mail.raw).unwrap();
        assert!(raw.contains(&format!("Message-ID: {}", spec.message_id)));
        assert!(raw.contains("report.pdf"));
        assert!(!raw.contains("hidden@example.com"));
    }

    #[tokio::test]
    async fn test_render_missing_file() {
        let root = tempfile::tempdir().unwrap();
        let dir = StagingArea::new(root.path()).scoped().unwrap();
        let spec = compose(&request(Some(json!([{"filename": "gone.pdf"}]))), &dir, None)
            .unwrap()
            .spec;
        assert!(matches!(render(&spec).await, Err(Error::NotFound(_))));
    }

    async fn serve_once(status: &'static str, body: &'static [u8]) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request).await.unwrap();
            let head = format!(
                "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.write_all(body).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_fetch_cdn_writes_file() {
        let base = serve_once("200 OK", b"PNGDATA").await;
        let dir = tempfile::tempdir().unwrap();
        let fetch = CdnFetch {
            url: format!("{base}/banner.png"),
            path: dir.path().join("banner.png"),
        };
        fetch_cdn(&reqwest::Client::new(), &[fetch.clone()]).await.unwrap();
        assert_eq!(std::fs::read(&fetch.path).unwrap(), b"PNGDATA");
    }

    #[tokio::test]
    async fn test_fetch_cdn_error_status() {
        let base = serve_once("404 Not Found", b"").await;
        let dir = tempfile::tempdir().unwrap();
        let fetch = CdnFetch {
            url: format!("{base}/missing.png"),
            path: dir.path().join("missing.png"),
        };
        let err = fetch_cdn(&reqwest::Client::new(), &[fetch]).await.unwrap_err();
        assert!(matches!(err, Error::Fetch(_)));
    }
}
