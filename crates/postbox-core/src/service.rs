//! Request-level operations over the session manager and send channel.

use std::time::Duration;

use chrono::NaiveDate;
use serde::Serialize;

use crate::composer::{SendRequest, compose, fetch_cdn, render};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::mailer::{SendChannel, SmtpChannel};
use crate::message::{EmailMessage, sort_and_limit};
use crate::search::{DateOperator, DatePredicate, SearchCriteria};
use crate::session::{DownloadTarget, ImapConnector, MailConfig, SessionConnector, SessionManager};
use crate::staging::StagingArea;

/// Folder listing result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FolderList {
    /// Number of folders.
    pub count: usize,
    /// Slash-joined leaf folder paths.
    pub folders: Vec<String>,
}

/// Message listing result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmailList {
    /// Number of messages.
    pub count: usize,
    /// Messages, sorted and limited.
    pub emails: Vec<EmailMessage>,
}

/// Parameters of a message listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailQuery {
    /// Folder to search.
    pub folder: String,
    /// Only messages sent on or after this date.
    pub since: Option<NaiveDate>,
    /// Keep at most this many messages.
    pub limit: Option<usize>,
    /// Newest first.
    pub reverse: bool,
    /// Include bodies.
    pub body: bool,
    /// Include raw header maps.
    pub headers: bool,
    /// Enumerate attachments.
    pub attachments: bool,
    /// Only the message with this `Message-ID`.
    pub msg_id: Option<String>,
}

impl Default for EmailQuery {
    fn default() -> Self {
        Self {
            folder: "INBOX".to_string(),
            since: None,
            limit: None,
            reverse: false,
            body: false,
            headers: false,
            attachments: true,
            msg_id: None,
        }
    }
}

/// A decoded attachment ready to be returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentDownload {
    /// File name.
    pub filename: String,
    /// `type/subtype`.
    pub content_type: String,
    /// Decoded bytes.
    pub data: Vec<u8>,
}

fn require<'a>(value: &'a str, name: &str, operation: &str) -> Result<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        return Err(Error::Validation(format!(
            "Must provide the '{name}' parameter to {operation}"
        )));
    }
    Ok(value)
}

fn by_message_id(folder: &str, msg_id: &str) -> MailConfig {
    MailConfig {
        include_headers: true,
        criteria: SearchCriteria {
            message_id: Some(msg_id.to_string()),
            ..SearchCriteria::default()
        },
        ..MailConfig::new(folder)
    }
}

/// The mailbox API.
#[derive(Debug)]
pub struct MailService<C, T> {
    sessions: SessionManager<C>,
    channel: T,
    staging: StagingArea,
    http: reqwest::Client,
    img_cdn: Option<String>,
}

impl MailService<ImapConnector, SmtpChannel> {
    /// Builds the production service from configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            ImapConnector::new(config.imap.clone()),
            SmtpChannel::new(config.smtp.clone()),
            StagingArea::new(&config.staging_dir),
            config.command_timeout,
        )
        .with_cdn(config.img_cdn.clone())
    }
}

impl<C, T> MailService<C, T>
where
    C: SessionConnector,
    T: SendChannel,
{
    /// Creates a service.
    #[must_use]
    pub fn new(connector: C, channel: T, staging: StagingArea, timeout: Duration) -> Self {
        Self {
            sessions: SessionManager::new(connector, timeout),
            channel,
            staging,
            http: reqwest::Client::new(),
            img_cdn: None,
        }
    }

    /// Sets the CDN base URL for CDN-sourced attachments.
    #[must_use]
    pub fn with_cdn(mut self, base: Option<String>) -> Self {
        self.img_cdn = base.map(|base| base.trim_end_matches('/').to_string());
        self
    }

    /// The session manager.
    #[must_use]
    pub const fn sessions(&self) -> &SessionManager<C> {
        &self.sessions
    }

    /// The send channel.
    #[must_use]
    pub const fn channel(&self) -> &T {
        &self.channel
    }

    /// Lists every leaf folder.
    ///
    /// # Errors
    ///
    /// Returns the session error.
    pub async fn list_folders(&self) -> Result<FolderList> {
        let folders = self.sessions.list_folders().await?;
        tracing::info!(count = folders.len(), "listed folders");
        Ok(FolderList {
            count: folders.len(),
            folders,
        })
    }

    /// Searches a folder, then sorts and limits the result by sent date.
    ///
    /// # Errors
    ///
    /// Returns the session error.
    pub async fn list_emails(&self, query: EmailQuery) -> Result<EmailList> {
        let folder = if query.folder.trim().is_empty() {
            "INBOX"
        } else {
            query.folder.trim()
        };
        let config = MailConfig {
            include_body: query.body,
            include_headers: query.headers,
            include_attachments: query.attachments,
            criteria: SearchCriteria {
                message_id: query.msg_id.filter(|id| !id.trim().is_empty()),
                date: query.since.map(|date| DatePredicate {
                    date,
                    operator: DateOperator::Since,
                }),
                ..SearchCriteria::default()
            },
            ..MailConfig::new(folder)
        };

        let outcome = self.sessions.fetch_messages(config).await?;
        let emails = sort_and_limit(outcome.messages, query.reverse, query.limit);
        tracing::info!(folder, count = emails.len(), "listed emails");
        Ok(EmailList {
            count: emails.len(),
            emails,
        })
    }

    /// Finds one message by `Message-ID`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when `folder` or `msg_id` is empty,
    /// before any session is opened.
    pub async fn get_email(
        &self,
        folder: &str,
        msg_id: &str,
        include_body: bool,
    ) -> Result<Option<EmailMessage>> {
        let operation = "find an email";
        let msg_id = require(msg_id, "msgID", operation)?;
        let folder = require(folder, "folder", operation)?;

        let mut config = by_message_id(folder, msg_id);
        config.include_body = include_body;
        let outcome = self.sessions.fetch_messages(config).await?;
        let email = outcome.messages.into_iter().next();
        tracing::info!(folder, msg_id, found = email.is_some(), "looked up email");
        Ok(email)
    }

    /// Downloads and decodes one attachment of a message.
    ///
    /// The bytes pass through a staging directory private to this call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for missing parameters and
    /// [`Error::NotFound`] when no attachment of the message has `filename`.
    pub async fn get_attachment(
        &self,
        folder: &str,
        msg_id: &str,
        filename: &str,
    ) -> Result<AttachmentDownload> {
        let operation = "download an attachment";
        let msg_id = require(msg_id, "msgID", operation)?;
        let folder = require(folder, "folder", operation)?;
        let filename = require(filename, "filename", operation)?;

        let staging = self.staging.scoped()?;
        let mut config = by_message_id(folder, msg_id);
        config.download = Some(DownloadTarget {
            filename: filename.to_string(),
            dir: staging.path().to_path_buf(),
        });

        let result: Result<AttachmentDownload> = async {
            let staged = self
                .sessions
                .fetch_messages(config)
                .await?
                .download
                .ok_or_else(|| {
                    Error::NotFound(format!("attachment '{filename}' in message {msg_id}"))
                })?;
            let data = tokio::fs::read(&staged.path).await?;
            Ok(AttachmentDownload {
                filename: staged.filename,
                content_type: staged.content_type,
                data,
            })
        }
        .await;
        staging.close();

        if let Ok(download) = &result {
            tracing::info!(filename, bytes = download.data.len(), "attachment downloaded");
        }
        result
    }

    /// Composes and sends a message, returning its `Message-ID`.
    ///
    /// CDN files are downloaded and awaited before rendering. Downloaded
    /// files are removed after the send, whatever its outcome.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for a malformed request, [`Error::Fetch`]
    /// when a CDN download fails, or the send channel's error.
    pub async fn send_email(&self, request: SendRequest) -> Result<String> {
        let staging = self.staging.scoped()?;
        let result: Result<String> = async {
            let composition = compose(&request, &staging, self.img_cdn.as_deref())?;
            fetch_cdn(&self.http, &composition.cdn_fetches).await?;
            let mail = render(&composition.spec).await?;
            let sent = self.channel.send(&mail).await;

            for fetch in &composition.cdn_fetches {
                if let Err(e) = tokio::fs::remove_file(&fetch.path).await {
                    tracing::warn!(path = %fetch.path.display(), error = %e, "failed to remove fetched file");
                }
            }
            sent
        }
        .await;
        staging.close();

        if let Ok(message_id) = &result {
            tracing::info!(message_id = %message_id, "email sent");
        }
        result
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
    use std::sync::atomic::Ordering;

    use postbox_imap::BodyStructure;
    use serde_json::json;

    use super::*;
    use crate::parser::tests::{attachment_part, leaf, mixed};
    use crate::search::SearchTerm;
    use crate::testing::{FakeChannel, FakeConnector, FakeMessage};

    fn service(connector: FakeConnector, root: &std::path::Path) -> MailService<FakeConnector, FakeChannel> {
        MailService::new(
            connector,
            FakeChannel::default(),
            StagingArea::new(root),
            Duration::from_secs(5),
        )
    }

    fn dated(seq: u32, day: u32) -> FakeMessage {
        FakeMessage::new(
            seq,
            &format!("Message-ID: <jan{day}@x>\r\nDate: {day} Jan 2024 12:00:00 +0000\r\n\r\n"),
        )
    }

    #[tokio::test]
    async fn test_newest_two_of_three() {
        let root = tempfile::tempdir().unwrap();
        let connector = FakeConnector::default().with_messages(vec![dated(1, 1), dated(2, 2), dated(3, 3)]);
        let service = service(connector, root.path());
        let list = service
            .list_emails(EmailQuery {
                limit: Some(2),
                reverse: true,
                ..EmailQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(list.count, 2);
        let ids: Vec<&str> = list.emails.iter().map(|m| m.msg_id.as_str()).collect();
        assert_eq!(ids, vec!["<jan3@x>", "<jan2@x>"]);
    }

    #[tokio::test]
    async fn test_since_and_msg_id_become_terms() {
        let root = tempfile::tempdir().unwrap();
        let service = service(FakeConnector::default(), root.path());
        let since = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        service
            .list_emails(EmailQuery {
                since: Some(since),
                msg_id: Some("<a@x>".into()),
                ..EmailQuery::default()
            })
            .await
            .unwrap();
        let searches = service.sessions().connector().stats().searches.lock().unwrap().clone();
        assert_eq!(
            searches[0][1],
            SearchTerm::Sent {
                operator: DateOperator::Since,
                date: since
            }
        );
        assert_eq!(
            searches[0][2],
            SearchTerm::Header {
                name: "message-id".into(),
                value: "<a@x>".into()
            }
        );
    }

    #[tokio::test]
    async fn test_get_email_validates_before_connecting() {
        let root = tempfile::tempdir().unwrap();
        let service = service(FakeConnector::default(), root.path());
        let err = service.get_email("INBOX", " ", false).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(
            service.sessions().connector().stats().connects.load(Ordering::SeqCst),
            0
        );
    }

    #[tokio::test]
    async fn test_get_email_not_found_is_none() {
        let root = tempfile::tempdir().unwrap();
        let connector = FakeConnector::default()
            .with_messages(vec![dated(1, 1)])
            .with_matches(Vec::new());
        let service = service(connector, root.path());
        assert!(service.get_email("INBOX", "<x@y>", true).await.unwrap().is_none());
    }

    fn with_attachment() -> FakeConnector {
        let structure = mixed(vec![
            BodyStructure::Single(leaf("text/plain", "7bit", 2)),
            attachment_part("data.csv", "text/csv", "base64", 12),
        ]);
        FakeConnector::default().with_messages(vec![
            FakeMessage::new(1, "Message-ID: <m@x>\r\n\r\n")
                .with_structure(structure)
                .with_part("2", b"YSxiCjEsMgo="),
        ])
    }

    #[tokio::test]
    async fn test_get_attachment_decodes_and_cleans_up() {
        let root = tempfile::tempdir().unwrap();
        let service = service(with_attachment(), root.path());
        let download = service.get_attachment("INBOX", "<m@x>", "data.csv").await.unwrap();
        assert_eq!(download.content_type, "text/csv");
        assert_eq!(download.data, b"a,b\n1,2\n");
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_get_attachment_unknown_filename() {
        let root = tempfile::tempdir().unwrap();
        let service = service(with_attachment(), root.path());
        let err = service
            .get_attachment("INBOX", "<m@x>", "other.csv")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(err.status_code(), 404);
    }

    #[tokio::test]
    async fn test_send_email() {
        let root = tempfile::tempdir().unwrap();
        let service = service(FakeConnector::default(), root.path());
        let request: SendRequest = serde_json::from_value(json!({
            "from": "me@example.com",
            "to": "you@example.org",
            "subject": "Report",
            "html": "<p>see attached</p>",
            "attachments": "[{\"filename\":\"a.txt\",\"base64Content\":\"aGk=\"}]"
        }))
        .unwrap();

        let id = service.send_email(request).await.unwrap();
        let sent = service.channel().sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].message_id, id);
        assert_eq!(sent[0].recipients, vec!["you@example.org"]);
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_send_rejected_by_channel() {
        let root = tempfile::tempdir().unwrap();
        let service = MailService::new(
            FakeConnector::default(),
            FakeChannel::rejecting(),
            StagingArea::new(root.path()),
            Duration::from_secs(5),
        );
        let request = SendRequest {
            from: Some("me@example.com".into()),
            to: Some("you@example.org".into()),
            ..SendRequest::default()
        };
        assert!(matches!(service.send_email(request).await, Err(Error::Send(_))));
    }
}
