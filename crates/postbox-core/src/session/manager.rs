//! Session lifecycle and the commands run inside a session.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc;

use super::{FetchQuery, MailSession, SessionConnector};
use crate::attachment::{StagedAttachment, stream_attachment};
use crate::error::{Error, Result};
use crate::folders::{build_tree, resolve_paths};
use crate::message::EmailMessage;
use crate::parser::{AssemblyOptions, MessageAssembler};
use crate::search::{SearchCriteria, build_search_terms};

/// Events buffered between the fetching session and the assembler.
const EVENT_BUFFER: usize = 64;

/// Kind of work a busy session is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// Listing folders.
    ListFolders,
    /// Searching and fetching messages.
    FetchMessages,
}

/// Where a session is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No connection.
    Disconnected,
    /// Connecting and authenticating.
    Connecting,
    /// Authenticated and idle.
    Ready,
    /// Running a command.
    Busy(CommandKind),
    /// Logging out.
    Closing,
}

impl SessionState {
    /// True if `next` may follow `self`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Disconnected, Self::Connecting)
                | (Self::Connecting, Self::Ready | Self::Disconnected)
                | (Self::Ready, Self::Busy(_) | Self::Closing)
                | (Self::Busy(_), Self::Ready | Self::Closing)
                | (Self::Closing, Self::Disconnected)
        )
    }
}

/// Records the states one session passed through.
#[derive(Debug, Clone)]
pub struct SessionLifecycle {
    history: Vec<SessionState>,
}

impl Default for SessionLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionLifecycle {
    /// Starts in [`SessionState::Disconnected`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            history: vec![SessionState::Disconnected],
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.history
            .last()
            .copied()
            .unwrap_or(SessionState::Disconnected)
    }

    /// Every state so far, oldest first.
    #[must_use]
    pub fn history(&self) -> &[SessionState] {
        &self.history
    }

    /// Moves to `next`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Command`] if `next` cannot follow the current state.
    pub fn advance(&mut self, next: SessionState) -> Result<()> {
        let current = self.state();
        if !current.can_transition_to(next) {
            return Err(Error::Command(format!(
                "illegal session transition {current:?} -> {next:?}"
            )));
        }
        tracing::debug!(from = ?current, to = ?next, "session transition");
        self.history.push(next);
        Ok(())
    }
}

/// Work that runs inside one exclusively owned session.
pub trait SessionCommand<S: MailSession>: Send {
    /// Result of the command.
    type Output: Send;

    /// What the session is busy with while the command runs.
    fn kind(&self) -> CommandKind;

    /// Runs the command.
    fn run(self, session: &mut S) -> impl Future<Output = Result<Self::Output>> + Send;
}

/// Lists folders and flattens them to leaf paths.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListFolders;

impl<S: MailSession> SessionCommand<S> for ListFolders {
    type Output = Vec<String>;

    fn kind(&self) -> CommandKind {
        CommandKind::ListFolders
    }

    async fn run(self, session: &mut S) -> Result<Vec<String>> {
        let entries = session.list_folders().await?;
        tracing::debug!(count = entries.len(), "listed folders");
        resolve_paths(&build_tree(&entries))
    }
}

/// Attachment to download while messages are fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTarget {
    /// File name of the wanted attachment.
    pub filename: String,
    /// Directory the decoded file is written to.
    pub dir: PathBuf,
}

/// Options of one message fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailConfig {
    /// Folder to open read-only.
    pub folder: String,
    /// Fetch and normalize bodies.
    pub include_body: bool,
    /// Keep raw header maps.
    pub include_headers: bool,
    /// Enumerate attachments.
    pub include_attachments: bool,
    /// Search filters.
    pub criteria: SearchCriteria,
    /// Attachment to stream to disk.
    pub download: Option<DownloadTarget>,
}

impl MailConfig {
    /// Fetch of `folder` with attachments listed and nothing else.
    #[must_use]
    pub fn new(folder: impl Into<String>) -> Self {
        Self {
            folder: folder.into(),
            include_body: false,
            include_headers: false,
            include_attachments: true,
            criteria: SearchCriteria::default(),
            download: None,
        }
    }
}

/// Result of [`FetchMessages`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchOutcome {
    /// Identified messages in sequence order.
    pub messages: Vec<EmailMessage>,
    /// The downloaded attachment, if one was requested and found.
    pub download: Option<StagedAttachment>,
}

/// Searches a folder and fetches every match.
#[derive(Debug, Clone)]
pub struct FetchMessages(pub MailConfig);

impl<S: MailSession> SessionCommand<S> for FetchMessages {
    type Output = FetchOutcome;

    fn kind(&self) -> CommandKind {
        CommandKind::FetchMessages
    }

    async fn run(self, session: &mut S) -> Result<FetchOutcome> {
        let config = self.0;
        let status = session.open_folder(&config.folder, true).await?;
        let seqs = session.search(&build_search_terms(&config.criteria)).await?;
        tracing::debug!(
            folder = %config.folder,
            total = status.total,
            matched = seqs.len(),
            "search completed"
        );
        if seqs.is_empty() {
            return Ok(FetchOutcome::default());
        }

        let mut assembler = MessageAssembler::new(
            status.total,
            AssemblyOptions {
                include_body: config.include_body,
                include_headers: config.include_headers,
                include_attachments: config.include_attachments,
                download: config.download.as_ref().map(|target| target.filename.clone()),
            },
        );
        let query = FetchQuery {
            include_body: config.include_body,
        };

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let consume = async {
            // Owning the receiver drops it on error, which stops the sender.
            let mut rx = rx;
            while let Some(event) = rx.recv().await {
                assembler.apply(event)?;
            }
            Ok::<_, Error>(())
        };
        let (fetched, consumed) = tokio::join!(session.fetch(&seqs, query, tx), consume);
        consumed?;
        fetched?;

        let assembled = assembler.finish()?;
        let mut download = None;
        if let (Some(target), Some(pending)) = (&config.download, assembled.downloads.first()) {
            if assembled.downloads.len() > 1 {
                tracing::debug!(
                    filename = %target.filename,
                    matches = assembled.downloads.len(),
                    "several messages carry the attachment, using the first"
                );
            }
            download = Some(stream_attachment(session, pending, &target.dir).await?);
        }

        Ok(FetchOutcome {
            messages: assembled.messages,
            download,
        })
    }
}

/// Opens one session per command and always closes it afterwards.
#[derive(Debug, Clone)]
pub struct SessionManager<C> {
    connector: C,
    timeout: Duration,
}

impl<C: SessionConnector> SessionManager<C> {
    /// Creates a manager whose commands time out after `timeout`.
    #[must_use]
    pub const fn new(connector: C, timeout: Duration) -> Self {
        Self { connector, timeout }
    }

    /// The session factory.
    #[must_use]
    pub const fn connector(&self) -> &C {
        &self.connector
    }

    /// Connects, runs `command` under the deadline, then closes the session.
    ///
    /// Close failures are logged and do not replace the command's result.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the session cannot be opened,
    /// [`Error::Timeout`] if the deadline passes, or the command's error.
    pub async fn run_command<K>(&self, command: K) -> Result<K::Output>
    where
        K: SessionCommand<C::Session>,
    {
        let mut lifecycle = SessionLifecycle::new();
        lifecycle.advance(SessionState::Connecting)?;

        let connected = match tokio::time::timeout(self.timeout, self.connector.connect()).await {
            Ok(Ok(session)) => Ok(session),
            Ok(Err(e @ Error::Connection(_))) => Err(e),
            Ok(Err(e)) => Err(Error::Connection(e.to_string())),
            Err(_) => Err(Error::Timeout(self.timeout)),
        };
        let mut session = match connected {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(error = %e, "could not open mail session");
                lifecycle.advance(SessionState::Disconnected)?;
                return Err(e);
            }
        };
        lifecycle.advance(SessionState::Ready)?;

        let kind = command.kind();
        lifecycle.advance(SessionState::Busy(kind))?;
        let result = match tokio::time::timeout(self.timeout, command.run(&mut session)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(command = ?kind, timeout = ?self.timeout, "session command timed out");
                Err(Error::Timeout(self.timeout))
            }
        };
        if result.is_ok() {
            lifecycle.advance(SessionState::Ready)?;
        }

        lifecycle.advance(SessionState::Closing)?;
        if let Err(e) = session.close().await {
            tracing::warn!(error = %e, "failed to close mail session");
        }
        lifecycle.advance(SessionState::Disconnected)?;
        result
    }

    /// Lists folders as leaf paths.
    ///
    /// # Errors
    ///
    /// See [`run_command`](Self::run_command).
    pub async fn list_folders(&self) -> Result<Vec<String>> {
        self.run_command(ListFolders).await
    }

    /// Searches and fetches messages.
    ///
    /// # Errors
    ///
    /// See [`run_command`](Self::run_command).
    pub async fn fetch_messages(&self, config: MailConfig) -> Result<FetchOutcome> {
        self.run_command(FetchMessages(config)).await
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

    use super::*;
    use crate::folders::FolderEntry;
    use crate::parser::tests::{attachment_part, leaf, mixed};
    use crate::search::{MessageType, SearchTerm};
    use crate::testing::{FakeConnector, FakeMessage};

    fn config() -> MailConfig {
        MailConfig {
            include_body: true,
            ..MailConfig::new("INBOX")
        }
    }

    #[test]
    fn test_legal_transitions() {
        let mut lifecycle = SessionLifecycle::new();
        for state in [
            SessionState::Connecting,
            SessionState::Ready,
            SessionState::Busy(CommandKind::ListFolders),
            SessionState::Ready,
            SessionState::Closing,
            SessionState::Disconnected,
        ] {
            lifecycle.advance(state).unwrap();
        }
        assert_eq!(lifecycle.history().len(), 7);
        assert_eq!(lifecycle.state(), SessionState::Disconnected);
    }

    #[test]
    fn test_illegal_transition() {
        let mut lifecycle = SessionLifecycle::new();
        let err = lifecycle
            .advance(SessionState::Busy(CommandKind::FetchMessages))
            .unwrap_err();
        assert!(matches!(err, Error::Command(_)));
        assert_eq!(lifecycle.state(), SessionState::Disconnected);
        assert!(!SessionState::Closing.can_transition_to(SessionState::Ready));
    }

    #[tokio::test]
    async fn test_list_folders_closes_session() {
        let connector = FakeConnector::default().with_folders(vec![
            FolderEntry::new("INBOX", Some('/')),
            FolderEntry::new("Work/2024", Some('/')),
        ]);
        let manager = SessionManager::new(connector, Duration::from_secs(5));
        let folders = manager.list_folders().await.unwrap();
        assert_eq!(folders, vec!["INBOX", "Work/2024"]);
        let stats = manager.connector().stats();
        assert_eq!(stats.connects.load(Ordering::SeqCst), 1);
        assert_eq!(stats.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fetch_assembles_interleaved_messages() {
        let connector = FakeConnector::default().with_messages(vec![
            FakeMessage::new(1, "Message-ID: <a@x>\r\nDate: Mon, 1 Jan 2024 00:00:00 +0000\r\n\r\n")
                .with_text("first"),
            FakeMessage::new(2, "Message-ID: <b@x>\r\n\r\n").with_text("second"),
            FakeMessage::new(3, "Subject: no id\r\n\r\n"),
        ]);
        let manager = SessionManager::new(connector, Duration::from_secs(5));
        let outcome = manager.fetch_messages(config()).await.unwrap();

        let ids: Vec<&str> = outcome.messages.iter().map(|m| m.msg_id.as_str()).collect();
        assert_eq!(ids, vec!["<a@x>", "<b@x>"]);
        assert_eq!(outcome.messages[1].body.as_deref(), Some("second"));
        assert!(outcome.download.is_none());

        let stats = manager.connector().stats();
        assert_eq!(stats.closes.load(Ordering::SeqCst), 1);
        let searches = stats.searches.lock().unwrap();
        assert_eq!(searches[0], vec![SearchTerm::Type(MessageType::All)]);
    }

    #[tokio::test]
    async fn test_empty_search_skips_fetch() {
        let connector = FakeConnector::default()
            .with_messages(vec![FakeMessage::new(1, "Message-ID: <a@x>\r\n\r\n")])
            .with_matches(Vec::new());
        let manager = SessionManager::new(connector, Duration::from_secs(5));
        let outcome = manager.fetch_messages(config()).await.unwrap();
        assert!(outcome.messages.is_empty());
        assert_eq!(manager.connector().stats().fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fetch_failure_still_closes() {
        let connector = FakeConnector::default()
            .with_messages(vec![FakeMessage::new(1, "Message-ID: <a@x>\r\n\r\n")])
            .failing_fetch();
        let manager = SessionManager::new(connector, Duration::from_secs(5));
        let err = manager.fetch_messages(config()).await.unwrap_err();
        assert!(matches!(err, Error::Command(_)));
        assert_eq!(manager.connector().stats().closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_truncated_fetch_fails_barrier() {
        let connector = FakeConnector::default()
            .with_messages(vec![FakeMessage::new(1, "Message-ID: <a@x>\r\n\r\n")])
            .truncated_fetch();
        let manager = SessionManager::new(connector, Duration::from_secs(5));
        let err = manager.fetch_messages(config()).await.unwrap_err();
        assert!(matches!(err, Error::Command(_)));
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let connector = FakeConnector::default().refusing();
        let manager = SessionManager::new(connector, Duration::from_secs(5));
        let err = manager.list_folders().await.unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
        assert_eq!(manager.connector().stats().closes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_timeout() {
        let connector = FakeConnector::default()
            .with_messages(vec![FakeMessage::new(1, "Message-ID: <a@x>\r\n\r\n")])
            .stalling(Duration::from_secs(60));
        let manager = SessionManager::new(connector, Duration::from_secs(2));
        let err = manager.fetch_messages(config()).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert_eq!(manager.connector().stats().closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_download_streams_first_match() {
        let dir = tempfile::tempdir().unwrap();
        let structure = mixed(vec![
            BodyStructure::Single(leaf("text/plain", "7bit", 2)),
            attachment_part("notes.txt", "text/plain", "base64", 16),
        ]);
        let connector = FakeConnector::default().with_messages(vec![
            FakeMessage::new(4, "Message-ID: <att@x>\r\n\r\n")
                .with_structure(structure)
                .with_part("2", b"aGVsbG8gd29ybGQ="),
        ]);
        let manager = SessionManager::new(connector, Duration::from_secs(5));
        let mut config = MailConfig::new("INBOX");
        config.download = Some(DownloadTarget {
            filename: "notes.txt".to_string(),
            dir: dir.path().to_path_buf(),
        });

        let outcome = manager.fetch_messages(config).await.unwrap();
        let staged = outcome.download.unwrap();
        assert_eq!(staged.bytes, 11);
        assert_eq!(std::fs::read(&staged.path).unwrap(), b"hello world");
        assert_eq!(outcome.messages[0].attachments[0].filename, "notes.txt");
    }

    #[tokio::test]
    async fn test_structure_before_header_keeps_attachments() {
        let dir = tempfile::tempdir().unwrap();
        let structure = mixed(vec![
            BodyStructure::Single(leaf("text/plain", "7bit", 2)),
            attachment_part("a.pdf", "application/pdf", "base64", 8),
        ]);
        let connector = FakeConnector::default().with_messages(vec![
            FakeMessage::new(1, "Message-ID: <early@x>\r\nSubject: hi\r\n\r\n")
                .with_text("body")
                .with_structure(structure)
                .with_part("2", b"JVBERi0x")
                .attributes_first(),
            FakeMessage::new(2, "Message-ID: <late@x>\r\n\r\n").with_text("other"),
        ]);
        let manager = SessionManager::new(connector, Duration::from_secs(5));
        let mut config = MailConfig::new("INBOX");
        config.include_body = true;
        config.download = Some(DownloadTarget {
            filename: "a.pdf".to_string(),
            dir: dir.path().to_path_buf(),
        });

        let outcome = manager.fetch_messages(config).await.unwrap();
        let early = &outcome.messages[0];
        assert_eq!(early.msg_id, "<early@x>");
        assert_eq!(early.subject, "hi");
        assert_eq!(early.body.as_deref(), Some("body"));
        assert_eq!(early.attachments.len(), 1);
        assert_eq!(early.attachments[0].filename, "a.pdf");
        assert_eq!(outcome.messages[1].msg_id, "<late@x>");

        let staged = outcome.download.unwrap();
        assert_eq!(std::fs::read(&staged.path).unwrap(), b"%PDF-1");
    }
}
