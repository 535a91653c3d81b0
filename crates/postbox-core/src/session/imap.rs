//! [`MailSession`] over the IMAP client.

use std::collections::HashSet;

use bytes::Bytes;
use postbox_imap::{
    Authenticated, Client, FetchAttribute, FetchItem, ImapStream, NotAuthenticated, SearchKey,
    Selected, SequenceSet, Uid, connect_tls,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

use super::{FetchEvent, FetchQuery, FolderStatus, MailSession, Section, SessionConnector};
use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::folders::FolderEntry;
use crate::search::{DateOperator, SearchTerm};

/// Largest chunk forwarded to the assembler at once.
const CHUNK_SIZE: usize = 8 * 1024;

/// Connects to the IMAP server over implicit TLS and logs in.
#[derive(Debug, Clone)]
pub struct ImapConnector {
    config: ServerConfig,
}

impl ImapConnector {
    /// Creates a connector for `config`.
    #[must_use]
    pub const fn new(config: ServerConfig) -> Self {
        Self { config }
    }
}

impl SessionConnector for ImapConnector {
    type Session = ImapSession<ImapStream>;

    async fn connect(&self) -> Result<Self::Session> {
        let config = &self.config;
        tracing::debug!(host = %config.host, port = config.port, "connecting to IMAP server");
        let stream = connect_tls(&config.host, config.port)
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;
        ImapSession::login(stream, &config.username, &config.password).await
    }
}

enum Stage<S> {
    Authenticated(Client<S, Authenticated>),
    Selected(Client<S, Selected>),
    Closed,
}

/// An authenticated IMAP connection, optionally with a folder open.
pub struct ImapSession<S> {
    stage: Stage<S>,
}

impl<S> std::fmt::Debug for ImapSession<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stage = match self.stage {
            Stage::Authenticated(_) => "authenticated",
            Stage::Selected(_) => "selected",
            Stage::Closed => "closed",
        };
        f.debug_struct("ImapSession").field("stage", &stage).finish()
    }
}

impl<S> ImapSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Reads the greeting on `stream` and logs in.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the greeting or login fails.
    pub async fn login(stream: S, username: &str, password: &str) -> Result<Self> {
        let client: Client<S, NotAuthenticated> = Client::from_stream(stream)
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;
        let client = client
            .login(username, password)
            .await
            .map_err(|e| Error::Connection(format!("login failed: {e}")))?;
        Ok(Self {
            stage: Stage::Authenticated(client),
        })
    }

    fn selected(&mut self) -> Result<&mut Client<S, Selected>> {
        match &mut self.stage {
            Stage::Selected(client) => Ok(client),
            _ => Err(Error::Command("no folder is open".to_string())),
        }
    }
}

fn command_error(err: postbox_imap::Error) -> Error {
    Error::Command(err.to_string())
}

fn search_key(term: &SearchTerm) -> SearchKey {
    match term {
        SearchTerm::Type(kind) => match kind {
            crate::search::MessageType::All => SearchKey::All,
            crate::search::MessageType::Deleted => SearchKey::Deleted,
            crate::search::MessageType::Unseen => SearchKey::Unseen,
        },
        SearchTerm::Sent { operator, date } => match operator {
            DateOperator::Before => SearchKey::SentBefore(*date),
            DateOperator::On => SearchKey::SentOn(*date),
            DateOperator::Since => SearchKey::SentSince(*date),
        },
        SearchTerm::Header { name, value } => SearchKey::Header(name.clone(), value.clone()),
        SearchTerm::Subject(text) => SearchKey::Subject(text.clone()),
        SearchTerm::From(text) => SearchKey::From(text.clone()),
        SearchTerm::To(text) => SearchKey::To(text.clone()),
        SearchTerm::Body(text) => SearchKey::Body(text.clone()),
    }
}

fn section_of(name: &str) -> Option<Section> {
    match name {
        "HEADER" => Some(Section::Header),
        "TEXT" => Some(Section::Text),
        _ => None,
    }
}

async fn emit(events: &mpsc::Sender<FetchEvent>, event: FetchEvent) -> Result<()> {
    events
        .send(event)
        .await
        .map_err(|_| Error::Command("fetch consumer stopped".to_string()))
}

impl<S> MailSession for ImapSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn list_folders(&mut self) -> Result<Vec<FolderEntry>> {
        let Stage::Authenticated(client) = &mut self.stage else {
            return Err(Error::Command("folders are listed before opening one".to_string()));
        };
        let listed = client.list("", "*").await.map_err(command_error)?;
        Ok(listed
            .into_iter()
            .map(|entry| FolderEntry::new(entry.mailbox.as_str(), entry.delimiter))
            .collect())
    }

    async fn open_folder(&mut self, name: &str, read_only: bool) -> Result<FolderStatus> {
        let client = match std::mem::replace(&mut self.stage, Stage::Closed) {
            Stage::Authenticated(client) => client,
            other => {
                self.stage = other;
                return Err(Error::Command("a folder is already open".to_string()));
            }
        };
        let opened = if read_only {
            client.examine(name).await
        } else {
            client.select(name).await
        };
        let (client, status) = opened.map_err(command_error)?;
        self.stage = Stage::Selected(client);
        Ok(FolderStatus {
            total: status.exists,
        })
    }

    async fn search(&mut self, terms: &[SearchTerm]) -> Result<Vec<u32>> {
        let keys: Vec<SearchKey> = terms.iter().map(search_key).collect();
        self.selected()?.search(&keys).await.map_err(command_error)
    }

    async fn fetch(
        &mut self,
        seqs: &[u32],
        query: FetchQuery,
        events: mpsc::Sender<FetchEvent>,
    ) -> Result<()> {
        let mut items = vec![
            FetchAttribute::Uid,
            FetchAttribute::BodyStructure,
            FetchAttribute::BodyPeek("HEADER".to_string()),
        ];
        if query.include_body {
            items.push(FetchAttribute::BodyPeek("TEXT".to_string()));
        }

        let wanted: HashSet<u32> = seqs.iter().copied().collect();
        let mut emitted = HashSet::new();
        let client = self.selected()?;
        let mut stream = client
            .fetch_stream(&SequenceSet::from_numbers(seqs), items)
            .await
            .map_err(command_error)?;

        while let Some((seq, items)) = stream.next().await.map_err(command_error)? {
            let seq = seq.get();
            if !wanted.contains(&seq) || !emitted.insert(seq) {
                tracing::debug!(seq, "skipping unsolicited FETCH response");
                continue;
            }
            emit(&events, FetchEvent::Started { seq }).await?;

            let mut uid = None;
            let mut structure = None;
            for item in items {
                match item {
                    FetchItem::Uid(id) => uid = Some(id.get()),
                    FetchItem::BodyStructure(body) => structure = Some(body),
                    FetchItem::Body { section, data } => {
                        let Some(section) = section_of(&section) else {
                            continue;
                        };
                        let data = Bytes::from(data.unwrap_or_default());
                        let mut start = 0;
                        while start < data.len() {
                            let end = (start + CHUNK_SIZE).min(data.len());
                            let bytes = data.slice(start..end);
                            emit(&events, FetchEvent::Chunk { seq, section, bytes }).await?;
                            start = end;
                        }
                        emit(&events, FetchEvent::SectionEnd { seq, section }).await?;
                    }
                    FetchItem::Rfc822Size(_) => {}
                }
            }

            match (uid, structure) {
                (Some(uid), Some(structure)) => {
                    emit(&events, FetchEvent::Attributes { seq, uid, structure }).await?;
                }
                _ => tracing::warn!(seq, "FETCH response without UID or BODYSTRUCTURE"),
            }
            emit(&events, FetchEvent::Finished { seq }).await?;
        }
        Ok(())
    }

    async fn fetch_part(
        &mut self,
        uid: u32,
        part_id: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64> {
        let uid = Uid::new(uid).ok_or_else(|| Error::Command("UID 0 is invalid".to_string()))?;
        self.selected()?
            .uid_fetch_part_into(uid, part_id, sink)
            .await
            .map_err(command_error)
    }

    async fn close(self) -> Result<()> {
        let closed = match self.stage {
            Stage::Authenticated(client) => client.logout().await,
            Stage::Selected(client) => client.logout().await,
            Stage::Closed => Ok(()),
        };
        closed.map_err(|e| Error::Connection(e.to_string()))
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
    use tokio_test::io::{Builder, Mock};

    use super::*;

    fn greeting() -> Builder {
        let mut builder = Builder::new();
        builder
            .read(b"* OK ready\r\n")
            .write(b"A0001 LOGIN u p\r\n")
            .read(b"A0001 OK logged in\r\n");
        builder
    }

    async fn session(mock: Mock) -> ImapSession<Mock> {
        ImapSession::login(mock, "u", "p").await.unwrap()
    }

    #[tokio::test]
    async fn test_list_folders() {
        let mock = greeting()
            .write(b"A0002 LIST \"\" \"*\"\r\n")
            .read(b"* LIST (\\HasNoChildren) \"/\" \"INBOX\"\r\n")
            .read(b"* LIST (\\HasNoChildren) \"/\" \"Work/2024\"\r\n")
            .read(b"A0002 OK done\r\n")
            .build();
        let mut session = session(mock).await;
        let folders = session.list_folders().await.unwrap();
        assert_eq!(
            folders,
            vec![
                FolderEntry::new("INBOX", Some('/')),
                FolderEntry::new("Work/2024", Some('/')),
            ]
        );
    }

    #[tokio::test]
    async fn test_login_rejected() {
        let mock = Builder::new()
            .read(b"* OK ready\r\n")
            .write(b"A0001 LOGIN u p\r\n")
            .read(b"A0001 NO bad credentials\r\n")
            .build();
        let err = ImapSession::login(mock, "u", "p").await.unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
    }

    #[tokio::test]
    async fn test_search_requires_open_folder() {
        let mut session = session(greeting().build()).await;
        let err = session.search(&[SearchTerm::Subject("x".into())]).await.unwrap_err();
        assert!(matches!(err, Error::Command(_)));
    }

    #[tokio::test]
    async fn test_fetch_emits_events_in_order() {
        let mock = greeting()
            .write(b"A0002 EXAMINE INBOX\r\n")
            .read(b"* 1 EXISTS\r\n")
            .read(b"A0002 OK [READ-ONLY] done\r\n")
            .write(b"A0003 SEARCH ALL\r\n")
            .read(b"* SEARCH 1\r\n")
            .read(b"A0003 OK done\r\n")
            .write(b"A0004 FETCH 1 (UID BODYSTRUCTURE BODY.PEEK[HEADER])\r\n")
            .read(b"* 1 FETCH (UID 9 BODYSTRUCTURE (\"TEXT\" \"PLAIN\" (\"CHARSET\" \"utf-8\") NIL NIL \"7BIT\" 5 1 NIL NIL NIL NIL) BODY[HEADER] {5}\r\n")
            .read(b"a\r\n\r\n)\r\n")
            .read(b"A0004 OK done\r\n")
            .build();
        let mut session = session(mock).await;

        let status = session.open_folder("INBOX", true).await.unwrap();
        assert_eq!(status.total, 1);
        let seqs = session
            .search(&[SearchTerm::Type(crate::search::MessageType::All)])
            .await
            .unwrap();
        assert_eq!(seqs, vec![1]);

        let (tx, mut rx) = mpsc::channel(16);
        session
            .fetch(&seqs, FetchQuery { include_body: false }, tx)
            .await
            .unwrap();

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert_eq!(events.len(), 5);
        assert_eq!(events[0], FetchEvent::Started { seq: 1 });
        assert_eq!(
            events[1],
            FetchEvent::Chunk {
                seq: 1,
                section: Section::Header,
                bytes: Bytes::from_static(b"a\r\n\r\n"),
            }
        );
        assert_eq!(
            events[2],
            FetchEvent::SectionEnd {
                seq: 1,
                section: Section::Header
            }
        );
        assert!(matches!(events[3], FetchEvent::Attributes { uid: 9, .. }));
        assert_eq!(events[4], FetchEvent::Finished { seq: 1 });
    }

    #[test]
    fn test_search_key_mapping() {
        let date = chrono::NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        assert_eq!(
            search_key(&SearchTerm::Sent {
                operator: DateOperator::Before,
                date
            }),
            SearchKey::SentBefore(date)
        );
        assert_eq!(
            search_key(&SearchTerm::Header {
                name: "x-a".into(),
                value: "1".into()
            }),
            SearchKey::Header("x-a".into(), "1".into())
        );
    }
}
