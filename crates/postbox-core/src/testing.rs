//! In-memory doubles for the session and send channel.
//!
//! [`FakeConnector`] hands out sessions that replay scripted messages,
//! interleaving the fetch events of all messages round-robin the way a
//! pipelining server would. [`FakeChannel`] records every mail it is given.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use postbox_imap::{BodyStructure, SinglePart};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::composer::OutgoingMail;
use crate::error::{Error, Result};
use crate::folders::FolderEntry;
use crate::mailer::SendChannel;
use crate::search::SearchTerm;
use crate::session::{
    FetchEvent, FetchQuery, FolderStatus, MailSession, Section, SessionConnector,
};

/// One scripted message.
#[derive(Debug, Clone)]
pub struct FakeMessage {
    seq: u32,
    header: Vec<u8>,
    text: Option<Vec<u8>>,
    structure: BodyStructure,
    parts: Vec<(String, Vec<u8>)>,
    attributes_first: bool,
}

impl FakeMessage {
    /// A plain-text message at `seq` (also its UID) with the given header block.
    #[must_use]
    pub fn new(seq: u32, header: &str) -> Self {
        Self {
            seq,
            header: header.as_bytes().to_vec(),
            text: None,
            structure: BodyStructure::Single(SinglePart {
                media_type: "text".to_string(),
                media_subtype: "plain".to_string(),
                params: vec![("charset".to_string(), "utf-8".to_string())],
                id: None,
                description: None,
                encoding: "7bit".to_string(),
                size: 0,
                lines: None,
                disposition: None,
            }),
            parts: Vec::new(),
            attributes_first: false,
        }
    }

    /// Sets the text section.
    #[must_use]
    pub fn with_text(mut self, text: &str) -> Self {
        self.text = Some(text.as_bytes().to_vec());
        self
    }

    /// Sets the MIME structure.
    #[must_use]
    pub fn with_structure(mut self, structure: BodyStructure) -> Self {
        self.structure = structure;
        self
    }

    /// Adds raw (still transfer-encoded) bytes served for `part_id`.
    #[must_use]
    pub fn with_part(mut self, part_id: &str, data: &[u8]) -> Self {
        self.parts.push((part_id.to_string(), data.to_vec()));
        self
    }

    /// Delivers UID and structure right after `Started`, before any section.
    #[must_use]
    pub fn attributes_first(mut self) -> Self {
        self.attributes_first = true;
        self
    }

    /// Sections delivered by a fetch, in order.
    #[must_use]
    pub fn sections(&self, include_body: bool) -> Vec<(Section, &[u8])> {
        let mut sections = vec![(Section::Header, self.header.as_slice())];
        if include_body {
            sections.push((Section::Text, self.text.as_deref().unwrap_or_default()));
        }
        sections
    }

    fn events(&self, include_body: bool) -> VecDeque<FetchEvent> {
        let seq = self.seq;
        let attributes = FetchEvent::Attributes {
            seq,
            uid: seq,
            structure: self.structure.clone(),
        };
        let mut events = VecDeque::from([FetchEvent::Started { seq }]);
        let mut trailing = Some(attributes);
        if self.attributes_first {
            events.extend(trailing.take());
        }
        for (section, data) in self.sections(include_body) {
            // Split each section so chunks of different messages interleave.
            let (first, second) = data.split_at(data.len() / 2);
            for half in [first, second] {
                if !half.is_empty() {
                    events.push_back(FetchEvent::Chunk {
                        seq,
                        section,
                        bytes: Bytes::copy_from_slice(half),
                    });
                }
            }
            events.push_back(FetchEvent::SectionEnd { seq, section });
        }
        events.extend(trailing);
        events.push_back(FetchEvent::Finished { seq });
        events
    }
}

/// Counters shared by a connector and its sessions.
#[derive(Debug, Default)]
pub struct FakeStats {
    /// Sessions opened.
    pub connects: AtomicUsize,
    /// Sessions closed.
    pub closes: AtomicUsize,
    /// Fetches started.
    pub fetches: AtomicUsize,
    /// Term lists passed to `search`.
    pub searches: Mutex<Vec<Vec<SearchTerm>>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum FetchFault {
    #[default]
    None,
    Fail,
    Truncate,
}

#[derive(Debug, Clone, Default)]
struct Script {
    folders: Vec<FolderEntry>,
    messages: Vec<FakeMessage>,
    matches: Option<Vec<u32>>,
    fault: FetchFault,
    refuse: bool,
    stall: Option<Duration>,
}

/// Produces [`FakeSession`]s from a script.
#[derive(Debug, Clone, Default)]
pub struct FakeConnector {
    script: Script,
    stats: Arc<FakeStats>,
}

impl FakeConnector {
    /// Folders returned by `list_folders`.
    #[must_use]
    pub fn with_folders(mut self, folders: Vec<FolderEntry>) -> Self {
        self.script.folders = folders;
        self
    }

    /// Messages in the open folder. Every message matches unless
    /// [`with_matches`](Self::with_matches) says otherwise.
    #[must_use]
    pub fn with_messages(mut self, messages: Vec<FakeMessage>) -> Self {
        self.script.messages = messages;
        self
    }

    /// Sequence numbers returned by `search`.
    #[must_use]
    pub fn with_matches(mut self, matches: Vec<u32>) -> Self {
        self.script.matches = Some(matches);
        self
    }

    /// Makes `fetch` fail after the first event.
    #[must_use]
    pub fn failing_fetch(mut self) -> Self {
        self.script.fault = FetchFault::Fail;
        self
    }

    /// Makes `fetch` end without the last `Finished` event.
    #[must_use]
    pub fn truncated_fetch(mut self) -> Self {
        self.script.fault = FetchFault::Truncate;
        self
    }

    /// Makes `connect` fail.
    #[must_use]
    pub fn refusing(mut self) -> Self {
        self.script.refuse = true;
        self
    }

    /// Makes `fetch` sleep for `delay` first.
    #[must_use]
    pub fn stalling(mut self, delay: Duration) -> Self {
        self.script.stall = Some(delay);
        self
    }

    /// Counters of this connector's sessions.
    #[must_use]
    pub fn stats(&self) -> &FakeStats {
        &self.stats
    }
}

impl SessionConnector for FakeConnector {
    type Session = FakeSession;

    async fn connect(&self) -> Result<FakeSession> {
        if self.script.refuse {
            return Err(Error::Connection("connection refused".to_string()));
        }
        self.stats.connects.fetch_add(1, Ordering::SeqCst);
        Ok(FakeSession {
            script: self.script.clone(),
            stats: Arc::clone(&self.stats),
        })
    }
}

/// A scripted session.
#[derive(Debug)]
pub struct FakeSession {
    script: Script,
    stats: Arc<FakeStats>,
}

impl MailSession for FakeSession {
    async fn list_folders(&mut self) -> Result<Vec<FolderEntry>> {
        Ok(self.script.folders.clone())
    }

    async fn open_folder(&mut self, _name: &str, _read_only: bool) -> Result<FolderStatus> {
        let total = self
            .script
            .messages
            .iter()
            .map(|message| message.seq)
            .max()
            .unwrap_or(0);
        Ok(FolderStatus { total })
    }

    async fn search(&mut self, terms: &[SearchTerm]) -> Result<Vec<u32>> {
        if let Ok(mut searches) = self.stats.searches.lock() {
            searches.push(terms.to_vec());
        }
        Ok(self.script.matches.clone().unwrap_or_else(|| {
            self.script
                .messages
                .iter()
                .map(|message| message.seq)
                .collect()
        }))
    }

    async fn fetch(
        &mut self,
        seqs: &[u32],
        query: FetchQuery,
        events: mpsc::Sender<FetchEvent>,
    ) -> Result<()> {
        self.stats.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.script.stall {
            tokio::time::sleep(delay).await;
        }

        let mut queues: Vec<VecDeque<FetchEvent>> = self
            .script
            .messages
            .iter()
            .filter(|message| seqs.contains(&message.seq))
            .map(|message| message.events(query.include_body))
            .collect();
        if self.script.fault == FetchFault::Truncate {
            if let Some(last) = queues.last_mut() {
                last.pop_back();
            }
        }

        let mut sent = 0;
        while queues.iter().any(|queue| !queue.is_empty()) {
            for queue in &mut queues {
                let Some(event) = queue.pop_front() else {
                    continue;
                };
                if self.script.fault == FetchFault::Fail && sent == 1 {
                    return Err(Error::Command("connection reset during FETCH".to_string()));
                }
                events
                    .send(event)
                    .await
                    .map_err(|_| Error::Command("fetch consumer stopped".to_string()))?;
                sent += 1;
            }
        }
        Ok(())
    }

    async fn fetch_part(
        &mut self,
        uid: u32,
        part_id: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64> {
        let data = self
            .script
            .messages
            .iter()
            .filter(|message| message.seq == uid)
            .flat_map(|message| &message.parts)
            .find(|(id, _)| id == part_id)
            .map(|(_, data)| data.clone())
            .ok_or_else(|| Error::Command(format!("no part {part_id} in UID {uid}")))?;
        // Dribble the bytes to exercise decoders across write boundaries.
        for piece in data.chunks(3) {
            sink.write_all(piece).await?;
        }
        Ok(data.len() as u64)
    }

    async fn close(self) -> Result<()> {
        self.stats.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Records mails instead of sending them.
#[derive(Debug, Clone, Default)]
pub struct FakeChannel {
    sent: Arc<Mutex<Vec<OutgoingMail>>>,
    reject: bool,
}

impl FakeChannel {
    /// A channel that rejects every mail.
    #[must_use]
    pub fn rejecting() -> Self {
        Self {
            sent: Arc::default(),
            reject: true,
        }
    }

    /// Mails accepted so far.
    #[must_use]
    pub fn sent(&self) -> Vec<OutgoingMail> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }
}

impl SendChannel for FakeChannel {
    async fn send(&self, mail: &OutgoingMail) -> Result<String> {
        if self.reject {
            return Err(Error::Send("550 mailbox unavailable".to_string()));
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(mail.clone());
        }
        Ok(mail.message_id.clone())
    }
}
