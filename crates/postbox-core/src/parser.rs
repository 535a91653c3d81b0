//! Assembly of streamed fetch events into [`EmailMessage`]s.
//!
//! The [`MessageAssembler`] keeps one slot per sequence number. Section
//! bytes are buffered until the section ends and only then parsed, because
//! folded headers and multi-byte characters may straddle chunks. Calling
//! [`MessageAssembler::finish`] is the join point: it fails if any message
//! that started never finished.

use std::collections::HashMap;
use std::sync::LazyLock;

use postbox_imap::BodyStructure;
use postbox_mime::encoding::{decode_charset, decode_rfc2047};
use postbox_mime::{Headers, TransferEncoding, parse_date};
use regex::Regex;

use crate::error::{Error, Result};
use crate::message::{EmailAttachment, EmailMessage, UNKNOWN_RECIPIENT, UNKNOWN_SUBJECT};
use crate::session::{FetchEvent, Section};

#[allow(clippy::expect_used)] // literal pattern
static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").expect("tag pattern"));

/// What to extract while assembling.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssemblyOptions {
    /// Produce `body` from the text section.
    pub include_body: bool,
    /// Keep the raw header map.
    pub include_headers: bool,
    /// Enumerate attachments from the structure.
    pub include_attachments: bool,
    /// Queue a download of the first attachment with this file name.
    pub download: Option<String>,
}

/// An attachment selected for download during assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDownload {
    /// Sequence number of the owning message.
    pub seq: u32,
    /// Unique id of the owning message.
    pub uid: u32,
    /// Dotted part id inside the message.
    pub part_id: String,
    /// Attachment metadata.
    pub attachment: EmailAttachment,
}

/// Messages and downloads produced by one fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Assembled {
    /// Finished messages with an identity key, in sequence order.
    pub messages: Vec<EmailMessage>,
    /// Attachment downloads to run after the fetch.
    pub downloads: Vec<PendingDownload>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum SlotState {
    #[default]
    Empty,
    Streaming,
    Finished,
}

#[derive(Debug, Default)]
struct SectionBuffer {
    bytes: Vec<u8>,
    complete: bool,
}

#[derive(Debug, Default)]
struct Slot {
    state: SlotState,
    sections: HashMap<Section, SectionBuffer>,
    message: Option<EmailMessage>,
    structure: Option<BodyStructure>,
}

/// Builds messages from interleaved [`FetchEvent`]s.
#[derive(Debug)]
pub struct MessageAssembler {
    options: AssemblyOptions,
    slots: Vec<Slot>,
    downloads: Vec<PendingDownload>,
}

impl MessageAssembler {
    /// Creates an assembler with a slot for each of `total` messages.
    #[must_use]
    pub fn new(total: u32, options: AssemblyOptions) -> Self {
        let mut slots = Vec::new();
        slots.resize_with(total as usize, Slot::default);
        Self {
            options,
            slots,
            downloads: Vec::new(),
        }
    }

    /// Applies one event.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Command`] when the event is out of order for its
    /// message, e.g. a chunk before `Started` or after `Finished`.
    pub fn apply(&mut self, event: FetchEvent) -> Result<()> {
        let seq = event.seq();
        let options = &self.options;
        let slot = slot_mut(&mut self.slots, seq)?;

        match event {
            FetchEvent::Started { .. } => {
                if slot.state != SlotState::Empty {
                    return Err(out_of_order(seq, "started twice"));
                }
                slot.state = SlotState::Streaming;
            }
            FetchEvent::Chunk { section, bytes, .. } => {
                expect_streaming(slot, seq)?;
                let buffer = slot.sections.entry(section).or_default();
                if buffer.complete {
                    return Err(out_of_order(seq, "chunk after section end"));
                }
                buffer.bytes.extend_from_slice(&bytes);
            }
            FetchEvent::SectionEnd { section, .. } => {
                expect_streaming(slot, seq)?;
                let buffer = slot.sections.entry(section).or_default();
                if buffer.complete {
                    return Err(out_of_order(seq, "section ended twice"));
                }
                buffer.complete = true;
                if section == Section::Header {
                    let mut message = parse_header_block(&buffer.bytes, options.include_headers);
                    // Attributes may have arrived first.
                    if let Some(earlier) = slot.message.take() {
                        message.attachments = earlier.attachments;
                        message.body = earlier.body;
                    }
                    slot.message = Some(message);
                }
            }
            FetchEvent::Attributes { uid, structure, .. } => {
                expect_streaming(slot, seq)?;
                if options.include_attachments {
                    let attachments = enumerate_attachments(&structure);
                    let wanted = options.download.as_deref().and_then(|name| {
                        attachments.iter().find(|(_, att)| att.filename == name)
                    });
                    if let Some((part_id, attachment)) = wanted {
                        self.downloads.push(PendingDownload {
                            seq,
                            uid,
                            part_id: part_id.clone(),
                            attachment: attachment.clone(),
                        });
                    }
                    slot.message
                        .get_or_insert_with(empty_message)
                        .attachments = attachments.into_iter().map(|(_, att)| att).collect();
                }
                slot.structure = Some(structure);
            }
            FetchEvent::Finished { .. } => {
                expect_streaming(slot, seq)?;
                if slot.sections.values().any(|buffer| !buffer.complete) {
                    return Err(out_of_order(seq, "finished with an incomplete section"));
                }
                if options.include_body {
                    let text = slot
                        .sections
                        .remove(&Section::Text)
                        .map(|buffer| buffer.bytes)
                        .unwrap_or_default();
                    slot.message.get_or_insert_with(empty_message).body =
                        Some(normalize_body(&text, slot.structure.as_ref()));
                }
                slot.sections.clear();
                slot.state = SlotState::Finished;
            }
        }
        Ok(())
    }

    /// Closes the barrier and returns the assembled messages.
    ///
    /// Messages without a `Message-ID` are dropped here.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Command`] if a message started but never finished.
    pub fn finish(self) -> Result<Assembled> {
        let mut messages = Vec::new();
        for (index, slot) in self.slots.into_iter().enumerate() {
            match slot.state {
                SlotState::Empty => {}
                SlotState::Streaming => {
                    return Err(Error::Command(format!(
                        "fetch ended before message {} finished",
                        index + 1
                    )));
                }
                SlotState::Finished => match slot.message {
                    Some(message) if message.is_identified() => messages.push(message),
                    _ => tracing::warn!(seq = index + 1, "dropping message without Message-ID"),
                },
            }
        }
        Ok(Assembled {
            messages,
            downloads: self.downloads,
        })
    }
}

fn slot_mut(slots: &mut Vec<Slot>, seq: u32) -> Result<&mut Slot> {
    let index = usize::try_from(seq)
        .ok()
        .and_then(|seq| seq.checked_sub(1))
        .ok_or_else(|| Error::Command("sequence number 0 in fetch".to_string()))?;
    if index >= slots.len() {
        // The folder grew after it was opened.
        tracing::debug!(seq, total = slots.len(), "growing message slots");
        slots.resize_with(index + 1, Slot::default);
    }
    Ok(&mut slots[index])
}

fn expect_streaming(slot: &Slot, seq: u32) -> Result<()> {
    match slot.state {
        SlotState::Streaming => Ok(()),
        SlotState::Empty => Err(out_of_order(seq, "event before start")),
        SlotState::Finished => Err(out_of_order(seq, "event after finish")),
    }
}

fn out_of_order(seq: u32, what: &str) -> Error {
    Error::Command(format!("message {seq}: {what}"))
}

fn empty_message() -> EmailMessage {
    EmailMessage {
        msg_id: String::new(),
        date_sent: None,
        from: String::new(),
        to: UNKNOWN_RECIPIENT.to_string(),
        subject: UNKNOWN_SUBJECT.to_string(),
        body: None,
        headers: None,
        attachments: Vec::new(),
    }
}

/// Parses a complete header block into message fields.
///
/// Absent `To` and `Subject` get placeholders. An absent `From` or an
/// unparseable `Date` is logged and left empty.
#[must_use]
pub fn parse_header_block(raw: &[u8], include_headers: bool) -> EmailMessage {
    let headers = Headers::parse(raw);
    let msg_id = headers.get("message-id").unwrap_or_default().trim().to_string();

    let from = headers.get_decoded("from").unwrap_or_else(|| {
        tracing::warn!(msg_id = %msg_id, "message has no From header");
        String::new()
    });
    let date_sent = headers.get("date").and_then(|value| match parse_date(value) {
        Ok(instant) => Some(instant),
        Err(e) => {
            tracing::warn!(msg_id = %msg_id, error = %e, "unparseable Date header");
            None
        }
    });

    EmailMessage {
        date_sent,
        from,
        to: headers
            .get_decoded("to")
            .unwrap_or_else(|| UNKNOWN_RECIPIENT.to_string()),
        subject: headers
            .get_decoded("subject")
            .unwrap_or_else(|| UNKNOWN_SUBJECT.to_string()),
        body: None,
        headers: include_headers.then(|| headers.to_map()),
        attachments: Vec::new(),
        msg_id,
    }
}

/// Turns a text section into body text.
///
/// A single-part message is transfer-decoded and charset-decoded first.
/// Multipart text is kept as sent. Tags are stripped and the result trimmed.
#[must_use]
pub fn normalize_body(raw: &[u8], structure: Option<&BodyStructure>) -> String {
    let text = match structure {
        Some(BodyStructure::Single(part)) => {
            let decoded = TransferEncoding::parse(&part.encoding)
                .decode(raw)
                .unwrap_or_else(|e| {
                    tracing::warn!(error = %e, encoding = %part.encoding, "body left undecoded");
                    raw.to_vec()
                });
            decode_charset(part.param("charset").unwrap_or("utf-8"), &decoded)
        }
        _ => String::from_utf8_lossy(raw).into_owned(),
    };
    strip_tags(&text)
}

/// Removes anything that looks like a markup tag and trims the result.
#[must_use]
pub fn strip_tags(text: &str) -> String {
    TAG.replace_all(text, "").trim().to_string()
}

/// Lists attachments of a `multipart/mixed` message with their part ids.
///
/// Only direct children whose disposition is `attachment` count. Other
/// roots have no attachments.
#[must_use]
pub fn enumerate_attachments(structure: &BodyStructure) -> Vec<(String, EmailAttachment)> {
    if !structure.is_multipart("mixed") {
        return Vec::new();
    }
    structure
        .children()
        .into_iter()
        .filter_map(|(part_id, node)| {
            let BodyStructure::Single(part) = node else {
                return None;
            };
            let disposition = part.disposition.as_ref().filter(|d| d.is_attachment())?;
            let filename = disposition
                .param("filename")
                .or_else(|| part.param("name"))
                .map(decode_rfc2047)
                .unwrap_or_default();
            Some((
                part_id,
                EmailAttachment {
                    filename,
                    content_type: part.mime_type(),
                    encoding: part.encoding.clone(),
                    size: part.size,
                },
            ))
        })
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
pub(crate) mod tests {
    use bytes::Bytes;
    use postbox_imap::{Disposition, SinglePart};

    use super::*;

    pub(crate) fn leaf(mime: &str, encoding: &str, size: u32) -> SinglePart {
        let (media_type, media_subtype) = mime.split_once('/').unwrap();
        SinglePart {
            media_type: media_type.to_string(),
            media_subtype: media_subtype.to_string(),
            params: Vec::new(),
            id: None,
            description: None,
            encoding: encoding.to_string(),
            size,
            lines: None,
            disposition: None,
        }
    }

    pub(crate) fn attachment_part(filename: &str, mime: &str, encoding: &str, size: u32) -> BodyStructure {
        let mut part = leaf(mime, encoding, size);
        part.disposition = Some(Disposition {
            kind: "ATTACHMENT".to_string(),
            params: vec![("FILENAME".to_string(), filename.to_string())],
        });
        BodyStructure::Single(part)
    }

    pub(crate) fn mixed(parts: Vec<BodyStructure>) -> BodyStructure {
        BodyStructure::Multipart {
            subtype: "mixed".to_string(),
            parts,
            params: Vec::new(),
            disposition: None,
        }
    }

    fn chunk(seq: u32, section: Section, data: &'static [u8]) -> FetchEvent {
        FetchEvent::Chunk {
            seq,
            section,
            bytes: Bytes::from_static(data),
        }
    }

    fn all_options() -> AssemblyOptions {
        AssemblyOptions {
            include_body: true,
            include_headers: true,
            include_attachments: true,
            download: None,
        }
    }

    #[test]
    fn test_interleaved_messages() {
        let mut assembler = MessageAssembler::new(3, all_options());
        let text = BodyStructure::Single(leaf("text/plain", "7bit", 5));
        let events = vec![
            FetchEvent::Started { seq: 2 },
            FetchEvent::Started { seq: 1 },
            chunk(2, Section::Header, b"Message-ID: <two@x>\r\nFrom: b@x\r\nSubj"),
            chunk(1, Section::Header, b"Message-ID: <one@x>\r\nFrom: a@x\r\n"),
            chunk(2, Section::Header, b"ect: =?utf-8?B?SMOp?=\r\n\r\n"),
            FetchEvent::SectionEnd { seq: 1, section: Section::Header },
            chunk(1, Section::Text, b"<p>hello</p>\r\n"),
            FetchEvent::SectionEnd { seq: 2, section: Section::Header },
            FetchEvent::Attributes { seq: 1, uid: 11, structure: text.clone() },
            FetchEvent::SectionEnd { seq: 1, section: Section::Text },
            FetchEvent::Attributes { seq: 2, uid: 12, structure: text },
            FetchEvent::Finished { seq: 1 },
            FetchEvent::SectionEnd { seq: 2, section: Section::Text },
            FetchEvent::Finished { seq: 2 },
        ];
        for event in events {
            assembler.apply(event).unwrap();
        }

        let assembled = assembler.finish().unwrap();
        assert_eq!(assembled.messages.len(), 2);
        let first = &assembled.messages[0];
        assert_eq!(first.msg_id, "<one@x>");
        assert_eq!(first.body.as_deref(), Some("hello"));
        assert_eq!(first.subject, UNKNOWN_SUBJECT);
        assert_eq!(first.to, UNKNOWN_RECIPIENT);
        let second = &assembled.messages[1];
        assert_eq!(second.subject, "Hé");
        assert_eq!(second.body.as_deref(), Some(""));
        assert_eq!(second.headers.as_ref().unwrap()["from"], vec!["b@x"]);
    }

    #[test]
    fn test_unfinished_message_fails_barrier() {
        let mut assembler = MessageAssembler::new(1, AssemblyOptions::default());
        assembler.apply(FetchEvent::Started { seq: 1 }).unwrap();
        assert!(matches!(assembler.finish(), Err(Error::Command(_))));
    }

    #[test]
    fn test_out_of_order_events_rejected() {
        let mut assembler = MessageAssembler::new(1, AssemblyOptions::default());
        assert!(assembler.apply(chunk(1, Section::Header, b"x")).is_err());
        assembler.apply(FetchEvent::Started { seq: 1 }).unwrap();
        assert!(assembler.apply(FetchEvent::Started { seq: 1 }).is_err());
        assembler.apply(chunk(1, Section::Header, b"x")).unwrap();
        assert!(assembler.apply(FetchEvent::Finished { seq: 1 }).is_err());
    }

    #[test]
    fn test_missing_message_id_excluded() {
        let mut assembler = MessageAssembler::new(2, AssemblyOptions::default());
        for event in [
            FetchEvent::Started { seq: 1 },
            chunk(1, Section::Header, b"From: a@x\r\n\r\n"),
            FetchEvent::SectionEnd { seq: 1, section: Section::Header },
            FetchEvent::Finished { seq: 1 },
        ] {
            assembler.apply(event).unwrap();
        }
        assert!(assembler.finish().unwrap().messages.is_empty());
    }

    #[test]
    fn test_slots_grow_past_total() {
        let mut assembler = MessageAssembler::new(1, AssemblyOptions::default());
        for event in [
            FetchEvent::Started { seq: 3 },
            chunk(3, Section::Header, b"Message-ID: <late@x>\r\n"),
            FetchEvent::SectionEnd { seq: 3, section: Section::Header },
            FetchEvent::Finished { seq: 3 },
        ] {
            assembler.apply(event).unwrap();
        }
        assert_eq!(assembler.finish().unwrap().messages[0].msg_id, "<late@x>");
    }

    #[test]
    fn test_attachments_and_download() {
        let structure = mixed(vec![
            BodyStructure::Single(leaf("text/plain", "7bit", 10)),
            attachment_part("report.pdf", "application/pdf", "BASE64", 2048),
            attachment_part("photo.png", "image/png", "base64", 512),
        ]);
        let options = AssemblyOptions {
            include_attachments: true,
            download: Some("photo.png".to_string()),
            ..AssemblyOptions::default()
        };
        let mut assembler = MessageAssembler::new(1, options);
        for event in [
            FetchEvent::Started { seq: 1 },
            FetchEvent::Attributes { seq: 1, uid: 77, structure },
            chunk(1, Section::Header, b"Message-ID: <m@x>\r\n"),
            FetchEvent::SectionEnd { seq: 1, section: Section::Header },
            FetchEvent::Finished { seq: 1 },
        ] {
            assembler.apply(event).unwrap();
        }

        let assembled = assembler.finish().unwrap();
        let message = &assembled.messages[0];
        assert_eq!(message.msg_id, "<m@x>");
        assert_eq!(message.attachments.len(), 2);
        assert_eq!(message.attachments[0].filename, "report.pdf");
        assert_eq!(message.attachments[0].content_type, "application/pdf");
        assert_eq!(message.attachments[0].encoding, "BASE64");
        assert_eq!(message.attachments[0].size, 2048);
        assert_eq!(assembled.downloads.len(), 1);
        assert_eq!(assembled.downloads[0].uid, 77);
        assert_eq!(assembled.downloads[0].part_id, "3");
    }

    #[test]
    fn test_non_mixed_root_has_no_attachments() {
        let related = BodyStructure::Multipart {
            subtype: "related".to_string(),
            parts: vec![attachment_part("a.png", "image/png", "base64", 1)],
            params: Vec::new(),
            disposition: None,
        };
        assert!(enumerate_attachments(&related).is_empty());
    }

    #[test]
    fn test_filename_falls_back_to_content_type_name() {
        let mut part = leaf("text/csv", "7bit", 3);
        part.params = vec![("NAME".to_string(), "=?utf-8?Q?d=C3=A9j=C3=A0.csv?=".to_string())];
        part.disposition = Some(Disposition {
            kind: "attachment".to_string(),
            params: Vec::new(),
        });
        let structure = mixed(vec![
            BodyStructure::Single(leaf("text/plain", "7bit", 1)),
            BodyStructure::Single(part),
        ]);
        let found = enumerate_attachments(&structure);
        assert_eq!(found[0].0, "2");
        assert_eq!(found[0].1.filename, "déjà.csv");
    }

    #[test]
    fn test_single_part_body_is_decoded() {
        let part = leaf("text/html", "base64", 20);
        let body = normalize_body(
            b"PGI+SGk8L2I+IHRoZXJlCg==",
            Some(&BodyStructure::Single(part)),
        );
        assert_eq!(body, "Hi there");
    }

    #[test]
    fn test_strip_tags() {
        assert_eq!(strip_tags("  <div class=\"a\">x</div> <br/> y \n"), "x  y");
        assert_eq!(strip_tags("a < b"), "a < b");
    }

    #[test]
    fn test_header_placeholders_and_date() {
        let message = parse_header_block(
            b"Date: Tue, 2 Jan 2024 10:00:00 +0100\r\nMessage-ID:  <d@x> \r\n\r\n",
            false,
        );
        assert_eq!(message.msg_id, "<d@x>");
        assert_eq!(message.from, "");
        assert_eq!(message.to, UNKNOWN_RECIPIENT);
        assert_eq!(
            message.date_sent.unwrap().to_rfc3339(),
            "2024-01-02T09:00:00+00:00"
        );
        assert!(message.headers.is_none());
    }
}
