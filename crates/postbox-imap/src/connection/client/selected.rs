//! Commands valid with a mailbox open.

use tokio::io::{AsyncRead, AsyncWrite};

use super::states::Selected;
use super::{Client, status_to_result};
use crate::command::{Command, FetchAttribute, SearchKey};
use crate::connection::framed::{is_tagged_line, parse_literal_length};
use crate::parser::{FetchItem, Response, ResponseParser, UntaggedResponse};
use crate::types::{SeqNum, SequenceSet, Uid};
use crate::{Error, Result};

impl<S> Client<S, Selected>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Runs SEARCH and returns matching sequence numbers.
    pub async fn search(&mut self, keys: &[SearchKey]) -> Result<Vec<u32>> {
        let responses = self
            .execute(&Command::Search {
                keys: keys.to_vec(),
            })
            .await?;

        let mut results = Vec::new();
        for bytes in &responses {
            if let Ok(Response::Untagged(UntaggedResponse::Search(ids))) =
                ResponseParser::parse(bytes)
            {
                results.extend(ids);
            }
        }
        Ok(results)
    }

    /// Fetches and collects all results.
    pub async fn fetch(
        &mut self,
        sequence: &SequenceSet,
        items: Vec<FetchAttribute>,
    ) -> Result<Vec<(SeqNum, Vec<FetchItem>)>> {
        let mut stream = self.fetch_stream(sequence, items).await?;
        let mut results = Vec::new();
        while let Some(message) = stream.next().await? {
            results.push(message);
        }
        Ok(results)
    }

    /// Starts a FETCH and yields messages one at a time as they arrive.
    pub async fn fetch_stream(
        &mut self,
        sequence: &SequenceSet,
        items: Vec<FetchAttribute>,
    ) -> Result<FetchStream<'_, S>> {
        let tag = self
            .send(&Command::Fetch {
                sequence: sequence.clone(),
                items,
                uid: false,
            })
            .await?;
        Ok(FetchStream {
            client: self,
            tag,
            done: false,
        })
    }

    /// Streams one body section of the message with `uid` into `sink`.
    ///
    /// The section's literal is copied straight from the socket, so memory
    /// use does not grow with the part size. Returns the number of bytes
    /// written.
    pub async fn uid_fetch_part_into<W>(
        &mut self,
        uid: Uid,
        section: &str,
        sink: &mut W,
    ) -> Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let tag = self
            .send(&Command::Fetch {
                sequence: SequenceSet::single(uid.get()),
                items: vec![FetchAttribute::BodyPeek(section.to_string())],
                uid: true,
            })
            .await?;

        let marker = format!("BODY[{}]", section.to_ascii_uppercase());
        let mut written = None;

        loop {
            let line = self.stream.read_line().await?;

            if is_tagged_line(&line, &tag) {
                match ResponseParser::parse(&line)? {
                    Response::Tagged { status, text, .. } => status_to_result(status, text)?,
                    other => return Err(Error::Protocol(format!("unexpected completion: {other:?}"))),
                }
                break;
            }

            let carries_section = written.is_none()
                && line.starts_with(b"* ")
                && contains_ignore_case(&line, marker.as_bytes());

            match parse_literal_length(&line) {
                Some(len) if carries_section => {
                    written = Some(self.stream.stream_literal(len, sink).await?);
                }
                Some(len) => {
                    self.stream.read_literal(len).await?;
                }
                None if carries_section => {
                    // Small sections may come back as a quoted string or NIL.
                    if let Ok(Response::Untagged(UntaggedResponse::Fetch { items, .. })) =
                        ResponseParser::parse(&line)
                    {
                        let data = items.into_iter().find_map(|item| match item {
                            FetchItem::Body { data, .. } => Some(data.unwrap_or_default()),
                            _ => None,
                        });
                        if let Some(data) = data {
                            tokio::io::AsyncWriteExt::write_all(sink, &data).await?;
                            written = Some(data.len() as u64);
                        }
                    }
                }
                None => {}
            }
        }

        written.ok_or_else(|| {
            Error::Protocol(format!("server returned no data for UID {uid} section {section}"))
        })
    }
}

fn contains_ignore_case(haystack: &[u8], needle: &[u8]) -> bool {
    haystack
        .windows(needle.len())
        .any(|window| window.eq_ignore_ascii_case(needle))
}

/// Messages of an in-flight FETCH, read one response at a time.
pub struct FetchStream<'a, S> {
    client: &'a mut Client<S, Selected>,
    tag: String,
    done: bool,
}

impl<S> FetchStream<'_, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Returns the next fetched message, or `None` once the command completed.
    ///
    /// Unsolicited responses in between are skipped.
    pub async fn next(&mut self) -> Result<Option<(SeqNum, Vec<FetchItem>)>> {
        while !self.done {
            let bytes = self.client.stream.read_response().await?;
            match ResponseParser::parse(&bytes)? {
                Response::Untagged(UntaggedResponse::Fetch { seq, items }) => {
                    return Ok(Some((seq, items)));
                }
                Response::Tagged {
                    tag, status, text, ..
                } if tag.as_str() == self.tag => {
                    self.done = true;
                    status_to_result(status, text)?;
                }
                Response::Untagged(UntaggedResponse::Bye { text, .. }) => {
                    self.done = true;
                    return Err(Error::Bye(text));
                }
                _ => {}
            }
        }
        Ok(None)
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
    use crate::connection::client::NotAuthenticated;

    fn script() -> Builder {
        let mut builder = Builder::new();
        builder
            .read(b"* OK ready\r\n")
            .write(b"A0001 LOGIN u p\r\n")
            .read(b"A0001 OK logged in\r\n")
            .write(b"A0002 SELECT INBOX\r\n")
            .read(b"* 2 EXISTS\r\n")
            .read(b"A0002 OK selected\r\n");
        builder
    }

    async fn selected(mock: Mock) -> Client<Mock, Selected> {
        let client: Client<_, NotAuthenticated> = Client::from_stream(mock).await.unwrap();
        let client = client.login("u", "p").await.unwrap();
        client.select("INBOX").await.unwrap().0
    }

    #[tokio::test]
    async fn test_search() {
        let mock = script()
            .write(b"A0003 SEARCH ALL HEADER \"message-id\" \"<a@b>\"\r\n")
            .read(b"* SEARCH 2\r\n")
            .read(b"A0003 OK SEARCH completed\r\n")
            .build();
        let mut client = selected(mock).await;

        let keys = [
            SearchKey::All,
            SearchKey::Header("message-id".into(), "<a@b>".into()),
        ];
        assert_eq!(client.search(&keys).await.unwrap(), vec![2]);
    }

    #[tokio::test]
    async fn test_search_failure() {
        let mock = script()
            .write(b"A0003 SEARCH ALL\r\n")
            .read(b"A0003 BAD Could not parse command\r\n")
            .build();
        let mut client = selected(mock).await;
        let err = client.search(&[SearchKey::All]).await.unwrap_err();
        assert!(matches!(err, Error::Bad(_)));
    }

    #[tokio::test]
    async fn test_fetch_stream_yields_each_message() {
        let mock = script()
            .write(b"A0003 FETCH 1:2 (UID BODY.PEEK[HEADER])\r\n")
            .read(b"* 1 FETCH (UID 10 BODY[HEADER] {5}\r\n")
            .read(b"a\r\n\r\n)\r\n")
            .read(b"* 1 EXPUNGE\r\n")
            .read(b"* 2 FETCH (UID 11 BODY[HEADER] {5}\r\nb\r\n\r\n)\r\n")
            .read(b"A0003 OK FETCH completed\r\n")
            .build();
        let mut client = selected(mock).await;

        let items = vec![FetchAttribute::Uid, FetchAttribute::BodyPeek("HEADER".into())];
        let mut stream = client
            .fetch_stream(&SequenceSet::from_numbers(&[1, 2]), items)
            .await
            .unwrap();

        let (seq, first) = stream.next().await.unwrap().unwrap();
        assert_eq!(seq.get(), 1);
        assert_eq!(first[0], FetchItem::Uid(Uid::new(10).unwrap()));
        let (seq, _) = stream.next().await.unwrap().unwrap();
        assert_eq!(seq.get(), 2);
        assert!(stream.next().await.unwrap().is_none());
        assert!(stream.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_uid_fetch_part_streams_literal() {
        let mock = script()
            .write(b"A0003 UID FETCH 77 (BODY.PEEK[2])\r\n")
            .read(b"* 1 FETCH (UID 77 BODY[2] {12}\r\n")
            .read(b"aGVsbG8g")
            .read(b"d29y")
            .read(b")\r\n")
            .read(b"A0003 OK Success\r\n")
            .build();
        let mut client = selected(mock).await;

        let mut sink = Vec::new();
        let written = client
            .uid_fetch_part_into(Uid::new(77).unwrap(), "2", &mut sink)
            .await
            .unwrap();
        assert_eq!(written, 12);
        assert_eq!(sink, b"aGVsbG8gd29y");
    }

    #[tokio::test]
    async fn test_uid_fetch_part_quoted() {
        let mock = script()
            .write(b"A0003 UID FETCH 5 (BODY.PEEK[1.2])\r\n")
            .read(b"* 1 FETCH (BODY[1.2] \"hi\" UID 5)\r\n")
            .read(b"A0003 OK Success\r\n")
            .build();
        let mut client = selected(mock).await;

        let mut sink = Vec::new();
        let written = client
            .uid_fetch_part_into(Uid::new(5).unwrap(), "1.2", &mut sink)
            .await
            .unwrap();
        assert_eq!(written, 2);
        assert_eq!(sink, b"hi");
    }

    #[tokio::test]
    async fn test_uid_fetch_part_missing() {
        let mock = script()
            .write(b"A0003 UID FETCH 5 (BODY.PEEK[3])\r\n")
            .read(b"A0003 OK Success\r\n")
            .build();
        let mut client = selected(mock).await;

        let mut sink = Vec::new();
        let err = client
            .uid_fetch_part_into(Uid::new(5).unwrap(), "3", &mut sink)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }
}
