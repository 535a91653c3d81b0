//! Integration tests for the IMAP client.
//!
//! A mock stream replays canned server output, so a whole session runs
//! without a real server.

#![allow(clippy::unwrap_used)]

use std::io::{self, Cursor};
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use postbox_imap::{
    BodyStructure, Client, FetchAttribute, FetchItem, MailboxAttribute, Response, ResponseParser,
    SearchKey, SequenceSet, Uid, UntaggedResponse,
};

/// Mock stream that returns predefined responses.
struct MockStream {
    responses: Cursor<Vec<u8>>,
    sent: Vec<u8>,
}

impl MockStream {
    fn new(responses: &[u8]) -> Self {
        Self {
            responses: Cursor::new(responses.to_vec()),
            sent: Vec::new(),
        }
    }
}

impl AsyncRead for MockStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let data = self.responses.get_ref();
        let pos = usize::try_from(self.responses.position()).unwrap();

        if pos >= data.len() {
            return Poll::Ready(Ok(()));
        }

        let remaining = &data[pos..];
        let to_read = remaining.len().min(buf.remaining());
        buf.put_slice(&remaining[..to_read]);
        self.responses.set_position((pos + to_read) as u64);

        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for MockStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.sent.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[test]
fn test_parser_exists() {
    let parsed = ResponseParser::parse(b"* 23 EXISTS\r\n").unwrap();
    assert_eq!(parsed, Response::Untagged(UntaggedResponse::Exists(23)));
}

#[test]
fn test_parser_list_response() {
    let parsed = ResponseParser::parse(b"* LIST (\\HasNoChildren) \"/\" \"INBOX\"\r\n").unwrap();
    match parsed {
        Response::Untagged(UntaggedResponse::List(list)) => {
            assert_eq!(list.mailbox.as_str(), "INBOX");
            assert_eq!(list.delimiter, Some('/'));
            assert_eq!(list.attributes, vec![MailboxAttribute::HasNoChildren]);
        }
        other => panic!("expected LIST response, got {other:?}"),
    }
}

#[test]
fn test_parser_tagged_ok() {
    match ResponseParser::parse(b"A001 OK LOGIN completed\r\n").unwrap() {
        Response::Tagged { tag, text, .. } => {
            assert_eq!(tag.as_str(), "A001");
            assert!(text.contains("LOGIN"));
        }
        other => panic!("expected tagged response, got {other:?}"),
    }
}

#[tokio::test]
async fn test_full_session() {
    let script = b"* OK IMAP4rev1 Service Ready\r\n\
        A0001 OK [CAPABILITY IMAP4rev1 IDLE] LOGIN completed\r\n\
        * LIST (\\HasChildren) \"/\" \"Work\"\r\n\
        * LIST (\\HasNoChildren) \"/\" \"Work/Reports\"\r\n\
        A0002 OK LIST completed\r\n\
        * 2 EXISTS\r\n\
        * OK [UIDVALIDITY 3] UIDs valid\r\n\
        A0003 OK [READ-ONLY] EXAMINE completed\r\n\
        * SEARCH 1 2\r\n\
        A0004 OK SEARCH completed\r\n\
        * 1 FETCH (UID 41 BODYSTRUCTURE (\"TEXT\" \"PLAIN\" (\"CHARSET\" \"utf-8\") NIL NIL \"7BIT\" 5 1 NIL NIL NIL NIL))\r\n\
        * 2 FETCH (UID 42 BODY[TEXT] {5}\r\nhello)\r\n\
        A0005 OK FETCH completed\r\n\
        * 2 FETCH (UID 42 BODY[1] {3}\r\nabc)\r\n\
        A0006 OK FETCH completed\r\n\
        * BYE logging out\r\n\
        A0007 OK LOGOUT completed\r\n";

    let client = Client::from_stream(MockStream::new(script)).await.unwrap();
    let mut client = client.login("user", "secret").await.unwrap();
    assert!(client.capabilities().iter().any(|c| c == "IDLE"));

    let folders = client.list("", "*").await.unwrap();
    assert_eq!(folders.len(), 2);
    assert_eq!(folders[1].segments(), vec!["Work", "Reports"]);

    let (mut client, status) = client.examine("INBOX").await.unwrap();
    assert_eq!(status.exists, 2);
    assert!(status.read_only);

    let ids = client.search(&[SearchKey::All]).await.unwrap();
    assert_eq!(ids, vec![1, 2]);

    let messages = client
        .fetch(
            &SequenceSet::from_numbers(&ids),
            vec![FetchAttribute::Uid, FetchAttribute::BodyStructure],
        )
        .await
        .unwrap();
    assert_eq!(messages.len(), 2);
    assert!(matches!(
        &messages[0].1[1],
        FetchItem::BodyStructure(BodyStructure::Single(part)) if part.mime_type() == "text/plain"
    ));
    assert!(matches!(
        &messages[1].1[1],
        FetchItem::Body { section, data: Some(data) } if section == "TEXT" && data == b"hello"
    ));

    let mut sink = Vec::new();
    client
        .uid_fetch_part_into(Uid::new(42).unwrap(), "1", &mut sink)
        .await
        .unwrap();
    assert_eq!(sink, b"abc");

    client.logout().await.unwrap();
}
