//! Commands valid after login.

use tokio::io::{AsyncRead, AsyncWrite};

use super::Client;
use super::states::{Authenticated, Selected};
use crate::Result;
use crate::command::Command;
use crate::parser::{Response, ResponseParser, UntaggedResponse};
use crate::types::{ListResponse, Mailbox, MailboxStatus, ResponseCode};

impl<S> Client<S, Authenticated>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Opens a mailbox read-write.
    pub async fn select(mut self, mailbox: &str) -> Result<(Client<S, Selected>, MailboxStatus)> {
        let responses = self
            .execute(&Command::Select {
                mailbox: Mailbox::new(mailbox),
            })
            .await?;
        let status = parse_mailbox_status(&responses);
        Ok((self.transition(), status))
    }

    /// Opens a mailbox read-only.
    pub async fn examine(mut self, mailbox: &str) -> Result<(Client<S, Selected>, MailboxStatus)> {
        let responses = self
            .execute(&Command::Examine {
                mailbox: Mailbox::new(mailbox),
            })
            .await?;
        let status = parse_mailbox_status(&responses);
        Ok((self.transition(), status))
    }

    /// Lists mailboxes matching `pattern` under `reference`.
    pub async fn list(&mut self, reference: &str, pattern: &str) -> Result<Vec<ListResponse>> {
        let responses = self
            .execute(&Command::List {
                reference: reference.to_string(),
                pattern: pattern.to_string(),
            })
            .await?;

        Ok(responses
            .iter()
            .filter_map(|bytes| match ResponseParser::parse(bytes) {
                Ok(Response::Untagged(UntaggedResponse::List(entry))) => Some(entry),
                _ => None,
            })
            .collect())
    }
}

/// Folds SELECT/EXAMINE data into a status summary.
fn parse_mailbox_status(responses: &[Vec<u8>]) -> MailboxStatus {
    let mut status = MailboxStatus::default();

    for bytes in responses {
        match ResponseParser::parse(bytes) {
            Ok(Response::Untagged(UntaggedResponse::Exists(n))) => status.exists = n,
            Ok(Response::Untagged(UntaggedResponse::Recent(n))) => status.recent = n,
            Ok(
                Response::Untagged(UntaggedResponse::Ok { code: Some(code), .. })
                | Response::Tagged { code: Some(code), .. },
            ) => match code {
                ResponseCode::UidValidity(v) => status.uid_validity = Some(v),
                ResponseCode::UidNext(v) => status.uid_next = Some(v),
                ResponseCode::ReadOnly => status.read_only = true,
                _ => {}
            },
            _ => {}
        }
    }

    status
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
    use tokio_test::io::Builder;

    use super::*;
    use crate::Error;
    use crate::connection::client::NotAuthenticated;

    async fn logged_in(mock: tokio_test::io::Mock) -> Client<tokio_test::io::Mock, Authenticated> {
        let client: Client<_, NotAuthenticated> = Client::from_stream(mock).await.unwrap();
        client.login("u", "p").await.unwrap()
    }

    fn script() -> Builder {
        let mut builder = Builder::new();
        builder
            .read(b"* OK ready\r\n")
            .write(b"A0001 LOGIN u p\r\n")
            .read(b"A0001 OK logged in\r\n");
        builder
    }

    #[tokio::test]
    async fn test_list_folders() {
        let mock = script()
            .write(b"A0002 LIST \"\" \"*\"\r\n")
            .read(b"* LIST (\\HasNoChildren) \"/\" \"INBOX\"\r\n")
            .read(b"* LIST (\\HasChildren \\Noselect) \"/\" \"[Gmail]\"\r\n")
            .read(b"* LIST (\\HasNoChildren \\Sent) \"/\" \"[Gmail]/Sent Mail\"\r\n")
            .read(b"A0002 OK Success\r\n")
            .build();
        let mut client = logged_in(mock).await;

        let folders = client.list("", "*").await.unwrap();
        let names: Vec<&str> = folders.iter().map(|f| f.mailbox.as_str()).collect();
        assert_eq!(names, vec!["INBOX", "[Gmail]", "[Gmail]/Sent Mail"]);
    }

    #[tokio::test]
    async fn test_select_reads_status() {
        let mock = script()
            .write(b"A0002 SELECT INBOX\r\n")
            .read(b"* FLAGS (\\Answered \\Flagged \\Seen)\r\n")
            .read(b"* 3 EXISTS\r\n")
            .read(b"* 0 RECENT\r\n")
            .read(b"* OK [UIDVALIDITY 14] UIDs valid\r\n")
            .read(b"* OK [UIDNEXT 40] Predicted next UID\r\n")
            .read(b"A0002 OK [READ-WRITE] INBOX selected\r\n")
            .build();
        let client = logged_in(mock).await;

        let (_selected, status) = client.select("INBOX").await.unwrap();
        assert_eq!(status.exists, 3);
        assert_eq!(status.uid_validity, Some(14));
        assert_eq!(status.uid_next, Some(40));
        assert!(!status.read_only);
    }

    #[tokio::test]
    async fn test_examine_missing_folder() {
        let mock = script()
            .write(b"A0002 EXAMINE Nope\r\n")
            .read(b"A0002 NO [NONEXISTENT] Unknown Mailbox: Nope\r\n")
            .build();
        let client = logged_in(mock).await;

        let err = client.examine("Nope").await.unwrap_err();
        assert!(matches!(err, Error::No(_)));
    }
}
