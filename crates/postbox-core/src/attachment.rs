//! Streaming an attachment part from the session to a file.

use std::path::{Path, PathBuf};

use postbox_mime::Base64Decoder;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};

use crate::error::Result;
use crate::parser::PendingDownload;
use crate::session::MailSession;
use crate::staging::sanitize_filename;

/// An attachment decoded to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedAttachment {
    /// Attachment file name.
    pub filename: String,
    /// Where the decoded bytes are.
    pub path: PathBuf,
    /// `type/subtype`.
    pub content_type: String,
    /// Decoded size.
    pub bytes: u64,
}

/// Streams the part described by `pending` into `dir`.
///
/// Base64 parts are decoded on the way. Other encodings are written as
/// fetched. The result is only returned after the file has been flushed.
/// A partial file is removed on failure.
///
/// # Errors
///
/// Returns the session's error, or [`crate::Error::Io`] if the file cannot
/// be written.
pub async fn stream_attachment<S: MailSession>(
    session: &mut S,
    pending: &PendingDownload,
    dir: &Path,
) -> Result<StagedAttachment> {
    let attachment = &pending.attachment;
    let filename = sanitize_filename(&attachment.filename)?;
    let path = dir.join(&filename);

    let written = write_part(session, pending, &path).await;
    let bytes = match written {
        Ok(bytes) => bytes,
        Err(e) => {
            if let Err(cleanup) = tokio::fs::remove_file(&path).await {
                tracing::warn!(path = %path.display(), error = %cleanup, "failed to remove partial attachment");
            }
            return Err(e);
        }
    };

    tracing::debug!(
        uid = pending.uid,
        part = %pending.part_id,
        filename = %filename,
        bytes,
        "attachment staged"
    );
    Ok(StagedAttachment {
        filename: attachment.filename.clone(),
        path,
        content_type: attachment.content_type.clone(),
        bytes,
    })
}

async fn write_part<S: MailSession>(
    session: &mut S,
    pending: &PendingDownload,
    path: &Path,
) -> Result<u64> {
    let writer = BufWriter::new(File::create(path).await?);

    if pending.attachment.encoding.eq_ignore_ascii_case("base64") {
        let mut decoder = Base64Decoder::new(writer);
        session
            .fetch_part(pending.uid, &pending.part_id, &mut decoder)
            .await?;
        decoder.shutdown().await?;
        Ok(decoder.decoded_len())
    } else {
        let mut writer = writer;
        let bytes = session
            .fetch_part(pending.uid, &pending.part_id, &mut writer)
            .await?;
        writer.shutdown().await?;
        Ok(bytes)
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
    use super::*;
    use crate::message::EmailAttachment;
    use crate::session::SessionConnector;
    use crate::testing::{FakeConnector, FakeMessage};

    fn pending(filename: &str, encoding: &str) -> PendingDownload {
        PendingDownload {
            seq: 1,
            uid: 1,
            part_id: "2".to_string(),
            attachment: EmailAttachment {
                filename: filename.to_string(),
                content_type: "text/plain".to_string(),
                encoding: encoding.to_string(),
                size: 0,
            },
        }
    }

    async fn session_with_part(data: &'static [u8]) -> <FakeConnector as SessionConnector>::Session {
        FakeConnector::default()
            .with_messages(vec![
                FakeMessage::new(1, "Message-ID: <a@x>\r\n\r\n").with_part("2", data),
            ])
            .connect()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_base64_part_is_decoded() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session_with_part(b"aGVsbG8g\r\nd29ybGQ=\r\n").await;
        let staged = stream_attachment(&mut session, &pending("a.txt", "BASE64"), dir.path())
            .await
            .unwrap();
        assert_eq!(staged.bytes, 11);
        assert_eq!(tokio::fs::read(&staged.path).await.unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn test_other_encodings_pass_through() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session_with_part(b"plain=20text").await;
        let staged = stream_attachment(
            &mut session,
            &pending("../escape.txt", "quoted-printable"),
            dir.path(),
        )
        .await
        .unwrap();
        assert_eq!(staged.path, dir.path().join("escape.txt"));
        assert_eq!(tokio::fs::read(&staged.path).await.unwrap(), b"plain=20text");
    }

    #[tokio::test]
    async fn test_failed_fetch_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session_with_part(b"").await;
        let mut missing = pending("gone.txt", "base64");
        missing.part_id = "9".to_string();
        assert!(stream_attachment(&mut session, &missing, dir.path()).await.is_err());
        assert!(!dir.path().join("gone.txt").exists());
    }
}
