//! Normalized message records returned to callers.

use std::cmp::Reverse;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Placeholder for a message without a `To` header.
pub const UNKNOWN_RECIPIENT: &str = "unknown sender";

/// Placeholder for a message without a `Subject` header.
pub const UNKNOWN_SUBJECT: &str = "unknown subject";

/// A message as returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailMessage {
    /// `Message-ID` header; the identity key. Empty means malformed.
    #[serde(rename = "msgID")]
    pub msg_id: String,
    /// Sent date as an absolute instant.
    pub date_sent: Option<DateTime<Utc>>,
    /// `From` header.
    pub from: String,
    /// `To` header.
    pub to: String,
    /// `Subject` header.
    pub subject: String,
    /// Body text with markup stripped, when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Raw header map, lowercased names to every value, when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, Vec<String>>>,
    /// Attachments in structure order.
    pub attachments: Vec<EmailAttachment>,
}

impl EmailMessage {
    /// True when the message has a usable identity key.
    #[must_use]
    pub fn is_identified(&self) -> bool {
        !self.msg_id.trim().is_empty()
    }

    /// First attachment with the given file name.
    #[must_use]
    pub fn attachment(&self, filename: &str) -> Option<&EmailAttachment> {
        self.attachments.iter().find(|att| att.filename == filename)
    }
}

/// Attachment metadata from the message structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmailAttachment {
    /// File name from the disposition, or the content-type name.
    pub filename: String,
    /// `type/subtype`.
    #[serde(rename = "type")]
    pub content_type: String,
    /// Transfer encoding as declared.
    pub encoding: String,
    /// Declared (encoded) size in bytes.
    pub size: u32,
}

/// Sorts by sent date and keeps at most `limit` messages.
///
/// Ascending unless `reverse`; messages without a date sort as the
/// earliest. The sort is stable, so equal dates keep fetch order.
#[must_use]
pub fn sort_and_limit(
    mut messages: Vec<EmailMessage>,
    reverse: bool,
    limit: Option<usize>,
) -> Vec<EmailMessage> {
    if reverse {
        messages.sort_by_key(|msg| Reverse(msg.date_sent));
    } else {
        messages.sort_by_key(|msg| msg.date_sent);
    }
    if let Some(limit) = limit {
        messages.truncate(limit);
    }
    messages
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
    use chrono::TimeZone;
    use proptest::prelude::*;

    use super::*;

    fn message(id: &str, ts: Option<i64>) -> EmailMessage {
        EmailMessage {
            msg_id: id.to_string(),
            date_sent: ts.map(|secs| Utc.timestamp_opt(secs, 0).unwrap()),
            from: "a@example.com".to_string(),
            to: UNKNOWN_RECIPIENT.to_string(),
            subject: UNKNOWN_SUBJECT.to_string(),
            body: None,
            headers: None,
            attachments: Vec::new(),
        }
    }

    #[test]
    fn test_serialized_shape() {
        let mut msg = message("<1@example.com>", Some(1_704_067_200));
        msg.attachments.push(EmailAttachment {
            filename: "a.pdf".into(),
            content_type: "application/pdf".into(),
            encoding: "base64".into(),
            size: 120,
        });
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["msgID"], "<1@example.com>");
        assert_eq!(json["dateSent"], "2024-01-01T00:00:00Z");
        assert_eq!(json["attachments"][0]["type"], "application/pdf");
        assert!(json.get("body").is_none());
        assert!(json.get("headers").is_none());
    }

    #[test]
    fn test_three_messages_newest_two() {
        let day = 86_400;
        let messages = vec![
            message("jan1", Some(1_704_067_200)),
            message("jan2", Some(1_704_067_200 + day)),
            message("jan3", Some(1_704_067_200 + 2 * day)),
        ];
        let ids: Vec<String> = sort_and_limit(messages, true, Some(2))
            .into_iter()
            .map(|m| m.msg_id)
            .collect();
        assert_eq!(ids, vec!["jan3", "jan2"]);
    }

    #[test]
    fn test_first_attachment_wins() {
        let mut msg = message("x", None);
        for size in [1, 2] {
            msg.attachments.push(EmailAttachment {
                filename: "dup.txt".into(),
                content_type: "text/plain".into(),
                encoding: "7bit".into(),
                size,
            });
        }
        assert_eq!(msg.attachment("dup.txt").unwrap().size, 1);
        assert!(msg.attachment("other.txt").is_none());
    }

    proptest! {
        #[test]
        fn prop_sorted_by_date(
            stamps in proptest::collection::vec(proptest::option::of(0i64..2_000_000_000), 0..30),
            reverse in any::<bool>(),
        ) {
            let messages: Vec<EmailMessage> = stamps
                .iter()
                .enumerate()
                .map(|(i, ts)| message(&i.to_string(), *ts))
                .collect();
            let sorted = sort_and_limit(messages, reverse, None);
            for pair in sorted.windows(2) {
                if reverse {
                    prop_assert!(pair[0].date_sent >= pair[1].date_sent);
                } else {
                    prop_assert!(pair[0].date_sent <= pair[1].date_sent);
                }
            }
        }

        #[test]
        fn prop_limit_keeps_sorted_prefix(
            stamps in proptest::collection::vec(0i64..2_000_000_000, 0..30),
            limit in 0usize..40,
            reverse in any::<bool>(),
        ) {
            let messages: Vec<EmailMessage> = stamps
                .iter()
                .enumerate()
                .map(|(i, ts)| message(&i.to_string(), Some(*ts)))
                .collect();
            let full = sort_and_limit(messages.clone(), reverse, None);
            let limited = sort_and_limit(messages, reverse, Some(limit));
            prop_assert_eq!(limited.len(), limit.min(full.len()));
            prop_assert_eq!(&limited[..], &full[..limited.len()]);
        }
    }
}
