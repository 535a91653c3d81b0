//! Response data types.

use crate::types::{ListResponse, ResponseCode, SeqNum, Uid};

/// One FETCH data item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchItem {
    /// `UID n`
    Uid(Uid),
    /// `RFC822.SIZE n`
    Rfc822Size(u32),
    /// `BODY[section] data`
    Body {
        /// Section specifier, uppercased (`HEADER`, `TEXT`, `2`, ...).
        section: String,
        /// Section bytes, `None` for `NIL`.
        data: Option<Vec<u8>>,
    },
    /// `BODYSTRUCTURE (...)`
    BodyStructure(BodyStructure),
}

/// Content disposition as reported inside BODYSTRUCTURE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disposition {
    /// Disposition type as sent (`attachment`, `inline`, ...).
    pub kind: String,
    /// Disposition parameters, keys as sent.
    pub params: Vec<(String, String)>,
}

impl Disposition {
    /// True for `attachment`, in any case.
    #[must_use]
    pub fn is_attachment(&self) -> bool {
        self.kind.eq_ignore_ascii_case("attachment")
    }

    /// Looks up a parameter by case-insensitive name.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        find_param(&self.params, name)
    }
}

/// A non-multipart body part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinglePart {
    /// Media type, lowercased (`image`).
    pub media_type: String,
    /// Media subtype, lowercased (`png`).
    pub media_subtype: String,
    /// Content-Type parameters.
    pub params: Vec<(String, String)>,
    /// Content-ID.
    pub id: Option<String>,
    /// Content-Description.
    pub description: Option<String>,
    /// Content-Transfer-Encoding as sent.
    pub encoding: String,
    /// Size of the encoded part in octets.
    pub size: u32,
    /// Line count for `text/*` and `message/rfc822` parts.
    pub lines: Option<u32>,
    /// Content-Disposition, if present.
    pub disposition: Option<Disposition>,
}

impl SinglePart {
    /// Looks up a Content-Type parameter by case-insensitive name.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        find_param(&self.params, name)
    }

    /// `type/subtype`.
    #[must_use]
    pub fn mime_type(&self) -> String {
        format!("{}/{}", self.media_type, self.media_subtype)
    }
}

/// Parsed BODYSTRUCTURE tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyStructure {
    /// Leaf part.
    Single(SinglePart),
    /// Multipart container.
    Multipart {
        /// Multipart subtype, lowercased (`mixed`, `alternative`, ...).
        subtype: String,
        /// Child parts in order.
        parts: Vec<BodyStructure>,
        /// Content-Type parameters (boundary etc.).
        params: Vec<(String, String)>,
        /// Content-Disposition of the container, rarely present.
        disposition: Option<Disposition>,
    },
}

impl BodyStructure {
    /// True for a multipart container with the given subtype.
    #[must_use]
    pub fn is_multipart(&self, subtype: &str) -> bool {
        matches!(self, Self::Multipart { subtype: s, .. } if s.eq_ignore_ascii_case(subtype))
    }

    /// Direct children paired with their part ids (`1`, `2`, ...).
    ///
    /// A leaf root is its own part `1`.
    #[must_use]
    pub fn children(&self) -> Vec<(String, &Self)> {
        self.children_under("")
    }

    /// Direct children with ids nested below `prefix` (`prefix.1`, ...).
    #[must_use]
    pub fn children_under(&self, prefix: &str) -> Vec<(String, &Self)> {
        match self {
            Self::Single(_) => vec![(join_part_id(prefix, 1), self)],
            Self::Multipart { parts, .. } => parts
                .iter()
                .enumerate()
                .map(|(i, part)| (join_part_id(prefix, i + 1), part))
                .collect(),
        }
    }

    /// Finds the part with the given dotted id.
    #[must_use]
    pub fn part(&self, id: &str) -> Option<&Self> {
        let mut current = self;
        for segment in id.split('.') {
            let index: usize = segment.parse().ok()?;
            current = match current {
                Self::Multipart { parts, .. } => parts.get(index.checked_sub(1)?)?,
                Self::Single(_) if index == 1 => current,
                Self::Single(_) => return None,
            };
        }
        Some(current)
    }
}

fn join_part_id(prefix: &str, index: usize) -> String {
    if prefix.is_empty() {
        index.to_string()
    } else {
        format!("{prefix}.{index}")
    }
}

fn find_param<'a>(params: &'a [(String, String)], name: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// Untagged server data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UntaggedResponse {
    /// `* OK`
    Ok {
        /// Optional response code.
        code: Option<ResponseCode>,
        /// Human-readable text.
        text: String,
    },
    /// `* NO`
    No {
        /// Optional response code.
        code: Option<ResponseCode>,
        /// Human-readable text.
        text: String,
    },
    /// `* BAD`
    Bad {
        /// Optional response code.
        code: Option<ResponseCode>,
        /// Human-readable text.
        text: String,
    },
    /// `* PREAUTH`
    PreAuth {
        /// Optional response code.
        code: Option<ResponseCode>,
        /// Human-readable text.
        text: String,
    },
    /// `* BYE`
    Bye {
        /// Optional response code.
        code: Option<ResponseCode>,
        /// Human-readable text.
        text: String,
    },
    /// `* CAPABILITY ...`
    Capability(Vec<String>),
    /// `* LIST ...`
    List(ListResponse),
    /// `* SEARCH n n ...`
    Search(Vec<u32>),
    /// `* n EXISTS`
    Exists(u32),
    /// `* n RECENT`
    Recent(u32),
    /// `* n EXPUNGE`
    Expunge(u32),
    /// `* n FETCH (...)`
    Fetch {
        /// Sequence number of the message.
        seq: SeqNum,
        /// Returned data items.
        items: Vec<FetchItem>,
    },
    /// Data this client does not interpret (`FLAGS`, `STATUS`, ...).
    Other(String),
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

    fn leaf(media_type: &str, subtype: &str) -> BodyStructure {
        BodyStructure::Single(SinglePart {
            media_type: media_type.into(),
            media_subtype: subtype.into(),
            params: vec![("NAME".into(), "a.png".into())],
            id: None,
            description: None,
            encoding: "BASE64".into(),
            size: 10,
            lines: None,
            disposition: None,
        })
    }

    #[test]
    fn test_children_ids() {
        let root = BodyStructure::Multipart {
            subtype: "mixed".into(),
            parts: vec![leaf("text", "plain"), leaf("image", "png")],
            params: vec![],
            disposition: None,
        };
        let ids: Vec<String> = root.children().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["1", "2"]);
        assert!(root.is_multipart("MIXED"));
    }

    #[test]
    fn test_part_lookup() {
        let nested = BodyStructure::Multipart {
            subtype: "alternative".into(),
            parts: vec![leaf("text", "plain"), leaf("text", "html")],
            params: vec![],
            disposition: None,
        };
        let root = BodyStructure::Multipart {
            subtype: "mixed".into(),
            parts: vec![nested, leaf("image", "png")],
            params: vec![],
            disposition: None,
        };
        assert!(matches!(root.part("1.2"), Some(BodyStructure::Single(p)) if p.media_subtype == "html"));
        assert!(root.part("3").is_none());
        assert!(root.part("0").is_none());
    }

    #[test]
    fn test_param_lookup_is_case_insensitive() {
        let BodyStructure::Single(part) = leaf("image", "png") else {
            panic!("expected leaf");
        };
        assert_eq!(part.param("name"), Some("a.png"));
        assert_eq!(part.mime_type(), "image/png");

        let disposition = Disposition {
            kind: "ATTACHMENT".into(),
            params: vec![("FILENAME".into(), "r.pdf".into())],
        };
        assert!(disposition.is_attachment());
        assert_eq!(disposition.param("filename"), Some("r.pdf"));
    }
}
