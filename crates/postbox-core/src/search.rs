//! Search criteria and the term sequence they translate to.
//!
//! [`build_search_terms`] is pure: it only orders the filters of a
//! [`SearchCriteria`] into [`SearchTerm`]s, which a session adapter then
//! renders for its protocol.

use std::fmt;

use chrono::NaiveDate;

use crate::error::{Error, Result};

/// Which messages a search starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageType {
    /// Every message.
    #[default]
    All,
    /// Messages flagged deleted.
    Deleted,
    /// Messages not yet seen.
    Unseen,
}

impl MessageType {
    /// Protocol keyword.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::All => "ALL",
            Self::Deleted => "DELETED",
            Self::Unseen => "UNSEEN",
        }
    }

    /// Parses a message type in any case.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for anything but `all`, `deleted` or `unseen`.
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ALL" => Ok(Self::All),
            "DELETED" => Ok(Self::Deleted),
            "UNSEEN" => Ok(Self::Unseen),
            _ => Err(Error::Validation(format!("unknown message type '{s}'"))),
        }
    }
}

/// How a date predicate compares the sent date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateOperator {
    /// Sent strictly before the date.
    Before,
    /// Sent on the date.
    On,
    /// Sent on or after the date.
    Since,
}

impl DateOperator {
    /// Lowercase name as accepted from requests.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Before => "before",
            Self::On => "on",
            Self::Since => "since",
        }
    }

    /// Parses an operator in any case. `none` and the empty string mean no predicate.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for an unknown operator.
    pub fn parse(s: &str) -> Result<Option<Self>> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(None),
            "before" => Ok(Some(Self::Before)),
            "on" => Ok(Some(Self::On)),
            "since" => Ok(Some(Self::Since)),
            _ => Err(Error::Validation(format!("unknown date operator '{s}'"))),
        }
    }
}

/// A comparison against the message's sent date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatePredicate {
    /// Date to compare with.
    pub date: NaiveDate,
    /// Comparison.
    pub operator: DateOperator,
}

/// Structured query over one folder. Absent filters constrain nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchCriteria {
    /// Base selector; always the first term.
    pub message_type: MessageType,
    /// Exact `Message-ID` header match.
    pub message_id: Option<String>,
    /// Sent-date comparison.
    pub date: Option<DatePredicate>,
    /// Header name/value filters in insertion order, all of which must match.
    pub headers: Vec<(String, String)>,
    /// Subject text filter.
    pub subject: Option<String>,
    /// Sender text filter.
    pub from: Option<String>,
    /// Recipient text filter.
    pub to: Option<String>,
    /// Body text filter.
    pub body: Option<String>,
}

/// One term of a search expression. A term sequence is an implicit AND.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchTerm {
    /// Message type selector.
    Type(MessageType),
    /// `SENT<OPERATOR> date`.
    Sent {
        /// Comparison.
        operator: DateOperator,
        /// Date literal.
        date: NaiveDate,
    },
    /// `HEADER name value`.
    Header {
        /// Header field name.
        name: String,
        /// Substring to match.
        value: String,
    },
    /// `SUBJECT text`.
    Subject(String),
    /// `FROM text`.
    From(String),
    /// `TO text`.
    To(String),
    /// `BODY text`.
    Body(String),
}

impl SearchTerm {
    /// Leading keyword, e.g. `SENTSINCE` or `HEADER`.
    #[must_use]
    pub fn keyword(&self) -> String {
        match self {
            Self::Type(kind) => kind.as_str().to_string(),
            Self::Sent { operator, .. } => format!("SENT{}", operator.as_str().to_uppercase()),
            Self::Header { .. } => "HEADER".to_string(),
            Self::Subject(_) => "SUBJECT".to_string(),
            Self::From(_) => "FROM".to_string(),
            Self::To(_) => "TO".to_string(),
            Self::Body(_) => "BODY".to_string(),
        }
    }
}

impl fmt::Display for SearchTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keyword = self.keyword();
        match self {
            Self::Type(_) => f.write_str(&keyword),
            Self::Sent { date, .. } => write!(f, "{keyword} {}", date.format("%-d-%b-%Y")),
            Self::Header { name, value } => write!(f, "{keyword} {name} {value:?}"),
            Self::Subject(text) | Self::From(text) | Self::To(text) | Self::Body(text) => {
                write!(f, "{keyword} {text:?}")
            }
        }
    }
}

/// Orders the criteria into search terms.
///
/// The message type comes first, then the date predicate, the message id,
/// each header filter in insertion order, and finally the subject, from,
/// to and body text filters.
#[must_use]
pub fn build_search_terms(criteria: &SearchCriteria) -> Vec<SearchTerm> {
    let mut terms = vec![SearchTerm::Type(criteria.message_type)];

    if let Some(predicate) = criteria.date {
        terms.push(SearchTerm::Sent {
            operator: predicate.operator,
            date: predicate.date,
        });
    }
    if let Some(id) = criteria.message_id.as_deref().filter(|id| !id.is_empty()) {
        terms.push(SearchTerm::Header {
            name: "message-id".to_string(),
            value: id.to_string(),
        });
    }
    for (name, value) in &criteria.headers {
        terms.push(SearchTerm::Header {
            name: name.clone(),
            value: value.clone(),
        });
    }

    let text_filters: [(&Option<String>, fn(String) -> SearchTerm); 4] = [
        (&criteria.subject, SearchTerm::Subject),
        (&criteria.from, SearchTerm::From),
        (&criteria.to, SearchTerm::To),
        (&criteria.body, SearchTerm::Body),
    ];
    for (filter, term) in text_filters {
        if let Some(text) = filter.as_deref().filter(|text| !text.is_empty()) {
            terms.push(term(text.to_string()));
        }
    }

    terms
}

/// Parses a request date: `2024-01-31`, `31-Jan-2024`, or a full timestamp.
///
/// # Errors
///
/// Returns [`Error::Validation`] when no format matches.
pub fn parse_search_date(value: &str) -> Result<NaiveDate> {
    let value = value.trim();
    for format in ["%Y-%m-%d", "%d-%b-%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            return Ok(date);
        }
    }
    postbox_mime::parse_date(value)
        .map(|instant| instant.date_naive())
        .map_err(|_| Error::Validation(format!("unrecognised date '{value}'")))
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
    use proptest::prelude::*;

    use super::*;

    fn jan(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    #[test]
    fn test_type_only() {
        let terms = build_search_terms(&SearchCriteria::default());
        assert_eq!(terms, vec![SearchTerm::Type(MessageType::All)]);
    }

    #[test]
    fn test_full_order() {
        let criteria = SearchCriteria {
            message_type: MessageType::Unseen,
            message_id: Some("<abc@example.com>".into()),
            date: Some(DatePredicate {
                date: jan(5),
                operator: DateOperator::Since,
            }),
            headers: vec![
                ("x-priority".into(), "1".into()),
                ("list-id".into(), "dev".into()),
            ],
            subject: Some("report".into()),
            from: None,
            to: Some("ops@example.com".into()),
            body: Some(String::new()),
        };

        let rendered: Vec<String> = build_search_terms(&criteria)
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(
            rendered,
            vec![
                "UNSEEN",
                "SENTSINCE 5-Jan-2024",
                "HEADER message-id \"<abc@example.com>\"",
                "HEADER x-priority \"1\"",
                "HEADER list-id \"dev\"",
                "SUBJECT \"report\"",
                "TO \"ops@example.com\"",
            ]
        );
    }

    #[test]
    fn test_empty_message_id_ignored() {
        let criteria = SearchCriteria {
            message_id: Some(String::new()),
            ..SearchCriteria::default()
        };
        assert_eq!(build_search_terms(&criteria).len(), 1);
    }

    #[test]
    fn test_parse_message_type() {
        assert_eq!(MessageType::parse("unseen").unwrap(), MessageType::Unseen);
        assert!(MessageType::parse("flagged").is_err());
    }

    #[test]
    fn test_parse_search_date() {
        assert_eq!(parse_search_date("2024-01-03").unwrap(), jan(3));
        assert_eq!(parse_search_date("3-Jan-2024").unwrap(), jan(3));
        assert_eq!(parse_search_date("Wed, 3 Jan 2024 10:00:00 +0000").unwrap(), jan(3));
        assert!(matches!(parse_search_date("soon"), Err(Error::Validation(_))));
    }

    fn mixed_case(word: &'static str) -> impl Strategy<Value = String> {
        proptest::collection::vec(any::<bool>(), word.len()).prop_map(move |upper| {
            word.chars()
                .zip(upper)
                .map(|(c, up)| if up { c.to_ascii_uppercase() } else { c })
                .collect()
        })
    }

    proptest! {
        #[test]
        fn prop_unfiltered_criteria_yield_one_term(
            kind in prop_oneof![Just(MessageType::All), Just(MessageType::Deleted), Just(MessageType::Unseen)],
        ) {
            let criteria = SearchCriteria { message_type: kind, ..SearchCriteria::default() };
            let terms = build_search_terms(&criteria);
            prop_assert_eq!(terms, vec![SearchTerm::Type(kind)]);
        }

        #[test]
        fn prop_date_keyword_is_uppercase(
            operator in prop_oneof![mixed_case("before"), mixed_case("on"), mixed_case("since")],
            day in 1u32..=28,
        ) {
            let operator = DateOperator::parse(&operator).unwrap().unwrap();
            let criteria = SearchCriteria {
                date: Some(DatePredicate { date: jan(day), operator }),
                ..SearchCriteria::default()
            };
            let terms = build_search_terms(&criteria);
            let keyword = terms[1].keyword();
            prop_assert!(keyword.starts_with("SENT"));
            prop_assert_eq!(keyword.to_uppercase(), keyword.clone());
        }
    }
}
