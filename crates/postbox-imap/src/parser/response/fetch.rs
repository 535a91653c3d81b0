//! FETCH data and BODYSTRUCTURE parsing.

use crate::parser::lexer::{Lexer, Token};
use crate::types::Uid;
use crate::Result;

use super::types::{BodyStructure, Disposition, FetchItem, SinglePart};

/// Parses the parenthesized item list of a FETCH response.
pub fn parse_fetch_response(lexer: &mut Lexer<'_>) -> Result<Vec<FetchItem>> {
    lexer.expect(Token::LParen)?;

    let mut items = Vec::new();
    loop {
        match lexer.next_token()? {
            Token::RParen => break,
            Token::Space => {}
            Token::Atom(name) => match name.to_ascii_uppercase().as_str() {
                "UID" => {
                    lexer.expect_space()?;
                    let n = lexer.read_number()?;
                    let uid = Uid::new(n).ok_or_else(|| lexer.error("UID cannot be 0"))?;
                    items.push(FetchItem::Uid(uid));
                }
                "RFC822.SIZE" => {
                    lexer.expect_space()?;
                    items.push(FetchItem::Rfc822Size(lexer.read_number()?));
                }
                "BODYSTRUCTURE" => {
                    lexer.expect_space()?;
                    items.push(FetchItem::BodyStructure(parse_body_structure(lexer)?));
                }
                "BODY" if lexer.peek() == Some(b'[') => {
                    let section = parse_section(lexer)?;
                    lexer.expect_space()?;
                    let data = match lexer.next_token()? {
                        Token::Literal(bytes) => Some(bytes.to_vec()),
                        Token::QuotedString(s) => Some(s.into_bytes()),
                        Token::Nil => None,
                        token => {
                            return Err(lexer.error(&format!("expected section data, got {token:?}")));
                        }
                    };
                    items.push(FetchItem::Body { section, data });
                }
                _ => {
                    // FLAGS, INTERNALDATE, ENVELOPE, MODSEQ ... are not used here.
                    lexer.expect_space()?;
                    lexer.skip_value()?;
                }
            },
            token => return Err(lexer.error(&format!("unexpected token in FETCH: {token:?}"))),
        }
    }

    Ok(items)
}

/// Parses `[section]` and an optional `<origin>` after `BODY`.
fn parse_section(lexer: &mut Lexer<'_>) -> Result<String> {
    lexer.expect(Token::LBracket)?;
    let mut section = String::new();
    loop {
        match lexer.advance() {
            Some(b']') => break,
            Some(b) => section.push(char::from(b)),
            None => return Err(lexer.error("unterminated section")),
        }
    }

    if lexer.peek() == Some(b'<') {
        while let Some(b) = lexer.advance() {
            if b == b'>' {
                break;
            }
        }
    }

    Ok(section.to_ascii_uppercase())
}

/// Parses a BODYSTRUCTURE value, extension data included.
///
/// Single part: `(type subtype params id desc enc size [lines] [md5 [dsp ...]])`.
/// Multipart: `((part)(part) subtype [params [dsp ...]])`.
pub fn parse_body_structure(lexer: &mut Lexer<'_>) -> Result<BodyStructure> {
    lexer.expect(Token::LParen)?;

    if lexer.peek() == Some(b'(') {
        let mut parts = Vec::new();
        while lexer.peek() == Some(b'(') {
            parts.push(parse_body_structure(lexer)?);
            lexer.eat_space();
        }

        let subtype = lexer.read_nstring()?.unwrap_or_default().to_ascii_lowercase();

        let mut params = Vec::new();
        let mut disposition = None;
        if lexer.eat_space() {
            params = parse_body_params(lexer)?;
            if lexer.eat_space() {
                disposition = parse_disposition(lexer)?;
            }
        }
        finish_list(lexer)?;

        return Ok(BodyStructure::Multipart {
            subtype,
            parts,
            params,
            disposition,
        });
    }

    let media_type = lexer.read_nstring()?.unwrap_or_default().to_ascii_lowercase();
    lexer.expect_space()?;
    let media_subtype = lexer.read_nstring()?.unwrap_or_default().to_ascii_lowercase();
    lexer.expect_space()?;
    let params = parse_body_params(lexer)?;
    lexer.expect_space()?;
    let id = lexer.read_nstring()?;
    lexer.expect_space()?;
    let description = lexer.read_nstring()?;
    lexer.expect_space()?;
    let encoding = lexer.read_nstring()?.unwrap_or_default();
    lexer.expect_space()?;
    let size = lexer.read_number()?;

    let lines = match media_type.as_str() {
        "text" if lexer.eat_space() => Some(lexer.read_number()?),
        "message" if media_subtype == "rfc822" || media_subtype == "global" => {
            // envelope, nested body, line count
            lexer.expect_space()?;
            lexer.skip_value()?;
            lexer.expect_space()?;
            lexer.skip_value()?;
            lexer.expect_space()?;
            Some(lexer.read_number()?)
        }
        _ => None,
    };

    let mut disposition = None;
    if lexer.eat_space() {
        // body MD5
        lexer.skip_value()?;
        if lexer.eat_space() {
            disposition = parse_disposition(lexer)?;
        }
    }
    finish_list(lexer)?;

    Ok(BodyStructure::Single(SinglePart {
        media_type,
        media_subtype,
        params,
        id,
        description,
        encoding,
        size,
        lines,
        disposition,
    }))
}

/// Parses `NIL` or `(key value key value ...)`.
fn parse_body_params(lexer: &mut Lexer<'_>) -> Result<Vec<(String, String)>> {
    match lexer.next_token()? {
        Token::Nil => Ok(Vec::new()),
        Token::LParen => {
            let mut params = Vec::new();
            loop {
                if lexer.peek() == Some(b')') {
                    lexer.advance();
                    break;
                }
                lexer.eat_space();
                let key = lexer.read_nstring()?.unwrap_or_default();
                lexer.expect_space()?;
                let value = lexer.read_nstring()?.unwrap_or_default();
                params.push((key, value));
            }
            Ok(params)
        }
        token => Err(lexer.error(&format!("expected body parameters, got {token:?}"))),
    }
}

/// Parses `NIL` or `("type" params)`.
fn parse_disposition(lexer: &mut Lexer<'_>) -> Result<Option<Disposition>> {
    match lexer.next_token()? {
        Token::Nil => Ok(None),
        Token::LParen => {
            let kind = lexer.read_nstring()?.unwrap_or_default();
            let params = if lexer.eat_space() {
                parse_body_params(lexer)?
            } else {
                Vec::new()
            };
            finish_list(lexer)?;
            Ok(Some(Disposition { kind, params }))
        }
        token => Err(lexer.error(&format!("expected disposition, got {token:?}"))),
    }
}

/// Skips any remaining extension fields and the closing `)`.
fn finish_list(lexer: &mut Lexer<'_>) -> Result<()> {
    lexer.skip_to_close_paren()
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

    fn structure(input: &[u8]) -> BodyStructure {
        let mut lexer = Lexer::new(input);
        parse_body_structure(&mut lexer).unwrap()
    }

    #[test]
    fn test_fetch_uid_and_sections() {
        let input = b"(UID 4021 BODY[HEADER] {9}\r\nSubject:\n BODY[TEXT] NIL)";
        let mut lexer = Lexer::new(input);
        let items = parse_fetch_response(&mut lexer).unwrap();

        assert_eq!(items.len(), 3);
        assert_eq!(items[0], FetchItem::Uid(Uid::new(4021).unwrap()));
        assert_eq!(
            items[1],
            FetchItem::Body {
                section: "HEADER".into(),
                data: Some(b"Subject:\n".to_vec()),
            }
        );
        assert_eq!(
            items[2],
            FetchItem::Body {
                section: "TEXT".into(),
                data: None,
            }
        );
    }

    #[test]
    fn test_fetch_uid_zero_rejected() {
        let mut lexer = Lexer::new(b"(UID 0)");
        assert!(parse_fetch_response(&mut lexer).is_err());
    }

    #[test]
    fn test_unknown_items_skipped() {
        let input = b"(FLAGS (\\Seen) INTERNALDATE \"17-Jul-1996 02:44:25 -0700\" UID 7)";
        let mut lexer = Lexer::new(input);
        let items = parse_fetch_response(&mut lexer).unwrap();
        assert_eq!(items, vec![FetchItem::Uid(Uid::new(7).unwrap())]);
    }

    #[test]
    fn test_single_text_part() {
        let parsed = structure(b"(\"TEXT\" \"PLAIN\" (\"CHARSET\" \"UTF-8\") NIL NIL \"7BIT\" 1152 23)");
        let BodyStructure::Single(part) = parsed else {
            panic!("expected single part");
        };
        assert_eq!(part.mime_type(), "text/plain");
        assert_eq!(part.param("charset"), Some("UTF-8"));
        assert_eq!(part.size, 1152);
        assert_eq!(part.lines, Some(23));
        assert!(part.disposition.is_none());
    }

    #[test]
    fn test_mixed_with_attachment_disposition() {
        let input = b"((\"TEXT\" \"PLAIN\" (\"CHARSET\" \"utf-8\") NIL NIL \"QUOTED-PRINTABLE\" 120 4 NIL NIL NIL)\
(\"APPLICATION\" \"PDF\" (\"NAME\" \"report.pdf\") NIL NIL \"BASE64\" 4096 NIL (\"ATTACHMENT\" (\"FILENAME\" \"Q3 report.pdf\")) NIL)\
 \"MIXED\" (\"BOUNDARY\" \"b1\") NIL NIL)";
        let parsed = structure(input);
        assert!(parsed.is_multipart("mixed"));

        let children = parsed.children();
        assert_eq!(children.len(), 2);
        let (id, BodyStructure::Single(pdf)) = &children[1] else {
            panic!("expected leaf");
        };
        assert_eq!(id, "2");
        assert_eq!(pdf.mime_type(), "application/pdf");
        assert_eq!(pdf.encoding, "BASE64");
        assert_eq!(pdf.size, 4096);
        let disposition = pdf.disposition.as_ref().unwrap();
        assert!(disposition.is_attachment());
        assert_eq!(disposition.param("filename"), Some("Q3 report.pdf"));
        assert_eq!(pdf.param("name"), Some("report.pdf"));
    }

    #[test]
    fn test_nested_alternative_inside_mixed() {
        let input = b"(((\"TEXT\" \"PLAIN\" NIL NIL NIL \"7BIT\" 10 1)(\"TEXT\" \"HTML\" NIL NIL NIL \"7BIT\" 20 1) \"ALTERNATIVE\")\
(\"IMAGE\" \"PNG\" (\"NAME\" \"a.png\") NIL NIL \"BASE64\" 300 NIL (\"attachment\" NIL)) \"MIXED\")";
        let parsed = structure(input);
        let children = parsed.children();
        assert!(children[0].1.is_multipart("alternative"));
        let BodyStructure::Single(png) = children[1].1 else {
            panic!("expected leaf");
        };
        assert!(png.disposition.as_ref().unwrap().is_attachment());
        assert!(png.disposition.as_ref().unwrap().params.is_empty());
    }

    #[test]
    fn test_message_rfc822_part() {
        let input = b"(\"MESSAGE\" \"RFC822\" NIL NIL NIL \"7BIT\" 500 (NIL \"subj\" NIL NIL NIL NIL NIL NIL NIL NIL) (\"TEXT\" \"PLAIN\" NIL NIL NIL \"7BIT\" 10 1) 12 NIL (\"INLINE\" NIL) NIL)";
        let BodyStructure::Single(part) = structure(input) else {
            panic!("expected leaf");
        };
        assert_eq!(part.lines, Some(12));
        assert_eq!(part.disposition.unwrap().kind, "INLINE");
    }
}
