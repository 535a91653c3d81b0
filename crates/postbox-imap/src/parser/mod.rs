//! Sans-I/O parser for server responses.
//!
//! The lexer turns one complete response into tokens and the response
//! parser builds typed values from them.
//!
//! ```
//! use postbox_imap::parser::{Response, ResponseParser, UntaggedResponse};
//!
//! let response = ResponseParser::parse(b"* 3 EXISTS\r\n").unwrap();
//! assert_eq!(response, Response::Untagged(UntaggedResponse::Exists(3)));
//! ```

pub mod lexer;
pub mod response;

pub use lexer::{Lexer, Token};
pub use response::{
    BodyStructure, Disposition, FetchItem, Response, ResponseParser, SinglePart, UntaggedResponse,
};
