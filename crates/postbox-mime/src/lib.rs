//! # postbox-mime
//!
//! MIME helpers for the postbox engine.
//!
//! - [`Headers`]: ordered header blocks with folding and RFC 2047 decoding
//! - [`encoding`]: Base64, Quoted-Printable, RFC 2047, transfer encodings
//! - [`Base64Decoder`]: Base64 decoding in front of any `AsyncWrite`
//! - [`parse_date`]: lenient `Date` header parsing into UTC
//! - [`MessageBuilder`]: outgoing `multipart/mixed` and `multipart/related`
//!   messages
//!
//! ```
//! use postbox_mime::Headers;
//!
//! let headers = Headers::parse(b"Subject: =?utf-8?Q?caf=C3=A9?=\r\n\r\n");
//! assert_eq!(headers.get_decoded("subject").as_deref(), Some("café"));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod builder;
mod content_type;
mod date;
mod error;
mod header;
mod stream;

pub mod encoding;

pub use builder::{
    Attachment, Body, MessageBuilder, bare_address, generate_message_id, split_addresses,
};
pub use content_type::ContentType;
pub use date::{format_date, parse_date};
pub use encoding::TransferEncoding;
pub use error::{Error, Result};
pub use header::Headers;
pub use stream::Base64Decoder;
