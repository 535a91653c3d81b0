//! Connection handling: TLS streams, framing and the type-state client.

mod client;
mod framed;
mod stream;

pub use client::{Authenticated, Client, FetchStream, NotAuthenticated, Selected};
pub use framed::{FramedStream, ResponseAccumulator};
pub use stream::{ImapStream, connect_tls};
