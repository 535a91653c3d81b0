//! Type-state IMAP client.
//!
//! - `NotAuthenticated`: greeting read
//! - `Authenticated`: after LOGIN
//! - `Selected`: after SELECT/EXAMINE
//!
//! Each state only exposes the commands valid in it, and state changes
//! consume the client.

#![allow(clippy::missing_errors_doc)]

mod authenticated;
mod not_authenticated;
mod selected;
mod states;

use std::marker::PhantomData;

use tokio::io::{AsyncRead, AsyncWrite};

pub use self::selected::FetchStream;
pub use self::states::{Authenticated, NotAuthenticated, Selected};
use super::framed::{FramedStream, ResponseAccumulator};
use crate::command::{Command, TagGenerator};
use crate::parser::{Response, ResponseParser};
use crate::types::Status;
use crate::{Error, Result};

/// IMAP client with its connection state tracked in the type.
pub struct Client<S, State> {
    pub(crate) stream: FramedStream<S>,
    pub(crate) tag_gen: TagGenerator,
    pub(crate) capabilities: Vec<String>,
    _state: PhantomData<State>,
}

impl<S, State> std::fmt::Debug for Client<S, State> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("tag_gen", &self.tag_gen)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

impl<S, State> Client<S, State>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Server capabilities as last announced.
    #[must_use]
    pub fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    /// Moves the connection into another state.
    fn transition<Next>(self) -> Client<S, Next> {
        Client {
            stream: self.stream,
            tag_gen: self.tag_gen,
            capabilities: self.capabilities,
            _state: PhantomData,
        }
    }

    /// Sends a command and returns its tag.
    pub(crate) async fn send(&mut self, command: &Command) -> Result<String> {
        let tag = self.tag_gen.next_tag();
        tracing::trace!(%tag, ?command, "sending IMAP command");
        self.stream.write_command(&command.serialize(&tag)).await?;
        Ok(tag)
    }

    /// Sends a command and collects every response through its completion.
    pub(crate) async fn execute(&mut self, command: &Command) -> Result<Vec<Vec<u8>>> {
        let tag = self.send(command).await?;
        let responses = ResponseAccumulator::new(tag.as_str())
            .read_until_tagged(&mut self.stream)
            .await?;
        Self::check_tagged_ok(&responses, &tag)?;
        Ok(responses)
    }

    /// Checks that the completion for `tag` is OK.
    pub(crate) fn check_tagged_ok(responses: &[Vec<u8>], tag: &str) -> Result<()> {
        responses
            .iter()
            .rev()
            .find_map(|bytes| match ResponseParser::parse(bytes) {
                Ok(Response::Tagged {
                    tag: resp_tag,
                    status,
                    text,
                    ..
                }) if resp_tag.as_str() == tag => Some(status_to_result(status, text)),
                _ => None,
            })
            .unwrap_or_else(|| Err(Error::Protocol("missing tagged response".to_string())))
    }

    /// Sends LOGOUT and drops the connection. The reply is not required.
    pub async fn logout(mut self) -> Result<()> {
        let tag = self.send(&Command::Logout).await?;
        if let Err(e) = ResponseAccumulator::new(tag)
            .read_until_tagged(&mut self.stream)
            .await
        {
            tracing::debug!(error = %e, "connection closed during LOGOUT");
        }
        Ok(())
    }
}

/// Maps a completion status to a result.
pub(crate) fn status_to_result(status: Status, text: String) -> Result<()> {
    match status {
        Status::Ok | Status::PreAuth => Ok(()),
        Status::No => Err(Error::No(text)),
        Status::Bad => Err(Error::Bad(text)),
        Status::Bye => Err(Error::Bye(text)),
    }
}
