//! Agent TCP link with selectable framing.
//!
//! In [`AgentFraming::Raw`] mode a command is written verbatim and a reply
//! is whatever a single read returns (at most `max_message_bytes`). This is
//! what the deployed agent shim speaks; replies that span several reads
//! are not reassembled.
//!
//! In [`AgentFraming::LengthPrefixed`] mode both directions carry a 4-byte
//! big-endian length prefix via [`LengthDelimitedCodec`], so commands and
//! replies of any size up to the limit arrive intact.

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::config::AgentFraming;
use crate::{AppError, Result};

/// One agent connection, owned by its session worker.
#[derive(Debug)]
pub struct AgentLink<S> {
    inner: Inner<S>,
}

#[derive(Debug)]
enum Inner<S> {
    Raw { stream: S, buf: Vec<u8> },
    LengthPrefixed(Framed<S, LengthDelimitedCodec>),
}

impl<S> AgentLink<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap `stream` using the given framing and reply size limit.
    pub fn new(stream: S, framing: AgentFraming, max_message_bytes: usize) -> Self {
        let inner = match framing {
            AgentFraming::Raw => Inner::Raw {
                stream,
                buf: vec![0; max_message_bytes],
            },
            AgentFraming::LengthPrefixed => Inner::LengthPrefixed(
                LengthDelimitedCodec::builder()
                    .length_field_length(4)
                    .max_frame_length(max_message_bytes)
                    .new_framed(stream),
            ),
        };
        Self { inner }
    }

    /// Deliver one command to the agent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Agent` if the write fails or the command exceeds
    /// the frame limit.
    pub async fn send(&mut self, command: &str) -> Result<()> {
        match &mut self.inner {
            Inner::Raw { stream, .. } => {
                stream
                    .write_all(command.as_bytes())
                    .await
                    .map_err(|e| AppError::Agent(format!("write failed: {e}")))?;
                stream
                    .flush()
                    .await
                    .map_err(|e| AppError::Agent(format!("flush failed: {e}")))
            }
            Inner::LengthPrefixed(framed) => framed
                .send(Bytes::copy_from_slice(command.as_bytes()))
                .await
                .map_err(|e| AppError::Agent(format!("write failed: {e}"))),
        }
    }

    /// Read one reply.
    ///
    /// Returns `Ok(None)` when the agent closed the connection. Invalid
    /// UTF-8 in the reply is replaced rather than rejected.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Agent` on a read or framing error.
    pub async fn recv(&mut self) -> Result<Option<String>> {
        match &mut self.inner {
            Inner::Raw { stream, buf } => {
                let n = stream
                    .read(buf)
                    .await
                    .map_err(|e| AppError::Agent(format!("read failed: {e}")))?;
                if n == 0 {
                    return Ok(None);
                }
                Ok(Some(String::from_utf8_lossy(&buf[..n]).into_owned()))
            }
            Inner::LengthPrefixed(framed) => match framed.next().await {
                None => Ok(None),
                Some(Ok(frame)) => Ok(Some(String::from_utf8_lossy(&frame).into_owned())),
                Some(Err(e)) => Err(AppError::Agent(format!("read failed: {e}"))),
            },
        }
    }
}
