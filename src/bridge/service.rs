//! Realtime bridge task.
//!
//! Keeps one outbound WebSocket connection to the operator channel:
//!
//! 1. Connect and handshake; on failure wait and retry, doubling the delay
//!    up to the configured cap. A successful connect resets the delay.
//! 2. Queue a fresh session list so the operator sees current state.
//! 3. Multiplex until the connection drops or shutdown:
//!    - inbound text frames go to the dispatcher,
//!    - pings are answered with pongs,
//!    - the output queue is drained into hand-built text frames.
//!
//! A message whose write failed is kept and sent first on the next
//! connection, so a reconnect does not lose operator-bound output.

use std::io::Cursor;
use std::sync::Arc;

use bytes::BytesMut;
use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, Chain, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::bridge::frame::{self, FrameDecoder, Message, Opcode, CLOSE_GOING_AWAY};
use crate::bridge::handshake;
use crate::broker::Broker;
use crate::config::BridgeConfig;
use crate::protocol::dispatcher;
use crate::{AppError, Result};

/// How a connection ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ended {
    /// Broker shutdown; do not reconnect.
    Shutdown,
    /// Peer closed the connection; reconnect.
    Closed,
}

/// An established operator-channel connection.
#[derive(Debug)]
pub struct OperatorChannel<S> {
    frames: FramedRead<Chain<Cursor<BytesMut>, ReadHalf<S>>, FrameDecoder>,
    sink: WriteHalf<S>,
}

impl<S> OperatorChannel<S>
where
    S: AsyncRead + AsyncWrite,
{
    /// Wrap a stream whose handshake already completed. `leftover` holds
    /// any bytes read past the handshake response.
    pub fn new(stream: S, leftover: BytesMut, max_frame_bytes: usize) -> Self {
        let (read, sink) = tokio::io::split(stream);
        let frames = FramedRead::new(
            Cursor::new(leftover).chain(read),
            FrameDecoder::new(max_frame_bytes),
        );
        Self { frames, sink }
    }

    /// Send one text message as a single masked frame.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Bridge` if the write fails.
    pub async fn send_text(&mut self, text: &str) -> Result<()> {
        self.write(&frame::text_frame(text)).await
    }

    /// Send a control or data frame with the given opcode.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Bridge` if the write fails.
    pub async fn send_frame(&mut self, opcode: Opcode, payload: &[u8]) -> Result<()> {
        self.write(&frame::encode_frame(opcode, payload, frame::random_mask()))
            .await
    }

    /// Send a close frame and shut down the write side.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Bridge` if the write fails.
    pub async fn close(&mut self, code: u16) -> Result<()> {
        self.write(&frame::close_frame(code)).await?;
        self.sink
            .shutdown()
            .await
            .map_err(|e| AppError::Bridge(format!("shutdown failed: {e}")))
    }

    /// Next complete inbound message; `None` when the stream ended.
    pub async fn next_message(&mut self) -> Option<Result<Message>> {
        self.frames.next().await
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.sink
            .write_all(bytes)
            .await
            .map_err(|e| AppError::Bridge(format!("write failed: {e}")))?;
        self.sink
            .flush()
            .await
            .map_err(|e| AppError::Bridge(format!("flush failed: {e}")))
    }
}

/// Open a TCP connection to the operator channel and upgrade it.
///
/// # Errors
///
/// Returns `AppError::Bridge` if the connection, the handshake, or the
/// handshake timeout fails.
pub async fn connect(config: &BridgeConfig) -> Result<OperatorChannel<TcpStream>> {
    let authority = config.authority();
    let mut stream = TcpStream::connect(&authority)
        .await
        .map_err(|e| AppError::Bridge(format!("connect to {authority} failed: {e}")))?;
    if let Err(err) = stream.set_nodelay(true) {
        debug!(%err, "failed to set TCP_NODELAY on operator channel");
    }

    let leftover = tokio::time::timeout(
        config.handshake_timeout(),
        handshake::client_handshake(&mut stream, config),
    )
    .await
    .map_err(|_| {
        AppError::Bridge(format!(
            "websocket handshake with {authority} timed out after {:?}",
            config.handshake_timeout()
        ))
    })??;

    Ok(OperatorChannel::new(stream, leftover, config.max_frame_bytes))
}

/// Spawn the bridge task.
pub fn spawn_bridge(broker: Arc<Broker>) -> JoinHandle<()> {
    let authority = broker.config.bridge.authority();
    tokio::spawn(run_bridge(broker).instrument(info_span!("realtime_bridge", target = %authority)))
}

/// Connect, serve, and reconnect until shutdown.
pub async fn run_bridge(broker: Arc<Broker>) {
    let config = broker.config.bridge.clone();
    let mut unsent: Option<String> = None;
    let mut delay = config.reconnect_delay();

    loop {
        let connected = tokio::select! {
            biased;
            () = broker.shutdown.cancelled() => break,
            connected = connect(&config) => connected,
        };

        match connected {
            Ok(channel) => {
                info!("operator channel connected");
                delay = config.reconnect_delay();
                if let Err(err) = dispatcher::broadcast_session_list(&broker) {
                    warn!(%err, "failed to queue session list on connect");
                }
                match serve(&broker, channel, &mut unsent).await {
                    Ok(Ended::Shutdown) => break,
                    Ok(Ended::Closed) => warn!("operator channel closed by peer"),
                    Err(err) => warn!(%err, "operator channel lost"),
                }
            }
            Err(err) => warn!(%err, "operator channel connect failed"),
        }

        info!(?delay, "reconnecting to operator channel");
        tokio::select! {
            biased;
            () = broker.shutdown.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }
        delay = delay.saturating_mul(2).min(config.max_reconnect_delay());
    }

    info!("realtime bridge stopped");
}

/// Multiplex one connection until it ends.
///
/// `unsent` carries a message whose write failed across connections.
///
/// # Errors
///
/// Returns `AppError::Bridge` on a read, write or framing error.
pub async fn serve<S>(
    broker: &Broker,
    mut channel: OperatorChannel<S>,
    unsent: &mut Option<String>,
) -> Result<Ended>
where
    S: AsyncRead + AsyncWrite,
{
    if let Some(message) = unsent.take() {
        deliver(&mut channel, message, unsent).await?;
    }

    loop {
        tokio::select! {
            biased;
            () = broker.shutdown.cancelled() => {
                if let Err(err) = channel.close(CLOSE_GOING_AWAY).await {
                    debug!(%err, "close frame not delivered");
                }
                return Ok(Ended::Shutdown);
            }
            inbound = channel.next_message() => match inbound {
                None => return Ok(Ended::Closed),
                Some(Err(err)) => return Err(err),
                Some(Ok(Message::Text(text))) => {
                    let outcome = dispatcher::handle(broker, &text);
                    debug!(?outcome, "operator message dispatched");
                }
                Some(Ok(Message::Ping(data))) => channel.send_frame(Opcode::Pong, &data).await?,
                Some(Ok(Message::Pong(_))) => {}
                Some(Ok(Message::Binary(data))) => {
                    warn!(bytes = data.len(), "ignoring binary frame from operator channel");
                }
                Some(Ok(Message::Close(code))) => {
                    debug!(?code, "operator channel sent close");
                    let reply = code.unwrap_or(CLOSE_GOING_AWAY);
                    if let Err(err) = channel.close(reply).await {
                        debug!(%err, "close reply not delivered");
                    }
                    return Ok(Ended::Closed);
                }
            },
            outbound = broker.output.pop() => {
                if let Some(message) = outbound {
                    deliver(&mut channel, message, unsent).await?;
                }
            }
        }
    }
}

async fn deliver<S>(
    channel: &mut OperatorChannel<S>,
    message: String,
    unsent: &mut Option<String>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite,
{
    match channel.send_text(&message).await {
        Ok(()) => {
            debug!(bytes = message.len(), "sent message to operator channel");
            Ok(())
        }
        Err(err) => {
            *unsent = Some(message);
            Err(err)
        }
    }
}
