//! Per-session worker task.
//!
//! Each connected agent gets one worker that moves commands from the
//! session queue to the agent and replies from the agent to the output
//! queue, one command at a time:
//!
//! ```text
//! Idle ─► AwaitingCommand ─► AwaitingReply ─► Idle ...
//!              │                   │
//!              └─────── EOF / error / cancel ───► Terminating
//! ```
//!
//! While idle the worker also watches the link, so an agent that hangs
//! up between commands is deregistered at once; anything the agent sends
//! unprompted is forwarded like a reply.
//!
//! A slow agent only delays its own next command. There is no
//! per-command reply timeout; a silent agent holds its worker in
//! `AwaitingReply` until it answers, disconnects, or the session is
//! cancelled.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, info_span, trace, warn, Instrument};

use crate::agent::link::AgentLink;
use crate::broker::Broker;
use crate::models::envelope::Envelope;
use crate::models::session::Session;
use crate::protocol::{codec, dispatcher};

/// Worker lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Between commands.
    Idle,
    /// Polling the session queue.
    AwaitingCommand,
    /// Command sent, waiting for the agent's reply.
    AwaitingReply,
    /// Leaving; the session is being deregistered.
    Terminating,
}

/// Why the serve loop ended.
#[derive(Debug)]
enum Exit {
    Cancelled,
    Disconnected(String),
}

/// Run a session worker until the agent disconnects or the session is
/// cancelled.
///
/// On exit the session is removed from the registry if it is still
/// there, and in that case an updated session list is broadcast. During
/// broker shutdown the session is left registered for [`stop_all`] to
/// drain and join, and nothing is broadcast. The agent connection is
/// closed when `link` is dropped.
pub async fn run_worker<S>(broker: Arc<Broker>, session: Arc<Session>, link: AgentLink<S>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let span = info_span!("session_worker", session_id = %session.id(), address = session.address());
    async move {
        let mut state = WorkerState::Idle;
        let exit = serve(&broker, &session, link, &mut state).await;
        enter(&mut state, WorkerState::Terminating);

        match exit {
            Exit::Cancelled => debug!("session cancelled"),
            Exit::Disconnected(ref reason) => info!(
                reason = reason.as_str(),
                connected_at = %session.connected_at(),
                "agent disconnected"
            ),
        }

        if broker.shutdown.is_cancelled() {
            debug!("broker shutting down, leaving deregistration to stop_all");
            return;
        }
        if broker.registry.remove(session.id()).is_some() {
            if let Err(err) = dispatcher::broadcast_session_list(&broker) {
                warn!(%err, "failed to broadcast session list after disconnect");
            }
        }
    }
    .instrument(span)
    .await;
}

async fn serve<S>(
    broker: &Broker,
    session: &Session,
    mut link: AgentLink<S>,
    state: &mut WorkerState,
) -> Exit
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let cancel = session.cancel_token().clone();

    loop {
        enter(state, WorkerState::AwaitingCommand);
        let popped = tokio::select! {
            biased;
            () = cancel.cancelled() => return Exit::Cancelled,
            popped = session.queue().pop() => popped,
            unsolicited = link.recv() => match unsolicited {
                Ok(Some(output)) => {
                    forward_reply(broker, session, output);
                    continue;
                }
                Ok(None) => return Exit::Disconnected("connection closed by agent".into()),
                Err(err) => return Exit::Disconnected(err.to_string()),
            },
        };
        // Timed out: loop back so cancellation is observed.
        let Some(command) = popped else {
            continue;
        };

        debug!(bytes = command.len(), "sending command to agent");
        if let Err(err) = link.send(&command).await {
            return Exit::Disconnected(err.to_string());
        }

        enter(state, WorkerState::AwaitingReply);
        let reply = tokio::select! {
            biased;
            () = cancel.cancelled() => return Exit::Cancelled,
            reply = link.recv() => reply,
        };

        match reply {
            Ok(Some(output)) => forward_reply(broker, session, output),
            Ok(None) => return Exit::Disconnected("connection closed by agent".into()),
            Err(err) => return Exit::Disconnected(err.to_string()),
        }
        enter(state, WorkerState::Idle);
    }
}

/// Wrap an agent reply as `RESPONSE` / `CMD_OUTPUT` and queue it for the
/// operator.
fn forward_reply(broker: &Broker, session: &Session, output: String) {
    let bytes = output.len();
    let envelope = Envelope::response(broker.identity(), broker.operator(), session.id(), output);
    match codec::serialize(&envelope) {
        Ok(wire) => {
            broker.output.push(wire);
            debug!(bytes, "agent reply queued for operator");
        }
        Err(err) => warn!(%err, "failed to encode agent reply"),
    }
}

fn enter(state: &mut WorkerState, next: WorkerState) {
    if *state != next {
        trace!(from = ?*state, to = ?next, "worker state");
        *state = next;
    }
}

/// Drain the registry and wait for every worker to finish.
///
/// Used at shutdown, before or after the root token is cancelled. No
/// session-list broadcast is produced: workers that exit during shutdown
/// leave their session registered, so every handle is joined here.
pub async fn stop_all(broker: &Broker) {
    let sessions = broker.registry.drain();
    for session in sessions {
        if let Some(handle) = session.take_worker() {
            if let Err(err) = handle.await {
                warn!(session_id = %session.id(), %err, "session worker panicked");
            }
        }
    }
}
