//! Inbound envelope routing and session-list broadcasts.
//!
//! | Inbound kind                      | Action                                  |
//! |-----------------------------------|-----------------------------------------|
//! | `COMMAND`                         | Push payload onto the target's queue    |
//! | `REQUEST` + `CONNECTION_LIST`     | Broadcast the session list              |
//! | `LIST_UPDATE`                     | Ignored; only the broker emits it       |
//! | *(any other)*                     | Receipt only; logged at `DEBUG`         |
//!
//! Nothing is ever sent back for a rejected message: a message that did
//! not parse has no trustworthy return address.

use tracing::{debug, info, warn};

use crate::broker::Broker;
use crate::models::envelope::{ContentKind, Envelope, MessageKind};
use crate::models::session::SessionId;
use crate::protocol::codec;
use crate::{AppError, Result};

/// What [`handle`] did with a message.
#[derive(Debug)]
pub enum Dispatch {
    /// Command pushed onto a session's queue.
    Queued(SessionId),
    /// Session list broadcast on request.
    ListRequested,
    /// Message came from this broker; dropped.
    FromSelf,
    /// Well-formed message that needs no broker action.
    Ignored(MessageKind),
    /// Message dropped: parse failure or unknown target.
    Rejected(AppError),
}

/// Parse and act on one inbound wire message.
pub fn handle(broker: &Broker, wire: &str) -> Dispatch {
    let envelope = match codec::parse(wire, broker.config.max_message_bytes) {
        Ok(envelope) => envelope,
        Err(err) => {
            warn!(%err, raw = wire, "dropping unparseable operator message");
            return Dispatch::Rejected(err);
        }
    };

    if envelope.is_from(broker.identity()) {
        return Dispatch::FromSelf;
    }

    match envelope.kind {
        MessageKind::Command => match route_command(broker, &envelope) {
            Ok(id) => Dispatch::Queued(id),
            Err(err) => {
                warn!(%err, "dropping operator command");
                Dispatch::Rejected(err)
            }
        },
        MessageKind::Request if envelope.content == Some(ContentKind::ConnectionList) => {
            match broadcast_session_list(broker) {
                Ok(()) => Dispatch::ListRequested,
                Err(err) => {
                    warn!(%err, "session list request failed");
                    Dispatch::Rejected(err)
                }
            }
        }
        MessageKind::ListUpdate => {
            warn!("ignoring inbound LIST_UPDATE; only the broker emits it");
            Dispatch::Ignored(MessageKind::ListUpdate)
        }
        other => {
            debug!(kind = %other, "operator message received, no action");
            Dispatch::Ignored(other)
        }
    }
}

/// Push a `COMMAND` payload onto its target session's queue.
///
/// # Errors
///
/// Returns `AppError::InvalidSessionId` for a malformed target and
/// `AppError::NotFound` when no live session has that id.
fn route_command(broker: &Broker, envelope: &Envelope) -> Result<SessionId> {
    let (Some(target), Some(payload)) = (&envelope.target_session, &envelope.payload) else {
        return Err(AppError::Protocol(
            "COMMAND requires `selectedClient` and `payload`".into(),
        ));
    };

    let session = broker
        .registry
        .get_str(target)?
        .ok_or_else(|| AppError::NotFound(format!("session {target}")))?;

    session.queue().push(payload.as_str());
    info!(session_id = %session.id(), bytes = payload.len(), "command queued");
    Ok(session.id().clone())
}

/// Snapshot the registry and queue a `LIST_UPDATE` for the operator.
///
/// # Errors
///
/// Returns `AppError::Protocol` if the list cannot be encoded.
pub fn broadcast_session_list(broker: &Broker) -> Result<()> {
    let sessions = broker.registry.snapshot();
    let list_json = serde_json::to_string(&sessions)
        .map_err(|e| AppError::Protocol(format!("failed to encode session list: {e}")))?;
    let envelope = Envelope::list_update(broker.identity(), broker.operator(), list_json);
    broker.output.push(codec::serialize(&envelope)?);
    debug!(sessions = sessions.len(), "session list queued");
    Ok(())
}
