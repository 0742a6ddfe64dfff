//! Agent accept loop.
//!
//! Binds the agent-facing TCP port with the configured backlog and admits
//! each connection as a new session: allocate an id, register, broadcast
//! the updated list, spawn the worker.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpSocket};
use tokio::task::JoinHandle;
use tracing::{info, info_span, warn, Instrument};

use crate::agent::link::AgentLink;
use crate::agent::worker;
use crate::broker::Broker;
use crate::config::AgentConfig;
use crate::models::session::Session;
use crate::protocol::dispatcher;
use crate::{AppError, Result};

/// Bind the agent listener.
///
/// # Errors
///
/// Returns `AppError::Io` if the socket cannot be created, bound, or put
/// into listening state. This is fatal at startup.
pub fn bind(config: &AgentConfig) -> Result<TcpListener> {
    let addr = config.listen_addr;
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .map_err(|err| AppError::Io(format!("failed to create agent socket: {err}")))?;

    socket
        .set_reuseaddr(true)
        .map_err(|err| AppError::Io(format!("failed to set SO_REUSEADDR: {err}")))?;
    socket
        .bind(addr)
        .map_err(|err| AppError::Io(format!("failed to bind {addr}: {err}")))?;
    socket
        .listen(config.max_pending_accepts)
        .map_err(|err| AppError::Io(format!("failed to listen on {addr}: {err}")))
}

/// Spawn the accept loop on an already-bound listener.
///
/// The loop stops when the broker's shutdown token fires.
pub fn spawn_listener(broker: Arc<Broker>, listener: TcpListener) -> JoinHandle<()> {
    let local = listener
        .local_addr()
        .map_or_else(|_| "unknown".to_owned(), |addr| addr.to_string());
    info!(addr = %local, "agent listener accepting connections");

    tokio::spawn(
        async move {
            loop {
                tokio::select! {
                    () = broker.shutdown.cancelled() => {
                        info!("agent listener shutting down");
                        break;
                    }
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            if let Err(err) = stream.set_nodelay(true) {
                                warn!(%err, %peer, "failed to set TCP_NODELAY");
                            }
                            if let Err(err) = admit(&broker, stream, peer.ip().to_string()) {
                                warn!(%err, %peer, "failed to admit agent");
                            }
                        }
                        Err(err) => warn!(%err, "agent accept failed"),
                    }
                }
            }
        }
        .instrument(info_span!("agent_listener", addr = %local)),
    )
}

/// Register a new session for `stream` and start its worker.
///
/// # Errors
///
/// Returns `AppError::Registry` if the session cannot be registered; the
/// stream is dropped (closed) in that case.
pub fn admit<S>(broker: &Arc<Broker>, stream: S, address: String) -> Result<Arc<Session>>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let session = broker.new_session(address);
    broker.registry.put(Arc::clone(&session))?;

    if let Err(err) = dispatcher::broadcast_session_list(broker) {
        warn!(%err, "failed to broadcast session list after connect");
    }

    let link = AgentLink::new(
        stream,
        broker.config.agent.framing,
        broker.config.max_message_bytes,
    );
    let handle = tokio::spawn(worker::run_worker(
        Arc::clone(broker),
        Arc::clone(&session),
        link,
    ));
    session.attach_worker(handle);

    info!(
        session_id = %session.id(),
        address = session.address(),
        "agent connected"
    );
    Ok(session)
}
