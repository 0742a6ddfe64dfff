//! Operator protocol envelope and its kind enums.
//!
//! Each kind enum maps to its wire string through one exhaustive
//! `as_str` match; `FromStr` walks `ALL` and compares against that same
//! match, so the two directions cannot drift apart.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use crate::models::session::SessionId;
use crate::AppError;

/// Envelope `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Agent announced itself.
    Connect,
    /// Agent keep-alive.
    Beacon,
    /// Agent said goodbye.
    Disconnect,
    /// Operator asks for something (e.g. the session list).
    Request,
    /// Broker reply, typically command output.
    Response,
    /// Operator focused a session.
    SelectClient,
    /// Operator command for one session.
    Command,
    /// Broker-originated session list.
    ListUpdate,
}

impl MessageKind {
    /// Every variant, in wire-table order.
    pub const ALL: [Self; 8] = [
        Self::Connect,
        Self::Beacon,
        Self::Disconnect,
        Self::Request,
        Self::Response,
        Self::SelectClient,
        Self::Command,
        Self::ListUpdate,
    ];

    /// Wire string for this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Beacon => "BEACON",
            Self::Disconnect => "DISCONNECT",
            Self::Request => "REQUEST",
            Self::Response => "RESPONSE",
            Self::SelectClient => "SELECT_CLIENT",
            Self::Command => "COMMAND",
            Self::ListUpdate => "LIST_UPDATE",
        }
    }
}

impl FromStr for MessageKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| AppError::Protocol(format!("unknown message type: {s}")))
    }
}

impl Display for MessageKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Envelope `content` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    /// Payload is an agent's command output.
    CmdOutput,
    /// Payload is a JSON array of session summaries.
    ConnectionList,
}

impl ContentKind {
    /// Every variant, in wire-table order.
    pub const ALL: [Self; 2] = [Self::CmdOutput, Self::ConnectionList];

    /// Wire string for this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CmdOutput => "CMD_OUTPUT",
            Self::ConnectionList => "CONNECTION_LIST",
        }
    }
}

impl FromStr for ContentKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| AppError::Protocol(format!("unknown content type: {s}")))
    }
}

impl Display for ContentKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded operator-protocol message.
///
/// Optional fields that are `None` are omitted on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Message kind (`type`).
    pub kind: MessageKind,
    /// Payload kind (`content`).
    pub content: Option<ContentKind>,
    /// Sending endpoint name.
    pub source: Option<String>,
    /// Receiving endpoint name.
    pub destination: Option<String>,
    /// Message body.
    pub payload: Option<String>,
    /// Addressed session (`selectedClient`).
    pub target_session: Option<String>,
    /// Sender-declared payload length (advisory).
    pub payload_size: Option<i64>,
    /// Sender-declared session id length (advisory).
    pub client_size: Option<i64>,
}

impl Envelope {
    /// Bare envelope of the given kind with every optional field absent.
    #[must_use]
    pub fn new(kind: MessageKind) -> Self {
        Self {
            kind,
            content: None,
            source: None,
            destination: None,
            payload: None,
            target_session: None,
            payload_size: None,
            client_size: None,
        }
    }

    /// `RESPONSE` / `CMD_OUTPUT` carrying one agent reply.
    #[must_use]
    pub fn response(
        source: &str,
        destination: &str,
        session: &SessionId,
        output: impl Into<String>,
    ) -> Self {
        let output = output.into();
        Self {
            kind: MessageKind::Response,
            content: Some(ContentKind::CmdOutput),
            source: Some(source.to_owned()),
            destination: Some(destination.to_owned()),
            payload_size: Some(byte_len(&output)),
            client_size: Some(byte_len(session.as_str())),
            target_session: Some(session.as_str().to_owned()),
            payload: Some(output),
        }
    }

    /// `LIST_UPDATE` / `CONNECTION_LIST` with an already-encoded list.
    #[must_use]
    pub fn list_update(source: &str, destination: &str, list_json: impl Into<String>) -> Self {
        let list_json = list_json.into();
        Self {
            kind: MessageKind::ListUpdate,
            content: Some(ContentKind::ConnectionList),
            source: Some(source.to_owned()),
            destination: Some(destination.to_owned()),
            payload_size: Some(byte_len(&list_json)),
            payload: Some(list_json),
            ..Self::new(MessageKind::ListUpdate)
        }
    }

    /// Whether `source` names the given endpoint.
    #[must_use]
    pub fn is_from(&self, endpoint: &str) -> bool {
        self.source.as_deref() == Some(endpoint)
    }
}

fn byte_len(text: &str) -> i64 {
    i64::try_from(text.len()).unwrap_or(i64::MAX)
}
