//! Canonical gateway/shard message record.
//!
//! Every message that crosses the backplane is a [`MessageEnvelope`]. The
//! envelope checks its required fields at construction time, so a malformed
//! record fails where it is built rather than somewhere downstream in a
//! shard tick. Deserialisation goes through the same checks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Construction-time envelope invariant violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    #[error("message id must not be nil")]
    NilMessageId,

    #[error("message type must not be empty")]
    EmptyType,

    #[error("session id must not be empty")]
    EmptySessionId,

    #[error("trace id must not be empty")]
    EmptyTraceId,
}

/// Message type tag.
///
/// Request tags flow gateway to shard, response tags flow shard to the
/// session's outbound queue. Anything else is carried as [`MessageType::Other`]
/// and ignored by the shard dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum MessageType {
    SessionConnected,
    SessionReconnected,
    StartGame,
    SessionAck,
    Reconnected,
    PlayStarted,
    Terminated,
    Other(String),
}

impl MessageType {
    /// Wire tag for this type.
    pub fn as_str(&self) -> &str {
        match self {
            Self::SessionConnected => "SESSION_CONNECTED",
            Self::SessionReconnected => "SESSION_RECONNECTED",
            Self::StartGame => "START_GAME",
            Self::SessionAck => "SESSION_ACK",
            Self::Reconnected => "RECONNECTED",
            Self::PlayStarted => "PLAY_STARTED",
            Self::Terminated => "TERMINATED",
            Self::Other(tag) => tag,
        }
    }
}

impl FromStr for MessageType {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s {
            "" => return Err(EnvelopeError::EmptyType),
            "SESSION_CONNECTED" => Self::SessionConnected,
            "SESSION_RECONNECTED" => Self::SessionReconnected,
            "START_GAME" => Self::StartGame,
            "SESSION_ACK" => Self::SessionAck,
            "RECONNECTED" => Self::Reconnected,
            "PLAY_STARTED" => Self::PlayStarted,
            "TERMINATED" => Self::Terminated,
            other if other.trim().is_empty() => return Err(EnvelopeError::EmptyType),
            other => Self::Other(other.to_string()),
        };
        Ok(kind)
    }
}

impl TryFrom<String> for MessageType {
    type Error = EnvelopeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MessageType> for String {
    fn from(kind: MessageType) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable message exchanged between gateway and shard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawEnvelope")]
pub struct MessageEnvelope {
    message_id: Uuid,
    #[serde(rename = "type")]
    kind: MessageType,
    occurred_at: DateTime<Utc>,
    session_id: String,
    trace_id: String,
    #[serde(default)]
    payload: Map<String, Value>,
}

/// Unchecked wire shape, only used as a deserialisation staging area.
#[derive(Deserialize)]
struct RawEnvelope {
    message_id: Uuid,
    #[serde(rename = "type")]
    kind: MessageType,
    occurred_at: DateTime<Utc>,
    session_id: String,
    trace_id: String,
    #[serde(default)]
    payload: Map<String, Value>,
}

impl TryFrom<RawEnvelope> for MessageEnvelope {
    type Error = EnvelopeError;

    fn try_from(raw: RawEnvelope) -> Result<Self, Self::Error> {
        Self::from_parts(
            raw.message_id,
            raw.kind,
            raw.occurred_at,
            raw.session_id,
            raw.trace_id,
            raw.payload,
        )
    }
}

impl MessageEnvelope {
    /// Builds an envelope with a fresh message id and an empty payload.
    pub fn new(
        kind: MessageType,
        occurred_at: DateTime<Utc>,
        session_id: impl Into<String>,
        trace_id: impl Into<String>,
    ) -> Result<Self, EnvelopeError> {
        Self::from_parts(
            Uuid::new_v4(),
            kind,
            occurred_at,
            session_id,
            trace_id,
            Map::new(),
        )
    }

    /// Builds an envelope from every field, validating the required ones.
    pub fn from_parts(
        message_id: Uuid,
        kind: MessageType,
        occurred_at: DateTime<Utc>,
        session_id: impl Into<String>,
        trace_id: impl Into<String>,
        payload: Map<String, Value>,
    ) -> Result<Self, EnvelopeError> {
        let session_id = session_id.into();
        let trace_id = trace_id.into();

        if message_id.is_nil() {
            return Err(EnvelopeError::NilMessageId);
        }
        // a known tag carried in `Other` would change variant on a round trip
        let kind = match kind {
            MessageType::Other(tag) => tag.parse()?,
            named => named,
        };
        if session_id.trim().is_empty() {
            return Err(EnvelopeError::EmptySessionId);
        }
        if trace_id.trim().is_empty() {
            return Err(EnvelopeError::EmptyTraceId);
        }

        Ok(Self {
            message_id,
            kind,
            occurred_at,
            session_id,
            trace_id,
            payload,
        })
    }

    /// Returns a copy of this envelope with `key` set in the payload.
    pub fn with_payload(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    pub fn message_id(&self) -> Uuid {
        self.message_id
    }

    pub fn kind(&self) -> &MessageType {
        &self.kind
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    /// Looks up a string payload entry.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}
