//! Permanent records of why a session ended.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Construction-time termination record invariant violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TerminationError {
    #[error("termination session id must not be empty")]
    EmptySessionId,
}

/// Why a session ended. Every reason is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminationReason {
    /// Invalid token at open or reconnect.
    AuthFailure,
    /// No active shard at open, or the owning shard vanished.
    ShardUnavailable,
    /// Tick budget exhausted while playing.
    NormalCompletion,
    /// Operator or policy forced the session closed.
    PolicyTerminated,
}

impl TerminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthFailure => "AUTH_FAILURE",
            Self::ShardUnavailable => "SHARD_UNAVAILABLE",
            Self::NormalCompletion => "NORMAL_COMPLETION",
            Self::PolicyTerminated => "POLICY_TERMINATED",
        }
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The durable fact describing a session's end.
///
/// Once stored on the backplane for a session id it is final: every later
/// open or reconnect for that id returns this exact value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTermination")]
pub struct TerminationContext {
    session_id: String,
    reason: TerminationReason,
    occurred_at: DateTime<Utc>,
    detail: String,
}

#[derive(Deserialize)]
struct RawTermination {
    session_id: String,
    reason: TerminationReason,
    occurred_at: DateTime<Utc>,
    #[serde(default)]
    detail: String,
}

impl TryFrom<RawTermination> for TerminationContext {
    type Error = TerminationError;

    fn try_from(raw: RawTermination) -> Result<Self, Self::Error> {
        Self::new(raw.session_id, raw.reason, raw.occurred_at, raw.detail)
    }
}

impl TerminationContext {
    pub fn new(
        session_id: impl Into<String>,
        reason: TerminationReason,
        occurred_at: DateTime<Utc>,
        detail: impl Into<String>,
    ) -> Result<Self, TerminationError> {
        let session_id = session_id.into();
        if session_id.trim().is_empty() {
            return Err(TerminationError::EmptySessionId);
        }
        Ok(Self {
            session_id,
            reason,
            occurred_at,
            detail: detail.into(),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn reason(&self) -> TerminationReason {
        self.reason
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn detail(&self) -> &str {
        &self.detail
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn empty_session_id_is_rejected() {
        assert_eq!(
            TerminationContext::new("", TerminationReason::AuthFailure, at(), "invalid token"),
            Err(TerminationError::EmptySessionId)
        );
        assert_eq!(
            TerminationContext::new("  ", TerminationReason::AuthFailure, at(), "invalid token"),
            Err(TerminationError::EmptySessionId)
        );
    }

    #[test]
    fn reasons_use_wire_names() {
        let json = serde_json::to_value(TerminationReason::ShardUnavailable).unwrap();
        assert_eq!(json, "SHARD_UNAVAILABLE");
        assert_eq!(TerminationReason::PolicyTerminated.to_string(), "POLICY_TERMINATED");
    }

    #[test]
    fn deserialization_enforces_invariants() {
        let malformed = serde_json::json!({
            "session_id": "",
            "reason": "NORMAL_COMPLETION",
            "occurred_at": at(),
            "detail": "ticks reached",
        });
        assert!(serde_json::from_value::<TerminationContext>(malformed).is_err());

        let context = TerminationContext::new(
            "s1",
            TerminationReason::NormalCompletion,
            at(),
            "ticks reached",
        )
        .unwrap();
        let restored: TerminationContext =
            serde_json::from_value(serde_json::to_value(&context).unwrap()).unwrap();
        assert_eq!(restored, context);
    }
}
