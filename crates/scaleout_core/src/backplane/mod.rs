//! Shared coordination store between gateways and shards.
//!
//! The backplane is the only channel through which two processes of the
//! scale-out tier talk to each other. It holds five kinds of facts, each
//! keyed by a single id:
//!
//! | Fact | Key | Semantics |
//! |------|-----|-----------|
//! | Shard heartbeat | shard id | last refresh instant, never deleted |
//! | Session ownership | session id | current owning shard |
//! | Inbound requests | shard id | FIFO, destructive drain |
//! | Outbound responses | session id | FIFO, destructive drain |
//! | Termination record | session id | write-once, first write wins |
//!
//! Correctness only needs per-key atomicity; no operation spans keys.
//! Every call is idempotent per key, so a caller that timed out against a
//! network-backed store may retry without corrupting state.
//!
//! Draining is destructive and unacknowledged. A crash between a drain and
//! the processing of its envelopes loses them; at-least-once delivery needs
//! an acknowledging store, which this contract does not express.

pub mod memory;

pub use memory::InMemoryBackplane;

use crate::envelope::MessageEnvelope;
use crate::termination::TerminationContext;
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeSet;
use thiserror::Error;

/// Failures a backplane implementation may report.
///
/// The in-memory store only ever reports [`BackplaneError::KeyMismatch`];
/// the remaining variants exist for remote stores.
#[derive(Debug, Error)]
pub enum BackplaneError {
    #[error("backplane unavailable: {0}")]
    Unavailable(String),

    #[error("termination record for '{record}' written under key '{key}'")]
    KeyMismatch { key: String, record: String },

    #[error("corrupt record under '{key}': {reason}")]
    Corrupt { key: String, reason: String },

    #[error("envelope rejected: {0}")]
    Rejected(String),
}

pub type BackplaneResult<T> = Result<T, BackplaneError>;

/// Contract every backplane (in-memory or remote) satisfies.
pub trait GatewayShardBackplane: Send + Sync {
    /// Records a shard and its initial heartbeat.
    fn register_shard(&self, shard_id: &str, now: DateTime<Utc>) -> BackplaneResult<()>;

    /// Refreshes a shard's heartbeat.
    fn heartbeat(&self, shard_id: &str, now: DateTime<Utc>) -> BackplaneResult<()>;

    /// Shards whose last heartbeat is strictly newer than `now - expiry`.
    ///
    /// Stale shards stay in storage; they only drop out of this set.
    fn active_shard_ids(
        &self,
        now: DateTime<Utc>,
        expiry: Duration,
    ) -> BackplaneResult<BTreeSet<String>>;

    /// Records ownership and refreshes the owning shard's heartbeat.
    fn map_session_to_shard(
        &self,
        session_id: &str,
        shard_id: &str,
        now: DateTime<Utc>,
    ) -> BackplaneResult<()>;

    /// Current owner of a session, if any.
    fn session_shard(&self, session_id: &str) -> BackplaneResult<Option<String>>;

    /// Appends to a shard's inbound FIFO.
    fn append_request(&self, shard_id: &str, envelope: MessageEnvelope) -> BackplaneResult<()>;

    /// Removes and returns the shard's whole inbound backlog, oldest first.
    fn drain_requests(&self, shard_id: &str) -> BackplaneResult<Vec<MessageEnvelope>>;

    /// Appends to a session's outbound FIFO.
    fn append_response(&self, session_id: &str, envelope: MessageEnvelope)
        -> BackplaneResult<()>;

    /// Removes and returns the session's whole outbound backlog, oldest first.
    fn drain_responses(&self, session_id: &str) -> BackplaneResult<Vec<MessageEnvelope>>;

    /// Stores the termination fact for a session.
    ///
    /// First write wins: when a record already exists it is kept and
    /// returned, and `context` is discarded. The returned value is always
    /// the record that is durably stored.
    fn record_termination(
        &self,
        session_id: &str,
        context: TerminationContext,
    ) -> BackplaneResult<TerminationContext>;

    /// The stored termination fact for a session, if any.
    fn find_termination(&self, session_id: &str) -> BackplaneResult<Option<TerminationContext>>;
}
