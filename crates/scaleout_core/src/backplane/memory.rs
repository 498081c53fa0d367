//! Deterministic, thread-safe in-memory backplane.
//!
//! Used by tests and local simulations. Every map is a `DashMap`, so each
//! key is guarded by its own shard lock and no operation ever takes a global
//! lock. Behaviour at the contract level matches a remote store.

use super::{BackplaneError, BackplaneResult, GatewayShardBackplane};
use crate::envelope::MessageEnvelope;
use crate::termination::TerminationContext;
use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::{BTreeSet, HashMap, VecDeque};
use tracing::debug;

#[derive(Debug, Default)]
pub struct InMemoryBackplane {
    shard_heartbeats: DashMap<String, DateTime<Utc>>,
    session_to_shard: DashMap<String, String>,
    request_queues: DashMap<String, VecDeque<MessageEnvelope>>,
    response_queues: DashMap<String, VecDeque<MessageEnvelope>>,
    terminations: DashMap<String, TerminationContext>,
}

impl InMemoryBackplane {
    /// Creates an empty store with no shards, sessions or records.
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-destructive copy of every pending request queue.
    pub fn snapshot_requests(&self) -> HashMap<String, Vec<MessageEnvelope>> {
        self.request_queues
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().iter().cloned().collect()))
            .collect()
    }

    /// Number of requests waiting for `shard_id`.
    pub fn pending_requests(&self, shard_id: &str) -> usize {
        self.request_queues
            .get(shard_id)
            .map(|queue| queue.len())
            .unwrap_or(0)
    }

    /// Number of responses waiting for `session_id`.
    pub fn pending_responses(&self, session_id: &str) -> usize {
        self.response_queues
            .get(session_id)
            .map(|queue| queue.len())
            .unwrap_or(0)
    }

    /// Last recorded heartbeat for `shard_id`, including stale ones.
    pub fn last_heartbeat(&self, shard_id: &str) -> Option<DateTime<Utc>> {
        self.shard_heartbeats.get(shard_id).map(|beat| *beat)
    }

    fn drain(
        queues: &DashMap<String, VecDeque<MessageEnvelope>>,
        key: &str,
    ) -> Vec<MessageEnvelope> {
        queues
            .get_mut(key)
            .map(|mut queue| queue.drain(..).collect())
            .unwrap_or_default()
    }
}

impl GatewayShardBackplane for InMemoryBackplane {
    fn register_shard(&self, shard_id: &str, now: DateTime<Utc>) -> BackplaneResult<()> {
        debug!(shard_id, %now, "registering shard");
        self.shard_heartbeats.insert(shard_id.to_string(), now);
        Ok(())
    }

    fn heartbeat(&self, shard_id: &str, now: DateTime<Utc>) -> BackplaneResult<()> {
        self.shard_heartbeats.insert(shard_id.to_string(), now);
        Ok(())
    }

    fn active_shard_ids(
        &self,
        now: DateTime<Utc>,
        expiry: Duration,
    ) -> BackplaneResult<BTreeSet<String>> {
        let threshold = now - expiry;
        Ok(self
            .shard_heartbeats
            .iter()
            .filter(|entry| *entry.value() > threshold)
            .map(|entry| entry.key().clone())
            .collect())
    }

    fn map_session_to_shard(
        &self,
        session_id: &str,
        shard_id: &str,
        now: DateTime<Utc>,
    ) -> BackplaneResult<()> {
        self.session_to_shard
            .insert(session_id.to_string(), shard_id.to_string());
        self.heartbeat(shard_id, now)
    }

    fn session_shard(&self, session_id: &str) -> BackplaneResult<Option<String>> {
        Ok(self
            .session_to_shard
            .get(session_id)
            .map(|shard| shard.value().clone()))
    }

    fn append_request(&self, shard_id: &str, envelope: MessageEnvelope) -> BackplaneResult<()> {
        self.request_queues
            .entry(shard_id.to_string())
            .or_default()
            .push_back(envelope);
        Ok(())
    }

    fn drain_requests(&self, shard_id: &str) -> BackplaneResult<Vec<MessageEnvelope>> {
        Ok(Self::drain(&self.request_queues, shard_id))
    }

    fn append_response(
        &self,
        session_id: &str,
        envelope: MessageEnvelope,
    ) -> BackplaneResult<()> {
        self.response_queues
            .entry(session_id.to_string())
            .or_default()
            .push_back(envelope);
        Ok(())
    }

    fn drain_responses(&self, session_id: &str) -> BackplaneResult<Vec<MessageEnvelope>> {
        Ok(Self::drain(&self.response_queues, session_id))
    }

    fn record_termination(
        &self,
        session_id: &str,
        context: TerminationContext,
    ) -> BackplaneResult<TerminationContext> {
        if context.session_id() != session_id {
            return Err(BackplaneError::KeyMismatch {
                key: session_id.to_string(),
                record: context.session_id().to_string(),
            });
        }
        match self.terminations.entry(session_id.to_string()) {
            Entry::Occupied(existing) => {
                debug!(
                    session_id,
                    kept = %existing.get().reason(),
                    discarded = %context.reason(),
                    "termination already recorded"
                );
                Ok(existing.get().clone())
            }
            Entry::Vacant(slot) => Ok(slot.insert(context).value().clone()),
        }
    }

    fn find_termination(&self, session_id: &str) -> BackplaneResult<Option<TerminationContext>> {
        Ok(self
            .terminations
            .get(session_id)
            .map(|context| context.value().clone()))
    }
}
