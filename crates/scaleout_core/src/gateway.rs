//! Gateway-side routing decisions.
//!
//! A gateway is stateless: every handshake is decided from the backplane
//! alone, so any gateway can serve any client. The decision for a session is
//! either an assignment to the shard that owns it or the session's
//! permanent termination record.
//!
//! ## Decision order
//!
//! `open_session`:
//!
//! 1. Stored termination → returned unchanged
//! 2. Invalid token → `AUTH_FAILURE`
//! 3. Existing owner, else first active shard
//! 4. Nothing available → `SHARD_UNAVAILABLE`
//! 5. Map, enqueue `SESSION_CONNECTED`, assign
//!
//! `reconnect`:
//!
//! 1. Stored termination → returned unchanged
//! 2. No owner → `SHARD_UNAVAILABLE` ("session lost")
//! 3. Invalid token → `AUTH_FAILURE`
//! 4. Owner expired → `SHARD_UNAVAILABLE` ("shard missing")
//! 5. Enqueue `SESSION_RECONNECTED`, assign
//!
//! Every recorded termination is one-way; repeating a call returns the
//! stored fact rather than deriving a new one.

use crate::auth::TokenValidator;
use crate::backplane::GatewayShardBackplane;
use crate::clock::Clock;
use crate::envelope::{EnvelopeError, MessageEnvelope, MessageType};
use crate::error::RoutingResult;
use crate::telemetry::{SpanKind, Telemetry};
use crate::termination::{TerminationContext, TerminationReason};
use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info};

pub const DETAIL_INVALID_TOKEN: &str = "invalid token";
pub const DETAIL_NO_SHARD: &str = "no shard available";
pub const DETAIL_SESSION_LOST: &str = "session lost";
pub const DETAIL_SHARD_MISSING: &str = "shard missing";

/// Outcome of a handshake or a routed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewaySessionResult {
    Assigned { shard_id: String },
    Terminated(TerminationContext),
}

impl GatewaySessionResult {
    pub fn assigned(shard_id: impl Into<String>) -> Self {
        Self::Assigned {
            shard_id: shard_id.into(),
        }
    }

    pub fn shard_id(&self) -> Option<&str> {
        match self {
            Self::Assigned { shard_id } => Some(shard_id),
            Self::Terminated(_) => None,
        }
    }

    pub fn termination(&self) -> Option<&TerminationContext> {
        match self {
            Self::Assigned { .. } => None,
            Self::Terminated(context) => Some(context),
        }
    }

    pub fn is_assigned(&self) -> bool {
        matches!(self, Self::Assigned { .. })
    }
}

/// Client-facing session router.
///
/// Holds no session state of its own: assignments, liveness and
/// termination records all live in the backplane, so any number of
/// gateways can serve the same sessions.
pub struct GatewaySessionManager {
    backplane: Arc<dyn GatewayShardBackplane>,
    token_validator: Arc<dyn TokenValidator>,
    shard_expiry: Duration,
    clock: Arc<dyn Clock>,
    telemetry: Telemetry,
}

impl GatewaySessionManager {
    /// Creates a gateway over a shared backplane.
    ///
    /// # Arguments
    ///
    /// * `backplane` - Store shared with every shard and peer gateway
    /// * `token_validator` - Decides which handshake tokens are accepted
    /// * `shard_expiry` - How stale a heartbeat may be before the shard is
    ///   treated as gone
    /// * `clock` - Source of timestamps for records and liveness checks
    pub fn new(
        backplane: Arc<dyn GatewayShardBackplane>,
        token_validator: Arc<dyn TokenValidator>,
        shard_expiry: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            backplane,
            token_validator,
            shard_expiry,
            clock,
            telemetry: Telemetry::noop(),
        }
    }

    /// Reports spans and routing metrics into `telemetry`.
    pub fn with_telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Validates a first handshake and routes it to a shard.
    pub fn open_session(
        &self,
        session_id: &str,
        token: &str,
        trace_id: &str,
    ) -> RoutingResult<GatewaySessionResult> {
        let operation = self
            .telemetry
            .trace()
            .start_span("gateway.open_session", trace_id, SpanKind::Server);
        let _entered = operation.span.enter();
        let trace_id = envelope_trace_id(trace_id, &operation.trace_id);

        let outcome = self.try_open_session(session_id, token, trace_id);
        self.record_connection(&outcome);
        outcome
    }

    /// Validates a returning handshake against the session's current owner.
    pub fn reconnect(
        &self,
        session_id: &str,
        token: &str,
        trace_id: &str,
    ) -> RoutingResult<GatewaySessionResult> {
        let operation = self
            .telemetry
            .trace()
            .start_span("gateway.reconnect", trace_id, SpanKind::Server);
        let _entered = operation.span.enter();
        let trace_id = envelope_trace_id(trace_id, &operation.trace_id);

        let outcome = self.try_reconnect(session_id, token, trace_id);
        self.record_connection(&outcome);
        outcome
    }

    /// Forwards an in-session client request (e.g. `START_GAME`) to the
    /// owning shard.
    ///
    /// The connection is already authenticated, so no token is checked;
    /// ownership and liveness are checked exactly as on reconnect.
    pub fn route_request(
        &self,
        session_id: &str,
        kind: MessageType,
        trace_id: &str,
        payload: Map<String, Value>,
    ) -> RoutingResult<GatewaySessionResult> {
        let operation = self
            .telemetry
            .trace()
            .start_span("gateway.route_request", trace_id, SpanKind::Server);
        let _entered = operation.span.enter();
        let trace_id = envelope_trace_id(trace_id, &operation.trace_id);

        ensure_session_id(session_id)?;
        let now = self.clock.instant();
        if let Some(prior) = self.backplane.find_termination(session_id)? {
            return Ok(GatewaySessionResult::Terminated(prior));
        }
        let Some(shard_id) = self.backplane.session_shard(session_id)? else {
            return self.terminate(
                session_id,
                TerminationReason::ShardUnavailable,
                DETAIL_SESSION_LOST,
                now,
            );
        };
        if !self.is_active(&shard_id, now)? {
            return self.terminate(
                session_id,
                TerminationReason::ShardUnavailable,
                DETAIL_SHARD_MISSING,
                now,
            );
        }

        let envelope = MessageEnvelope::from_parts(
            uuid::Uuid::new_v4(),
            kind,
            now,
            session_id,
            trace_id,
            payload,
        )?;
        debug!(session_id, shard_id = %shard_id, kind = %envelope.kind(), "routing request");
        self.backplane.append_request(&shard_id, envelope)?;
        Ok(GatewaySessionResult::Assigned { shard_id })
    }

    fn try_open_session(
        &self,
        session_id: &str,
        token: &str,
        trace_id: &str,
    ) -> RoutingResult<GatewaySessionResult> {
        ensure_session_id(session_id)?;
        let now = self.clock.instant();
        if let Some(prior) = self.backplane.find_termination(session_id)? {
            debug!(session_id, reason = %prior.reason(), "session already terminated");
            return Ok(GatewaySessionResult::Terminated(prior));
        }
        if !self.token_validator.is_valid(token) {
            return self.terminate(
                session_id,
                TerminationReason::AuthFailure,
                DETAIL_INVALID_TOKEN,
                now,
            );
        }
        let Some(shard_id) = self.choose_shard(session_id, now)? else {
            return self.terminate(
                session_id,
                TerminationReason::ShardUnavailable,
                DETAIL_NO_SHARD,
                now,
            );
        };

        let envelope =
            MessageEnvelope::new(MessageType::SessionConnected, now, session_id, trace_id)?
                .with_payload("token", token);
        self.backplane.map_session_to_shard(session_id, &shard_id, now)?;
        self.backplane.append_request(&shard_id, envelope)?;

        info!(session_id, shard_id = %shard_id, "session assigned");
        Ok(GatewaySessionResult::Assigned { shard_id })
    }

    fn try_reconnect(
        &self,
        session_id: &str,
        token: &str,
        trace_id: &str,
    ) -> RoutingResult<GatewaySessionResult> {
        ensure_session_id(session_id)?;
        let now = self.clock.instant();
        if let Some(prior) = self.backplane.find_termination(session_id)? {
            debug!(session_id, reason = %prior.reason(), "session already terminated");
            return Ok(GatewaySessionResult::Terminated(prior));
        }
        let Some(shard_id) = self.backplane.session_shard(session_id)? else {
            return self.terminate(
                session_id,
                TerminationReason::ShardUnavailable,
                DETAIL_SESSION_LOST,
                now,
            );
        };
        if !self.token_validator.is_valid(token) {
            return self.terminate(
                session_id,
                TerminationReason::AuthFailure,
                DETAIL_INVALID_TOKEN,
                now,
            );
        }
        if !self.is_active(&shard_id, now)? {
            return self.terminate(
                session_id,
                TerminationReason::ShardUnavailable,
                DETAIL_SHARD_MISSING,
                now,
            );
        }

        let envelope =
            MessageEnvelope::new(MessageType::SessionReconnected, now, session_id, trace_id)?;
        self.backplane.append_request(&shard_id, envelope)?;

        info!(session_id, shard_id = %shard_id, "session reconnected");
        Ok(GatewaySessionResult::Assigned { shard_id })
    }

    fn choose_shard(&self, session_id: &str, now: DateTime<Utc>) -> RoutingResult<Option<String>> {
        if let Some(existing) = self.backplane.session_shard(session_id)? {
            return Ok(Some(existing));
        }
        Ok(self
            .backplane
            .active_shard_ids(now, self.shard_expiry)?
            .into_iter()
            .next())
    }

    fn is_active(&self, shard_id: &str, now: DateTime<Utc>) -> RoutingResult<bool> {
        Ok(self
            .backplane
            .active_shard_ids(now, self.shard_expiry)?
            .contains(shard_id))
    }

    fn terminate(
        &self,
        session_id: &str,
        reason: TerminationReason,
        detail: &str,
        now: DateTime<Utc>,
    ) -> RoutingResult<GatewaySessionResult> {
        let context = TerminationContext::new(session_id, reason, now, detail)?;
        let stored = self.backplane.record_termination(session_id, context)?;
        info!(
            session_id,
            reason = %stored.reason(),
            detail = stored.detail(),
            "session terminated by gateway"
        );
        Ok(GatewaySessionResult::Terminated(stored))
    }

    fn record_connection(&self, outcome: &RoutingResult<GatewaySessionResult>) {
        let success = matches!(outcome, Ok(GatewaySessionResult::Assigned { .. }));
        self.telemetry.metrics().record_connection(success);
    }
}

fn ensure_session_id(session_id: &str) -> Result<(), EnvelopeError> {
    if session_id.trim().is_empty() {
        return Err(EnvelopeError::EmptySessionId);
    }
    Ok(())
}

/// Envelopes keep the caller's correlation id; only a blank one is
/// replaced by the span's generated id.
fn envelope_trace_id<'a>(raw: &'a str, normalized: &'a str) -> &'a str {
    if raw.trim().is_empty() {
        normalized
    } else {
        raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backplane::InMemoryBackplane;
    use crate::clock::ManualClock;
    use crate::error::RoutingError;
    use chrono::TimeZone;

    struct Fixture {
        clock: Arc<ManualClock>,
        backplane: Arc<InMemoryBackplane>,
        telemetry: Telemetry,
    }

    impl Fixture {
        fn new() -> Self {
            let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
            Self {
                clock: Arc::new(ManualClock::new(start)),
                backplane: Arc::new(InMemoryBackplane::new()),
                telemetry: Telemetry::noop(),
            }
        }

        fn manager(&self, accept: bool, expiry_secs: i64) -> GatewaySessionManager {
            let validator: Arc<dyn TokenValidator> = Arc::new(move |_: &str| accept);
            GatewaySessionManager::new(
                self.backplane.clone(),
                validator,
                Duration::seconds(expiry_secs),
                self.clock.clone(),
            )
            .with_telemetry(self.telemetry.clone())
        }
    }

    #[test]
    fn no_active_shard_terminates_with_shard_unavailable() {
        let fixture = Fixture::new();
        let manager = fixture.manager(true, 5);

        let result = manager.open_session("s1", "ok", "trace-1").unwrap();

        let context = result.termination().unwrap();
        assert_eq!(context.reason(), TerminationReason::ShardUnavailable);
        assert_eq!(context.detail(), DETAIL_NO_SHARD);
    }

    #[test]
    fn open_session_reuses_existing_mapping() {
        let fixture = Fixture::new();
        let now = fixture.clock.instant();
        fixture.backplane.register_shard("shard-a", now).unwrap();
        fixture.backplane.register_shard("shard-b", now).unwrap();
        fixture.backplane.map_session_to_shard("s1", "shard-b", now).unwrap();
        let manager = fixture.manager(true, 5);

        let result = manager.open_session("s1", "ok", "trace-1").unwrap();

        assert_eq!(result.shard_id(), Some("shard-b"));
    }

    #[test]
    fn connected_envelope_carries_token_and_trace() {
        let fixture = Fixture::new();
        fixture.backplane.register_shard("shard-a", fixture.clock.instant()).unwrap();
        let manager = fixture.manager(true, 5);

        manager.open_session("s1", "validtoken", "trace-1").unwrap();

        let drained = fixture.backplane.drain_requests("shard-a").unwrap();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].kind(), &MessageType::SessionConnected);
        assert_eq!(drained[0].payload_str("token"), Some("validtoken"));
        assert_eq!(drained[0].trace_id(), "trace-1");
    }

    #[test]
    fn reconnect_without_mapping_reports_session_lost() {
        let fixture = Fixture::new();
        fixture.backplane.register_shard("shard-a", fixture.clock.instant()).unwrap();
        let manager = fixture.manager(true, 5);

        let result = manager.reconnect("ghost", "ok", "trace-1").unwrap();

        let context = result.termination().unwrap();
        assert_eq!(context.reason(), TerminationReason::ShardUnavailable);
        assert_eq!(context.detail(), DETAIL_SESSION_LOST);
    }

    #[test]
    fn reconnect_checks_mapping_before_token() {
        let fixture = Fixture::new();
        let manager = fixture.manager(false, 5);

        let result = manager.reconnect("ghost", "bad", "trace-1").unwrap();

        assert_eq!(
            result.termination().unwrap().reason(),
            TerminationReason::ShardUnavailable
        );
    }

    #[test]
    fn reconnect_with_bad_token_on_live_shard_is_auth_failure() {
        let fixture = Fixture::new();
        let now = fixture.clock.instant();
        fixture.backplane.register_shard("shard-a", now).unwrap();
        fixture.backplane.map_session_to_shard("s1", "shard-a", now).unwrap();
        let manager = fixture.manager(false, 5);

        let result = manager.reconnect("s1", "bad", "trace-1").unwrap();

        assert_eq!(result.termination().unwrap().reason(), TerminationReason::AuthFailure);
    }

    #[test]
    fn connection_counter_tracks_outcomes() {
        let fixture = Fixture::new();
        fixture.backplane.register_shard("shard-a", fixture.clock.instant()).unwrap();
        let manager = fixture.manager(true, 5);

        manager.open_session("s1", "ok", "trace-1").unwrap();
        manager.reconnect("s1", "ok", "trace-2").unwrap();
        manager.reconnect("s2", "ok", "trace-3").unwrap();

        let metrics = fixture.telemetry.metrics();
        assert_eq!(metrics.connections(true), 2);
        assert_eq!(metrics.connections(false), 1);
    }

    #[test]
    fn blank_session_id_is_a_caller_error() {
        let fixture = Fixture::new();
        let manager = fixture.manager(true, 5);

        let err = manager.open_session("", "ok", "trace-1").unwrap_err();

        assert!(matches!(err, RoutingError::Envelope(EnvelopeError::EmptySessionId)));
        assert!(fixture.backplane.find_termination("").unwrap().is_none());
    }

    #[test]
    fn blank_trace_id_is_replaced_in_envelopes() {
        let fixture = Fixture::new();
        fixture.backplane.register_shard("shard-a", fixture.clock.instant()).unwrap();
        let manager = fixture.manager(true, 5);

        manager.open_session("s1", "ok", "").unwrap();

        let drained = fixture.backplane.drain_requests("shard-a").unwrap();
        assert!(crate::telemetry::TraceSupport::is_valid_trace_id(drained[0].trace_id()));
    }

    #[test]
    fn route_request_forwards_to_owner() {
        let fixture = Fixture::new();
        fixture.backplane.register_shard("shard-a", fixture.clock.instant()).unwrap();
        let manager = fixture.manager(true, 5);
        manager.open_session("s1", "ok", "trace-1").unwrap();
        fixture.backplane.drain_requests("shard-a").unwrap();

        let result = manager
            .route_request("s1", MessageType::StartGame, "trace-2", Map::new())
            .unwrap();

        assert_eq!(result.shard_id(), Some("shard-a"));
        let drained = fixture.backplane.drain_requests("shard-a").unwrap();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].kind(), &MessageType::StartGame);
    }

    #[test]
    fn route_request_to_expired_owner_terminates() {
        let fixture = Fixture::new();
        fixture.backplane.register_shard("shard-a", fixture.clock.instant()).unwrap();
        let manager = fixture.manager(true, 3);
        manager.open_session("s1", "ok", "trace-1").unwrap();
        fixture.clock.advance_seconds(10);

        let result = manager
            .route_request("s1", MessageType::StartGame, "trace-2", Map::new())
            .unwrap();

        assert_eq!(result.termination().unwrap().detail(), DETAIL_SHARD_MISSING);
        assert_eq!(fixture.backplane.pending_requests("shard-a"), 1);
    }
}
