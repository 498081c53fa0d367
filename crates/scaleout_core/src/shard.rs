//! Game session shard.
//!
//! A shard owns the sessions the gateways mapped to it. It never receives
//! calls from gateways directly: on every [`GameSessionShard::tick`] it
//! drains its request queue from the backplane, advances its sessions, and
//! writes responses and termination records back.
//!
//! ```text
//! WAITING --START_GAME--> PLAYING --(ticks >= budget)--> TERMINATED
//! ```

use crate::backplane::GatewayShardBackplane;
use crate::clock::Clock;
use crate::envelope::{MessageEnvelope, MessageType};
use crate::error::RoutingResult;
use crate::telemetry::{SpanKind, Telemetry};
use crate::termination::{TerminationContext, TerminationReason};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DETAIL_TICKS_REACHED: &str = "ticks reached";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Waiting,
    Playing,
    Terminated,
}

/// Per-session bookkeeping, owned by exactly one shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub phase: SessionPhase,
    pub ticks: u32,
    /// Trace id of the last envelope that touched the session; reused for
    /// shard-initiated responses such as normal completion.
    pub last_trace_id: String,
}

impl SessionState {
    fn waiting(trace_id: &str) -> Self {
        Self {
            phase: SessionPhase::Waiting,
            ticks: 0,
            last_trace_id: trace_id.to_string(),
        }
    }
}

/// What a single tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub heartbeat_refreshed: bool,
    pub processed: usize,
    pub ignored: usize,
    pub failed: usize,
    pub terminated: Vec<String>,
}

enum Dispatch {
    Handled,
    Ignored,
}

/// Owner of a set of sessions, driven by an external scheduler.
///
/// The session table is private to the shard and mutated only through
/// [`tick`](Self::tick) and [`force_fail_session`](Self::force_fail_session),
/// so it needs no locking; everything shared goes through the backplane.
pub struct GameSessionShard {
    shard_id: String,
    backplane: Arc<dyn GatewayShardBackplane>,
    clock: Arc<dyn Clock>,
    heartbeat_interval: Duration,
    max_ticks_before_terminate: u32,
    telemetry: Telemetry,
    sessions: HashMap<String, SessionState>,
    next_heartbeat: DateTime<Utc>,
    last_tick: Option<DateTime<Utc>>,
}

impl GameSessionShard {
    /// Creates the shard and registers it with the backplane, which makes
    /// it eligible for new sessions immediately.
    ///
    /// The first [`tick`](Self::tick) refreshes the heartbeat; later ticks
    /// refresh it once per `heartbeat_interval`.
    pub fn new(
        shard_id: impl Into<String>,
        backplane: Arc<dyn GatewayShardBackplane>,
        clock: Arc<dyn Clock>,
        heartbeat_interval: Duration,
        max_ticks_before_terminate: u32,
    ) -> RoutingResult<Self> {
        let shard_id = shard_id.into();
        let now = clock.instant();
        backplane.register_shard(&shard_id, now)?;
        info!(shard_id = %shard_id, "shard registered");

        Ok(Self {
            shard_id,
            backplane,
            clock,
            heartbeat_interval,
            max_ticks_before_terminate,
            telemetry: Telemetry::noop(),
            sessions: HashMap::new(),
            next_heartbeat: now,
            last_tick: None,
        })
    }

    /// Reports spans, match starts and tick jitter into `telemetry` instead
    /// of a private no-op sink.
    pub fn with_telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn shard_id(&self) -> &str {
        &self.shard_id
    }

    pub fn phase(&self, session_id: &str) -> Option<SessionPhase> {
        self.sessions.get(session_id).map(|state| state.phase)
    }

    pub fn session(&self, session_id: &str) -> Option<&SessionState> {
        self.sessions.get(session_id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Runs one scheduling step.
    ///
    /// Order is fixed: heartbeat, drain, dispatch, advance, complete. A
    /// failing envelope is logged and counted; it never stops the rest of
    /// the tick.
    pub fn tick(&mut self) -> TickReport {
        let now = self.clock.instant();
        let mut report = TickReport::default();

        if let Some(previous) = self.last_tick {
            self.telemetry
                .metrics()
                .record_tick_jitter((now - previous) - self.heartbeat_interval);
        }
        self.last_tick = Some(now);

        if now >= self.next_heartbeat {
            match self.backplane.heartbeat(&self.shard_id, now) {
                Ok(()) => {
                    self.next_heartbeat = now + self.heartbeat_interval;
                    report.heartbeat_refreshed = true;
                }
                Err(e) => {
                    warn!(shard_id = %self.shard_id, error = %e, "heartbeat refresh failed")
                }
            }
        }

        let drained = self
            .backplane
            .drain_requests(&self.shard_id)
            .unwrap_or_else(|e| {
                warn!(shard_id = %self.shard_id, error = %e, "request drain failed");
                Vec::new()
            });

        for envelope in &drained {
            let operation = self.telemetry.trace().start_span(
                "shard.dispatch",
                envelope.trace_id(),
                SpanKind::Consumer,
            );
            let _entered = operation.span.enter();

            match self.dispatch(envelope) {
                Ok(Dispatch::Handled) => report.processed += 1,
                Ok(Dispatch::Ignored) => report.ignored += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        shard_id = %self.shard_id,
                        session_id = envelope.session_id(),
                        message_id = %envelope.message_id(),
                        kind = %envelope.kind(),
                        error = %e,
                        "envelope dispatch failed"
                    );
                }
            }
        }

        for state in self.sessions.values_mut() {
            if state.phase == SessionPhase::Playing {
                state.ticks = state.ticks.saturating_add(1);
            }
        }

        let mut finished: Vec<(String, String)> = self
            .sessions
            .iter()
            .filter(|(_, state)| {
                state.phase == SessionPhase::Playing
                    && state.ticks >= self.max_ticks_before_terminate
            })
            .map(|(id, state)| (id.clone(), state.last_trace_id.clone()))
            .collect();
        finished.sort();

        for (session_id, trace_id) in finished {
            match self.terminate(
                &session_id,
                &trace_id,
                TerminationReason::NormalCompletion,
                DETAIL_TICKS_REACHED,
            ) {
                Ok(Some(_)) => report.terminated.push(session_id),
                Ok(None) => {}
                Err(e) => warn!(
                    shard_id = %self.shard_id,
                    session_id = %session_id,
                    error = %e,
                    "normal completion failed, retrying next tick"
                ),
            }
        }

        report
    }

    /// Terminates a session on operator or policy request.
    ///
    /// Returns `None` when the session was already terminated on this
    /// shard, otherwise the record the backplane stored, which may be an
    /// earlier gateway termination. Fails only when the record itself could
    /// not be written; a lost `TERMINATED` response is logged, not retried.
    pub fn force_fail_session(
        &mut self,
        session_id: &str,
        trace_id: &str,
        reason: TerminationReason,
        detail: &str,
    ) -> RoutingResult<Option<TerminationContext>> {
        let operation = self.telemetry.trace().start_span(
            "shard.force_fail_session",
            trace_id,
            SpanKind::Internal,
        );
        let _entered = operation.span.enter();
        let trace_id = if trace_id.trim().is_empty() {
            operation.trace_id.as_str()
        } else {
            trace_id
        };
        self.terminate(session_id, trace_id, reason, detail)
    }

    fn dispatch(&mut self, envelope: &MessageEnvelope) -> RoutingResult<Dispatch> {
        let session_id = envelope.session_id();
        let trace_id = envelope.trace_id();

        if self.is_terminated(session_id, trace_id)? {
            debug!(
                session_id,
                kind = %envelope.kind(),
                "ignoring request for terminated session"
            );
            if envelope.kind() == &MessageType::StartGame {
                self.telemetry.metrics().record_match_start(false);
            }
            return Ok(Dispatch::Ignored);
        }

        match envelope.kind() {
            MessageType::SessionConnected => {
                self.sessions
                    .insert(session_id.to_string(), SessionState::waiting(trace_id));
                self.respond(MessageType::SessionAck, session_id, trace_id)?;
                debug!(session_id, "session waiting");
                Ok(Dispatch::Handled)
            }
            MessageType::SessionReconnected => {
                self.touch(session_id, trace_id);
                self.respond(MessageType::Reconnected, session_id, trace_id)?;
                debug!(session_id, "session reconnected");
                Ok(Dispatch::Handled)
            }
            MessageType::StartGame => {
                let state = self.touch(session_id, trace_id);
                state.phase = SessionPhase::Playing;
                state.ticks = 0;
                let outcome = self.respond(MessageType::PlayStarted, session_id, trace_id);
                self.telemetry.metrics().record_match_start(outcome.is_ok());
                outcome?;
                info!(session_id, shard_id = %self.shard_id, "match started");
                Ok(Dispatch::Handled)
            }
            other => {
                debug!(session_id, kind = %other, "ignoring unrecognised request type");
                Ok(Dispatch::Ignored)
            }
        }
    }

    /// Whether the session is closed, either locally or by a record another
    /// participant (usually a gateway) wrote first. A foreign record is
    /// adopted so later requests skip the lookup.
    fn is_terminated(&mut self, session_id: &str, trace_id: &str) -> RoutingResult<bool> {
        if self.phase(session_id) == Some(SessionPhase::Terminated) {
            return Ok(true);
        }
        let Some(record) = self.backplane.find_termination(session_id)? else {
            return Ok(false);
        };
        debug!(
            session_id,
            shard_id = %self.shard_id,
            reason = %record.reason(),
            "adopting termination recorded elsewhere"
        );
        let state = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionState::waiting(trace_id));
        state.phase = SessionPhase::Terminated;
        Ok(true)
    }

    /// Returns the session's state, creating it in `WAITING` if the shard
    /// has not seen it yet, and records the latest trace id.
    fn touch(&mut self, session_id: &str, trace_id: &str) -> &mut SessionState {
        let state = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionState::waiting(trace_id));
        state.last_trace_id = trace_id.to_string();
        state
    }

    fn respond(&self, kind: MessageType, session_id: &str, trace_id: &str) -> RoutingResult<()> {
        let envelope = MessageEnvelope::new(kind, self.clock.instant(), session_id, trace_id)?;
        self.backplane.append_response(session_id, envelope)?;
        Ok(())
    }

    fn terminate(
        &mut self,
        session_id: &str,
        trace_id: &str,
        reason: TerminationReason,
        detail: &str,
    ) -> RoutingResult<Option<TerminationContext>> {
        if self.phase(session_id) == Some(SessionPhase::Terminated) {
            return Ok(None);
        }

        let now = self.clock.instant();
        let context = TerminationContext::new(session_id, reason, now, detail)?;
        let stored = self.backplane.record_termination(session_id, context)?;

        let state = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionState::waiting(trace_id));
        state.phase = SessionPhase::Terminated;

        if let Err(e) = self.announce_termination(session_id, trace_id, &stored, now) {
            warn!(
                session_id,
                shard_id = %self.shard_id,
                error = %e,
                "termination recorded but TERMINATED response was not enqueued"
            );
        }

        info!(
            session_id,
            shard_id = %self.shard_id,
            reason = %stored.reason(),
            detail = stored.detail(),
            "session terminated by shard"
        );
        Ok(Some(stored))
    }

    fn announce_termination(
        &self,
        session_id: &str,
        trace_id: &str,
        stored: &TerminationContext,
        now: DateTime<Utc>,
    ) -> RoutingResult<()> {
        let response = MessageEnvelope::new(MessageType::Terminated, now, session_id, trace_id)?
            .with_payload("reason", stored.reason().as_str())
            .with_payload("detail", stored.detail());
        self.backplane.append_response(session_id, response)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backplane::{BackplaneError, BackplaneResult, InMemoryBackplane};
    use crate::clock::ManualClock;
    use chrono::TimeZone;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn envelope(kind: MessageType, session_id: &str) -> MessageEnvelope {
        MessageEnvelope::new(kind, start(), session_id, "trace-1").unwrap()
    }

    fn shard_with(
        backplane: Arc<dyn GatewayShardBackplane>,
        clock: Arc<ManualClock>,
        max_ticks: u32,
    ) -> GameSessionShard {
        GameSessionShard::new("shard-a", backplane, clock, Duration::seconds(1), max_ticks).unwrap()
    }

    fn kinds(envelopes: &[MessageEnvelope]) -> Vec<MessageType> {
        envelopes.iter().map(|e| e.kind().clone()).collect()
    }

    #[test]
    fn new_registers_the_shard() {
        let backplane = Arc::new(InMemoryBackplane::new());
        let clock = Arc::new(ManualClock::new(start()));
        let _shard = shard_with(backplane.clone(), clock, 3);

        let active = backplane.active_shard_ids(start(), Duration::seconds(5)).unwrap();
        assert!(active.contains("shard-a"));
    }

    #[test]
    fn dispatch_emits_responses_in_order() {
        let backplane = Arc::new(InMemoryBackplane::new());
        let clock = Arc::new(ManualClock::new(start()));
        let mut shard = shard_with(backplane.clone(), clock, 10);

        backplane
            .append_request("shard-a", envelope(MessageType::SessionConnected, "s1"))
            .unwrap();
        backplane
            .append_request("shard-a", envelope(MessageType::SessionReconnected, "s1"))
            .unwrap();
        backplane.append_request("shard-a", envelope(MessageType::StartGame, "s1")).unwrap();
        let report = shard.tick();

        assert_eq!(report.processed, 3);
        assert_eq!(shard.phase("s1"), Some(SessionPhase::Playing));
        assert_eq!(
            kinds(&backplane.drain_responses("s1").unwrap()),
            vec![MessageType::SessionAck, MessageType::Reconnected, MessageType::PlayStarted]
        );
    }

    #[test]
    fn unknown_types_are_ignored_without_response() {
        let backplane = Arc::new(InMemoryBackplane::new());
        let clock = Arc::new(ManualClock::new(start()));
        let mut shard = shard_with(backplane.clone(), clock, 10);

        backplane
            .append_request("shard-a", envelope(MessageType::Other("CHAT".into()), "s1"))
            .unwrap();
        let report = shard.tick();

        assert_eq!(report.ignored, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(backplane.pending_responses("s1"), 0);
        assert_eq!(shard.session_count(), 0);
    }

    #[test]
    fn heartbeat_refreshes_only_when_due() {
        let backplane = Arc::new(InMemoryBackplane::new());
        let clock = Arc::new(ManualClock::new(start()));
        let mut shard = shard_with(backplane.clone(), clock.clone(), 10);

        assert!(shard.tick().heartbeat_refreshed);
        assert!(!shard.tick().heartbeat_refreshed);
        clock.advance_seconds(1);
        assert!(shard.tick().heartbeat_refreshed);
        assert_eq!(backplane.last_heartbeat("shard-a"), Some(start() + Duration::seconds(1)));
        assert!(!shard.tick().heartbeat_refreshed);
    }

    #[test]
    fn start_game_resets_tick_counter() {
        let backplane = Arc::new(InMemoryBackplane::new());
        let clock = Arc::new(ManualClock::new(start()));
        let mut shard = shard_with(backplane.clone(), clock, 10);

        backplane.append_request("shard-a", envelope(MessageType::StartGame, "s1")).unwrap();
        shard.tick();
        shard.tick();
        assert_eq!(shard.session("s1").unwrap().ticks, 2);

        backplane.append_request("shard-a", envelope(MessageType::StartGame, "s1")).unwrap();
        shard.tick();
        assert_eq!(shard.session("s1").unwrap().ticks, 1);
    }

    #[test]
    fn waiting_sessions_do_not_advance() {
        let backplane = Arc::new(InMemoryBackplane::new());
        let clock = Arc::new(ManualClock::new(start()));
        let mut shard = shard_with(backplane.clone(), clock, 1);

        backplane
            .append_request("shard-a", envelope(MessageType::SessionConnected, "s1"))
            .unwrap();
        for _ in 0..5 {
            shard.tick();
        }

        assert_eq!(shard.phase("s1"), Some(SessionPhase::Waiting));
        assert_eq!(shard.session("s1").unwrap().ticks, 0);
    }

    #[test]
    fn completion_writes_record_and_response() {
        let backplane = Arc::new(InMemoryBackplane::new());
        let clock = Arc::new(ManualClock::new(start()));
        let mut shard = shard_with(backplane.clone(), clock, 2);

        backplane.append_request("shard-a", envelope(MessageType::StartGame, "s1")).unwrap();
        assert!(shard.tick().terminated.is_empty());
        assert_eq!(shard.tick().terminated, vec!["s1".to_string()]);

        let record = backplane.find_termination("s1").unwrap().unwrap();
        assert_eq!(record.reason(), TerminationReason::NormalCompletion);
        assert_eq!(record.detail(), DETAIL_TICKS_REACHED);

        let responses = backplane.drain_responses("s1").unwrap();
        let last = responses.last().unwrap();
        assert_eq!(last.kind(), &MessageType::Terminated);
        assert_eq!(last.payload_str("reason"), Some("NORMAL_COMPLETION"));
        assert_eq!(last.trace_id(), "trace-1");
    }

    #[test]
    fn terminated_sessions_ignore_further_requests() {
        let backplane = Arc::new(InMemoryBackplane::new());
        let clock = Arc::new(ManualClock::new(start()));
        let mut shard = shard_with(backplane.clone(), clock, 10);

        shard
            .force_fail_session("s1", "trace-9", TerminationReason::PolicyTerminated, "kicked")
            .unwrap();
        backplane.drain_responses("s1").unwrap();
        backplane
            .append_request("shard-a", envelope(MessageType::SessionConnected, "s1"))
            .unwrap();
        let report = shard.tick();

        assert_eq!(report.ignored, 1);
        assert_eq!(shard.phase("s1"), Some(SessionPhase::Terminated));
        assert_eq!(backplane.pending_responses("s1"), 0);
    }

    #[test]
    fn force_fail_is_a_no_op_the_second_time() {
        let backplane = Arc::new(InMemoryBackplane::new());
        let clock = Arc::new(ManualClock::new(start()));
        let mut shard = shard_with(backplane.clone(), clock, 10);
        backplane.append_request("shard-a", envelope(MessageType::StartGame, "s1")).unwrap();
        shard.tick();

        let first = shard
            .force_fail_session("s1", "trace-2", TerminationReason::PolicyTerminated, "kicked")
            .unwrap();
        let second = shard
            .force_fail_session("s1", "trace-3", TerminationReason::PolicyTerminated, "again")
            .unwrap();

        assert_eq!(first.unwrap().detail(), "kicked");
        assert!(second.is_none());
        let terminated = backplane
            .drain_responses("s1")
            .unwrap()
            .into_iter()
            .filter(|e| e.kind() == &MessageType::Terminated)
            .count();
        assert_eq!(terminated, 1);
    }

    #[test]
    fn force_fail_reports_an_earlier_gateway_record() {
        let backplane = Arc::new(InMemoryBackplane::new());
        let clock = Arc::new(ManualClock::new(start()));
        let mut shard = shard_with(backplane.clone(), clock, 10);
        let earlier = TerminationContext::new(
            "s1",
            TerminationReason::AuthFailure,
            start(),
            "invalid token",
        )
        .unwrap();
        backplane.record_termination("s1", earlier.clone()).unwrap();

        let stored = shard
            .force_fail_session("s1", "trace-2", TerminationReason::PolicyTerminated, "kicked")
            .unwrap();

        assert_eq!(stored, Some(earlier));
        let responses = backplane.drain_responses("s1").unwrap();
        assert_eq!(responses[0].payload_str("reason"), Some("AUTH_FAILURE"));
    }

    #[test]
    fn match_starts_are_counted() {
        let backplane = Arc::new(InMemoryBackplane::new());
        let clock = Arc::new(ManualClock::new(start()));
        let telemetry = Telemetry::noop();
        let mut shard =
            shard_with(backplane.clone(), clock, 10).with_telemetry(telemetry.clone());

        backplane.append_request("shard-a", envelope(MessageType::StartGame, "s1")).unwrap();
        shard.tick();

        assert_eq!(telemetry.metrics().match_starts(true), 1);
    }

    #[test]
    fn jitter_is_recorded_from_the_second_tick() {
        let backplane = Arc::new(InMemoryBackplane::new());
        let clock = Arc::new(ManualClock::new(start()));
        let telemetry = Telemetry::noop();
        let mut shard = shard_with(backplane, clock.clone(), 10).with_telemetry(telemetry.clone());

        shard.tick();
        assert_eq!(telemetry.metrics().tick_jitter_samples(), 0);
        clock.advance(Duration::milliseconds(1250));
        shard.tick();

        assert_eq!(telemetry.metrics().tick_jitter_samples(), 1);
        assert_eq!(telemetry.metrics().tick_jitter_sum_ms(), 250.0);
    }

    #[test]
    fn gateway_termination_closes_an_unseen_session() {
        let backplane = Arc::new(InMemoryBackplane::new());
        let clock = Arc::new(ManualClock::new(start()));
        let telemetry = Telemetry::noop();
        let mut shard =
            shard_with(backplane.clone(), clock, 10).with_telemetry(telemetry.clone());

        backplane
            .append_request("shard-a", envelope(MessageType::SessionConnected, "s1"))
            .unwrap();
        backplane.append_request("shard-a", envelope(MessageType::StartGame, "s1")).unwrap();
        let lost = TerminationContext::new(
            "s1",
            TerminationReason::ShardUnavailable,
            start(),
            "shard missing",
        )
        .unwrap();
        backplane.record_termination("s1", lost).unwrap();
        let report = shard.tick();

        assert_eq!(report.ignored, 2);
        assert_eq!(report.processed, 0);
        assert_eq!(shard.phase("s1"), Some(SessionPhase::Terminated));
        assert_eq!(backplane.pending_responses("s1"), 0);
        assert_eq!(telemetry.metrics().match_starts(false), 1);
        assert_eq!(
            backplane.find_termination("s1").unwrap().unwrap().reason(),
            TerminationReason::ShardUnavailable
        );
    }

    /// Delegates to an in-memory store but fails every response write for
    /// one session.
    struct RejectingResponses {
        inner: InMemoryBackplane,
        poisoned_session: &'static str,
        fail_heartbeat: AtomicBool,
    }

    impl GatewayShardBackplane for RejectingResponses {
        fn register_shard(&self, shard_id: &str, now: DateTime<Utc>) -> BackplaneResult<()> {
            self.inner.register_shard(shard_id, now)
        }

        fn heartbeat(&self, shard_id: &str, now: DateTime<Utc>) -> BackplaneResult<()> {
            if self.fail_heartbeat.load(Ordering::SeqCst) {
                return Err(BackplaneError::Unavailable("heartbeat store down".into()));
            }
            self.inner.heartbeat(shard_id, now)
        }

        fn active_shard_ids(
            &self,
            now: DateTime<Utc>,
            expiry: Duration,
        ) -> BackplaneResult<BTreeSet<String>> {
            self.inner.active_shard_ids(now, expiry)
        }

        fn map_session_to_shard(
            &self,
            session_id: &str,
            shard_id: &str,
            now: DateTime<Utc>,
        ) -> BackplaneResult<()> {
            self.inner.map_session_to_shard(session_id, shard_id, now)
        }

        fn session_shard(&self, session_id: &str) -> BackplaneResult<Option<String>> {
            self.inner.session_shard(session_id)
        }

        fn append_request(&self, shard_id: &str, envelope: MessageEnvelope) -> BackplaneResult<()> {
            self.inner.append_request(shard_id, envelope)
        }

        fn drain_requests(&self, shard_id: &str) -> BackplaneResult<Vec<MessageEnvelope>> {
            self.inner.drain_requests(shard_id)
        }

        fn append_response(
            &self,
            session_id: &str,
            envelope: MessageEnvelope,
        ) -> BackplaneResult<()> {
            if session_id == self.poisoned_session {
                return Err(BackplaneError::Rejected(format!("response for {session_id}")));
            }
            self.inner.append_response(session_id, envelope)
        }

        fn drain_responses(&self, session_id: &str) -> BackplaneResult<Vec<MessageEnvelope>> {
            self.inner.drain_responses(session_id)
        }

        fn record_termination(
            &self,
            session_id: &str,
            context: TerminationContext,
        ) -> BackplaneResult<TerminationContext> {
            self.inner.record_termination(session_id, context)
        }

        fn find_termination(
            &self,
            session_id: &str,
        ) -> BackplaneResult<Option<TerminationContext>> {
            self.inner.find_termination(session_id)
        }
    }

    #[test]
    fn one_failing_envelope_does_not_stop_the_tick() {
        let backplane = Arc::new(RejectingResponses {
            inner: InMemoryBackplane::new(),
            poisoned_session: "bad",
            fail_heartbeat: AtomicBool::new(false),
        });
        let clock = Arc::new(ManualClock::new(start()));
        let mut shard = shard_with(backplane.clone(), clock.clone(), 10);

        backplane
            .append_request("shard-a", envelope(MessageType::SessionConnected, "s1"))
            .unwrap();
        backplane
            .append_request("shard-a", envelope(MessageType::SessionConnected, "bad"))
            .unwrap();
        backplane
            .append_request("shard-a", envelope(MessageType::SessionConnected, "s2"))
            .unwrap();
        clock.advance_seconds(1);
        let report = shard.tick();

        assert!(report.heartbeat_refreshed);
        assert_eq!(report.processed, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(backplane.inner.pending_responses("s1"), 1);
        assert_eq!(backplane.inner.pending_responses("s2"), 1);
    }

    #[test]
    fn force_fail_succeeds_when_the_response_cannot_be_enqueued() {
        let backplane = Arc::new(RejectingResponses {
            inner: InMemoryBackplane::new(),
            poisoned_session: "bad",
            fail_heartbeat: AtomicBool::new(false),
        });
        let clock = Arc::new(ManualClock::new(start()));
        let mut shard = shard_with(backplane.clone(), clock, 10);

        let stored = shard
            .force_fail_session("bad", "trace-2", TerminationReason::PolicyTerminated, "kicked")
            .unwrap()
            .unwrap();

        assert_eq!(stored.reason(), TerminationReason::PolicyTerminated);
        assert_eq!(shard.phase("bad"), Some(SessionPhase::Terminated));
        assert_eq!(backplane.inner.find_termination("bad").unwrap(), Some(stored));
        assert_eq!(backplane.inner.pending_responses("bad"), 0);
        let again = shard
            .force_fail_session("bad", "trace-3", TerminationReason::PolicyTerminated, "kicked")
            .unwrap();
        assert!(again.is_none());
    }

    #[test]
    fn failed_heartbeat_is_retried_next_tick() {
        let backplane = Arc::new(RejectingResponses {
            inner: InMemoryBackplane::new(),
            poisoned_session: "none",
            fail_heartbeat: AtomicBool::new(true),
        });
        let clock = Arc::new(ManualClock::new(start()));
        let mut shard = shard_with(backplane.clone(), clock.clone(), 10);

        clock.advance_seconds(1);
        assert!(!shard.tick().heartbeat_refreshed);

        backplane.fail_heartbeat.store(false, Ordering::SeqCst);
        assert!(shard.tick().heartbeat_refreshed);
    }
}
