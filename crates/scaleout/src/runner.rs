//! Local simulation driver.
//!
//! Stands in for the transport layer and the tick scheduler: shards tick
//! on tokio intervals, a gateway opens the configured sessions and starts
//! a match for each one it assigns, and a pump drains response queues the
//! way a socket writer would.

use anyhow::{Context, Result};
use futures::future::join_all;
use prometheus::Registry;
use scaleout_core::{
    Clock, GameSessionShard, GatewaySessionManager, GatewaySessionResult, GatewayShardBackplane,
    InMemoryBackplane, MessageType, RoutingConfig, RoutingMetrics, StaticTokenValidator,
    SystemClock, Telemetry, TraceSupport,
};
use serde_json::Map;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::AppConfig;

/// Never accepted by the gateway.
const REJECTED_TOKEN: &str = "";

/// Outcome of one simulation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulationSummary {
    pub opened: usize,
    pub assigned: usize,
    pub delivered: usize,
    /// Terminated sessions keyed by wire reason, e.g. `NORMAL_COMPLETION`
    pub terminations: BTreeMap<&'static str, usize>,
    pub still_open: usize,
}

pub struct Simulation {
    config: AppConfig,
    routing: RoutingConfig,
    backplane: Arc<InMemoryBackplane>,
    clock: Arc<dyn Clock>,
    telemetry: Telemetry,
}

impl Simulation {
    pub fn new(config: AppConfig) -> Result<Self> {
        let routing = config.to_routing_config()?;
        let metrics = RoutingMetrics::new(Arc::new(Registry::new()))
            .context("registering routing metrics")?;

        Ok(Self {
            config,
            routing,
            backplane: Arc::new(InMemoryBackplane::new()),
            clock: Arc::new(SystemClock),
            telemetry: Telemetry::new(metrics),
        })
    }

    /// Runs until every session is terminated or `shutdown` resolves.
    pub async fn run<F>(self, shutdown: F) -> Result<SimulationSummary>
    where
        F: Future<Output = Result<()>>,
    {
        let tick_tasks = self.spawn_shards()?;
        let gateway = self.gateway();
        let (sessions, assigned) = self.open_sessions(&gateway)?;

        let mut delivered = 0;
        tokio::select! {
            pumped = self.pump_responses(&sessions, &mut delivered) => {
                pumped?;
                info!("All sessions terminated");
            }
            signalled = shutdown => {
                signalled?;
                info!("Shutdown requested, stopping simulation");
            }
        }

        for task in &tick_tasks {
            task.abort();
        }
        join_all(tick_tasks).await;
        self.deliver(&sessions, &mut delivered)?;

        let summary = self.summarize(&sessions, assigned, delivered)?;
        info!(
            opened = summary.opened,
            assigned = summary.assigned,
            delivered = summary.delivered,
            still_open = summary.still_open,
            terminations = ?summary.terminations,
            "Simulation finished"
        );

        if self.config.metrics.dump_on_shutdown {
            let text = self
                .telemetry
                .metrics()
                .encode_text()
                .context("encoding metrics")?;
            info!("Metrics:\n{text}");
        }

        Ok(summary)
    }

    fn spawn_shards(&self) -> Result<Vec<JoinHandle<()>>> {
        let period = Duration::from_millis(self.config.shards.heartbeat_interval_ms);
        let mut tasks = Vec::with_capacity(self.config.shards.count);

        for index in 0..self.config.shards.count {
            let shard_id = format!("shard-{index}");
            let mut shard = GameSessionShard::new(
                shard_id.clone(),
                self.backplane.clone(),
                self.clock.clone(),
                self.routing.heartbeat_interval,
                self.routing.max_ticks_before_terminate,
            )?
            .with_telemetry(self.telemetry.clone());

            let task = async move {
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    interval.tick().await;
                    let report = shard.tick();
                    if report.failed > 0 {
                        warn!(failed = report.failed, "Tick skipped failing envelopes");
                    }
                    if report.processed > 0 || !report.terminated.is_empty() {
                        debug!(
                            processed = report.processed,
                            ignored = report.ignored,
                            terminated = ?report.terminated,
                            "Tick"
                        );
                    }
                }
            };
            tasks.push(tokio::spawn(task.instrument(info_span!("shard", shard_id = %shard_id))));
        }

        info!(count = tasks.len(), "Shards running");
        Ok(tasks)
    }

    fn gateway(&self) -> GatewaySessionManager {
        let tokens = self.config.gateway.accepted_tokens.iter().cloned();
        let validator = StaticTokenValidator::new(tokens);
        GatewaySessionManager::new(
            self.backplane.clone(),
            Arc::new(validator),
            self.routing.shard_expiry,
            self.clock.clone(),
        )
        .with_telemetry(self.telemetry.clone())
    }

    fn open_sessions(&self, gateway: &GatewaySessionManager) -> Result<(Vec<String>, usize)> {
        let trace = TraceSupport::new();
        let accepted = self.config.simulation.sessions;
        let total = accepted + self.config.simulation.rejected_sessions;
        let mut sessions = Vec::with_capacity(total);
        let mut assigned = 0;

        for index in 0..total {
            let session_id = format!("session-{index}");
            let token = if index < accepted {
                self.config.simulation.token.as_str()
            } else {
                REJECTED_TOKEN
            };
            let trace_id = trace.generate_trace_id();

            match gateway.open_session(&session_id, token, &trace_id)? {
                GatewaySessionResult::Assigned { .. } => {
                    assigned += 1;
                    let routed = gateway.route_request(
                        &session_id,
                        MessageType::StartGame,
                        &trace_id,
                        Map::new(),
                    )?;
                    if let Some(context) = routed.termination() {
                        warn!(
                            session_id = %session_id,
                            reason = %context.reason(),
                            "Match could not start"
                        );
                    }
                }
                GatewaySessionResult::Terminated(context) => {
                    info!(
                        session_id = %session_id,
                        reason = %context.reason(),
                        detail = context.detail(),
                        "Session rejected"
                    );
                }
            }
            sessions.push(session_id);
        }

        Ok((sessions, assigned))
    }

    async fn pump_responses(&self, sessions: &[String], delivered: &mut usize) -> Result<()> {
        let mut interval =
            tokio::time::interval(Duration::from_millis(self.config.simulation.pump_interval_ms));
        loop {
            interval.tick().await;
            let finished = self.all_terminated(sessions)?;
            self.deliver(sessions, delivered)?;
            if finished {
                return Ok(());
            }
        }
    }

    fn deliver(&self, sessions: &[String], delivered: &mut usize) -> Result<()> {
        for session_id in sessions {
            for envelope in self.backplane.drain_responses(session_id)? {
                *delivered += 1;
                info!(
                    session_id = %session_id,
                    kind = %envelope.kind(),
                    trace_id = envelope.trace_id(),
                    reason = envelope.payload_str("reason").unwrap_or_default(),
                    "Delivered response"
                );
            }
        }
        Ok(())
    }

    fn all_terminated(&self, sessions: &[String]) -> Result<bool> {
        for session_id in sessions {
            if self.backplane.find_termination(session_id)?.is_none() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn summarize(
        &self,
        sessions: &[String],
        assigned: usize,
        delivered: usize,
    ) -> Result<SimulationSummary> {
        let mut summary = SimulationSummary {
            opened: sessions.len(),
            assigned,
            delivered,
            ..SimulationSummary::default()
        };
        for session_id in sessions {
            match self.backplane.find_termination(session_id)? {
                Some(context) => {
                    *summary.terminations.entry(context.reason().as_str()).or_default() += 1;
                }
                None => summary.still_open += 1,
            }
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.shards.count = 2;
        config.shards.heartbeat_interval_ms = 10;
        config.shards.max_ticks_before_terminate = 3;
        config.gateway.shard_expiry_ms = 200;
        config.simulation.sessions = 3;
        config.simulation.rejected_sessions = 1;
        config.simulation.pump_interval_ms = 5;
        config
    }

    #[tokio::test]
    async fn runs_every_session_to_completion() {
        let simulation = Simulation::new(fast_config()).unwrap();

        let summary = tokio::time::timeout(
            Duration::from_secs(10),
            simulation.run(std::future::pending::<Result<()>>()),
        )
        .await
        .expect("simulation should finish on its own")
        .unwrap();

        assert_eq!(summary.opened, 4);
        assert_eq!(summary.assigned, 3);
        assert_eq!(summary.still_open, 0);
        assert_eq!(summary.terminations.get("NORMAL_COMPLETION"), Some(&3));
        assert_eq!(summary.terminations.get("AUTH_FAILURE"), Some(&1));
        // SESSION_ACK, PLAY_STARTED and TERMINATED per assigned session
        assert_eq!(summary.delivered, 9);
    }

    #[tokio::test]
    async fn shutdown_stops_an_unfinished_run() {
        let mut config = fast_config();
        config.shards.max_ticks_before_terminate = 100_000;
        let simulation = Simulation::new(config).unwrap();

        let summary = simulation.run(async { Ok(()) }).await.unwrap();

        assert_eq!(summary.still_open, 3);
        assert_eq!(summary.terminations.get("AUTH_FAILURE"), Some(&1));
    }

    #[tokio::test]
    async fn shutdown_errors_are_propagated() {
        let simulation = Simulation::new(fast_config()).unwrap();

        let result = simulation
            .run(async { Err(anyhow::anyhow!("signal handler failed")) })
            .await;

        assert!(result.is_err());
    }
}
