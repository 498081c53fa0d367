//! Prometheus metrics for the routing core.
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `scaleout_connections_total` | Counter | `status` |
//! | `scaleout_match_starts_total` | Counter | `status` |
//! | `scaleout_tick_jitter_milliseconds` | Histogram | |
//!
//! Tick jitter is `|actual inter-tick delta - configured heartbeat interval|`.

use chrono::Duration;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::Arc;
use thiserror::Error;

/// Histogram buckets for tick jitter, in milliseconds.
pub const TICK_JITTER_BUCKETS: &[f64] = &[1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0];

const SUCCESS: &str = "success";
const FAILURE: &str = "failure";

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("failed to register metric: {0}")]
    Registration(#[from] prometheus::Error),

    #[error("failed to encode metrics: {0}")]
    Encoding(String),
}

pub type MetricsResult<T> = Result<T, MetricsError>;

/// Counters and distributions reported by gateways and shards.
///
/// Cheap to clone; every clone reports into the same registry.
#[derive(Clone)]
pub struct RoutingMetrics {
    registry: Arc<Registry>,
    connections: IntCounterVec,
    match_starts: IntCounterVec,
    tick_jitter: Histogram,
}

impl std::fmt::Debug for RoutingMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingMetrics").finish_non_exhaustive()
    }
}

impl RoutingMetrics {
    /// Creates the metric families and registers them with `registry`.
    ///
    /// # Errors
    ///
    /// Fails when a family with the same name is already registered.
    pub fn new(registry: Arc<Registry>) -> MetricsResult<Self> {
        let connections = IntCounterVec::new(
            Opts::new(
                "scaleout_connections_total",
                "Gateway connection attempts by outcome",
            ),
            &["status"],
        )?;
        let match_starts = IntCounterVec::new(
            Opts::new("scaleout_match_starts_total", "Match start attempts by outcome"),
            &["status"],
        )?;
        let tick_jitter = Histogram::with_opts(
            HistogramOpts::new(
                "scaleout_tick_jitter_milliseconds",
                "Deviation of the shard tick delta from the heartbeat interval",
            )
            .buckets(TICK_JITTER_BUCKETS.to_vec()),
        )?;

        registry.register(Box::new(connections.clone()))?;
        registry.register(Box::new(match_starts.clone()))?;
        registry.register(Box::new(tick_jitter.clone()))?;

        Ok(Self {
            registry,
            connections,
            match_starts,
            tick_jitter,
        })
    }

    /// Metrics backed by a private registry nobody scrapes.
    pub fn noop() -> Self {
        match Self::new(Arc::new(Registry::new())) {
            Ok(metrics) => metrics,
            // A fresh registry cannot hold duplicates, and the static
            // family definitions above are valid.
            Err(e) => unreachable!("fresh registry rejected routing metrics: {e}"),
        }
    }

    pub fn record_connection(&self, success: bool) {
        self.connections
            .with_label_values(&[status(success)])
            .inc();
    }

    pub fn record_match_start(&self, success: bool) {
        self.match_starts
            .with_label_values(&[status(success)])
            .inc();
    }

    pub fn record_tick_jitter(&self, jitter: Duration) {
        let millis = jitter.num_milliseconds().unsigned_abs();
        self.tick_jitter.observe(millis as f64);
    }

    pub fn connections(&self, success: bool) -> u64 {
        self.connections.with_label_values(&[status(success)]).get()
    }

    pub fn match_starts(&self, success: bool) -> u64 {
        self.match_starts.with_label_values(&[status(success)]).get()
    }

    pub fn tick_jitter_samples(&self) -> u64 {
        self.tick_jitter.get_sample_count()
    }

    pub fn tick_jitter_sum_ms(&self) -> f64 {
        self.tick_jitter.get_sample_sum()
    }

    /// Prometheus text exposition of the whole registry.
    pub fn encode_text(&self) -> MetricsResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| MetricsError::Encoding(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| MetricsError::Encoding(e.to_string()))
    }
}

fn status(success: bool) -> &'static str {
    if success {
        SUCCESS
    } else {
        FAILURE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_split_by_status() {
        let metrics = RoutingMetrics::noop();
        metrics.record_connection(true);
        metrics.record_connection(true);
        metrics.record_connection(false);
        metrics.record_match_start(true);

        assert_eq!(metrics.connections(true), 2);
        assert_eq!(metrics.connections(false), 1);
        assert_eq!(metrics.match_starts(true), 1);
        assert_eq!(metrics.match_starts(false), 0);
    }

    #[test]
    fn jitter_is_recorded_as_absolute_milliseconds() {
        let metrics = RoutingMetrics::noop();
        metrics.record_tick_jitter(Duration::milliseconds(-40));
        metrics.record_tick_jitter(Duration::milliseconds(10));

        assert_eq!(metrics.tick_jitter_samples(), 2);
        assert_eq!(metrics.tick_jitter_sum_ms(), 50.0);
    }

    #[test]
    fn duplicate_registration_is_reported() {
        let registry = Arc::new(Registry::new());
        RoutingMetrics::new(registry.clone()).unwrap();
        assert!(matches!(
            RoutingMetrics::new(registry),
            Err(MetricsError::Registration(_))
        ));
    }

    #[test]
    fn text_export_names_every_family() {
        let metrics = RoutingMetrics::noop();
        metrics.record_connection(true);
        metrics.record_match_start(false);
        metrics.record_tick_jitter(Duration::milliseconds(3));

        let text = metrics.encode_text().unwrap();
        assert!(text.contains("scaleout_connections_total"));
        assert!(text.contains("scaleout_match_starts_total"));
        assert!(text.contains("scaleout_tick_jitter_milliseconds"));
    }
}
