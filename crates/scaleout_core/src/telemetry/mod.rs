//! Observability sink for gateways and shards.
//!
//! Both halves are safe to leave unwired: [`Telemetry::noop`] reports into a
//! private metrics registry, and spans are ordinary `tracing` spans that
//! cost nothing without a subscriber.

pub mod metrics;
pub mod trace;

pub use metrics::{MetricsError, RoutingMetrics};
pub use trace::{OperationSpan, SpanKind, TraceSupport};

#[derive(Debug, Clone)]
pub struct Telemetry {
    metrics: RoutingMetrics,
    trace: TraceSupport,
}

impl Telemetry {
    pub fn new(metrics: RoutingMetrics) -> Self {
        Self {
            metrics,
            trace: TraceSupport::new(),
        }
    }

    pub fn noop() -> Self {
        Self::new(RoutingMetrics::noop())
    }

    pub fn metrics(&self) -> &RoutingMetrics {
        &self.metrics
    }

    pub fn trace(&self) -> &TraceSupport {
        &self.trace
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::noop()
    }
}
