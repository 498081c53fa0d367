//! Crate-level error type.
//!
//! Terminal session outcomes are not errors; they are
//! [`GatewaySessionResult::Terminated`](crate::gateway::GatewaySessionResult)
//! values. Errors here mean a caller bug (an invariant violated while
//! building a record) or a backplane that could not serve a call.

use crate::backplane::BackplaneError;
use crate::config::ConfigError;
use crate::envelope::EnvelopeError;
use crate::telemetry::MetricsError;
use crate::termination::TerminationError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("backplane error: {0}")]
    Backplane(#[from] BackplaneError),

    #[error("invalid envelope: {0}")]
    Envelope(#[from] EnvelopeError),

    #[error("invalid termination record: {0}")]
    Termination(#[from] TerminationError),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("metrics error: {0}")]
    Metrics(#[from] MetricsError),
}

pub type RoutingResult<T> = Result<T, RoutingError>;
