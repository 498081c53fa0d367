//! Routing configuration types and defaults.

use chrono::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("shard expiry must be positive")]
    NonPositiveExpiry,

    #[error("heartbeat interval must be positive")]
    NonPositiveHeartbeat,

    #[error("max ticks before terminate must be at least 1")]
    ZeroTickBudget,

    #[error("shard expiry ({expiry_ms}ms) must exceed the heartbeat interval ({heartbeat_ms}ms)")]
    ExpiryNotAboveHeartbeat { expiry_ms: i64, heartbeat_ms: i64 },
}

/// Timing and budget parameters shared by gateways and shards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingConfig {
    /// How long a shard may go without a heartbeat before gateways stop
    /// routing to it
    pub shard_expiry: Duration,

    /// How often a shard refreshes its heartbeat
    pub heartbeat_interval: Duration,

    /// Ticks a `PLAYING` session survives before normal completion
    pub max_ticks_before_terminate: u32,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            shard_expiry: Duration::seconds(5),
            heartbeat_interval: Duration::seconds(1),
            max_ticks_before_terminate: 600,
        }
    }
}

impl RoutingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.shard_expiry <= Duration::zero() {
            return Err(ConfigError::NonPositiveExpiry);
        }
        if self.heartbeat_interval <= Duration::zero() {
            return Err(ConfigError::NonPositiveHeartbeat);
        }
        if self.max_ticks_before_terminate == 0 {
            return Err(ConfigError::ZeroTickBudget);
        }
        // a shard that beats exactly once per expiry window flaps in and out
        if self.shard_expiry <= self.heartbeat_interval {
            return Err(ConfigError::ExpiryNotAboveHeartbeat {
                expiry_ms: self.shard_expiry.num_milliseconds(),
                heartbeat_ms: self.heartbeat_interval.num_milliseconds(),
            });
        }
        Ok(())
    }
}
