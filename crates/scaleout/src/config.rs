//! Configuration management for the scale-out simulator.
//!
//! Settings come from a TOML file; command-line flags are applied on top
//! and the merged result is validated before anything starts.

use anyhow::{Context, Result};
use chrono::Duration;
use scaleout_core::RoutingConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

fn default_shard_expiry_ms() -> u64 {
    1_000
}

fn default_accepted_tokens() -> Vec<String> {
    vec!["dev-token".to_string()]
}

fn default_shard_count() -> usize {
    2
}

fn default_heartbeat_interval_ms() -> u64 {
    250
}

fn default_max_ticks() -> u32 {
    20
}

fn default_sessions() -> usize {
    4
}

fn default_pump_interval_ms() -> u64 {
    100
}

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub gateway: GatewaySettings,
    pub shards: ShardSettings,
    pub simulation: SimulationSettings,
    pub logging: LoggingSettings,
    #[serde(default)]
    pub metrics: MetricsSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewaySettings {
    /// Heartbeat age after which a shard stops receiving sessions
    #[serde(default = "default_shard_expiry_ms")]
    pub shard_expiry_ms: u64,
    /// Tokens the gateway accepts
    #[serde(default = "default_accepted_tokens")]
    pub accepted_tokens: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardSettings {
    /// Number of shards, named `shard-0` onwards
    #[serde(default = "default_shard_count")]
    pub count: usize,
    /// Heartbeat interval, which is also the tick cadence
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_max_ticks")]
    pub max_ticks_before_terminate: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationSettings {
    /// Sessions opened with the client token
    #[serde(default = "default_sessions")]
    pub sessions: usize,
    /// Extra sessions opened with a token the gateway rejects
    #[serde(default)]
    pub rejected_sessions: usize,
    #[serde(default = "default_client_token")]
    pub token: String,
    /// How often the response pump drains session queues
    #[serde(default = "default_pump_interval_ms")]
    pub pump_interval_ms: u64,
}

fn default_client_token() -> String {
    "dev-token".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    pub level: String,
    #[serde(default)]
    pub json_format: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSettings {
    /// Log the Prometheus text export once the run ends
    #[serde(default)]
    pub dump_on_shutdown: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            gateway: GatewaySettings {
                shard_expiry_ms: default_shard_expiry_ms(),
                accepted_tokens: default_accepted_tokens(),
            },
            shards: ShardSettings {
                count: default_shard_count(),
                heartbeat_interval_ms: default_heartbeat_interval_ms(),
                max_ticks_before_terminate: default_max_ticks(),
            },
            simulation: SimulationSettings {
                sessions: default_sessions(),
                rejected_sessions: 0,
                token: default_client_token(),
                pump_interval_ms: default_pump_interval_ms(),
            },
            logging: LoggingSettings {
                level: "info".to_string(),
                json_format: false,
            },
            metrics: MetricsSettings::default(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// A missing file is created with the default configuration, which is
    /// then returned.
    pub async fn load_from_file(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let config: AppConfig = toml::from_str(&content)
                .with_context(|| format!("parsing {}", path.display()))?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content)
                .await
                .with_context(|| format!("writing default config to {}", path.display()))?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Translates the file settings into the routing core's timing config.
    pub fn to_routing_config(&self) -> Result<RoutingConfig> {
        Ok(RoutingConfig {
            shard_expiry: millis(self.gateway.shard_expiry_ms)?,
            heartbeat_interval: millis(self.shards.heartbeat_interval_ms)?,
            max_ticks_before_terminate: self.shards.max_ticks_before_terminate,
        })
    }

    /// Validates the configuration for consistency and correctness.
    pub fn validate(&self) -> Result<(), String> {
        let routing = self.to_routing_config().map_err(|e| e.to_string())?;
        routing.validate().map_err(|e| e.to_string())?;

        if self.shards.count == 0 {
            return Err("At least one shard is required".to_string());
        }
        if self.gateway.accepted_tokens.iter().all(|t| t.is_empty()) {
            return Err("Gateway must accept at least one non-empty token".to_string());
        }
        if self.simulation.pump_interval_ms == 0 {
            return Err("Pump interval must be positive".to_string());
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }
}

fn millis(value: u64) -> Result<Duration> {
    i64::try_from(value)
        .ok()
        .and_then(Duration::try_milliseconds)
        .with_context(|| format!("{value}ms is out of range"))
}
