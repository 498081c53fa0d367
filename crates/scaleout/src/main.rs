//! Main application entry point for the scale-out simulator
//!
//! Loads configuration, applies CLI overrides, initialises logging and runs
//! the gateway/shard simulation until it completes or a shutdown signal
//! arrives.

mod cli;
mod config;
mod logging;
mod runner;
mod signals;

use anyhow::{anyhow, Result};
use tracing::{error, info};

use cli::CliArgs;
use config::AppConfig;
use runner::Simulation;

pub struct Application {
    config: AppConfig,
}

impl Application {
    /// Builds the application from parsed arguments.
    ///
    /// Logging is initialised only after the merged configuration has been
    /// validated, so the configured level and format take effect.
    pub async fn new(args: CliArgs) -> Result<Self> {
        let mut config = AppConfig::load_from_file(&args.config_path).await?;
        apply_overrides(&mut config, &args);

        config
            .validate()
            .map_err(|e| anyhow!("Configuration validation failed: {e}"))?;

        logging::setup_logging(&config.logging)?;

        info!(
            version = env!("CARGO_PKG_VERSION"),
            config = %args.config_path.display(),
            "Scale-out simulator starting"
        );

        Ok(Self { config })
    }

    pub async fn run(self) -> Result<()> {
        info!(
            shards = self.config.shards.count,
            sessions = self.config.simulation.sessions,
            rejected_sessions = self.config.simulation.rejected_sessions,
            heartbeat_interval_ms = self.config.shards.heartbeat_interval_ms,
            shard_expiry_ms = self.config.gateway.shard_expiry_ms,
            max_ticks = self.config.shards.max_ticks_before_terminate,
            "Configuration summary"
        );
        info!("Press Ctrl+C to stop early");

        let shutdown = async {
            let signal = signals::wait_for_shutdown().await?;
            info!(signal = %signal, "Shutdown signal received");
            Ok::<(), anyhow::Error>(())
        };
        let summary = Simulation::new(self.config)?.run(shutdown).await?;

        if summary.still_open > 0 {
            info!(still_open = summary.still_open, "Stopped with sessions still open");
        }
        info!("Scale-out simulator shutdown complete");
        Ok(())
    }
}

fn apply_overrides(config: &mut AppConfig, args: &CliArgs) {
    if let Some(shards) = args.shards {
        config.shards.count = shards;
    }
    if let Some(sessions) = args.sessions {
        config.simulation.sessions = sessions;
    }
    if let Some(log_level) = &args.log_level {
        config.logging.level = log_level.clone();
    }
    if args.json_logs {
        config.logging.json_format = true;
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    let args = CliArgs::parse();

    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("Application error: {e:?}");
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("Failed to start application: {e:?}");
            std::process::exit(1);
        }
    }
}
