//! Command-line interface handling for the scale-out simulator.
//!
//! Every flag overrides the matching value from the configuration file.

use clap::{value_parser, Arg, ArgMatches, Command};
use std::path::PathBuf;

/// Command line arguments parsed from user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Optional override for the number of shards
    pub shards: Option<usize>,
    /// Optional override for the number of simulated sessions
    pub sessions: Option<usize>,
    /// Optional override for log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
}

impl CliArgs {
    /// Parses the process arguments, exiting with usage on error.
    pub fn parse() -> Self {
        Self::from_matches(&command().get_matches())
    }

    fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("scaleout.toml")),
            shards: matches.get_one::<usize>("shards").copied(),
            sessions: matches.get_one::<usize>("sessions").copied(),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
        }
    }
}

fn command() -> Command {
    Command::new("scaleout")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Gateway/shard session routing simulator")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("scaleout.toml"),
        )
        .arg(
            Arg::new("shards")
                .short('s')
                .long("shards")
                .value_name("COUNT")
                .help("Number of shards to run")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("sessions")
                .short('n')
                .long("sessions")
                .value_name("COUNT")
                .help("Number of client sessions to simulate")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error)"),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .help("Output logs in JSON format")
                .action(clap::ArgAction::SetTrue),
        )
}
