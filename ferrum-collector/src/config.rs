// Ferrum Collector - Command line configuration
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Command line and environment configuration.
//!
//! Every flag can also be set through a `FERRUM_*` environment variable.

use crate::error::{CollectorError, Result};
use clap::Parser;
use ferrum::{sorted_resolutions, ConsoleConfig, Resolution, DEFAULT_PORT};
use std::path::PathBuf;
use std::time::Duration;

/// Shortest accepted collection interval
pub const MIN_INTERVAL: Duration = Duration::from_millis(100);

/// Ferrum collector: polls a game server and serves its production history
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Remote console host
    #[arg(long, env = "FERRUM_RCON_HOST", default_value = "127.0.0.1")]
    pub rcon_host: String,

    /// Remote console port
    #[arg(long, env = "FERRUM_RCON_PORT", default_value_t = DEFAULT_PORT)]
    pub rcon_port: u16,

    /// Remote console password (empty for none)
    #[arg(
        long,
        env = "FERRUM_RCON_PASSWORD",
        default_value = "",
        hide_env_values = true
    )]
    pub rcon_password: String,

    /// Connect and read timeout for the remote console
    #[arg(
        long,
        env = "FERRUM_RCON_TIMEOUT",
        default_value = "1s",
        value_parser = humantime::parse_duration
    )]
    pub rcon_timeout: Duration,

    /// SQLite database file
    #[arg(long, env = "FERRUM_DATABASE", default_value = "ferrum.db")]
    pub database: PathBuf,

    /// Series name
    #[arg(long, env = "FERRUM_SERIES", default_value = "resources")]
    pub series: String,

    /// Resolution as <identifier>=<ticks>; repeat for several
    #[arg(
        long = "resolution",
        env = "FERRUM_RESOLUTIONS",
        value_delimiter = ',',
        value_parser = parse_resolution
    )]
    pub resolutions: Vec<Resolution>,

    /// Collection interval
    #[arg(
        long,
        env = "FERRUM_INTERVAL",
        default_value = "1s",
        value_parser = humantime::parse_duration
    )]
    pub interval: Duration,

    /// Most historical points a subscriber may request
    #[arg(long, env = "FERRUM_MAX_HISTORY", default_value_t = 1000)]
    pub max_history: usize,

    /// HTTP port to listen on
    #[arg(short, long, env = "FERRUM_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "FERRUM_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

fn parse_resolution(value: &str) -> std::result::Result<Resolution, String> {
    Resolution::parse(value).map_err(|e| e.to_string())
}

impl Args {
    /// Check settings that clap cannot express
    pub fn validate(&self) -> Result<()> {
        if self.interval < MIN_INTERVAL {
            return Err(CollectorError::Config(format!(
                "interval must be at least {}",
                humantime::format_duration(MIN_INTERVAL)
            )));
        }
        if self.max_history == 0 {
            return Err(CollectorError::Config(
                "max-history must be positive".to_string(),
            ));
        }
        self.console_config().validate()?;
        self.resolutions()?;
        Ok(())
    }

    /// Remote console settings
    pub fn console_config(&self) -> ConsoleConfig {
        ConsoleConfig::new(self.rcon_host.clone())
            .with_port(self.rcon_port)
            .with_password(self.rcon_password.clone())
            .with_timeouts(self.rcon_timeout, self.rcon_timeout)
    }

    /// Configured resolutions, or the stock set; finest first
    pub fn resolutions(&self) -> Result<Vec<Resolution>> {
        if self.resolutions.is_empty() {
            return Ok(Resolution::defaults());
        }
        Ok(sorted_resolutions(&self.resolutions)?)
    }
}
