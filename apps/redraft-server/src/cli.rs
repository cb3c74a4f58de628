//! Command-line argument parsing

use anyhow::bail;
use clap::Parser;
use std::path::PathBuf;

pub const DEFAULT_CONFIG_PATH: &str = "config/redraft.toml";

#[derive(Parser, Debug, Clone)]
#[command(
    name = "redraft-server",
    about = "Redraft document optimization server",
    version,
    long_about = "Accepts plain text and Word documents over HTTP, splits them into \
                  chunks and rewrites each chunk through a local language model."
)]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "REDRAFT_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// HTTP server port, overriding the configuration file
    #[arg(short, long, env = "PORT")]
    pub port: Option<u16>,

    /// HTTP bind address, overriding the configuration file
    #[arg(long, env = "HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        short,
        long,
        env = "LOG_LEVEL",
        default_value = "info",
        value_parser = ["trace", "debug", "info", "warn", "error"]
    )]
    pub log_level: String,

    /// Enable JSON log format (useful for production)
    #[arg(long, env = "JSON_LOGS")]
    pub json_logs: bool,

    /// Load and validate the configuration, then exit
    #[arg(long)]
    pub check_config: bool,
}

impl Args {
    /// The default config file may be absent; an explicitly chosen one may not
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.config != PathBuf::from(DEFAULT_CONFIG_PATH) && !self.config.exists() {
            bail!("configuration file {} does not exist", self.config.display());
        }
        Ok(())
    }
}
