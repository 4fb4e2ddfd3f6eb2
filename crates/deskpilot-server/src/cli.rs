//! CLI argument parsing

use clap::Parser;
use deskpilot_core::CoreConfig;
use std::path::PathBuf;

/// Deskpilot - desktop computer-use agent
#[derive(Parser, Debug)]
#[command(name = "deskpilot")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, env = "DESKPILOT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Bind address
    #[arg(long)]
    pub host: Option<String>,

    /// Bind port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Bearer token clients must present
    #[arg(long)]
    pub api_key: Option<String>,

    /// Verbose output (debug logging)
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Flags win over every other configuration source.
    pub fn apply(&self, mut config: CoreConfig) -> CoreConfig {
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(key) = &self.api_key {
            config.server.api_key = Some(key.clone());
        }
        config
    }

    /// `RUST_LOG` wins; otherwise `--verbose`, then the configured level.
    pub fn log_filter(&self, config: &CoreConfig) -> String {
        if self.verbose {
            "debug".to_string()
        } else {
            config.server.log_level.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::parse_from(["deskpilot", "--port", "9000", "--api-key", "secret"]);
        let config = cli.apply(CoreConfig::default());
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.api_key.as_deref(), Some("secret"));
        assert_eq!(config.server.host, "0.0.0.0");
    }

    #[test]
    fn test_verbose_forces_debug() {
        let cli = Cli::parse_from(["deskpilot", "-v"]);
        assert_eq!(cli.log_filter(&CoreConfig::default()), "debug");
    }
}
