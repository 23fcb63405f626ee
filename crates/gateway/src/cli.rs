//! Command line interface: `serve` starts the server, `run` answers a single
//! input and prints the event stream as JSON lines.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use grasp_domain::config::AppConfig;

#[derive(Debug, Parser)]
#[command(
    name = "grasp",
    about = "GRASP: generic reasoning and SPARQL generation across knowledge graphs"
)]
pub struct Cli {
    /// Log filter, e.g. "info" or "grasp_gateway=debug".
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the HTTP/WebSocket server.
    Serve {
        /// Path to the configuration file (TOML).
        config: PathBuf,
        /// Port to listen on, overriding the configuration.
        #[arg(long)]
        port: Option<u16>,
        /// Host to bind, overriding the configuration.
        #[arg(long)]
        host: Option<String>,
    },
    /// Run a single input and print the events as JSON lines.
    Run {
        /// Path to the configuration file (TOML).
        config: PathBuf,
        /// The task input; "-" reads it from stdin.
        input: String,
        /// Task to run.
        #[arg(short, long, default_value = "sparql-qa")]
        task: String,
        /// Knowledge graphs to use; defaults to all configured ones.
        #[arg(long = "kg")]
        kgs: Vec<String>,
    },
}

/// Load the configuration file, or the defaults when none is given.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    let Some(path) = path else {
        return Ok(AppConfig::default());
    };
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config {}: {e}", path.display()))?;
    let config: AppConfig = toml::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("invalid config {}: {e}", path.display()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_defaults_to_sparql_qa() {
        let cli = Cli::parse_from(["grasp", "run", "config.toml", "What is the capital?"]);
        match cli.command {
            Command::Run { task, input, .. } => {
                assert_eq!(task, "sparql-qa");
                assert_eq!(input, "What is the capital?");
            }
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn missing_config_falls_back_to_defaults() {
        let config = load_config(None).unwrap();
        assert_eq!(config.server.port, 6789);
    }
}
