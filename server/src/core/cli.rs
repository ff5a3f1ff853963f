use clap::{Parser, Subcommand};

use std::path::PathBuf;

use super::config::StorageBackendType;
use super::constants::{
    ENV_API_KEYS, ENV_CONFIG, ENV_DEBUG, ENV_HOST, ENV_PORT, ENV_PRICING_FALLBACK_PER_1K,
    ENV_PRICING_FILE, ENV_STORAGE_BACKEND,
};

#[derive(Parser)]
#[command(name = "arbor")]
#[command(version, about = "Trace ingestion and span tree reconstruction for AI applications", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Server host address
    #[arg(long, short = 'H', global = true, env = ENV_HOST)]
    pub host: Option<String>,

    /// Server port
    #[arg(long, short = 'p', global = true, env = ENV_PORT)]
    pub port: Option<u16>,

    /// Disable API key authentication (for development)
    #[arg(long, global = true)]
    pub no_auth: bool,

    /// Enable debug mode (verbose ingestion logging)
    #[arg(long, global = true, env = ENV_DEBUG)]
    pub debug: bool,

    /// Path to config file
    #[arg(long, short = 'c', global = true, env = ENV_CONFIG)]
    pub config: Option<PathBuf>,

    /// Storage backend (sqlite or memory)
    #[arg(long, global = true, env = ENV_STORAGE_BACKEND, value_parser = parse_storage_backend)]
    pub storage: Option<StorageBackendType>,

    /// Accepted API key (repeatable, or comma separated via env)
    #[arg(long = "api-key", global = true, env = ENV_API_KEYS, value_delimiter = ',')]
    pub api_keys: Vec<String>,

    /// Local model pricing table (LiteLLM JSON format)
    #[arg(long, global = true, env = ENV_PRICING_FILE)]
    pub pricing_file: Option<PathBuf>,

    /// Flat USD rate per 1k tokens for models missing from the pricing table
    #[arg(long, global = true, env = ENV_PRICING_FALLBACK_PER_1K)]
    pub pricing_fallback_per_1k: Option<f64>,
}

/// Parse storage backend from CLI/env string
fn parse_storage_backend(s: &str) -> Result<StorageBackendType, String> {
    match s.to_lowercase().as_str() {
        "sqlite" => Ok(StorageBackendType::Sqlite),
        "memory" => Ok(StorageBackendType::Memory),
        _ => Err(format!(
            "Invalid storage backend '{}'. Valid options: sqlite, memory",
            s
        )),
    }
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Start the server (default command)
    Start,
    /// API key management
    Keys {
        #[command(subcommand)]
        command: KeysCommands,
    },
    /// System maintenance commands
    System {
        #[command(subcommand)]
        command: SystemCommands,
    },
}

#[derive(Subcommand, Clone, Debug)]
pub enum KeysCommands {
    /// Print a freshly generated API key
    Generate,
}

#[derive(Subcommand, Clone, Debug)]
pub enum SystemCommands {
    /// Delete local data directory (trace database). Requires confirmation.
    Prune {
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

/// Configuration derived from CLI arguments
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub no_auth: bool,
    pub debug: bool,
    pub config: Option<PathBuf>,
    pub storage: Option<StorageBackendType>,
    pub api_keys: Vec<String>,
    pub pricing_file: Option<PathBuf>,
    pub pricing_fallback_per_1k: Option<f64>,
}

impl From<Cli> for CliConfig {
    fn from(cli: Cli) -> Self {
        Self {
            host: cli.host,
            port: cli.port,
            no_auth: cli.no_auth,
            debug: cli.debug,
            config: cli.config,
            storage: cli.storage,
            api_keys: cli
                .api_keys
                .into_iter()
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect(),
            pricing_file: cli.pricing_file,
            pricing_fallback_per_1k: cli.pricing_fallback_per_1k,
        }
    }
}

/// Parse CLI arguments and return config with command
pub fn parse() -> (CliConfig, Option<Commands>) {
    let mut cli = Cli::parse();
    let command = cli.command.take();
    (CliConfig::from(cli), command)
}
