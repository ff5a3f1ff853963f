use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::utils::file::expand_path;

use super::cli::CliConfig;
use super::constants::{
    API_KEY_MIN_LENGTH, APP_DOT_FOLDER, CONFIG_FILE_NAME, DEFAULT_HOST,
    DEFAULT_LATENCY_TOLERANCE_MS, DEFAULT_MAX_SPANS_PER_TRACE, DEFAULT_PORT, ENV_API_KEYS,
};

// =============================================================================
// Storage Backend Enum
// =============================================================================

/// Backend holding traces, spans and evaluations
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackendType {
    #[default]
    Sqlite,
    Memory,
}

impl fmt::Display for StorageBackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageBackendType::Sqlite => write!(f, "sqlite"),
            StorageBackendType::Memory => write!(f, "memory"),
        }
    }
}

// =============================================================================
// File Config Structs (JSON deserialization)
// =============================================================================

/// Server configuration section
#[derive(Debug, Default, Clone, Deserialize)]
pub struct ServerFileConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
}

/// Authentication configuration section
#[derive(Debug, Default, Clone, Deserialize)]
pub struct AuthFileConfig {
    pub enabled: Option<bool>,
    pub api_keys: Option<Vec<String>>,
}

/// Storage configuration section
#[derive(Debug, Default, Clone, Deserialize)]
pub struct StorageFileConfig {
    pub backend: Option<StorageBackendType>,
}

/// Ingestion limits section
#[derive(Debug, Default, Clone, Deserialize)]
pub struct IngestFileConfig {
    pub latency_tolerance_ms: Option<i64>,
    pub max_spans_per_trace: Option<usize>,
}

/// Pricing section
#[derive(Debug, Default, Clone, Deserialize)]
pub struct PricingFileConfig {
    pub file: Option<String>,
    pub fallback_cost_per_1k_tokens: Option<f64>,
}

/// File-based configuration (JSON)
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    pub server: Option<ServerFileConfig>,
    pub auth: Option<AuthFileConfig>,
    pub storage: Option<StorageFileConfig>,
    pub ingest: Option<IngestFileConfig>,
    pub pricing: Option<PricingFileConfig>,
    pub debug: Option<bool>,
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

impl FileConfig {
    /// Load configuration from a JSON file
    fn load_from_file(path: &Path) -> Result<Self> {
        tracing::debug!(path = %path.display(), "Loading config file");
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        tracing::trace!(config = ?config, "Parsed config file");
        Ok(config)
    }

    /// Warn about unknown fields in the config
    fn warn_unknown_fields(&self) {
        if let serde_json::Value::Object(map) = &self.extra
            && !map.is_empty()
        {
            let keys_str: String = map
                .keys()
                .map(|k| k.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            tracing::warn!(
                fields = %keys_str,
                "Unknown fields in config file (possible typos)"
            );
        }
    }

    /// Merge another FileConfig into this one (other takes precedence)
    fn merge(&mut self, other: FileConfig) {
        if let Some(server) = other.server {
            let current = self.server.get_or_insert_with(ServerFileConfig::default);
            if server.host.is_some() {
                tracing::trace!(host = ?server.host, "Merging server.host");
                current.host = server.host;
            }
            if server.port.is_some() {
                tracing::trace!(port = ?server.port, "Merging server.port");
                current.port = server.port;
            }
        }

        if let Some(auth) = other.auth {
            let current = self.auth.get_or_insert_with(AuthFileConfig::default);
            if auth.enabled.is_some() {
                tracing::trace!(enabled = ?auth.enabled, "Merging auth.enabled");
                current.enabled = auth.enabled;
            }
            if let Some(keys) = auth.api_keys {
                tracing::trace!(count = keys.len(), "Merging auth.api_keys");
                current.api_keys = Some(keys);
            }
        }

        if let Some(storage) = other.storage {
            let current = self.storage.get_or_insert_with(StorageFileConfig::default);
            if storage.backend.is_some() {
                tracing::trace!(backend = ?storage.backend, "Merging storage.backend");
                current.backend = storage.backend;
            }
        }

        if let Some(ingest) = other.ingest {
            let current = self.ingest.get_or_insert_with(IngestFileConfig::default);
            if ingest.latency_tolerance_ms.is_some() {
                tracing::trace!(
                    latency_tolerance_ms = ?ingest.latency_tolerance_ms,
                    "Merging ingest.latency_tolerance_ms"
                );
                current.latency_tolerance_ms = ingest.latency_tolerance_ms;
            }
            if ingest.max_spans_per_trace.is_some() {
                tracing::trace!(
                    max_spans_per_trace = ?ingest.max_spans_per_trace,
                    "Merging ingest.max_spans_per_trace"
                );
                current.max_spans_per_trace = ingest.max_spans_per_trace;
            }
        }

        if let Some(pricing) = other.pricing {
            let current = self.pricing.get_or_insert_with(PricingFileConfig::default);
            if pricing.file.is_some() {
                tracing::trace!(file = ?pricing.file, "Merging pricing.file");
                current.file = pricing.file;
            }
            if pricing.fallback_cost_per_1k_tokens.is_some() {
                tracing::trace!(
                    fallback = ?pricing.fallback_cost_per_1k_tokens,
                    "Merging pricing.fallback_cost_per_1k_tokens"
                );
                current.fallback_cost_per_1k_tokens = pricing.fallback_cost_per_1k_tokens;
            }
        }

        if other.debug.is_some() {
            self.debug = other.debug;
        }
    }
}

// =============================================================================
// Runtime Config Structs (final merged configuration)
// =============================================================================

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Authentication configuration
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub enabled: bool,
    pub api_keys: Vec<String>,
}

/// Storage configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackendType,
}

/// Ingestion validation limits
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub latency_tolerance_ms: i64,
    pub max_spans_per_trace: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            latency_tolerance_ms: DEFAULT_LATENCY_TOLERANCE_MS,
            max_spans_per_trace: DEFAULT_MAX_SPANS_PER_TRACE,
        }
    }
}

/// Pricing configuration
#[derive(Debug, Clone, Default)]
pub struct PricingConfig {
    pub file: Option<PathBuf>,
    /// USD per 1k tokens for spans whose model is not in the table
    pub fallback_cost_per_1k_tokens: Option<f64>,
}

/// Final merged application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub storage: StorageConfig,
    pub ingest: IngestConfig,
    pub pricing: PricingConfig,
    pub debug: bool,
}

impl AppConfig {
    /// Load configuration from all sources
    ///
    /// Priority (lowest to highest):
    /// 1. Defaults
    /// 2. Profile directory config (~/.arbor/arbor.json)
    /// 3. Local directory config OR CLI-specified config path
    /// 4. CLI arguments (which include env var fallbacks via clap)
    pub fn load(cli: &CliConfig) -> Result<Self> {
        tracing::debug!("Loading application configuration");
        tracing::trace!(cli = ?cli, "CLI config");

        let mut file_config = FileConfig::default();
        let mut found_configs: Vec<String> = Vec::new();

        if let Some(profile_path) = get_profile_config_path()
            && profile_path.exists()
        {
            let profile_config = FileConfig::load_from_file(&profile_path)?;
            profile_config.warn_unknown_fields();
            file_config.merge(profile_config);
            found_configs.push(profile_path.display().to_string());
        }

        let overlay_path = if let Some(ref path) = cli.config {
            let expanded = expand_path(&path.to_string_lossy());
            if !expanded.exists() {
                anyhow::bail!("Config file not found: {}", expanded.display());
            }
            Some(expanded)
        } else {
            let local = PathBuf::from(CONFIG_FILE_NAME);
            if local.exists() { Some(local) } else { None }
        };

        if let Some(path) = overlay_path {
            let overlay_config = FileConfig::load_from_file(&path)?;
            overlay_config.warn_unknown_fields();
            file_config.merge(overlay_config);
            found_configs.push(path.display().to_string());
        }

        tracing::debug!(configs = ?found_configs, "Config files loaded");

        let config = Self::from_layers(cli, file_config);
        config.validate()?;

        tracing::debug!(
            host = %config.server.host,
            port = config.server.port,
            auth = config.auth.enabled,
            storage = %config.storage.backend,
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Layer configs: defaults -> file config -> CLI/env overrides
    fn from_layers(cli: &CliConfig, file_config: FileConfig) -> Self {
        let file_server = file_config.server.unwrap_or_default();
        let file_auth = file_config.auth.unwrap_or_default();
        let file_storage = file_config.storage.unwrap_or_default();
        let file_ingest = file_config.ingest.unwrap_or_default();
        let file_pricing = file_config.pricing.unwrap_or_default();

        let host = cli
            .host
            .clone()
            .or(file_server.host)
            .unwrap_or_else(|| DEFAULT_HOST.to_string());

        let port = cli.port.or(file_server.port).unwrap_or(DEFAULT_PORT);

        // auth.enabled: file config sets default, --no-auth CLI flag disables
        let auth_enabled = if cli.no_auth {
            false
        } else {
            file_auth.enabled.unwrap_or(true)
        };

        // CLI/env keys replace file keys rather than extending them
        let api_keys = if cli.api_keys.is_empty() {
            file_auth.api_keys.unwrap_or_default()
        } else {
            cli.api_keys.clone()
        };

        let backend = cli.storage.or(file_storage.backend).unwrap_or_default();

        let defaults = IngestConfig::default();
        let ingest = IngestConfig {
            latency_tolerance_ms: file_ingest
                .latency_tolerance_ms
                .unwrap_or(defaults.latency_tolerance_ms),
            max_spans_per_trace: file_ingest
                .max_spans_per_trace
                .unwrap_or(defaults.max_spans_per_trace),
        };

        let pricing = PricingConfig {
            file: cli
                .pricing_file
                .clone()
                .or_else(|| file_pricing.file.map(|f| expand_path(&f))),
            fallback_cost_per_1k_tokens: cli
                .pricing_fallback_per_1k
                .or(file_pricing.fallback_cost_per_1k_tokens),
        };

        let debug = cli.debug || file_config.debug.unwrap_or(false);

        Self {
            server: ServerConfig { host, port },
            auth: AuthConfig {
                enabled: auth_enabled,
                api_keys,
            },
            storage: StorageConfig { backend },
            ingest,
            pricing,
            debug,
        }
    }

    /// Reject settings that cannot work together
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Configuration error: server.port must be greater than 0");
        }

        if self.auth.enabled {
            if self.auth.api_keys.is_empty() {
                anyhow::bail!(
                    "Configuration error: auth is enabled but no API keys are configured. \
                     Set {} (comma separated), pass --api-key, add auth.api_keys to the config file, \
                     or run with --no-auth. Generate a key with `arbor keys generate`.",
                    ENV_API_KEYS
                );
            }
            if let Some(short) = self
                .auth
                .api_keys
                .iter()
                .find(|k| k.len() < API_KEY_MIN_LENGTH)
            {
                anyhow::bail!(
                    "Configuration error: API key '{}...' is shorter than {} characters",
                    short.chars().take(4).collect::<String>(),
                    API_KEY_MIN_LENGTH
                );
            }
        }

        if self.ingest.max_spans_per_trace == 0 {
            anyhow::bail!("Configuration error: ingest.max_spans_per_trace must be at least 1");
        }

        if self.ingest.latency_tolerance_ms < 0 {
            anyhow::bail!(
                "Configuration error: ingest.latency_tolerance_ms must not be negative (got {})",
                self.ingest.latency_tolerance_ms
            );
        }

        if let Some(rate) = self.pricing.fallback_cost_per_1k_tokens
            && (!rate.is_finite() || rate < 0.0)
        {
            anyhow::bail!(
                "Configuration error: pricing.fallback_cost_per_1k_tokens must be a non-negative number (got {})",
                rate
            );
        }

        Ok(())
    }
}

/// Get the profile config path (~/.arbor/arbor.json)
fn get_profile_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(APP_DOT_FOLDER).join(CONFIG_FILE_NAME))
}

/// Check if host binds to all network interfaces
pub(crate) fn is_all_interfaces(host: &str) -> bool {
    matches!(host, "0.0.0.0" | "::" | "[::]")
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "arb-0123456789abcdefghij";

    fn cli_with_key() -> CliConfig {
        CliConfig {
            api_keys: vec![KEY.to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn test_storage_backend_serde() {
        let backend: StorageBackendType = serde_json::from_str(r#""memory""#).unwrap();
        assert_eq!(backend, StorageBackendType::Memory);
        assert_eq!(StorageBackendType::Sqlite.to_string(), "sqlite");
    }

    #[test]
    fn test_file_config_parse_full() {
        let json = r#"{
            "server": { "host": "0.0.0.0", "port": 8080 },
            "auth": { "enabled": true, "api_keys": ["arb-aaaaaaaaaaaaaaaaaaaa"] },
            "storage": { "backend": "memory" },
            "ingest": { "latency_tolerance_ms": 10, "max_spans_per_trace": 500 },
            "pricing": { "fallback_cost_per_1k_tokens": 0.002 }
        }"#;
        let config: FileConfig = serde_json::from_str(json).unwrap();

        assert_eq!(
            config.server.as_ref().unwrap().host,
            Some("0.0.0.0".to_string())
        );
        assert_eq!(
            config.storage.as_ref().unwrap().backend,
            Some(StorageBackendType::Memory)
        );
        assert_eq!(
            config.ingest.as_ref().unwrap().max_spans_per_trace,
            Some(500)
        );
        assert_eq!(
            config.pricing.as_ref().unwrap().fallback_cost_per_1k_tokens,
            Some(0.002)
        );
    }

    #[test]
    fn test_file_config_parse_extra_fields() {
        let json = r#"{ "server": { "host": "localhost" }, "unknown_field": 123 }"#;
        let config: FileConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.extra.get("unknown_field").unwrap(), 123);
    }

    #[test]
    fn test_file_config_merge() {
        let mut base: FileConfig =
            serde_json::from_str(r#"{ "server": { "host": "a", "port": 1 }, "debug": true }"#)
                .unwrap();
        let overlay: FileConfig =
            serde_json::from_str(r#"{ "server": { "port": 2 }, "ingest": { "max_spans_per_trace": 7 } }"#)
                .unwrap();
        base.merge(overlay);

        let server = base.server.unwrap();
        assert_eq!(server.host.as_deref(), Some("a"));
        assert_eq!(server.port, Some(2));
        assert_eq!(base.debug, Some(true));
        assert_eq!(base.ingest.unwrap().max_spans_per_trace, Some(7));
    }

    #[test]
    fn test_layers_cli_wins() {
        let file: FileConfig = serde_json::from_str(
            r#"{ "server": { "port": 7000 }, "storage": { "backend": "sqlite" } }"#,
        )
        .unwrap();
        let cli = CliConfig {
            port: Some(7100),
            storage: Some(StorageBackendType::Memory),
            ..cli_with_key()
        };
        let config = AppConfig::from_layers(&cli, file);
        assert_eq!(config.server.port, 7100);
        assert_eq!(config.server.host, DEFAULT_HOST);
        assert_eq!(config.storage.backend, StorageBackendType::Memory);
        assert_eq!(config.ingest.latency_tolerance_ms, DEFAULT_LATENCY_TOLERANCE_MS);
        assert!(config.auth.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_no_auth_disables_auth() {
        let cli = CliConfig {
            no_auth: true,
            ..Default::default()
        };
        let config = AppConfig::from_layers(&cli, FileConfig::default());
        assert!(!config.auth.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_auth_without_keys() {
        let config = AppConfig::from_layers(&CliConfig::default(), FileConfig::default());
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("no API keys"));
    }

    #[test]
    fn test_validate_rejects_short_key() {
        let cli = CliConfig {
            api_keys: vec!["short".to_string()],
            ..Default::default()
        };
        let config = AppConfig::from_layers(&cli, FileConfig::default());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_limits() {
        let mut config = AppConfig::from_layers(&cli_with_key(), FileConfig::default());
        config.ingest.max_spans_per_trace = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::from_layers(&cli_with_key(), FileConfig::default());
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::from_layers(&cli_with_key(), FileConfig::default());
        config.pricing.fallback_cost_per_1k_tokens = Some(-1.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_is_all_interfaces() {
        assert!(is_all_interfaces("0.0.0.0"));
        assert!(is_all_interfaces("::"));
        assert!(!is_all_interfaces("127.0.0.1"));
    }
}
