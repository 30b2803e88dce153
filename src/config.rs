//! Application configuration.
//!
//! Loaded from an optional TOML file plus `OPSD_` environment overrides
//! (e.g. `OPSD_SERVER__PORT=8080`, `OPSD_ANTHROPIC__API_KEY=...`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct OpsConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub cli: CliSettings,
    pub anthropic: AnthropicSettings,
}

/// HTTP server binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

/// Storage paths.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file path. Defaults to `~/.ops/ops.db`.
    pub db_path: Option<PathBuf>,
}

impl StorageConfig {
    /// Resolve the database path, falling back to the default data dir.
    pub fn resolve_db_path(&self) -> Result<PathBuf> {
        if let Some(ref path) = self.db_path {
            return Ok(path.clone());
        }
        Ok(default_data_dir()?.join("ops.db"))
    }
}

/// Local CLI backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CliSettings {
    /// Backend executable name or path.
    pub binary: String,
    /// Hard per-turn timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for CliSettings {
    fn default() -> Self {
        Self {
            binary: "claude".to_string(),
            timeout_ms: 300_000,
        }
    }
}

impl CliSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Hosted chat API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnthropicSettings {
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    /// API key. Falls back to `ANTHROPIC_API_KEY` when unset.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
}

impl Default for AnthropicSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.anthropic.com".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 8192,
            api_key: None,
        }
    }
}

/// Default data directory: `~/.ops`.
pub fn default_data_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
    Ok(home.join(".ops"))
}

impl OpsConfig {
    /// Load configuration from an optional TOML file plus environment overrides.
    ///
    /// A missing file is not an error unless its path was given explicitly.
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        match config_file {
            Some(path) => {
                builder = builder.add_source(
                    File::from(path.to_path_buf()).format(FileFormat::Toml),
                );
            }
            None => {
                if let Some(config_dir) = dirs::config_dir() {
                    let default_path = config_dir.join("opsd").join("config.toml");
                    builder = builder.add_source(
                        File::from(default_path)
                            .format(FileFormat::Toml)
                            .required(false),
                    );
                }
            }
        }

        builder = builder.add_source(Environment::with_prefix("OPSD").separator("__"));

        let config = builder.build().context("loading configuration")?;
        config
            .try_deserialize::<OpsConfig>()
            .context("parsing configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = OpsConfig::default();
        assert_eq!(cfg.server.host, "127.0.0.1");
        assert_eq!(cfg.server.port, 3000);
        assert_eq!(cfg.cli.binary, "claude");
        assert_eq!(cfg.cli.timeout(), Duration::from_millis(300_000));
        assert_eq!(cfg.anthropic.model, "claude-sonnet-4-20250514");
        assert_eq!(cfg.anthropic.max_tokens, 8192);
    }

    #[test]
    fn test_load_from_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[server]
port = 4000

[cli]
binary = "/usr/local/bin/claude"
"#,
        )
        .unwrap();

        let cfg = OpsConfig::load(Some(&path)).unwrap();
        assert_eq!(cfg.server.port, 4000);
        assert_eq!(cfg.cli.binary, "/usr/local/bin/claude");
        // Untouched sections keep their defaults.
        assert_eq!(cfg.anthropic.max_tokens, 8192);
    }
}
