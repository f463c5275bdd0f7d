//! Configuration management for ipscope
//!
//! Loads the TOML configuration file, applies environment overrides and
//! validates the result.

use crate::error::{IpScopeError, Result};
use crate::lookup::DEFAULT_BASE_URL;
use crate::storage::database::DEFAULT_POOL_SIZE;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

mod validator;

pub use validator::ConfigValidator;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub lookup: LookupConfig,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind: String,
    #[serde(default = "default_true")]
    pub cors_permissive: bool,
}

fn default_true() -> bool {
    true
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub database_path: PathBuf,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

fn default_pool_size() -> u32 {
    DEFAULT_POOL_SIZE
}

/// Lookup service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupConfig {
    pub base_url: String,
    /// Name of the environment variable holding the default API key
    pub api_key_env: String,
}

impl LookupConfig {
    /// Default credential, if the configured environment variable is set
    pub fn default_api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(IpScopeError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| IpScopeError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        // Apply environment variable overrides
        config.apply_env_overrides();

        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| IpScopeError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: IPSCOPE_SECTION__KEY=value,
    /// plus DATABASE_URL for the storage location
    pub fn apply_env_overrides(&mut self) {
        let vars: Vec<(String, String)> = std::env::vars().collect();
        self.apply_overrides(vars);
    }

    fn apply_overrides<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            if key == "DATABASE_URL" {
                self.storage.database_path = database_path_from_url(&value);
            } else if let Some(config_key) = key.strip_prefix("IPSCOPE_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "SERVER__BIND" => {
                self.server.bind = value.to_string();
            }
            "SERVER__CORS_PERMISSIVE" => {
                self.server.cors_permissive =
                    value.parse().map_err(|_| IpScopeError::InvalidConfigValue {
                        path: path.to_string(),
                        message: format!("Cannot parse '{}' as boolean", value),
                    })?;
            }
            "STORAGE__DATABASE_PATH" => {
                self.storage.database_path = PathBuf::from(value);
            }
            "STORAGE__POOL_SIZE" => {
                self.storage.pool_size =
                    value.parse().map_err(|_| IpScopeError::InvalidConfigValue {
                        path: path.to_string(),
                        message: format!("Cannot parse '{}' as pool size", value),
                    })?;
            }
            "LOOKUP__BASE_URL" => {
                self.lookup.base_url = value.to_string();
            }
            "LOOKUP__API_KEY_ENV" => {
                self.lookup.api_key_env = value.to_string();
            }
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| IpScopeError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("ipscope").join("config.toml"))
    }
}

/// Accept either a bare path or a `sqlite://` style URL
fn database_path_from_url(url: &str) -> PathBuf {
    let path = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .unwrap_or(url);
    PathBuf::from(path)
}

/// Expand a leading `~/` to the home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    path.to_path_buf()
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = PathBuf::from("~/.ipscope");

        Self {
            meta: MetaConfig {
                schema_version: "1.0.0".to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            server: ServerConfig {
                bind: "0.0.0.0:5001".to_string(),
                cors_permissive: true,
            },
            storage: StorageConfig {
                database_path: data_dir.join("ipscope.db"),
                pool_size: DEFAULT_POOL_SIZE,
            },
            lookup: LookupConfig {
                base_url: DEFAULT_BASE_URL.to_string(),
                api_key_env: "SHODAN_API_KEY".to_string(),
            },
        }
    }
}
