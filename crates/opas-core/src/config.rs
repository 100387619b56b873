//! Application configuration management.
//!
//! Configuration is stored at `~/.config/opas/config.json`. Values from the
//! environment (`OPAS_API_URL`, `OPAS_DATA_DIR`, `OPAS_USERNAME`) override the
//! file for the current process only and are never written back.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::controller::CacheTtl;
use crate::error::{OpasError, Result};
use crate::models::DecodeMode;

/// Application name used for config/data directory paths
const APP_NAME: &str = "opas";

/// Config file name
const CONFIG_FILE: &str = "config.json";

pub const ENV_API_URL: &str = "OPAS_API_URL";
pub const ENV_DATA_DIR: &str = "OPAS_DATA_DIR";
pub const ENV_USERNAME: &str = "OPAS_USERNAME";
pub const ENV_PASSWORD: &str = "OPAS_PASSWORD";

const DEFAULT_API_URL: &str = "http://localhost:8000/api";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_LIST_TTL_SECS: u64 = 5 * 60;
const DEFAULT_DETAIL_TTL_SECS: u64 = 15 * 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub request_timeout_secs: u64,
    pub list_ttl_secs: u64,
    pub detail_ttl_secs: u64,
    pub decode_mode: DecodeMode,
    pub last_username: Option<String>,
    pub data_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.to_string(),
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
            list_ttl_secs: DEFAULT_LIST_TTL_SECS,
            detail_ttl_secs: DEFAULT_DETAIL_TTL_SECS,
            decode_mode: DecodeMode::default(),
            last_username: None,
            data_dir: None,
        }
    }
}

impl Config {
    /// Load the config file (defaults if absent) and apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .map_err(|e| OpasError::Config(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&contents)
            .map_err(|e| OpasError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| OpasError::Config(format!("{}: {}", parent.display(), e)))?;
        }
        let contents = serde_json::to_string_pretty(self)
            .map_err(|e| OpasError::Config(e.to_string()))?;
        std::fs::write(path, contents)
            .map_err(|e| OpasError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| OpasError::Config("Could not find config directory".to_string()))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory holding the key-value store.
    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.data_dir {
            return Ok(dir.clone());
        }
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| OpasError::Config("Could not find cache directory".to_string()))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Apply overrides looked up by environment variable name.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let set = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        if let Some(url) = set(ENV_API_URL) {
            self.api_base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(dir) = set(ENV_DATA_DIR) {
            self.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(username) = set(ENV_USERNAME) {
            self.last_username = Some(username);
        }
    }

    pub fn cache_ttl(&self) -> CacheTtl {
        CacheTtl {
            list: Duration::from_secs(self.list_ttl_secs),
            detail: Duration::from_secs(self.detail_ttl_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_from(&dir.path().join("config.json")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.cache_ttl(), CacheTtl::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = Config {
            last_username: Some("admin@opas.ph".to_string()),
            list_ttl_secs: 60,
            decode_mode: DecodeMode::Lenient,
            ..Config::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"api_base_url": "https://opas.example/api"}"#).unwrap();
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.api_base_url, "https://opas.example/api");
        assert_eq!(config.request_timeout_secs, DEFAULT_TIMEOUT_SECS);
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(Config::load_from(&path), Err(OpasError::Config(_))));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_API_URL, "https://staging.opas.example/api/"),
            (ENV_DATA_DIR, "/tmp/opas-data"),
            (ENV_USERNAME, "  "),
        ]
        .into_iter()
        .collect();
        let mut config = Config {
            last_username: Some("kept".to_string()),
            ..Config::default()
        };
        config.apply_env(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(config.api_base_url, "https://staging.opas.example/api");
        assert_eq!(config.data_dir().unwrap(), PathBuf::from("/tmp/opas-data"));
        // Blank values are ignored
        assert_eq!(config.last_username.as_deref(), Some("kept"));
    }
}
