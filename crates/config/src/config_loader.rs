use chatrelay_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub provider: ProviderConfig,
    pub limits: LimitsConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Completion provider configuration.
///
/// The API key itself never lives in the file; `api_key_env` names the
/// environment variable that holds it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: String,
    pub model: String,
    pub api_key_env: String,
    pub system_prompt: String,
    pub timeout_secs: u64,
}

/// Rate limits for `POST /messages`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub per_ip_per_minute: u32,
    pub max_concurrent_per_ip: usize,
    pub global_per_minute: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8081,
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-3.5-turbo".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            system_prompt: "You are a terse bot in a group chat responding to q's.".to_string(),
            timeout_secs: 300,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            per_ip_per_minute: 20,
            max_concurrent_per_ip: 3,
            global_per_minute: 200,
        }
    }
}

impl ProviderConfig {
    /// Read the API key from the process environment
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key_with(|name| std::env::var(name).ok())
    }

    /// Resolve the API key through `lookup`. Blank values count as missing.
    pub fn api_key_with<F>(&self, lookup: F) -> Option<String>
    where
        F: FnOnce(&str) -> Option<String>,
    {
        lookup(&self.api_key_env)
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
    }
}

impl AppConfig {
    /// Check values serde cannot check on its own
    pub fn validate(&self) -> Result<()> {
        if self.provider.model.trim().is_empty() {
            return Err(Error::ConfigError("provider.model must not be empty".into()));
        }
        if !self.provider.base_url.starts_with("http://") && !self.provider.base_url.starts_with("https://") {
            return Err(Error::ConfigError(format!(
                "provider.base_url must be an http(s) URL, got {}",
                self.provider.base_url
            )));
        }
        if self.provider.api_key_env.trim().is_empty() {
            return Err(Error::ConfigError("provider.api_key_env must not be empty".into()));
        }
        if self.provider.timeout_secs == 0 {
            return Err(Error::ConfigError("provider.timeout_secs must be at least 1".into()));
        }
        if self.limits.max_concurrent_per_ip == 0 {
            return Err(Error::ConfigError("limits.max_concurrent_per_ip must be at least 1".into()));
        }
        Ok(())
    }
}

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from file or use defaults
    pub fn load(path: Option<&PathBuf>) -> Result<AppConfig> {
        if let Some(path) = path {
            if path.exists() {
                return Self::load_file(path);
            }
            return Err(Error::ConfigError(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        // Check default locations
        let default_paths = vec![
            PathBuf::from("chatrelay.json"),
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("chatrelay/config.json"),
        ];

        for path in default_paths {
            if path.exists() {
                return Self::load_file(&path);
            }
        }

        debug!("No config file found, using defaults");
        Ok(AppConfig::default())
    }

    fn load_file(path: &Path) -> Result<AppConfig> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        config.validate()?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(config: &AppConfig, path: &PathBuf) -> Result<()> {
        let content = serde_json::to_string_pretty(config)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
