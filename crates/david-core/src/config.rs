//! David configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{DavidError, Result};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DavidConfig {
    /// When present, David starts an HTTP listener for webhook events.
    #[serde(default)]
    pub webhook: Option<WebhookConfig>,
}

impl DavidConfig {
    /// Config with a webhook listener enabled.
    pub fn with_webhook(webhook: WebhookConfig) -> Self {
        Self {
            webhook: Some(webhook),
        }
    }

    /// Load config from the default path (~/.david/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DavidError::Config(format!("Failed to read config: {e}")))?;
        Self::from_toml(&content)
    }

    /// Parse config from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| DavidError::Config(format!("Failed to parse config: {e}")))
    }

    /// Save config to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| DavidError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        tracing::debug!("💾 Config saved to {}", path.display());
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".david")
            .join("config.toml")
    }
}

/// Webhook listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Serve a plain welcome page at `GET /`.
    #[serde(default = "bool_true")]
    pub homepage: bool,
    /// Required as `X-Api-Key` header or `apikey` query parameter when non-empty.
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

fn default_host() -> String { "0.0.0.0".into() }
fn default_port() -> u16 { 80 }
fn bool_true() -> bool { true }
fn default_body_limit() -> usize { 1024 * 1024 }

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            homepage: true,
            api_key: String::new(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

impl WebhookConfig {
    /// Listener on the given port with every other field defaulted.
    pub fn on_port(port: u16) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }

    /// `host:port` string used to bind the listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn requires_api_key(&self) -> bool {
        !self.api_key.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_has_no_webhook() {
        let config = DavidConfig::from_toml("").unwrap();
        assert!(config.webhook.is_none());
    }

    #[test]
    fn test_webhook_defaults() {
        let config = DavidConfig::from_toml("[webhook]\nport = 5000\n").unwrap();
        let webhook = config.webhook.unwrap();
        assert_eq!(webhook.port, 5000);
        assert_eq!(webhook.host, "0.0.0.0");
        assert!(webhook.homepage);
        assert!(!webhook.requires_api_key());
        assert_eq!(webhook.bind_addr(), "0.0.0.0:5000");
    }

    #[test]
    fn test_invalid_toml() {
        let err = DavidConfig::from_toml("[webhook\nport = ").unwrap_err();
        assert!(matches!(err, DavidError::Config(_)));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = std::env::temp_dir().join(format!("david-config-{}", std::process::id()));
        let path = dir.join("config.toml");
        let mut webhook = WebhookConfig::on_port(8080);
        webhook.api_key = "secret".into();
        DavidConfig::with_webhook(webhook).save_to(&path).unwrap();

        let loaded = DavidConfig::load_from(&path).unwrap();
        let webhook = loaded.webhook.unwrap();
        assert_eq!(webhook.port, 8080);
        assert!(webhook.requires_api_key());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_file() {
        let err = DavidConfig::load_from(Path::new("/nonexistent/david.toml")).unwrap_err();
        assert!(matches!(err, DavidError::Config(_)));
    }
}
