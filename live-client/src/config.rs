use crate::errors::ClientError;
use crate::retry::{RetryPolicy, RetryStrategy};
use crate::session::SessionOptions;
use crate::transport::TransportOptions;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// live-viewer configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Backend endpoints
    pub server: ServerConfig,

    /// Camera session behaviour
    pub session: SessionConfig,

    /// Socket-level reconnection
    pub transport: TransportConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// WebSocket endpoint, e.g. `ws://127.0.0.1:5000/socket`
    pub socket_url: String,

    /// REST base URL, e.g. `http://127.0.0.1:5000`
    pub api_url: String,

    /// REST request timeout
    #[serde(serialize_with = "crate::serde_helpers::serialize_duration")]
    #[serde(deserialize_with = "crate::serde_helpers::deserialize_duration")]
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub auto_reconnect: bool,

    /// Maximum consecutive reconnect attempts
    pub max_retries: u32,

    pub retry_strategy: RetryStrategy,

    #[serde(serialize_with = "crate::serde_helpers::serialize_duration")]
    #[serde(deserialize_with = "crate::serde_helpers::deserialize_duration")]
    pub retry_delay: Duration,

    /// Upper bound for exponential backoff
    #[serde(serialize_with = "crate::serde_helpers::serialize_duration")]
    #[serde(deserialize_with = "crate::serde_helpers::deserialize_duration")]
    pub max_retry_delay: Duration,

    #[serde(serialize_with = "crate::serde_helpers::serialize_duration")]
    #[serde(deserialize_with = "crate::serde_helpers::deserialize_duration")]
    pub connect_timeout: Duration,

    #[serde(serialize_with = "crate::serde_helpers::serialize_duration")]
    #[serde(deserialize_with = "crate::serde_helpers::deserialize_duration")]
    pub switch_grace: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub reconnection_attempts: u32,

    #[serde(serialize_with = "crate::serde_helpers::serialize_duration")]
    #[serde(deserialize_with = "crate::serde_helpers::deserialize_duration")]
    pub reconnection_delay: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_url: "ws://127.0.0.1:5000/socket".to_string(),
            api_url: "http://127.0.0.1:5000".to_string(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        let session = SessionOptions::default();
        Self {
            auto_reconnect: session.auto_reconnect,
            max_retries: retry.max_retries,
            retry_strategy: retry.strategy,
            retry_delay: retry.delay,
            max_retry_delay: retry.max_delay,
            connect_timeout: session.connect_timeout,
            switch_grace: session.switch_grace,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        let options = TransportOptions::default();
        Self {
            reconnection_attempts: options.reconnection_attempts,
            reconnection_delay: options.reconnection_delay,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl ClientConfig {
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            auto_reconnect: self.session.auto_reconnect,
            retry: RetryPolicy {
                max_retries: self.session.max_retries,
                strategy: self.session.retry_strategy,
                delay: self.session.retry_delay,
                max_delay: self.session.max_retry_delay,
            },
            connect_timeout: self.session.connect_timeout,
            switch_grace: self.session.switch_grace,
        }
    }

    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            reconnection_attempts: self.transport.reconnection_attempts,
            reconnection_delay: self.transport.reconnection_delay,
        }
    }
}

pub struct ConfigManager {
    config_path: PathBuf,
    config: ClientConfig,
}

impl ConfigManager {
    pub fn new(config_path: PathBuf) -> Self {
        Self {
            config_path,
            config: ClientConfig::default(),
        }
    }

    pub async fn load(&mut self) -> Result<(), ClientError> {
        if !self.config_path.exists() {
            // 首次运行写出默认配置
            self.save().await?;
            return Ok(());
        }

        let content = tokio::fs::read_to_string(&self.config_path)
            .await
            .map_err(|e| ClientError::ConfigurationError {
                message: format!("Failed to read config file: {}", e),
            })?;

        self.config = toml::from_str(&content).map_err(|e| ClientError::ConfigurationError {
            message: format!("Failed to parse config file: {}", e),
        })?;

        self.validate()?;
        Ok(())
    }

    pub async fn save(&self) -> Result<(), ClientError> {
        let content =
            toml::to_string_pretty(&self.config).map_err(|e| ClientError::ConfigurationError {
                message: format!("Failed to serialize config: {}", e),
            })?;

        if let Some(parent) = self.config_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| ClientError::ConfigurationError {
                        message: format!("Failed to create config directory: {}", e),
                    })?;
            }
        }

        tokio::fs::write(&self.config_path, content)
            .await
            .map_err(|e| ClientError::ConfigurationError {
                message: format!("Failed to write config file: {}", e),
            })?;

        Ok(())
    }

    pub fn get_config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn get_config_mut(&mut self) -> &mut ClientConfig {
        &mut self.config
    }

    pub fn update_config(&mut self, config: ClientConfig) -> Result<(), ClientError> {
        self.config = config;
        self.validate()?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        let config = &self.config;

        if !(config.server.socket_url.starts_with("ws://")
            || config.server.socket_url.starts_with("wss://"))
        {
            return Err(ClientError::ConfigurationError {
                message: format!(
                    "Socket URL must start with ws:// or wss:// (got '{}')",
                    config.server.socket_url
                ),
            });
        }

        if !(config.server.api_url.starts_with("http://")
            || config.server.api_url.starts_with("https://"))
        {
            return Err(ClientError::ConfigurationError {
                message: format!(
                    "API URL must start with http:// or https:// (got '{}')",
                    config.server.api_url
                ),
            });
        }

        if config.session.retry_delay.is_zero() {
            return Err(ClientError::ConfigurationError {
                message: "Retry delay must be greater than 0".to_string(),
            });
        }

        if config.session.max_retry_delay < config.session.retry_delay {
            return Err(ClientError::ConfigurationError {
                message: "Max retry delay must not be smaller than retry delay".to_string(),
            });
        }

        if config.session.connect_timeout.is_zero() {
            return Err(ClientError::ConfigurationError {
                message: "Connect timeout must be greater than 0".to_string(),
            });
        }

        let level = config.logging.level.to_lowercase();
        if !["trace", "debug", "info", "warn", "error"].contains(&level.as_str()) {
            return Err(ClientError::ConfigurationError {
                message: format!("Unknown log level '{}'", config.logging.level),
            });
        }

        Ok(())
    }
}

pub struct EnvConfigOverride;

impl EnvConfigOverride {
    pub fn apply_overrides(config: &mut ClientConfig) {
        Self::apply_from(config, |key| std::env::var(key).ok());
    }

    pub fn apply_from(config: &mut ClientConfig, lookup: impl Fn(&str) -> Option<String>) {
        // Server overrides
        if let Some(url) = lookup("LIVE_VIEWER_SOCKET_URL") {
            config.server.socket_url = url;
        }
        if let Some(url) = lookup("LIVE_VIEWER_API_URL") {
            config.server.api_url = url;
        }

        // Session overrides
        if let Some(enabled) = lookup("LIVE_VIEWER_AUTO_RECONNECT") {
            config.session.auto_reconnect = enabled.to_lowercase() == "true";
        }
        if let Some(retries) = lookup("LIVE_VIEWER_MAX_RETRIES") {
            if let Ok(retries) = retries.parse::<u32>() {
                config.session.max_retries = retries;
            }
        }
        if let Some(delay) = lookup("LIVE_VIEWER_RETRY_DELAY_MS") {
            if let Ok(delay) = delay.parse::<u64>() {
                config.session.retry_delay = Duration::from_millis(delay);
            }
        }

        // Logging overrides
        if let Some(level) = lookup("LIVE_VIEWER_LOG_LEVEL") {
            config.logging.level = level;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_load_creates_default_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("live-viewer.toml");

        let mut manager = ConfigManager::new(path.clone());
        manager.load().await.unwrap();

        assert!(path.exists());
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("retry_delay = 2000"));
        assert!(content.contains("socket_url"));
    }

    #[tokio::test]
    async fn test_load_partial_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("live-viewer.toml");
        std::fs::write(
            &path,
            r#"
[server]
socket_url = "ws://cams.local:5000/socket"

[session]
max_retries = 5
retry_strategy = "exponential"
retry_delay = 250
"#,
        )
        .unwrap();

        let mut manager = ConfigManager::new(path);
        manager.load().await.unwrap();
        let config = manager.get_config();

        assert_eq!(config.server.socket_url, "ws://cams.local:5000/socket");
        assert_eq!(config.server.api_url, "http://127.0.0.1:5000");

        let options = config.session_options();
        assert_eq!(options.retry.max_retries, 5);
        assert_eq!(options.retry.strategy, RetryStrategy::Exponential);
        assert_eq!(options.retry.delay, Duration::from_millis(250));
        assert!(options.auto_reconnect);
        assert_eq!(config.transport_options().reconnection_attempts, 5);
    }

    #[tokio::test]
    async fn test_load_rejects_invalid_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("live-viewer.toml");
        std::fs::write(&path, "[server]\nsocket_url = \"http://wrong\"\n").unwrap();

        let mut manager = ConfigManager::new(path);
        let result = manager.load().await;
        assert!(matches!(result, Err(ClientError::ConfigurationError { .. })));
    }

    #[test]
    fn test_validate() {
        let mut manager = ConfigManager::new(PathBuf::from("unused.toml"));
        assert!(manager.validate().is_ok());

        let mut config = ClientConfig::default();
        config.session.retry_delay = Duration::ZERO;
        assert!(manager.update_config(config).is_err());

        let mut config = ClientConfig::default();
        config.logging.level = "loud".to_string();
        assert!(manager.update_config(config).is_err());

        let mut config = ClientConfig::default();
        config.session.max_retry_delay = Duration::from_millis(10);
        assert!(manager.update_config(config).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("LIVE_VIEWER_SOCKET_URL", "ws://10.0.0.2:5000/socket"),
            ("LIVE_VIEWER_AUTO_RECONNECT", "FALSE"),
            ("LIVE_VIEWER_MAX_RETRIES", "7"),
            ("LIVE_VIEWER_RETRY_DELAY_MS", "not-a-number"),
            ("LIVE_VIEWER_LOG_LEVEL", "debug"),
        ]);

        let mut config = ClientConfig::default();
        EnvConfigOverride::apply_from(&mut config, |key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.server.socket_url, "ws://10.0.0.2:5000/socket");
        assert!(!config.session.auto_reconnect);
        assert_eq!(config.session.max_retries, 7);
        // 无法解析的值保持默认
        assert_eq!(config.session.retry_delay, Duration::from_secs(2));
        assert_eq!(config.logging.level, "debug");
    }
}
