use crate::error::{BackendError, Result};
use common::CameraInfo;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Simulated camera backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub server: ServerConfig,
    pub stream: StreamConfig,
    pub logging: LoggingConfig,
    pub cameras: Vec<CameraConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Pause between frames (~30 fps)
    #[serde(serialize_with = "serialize_millis", deserialize_with = "deserialize_millis")]
    pub frame_interval: Duration,

    /// JPEG quality 1-100
    pub jpeg_quality: u8,

    /// Consecutive read failures before the stream is reported broken
    pub read_error_threshold: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    pub id: u32,
    pub name: String,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub source: FrameSourceConfig,
    /// Report a transport failure after this many frames
    #[serde(default)]
    pub fail_after_frames: Option<u64>,
    /// Emit a detection every N frames
    #[serde(default)]
    pub detection_every: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FrameSourceConfig {
    /// Generated moving-bar test pattern
    #[default]
    Pattern,
    /// `.jpg` files cycled in name order
    Directory { path: PathBuf },
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            stream: StreamConfig::default(),
            logging: LoggingConfig::default(),
            cameras: vec![
                CameraConfig::pattern(0, "Simulated camera 0", 640, 480),
                CameraConfig {
                    detection_every: Some(90),
                    ..CameraConfig::pattern(1, "Simulated camera 1", 320, 240)
                },
            ],
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            frame_interval: Duration::from_millis(33),
            jpeg_quality: 70,
            read_error_threshold: 5,
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

impl CameraConfig {
    pub fn pattern(id: u32, name: &str, width: u32, height: u32) -> Self {
        Self {
            id,
            name: name.to_string(),
            width,
            height,
            source: FrameSourceConfig::Pattern,
            fail_after_frames: None,
            detection_every: None,
        }
    }

    pub fn info(&self) -> CameraInfo {
        CameraInfo {
            id: self.id,
            name: self.name.clone(),
            width: self.width,
            height: self.height,
        }
    }
}

impl BackendConfig {
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .map_err(|e| BackendError::ConfigurationError {
                message: format!("Invalid listen address: {}", e),
            })
    }

    pub fn validate(&self) -> Result<()> {
        self.bind_addr()?;

        if self.stream.frame_interval.is_zero() {
            return Err(BackendError::ConfigurationError {
                message: "Frame interval must be greater than 0".to_string(),
            });
        }

        if !(1..=100).contains(&self.stream.jpeg_quality) {
            return Err(BackendError::ConfigurationError {
                message: "JPEG quality must be between 1 and 100".to_string(),
            });
        }

        let mut seen = HashSet::new();
        for camera in &self.cameras {
            if !seen.insert(camera.id) {
                return Err(BackendError::ConfigurationError {
                    message: format!("Duplicate camera id {}", camera.id),
                });
            }
            if camera.width == 0 || camera.height == 0 {
                return Err(BackendError::ConfigurationError {
                    message: format!("Camera {} has an empty frame size", camera.id),
                });
            }
            if camera.detection_every == Some(0) {
                return Err(BackendError::ConfigurationError {
                    message: format!("Camera {}: detection_every must be greater than 0", camera.id),
                });
            }
        }

        Ok(())
    }
}

pub struct ConfigManager {
    config_path: PathBuf,
    config: BackendConfig,
}

impl ConfigManager {
    pub fn new(config_path: PathBuf) -> Self {
        Self {
            config_path,
            config: BackendConfig::default(),
        }
    }

    /// Missing file means defaults; nothing is written.
    pub async fn load(&mut self) -> Result<()> {
        if !self.config_path.exists() {
            return Ok(());
        }

        let content = tokio::fs::read_to_string(&self.config_path)
            .await
            .map_err(|e| BackendError::ConfigurationError {
                message: format!("Failed to read config file: {}", e),
            })?;

        self.config = toml::from_str(&content).map_err(|e| BackendError::ConfigurationError {
            message: format!("Failed to parse config file: {}", e),
        })?;

        self.config.validate()
    }

    pub fn get_config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn get_config_mut(&mut self) -> &mut BackendConfig {
        &mut self.config
    }

    pub fn into_config(self) -> BackendConfig {
        self.config
    }
}

pub struct EnvConfigOverride;

impl EnvConfigOverride {
    pub fn apply_overrides(config: &mut BackendConfig) {
        Self::apply_from(config, |key| std::env::var(key).ok());
    }

    pub fn apply_from(config: &mut BackendConfig, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup("CAMERA_BACKEND_HOST") {
            config.server.host = host;
        }
        if let Some(port) = lookup("CAMERA_BACKEND_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                config.server.port = port;
            }
        }
        if let Some(interval) = lookup("CAMERA_BACKEND_FRAME_INTERVAL_MS") {
            if let Ok(interval) = interval.parse::<u64>() {
                config.stream.frame_interval = Duration::from_millis(interval);
            }
        }
        if let Some(level) = lookup("CAMERA_BACKEND_LOG_LEVEL") {
            config.logging.level = level;
        }
    }
}

fn serialize_millis<S: Serializer>(duration: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
    millis.serialize(serializer)
}

fn deserialize_millis<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Duration, D::Error> {
    Ok(Duration::from_millis(u64::deserialize(deserializer)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = BackendConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cameras.len(), 2);
        assert_eq!(config.stream.jpeg_quality, 70);
        assert_eq!(config.bind_addr().unwrap().port(), 5000);
    }

    #[tokio::test]
    async fn test_load_cameras_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("camera-backend.toml");
        std::fs::write(
            &path,
            r#"
[stream]
frame_interval = 10

[[cameras]]
id = 0
name = "Porch"
width = 160
height = 120
fail_after_frames = 20

[[cameras]]
id = 4
name = "Garden"
width = 320
height = 240
source = { kind = "directory", path = "/srv/garden" }
"#,
        )
        .unwrap();

        let mut manager = ConfigManager::new(path);
        manager.load().await.unwrap();
        let config = manager.get_config();

        assert_eq!(config.stream.frame_interval, Duration::from_millis(10));
        assert_eq!(config.stream.jpeg_quality, 70);
        assert_eq!(config.cameras.len(), 2);
        assert_eq!(config.cameras[0].source, FrameSourceConfig::Pattern);
        assert_eq!(config.cameras[0].fail_after_frames, Some(20));
        assert_eq!(
            config.cameras[1].source,
            FrameSourceConfig::Directory {
                path: PathBuf::from("/srv/garden")
            }
        );
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let mut config = BackendConfig::default();
        config.cameras.push(CameraConfig::pattern(0, "Again", 10, 10));
        assert!(config.validate().is_err());

        let mut config = BackendConfig::default();
        config.stream.jpeg_quality = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = BackendConfig::default();
        EnvConfigOverride::apply_from(&mut config, |key| match key {
            "CAMERA_BACKEND_PORT" => Some("5050".to_string()),
            "CAMERA_BACKEND_FRAME_INTERVAL_MS" => Some("100".to_string()),
            _ => None,
        });
        assert_eq!(config.server.port, 5050);
        assert_eq!(config.stream.frame_interval, Duration::from_millis(100));
        assert_eq!(config.server.host, "0.0.0.0");
    }
}
