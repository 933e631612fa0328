use crate::config::{BackendConfig, CameraConfig};
use crate::registry::StreamRegistry;
use crate::stream::StreamSettings;
use common::CameraInfo;
use std::sync::Arc;

/// Shared state for the HTTP and socket handlers.
#[derive(Clone)]
pub struct AppState {
    cameras: Arc<Vec<CameraConfig>>,
    settings: StreamSettings,
    registry: StreamRegistry,
}

impl AppState {
    pub fn new(config: &BackendConfig) -> Self {
        Self {
            cameras: Arc::new(config.cameras.clone()),
            settings: StreamSettings::from(&config.stream),
            registry: StreamRegistry::new(),
        }
    }

    pub fn camera(&self, camera_id: u32) -> Option<CameraConfig> {
        self.cameras
            .iter()
            .find(|camera| camera.id == camera_id)
            .cloned()
    }

    pub fn camera_infos(&self) -> Vec<CameraInfo> {
        self.cameras.iter().map(CameraConfig::info).collect()
    }

    pub fn settings(&self) -> &StreamSettings {
        &self.settings
    }

    pub fn registry(&self) -> &StreamRegistry {
        &self.registry
    }
}
