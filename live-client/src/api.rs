use crate::errors::ClientError;
use common::{AvailableCameras, CameraInfo};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// `GET /api/health` response
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default)]
    pub active_streams: usize,
}

/// Camera discovery over the backend's REST API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub async fn available_cameras(&self) -> Result<Vec<CameraInfo>, ClientError> {
        let response: AvailableCameras = self.get_json("/api/available-cameras").await?;
        Ok(response.cameras)
    }

    pub async fn health(&self) -> Result<HealthStatus, ClientError> {
        self.get_json("/api/health").await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(ClientError::ApiStatus {
                status: response.status().as_u16(),
                url,
            });
        }
        Ok(response.json::<T>().await?)
    }
}
