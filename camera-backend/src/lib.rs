pub mod config;
pub mod error;
pub mod frames;
pub mod registry;
pub mod routes;
pub mod server;
pub mod socket;
pub mod state;
pub mod stream;

pub use config::{BackendConfig, CameraConfig, ConfigManager, EnvConfigOverride, FrameSourceConfig};
pub use error::BackendError;
pub use server::BackendServer;
pub use state::AppState;
