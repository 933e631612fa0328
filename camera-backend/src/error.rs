use thiserror::Error;

/// 模拟后端错误
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Cannot open camera {0}. Please check if camera is connected.")]
    CameraUnavailable(u32),

    #[error("Frame source error for camera {camera_id}: {reason}")]
    FrameSource { camera_id: u32, reason: String },

    #[error("JPEG encoding failed: {0}")]
    Encode(#[from] image::ImageError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] common::ProtocolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BackendError>;
