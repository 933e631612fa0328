use crate::types::SessionStatus;
use thiserror::Error;

// ============================================================================
// Session Errors
// ============================================================================

/// Rejections returned by the session's public operations.
///
/// A rejected call never changes session state and never sends anything on
/// the socket.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Camera {camera_id} is already {status}; stop the session first")]
    Busy { camera_id: u32, status: SessionStatus },

    #[error("A switch to camera {camera_id} is pending")]
    SwitchPending { camera_id: u32 },

    #[error("Auto-reconnect can only be changed while disconnected (status: {status})")]
    PolicyLocked { status: SessionStatus },

    #[error("Session service has shut down")]
    ServiceClosed,
}

// ============================================================================
// Transport Errors
// ============================================================================

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Socket is not connected")]
    NotConnected,

    #[error("Transport task has stopped")]
    Closed,

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] common::ProtocolError),
}

// ============================================================================
// Client (application level) Errors
// ============================================================================

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("API request failed: {0}")]
    Api(#[from] reqwest::Error),

    #[error("API returned status {status} for {url}")]
    ApiStatus { status: u16, url: String },

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
