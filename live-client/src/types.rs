use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, Utc};
use common::{DetectionRecord, ErrorCategory};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a live camera session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Disconnected,
    Connecting,
    Streaming,
    Error,
}

impl SessionStatus {
    /// Connecting or streaming: a camera handle may be open on the backend.
    pub fn is_active(self) -> bool {
        matches!(self, SessionStatus::Connecting | SessionStatus::Streaming)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionStatus::Disconnected => "disconnected",
            SessionStatus::Connecting => "connecting",
            SessionStatus::Streaming => "streaming",
            SessionStatus::Error => "error",
        };
        f.write_str(name)
    }
}

/// One decoded camera frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Per-session sequence number, starting at 1.
    pub seq: u64,
    pub camera_id: u32,
    /// Raw JPEG bytes.
    pub data: Bytes,
    pub received_at: DateTime<Utc>,
}

/// Most recent failure reported to the observer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastError {
    pub message: String,
    pub category: ErrorCategory,
}

/// Counters kept for the lifetime of the session (not reset by stop).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub frames_received: u64,
    pub frames_rejected: u64,
    pub detections: u64,
    pub last_detection: Option<NaiveDateTime>,
    pub errors_reported: u64,
    pub retries_scheduled: u64,
    pub events_ignored: u64,
    pub malformed_messages: u64,
}

/// Read-only view of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub camera_id: Option<u32>,
    pub auto_reconnect: bool,
    pub retry_count: u32,
    pub max_retries: u32,
    /// A reconnect attempt is scheduled.
    pub retry_pending: bool,
    pub last_error: Option<LastError>,
    pub last_frame_seq: Option<u64>,
    pub pending_camera: Option<u32>,
    pub epoch: u64,
    pub stats: SessionStats,
}

/// Notifications published by the session service.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StatusChanged(SessionStatus),
    Frame(Frame),
    Error {
        message: String,
        category: ErrorCategory,
    },
    Detection(DetectionRecord),
}

/// Receives session notifications. Called synchronously from the session's
/// event loop, so implementations must not block.
pub trait SessionObserver {
    fn on_status_change(&mut self, status: SessionStatus);

    fn on_frame(&mut self, frame: &Frame);

    fn on_error(&mut self, message: &str, category: ErrorCategory);

    fn on_detection(&mut self, _detection: &DetectionRecord) {}

    /// Socket-level connectivity, independent of the camera status.
    fn on_connection_change(&mut self, _connected: bool) {}
}
