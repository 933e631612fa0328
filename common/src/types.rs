use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 摄像头信息（GET /api/available-cameras）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraInfo {
    pub id: u32,
    pub name: String,
    pub width: u32,
    pub height: u32,
}

/// 可用摄像头列表响应
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AvailableCameras {
    pub cameras: Vec<CameraInfo>,
}

/// 后端推送的摄像头状态提示
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraStatusHint {
    Connecting,
    Connected,
    Streaming,
    Disconnected,
}

impl fmt::Display for CameraStatusHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CameraStatusHint::Connecting => "connecting",
            CameraStatusHint::Connected => "connected",
            CameraStatusHint::Streaming => "streaming",
            CameraStatusHint::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// 错误类别：设备错误不会自动重试，传输错误可以重试
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Device,
    Transport,
}

impl ErrorCategory {
    /// 后端未给出类别时，根据错误文本推断
    pub fn classify(message: &str) -> Self {
        const DEVICE_MARKERS: &[&str] = &[
            "cannot open camera",
            "check if camera is connected",
            "device not found",
            "no such device",
            "permission denied",
            "not permitted",
            "access denied",
        ];

        let lowered = message.to_lowercase();
        if DEVICE_MARKERS.iter().any(|marker| lowered.contains(marker)) {
            ErrorCategory::Device
        } else {
            ErrorCategory::Transport
        }
    }

    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorCategory::Transport)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Device => f.write_str("device"),
            ErrorCategory::Transport => f.write_str("transport"),
        }
    }
}

/// 检测通知（animal_detected）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub id: i64,
    pub class_name: String,
    pub confidence: f64,
    pub video_source: String,
    pub timestamp: NaiveDateTime,
}
