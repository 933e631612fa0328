use thiserror::Error;

/// 协议层错误（信封解析 / 命令编码）
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("Missing event name")]
    MissingEvent,

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Invalid payload for '{event}': {reason}")]
    InvalidPayload { event: String, reason: String },
}

/// 帧负载解码错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Empty frame payload")]
    Empty,

    #[error("Invalid base64 payload: {0}")]
    InvalidBase64(String),

    #[error("Payload is not a JPEG image")]
    NotJpeg,
}

impl ProtocolError {
    /// 出错消息的事件名（信封本身可解析时）
    pub fn event_name(&self) -> Option<&str> {
        match self {
            ProtocolError::InvalidPayload { event, .. } => Some(event),
            ProtocolError::UnknownCommand(event) => Some(event),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
