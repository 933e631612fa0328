use crate::error::{ProtocolError, Result};
use crate::types::*;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Socket 消息信封：`{"event": "...", "data": {...}}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    pub fn new<T: Serialize>(event: &str, data: &T) -> Result<Self> {
        Ok(Self {
            event: event.to_string(),
            data: serde_json::to_value(data)?,
        })
    }

    pub fn parse(text: &str) -> Result<Self> {
        let envelope: Envelope = serde_json::from_str(text)?;
        if envelope.event.is_empty() {
            return Err(ProtocolError::MissingEvent);
        }
        Ok(envelope)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    fn payload<T: DeserializeOwned>(&self) -> Result<T> {
        // 缺省 data 视为空对象
        let data = if self.data.is_null() {
            Value::Object(Default::default())
        } else {
            self.data.clone()
        };
        serde_json::from_value(data).map_err(|e| ProtocolError::InvalidPayload {
            event: self.event.clone(),
            reason: e.to_string(),
        })
    }
}

pub const START_CAMERA: &str = "start_camera";
pub const STOP_CAMERA: &str = "stop_camera";
pub const CAMERA_FRAME: &str = "camera_frame";
pub const CAMERA_STATUS: &str = "camera_status";
pub const CAMERA_ERROR: &str = "camera_error";
pub const ANIMAL_DETECTED: &str = "animal_detected";
pub const SERVER_RESPONSE: &str = "server_response";

/// 启动摄像头请求
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartCameraRequest {
    pub camera_id: u32,
}

/// 停止摄像头请求（空负载）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopCameraRequest {}

/// 一帧图像（base64 编码的 JPEG）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraFrame {
    pub image: String,
}

/// 状态提示
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraStatus {
    pub status: CameraStatusHint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// 错误通知
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraError {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<ErrorCategory>,
}

impl CameraError {
    /// 实际生效的错误类别
    pub fn resolved_category(&self) -> ErrorCategory {
        self.category
            .unwrap_or_else(|| ErrorCategory::classify(&self.error))
    }
}

/// 服务端问候
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerResponse {
    pub data: String,
}

/// 客户端 -> 后端 控制命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    StartCamera { camera_id: u32 },
    StopCamera,
}

impl ClientCommand {
    pub fn event_name(&self) -> &'static str {
        match self {
            ClientCommand::StartCamera { .. } => START_CAMERA,
            ClientCommand::StopCamera => STOP_CAMERA,
        }
    }

    pub fn to_envelope(&self) -> Result<Envelope> {
        match self {
            ClientCommand::StartCamera { camera_id } => Envelope::new(
                START_CAMERA,
                &StartCameraRequest {
                    camera_id: *camera_id,
                },
            ),
            ClientCommand::StopCamera => Envelope::new(STOP_CAMERA, &StopCameraRequest {}),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        self.to_envelope()?.to_json()
    }

    pub fn from_envelope(envelope: &Envelope) -> Result<Self> {
        match envelope.event.as_str() {
            START_CAMERA => {
                let request: StartCameraRequest = envelope.payload()?;
                Ok(ClientCommand::StartCamera {
                    camera_id: request.camera_id,
                })
            }
            STOP_CAMERA => Ok(ClientCommand::StopCamera),
            other => Err(ProtocolError::UnknownCommand(other.to_string())),
        }
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Self::from_envelope(&Envelope::parse(text)?)
    }
}

/// 后端 -> 客户端 推送事件
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Frame(CameraFrame),
    Status(CameraStatus),
    Error(CameraError),
    Detection(DetectionRecord),
    Greeting(ServerResponse),
    /// 未知事件名（例如其他页面的广播），忽略即可
    Unknown(String),
}

impl ServerEvent {
    pub fn event_name(&self) -> &str {
        match self {
            ServerEvent::Frame(_) => CAMERA_FRAME,
            ServerEvent::Status(_) => CAMERA_STATUS,
            ServerEvent::Error(_) => CAMERA_ERROR,
            ServerEvent::Detection(_) => ANIMAL_DETECTED,
            ServerEvent::Greeting(_) => SERVER_RESPONSE,
            ServerEvent::Unknown(name) => name,
        }
    }

    pub fn from_envelope(envelope: &Envelope) -> Result<Self> {
        let event = match envelope.event.as_str() {
            CAMERA_FRAME => ServerEvent::Frame(envelope.payload()?),
            CAMERA_STATUS => ServerEvent::Status(envelope.payload()?),
            CAMERA_ERROR => ServerEvent::Error(envelope.payload()?),
            ANIMAL_DETECTED => ServerEvent::Detection(envelope.payload()?),
            SERVER_RESPONSE => ServerEvent::Greeting(envelope.payload()?),
            other => ServerEvent::Unknown(other.to_string()),
        };
        Ok(event)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Self::from_envelope(&Envelope::parse(text)?)
    }

    pub fn to_envelope(&self) -> Result<Envelope> {
        match self {
            ServerEvent::Frame(frame) => Envelope::new(CAMERA_FRAME, frame),
            ServerEvent::Status(status) => Envelope::new(CAMERA_STATUS, status),
            ServerEvent::Error(error) => Envelope::new(CAMERA_ERROR, error),
            ServerEvent::Detection(record) => Envelope::new(ANIMAL_DETECTED, record),
            ServerEvent::Greeting(greeting) => Envelope::new(SERVER_RESPONSE, greeting),
            ServerEvent::Unknown(name) => Ok(Envelope {
                event: name.clone(),
                data: Value::Null,
            }),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        self.to_envelope()?.to_json()
    }

    pub fn status(status: CameraStatusHint, message: impl Into<String>) -> Self {
        ServerEvent::Status(CameraStatus {
            status,
            message: Some(message.into()),
        })
    }

    pub fn error(error: impl Into<String>, category: ErrorCategory) -> Self {
        ServerEvent::Error(CameraError {
            error: error.into(),
            category: Some(category),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_camera_wire_format() {
        let json = ClientCommand::StartCamera { camera_id: 2 }.to_json().unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["event"], "start_camera");
        assert_eq!(value["data"]["camera_id"], 2);
    }

    #[test]
    fn test_stop_camera_accepts_missing_data() {
        assert_eq!(
            ClientCommand::from_json(r#"{"event":"stop_camera"}"#).unwrap(),
            ClientCommand::StopCamera
        );
        assert_eq!(
            ClientCommand::from_json(r#"{"event":"stop_camera","data":{}}"#).unwrap(),
            ClientCommand::StopCamera
        );
    }

    #[test]
    fn test_unknown_command_rejected() {
        let result = ClientCommand::from_json(r#"{"event":"reboot","data":{}}"#);
        assert!(matches!(result, Err(ProtocolError::UnknownCommand(name)) if name == "reboot"));
    }

    #[test]
    fn test_parse_camera_error_without_category() {
        let event = ServerEvent::from_json(
            r#"{"event":"camera_error","data":{"error":"Cannot open camera 1. Please check if camera is connected."}}"#,
        )
        .unwrap();

        match event {
            ServerEvent::Error(error) => {
                assert_eq!(error.category, None);
                assert_eq!(error.resolved_category(), ErrorCategory::Device);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_explicit_category_wins() {
        let event = ServerEvent::from_json(
            r#"{"event":"camera_error","data":{"error":"Cannot open camera 1","category":"transport"}}"#,
        )
        .unwrap();

        match event {
            ServerEvent::Error(error) => {
                assert_eq!(error.resolved_category(), ErrorCategory::Transport)
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_status_without_message() {
        let event =
            ServerEvent::from_json(r#"{"event":"camera_status","data":{"status":"streaming"}}"#)
                .unwrap();
        assert_eq!(
            event,
            ServerEvent::Status(CameraStatus {
                status: CameraStatusHint::Streaming,
                message: None,
            })
        );
    }

    #[test]
    fn test_unknown_event_is_not_an_error() {
        let event = ServerEvent::from_json(
            r#"{"event":"processing_progress","data":{"progress":40}}"#,
        )
        .unwrap();
        assert_eq!(event, ServerEvent::Unknown("processing_progress".to_string()));
    }

    #[test]
    fn test_invalid_payload_reports_event() {
        let result = ServerEvent::from_json(r#"{"event":"camera_frame","data":{"img":"x"}}"#);
        match result {
            Err(ProtocolError::InvalidPayload { event, .. }) => assert_eq!(event, "camera_frame"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_error_keeps_event_name() {
        let error = ServerEvent::from_json(r#"{"event":"camera_frame","data":{"image":42}}"#)
            .unwrap_err();
        assert_eq!(error.event_name(), Some("camera_frame"));

        let error = ServerEvent::from_json("not json").unwrap_err();
        assert_eq!(error.event_name(), None);
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(ServerEvent::from_json("not json").is_err());
        assert!(matches!(
            ServerEvent::from_json(r#"{"event":"","data":{}}"#),
            Err(ProtocolError::MissingEvent)
        ));
    }
}
