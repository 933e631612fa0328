use crate::config::{CameraConfig, StreamConfig};
use crate::frames::open_source;
use chrono::Utc;
use common::{
    encode_frame_payload, CameraFrame, CameraStatusHint, DetectionRecord, ErrorCategory,
    ServerEvent,
};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const READ_FAILURE: &str = "Cannot read frames from camera";

const DETECTION_CLASSES: &[&str] = &["deer", "fox", "wild boar", "bird"];

#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub frame_interval: Duration,
    pub jpeg_quality: u8,
    pub read_error_threshold: u32,
}

impl From<&StreamConfig> for StreamSettings {
    fn from(config: &StreamConfig) -> Self {
        Self {
            frame_interval: config.frame_interval,
            jpeg_quality: config.jpeg_quality,
            read_error_threshold: config.read_error_threshold.max(1),
        }
    }
}

/// Streams one camera to one socket until cancelled or broken.
///
/// Emits `camera_status{connected}` once the source is open, then a
/// `camera_frame` per tick. Source failures end the stream with a
/// `camera_error`.
pub async fn run_stream(
    camera: CameraConfig,
    settings: StreamSettings,
    events: mpsc::UnboundedSender<ServerEvent>,
    cancel: CancellationToken,
) {
    let mut source = match open_source(&camera, settings.jpeg_quality) {
        Ok(source) => source,
        Err(e) => {
            warn!("❌ Camera {}: {}", camera.id, e);
            let _ = events.send(ServerEvent::error(e.to_string(), ErrorCategory::Device));
            return;
        }
    };

    info!("✓ Camera {} opened ({}x{})", camera.id, camera.width, camera.height);
    let _ = events.send(ServerEvent::status(
        CameraStatusHint::Connected,
        format!("Connected to camera {}", camera.id),
    ));

    let mut interval = tokio::time::interval(settings.frame_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut frames_sent = 0u64;
    let mut read_errors = 0u32;
    let mut detections = 0i64;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        if camera
            .fail_after_frames
            .is_some_and(|limit| frames_sent >= limit)
        {
            warn!("Camera {}: read failure after {} frames", camera.id, frames_sent);
            let _ = events.send(ServerEvent::error(READ_FAILURE, ErrorCategory::Transport));
            break;
        }

        let jpeg = match source.next_frame().await {
            Ok(jpeg) => {
                read_errors = 0;
                jpeg
            }
            Err(e) => {
                read_errors += 1;
                warn!(
                    "Camera {} read error ({}/{}): {}",
                    camera.id, read_errors, settings.read_error_threshold, e
                );
                if read_errors >= settings.read_error_threshold {
                    let _ = events.send(ServerEvent::error(READ_FAILURE, ErrorCategory::Transport));
                    break;
                }
                continue;
            }
        };

        // stop_camera 可能在生成帧期间到达
        if cancel.is_cancelled() {
            break;
        }

        let frame = ServerEvent::Frame(CameraFrame {
            image: encode_frame_payload(&jpeg),
        });
        if events.send(frame).is_err() {
            break;
        }
        frames_sent += 1;

        if let Some(every) = camera.detection_every.filter(|every| *every > 0) {
            if frames_sent % every == 0 {
                detections += 1;
                let class_name =
                    DETECTION_CLASSES[(detections as usize - 1) % DETECTION_CLASSES.len()];
                let record = DetectionRecord {
                    id: detections,
                    class_name: class_name.to_string(),
                    confidence: 0.75 + (detections % 5) as f64 * 0.05,
                    video_source: format!("camera:{}", camera.id),
                    timestamp: Utc::now().naive_utc(),
                };
                let _ = events.send(ServerEvent::Detection(record));
            }
        }
    }

    debug!("Camera {} stream ended after {} frames", camera.id, frames_sent);
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{decode_frame_payload, CameraStatus};

    fn settings() -> StreamSettings {
        StreamSettings {
            frame_interval: Duration::from_millis(1),
            jpeg_quality: 60,
            read_error_threshold: 5,
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_injected_failure_ends_stream() {
        let camera = CameraConfig {
            fail_after_frames: Some(3),
            detection_every: Some(2),
            ..CameraConfig::pattern(0, "Test", 32, 24)
        };
        let (tx, mut rx) = mpsc::unbounded_channel();

        run_stream(camera, settings(), tx, CancellationToken::new()).await;
        let events = drain(&mut rx);

        assert!(matches!(
            &events[0],
            ServerEvent::Status(CameraStatus {
                status: CameraStatusHint::Connected,
                ..
            })
        ));
        let frames: Vec<_> = events
            .iter()
            .filter_map(|event| match event {
                ServerEvent::Frame(frame) => Some(frame),
                _ => None,
            })
            .collect();
        assert_eq!(frames.len(), 3);
        assert!(decode_frame_payload(&frames[0].image).is_ok());

        let detections = events
            .iter()
            .filter(|event| matches!(event, ServerEvent::Detection(_)))
            .count();
        assert_eq!(detections, 1);

        match events.last() {
            Some(ServerEvent::Error(error)) => {
                assert_eq!(error.error, READ_FAILURE);
                assert_eq!(error.category, Some(ErrorCategory::Transport));
            }
            other => panic!("expected camera_error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancel_stops_stream() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_stream(
            CameraConfig::pattern(1, "Test", 16, 16),
            settings(),
            tx,
            cancel.clone(),
        ));

        // 等到至少一帧
        loop {
            if let Some(ServerEvent::Frame(_)) = rx.recv().await {
                break;
            }
        }
        cancel.cancel();
        task.await.unwrap();

        let errors = drain(&mut rx)
            .into_iter()
            .filter(|event| matches!(event, ServerEvent::Error(_)))
            .count();
        assert_eq!(errors, 0);
    }
}
