use camera_backend::{BackendConfig, BackendServer, CameraConfig};
use common::ErrorCategory;
use live_client::{
    ApiClient, RetryPolicy, SessionEvent, SessionHandle, SessionOptions, SessionService,
    SessionStatus, TransportOptions,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::broadcast;

const WAIT: Duration = Duration::from_secs(5);

async fn spawn_backend() -> SocketAddr {
    let mut config = BackendConfig::default();
    config.server.host = "127.0.0.1".to_string();
    config.server.port = 0;
    config.stream.frame_interval = Duration::from_millis(5);
    config.cameras = vec![
        CameraConfig::pattern(0, "Front door", 64, 48),
        // 打开后立即读帧失败
        CameraConfig {
            fail_after_frames: Some(0),
            ..CameraConfig::pattern(1, "Broken", 32, 24)
        },
        CameraConfig::pattern(2, "Garden", 48, 32),
    ];

    let (addr, _task) = BackendServer::new(&config)
        .unwrap()
        .spawn()
        .await
        .unwrap();
    addr
}

fn session_options() -> SessionOptions {
    SessionOptions {
        retry: RetryPolicy::fixed(2, Duration::from_millis(50)),
        connect_timeout: Duration::from_secs(2),
        ..SessionOptions::default()
    }
}

async fn connect(addr: SocketAddr) -> (SessionService, SessionHandle) {
    let service = SessionService::connect(
        &format!("ws://{}/socket", addr),
        TransportOptions::default(),
        session_options(),
    );
    let handle = service.handle();
    let connected = tokio::time::timeout(WAIT, handle.wait_connected())
        .await
        .expect("socket did not connect");
    assert!(connected);
    (service, handle)
}

async fn wait_for_status(handle: &SessionHandle, expected: SessionStatus) {
    let mut status = handle.status();
    tokio::time::timeout(WAIT, status.wait_for(|s| *s == expected))
        .await
        .expect("timed out waiting for status")
        .expect("service stopped");
}

async fn next_error(events: &mut broadcast::Receiver<SessionEvent>) -> (String, ErrorCategory) {
    loop {
        let event = tokio::time::timeout(WAIT, events.recv())
            .await
            .expect("timed out waiting for error")
            .expect("event stream closed");
        if let SessionEvent::Error { message, category } = event {
            return (message, category);
        }
    }
}

#[tokio::test]
async fn test_stream_then_stop() {
    let addr = spawn_backend().await;
    let (service, handle) = connect(addr).await;

    handle.start(0).await.unwrap();
    wait_for_status(&handle, SessionStatus::Streaming).await;

    let frame = handle.frames().borrow().clone().expect("frame after streaming");
    assert_eq!(frame.camera_id, 0);
    assert_eq!(&frame.data[..2], &[0xFF, 0xD8]);

    handle.stop().await.unwrap();
    assert_eq!(handle.current_status(), SessionStatus::Disconnected);
    assert!(handle.frames().borrow().is_none());

    // 停止后不再接收帧
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(handle.frames().borrow().is_none());
    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.status, SessionStatus::Disconnected);
    assert!(snapshot.stats.frames_received > 0);

    service.shutdown().await;
}

#[tokio::test]
async fn test_unknown_camera_is_device_error() {
    let addr = spawn_backend().await;
    let (service, handle) = connect(addr).await;
    let mut events = handle.subscribe();

    handle.start(9).await.unwrap();
    let (message, category) = next_error(&mut events).await;

    assert_eq!(category, ErrorCategory::Device);
    assert!(message.contains("Cannot open camera 9"));
    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.status, SessionStatus::Error);
    assert_eq!(snapshot.retry_count, 0);
    assert!(!snapshot.retry_pending);

    service.shutdown().await;
}

#[tokio::test]
async fn test_transport_error_is_retried() {
    let addr = spawn_backend().await;
    let (service, handle) = connect(addr).await;
    let mut events = handle.subscribe();

    handle.start(1).await.unwrap();

    let (message, category) = next_error(&mut events).await;
    assert_eq!(category, ErrorCategory::Transport);
    assert_eq!(message, "Cannot read frames from camera");

    // 每次重连都会再次失败，直到用完重试次数
    next_error(&mut events).await;
    next_error(&mut events).await;
    wait_for_status(&handle, SessionStatus::Error).await;

    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.stats.retries_scheduled, 2);
    assert_eq!(snapshot.stats.errors_reported, 3);
    assert!(!snapshot.retry_pending);

    service.shutdown().await;
}

#[tokio::test]
async fn test_switch_camera() {
    let addr = spawn_backend().await;
    let (service, handle) = connect(addr).await;

    handle.start(0).await.unwrap();
    wait_for_status(&handle, SessionStatus::Streaming).await;

    handle.switch_camera(2).await.unwrap();
    let mut frames = handle.frames();
    tokio::time::timeout(
        WAIT,
        frames.wait_for(|frame| frame.as_ref().is_some_and(|f| f.camera_id == 2)),
    )
    .await
    .expect("no frame from the new camera")
    .unwrap();

    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.camera_id, Some(2));
    assert_eq!(snapshot.pending_camera, None);

    service.shutdown().await;
}

#[tokio::test]
async fn test_camera_discovery() {
    let addr = spawn_backend().await;
    let api = ApiClient::new(format!("http://{}", addr), WAIT).unwrap();

    let cameras = api.available_cameras().await.unwrap();
    assert_eq!(cameras.len(), 3);
    assert_eq!(cameras[1].name, "Broken");

    let health = api.health().await.unwrap();
    assert_eq!(health.status, "ok");
    assert_eq!(health.active_streams, 0);
}
