use crate::error::BackendError;
use crate::state::AppState;
use crate::stream::run_stream;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use common::{CameraStatusHint, ClientCommand, ErrorCategory, ServerEvent, ServerResponse};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub async fn socket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection_id = Uuid::new_v4();
    info!("🔌 Client connected: {}", connection_id);

    let (mut sink, mut stream) = socket.split();
    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<ServerEvent>();

    // 单一写任务，所有流共享
    let writer = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            let text = match event.to_json() {
                Ok(text) => text,
                Err(e) => {
                    warn!("Failed to encode {}: {}", event.event_name(), e);
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let _ = events_tx.send(ServerEvent::Greeting(ServerResponse {
        data: "Connected".to_string(),
    }));

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => handle_command(&state, connection_id, &text, &events_tx),
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("Socket {} read error: {}", connection_id, e);
                break;
            }
        }
    }

    if let Some(camera_id) = state.registry().stop(connection_id) {
        info!("Released camera {} for {}", camera_id, connection_id);
    }
    drop(events_tx);
    writer.abort();
    info!("Client disconnected: {}", connection_id);
}

fn handle_command(
    state: &AppState,
    connection_id: Uuid,
    text: &str,
    events: &mpsc::UnboundedSender<ServerEvent>,
) {
    match ClientCommand::from_json(text) {
        Ok(ClientCommand::StartCamera { camera_id }) => {
            start_camera(state, connection_id, camera_id, events);
        }
        Ok(ClientCommand::StopCamera) => {
            if let Some(camera_id) = state.registry().stop(connection_id) {
                info!("Stopped camera {} for {}", camera_id, connection_id);
            }
            let _ = events.send(ServerEvent::status(
                CameraStatusHint::Disconnected,
                "Camera stopped",
            ));
        }
        Err(e) => warn!("Ignoring message from {}: {}", connection_id, e),
    }
}

fn start_camera(
    state: &AppState,
    connection_id: Uuid,
    camera_id: u32,
    events: &mpsc::UnboundedSender<ServerEvent>,
) {
    info!("Starting camera {} for {}", camera_id, connection_id);
    let _ = events.send(ServerEvent::status(
        CameraStatusHint::Connecting,
        format!("Connecting to camera {}", camera_id),
    ));

    let Some(camera) = state.camera(camera_id) else {
        // 未知摄像头：没有句柄需要释放，但旧流仍要停止
        state.registry().stop(connection_id);
        let error = BackendError::CameraUnavailable(camera_id);
        warn!("❌ {}", error);
        let _ = events.send(ServerEvent::error(error.to_string(), ErrorCategory::Device));
        return;
    };

    let (stream_id, cancel) = state.registry().begin(connection_id, camera_id);
    let registry = state.registry().clone();
    let settings = state.settings().clone();
    let events = events.clone();

    tokio::spawn(async move {
        run_stream(camera, settings, events, cancel).await;
        registry.finish(connection_id, stream_id);
    });
}
