use super::{ControlChannel, TransportEvent};
use crate::errors::TransportError;
use common::{ClientCommand, ServerEvent};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Socket-level reconnection, independent of the session's camera retries.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Reconnection attempts after a failed or lost connection.
    pub reconnection_attempts: u32,
    pub reconnection_delay: Duration,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            reconnection_attempts: 5,
            reconnection_delay: Duration::from_secs(1),
        }
    }
}

/// Outbound handle given to the session.
#[derive(Clone)]
pub struct WsControlChannel {
    outbound: mpsc::UnboundedSender<ClientCommand>,
    connected: Arc<AtomicBool>,
}

impl WsControlChannel {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl ControlChannel for WsControlChannel {
    fn send(&mut self, command: ClientCommand) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.outbound
            .send(command)
            .map_err(|_| TransportError::Closed)
    }
}

/// WebSocket connection task. Dropping it stops the task.
pub struct WsTransport {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl WsTransport {
    pub fn spawn(
        url: impl Into<String>,
        options: TransportOptions,
    ) -> (Self, WsControlChannel, mpsc::UnboundedReceiver<TransportEvent>) {
        let url = url.into();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run_connection(
            url,
            options,
            outbound_rx,
            events_tx,
            connected.clone(),
            cancel.clone(),
        ));

        let channel = WsControlChannel {
            outbound: outbound_tx,
            connected,
        };
        (Self { cancel, task }, channel, events_rx)
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Closes the socket and waits for the task to exit.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Err(e) = (&mut self.task).await {
            error!("Socket task failed: {}", e);
        }
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

enum PumpExit {
    /// Transport cancelled or every outbound handle dropped.
    Stopped,
    /// Nobody listens to inbound events any more.
    ReceiverGone,
    Lost(String),
}

async fn run_connection(
    url: String,
    options: TransportOptions,
    mut outbound: mpsc::UnboundedReceiver<ClientCommand>,
    events: mpsc::UnboundedSender<TransportEvent>,
    connected: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    let mut failures = 0u32;

    loop {
        let attempt = tokio::select! {
            _ = cancel.cancelled() => break,
            result = connect_async(url.as_str()) => result,
        };

        match attempt {
            Ok((stream, _response)) => {
                failures = 0;
                // 断线前排队的命令已经过期
                while outbound.try_recv().is_ok() {}
                connected.store(true, Ordering::SeqCst);
                info!("✓ Socket connected: {}", url);
                if events.send(TransportEvent::Connected).is_err() {
                    break;
                }

                let exit = pump(stream, &mut outbound, &events, &cancel).await;
                connected.store(false, Ordering::SeqCst);
                match exit {
                    PumpExit::Stopped | PumpExit::ReceiverGone => break,
                    PumpExit::Lost(reason) => {
                        warn!("Socket disconnected: {}", reason);
                        if events.send(TransportEvent::Disconnected(reason)).is_err() {
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                failures += 1;
                warn!(
                    "Socket connection failed ({}/{}): {}",
                    failures,
                    options.reconnection_attempts + 1,
                    e
                );
                if failures > options.reconnection_attempts {
                    error!("❌ Giving up on socket after {} attempts", failures);
                    let _ = events.send(TransportEvent::Disconnected(format!(
                        "gave up after {} connection attempts: {}",
                        failures, e
                    )));
                    break;
                }
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(options.reconnection_delay) => {}
        }
    }

    connected.store(false, Ordering::SeqCst);
    debug!("Socket task exited");
}

async fn pump(
    stream: WsStream,
    outbound: &mut mpsc::UnboundedReceiver<ClientCommand>,
    events: &mpsc::UnboundedSender<TransportEvent>,
    cancel: &CancellationToken,
) -> PumpExit {
    let (mut write, mut read) = stream.split();

    loop {
        // 先发完已排队的命令（例如关闭前的 stop_camera）
        tokio::select! {
            biased;

            command = outbound.recv() => {
                let Some(command) = command else {
                    let _ = write.send(Message::Close(None)).await;
                    return PumpExit::Stopped;
                };
                match command.to_json() {
                    Ok(text) => {
                        debug!("→ {}", text);
                        if let Err(e) = write.send(Message::Text(text)).await {
                            return PumpExit::Lost(e.to_string());
                        }
                    }
                    Err(e) => error!("Failed to encode {}: {}", command.event_name(), e),
                }
            }
            _ = cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                return PumpExit::Stopped;
            }
            message = read.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        let event = match ServerEvent::from_json(&text) {
                            Ok(event) => TransportEvent::Event(event),
                            Err(e) => TransportEvent::Malformed {
                                event: e.event_name().map(str::to_string),
                                reason: e.to_string(),
                            },
                        };
                        if events.send(event).is_err() {
                            return PumpExit::ReceiverGone;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| f.reason.to_string())
                            .filter(|reason| !reason.is_empty())
                            .unwrap_or_else(|| "closed by server".to_string());
                        return PumpExit::Lost(reason);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return PumpExit::Lost(e.to_string()),
                    None => return PumpExit::Lost("stream ended".to_string()),
                }
            }
        }
    }
}
