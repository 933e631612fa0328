//! Runs one [`LiveStreamSession`] on its own tokio task.
//!
//! The task owns the session outright and multiplexes UI commands, transport
//! events and timer expiries with `select!`, so the session itself needs no
//! locking. Callers talk to it through a cloneable [`SessionHandle`].

use crate::errors::SessionError;
use crate::scheduler::{DelayQueueScheduler, Scheduler};
use crate::session::{LiveStreamSession, SessionOptions};
use crate::transport::{ControlChannel, TransportEvent, TransportOptions, WsTransport};
use crate::types::{Frame, SessionEvent, SessionObserver, SessionSnapshot, SessionStatus};
use common::{DetectionRecord, ErrorCategory};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

const COMMAND_BUFFER: usize = 32;
const EVENT_BUFFER: usize = 256;

type Reply<T> = oneshot::Sender<T>;

enum Command {
    Start {
        camera_id: u32,
        reply: Reply<Result<(), SessionError>>,
    },
    Stop {
        reply: Reply<()>,
    },
    SwitchCamera {
        camera_id: u32,
        reply: Reply<Result<(), SessionError>>,
    },
    SetAutoReconnect {
        enabled: bool,
        reply: Reply<Result<(), SessionError>>,
    },
    Snapshot {
        reply: Reply<SessionSnapshot>,
    },
    Shutdown {
        reply: Reply<()>,
    },
}

/// Publishes session notifications on tokio channels.
struct ChannelObserver {
    connected: watch::Sender<bool>,
    status: watch::Sender<SessionStatus>,
    frames: watch::Sender<Option<Frame>>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionObserver for ChannelObserver {
    fn on_status_change(&mut self, status: SessionStatus) {
        self.status.send_replace(status);
        if status == SessionStatus::Disconnected {
            self.frames.send_replace(None);
        }
        // 没有订阅者时发送失败，忽略
        let _ = self.events.send(SessionEvent::StatusChanged(status));
    }

    fn on_frame(&mut self, frame: &Frame) {
        self.frames.send_replace(Some(frame.clone()));
        let _ = self.events.send(SessionEvent::Frame(frame.clone()));
    }

    fn on_error(&mut self, message: &str, category: ErrorCategory) {
        let _ = self.events.send(SessionEvent::Error {
            message: message.to_string(),
            category,
        });
    }

    fn on_detection(&mut self, detection: &DetectionRecord) {
        let _ = self.events.send(SessionEvent::Detection(detection.clone()));
    }

    fn on_connection_change(&mut self, connected: bool) {
        self.connected.send_replace(connected);
    }
}

type ServiceSession<C> = LiveStreamSession<C, DelayQueueScheduler, ChannelObserver>;

/// Handle to a running session service.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    connected: watch::Receiver<bool>,
    status: watch::Receiver<SessionStatus>,
    frames: watch::Receiver<Option<Frame>>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionHandle {
    pub async fn start(&self, camera_id: u32) -> Result<(), SessionError> {
        self.request(|reply| Command::Start { camera_id, reply })
            .await?
    }

    pub async fn stop(&self) -> Result<(), SessionError> {
        self.request(|reply| Command::Stop { reply }).await
    }

    pub async fn switch_camera(&self, camera_id: u32) -> Result<(), SessionError> {
        self.request(|reply| Command::SwitchCamera { camera_id, reply })
            .await?
    }

    pub async fn set_auto_reconnect(&self, enabled: bool) -> Result<(), SessionError> {
        self.request(|reply| Command::SetAutoReconnect { enabled, reply })
            .await?
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Tears the session down. Shutting down a stopped service is a no-op.
    pub async fn shutdown(&self) {
        if let Err(e) = self.request(|reply| Command::Shutdown { reply }).await {
            debug!("Shutdown skipped: {}", e);
        }
    }

    /// Waits until the socket is up. Returns `false` if the service stops first.
    pub async fn wait_connected(&self) -> bool {
        let mut connected = self.connected.clone();
        // watch::Ref 必须在 `connected` 之前释放
        let up = connected.wait_for(|up| *up).await.is_ok();
        up
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    pub fn current_status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    pub fn status(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    /// Latest frame only; slow readers skip intermediate frames.
    pub fn frames(&self) -> watch::Receiver<Option<Frame>> {
        self.frames.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T, SessionError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| SessionError::ServiceClosed)?;
        response.await.map_err(|_| SessionError::ServiceClosed)
    }
}

pub struct SessionService {
    handle: SessionHandle,
    task: JoinHandle<()>,
    transport: Option<WsTransport>,
}

impl SessionService {
    /// Runs a session over an existing channel and inbound event stream.
    pub fn spawn<C>(
        channel: C,
        inbound: mpsc::UnboundedReceiver<TransportEvent>,
        options: SessionOptions,
    ) -> Self
    where
        C: ControlChannel + Send + 'static,
    {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (connected_tx, connected_rx) = watch::channel(false);
        let (status_tx, status_rx) = watch::channel(SessionStatus::Disconnected);
        let (frames_tx, frames_rx) = watch::channel(None);
        let (events_tx, _) = broadcast::channel(EVENT_BUFFER);

        let observer = ChannelObserver {
            connected: connected_tx,
            status: status_tx,
            frames: frames_tx,
            events: events_tx.clone(),
        };
        let session = LiveStreamSession::new(channel, DelayQueueScheduler::new(), observer, options);
        let task = tokio::spawn(run_session(session, command_rx, inbound));

        let handle = SessionHandle {
            commands: command_tx,
            connected: connected_rx,
            status: status_rx,
            frames: frames_rx,
            events: events_tx,
        };

        Self {
            handle,
            task,
            transport: None,
        }
    }

    /// Opens a WebSocket to `socket_url` and runs a session over it.
    pub fn connect(
        socket_url: &str,
        transport_options: TransportOptions,
        options: SessionOptions,
    ) -> Self {
        info!("🔌 Connecting to {}", socket_url);
        let (transport, channel, inbound) = WsTransport::spawn(socket_url, transport_options);
        let mut service = Self::spawn(channel, inbound, options);
        service.transport = Some(transport);
        service
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Stops the session, then closes the socket.
    pub async fn shutdown(self) {
        self.handle.shutdown().await;
        if let Err(e) = self.task.await {
            error!("Session task failed: {}", e);
        }
        if let Some(transport) = self.transport {
            transport.shutdown().await;
        }
        info!("Session service stopped");
    }
}

async fn run_session<C: ControlChannel>(
    mut session: ServiceSession<C>,
    mut commands: mpsc::Receiver<Command>,
    mut inbound: mpsc::UnboundedReceiver<TransportEvent>,
) {
    let mut inbound_open = true;

    loop {
        let timers_pending = session.scheduler().pending() > 0;

        tokio::select! {
            command = commands.recv() => {
                match command {
                    Some(Command::Shutdown { reply }) => {
                        session.shutdown();
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => handle_command(&mut session, command),
                    // 所有句柄都已释放
                    None => break,
                }
            }
            event = inbound.recv(), if inbound_open => {
                match event {
                    Some(event) => session.handle_transport_event(event),
                    None => {
                        inbound_open = false;
                        session.on_socket_disconnected("transport closed");
                    }
                }
            }
            Some(timer) = session.scheduler_mut().next_expired(), if timers_pending => {
                session.on_timer(timer);
            }
        }
    }

    session.shutdown();
    debug!("Session task exited");
}

fn handle_command<C: ControlChannel>(session: &mut ServiceSession<C>, command: Command) {
    match command {
        Command::Start { camera_id, reply } => {
            let _ = reply.send(session.start(camera_id));
        }
        Command::Stop { reply } => {
            session.stop();
            let _ = reply.send(());
        }
        Command::SwitchCamera { camera_id, reply } => {
            let _ = reply.send(session.switch_camera(camera_id));
        }
        Command::SetAutoReconnect { enabled, reply } => {
            let _ = reply.send(session.set_auto_reconnect(enabled));
        }
        Command::Snapshot { reply } => {
            let _ = reply.send(session.snapshot());
        }
        Command::Shutdown { reply } => {
            session.shutdown();
            let _ = reply.send(());
        }
    }
}
