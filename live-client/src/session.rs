//! Live camera session state machine.
//!
//! ```text
//! Disconnected --start()--> Connecting
//! Connecting   --frame-->   Streaming
//! Connecting   --error/timeout--> Error (+ reconnect timer while retries remain)
//! Streaming    --frame-->   Streaming (retry count reset)
//! Streaming    --error-->   Error (+ reconnect timer while retries remain)
//! Error        --reconnect timer / start()--> Connecting
//! any          --stop()-->  Disconnected
//! ```
//!
//! The session owns no threads and never blocks. Outbound commands go through
//! the injected [`ControlChannel`], deferred work through the injected
//! [`Scheduler`], and every change is reported to the [`SessionObserver`].

use crate::errors::SessionError;
use crate::retry::RetryPolicy;
use crate::scheduler::{Scheduler, Timer, TimerId, TimerKind};
use crate::transport::{ControlChannel, TransportEvent};
use crate::types::{
    Frame, LastError, SessionObserver, SessionSnapshot, SessionStats, SessionStatus,
};
use bytes::Bytes;
use chrono::Utc;
use common::{
    decode_frame_payload, CameraStatus, CameraStatusHint, ClientCommand, DetectionRecord,
    ErrorCategory, ServerEvent, CAMERA_ERROR, CAMERA_FRAME, CAMERA_STATUS,
};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const CONNECTION_TIMED_OUT: &str = "connection timed out";

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub auto_reconnect: bool,
    pub retry: RetryPolicy,
    /// Window for the first frame or status hint after `start_camera`.
    pub connect_timeout: Duration,
    /// How long a camera switch waits for the stop acknowledgement.
    pub switch_grace: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            retry: RetryPolicy::default(),
            connect_timeout: Duration::from_secs(10),
            switch_grace: Duration::from_millis(500),
        }
    }
}

/// Where a failure was noticed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureSource {
    /// Reported by the backend; its stream is already over.
    Backend,
    /// Detected on our side while the backend may still be streaming.
    Local,
    /// The socket itself failed; nothing can be sent.
    Socket,
}

pub struct LiveStreamSession<C, S, O> {
    channel: C,
    scheduler: S,
    observer: O,
    options: SessionOptions,

    status: SessionStatus,
    camera_id: Option<u32>,
    retry_count: u32,
    last_frame: Option<Frame>,
    last_error: Option<LastError>,
    epoch: u64,
    frame_seq: u64,
    pending_camera: Option<u32>,
    /// `stop_camera` requests the backend has not acknowledged yet.
    unacked_stops: u32,

    connect_timer: Option<TimerId>,
    retry_timer: Option<TimerId>,
    switch_timer: Option<TimerId>,

    stats: SessionStats,
}

impl<C, S, O> LiveStreamSession<C, S, O>
where
    C: ControlChannel,
    S: Scheduler,
    O: SessionObserver,
{
    pub fn new(channel: C, scheduler: S, observer: O, options: SessionOptions) -> Self {
        Self {
            channel,
            scheduler,
            observer,
            options,
            status: SessionStatus::Disconnected,
            camera_id: None,
            retry_count: 0,
            last_frame: None,
            last_error: None,
            epoch: 0,
            frame_seq: 0,
            pending_camera: None,
            unacked_stops: 0,
            connect_timer: None,
            retry_timer: None,
            switch_timer: None,
            stats: SessionStats::default(),
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn camera_id(&self) -> Option<u32> {
        self.camera_id
    }

    pub fn auto_reconnect(&self) -> bool {
        self.options.auto_reconnect
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn last_frame(&self) -> Option<&Frame> {
        self.last_frame.as_ref()
    }

    pub fn last_error(&self) -> Option<&LastError> {
        self.last_error.as_ref()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn pending_camera(&self) -> Option<u32> {
        self.pending_camera
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut S {
        &mut self.scheduler
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            status: self.status,
            camera_id: self.camera_id,
            auto_reconnect: self.options.auto_reconnect,
            retry_count: self.retry_count,
            max_retries: self.options.retry.max_retries,
            retry_pending: self.retry_timer.is_some(),
            last_error: self.last_error.clone(),
            last_frame_seq: self.last_frame.as_ref().map(|frame| frame.seq),
            pending_camera: self.pending_camera,
            epoch: self.epoch,
            stats: self.stats.clone(),
        }
    }

    // ------------------------------------------------------------------
    // Public operations
    // ------------------------------------------------------------------

    /// Requests a stream from `camera_id`. Returns immediately; the outcome
    /// arrives through the observer.
    pub fn start(&mut self, camera_id: u32) -> Result<(), SessionError> {
        if let Some(pending) = self.pending_camera {
            debug!("Start of camera {} rejected: switch to {} pending", camera_id, pending);
            return Err(SessionError::SwitchPending { camera_id: pending });
        }
        if self.status.is_active() {
            debug!("Start of camera {} rejected: session is {}", camera_id, self.status);
            return Err(SessionError::Busy {
                camera_id: self.camera_id.unwrap_or(camera_id),
                status: self.status,
            });
        }

        // 从 Error 手动重启：放弃尚未触发的自动重连
        self.cancel_all_timers();
        self.retry_count = 0;
        self.camera_id = Some(camera_id);
        info!("Starting camera {}", camera_id);
        self.begin_attempt(camera_id);
        Ok(())
    }

    /// Stops the stream. Idempotent: a second call sends nothing.
    pub fn stop(&mut self) {
        if self.status == SessionStatus::Disconnected && self.pending_camera.is_none() {
            debug!("Stop ignored: session already disconnected");
            return;
        }
        info!("Stopping camera {:?}", self.camera_id);
        self.reset_to_idle();
    }

    /// Moves the session to another camera without ever having two
    /// `start_camera` requests outstanding.
    pub fn switch_camera(&mut self, camera_id: u32) -> Result<(), SessionError> {
        if let Some(pending) = self.pending_camera.as_mut() {
            if *pending != camera_id {
                info!("Camera switch retargeted {} -> {}", pending, camera_id);
                *pending = camera_id;
            }
            return Ok(());
        }

        if self.status == SessionStatus::Disconnected {
            return self.start(camera_id);
        }
        if self.status.is_active() && self.camera_id == Some(camera_id) {
            debug!("Camera {} already selected", camera_id);
            return Ok(());
        }

        info!("Switching camera {:?} -> {}", self.camera_id, camera_id);
        self.reset_to_idle();
        self.pending_camera = Some(camera_id);
        let timer = Timer {
            kind: TimerKind::SwitchGrace,
            epoch: self.epoch,
        };
        self.switch_timer = Some(self.scheduler.schedule(timer, self.options.switch_grace));
        Ok(())
    }

    pub fn set_auto_reconnect(&mut self, enabled: bool) -> Result<(), SessionError> {
        if self.status != SessionStatus::Disconnected {
            return Err(SessionError::PolicyLocked {
                status: self.status,
            });
        }
        self.options.auto_reconnect = enabled;
        Ok(())
    }

    /// Teardown for when the owning view goes away.
    pub fn shutdown(&mut self) {
        if self.status != SessionStatus::Disconnected || self.pending_camera.is_some() {
            self.reset_to_idle();
        }
        self.cancel_all_timers();
        debug!("Session shut down (epoch {})", self.epoch);
    }

    // ------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------

    pub fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => self.on_socket_connected(),
            TransportEvent::Disconnected(reason) => self.on_socket_disconnected(&reason),
            TransportEvent::Event(event) => self.handle_event(event),
            TransportEvent::Malformed { event, reason } => {
                self.on_malformed(event.as_deref(), reason)
            }
        }
    }

    pub fn on_socket_connected(&mut self) {
        debug!("Socket connected (session {})", self.status);
        // 新连接上不会再收到旧的确认
        self.unacked_stops = 0;
        self.observer.on_connection_change(true);
    }

    pub fn on_socket_disconnected(&mut self, reason: &str) {
        self.unacked_stops = 0;
        self.observer.on_connection_change(false);
        if self.status.is_active() {
            self.fail(
                ErrorCategory::Transport,
                format!("Socket disconnected: {}", reason),
                FailureSource::Socket,
            );
        } else {
            debug!("Socket disconnected while {}: {}", self.status, reason);
        }
    }

    pub fn handle_event(&mut self, event: ServerEvent) {
        match &event {
            ServerEvent::Greeting(greeting) => {
                debug!("Server greeting: {}", greeting.data);
                return;
            }
            ServerEvent::Unknown(name) => {
                debug!("Ignoring unknown event '{}'", name);
                return;
            }
            _ => {}
        }

        if self.status == SessionStatus::Disconnected {
            let is_stop_ack = matches!(
                &event,
                ServerEvent::Status(CameraStatus {
                    status: CameraStatusHint::Disconnected,
                    ..
                })
            );
            if is_stop_ack {
                self.unacked_stops = self.unacked_stops.saturating_sub(1);
            }
            if is_stop_ack && self.pending_camera.is_some() {
                debug!("Backend acknowledged stop, continuing camera switch");
                self.dispatch_pending_switch();
            } else if is_stop_ack {
                debug!("Backend acknowledged stop");
            } else {
                // 上一代会话的残留消息
                self.stats.events_ignored += 1;
                debug!("Ignoring '{}' while disconnected", event.event_name());
            }
            return;
        }

        match event {
            ServerEvent::Frame(frame) => self.on_frame_payload(&frame.image),
            ServerEvent::Status(status) => self.on_status_hint(status),
            ServerEvent::Error(error) => {
                let category = error.resolved_category();
                self.on_camera_error(error.error, category);
            }
            ServerEvent::Detection(record) => self.on_detection(record),
            ServerEvent::Greeting(_) | ServerEvent::Unknown(_) => {}
        }
    }

    pub fn on_timer(&mut self, timer: Timer) {
        if timer.epoch != self.epoch {
            debug!(
                "Dropping stale {:?} timer (epoch {}, current {})",
                timer.kind, timer.epoch, self.epoch
            );
            return;
        }

        match timer.kind {
            TimerKind::ConnectTimeout => {
                self.connect_timer = None;
                if self.status == SessionStatus::Connecting {
                    self.fail(
                        ErrorCategory::Transport,
                        CONNECTION_TIMED_OUT.to_string(),
                        FailureSource::Local,
                    );
                }
            }
            TimerKind::Reconnect => {
                self.retry_timer = None;
                if self.status != SessionStatus::Error {
                    return;
                }
                if let Some(camera_id) = self.camera_id {
                    info!(
                        "Reconnecting camera {} (attempt {}/{})",
                        camera_id, self.retry_count, self.options.retry.max_retries
                    );
                    self.begin_attempt(camera_id);
                }
            }
            TimerKind::SwitchGrace => {
                self.switch_timer = None;
                if self.pending_camera.is_some() {
                    debug!("Stop not acknowledged within grace period");
                    self.dispatch_pending_switch();
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn begin_attempt(&mut self, camera_id: u32) {
        self.epoch += 1;
        self.set_status(SessionStatus::Connecting);
        self.arm_connect_timeout();
        if let Err(e) = self.channel.send(ClientCommand::StartCamera { camera_id }) {
            self.fail(
                ErrorCategory::Transport,
                format!("Failed to send start_camera: {}", e),
                FailureSource::Socket,
            );
        }
    }

    fn on_frame_payload(&mut self, image: &str) {
        if !self.status.is_active() {
            self.stats.events_ignored += 1;
            debug!("Dropping late frame while {}", self.status);
            return;
        }

        match decode_frame_payload(image) {
            Ok(data) => self.accept_frame(data),
            Err(e) => {
                self.stats.frames_rejected += 1;
                self.fail(
                    ErrorCategory::Transport,
                    format!("Malformed frame: {}", e),
                    FailureSource::Local,
                );
            }
        }
    }

    fn accept_frame(&mut self, data: Bytes) {
        let Some(camera_id) = self.camera_id else {
            return;
        };

        self.cancel_connect_timer();
        if self.retry_count > 0 {
            info!("Camera {} recovered after {} retries", camera_id, self.retry_count);
        }
        self.retry_count = 0;
        if self.status == SessionStatus::Connecting {
            self.last_error = None;
            info!("✓ Camera {} streaming", camera_id);
        }
        self.set_status(SessionStatus::Streaming);

        self.frame_seq += 1;
        self.stats.frames_received += 1;
        let frame = Frame {
            seq: self.frame_seq,
            camera_id,
            data,
            received_at: Utc::now(),
        };
        self.observer.on_frame(&frame);
        self.last_frame = Some(frame);
    }

    fn on_status_hint(&mut self, hint: CameraStatus) {
        if hint.status == CameraStatusHint::Disconnected && self.unacked_stops > 0 {
            // 旧流的停止确认（例如切换宽限期过后才到达）
            self.unacked_stops -= 1;
            debug!("Late stop acknowledgement while {}", self.status);
            return;
        }

        match (self.status, hint.status) {
            (SessionStatus::Connecting | SessionStatus::Streaming, CameraStatusHint::Disconnected) => {
                self.fail(
                    ErrorCategory::Transport,
                    "Camera stream closed by backend".to_string(),
                    FailureSource::Backend,
                );
            }
            (SessionStatus::Connecting, other) => {
                // 后端仍在推进，重新计时
                debug!(
                    "Camera status '{}': {}",
                    other,
                    hint.message.as_deref().unwrap_or("")
                );
                self.arm_connect_timeout();
            }
            (SessionStatus::Streaming, other) => {
                debug!("Camera status '{}' while streaming", other);
            }
            (status, other) => {
                self.stats.events_ignored += 1;
                debug!("Ignoring camera status '{}' while {}", other, status);
            }
        }
    }

    fn on_malformed(&mut self, event: Option<&str>, reason: String) {
        self.stats.malformed_messages += 1;

        let camera_event = event.filter(|name| {
            [CAMERA_FRAME, CAMERA_STATUS, CAMERA_ERROR].contains(name)
        });
        match camera_event {
            Some(name) if self.status.is_active() => {
                if name == CAMERA_FRAME {
                    self.stats.frames_rejected += 1;
                }
                self.fail(
                    ErrorCategory::Transport,
                    format!("Malformed {}: {}", name, reason),
                    FailureSource::Local,
                );
            }
            _ => warn!(
                "Discarding malformed socket message ({}): {}",
                event.unwrap_or("no event"),
                reason
            ),
        }
    }

    fn on_camera_error(&mut self, message: String, category: ErrorCategory) {
        if self.status.is_active() {
            self.fail(category, message, FailureSource::Backend);
            return;
        }

        // Error 状态下的追加错误：照常上报，但不再追加重试
        warn!("Camera error while {}: {} ({})", self.status, message, category);
        self.record_error(category, message);
        if !category.is_retryable() {
            if let Some(id) = self.retry_timer.take() {
                info!("Device error reported, cancelling pending reconnect");
                self.scheduler.cancel(id);
            }
        }
    }

    fn on_detection(&mut self, record: DetectionRecord) {
        if !self.status.is_active() {
            self.stats.events_ignored += 1;
            return;
        }
        debug!(
            "Detection: {} ({:.0}%) from {}",
            record.class_name,
            record.confidence * 100.0,
            record.video_source
        );
        self.stats.detections += 1;
        self.stats.last_detection = Some(record.timestamp);
        self.observer.on_detection(&record);
    }

    fn fail(&mut self, category: ErrorCategory, message: String, source: FailureSource) {
        self.cancel_connect_timer();
        if let Some(id) = self.retry_timer.take() {
            self.scheduler.cancel(id);
        }

        if source == FailureSource::Local && self.status.is_active() {
            // 释放后端摄像头句柄，重试时才不会出现两个句柄
            self.send_stop();
        }

        warn!("Camera {:?} {} error: {}", self.camera_id, category, message);
        self.set_status(SessionStatus::Error);
        self.record_error(category, message);
        self.schedule_retry(category);
    }

    fn schedule_retry(&mut self, category: ErrorCategory) {
        if !category.is_retryable() {
            info!("Not retrying {} error; waiting for manual start", category);
            return;
        }
        if !self.options.auto_reconnect {
            debug!("Auto-reconnect disabled");
            return;
        }
        if !self.options.retry.allows(self.retry_count) {
            warn!(
                "Giving up on camera {:?} after {} retries",
                self.camera_id, self.retry_count
            );
            return;
        }

        let delay = self.options.retry.delay_for(self.retry_count);
        self.retry_count += 1;
        self.stats.retries_scheduled += 1;
        info!(
            "Reconnect {}/{} scheduled in {:?}",
            self.retry_count, self.options.retry.max_retries, delay
        );
        let timer = Timer {
            kind: TimerKind::Reconnect,
            epoch: self.epoch,
        };
        self.retry_timer = Some(self.scheduler.schedule(timer, delay));
    }

    fn record_error(&mut self, category: ErrorCategory, message: String) {
        self.stats.errors_reported += 1;
        self.observer.on_error(&message, category);
        self.last_error = Some(LastError { message, category });
    }

    fn dispatch_pending_switch(&mut self) {
        if let Some(id) = self.switch_timer.take() {
            self.scheduler.cancel(id);
        }
        if let Some(camera_id) = self.pending_camera.take() {
            if let Err(e) = self.start(camera_id) {
                warn!("Camera switch to {} failed: {}", camera_id, e);
            }
        }
    }

    /// Common tail of `stop`, `switch_camera` and `shutdown`.
    fn reset_to_idle(&mut self) {
        self.cancel_all_timers();
        self.pending_camera = None;
        self.epoch += 1;
        if self.status != SessionStatus::Disconnected {
            self.send_stop();
        }
        self.last_frame = None;
        self.retry_count = 0;
        self.camera_id = None;
        self.set_status(SessionStatus::Disconnected);
    }

    fn arm_connect_timeout(&mut self) {
        self.cancel_connect_timer();
        let timer = Timer {
            kind: TimerKind::ConnectTimeout,
            epoch: self.epoch,
        };
        self.connect_timer = Some(self.scheduler.schedule(timer, self.options.connect_timeout));
    }

    fn cancel_connect_timer(&mut self) {
        if let Some(id) = self.connect_timer.take() {
            self.scheduler.cancel(id);
        }
    }

    fn cancel_all_timers(&mut self) {
        for id in [
            self.connect_timer.take(),
            self.retry_timer.take(),
            self.switch_timer.take(),
        ]
        .into_iter()
        .flatten()
        {
            self.scheduler.cancel(id);
        }
    }

    fn send_stop(&mut self) {
        match self.channel.send(ClientCommand::StopCamera) {
            Ok(()) => self.unacked_stops += 1,
            Err(e) => warn!("Failed to send stop_camera: {}", e),
        }
    }

    fn set_status(&mut self, status: SessionStatus) {
        if self.status == status {
            return;
        }
        debug!("Session status {} -> {}", self.status, status);
        self.status = status;
        self.observer.on_status_change(status);
    }
}
