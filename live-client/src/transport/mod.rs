//! Socket transport for the live session.
//!
//! The session only sees a [`ControlChannel`] for outbound commands; inbound
//! traffic reaches it as [`TransportEvent`]s delivered by the service loop.

pub mod websocket;

use crate::errors::TransportError;
use common::ClientCommand;

pub use websocket::{TransportOptions, WsControlChannel, WsTransport};

/// Outbound half of the socket, injected into the session.
pub trait ControlChannel {
    fn send(&mut self, command: ClientCommand) -> Result<(), TransportError>;
}

/// Inbound notifications produced by a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Socket (re)established.
    Connected,
    /// A decoded push event from the backend.
    Event(common::ServerEvent),
    /// A text message that could not be decoded. `event` is set when the
    /// envelope parsed but its payload did not.
    Malformed {
        event: Option<String>,
        reason: String,
    },
    /// Socket lost. The transport may reconnect on its own afterwards.
    Disconnected(String),
}
