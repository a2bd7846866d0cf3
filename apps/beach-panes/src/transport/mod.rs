use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

use crate::controller::Intent;
use crate::error::TransportError;

pub mod mock;
pub mod websocket;

pub use mock::{MockConnector, MockSocket};
pub use websocket::WebSocketConnector;

/// Close codes with a meaning in the terminal protocol.
pub mod close_code {
    pub const NORMAL: u16 = 1000;
    pub const NO_STATUS: u16 = 1005;
    pub const ABNORMAL: u16 = 1006;
    pub const SESSION_ENDED: u16 = 4000;
    pub const AUTH_FAILED: u16 = 4001;
    pub const AUTH_TIMEOUT: u16 = 4008;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseKind {
    Recoverable,
    AuthFailed,
    AuthTimeout,
    SessionEnded,
}

impl CloseKind {
    pub fn classify(code: u16) -> Self {
        match code {
            close_code::AUTH_FAILED => CloseKind::AuthFailed,
            close_code::AUTH_TIMEOUT => CloseKind::AuthTimeout,
            close_code::SESSION_ENDED => CloseKind::SessionEnded,
            _ => CloseKind::Recoverable,
        }
    }

    pub fn is_recoverable(self) -> bool {
        self == CloseKind::Recoverable
    }

    pub fn describe(self) -> &'static str {
        match self {
            CloseKind::Recoverable => "connection lost",
            CloseKind::AuthFailed => "authentication failed",
            CloseKind::AuthTimeout => "authentication timed out",
            CloseKind::SessionEnded => "session ended by server",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

/// Mirrors the browser `WebSocket.readyState` values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ReadyState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ReadyState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => ReadyState::Connecting,
            1 => ReadyState::Open,
            2 => ReadyState::Closing,
            _ => ReadyState::Closed,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    Open,
    Message(String),
    /// Transport-level failure. Carries no close code; usually followed by
    /// `Closed` for the same connection.
    Error(String),
    Closed { code: u16, reason: String },
}

#[derive(Clone, Debug)]
pub struct OpenRequest {
    pub url: String,
}

/// Event listener handed to a connector for one connection.
///
/// Once [`detach`](Self::detach) is called every later `emit` is dropped, so an
/// abandoned socket can no longer drive the pane.
#[derive(Clone)]
pub struct TransportEvents {
    connection: ConnectionId,
    sink: mpsc::UnboundedSender<Intent>,
    attached: Arc<AtomicBool>,
}

impl TransportEvents {
    pub(crate) fn new(connection: ConnectionId, sink: mpsc::UnboundedSender<Intent>) -> Self {
        Self {
            connection,
            sink,
            attached: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    /// Returns false when the listener is detached or the pane is gone.
    pub fn emit(&self, event: TransportEvent) -> bool {
        if !self.is_attached() {
            return false;
        }
        self.sink
            .send(Intent::Transport {
                connection: self.connection,
                event,
            })
            .is_ok()
    }

    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    pub fn detach(&self) {
        self.attached.store(false, Ordering::Release);
    }
}

pub trait Connection: Send {
    fn id(&self) -> ConnectionId;

    fn ready_state(&self) -> ReadyState;

    fn send_text(&self, text: &str) -> Result<(), TransportError>;

    /// Starts a close handshake; no-op once closed.
    fn close(&mut self, code: u16, reason: &str);

    /// Stops all further event delivery for this connection.
    fn detach(&mut self);
}

/// Opens sockets. Opening never blocks: the handshake proceeds in the
/// background and reports through `events`.
pub trait Connector: Send + Sync {
    fn open(&self, request: OpenRequest, events: TransportEvents) -> Box<dyn Connection>;
}
