//! In-process connector for tests and demos. Sockets never touch the network;
//! the test drives them through [`MockSocket`] handles.

use parking_lot::Mutex;
use std::sync::Arc;

use super::{
    Connection, ConnectionId, Connector, OpenRequest, ReadyState, TransportEvent, TransportEvents,
};
use crate::error::TransportError;

#[derive(Debug)]
struct SocketState {
    ready: ReadyState,
    sent: Vec<String>,
    closed_with: Option<(u16, String)>,
}

/// Test-side handle to one socket opened through a [`MockConnector`].
#[derive(Clone)]
pub struct MockSocket {
    id: ConnectionId,
    url: String,
    events: TransportEvents,
    state: Arc<Mutex<SocketState>>,
}

impl MockSocket {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Completes the handshake.
    pub fn open(&self) -> bool {
        self.state.lock().ready = ReadyState::Open;
        self.events.emit(TransportEvent::Open)
    }

    pub fn message(&self, text: impl Into<String>) -> bool {
        self.events.emit(TransportEvent::Message(text.into()))
    }

    pub fn error(&self, message: impl Into<String>) -> bool {
        self.events.emit(TransportEvent::Error(message.into()))
    }

    /// Closes from the server side.
    pub fn close(&self, code: u16, reason: impl Into<String>) -> bool {
        self.state.lock().ready = ReadyState::Closed;
        self.events.emit(TransportEvent::Closed {
            code,
            reason: reason.into(),
        })
    }

    pub fn set_ready_state(&self, ready: ReadyState) {
        self.state.lock().ready = ready;
    }

    pub fn ready_state(&self) -> ReadyState {
        self.state.lock().ready
    }

    /// Text frames the client sent, in order.
    pub fn sent(&self) -> Vec<String> {
        self.state.lock().sent.clone()
    }

    /// Code and reason of a client-initiated close.
    pub fn closed_with(&self) -> Option<(u16, String)> {
        self.state.lock().closed_with.clone()
    }

    pub fn is_detached(&self) -> bool {
        !self.events.is_attached()
    }
}

/// Records every socket it opens. Cloning shares the record.
#[derive(Clone, Default)]
pub struct MockConnector {
    sockets: Arc<Mutex<Vec<MockSocket>>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sockets constructed so far.
    pub fn opened(&self) -> usize {
        self.sockets.lock().len()
    }

    pub fn socket(&self, index: usize) -> Option<MockSocket> {
        self.sockets.lock().get(index).cloned()
    }

    pub fn last(&self) -> Option<MockSocket> {
        self.sockets.lock().last().cloned()
    }

    pub fn sockets(&self) -> Vec<MockSocket> {
        self.sockets.lock().clone()
    }
}

impl Connector for MockConnector {
    fn open(&self, request: OpenRequest, events: TransportEvents) -> Box<dyn Connection> {
        let state = Arc::new(Mutex::new(SocketState {
            ready: ReadyState::Connecting,
            sent: Vec::new(),
            closed_with: None,
        }));
        let socket = MockSocket {
            id: events.connection(),
            url: request.url,
            events: events.clone(),
            state: state.clone(),
        };
        self.sockets.lock().push(socket);
        Box::new(MockConnection {
            id: events.connection(),
            events,
            state,
        })
    }
}

struct MockConnection {
    id: ConnectionId,
    events: TransportEvents,
    state: Arc<Mutex<SocketState>>,
}

impl Connection for MockConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn ready_state(&self) -> ReadyState {
        self.state.lock().ready
    }

    fn send_text(&self, text: &str) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.ready != ReadyState::Open {
            return Err(TransportError::NotOpen(self.id.0));
        }
        state.sent.push(text.to_string());
        Ok(())
    }

    fn close(&mut self, code: u16, reason: &str) {
        let mut state = self.state.lock();
        if matches!(state.ready, ReadyState::Closing | ReadyState::Closed) {
            return;
        }
        state.ready = ReadyState::Closed;
        state.closed_with = Some((code, reason.to_string()));
    }

    fn detach(&mut self) {
        self.events.detach();
    }
}
