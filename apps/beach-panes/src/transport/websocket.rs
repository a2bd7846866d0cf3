use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, trace, warn};

use super::{
    Connection, ConnectionId, Connector, OpenRequest, ReadyState, TransportEvent, TransportEvents,
    close_code,
};
use crate::error::TransportError;

/// How long a closing socket may take to finish its handshake before the
/// task is dropped.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Clone, Copy, Debug, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for WebSocketConnector {
    fn open(&self, request: OpenRequest, events: TransportEvents) -> Box<dyn Connection> {
        let id = events.connection();
        let state = Arc::new(AtomicU8::new(ReadyState::Connecting as u8));
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        debug!(
            target: "beach_panes::transport::websocket",
            connection = id.0,
            url = %request.url,
            "opening websocket"
        );
        let task = tokio::spawn(run_socket(
            request.url,
            outbound_rx,
            events.clone(),
            state.clone(),
        ));
        Box::new(WebSocketConnection {
            id,
            state,
            outbound: outbound_tx,
            events,
            task: Some(task),
        })
    }
}

struct WebSocketConnection {
    id: ConnectionId,
    state: Arc<AtomicU8>,
    outbound: mpsc::UnboundedSender<Message>,
    events: TransportEvents,
    task: Option<JoinHandle<()>>,
}

impl WebSocketConnection {
    fn state(&self) -> ReadyState {
        ReadyState::from_u8(self.state.load(Ordering::Acquire))
    }
}

impl Connection for WebSocketConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn ready_state(&self) -> ReadyState {
        self.state()
    }

    fn send_text(&self, text: &str) -> Result<(), TransportError> {
        if !self.events.is_attached() {
            return Err(TransportError::Detached(self.id.0));
        }
        if self.state() != ReadyState::Open {
            return Err(TransportError::NotOpen(self.id.0));
        }
        self.outbound
            .send(Message::Text(text.to_string()))
            .map_err(|_| TransportError::QueueClosed)
    }

    fn close(&mut self, code: u16, reason: &str) {
        match self.state() {
            ReadyState::Closing | ReadyState::Closed => return,
            ReadyState::Connecting => {
                // Nothing to hand-shake with yet.
                self.state
                    .store(ReadyState::Closing as u8, Ordering::Release);
                if let Some(task) = self.task.take() {
                    task.abort();
                }
                self.state.store(ReadyState::Closed as u8, Ordering::Release);
                return;
            }
            ReadyState::Open => {}
        }
        self.state
            .store(ReadyState::Closing as u8, Ordering::Release);
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_string().into(),
        };
        if self.outbound.send(Message::Close(Some(frame))).is_err() {
            trace!(
                target: "beach_panes::transport::websocket",
                connection = self.id.0,
                "writer already gone while closing"
            );
        }
        if let Some(task) = self.task.take() {
            tokio::spawn(async move {
                tokio::time::sleep(CLOSE_GRACE).await;
                task.abort();
            });
        }
    }

    fn detach(&mut self) {
        self.events.detach();
    }
}

impl Drop for WebSocketConnection {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run_socket(
    url: String,
    outbound: mpsc::UnboundedReceiver<Message>,
    events: TransportEvents,
    state: Arc<AtomicU8>,
) {
    let id = events.connection();
    let socket = match connect_async(url.as_str()).await {
        Ok((socket, _response)) => socket,
        Err(err) => {
            state.store(ReadyState::Closed as u8, Ordering::Release);
            warn!(
                target: "beach_panes::transport::websocket",
                connection = id.0,
                error = %err,
                "websocket handshake failed"
            );
            events.emit(TransportEvent::Error(err.to_string()));
            events.emit(TransportEvent::Closed {
                code: close_code::ABNORMAL,
                reason: String::new(),
            });
            return;
        }
    };

    if !events.is_attached() {
        trace!(
            target: "beach_panes::transport::websocket",
            connection = id.0,
            "dropping socket that finished connecting after being abandoned"
        );
        state.store(ReadyState::Closed as u8, Ordering::Release);
        return;
    }

    // `close()` may have raced the handshake; only promote from Connecting.
    let _ = state.compare_exchange(
        ReadyState::Connecting as u8,
        ReadyState::Open as u8,
        Ordering::AcqRel,
        Ordering::Acquire,
    );
    events.emit(TransportEvent::Open);

    let (code, reason) = pump(socket, outbound, &events).await;
    state.store(ReadyState::Closed as u8, Ordering::Release);
    debug!(
        target: "beach_panes::transport::websocket",
        connection = id.0,
        code,
        reason = %reason,
        "websocket closed"
    );
    events.emit(TransportEvent::Closed { code, reason });
}

/// Runs the socket until either side closes it. Returns the close code and
/// reason to report.
async fn pump(
    socket: Socket,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    events: &TransportEvents,
) -> (u16, String) {
    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let closing = matches!(message, Message::Close(_));
            if sink.send(message).await.is_err() || closing {
                break;
            }
        }
    });

    let mut close = None;
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => {
                events.emit(TransportEvent::Message(text));
            }
            Ok(Message::Binary(bytes)) => {
                events.emit(TransportEvent::Message(
                    String::from_utf8_lossy(&bytes).into_owned(),
                ));
            }
            Ok(Message::Close(frame)) => {
                close = Some(match frame {
                    Some(frame) => (u16::from(frame.code), frame.reason.into_owned()),
                    None => (close_code::NO_STATUS, String::new()),
                });
                break;
            }
            Ok(_) => {}
            Err(err) => {
                events.emit(TransportEvent::Error(err.to_string()));
                break;
            }
        }
    }
    writer.abort();
    close.unwrap_or((close_code::ABNORMAL, String::new()))
}
