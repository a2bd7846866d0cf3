//! One pane's connection lifecycle.
//!
//! A [`SessionController`] is a handle to a task that owns the pane's socket
//! and state. Everything that can change the state (transport events, key
//! presses, reconnect timers, promotion) is an [`Intent`] on one channel, so
//! transitions are applied strictly one at a time.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::backoff::BackoffCoordinator;
use crate::config::{ReadinessPolicy, TerminalConfig};
use crate::error::ConfigError;
use crate::frame::{AuthPayload, ControlEnvelope, Frame, FrameClassifier, ResizeRequest, ServerStatus};
use crate::prompt::PromptDetector;
use crate::status::{ConnectionStatus, Overlay};
use crate::store::{SessionStore, StorageKeys};
use crate::surface::RenderSurface;
use crate::transport::{
    CloseKind, Connection, ConnectionId, Connector, OpenRequest, ReadyState, TransportEvent,
    TransportEvents, close_code,
};

const ENTER: u8 = b'\r';

/// Server `disconnected` reasons that must not trigger an automatic retry.
const TERMINAL_DISCONNECT_REASONS: &[&str] = &["auth_failed", "auth_timeout", "session_ended"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PaneId(pub u64);

/// Layout position of a pane. Decides which storage key holds its session id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PaneSlot {
    Primary,
    Secondary,
}

impl PaneSlot {
    pub fn as_str(self) -> &'static str {
        match self {
            PaneSlot::Primary => "primary",
            PaneSlot::Secondary => "secondary",
        }
    }
}

/// Receives lifecycle notifications from a pane. Called from the pane's task;
/// implementations must not block.
pub trait PaneSink: Send + Sync {
    fn status_changed(&self, pane: PaneId, status: ConnectionStatus);

    fn session_id(&self, pane: PaneId, session_id: &str) {
        let _ = (pane, session_id);
    }

    fn session_ended(&self, pane: PaneId) {
        let _ = pane;
    }
}

/// Collaborators shared by every pane of one terminal.
#[derive(Clone)]
pub struct SessionDeps {
    pub config: Arc<TerminalConfig>,
    pub connector: Arc<dyn Connector>,
    pub backoff: BackoffCoordinator,
    pub store: Arc<dyn SessionStore>,
}

impl SessionDeps {
    pub fn new(
        config: TerminalConfig,
        connector: Arc<dyn Connector>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        let backoff = BackoffCoordinator::new(config.backoff);
        Self {
            config: Arc::new(config),
            connector,
            backoff,
            store,
        }
    }
}

pub(crate) enum Intent {
    Transport {
        connection: ConnectionId,
        event: TransportEvent,
    },
    Input(Vec<u8>),
    Resize {
        cols: u16,
        rows: u16,
    },
    ReconnectDue {
        ticket: u64,
    },
    Countdown(Duration),
    ManualReconnect,
    Rebind(PaneSlot),
    Settle(oneshot::Sender<()>),
    Shutdown(Option<oneshot::Sender<()>>),
}

/// Last published view of a pane.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaneState {
    pub status: ConnectionStatus,
    pub slot: PaneSlot,
    pub session_id: Option<String>,
    pub overlay: Option<Overlay>,
    pub next_attempt_in: Option<Duration>,
}

pub struct SessionController {
    pane: PaneId,
    intents: mpsc::UnboundedSender<Intent>,
    state: Arc<Mutex<PaneState>>,
    task: Option<JoinHandle<()>>,
}

impl SessionController {
    /// Creates the pane and starts connecting before returning, so the first
    /// status `sink` sees is `connecting`. Requires a Tokio runtime.
    pub fn spawn(
        pane: PaneId,
        slot: PaneSlot,
        deps: &SessionDeps,
        surface: Arc<dyn RenderSurface>,
        sink: Arc<dyn PaneSink>,
    ) -> Result<Self, ConfigError> {
        let url = deps.config.websocket_url()?;
        let keys = StorageKeys::new(deps.config.storage_namespace.clone());
        let session_id = if deps.config.resume_on_reload {
            deps.store.get(&keys.session_id(slot))
        } else {
            None
        };

        let (intents, receiver) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(PaneState {
            status: ConnectionStatus::Initial,
            slot,
            session_id: session_id.clone(),
            overlay: None,
            next_attempt_in: None,
        }));

        let countdown = intents.clone();
        deps.backoff.set_countdown_callback(pane, move |remaining| {
            let _ = countdown.send(Intent::Countdown(remaining));
        });

        let mut actor = PaneActor {
            pane,
            slot,
            url,
            keys,
            config: deps.config.clone(),
            connector: deps.connector.clone(),
            backoff: deps.backoff.clone(),
            store: deps.store.clone(),
            surface,
            sink,
            intents: intents.clone(),
            published: state.clone(),
            status: ConnectionStatus::Initial,
            connection: None,
            next_connection: 0,
            classifier: FrameClassifier::new(),
            detector: PromptDetector::new(deps.config.pty_buffer_limit),
            session_id,
            overlay: None,
            reconnect_ticket: 0,
        };
        info!(
            target: "beach_panes::controller",
            pane = pane.0,
            slot = slot.as_str(),
            url = %actor.url,
            resuming = actor.session_id.is_some(),
            "pane mounted"
        );
        actor.start();
        let task = tokio::spawn(actor.run(receiver));

        Ok(Self {
            pane,
            intents,
            state,
            task: Some(task),
        })
    }

    pub fn pane(&self) -> PaneId {
        self.pane
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state.lock().status
    }

    pub fn slot(&self) -> PaneSlot {
        self.state.lock().slot
    }

    pub fn session_id(&self) -> Option<String> {
        self.state.lock().session_id.clone()
    }

    pub fn overlay(&self) -> Option<Overlay> {
        self.state.lock().overlay.clone()
    }

    pub fn state(&self) -> PaneState {
        self.state.lock().clone()
    }

    /// Keystrokes from the renderer. Enter doubles as the overlay's
    /// retry/cancel key.
    pub fn send_input(&self, data: impl AsRef<[u8]>) {
        self.send(Intent::Input(data.as_ref().to_vec()));
    }

    pub fn resize(&self, cols: u16, rows: u16) {
        self.send(Intent::Resize { cols, rows });
    }

    /// Drops the current socket (if any) and connects a new one.
    pub fn reconnect(&self) {
        self.send(Intent::ManualReconnect);
    }

    pub(crate) fn rebind(&self, slot: PaneSlot) {
        self.send(Intent::Rebind(slot));
    }

    /// Resolves once every intent queued before this call has been applied.
    pub async fn settle(&self) {
        let (tx, rx) = oneshot::channel();
        self.send(Intent::Settle(tx));
        let _ = rx.await;
    }

    /// Cancels pending reconnects, closes the socket and stops the task.
    pub async fn shutdown(mut self) {
        let (tx, rx) = oneshot::channel();
        self.send(Intent::Shutdown(Some(tx)));
        let _ = rx.await;
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    fn send(&self, intent: Intent) {
        if self.intents.send(intent).is_err() {
            trace!(target: "beach_panes::controller", pane = self.pane.0, "pane task already stopped");
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if self.task.is_some() {
            let _ = self.intents.send(Intent::Shutdown(None));
        }
    }
}

enum Failure {
    Transport(String),
    Closed { code: u16, reason: String },
    Server(Option<String>),
}

impl Failure {
    fn kind(&self) -> CloseKind {
        match self {
            // An error event carries no close code; treat it as abnormal.
            Failure::Transport(_) | Failure::Server(_) => CloseKind::classify(close_code::ABNORMAL),
            Failure::Closed { code, .. } => CloseKind::classify(*code),
        }
    }

    fn describe(&self) -> String {
        match self {
            Failure::Transport(message) => message.clone(),
            Failure::Closed { code, reason } if reason.is_empty() => format!("close code {code}"),
            Failure::Closed { code, reason } => format!("{reason} (code {code})"),
            Failure::Server(Some(reason)) => reason.clone(),
            Failure::Server(None) => "server reported disconnect".to_string(),
        }
    }
}

struct PaneActor {
    pane: PaneId,
    slot: PaneSlot,
    url: String,
    keys: StorageKeys,
    config: Arc<TerminalConfig>,
    connector: Arc<dyn Connector>,
    backoff: BackoffCoordinator,
    store: Arc<dyn SessionStore>,
    surface: Arc<dyn RenderSurface>,
    sink: Arc<dyn PaneSink>,
    intents: mpsc::UnboundedSender<Intent>,
    published: Arc<Mutex<PaneState>>,

    status: ConnectionStatus,
    connection: Option<Box<dyn Connection>>,
    next_connection: u64,
    classifier: FrameClassifier,
    detector: PromptDetector,
    session_id: Option<String>,
    overlay: Option<Overlay>,
    reconnect_ticket: u64,
}

impl PaneActor {
    async fn run(mut self, mut intents: mpsc::UnboundedReceiver<Intent>) {
        while let Some(intent) = intents.recv().await {
            match intent {
                Intent::Transport { connection, event } => self.on_transport(connection, event),
                Intent::Input(data) => self.on_input(&data),
                Intent::Resize { cols, rows } => self.on_resize(cols, rows),
                Intent::ReconnectDue { ticket } => self.on_reconnect_due(ticket),
                Intent::Countdown(remaining) => self.on_countdown(remaining),
                Intent::ManualReconnect => self.manual_reconnect(),
                Intent::Rebind(slot) => self.on_rebind(slot),
                Intent::Settle(done) => {
                    let _ = done.send(());
                }
                Intent::Shutdown(done) => {
                    self.stop();
                    if let Some(done) = done {
                        let _ = done.send(());
                    }
                    return;
                }
            }
        }
        self.stop();
    }

    fn start(&mut self) {
        self.set_status(ConnectionStatus::Connecting);
        self.open_connection();
    }

    fn open_connection(&mut self) {
        self.abandon_connection("superseded");
        self.classifier.reset();
        self.detector.reset();

        self.next_connection += 1;
        let id = ConnectionId(self.next_connection);
        let events = TransportEvents::new(id, self.intents.clone());
        let connection = self.connector.open(
            OpenRequest {
                url: self.url.clone(),
            },
            events,
        );
        debug!(
            target: "beach_panes::controller",
            pane = self.pane.0,
            connection = id.0,
            "socket created"
        );
        self.connection = Some(connection);
    }

    /// Detaches the current socket so nothing it does later reaches this pane,
    /// then closes it if it is still live.
    fn abandon_connection(&mut self, reason: &str) {
        let Some(mut connection) = self.connection.take() else {
            return;
        };
        connection.detach();
        if matches!(
            connection.ready_state(),
            ReadyState::Connecting | ReadyState::Open
        ) {
            connection.close(close_code::NORMAL, reason);
        }
        trace!(
            target: "beach_panes::controller",
            pane = self.pane.0,
            connection = connection.id().0,
            reason,
            "socket abandoned"
        );
    }

    fn is_current(&self, connection: ConnectionId) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|current| current.id() == connection)
    }

    fn on_transport(&mut self, connection: ConnectionId, event: TransportEvent) {
        if !self.is_current(connection) {
            trace!(
                target: "beach_panes::controller",
                pane = self.pane.0,
                connection = connection.0,
                "ignoring event from stale socket"
            );
            return;
        }
        match event {
            TransportEvent::Open => self.on_open(),
            TransportEvent::Message(text) => self.on_message(&text),
            TransportEvent::Error(message) => self.on_connection_failed(Failure::Transport(message)),
            TransportEvent::Closed { code, reason } => {
                self.on_connection_failed(Failure::Closed { code, reason })
            }
        }
    }

    fn on_open(&mut self) {
        let payload = AuthPayload {
            api_key: self.config.api_key.clone(),
            access_token: self.config.access_token.clone(),
            session_id: self
                .session_id
                .clone()
                .filter(|_| self.config.resume_on_reload),
        };
        let resuming = payload.session_id.is_some();
        if let Some(connection) = self.connection.as_ref() {
            if let Err(err) = connection.send_text(&payload.to_json()) {
                warn!(
                    target: "beach_panes::controller",
                    pane = self.pane.0,
                    error = %err,
                    "failed to send auth payload"
                );
            }
        }
        info!(
            target: "beach_panes::controller",
            pane = self.pane.0,
            resuming,
            "socket open; waiting for shell prompt"
        );
    }

    fn on_message(&mut self, text: &str) {
        match self.classifier.classify(text) {
            Frame::PtyData(data) => {
                self.surface.write(data.as_bytes());
                if self.detector.feed(&data) {
                    debug!(target: "beach_panes::controller", pane = self.pane.0, "shell prompt detected");
                    self.mark_connected();
                }
            }
            Frame::Control(envelope) => self.on_control(envelope),
            Frame::Suppressed => {}
        }
    }

    fn on_control(&mut self, envelope: ControlEnvelope) {
        match envelope {
            ControlEnvelope::Hello { session_id } => self.on_hello(session_id),
            ControlEnvelope::Status { payload, reason } => {
                debug!(
                    target: "beach_panes::controller",
                    pane = self.pane.0,
                    status = ?payload,
                    reason = reason.as_deref().unwrap_or(""),
                    "server status"
                );
                match payload {
                    ServerStatus::Connecting => {}
                    ServerStatus::Connected => {
                        if self.config.readiness == ReadinessPolicy::PromptOrServerStatus {
                            self.mark_connected();
                        }
                    }
                    ServerStatus::Disconnected => {
                        let terminal = reason
                            .as_deref()
                            .is_some_and(|reason| TERMINAL_DISCONNECT_REASONS.contains(&reason));
                        if terminal {
                            let reason = reason.unwrap_or_default();
                            self.abandon_connection("server disconnected");
                            if reason == "session_ended" {
                                self.sink.session_ended(self.pane);
                            }
                            self.enter_disconnected(Overlay::disconnected(reason));
                        } else {
                            self.on_connection_failed(Failure::Server(reason));
                        }
                    }
                    ServerStatus::Error => self.enter_error(
                        reason.unwrap_or_else(|| "unknown server error".to_string()),
                    ),
                }
            }
            ControlEnvelope::Unknown { kind } => {
                trace!(target: "beach_panes::controller", pane = self.pane.0, kind = %kind, "unhandled envelope");
            }
        }
    }

    fn on_hello(&mut self, session_id: String) {
        let previous = self.session_id.replace(session_id.clone());
        if previous.as_ref().is_some_and(|previous| *previous != session_id) {
            info!(
                target: "beach_panes::controller",
                pane = self.pane.0,
                previous = previous.as_deref().unwrap_or(""),
                session_id = %session_id,
                "server started a new session"
            );
            self.surface.reset();
        }
        if self.config.resume_on_reload {
            self.store.set(&self.keys.session_id(self.slot), &session_id);
        }
        self.published.lock().session_id = Some(session_id.clone());
        self.sink.session_id(self.pane, &session_id);
    }

    fn mark_connected(&mut self) {
        if self.status == ConnectionStatus::Connected {
            return;
        }
        self.backoff.successful_connection_reset(self.pane);
        self.set_overlay(None);
        self.published.lock().next_attempt_in = None;
        self.set_status(ConnectionStatus::Connected);
    }

    fn on_connection_failed(&mut self, failure: Failure) {
        // The socket is dropped first, so a close following an error (or any
        // other late event) for the same socket is ignored.
        self.abandon_connection("connection failed");

        if matches!(
            self.status,
            ConnectionStatus::Error | ConnectionStatus::Disconnected
        ) {
            debug!(
                target: "beach_panes::controller",
                pane = self.pane.0,
                status = %self.status,
                "socket closed while not retrying"
            );
            return;
        }

        let kind = failure.kind();
        let detail = failure.describe();
        if !kind.is_recoverable() {
            warn!(
                target: "beach_panes::controller",
                pane = self.pane.0,
                reason = kind.describe(),
                detail = %detail,
                "connection closed permanently"
            );
            if kind == CloseKind::SessionEnded {
                self.sink.session_ended(self.pane);
            }
            self.enter_disconnected(Overlay::disconnected(kind.describe()));
            return;
        }

        self.begin_reconnect(&detail);
    }

    fn begin_reconnect(&mut self, detail: &str) {
        if self.backoff.is_max_attempts_reached(self.pane) {
            let max_attempts = self.backoff.max_attempts();
            error!(
                target: "beach_panes::controller",
                pane = self.pane.0,
                max_attempts,
                "giving up after maximum reconnect attempts"
            );
            self.enter_disconnected(Overlay::max_reconnects(max_attempts));
            return;
        }

        self.reconnect_ticket += 1;
        let ticket = self.reconnect_ticket;
        let intents = self.intents.clone();
        let delay = self.backoff.schedule_reconnect(self.pane, move || {
            let _ = intents.send(Intent::ReconnectDue { ticket });
        });
        let attempt = self.backoff.increment(self.pane);
        warn!(
            target: "beach_panes::controller",
            pane = self.pane.0,
            attempt,
            delay_ms = delay.as_millis() as u64,
            detail,
            "connection lost; reconnecting"
        );
        self.set_overlay(Some(Overlay::reconnecting(attempt, self.backoff.max_attempts())));
        self.published.lock().next_attempt_in = Some(delay);
        self.set_status(ConnectionStatus::Reconnecting);
    }

    fn on_reconnect_due(&mut self, ticket: u64) {
        if ticket != self.reconnect_ticket || self.status != ConnectionStatus::Reconnecting {
            trace!(target: "beach_panes::controller", pane = self.pane.0, ticket, "stale reconnect timer");
            return;
        }
        self.published.lock().next_attempt_in = None;
        self.set_status(ConnectionStatus::Connecting);
        self.open_connection();
    }

    fn on_countdown(&mut self, remaining: Duration) {
        if self.status != ConnectionStatus::Reconnecting {
            return;
        }
        self.published.lock().next_attempt_in = Some(remaining);
        self.surface.update_countdown(remaining);
    }

    fn on_input(&mut self, data: &[u8]) {
        let enter = data.contains(&ENTER);
        let status = self.status;
        match status {
            ConnectionStatus::Reconnecting if enter => self.cancel_reconnect(),
            _ if status.accepts_manual_retry() && enter => self.manual_reconnect(),
            ConnectionStatus::Connecting | ConnectionStatus::Connected => {
                let Some(connection) = self.connection.as_ref() else {
                    return;
                };
                if let Err(err) = connection.send_text(&String::from_utf8_lossy(data)) {
                    trace!(
                        target: "beach_panes::controller",
                        pane = self.pane.0,
                        error = %err,
                        "dropping input"
                    );
                }
            }
            _ => {}
        }
    }

    fn on_resize(&mut self, cols: u16, rows: u16) {
        let Some(connection) = self.connection.as_ref() else {
            return;
        };
        if connection.ready_state() != ReadyState::Open {
            return;
        }
        if let Err(err) = connection.send_text(&ResizeRequest { cols, rows }.to_json()) {
            trace!(target: "beach_panes::controller", pane = self.pane.0, error = %err, "resize not sent");
        }
    }

    fn cancel_reconnect(&mut self) {
        info!(target: "beach_panes::controller", pane = self.pane.0, "reconnect cancelled by user");
        self.enter_disconnected(Overlay::disconnected("reconnect cancelled"));
    }

    fn manual_reconnect(&mut self) {
        info!(
            target: "beach_panes::controller",
            pane = self.pane.0,
            from = %self.status,
            "manual reconnect"
        );
        self.backoff.cancel_reconnect(self.pane);
        self.backoff.reset_state(self.pane);
        self.reconnect_ticket += 1;
        self.published.lock().next_attempt_in = None;
        self.set_status(ConnectionStatus::Connecting);
        self.open_connection();
    }

    fn enter_disconnected(&mut self, overlay: Overlay) {
        self.backoff.cancel_reconnect(self.pane);
        self.reconnect_ticket += 1;
        self.abandon_connection("disconnected");
        self.set_overlay(Some(overlay));
        self.published.lock().next_attempt_in = None;
        self.set_status(ConnectionStatus::Disconnected);
    }

    fn enter_error(&mut self, reason: String) {
        warn!(target: "beach_panes::controller", pane = self.pane.0, reason = %reason, "server reported error");
        self.backoff.cancel_reconnect(self.pane);
        self.reconnect_ticket += 1;
        self.set_overlay(Some(Overlay::error(reason)));
        self.published.lock().next_attempt_in = None;
        self.set_status(ConnectionStatus::Error);
    }

    fn on_rebind(&mut self, slot: PaneSlot) {
        if slot == self.slot {
            return;
        }
        let previous = std::mem::replace(&mut self.slot, slot);
        if self.config.resume_on_reload {
            self.store.remove(&self.keys.session_id(previous));
            match self.session_id.as_deref() {
                Some(id) => self.store.set(&self.keys.session_id(slot), id),
                None => self.store.remove(&self.keys.session_id(slot)),
            }
        }
        self.published.lock().slot = slot;
        debug!(
            target: "beach_panes::controller",
            pane = self.pane.0,
            from = previous.as_str(),
            to = slot.as_str(),
            "pane rebound"
        );
    }

    fn stop(&mut self) {
        self.backoff.forget(self.pane);
        self.reconnect_ticket += 1;
        self.abandon_connection("pane closed");
        debug!(target: "beach_panes::controller", pane = self.pane.0, "pane stopped");
    }

    fn set_overlay(&mut self, overlay: Option<Overlay>) {
        if overlay.is_none() && self.overlay.is_none() {
            return;
        }
        self.surface.set_overlay(overlay.as_ref());
        self.published.lock().overlay = overlay.clone();
        self.overlay = overlay;
    }

    fn set_status(&mut self, status: ConnectionStatus) {
        if self.status == status {
            return;
        }
        debug!(
            target: "beach_panes::controller",
            pane = self.pane.0,
            from = %self.status,
            to = %status,
            "status changed"
        );
        self.status = status;
        self.published.lock().status = status;
        self.sink.status_changed(self.pane, status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::BackoffPolicy;
    use crate::store::MemoryStore;
    use crate::transport::MockConnector;

    #[derive(Default)]
    struct Recorder {
        statuses: Mutex<Vec<ConnectionStatus>>,
        written: Mutex<Vec<u8>>,
        resets: Mutex<usize>,
    }

    impl PaneSink for Recorder {
        fn status_changed(&self, _pane: PaneId, status: ConnectionStatus) {
            self.statuses.lock().push(status);
        }
    }

    impl RenderSurface for Recorder {
        fn write(&self, bytes: &[u8]) {
            self.written.lock().extend_from_slice(bytes);
        }

        fn reset(&self) {
            *self.resets.lock() += 1;
        }

        fn focus(&self) {}

        fn set_overlay(&self, _overlay: Option<&Overlay>) {}
    }

    fn spawn_pane(
        config: TerminalConfig,
    ) -> (SessionController, MockConnector, Arc<Recorder>, Arc<MemoryStore>) {
        let connector = MockConnector::new();
        let store = Arc::new(MemoryStore::new());
        let deps = SessionDeps::new(config, Arc::new(connector.clone()), store.clone());
        let recorder = Arc::new(Recorder::default());
        let controller = SessionController::spawn(
            PaneId(1),
            PaneSlot::Primary,
            &deps,
            recorder.clone(),
            recorder.clone(),
        )
        .unwrap();
        (controller, connector, recorder, store)
    }

    #[test_timeout::tokio_timeout_test(10, paused)]
    async fn first_status_is_connecting() {
        let (controller, connector, recorder, _) = spawn_pane(TerminalConfig::default());
        assert_eq!(controller.status(), ConnectionStatus::Connecting);
        assert_eq!(connector.opened(), 1);
        assert_eq!(*recorder.statuses.lock(), vec![ConnectionStatus::Connecting]);
    }

    #[test_timeout::tokio_timeout_test(10, paused)]
    async fn invalid_url_is_rejected_up_front() {
        let deps = SessionDeps::new(
            TerminalConfig::new(""),
            Arc::new(MockConnector::new()),
            Arc::new(MemoryStore::new()),
        );
        let recorder = Arc::new(Recorder::default());
        let result = SessionController::spawn(
            PaneId(1),
            PaneSlot::Primary,
            &deps,
            recorder.clone(),
            recorder,
        );
        assert!(matches!(result, Err(ConfigError::EmptyUrl)));
    }

    #[test_timeout::tokio_timeout_test(10, paused)]
    async fn open_sends_auth_then_prompt_connects() {
        let config = TerminalConfig::default().with_api_key("key-1");
        let (controller, connector, recorder, _) = spawn_pane(config);
        let socket = connector.last().unwrap();
        socket.open();
        controller.settle().await;
        assert_eq!(socket.sent(), vec![r#"{"apiKey":"key-1"}"#.to_string()]);
        assert_eq!(controller.status(), ConnectionStatus::Connecting);

        socket.message("motd\r\n");
        socket.message("user@host:~$ ");
        controller.settle().await;
        assert_eq!(controller.status(), ConnectionStatus::Connected);
        assert_eq!(recorder.written.lock().as_slice(), b"motd\r\nuser@host:~$ ");
    }

    #[test_timeout::tokio_timeout_test(10, paused)]
    async fn server_connected_status_waits_for_prompt_by_default() {
        let (controller, connector, _, _) = spawn_pane(TerminalConfig::default());
        let socket = connector.last().unwrap();
        socket.open();
        socket.message(r#"{"type":"status","payload":"connected"}"#);
        controller.settle().await;
        assert_eq!(controller.status(), ConnectionStatus::Connecting);
    }

    #[test_timeout::tokio_timeout_test(10, paused)]
    async fn server_connected_status_counts_when_configured() {
        let config =
            TerminalConfig::default().with_readiness(ReadinessPolicy::PromptOrServerStatus);
        let (controller, connector, _, _) = spawn_pane(config);
        let socket = connector.last().unwrap();
        socket.open();
        socket.message(r#"{"type":"status","payload":"connected"}"#);
        controller.settle().await;
        assert_eq!(controller.status(), ConnectionStatus::Connected);
    }

    #[test_timeout::tokio_timeout_test(10, paused)]
    async fn hello_with_new_id_resets_surface() {
        let config = TerminalConfig::default().with_resume_on_reload(true);
        let (controller, connector, recorder, store) = spawn_pane(config);
        let socket = connector.last().unwrap();
        socket.open();
        socket.message(r#"{"type":"hello","sessionId":"s-1"}"#);
        socket.message(r#"{"type":"hello","sessionId":"s-1"}"#);
        controller.settle().await;
        assert_eq!(*recorder.resets.lock(), 0);
        socket.message(r#"{"type":"hello","sessionId":"s-2"}"#);
        controller.settle().await;
        assert_eq!(*recorder.resets.lock(), 1);
        assert_eq!(controller.session_id().as_deref(), Some("s-2"));
        assert_eq!(
            store.get("beach-panes.primary.session_id").as_deref(),
            Some("s-2")
        );
    }

    #[test_timeout::tokio_timeout_test(10, paused)]
    async fn server_error_status_does_not_retry() {
        let (controller, connector, _, _) = spawn_pane(TerminalConfig::default());
        let socket = connector.last().unwrap();
        socket.open();
        socket.message(r#"{"type":"status","payload":"error","reason":"container died"}"#);
        controller.settle().await;
        assert_eq!(controller.status(), ConnectionStatus::Error);

        socket.close(1006, "");
        tokio::time::sleep(Duration::from_secs(5)).await;
        controller.settle().await;
        assert_eq!(controller.status(), ConnectionStatus::Error);
        assert_eq!(connector.opened(), 1);

        controller.send_input("\r");
        controller.settle().await;
        assert_eq!(controller.status(), ConnectionStatus::Connecting);
        assert_eq!(connector.opened(), 2);
    }

    #[test_timeout::tokio_timeout_test(10, paused)]
    async fn terminal_server_disconnect_reason_skips_retry() {
        let (controller, connector, _, _) = spawn_pane(TerminalConfig::default());
        let socket = connector.last().unwrap();
        socket.open();
        socket.message(r#"{"type":"status","payload":"disconnected","reason":"auth_failed"}"#);
        controller.settle().await;
        assert_eq!(controller.status(), ConnectionStatus::Disconnected);
        assert!(socket.is_detached());
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.opened(), 1);
    }

    #[test_timeout::tokio_timeout_test(10, paused)]
    async fn input_is_forwarded_only_while_live() {
        let (controller, connector, _, _) = spawn_pane(TerminalConfig::default());
        let socket = connector.last().unwrap();
        socket.open();
        socket.message("$ ");
        controller.send_input("ls\r");
        controller.resize(100, 30);
        controller.settle().await;
        assert_eq!(
            socket.sent()[1..],
            [
                "ls\r".to_string(),
                r#"{"type":"resize","cols":100,"rows":30}"#.to_string()
            ]
        );
    }

    #[test_timeout::tokio_timeout_test(10, paused)]
    async fn rebind_moves_persisted_identity() {
        let config = TerminalConfig::default().with_resume_on_reload(true);
        let connector = MockConnector::new();
        let store = Arc::new(MemoryStore::new());
        store.set("beach-panes.secondary.session_id", "s-9");
        let deps = SessionDeps::new(config, Arc::new(connector.clone()), store.clone());
        let recorder = Arc::new(Recorder::default());
        let controller = SessionController::spawn(
            PaneId(2),
            PaneSlot::Secondary,
            &deps,
            recorder.clone(),
            recorder,
        )
        .unwrap();
        assert_eq!(controller.session_id().as_deref(), Some("s-9"));

        controller.rebind(PaneSlot::Primary);
        controller.settle().await;
        assert_eq!(controller.slot(), PaneSlot::Primary);
        assert_eq!(
            store.get("beach-panes.primary.session_id").as_deref(),
            Some("s-9")
        );
        assert_eq!(store.get("beach-panes.secondary.session_id"), None);
    }

    #[test_timeout::tokio_timeout_test(10, paused)]
    async fn shutdown_closes_socket_and_cancels_timer() {
        let config = TerminalConfig::default().with_backoff(BackoffPolicy::default());
        let (controller, connector, _, _) = spawn_pane(config);
        connector.last().unwrap().close(1006, "");
        // First retry is immediate.
        tokio::time::sleep(Duration::from_millis(10)).await;
        controller.settle().await;
        assert_eq!(connector.opened(), 2);

        let second = connector.last().unwrap();
        second.open();
        controller.shutdown().await;
        assert!(second.is_detached());
        assert!(second.closed_with().is_some());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.opened(), 2);
    }

    #[test_timeout::tokio_timeout_test(10, paused)]
    async fn enter_cancels_pending_reconnect() {
        let (controller, connector, recorder, _) = spawn_pane(TerminalConfig::default());
        connector.last().unwrap().close(1006, "");
        tokio::time::sleep(Duration::from_millis(10)).await;
        connector.last().unwrap().close(1006, "");
        controller.settle().await;
        assert_eq!(controller.status(), ConnectionStatus::Reconnecting);

        controller.send_input("\r");
        controller.settle().await;
        assert_eq!(controller.status(), ConnectionStatus::Disconnected);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.opened(), 2);
        assert_eq!(
            recorder.statuses.lock().last(),
            Some(&ConnectionStatus::Disconnected)
        );
    }
}
