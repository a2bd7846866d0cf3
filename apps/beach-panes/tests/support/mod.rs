#![allow(dead_code)]

use beach_panes::orchestrator::SurfaceProvider;
use beach_panes::transport::{MockConnector, MockSocket};
use beach_panes::{
    ConnectionStatus, MemoryStore, Overlay, PaneId, PaneOrchestrator, PaneSlot, RenderSurface,
    SessionCallbacks, TerminalConfig,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
pub struct RecordingSurface {
    pub written: Mutex<Vec<u8>>,
    pub overlays: Mutex<Vec<Option<Overlay>>>,
    pub resets: Mutex<usize>,
    pub focused: Mutex<usize>,
    pub countdown: Mutex<Vec<Duration>>,
}

impl RecordingSurface {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.written.lock()).into_owned()
    }

    pub fn current_overlay(&self) -> Option<Overlay> {
        self.overlays.lock().last().cloned().flatten()
    }
}

impl RenderSurface for RecordingSurface {
    fn write(&self, bytes: &[u8]) {
        self.written.lock().extend_from_slice(bytes);
    }

    fn reset(&self) {
        *self.resets.lock() += 1;
    }

    fn focus(&self) {
        *self.focused.lock() += 1;
    }

    fn set_overlay(&self, overlay: Option<&Overlay>) {
        self.overlays.lock().push(overlay.cloned());
    }

    fn update_countdown(&self, remaining: Duration) {
        self.countdown.lock().push(remaining);
    }
}

#[derive(Default)]
pub struct RecordingCallbacks {
    pub statuses: Mutex<Vec<ConnectionStatus>>,
    pub session_ids: Mutex<Vec<String>>,
    pub ended: Mutex<usize>,
}

impl RecordingCallbacks {
    pub fn statuses(&self) -> Vec<ConnectionStatus> {
        self.statuses.lock().clone()
    }
}

impl SessionCallbacks for RecordingCallbacks {
    fn on_connection_status_change(&self, status: ConnectionStatus) {
        self.statuses.lock().push(status);
    }

    fn on_session_id(&self, session_id: &str) {
        self.session_ids.lock().push(session_id.to_string());
    }

    fn on_session_end(&self) {
        *self.ended.lock() += 1;
    }
}

#[derive(Clone, Default)]
pub struct Surfaces {
    by_pane: Arc<Mutex<HashMap<PaneId, Arc<RecordingSurface>>>>,
}

impl Surfaces {
    pub fn get(&self, pane: PaneId) -> Arc<RecordingSurface> {
        self.by_pane
            .lock()
            .get(&pane)
            .cloned()
            .expect("no surface for pane")
    }

    pub fn count(&self) -> usize {
        self.by_pane.lock().len()
    }
}

impl SurfaceProvider for Surfaces {
    fn surface_for(&self, pane: PaneId, _slot: PaneSlot) -> Arc<dyn RenderSurface> {
        let surface = Arc::new(RecordingSurface::default());
        self.by_pane.lock().insert(pane, surface.clone());
        surface
    }
}

pub struct Harness {
    pub orchestrator: PaneOrchestrator,
    pub connector: MockConnector,
    pub store: Arc<MemoryStore>,
    pub callbacks: Arc<RecordingCallbacks>,
    pub surfaces: Surfaces,
}

impl Harness {
    pub fn mount(config: TerminalConfig) -> Self {
        Self::mount_with_store(config, Arc::new(MemoryStore::new()))
    }

    pub fn mount_with_store(config: TerminalConfig, store: Arc<MemoryStore>) -> Self {
        let connector = MockConnector::new();
        let callbacks = Arc::new(RecordingCallbacks::default());
        let surfaces = Surfaces::default();
        let orchestrator = PaneOrchestrator::mount(
            config,
            Arc::new(connector.clone()),
            store.clone(),
            callbacks.clone(),
            surfaces.clone(),
        )
        .expect("mount");
        Self {
            orchestrator,
            connector,
            store,
            callbacks,
            surfaces,
        }
    }

    pub fn primary_id(&self) -> PaneId {
        self.orchestrator.primary().pane()
    }

    pub fn primary_surface(&self) -> Arc<RecordingSurface> {
        self.surfaces.get(self.primary_id())
    }

    /// The newest socket opened for the given pane's current connection.
    pub fn last_socket(&self) -> MockSocket {
        self.connector.last().expect("no socket opened")
    }

    pub async fn settle(&self) {
        self.orchestrator.primary().settle().await;
        if let Some(secondary) = self.orchestrator.secondary() {
            secondary.settle().await;
        }
    }

    /// Opens `socket` and feeds it a shell prompt.
    pub async fn connect(&self, socket: &MockSocket) {
        socket.open();
        socket.message("user@host:~$ ");
        self.settle().await;
    }
}

/// Lets zero-delay reconnect timers run.
pub async fn let_timers_run() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}
