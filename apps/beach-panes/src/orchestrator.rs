//! Split-pane ownership and outward reporting.
//!
//! The orchestrator is the only component aware that two sessions can exist.
//! Exactly one pane is primary at any time; only its lifecycle reaches the
//! embedding application's [`SessionCallbacks`]. The secondary pane's status
//! is kept for a UI-local indicator.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::backoff::BackoffCoordinator;
use crate::config::TerminalConfig;
use crate::controller::{PaneId, PaneSink, PaneSlot, SessionController, SessionDeps};
use crate::error::PaneError;
use crate::status::ConnectionStatus;
use crate::store::{SessionStore, StorageKeys};
use crate::surface::RenderSurface;
use crate::transport::Connector;

pub const MIN_PRIMARY_FRACTION: f32 = 0.15;
pub const MAX_PRIMARY_FRACTION: f32 = 0.85;
pub const DEFAULT_PRIMARY_FRACTION: f32 = 0.5;

/// Lifecycle notifications for the embedding application.
pub trait SessionCallbacks: Send + Sync {
    fn on_connection_status_change(&self, status: ConnectionStatus);

    fn on_session_id(&self, _session_id: &str) {}

    fn on_session_end(&self) {}
}

/// Hands out the render surface for a newly created pane.
pub trait SurfaceProvider: Send + Sync {
    fn surface_for(&self, pane: PaneId, slot: PaneSlot) -> Arc<dyn RenderSurface>;
}

impl<F> SurfaceProvider for F
where
    F: Fn(PaneId, PaneSlot) -> Arc<dyn RenderSurface> + Send + Sync,
{
    fn surface_for(&self, pane: PaneId, slot: PaneSlot) -> Arc<dyn RenderSurface> {
        self(pane, slot)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PaneLayout {
    pub is_split: bool,
    pub primary_width_fraction: f32,
    pub secondary_session_id: Option<String>,
}

/// A pointer press on the divider. Dragging claims the event so the host does
/// not also start a text selection.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointerDown {
    pub x: f32,
    default_prevented: bool,
}

impl PointerDown {
    pub fn new(x: f32) -> Self {
        Self {
            x,
            default_prevented: false,
        }
    }

    pub fn prevent_default(&mut self) {
        self.default_prevented = true;
    }

    pub fn default_prevented(&self) -> bool {
        self.default_prevented
    }
}

pub fn clamp_fraction(fraction: f32) -> f32 {
    if fraction.is_nan() {
        return DEFAULT_PRIMARY_FRACTION;
    }
    fraction.clamp(MIN_PRIMARY_FRACTION, MAX_PRIMARY_FRACTION)
}

#[derive(Default)]
struct RouterState {
    primary: Option<PaneId>,
    indicators: HashMap<PaneId, ConnectionStatus>,
    session_ids: HashMap<PaneId, String>,
}

/// Routes pane notifications: the primary's go out, everyone's update the
/// local indicator. Callbacks run under the state lock so a promotion and a
/// status change from the promoted pane cannot interleave.
struct PaneRouter {
    state: Mutex<RouterState>,
    callbacks: Arc<dyn SessionCallbacks>,
}

impl PaneRouter {
    fn new(primary: PaneId, callbacks: Arc<dyn SessionCallbacks>) -> Self {
        Self {
            state: Mutex::new(RouterState {
                primary: Some(primary),
                ..RouterState::default()
            }),
            callbacks,
        }
    }

    /// Makes `pane` the primary and reports its current status and session id
    /// outward. Returns the status reported.
    fn promote(&self, pane: PaneId) -> Option<ConnectionStatus> {
        let mut state = self.state.lock();
        state.primary = Some(pane);
        let status = state.indicators.get(&pane).copied();
        if let Some(status) = status {
            self.callbacks.on_connection_status_change(status);
        }
        if let Some(session_id) = state.session_ids.get(&pane) {
            self.callbacks.on_session_id(session_id);
        }
        status
    }

    fn indicator(&self, pane: PaneId) -> Option<ConnectionStatus> {
        self.state.lock().indicators.get(&pane).copied()
    }

    fn forget(&self, pane: PaneId) {
        let mut state = self.state.lock();
        state.indicators.remove(&pane);
        state.session_ids.remove(&pane);
    }
}

impl PaneSink for PaneRouter {
    fn status_changed(&self, pane: PaneId, status: ConnectionStatus) {
        let mut state = self.state.lock();
        state.indicators.insert(pane, status);
        if state.primary == Some(pane) {
            self.callbacks.on_connection_status_change(status);
        }
    }

    fn session_id(&self, pane: PaneId, session_id: &str) {
        let mut state = self.state.lock();
        state.session_ids.insert(pane, session_id.to_string());
        if state.primary == Some(pane) {
            self.callbacks.on_session_id(session_id);
        }
    }

    fn session_ended(&self, pane: PaneId) {
        if self.state.lock().primary == Some(pane) {
            self.callbacks.on_session_end();
        }
    }
}

struct Pane {
    controller: SessionController,
    surface: Arc<dyn RenderSurface>,
}

pub struct PaneOrchestrator {
    deps: SessionDeps,
    keys: StorageKeys,
    router: Arc<PaneRouter>,
    surfaces: Box<dyn SurfaceProvider>,
    primary: Pane,
    secondary: Option<Pane>,
    primary_width_fraction: f32,
    dragging: bool,
    next_pane: u64,
}

impl PaneOrchestrator {
    /// Creates the primary pane and, when a split layout was persisted and
    /// resumption is on, the secondary pane as well.
    pub fn mount(
        config: TerminalConfig,
        connector: Arc<dyn Connector>,
        store: Arc<dyn SessionStore>,
        callbacks: Arc<dyn SessionCallbacks>,
        surfaces: impl SurfaceProvider + 'static,
    ) -> Result<Self, PaneError> {
        let deps = SessionDeps::new(config, connector, store);
        let keys = StorageKeys::new(deps.config.storage_namespace.clone());
        let primary_id = PaneId(1);
        let router = Arc::new(PaneRouter::new(primary_id, callbacks));
        let surfaces: Box<dyn SurfaceProvider> = Box::new(surfaces);
        let resume = deps.config.resume_on_reload;

        let primary = spawn_pane(&deps, &router, surfaces.as_ref(), primary_id, PaneSlot::Primary)?;

        let primary_width_fraction = if resume {
            deps.store
                .get(&keys.divider())
                .and_then(|value| value.parse::<f32>().ok())
                .map_or(DEFAULT_PRIMARY_FRACTION, clamp_fraction)
        } else {
            DEFAULT_PRIMARY_FRACTION
        };
        let restore_split = resume && deps.store.get(&keys.split()).as_deref() == Some("true");

        let mut orchestrator = Self {
            deps,
            keys,
            router,
            surfaces,
            primary,
            secondary: None,
            primary_width_fraction,
            dragging: false,
            next_pane: 2,
        };
        if restore_split {
            info!(target: "beach_panes::orchestrator", "restoring split layout");
            orchestrator.enter_split()?;
        }
        orchestrator.primary.surface.focus();
        Ok(orchestrator)
    }

    /// Opens the secondary pane. Returns the existing one when already split.
    pub fn enter_split(&mut self) -> Result<PaneId, PaneError> {
        if let Some(secondary) = self.secondary.as_ref() {
            return Ok(secondary.controller.pane());
        }
        let id = PaneId(self.next_pane);
        self.next_pane += 1;
        let pane = spawn_pane(
            &self.deps,
            &self.router,
            self.surfaces.as_ref(),
            id,
            PaneSlot::Secondary,
        )?;
        pane.surface.focus();
        self.secondary = Some(pane);
        if self.deps.config.resume_on_reload {
            self.deps.store.set(&self.keys.split(), "true");
        }
        info!(target: "beach_panes::orchestrator", pane = id.0, "split opened");
        Ok(id)
    }

    /// Closes the primary pane and promotes the secondary in its place. The
    /// promoted pane keeps its socket, session and backoff state.
    pub async fn close_primary(&mut self) -> Result<(), PaneError> {
        let promoted = self.secondary.take().ok_or(PaneError::NotSplit)?;
        let closed = std::mem::replace(&mut self.primary, promoted);
        let promoted_id = self.primary.controller.pane();

        // The outside world only ever saw the old primary; catch it up once.
        let status = self.router.promote(promoted_id);
        self.primary.controller.rebind(PaneSlot::Primary);
        self.primary.controller.settle().await;
        self.leave_split();

        let closed_id = closed.controller.pane();
        closed.controller.shutdown().await;
        self.router.forget(closed_id);

        self.primary.surface.focus();
        info!(
            target: "beach_panes::orchestrator",
            pane = promoted_id.0,
            status = ?status,
            "secondary promoted to primary"
        );
        Ok(())
    }

    pub async fn close_secondary(&mut self) -> Result<(), PaneError> {
        let closed = self.secondary.take().ok_or(PaneError::NotSplit)?;
        let id = closed.controller.pane();
        closed.controller.shutdown().await;
        self.router.forget(id);
        if self.deps.config.resume_on_reload {
            self.deps
                .store
                .remove(&self.keys.session_id(PaneSlot::Secondary));
        }
        self.leave_split();
        self.primary.surface.focus();
        info!(target: "beach_panes::orchestrator", pane = id.0, "split closed");
        Ok(())
    }

    /// Starts a divider drag. Ignored unless split.
    pub fn begin_divider_drag(&mut self, event: &mut PointerDown) -> bool {
        if self.secondary.is_none() {
            return false;
        }
        event.prevent_default();
        self.dragging = true;
        true
    }

    /// Moves the divider to pointer `x` within a container `container_width`
    /// wide. Returns the resulting primary fraction.
    pub fn drag_divider(&mut self, x: f32, container_width: f32) -> f32 {
        if self.dragging && container_width > 0.0 {
            self.primary_width_fraction = clamp_fraction(x / container_width);
        }
        self.primary_width_fraction
    }

    pub fn end_divider_drag(&mut self) {
        if !std::mem::take(&mut self.dragging) {
            return;
        }
        debug!(
            target: "beach_panes::orchestrator",
            fraction = self.primary_width_fraction,
            "divider moved"
        );
        if self.deps.config.resume_on_reload {
            self.deps.store.set(
                &self.keys.divider(),
                &self.primary_width_fraction.to_string(),
            );
        }
    }

    pub fn is_dragging(&self) -> bool {
        self.dragging
    }

    pub fn layout(&self) -> PaneLayout {
        PaneLayout {
            is_split: self.secondary.is_some(),
            primary_width_fraction: self.primary_width_fraction,
            secondary_session_id: self
                .secondary
                .as_ref()
                .and_then(|pane| pane.controller.session_id()),
        }
    }

    pub fn primary(&self) -> &SessionController {
        &self.primary.controller
    }

    pub fn secondary(&self) -> Option<&SessionController> {
        self.secondary.as_ref().map(|pane| &pane.controller)
    }

    pub fn pane(&self, slot: PaneSlot) -> Option<&SessionController> {
        match slot {
            PaneSlot::Primary => Some(self.primary()),
            PaneSlot::Secondary => self.secondary(),
        }
    }

    /// Last status a pane reported, for the per-pane indicator.
    pub fn indicator(&self, pane: PaneId) -> Option<ConnectionStatus> {
        self.router.indicator(pane)
    }

    pub fn backoff(&self) -> &BackoffCoordinator {
        &self.deps.backoff
    }

    /// Shuts every pane down. Persisted identities are kept for the next mount.
    pub async fn teardown(self) {
        if let Some(secondary) = self.secondary {
            secondary.controller.shutdown().await;
        }
        self.primary.controller.shutdown().await;
        debug!(target: "beach_panes::orchestrator", "orchestrator torn down");
    }

    fn leave_split(&mut self) {
        self.dragging = false;
        if self.deps.config.resume_on_reload {
            self.deps.store.remove(&self.keys.split());
        }
    }
}

fn spawn_pane(
    deps: &SessionDeps,
    router: &Arc<PaneRouter>,
    surfaces: &dyn SurfaceProvider,
    pane: PaneId,
    slot: PaneSlot,
) -> Result<Pane, PaneError> {
    let surface = surfaces.surface_for(pane, slot);
    let sink: Arc<dyn PaneSink> = router.clone();
    let controller = SessionController::spawn(pane, slot, deps, surface.clone(), sink)?;
    Ok(Pane {
        controller,
        surface,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fraction_is_clamped() {
        assert_eq!(clamp_fraction(0.0), MIN_PRIMARY_FRACTION);
        assert_eq!(clamp_fraction(1.0), MAX_PRIMARY_FRACTION);
        assert_eq!(clamp_fraction(0.4), 0.4);
        assert_eq!(clamp_fraction(f32::NAN), DEFAULT_PRIMARY_FRACTION);
    }

    #[derive(Default)]
    struct Outward {
        statuses: Mutex<Vec<ConnectionStatus>>,
        session_ids: Mutex<Vec<String>>,
    }

    impl SessionCallbacks for Outward {
        fn on_connection_status_change(&self, status: ConnectionStatus) {
            self.statuses.lock().push(status);
        }

        fn on_session_id(&self, session_id: &str) {
            self.session_ids.lock().push(session_id.to_string());
        }
    }

    #[test]
    fn promotion_reports_each_status_once() {
        let outward = Arc::new(Outward::default());
        let router = PaneRouter::new(PaneId(1), outward.clone());
        router.status_changed(PaneId(1), ConnectionStatus::Connected);
        router.status_changed(PaneId(2), ConnectionStatus::Connecting);
        router.session_id(PaneId(2), "two");
        router.status_changed(PaneId(2), ConnectionStatus::Connected);
        assert_eq!(*outward.statuses.lock(), vec![ConnectionStatus::Connected]);

        assert_eq!(router.promote(PaneId(2)), Some(ConnectionStatus::Connected));
        router.status_changed(PaneId(2), ConnectionStatus::Reconnecting);
        router.status_changed(PaneId(1), ConnectionStatus::Disconnected);

        assert_eq!(
            *outward.statuses.lock(),
            vec![
                ConnectionStatus::Connected,
                ConnectionStatus::Connected,
                ConnectionStatus::Reconnecting,
            ]
        );
        assert_eq!(*outward.session_ids.lock(), vec!["two".to_string()]);
        assert_eq!(router.indicator(PaneId(1)), Some(ConnectionStatus::Disconnected));
    }

    #[test]
    fn pointer_down_records_prevent_default() {
        let mut event = PointerDown::new(10.0);
        assert!(!event.default_prevented());
        event.prevent_default();
        assert!(event.default_prevented());
    }
}
