//! Client-side split-pane terminal sessions over WebSocket.
//!
//! Each visible pane is backed by a [`controller::SessionController`] that owns one
//! socket, a connection state machine and a resumable session identity. The
//! [`orchestrator::PaneOrchestrator`] owns one or two of them and is the only place
//! that knows more than one session can exist.

pub mod backoff;
pub mod config;
pub mod controller;
pub mod error;
pub mod frame;
pub mod orchestrator;
pub mod prompt;
pub mod status;
pub mod store;
pub mod surface;
pub mod telemetry;
pub mod terminal;
pub mod transport;

pub use backoff::{BackoffCoordinator, BackoffPolicy};
pub use config::{ReadinessPolicy, TerminalConfig};
pub use controller::{PaneId, PaneSink, PaneSlot, SessionController, SessionDeps};
pub use error::{ConfigError, PaneError, StoreError, TransportError};
pub use orchestrator::{PaneLayout, PaneOrchestrator, PointerDown, SessionCallbacks};
pub use status::{ConnectionStatus, Overlay, OverlayKind};
pub use store::{FileStore, MemoryStore, SessionStore, StorageKeys};
pub use surface::RenderSurface;

// Environment variables are process-global.
#[cfg(test)]
static TEST_ENV: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[cfg(test)]
pub(crate) fn test_env_lock() -> std::sync::MutexGuard<'static, ()> {
    TEST_ENV.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
