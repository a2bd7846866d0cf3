//! Interactive client: one pane visible at a time, `Ctrl-A` prefix chords
//! for layout.
//!
//! | chord        | action                                   |
//! |--------------|------------------------------------------|
//! | `Ctrl-A s`   | open the second pane                     |
//! | `Ctrl-A o`   | switch the visible pane                  |
//! | `Ctrl-A x`   | close the visible pane (quits if last)   |
//! | `Ctrl-A q`   | quit, keeping sessions resumable         |
//! | `Ctrl-A Ctrl-A` | send a literal `Ctrl-A`               |

use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

use super::cli::Cli;
use super::error::CliError;
use super::tty::{self, RawModeGuard};
use crate::controller::{PaneId, PaneSlot};
use crate::orchestrator::{PaneOrchestrator, SessionCallbacks};
use crate::status::{ConnectionStatus, Overlay};
use crate::store::FileStore;
use crate::surface::RenderSurface;
use crate::telemetry;
use crate::transport::WebSocketConnector;

const PREFIX: u8 = 0x01;
const SCROLLBACK_LIMIT: usize = 256 * 1024;
const SIZE_POLL: Duration = Duration::from_millis(500);

#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Forward(Vec<u8>),
    Split,
    SwitchFocus,
    ClosePane,
    Quit,
}

/// Splits raw stdin into pane input and prefix chords.
#[derive(Debug, Default)]
pub struct InputParser {
    prefix_pending: bool,
}

impl InputParser {
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Command> {
        let mut commands = Vec::new();
        let mut forward = Vec::new();
        for &byte in bytes {
            if self.prefix_pending {
                self.prefix_pending = false;
                let command = match byte {
                    PREFIX => {
                        forward.push(PREFIX);
                        continue;
                    }
                    b's' => Command::Split,
                    b'o' => Command::SwitchFocus,
                    b'x' => Command::ClosePane,
                    b'q' => Command::Quit,
                    _ => continue,
                };
                if !forward.is_empty() {
                    commands.push(Command::Forward(std::mem::take(&mut forward)));
                }
                commands.push(command);
            } else if byte == PREFIX {
                self.prefix_pending = true;
            } else {
                forward.push(byte);
            }
        }
        if !forward.is_empty() {
            commands.push(Command::Forward(forward));
        }
        commands
    }
}

#[derive(Default)]
struct Display {
    focused: Mutex<Option<PaneId>>,
}

impl Display {
    fn is_focused(&self, pane: PaneId) -> bool {
        *self.focused.lock() == Some(pane)
    }
}

fn write_stdout(bytes: &[u8]) {
    let mut stdout = std::io::stdout().lock();
    let _ = stdout.write_all(bytes);
    let _ = stdout.flush();
}

/// Keeps a pane's recent output so it can be redrawn when it regains focus.
/// The overlay is drawn over the replayed output and never enters scrollback.
struct PaneSurface {
    pane: PaneId,
    display: Arc<Display>,
    scrollback: Mutex<Vec<u8>>,
    overlay: Mutex<Option<String>>,
}

impl PaneSurface {
    fn new(pane: PaneId, display: Arc<Display>) -> Self {
        Self {
            pane,
            display,
            scrollback: Mutex::new(Vec::new()),
            overlay: Mutex::new(None),
        }
    }

    /// Clear, replay scrollback, then the overlay if one is up.
    fn screen(&self) -> Vec<u8> {
        let mut frame = b"\x1b[2J\x1b[H".to_vec();
        frame.extend_from_slice(&self.scrollback.lock());
        if let Some(overlay) = self.overlay.lock().as_deref() {
            frame.extend_from_slice(overlay.as_bytes());
        }
        frame
    }
}

impl RenderSurface for PaneSurface {
    fn write(&self, bytes: &[u8]) {
        {
            let mut scrollback = self.scrollback.lock();
            scrollback.extend_from_slice(bytes);
            if scrollback.len() > SCROLLBACK_LIMIT {
                let excess = scrollback.len() - SCROLLBACK_LIMIT;
                scrollback.drain(..excess);
            }
        }
        if self.display.is_focused(self.pane) {
            write_stdout(bytes);
        }
    }

    fn reset(&self) {
        self.scrollback.lock().clear();
        if self.display.is_focused(self.pane) {
            write_stdout(b"\x1bc");
        }
    }

    fn focus(&self) {
        *self.display.focused.lock() = Some(self.pane);
        write_stdout(&self.screen());
    }

    fn set_overlay(&self, overlay: Option<&Overlay>) {
        let rendered = overlay.map(Overlay::render);
        let previous = std::mem::replace(&mut *self.overlay.lock(), rendered.clone());
        if !self.display.is_focused(self.pane) {
            return;
        }
        match rendered {
            Some(rendered) => write_stdout(rendered.as_bytes()),
            // Redraw so the box disappears.
            None if previous.is_some() => write_stdout(&self.screen()),
            None => {}
        }
    }

    fn update_countdown(&self, remaining: Duration) {
        if self.display.is_focused(self.pane) {
            let title = format!(
                "\x1b]2;beach-panes: reconnecting in {}s\x07",
                remaining.as_secs().max(1)
            );
            write_stdout(title.as_bytes());
        }
    }
}

struct StatusLog;

impl SessionCallbacks for StatusLog {
    fn on_connection_status_change(&self, status: ConnectionStatus) {
        info!(target: "beach_panes::terminal", status = %status, "connection status");
        if status == ConnectionStatus::Connected {
            write_stdout(b"\x1b]2;beach-panes\x07");
        }
    }

    fn on_session_id(&self, session_id: &str) {
        info!(target: "beach_panes::terminal", session_id, "attached to session");
    }

    fn on_session_end(&self) {
        warn!(target: "beach_panes::terminal", "remote session ended");
    }
}

struct App {
    orchestrator: PaneOrchestrator,
    surfaces: Arc<Mutex<HashMap<PaneId, Arc<PaneSurface>>>>,
    focused: PaneSlot,
    sizes: HashMap<PaneId, (u16, u16)>,
}

impl App {
    /// Returns false once the client should exit.
    async fn apply(&mut self, command: Command) -> Result<bool, CliError> {
        match command {
            Command::Forward(bytes) => {
                if let Some(pane) = self.orchestrator.pane(self.focused) {
                    pane.send_input(&bytes);
                }
            }
            Command::Split => {
                self.orchestrator.enter_split()?;
                self.focus(PaneSlot::Secondary);
            }
            Command::SwitchFocus => {
                if self.orchestrator.layout().is_split {
                    let next = match self.focused {
                        PaneSlot::Primary => PaneSlot::Secondary,
                        PaneSlot::Secondary => PaneSlot::Primary,
                    };
                    self.focus(next);
                }
            }
            Command::ClosePane => {
                if !self.orchestrator.layout().is_split {
                    return Ok(false);
                }
                match self.focused {
                    PaneSlot::Primary => self.orchestrator.close_primary().await?,
                    PaneSlot::Secondary => self.orchestrator.close_secondary().await?,
                }
                self.focused = PaneSlot::Primary;
            }
            Command::Quit => return Ok(false),
        }
        Ok(true)
    }

    fn focus(&mut self, slot: PaneSlot) {
        let Some(pane) = self.orchestrator.pane(slot).map(|pane| pane.pane()) else {
            return;
        };
        self.focused = slot;
        if let Some(surface) = self.surfaces.lock().get(&pane) {
            surface.focus();
        }
    }

    fn sync_size(&mut self) {
        let Some(size) = tty::size() else {
            return;
        };
        for slot in [PaneSlot::Primary, PaneSlot::Secondary] {
            let Some(pane) = self.orchestrator.pane(slot) else {
                continue;
            };
            if pane.status() != ConnectionStatus::Connected {
                self.sizes.remove(&pane.pane());
                continue;
            }
            if self.sizes.get(&pane.pane()) != Some(&size) {
                debug!(target: "beach_panes::terminal", pane = pane.pane().0, cols = size.0, rows = size.1, "resize");
                pane.resize(size.0, size.1);
                self.sizes.insert(pane.pane(), size);
            }
        }
    }
}

pub async fn run(cli: Cli) -> Result<(), CliError> {
    telemetry::init(&cli.logging.to_config())?;

    let config = cli.terminal_config();
    // Fail before touching the terminal.
    config.websocket_url()?;
    let state_path = match cli.state_file.clone() {
        Some(path) => path,
        None => FileStore::default_path()?,
    };
    let store = Arc::new(FileStore::open(state_path)?);
    info!(
        target: "beach_panes::terminal",
        state_file = %store.path().display(),
        "using state file"
    );

    let display = Arc::new(Display::default());
    let surfaces: Arc<Mutex<HashMap<PaneId, Arc<PaneSurface>>>> = Arc::default();
    let provider = {
        let display = display.clone();
        let surfaces = surfaces.clone();
        move |pane: PaneId, _slot: PaneSlot| -> Arc<dyn RenderSurface> {
            let surface = Arc::new(PaneSurface::new(pane, display.clone()));
            surfaces.lock().insert(pane, surface.clone());
            surface
        }
    };

    let _raw = RawModeGuard::new(true);
    let orchestrator = PaneOrchestrator::mount(
        config,
        Arc::new(WebSocketConnector::new()),
        store,
        Arc::new(StatusLog),
        provider,
    )?;
    let mut app = App {
        orchestrator,
        surfaces,
        focused: PaneSlot::Primary,
        sizes: HashMap::new(),
    };
    if cli.split {
        app.apply(Command::Split).await?;
    }

    let mut stdin = tokio::io::stdin();
    let mut buf = [0u8; 1024];
    let mut parser = InputParser::default();
    let mut ticker = tokio::time::interval(SIZE_POLL);
    'session: loop {
        tokio::select! {
            read = stdin.read(&mut buf) => {
                let n = read?;
                if n == 0 {
                    break 'session;
                }
                for command in parser.feed(&buf[..n]) {
                    if !app.apply(command).await? {
                        break 'session;
                    }
                }
            }
            _ = ticker.tick() => app.sync_size(),
        }
    }

    app.orchestrator.teardown().await;
    write_stdout(b"\r\n");
    Ok(())
}
