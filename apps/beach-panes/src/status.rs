use std::fmt;

/// Connection state of a single pane as reported to observers.
///
/// `Initial` only exists between construction and the first transition; it is
/// never reported outward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    Initial,
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
    Error,
}

impl ConnectionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionStatus::Initial => "initial",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Reconnecting => "reconnecting",
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Error => "error",
        }
    }

    /// States in which `\r` means "try again" rather than "cancel".
    pub fn accepts_manual_retry(self) -> bool {
        matches!(
            self,
            ConnectionStatus::Disconnected | ConnectionStatus::Error
        )
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OverlayKind {
    Reconnecting { attempt: u32, max_attempts: u32 },
    Disconnected { reason: String },
    Error { reason: String },
    MaxReconnects { max_attempts: u32 },
}

/// Status box drawn over a pane while it is not interactive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Overlay {
    pub kind: OverlayKind,
    pub title: String,
    pub body: String,
    pub retry_hint: Option<&'static str>,
}

const RETRY_HINT: &str = "press ⏎ to retry";
const CANCEL_HINT: &str = "press ⏎ to cancel";

impl Overlay {
    pub fn reconnecting(attempt: u32, max_attempts: u32) -> Self {
        Self {
            kind: OverlayKind::Reconnecting {
                attempt,
                max_attempts,
            },
            title: "RECONNECTING".into(),
            body: format!("connection lost, attempt {attempt} of {max_attempts}"),
            retry_hint: Some(CANCEL_HINT),
        }
    }

    pub fn disconnected(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            body: format!("session disconnected: {reason}"),
            kind: OverlayKind::Disconnected { reason },
            title: "DISCONNECTED".into(),
            retry_hint: Some(RETRY_HINT),
        }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            body: format!("server reported an error: {reason}"),
            kind: OverlayKind::Error { reason },
            title: "ERROR".into(),
            retry_hint: Some(RETRY_HINT),
        }
    }

    pub fn max_reconnects(max_attempts: u32) -> Self {
        Self {
            kind: OverlayKind::MaxReconnects { max_attempts },
            title: "MAX RECONNECTS".into(),
            body: format!("gave up after {max_attempts} reconnect attempts"),
            retry_hint: Some(RETRY_HINT),
        }
    }

    /// Renders the overlay as a bordered box, one line per row, CRLF-terminated
    /// so it lands correctly on a raw-mode terminal.
    pub fn render(&self) -> String {
        let mut rows = vec![self.title.as_str(), "", self.body.as_str()];
        if let Some(hint) = self.retry_hint {
            rows.push("");
            rows.push(hint);
        }
        let width = rows
            .iter()
            .map(|row| row.chars().count())
            .max()
            .unwrap_or(0);

        let mut out = String::new();
        out.push_str("\r\n┌");
        out.push_str(&"─".repeat(width + 2));
        out.push_str("┐\r\n");
        for row in rows {
            let pad = width - row.chars().count();
            out.push_str("│ ");
            out.push_str(row);
            out.push_str(&" ".repeat(pad));
            out.push_str(" │\r\n");
        }
        out.push('└');
        out.push_str(&"─".repeat(width + 2));
        out.push_str("┘\r\n");
        out
    }
}
