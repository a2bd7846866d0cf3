//! Classification of inbound text frames and the JSON envelopes exchanged with
//! the terminal server.
//!
//! Every inbound message is one of three things: raw PTY output, a control
//! envelope (`{"type": ...}`), or stream-multiplexing metadata that the remote
//! leaks while attaching to the container's stdio. The last kind may be split
//! across messages and is never rendered.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;

const METADATA_KEYS: &[&str] = &["stream", "stdin", "stdout", "stderr", "hijack"];
const MAX_PENDING_FRAGMENT: usize = 4 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    Connecting,
    Connected,
    Disconnected,
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlEnvelope {
    Hello {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    Status {
        payload: ServerStatus,
        #[serde(default)]
        reason: Option<String>,
    },
    #[serde(skip)]
    Unknown { kind: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    PtyData(String),
    Control(ControlEnvelope),
    Suppressed,
}

/// First message sent on every new socket.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl AuthPayload {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename = "resize")]
pub struct ResizeRequest {
    pub cols: u16,
    pub rows: u16,
}

impl ResizeRequest {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Per-connection classifier. Holds at most one pending metadata fragment.
#[derive(Debug, Default)]
pub struct FrameClassifier {
    pending: Option<String>,
}

impl FrameClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_pending_fragment(&self) -> bool {
        self.pending.is_some()
    }

    /// Forgets any half-seen metadata; called when a new socket is opened.
    pub fn reset(&mut self) {
        self.pending = None;
    }

    pub fn classify(&mut self, text: &str) -> Frame {
        if let Some(mut pending) = self.pending.take() {
            if let Some(end) = metadata_tail_len(text) {
                pending.push_str(&text[..end]);
                trace!(
                    target: "beach_panes::frame",
                    bytes = pending.len(),
                    "discarded reassembled stream metadata"
                );
                return self.classify_rest(&text[end..]);
            }
            if is_metadata_middle(text) && pending.len() + text.len() <= MAX_PENDING_FRAGMENT {
                pending.push_str(text);
                self.pending = Some(pending);
                return Frame::Suppressed;
            }
            trace!(
                target: "beach_panes::frame",
                bytes = pending.len(),
                "dropping unterminated metadata fragment"
            );
        }

        if is_metadata_head(text) {
            self.pending = Some(text.to_string());
            return Frame::Suppressed;
        }

        if let Some(end) = leading_metadata_len(text) {
            trace!(target: "beach_panes::frame", bytes = end, "discarded stream metadata");
            return self.classify_rest(&text[end..]);
        }

        let trimmed = text.trim();
        if trimmed.starts_with('{') && trimmed.ends_with('}') {
            if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(trimmed) {
                if let Some(kind) = map.get("type").and_then(Value::as_str) {
                    let kind = kind.to_string();
                    return Frame::Control(
                        serde_json::from_value(Value::Object(map))
                            .unwrap_or(ControlEnvelope::Unknown { kind }),
                    );
                }
            }
        }

        Frame::PtyData(text.to_string())
    }

    /// Output that shared a message with the metadata it followed.
    fn classify_rest(&mut self, rest: &str) -> Frame {
        if rest.trim().is_empty() {
            Frame::Suppressed
        } else {
            self.classify(rest)
        }
    }
}

/// `{"stream":true,"std`: an object that is opened but never closed and whose
/// first key is (a prefix of) a metadata key.
fn is_metadata_head(text: &str) -> bool {
    let trimmed = text.trim_start();
    let Some(body) = trimmed.strip_prefix('{') else {
        return false;
    };
    if body.contains('}') || body.len() > MAX_PENDING_FRAGMENT {
        return false;
    }
    let Some(key) = body.trim_start().strip_prefix('"') else {
        return false;
    };
    match key.find('"') {
        Some(end) => METADATA_KEYS.contains(&&key[..end]),
        None => !key.is_empty() && METADATA_KEYS.iter().any(|known| known.starts_with(key)),
    }
}

/// Length of a closing half such as `in":true,"stdout":true,"hijack":true}`,
/// up to and including the `}` after `hijack`.
fn metadata_tail_len(text: &str) -> Option<usize> {
    let hijack = text.find("hijack")?;
    let close = hijack + text[hijack..].find('}')?;
    if text[..close].contains('{') {
        return None;
    }
    Some(close + 1)
}

/// Length of a complete metadata object at the start of `text`, whatever
/// follows it.
fn leading_metadata_len(text: &str) -> Option<usize> {
    let start = text.len() - text.trim_start().len();
    let body = &text[start..];
    if !body.starts_with('{') {
        return None;
    }
    let mut values = serde_json::Deserializer::from_str(body).into_iter::<Value>();
    let Some(Ok(Value::Object(map))) = values.next() else {
        return None;
    };
    if map.contains_key("type") || !map.keys().any(|key| METADATA_KEYS.contains(&key.as_str())) {
        return None;
    }
    Some(start + values.byte_offset())
}

fn is_metadata_middle(text: &str) -> bool {
    !text.contains('{')
        && !text.contains('}')
        && !text.contains('\n')
        && text.contains("\":")
}
