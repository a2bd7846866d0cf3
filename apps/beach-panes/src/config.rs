use url::Url;

use crate::backoff::BackoffPolicy;
use crate::error::ConfigError;

pub const DEFAULT_SERVER: &str = "127.0.0.1:8080";
pub const DEFAULT_PTY_BUFFER_LIMIT: usize = 64 * 1024;
pub const DEFAULT_NAMESPACE: &str = "beach-panes";

/// What it takes for a pane to be reported `connected`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReadinessPolicy {
    /// Only an interactive shell prompt in the PTY stream counts.
    #[default]
    Prompt,
    /// A `status:connected` envelope also counts. For servers that run a
    /// command which never prints a shell prompt.
    PromptOrServerStatus,
}

#[derive(Clone, Debug)]
pub struct TerminalConfig {
    /// Server address; the scheme is inferred when missing.
    pub server: String,
    /// Optional path suffix such as `/ws/terminal`.
    pub path: Option<String>,
    pub api_key: Option<String>,
    pub access_token: Option<String>,
    /// Persist session ids and split layout so a restart resumes them.
    pub resume_on_reload: bool,
    pub readiness: ReadinessPolicy,
    pub backoff: BackoffPolicy,
    pub pty_buffer_limit: usize,
    pub storage_namespace: String,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            server: DEFAULT_SERVER.to_string(),
            path: None,
            api_key: None,
            access_token: None,
            resume_on_reload: false,
            readiness: ReadinessPolicy::default(),
            backoff: BackoffPolicy::default(),
            pty_buffer_limit: DEFAULT_PTY_BUFFER_LIMIT,
            storage_namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }
}

impl TerminalConfig {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            ..Self::default()
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_resume_on_reload(mut self, resume: bool) -> Self {
        self.resume_on_reload = resume;
        self
    }

    pub fn with_readiness(mut self, readiness: ReadinessPolicy) -> Self {
        self.readiness = readiness;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_storage_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.storage_namespace = namespace.into();
        self
    }

    /// Build the full WebSocket URL.
    pub fn websocket_url(&self) -> Result<String, ConfigError> {
        let mut url = self.server.trim().to_string();
        if url.is_empty() {
            return Err(ConfigError::EmptyUrl);
        }

        if let Some(rest) = url.strip_prefix("https://") {
            url = format!("wss://{rest}");
        } else if let Some(rest) = url.strip_prefix("http://") {
            url = format!("ws://{rest}");
        } else if !url.starts_with("ws://") && !url.starts_with("wss://") {
            url = if is_local(&url) {
                format!("ws://{url}")
            } else {
                format!("wss://{url}")
            };
        }

        // Normalize localhost to avoid IPv6 issues
        if url.contains("://localhost") {
            url = url.replacen("://localhost", "://127.0.0.1", 1);
        }

        if let Some(path) = self.path.as_deref() {
            if !url.ends_with('/') && !path.starts_with('/') {
                url.push('/');
            }
            url.push_str(path);
        }

        Url::parse(&url).map_err(|err| ConfigError::InvalidUrl {
            url: url.clone(),
            reason: err.to_string(),
        })?;
        Ok(url)
    }
}

fn is_local(address: &str) -> bool {
    address.starts_with("localhost") || address.starts_with("127.0.0.1")
}
