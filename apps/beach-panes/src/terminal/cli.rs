use clap::{ArgAction, Args, Parser, ValueEnum, builder::BoolishValueParser};
use std::path::PathBuf;

use crate::backoff::BackoffPolicy;
use crate::config::{DEFAULT_NAMESPACE, DEFAULT_SERVER, ReadinessPolicy, TerminalConfig};
use crate::telemetry::{LogConfig, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "beach-panes",
    about = "Split-pane client for remote terminal sessions over WebSocket",
    author,
    version
)]
pub struct Cli {
    #[arg(
        long,
        env = "BEACH_PANES_SERVER",
        default_value = DEFAULT_SERVER,
        help = "Terminal server address; ws/wss is inferred when no scheme is given"
    )]
    pub server: String,

    #[arg(
        long,
        env = "BEACH_PANES_PATH",
        value_name = "PATH",
        help = "Path of the terminal endpoint, e.g. /ws/terminal"
    )]
    pub path: Option<String>,

    #[arg(
        long = "api-key",
        env = "BEACH_PANES_API_KEY",
        hide_env_values = true,
        help = "API key sent in the auth payload"
    )]
    pub api_key: Option<String>,

    #[arg(
        long = "access-token",
        env = "BEACH_PANES_ACCESS_TOKEN",
        hide_env_values = true,
        help = "Bearer token sent in the auth payload"
    )]
    pub access_token: Option<String>,

    #[arg(
        long,
        env = "BEACH_PANES_RESUME",
        num_args = 0..=1,
        default_value = "true",
        default_missing_value = "true",
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new(),
        value_name = "BOOL",
        help = "Resume persisted sessions and split layout on start"
    )]
    pub resume: bool,

    #[arg(
        long,
        value_enum,
        env = "BEACH_PANES_READINESS",
        default_value_t = ReadinessArg::Prompt,
        help = "What marks a pane connected"
    )]
    pub readiness: ReadinessArg,

    #[arg(
        long = "max-reconnects",
        env = "BEACH_PANES_MAX_RECONNECTS",
        default_value_t = BackoffPolicy::default().max_attempts,
        help = "Automatic reconnect attempts before giving up"
    )]
    pub max_reconnects: u32,

    #[arg(
        long = "state-file",
        env = "BEACH_PANES_STATE_FILE",
        value_name = "PATH",
        help = "Where session ids and layout are persisted (defaults to the platform data dir)"
    )]
    pub state_file: Option<PathBuf>,

    #[arg(
        long,
        env = "BEACH_PANES_NAMESPACE",
        default_value = DEFAULT_NAMESPACE,
        help = "Key prefix in the state file; use one per terminal"
    )]
    pub namespace: String,

    #[arg(long, help = "Open a second pane immediately")]
    pub split: bool,

    #[command(flatten)]
    pub logging: LoggingArgs,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ReadinessArg {
    /// Wait for a shell prompt
    Prompt,
    /// Also accept the server's `connected` status
    Status,
}

impl From<ReadinessArg> for ReadinessPolicy {
    fn from(value: ReadinessArg) -> Self {
        match value {
            ReadinessArg::Prompt => ReadinessPolicy::Prompt,
            ReadinessArg::Status => ReadinessPolicy::PromptOrServerStatus,
        }
    }
}

impl Cli {
    pub fn terminal_config(&self) -> TerminalConfig {
        let mut config = TerminalConfig::new(self.server.clone())
            .with_resume_on_reload(self.resume)
            .with_readiness(self.readiness.into())
            .with_backoff(BackoffPolicy {
                max_attempts: self.max_reconnects,
                ..BackoffPolicy::default()
            })
            .with_storage_namespace(self.namespace.clone());
        config.path = self.path.clone();
        config.api_key = self.api_key.clone();
        config.access_token = self.access_token.clone();
        config
    }
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        env = "BEACH_PANES_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        env = "BEACH_PANES_LOG_FILE",
        help = "Write structured logs to the specified file"
    )]
    pub file: Option<PathBuf>,
}

impl LoggingArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}
