//! Log setup for the `beach-panes` binary.
//!
//! The interactive client owns the terminal in raw mode, so logs either go to a
//! file or to stderr with line endings fixed up for a raw TTY. Only this
//! crate's events follow `--log-level` all the way down; the websocket and I/O
//! stack underneath is held at `warn` unless `BEACH_PANES_LOG_DEPS` is set.

use clap::ValueEnum;
use std::fs::OpenOptions;
use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

const FILTER_ENV: &str = "BEACH_PANES_LOG_FILTER";
const DEPS_ENV: &str = "BEACH_PANES_LOG_DEPS";

/// Targets the client pulls in through the websocket transport and tokio's
/// reactor. They log per frame at debug/trace.
const DEPENDENCY_TARGETS: &[&str] = &["tokio_tungstenite", "tungstenite", "mio"];

#[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct LogConfig {
    pub level: LogLevel,
    /// Stderr when unset.
    pub file: Option<PathBuf>,
}

#[derive(thiserror::Error, Debug)]
pub enum InitError {
    #[error("failed to open log file {path:?}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("invalid BEACH_PANES_LOG_FILTER: {0}")]
    Filter(String),
    #[error("a global logger is already installed: {0}")]
    AlreadySet(String),
}

static GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Installs the global subscriber. Later calls are no-ops.
pub fn init(config: &LogConfig) -> Result<(), InitError> {
    if GUARD.get().is_some() {
        return Ok(());
    }

    let include_deps = std::env::var(DEPS_ENV).is_ok_and(|value| value != "0" && !value.is_empty());
    let filter = match std::env::var(FILTER_ENV) {
        Ok(custom) => EnvFilter::try_new(&custom).map_err(|err| InitError::Filter(err.to_string()))?,
        Err(_) => EnvFilter::new(filter_directives(config.level, include_deps)),
    };

    let (writer, guard, ansi) = match &config.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| InitError::Io {
                    path: path.clone(),
                    source,
                })?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            (writer, guard, false)
        }
        None => {
            let ansi = io::stderr().is_terminal();
            let (writer, guard) = tracing_appender::non_blocking(RawTtyWriter(io::stderr()));
            (writer, guard, ansi)
        }
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.level >= LogLevel::Debug)
        .with_ansi(ansi)
        .with_writer(writer)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|err| InitError::AlreadySet(err.to_string()))?;

    let _ = GUARD.set(guard);
    tracing::debug!(
        target: "beach_panes::telemetry",
        level = config.level.directive(),
        file = ?config.file,
        include_deps,
        "logging initialised"
    );
    Ok(())
}

/// The crate at `level`, other crates at most `info`, the transport stack at
/// most `warn`.
fn filter_directives(level: LogLevel, include_deps: bool) -> String {
    let own = level.directive();
    if include_deps {
        return own.to_string();
    }
    let rest = level.min(LogLevel::Info).directive();
    let deps = level.min(LogLevel::Warn).directive();
    let mut directives = format!("{rest},beach_panes={own}");
    for target in DEPENDENCY_TARGETS {
        directives.push_str(&format!(",{target}={deps}"));
    }
    directives
}

/// Turns bare `\n` into `\r\n` so log lines start at column zero while the
/// terminal is in raw mode.
struct RawTtyWriter<W>(W);

impl<W: Write> Write for RawTtyWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut start = 0;
        for (index, byte) in buf.iter().enumerate() {
            if *byte == b'\n' && (index == 0 || buf[index - 1] != b'\r') {
                self.0.write_all(&buf[start..index])?;
                self.0.write_all(b"\r\n")?;
                start = index + 1;
            }
        }
        self.0.write_all(&buf[start..])?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_level_is_independent_of_dependencies() {
        assert_eq!(
            filter_directives(LogLevel::Debug, false),
            "info,beach_panes=debug,tokio_tungstenite=warn,tungstenite=warn,mio=warn"
        );
        assert_eq!(
            filter_directives(LogLevel::Error, false),
            "error,beach_panes=error,tokio_tungstenite=error,tungstenite=error,mio=error"
        );
    }

    #[test]
    fn dependency_logs_follow_level_when_requested() {
        assert_eq!(filter_directives(LogLevel::Trace, true), "trace");
    }

    #[test]
    fn every_directive_set_parses() {
        for level in LogLevel::value_variants() {
            for include_deps in [false, true] {
                assert!(EnvFilter::try_new(filter_directives(*level, include_deps)).is_ok());
            }
        }
    }

    #[test]
    fn raw_tty_writer_adds_carriage_returns() {
        let mut writer = RawTtyWriter(Vec::new());
        writer.write_all(b"first\nsecond\r\nthird\n").unwrap();
        assert_eq!(writer.0, b"first\r\nsecond\r\nthird\r\n");
    }
}
