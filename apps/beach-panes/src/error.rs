use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection {0} is not open")]
    NotOpen(u64),
    #[error("connection {0} was detached")]
    Detached(u64),
    #[error("send queue closed")]
    QueueClosed,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("session server url cannot be empty")]
    EmptyUrl,
    #[error("invalid session server url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read state file {path:?}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to write state file {path:?}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("state file {path:?} is not valid json: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("no platform data directory available")]
    NoDataDir,
}

#[derive(Debug, Error)]
pub enum PaneError {
    #[error("no secondary pane is open")]
    NotSplit,
    #[error(transparent)]
    Config(#[from] ConfigError),
}
