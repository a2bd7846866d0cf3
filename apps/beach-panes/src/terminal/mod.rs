//! The `beach-panes` command-line client.

pub mod app;
pub mod cli;
pub mod error;
pub mod tty;

pub use app::run;
pub use cli::Cli;
pub use error::CliError;
