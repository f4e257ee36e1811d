//! CLI module
//!
//! Provides:
//! - Argument parsing (`simulate`, `validate`)
//! - Command dispatch through the run lifecycle service
//! - Deterministic exit codes

pub mod args;
pub mod dispatch;

pub use args::{Cli, Command, PlanArgs};
pub use dispatch::{load_plan, render_report, run_cli, ExitCode};

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("Configuration error: {0:#}")]
    Config(#[from] anyhow::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Exit codes (deterministic)
pub const EXIT_PASS: i32 = 0;
pub const EXIT_FAIL: i32 = 1;
pub const EXIT_ERROR: i32 = 2;

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, Error>;
