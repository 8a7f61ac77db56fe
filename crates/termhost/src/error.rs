//! CLI errors mapped onto sysexits-style process exit codes.

use serde_json::{Value, json};
use termhost_common::error_codes::{self, ErrorCategory};
use termhost_daemon::{DaemonError, SessionError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Daemon(#[from] DaemonError),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Failed to start async runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

impl CliError {
    pub fn code(&self) -> i32 {
        match self {
            CliError::Session(e) => e.code(),
            CliError::Daemon(e) => e.code(),
            CliError::InvalidArgument(_) => error_codes::GENERIC_ERROR,
            CliError::Runtime(_) => error_codes::DAEMON_ERROR,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            CliError::Session(e) => e.category(),
            CliError::Daemon(e) => e.category(),
            CliError::InvalidArgument(_) => ErrorCategory::InvalidInput,
            CliError::Runtime(_) => ErrorCategory::Internal,
        }
    }

    pub fn context(&self) -> Value {
        match self {
            CliError::Session(e) => e.context(),
            CliError::Daemon(e) => e.context(),
            CliError::InvalidArgument(reason) => json!({ "reason": reason }),
            CliError::Runtime(e) => json!({ "operation": "runtime", "reason": e.to_string() }),
        }
    }

    pub fn suggestion(&self) -> Option<String> {
        match self {
            CliError::Session(e) => Some(e.suggestion()),
            CliError::Daemon(e) => Some(e.suggestion()),
            CliError::InvalidArgument(_) => Some("Run 'termhost --help' for usage.".to_string()),
            CliError::Runtime(_) => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            CliError::Session(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Exit codes follow sysexits.h.
    pub fn exit_code(&self) -> i32 {
        match self.category() {
            ErrorCategory::InvalidInput => 64,
            ErrorCategory::NotFound => 69,
            ErrorCategory::Busy => 73,
            ErrorCategory::External | ErrorCategory::Internal => 74,
            ErrorCategory::Timeout => 75,
        }
    }
}
