//! PTY and spawn errors with structured context.
//!
//! Spawn failures keep the command that was attempted so callers can report
//! it verbatim after rolling back a half-created session.

use serde_json::{Value, json};
use termhost_common::error_codes::{self, ErrorCategory};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PtyError {
    #[error("Failed to allocate PTY: {0}")]
    Open(String),
    #[error("Failed to spawn process: {0}")]
    Spawn(String),
    #[error("Command not found: {command}")]
    CommandNotFound { command: String },
    #[error("Command is not executable: {command}")]
    NotExecutable { command: String },
    #[error("Working directory '{cwd}' is not usable for {command}")]
    BadWorkingDirectory { command: String, cwd: String },
    #[error("Failed to write to PTY: {0}")]
    Write(String),
    #[error("Failed to read from PTY: {0}")]
    Read(String),
    #[error("Failed to resize PTY: {0}")]
    Resize(String),
}

impl PtyError {
    pub fn code(&self) -> i32 {
        match self {
            PtyError::CommandNotFound { .. } => error_codes::COMMAND_NOT_FOUND,
            PtyError::NotExecutable { .. } => error_codes::PERMISSION_DENIED,
            PtyError::BadWorkingDirectory { .. } => error_codes::BAD_WORKING_DIRECTORY,
            _ => error_codes::PTY_ERROR,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        error_codes::category_for_code(self.code())
    }

    pub fn context(&self) -> Value {
        match self {
            PtyError::CommandNotFound { command } | PtyError::NotExecutable { command } => {
                json!({ "operation": "spawn", "command": command })
            }
            PtyError::BadWorkingDirectory { command, cwd } => {
                json!({ "operation": "spawn", "command": command, "cwd": cwd })
            }
            other => json!({
                "operation": other.operation(),
                "reason": other.reason()
            }),
        }
    }

    pub fn suggestion(&self) -> String {
        match self {
            PtyError::Open(_) => {
                "PTY allocation failed. Check system resource limits (ulimit -n).".to_string()
            }
            PtyError::Spawn(_) => {
                "Process spawn failed. Check command syntax and permissions.".to_string()
            }
            PtyError::CommandNotFound { .. } => {
                "Check that the command exists and is on PATH.".to_string()
            }
            PtyError::NotExecutable { command } => format!("Run 'chmod +x {}' or pick another command.", command),
            PtyError::BadWorkingDirectory { cwd, .. } => {
                format!("Directory '{}' does not exist or is not a directory.", cwd)
            }
            PtyError::Write(_) | PtyError::Read(_) => {
                "The session may have ended. Run 'termhost list' to check its status.".to_string()
            }
            PtyError::Resize(_) => "Failed to resize terminal. Try again.".to_string(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, PtyError::Read(_) | PtyError::Write(_))
    }

    pub fn is_spawn_failure(&self) -> bool {
        matches!(
            self,
            PtyError::Open(_)
                | PtyError::Spawn(_)
                | PtyError::CommandNotFound { .. }
                | PtyError::NotExecutable { .. }
                | PtyError::BadWorkingDirectory { .. }
        )
    }

    pub fn operation(&self) -> &'static str {
        match self {
            PtyError::Open(_) => "open",
            PtyError::Spawn(_)
            | PtyError::CommandNotFound { .. }
            | PtyError::NotExecutable { .. }
            | PtyError::BadWorkingDirectory { .. } => "spawn",
            PtyError::Write(_) => "write",
            PtyError::Read(_) => "read",
            PtyError::Resize(_) => "resize",
        }
    }

    pub fn reason(&self) -> String {
        match self {
            PtyError::Open(r)
            | PtyError::Spawn(r)
            | PtyError::Write(r)
            | PtyError::Read(r)
            | PtyError::Resize(r) => r.clone(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pty_error_codes() {
        assert_eq!(PtyError::Open("x".into()).code(), error_codes::PTY_ERROR);
        assert_eq!(
            PtyError::CommandNotFound {
                command: "nope".into()
            }
            .code(),
            error_codes::COMMAND_NOT_FOUND
        );
        assert_eq!(
            PtyError::NotExecutable {
                command: "/etc/hosts".into()
            }
            .category(),
            ErrorCategory::External
        );
    }

    #[test]
    fn test_spawn_context_keeps_command() {
        let err = PtyError::BadWorkingDirectory {
            command: "bash -l".into(),
            cwd: "/missing".into(),
        };
        let ctx = err.context();
        assert_eq!(ctx["command"], "bash -l");
        assert_eq!(ctx["cwd"], "/missing");
        assert_eq!(err.category(), ErrorCategory::InvalidInput);
        assert!(err.suggestion().contains("/missing"));
    }

    #[test]
    fn test_pty_error_context() {
        let ctx = PtyError::Write("broken pipe".into()).context();
        assert_eq!(ctx["operation"], "write");
        assert_eq!(ctx["reason"], "broken pipe");
    }

    #[test]
    fn test_pty_error_is_retryable() {
        assert!(PtyError::Read("timeout".into()).is_retryable());
        assert!(!PtyError::Open("failed".into()).is_retryable());
        assert!(
            !PtyError::CommandNotFound {
                command: "x".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_is_spawn_failure() {
        assert!(PtyError::Open("x".into()).is_spawn_failure());
        assert!(!PtyError::Resize("x".into()).is_spawn_failure());
    }
}
