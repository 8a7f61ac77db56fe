//! Errors raised by the session host, its controllers and recorders.
//!
//! Every variant maps to a numeric code from `termhost_common::error_codes`
//! and carries structured context so front-ends can report it without
//! string matching.

use serde_json::{Value, json};
use termhost_common::error_codes::{self, ErrorCategory};
use termhost_ipc::{ClientError, SocketPathTooLong};
use termhost_terminal::PtyError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(String),
    #[error("Invalid session id: {0}")]
    InvalidId(String),
    #[error("PTY error: {0}")]
    Pty(#[from] PtyError),
    #[error("Invalid key: {0}")]
    InvalidKey(String),
    #[error("Persistence error during {operation}: {reason}")]
    Persistence { operation: String, reason: String },
    #[error("Recording error: {0}")]
    Recorder(#[from] RecorderError),
    #[error("Session socket error: {0}")]
    Ipc(#[from] ClientError),
    #[error(transparent)]
    SocketPathTooLong(#[from] SocketPathTooLong),
    #[error("Failed to open session socket {path}: {reason}")]
    Endpoint { path: String, reason: String },
    #[error("Failed to signal process {pid}: {reason}")]
    Signal { pid: u32, reason: String },
}

impl SessionError {
    pub fn persistence(operation: &str, err: impl std::fmt::Display) -> Self {
        SessionError::Persistence {
            operation: operation.to_string(),
            reason: err.to_string(),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            SessionError::NotFound(_) => error_codes::SESSION_NOT_FOUND,
            SessionError::InvalidId(_) => error_codes::INVALID_SESSION_ID,
            SessionError::InvalidKey(_) => error_codes::INVALID_KEY,
            SessionError::Pty(e) => e.code(),
            SessionError::Persistence { .. } => error_codes::PERSISTENCE_ERROR,
            SessionError::Recorder(e) => e.code(),
            SessionError::Ipc(e) => e.code(),
            SessionError::SocketPathTooLong(_) => error_codes::SOCKET_PATH_TOO_LONG,
            SessionError::Endpoint { .. } => error_codes::DAEMON_ERROR,
            SessionError::Signal { .. } => error_codes::PTY_ERROR,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        error_codes::category_for_code(self.code())
    }

    pub fn context(&self) -> Value {
        match self {
            SessionError::NotFound(id) | SessionError::InvalidId(id) => {
                json!({ "session_id": id })
            }
            SessionError::InvalidKey(key) => json!({ "key": key }),
            SessionError::Pty(e) => e.context(),
            SessionError::Persistence { operation, reason } => {
                json!({ "operation": operation, "reason": reason })
            }
            SessionError::Recorder(e) => e.context(),
            SessionError::Ipc(e) => e.context(),
            SessionError::SocketPathTooLong(e) => {
                json!({ "path": e.path, "len": e.len, "max": e.max })
            }
            SessionError::Endpoint { path, reason } => {
                json!({ "operation": "bind", "path": path, "reason": reason })
            }
            SessionError::Signal { pid, reason } => {
                json!({ "operation": "kill", "pid": pid, "reason": reason })
            }
        }
    }

    pub fn suggestion(&self) -> String {
        match self {
            SessionError::NotFound(_) => {
                "Run 'termhost list' to see known sessions.".to_string()
            }
            SessionError::InvalidId(_) => {
                "Session ids may only contain letters, digits, '-' and '_'.".to_string()
            }
            SessionError::InvalidKey(_) => {
                "Supported keys: arrow_up/down/left/right, escape, enter, ctrl_enter, shift_enter, backspace, tab, shift_tab, page_up/down, home, end, delete, f1-f12.".to_string()
            }
            SessionError::Pty(e) => e.suggestion(),
            SessionError::Persistence { .. } => {
                "Check that the control directory is writable.".to_string()
            }
            SessionError::Recorder(e) => e.suggestion(),
            SessionError::Ipc(e) => e.suggestion(),
            SessionError::SocketPathTooLong(_) => {
                "Use a shorter control directory via TERMHOST_CONTROL_DIR.".to_string()
            }
            SessionError::Endpoint { .. } => {
                "Check that the session directory is writable and not on a network mount."
                    .to_string()
            }
            SessionError::Signal { .. } => {
                "The process may belong to another user. Check 'ps' for its owner.".to_string()
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            SessionError::Pty(e) => e.is_retryable(),
            SessionError::Ipc(e) => e.is_retryable(),
            _ => error_codes::is_retryable(self.code()),
        }
    }
}

/// Failures of the asciinema writer. After `PositionMismatch` or `Failed`
/// the recorder refuses further writes.
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("Recording I/O failed during {operation}: {source}")]
    Io {
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("Recording position mismatch: expected {expected} bytes, file has {actual}")]
    PositionMismatch { expected: u64, actual: u64 },
    #[error("Failed to serialize recording event: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Recording is closed")]
    Closed,
    #[error("Recording failed earlier: {0}")]
    Failed(String),
}

impl RecorderError {
    pub fn io(operation: &'static str, source: std::io::Error) -> Self {
        RecorderError::Io { operation, source }
    }

    pub fn code(&self) -> i32 {
        match self {
            RecorderError::PositionMismatch { .. } => error_codes::POSITION_MISMATCH,
            _ => error_codes::RECORDING_ERROR,
        }
    }

    pub fn context(&self) -> Value {
        match self {
            RecorderError::Io { operation, source } => {
                json!({ "operation": operation, "reason": source.to_string() })
            }
            RecorderError::PositionMismatch { expected, actual } => {
                json!({ "expected": expected, "actual": actual })
            }
            RecorderError::Serialize(e) => json!({ "operation": "serialize", "reason": e.to_string() }),
            RecorderError::Closed => json!({}),
            RecorderError::Failed(reason) => json!({ "reason": reason }),
        }
    }

    pub fn suggestion(&self) -> String {
        match self {
            RecorderError::PositionMismatch { .. } => {
                "The recording was modified externally. Start a new session to record again."
                    .to_string()
            }
            RecorderError::Closed | RecorderError::Failed(_) => {
                "The recording is no longer accepting events.".to_string()
            }
            RecorderError::Io { .. } => "Check free disk space and permissions.".to_string(),
            RecorderError::Serialize(_) => "Event data could not be encoded as JSON.".to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("Failed to setup signal handler: {0}")]
    SignalSetup(String),
    #[error("Failed to prepare control directory {path}: {reason}")]
    ControlDir { path: String, reason: String },
}

impl DaemonError {
    pub fn code(&self) -> i32 {
        error_codes::DAEMON_ERROR
    }

    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::External
    }

    pub fn context(&self) -> Value {
        match self {
            DaemonError::SignalSetup(reason) => {
                json!({ "operation": "signal_setup", "reason": reason })
            }
            DaemonError::ControlDir { path, reason } => {
                json!({ "operation": "control_dir", "path": path, "reason": reason })
            }
        }
    }

    pub fn suggestion(&self) -> String {
        match self {
            DaemonError::SignalSetup(_) => {
                "Signal handler registration failed. Try restarting the process.".to_string()
            }
            DaemonError::ControlDir { .. } => {
                "Set TERMHOST_CONTROL_DIR to a writable directory.".to_string()
            }
        }
    }
}
