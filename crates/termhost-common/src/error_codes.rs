//! Numeric error codes shared by every termhost crate.
//!
//! Codes sit in the JSON-RPC server range (-32000 to -32099) so they can be
//! forwarded to a gateway unchanged.

// Session-related errors
pub const SESSION_NOT_FOUND: i32 = -32001;
pub const INVALID_SESSION_ID: i32 = -32002;

// Input/operation errors
pub const INVALID_KEY: i32 = -32005;
pub const PTY_ERROR: i32 = -32008;

// Recording errors
pub const RECORDING_ERROR: i32 = -32009;
pub const POSITION_MISMATCH: i32 = -32010;

// IPC errors
pub const PROTOCOL_ERROR: i32 = -32011;
pub const SOCKET_PATH_TOO_LONG: i32 = -32012;
pub const CONNECTION_FAILED: i32 = -32013;

// Process errors
pub const COMMAND_NOT_FOUND: i32 = -32014;
pub const PERMISSION_DENIED: i32 = -32015;
pub const BAD_WORKING_DIRECTORY: i32 = -32018;

// Host errors
pub const DAEMON_ERROR: i32 = -32016;
pub const PERSISTENCE_ERROR: i32 = -32017;

pub const GENERIC_ERROR: i32 = -32000;

/// Error category for programmatic handling by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Resource not found (session, command)
    NotFound,
    /// Invalid input parameters
    InvalidInput,
    /// Resource busy or temporarily unavailable
    Busy,
    /// Internal invariant violated
    Internal,
    /// External dependency failure (PTY, process, filesystem)
    External,
    /// Operation timed out
    Timeout,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::NotFound => "not_found",
            ErrorCategory::InvalidInput => "invalid_input",
            ErrorCategory::Busy => "busy",
            ErrorCategory::Internal => "internal",
            ErrorCategory::External => "external",
            ErrorCategory::Timeout => "timeout",
        }
    }
}

impl std::str::FromStr for ErrorCategory {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_found" => Ok(ErrorCategory::NotFound),
            "invalid_input" => Ok(ErrorCategory::InvalidInput),
            "busy" => Ok(ErrorCategory::Busy),
            "internal" => Ok(ErrorCategory::Internal),
            "external" => Ok(ErrorCategory::External),
            "timeout" => Ok(ErrorCategory::Timeout),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Transient conditions that may succeed on retry.
pub fn is_retryable(code: i32) -> bool {
    matches!(code, CONNECTION_FAILED | GENERIC_ERROR)
}

pub fn category_for_code(code: i32) -> ErrorCategory {
    match code {
        SESSION_NOT_FOUND | COMMAND_NOT_FOUND => ErrorCategory::NotFound,
        INVALID_SESSION_ID | INVALID_KEY | SOCKET_PATH_TOO_LONG | BAD_WORKING_DIRECTORY => {
            ErrorCategory::InvalidInput
        }
        CONNECTION_FAILED => ErrorCategory::Busy,
        POSITION_MISMATCH | PROTOCOL_ERROR => ErrorCategory::Internal,
        PTY_ERROR | RECORDING_ERROR | PERMISSION_DENIED | DAEMON_ERROR | PERSISTENCE_ERROR => {
            ErrorCategory::External
        }
        _ => ErrorCategory::Internal,
    }
}
