use serde_json::{Value, json};
use termhost_common::error_codes::{self, ErrorCategory};
use thiserror::Error;

/// Framing and payload errors. Any of these ends the offending connection.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Unknown message type: 0x{0:02x}")]
    UnknownMessageType(u8),

    #[error("Payload of {len} bytes exceeds limit of {max} bytes")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("Invalid {kind} payload: {reason}")]
    InvalidPayload { kind: &'static str, reason: String },
}

impl ProtocolError {
    pub fn code(&self) -> i32 {
        error_codes::PROTOCOL_ERROR
    }

    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::Internal
    }
}

#[derive(Error, Debug)]
#[error("Socket path is {len} bytes, limit is {max}: {path}")]
pub struct SocketPathTooLong {
    pub path: String,
    pub len: usize,
    pub max: usize,
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Failed to connect to session socket: {0}")]
    ConnectionFailed(#[from] std::io::Error),

    #[error(transparent)]
    SocketPathTooLong(#[from] SocketPathTooLong),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Connection closed by session")]
    ConnectionClosed,
}

impl ClientError {
    pub fn code(&self) -> i32 {
        match self {
            ClientError::ConnectionFailed(_) | ClientError::ConnectionClosed => {
                error_codes::CONNECTION_FAILED
            }
            ClientError::SocketPathTooLong(_) => error_codes::SOCKET_PATH_TOO_LONG,
            ClientError::Protocol(e) => e.code(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        error_codes::category_for_code(self.code())
    }

    pub fn context(&self) -> Value {
        match self {
            ClientError::ConnectionFailed(e) => json!({ "reason": e.to_string() }),
            ClientError::SocketPathTooLong(e) => {
                json!({ "path": e.path, "len": e.len, "max": e.max })
            }
            ClientError::Protocol(e) => json!({ "reason": e.to_string() }),
            ClientError::ConnectionClosed => json!({}),
        }
    }

    pub fn suggestion(&self) -> String {
        match self {
            ClientError::ConnectionFailed(_) | ClientError::ConnectionClosed => {
                "The owning process may have exited. Run 'termhost list' to refresh.".to_string()
            }
            ClientError::SocketPathTooLong(_) => {
                "Use a shorter control directory via TERMHOST_CONTROL_DIR.".to_string()
            }
            ClientError::Protocol(_) => "Peer sent a malformed frame.".to_string(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        error_codes::is_retryable(self.code())
    }
}
