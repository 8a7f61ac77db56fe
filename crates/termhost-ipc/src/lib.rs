#![deny(clippy::all)]

mod client;
mod error;
pub mod protocol;
mod socket;
mod types;

pub use termhost_common::error_codes;

pub use client::SocketClient;
pub use error::ClientError;
pub use error::ProtocolError;
pub use error::SocketPathTooLong;
pub use protocol::MessageParser;
pub use protocol::MessageType;
pub use protocol::RawFrame;
pub use protocol::frame_message;
pub use socket::MAX_SOCKET_PATH_LEN;
pub use socket::SOCKET_FILE_NAME;
pub use socket::socket_path_for;
pub use socket::validate_socket_path;
pub use types::ControlCommand;
pub use types::ErrorMessage;
pub use types::KillSignal;
pub use types::Message;
pub use types::StatusUpdate;

pub type Result<T> = std::result::Result<T, ClientError>;
