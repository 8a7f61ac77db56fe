#![deny(clippy::all)]

mod config;
pub mod controller;
mod error;
mod host;
pub mod naming;
pub mod recorder;
mod session;
mod signal_handler;
pub mod sleeper;
mod store;

pub use config::DaemonConfig;
pub use controller::Input;
pub use controller::KillOutcome;
pub use controller::OutputSink;
pub use controller::ResizeSource;
pub use controller::SessionController;
pub use controller::SessionOptions;
pub use controller::StdoutSink;
pub use error::DaemonError;
pub use error::RecorderError;
pub use error::SessionError;
pub use host::CreatedSession;
pub use host::SessionHost;
pub use recorder::AsciinemaHeader;
pub use recorder::AsciinemaWriter;
pub use session::ActivitySnapshot;
pub use session::SessionId;
pub use session::SessionInfo;
pub use session::SessionStatus;
pub use signal_handler::SignalHandler;
pub use store::FsSessionStore;
pub use store::SessionStore;

pub type Result<T> = std::result::Result<T, SessionError>;
