#![deny(clippy::all)]

pub mod chunker;
pub mod error;
mod keys;
pub mod process;
mod pty;
pub mod title;

pub use chunker::flush_lossy;
pub use chunker::process_chunk;
pub use error::PtyError;
pub use keys::SpecialKey;
pub use keys::key_to_escape_sequence;
pub use process::ProcessController;
pub use process::ProcessStatus;
pub use process::Signal;
pub use process::UnixProcessController;
pub use pty::PtyChild;
pub use pty::PtyHandle;
pub use pty::PtyReader;
pub use pty::SpawnOptions;
pub use title::TitleMode;
pub use title::TitleSequenceFilter;

pub type Result<T> = std::result::Result<T, PtyError>;
