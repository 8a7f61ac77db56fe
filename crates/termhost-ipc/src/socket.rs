use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use crate::error::SocketPathTooLong;

/// `sun_path` holds 104 bytes on macOS including the terminating NUL.
pub const MAX_SOCKET_PATH_LEN: usize = 103;

pub const SOCKET_FILE_NAME: &str = "ipc.sock";

pub fn socket_path_for(session_dir: &Path) -> PathBuf {
    session_dir.join(SOCKET_FILE_NAME)
}

/// Rejects paths the kernel would silently truncate.
pub fn validate_socket_path(path: &Path) -> Result<(), SocketPathTooLong> {
    let len = path.as_os_str().as_bytes().len();
    if len > MAX_SOCKET_PATH_LEN {
        return Err(SocketPathTooLong {
            path: path.display().to_string(),
            len,
            max: MAX_SOCKET_PATH_LEN,
        });
    }
    Ok(())
}
