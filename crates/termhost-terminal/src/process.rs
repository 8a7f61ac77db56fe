//! Process inspection and signalling.
//!
//! [`ProcessController`] is the seam the kill escalation logic talks to, so
//! tests can script process liveness without real children.

use std::io;
use std::os::fd::RawFd;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::PtyError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    Hup,
    Int,
    Term,
    Kill,
}

impl Signal {
    pub fn as_raw(&self) -> libc::c_int {
        match self {
            Signal::Hup => libc::SIGHUP,
            Signal::Int => libc::SIGINT,
            Signal::Term => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
        }
    }

    /// Accepts `SIGTERM`, `TERM`, `term` and the like.
    pub fn from_name(name: &str) -> Option<Self> {
        let upper = name.trim().to_ascii_uppercase();
        match upper.strip_prefix("SIG").unwrap_or(&upper) {
            "HUP" => Some(Signal::Hup),
            "INT" => Some(Signal::Int),
            "TERM" => Some(Signal::Term),
            "KILL" => Some(Signal::Kill),
            _ => None,
        }
    }

    pub fn from_number(number: i64) -> Option<Self> {
        match number {
            1 => Some(Signal::Hup),
            2 => Some(Signal::Int),
            15 => Some(Signal::Term),
            9 => Some(Signal::Kill),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Running,
    NotFound,
    NoPermission,
}

impl ProcessStatus {
    /// A process we may not signal still exists.
    pub fn is_alive(&self) -> bool {
        matches!(self, ProcessStatus::Running | ProcessStatus::NoPermission)
    }
}

pub trait ProcessController: Send + Sync {
    fn check_process(&self, pid: u32) -> Result<ProcessStatus, io::Error>;

    fn send_signal(&self, pid: u32, signal: Signal) -> Result<(), io::Error>;
}

/// Signals through `kill(2)`. When the target leads its own process group the
/// whole group is signalled so children of the shell go down with it.
pub struct UnixProcessController;

impl ProcessController for UnixProcessController {
    fn check_process(&self, pid: u32) -> Result<ProcessStatus, io::Error> {
        let pid_t = to_pid_t(pid)?;

        let result = unsafe { libc::kill(pid_t, 0) };
        if result == 0 {
            return Ok(ProcessStatus::Running);
        }

        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::ESRCH) => Ok(ProcessStatus::NotFound),
            Some(libc::EPERM) => Ok(ProcessStatus::NoPermission),
            _ => Err(err),
        }
    }

    fn send_signal(&self, pid: u32, signal: Signal) -> Result<(), io::Error> {
        let pid_t = to_pid_t(pid)?;
        let sig = signal.as_raw();

        if process_group_of(pid) == Some(pid_t) {
            let result = unsafe { libc::kill(-pid_t, sig) };
            if result == 0 {
                return Ok(());
            }
            debug!(pid, error = %io::Error::last_os_error(), "Group signal failed, signalling pid");
        }

        let result = unsafe { libc::kill(pid_t, sig) };
        if result == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
}

fn to_pid_t(pid: u32) -> Result<libc::pid_t, io::Error> {
    pid.try_into()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "PID out of range"))
}

pub fn is_process_running(pid: u32) -> bool {
    UnixProcessController
        .check_process(pid)
        .map(|status| status.is_alive())
        .unwrap_or(false)
}

pub fn process_group_of(pid: u32) -> Option<libc::pid_t> {
    let pid_t = to_pid_t(pid).ok()?;
    let pgid = unsafe { libc::getpgid(pid_t) };
    (pgid >= 0).then_some(pgid)
}

/// Foreground process group of the terminal behind `fd`.
pub fn foreground_process_group(fd: RawFd) -> Option<libc::pid_t> {
    let pgid = unsafe { libc::tcgetpgrp(fd) };
    (pgid > 0).then_some(pgid)
}

/// `(cols, rows)` of the terminal behind `fd`, if it is one.
pub fn terminal_size(fd: RawFd) -> Option<(u16, u16)> {
    let mut size = libc::winsize {
        ws_row: 0,
        ws_col: 0,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    let rc = unsafe { libc::ioctl(fd, libc::TIOCGWINSZ, &mut size) };
    (rc == 0 && size.ws_col > 0 && size.ws_row > 0).then_some((size.ws_col, size.ws_row))
}

/// Full command line of `pid` as reported by `ps`.
pub fn command_line(pid: libc::pid_t) -> Option<String> {
    let output = Command::new("ps")
        .args(["-o", "command=", "-p", &pid.to_string()])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let line = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!line.is_empty()).then_some(line)
}

/// The user's login shell, falling back to common locations.
pub fn user_shell() -> String {
    if let Ok(shell) = std::env::var("SHELL") {
        if !shell.is_empty() {
            return shell;
        }
    }
    ["/bin/zsh", "/bin/bash", "/bin/sh"]
        .into_iter()
        .find(|candidate| Path::new(candidate).exists())
        .unwrap_or("/bin/sh")
        .to_string()
}

/// Locates `program` the way a shell would, classifying the failure.
/// Programs containing a `/` are resolved against `cwd`, the directory the
/// child will start in.
pub fn resolve_command(
    program: &str,
    path_var: Option<&str>,
    cwd: &Path,
) -> Result<PathBuf, PtyError> {
    let not_found = || PtyError::CommandNotFound {
        command: program.to_string(),
    };

    if program.is_empty() {
        return Err(not_found());
    }

    if program.contains('/') {
        let path = cwd.join(program);
        if !path.exists() {
            return Err(not_found());
        }
        return if is_executable(&path) {
            Ok(path)
        } else {
            Err(PtyError::NotExecutable {
                command: program.to_string(),
            })
        };
    }

    let search = path_var.unwrap_or("/usr/local/bin:/usr/bin:/bin");
    let mut found_non_executable = false;
    for dir in search.split(':').filter(|d| !d.is_empty()) {
        let candidate = Path::new(dir).join(program);
        if candidate.is_file() {
            if is_executable(&candidate) {
                return Ok(candidate);
            }
            found_non_executable = true;
        }
    }

    if found_non_executable {
        Err(PtyError::NotExecutable {
            command: program.to_string(),
        })
    } else {
        Err(not_found())
    }
}

fn is_executable(path: &Path) -> bool {
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::fd::AsRawFd;

    #[test]
    fn test_signal_parsing() {
        assert_eq!(Signal::from_name("SIGTERM"), Some(Signal::Term));
        assert_eq!(Signal::from_name("kill"), Some(Signal::Kill));
        assert_eq!(Signal::from_name("SIGUSR1"), None);
        assert_eq!(Signal::from_number(9), Some(Signal::Kill));
        assert_eq!(Signal::from_number(15), Some(Signal::Term));
        assert_eq!(Signal::from_number(42), None);
    }

    #[test]
    fn test_check_current_process() {
        let status = UnixProcessController
            .check_process(std::process::id())
            .unwrap();
        assert_eq!(status, ProcessStatus::Running);
        assert!(is_process_running(std::process::id()));
    }

    #[test]
    fn test_missing_process_is_not_running() {
        assert!(!is_process_running(999_999_999));
    }

    #[test]
    fn test_process_group_of_self() {
        assert!(process_group_of(std::process::id()).is_some());
    }

    #[test]
    fn test_resolve_command_on_path() {
        let resolved = resolve_command("sh", Some("/usr/bin:/bin"), Path::new("/")).unwrap();
        assert!(resolved.ends_with("sh"));
    }

    #[test]
    fn test_resolve_command_not_found() {
        let err = resolve_command("definitely-not-a-command-xyz", Some("/usr/bin:/bin"), Path::new("/"))
            .unwrap_err();
        assert!(matches!(err, PtyError::CommandNotFound { .. }));
    }

    #[test]
    fn test_resolve_command_not_executable() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("script.sh");
        fs::write(&script, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o644)).unwrap();

        let err = resolve_command(script.to_str().unwrap(), None, Path::new("/")).unwrap_err();
        assert!(matches!(err, PtyError::NotExecutable { .. }));

        let path_var = dir.path().to_str().unwrap();
        let err = resolve_command("script.sh", Some(path_var), Path::new("/")).unwrap_err();
        assert!(matches!(err, PtyError::NotExecutable { .. }));
    }

    #[test]
    fn test_resolve_relative_command_against_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("run.sh");
        fs::write(&script, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

        let resolved = resolve_command("./run.sh", None, dir.path()).unwrap();
        assert_eq!(resolved, dir.path().join("./run.sh"));

        let elsewhere = tempfile::tempdir().unwrap();
        let err = resolve_command("./run.sh", None, elsewhere.path()).unwrap_err();
        assert!(matches!(err, PtyError::CommandNotFound { .. }));
    }

    #[test]
    fn test_terminal_size_of_non_terminal() {
        let file = tempfile::tempfile().unwrap();
        assert_eq!(terminal_size(file.as_raw_fd()), None);
    }

    #[test]
    fn test_user_shell_is_never_empty() {
        assert!(!user_shell().is_empty());
    }
}
