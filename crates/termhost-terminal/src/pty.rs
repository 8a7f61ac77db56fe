use std::collections::HashMap;
use std::io;
use std::io::Read;
use std::io::Write;
use std::os::fd::RawFd;
use std::path::PathBuf;
use std::sync::Mutex;

use portable_pty::Child;
use portable_pty::ChildKiller;
use portable_pty::CommandBuilder;
use portable_pty::MasterPty;
use portable_pty::PtySize;
use portable_pty::native_pty_system;
use termhost_common::mutex_lock_or_recover;

use crate::error::PtyError;
use crate::process::resolve_command;

#[derive(Debug, Clone)]
pub struct SpawnOptions {
    pub command: Vec<String>,
    pub cwd: PathBuf,
    pub env: HashMap<String, String>,
    pub cols: u16,
    pub rows: u16,
}

impl SpawnOptions {
    pub fn command_line(&self) -> String {
        self.command.join(" ")
    }
}

/// Master side of a spawned PTY. Reading and waiting are split off into
/// [`PtyReader`] and [`PtyChild`] so they can block on their own threads.
pub struct PtyHandle {
    master: Mutex<Box<dyn MasterPty + Send>>,
    writer: Mutex<Box<dyn Write + Send>>,
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
    size: Mutex<PtySize>,
    pid: Option<u32>,
    master_fd: Option<RawFd>,
}

pub struct PtyReader {
    inner: Box<dyn Read + Send>,
}

pub struct PtyChild {
    inner: Box<dyn Child + Send + Sync>,
}

impl PtyHandle {
    pub fn spawn(options: &SpawnOptions) -> Result<(Self, PtyReader, PtyChild), PtyError> {
        let command_line = options.command_line();
        let program = options
            .command
            .first()
            .ok_or_else(|| PtyError::CommandNotFound {
                command: command_line.clone(),
            })?;

        if !options.cwd.is_dir() {
            return Err(PtyError::BadWorkingDirectory {
                command: command_line,
                cwd: options.cwd.display().to_string(),
            });
        }

        let path_var = options
            .env
            .get("PATH")
            .cloned()
            .or_else(|| std::env::var("PATH").ok());
        let resolved = resolve_command(program, path_var.as_deref(), &options.cwd)?;

        let size = PtySize {
            rows: options.rows,
            cols: options.cols,
            pixel_width: 0,
            pixel_height: 0,
        };

        let pair = native_pty_system()
            .openpty(size)
            .map_err(|e| PtyError::Open(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&resolved);
        cmd.args(&options.command[1..]);
        cmd.cwd(&options.cwd);
        for (key, value) in &options.env {
            cmd.env(key, value);
        }
        cmd.env("TERM", "xterm-256color");

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| PtyError::Spawn(format!("{}: {}", command_line, e)))?;
        // The child holds its own copy of the slave; ours would keep EOF from arriving.
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| PtyError::Open(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| PtyError::Open(e.to_string()))?;
        let master_fd = pair.master.as_raw_fd();

        let handle = Self {
            pid: child.process_id(),
            killer: Mutex::new(child.clone_killer()),
            master: Mutex::new(pair.master),
            writer: Mutex::new(writer),
            size: Mutex::new(size),
            master_fd,
        };

        Ok((handle, PtyReader { inner: reader }, PtyChild { inner: child }))
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn master_fd(&self) -> Option<RawFd> {
        self.master_fd
    }

    pub fn size(&self) -> (u16, u16) {
        let size = mutex_lock_or_recover(&self.size);
        (size.cols, size.rows)
    }

    /// Blocking write of the whole buffer.
    pub fn write(&self, data: &[u8]) -> Result<(), PtyError> {
        if data.is_empty() {
            return Ok(());
        }

        let mut writer = mutex_lock_or_recover(&self.writer);
        let mut offset = 0;
        while offset < data.len() {
            match writer.write(&data[offset..]) {
                Ok(0) => {
                    return Err(PtyError::Write(
                        "write returned 0 bytes, PTY closed".to_string(),
                    ));
                }
                Ok(n) => offset += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(PtyError::Write(e.to_string())),
            }
        }
        writer.flush().map_err(|e| PtyError::Write(e.to_string()))
    }

    pub fn resize(&self, cols: u16, rows: u16) -> Result<(), PtyError> {
        let size = PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        };
        mutex_lock_or_recover(&self.master)
            .resize(size)
            .map_err(|e| PtyError::Resize(e.to_string()))?;
        *mutex_lock_or_recover(&self.size) = size;
        Ok(())
    }

    /// Forceful kill through the PTY library, used when no pid is known.
    pub fn kill(&self) -> Result<(), PtyError> {
        mutex_lock_or_recover(&self.killer)
            .kill()
            .map_err(|e| PtyError::Spawn(e.to_string()))
    }
}

impl PtyReader {
    /// Blocking read. `Ok(0)` means the slave side is closed.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, PtyError> {
        loop {
            match self.inner.read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                // Linux reports EIO once the last slave fd closes.
                Err(e) if e.raw_os_error() == Some(libc::EIO) => return Ok(0),
                Err(e) => return Err(PtyError::Read(e.to_string())),
            }
        }
    }
}

impl PtyChild {
    /// Blocks until the child exits and returns its exit code.
    pub fn wait(mut self) -> Result<i32, PtyError> {
        let status = self
            .inner
            .wait()
            .map_err(|e| PtyError::Read(format!("wait failed: {}", e)))?;
        Ok(i32::try_from(status.exit_code()).unwrap_or(i32::MAX))
    }
}
