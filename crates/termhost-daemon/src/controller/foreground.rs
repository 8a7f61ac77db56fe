//! Tracks which process group owns the terminal to report commands that
//! start and finish inside a session's shell.

use std::path::Path;
use std::time::{Duration, Instant};

pub const BUILTIN_COMMANDS: [&str; 7] = ["cd", "ls", "pwd", "echo", "export", "alias", "unset"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandEvent {
    Started {
        command: String,
    },
    Finished {
        command: String,
        duration: Duration,
        exit_code: Option<i32>,
    },
}

#[derive(Debug, Clone)]
pub struct CommandWindow {
    pub command: String,
    pub started_at: Instant,
}

#[derive(Debug)]
pub struct ForegroundTracker {
    shell_pgid: i32,
    min_duration: Duration,
    always_notify: String,
    last_pgid: Option<i32>,
    current: Option<CommandWindow>,
}

fn program_name(command: &str) -> &str {
    let first = command.split_whitespace().next().unwrap_or_default();
    Path::new(first)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(first)
}

pub fn is_builtin(command: &str) -> bool {
    BUILTIN_COMMANDS.contains(&program_name(command))
}

impl ForegroundTracker {
    pub fn new(shell_pgid: i32, min_duration: Duration, always_notify: impl Into<String>) -> Self {
        Self {
            shell_pgid,
            min_duration,
            always_notify: always_notify.into(),
            last_pgid: Some(shell_pgid),
            current: None,
        }
    }

    pub fn current(&self) -> Option<&CommandWindow> {
        self.current.as_ref()
    }

    /// Whether observing `pgid` would start a command, in which case the
    /// caller should resolve its command line first.
    pub fn needs_command_line(&self, pgid: i32) -> bool {
        self.last_pgid != Some(pgid) && pgid != self.shell_pgid
    }

    fn always_notifies(&self, command: &str) -> bool {
        !self.always_notify.is_empty()
            && command
                .to_ascii_lowercase()
                .contains(&self.always_notify.to_ascii_lowercase())
    }

    /// Feeds one poll result. `command` is the command line of `pgid` when
    /// the caller resolved it.
    pub fn observe(&mut self, pgid: i32, now: Instant, command: Option<String>) -> Option<CommandEvent> {
        if self.last_pgid == Some(pgid) {
            return None;
        }
        self.last_pgid = Some(pgid);

        if pgid == self.shell_pgid {
            let window = self.current.take()?;
            let duration = now.saturating_duration_since(window.started_at);
            if duration >= self.min_duration || self.always_notifies(&window.command) {
                return Some(CommandEvent::Finished {
                    command: window.command,
                    duration,
                    exit_code: None,
                });
            }
            return None;
        }

        let command = command.filter(|c| !c.trim().is_empty());
        match command {
            Some(command) if !is_builtin(&command) => {
                self.current = Some(CommandWindow {
                    command: command.clone(),
                    started_at: now,
                });
                Some(CommandEvent::Started { command })
            }
            _ => {
                self.current = None;
                None
            }
        }
    }
}
