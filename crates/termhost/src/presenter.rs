use serde_json::{Value, json};
use termhost_daemon::{SessionId, SessionInfo};

use crate::commands::OutputFormat;
use crate::error::CliError;

/// Output formatting for command results, so handlers stay format-agnostic.
pub trait Presenter {
    fn present_success(&self, message: &str, value: Value);

    fn present_sessions(&self, sessions: &[SessionInfo]);

    fn present_removed(&self, ids: &[SessionId]);

    fn present_error(&self, error: &CliError);
}

pub fn presenter_for(format: OutputFormat) -> Box<dyn Presenter> {
    match format {
        OutputFormat::Text => Box::new(TextPresenter),
        OutputFormat::Json => Box::new(JsonPresenter),
    }
}

pub struct TextPresenter;

impl Presenter for TextPresenter {
    fn present_success(&self, message: &str, _value: Value) {
        println!("{}", message);
    }

    fn present_sessions(&self, sessions: &[SessionInfo]) {
        if sessions.is_empty() {
            println!("No sessions");
            return;
        }
        for line in session_lines(sessions) {
            println!("{}", line);
        }
    }

    fn present_removed(&self, ids: &[SessionId]) {
        match ids.len() {
            0 => println!("Nothing to clean up"),
            1 => println!("Removed 1 session"),
            n => println!("Removed {} sessions", n),
        }
    }

    fn present_error(&self, error: &CliError) {
        eprintln!("Error: {}", error);
        if let Some(suggestion) = error.suggestion() {
            eprintln!("Suggestion: {}", suggestion);
        }
        if error.is_retryable() {
            eprintln!("(This error may be transient - retry may succeed)");
        }
    }
}

/// One aligned row per session: id, status, pid or exit code, name.
pub fn session_lines(sessions: &[SessionInfo]) -> Vec<String> {
    let id_width = sessions.iter().map(|s| s.id.len()).max().unwrap_or(0);
    sessions
        .iter()
        .map(|s| {
            let detail = match (s.exit_code, s.pid) {
                (Some(code), _) => format!("exit {}", code),
                (None, Some(pid)) => format!("pid {}", pid),
                (None, None) => String::new(),
            };
            let activity = s
                .activity
                .as_ref()
                .map(|a| format!("  [{}: {}]", a.app, a.status))
                .unwrap_or_default();
            format!(
                "{:<id_width$}  {:<8} {:<10} {}{}",
                s.id.as_str(),
                s.status.as_str(),
                detail,
                s.name,
                activity,
                id_width = id_width
            )
        })
        .collect()
}

pub struct JsonPresenter;

impl Presenter for JsonPresenter {
    fn present_success(&self, _message: &str, value: Value) {
        println!("{}", value);
    }

    fn present_sessions(&self, sessions: &[SessionInfo]) {
        println!("{}", json!({ "sessions": sessions }));
    }

    fn present_removed(&self, ids: &[SessionId]) {
        println!("{}", json!({ "removed": ids }));
    }

    fn present_error(&self, error: &CliError) {
        eprintln!(
            "{}",
            json!({
                "error": {
                    "code": error.code(),
                    "category": error.category().as_str(),
                    "message": error.to_string(),
                    "context": error.context(),
                    "suggestion": error.suggestion(),
                    "retryable": error.is_retryable(),
                }
            })
        );
    }
}
