//! Terminal title sequences.
//!
//! Sessions may own the title of the hosting terminal. [`TitleMode`] picks
//! between leaving the application alone, a fixed title, a title that tracks
//! activity, or stripping every title the application tries to set.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TitleMode {
    #[default]
    None,
    Static,
    Dynamic,
    Filter,
}

impl TitleMode {
    pub fn injects_titles(&self) -> bool {
        matches!(self, TitleMode::Static | TitleMode::Dynamic)
    }

    /// Application titles are removed whenever we manage the title ourselves.
    pub fn filters_output(&self) -> bool {
        !matches!(self, TitleMode::None)
    }
}

impl std::str::FromStr for TitleMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(TitleMode::None),
            "static" => Ok(TitleMode::Static),
            "dynamic" => Ok(TitleMode::Dynamic),
            "filter" => Ok(TitleMode::Filter),
            other => Err(format!("unknown title mode '{}'", other)),
        }
    }
}

/// OSC 2 sequence setting the window title.
pub fn title_sequence(title: &str) -> String {
    let clean: String = title.chars().filter(|c| !c.is_control()).collect();
    format!("\x1b]2;{}\x07", clean)
}

/// `~/project · vim · my session`
pub fn static_title(cwd: &Path, command: &[String], session_name: Option<&str>) -> String {
    let mut parts = vec![abbreviate_home(cwd)];
    if let Some(program) = command.first() {
        let base = Path::new(program)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| program.clone());
        parts.push(base);
    }
    if let Some(name) = session_name.filter(|n| !n.is_empty()) {
        parts.push(name.to_string());
    }
    parts.join(" · ")
}

/// Static title prefixed by the latest activity status, if any.
pub fn dynamic_title(
    cwd: &Path,
    command: &[String],
    session_name: Option<&str>,
    activity: Option<&str>,
) -> String {
    let base = static_title(cwd, command, session_name);
    match activity.filter(|a| !a.is_empty()) {
        Some(status) => format!("{} · {}", status, base),
        None => base,
    }
}

fn abbreviate_home(path: &Path) -> String {
    let display = path.display().to_string();
    match std::env::var("HOME") {
        Ok(home) if !home.is_empty() && display.starts_with(&home) => {
            format!("~{}", &display[home.len()..])
        }
        _ => display,
    }
}

/// Detects `cd <dir>` in typed input and returns the directory it leads to.
pub fn extract_cd_directory(input: &str, current_dir: &Path) -> Option<std::path::PathBuf> {
    let line = input.trim_end_matches(['\r', '\n']).trim();
    let rest = line.strip_prefix("cd")?;
    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let target = rest.trim();
    let home = std::env::var("HOME").ok();

    let resolved = match target {
        "" | "~" => std::path::PathBuf::from(home?),
        t if t.starts_with("~/") => Path::new(&home?).join(&t[2..]),
        t if t.starts_with('/') => std::path::PathBuf::from(t),
        t => current_dir.join(t),
    };
    Some(resolved)
}

static COMPLETE_TITLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\][0-2];[^\x07\x1b]*(?:\x07|\x1b\\)").expect("Invalid title regex")
});

static PARTIAL_TITLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\][0-2];.*\x1b$|\x1b\][0-2];[^\x07]*$|\x1b(?:\](?:[0-2])?)?$")
        .expect("Invalid partial title regex")
});

/// Removes OSC 0/1/2 title sequences from a stream of text chunks, holding
/// back a possibly unfinished sequence at the end of each chunk.
#[derive(Debug, Default)]
pub struct TitleSequenceFilter {
    buffer: String,
}

impl TitleSequenceFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(&mut self, chunk: &str) -> String {
        self.buffer.push_str(chunk);
        let filtered = COMPLETE_TITLE.replace_all(&self.buffer, "").into_owned();

        match PARTIAL_TITLE.find(&filtered) {
            Some(partial) => {
                self.buffer = filtered[partial.start()..].to_string();
                filtered[..partial.start()].to_string()
            }
            None => {
                self.buffer.clear();
                filtered
            }
        }
    }

    /// Returns whatever is still held back, e.g. when the stream ends.
    pub fn take_pending(&mut self) -> String {
        std::mem::take(&mut self.buffer)
    }
}
