//! Human-readable session names such as `claude (~/Dev/termhost/web)`.

use std::path::Path;

const SHORT_DIRS: [(&str, &str); 3] = [
    ("/Development/", "/Dev/"),
    ("/Documents/", "/Docs/"),
    ("/Applications/", "/Apps/"),
];

/// Shortens `path` for display: home becomes `~`, a few well-known folders
/// are abbreviated, and anything deeper than three components collapses to
/// `…/<last two>`.
pub fn abbreviate_path(path: &str, home: Option<&str>) -> String {
    if path.is_empty() {
        return String::new();
    }

    let mut abbreviated = match home {
        Some(home) if !home.is_empty() && path.starts_with(home) => {
            format!("~{}", &path[home.len()..])
        }
        _ => path.to_string(),
    };

    for (long, short) in SHORT_DIRS {
        abbreviated = abbreviated.replacen(long, short, 1);
    }

    let parts: Vec<&str> = abbreviated.split('/').filter(|p| !p.is_empty()).collect();
    if parts.len() > 3 {
        return format!("…/{}", parts[parts.len() - 2..].join("/"));
    }
    abbreviated
}

pub fn generate_session_name(command: &[String], working_dir: &str) -> String {
    let program = command.first().map(String::as_str).unwrap_or_default();
    let base = Path::new(program)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.to_string());

    let home = std::env::var("HOME").ok();
    let cwd = abbreviate_path(working_dir, home.as_deref());
    if cwd.is_empty() {
        base
    } else {
        format!("{} ({})", base, cwd)
    }
}

/// Appends ` (2)`, ` (3)`, … until `desired` collides with none of `taken`.
pub fn ensure_unique_name<'a, I>(desired: &str, taken: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let taken: Vec<&str> = taken.into_iter().collect();
    let mut candidate = desired.to_string();
    let mut suffix = 2;
    while taken.contains(&candidate.as_str()) {
        candidate = format!("{} ({})", desired, suffix);
        suffix += 1;
    }
    candidate
}
