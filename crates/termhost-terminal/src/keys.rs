use serde::{Deserialize, Serialize};

/// Named keys a remote client can send without knowing terminal encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecialKey {
    ArrowUp,
    ArrowDown,
    ArrowLeft,
    ArrowRight,
    Escape,
    Enter,
    CtrlEnter,
    ShiftEnter,
    Backspace,
    Tab,
    ShiftTab,
    PageUp,
    PageDown,
    Home,
    End,
    Delete,
    F1,
    F2,
    F3,
    F4,
    F5,
    F6,
    F7,
    F8,
    F9,
    F10,
    F11,
    F12,
}

impl SpecialKey {
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            SpecialKey::ArrowUp => b"\x1b[A",
            SpecialKey::ArrowDown => b"\x1b[B",
            SpecialKey::ArrowRight => b"\x1b[C",
            SpecialKey::ArrowLeft => b"\x1b[D",
            SpecialKey::Escape => b"\x1b",
            SpecialKey::Enter => b"\r",
            SpecialKey::CtrlEnter => b"\n",
            SpecialKey::ShiftEnter => b"\r\n",
            SpecialKey::Backspace => b"\x7f",
            SpecialKey::Tab => b"\t",
            SpecialKey::ShiftTab => b"\x1b[Z",
            SpecialKey::PageUp => b"\x1b[5~",
            SpecialKey::PageDown => b"\x1b[6~",
            SpecialKey::Home => b"\x1b[H",
            SpecialKey::End => b"\x1b[F",
            SpecialKey::Delete => b"\x1b[3~",
            SpecialKey::F1 => b"\x1bOP",
            SpecialKey::F2 => b"\x1bOQ",
            SpecialKey::F3 => b"\x1bOR",
            SpecialKey::F4 => b"\x1bOS",
            SpecialKey::F5 => b"\x1b[15~",
            SpecialKey::F6 => b"\x1b[17~",
            SpecialKey::F7 => b"\x1b[18~",
            SpecialKey::F8 => b"\x1b[19~",
            SpecialKey::F9 => b"\x1b[20~",
            SpecialKey::F10 => b"\x1b[21~",
            SpecialKey::F11 => b"\x1b[23~",
            SpecialKey::F12 => b"\x1b[24~",
        }
    }

    /// Parses the snake_case wire name, e.g. `arrow_up`.
    pub fn from_name(name: &str) -> Option<Self> {
        serde_json::from_value(serde_json::Value::String(name.to_string())).ok()
    }
}

/// Encodes a human key chord such as `Ctrl+C`, `Alt+x` or `PageUp`.
pub fn key_to_escape_sequence(key: &str) -> Option<Vec<u8>> {
    if let Some(special) = SpecialKey::from_name(key) {
        return Some(special.as_bytes().to_vec());
    }

    if let Some((modifier, base_key)) = key.split_once('+') {
        return match modifier.to_lowercase().as_str() {
            "ctrl" | "control" => {
                let mut chars = base_key.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) if c.is_ascii_alphabetic() => {
                        Some(vec![(c.to_ascii_uppercase() as u8) - b'A' + 1])
                    }
                    (Some('\\'), None) => Some(vec![28]),
                    (Some('['), None) => Some(vec![27]),
                    (Some(']'), None) => Some(vec![29]),
                    _ => None,
                }
            }
            "alt" | "meta" => {
                let base = key_to_escape_sequence(base_key)?;
                let mut result = vec![0x1b];
                result.extend(base);
                Some(result)
            }
            "shift" => match base_key.to_lowercase().as_str() {
                "tab" => Some(SpecialKey::ShiftTab.as_bytes().to_vec()),
                "enter" => Some(SpecialKey::ShiftEnter.as_bytes().to_vec()),
                _ if base_key.chars().count() == 1 => Some(base_key.to_uppercase().into_bytes()),
                _ => None,
            },
            _ => None,
        };
    }

    let named = match key {
        "Enter" | "Return" => SpecialKey::Enter,
        "Tab" => SpecialKey::Tab,
        "Escape" | "Esc" => SpecialKey::Escape,
        "Backspace" => SpecialKey::Backspace,
        "Delete" => SpecialKey::Delete,
        "ArrowUp" | "Up" => SpecialKey::ArrowUp,
        "ArrowDown" | "Down" => SpecialKey::ArrowDown,
        "ArrowRight" | "Right" => SpecialKey::ArrowRight,
        "ArrowLeft" | "Left" => SpecialKey::ArrowLeft,
        "Home" => SpecialKey::Home,
        "End" => SpecialKey::End,
        "PageUp" => SpecialKey::PageUp,
        "PageDown" => SpecialKey::PageDown,
        "F1" => SpecialKey::F1,
        "F2" => SpecialKey::F2,
        "F3" => SpecialKey::F3,
        "F4" => SpecialKey::F4,
        "F5" => SpecialKey::F5,
        "F6" => SpecialKey::F6,
        "F7" => SpecialKey::F7,
        "F8" => SpecialKey::F8,
        "F9" => SpecialKey::F9,
        "F10" => SpecialKey::F10,
        "F11" => SpecialKey::F11,
        "F12" => SpecialKey::F12,
        "Space" => return Some(vec![b' ']),
        "Insert" => return Some(b"\x1b[2~".to_vec()),
        _ if key.chars().count() == 1 => return Some(key.as_bytes().to_vec()),
        _ => return None,
    };
    Some(named.as_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_special_key_wire_names() {
        assert_eq!(SpecialKey::from_name("arrow_up"), Some(SpecialKey::ArrowUp));
        assert_eq!(SpecialKey::from_name("shift_tab"), Some(SpecialKey::ShiftTab));
        assert_eq!(SpecialKey::from_name("f12"), Some(SpecialKey::F12));
        assert_eq!(SpecialKey::from_name("nope"), None);
    }

    #[test]
    fn test_special_key_bytes() {
        assert_eq!(SpecialKey::CtrlEnter.as_bytes(), b"\n");
        assert_eq!(SpecialKey::ShiftEnter.as_bytes(), b"\r\n");
        assert_eq!(SpecialKey::Delete.as_bytes(), b"\x1b[3~");
    }

    #[test]
    fn test_key_to_escape_sequence() {
        assert_eq!(key_to_escape_sequence("Enter"), Some(vec![b'\r']));
        assert_eq!(key_to_escape_sequence("Tab"), Some(vec![b'\t']));
        assert_eq!(key_to_escape_sequence("Escape"), Some(vec![0x1b]));
        assert_eq!(key_to_escape_sequence("ArrowUp"), Some(b"\x1b[A".to_vec()));
        assert_eq!(key_to_escape_sequence("Ctrl+C"), Some(vec![3]));
        assert_eq!(key_to_escape_sequence("Alt+x"), Some(vec![0x1b, b'x']));
        assert_eq!(key_to_escape_sequence("Shift+Tab"), Some(b"\x1b[Z".to_vec()));
        assert_eq!(key_to_escape_sequence("page_down"), Some(b"\x1b[6~".to_vec()));
        assert_eq!(key_to_escape_sequence("a"), Some(vec![b'a']));
        assert_eq!(key_to_escape_sequence("Hyper+q"), None);
        assert_eq!(key_to_escape_sequence("NotAKey"), None);
    }
}
