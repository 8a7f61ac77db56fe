//! Detection of control sequences after which earlier terminal history is no
//! longer needed for playback (screen clears, resets, alternate screen).

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PruningSequence {
    pub sequence: String,
    pub description: String,
}

impl PruningSequence {
    pub fn new(sequence: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            sequence: sequence.into(),
            description: description.into(),
        }
    }
}

/// Reported once the output event containing the sequence has been written.
#[derive(Debug, Clone, PartialEq)]
pub struct PruningInfo {
    pub sequence: String,
    /// Byte offset in the recording file just past the sequence.
    pub offset: u64,
    pub timestamp: f64,
}

const DEFAULT_SEQUENCES: [(&str, &str); 9] = [
    ("\x1b[3J", "Clear scrollback buffer"),
    ("\x1bc", "Full terminal reset"),
    ("\x1b[2J", "Clear screen"),
    ("\x1b[H\x1b[J", "Home cursor and clear"),
    ("\x1b[H\x1b[2J", "Home cursor and clear screen"),
    ("\x1b[?1049h", "Enter alternate screen"),
    ("\x1b[?1049l", "Exit alternate screen"),
    ("\x1b[?47h", "Enter alternate screen (legacy)"),
    ("\x1b[?47l", "Exit alternate screen (legacy)"),
];

pub fn default_sequences() -> Vec<PruningSequence> {
    DEFAULT_SEQUENCES
        .iter()
        .map(|(seq, desc)| PruningSequence::new(*seq, *desc))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection<'a> {
    pub sequence: &'a str,
    /// Byte index of the first byte of the sequence within the text.
    pub start: usize,
}

impl Detection<'_> {
    pub fn end(&self) -> usize {
        self.start + self.sequence.len()
    }
}

/// Last occurrence of any sequence in `text`. When two sequences start at the
/// same index the one listed first wins.
pub fn detect_last<'a>(text: &str, sequences: &'a [PruningSequence]) -> Option<Detection<'a>> {
    let mut best: Option<Detection<'a>> = None;
    for candidate in sequences {
        if candidate.sequence.is_empty() {
            continue;
        }
        if let Some(start) = text.rfind(&candidate.sequence) {
            match best {
                Some(b) if start <= b.start => {}
                _ => {
                    best = Some(Detection {
                        sequence: &candidate.sequence,
                        start,
                    })
                }
            }
        }
    }
    best
}

pub fn describe<'a>(sequence: &str, sequences: &'a [PruningSequence]) -> Option<&'a str> {
    sequences
        .iter()
        .find(|s| s.sequence == sequence)
        .map(|s| s.description.as_str())
}

/// `[<time>,"o",` followed by the JSON-escaped text up to `end`, without the
/// closing quote.
pub fn serialized_prefix(time_json: &str, text: &str, end: usize) -> String {
    let escaped = serde_json::to_string(&text[..end]).unwrap_or_default();
    let open = escaped.strip_suffix('"').unwrap_or(&escaped);
    format!("[{},\"o\",{}", time_json, open)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_detects_last_sequence() {
        let seqs = default_sequences();
        let text = "a\x1b[2Jb\x1b[3Jc";
        let found = detect_last(text, &seqs).unwrap();
        assert_eq!(found.sequence, "\x1b[3J");
        assert_eq!(found.start, 6);
        assert_eq!(found.end(), 10);
    }

    #[test]
    fn test_no_sequence() {
        assert!(detect_last("plain text", &default_sequences()).is_none());
    }

    #[test]
    fn test_prefers_later_start_over_list_order() {
        let seqs = default_sequences();
        let found = detect_last("x\x1b[H\x1b[2J", &seqs).unwrap();
        assert_eq!(found.sequence, "\x1b[2J");
        assert_eq!(found.end(), "x\x1b[H\x1b[2J".len());
    }

    #[test]
    fn test_offset_counts_escaped_bytes() {
        let text = "hi\x1b[3Jthere";
        let seqs = default_sequences();
        let found = detect_last(text, &seqs).unwrap();
        // "[0.5,\"o\",\"hi\\u001b[3J" is 9 + 1 + 2 + 6 + 3 bytes.
        let prefix = serialized_prefix("0.5", text, found.end());
        assert_eq!(prefix, "[0.5,\"o\",\"hi\\u001b[3J");
        assert_eq!(prefix.len(), 21);
    }

    #[test]
    fn test_offset_counts_multibyte_text() {
        let text = "é\x1bc";
        let seqs = default_sequences();
        let found = detect_last(text, &seqs).unwrap();
        let prefix = serialized_prefix("1.0", text, found.end());
        assert_eq!(prefix, "[1.0,\"o\",\"é\\u001bc");
        assert_eq!(prefix.len(), 9 + 1 + 2 + 6 + 1);
    }

    #[test]
    fn test_describe() {
        let seqs = default_sequences();
        assert_eq!(describe("\x1b[3J", &seqs), Some("Clear scrollback buffer"));
        assert_eq!(describe("zzz", &seqs), None);
    }

    proptest! {
        #[test]
        fn prop_serialized_prefix_matches_full_event(
            text in "[ -~\\n\\r\\t\\x1b]{0,40}",
            cut in 0usize..=40,
        ) {
            let end = cut.min(text.len());
            let full = format!("[0.5,\"o\",{}]", serde_json::to_string(&text).unwrap());
            prop_assert!(full.starts_with(&serialized_prefix("0.5", &text, end)));
        }
    }
}
