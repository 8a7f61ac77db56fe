//! Boundary-safe conversion of raw PTY output into text.
//!
//! [`process_chunk`] emits the longest prefix of its input that neither ends
//! inside an escape sequence nor inside a multi-byte UTF-8 character, and
//! hands back the rest so the caller can prepend it to the next read.
//! However a byte stream is sliced, the concatenated output is the same.
//!
//! Bytes that are not valid UTF-8 and cannot become valid with more input are
//! mapped one-to-one onto `U+0000..=U+00FF`, so nothing is dropped.

const ESC: u8 = 0x1b;
const BEL: u8 = 0x07;

/// Splits `buf` into emitted text and the bytes to carry into the next call.
pub fn process_chunk(buf: &[u8]) -> (String, Vec<u8>) {
    let mut out = String::with_capacity(buf.len());
    let mut pos = 0;

    while pos < buf.len() {
        if buf[pos] == ESC {
            match escape_sequence_end(buf, pos) {
                Some(end) => {
                    push_lossless(&mut out, &buf[pos..end]);
                    pos = end;
                }
                None => return (out, buf[pos..].to_vec()),
            }
            continue;
        }

        let run_end = buf[pos..]
            .iter()
            .position(|&b| b == ESC)
            .map_or(buf.len(), |offset| pos + offset);
        let at_buffer_end = run_end == buf.len();

        if let Some(held) = push_text_run(&mut out, &buf[pos..run_end], at_buffer_end) {
            return (out, buf[pos + held..].to_vec());
        }
        pos = run_end;
    }

    (out, Vec::new())
}

/// Converts bytes left over at end of stream without losing any of them.
pub fn flush_lossy(remainder: &[u8]) -> String {
    remainder.iter().map(|&b| char::from(b)).collect()
}

/// Returns the exclusive end of the escape sequence starting at `start`, or
/// `None` when the buffer ends before the sequence is terminated.
fn escape_sequence_end(buf: &[u8], start: usize) -> Option<usize> {
    let introducer = *buf.get(start + 1)?;
    match introducer {
        b'[' => {
            let mut pos = start + 2;
            while let Some(&byte) = buf.get(pos) {
                match byte {
                    0x20..=0x3f => pos += 1,
                    0x40..=0x7e => return Some(pos + 1),
                    // Not part of a CSI sequence; it ends right before this byte.
                    _ => return Some(pos),
                }
            }
            None
        }
        b']' => {
            let mut pos = start + 2;
            while let Some(&byte) = buf.get(pos) {
                if byte == BEL {
                    return Some(pos + 1);
                }
                if byte == ESC && buf.get(pos + 1) == Some(&b'\\') {
                    return Some(pos + 2);
                }
                pos += 1;
            }
            None
        }
        _ => Some(start + 2),
    }
}

/// Appends a run of non-escape bytes. Returns the offset inside `run` where a
/// truncated character starts when it has to be carried over.
fn push_text_run(out: &mut String, run: &[u8], at_buffer_end: bool) -> Option<usize> {
    let mut rest = run;
    let mut consumed = 0;

    loop {
        match std::str::from_utf8(rest) {
            Ok(text) => {
                out.push_str(text);
                return None;
            }
            Err(e) => {
                let valid = e.valid_up_to();
                push_valid_prefix(out, &rest[..valid]);
                match e.error_len() {
                    // Only a character cut by the end of the buffer can still complete.
                    None if at_buffer_end => return Some(consumed + valid),
                    None => {
                        out.extend(rest[valid..].iter().map(|&b| char::from(b)));
                        return None;
                    }
                    Some(bad) => {
                        out.extend(rest[valid..valid + bad].iter().map(|&b| char::from(b)));
                        consumed += valid + bad;
                        rest = &rest[valid + bad..];
                    }
                }
            }
        }
    }
}

fn push_lossless(out: &mut String, bytes: &[u8]) {
    let _ = push_text_run(out, bytes, false);
}

fn push_valid_prefix(out: &mut String, bytes: &[u8]) {
    // `bytes` is the `valid_up_to` prefix reported by `from_utf8`.
    if let Ok(text) = std::str::from_utf8(bytes) {
        out.push_str(text);
    }
}
