//! Asciinema v2 recording with byte-exact position tracking.
//!
//! Every line goes through one [`WriteQueue`], so lines land in the file in
//! call order. The [`ByteCursor`] is updated in two steps: `pending` grows
//! when a line is accepted and the bytes move to `written` once the queued
//! write has completed. `written + pending` is therefore the offset the next
//! line will start at, at any moment.

pub mod pruning;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use termhost_common::{WriteQueue, mutex_lock_or_recover};
use termhost_terminal::{flush_lossy, process_chunk};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, warn};

use crate::config::DaemonConfig;
use crate::error::RecorderError;
pub use pruning::{PruningInfo, PruningSequence, default_sequences};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Theme {
    pub fg: String,
    pub bg: String,
    pub palette: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsciinemaHeader {
    pub version: u8,
    pub width: u16,
    pub height: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<Theme>,
}

impl AsciinemaHeader {
    pub fn new(width: u16, height: u16) -> Self {
        Self {
            version: 2,
            width,
            height,
            timestamp: None,
            duration: None,
            command: None,
            title: None,
            env: None,
            theme: None,
        }
    }

    pub fn with_timestamp_now(mut self) -> Self {
        self.timestamp = Some(chrono::Utc::now().timestamp());
        self
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = Some(env);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Output,
    Input,
    Resize,
    Marker,
}

impl EventKind {
    pub fn code(&self) -> &'static str {
        match self {
            EventKind::Output => "o",
            EventKind::Input => "i",
            EventKind::Resize => "r",
            EventKind::Marker => "m",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ByteCursor {
    pub written: u64,
    pub pending: u64,
}

impl ByteCursor {
    pub fn total(&self) -> u64 {
        self.written + self.pending
    }
}

#[derive(Debug, Clone)]
pub struct RecorderOptions {
    pub validation_interval: u64,
    pub tolerance: u64,
    pub pruning_sequences: Vec<PruningSequence>,
}

impl Default for RecorderOptions {
    fn default() -> Self {
        Self {
            validation_interval: 1024 * 1024,
            tolerance: 100,
            pruning_sequences: default_sequences(),
        }
    }
}

impl RecorderOptions {
    pub fn from_config(config: &DaemonConfig) -> Self {
        Self {
            validation_interval: config.validation_interval_bytes,
            tolerance: config.position_tolerance_bytes,
            ..Self::default()
        }
    }
}

pub type PruningCallback = Arc<dyn Fn(PruningInfo) + Send + Sync>;

#[derive(Debug, Default)]
struct WriterState {
    remainder: Vec<u8>,
    cursor: ByteCursor,
    header_written: bool,
    closed: bool,
    failure: Option<String>,
}

struct Sink {
    file: Option<tokio::fs::File>,
    last_validated: u64,
}

struct Shared {
    path: PathBuf,
    options: RecorderOptions,
    state: Mutex<WriterState>,
    sink: tokio::sync::Mutex<Sink>,
    pruning: Mutex<Option<PruningCallback>>,
}

pub struct AsciinemaWriter {
    shared: Arc<Shared>,
    header: AsciinemaHeader,
    queue: WriteQueue,
    started: Instant,
}

impl AsciinemaWriter {
    /// Truncates or creates `path` and queues the header line.
    ///
    /// Must be called inside a tokio runtime.
    pub fn create(
        path: &Path,
        header: AsciinemaHeader,
        options: RecorderOptions,
    ) -> Result<Self, RecorderError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RecorderError::io("create_dir", e))?;
        }
        let file = std::fs::File::create(path).map_err(|e| RecorderError::io("create", e))?;

        let shared = Arc::new(Shared {
            path: path.to_path_buf(),
            options,
            state: Mutex::new(WriterState::default()),
            sink: tokio::sync::Mutex::new(Sink {
                file: Some(tokio::fs::File::from_std(file)),
                last_validated: 0,
            }),
            pruning: Mutex::new(None),
        });

        let writer = Self {
            shared,
            header,
            queue: WriteQueue::new(format!("recorder:{}", path.display())),
            started: Instant::now(),
        };
        writer.write_header()?;
        Ok(writer)
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    pub fn header(&self) -> &AsciinemaHeader {
        &self.header
    }

    pub fn position(&self) -> ByteCursor {
        mutex_lock_or_recover(&self.shared.state).cursor
    }

    pub fn is_open(&self) -> bool {
        let state = mutex_lock_or_recover(&self.shared.state);
        !state.closed && state.failure.is_none()
    }

    /// Reason the recording stopped accepting writes, if it failed.
    pub fn failure(&self) -> Option<String> {
        mutex_lock_or_recover(&self.shared.state).failure.clone()
    }

    pub fn on_pruning_sequence<F>(&self, callback: F)
    where
        F: Fn(PruningInfo) + Send + Sync + 'static,
    {
        *mutex_lock_or_recover(&self.shared.pruning) = Some(Arc::new(callback));
    }

    pub fn write_header(&self) -> Result<(), RecorderError> {
        let mut state = mutex_lock_or_recover(&self.shared.state);
        if state.header_written {
            return Ok(());
        }
        ensure_writable(&state)?;
        let mut line = serde_json::to_string(&self.header)?;
        line.push('\n');
        state.header_written = true;
        self.enqueue_line(&mut state, line, None);
        Ok(())
    }

    /// Feeds raw PTY bytes through the chunker. Incomplete characters and
    /// escape sequences wait for the next call.
    pub fn write_output(&self, bytes: &[u8]) -> Result<(), RecorderError> {
        let mut state = mutex_lock_or_recover(&self.shared.state);
        ensure_writable(&state)?;

        let mut combined = std::mem::take(&mut state.remainder);
        combined.extend_from_slice(bytes);
        let (text, remainder) = process_chunk(&combined);
        state.remainder = remainder;

        if text.is_empty() {
            return Ok(());
        }
        self.enqueue_output(&mut state, text)
    }

    pub fn write_input(&self, data: &str) -> Result<(), RecorderError> {
        self.write_event(EventKind::Input, data)
    }

    pub fn write_resize(&self, cols: u16, rows: u16) -> Result<(), RecorderError> {
        self.write_event(EventKind::Resize, &format!("{}x{}", cols, rows))
    }

    pub fn write_marker(&self, message: &str) -> Result<(), RecorderError> {
        self.write_event(EventKind::Marker, message)
    }

    /// Writes an arbitrary JSON value as its own line, e.g. `["exit", 0, id]`.
    pub fn write_raw(&self, value: &Value) -> Result<(), RecorderError> {
        let mut state = mutex_lock_or_recover(&self.shared.state);
        ensure_writable(&state)?;
        let mut line = serde_json::to_string(value)?;
        line.push('\n');
        self.enqueue_line(&mut state, line, None);
        Ok(())
    }

    /// Flushes the chunker remainder, waits for queued lines and releases the
    /// file. Later calls return immediately.
    pub async fn close(&self) -> Result<(), RecorderError> {
        {
            let mut state = mutex_lock_or_recover(&self.shared.state);
            if state.closed {
                return Ok(());
            }
            if state.failure.is_none() && !state.remainder.is_empty() {
                let remainder = std::mem::take(&mut state.remainder);
                let text = flush_lossy(&remainder);
                if !text.is_empty() {
                    self.enqueue_output(&mut state, text)?;
                }
            }
            state.closed = true;
        }

        self.queue.drain().await;

        let mut sink = self.shared.sink.lock().await;
        if let Some(file) = sink.file.take() {
            if let Err(e) = file.sync_all().await {
                debug!(path = %self.shared.path.display(), error = %e, "Final sync failed");
            }
        }
        Ok(())
    }

    /// Waits for every accepted line to reach the file.
    pub async fn flush(&self) {
        self.queue.drain().await;
    }

    fn elapsed(&self) -> f64 {
        self.started.elapsed().as_millis() as f64 / 1000.0
    }

    fn write_event(&self, kind: EventKind, data: &str) -> Result<(), RecorderError> {
        let mut state = mutex_lock_or_recover(&self.shared.state);
        ensure_writable(&state)?;
        let mut line = serde_json::to_string(&(self.elapsed(), kind.code(), data))?;
        line.push('\n');
        self.enqueue_line(&mut state, line, None);
        Ok(())
    }

    fn enqueue_output(&self, state: &mut WriterState, text: String) -> Result<(), RecorderError> {
        let time = self.elapsed();
        let mut line = serde_json::to_string(&(time, EventKind::Output.code(), &text))?;
        line.push('\n');

        let start = state.cursor.total();
        let pruning = self.detect_pruning(&text, &line, start, time);
        self.enqueue_line(state, line, pruning);
        Ok(())
    }

    fn detect_pruning(&self, text: &str, line: &str, start: u64, time: f64) -> Option<PruningInfo> {
        if mutex_lock_or_recover(&self.shared.pruning).is_none() {
            return None;
        }
        let sequences = &self.shared.options.pruning_sequences;
        let found = pruning::detect_last(text, sequences)?;

        let time_json = serde_json::to_string(&time).ok()?;
        let prefix = pruning::serialized_prefix(&time_json, text, found.end());
        let offset = start + prefix.len() as u64;
        let line_end = start + line.len() as u64;

        // The prefix must match the line that is actually written.
        if offset > line_end || !line.starts_with(&prefix) {
            error!(
                path = %self.shared.path.display(),
                offset,
                line_end,
                "Pruning offset falls outside its event, ignoring"
            );
            return None;
        }

        debug!(
            path = %self.shared.path.display(),
            sequence = pruning::describe(found.sequence, sequences).unwrap_or("unknown"),
            offset,
            "Pruning sequence detected"
        );
        Some(PruningInfo {
            sequence: found.sequence.to_string(),
            offset,
            timestamp: time,
        })
    }

    /// Accounts for `line` and queues its write. Called with the state lock
    /// held so accounting order and queue order agree.
    fn enqueue_line(&self, state: &mut WriterState, line: String, pruning: Option<PruningInfo>) {
        state.cursor.pending += line.len() as u64;
        let shared = Arc::clone(&self.shared);
        self.queue
            .enqueue(async move { shared.write_line(line, pruning).await });
    }
}

fn ensure_writable(state: &WriterState) -> Result<(), RecorderError> {
    if let Some(reason) = &state.failure {
        return Err(RecorderError::Failed(reason.clone()));
    }
    if state.closed {
        return Err(RecorderError::Closed);
    }
    Ok(())
}

async fn write_and_flush(file: &mut tokio::fs::File, line: &str) -> std::io::Result<()> {
    file.write_all(line.as_bytes()).await?;
    file.flush().await
}

impl Shared {
    fn fail(&self, reason: String) {
        let mut state = mutex_lock_or_recover(&self.state);
        if state.failure.is_none() {
            state.failure = Some(reason);
        }
    }

    fn current_failure(&self) -> Option<String> {
        mutex_lock_or_recover(&self.state).failure.clone()
    }

    async fn write_line(
        &self,
        line: String,
        pruning: Option<PruningInfo>,
    ) -> Result<(), RecorderError> {
        let len = line.len() as u64;
        let mut sink = self.sink.lock().await;

        if let Some(reason) = self.current_failure() {
            return Err(RecorderError::Failed(reason));
        }
        let Some(file) = sink.file.as_mut() else {
            return Err(RecorderError::Closed);
        };

        if let Err(e) = write_and_flush(file, &line).await {
            self.fail(format!("write failed: {}", e));
            return Err(RecorderError::io("write", e));
        }
        if let Err(e) = file.sync_data().await {
            debug!(path = %self.path.display(), error = %e, "fsync failed");
        }

        let written = {
            let mut state = mutex_lock_or_recover(&self.state);
            state.cursor.written += len;
            state.cursor.pending -= len;
            state.cursor.written
        };

        if written - sink.last_validated >= self.options.validation_interval {
            sink.last_validated = written;
            self.validate(written).await?;
        }

        if let Some(info) = pruning {
            let callback = mutex_lock_or_recover(&self.pruning).clone();
            if let Some(callback) = callback {
                callback(info);
            }
        }
        Ok(())
    }

    async fn validate(&self, expected: u64) -> Result<(), RecorderError> {
        let actual = match tokio::fs::metadata(&self.path).await {
            Ok(meta) => meta.len(),
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "Failed to stat recording");
                return Ok(());
            }
        };

        if actual == expected {
            debug!(path = %self.path.display(), bytes = actual, "Recording position verified");
            return Ok(());
        }

        warn!(
            path = %self.path.display(),
            expected,
            actual,
            "Recording position mismatch"
        );
        if actual.abs_diff(expected) > self.options.tolerance {
            self.fail(format!(
                "position mismatch: expected {} bytes, file has {}",
                expected, actual
            ));
            return Err(RecorderError::PositionMismatch { expected, actual });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn read_lines(path: &Path) -> Vec<String> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn bash_header() -> AsciinemaHeader {
        AsciinemaHeader::new(80, 24).with_command("bash")
    }

    #[tokio::test]
    async fn test_header_and_single_output_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stdout");
        let writer = AsciinemaWriter::create(&path, bash_header(), RecorderOptions::default())
            .unwrap();

        writer.write_output(b"Hello\r\n").unwrap();
        writer.close().await.unwrap();

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 2);
        let header: Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(
            header,
            serde_json::json!({"version": 2, "width": 80, "height": 24, "command": "bash"})
        );
        let event: Value = serde_json::from_str(&lines[1]).unwrap();
        assert!(event[0].as_f64().unwrap() >= 0.0);
        assert_eq!(event[1], "o");
        assert_eq!(event[2], "Hello\r\n");
    }

    #[tokio::test]
    async fn test_split_four_byte_character() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stdout");
        let writer = AsciinemaWriter::create(&path, bash_header(), RecorderOptions::default())
            .unwrap();
        let emoji = "😀".as_bytes();

        let before = writer.position();
        writer.write_output(&emoji[..2]).unwrap();
        assert_eq!(writer.position(), before);

        writer.write_output(&emoji[2..]).unwrap();
        writer.close().await.unwrap();

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 2);
        let event: Value = serde_json::from_str(&lines[1]).unwrap();
        assert_eq!(event[2], "😀");
    }

    #[tokio::test]
    async fn test_cursor_matches_file_after_each_call() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stdout");
        let writer = AsciinemaWriter::create(&path, bash_header(), RecorderOptions::default())
            .unwrap();

        let mut claims = vec![writer.position().total()];
        writer.write_output(b"one\r\n").unwrap();
        claims.push(writer.position().total());
        writer.write_input("ls\r").unwrap();
        claims.push(writer.position().total());
        writer.write_resize(100, 40).unwrap();
        claims.push(writer.position().total());
        writer.write_output(b"\x1b[31mred\x1b[0").unwrap();
        claims.push(writer.position().total());
        writer.write_marker("checkpoint").unwrap();
        claims.push(writer.position().total());
        writer
            .write_raw(&serde_json::json!(["exit", 0, "abc"]))
            .unwrap();
        let last_claim = writer.position().total();

        assert!(claims.windows(2).all(|w| w[0] < w[1]));
        writer.flush().await;
        let cursor = writer.position();
        assert_eq!(cursor.pending, 0);
        assert_eq!(cursor.written, last_claim);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), last_claim);

        writer.close().await.unwrap();
        let lines = read_lines(&path);
        assert_eq!(lines.len(), 8);
        assert!(lines[3].contains("\"r\",\"100x40\""));
        assert_eq!(lines[6], r#"["exit",0,"abc"]"#);
        // The dangling escape is flushed as the last output event on close.
        assert!(lines[7].ends_with(r#""\u001b[0"]"#));
    }

    #[tokio::test]
    async fn test_header_is_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stdout");
        let writer = AsciinemaWriter::create(&path, bash_header(), RecorderOptions::default())
            .unwrap();
        writer.write_header().unwrap();
        writer.write_header().unwrap();
        writer.close().await.unwrap();
        assert_eq!(read_lines(&path).len(), 1);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_rejects_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stdout");
        let writer = AsciinemaWriter::create(&path, bash_header(), RecorderOptions::default())
            .unwrap();
        writer.close().await.unwrap();
        writer.close().await.unwrap();
        assert!(!writer.is_open());
        assert!(matches!(
            writer.write_output(b"late"),
            Err(RecorderError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_pruning_callback_reports_file_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stdout");
        let writer = AsciinemaWriter::create(&path, bash_header(), RecorderOptions::default())
            .unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let cursor_path = path.clone();
        writer.on_pruning_sequence(move |info| {
            // The event is already on disk when the callback runs.
            let size = std::fs::metadata(&cursor_path).unwrap().len();
            sink.lock().unwrap().push((info, size));
        });

        writer.write_output(b"before\x1b[2Jmiddle\x1b[3Jafter").unwrap();
        writer.close().await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        let (info, size_at_callback) = &seen[0];
        assert_eq!(info.sequence, "\x1b[3J");

        let contents = std::fs::read(&path).unwrap();
        assert_eq!(*size_at_callback, contents.len() as u64);
        let upto = &contents[..info.offset as usize];
        assert!(upto.ends_with(b"\\u001b[3J"));
        assert!(contents[info.offset as usize..].starts_with(b"after"));
    }

    #[tokio::test]
    async fn test_position_mismatch_fails_recording() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stdout");
        let options = RecorderOptions {
            validation_interval: 1,
            ..RecorderOptions::default()
        };
        let writer = AsciinemaWriter::create(&path, bash_header(), options).unwrap();
        writer.flush().await;
        assert!(writer.is_open());

        let mut external = std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap();
        external.write_all(&[b'x'; 500]).unwrap();
        drop(external);

        writer.write_output(b"hi").unwrap();
        writer.flush().await;

        assert!(!writer.is_open());
        assert!(writer.failure().unwrap().contains("position mismatch"));
        assert!(matches!(
            writer.write_output(b"more"),
            Err(RecorderError::Failed(_))
        ));
    }

    #[tokio::test]
    async fn test_small_drift_is_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stdout");
        let options = RecorderOptions {
            validation_interval: 1,
            ..RecorderOptions::default()
        };
        let writer = AsciinemaWriter::create(&path, bash_header(), options).unwrap();
        writer.flush().await;

        let mut external = std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap();
        external.write_all(&[b'x'; 200]).unwrap();
        drop(external);

        // Our write overwrites most of the stray bytes; the file stays a few
        // bytes longer than tracked, which is inside the tolerance.
        writer.write_output(&[b'a'; 180]).unwrap();
        writer.flush().await;
        assert!(writer.is_open());
        writer.close().await.unwrap();
    }
}
