//! On-disk session metadata.
//!
//! Each session owns `<control>/<id>/` holding `session.json`, the asciinema
//! recording `stdout` and the control socket `ipc.sock`.

use std::fs;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::SessionError;
use crate::session::{SessionId, SessionInfo};

pub const INFO_FILE_NAME: &str = "session.json";
pub const STDOUT_FILE_NAME: &str = "stdout";

pub trait SessionStore: Send + Sync {
    fn control_dir(&self) -> &Path;

    fn session_dir(&self, id: &SessionId) -> PathBuf {
        self.control_dir().join(id.as_str())
    }

    fn stdout_path(&self, id: &SessionId) -> PathBuf {
        self.session_dir(id).join(STDOUT_FILE_NAME)
    }

    fn create_directory(&self, id: &SessionId) -> Result<PathBuf, SessionError>;

    fn save_info(&self, info: &SessionInfo) -> Result<(), SessionError>;

    fn load_info(&self, id: &SessionId) -> Result<Option<SessionInfo>, SessionError>;

    fn list_infos(&self) -> Result<Vec<SessionInfo>, SessionError>;

    fn cleanup(&self, id: &SessionId) -> Result<(), SessionError>;
}

#[derive(Debug, Clone)]
pub struct FsSessionStore {
    control_dir: PathBuf,
}

impl FsSessionStore {
    pub fn new(control_dir: impl Into<PathBuf>) -> Self {
        Self {
            control_dir: control_dir.into(),
        }
    }

    fn info_path(&self, id: &SessionId) -> PathBuf {
        self.session_dir(id).join(INFO_FILE_NAME)
    }

    fn read_info(path: &Path) -> Result<SessionInfo, SessionError> {
        let file = File::open(path).map_err(|e| SessionError::persistence("open_info", e))?;
        serde_json::from_reader(BufReader::new(file))
            .map_err(|e| SessionError::persistence("parse_info", e))
    }

    fn modified_at(path: &Path) -> Option<String> {
        let modified = fs::metadata(path).and_then(|m| m.modified()).ok()?;
        Some(DateTime::<Utc>::from(modified).to_rfc3339())
    }
}

impl SessionStore for FsSessionStore {
    fn control_dir(&self) -> &Path {
        &self.control_dir
    }

    fn create_directory(&self, id: &SessionId) -> Result<PathBuf, SessionError> {
        let dir = self.session_dir(id);
        fs::create_dir_all(&dir).map_err(|e| SessionError::Persistence {
            operation: "create_dir".to_string(),
            reason: format!("Failed to create directory '{}': {}", dir.display(), e),
        })?;
        Ok(dir)
    }

    fn save_info(&self, info: &SessionInfo) -> Result<(), SessionError> {
        let path = self.info_path(&info.id);
        let temp_path = path.with_extension("json.tmp");

        let file = File::create(&temp_path).map_err(|e| SessionError::Persistence {
            operation: "create_temp".to_string(),
            reason: format!(
                "Failed to create temp file '{}': {}",
                temp_path.display(),
                e
            ),
        })?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, info)
            .map_err(|e| SessionError::persistence("write_json", e))?;
        writer
            .flush()
            .map_err(|e| SessionError::persistence("flush", e))?;

        fs::rename(&temp_path, &path).map_err(|e| SessionError::Persistence {
            operation: "rename".to_string(),
            reason: format!(
                "Failed to rename '{}' to '{}': {}",
                temp_path.display(),
                path.display(),
                e
            ),
        })?;
        Ok(())
    }

    fn load_info(&self, id: &SessionId) -> Result<Option<SessionInfo>, SessionError> {
        let path = self.info_path(id);
        if !path.exists() {
            return Ok(None);
        }
        Self::read_info(&path).map(Some)
    }

    fn list_infos(&self) -> Result<Vec<SessionInfo>, SessionError> {
        let entries = match fs::read_dir(&self.control_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(SessionError::persistence("read_control_dir", e)),
        };

        let mut infos = Vec::new();
        for entry in entries.flatten() {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let Ok(id) = SessionId::try_new(name) else {
                continue;
            };
            let info_path = self.info_path(&id);
            if !info_path.exists() {
                continue;
            }
            match Self::read_info(&info_path) {
                Ok(mut info) => {
                    info.last_modified = Self::modified_at(&self.stdout_path(&id));
                    infos.push(info);
                }
                Err(e) => {
                    warn!(session_id = %id, error = %e, "Skipping unreadable session info");
                }
            }
        }
        Ok(infos)
    }

    fn cleanup(&self, id: &SessionId) -> Result<(), SessionError> {
        let dir = self.session_dir(id);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                debug!(session_id = %id, "Removed session directory");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SessionError::persistence("remove_dir", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionStatus;
    use termhost_terminal::TitleMode;

    fn info(id: &str) -> SessionInfo {
        SessionInfo {
            id: SessionId::try_new(id).unwrap(),
            name: id.to_string(),
            command: vec!["/bin/sh".into()],
            working_dir: "/tmp".into(),
            status: SessionStatus::Starting,
            pid: None,
            exit_code: None,
            started_at: crate::session::now_rfc3339(),
            initial_cols: 80,
            initial_rows: 24,
            title_mode: TitleMode::None,
            last_modified: None,
            activity: None,
        }
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsSessionStore::new(dir.path());
        let info = info("one");

        store.create_directory(&info.id).unwrap();
        store.save_info(&info).unwrap();

        let loaded = store.load_info(&info.id).unwrap().unwrap();
        assert_eq!(loaded, info);
        assert!(!store.session_dir(&info.id).join("session.json.tmp").exists());
    }

    #[test]
    fn test_load_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsSessionStore::new(dir.path());
        let id = SessionId::try_new("ghost").unwrap();
        assert!(store.load_info(&id).unwrap().is_none());
    }

    #[test]
    fn test_list_skips_foreign_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsSessionStore::new(dir.path());
        for id in ["a", "b"] {
            let info = info(id);
            store.create_directory(&info.id).unwrap();
            store.save_info(&info).unwrap();
        }
        fs::create_dir(dir.path().join("not a session")).unwrap();
        fs::create_dir(dir.path().join("empty")).unwrap();
        fs::write(dir.path().join("stray.txt"), "x").unwrap();

        let mut ids: Vec<String> = store
            .list_infos()
            .unwrap()
            .into_iter()
            .map(|i| i.id.to_string())
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_list_missing_control_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsSessionStore::new(dir.path().join("nope"));
        assert!(store.list_infos().unwrap().is_empty());
    }

    #[test]
    fn test_list_fills_last_modified_from_recording() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsSessionStore::new(dir.path());
        let info = info("rec");
        store.create_directory(&info.id).unwrap();
        store.save_info(&info).unwrap();
        fs::write(store.stdout_path(&info.id), "{}\n").unwrap();

        let listed = store.list_infos().unwrap();
        assert!(listed[0].last_modified.is_some());
    }

    #[test]
    fn test_cleanup_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsSessionStore::new(dir.path());
        let info = info("gone");
        store.create_directory(&info.id).unwrap();
        store.save_info(&info).unwrap();

        store.cleanup(&info.id).unwrap();
        assert!(!store.session_dir(&info.id).exists());
        store.cleanup(&info.id).unwrap();
    }
}
