//! Registry of sessions hosted by this process, plus access to sessions
//! hosted by other processes through their control sockets.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use termhost_common::{rwlock_read_or_recover, rwlock_write_or_recover};
use termhost_ipc::{KillSignal, Message, SocketClient, socket_path_for, validate_socket_path};
use termhost_terminal::process::user_shell;
use termhost_terminal::{
    ProcessController, PtyError, Signal, UnixProcessController, key_to_escape_sequence,
};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::DaemonConfig;
use crate::controller::{
    ControllerDeps, Input, KillOutcome, KillPolicy, ResizeSource, SessionController, SessionOptions,
    terminate,
};
use crate::error::{DaemonError, SessionError};
use crate::naming::{ensure_unique_name, generate_session_name};
use crate::session::{SessionId, SessionInfo, SessionStatus, now_rfc3339};
use crate::sleeper::{RealSleeper, Sleeper};
use crate::store::{FsSessionStore, SessionStore};

/// Grace period on top of the kill ceiling before shutdown gives up on a
/// session.
const SHUTDOWN_SLACK: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct CreatedSession {
    pub session_id: SessionId,
    pub info: SessionInfo,
}

pub struct SessionHost {
    config: DaemonConfig,
    store: Arc<dyn SessionStore>,
    processes: Arc<dyn ProcessController>,
    sleeper: Arc<dyn Sleeper>,
    sessions: Arc<RwLock<HashMap<SessionId, Arc<SessionController>>>>,
    remotes: AsyncMutex<HashMap<SessionId, SocketClient>>,
}

impl SessionHost {
    pub fn new(config: DaemonConfig, store: Arc<dyn SessionStore>) -> Self {
        Self {
            config,
            store,
            processes: Arc::new(UnixProcessController),
            sleeper: Arc::new(RealSleeper),
            sessions: Arc::new(RwLock::new(HashMap::new())),
            remotes: AsyncMutex::new(HashMap::new()),
        }
    }

    /// Host backed by the filesystem store under `config.control_dir`.
    pub fn open(config: DaemonConfig) -> Result<Self, DaemonError> {
        std::fs::create_dir_all(&config.control_dir).map_err(|e| DaemonError::ControlDir {
            path: config.control_dir.display().to_string(),
            reason: e.to_string(),
        })?;
        let store = Arc::new(FsSessionStore::new(config.control_dir.clone()));
        Ok(Self::new(config, store))
    }

    pub fn with_process_controller(mut self, processes: Arc<dyn ProcessController>) -> Self {
        self.processes = processes;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn controller(&self, id: &SessionId) -> Option<Arc<SessionController>> {
        rwlock_read_or_recover(&self.sessions).get(id).cloned()
    }

    pub fn active_count(&self) -> usize {
        rwlock_read_or_recover(&self.sessions)
            .values()
            .filter(|c| !c.is_exited())
            .count()
    }

    pub fn is_active(&self, id: &SessionId) -> bool {
        self.controller(id).is_some_and(|c| !c.is_exited())
    }

    /// Spawns `command` (the user's shell when empty) in a new session.
    pub async fn create(
        &self,
        command: Vec<String>,
        options: SessionOptions,
    ) -> Result<CreatedSession, SessionError> {
        let id = match &options.session_id {
            Some(raw) => SessionId::try_new(raw.clone())?,
            None => SessionId::generate(),
        };
        validate_socket_path(&socket_path_for(&self.store.session_dir(&id)))?;
        if self.controller(&id).is_some() || self.store.load_info(&id)?.is_some() {
            return Err(SessionError::InvalidId(format!("{} is already in use", id)));
        }

        let command = if command.is_empty() {
            vec![user_shell()]
        } else {
            command
        };
        let working_dir = options.working_dir.display().to_string();
        let desired = options
            .name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| generate_session_name(&command, &working_dir));
        let taken = self.taken_names(None)?;
        let name = ensure_unique_name(&desired, taken.iter().map(String::as_str));

        self.store.create_directory(&id)?;
        let info = SessionInfo {
            id: id.clone(),
            name,
            command,
            working_dir,
            status: SessionStatus::Starting,
            pid: None,
            exit_code: None,
            started_at: now_rfc3339(),
            initial_cols: options.cols,
            initial_rows: options.rows,
            title_mode: options.title_mode,
            last_modified: None,
            activity: None,
        };
        if let Err(e) = self.store.save_info(&info) {
            self.rollback(&id);
            return Err(e);
        }

        let deps = ControllerDeps {
            config: self.config.clone(),
            store: Arc::clone(&self.store),
            processes: Arc::clone(&self.processes),
            sleeper: Arc::clone(&self.sleeper),
        };
        let controller = match SessionController::start(info, options, deps) {
            Ok(controller) => controller,
            Err(e) => {
                warn!(session_id = %id, error = %e, "Session failed to start");
                self.rollback(&id);
                return Err(e);
            }
        };

        rwlock_write_or_recover(&self.sessions).insert(id.clone(), Arc::clone(&controller));
        self.spawn_reaper(Arc::clone(&controller));

        Ok(CreatedSession {
            session_id: id,
            info: controller.info(),
        })
    }

    fn rollback(&self, id: &SessionId) {
        if let Err(e) = self.store.cleanup(id) {
            warn!(session_id = %id, error = %e, "Failed to remove directory of failed session");
        }
    }

    fn spawn_reaper(&self, controller: Arc<SessionController>) {
        let sessions = Arc::clone(&self.sessions);
        tokio::spawn(async move {
            let code = controller.wait_for_exit().await;
            rwlock_write_or_recover(&sessions).remove(controller.id());
            debug!(session_id = %controller.id(), exit_code = code, "Session removed from host");
        });
    }

    fn taken_names(&self, except: Option<&SessionId>) -> Result<Vec<String>, SessionError> {
        let mut names: Vec<String> = self
            .store
            .list_infos()?
            .into_iter()
            .filter(|info| Some(&info.id) != except)
            .map(|info| info.name)
            .collect();
        names.extend(
            rwlock_read_or_recover(&self.sessions)
                .values()
                .filter(|c| Some(c.id()) != except)
                .map(|c| c.info().name),
        );
        Ok(names)
    }

    /// Info for a session this process does not host, which must still be
    /// running to be reachable.
    fn external_running(&self, id: &SessionId) -> Result<SessionInfo, SessionError> {
        let info = self
            .store
            .load_info(id)?
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        if info.is_exited() {
            return Err(PtyError::Write(format!("session {} has exited", id)).into());
        }
        Ok(info)
    }

    async fn send_remote(&self, id: &SessionId, message: &Message) -> Result<(), SessionError> {
        let mut remotes = self.remotes.lock().await;
        if remotes.get(id).is_some_and(|client| !client.is_connected()) {
            remotes.remove(id);
        }
        if !remotes.contains_key(id) {
            let path = socket_path_for(&self.store.session_dir(id));
            let client = SocketClient::connect(&path).await?;
            debug!(session_id = %id, socket = %path.display(), "Connected to external session");
            remotes.insert(id.clone(), client);
        }

        let Some(client) = remotes.get(id) else {
            return Err(SessionError::NotFound(id.to_string()));
        };
        if let Err(e) = client.send(message).await {
            remotes.remove(id);
            return Err(e.into());
        }
        Ok(())
    }

    pub async fn send_input(&self, id: &SessionId, input: Input) -> Result<(), SessionError> {
        if let Some(controller) = self.controller(id) {
            return controller.send_input(input);
        }
        self.external_running(id)?;
        let text = match input {
            Input::Text(text) => text,
            Input::Key(key) => {
                let bytes = key_to_escape_sequence(&key).ok_or(SessionError::InvalidKey(key))?;
                String::from_utf8_lossy(&bytes).into_owned()
            }
        };
        self.send_remote(id, &Message::Stdin(text)).await
    }

    /// Remote-priority resize. Returns whether the size was applied locally;
    /// external sessions always report true once the request is delivered.
    pub async fn resize(&self, id: &SessionId, cols: u16, rows: u16) -> Result<bool, SessionError> {
        if let Some(controller) = self.controller(id) {
            return controller.resize(cols, rows, ResizeSource::Remote);
        }
        self.external_running(id)?;
        self.send_remote(id, &Message::resize(cols, rows)).await?;
        Ok(true)
    }

    pub async fn reset_size(&self, id: &SessionId) -> Result<(), SessionError> {
        if let Some(controller) = self.controller(id) {
            return controller.reset_size().map(|_| ());
        }
        self.external_running(id)?;
        self.send_remote(id, &Message::reset_size()).await
    }

    /// Renames the session and returns the name actually used, which gets a
    /// numeric suffix when another session already has it.
    pub async fn update_name(&self, id: &SessionId, name: &str) -> Result<String, SessionError> {
        let taken = self.taken_names(Some(id))?;
        let unique = ensure_unique_name(name, taken.iter().map(String::as_str));

        if let Some(controller) = self.controller(id) {
            controller.set_name(&unique)?;
            return Ok(unique);
        }

        let mut info = self
            .store
            .load_info(id)?
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        info.name = unique.clone();
        self.store.save_info(&info)?;
        if info.is_running() {
            if let Err(e) = self.send_remote(id, &Message::update_title(unique.clone())).await {
                debug!(session_id = %id, error = %e, "Could not notify session of new name");
            }
        }
        Ok(unique)
    }

    pub async fn kill(
        &self,
        id: &SessionId,
        signal: Option<Signal>,
    ) -> Result<KillOutcome, SessionError> {
        if let Some(controller) = self.controller(id) {
            return controller.kill(signal).await;
        }

        let info = self
            .store
            .load_info(id)?
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        if info.is_exited() {
            debug!(session_id = %id, "Kill requested for exited session");
            return Ok(KillOutcome::AlreadyExited);
        }

        let wire_signal = signal.map(|s| KillSignal::Number(i64::from(s.as_raw())));
        match self.send_remote(id, &Message::kill(wire_signal)).await {
            Ok(()) => Ok(KillOutcome::Delegated),
            Err(e) => {
                let Some(pid) = info.pid else {
                    return Err(e);
                };
                warn!(session_id = %id, pid, error = %e, "Session socket unreachable, signalling directly");
                let policy = KillPolicy::from_config(&self.config);
                terminate(
                    pid,
                    signal.unwrap_or(Signal::Term),
                    &policy,
                    self.processes.as_ref(),
                    self.sleeper.as_ref(),
                )
                .await
                .map_err(|e| SessionError::Signal {
                    pid,
                    reason: e.to_string(),
                })
            }
        }
    }

    pub fn get(&self, id: &SessionId) -> Result<SessionInfo, SessionError> {
        if let Some(controller) = self.controller(id) {
            return Ok(controller.info());
        }
        self.store
            .load_info(id)?
            .ok_or_else(|| SessionError::NotFound(id.to_string()))
    }

    /// Every known session, newest first. Sessions recorded as running whose
    /// process is gone are marked exited with code 1.
    pub fn list(&self) -> Result<Vec<SessionInfo>, SessionError> {
        let mut infos = self.store.list_infos()?;
        for info in &mut infos {
            if let Some(controller) = self.controller(&info.id) {
                let last_modified = info.last_modified.take();
                *info = controller.info();
                info.last_modified = last_modified;
                continue;
            }
            if info.is_running() && !self.pid_alive(info.pid) {
                debug!(session_id = %info.id, pid = ?info.pid, "Marking dead session as exited");
                info.mark_exited(1);
                let mut saved = info.clone();
                saved.last_modified = None;
                if let Err(e) = self.store.save_info(&saved) {
                    warn!(session_id = %info.id, error = %e, "Failed to persist zombie status");
                }
            }
        }
        infos.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(infos)
    }

    fn pid_alive(&self, pid: Option<u32>) -> bool {
        pid.is_some_and(|pid| {
            self.processes
                .check_process(pid)
                .map(|status| status.is_alive())
                .unwrap_or(false)
        })
    }

    /// Kills the session if it still runs, then removes its directory.
    pub async fn cleanup_session(&self, id: &SessionId) -> Result<(), SessionError> {
        let info = self.get(id)?;
        if info.is_running() {
            self.kill(id, None).await?;
            if let Some(controller) = self.controller(id) {
                let limit = self.config.kill_timeout + SHUTDOWN_SLACK;
                if tokio::time::timeout(limit, controller.wait_for_exit())
                    .await
                    .is_err()
                {
                    warn!(session_id = %id, "Session still running during cleanup");
                }
            }
        }
        rwlock_write_or_recover(&self.sessions).remove(id);
        self.remotes.lock().await.remove(id);
        self.store.cleanup(id)?;
        info!(session_id = %id, "Session cleaned up");
        Ok(())
    }

    /// Removes every exited session and returns their ids.
    pub async fn cleanup_exited(&self) -> Result<Vec<SessionId>, SessionError> {
        let exited: Vec<SessionId> = self
            .list()?
            .into_iter()
            .filter(|info| info.is_exited() && !self.is_active(&info.id))
            .map(|info| info.id)
            .collect();

        let mut removed = Vec::with_capacity(exited.len());
        let mut remotes = self.remotes.lock().await;
        for id in exited {
            remotes.remove(&id);
            match self.store.cleanup(&id) {
                Ok(()) => removed.push(id),
                Err(e) => warn!(session_id = %id, error = %e, "Failed to remove exited session"),
            }
        }
        info!(count = removed.len(), "Removed exited sessions");
        Ok(removed)
    }

    /// Kills every hosted session in parallel and waits for them to exit.
    pub async fn shutdown(&self) {
        let controllers: Vec<Arc<SessionController>> =
            rwlock_read_or_recover(&self.sessions).values().cloned().collect();
        let count = controllers.len();
        let limit = self.config.kill_timeout + SHUTDOWN_SLACK;

        let mut set = JoinSet::new();
        for controller in controllers {
            set.spawn(async move {
                if let Err(e) = controller.kill(None).await {
                    warn!(session_id = %controller.id(), error = %e, "Kill during shutdown failed");
                }
                if tokio::time::timeout(limit, controller.wait_for_exit())
                    .await
                    .is_err()
                {
                    warn!(session_id = %controller.id(), "Session did not exit during shutdown");
                }
            });
        }
        while set.join_next().await.is_some() {}

        let remotes: Vec<SocketClient> = self.remotes.lock().await.drain().map(|(_, c)| c).collect();
        for client in remotes {
            client.disconnect().await;
        }
        info!(sessions = count, "Session host shut down");
    }
}
