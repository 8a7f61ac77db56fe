//! A single hosted session: the PTY, its recording, its control socket and
//! the background loops that watch it.
//!
//! Output flows PTY reader -> output queue -> (recorder, output sink), input
//! flows caller -> input queue -> PTY. Both queues are ordered, so bytes reach
//! each destination in the order they were produced or submitted.

pub mod endpoint;
pub mod foreground;
pub mod kill;
pub mod periodic;
pub mod resize;
pub mod title;

use std::collections::{BTreeMap, HashMap};
use std::io::{self, Write};
use std::os::fd::RawFd;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use serde_json::json;
use termhost_common::{WriteQueue, mutex_lock_or_recover};
use termhost_ipc::{ControlCommand, KillSignal, Message, StatusUpdate, socket_path_for};
use termhost_terminal::process::{command_line, foreground_process_group, process_group_of};
use termhost_terminal::title::{dynamic_title, extract_cd_directory, static_title, title_sequence};
use termhost_terminal::{
    ProcessController, PtyChild, PtyError, PtyHandle, PtyReader, Signal, SpawnOptions, TitleMode,
    TitleSequenceFilter, flush_lossy, key_to_escape_sequence, process_chunk,
};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::DaemonConfig;
use crate::error::{RecorderError, SessionError};
use crate::recorder::{AsciinemaHeader, AsciinemaWriter, RecorderOptions};
use crate::session::{ActivitySnapshot, SessionId, SessionInfo, SessionStatus, now_rfc3339};
use crate::sleeper::Sleeper;
use crate::store::SessionStore;

pub use endpoint::{ControlEndpoint, EndpointEvent, PeerId};
pub use foreground::{CommandEvent, ForegroundTracker};
pub use kill::{KillOutcome, KillPolicy, terminate};
pub use periodic::{CancellationHandle, PeriodicTask, Tick};
pub use resize::{ResizeArbiter, ResizeSource};
pub use title::{TitleInjector, TitlePoll};

/// Environment variable exported to every hosted process.
pub const SESSION_ID_ENV: &str = "TERMHOST_SESSION_ID";

/// How long the exit path waits for the PTY reader to hit EOF. A background
/// job that inherited the slave can keep it open indefinitely.
const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

const COMMAND_EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Text(String),
    /// A key name such as `enter`, `arrow_up` or `Ctrl+C`.
    Key(String),
}

impl Input {
    fn into_bytes(self) -> Result<Vec<u8>, SessionError> {
        match self {
            Input::Text(text) => Ok(text.into_bytes()),
            Input::Key(key) => key_to_escape_sequence(&key).ok_or(SessionError::InvalidKey(key)),
        }
    }
}

/// Destination for the session's terminal output, usually the hosting
/// terminal's stdout.
pub trait OutputSink: Send + Sync {
    fn write(&self, data: &[u8]) -> io::Result<()>;
}

pub struct StdoutSink;

impl OutputSink for StdoutSink {
    fn write(&self, data: &[u8]) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        stdout.write_all(data)?;
        stdout.flush()
    }
}

#[derive(Clone)]
pub struct SessionOptions {
    pub session_id: Option<String>,
    pub name: Option<String>,
    pub working_dir: PathBuf,
    pub cols: u16,
    pub rows: u16,
    pub env: HashMap<String, String>,
    pub title_mode: TitleMode,
    pub sink: Option<Arc<dyn OutputSink>>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            session_id: None,
            name: None,
            working_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/")),
            cols: 80,
            rows: 24,
            env: HashMap::new(),
            title_mode: TitleMode::None,
            sink: None,
        }
    }
}

/// Collaborators a controller needs beyond its own session state.
#[derive(Clone)]
pub struct ControllerDeps {
    pub config: DaemonConfig,
    pub store: Arc<dyn SessionStore>,
    pub processes: Arc<dyn ProcessController>,
    pub sleeper: Arc<dyn Sleeper>,
}

#[derive(Default)]
struct SinkState {
    remainder: Vec<u8>,
    filter: TitleSequenceFilter,
}

pub struct SessionController {
    id: SessionId,
    info: Mutex<SessionInfo>,
    cwd: Mutex<PathBuf>,
    store: Arc<dyn SessionStore>,
    pty: Arc<PtyHandle>,
    recorder: AsciinemaWriter,
    recording: AtomicBool,
    endpoint: ControlEndpoint,
    input_queue: WriteQueue,
    output_queue: WriteQueue,
    sink: Option<Arc<dyn OutputSink>>,
    sink_state: Mutex<SinkState>,
    arbiter: Mutex<ResizeArbiter>,
    injector: Mutex<TitleInjector>,
    title_check_interval: Duration,
    cancel: CancellationHandle,
    tasks: Mutex<Vec<PeriodicTask>>,
    commands: broadcast::Sender<CommandEvent>,
    exit_tx: watch::Sender<Option<i32>>,
    kill_policy: KillPolicy,
    processes: Arc<dyn ProcessController>,
    sleeper: Arc<dyn Sleeper>,
}

impl SessionController {
    /// Opens the recording and the control socket, then spawns the process.
    /// `info` must already be saved with status `starting`; any failure
    /// releases what was opened and leaves directory cleanup to the caller.
    pub fn start(
        info: SessionInfo,
        options: SessionOptions,
        deps: ControllerDeps,
    ) -> Result<Arc<Self>, SessionError> {
        let id = info.id.clone();
        let session_dir = deps.store.session_dir(&id);
        let socket_path = socket_path_for(&session_dir);

        let mut header = AsciinemaHeader::new(info.initial_cols, info.initial_rows)
            .with_timestamp_now()
            .with_command(info.command.join(" "))
            .with_title(info.name.clone());
        let mut header_env = BTreeMap::new();
        header_env.insert("TERM".to_string(), "xterm-256color".to_string());
        if let Ok(shell) = std::env::var("SHELL") {
            header_env.insert("SHELL".to_string(), shell);
        }
        header = header.with_env(header_env);

        let recorder = AsciinemaWriter::create(
            &deps.store.stdout_path(&id),
            header,
            RecorderOptions::from_config(&deps.config),
        )?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let endpoint =
            match ControlEndpoint::bind(&socket_path, deps.config.max_frame_bytes, events_tx) {
                Ok(endpoint) => endpoint,
                Err(e) => {
                    spawn_close(recorder);
                    return Err(e);
                }
            };

        let mut env = options.env.clone();
        env.insert(SESSION_ID_ENV.to_string(), id.to_string());
        let spawn = SpawnOptions {
            command: info.command.clone(),
            cwd: PathBuf::from(&info.working_dir),
            env,
            cols: info.initial_cols,
            rows: info.initial_rows,
        };
        let (pty, reader, child) = match PtyHandle::spawn(&spawn) {
            Ok(spawned) => spawned,
            Err(e) => {
                endpoint.close();
                spawn_close(recorder);
                return Err(e.into());
            }
        };

        let mut info = info;
        info.status = SessionStatus::Running;
        info.pid = pty.pid();
        if let Err(e) = deps.store.save_info(&info) {
            if let Err(kill_err) = pty.kill() {
                warn!(session_id = %id, error = %kill_err, "Failed to kill orphaned child");
            }
            endpoint.close();
            spawn_close(recorder);
            return Err(e);
        }

        let session_id = id.to_string();
        recorder.on_pruning_sequence(move |pruning| {
            debug!(
                session_id = %session_id,
                sequence = %pruning.sequence.escape_debug(),
                offset = pruning.offset,
                "Pruning sequence recorded"
            );
        });

        let config = &deps.config;
        let mut arbiter = ResizeArbiter::new(config.resize_grace);
        arbiter.claim(
            ResizeSource::Terminal,
            info.initial_cols,
            info.initial_rows,
            Instant::now(),
        );
        let (commands, _) = broadcast::channel(COMMAND_EVENT_CAPACITY);
        let (exit_tx, _) = watch::channel(None);
        let title_mode = info.title_mode;
        let cwd = PathBuf::from(&info.working_dir);

        let controller = Arc::new(Self {
            id: id.clone(),
            info: Mutex::new(info),
            cwd: Mutex::new(cwd),
            store: deps.store,
            pty: Arc::new(pty),
            recorder,
            recording: AtomicBool::new(true),
            endpoint,
            input_queue: WriteQueue::new(format!("input:{}", id)),
            output_queue: WriteQueue::new(format!("output:{}", id)),
            sink: options.sink,
            sink_state: Mutex::new(SinkState::default()),
            arbiter: Mutex::new(arbiter),
            injector: Mutex::new(TitleInjector::new(config.title_quiet_period)),
            title_check_interval: config.title_check_interval,
            cancel: CancellationHandle::new(),
            tasks: Mutex::new(Vec::new()),
            commands,
            exit_tx,
            kill_policy: KillPolicy::from_config(config),
            processes: deps.processes,
            sleeper: deps.sleeper,
        });

        let reader = controller.spawn_reader(reader);
        controller.spawn_exit_waiter(child, reader);
        controller.spawn_dispatcher(events_rx);
        controller.spawn_foreground_poller(
            config.foreground_poll_interval,
            config.min_command_duration,
            config.always_notify_command.clone(),
        );
        if title_mode.injects_titles() {
            controller.schedule_title();
        }

        info!(
            session_id = %id,
            pid = ?controller.pty.pid(),
            command = %controller.info().command.join(" "),
            "Session started"
        );
        Ok(controller)
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn info(&self) -> SessionInfo {
        mutex_lock_or_recover(&self.info).clone()
    }

    pub fn pid(&self) -> Option<u32> {
        self.pty.pid()
    }

    pub fn size(&self) -> (u16, u16) {
        self.pty.size()
    }

    pub fn is_exited(&self) -> bool {
        self.exit_tx.borrow().is_some()
    }

    pub fn exit_code(&self) -> Option<i32> {
        *self.exit_tx.borrow()
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::Acquire)
    }

    pub fn recorder(&self) -> &AsciinemaWriter {
        &self.recorder
    }

    pub fn subscribe_commands(&self) -> broadcast::Receiver<CommandEvent> {
        self.commands.subscribe()
    }

    /// Resolves with the exit code once the session has fully shut down.
    pub async fn wait_for_exit(&self) -> i32 {
        let mut rx = self.exit_tx.subscribe();
        loop {
            if let Some(code) = *rx.borrow_and_update() {
                return code;
            }
            if rx.changed().await.is_err() {
                return self.exit_code().unwrap_or(-1);
            }
        }
    }

    pub fn send_input(self: &Arc<Self>, input: Input) -> Result<(), SessionError> {
        if self.is_exited() {
            return Err(PtyError::Write(format!("session {} has exited", self.id)).into());
        }
        let typed = match &input {
            Input::Text(text) => Some(text.clone()),
            Input::Key(_) => None,
        };
        let bytes = input.into_bytes()?;
        if bytes.is_empty() {
            return Ok(());
        }

        if self.is_recording() {
            if let Err(e) = self.recorder.write_input(&String::from_utf8_lossy(&bytes)) {
                self.stop_recording(&e);
            }
        }

        if let Some(text) = typed {
            self.track_directory_change(&text);
        }

        let pty = Arc::clone(&self.pty);
        self.input_queue.enqueue(async move {
            match tokio::task::spawn_blocking(move || pty.write(&bytes)).await {
                Ok(result) => result,
                Err(e) => Err(PtyError::Write(e.to_string())),
            }
        });
        Ok(())
    }

    /// Applies the resize when the arbiter accepts it. Returns whether it did.
    pub fn resize(&self, cols: u16, rows: u16, source: ResizeSource) -> Result<bool, SessionError> {
        let accepted = mutex_lock_or_recover(&self.arbiter).claim(source, cols, rows, Instant::now());
        if !accepted {
            debug!(session_id = %self.id, cols, rows, "Terminal resize ignored after remote resize");
            return Ok(false);
        }
        self.pty.resize(cols, rows)?;
        if self.is_recording() {
            if let Err(e) = self.recorder.write_resize(cols, rows) {
                self.stop_recording(&e);
            }
        }
        debug!(session_id = %self.id, cols, rows, source = ?source, "Session resized");
        Ok(true)
    }

    /// Restores the size the session started with.
    pub fn reset_size(&self) -> Result<bool, SessionError> {
        let (cols, rows) = {
            let info = mutex_lock_or_recover(&self.info);
            (info.initial_cols, info.initial_rows)
        };
        self.resize(cols, rows, ResizeSource::Terminal)
    }

    pub fn set_name(self: &Arc<Self>, name: &str) -> Result<(), SessionError> {
        let snapshot = {
            let mut info = mutex_lock_or_recover(&self.info);
            info.name = name.to_string();
            info.clone()
        };
        self.store.save_info(&snapshot)?;
        if snapshot.title_mode.injects_titles() {
            self.schedule_title();
        }
        Ok(())
    }

    /// Keeps the latest activity reported by a client.
    pub fn set_activity(self: &Arc<Self>, update: &StatusUpdate) {
        let snapshot = {
            let mut info = mutex_lock_or_recover(&self.info);
            info.activity = Some(ActivitySnapshot {
                app: update.app.clone(),
                status: update.status.clone(),
                updated_at: now_rfc3339(),
            });
            info.clone()
        };
        if let Err(e) = self.store.save_info(&snapshot) {
            warn!(session_id = %self.id, error = %e, "Failed to persist activity");
        }
        if snapshot.title_mode == TitleMode::Dynamic {
            self.schedule_title();
        }
    }

    /// Sends `message` to every peer connected to this session's socket.
    pub fn broadcast(&self, message: &Message) {
        self.endpoint.broadcast(message, None);
    }

    /// SIGTERM by default, escalating to SIGKILL past the policy ceiling.
    pub async fn kill(&self, signal: Option<Signal>) -> Result<KillOutcome, SessionError> {
        if self.is_exited() {
            return Ok(KillOutcome::AlreadyExited);
        }
        let signal = signal.unwrap_or(Signal::Term);

        let Some(pid) = self.pty.pid() else {
            self.pty.kill()?;
            return Ok(KillOutcome::Forced);
        };
        let outcome = terminate(
            pid,
            signal,
            &self.kill_policy,
            self.processes.as_ref(),
            self.sleeper.as_ref(),
        )
        .await
        .map_err(|e| SessionError::Signal {
            pid,
            reason: e.to_string(),
        })?;
        info!(session_id = %self.id, pid, outcome = ?outcome, "Kill finished");
        Ok(outcome)
    }

    fn stop_recording(&self, err: &RecorderError) {
        if self.recording.swap(false, Ordering::AcqRel) {
            error!(
                session_id = %self.id,
                path = %self.recorder.path().display(),
                error = %err,
                "Recording stopped"
            );
        }
    }

    fn track_directory_change(self: &Arc<Self>, text: &str) {
        let current = mutex_lock_or_recover(&self.cwd).clone();
        let Some(dir) = extract_cd_directory(text, &current) else {
            return;
        };
        debug!(session_id = %self.id, dir = %dir.display(), "Directory change typed");
        *mutex_lock_or_recover(&self.cwd) = dir;
        if self.info().title_mode.injects_titles() {
            self.schedule_title();
        }
    }

    fn current_title(&self) -> Option<String> {
        let info = self.info();
        let cwd = mutex_lock_or_recover(&self.cwd).clone();
        match info.title_mode {
            TitleMode::Static => Some(static_title(&cwd, &info.command, Some(&info.name))),
            TitleMode::Dynamic => Some(dynamic_title(
                &cwd,
                &info.command,
                Some(&info.name),
                info.activity.as_ref().map(|a| a.status.as_str()),
            )),
            TitleMode::None | TitleMode::Filter => None,
        }
    }

    fn schedule_title(self: &Arc<Self>) {
        if self.sink.is_none() || self.cancel.is_cancelled() {
            return;
        }
        let Some(title) = self.current_title() else {
            return;
        };
        if !mutex_lock_or_recover(&self.injector).set_pending(title) {
            return;
        }

        let weak = Arc::downgrade(self);
        let task = PeriodicTask::spawn("title", self.title_check_interval, &self.cancel, move || {
            let weak = Weak::clone(&weak);
            async move {
                match weak.upgrade() {
                    Some(controller) => controller.poll_title(),
                    None => Tick::Stop,
                }
            }
        });
        let mut tasks = mutex_lock_or_recover(&self.tasks);
        tasks.retain(|t| !t.is_finished());
        tasks.push(task);
    }

    fn poll_title(&self) -> Tick {
        let poll = mutex_lock_or_recover(&self.injector).poll(Instant::now());
        match poll {
            TitlePoll::Wait => Tick::Continue,
            TitlePoll::Idle => Tick::Stop,
            TitlePoll::Inject(title) => {
                if let Some(sink) = self.sink.clone() {
                    let sequence = title_sequence(&title).into_bytes();
                    self.output_queue.enqueue(write_to_sink(sink, sequence));
                }
                Tick::Stop
            }
        }
    }

    /// Runs on the output queue, one call per PTY read.
    async fn forward_output(&self, bytes: Vec<u8>) {
        if self.is_recording() {
            if let Err(e) = self.recorder.write_output(&bytes) {
                self.stop_recording(&e);
            }
        }

        if let Some(sink) = &self.sink {
            let filters = mutex_lock_or_recover(&self.info).title_mode.filters_output();
            let data = if filters {
                let mut state = mutex_lock_or_recover(&self.sink_state);
                let mut combined = std::mem::take(&mut state.remainder);
                combined.extend_from_slice(&bytes);
                let (text, remainder) = process_chunk(&combined);
                state.remainder = remainder;
                state.filter.filter(&text).into_bytes()
            } else {
                bytes
            };
            if !data.is_empty() {
                if let Err(e) = write_to_sink(Arc::clone(sink), data).await {
                    debug!(session_id = %self.id, error = %e, "Output sink write failed");
                }
            }
        }

        mutex_lock_or_recover(&self.injector).record_write(Instant::now());
    }

    async fn flush_sink(&self) {
        let Some(sink) = &self.sink else {
            return;
        };
        let rest = {
            let mut state = mutex_lock_or_recover(&self.sink_state);
            let mut rest = state.filter.take_pending();
            rest.push_str(&flush_lossy(&std::mem::take(&mut state.remainder)));
            rest
        };
        if !rest.is_empty() {
            if let Err(e) = write_to_sink(Arc::clone(sink), rest.into_bytes()).await {
                debug!(session_id = %self.id, error = %e, "Output sink write failed");
            }
        }
    }

    fn spawn_reader(self: &Arc<Self>, mut reader: PtyReader) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        tokio::task::spawn_blocking(move || {
            let mut buf = vec![0u8; 8192];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        let chunk = buf[..n].to_vec();
                        let forward = Arc::clone(&controller);
                        controller.output_queue.enqueue(async move {
                            forward.forward_output(chunk).await;
                            Ok::<(), SessionError>(())
                        });
                    }
                    Err(e) => {
                        debug!(session_id = %controller.id, error = %e, "PTY read failed");
                        break;
                    }
                }
            }
            debug!(session_id = %controller.id, "PTY reader finished");
        })
    }

    fn spawn_exit_waiter(self: &Arc<Self>, child: PtyChild, reader: JoinHandle<()>) {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            let code = match tokio::task::spawn_blocking(move || child.wait()).await {
                Ok(Ok(code)) => code,
                Ok(Err(e)) => {
                    warn!(session_id = %controller.id, error = %e, "Waiting for child failed");
                    -1
                }
                Err(e) => {
                    warn!(session_id = %controller.id, error = %e, "Exit waiter panicked");
                    -1
                }
            };
            controller.finish(code, reader).await;
        });
    }

    async fn finish(&self, code: i32, reader: JoinHandle<()>) {
        if tokio::time::timeout(READER_DRAIN_TIMEOUT, reader).await.is_err() {
            debug!(session_id = %self.id, "PTY still open after exit, not waiting for EOF");
        }
        self.output_queue.drain().await;
        self.flush_sink().await;

        if self.is_recording() {
            if let Err(e) = self.recorder.write_raw(&json!(["exit", code, self.id.as_str()])) {
                self.stop_recording(&e);
            }
        }
        if let Err(e) = self.recorder.close().await {
            warn!(session_id = %self.id, error = %e, "Failed to close recording");
        }

        self.cancel.cancel();
        self.endpoint.close();
        self.input_queue.drain().await;

        let snapshot = {
            let mut info = mutex_lock_or_recover(&self.info);
            info.mark_exited(code);
            info.clone()
        };
        if let Err(e) = self.store.save_info(&snapshot) {
            warn!(session_id = %self.id, error = %e, "Failed to persist exit status");
        }
        info!(session_id = %self.id, exit_code = code, "Session exited");
        self.exit_tx.send_replace(Some(code));
    }

    fn spawn_dispatcher(self: &Arc<Self>, mut events: mpsc::UnboundedReceiver<EndpointEvent>) {
        let weak = Arc::downgrade(self);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = events.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                };
                let Some(controller) = weak.upgrade() else {
                    break;
                };
                controller.handle_event(event);
            }
        });
    }

    fn handle_event(self: &Arc<Self>, event: EndpointEvent) {
        let result = match event {
            EndpointEvent::Stdin(text) => self.send_input(Input::Text(text)),
            EndpointEvent::Control(ControlCommand::Resize { cols, rows }) => {
                self.resize(cols, rows, ResizeSource::Remote).map(|_| ())
            }
            EndpointEvent::Control(ControlCommand::ResetSize) => self.reset_size().map(|_| ()),
            EndpointEvent::Control(ControlCommand::UpdateTitle { title }) => self.set_name(&title),
            EndpointEvent::Control(ControlCommand::Kill { signal }) => {
                let signal = self.resolve_signal(signal);
                let controller = Arc::clone(self);
                tokio::spawn(async move {
                    if let Err(e) = controller.kill(Some(signal)).await {
                        warn!(session_id = %controller.id, error = %e, "Remote kill failed");
                    }
                });
                Ok(())
            }
            EndpointEvent::Status { update, .. } => {
                self.set_activity(&update);
                Ok(())
            }
        };
        if let Err(e) = result {
            warn!(session_id = %self.id, error = %e, "Control request failed");
        }
    }

    fn resolve_signal(&self, signal: Option<KillSignal>) -> Signal {
        let resolved = match &signal {
            None => Some(Signal::Term),
            Some(KillSignal::Name(name)) => Signal::from_name(name),
            Some(KillSignal::Number(number)) => Signal::from_number(*number),
        };
        resolved.unwrap_or_else(|| {
            warn!(session_id = %self.id, signal = ?signal, "Unsupported signal, using SIGTERM");
            Signal::Term
        })
    }

    fn spawn_foreground_poller(
        self: &Arc<Self>,
        interval: Duration,
        min_duration: Duration,
        always_notify: String,
    ) {
        let (Some(pid), Some(fd)) = (self.pty.pid(), self.pty.master_fd()) else {
            return;
        };
        let Some(shell_pgid) = process_group_of(pid) else {
            debug!(session_id = %self.id, pid, "No process group, foreground tracking disabled");
            return;
        };

        let tracker = Arc::new(Mutex::new(ForegroundTracker::new(
            shell_pgid,
            min_duration,
            always_notify,
        )));
        let weak = Arc::downgrade(self);
        let task = PeriodicTask::spawn("foreground", interval, &self.cancel, move || {
            let weak = Weak::clone(&weak);
            let tracker = Arc::clone(&tracker);
            async move {
                match weak.upgrade() {
                    Some(controller) => controller.poll_foreground(fd, &tracker).await,
                    None => Tick::Stop,
                }
            }
        });
        mutex_lock_or_recover(&self.tasks).push(task);
    }

    async fn poll_foreground(&self, fd: RawFd, tracker: &Mutex<ForegroundTracker>) -> Tick {
        let Some(pgid) = foreground_process_group(fd) else {
            return Tick::Continue;
        };
        let needs_command = mutex_lock_or_recover(tracker).needs_command_line(pgid);
        let command = if needs_command {
            tokio::task::spawn_blocking(move || command_line(pgid))
                .await
                .ok()
                .flatten()
        } else {
            None
        };

        let event = mutex_lock_or_recover(tracker).observe(pgid, Instant::now(), command);
        if let Some(event) = event {
            match &event {
                CommandEvent::Started { command } => {
                    info!(session_id = %self.id, command = %command, "Command started");
                }
                CommandEvent::Finished {
                    command, duration, ..
                } => {
                    info!(
                        session_id = %self.id,
                        command = %command,
                        duration_ms = duration.as_millis() as u64,
                        "Command finished"
                    );
                }
            }
            // No subscribers is fine.
            let _ = self.commands.send(event);
        }
        Tick::Continue
    }
}

/// Sinks block on the hosting terminal, so writes run off the async workers.
async fn write_to_sink(sink: Arc<dyn OutputSink>, data: Vec<u8>) -> io::Result<()> {
    tokio::task::spawn_blocking(move || sink.write(&data))
        .await
        .map_err(io::Error::other)?
}

/// Closes a recorder that never got attached to a session.
fn spawn_close(recorder: AsciinemaWriter) {
    tokio::spawn(async move {
        if let Err(e) = recorder.close().await {
            debug!(path = %recorder.path().display(), error = %e, "Failed to close recording");
        }
    });
}
