//! Session lifecycle tests against real `/bin/sh` processes.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};
use termhost_daemon::{
    DaemonConfig, FsSessionStore, Input, KillOutcome, OutputSink, ResizeSource, SessionError,
    SessionHost, SessionId, SessionInfo, SessionOptions, SessionStatus,
};
use termhost_ipc::SocketClient;
use termhost_terminal::{PtyError, TitleMode};

const EXIT_TIMEOUT: Duration = Duration::from_secs(10);

fn control_dir() -> tempfile::TempDir {
    tempfile::Builder::new()
        .prefix("th")
        .tempdir_in("/tmp")
        .unwrap()
}

fn host_in(dir: &Path) -> SessionHost {
    let config = DaemonConfig::default()
        .with_control_dir(dir)
        .with_kill_timing(Duration::from_millis(50), Duration::from_secs(2))
        .with_foreground_poll_interval(Duration::from_millis(50));
    SessionHost::new(config, Arc::new(FsSessionStore::new(dir)))
}

fn options(dir: &Path) -> SessionOptions {
    SessionOptions {
        working_dir: dir.to_path_buf(),
        ..SessionOptions::default()
    }
}

fn sh(script: &str) -> Vec<String> {
    vec!["/bin/sh".into(), "-c".into(), script.into()]
}

async fn wait_exited(host: &SessionHost, id: &SessionId) -> SessionInfo {
    tokio::time::timeout(EXIT_TIMEOUT, async {
        loop {
            let info = host.get(id).unwrap();
            if info.status == SessionStatus::Exited {
                return info;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("session did not exit in time")
}

fn recording(dir: &Path, id: &SessionId) -> (Value, Vec<Value>) {
    let content = std::fs::read_to_string(dir.join(id.as_str()).join("stdout")).unwrap();
    let mut lines = content.lines();
    let header = serde_json::from_str(lines.next().unwrap()).unwrap();
    let events = lines.map(|l| serde_json::from_str(l).unwrap()).collect();
    (header, events)
}

fn events_of<'a>(events: &'a [Value], kind: &str) -> Vec<&'a str> {
    events
        .iter()
        .filter(|e| e.get(1).and_then(Value::as_str) == Some(kind))
        .filter_map(|e| e.get(2).and_then(Value::as_str))
        .collect()
}

#[derive(Default)]
struct CaptureSink {
    bytes: Mutex<Vec<u8>>,
}

impl CaptureSink {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes.lock().unwrap()).into_owned()
    }
}

impl OutputSink for CaptureSink {
    fn write(&self, data: &[u8]) -> std::io::Result<()> {
        self.bytes.lock().unwrap().extend_from_slice(data);
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_output_and_exit_are_recorded() {
    let dir = control_dir();
    let host = host_in(dir.path());

    let created = host
        .create(sh("printf hello; exit 3"), options(dir.path()))
        .await
        .unwrap();
    assert_eq!(created.info.status, SessionStatus::Running);
    assert!(created.info.pid.is_some());

    let info = wait_exited(&host, &created.session_id).await;
    assert_eq!(info.exit_code, Some(3));

    let (header, events) = recording(dir.path(), &created.session_id);
    assert_eq!(header["version"], 2);
    assert_eq!(header["width"], 80);
    assert_eq!(header["height"], 24);
    assert!(events_of(&events, "o").concat().contains("hello"));
    assert_eq!(
        events.last().unwrap(),
        &json!(["exit", 3, created.session_id.as_str()])
    );

    let session_dir = dir.path().join(created.session_id.as_str());
    assert!(!session_dir.join("ipc.sock").exists());
    assert!(!host.is_active(&created.session_id));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_input_is_written_and_recorded() {
    let dir = control_dir();
    let host = host_in(dir.path());

    let created = host
        .create(sh("read line; echo got:$line"), options(dir.path()))
        .await
        .unwrap();
    host.send_input(&created.session_id, Input::Text("abc\r".into()))
        .await
        .unwrap();

    let info = wait_exited(&host, &created.session_id).await;
    assert_eq!(info.exit_code, Some(0));

    let (_, events) = recording(dir.path(), &created.session_id);
    assert_eq!(events_of(&events, "i"), vec!["abc\r"]);
    assert!(events_of(&events, "o").concat().contains("got:abc"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_resize_is_applied_and_recorded() {
    let dir = control_dir();
    let host = host_in(dir.path());

    let created = host
        .create(sh("sleep 30"), options(dir.path()))
        .await
        .unwrap();
    let id = created.session_id;

    assert!(host.resize(&id, 120, 40).await.unwrap());
    assert_eq!(host.controller(&id).unwrap().size(), (120, 40));

    host.kill(&id, None).await.unwrap();
    wait_exited(&host, &id).await;

    let (_, events) = recording(dir.path(), &id);
    assert_eq!(events_of(&events, "r"), vec!["120x40"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_terminal_resize_yields_to_recent_remote_resize() {
    let dir = control_dir();
    let config = DaemonConfig::default()
        .with_control_dir(dir.path())
        .with_kill_timing(Duration::from_millis(50), Duration::from_secs(2))
        .with_resize_grace(Duration::from_millis(300));
    let host = SessionHost::new(config, Arc::new(FsSessionStore::new(dir.path())));

    let created = host
        .create(sh("sleep 30"), options(dir.path()))
        .await
        .unwrap();
    let id = created.session_id;
    let controller = host.controller(&id).unwrap();

    assert!(host.resize(&id, 100, 30).await.unwrap());
    assert!(!controller.resize(90, 20, ResizeSource::Terminal).unwrap());
    assert_eq!(controller.size(), (100, 30));

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(controller.resize(90, 20, ResizeSource::Terminal).unwrap());
    assert_eq!(controller.size(), (90, 20));

    host.kill(&id, None).await.unwrap();
    wait_exited(&host, &id).await;

    let (_, events) = recording(dir.path(), &id);
    assert_eq!(events_of(&events, "r"), vec!["100x30", "90x20"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_kill_then_kill_again_is_noop() {
    let dir = control_dir();
    let host = host_in(dir.path());

    let created = host
        .create(sh("sleep 30"), options(dir.path()))
        .await
        .unwrap();
    let id = created.session_id;

    let outcome = host.kill(&id, None).await.unwrap();
    assert!(matches!(outcome, KillOutcome::Graceful { .. }), "{:?}", outcome);
    wait_exited(&host, &id).await;

    assert_eq!(host.kill(&id, None).await.unwrap(), KillOutcome::AlreadyExited);
    assert_eq!(host.active_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_missing_command_rolls_back_session_directory() {
    let dir = control_dir();
    let host = host_in(dir.path());

    let options = SessionOptions {
        session_id: Some("broken".into()),
        ..options(dir.path())
    };
    let err = host
        .create(vec!["termhost-no-such-command".into()], options)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SessionError::Pty(PtyError::CommandNotFound { .. })
    ));
    assert!(!dir.path().join("broken").exists());
    assert!(host.list().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_duplicate_names_get_suffixes() {
    let dir = control_dir();
    let host = host_in(dir.path());

    let named = |name: &str| SessionOptions {
        name: Some(name.into()),
        ..options(dir.path())
    };
    let first = host.create(sh("sleep 30"), named("dev")).await.unwrap();
    let second = host.create(sh("sleep 30"), named("dev")).await.unwrap();

    assert_eq!(first.info.name, "dev");
    assert_eq!(second.info.name, "dev (2)");
    assert_eq!(host.active_count(), 2);

    let renamed = host.update_name(&second.session_id, "dev").await.unwrap();
    assert_eq!(renamed, "dev (2)");

    host.shutdown().await;
    assert_eq!(host.active_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_socket_clients_drive_the_session() {
    let dir = control_dir();
    let host = host_in(dir.path());

    let created = host
        .create(sh("read line; echo remote:$line"), options(dir.path()))
        .await
        .unwrap();
    let id = created.session_id;
    let socket = dir.path().join(id.as_str()).join("ipc.sock");

    let client = SocketClient::connect(&socket).await.unwrap();
    client.send_status("claude", "thinking").await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let activity = host.get(&id).unwrap().activity;
            if activity.is_some_and(|a| a.status == "thinking") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    client.send_stdin("xyz\r").await.unwrap();
    wait_exited(&host, &id).await;

    let (_, events) = recording(dir.path(), &id);
    assert!(events_of(&events, "o").concat().contains("remote:xyz"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_static_title_is_injected_and_app_titles_filtered() {
    let dir = control_dir();
    let host = host_in(dir.path());
    let sink = Arc::new(CaptureSink::default());

    let options = SessionOptions {
        name: Some("work".into()),
        title_mode: TitleMode::Static,
        sink: Some(sink.clone() as Arc<dyn OutputSink>),
        ..options(dir.path())
    };
    let created = host
        .create(sh("sleep 0.3; printf '\\033]0;app title\\007visible'"), options)
        .await
        .unwrap();
    wait_exited(&host, &created.session_id).await;

    let shown = sink.text();
    assert!(shown.contains("\x1b]2;"), "{:?}", shown);
    assert!(shown.contains("work"));
    assert!(shown.contains("visible"));
    assert!(!shown.contains("app title"));

    // The recording keeps what the application actually wrote.
    let (_, events) = recording(dir.path(), &created.session_id);
    assert!(events_of(&events, "o").concat().contains("app title"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cleanup_exited_removes_finished_sessions() {
    let dir = control_dir();
    let host = host_in(dir.path());

    let done = host.create(sh("exit 0"), options(dir.path())).await.unwrap();
    let running = host
        .create(sh("sleep 30"), options(dir.path()))
        .await
        .unwrap();
    wait_exited(&host, &done.session_id).await;

    let removed = host.cleanup_exited().await.unwrap();
    assert_eq!(removed, vec![done.session_id.clone()]);
    assert!(!dir.path().join(done.session_id.as_str()).exists());
    assert!(host.is_active(&running.session_id));

    host.cleanup_session(&running.session_id).await.unwrap();
    assert!(matches!(
        host.get(&running.session_id),
        Err(SessionError::NotFound(_))
    ));
}
