//! One handler per subcommand. Every handler works against a [`SessionHost`];
//! sessions owned by other termhost processes are reached through their
//! control sockets.

use std::io::{BufRead, IsTerminal};
use std::os::fd::AsRawFd;
use std::sync::Arc;

use serde_json::json;
use termhost_daemon::{
    DaemonConfig, Input, KillOutcome, ResizeSource, SessionController, SessionHost, SessionId,
    SessionOptions, SignalHandler, StdoutSink,
};
use termhost_terminal::process::terminal_size;
use termhost_terminal::{Signal, TitleMode};
use tokio::signal::unix::SignalKind;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::commands::{Cli, Commands};
use crate::error::CliError;
use crate::presenter::Presenter;

pub type HandlerResult = Result<i32, CliError>;

pub struct HandlerContext {
    pub host: SessionHost,
    pub presenter: Box<dyn Presenter>,
}

impl HandlerContext {
    pub fn new(config: DaemonConfig, presenter: Box<dyn Presenter>) -> Result<Self, CliError> {
        Ok(Self {
            host: SessionHost::open(config)?,
            presenter,
        })
    }
}

/// Runs the parsed command and returns the process exit code.
pub async fn dispatch(ctx: &HandlerContext, cli: Cli) -> HandlerResult {
    match cli.command {
        Commands::Run {
            name,
            title_mode,
            cols,
            rows,
            cwd,
            command,
        } => {
            let working_dir = match cwd {
                Some(dir) => dir,
                None => std::env::current_dir()
                    .map_err(|e| CliError::InvalidArgument(format!("current directory: {}", e)))?,
            };
            let (host_cols, host_rows) = hosting_terminal_size().unwrap_or((80, 24));
            let options = SessionOptions {
                name,
                working_dir,
                cols: cols.unwrap_or(host_cols),
                rows: rows.unwrap_or(host_rows),
                title_mode: TitleMode::from(title_mode),
                sink: Some(Arc::new(StdoutSink)),
                ..SessionOptions::default()
            };
            handle_run(ctx, command, options).await
        }
        Commands::List => handle_list(ctx),
        Commands::Send { id, text, key } => {
            let input = if key { Input::Key(text) } else { Input::Text(text) };
            handle_send(ctx, &parse_id(&id)?, input).await
        }
        Commands::Resize { id, cols, rows } => handle_resize(ctx, &parse_id(&id)?, cols, rows).await,
        Commands::ResetSize { id } => handle_reset_size(ctx, &parse_id(&id)?).await,
        Commands::Kill { id, signal } => {
            let signal = signal.as_deref().map(parse_signal).transpose()?;
            handle_kill(ctx, &parse_id(&id)?, signal).await
        }
        Commands::Rename { id, name } => handle_rename(ctx, &parse_id(&id)?, &name).await,
        Commands::Cleanup { id } => match id {
            Some(id) => handle_cleanup_one(ctx, &parse_id(&id)?).await,
            None => handle_cleanup_exited(ctx).await,
        },
    }
}

fn parse_id(raw: &str) -> Result<SessionId, CliError> {
    Ok(SessionId::try_new(raw)?)
}

/// Accepts `TERM`, `SIGTERM`, `term` or a number such as `15`.
pub fn parse_signal(raw: &str) -> Result<Signal, CliError> {
    let parsed = match raw.trim().parse::<i64>() {
        Ok(number) => Signal::from_number(number),
        Err(_) => Signal::from_name(raw),
    };
    parsed.ok_or_else(|| CliError::InvalidArgument(format!("unsupported signal '{}'", raw)))
}

async fn handle_run(ctx: &HandlerContext, command: Vec<String>, options: SessionOptions) -> HandlerResult {
    let signals = SignalHandler::setup()?;
    let created = ctx.host.create(command, options).await?;
    let id = created.session_id.clone();
    eprintln!("termhost: session {} ({})", id, created.info.name);

    let Some(controller) = ctx.host.controller(&id) else {
        // Exited before we looked.
        let info = ctx.host.get(&id)?;
        return Ok(info.exit_code.unwrap_or(0));
    };

    forward_stdin(ctx, &id);
    follow_terminal_size(&controller);

    let code = tokio::select! {
        code = controller.wait_for_exit() => code,
        _ = signals.wait() => {
            info!(session_id = %id, "Shutdown requested");
            ctx.host.shutdown().await;
            controller.exit_code().unwrap_or(130)
        }
    };
    debug!(session_id = %id, exit_code = code, "Run finished");
    Ok(code)
}

/// Feeds stdin lines into the session until EOF. A terminal stdin is
/// line-buffered, so each line is sent with a carriage return.
fn forward_stdin(ctx: &HandlerContext, id: &SessionId) {
    let Some(controller) = ctx.host.controller(id) else {
        return;
    };
    let interactive = std::io::stdin().is_terminal();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let reader = std::thread::Builder::new()
        .name("stdin".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                let terminator = if interactive { "\r" } else { "\n" };
                if tx.send(format!("{}{}", line, terminator)).is_err() {
                    break;
                }
            }
        });
    if let Err(e) = reader {
        warn!(error = %e, "Failed to start stdin reader");
        return;
    }

    tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            if let Err(e) = controller.send_input(Input::Text(line)) {
                debug!(error = %e, "Stopped forwarding stdin");
                break;
            }
        }
    });
}

fn hosting_terminal_size() -> Option<(u16, u16)> {
    if !std::io::stdout().is_terminal() {
        return None;
    }
    terminal_size(std::io::stdout().as_raw_fd())
}

/// Mirrors SIGWINCH on the hosting terminal into the session as terminal
/// resizes, which lose to a recent remote resize.
fn follow_terminal_size(controller: &Arc<SessionController>) {
    if !std::io::stdout().is_terminal() {
        return;
    }
    let mut winch = match tokio::signal::unix::signal(SignalKind::window_change()) {
        Ok(winch) => winch,
        Err(e) => {
            warn!(error = %e, "Failed to watch terminal size");
            return;
        }
    };

    let controller = Arc::clone(controller);
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = controller.wait_for_exit() => break,
                received = winch.recv() => {
                    if received.is_none() {
                        break;
                    }
                    let Some((cols, rows)) = hosting_terminal_size() else {
                        continue;
                    };
                    if let Err(e) = controller.resize(cols, rows, ResizeSource::Terminal) {
                        debug!(session_id = %controller.id(), error = %e, "Terminal resize failed");
                    }
                }
            }
        }
    });
}

fn handle_list(ctx: &HandlerContext) -> HandlerResult {
    let sessions = ctx.host.list()?;
    ctx.presenter.present_sessions(&sessions);
    Ok(0)
}

async fn handle_send(ctx: &HandlerContext, id: &SessionId, input: Input) -> HandlerResult {
    ctx.host.send_input(id, input).await?;
    ctx.presenter
        .present_success("Sent", json!({ "session_id": id, "sent": true }));
    Ok(0)
}

async fn handle_resize(ctx: &HandlerContext, id: &SessionId, cols: u16, rows: u16) -> HandlerResult {
    let applied = ctx.host.resize(id, cols, rows).await?;
    ctx.presenter.present_success(
        &format!("Resized to {}x{}", cols, rows),
        json!({ "session_id": id, "cols": cols, "rows": rows, "applied": applied }),
    );
    Ok(0)
}

async fn handle_reset_size(ctx: &HandlerContext, id: &SessionId) -> HandlerResult {
    ctx.host.reset_size(id).await?;
    ctx.presenter
        .present_success("Size reset", json!({ "session_id": id, "reset": true }));
    Ok(0)
}

async fn handle_kill(ctx: &HandlerContext, id: &SessionId, signal: Option<Signal>) -> HandlerResult {
    let outcome = ctx.host.kill(id, signal).await?;
    let message = match outcome {
        KillOutcome::AlreadyExited => "Session had already exited".to_string(),
        KillOutcome::Graceful { waited } => format!("Session exited after {} ms", waited.as_millis()),
        KillOutcome::Escalated { waited } => {
            format!("Session ignored the signal for {} ms and was killed", waited.as_millis())
        }
        KillOutcome::Forced => "Session killed".to_string(),
        KillOutcome::Delegated => "Kill request sent to session".to_string(),
    };
    ctx.presenter.present_success(
        &message,
        json!({ "session_id": id, "outcome": format!("{:?}", outcome) }),
    );
    Ok(0)
}

async fn handle_rename(ctx: &HandlerContext, id: &SessionId, name: &str) -> HandlerResult {
    let applied = ctx.host.update_name(id, name).await?;
    ctx.presenter.present_success(
        &format!("Renamed to '{}'", applied),
        json!({ "session_id": id, "name": applied }),
    );
    Ok(0)
}

async fn handle_cleanup_one(ctx: &HandlerContext, id: &SessionId) -> HandlerResult {
    ctx.host.cleanup_session(id).await?;
    ctx.presenter.present_removed(std::slice::from_ref(id));
    Ok(0)
}

async fn handle_cleanup_exited(ctx: &HandlerContext) -> HandlerResult {
    let removed = ctx.host.cleanup_exited().await?;
    ctx.presenter.present_removed(&removed);
    Ok(0)
}
