use std::path::PathBuf;

use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
use termhost_terminal::TitleMode;

const LONG_ABOUT: &str = r#"termhost runs commands inside recorded pseudo-terminal sessions.

Every session gets a directory under the control directory holding its
metadata (session.json), an asciinema v2 recording (stdout) and a control
socket (ipc.sock). Other termhost invocations reach running sessions through
that socket.

EXAMPLES:
    # Run a shell in a recorded session
    termhost run

    # Run a build with a fixed terminal title
    termhost run --name build --title-mode static -- cargo build

    # Drive it from another terminal
    termhost list
    termhost send <id> "ls -la"
    termhost send <id> enter --key
    termhost resize <id> 120 40
    termhost kill <id>"#;

#[derive(Parser)]
#[command(name = "termhost")]
#[command(author, version)]
#[command(about = "Host, record and control terminal sessions")]
#[command(long_about = LONG_ABOUT)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Directory holding one subdirectory per session
    #[arg(long, global = true, env = "TERMHOST_CONTROL_DIR")]
    pub control_dir: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Output as JSON (shorthand for --format json)
    #[arg(long, global = true)]
    pub json: bool,
}

impl Cli {
    pub fn effective_format(&self) -> OutputFormat {
        if self.json {
            OutputFormat::Json
        } else {
            self.format
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TitleModeArg {
    None,
    Static,
    Dynamic,
    Filter,
}

impl From<TitleModeArg> for TitleMode {
    fn from(arg: TitleModeArg) -> Self {
        match arg {
            TitleModeArg::None => TitleMode::None,
            TitleModeArg::Static => TitleMode::Static,
            TitleModeArg::Dynamic => TitleMode::Dynamic,
            TitleModeArg::Filter => TitleMode::Filter,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run a command in a new recorded session
    #[command(long_about = r#"Run a command in a new recorded session.

Output is forwarded to this terminal and recorded. Lines typed on stdin are
sent to the session. When stdout is a terminal the session starts at its size
and follows it when it is resized. Without a command the user's shell is started. The
process exits with the session's exit code.

EXAMPLES:
    termhost run
    termhost run --name api -- npm run dev
    termhost run --title-mode dynamic -- claude"#)]
    Run {
        /// Session name (default: derived from command and directory)
        #[arg(short, long)]
        name: Option<String>,

        /// How the session manages the terminal title
        #[arg(long, value_enum, default_value = "none")]
        title_mode: TitleModeArg,

        /// Terminal width in columns (default: this terminal's width, or 80)
        #[arg(long)]
        cols: Option<u16>,

        /// Terminal height in rows (default: this terminal's height, or 24)
        #[arg(long)]
        rows: Option<u16>,

        /// Working directory (default: current directory)
        #[arg(short = 'd', long)]
        cwd: Option<PathBuf>,

        /// Command and arguments
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// List known sessions, newest first
    #[command(alias = "ls")]
    List,

    /// Send text or a named key to a session
    #[command(long_about = r#"Send text or a named key to a session.

With --key the argument is a key name such as enter, escape, arrow_up, tab,
f1, Ctrl+C or Alt+x instead of literal text.

EXAMPLES:
    termhost send <id> "git status"
    termhost send <id> enter --key
    termhost send <id> Ctrl+C --key"#)]
    Send {
        /// Session id
        id: String,

        /// Text to send, or the key name with --key
        text: String,

        /// Interpret the argument as a key name
        #[arg(short, long)]
        key: bool,
    },

    /// Resize a session's terminal
    Resize {
        /// Session id
        id: String,
        cols: u16,
        rows: u16,
    },

    /// Restore a session's initial terminal size
    ResetSize {
        /// Session id
        id: String,
    },

    /// Terminate a session (SIGTERM, escalating to SIGKILL)
    Kill {
        /// Session id
        id: String,

        /// Signal name or number, e.g. TERM, SIGINT, 9
        #[arg(short, long)]
        signal: Option<String>,
    },

    /// Rename a session
    Rename {
        /// Session id
        id: String,

        /// New name; a numeric suffix is added if it is taken
        name: String,
    },

    /// Remove exited sessions, or one session by id
    Cleanup {
        /// Remove only this session, killing it first if it still runs
        id: Option<String>,
    },
}
