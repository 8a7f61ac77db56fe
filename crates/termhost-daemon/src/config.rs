use std::env;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_KILL_POLL_MS: u64 = 500;
const DEFAULT_KILL_TIMEOUT_MS: u64 = 3000;
const DEFAULT_POST_KILL_WAIT_MS: u64 = 100;
const DEFAULT_FOREGROUND_POLL_MS: u64 = 500;
const DEFAULT_MIN_COMMAND_SECS: u64 = 3;
const DEFAULT_RESIZE_GRACE_MS: u64 = 1000;
const DEFAULT_TITLE_QUIET_MS: u64 = 50;
const DEFAULT_TITLE_CHECK_MS: u64 = 10;
const DEFAULT_MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;
const DEFAULT_VALIDATION_BYTES: u64 = 1024 * 1024;
const DEFAULT_POSITION_TOLERANCE: u64 = 100;
const DEFAULT_ALWAYS_NOTIFY: &str = "claude";

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub control_dir: PathBuf,
    pub kill_poll_interval: Duration,
    pub kill_timeout: Duration,
    pub post_kill_wait: Duration,
    pub foreground_poll_interval: Duration,
    pub min_command_duration: Duration,
    pub always_notify_command: String,
    pub resize_grace: Duration,
    pub title_quiet_period: Duration,
    pub title_check_interval: Duration,
    pub max_frame_bytes: usize,
    pub validation_interval_bytes: u64,
    pub position_tolerance_bytes: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_millis(key: &str, default: u64) -> Duration {
    Duration::from_millis(env_parse(key).unwrap_or(default))
}

fn default_control_dir() -> PathBuf {
    let home = env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"));
    home.join(".termhost").join("control")
}

impl DaemonConfig {
    pub fn from_env() -> Self {
        Self {
            control_dir: env::var("TERMHOST_CONTROL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| default_control_dir()),
            kill_poll_interval: env_millis("TERMHOST_KILL_POLL_MS", DEFAULT_KILL_POLL_MS),
            kill_timeout: env_millis("TERMHOST_KILL_TIMEOUT_MS", DEFAULT_KILL_TIMEOUT_MS),
            post_kill_wait: Duration::from_millis(DEFAULT_POST_KILL_WAIT_MS),
            foreground_poll_interval: env_millis(
                "TERMHOST_FOREGROUND_POLL_MS",
                DEFAULT_FOREGROUND_POLL_MS,
            ),
            min_command_duration: Duration::from_secs(
                env_parse("TERMHOST_MIN_COMMAND_SECS").unwrap_or(DEFAULT_MIN_COMMAND_SECS),
            ),
            always_notify_command: DEFAULT_ALWAYS_NOTIFY.to_string(),
            resize_grace: env_millis("TERMHOST_RESIZE_GRACE_MS", DEFAULT_RESIZE_GRACE_MS),
            title_quiet_period: env_millis("TERMHOST_TITLE_QUIET_MS", DEFAULT_TITLE_QUIET_MS),
            title_check_interval: env_millis("TERMHOST_TITLE_CHECK_MS", DEFAULT_TITLE_CHECK_MS),
            max_frame_bytes: env_parse("TERMHOST_MAX_FRAME_BYTES")
                .unwrap_or(DEFAULT_MAX_FRAME_BYTES),
            validation_interval_bytes: env_parse("TERMHOST_VALIDATION_BYTES")
                .unwrap_or(DEFAULT_VALIDATION_BYTES),
            position_tolerance_bytes: DEFAULT_POSITION_TOLERANCE,
        }
    }

    pub fn with_control_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.control_dir = dir.into();
        self
    }

    pub fn with_kill_timing(mut self, poll_interval: Duration, timeout: Duration) -> Self {
        self.kill_poll_interval = poll_interval;
        self.kill_timeout = timeout;
        self
    }

    pub fn with_post_kill_wait(mut self, wait: Duration) -> Self {
        self.post_kill_wait = wait;
        self
    }

    pub fn with_foreground_poll_interval(mut self, interval: Duration) -> Self {
        self.foreground_poll_interval = interval;
        self
    }

    pub fn with_min_command_duration(mut self, duration: Duration) -> Self {
        self.min_command_duration = duration;
        self
    }

    pub fn with_resize_grace(mut self, grace: Duration) -> Self {
        self.resize_grace = grace;
        self
    }

    pub fn with_title_timing(mut self, quiet_period: Duration, check_interval: Duration) -> Self {
        self.title_quiet_period = quiet_period;
        self.title_check_interval = check_interval;
        self
    }

    pub fn with_max_frame_bytes(mut self, max: usize) -> Self {
        self.max_frame_bytes = max;
        self
    }

    pub fn with_validation_interval_bytes(mut self, bytes: u64) -> Self {
        self.validation_interval_bytes = bytes;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();
        assert_eq!(
            config.post_kill_wait,
            Duration::from_millis(DEFAULT_POST_KILL_WAIT_MS)
        );
        assert_eq!(config.position_tolerance_bytes, DEFAULT_POSITION_TOLERANCE);
        assert_eq!(config.always_notify_command, "claude");
        assert!(config.control_dir.ends_with("control") || env::var("TERMHOST_CONTROL_DIR").is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = DaemonConfig::default()
            .with_control_dir("/tmp/th")
            .with_kill_timing(Duration::from_millis(10), Duration::from_millis(60))
            .with_post_kill_wait(Duration::from_millis(5))
            .with_foreground_poll_interval(Duration::from_millis(20))
            .with_min_command_duration(Duration::from_secs(1))
            .with_resize_grace(Duration::from_millis(250))
            .with_title_timing(Duration::from_millis(5), Duration::from_millis(1))
            .with_max_frame_bytes(1024)
            .with_validation_interval_bytes(4096);

        assert_eq!(config.control_dir, PathBuf::from("/tmp/th"));
        assert_eq!(config.kill_poll_interval, Duration::from_millis(10));
        assert_eq!(config.kill_timeout, Duration::from_millis(60));
        assert_eq!(config.post_kill_wait, Duration::from_millis(5));
        assert_eq!(config.foreground_poll_interval, Duration::from_millis(20));
        assert_eq!(config.min_command_duration, Duration::from_secs(1));
        assert_eq!(config.resize_grace, Duration::from_millis(250));
        assert_eq!(config.title_quiet_period, Duration::from_millis(5));
        assert_eq!(config.title_check_interval, Duration::from_millis(1));
        assert_eq!(config.max_frame_bytes, 1024);
        assert_eq!(config.validation_interval_bytes, 4096);
    }
}
