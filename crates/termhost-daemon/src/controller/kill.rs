//! Graceful-then-forceful process termination.
//!
//! The graceful signal is followed by liveness polls every `poll_interval`.
//! Once the accumulated wait reaches `ceiling` the process gets SIGKILL, so
//! escalation happens between `ceiling` and `ceiling + poll_interval`.

use std::io;
use std::time::Duration;

use termhost_terminal::{ProcessController, Signal};
use tracing::{debug, info, warn};

use crate::config::DaemonConfig;
use crate::sleeper::Sleeper;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KillPolicy {
    pub poll_interval: Duration,
    pub ceiling: Duration,
    pub post_kill_wait: Duration,
}

impl Default for KillPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            ceiling: Duration::from_secs(3),
            post_kill_wait: Duration::from_millis(100),
        }
    }
}

impl KillPolicy {
    pub fn from_config(config: &DaemonConfig) -> Self {
        Self {
            poll_interval: config.kill_poll_interval,
            ceiling: config.kill_timeout,
            post_kill_wait: config.post_kill_wait,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    /// Nothing to do, the process was already gone.
    AlreadyExited,
    /// The process exited after the graceful signal.
    Graceful { waited: Duration },
    /// The process outlived the ceiling and was killed.
    Escalated { waited: Duration },
    /// SIGKILL was requested directly.
    Forced,
    /// The request was handed to the process owning the session.
    Delegated,
}

fn is_alive(processes: &dyn ProcessController, pid: u32) -> bool {
    processes
        .check_process(pid)
        .map(|status| status.is_alive())
        .unwrap_or(false)
}

fn is_gone(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::ESRCH)
}

/// Sends `signal` to `pid` and escalates to SIGKILL if the process is still
/// alive when the policy's ceiling is reached.
pub async fn terminate(
    pid: u32,
    signal: Signal,
    policy: &KillPolicy,
    processes: &dyn ProcessController,
    sleeper: &dyn Sleeper,
) -> io::Result<KillOutcome> {
    if !is_alive(processes, pid) {
        debug!(pid, "Kill requested for a process that already exited");
        return Ok(KillOutcome::AlreadyExited);
    }

    if signal == Signal::Kill {
        match processes.send_signal(pid, Signal::Kill) {
            Err(e) if is_gone(&e) => return Ok(KillOutcome::AlreadyExited),
            Err(e) => return Err(e),
            Ok(()) => {}
        }
        sleeper.sleep(policy.post_kill_wait).await;
        return Ok(KillOutcome::Forced);
    }

    match processes.send_signal(pid, signal) {
        Err(e) if is_gone(&e) => return Ok(KillOutcome::AlreadyExited),
        Err(e) => return Err(e),
        Ok(()) => {}
    }

    let mut waited = Duration::ZERO;
    while waited < policy.ceiling {
        sleeper.sleep(policy.poll_interval).await;
        waited += policy.poll_interval;
        if !is_alive(processes, pid) {
            debug!(pid, waited_ms = waited.as_millis() as u64, "Process exited gracefully");
            return Ok(KillOutcome::Graceful { waited });
        }
    }

    warn!(pid, waited_ms = waited.as_millis() as u64, "Process ignored {:?}, sending SIGKILL", signal);
    match processes.send_signal(pid, Signal::Kill) {
        Err(e) if is_gone(&e) => {
            info!(pid, "Process exited just before SIGKILL");
            return Ok(KillOutcome::Graceful { waited });
        }
        Err(e) => return Err(e),
        Ok(()) => {}
    }
    sleeper.sleep(policy.post_kill_wait).await;
    Ok(KillOutcome::Escalated { waited })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sleeper::{MockSleeper, RealSleeper};
    use std::sync::Mutex;
    use std::time::Instant;
    use termhost_terminal::ProcessStatus;

    /// Process that dies on any signal listed in `dies_on`.
    struct MockProcessController {
        alive: Mutex<bool>,
        dies_on: Vec<Signal>,
        signals: Mutex<Vec<(Signal, Instant)>>,
    }

    impl MockProcessController {
        fn new(alive: bool, dies_on: &[Signal]) -> Self {
            Self {
                alive: Mutex::new(alive),
                dies_on: dies_on.to_vec(),
                signals: Mutex::new(Vec::new()),
            }
        }

        fn sent(&self) -> Vec<Signal> {
            self.signals.lock().unwrap().iter().map(|(s, _)| *s).collect()
        }
    }

    impl ProcessController for MockProcessController {
        fn check_process(&self, _pid: u32) -> Result<ProcessStatus, io::Error> {
            Ok(if *self.alive.lock().unwrap() {
                ProcessStatus::Running
            } else {
                ProcessStatus::NotFound
            })
        }

        fn send_signal(&self, _pid: u32, signal: Signal) -> Result<(), io::Error> {
            let mut alive = self.alive.lock().unwrap();
            if !*alive {
                return Err(io::Error::from_raw_os_error(libc::ESRCH));
            }
            self.signals.lock().unwrap().push((signal, Instant::now()));
            if self.dies_on.contains(&signal) {
                *alive = false;
            }
            Ok(())
        }
    }

    fn policy() -> KillPolicy {
        KillPolicy::default()
    }

    #[tokio::test]
    async fn test_escalates_after_ceiling() {
        let processes = MockProcessController::new(true, &[Signal::Kill]);
        let sleeper = MockSleeper::new();

        let outcome = terminate(1, Signal::Term, &policy(), &processes, &sleeper)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            KillOutcome::Escalated {
                waited: Duration::from_secs(3)
            }
        );
        assert_eq!(processes.sent(), vec![Signal::Term, Signal::Kill]);
        // Six polls of 500ms, then the post-kill wait.
        let durations = sleeper.durations();
        assert_eq!(durations.len(), 7);
        assert_eq!(
            durations[..6].iter().sum::<Duration>(),
            Duration::from_secs(3)
        );
        assert_eq!(durations[6], Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_escalation_window_with_uneven_interval() {
        let processes = MockProcessController::new(true, &[Signal::Kill]);
        let sleeper = MockSleeper::new();
        let policy = KillPolicy {
            poll_interval: Duration::from_millis(700),
            ceiling: Duration::from_secs(3),
            post_kill_wait: Duration::from_millis(100),
        };

        let outcome = terminate(1, Signal::Term, &policy, &processes, &sleeper)
            .await
            .unwrap();

        let KillOutcome::Escalated { waited } = outcome else {
            panic!("expected escalation, got {:?}", outcome);
        };
        assert!(waited >= policy.ceiling);
        assert!(waited <= policy.ceiling + policy.poll_interval);
    }

    #[tokio::test]
    async fn test_escalation_timing_in_real_time() {
        let processes = MockProcessController::new(true, &[Signal::Kill]);
        let policy = KillPolicy {
            poll_interval: Duration::from_millis(20),
            ceiling: Duration::from_millis(100),
            post_kill_wait: Duration::from_millis(1),
        };

        terminate(1, Signal::Term, &policy, &processes, &RealSleeper)
            .await
            .unwrap();

        let signals = processes.signals.lock().unwrap();
        assert_eq!(signals.len(), 2);
        let gap = signals[1].1.duration_since(signals[0].1);
        assert!(gap >= policy.ceiling, "escalated too early: {:?}", gap);
    }

    #[tokio::test]
    async fn test_graceful_exit_stops_polling() {
        let processes = MockProcessController::new(true, &[Signal::Term]);
        let sleeper = MockSleeper::new();

        let outcome = terminate(1, Signal::Term, &policy(), &processes, &sleeper)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            KillOutcome::Graceful {
                waited: Duration::from_millis(500)
            }
        );
        assert_eq!(processes.sent(), vec![Signal::Term]);
        assert_eq!(sleeper.call_count(), 1);
    }

    #[tokio::test]
    async fn test_sigkill_skips_polling() {
        let processes = MockProcessController::new(true, &[Signal::Kill]);
        let sleeper = MockSleeper::new();

        let outcome = terminate(1, Signal::Kill, &policy(), &processes, &sleeper)
            .await
            .unwrap();

        assert_eq!(outcome, KillOutcome::Forced);
        assert_eq!(processes.sent(), vec![Signal::Kill]);
        assert_eq!(sleeper.durations(), vec![Duration::from_millis(100)]);
    }

    #[tokio::test]
    async fn test_exited_process_gets_no_signal() {
        let processes = MockProcessController::new(false, &[]);
        let sleeper = MockSleeper::new();

        let outcome = terminate(1, Signal::Term, &policy(), &processes, &sleeper)
            .await
            .unwrap();

        assert_eq!(outcome, KillOutcome::AlreadyExited);
        assert!(processes.sent().is_empty());
        assert_eq!(sleeper.call_count(), 0);
    }
}
