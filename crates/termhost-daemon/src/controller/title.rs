//! Deferred title injection. A title is written into the output stream only
//! once the application has been quiet for a while, so it never lands in the
//! middle of an escape sequence the application is emitting.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TitlePoll {
    Inject(String),
    Wait,
    Idle,
}

#[derive(Debug)]
pub struct TitleInjector {
    quiet_period: Duration,
    pending: Option<String>,
    last_write: Option<Instant>,
    checking: bool,
}

impl TitleInjector {
    pub fn new(quiet_period: Duration) -> Self {
        Self {
            quiet_period,
            pending: None,
            last_write: None,
            checking: false,
        }
    }

    pub fn record_write(&mut self, now: Instant) {
        self.last_write = Some(now);
    }

    pub fn pending(&self) -> Option<&str> {
        self.pending.as_deref()
    }

    /// Replaces any pending title. Returns true when no checker is running
    /// and the caller has to start one.
    pub fn set_pending(&mut self, title: String) -> bool {
        self.pending = Some(title);
        if self.checking {
            return false;
        }
        self.checking = true;
        true
    }

    pub fn poll(&mut self, now: Instant) -> TitlePoll {
        let Some(title) = self.pending.as_ref() else {
            self.checking = false;
            return TitlePoll::Idle;
        };
        let quiet = match self.last_write {
            Some(at) => now.saturating_duration_since(at) >= self.quiet_period,
            None => true,
        };
        if !quiet {
            return TitlePoll::Wait;
        }
        let title = title.clone();
        self.pending = None;
        self.checking = false;
        TitlePoll::Inject(title)
    }
}
