//! Arbitration between the hosting terminal and remote clients resizing the
//! same session. Remote resizes always win; the hosting terminal is ignored
//! while a remote claim is younger than the grace period.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeSource {
    Terminal,
    Remote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeClaim {
    pub cols: u16,
    pub rows: u16,
    pub source: ResizeSource,
    pub at: Instant,
}

#[derive(Debug)]
pub struct ResizeArbiter {
    grace: Duration,
    last: Option<ResizeClaim>,
}

impl ResizeArbiter {
    pub fn new(grace: Duration) -> Self {
        Self { grace, last: None }
    }

    pub fn last_claim(&self) -> Option<ResizeClaim> {
        self.last
    }

    /// Returns whether the resize should be applied.
    pub fn claim(&mut self, source: ResizeSource, cols: u16, rows: u16, now: Instant) -> bool {
        if source == ResizeSource::Terminal {
            if let Some(last) = self.last {
                if last.source == ResizeSource::Remote
                    && now.saturating_duration_since(last.at) < self.grace
                {
                    return false;
                }
            }
        }
        self.last = Some(ResizeClaim {
            cols,
            rows,
            source,
            at: now,
        });
        true
    }
}
