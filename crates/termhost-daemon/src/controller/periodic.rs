//! Poll loops with an explicit interval and cancellation.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Continue,
    Stop,
}

/// Shared stop signal for every loop a controller owns.
#[derive(Debug, Clone)]
pub struct CancellationHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancellationHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Resolves once `cancel` has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

pub struct PeriodicTask {
    name: &'static str,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    /// Runs `tick` every `interval` until it returns [`Tick::Stop`] or the
    /// handle is cancelled. The first tick happens one interval after spawn.
    pub fn spawn<F, Fut>(
        name: &'static str,
        interval: Duration,
        cancel: &CancellationHandle,
        mut tick: F,
    ) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Tick> + Send + 'static,
    {
        let mut cancelled = cancel.subscribe();
        let handle = tokio::spawn(async move {
            if *cancelled.borrow_and_update() {
                return;
            }
            loop {
                tokio::select! {
                    changed = cancelled.changed() => {
                        if changed.is_err() || *cancelled.borrow() {
                            trace!(task = name, "Periodic task cancelled");
                            return;
                        }
                    }
                    _ = tokio::time::sleep(interval) => {
                        if tick().await == Tick::Stop {
                            trace!(task = name, "Periodic task finished");
                            return;
                        }
                    }
                }
            }
        });
        Self { name, handle }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn abort(&self) {
        self.handle.abort();
    }
}
