//! SIGINT/SIGTERM handling for hosts that run sessions in the foreground.

use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::info;

use crate::error::DaemonError;

/// Sets a shared flag once SIGINT or SIGTERM arrives.
pub struct SignalHandler {
    shutdown: Arc<AtomicBool>,
    _thread: JoinHandle<()>,
}

impl SignalHandler {
    pub fn setup() -> Result<Self, DaemonError> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut signals =
            Signals::new([SIGINT, SIGTERM]).map_err(|e| DaemonError::SignalSetup(e.to_string()))?;

        let flag = Arc::clone(&shutdown);
        let thread = thread::Builder::new()
            .name("signal-handler".to_string())
            .spawn(move || {
                if let Some(sig) = signals.forever().next() {
                    info!(signal = sig, "Received signal, shutting sessions down");
                    flag.store(true, Ordering::SeqCst);
                }
            })
            .map_err(|e| {
                DaemonError::SignalSetup(format!("failed to spawn signal handler: {}", e))
            })?;

        Ok(Self {
            shutdown,
            _thread: thread,
        })
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Resolves once a shutdown signal has been received.
    pub async fn wait(&self) {
        while !self.shutdown_requested() {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}
