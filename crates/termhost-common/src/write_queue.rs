//! Serial execution of asynchronous write tasks.
//!
//! Every task submitted to one [`WriteQueue`] runs to completion before the
//! next one starts, in submission order. A failing task is logged and the
//! queue moves on; there is no fail-fast behaviour. Tasks run on their own
//! tokio task so a panic is contained the same way as an error.

use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Notify;
use tokio::sync::mpsc;
use tracing::{error, warn};

type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

#[derive(Debug, Default)]
struct Outstanding {
    count: AtomicUsize,
    idle: Notify,
}

impl Outstanding {
    fn finish_one(&self) {
        if self.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}

#[derive(Debug, Clone)]
pub struct WriteQueue {
    label: Arc<str>,
    tx: mpsc::UnboundedSender<Task>,
    outstanding: Arc<Outstanding>,
}

impl WriteQueue {
    /// Creates the queue and spawns its worker on the current tokio runtime.
    ///
    /// # Panics
    /// Panics when called outside a tokio runtime, like `tokio::spawn`.
    pub fn new(label: impl Into<String>) -> Self {
        let label: Arc<str> = Arc::from(label.into());
        let (tx, mut rx) = mpsc::unbounded_channel::<Task>();
        let outstanding = Arc::new(Outstanding::default());

        let worker_state = Arc::clone(&outstanding);
        let worker_label = Arc::clone(&label);
        tokio::spawn(async move {
            while let Some(task) = rx.recv().await {
                if let Err(e) = tokio::spawn(task).await {
                    error!(queue = %worker_label, error = %e, "Write task panicked");
                }
                worker_state.finish_one();
            }
        });

        Self {
            label,
            tx,
            outstanding,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Schedules `task` after everything already enqueued.
    pub fn enqueue<F, E>(&self, task: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let label = Arc::clone(&self.label);
        let wrapped: Task = Box::pin(async move {
            if let Err(e) = task.await {
                error!(queue = %label, error = %e, "Write task failed");
            }
        });

        self.outstanding.count.fetch_add(1, Ordering::AcqRel);
        if self.tx.send(wrapped).is_err() {
            warn!(queue = %self.label, "Write queue worker is gone, dropping task");
            self.outstanding.finish_one();
        }
    }

    /// Number of tasks enqueued but not yet finished.
    pub fn outstanding(&self) -> usize {
        self.outstanding.count.load(Ordering::Acquire)
    }

    /// Waits until the queue is empty, including tasks enqueued while waiting.
    pub async fn drain(&self) {
        loop {
            let notified = self.outstanding.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.outstanding() == 0 {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    #[tokio::test]
    async fn test_tasks_complete_in_submission_order() {
        let queue = WriteQueue::new("test");
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..10u64 {
            let order = Arc::clone(&order);
            queue.enqueue(async move {
                // Earlier tasks sleep longer, so any overlap would reorder them.
                tokio::time::sleep(Duration::from_millis(20 - i * 2)).await;
                order.lock().unwrap().push(i);
                Ok::<_, String>(())
            });
        }

        queue.drain().await;
        assert_eq!(*order.lock().unwrap(), (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_failed_task_does_not_stop_queue() {
        let queue = WriteQueue::new("test");
        let ran = Arc::new(Mutex::new(Vec::new()));

        let first = Arc::clone(&ran);
        queue.enqueue(async move {
            first.lock().unwrap().push("first");
            Err::<(), _>("disk full")
        });
        let second = Arc::clone(&ran);
        queue.enqueue(async move {
            second.lock().unwrap().push("second");
            Ok::<_, String>(())
        });

        queue.drain().await;
        assert_eq!(*ran.lock().unwrap(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_tasks_never_overlap() {
        let queue = WriteQueue::new("test");
        let active = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        for _ in 0..8 {
            let active = Arc::clone(&active);
            let max_seen = Arc::clone(&max_seen);
            queue.enqueue(async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::task::yield_now().await;
                tokio::time::sleep(Duration::from_millis(2)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, String>(())
            });
        }

        queue.drain().await;
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_drain_waits_for_tasks_enqueued_during_drain() {
        let queue = WriteQueue::new("test");
        let done = Arc::new(Mutex::new(Vec::new()));

        let inner_queue = queue.clone();
        let inner_done = Arc::clone(&done);
        queue.enqueue(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let late = Arc::clone(&inner_done);
            inner_queue.enqueue(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                late.lock().unwrap().push("late");
                Ok::<_, String>(())
            });
            inner_done.lock().unwrap().push("early");
            Ok::<_, String>(())
        });

        queue.drain().await;
        assert_eq!(*done.lock().unwrap(), vec!["early", "late"]);
        assert_eq!(queue.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_drain_on_empty_queue_returns() {
        let queue = WriteQueue::new("empty");
        queue.drain().await;
        assert_eq!(queue.outstanding(), 0);
        assert_eq!(queue.label(), "empty");
    }
}
