//! Named background worker driving a [`BackgroundRunnable`].
//!
//! The worker owns a spawned task that reacts to three events: a submitted
//! task, a periodic tick, and cancellation. Used by the timeout poller.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const TASK_CHANNEL_CAPACITY: usize = 64;

// ---------------------------------------------------------------------------
// BackgroundRunnable trait
// ---------------------------------------------------------------------------

/// Work executed by a [`BackgroundWorker`].
#[async_trait]
pub trait BackgroundRunnable: Send + 'static {
    /// On-demand work item.
    type Task: Send + 'static;

    /// Handles one submitted task.
    async fn run(&mut self, task: Self::Task);

    /// Called on every tick of the worker's interval.
    async fn on_tick(&mut self) {}

    /// Called once after the loop exits.
    async fn shutdown(&mut self) {}
}

// ---------------------------------------------------------------------------
// BackgroundWorker
// ---------------------------------------------------------------------------

/// Handle to a running background loop.
///
/// Dropping the handle without calling [`BackgroundWorker::stop`] cancels the
/// loop but does not wait for it.
pub struct BackgroundWorker<R: BackgroundRunnable> {
    name: &'static str,
    tx: Option<mpsc::Sender<R::Task>>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl<R: BackgroundRunnable> BackgroundWorker<R> {
    /// Spawns the loop. The first tick fires one full `tick_interval` after
    /// start; late ticks are delayed rather than bunched up.
    pub fn start(name: &'static str, mut runnable: R, tick_interval: Duration) -> Self {
        let (tx, mut rx) = mpsc::channel::<R::Task>(TASK_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticks = tokio::time::interval_at(
                tokio::time::Instant::now() + tick_interval,
                tick_interval,
            );
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(worker = name, "background worker started");

            loop {
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    task = rx.recv() => match task {
                        Some(task) => runnable.run(task).await,
                        None => break,
                    },
                    _ = ticks.tick() => runnable.on_tick().await,
                }
            }

            runnable.shutdown().await;
            info!(worker = name, "background worker stopped");
        });

        Self {
            name,
            tx: Some(tx),
            cancel,
            handle: Some(handle),
        }
    }

    /// Name given at start, used in log fields.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Queues a task for the worker.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker has been stopped.
    pub async fn submit(&self, task: R::Task) -> anyhow::Result<()> {
        let Some(tx) = &self.tx else {
            anyhow::bail!("worker '{}' is not running", self.name);
        };
        tx.send(task)
            .await
            .map_err(|_| anyhow::anyhow!("worker '{}' has shut down", self.name))
    }

    /// Cancels the loop and waits for `shutdown` to complete.
    pub async fn stop(&mut self) {
        debug!(worker = self.name, "stopping background worker");
        self.cancel.cancel();
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl<R: BackgroundRunnable> Drop for BackgroundWorker<R> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
