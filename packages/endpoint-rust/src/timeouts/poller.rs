//! Background runnable that dispatches due timeouts on every tick.

use async_trait::async_trait;
use tracing::{debug, error};

use super::{now_millis, TimeoutManager};
use crate::worker::BackgroundRunnable;

/// On-demand poller work.
#[derive(Debug)]
pub enum PollTask {
    /// Poll right away instead of waiting for the next tick.
    PollNow,
}

/// Drives [`TimeoutManager::dispatch_due`] from a
/// [`BackgroundWorker`](crate::worker::BackgroundWorker).
pub struct TimeoutPoller {
    manager: TimeoutManager,
}

impl TimeoutPoller {
    #[must_use]
    pub fn new(manager: TimeoutManager) -> Self {
        Self { manager }
    }

    async fn poll(&self) {
        match self.manager.dispatch_due(now_millis()).await {
            Ok(0) => {}
            Ok(count) => debug!(count, "dispatched due timeouts"),
            Err(e) => error!(error = %e, "polling due timeouts failed"),
        }
    }
}

#[async_trait]
impl BackgroundRunnable for TimeoutPoller {
    type Task = PollTask;

    async fn run(&mut self, task: PollTask) {
        match task {
            PollTask::PollNow => self.poll().await,
        }
    }

    async fn on_tick(&mut self) {
        self.poll().await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use courier_core::Headers;

    use super::*;
    use crate::timeouts::{InMemoryTimeoutPersister, TimeoutEntry};
    use crate::traits::{TimeoutPersister, Transport};
    use crate::transport::{InMemoryBroker, InMemoryTransport};
    use crate::worker::BackgroundWorker;

    #[tokio::test]
    async fn poll_now_dispatches_due_entries() {
        let broker = Arc::new(InMemoryBroker::new());
        broker.create_queue("target");
        let transport = Arc::new(InMemoryTransport::new(Arc::clone(&broker)));
        transport.init("self").await.unwrap();
        let persister = Arc::new(InMemoryTimeoutPersister::new());
        // Stored directly so the entry is already overdue when polled.
        persister
            .add(TimeoutEntry::new("target", 1, Headers::new(), Vec::new()))
            .await
            .unwrap();

        let manager = TimeoutManager::new(persister.clone(), transport);
        let mut worker = BackgroundWorker::start(
            "timeout-poller",
            TimeoutPoller::new(manager),
            Duration::from_secs(3600),
        );
        worker.submit(PollTask::PollNow).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        worker.stop().await;

        assert_eq!(broker.len("target"), 1);
        assert!(persister.is_empty());
    }
}
