//! Endpoint runtime: assembly, receive loops, and the timeout poller.
//!
//! ```text
//! EndpointBuilder::build ──► Endpoint ──start──► RunningEndpoint ──stop──► ()
//!                               │                     │
//!                               └── session() ────────┴── session()
//! ```

pub mod builder;
pub mod connectors;
pub mod operations;
pub mod receive;
pub mod session;

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;

pub use builder::EndpointBuilder;
pub use operations::{MessageOperations, OutgoingScope};
pub use receive::IncomingMessage;
pub use session::MessageSession;

use crate::config::EndpointConfig;
use crate::timeouts::{PollTask, TimeoutManager, TimeoutPoller};
use crate::worker::BackgroundWorker;
use receive::ReceiveLoop;

/// A built, not yet started endpoint.
pub struct Endpoint {
    config: EndpointConfig,
    input_queue: String,
    step_ids: Vec<String>,
    timeouts: TimeoutManager,
    operations: Arc<MessageOperations>,
    receivers: Vec<ReceiveLoop>,
}

impl Endpoint {
    #[must_use]
    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    /// Shared input queue address of this endpoint.
    #[must_use]
    pub fn input_queue(&self) -> &str {
        &self.input_queue
    }

    /// Resolved step ids across all stages, in execution order.
    #[must_use]
    pub fn step_ids(&self) -> &[String] {
        &self.step_ids
    }

    #[must_use]
    pub fn timeouts(&self) -> &TimeoutManager {
        &self.timeouts
    }

    /// Session for sending before (or without) starting the endpoint.
    #[must_use]
    pub fn session(&self) -> MessageSession {
        MessageSession::new(Arc::clone(&self.operations))
    }

    /// Starts the receive loops (none for send-only endpoints) and the
    /// timeout poller.
    #[must_use]
    pub fn start(self) -> RunningEndpoint {
        let shutdown = CancellationToken::new();
        let processing = CancellationToken::new();
        let tracker = TaskTracker::new();

        let loops = self
            .receivers
            .into_iter()
            .map(|receiver| {
                tokio::spawn(receiver.run(shutdown.clone(), processing.clone(), tracker.clone()))
            })
            .collect();
        let poller = BackgroundWorker::start(
            "timeout-poller",
            TimeoutPoller::new(self.timeouts.clone()),
            Duration::from_millis(self.config.timeout_poll_interval_ms.max(1)),
        );
        info!(endpoint = %self.config.endpoint_name, "endpoint started");

        RunningEndpoint {
            endpoint_name: self.config.endpoint_name,
            session: MessageSession::new(self.operations),
            timeouts: self.timeouts,
            shutdown,
            processing,
            tracker,
            loops,
            poller,
        }
    }
}

/// Handle to a started endpoint.
pub struct RunningEndpoint {
    endpoint_name: String,
    session: MessageSession,
    timeouts: TimeoutManager,
    shutdown: CancellationToken,
    processing: CancellationToken,
    tracker: TaskTracker,
    loops: Vec<JoinHandle<()>>,
    poller: BackgroundWorker<TimeoutPoller>,
}

impl RunningEndpoint {
    #[must_use]
    pub fn session(&self) -> MessageSession {
        self.session.clone()
    }

    #[must_use]
    pub fn timeouts(&self) -> &TimeoutManager {
        &self.timeouts
    }

    /// Asks the poller to dispatch due timeouts now instead of on its next tick.
    ///
    /// # Errors
    ///
    /// Fails if the poller has stopped.
    pub async fn poll_timeouts_now(&self) -> anyhow::Result<()> {
        self.poller.submit(PollTask::PollNow).await
    }

    /// Stops receiving, waits for in-flight messages to finish, then stops the
    /// timeout poller.
    pub async fn stop(self) {
        self.shutdown_with(false).await;
    }

    /// Like [`RunningEndpoint::stop`], but cancels in-flight processing. The
    /// interrupted messages are rolled back to their queues.
    pub async fn abort(self) {
        self.shutdown_with(true).await;
    }

    async fn shutdown_with(mut self, cancel_in_flight: bool) {
        self.shutdown.cancel();
        if cancel_in_flight {
            self.processing.cancel();
        }
        for handle in self.loops.drain(..) {
            let _ = handle.await;
        }
        self.tracker.close();
        self.tracker.wait().await;
        self.poller.stop().await;
        info!(endpoint = %self.endpoint_name, "endpoint stopped");
    }
}

// ---------------------------------------------------------------------------
// Integration tests
// ---------------------------------------------------------------------------
