//! Receive loop: pulls messages from the input queue and processes each on
//! its own task, throttled by a shared concurrency limit.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use courier_core::TransportMessage;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower::limit::{ConcurrencyLimit, GlobalConcurrencyLimitLayer};
use tower::{Service, ServiceBuilder, ServiceExt};
use tracing::{debug, error, info, warn};

use crate::error::PipelineError;
use crate::middleware::{MetricsLayer, MetricsService};
use crate::recoverability::{ProcessingOutcome, RecoverabilityExecutor};
use crate::traits::Transport;
use crate::transport::TransportTransaction;

/// A received message handed to the processing service.
#[derive(Debug)]
pub struct IncomingMessage {
    pub message: TransportMessage,
    /// Holds the receive receipt; settled by the recoverability executor.
    pub transaction: TransportTransaction,
    pub cancellation: CancellationToken,
}

// ---------------------------------------------------------------------------
// RecoverabilityService
// ---------------------------------------------------------------------------

/// Innermost service of the processing stack.
#[derive(Clone)]
pub struct RecoverabilityService {
    executor: Arc<RecoverabilityExecutor>,
}

impl RecoverabilityService {
    #[must_use]
    pub fn new(executor: Arc<RecoverabilityExecutor>) -> Self {
        Self { executor }
    }
}

impl Service<IncomingMessage> for RecoverabilityService {
    type Response = ProcessingOutcome;
    type Error = PipelineError;
    type Future = Pin<Box<dyn Future<Output = Result<ProcessingOutcome, PipelineError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: IncomingMessage) -> Self::Future {
        let executor = Arc::clone(&self.executor);
        Box::pin(async move {
            executor
                .process(request.message, &request.transaction, &request.cancellation)
                .await
        })
    }
}

/// Full per-message service stack: concurrency limit, metrics, recoverability.
pub type ProcessingService = ConcurrencyLimit<MetricsService<RecoverabilityService>>;

/// Builds the processing stack drawing from `permits`. Clones, and stacks
/// built over the same semaphore, share the limit.
#[must_use]
pub fn processing_service(
    endpoint: &str,
    permits: Arc<Semaphore>,
    executor: Arc<RecoverabilityExecutor>,
) -> ProcessingService {
    ServiceBuilder::new()
        .layer(GlobalConcurrencyLimitLayer::with_semaphore(permits))
        .layer(MetricsLayer::new(endpoint))
        .service(RecoverabilityService::new(executor))
}

// ---------------------------------------------------------------------------
// ReceiveLoop
// ---------------------------------------------------------------------------

/// One receive loop over one transport's input queue.
pub struct ReceiveLoop {
    pub queue: String,
    pub transport: Arc<dyn Transport>,
    pub service: ProcessingService,
    pub poll_interval: Duration,
}

impl ReceiveLoop {
    /// Runs until `shutdown` is cancelled. Each message is processed on a task
    /// tracked by `tracker` and observes a child of `processing`.
    pub async fn run(
        self,
        shutdown: CancellationToken,
        processing: CancellationToken,
        tracker: TaskTracker,
    ) {
        info!(queue = %self.queue, "receive loop started");
        loop {
            let mut slot = self.service.clone();
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                ready = ServiceExt::<IncomingMessage>::ready(&mut slot) => {
                    if let Err(e) = ready {
                        error!(queue = %self.queue, error = %e, "processing service unavailable");
                        break;
                    }
                }
            }
            if shutdown.is_cancelled() {
                break;
            }

            let transaction = TransportTransaction::new();
            match self.transport.receive(Some(&transaction)).await {
                Ok(Some(message)) => {
                    debug!(queue = %self.queue, message_id = %message.message_id, "received");
                    let queue = self.queue.clone();
                    let response = slot.call(IncomingMessage {
                        message,
                        transaction,
                        cancellation: processing.child_token(),
                    });
                    tracker.spawn(async move {
                        if let Err(e) = response.await {
                            error!(queue = %queue, kind = e.kind(), error = %e, "message could not be settled");
                        }
                    });
                }
                Ok(None) => {
                    drop(slot);
                    if self.idle(&shutdown).await {
                        break;
                    }
                }
                Err(e) => {
                    drop(slot);
                    warn!(queue = %self.queue, error = %e, "receive failed");
                    if self.idle(&shutdown).await {
                        break;
                    }
                }
            }
        }
        info!(queue = %self.queue, "receive loop stopped");
    }

    /// Waits one poll interval. Returns `true` if shutdown was requested.
    async fn idle(&self, shutdown: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => true,
            () = tokio::time::sleep(self.poll_interval) => false,
        }
    }
}
