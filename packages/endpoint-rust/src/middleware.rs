//! Metrics middleware for received messages.
//!
//! Wraps message processing in an `info_span!` carrying duration and outcome,
//! and counts processed messages per outcome with the `metrics` facade.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use metrics::counter;
use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use crate::endpoint::receive::IncomingMessage;
use crate::error::PipelineError;
use crate::recoverability::ProcessingOutcome;

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

/// Tower layer that instruments message processing with timing and counting.
#[derive(Debug, Clone)]
pub struct MetricsLayer {
    endpoint: String,
}

impl MetricsLayer {
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService {
            inner,
            endpoint: self.endpoint.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

/// Service wrapper that records processing duration and outcome.
#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
    endpoint: String,
}

impl<S> Service<IncomingMessage> for MetricsService<S>
where
    S: Service<IncomingMessage, Response = ProcessingOutcome, Error = PipelineError> + Send,
    S::Future: Send + 'static,
{
    type Response = ProcessingOutcome;
    type Error = PipelineError;
    type Future = Pin<Box<dyn Future<Output = Result<ProcessingOutcome, PipelineError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: IncomingMessage) -> Self::Future {
        let span = info_span!(
            "message",
            endpoint = %self.endpoint,
            message_id = %request.message.message_id,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );
        let endpoint = self.endpoint.clone();
        let fut = self.inner.call(request);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;
                let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

                let outcome = match &result {
                    Ok(outcome) => outcome.as_str(),
                    Err(_) => "error",
                };
                tracing::Span::current().record("duration_ms", duration_ms);
                tracing::Span::current().record("outcome", outcome);
                counter!(
                    "courier_messages_processed_total",
                    "endpoint" => endpoint,
                    "outcome" => outcome
                )
                .increment(1);

                tracing::info!(duration_ms, outcome, "message complete");
                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use courier_core::{Headers, TransportMessage};
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    use super::*;
    use crate::transport::TransportTransaction;

    /// Immediately-completing service that echoes a fixed outcome.
    struct Fixed(Result<ProcessingOutcome, ()>);

    impl Service<IncomingMessage> for Fixed {
        type Response = ProcessingOutcome;
        type Error = PipelineError;
        type Future =
            Pin<Box<dyn Future<Output = Result<ProcessingOutcome, PipelineError>> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _request: IncomingMessage) -> Self::Future {
            let result = self.0.map_err(|()| PipelineError::Cancelled);
            Box::pin(async move { result })
        }
    }

    fn request() -> IncomingMessage {
        IncomingMessage {
            message: TransportMessage::new("m-1", Headers::new(), Vec::new()),
            transaction: TransportTransaction::new(),
            cancellation: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn metrics_layer_passes_through_outcome() {
        let svc = MetricsLayer::new("Sales").layer(Fixed(Ok(ProcessingOutcome::MovedToError)));
        let outcome = svc.oneshot(request()).await.unwrap();
        assert_eq!(outcome, ProcessingOutcome::MovedToError);
    }

    #[tokio::test]
    async fn metrics_layer_passes_through_errors() {
        let svc = MetricsLayer::new("Sales").layer(Fixed(Err(())));
        let err = svc.oneshot(request()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
    }
}
