//! Runs one received message through the incoming pipeline and carries out
//! the recoverability decision for every failed attempt.

use std::sync::Arc;
use std::time::Duration;

use courier_core::headers::{
    self, DELAYED_RETRIES, DELAYED_RETRIES_TIMESTAMP, EXCEPTION_KIND, EXCEPTION_MESSAGE,
    EXCEPTION_SOURCE, FAILED_QUEUE, PROCESSING_FAILURES, TIME_OF_FAILURE,
};
use courier_core::TransportMessage;
use metrics::counter;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::{
    CompositeRecoverabilityObserver, ErrorContext, RecoverabilityAction, RecoverabilityObserver,
    RecoverabilityPolicy,
};
use crate::config::{RecoverabilityConfig, TransactionMode};
use crate::error::PipelineError;
use crate::pipeline::{IncomingPhysicalContext, Stage};
use crate::timeouts::{now_millis, TimeoutEntry, TimeoutManager};
use crate::traits::Transport;
use crate::transport::TransportTransaction;

/// How processing of one received message ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingOutcome {
    Processed,
    DelayedRetry,
    MovedToError,
    /// Rolled back; the message is back in its queue.
    Cancelled,
}

impl ProcessingOutcome {
    /// Label used in logs and metrics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::DelayedRetry => "delayed_retry",
            Self::MovedToError => "moved_to_error",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Attempt loop around the incoming pipeline.
pub struct RecoverabilityExecutor {
    input_queue: String,
    error_queue: String,
    transaction_mode: TransactionMode,
    config: RecoverabilityConfig,
    policy: Option<RecoverabilityPolicy>,
    observers: CompositeRecoverabilityObserver,
    pipeline: Arc<Stage<IncomingPhysicalContext>>,
    transport: Arc<dyn Transport>,
    timeouts: TimeoutManager,
}

impl RecoverabilityExecutor {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        input_queue: impl Into<String>,
        error_queue: impl Into<String>,
        transaction_mode: TransactionMode,
        config: RecoverabilityConfig,
        policy: Option<RecoverabilityPolicy>,
        observers: CompositeRecoverabilityObserver,
        pipeline: Arc<Stage<IncomingPhysicalContext>>,
        transport: Arc<dyn Transport>,
        timeouts: TimeoutManager,
    ) -> Self {
        Self {
            input_queue: input_queue.into(),
            error_queue: error_queue.into(),
            transaction_mode,
            config,
            policy,
            observers,
            pipeline,
            transport,
            timeouts,
        }
    }

    /// Processes `message`, which was received under `transaction`, until it
    /// succeeds, is deferred, is moved to the error queue, or is cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error only if the transaction could not be settled, or the
    /// delayed-retry or error-queue dispatch failed. The receive has been
    /// rolled back in that case.
    pub async fn process(
        &self,
        message: TransportMessage,
        transaction: &TransportTransaction,
        cancellation: &CancellationToken,
    ) -> Result<ProcessingOutcome, PipelineError> {
        let previous_failures = headers::counter(&message.headers, PROCESSING_FAILURES);
        let delayed_performed = headers::counter(&message.headers, DELAYED_RETRIES);
        let send_transaction = match self.transaction_mode {
            TransactionMode::SendsAtomicWithReceive => Some(transaction.clone()),
            TransactionMode::ReceiveOnly => None,
        };

        let mut local_failures = 0u32;
        loop {
            let mut ctx = IncomingPhysicalContext::new(
                message.clone(),
                send_transaction.clone(),
                cancellation.child_token(),
            );
            let failure = match self.pipeline.invoke(&mut ctx).await {
                Ok(()) => {
                    self.settle(transaction).await?;
                    return Ok(ProcessingOutcome::Processed);
                }
                Err(PipelineError::Cancelled) => {
                    self.abandon(transaction, "processing cancelled").await;
                    return Ok(ProcessingOutcome::Cancelled);
                }
                Err(failure) => failure,
            };

            let discarded = transaction.discard_sends();
            local_failures += 1;
            let error_ctx = ErrorContext {
                message_id: message.message_id.clone(),
                headers: message.headers.clone(),
                body: message.body.clone(),
                error_kind: failure.kind(),
                error_message: failure.to_string(),
                error_source: failure.source_chain(),
                attempt: previous_failures.saturating_add(local_failures),
                immediate_processing_failures: local_failures,
                delayed_deliveries_performed: delayed_performed,
            };
            let action = match &self.policy {
                Some(policy) => policy(&self.config, &error_ctx, &self.error_queue),
                None => super::default_policy(&self.config, &error_ctx, &self.error_queue),
            };
            debug!(
                message_id = %error_ctx.message_id,
                attempt = error_ctx.attempt,
                discarded_sends = discarded,
                ?action,
                "attempt failed"
            );

            match action {
                RecoverabilityAction::ImmediateRetry => {
                    warn!(
                        message_id = %error_ctx.message_id,
                        attempt = error_ctx.attempt,
                        error = %error_ctx.error_message,
                        "immediate retry"
                    );
                    counter!("courier_immediate_retries_total").increment(1);
                    self.observers.on_immediate_retry(&error_ctx);
                    if cancellation.is_cancelled() {
                        self.abandon(transaction, "cancelled before retry").await;
                        return Ok(ProcessingOutcome::Cancelled);
                    }
                }
                RecoverabilityAction::DelayedRetry { delay } => {
                    self.defer(&message, &error_ctx, delay, transaction).await?;
                    warn!(
                        message_id = %error_ctx.message_id,
                        attempt = error_ctx.attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %error_ctx.error_message,
                        "delayed retry scheduled"
                    );
                    counter!("courier_delayed_retries_total").increment(1);
                    self.observers.on_delayed_retry(&error_ctx, delay);
                    return Ok(ProcessingOutcome::DelayedRetry);
                }
                RecoverabilityAction::MoveToError { error_queue } => {
                    self.move_to_error(message, &error_ctx, &error_queue, transaction)
                        .await?;
                    error!(
                        message_id = %error_ctx.message_id,
                        attempt = error_ctx.attempt,
                        error_queue = %error_queue,
                        kind = error_ctx.error_kind,
                        error = %error_ctx.error_message,
                        "message moved to error queue"
                    );
                    counter!("courier_messages_failed_total").increment(1);
                    self.observers.on_failed(&error_ctx, &error_queue);
                    return Ok(ProcessingOutcome::MovedToError);
                }
            }
        }
    }

    /// Schedules redelivery to the input queue with the retry headers set.
    async fn defer(
        &self,
        message: &TransportMessage,
        error_ctx: &ErrorContext,
        delay: Duration,
        transaction: &TransportTransaction,
    ) -> Result<(), PipelineError> {
        let now = now_millis();
        let mut retry_headers = message.headers.clone();
        retry_headers.insert(PROCESSING_FAILURES.to_string(), error_ctx.attempt.to_string());
        retry_headers.insert(
            DELAYED_RETRIES.to_string(),
            (error_ctx.delayed_deliveries_performed + 1).to_string(),
        );
        retry_headers.insert(DELAYED_RETRIES_TIMESTAMP.to_string(), now.to_string());

        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        let entry = TimeoutEntry::new(
            self.input_queue.clone(),
            now.saturating_add(delay_ms),
            retry_headers,
            message.body.clone(),
        );
        if let Err(e) = self.timeouts.push_timeout(entry, Some(transaction)).await {
            self.abandon(transaction, "delayed retry could not be scheduled").await;
            return Err(e.into());
        }
        self.settle(transaction).await
    }

    /// Sends the original message plus failure details to `error_queue`.
    async fn move_to_error(
        &self,
        message: TransportMessage,
        error_ctx: &ErrorContext,
        error_queue: &str,
        transaction: &TransportTransaction,
    ) -> Result<(), PipelineError> {
        let TransportMessage {
            message_id,
            headers: mut failed_headers,
            body,
        } = message;
        failed_headers.insert(FAILED_QUEUE.to_string(), self.input_queue.clone());
        failed_headers.insert(EXCEPTION_KIND.to_string(), error_ctx.error_kind.to_string());
        failed_headers.insert(EXCEPTION_MESSAGE.to_string(), error_ctx.error_message.clone());
        failed_headers.insert(EXCEPTION_SOURCE.to_string(), error_ctx.error_source.clone());
        failed_headers.insert(TIME_OF_FAILURE.to_string(), now_millis().to_string());
        failed_headers.insert(PROCESSING_FAILURES.to_string(), error_ctx.attempt.to_string());

        let failed = TransportMessage::new(message_id, failed_headers, body);
        if let Err(e) = self
            .transport
            .send(failed, error_queue, Some(transaction))
            .await
        {
            self.abandon(transaction, "error queue dispatch failed").await;
            return Err(e.into());
        }
        self.settle(transaction).await
    }

    /// Commits; a failed commit is rolled back so the message is redelivered.
    async fn settle(&self, transaction: &TransportTransaction) -> Result<(), PipelineError> {
        if let Err(e) = self.transport.commit(transaction).await {
            self.abandon(transaction, "commit failed").await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn abandon(&self, transaction: &TransportTransaction, reason: &str) {
        if let Err(e) = self.transport.rollback(transaction).await {
            error!(transaction = %transaction.id(), reason, error = %e, "rollback failed");
        } else {
            debug!(transaction = %transaction.id(), reason, "transaction rolled back");
        }
    }
}
