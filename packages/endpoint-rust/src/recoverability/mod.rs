//! Recoverability: what happens to a message whose processing failed.
//!
//! A failed attempt is classified as an immediate retry (rerun in place), a
//! delayed retry (redelivered later through the timeout manager), or a move to
//! the error queue. The attempt number counts every failure of the message,
//! including those before earlier delayed retries.

pub mod executor;
pub mod observer;

use std::sync::Arc;
use std::time::Duration;

use courier_core::Headers;

pub use executor::{ProcessingOutcome, RecoverabilityExecutor};
pub use observer::{CompositeRecoverabilityObserver, RecoverabilityObserver};

use crate::config::RecoverabilityConfig;

/// Read-only view of a failed attempt.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub message_id: String,
    /// Headers as received, before any retry headers were added.
    pub headers: Headers,
    pub body: Vec<u8>,
    /// Stable failure kind, see [`crate::error::PipelineError::kind`].
    pub error_kind: &'static str,
    pub error_message: String,
    /// Rendered chain of underlying causes; empty if there is none.
    pub error_source: String,
    /// Failed attempts of this message so far, this one included.
    pub attempt: u32,
    /// Failed attempts since the message was last received from the queue.
    pub immediate_processing_failures: u32,
    /// Delayed retries already performed for this message.
    pub delayed_deliveries_performed: u32,
}

/// Decision taken for a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoverabilityAction {
    ImmediateRetry,
    DelayedRetry { delay: Duration },
    MoveToError { error_queue: String },
}

/// Replaces the default classification.
pub type RecoverabilityPolicy =
    Arc<dyn Fn(&RecoverabilityConfig, &ErrorContext, &str) -> RecoverabilityAction + Send + Sync>;

/// Default classification: immediate retries up to the limit, then delayed
/// retries with a linearly growing delay, then the error queue.
#[must_use]
pub fn default_policy(
    config: &RecoverabilityConfig,
    ctx: &ErrorContext,
    error_queue: &str,
) -> RecoverabilityAction {
    let n = ctx.attempt;
    if n <= config.immediate_retries {
        return RecoverabilityAction::ImmediateRetry;
    }
    let delayed_retry = n - config.immediate_retries;
    if delayed_retry <= config.delayed_retries {
        return RecoverabilityAction::DelayedRetry {
            delay: config.time_increase().saturating_mul(delayed_retry),
        };
    }
    RecoverabilityAction::MoveToError {
        error_queue: error_queue.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn failed(attempt: u32) -> ErrorContext {
        ErrorContext {
            message_id: "m".to_string(),
            headers: Headers::new(),
            body: Vec::new(),
            error_kind: "Processing",
            error_message: "boom".to_string(),
            error_source: String::new(),
            attempt,
            immediate_processing_failures: attempt,
            delayed_deliveries_performed: 0,
        }
    }

    fn config(immediate: u32, delayed: u32, increase_ms: u64) -> RecoverabilityConfig {
        RecoverabilityConfig {
            immediate_retries: immediate,
            delayed_retries: delayed,
            delayed_retry_time_increase_ms: increase_ms,
        }
    }

    #[test]
    fn escalates_through_every_stage() {
        let c = config(2, 2, 1_000);
        let actions: Vec<_> = (1..=5).map(|n| default_policy(&c, &failed(n), "error")).collect();
        assert_eq!(
            actions,
            vec![
                RecoverabilityAction::ImmediateRetry,
                RecoverabilityAction::ImmediateRetry,
                RecoverabilityAction::DelayedRetry {
                    delay: Duration::from_secs(1)
                },
                RecoverabilityAction::DelayedRetry {
                    delay: Duration::from_secs(2)
                },
                RecoverabilityAction::MoveToError {
                    error_queue: "error".to_string()
                },
            ]
        );
    }

    #[test]
    fn no_retries_goes_straight_to_error_queue() {
        assert_eq!(
            default_policy(&config(0, 0, 10), &failed(1), "dlq"),
            RecoverabilityAction::MoveToError {
                error_queue: "dlq".to_string()
            }
        );
    }

    proptest! {
        #[test]
        fn classification_matches_attempt_ranges(
            immediate in 0u32..6,
            delayed in 0u32..6,
            attempt in 1u32..20,
        ) {
            let c = config(immediate, delayed, 100);
            let action = default_policy(&c, &failed(attempt), "error");
            if attempt <= immediate {
                prop_assert_eq!(action, RecoverabilityAction::ImmediateRetry);
            } else if attempt - immediate <= delayed {
                let expected = Duration::from_millis(100 * u64::from(attempt - immediate));
                prop_assert_eq!(action, RecoverabilityAction::DelayedRetry { delay: expected });
            } else {
                let is_error = matches!(action, RecoverabilityAction::MoveToError { .. });
                prop_assert!(is_error);
            }
        }
    }
}
