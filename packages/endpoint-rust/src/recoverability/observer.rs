//! Recoverability observer trait and composite implementation.

use std::sync::Arc;
use std::time::Duration;

use super::ErrorContext;

/// Notified synchronously after a recoverability decision has been carried out.
///
/// Used as `Arc<dyn RecoverabilityObserver>`. Every method defaults to a no-op.
pub trait RecoverabilityObserver: Send + Sync {
    /// Called before the message is rerun in place.
    fn on_immediate_retry(&self, _ctx: &ErrorContext) {}

    /// Called after the message was scheduled for redelivery.
    fn on_delayed_retry(&self, _ctx: &ErrorContext, _delay: Duration) {}

    /// Called after the message was moved to `error_queue`.
    fn on_failed(&self, _ctx: &ErrorContext, _error_queue: &str) {}
}

/// Fans notifications out to every registered observer, in registration order.
#[derive(Default, Clone)]
pub struct CompositeRecoverabilityObserver {
    observers: Vec<Arc<dyn RecoverabilityObserver>>,
}

impl CompositeRecoverabilityObserver {
    #[must_use]
    pub fn new(observers: Vec<Arc<dyn RecoverabilityObserver>>) -> Self {
        Self { observers }
    }

    pub fn add(&mut self, observer: Arc<dyn RecoverabilityObserver>) {
        self.observers.push(observer);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl RecoverabilityObserver for CompositeRecoverabilityObserver {
    fn on_immediate_retry(&self, ctx: &ErrorContext) {
        for observer in &self.observers {
            observer.on_immediate_retry(ctx);
        }
    }

    fn on_delayed_retry(&self, ctx: &ErrorContext, delay: Duration) {
        for observer in &self.observers {
            observer.on_delayed_retry(ctx, delay);
        }
    }

    fn on_failed(&self, ctx: &ErrorContext, error_queue: &str) {
        for observer in &self.observers {
            observer.on_failed(ctx, error_queue);
        }
    }
}
