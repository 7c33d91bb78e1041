//! Sending, publishing, and subscribing from outside a message handler.

use std::sync::Arc;

use courier_core::{Message, MessageType};

use super::operations::{MessageOperations, OutgoingScope};
use crate::error::PipelineError;
use crate::handlers::to_logical;
use crate::routing::SendOptions;

/// Cheap handle for message operations outside of handlers.
///
/// Sends made through a session are dispatched immediately; there is no
/// incoming transaction to enlist in.
#[derive(Clone)]
pub struct MessageSession {
    operations: Arc<MessageOperations>,
}

impl MessageSession {
    pub(crate) fn new(operations: Arc<MessageOperations>) -> Self {
        Self { operations }
    }

    /// Sends `message` routed by `options`. Returns the message id.
    ///
    /// # Errors
    ///
    /// Fails on routing configuration errors or transport failures.
    pub async fn send<M: Message>(
        &self,
        message: &M,
        options: SendOptions,
    ) -> Result<String, PipelineError> {
        self.operations
            .send(to_logical(message)?, options, &OutgoingScope::default())
            .await
    }

    /// Sends `message` to this endpoint's shared queue.
    ///
    /// # Errors
    ///
    /// Fails on send-only endpoints or transport failures.
    pub async fn send_local<M: Message>(&self, message: &M) -> Result<String, PipelineError> {
        self.operations
            .send_local(to_logical(message)?, SendOptions::new(), &OutgoingScope::default())
            .await
    }

    /// Publishes `message` to every subscribed endpoint.
    ///
    /// # Errors
    ///
    /// Fails if subscriptions cannot be read or a dispatch fails.
    pub async fn publish<M: Message>(&self, message: &M) -> Result<String, PipelineError> {
        self.operations
            .publish(to_logical(message)?, SendOptions::new(), &OutgoingScope::default())
            .await
    }

    /// Subscribes this endpoint to events of type `M`.
    ///
    /// # Errors
    ///
    /// Fails on send-only endpoints or if the subscription store fails.
    pub async fn subscribe<M: Message>(&self) -> Result<(), PipelineError> {
        self.operations.subscribe(&M::message_type()).await
    }

    /// Subscribes this endpoint to events of the named type.
    ///
    /// # Errors
    ///
    /// Fails on send-only endpoints or if the subscription store fails.
    pub async fn subscribe_to(&self, message_type: &MessageType) -> Result<(), PipelineError> {
        self.operations.subscribe(message_type).await
    }

    /// Removes this endpoint's subscription to events of type `M`.
    ///
    /// # Errors
    ///
    /// Fails on send-only endpoints or if the subscription store fails.
    pub async fn unsubscribe<M: Message>(&self) -> Result<(), PipelineError> {
        self.operations.unsubscribe(&M::message_type()).await
    }
}
