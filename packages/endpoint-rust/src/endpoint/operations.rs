//! Outgoing message operations shared by handler contexts and sessions.

use std::sync::Arc;

use courier_core::headers::{
    MESSAGE_ID, ORIGINATING_ENDPOINT, RELATED_TO, REPLY_TO_ADDRESS, TIME_SENT,
};
use courier_core::{LogicalMessage, MessageType};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::error::{ConfigurationError, PipelineError};
use crate::pipeline::{
    Extensions, IncomingMessageInfo, OutgoingIntent, OutgoingLogicalContext, Stage,
};
use crate::routing::SendOptions;
use crate::subscriptions::Subscriber;
use crate::timeouts::now_millis;
use crate::traits::SubscriptionStore;

/// Where an outgoing operation runs: inside a handler (incoming message,
/// transaction) or from a session (neither).
#[derive(Debug, Clone, Default)]
pub struct OutgoingScope {
    pub transaction: Option<crate::transport::TransportTransaction>,
    pub cancellation: CancellationToken,
    pub incoming: Option<IncomingMessageInfo>,
    pub extensions: Extensions,
}

/// Identity of the endpoint stamped onto outgoing messages.
#[derive(Debug, Clone)]
pub struct LocalAddressing {
    pub endpoint_name: String,
    /// Shared input queue; `None` for send-only endpoints.
    pub local_address: Option<String>,
}

/// Entry point of the outgoing pipeline.
pub struct MessageOperations {
    addressing: LocalAddressing,
    outgoing: Arc<Stage<OutgoingLogicalContext>>,
    subscriptions: Arc<dyn SubscriptionStore>,
}

impl MessageOperations {
    #[must_use]
    pub fn new(
        addressing: LocalAddressing,
        outgoing: Arc<Stage<OutgoingLogicalContext>>,
        subscriptions: Arc<dyn SubscriptionStore>,
    ) -> Self {
        Self {
            addressing,
            outgoing,
            subscriptions,
        }
    }

    #[must_use]
    pub fn addressing(&self) -> &LocalAddressing {
        &self.addressing
    }

    /// Sends a message routed by `options`.
    ///
    /// # Errors
    ///
    /// Fails on routing configuration errors, serialization, mutator, or
    /// transport failures.
    pub async fn send(
        &self,
        message: LogicalMessage,
        options: SendOptions,
        scope: &OutgoingScope,
    ) -> Result<String, PipelineError> {
        let intent = OutgoingIntent::Send(options.routing.clone());
        self.dispatch(message, intent, options, scope).await
    }

    /// Sends a message to this endpoint's shared queue.
    ///
    /// # Errors
    ///
    /// Fails on send-only endpoints, if `options` already chose a routing
    /// mode, or with any [`MessageOperations::send`] error.
    pub async fn send_local(
        &self,
        message: LogicalMessage,
        mut options: SendOptions,
        scope: &OutgoingScope,
    ) -> Result<String, PipelineError> {
        options.routing.route_to_any_instance()?;
        self.send(message, options, scope).await
    }

    /// Replies to the sender of the incoming message.
    ///
    /// # Errors
    ///
    /// Fails with [`ConfigurationError::MissingReplyToAddress`] when the
    /// incoming message carries no reply-to address or there is none.
    pub async fn reply(
        &self,
        message: LogicalMessage,
        options: SendOptions,
        scope: &OutgoingScope,
    ) -> Result<String, PipelineError> {
        let address = scope
            .incoming
            .as_ref()
            .and_then(|i| i.headers.get(REPLY_TO_ADDRESS))
            .cloned()
            .ok_or(ConfigurationError::MissingReplyToAddress)?;
        self.dispatch(message, OutgoingIntent::Reply(address), options, scope)
            .await
    }

    /// Publishes a message to every subscriber of its type.
    ///
    /// # Errors
    ///
    /// Fails if subscriptions cannot be read or any dispatch fails.
    pub async fn publish(
        &self,
        message: LogicalMessage,
        options: SendOptions,
        scope: &OutgoingScope,
    ) -> Result<String, PipelineError> {
        self.dispatch(message, OutgoingIntent::Publish, options, scope)
            .await
    }

    /// Subscribes this endpoint to `message_type`.
    ///
    /// # Errors
    ///
    /// Fails on send-only endpoints or if the store fails.
    pub async fn subscribe(&self, message_type: &MessageType) -> Result<(), PipelineError> {
        let subscriber = self.local_subscriber("subscribe")?;
        self.subscriptions
            .subscribe(subscriber, message_type)
            .await?;
        debug!(message_type = %message_type, "subscribed");
        Ok(())
    }

    /// Removes this endpoint's subscription to `message_type`.
    ///
    /// # Errors
    ///
    /// Fails on send-only endpoints or if the store fails.
    pub async fn unsubscribe(&self, message_type: &MessageType) -> Result<(), PipelineError> {
        let subscriber = self.local_subscriber("unsubscribe")?;
        self.subscriptions
            .unsubscribe(&subscriber, message_type)
            .await?;
        debug!(message_type = %message_type, "unsubscribed");
        Ok(())
    }

    fn local_subscriber(&self, operation: &'static str) -> Result<Subscriber, ConfigurationError> {
        let address = self
            .addressing
            .local_address
            .clone()
            .ok_or(ConfigurationError::SendOnly { operation })?;
        Ok(Subscriber::new(
            address,
            Some(self.addressing.endpoint_name.clone()),
        ))
    }

    async fn dispatch(
        &self,
        message: LogicalMessage,
        intent: OutgoingIntent,
        options: SendOptions,
        scope: &OutgoingScope,
    ) -> Result<String, PipelineError> {
        if scope.cancellation.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        let message_id = options
            .message_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut headers = options.headers;
        headers.insert(MESSAGE_ID.to_string(), message_id.clone());
        headers.insert(
            ORIGINATING_ENDPOINT.to_string(),
            self.addressing.endpoint_name.clone(),
        );
        headers.insert(TIME_SENT.to_string(), now_millis().to_string());
        if let Some(address) = &self.addressing.local_address {
            headers
                .entry(REPLY_TO_ADDRESS.to_string())
                .or_insert_with(|| address.clone());
        }
        if let Some(incoming) = &scope.incoming {
            headers.insert(RELATED_TO.to_string(), incoming.message_id.clone());
        }

        let mut ctx = OutgoingLogicalContext {
            message_id: message_id.clone(),
            headers,
            message,
            intent,
            delivery_delay: options.delivery_delay,
            incoming: scope.incoming.clone(),
            transaction: scope.transaction.clone(),
            cancellation: scope.cancellation.clone(),
            extensions: scope.extensions.child(),
        };
        self.outgoing.invoke(&mut ctx).await?;
        Ok(message_id)
    }
}
