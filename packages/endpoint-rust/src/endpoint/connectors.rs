//! Stage terminals that derive the next stage's context and run that stage.
//!
//! Outgoing: logical → (route, serialize) → physical → dispatch.
//! Incoming: physical → (deserialize) → logical → (load handlers) → invoke.

use std::mem;
use std::sync::Arc;

use async_trait::async_trait;
use courier_core::headers::{CONTENT_TYPE, ENCLOSED_MESSAGE_TYPES, MESSAGE_ID};
use courier_core::{MessageType, TransportMessage};
use tracing::{debug, info};

use super::operations::{MessageOperations, OutgoingScope};
use crate::error::PipelineError;
use crate::handlers::{HandlerContext, HandlerRegistry};
use crate::pipeline::{
    IncomingLogicalContext, IncomingMessageInfo, IncomingPhysicalContext, InvokeHandlerContext,
    OutgoingIntent, OutgoingLogicalContext, OutgoingPhysicalContext, Stage, Terminal,
};
use crate::routing::{RouteRequest, UnicastPublishRouter, UnicastSendRouter};
use crate::timeouts::{now_millis, TimeoutEntry, TimeoutManager};
use crate::traits::{MessageSerializer, Transport};

/// Unwraps a [`PipelineError`] carried inside a handler's `anyhow::Error`, so
/// a failed send from inside a handler keeps its kind.
pub(crate) fn into_pipeline_error(error: anyhow::Error) -> PipelineError {
    match error.downcast::<PipelineError>() {
        Ok(inner) => inner,
        Err(other) => PipelineError::Processing(other),
    }
}

// ---------------------------------------------------------------------------
// Outgoing
// ---------------------------------------------------------------------------

/// Resolves destinations, serializes the message, and runs the physical stage.
pub struct RoutingConnector {
    send_router: UnicastSendRouter,
    publish_router: UnicastPublishRouter,
    serializer: Arc<dyn MessageSerializer>,
    physical: Arc<Stage<OutgoingPhysicalContext>>,
}

impl RoutingConnector {
    #[must_use]
    pub fn new(
        send_router: UnicastSendRouter,
        publish_router: UnicastPublishRouter,
        serializer: Arc<dyn MessageSerializer>,
        physical: Arc<Stage<OutgoingPhysicalContext>>,
    ) -> Self {
        Self {
            send_router,
            publish_router,
            serializer,
            physical,
        }
    }
}

#[async_trait]
impl Terminal<OutgoingLogicalContext> for RoutingConnector {
    async fn complete(&self, ctx: &mut OutgoingLogicalContext) -> Result<(), PipelineError> {
        let request = RouteRequest {
            message_id: &ctx.message_id,
            message_type: &ctx.message.message_type,
            headers: &ctx.headers,
        };
        let destinations = match &ctx.intent {
            OutgoingIntent::Send(routing) => vec![self.send_router.route(routing.option(), &request)?],
            OutgoingIntent::Reply(address) => vec![address.clone()],
            OutgoingIntent::Publish => {
                let addresses = self
                    .publish_router
                    .route(std::slice::from_ref(&ctx.message.message_type), &request)
                    .await?;
                if addresses.is_empty() {
                    info!(
                        message_id = %ctx.message_id,
                        message_type = %ctx.message.message_type,
                        "no subscribers, publish skipped"
                    );
                    return Ok(());
                }
                addresses
            }
        };

        let body = self
            .serializer
            .serialize(&ctx.message)
            .map_err(PipelineError::Serialization)?;
        ctx.headers.insert(
            ENCLOSED_MESSAGE_TYPES.to_string(),
            ctx.message.message_type.to_string(),
        );
        ctx.headers.insert(
            CONTENT_TYPE.to_string(),
            self.serializer.content_type().to_string(),
        );

        let mut physical = OutgoingPhysicalContext {
            message_id: ctx.message_id.clone(),
            headers: mem::take(&mut ctx.headers),
            body,
            message: ctx.message.clone(),
            destinations,
            delivery_delay: ctx.delivery_delay,
            incoming: ctx.incoming.clone(),
            transaction: ctx.transaction.clone(),
            cancellation: ctx.cancellation.clone(),
            extensions: ctx.extensions.child(),
        };
        let result = self.physical.invoke(&mut physical).await;
        ctx.headers = physical.headers;
        result
    }
}

/// Hands the serialized message to the transport, or to the timeout manager
/// when a delivery delay is set.
pub struct DispatchTerminal {
    transport: Arc<dyn Transport>,
    timeouts: TimeoutManager,
}

impl DispatchTerminal {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, timeouts: TimeoutManager) -> Self {
        Self {
            transport,
            timeouts,
        }
    }
}

#[async_trait]
impl Terminal<OutgoingPhysicalContext> for DispatchTerminal {
    async fn complete(&self, ctx: &mut OutgoingPhysicalContext) -> Result<(), PipelineError> {
        if ctx.cancellation.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        let message_id = ctx
            .headers
            .get(MESSAGE_ID)
            .cloned()
            .unwrap_or_else(|| ctx.message_id.clone());

        for destination in &ctx.destinations {
            if let Some(delay) = ctx.delivery_delay {
                let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                let entry = TimeoutEntry::new(
                    destination.clone(),
                    now_millis().saturating_add(delay_ms),
                    ctx.headers.clone(),
                    ctx.body.clone(),
                );
                self.timeouts
                    .push_timeout(entry, ctx.transaction.as_ref())
                    .await?;
                debug!(%message_id, %destination, delay_ms, "deferred dispatch");
            } else {
                let message =
                    TransportMessage::new(message_id.clone(), ctx.headers.clone(), ctx.body.clone());
                self.transport
                    .send(message, destination, ctx.transaction.as_ref())
                    .await?;
                debug!(
                    %message_id,
                    %destination,
                    enlisted = ctx.transaction.is_some(),
                    "dispatched"
                );
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Incoming
// ---------------------------------------------------------------------------

/// Deserializes the body by its enclosed message type and runs the logical stage.
pub struct DeserializeConnector {
    serializer: Arc<dyn MessageSerializer>,
    logical: Arc<Stage<IncomingLogicalContext>>,
}

impl DeserializeConnector {
    #[must_use]
    pub fn new(
        serializer: Arc<dyn MessageSerializer>,
        logical: Arc<Stage<IncomingLogicalContext>>,
    ) -> Self {
        Self { serializer, logical }
    }
}

#[async_trait]
impl Terminal<IncomingPhysicalContext> for DeserializeConnector {
    async fn complete(&self, ctx: &mut IncomingPhysicalContext) -> Result<(), PipelineError> {
        let message_type = ctx
            .headers
            .get(ENCLOSED_MESSAGE_TYPES)
            .and_then(|types| types.split(',').map(str::trim).find(|t| !t.is_empty()))
            .map(MessageType::new)
            .ok_or_else(|| {
                PipelineError::Serialization(anyhow::anyhow!(
                    "message '{}' has no '{ENCLOSED_MESSAGE_TYPES}' header",
                    ctx.message_id
                ))
            })?;
        let message = self
            .serializer
            .deserialize(&ctx.body, &message_type)
            .map_err(PipelineError::Serialization)?;

        let mut logical = IncomingLogicalContext {
            message_id: ctx.message_id.clone(),
            headers: mem::take(&mut ctx.headers),
            message,
            transaction: ctx.transaction.clone(),
            cancellation: ctx.cancellation.clone(),
            extensions: ctx.extensions.child(),
        };
        let result = self.logical.invoke(&mut logical).await;
        ctx.headers = logical.headers;
        result
    }
}

/// Runs the invoke stage once per handler registered for the message type.
pub struct LoadHandlersConnector {
    handlers: Arc<HandlerRegistry>,
    invoke: Arc<Stage<InvokeHandlerContext>>,
}

impl LoadHandlersConnector {
    #[must_use]
    pub fn new(handlers: Arc<HandlerRegistry>, invoke: Arc<Stage<InvokeHandlerContext>>) -> Self {
        Self { handlers, invoke }
    }
}

#[async_trait]
impl Terminal<IncomingLogicalContext> for LoadHandlersConnector {
    async fn complete(&self, ctx: &mut IncomingLogicalContext) -> Result<(), PipelineError> {
        let handlers = self.handlers.handlers_for(&ctx.message.message_type);
        if handlers.is_empty() {
            return Err(PipelineError::NoHandlers(ctx.message.message_type.clone()));
        }
        for handler in handlers {
            if ctx.cancellation.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            let mut invoke = InvokeHandlerContext {
                message_id: ctx.message_id.clone(),
                headers: ctx.headers.clone(),
                message: ctx.message.clone(),
                handler: Arc::clone(handler),
                transaction: ctx.transaction.clone(),
                cancellation: ctx.cancellation.clone(),
                extensions: ctx.extensions.child(),
            };
            self.invoke.invoke(&mut invoke).await?;
        }
        Ok(())
    }
}

/// Calls the handler of the context, racing it against cancellation.
pub struct InvokeHandlerTerminal {
    operations: Arc<MessageOperations>,
}

impl InvokeHandlerTerminal {
    #[must_use]
    pub fn new(operations: Arc<MessageOperations>) -> Self {
        Self { operations }
    }
}

#[async_trait]
impl Terminal<InvokeHandlerContext> for InvokeHandlerTerminal {
    async fn complete(&self, ctx: &mut InvokeHandlerContext) -> Result<(), PipelineError> {
        let scope = OutgoingScope {
            transaction: ctx.transaction.clone(),
            cancellation: ctx.cancellation.clone(),
            incoming: Some(IncomingMessageInfo {
                message_id: ctx.message_id.clone(),
                headers: ctx.headers.clone(),
                message: ctx.message.clone(),
            }),
            extensions: ctx.extensions.child(),
        };
        let mut handler_ctx = HandlerContext::new(Arc::clone(&self.operations), scope);
        let handler = Arc::clone(&ctx.handler);
        let cancellation = ctx.cancellation.clone();

        debug!(message_id = %ctx.message_id, handler = handler.name(), "invoking handler");
        tokio::select! {
            biased;
            () = cancellation.cancelled() => Err(PipelineError::Cancelled),
            result = handler.handle_logical(&ctx.message, &mut handler_ctx) => {
                result.map_err(into_pipeline_error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigurationError;

    #[test]
    fn handler_errors_keep_pipeline_kind() {
        let wrapped = anyhow::Error::new(PipelineError::from(
            ConfigurationError::MissingReplyToAddress,
        ));
        assert_eq!(into_pipeline_error(wrapped).kind(), "Configuration");
        assert_eq!(
            into_pipeline_error(anyhow::anyhow!("db down")).kind(),
            "Processing"
        );
    }
}
