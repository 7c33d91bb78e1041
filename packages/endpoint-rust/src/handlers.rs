//! Message handlers, their registry, and the context handlers send through.

use std::any::type_name;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use courier_core::headers::REPLY_TO_ADDRESS;
use courier_core::{Headers, LogicalMessage, Message, MessageType};
use tokio_util::sync::CancellationToken;

use crate::endpoint::operations::{MessageOperations, OutgoingScope};
use crate::error::PipelineError;
use crate::pipeline::Extensions;
use crate::routing::SendOptions;

// ---------------------------------------------------------------------------
// Handler traits
// ---------------------------------------------------------------------------

/// Handles messages of type `M`.
///
/// Returning an error fails the message attempt; recoverability decides what
/// happens next. Sends made through `ctx` share the incoming message's
/// transaction.
#[async_trait]
pub trait Handler<M: Message>: Send + Sync + 'static {
    async fn handle(&self, message: M, ctx: &mut HandlerContext) -> anyhow::Result<()>;
}

/// Handler with the message type erased, as stored in the registry.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    async fn handle_logical(
        &self,
        message: &LogicalMessage,
        ctx: &mut HandlerContext,
    ) -> anyhow::Result<()>;
}

struct TypedHandler<M, H> {
    handler: H,
    name: &'static str,
    _message: PhantomData<fn() -> M>,
}

#[async_trait]
impl<M, H> MessageHandler for TypedHandler<M, H>
where
    M: Message,
    H: Handler<M>,
{
    fn name(&self) -> &'static str {
        self.name
    }

    async fn handle_logical(
        &self,
        message: &LogicalMessage,
        ctx: &mut HandlerContext,
    ) -> anyhow::Result<()> {
        let typed = message
            .to_message::<M>()
            .with_context(|| format!("converting instance to '{}'", M::MESSAGE_TYPE))?;
        self.handler.handle(typed, ctx).await
    }
}

// ---------------------------------------------------------------------------
// HandlerRegistry
// ---------------------------------------------------------------------------

/// Handlers per message type, in registration order.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<MessageType, Vec<Arc<dyn MessageHandler>>>,
}

impl HandlerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for messages of type `M`.
    pub fn register<M, H>(&mut self, handler: H)
    where
        M: Message,
        H: Handler<M>,
    {
        let full = type_name::<H>();
        let name = full.rsplit("::").next().unwrap_or(full);
        self.handlers
            .entry(M::message_type())
            .or_default()
            .push(Arc::new(TypedHandler {
                handler,
                name,
                _message: PhantomData,
            }));
    }

    #[must_use]
    pub fn handlers_for(&self, message_type: &MessageType) -> &[Arc<dyn MessageHandler>] {
        self.handlers
            .get(message_type)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Message types with at least one handler, sorted.
    #[must_use]
    pub fn message_types(&self) -> Vec<MessageType> {
        let mut types: Vec<MessageType> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }
}

// ---------------------------------------------------------------------------
// HandlerContext
// ---------------------------------------------------------------------------

/// Operations available to a handler while it processes one message.
pub struct HandlerContext {
    operations: Arc<MessageOperations>,
    scope: OutgoingScope,
}

impl HandlerContext {
    pub(crate) fn new(operations: Arc<MessageOperations>, scope: OutgoingScope) -> Self {
        Self { operations, scope }
    }

    fn incoming(&self) -> Option<&crate::pipeline::IncomingMessageInfo> {
        self.scope.incoming.as_ref()
    }

    /// Id of the message being handled.
    #[must_use]
    pub fn message_id(&self) -> &str {
        self.incoming().map_or("", |i| i.message_id.as_str())
    }

    /// Headers of the message being handled.
    #[must_use]
    pub fn headers(&self) -> &Headers {
        static EMPTY: Headers = Headers::new();
        self.incoming().map_or(&EMPTY, |i| &i.headers)
    }

    #[must_use]
    pub fn reply_to_address(&self) -> Option<&str> {
        self.headers().get(REPLY_TO_ADDRESS).map(String::as_str)
    }

    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.scope.cancellation
    }

    #[must_use]
    pub fn extensions(&self) -> &Extensions {
        &self.scope.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.scope.extensions
    }

    /// Sends `message` routed by `options`. Returns the outgoing message id.
    ///
    /// # Errors
    ///
    /// Fails on routing configuration errors or transport failures.
    pub async fn send<M: Message>(&self, message: &M, options: SendOptions) -> Result<String, PipelineError> {
        let logical = to_logical(message)?;
        self.operations.send(logical, options, &self.scope).await
    }

    /// Sends `message` to this endpoint's shared queue.
    ///
    /// # Errors
    ///
    /// Fails on send-only endpoints or transport failures.
    pub async fn send_local<M: Message>(&self, message: &M) -> Result<String, PipelineError> {
        let logical = to_logical(message)?;
        self.operations
            .send_local(logical, SendOptions::new(), &self.scope)
            .await
    }

    /// Replies to the sender of the message being handled.
    ///
    /// # Errors
    ///
    /// Fails if the incoming message has no reply-to address.
    pub async fn reply<M: Message>(&self, message: &M) -> Result<String, PipelineError> {
        let logical = to_logical(message)?;
        self.operations
            .reply(logical, SendOptions::new(), &self.scope)
            .await
    }

    /// Publishes `message` to every subscribed endpoint.
    ///
    /// # Errors
    ///
    /// Fails if subscriptions cannot be read or a dispatch fails.
    pub async fn publish<M: Message>(&self, message: &M) -> Result<String, PipelineError> {
        let logical = to_logical(message)?;
        self.operations
            .publish(logical, SendOptions::new(), &self.scope)
            .await
    }
}

pub(crate) fn to_logical<M: Message>(message: &M) -> Result<LogicalMessage, PipelineError> {
    LogicalMessage::from_message(message).map_err(|e| PipelineError::Serialization(e.into()))
}
