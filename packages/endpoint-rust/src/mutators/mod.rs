//! Message mutators: user hooks that rewrite messages at three points.
//!
//! - incoming: the deserialized message, before handlers are looked up
//! - outgoing: the logical message, before routing and serialization
//! - outgoing transport: the serialized body and headers, before dispatch
//!
//! Mutators of one hook run in registration order. A failing mutator stops
//! the hook and fails the pipeline.

pub mod behaviors;

use std::sync::Arc;

use async_trait::async_trait;
use courier_core::{Headers, LogicalMessage};

pub use behaviors::{
    MutateIncomingMessagesBehavior, MutateOutgoingMessagesBehavior,
    MutateOutgoingTransportMessageBehavior, MUTATE_INCOMING_MESSAGES, MUTATE_OUTGOING_MESSAGES,
    MUTATE_OUTGOING_TRANSPORT_MESSAGE,
};

// ---------------------------------------------------------------------------
// Mutation contexts
// ---------------------------------------------------------------------------

/// View handed to [`MutateIncomingMessages`].
pub struct IncomingMutationContext<'a> {
    message: LogicalMessage,
    changed: bool,
    headers: &'a mut Headers,
}

impl<'a> IncomingMutationContext<'a> {
    pub(crate) fn new(message: LogicalMessage, headers: &'a mut Headers) -> Self {
        Self {
            message,
            changed: false,
            headers,
        }
    }

    #[must_use]
    pub fn message(&self) -> &LogicalMessage {
        &self.message
    }

    /// Replaces the message handed to downstream steps and handlers.
    pub fn update_message(&mut self, message: LogicalMessage) {
        self.message = message;
        self.changed = true;
    }

    #[must_use]
    pub fn headers(&self) -> &Headers {
        self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        self.headers
    }

    pub(crate) fn into_parts(self) -> (LogicalMessage, bool) {
        (self.message, self.changed)
    }
}

/// View handed to [`MutateOutgoingMessages`].
pub struct OutgoingMutationContext<'a> {
    message: LogicalMessage,
    changed: bool,
    headers: &'a mut Headers,
    incoming_message: Option<&'a LogicalMessage>,
    incoming_headers: Option<&'a Headers>,
}

impl<'a> OutgoingMutationContext<'a> {
    pub(crate) fn new(
        message: LogicalMessage,
        headers: &'a mut Headers,
        incoming_message: Option<&'a LogicalMessage>,
        incoming_headers: Option<&'a Headers>,
    ) -> Self {
        Self {
            message,
            changed: false,
            headers,
            incoming_message,
            incoming_headers,
        }
    }

    #[must_use]
    pub fn message(&self) -> &LogicalMessage {
        &self.message
    }

    pub fn update_message(&mut self, message: LogicalMessage) {
        self.message = message;
        self.changed = true;
    }

    #[must_use]
    pub fn headers(&self) -> &Headers {
        self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        self.headers
    }

    /// The message being handled, when sending from inside a handler.
    #[must_use]
    pub fn incoming_message(&self) -> Option<&LogicalMessage> {
        self.incoming_message
    }

    #[must_use]
    pub fn incoming_headers(&self) -> Option<&Headers> {
        self.incoming_headers
    }

    pub(crate) fn into_parts(self) -> (LogicalMessage, bool) {
        (self.message, self.changed)
    }
}

/// View handed to [`MutateOutgoingTransportMessages`].
pub struct TransportMutationContext<'a> {
    body: Vec<u8>,
    changed: bool,
    headers: &'a mut Headers,
    outgoing_message: &'a LogicalMessage,
    incoming_message: Option<&'a LogicalMessage>,
    incoming_headers: Option<&'a Headers>,
}

impl<'a> TransportMutationContext<'a> {
    pub(crate) fn new(
        body: Vec<u8>,
        headers: &'a mut Headers,
        outgoing_message: &'a LogicalMessage,
        incoming_message: Option<&'a LogicalMessage>,
        incoming_headers: Option<&'a Headers>,
    ) -> Self {
        Self {
            body,
            changed: false,
            headers,
            outgoing_message,
            incoming_message,
            incoming_headers,
        }
    }

    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn update_body(&mut self, body: Vec<u8>) {
        self.body = body;
        self.changed = true;
    }

    #[must_use]
    pub fn headers(&self) -> &Headers {
        self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        self.headers
    }

    #[must_use]
    pub fn outgoing_message(&self) -> &LogicalMessage {
        self.outgoing_message
    }

    #[must_use]
    pub fn incoming_message(&self) -> Option<&LogicalMessage> {
        self.incoming_message
    }

    #[must_use]
    pub fn incoming_headers(&self) -> Option<&Headers> {
        self.incoming_headers
    }

    pub(crate) fn into_parts(self) -> (Vec<u8>, bool) {
        (self.body, self.changed)
    }
}

// ---------------------------------------------------------------------------
// Mutator traits
// ---------------------------------------------------------------------------

#[async_trait]
pub trait MutateIncomingMessages: Send + Sync {
    async fn mutate_incoming(&self, ctx: &mut IncomingMutationContext<'_>) -> anyhow::Result<()>;
}

#[async_trait]
pub trait MutateOutgoingMessages: Send + Sync {
    async fn mutate_outgoing(&self, ctx: &mut OutgoingMutationContext<'_>) -> anyhow::Result<()>;
}

#[async_trait]
pub trait MutateOutgoingTransportMessages: Send + Sync {
    async fn mutate_outgoing(&self, ctx: &mut TransportMutationContext<'_>) -> anyhow::Result<()>;
}

// ---------------------------------------------------------------------------
// MessageMutators
// ---------------------------------------------------------------------------

/// Ordered mutator lists for the three hooks.
///
/// The `has_*` flags are recomputed on every registration. The endpoint
/// builder moves the registry behind an `Arc` when it builds, so nothing can
/// be registered once messages flow.
#[derive(Default, Clone)]
pub struct MessageMutators {
    incoming: Vec<Arc<dyn MutateIncomingMessages>>,
    outgoing: Vec<Arc<dyn MutateOutgoingMessages>>,
    transport: Vec<Arc<dyn MutateOutgoingTransportMessages>>,
    has_incoming: bool,
    has_outgoing: bool,
    has_transport: bool,
}

impl MessageMutators {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_incoming(&mut self, mutator: Arc<dyn MutateIncomingMessages>) {
        self.incoming.push(mutator);
        self.refresh();
    }

    pub fn register_outgoing(&mut self, mutator: Arc<dyn MutateOutgoingMessages>) {
        self.outgoing.push(mutator);
        self.refresh();
    }

    pub fn register_transport(&mut self, mutator: Arc<dyn MutateOutgoingTransportMessages>) {
        self.transport.push(mutator);
        self.refresh();
    }

    fn refresh(&mut self) {
        self.has_incoming = !self.incoming.is_empty();
        self.has_outgoing = !self.outgoing.is_empty();
        self.has_transport = !self.transport.is_empty();
    }

    #[must_use]
    pub fn has_incoming(&self) -> bool {
        self.has_incoming
    }

    #[must_use]
    pub fn has_outgoing(&self) -> bool {
        self.has_outgoing
    }

    #[must_use]
    pub fn has_transport(&self) -> bool {
        self.has_transport
    }

    #[must_use]
    pub fn incoming(&self) -> &[Arc<dyn MutateIncomingMessages>] {
        &self.incoming
    }

    #[must_use]
    pub fn outgoing(&self) -> &[Arc<dyn MutateOutgoingMessages>] {
        &self.outgoing
    }

    #[must_use]
    pub fn transport(&self) -> &[Arc<dyn MutateOutgoingTransportMessages>] {
        &self.transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Nothing;

    #[async_trait]
    impl MutateOutgoingMessages for Nothing {
        async fn mutate_outgoing(&self, _ctx: &mut OutgoingMutationContext<'_>) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn flags_follow_registrations() {
        let mut mutators = MessageMutators::new();
        assert!(!mutators.has_outgoing());
        mutators.register_outgoing(Arc::new(Nothing));
        assert!(mutators.has_outgoing());
        assert!(!mutators.has_incoming());
        assert!(!mutators.has_transport());
        assert_eq!(mutators.outgoing().len(), 1);
    }

    #[test]
    fn update_marks_context_changed() {
        let mut headers = Headers::new();
        let mut ctx = IncomingMutationContext::new(
            LogicalMessage::new("A", serde_json::Value::Null),
            &mut headers,
        );
        ctx.headers_mut().insert("k".into(), "v".into());
        ctx.update_message(LogicalMessage::new("B", serde_json::Value::Null));
        let (message, changed) = ctx.into_parts();
        assert!(changed);
        assert_eq!(message.message_type.as_str(), "B");
        assert_eq!(headers.len(), 1);
    }
}
