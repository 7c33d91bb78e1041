//! Built-in pipeline steps that run the registered mutators.

use std::sync::Arc;

use async_trait::async_trait;
use courier_core::headers::MESSAGE_ID;
use courier_core::Headers;
use tracing::debug;

use super::{
    IncomingMutationContext, MessageMutators, OutgoingMutationContext, TransportMutationContext,
};
use crate::error::PipelineError;
use crate::pipeline::{
    Behavior, IncomingLogicalContext, Next, OutgoingLogicalContext, OutgoingPhysicalContext,
};

/// Step id of the incoming mutation step (incoming logical stage).
pub const MUTATE_INCOMING_MESSAGES: &str = "MutateIncomingMessages";
/// Step id of the outgoing mutation step (outgoing logical stage).
pub const MUTATE_OUTGOING_MESSAGES: &str = "MutateOutgoingMessages";
/// Step id of the transport mutation step (outgoing physical stage).
pub const MUTATE_OUTGOING_TRANSPORT_MESSAGE: &str = "MutateOutgoingTransportMessage";

fn check_message_id(had_id: bool, headers: &Headers, hook: &str) -> Result<(), PipelineError> {
    if had_id && !headers.contains_key(MESSAGE_ID) {
        return Err(PipelineError::MutatorContractViolation(format!(
            "{hook} mutator removed the '{MESSAGE_ID}' header"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Incoming
// ---------------------------------------------------------------------------

pub struct MutateIncomingMessagesBehavior {
    mutators: Arc<MessageMutators>,
}

impl MutateIncomingMessagesBehavior {
    #[must_use]
    pub fn new(mutators: Arc<MessageMutators>) -> Self {
        Self { mutators }
    }
}

#[async_trait]
impl Behavior<IncomingLogicalContext> for MutateIncomingMessagesBehavior {
    async fn invoke(
        &self,
        ctx: &mut IncomingLogicalContext,
        next: Next<'_, IncomingLogicalContext>,
    ) -> Result<(), PipelineError> {
        if self.mutators.has_incoming() {
            let had_id = ctx.headers.contains_key(MESSAGE_ID);
            let mut mutation = IncomingMutationContext::new(ctx.message.clone(), &mut ctx.headers);
            for mutator in self.mutators.incoming() {
                mutator.mutate_incoming(&mut mutation).await?;
            }
            let (message, changed) = mutation.into_parts();
            check_message_id(had_id, &ctx.headers, "incoming")?;
            if changed {
                if message.message_type.is_blank() {
                    return Err(PipelineError::MutatorContractViolation(
                        "incoming mutator replaced the message with one without a message type"
                            .to_string(),
                    ));
                }
                debug!(
                    message_id = %ctx.message_id,
                    from = %ctx.message.message_type,
                    to = %message.message_type,
                    "incoming message replaced by mutator"
                );
                ctx.message = message;
            }
        }
        next.run(ctx).await
    }
}

// ---------------------------------------------------------------------------
// Outgoing
// ---------------------------------------------------------------------------

pub struct MutateOutgoingMessagesBehavior {
    mutators: Arc<MessageMutators>,
}

impl MutateOutgoingMessagesBehavior {
    #[must_use]
    pub fn new(mutators: Arc<MessageMutators>) -> Self {
        Self { mutators }
    }
}

#[async_trait]
impl Behavior<OutgoingLogicalContext> for MutateOutgoingMessagesBehavior {
    async fn invoke(
        &self,
        ctx: &mut OutgoingLogicalContext,
        next: Next<'_, OutgoingLogicalContext>,
    ) -> Result<(), PipelineError> {
        if self.mutators.has_outgoing() {
            let had_id = ctx.headers.contains_key(MESSAGE_ID);
            let mut mutation = OutgoingMutationContext::new(
                ctx.message.clone(),
                &mut ctx.headers,
                ctx.incoming.as_ref().map(|i| &i.message),
                ctx.incoming.as_ref().map(|i| &i.headers),
            );
            for mutator in self.mutators.outgoing() {
                mutator.mutate_outgoing(&mut mutation).await?;
            }
            let (message, changed) = mutation.into_parts();
            check_message_id(had_id, &ctx.headers, "outgoing")?;
            if changed {
                if message.message_type.is_blank() {
                    return Err(PipelineError::MutatorContractViolation(
                        "outgoing mutator replaced the message with one without a message type"
                            .to_string(),
                    ));
                }
                ctx.message = message;
            }
        }
        next.run(ctx).await
    }
}

// ---------------------------------------------------------------------------
// Outgoing transport
// ---------------------------------------------------------------------------

pub struct MutateOutgoingTransportMessageBehavior {
    mutators: Arc<MessageMutators>,
}

impl MutateOutgoingTransportMessageBehavior {
    #[must_use]
    pub fn new(mutators: Arc<MessageMutators>) -> Self {
        Self { mutators }
    }
}

#[async_trait]
impl Behavior<OutgoingPhysicalContext> for MutateOutgoingTransportMessageBehavior {
    async fn invoke(
        &self,
        ctx: &mut OutgoingPhysicalContext,
        next: Next<'_, OutgoingPhysicalContext>,
    ) -> Result<(), PipelineError> {
        if self.mutators.has_transport() {
            let had_id = ctx.headers.contains_key(MESSAGE_ID);
            let mut mutation = TransportMutationContext::new(
                std::mem::take(&mut ctx.body),
                &mut ctx.headers,
                &ctx.message,
                ctx.incoming.as_ref().map(|i| &i.message),
                ctx.incoming.as_ref().map(|i| &i.headers),
            );
            let mut failure = None;
            for mutator in self.mutators.transport() {
                if let Err(e) = mutator.mutate_outgoing(&mut mutation).await {
                    failure = Some(e);
                    break;
                }
            }
            let (body, changed) = mutation.into_parts();
            ctx.body = body;
            if let Some(e) = failure {
                return Err(e.into());
            }
            check_message_id(had_id, &ctx.headers, "transport")?;
            if changed {
                debug!(message_id = %ctx.message_id, "outgoing body replaced by mutator");
            }
        }
        next.run(ctx).await
    }
}
