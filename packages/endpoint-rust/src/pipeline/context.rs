//! Strongly typed stage contexts and the hierarchical extension bag.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use courier_core::{Headers, LogicalMessage, TransportMessage};
use tokio_util::sync::CancellationToken;

use crate::handlers::MessageHandler;
use crate::routing::RoutingOptions;
use crate::transport::TransportTransaction;

// ---------------------------------------------------------------------------
// Extensions
// ---------------------------------------------------------------------------

/// Type-keyed property bag for cross-cutting data.
///
/// A child bag sees every entry of its ancestors as they were when the child
/// was created. Inserting into the child shadows the ancestor's entry without
/// changing it.
#[derive(Clone, Default)]
pub struct Extensions {
    local: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    parent: Option<Arc<Extensions>>,
}

impl Extensions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a child bag inheriting from a snapshot of this one.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            local: HashMap::new(),
            parent: Some(Arc::new(self.clone())),
        }
    }

    /// Stores `value`, shadowing any ancestor entry of the same type.
    pub fn insert<T: Any + Send + Sync>(&mut self, value: T) {
        self.local.insert(TypeId::of::<T>(), Arc::new(value));
    }

    /// Looks up a value here, then in each ancestor.
    #[must_use]
    pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        let key = TypeId::of::<T>();
        let mut current = Some(self);
        while let Some(bag) = current {
            if let Some(value) = bag.local.get(&key) {
                return value.downcast_ref::<T>();
            }
            current = bag.parent.as_deref();
        }
        None
    }

    /// Removes a value stored directly in this bag. Ancestor entries become
    /// visible again.
    pub fn remove<T: Any + Send + Sync>(&mut self) -> bool {
        self.local.remove(&TypeId::of::<T>()).is_some()
    }

    #[must_use]
    pub fn contains<T: Any + Send + Sync>(&self) -> bool {
        self.get::<T>().is_some()
    }
}

impl fmt::Debug for Extensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extensions")
            .field("local", &self.local.len())
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Incoming contexts
// ---------------------------------------------------------------------------

/// A received transport message before deserialization.
#[derive(Debug)]
pub struct IncomingPhysicalContext {
    pub message_id: String,
    pub headers: Headers,
    pub body: Vec<u8>,
    /// Unit of work outgoing sends enlist in; `None` sends immediately.
    pub transaction: Option<TransportTransaction>,
    pub cancellation: CancellationToken,
    pub extensions: Extensions,
}

impl IncomingPhysicalContext {
    #[must_use]
    pub fn new(
        message: TransportMessage,
        transaction: Option<TransportTransaction>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            message_id: message.message_id,
            headers: message.headers,
            body: message.body,
            transaction,
            cancellation,
            extensions: Extensions::new(),
        }
    }
}

/// A deserialized incoming message.
#[derive(Debug)]
pub struct IncomingLogicalContext {
    pub message_id: String,
    pub headers: Headers,
    pub message: LogicalMessage,
    pub transaction: Option<TransportTransaction>,
    pub cancellation: CancellationToken,
    pub extensions: Extensions,
}

/// One handler invocation for an incoming message.
pub struct InvokeHandlerContext {
    pub message_id: String,
    pub headers: Headers,
    pub message: LogicalMessage,
    /// The handler about to run.
    pub handler: Arc<dyn MessageHandler>,
    pub transaction: Option<TransportTransaction>,
    pub cancellation: CancellationToken,
    pub extensions: Extensions,
}

impl fmt::Debug for InvokeHandlerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvokeHandlerContext")
            .field("message_id", &self.message_id)
            .field("message_type", &self.message.message_type)
            .field("handler", &self.handler.name())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Outgoing contexts
// ---------------------------------------------------------------------------

/// The incoming message being handled when an outgoing message is produced.
#[derive(Debug, Clone)]
pub struct IncomingMessageInfo {
    pub message_id: String,
    pub headers: Headers,
    pub message: LogicalMessage,
}

/// What kind of operation produced an outgoing message.
#[derive(Debug, Clone)]
pub enum OutgoingIntent {
    Send(RoutingOptions),
    Publish,
    /// Reply to the given address.
    Reply(String),
}

/// An outgoing message before serialization.
#[derive(Debug)]
pub struct OutgoingLogicalContext {
    pub message_id: String,
    pub headers: Headers,
    pub message: LogicalMessage,
    pub intent: OutgoingIntent,
    pub delivery_delay: Option<Duration>,
    pub incoming: Option<IncomingMessageInfo>,
    pub transaction: Option<TransportTransaction>,
    pub cancellation: CancellationToken,
    pub extensions: Extensions,
}

/// A serialized outgoing message with resolved destinations.
#[derive(Debug)]
pub struct OutgoingPhysicalContext {
    pub message_id: String,
    pub headers: Headers,
    pub body: Vec<u8>,
    /// The logical message `body` was serialized from.
    pub message: LogicalMessage,
    pub destinations: Vec<String>,
    pub delivery_delay: Option<Duration>,
    pub incoming: Option<IncomingMessageInfo>,
    pub transaction: Option<TransportTransaction>,
    pub cancellation: CancellationToken,
    pub extensions: Extensions,
}

/// Returns the name of `id` if it is one of the pipeline stage contexts.
#[must_use]
pub fn stage_name(id: TypeId) -> Option<&'static str> {
    [
        (TypeId::of::<IncomingPhysicalContext>(), "IncomingPhysicalContext"),
        (TypeId::of::<IncomingLogicalContext>(), "IncomingLogicalContext"),
        (TypeId::of::<InvokeHandlerContext>(), "InvokeHandlerContext"),
        (TypeId::of::<OutgoingLogicalContext>(), "OutgoingLogicalContext"),
        (TypeId::of::<OutgoingPhysicalContext>(), "OutgoingPhysicalContext"),
    ]
    .into_iter()
    .find_map(|(stage, name)| (stage == id).then_some(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Tenant(&'static str);

    #[derive(Debug, PartialEq)]
    struct Attempt(u32);

    #[test]
    fn child_falls_back_to_parent() {
        let mut parent = Extensions::new();
        parent.insert(Tenant("acme"));
        let child = parent.child();
        assert_eq!(child.get::<Tenant>(), Some(&Tenant("acme")));
        assert!(child.get::<Attempt>().is_none());
    }

    #[test]
    fn child_shadows_without_touching_parent() {
        let mut parent = Extensions::new();
        parent.insert(Tenant("acme"));
        let mut child = parent.child();
        child.insert(Tenant("globex"));

        assert_eq!(child.get::<Tenant>(), Some(&Tenant("globex")));
        assert_eq!(parent.get::<Tenant>(), Some(&Tenant("acme")));

        assert!(child.remove::<Tenant>());
        assert_eq!(child.get::<Tenant>(), Some(&Tenant("acme")));
    }

    #[test]
    fn lookup_walks_several_generations() {
        let mut root = Extensions::new();
        root.insert(Attempt(3));
        let grandchild = root.child().child();
        assert!(grandchild.contains::<Attempt>());
    }

    #[test]
    fn only_stage_contexts_have_names() {
        assert_eq!(
            stage_name(TypeId::of::<OutgoingPhysicalContext>()),
            Some("OutgoingPhysicalContext")
        );
        assert_eq!(stage_name(TypeId::of::<String>()), None);
    }
}
