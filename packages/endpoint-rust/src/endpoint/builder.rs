//! Configuration surface of an endpoint and its assembly.

use std::sync::Arc;

use courier_core::{EndpointInstance, Message};
use tokio::sync::Semaphore;
use tracing::info;

use super::connectors::{
    DeserializeConnector, DispatchTerminal, InvokeHandlerTerminal, LoadHandlersConnector,
    RoutingConnector,
};
use super::operations::{LocalAddressing, MessageOperations};
use super::receive::{processing_service, ReceiveLoop};
use super::Endpoint;
use crate::config::{EndpointConfig, RecoverabilityConfig};
use crate::error::PipelineError;
use crate::handlers::{Handler, HandlerRegistry};
use crate::mutators::{
    MessageMutators, MutateIncomingMessages, MutateIncomingMessagesBehavior,
    MutateOutgoingMessages, MutateOutgoingMessagesBehavior, MutateOutgoingTransportMessageBehavior,
    MutateOutgoingTransportMessages, MUTATE_INCOMING_MESSAGES, MUTATE_OUTGOING_MESSAGES,
    MUTATE_OUTGOING_TRANSPORT_MESSAGE,
};
use crate::pipeline::{
    IncomingLogicalContext, IncomingPhysicalContext, InvokeHandlerContext, OutgoingLogicalContext,
    OutgoingPhysicalContext, PipelineSettings, Stage, StepRegistration,
};
use crate::recoverability::{
    CompositeRecoverabilityObserver, ErrorContext, RecoverabilityAction, RecoverabilityExecutor,
    RecoverabilityObserver,
};
use crate::routing::{RoutingComponents, UnicastPublishRouter, UnicastSendRouter};
use crate::serialization::JsonSerializer;
use crate::subscriptions::InMemorySubscriptionStore;
use crate::timeouts::{InMemoryTimeoutPersister, TimeoutManager};
use crate::traits::{MessageSerializer, SubscriptionStore, TimeoutPersister, Transport};

/// Collects everything an endpoint is made of. Registries are frozen by
/// [`EndpointBuilder::build`].
pub struct EndpointBuilder {
    config: EndpointConfig,
    transport: Arc<dyn Transport>,
    instance_transport: Option<Arc<dyn Transport>>,
    persister: Arc<dyn TimeoutPersister>,
    subscriptions: Arc<dyn SubscriptionStore>,
    serializer: Arc<dyn MessageSerializer>,
    routing: RoutingComponents,
    pipeline: PipelineSettings,
    mutators: MessageMutators,
    handlers: HandlerRegistry,
    observers: CompositeRecoverabilityObserver,
    policy: Option<crate::recoverability::RecoverabilityPolicy>,
}

impl EndpointBuilder {
    /// Starts a builder with in-memory persistence, in-memory subscriptions,
    /// and the JSON serializer.
    pub fn new(config: EndpointConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            transport,
            instance_transport: None,
            persister: Arc::new(InMemoryTimeoutPersister::new()),
            subscriptions: Arc::new(InMemorySubscriptionStore::new()),
            serializer: Arc::new(JsonSerializer),
            routing: RoutingComponents::default(),
            pipeline: PipelineSettings::new(),
            mutators: MessageMutators::new(),
            handlers: HandlerRegistry::new(),
            observers: CompositeRecoverabilityObserver::default(),
            policy: None,
        }
    }

    #[must_use]
    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    /// Transport bound to the instance-specific queue. Without one, messages
    /// routed to this instance stay in that queue.
    #[must_use]
    pub fn with_instance_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.instance_transport = Some(transport);
        self
    }

    #[must_use]
    pub fn with_timeout_persister(mut self, persister: Arc<dyn TimeoutPersister>) -> Self {
        self.persister = persister;
        self
    }

    #[must_use]
    pub fn with_subscription_store(mut self, store: Arc<dyn SubscriptionStore>) -> Self {
        self.subscriptions = store;
        self
    }

    #[must_use]
    pub fn with_serializer(mut self, serializer: Arc<dyn MessageSerializer>) -> Self {
        self.serializer = serializer;
        self
    }

    /// Replaces the routing table, instance registry, resolver, and policy.
    #[must_use]
    pub fn with_routing(mut self, routing: RoutingComponents) -> Self {
        self.routing = routing;
        self
    }

    /// Routing collaborators; routes and instances may be added here and keep
    /// updating after the endpoint starts.
    #[must_use]
    pub fn routing(&self) -> &RoutingComponents {
        &self.routing
    }

    /// Step registrations of the pipeline.
    pub fn pipeline(&mut self) -> &mut PipelineSettings {
        &mut self.pipeline
    }

    pub fn register_handler<M, H>(&mut self, handler: H) -> &mut Self
    where
        M: Message,
        H: Handler<M>,
    {
        self.handlers.register::<M, H>(handler);
        self
    }

    pub fn register_incoming_mutator(&mut self, mutator: Arc<dyn MutateIncomingMessages>) -> &mut Self {
        self.mutators.register_incoming(mutator);
        self
    }

    pub fn register_outgoing_mutator(&mut self, mutator: Arc<dyn MutateOutgoingMessages>) -> &mut Self {
        self.mutators.register_outgoing(mutator);
        self
    }

    pub fn register_transport_mutator(
        &mut self,
        mutator: Arc<dyn MutateOutgoingTransportMessages>,
    ) -> &mut Self {
        self.mutators.register_transport(mutator);
        self
    }

    pub fn add_recoverability_observer(&mut self, observer: Arc<dyn RecoverabilityObserver>) -> &mut Self {
        self.observers.add(observer);
        self
    }

    /// Replaces the default retry classification.
    pub fn recoverability_policy<F>(&mut self, policy: F) -> &mut Self
    where
        F: Fn(&RecoverabilityConfig, &ErrorContext, &str) -> RecoverabilityAction
            + Send
            + Sync
            + 'static,
    {
        self.policy = Some(Arc::new(policy));
        self
    }

    /// Validates the configuration, resolves the step graph, wires the
    /// pipeline stages, and creates the endpoint's queues.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Configuration`] for invalid settings or step
    /// graphs, and [`PipelineError::Transport`] if queues cannot be created.
    pub async fn build(self) -> Result<Endpoint, PipelineError> {
        self.config.validate()?;
        let config = self.config;
        let mutators = Arc::new(self.mutators);
        let resolved = self.pipeline.resolve(builtin_steps(&mutators))?;

        let resolver = Arc::clone(&self.routing.resolver);
        let shared = EndpointInstance::new(config.endpoint_name.as_str());
        let input_queue = resolver.to_transport_address(&shared);
        let instance_queue = config
            .instance_discriminator
            .as_deref()
            .map(|d| resolver.to_transport_address(&shared.clone().with_discriminator(d)));

        let timeouts = TimeoutManager::new(self.persister, Arc::clone(&self.transport));

        // Outgoing stages, innermost first.
        let outgoing_physical = Arc::new(Stage::new(
            resolved.behaviors::<OutgoingPhysicalContext>(),
            Arc::new(DispatchTerminal::new(Arc::clone(&self.transport), timeouts.clone())),
        ));
        let send_router = UnicastSendRouter::new(
            &config.endpoint_name,
            config.instance_discriminator.as_deref(),
            config.send_only,
            self.routing.clone(),
        );
        let publish_router =
            UnicastPublishRouter::new(Arc::clone(&self.subscriptions), self.routing.clone());
        let outgoing_logical = Arc::new(Stage::new(
            resolved.behaviors::<OutgoingLogicalContext>(),
            Arc::new(RoutingConnector::new(
                send_router,
                publish_router,
                Arc::clone(&self.serializer),
                outgoing_physical,
            )),
        ));
        let operations = Arc::new(MessageOperations::new(
            LocalAddressing {
                endpoint_name: config.endpoint_name.clone(),
                local_address: (!config.send_only).then(|| input_queue.clone()),
            },
            outgoing_logical,
            self.subscriptions,
        ));

        let mut receivers = Vec::new();
        if config.send_only {
            info!(endpoint = %config.endpoint_name, "send-only endpoint, no input queue");
        } else {
            // Incoming stages, innermost first.
            let invoke = Arc::new(Stage::new(
                resolved.behaviors::<InvokeHandlerContext>(),
                Arc::new(InvokeHandlerTerminal::new(Arc::clone(&operations))),
            ));
            let incoming_logical = Arc::new(Stage::new(
                resolved.behaviors::<IncomingLogicalContext>(),
                Arc::new(LoadHandlersConnector::new(Arc::new(self.handlers), invoke)),
            ));
            let incoming_physical = Arc::new(Stage::new(
                resolved.behaviors::<IncomingPhysicalContext>(),
                Arc::new(DeserializeConnector::new(
                    Arc::clone(&self.serializer),
                    incoming_logical,
                )),
            ));

            self.transport.create_queue(&config.error_queue).await?;
            let max_concurrency = usize::try_from(config.max_concurrency).unwrap_or(usize::MAX);

            let mut bindings = vec![(input_queue.clone(), Arc::clone(&self.transport))];
            if let Some(queue) = &instance_queue {
                self.transport.create_queue(queue).await?;
                match self.instance_transport {
                    Some(transport) => bindings.push((queue.clone(), transport)),
                    None => info!(queue = %queue, "no transport bound to the instance queue"),
                }
            }

            // Every loop draws from the same permits so the limit is endpoint-wide.
            let permits = Arc::new(Semaphore::new(max_concurrency));
            for (queue, transport) in bindings {
                transport.init(&queue).await?;
                let executor = Arc::new(RecoverabilityExecutor::new(
                    queue.clone(),
                    config.error_queue.clone(),
                    config.transaction_mode,
                    config.recoverability.clone(),
                    self.policy.clone(),
                    self.observers.clone(),
                    Arc::clone(&incoming_physical),
                    Arc::clone(&transport),
                    TimeoutManager::new(Arc::clone(timeouts.persister()), Arc::clone(&transport)),
                ));
                receivers.push(ReceiveLoop {
                    queue,
                    transport,
                    service: processing_service(
                        &config.endpoint_name,
                        Arc::clone(&permits),
                        executor,
                    ),
                    poll_interval: config.receive_poll_interval(),
                });
            }
        }

        info!(
            endpoint = %config.endpoint_name,
            input_queue = %input_queue,
            steps = ?resolved.ids(),
            "endpoint built"
        );
        Ok(Endpoint {
            step_ids: resolved.ids().into_iter().map(str::to_string).collect(),
            config,
            input_queue,
            timeouts,
            operations,
            receivers,
        })
    }
}

fn builtin_steps(mutators: &Arc<MessageMutators>) -> Vec<StepRegistration> {
    vec![
        StepRegistration::new::<IncomingLogicalContext, _>(
            MUTATE_INCOMING_MESSAGES,
            MutateIncomingMessagesBehavior::new(Arc::clone(mutators)),
            "Runs the registered incoming message mutators",
        ),
        StepRegistration::new::<OutgoingLogicalContext, _>(
            MUTATE_OUTGOING_MESSAGES,
            MutateOutgoingMessagesBehavior::new(Arc::clone(mutators)),
            "Runs the registered outgoing message mutators",
        ),
        StepRegistration::new::<OutgoingPhysicalContext, _>(
            MUTATE_OUTGOING_TRANSPORT_MESSAGE,
            MutateOutgoingTransportMessageBehavior::new(Arc::clone(mutators)),
            "Runs the registered outgoing transport message mutators",
        ),
    ]
}
