//! Unicast routing: resolve a send or publish intent into transport addresses.
//!
//! - [`options`]: per-send routing mode ([`RouteOption`]) and [`SendOptions`]
//! - [`table`]: message type → [`UnicastRoute`] table
//! - [`instances`]: known instances per logical endpoint
//! - [`address`]: instance → transport address translation
//! - [`distribution`]: selection of one instance among candidates

pub mod address;
pub mod distribution;
pub mod instances;
pub mod options;
pub mod table;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use courier_core::{EndpointInstance, Headers, MessageType, UnicastRoute};
use tracing::debug;

pub use address::{DefaultAddressResolver, TransportAddressResolver};
pub use distribution::{
    DistributionContext, DistributionPolicy, DistributionStrategy, DistributionStrategyScope,
    RoundRobinStrategy,
};
pub use instances::EndpointInstances;
pub use options::{RouteOption, RoutingOptions, SendOptions};
pub use table::UnicastRoutingTable;

use crate::error::ConfigurationError;
use crate::traits::SubscriptionStore;

/// Message metadata consulted while routing.
#[derive(Debug, Clone, Copy)]
pub struct RouteRequest<'a> {
    pub message_id: &'a str,
    pub message_type: &'a MessageType,
    pub headers: &'a Headers,
}

/// Routing collaborators shared by the send and publish routers.
#[derive(Clone)]
pub struct RoutingComponents {
    pub table: Arc<UnicastRoutingTable>,
    pub instances: Arc<EndpointInstances>,
    pub resolver: Arc<dyn TransportAddressResolver>,
    pub policy: Arc<DistributionPolicy>,
}

impl Default for RoutingComponents {
    fn default() -> Self {
        Self {
            table: Arc::new(UnicastRoutingTable::new()),
            instances: Arc::new(EndpointInstances::new()),
            resolver: Arc::new(DefaultAddressResolver),
            policy: Arc::new(DistributionPolicy::new()),
        }
    }
}

impl RoutingComponents {
    /// Translates every known instance of `endpoint` and lets the strategy for
    /// `scope` pick one address.
    fn select_instance_address(
        &self,
        endpoint: &str,
        scope: DistributionStrategyScope,
        request: &RouteRequest<'_>,
    ) -> Result<String, ConfigurationError> {
        let addresses: Vec<String> = self
            .instances
            .find_instances(endpoint)
            .iter()
            .map(|instance| self.resolver.to_transport_address(instance))
            .collect();
        let strategy = self.policy.get_distribution_strategy(endpoint, scope);
        let selected = strategy
            .select_destination(&DistributionContext {
                receiver_addresses: &addresses,
                message_id: request.message_id,
                message_type: request.message_type,
                headers: request.headers,
            })
            .ok_or_else(|| ConfigurationError::NoInstances(endpoint.to_string()))?;
        debug!(
            endpoint,
            %scope,
            candidates = addresses.len(),
            selected = %selected,
            "distributed to endpoint instance"
        );
        Ok(selected)
    }
}

// ---------------------------------------------------------------------------
// UnicastSendRouter
// ---------------------------------------------------------------------------

/// Resolves the single destination of a send.
#[derive(Clone)]
pub struct UnicastSendRouter {
    send_only: bool,
    shared_instance: EndpointInstance,
    this_instance: Option<EndpointInstance>,
    components: RoutingComponents,
}

impl UnicastSendRouter {
    #[must_use]
    pub fn new(
        endpoint_name: &str,
        discriminator: Option<&str>,
        send_only: bool,
        components: RoutingComponents,
    ) -> Self {
        let shared_instance = EndpointInstance::new(endpoint_name);
        let this_instance = discriminator.map(|d| shared_instance.clone().with_discriminator(d));
        Self {
            send_only,
            shared_instance,
            this_instance,
            components,
        }
    }

    #[must_use]
    pub fn components(&self) -> &RoutingComponents {
        &self.components
    }

    /// Resolves the destination address for one send.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] when the chosen mode is not allowed for
    /// this endpoint or the routing table has no usable route.
    pub fn route(
        &self,
        option: &RouteOption,
        request: &RouteRequest<'_>,
    ) -> Result<String, ConfigurationError> {
        let address = match option {
            RouteOption::ExplicitDestination(address) => address.clone(),
            RouteOption::RouteToThisInstance => {
                if self.send_only {
                    return Err(ConfigurationError::SendOnly {
                        operation: "route to this instance",
                    });
                }
                let instance = self
                    .this_instance
                    .as_ref()
                    .ok_or(ConfigurationError::MissingDiscriminator)?;
                self.components.resolver.to_transport_address(instance)
            }
            RouteOption::RouteToAnyInstanceOfThisEndpoint => {
                if self.send_only {
                    return Err(ConfigurationError::SendOnly {
                        operation: "route to any instance of this endpoint",
                    });
                }
                self.components
                    .resolver
                    .to_transport_address(&self.shared_instance)
            }
            RouteOption::RouteToSpecificInstance(discriminator) => {
                let route = self.table_route(request.message_type)?;
                let Some(endpoint) = route.endpoint() else {
                    return Err(ConfigurationError::SpecificInstanceRequiresEndpoint {
                        message_type: request.message_type.clone(),
                        route,
                    });
                };
                let instance = EndpointInstance::new(endpoint).with_discriminator(discriminator);
                self.components.resolver.to_transport_address(&instance)
            }
            RouteOption::None => match self.table_route(request.message_type)? {
                UnicastRoute::PhysicalAddress(address) => address,
                UnicastRoute::Instance(instance) => {
                    self.components.resolver.to_transport_address(&instance)
                }
                UnicastRoute::Endpoint(endpoint) => self.components.select_instance_address(
                    &endpoint,
                    DistributionStrategyScope::Send,
                    request,
                )?,
            },
        };
        debug!(
            message_type = %request.message_type,
            option = %option,
            destination = %address,
            "routed send"
        );
        Ok(address)
    }

    fn table_route(&self, message_type: &MessageType) -> Result<UnicastRoute, ConfigurationError> {
        self.components
            .table
            .get_route(message_type)
            .ok_or_else(|| ConfigurationError::NoRoute(message_type.clone()))
    }
}

// ---------------------------------------------------------------------------
// UnicastPublishRouter
// ---------------------------------------------------------------------------

/// Resolves the destinations of a publish from the subscription store.
#[derive(Clone)]
pub struct UnicastPublishRouter {
    subscriptions: Arc<dyn SubscriptionStore>,
    components: RoutingComponents,
}

impl UnicastPublishRouter {
    #[must_use]
    pub fn new(subscriptions: Arc<dyn SubscriptionStore>, components: RoutingComponents) -> Self {
        Self {
            subscriptions,
            components,
        }
    }

    /// Returns one address per subscribed logical endpoint plus every
    /// subscriber registered without one, deduplicated and sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the subscription store fails or a subscribed
    /// endpoint has no candidate address.
    pub async fn route(
        &self,
        message_types: &[MessageType],
        request: &RouteRequest<'_>,
    ) -> anyhow::Result<Vec<String>> {
        let subscribers = self.subscriptions.subscribers_for(message_types).await?;

        let mut addresses = BTreeSet::new();
        let mut by_endpoint: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for subscriber in subscribers {
            match subscriber.endpoint {
                Some(endpoint) => by_endpoint
                    .entry(endpoint)
                    .or_default()
                    .push(subscriber.transport_address),
                None => {
                    addresses.insert(subscriber.transport_address);
                }
            }
        }

        for (endpoint, candidates) in by_endpoint {
            let strategy = self
                .components
                .policy
                .get_distribution_strategy(&endpoint, DistributionStrategyScope::Publish);
            let selected = strategy
                .select_destination(&DistributionContext {
                    receiver_addresses: &candidates,
                    message_id: request.message_id,
                    message_type: request.message_type,
                    headers: request.headers,
                })
                .ok_or_else(|| ConfigurationError::NoInstances(endpoint.clone()))?;
            addresses.insert(selected);
        }

        Ok(addresses.into_iter().collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscriptions::{InMemorySubscriptionStore, Subscriber};

    fn mt(name: &str) -> MessageType {
        MessageType::new(name)
    }

    fn route_with(router: &UnicastSendRouter, option: &RouteOption, message_type: &str) -> Result<String, ConfigurationError> {
        let message_type = mt(message_type);
        let headers = Headers::new();
        router.route(
            option,
            &RouteRequest {
                message_id: "m-1",
                message_type: &message_type,
                headers: &headers,
            },
        )
    }

    fn router(discriminator: Option<&str>, send_only: bool) -> UnicastSendRouter {
        let components = RoutingComponents::default();
        components
            .table
            .add_or_replace_routes(
                "config",
                vec![
                    (mt("PlaceOrder"), UnicastRoute::Endpoint("Sales".into())),
                    (mt("Audit"), UnicastRoute::PhysicalAddress("audit-q".into())),
                    (
                        mt("Pin"),
                        UnicastRoute::Instance(EndpointInstance::new("Pins").with_discriminator("7")),
                    ),
                ],
            )
            .unwrap();
        UnicastSendRouter::new("Orders", discriminator, send_only, components)
    }

    #[test]
    fn explicit_destination_is_returned_as_is() {
        let r = router(None, true);
        let option = RouteOption::ExplicitDestination("somewhere".into());
        assert_eq!(route_with(&r, &option, "Unrouted").unwrap(), "somewhere");
    }

    #[test]
    fn this_instance_requires_receiving_endpoint_and_discriminator() {
        let option = RouteOption::RouteToThisInstance;
        assert!(matches!(
            route_with(&router(Some("blue"), true), &option, "X"),
            Err(ConfigurationError::SendOnly { .. })
        ));
        assert!(matches!(
            route_with(&router(None, false), &option, "X"),
            Err(ConfigurationError::MissingDiscriminator)
        ));
        let r = router(Some("blue"), false);
        assert_eq!(route_with(&r, &option, "X").unwrap(), "Orders-blue");
        assert_eq!(route_with(&r, &option, "X").unwrap(), "Orders-blue");
    }

    #[test]
    fn any_instance_uses_shared_queue() {
        let option = RouteOption::RouteToAnyInstanceOfThisEndpoint;
        assert!(route_with(&router(None, true), &option, "X").is_err());
        assert_eq!(route_with(&router(Some("blue"), false), &option, "X").unwrap(), "Orders");
    }

    #[test]
    fn specific_instance_needs_logical_endpoint_route() {
        let r = router(None, false);
        let option = RouteOption::RouteToSpecificInstance("3".into());
        assert_eq!(route_with(&r, &option, "PlaceOrder").unwrap(), "Sales-3");
        assert!(matches!(
            route_with(&r, &option, "Audit"),
            Err(ConfigurationError::SpecificInstanceRequiresEndpoint { .. })
        ));
        assert!(matches!(
            route_with(&r, &option, "Unrouted"),
            Err(ConfigurationError::NoRoute(_))
        ));
    }

    #[test]
    fn table_routes_physical_and_instance_directly() {
        let r = router(None, false);
        assert_eq!(route_with(&r, &RouteOption::None, "Audit").unwrap(), "audit-q");
        assert_eq!(route_with(&r, &RouteOption::None, "Pin").unwrap(), "Pins-7");
    }

    #[test]
    fn missing_route_names_message_type() {
        let err = route_with(&router(None, false), &RouteOption::None, "Unrouted").unwrap_err();
        assert!(err.to_string().contains("Unrouted"));
    }

    #[test]
    fn logical_endpoint_round_robins_over_known_instances() {
        let r = router(None, false);
        r.components().instances.add_or_replace_instances(
            "config",
            vec![
                EndpointInstance::new("Sales").with_discriminator("1"),
                EndpointInstance::new("Sales").with_discriminator("2"),
                EndpointInstance::new("Sales").with_discriminator("3"),
            ],
        );
        let picked: Vec<String> = (0..6)
            .map(|_| route_with(&r, &RouteOption::None, "PlaceOrder").unwrap())
            .collect();
        assert_eq!(
            picked,
            vec!["Sales-1", "Sales-2", "Sales-3", "Sales-1", "Sales-2", "Sales-3"]
        );
    }

    #[test]
    fn logical_endpoint_without_instances_uses_shared_queue() {
        let r = router(None, false);
        assert_eq!(route_with(&r, &RouteOption::None, "PlaceOrder").unwrap(), "Sales");
    }

    #[tokio::test]
    async fn publish_sends_one_copy_per_endpoint() {
        let store = Arc::new(InMemorySubscriptionStore::new());
        let event = mt("OrderPlaced");
        for address in ["billing-1", "billing-2"] {
            store
                .subscribe(Subscriber::new(address, Some("Billing".into())), &event)
                .await
                .unwrap();
        }
        store
            .subscribe(Subscriber::new("shipping", None), &event)
            .await
            .unwrap();

        let publish = UnicastPublishRouter::new(store, RoutingComponents::default());
        let headers = Headers::new();
        let request = RouteRequest {
            message_id: "m",
            message_type: &event,
            headers: &headers,
        };
        let first = publish.route(std::slice::from_ref(&event), &request).await.unwrap();
        let second = publish.route(std::slice::from_ref(&event), &request).await.unwrap();
        assert_eq!(first, vec!["billing-1", "shipping"]);
        assert_eq!(second, vec!["billing-2", "shipping"]);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_empty() {
        let publish = UnicastPublishRouter::new(
            Arc::new(InMemorySubscriptionStore::new()),
            RoutingComponents::default(),
        );
        let event = mt("Nobody");
        let headers = Headers::new();
        let request = RouteRequest {
            message_id: "m",
            message_type: &event,
            headers: &headers,
        };
        assert!(publish.route(&[event.clone()], &request).await.unwrap().is_empty());
    }
}
