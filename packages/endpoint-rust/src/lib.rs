//! Courier Endpoint: behavior pipeline, message mutators, unicast routing,
//! recoverability, and timeouts over a pluggable queue transport.

pub mod config;
pub mod endpoint;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod mutators;
pub mod pipeline;
pub mod recoverability;
pub mod routing;
pub mod serialization;
pub mod subscriptions;
pub mod telemetry;
pub mod timeouts;
pub mod traits;
pub mod transport;
pub mod worker;

pub use config::{EndpointConfig, RecoverabilityConfig, TransactionMode};
pub use endpoint::{Endpoint, EndpointBuilder, MessageSession, RunningEndpoint};
pub use error::{ConfigurationError, PipelineError, TransportError};
pub use handlers::{Handler, HandlerContext};
pub use subscriptions::{InMemorySubscriptionStore, Subscriber};
pub use traits::{MessageSerializer, SubscriptionStore, TimeoutPersister, Transport};
