//! Error taxonomy for configuration, pipeline execution, and transport I/O.

use courier_core::{GraphError, MessageType, UnicastRoute};

use crate::routing::RouteOption;

/// Invalid endpoint configuration. Fatal at build time or at the offending call;
/// never retried.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error(transparent)]
    StepGraph(#[from] GraphError),
    #[error("cannot replace step '{0}': no step with that id is registered")]
    StepNotFound(String),
    #[error(
        "cannot replace step '{existing}' with '{replacement}': the id of the replacement must match the replaced step"
    )]
    ReplacementIdMismatch {
        existing: String,
        replacement: String,
    },
    #[error("cannot replace step '{step}': it is bound to {expected}, the replacement to {actual}")]
    ReplacementContextMismatch {
        step: String,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("step '{step}' is bound to {context}, which is not a pipeline stage")]
    UnknownStage { step: String, context: &'static str },
    #[error("already specified routing option {existing} for this message, cannot also use {requested}")]
    RoutingOptionConflict {
        existing: RouteOption,
        requested: RouteOption,
    },
    #[error("no destination specified for message type '{0}'")]
    NoRoute(MessageType),
    #[error("cannot {operation}: the endpoint is configured as send-only")]
    SendOnly { operation: &'static str },
    #[error(
        "cannot route to this instance: no instance discriminator is configured for this endpoint"
    )]
    MissingDiscriminator,
    #[error(
        "routing to a specific instance requires a route to a logical endpoint, but '{message_type}' is routed to {route}"
    )]
    SpecificInstanceRequiresEndpoint {
        message_type: MessageType,
        route: UnicastRoute,
    },
    #[error("message type '{message_type}' is routed by both '{first}' and '{second}'")]
    DuplicateRoute {
        message_type: MessageType,
        first: String,
        second: String,
    },
    #[error("no transport addresses known for endpoint '{0}'")]
    NoInstances(String),
    #[error("cannot reply: the incoming message carries no reply-to address")]
    MissingReplyToAddress,
    #[error("invalid endpoint configuration: {0}")]
    Invalid(String),
}

/// Failure while running a message through the pipeline.
///
/// Everything except [`PipelineError::Cancelled`] is classified by the
/// recoverability executor.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("mutator contract violated: {0}")]
    MutatorContractViolation(String),
    #[error("serialization failed: {0}")]
    Serialization(#[source] anyhow::Error),
    #[error("no handlers registered for message type '{0}'")]
    NoHandlers(MessageType),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("processing was cancelled")]
    Cancelled,
    #[error("processing failed: {0}")]
    Processing(#[from] anyhow::Error),
}

impl PipelineError {
    /// Stable name of the failure kind, written to failure headers.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "Configuration",
            Self::MutatorContractViolation(_) => "MutatorContractViolation",
            Self::Serialization(_) => "Serialization",
            Self::NoHandlers(_) => "NoHandlers",
            Self::Transport(_) => "Transport",
            Self::Cancelled => "Cancelled",
            Self::Processing(_) => "Processing",
        }
    }

    /// Renders the chain of underlying causes, outermost first.
    #[must_use]
    pub fn source_chain(&self) -> String {
        let mut causes = Vec::new();
        let mut current = std::error::Error::source(self);
        while let Some(cause) = current {
            causes.push(cause.to_string());
            current = cause.source();
        }
        causes.join(": ")
    }
}

/// Failure at the transport boundary. Surfaced to the caller, never swallowed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("queue '{0}' does not exist")]
    QueueNotFound(String),
    #[error("transport has not been initialized with an input queue")]
    NotInitialized,
    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_are_stable() {
        assert_eq!(PipelineError::Cancelled.kind(), "Cancelled");
        assert_eq!(
            PipelineError::from(anyhow::anyhow!("boom")).kind(),
            "Processing"
        );
        assert_eq!(
            PipelineError::from(TransportError::NotInitialized).kind(),
            "Transport"
        );
    }

    #[test]
    fn graph_errors_convert_into_configuration_errors() {
        let err: ConfigurationError = GraphError::DuplicateStep("a".into()).into();
        assert_eq!(err.to_string(), "step 'a' is registered more than once");
    }

    #[test]
    fn source_chain_walks_causes() {
        let inner = anyhow::anyhow!("disk full").context("writing outbox");
        let err = PipelineError::Serialization(inner);
        assert_eq!(err.source_chain(), "writing outbox: disk full");
    }
}
