//! Per-send routing mode and send options.

use std::fmt;
use std::time::Duration;

use courier_core::Headers;

use crate::error::ConfigurationError;

/// How a single send picks its destination. Modes are mutually exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RouteOption {
    /// Consult the routing table by message type.
    #[default]
    None,
    /// Send to a literal transport address.
    ExplicitDestination(String),
    /// Send to this endpoint instance's own queue.
    RouteToThisInstance,
    /// Send to the queue shared by all instances of this endpoint.
    RouteToAnyInstanceOfThisEndpoint,
    /// Send to the named instance of the endpoint the message type routes to.
    RouteToSpecificInstance(String),
}

impl fmt::Display for RouteOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::ExplicitDestination(address) => write!(f, "ExplicitDestination('{address}')"),
            Self::RouteToThisInstance => f.write_str("RouteToThisInstance"),
            Self::RouteToAnyInstanceOfThisEndpoint => {
                f.write_str("RouteToAnyInstanceOfThisEndpoint")
            }
            Self::RouteToSpecificInstance(d) => write!(f, "RouteToSpecificInstance('{d}')"),
        }
    }
}

/// Routing mode holder enforcing that at most one mode is chosen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingOptions {
    option: RouteOption,
}

impl RoutingOptions {
    #[must_use]
    pub fn option(&self) -> &RouteOption {
        &self.option
    }

    fn set(&mut self, requested: RouteOption) -> Result<(), ConfigurationError> {
        if self.option != RouteOption::None {
            return Err(ConfigurationError::RoutingOptionConflict {
                existing: self.option.clone(),
                requested,
            });
        }
        self.option = requested;
        Ok(())
    }

    /// # Errors
    ///
    /// Fails with [`ConfigurationError::RoutingOptionConflict`] if a mode is already set.
    pub fn set_destination(&mut self, address: impl Into<String>) -> Result<(), ConfigurationError> {
        self.set(RouteOption::ExplicitDestination(address.into()))
    }

    /// # Errors
    ///
    /// Fails with [`ConfigurationError::RoutingOptionConflict`] if a mode is already set.
    pub fn route_to_this_instance(&mut self) -> Result<(), ConfigurationError> {
        self.set(RouteOption::RouteToThisInstance)
    }

    /// # Errors
    ///
    /// Fails with [`ConfigurationError::RoutingOptionConflict`] if a mode is already set.
    pub fn route_to_any_instance(&mut self) -> Result<(), ConfigurationError> {
        self.set(RouteOption::RouteToAnyInstanceOfThisEndpoint)
    }

    /// # Errors
    ///
    /// Fails with [`ConfigurationError::RoutingOptionConflict`] if a mode is already set.
    pub fn route_to_specific_instance(
        &mut self,
        discriminator: impl Into<String>,
    ) -> Result<(), ConfigurationError> {
        self.set(RouteOption::RouteToSpecificInstance(discriminator.into()))
    }
}

/// Options for one outgoing send.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub routing: RoutingOptions,
    /// Extra headers copied onto the outgoing message.
    pub headers: Headers,
    /// Overrides the generated message id.
    pub message_id: Option<String>,
    /// Defers delivery through the timeout manager.
    pub delivery_delay: Option<Duration>,
}

impl SendOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    ///
    /// Fails if another routing mode is already set.
    pub fn destination(mut self, address: impl Into<String>) -> Result<Self, ConfigurationError> {
        self.routing.set_destination(address)?;
        Ok(self)
    }

    /// # Errors
    ///
    /// Fails if another routing mode is already set.
    pub fn to_this_instance(mut self) -> Result<Self, ConfigurationError> {
        self.routing.route_to_this_instance()?;
        Ok(self)
    }

    /// # Errors
    ///
    /// Fails if another routing mode is already set.
    pub fn to_any_instance(mut self) -> Result<Self, ConfigurationError> {
        self.routing.route_to_any_instance()?;
        Ok(self)
    }

    /// # Errors
    ///
    /// Fails if another routing mode is already set.
    pub fn to_instance(mut self, discriminator: impl Into<String>) -> Result<Self, ConfigurationError> {
        self.routing.route_to_specific_instance(discriminator)?;
        Ok(self)
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delivery_delay = Some(delay);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_mode_conflicts_naming_both() {
        let mut options = RoutingOptions::default();
        options.route_to_this_instance().unwrap();
        let err = options.set_destination("audit").unwrap_err();
        match &err {
            ConfigurationError::RoutingOptionConflict {
                existing,
                requested,
            } => {
                assert_eq!(*existing, RouteOption::RouteToThisInstance);
                assert_eq!(*requested, RouteOption::ExplicitDestination("audit".into()));
            }
            other => panic!("unexpected error: {other}"),
        }
        let text = err.to_string();
        assert!(text.contains("RouteToThisInstance"));
        assert!(text.contains("ExplicitDestination('audit')"));
        assert_eq!(*options.option(), RouteOption::RouteToThisInstance);
    }

    #[test]
    fn same_mode_twice_also_conflicts() {
        let result = SendOptions::new()
            .to_instance("a")
            .and_then(|o| o.to_instance("b"));
        assert!(result.is_err());
    }

    #[test]
    fn builder_collects_headers_and_id() {
        let options = SendOptions::new()
            .destination("q")
            .unwrap()
            .header("k", "v")
            .message_id("m-1");
        assert_eq!(options.headers.get("k").map(String::as_str), Some("v"));
        assert_eq!(options.message_id.as_deref(), Some("m-1"));
        assert_eq!(*options.routing.option(), RouteOption::ExplicitDestination("q".into()));
    }
}
