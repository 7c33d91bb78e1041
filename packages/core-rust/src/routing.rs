//! Endpoint instances and unicast route descriptors.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// One running copy of a logical endpoint.
///
/// An instance without a discriminator stands for "any instance" sharing the
/// endpoint's common queue; a discriminator makes it uniquely addressable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointInstance {
    pub endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub discriminator: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub properties: BTreeMap<String, String>,
}

impl EndpointInstance {
    /// Creates the shared ("any") instance of a logical endpoint.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            discriminator: None,
            properties: BTreeMap::new(),
        }
    }

    /// Returns a copy of this instance addressed by the given discriminator.
    #[must_use]
    pub fn with_discriminator(mut self, discriminator: impl Into<String>) -> Self {
        self.discriminator = Some(discriminator.into());
        self
    }

    /// Returns a copy of this instance carrying an extra property.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for EndpointInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.discriminator {
            Some(d) => write!(f, "{}-{d}", self.endpoint),
            None => f.write_str(&self.endpoint),
        }
    }
}

/// Destination descriptor produced by a routing table lookup.
///
/// Exactly one form is present; the enum makes the physical-address and
/// logical-endpoint forms mutually exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "value")]
pub enum UnicastRoute {
    /// A literal transport address.
    PhysicalAddress(String),
    /// A logical endpoint; one of its instances is picked at send time.
    Endpoint(String),
    /// One specific endpoint instance.
    Instance(EndpointInstance),
}

impl UnicastRoute {
    /// Returns the logical endpoint name if this route targets one.
    #[must_use]
    pub fn endpoint(&self) -> Option<&str> {
        match self {
            Self::Endpoint(name) => Some(name),
            Self::PhysicalAddress(_) | Self::Instance(_) => None,
        }
    }
}

impl fmt::Display for UnicastRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PhysicalAddress(address) => write!(f, "address '{address}'"),
            Self::Endpoint(endpoint) => write!(f, "endpoint '{endpoint}'"),
            Self::Instance(instance) => write!(f, "instance '{instance}'"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_endpoint_routes_expose_endpoint_name() {
        assert_eq!(UnicastRoute::Endpoint("Sales".into()).endpoint(), Some("Sales"));
        assert_eq!(UnicastRoute::PhysicalAddress("q".into()).endpoint(), None);
        assert_eq!(
            UnicastRoute::Instance(EndpointInstance::new("Sales")).endpoint(),
            None
        );
    }

    #[test]
    fn instance_display_includes_discriminator() {
        let instance = EndpointInstance::new("Sales").with_discriminator("blue");
        assert_eq!(instance.to_string(), "Sales-blue");
        assert_eq!(EndpointInstance::new("Sales").to_string(), "Sales");
    }

    #[test]
    fn route_serializes_with_kind_tag() {
        let json = serde_json::to_value(UnicastRoute::Endpoint("Sales".into())).unwrap();
        assert_eq!(json["kind"], "endpoint");
        assert_eq!(json["value"], "Sales");
    }
}
