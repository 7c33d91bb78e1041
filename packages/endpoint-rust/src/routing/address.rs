//! Endpoint instance → transport address translation.

use courier_core::EndpointInstance;

/// Converts an endpoint instance into the address a transport understands.
pub trait TransportAddressResolver: Send + Sync {
    fn to_transport_address(&self, instance: &EndpointInstance) -> String;
}

/// `endpoint` for the shared instance, `endpoint-discriminator` otherwise.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultAddressResolver;

impl TransportAddressResolver for DefaultAddressResolver {
    fn to_transport_address(&self, instance: &EndpointInstance) -> String {
        instance.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_and_discriminated_addresses() {
        let resolver = DefaultAddressResolver;
        let shared = EndpointInstance::new("Sales");
        assert_eq!(resolver.to_transport_address(&shared), "Sales");
        assert_eq!(
            resolver.to_transport_address(&shared.with_discriminator("blue")),
            "Sales-blue"
        );
    }
}
