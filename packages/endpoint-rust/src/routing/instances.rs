//! Known running instances per logical endpoint.

use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use courier_core::EndpointInstance;
use parking_lot::Mutex;

type InstancesBySource = BTreeMap<String, Vec<EndpointInstance>>;

/// Registry of endpoint instances, merged from several configuration sources.
///
/// An endpoint with no registered instance resolves to its shared ("any")
/// instance, so routing to a logical endpoint works without any instance
/// configuration.
#[derive(Debug, Default)]
pub struct EndpointInstances {
    snapshot: ArcSwap<BTreeMap<String, Vec<EndpointInstance>>>,
    sources: Mutex<InstancesBySource>,
}

impl EndpointInstances {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Instances of `endpoint` in registration order, duplicates removed.
    #[must_use]
    pub fn find_instances(&self, endpoint: &str) -> Vec<EndpointInstance> {
        match self.snapshot.load().get(endpoint) {
            Some(instances) if !instances.is_empty() => instances.clone(),
            _ => vec![EndpointInstance::new(endpoint)],
        }
    }

    /// Replaces every instance contributed by `source`.
    pub fn add_or_replace_instances(&self, source: impl Into<String>, instances: Vec<EndpointInstance>) {
        let mut sources = self.sources.lock();
        sources.insert(source.into(), instances);

        let mut merged: BTreeMap<String, Vec<EndpointInstance>> = BTreeMap::new();
        for instance in sources.values().flatten() {
            let list = merged.entry(instance.endpoint.clone()).or_default();
            if !list.contains(instance) {
                list.push(instance.clone());
            }
        }
        self.snapshot.store(Arc::new(merged));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_endpoint_yields_shared_instance() {
        let instances = EndpointInstances::new();
        assert_eq!(instances.find_instances("Sales"), vec![EndpointInstance::new("Sales")]);
    }

    #[test]
    fn merges_sources_without_duplicates() {
        let instances = EndpointInstances::new();
        let a = EndpointInstance::new("Sales").with_discriminator("1");
        let b = EndpointInstance::new("Sales").with_discriminator("2");
        instances.add_or_replace_instances("file", vec![a.clone(), b.clone()]);
        instances.add_or_replace_instances("discovery", vec![b.clone()]);

        assert_eq!(instances.find_instances("Sales"), vec![b, a]);
    }

    #[test]
    fn replacing_source_removes_instances() {
        let instances = EndpointInstances::new();
        let a = EndpointInstance::new("Sales").with_discriminator("1");
        instances.add_or_replace_instances("file", vec![a]);
        instances.add_or_replace_instances("file", Vec::new());
        assert_eq!(instances.find_instances("Sales"), vec![EndpointInstance::new("Sales")]);
    }
}
