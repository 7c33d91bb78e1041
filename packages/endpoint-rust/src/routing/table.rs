//! Message type → unicast route table, merged from several configuration sources.
//!
//! Readers load an immutable snapshot through `ArcSwap` and never lock.
//! Writers rebuild the merged snapshot and swap it in whole, serialized by a
//! writer mutex so concurrent source updates cannot lose each other's routes.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use arc_swap::ArcSwap;
use courier_core::{MessageType, UnicastRoute};
use parking_lot::Mutex;
use tracing::debug;

use crate::error::ConfigurationError;

type SourceRoutes = BTreeMap<String, Vec<(MessageType, UnicastRoute)>>;

/// Merged view handed to readers.
#[derive(Debug, Default)]
struct RouteSnapshot {
    routes: HashMap<MessageType, UnicastRoute>,
}

/// Routing table keyed by message type.
#[derive(Debug, Default)]
pub struct UnicastRoutingTable {
    snapshot: ArcSwap<RouteSnapshot>,
    sources: Mutex<SourceRoutes>,
}

impl UnicastRoutingTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the route for `message_type`, if any.
    #[must_use]
    pub fn get_route(&self, message_type: &MessageType) -> Option<UnicastRoute> {
        self.snapshot.load().routes.get(message_type).cloned()
    }

    /// Number of message types with a route.
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshot.load().routes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replaces every route contributed by `source` with `routes`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::DuplicateRoute`] if a message type would be
    /// routed by two sources, or twice by the same source. The table is left
    /// unchanged in that case.
    pub fn add_or_replace_routes(
        &self,
        source: impl Into<String>,
        routes: Vec<(MessageType, UnicastRoute)>,
    ) -> Result<(), ConfigurationError> {
        let source = source.into();
        let mut sources = self.sources.lock();

        let mut candidate = sources.clone();
        candidate.insert(source.clone(), routes);

        let mut merged: HashMap<MessageType, (String, UnicastRoute)> = HashMap::new();
        for (src, entries) in &candidate {
            for (message_type, route) in entries {
                if let Some((first, _)) = merged.get(message_type) {
                    return Err(ConfigurationError::DuplicateRoute {
                        message_type: message_type.clone(),
                        first: first.clone(),
                        second: src.clone(),
                    });
                }
                merged.insert(message_type.clone(), (src.clone(), route.clone()));
            }
        }

        let routes = merged
            .into_iter()
            .map(|(message_type, (_, route))| (message_type, route))
            .collect::<HashMap<_, _>>();
        debug!(source = %source, route_count = routes.len(), "routing table updated");
        self.snapshot.store(Arc::new(RouteSnapshot { routes }));
        *sources = candidate;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mt(name: &str) -> MessageType {
        MessageType::new(name)
    }

    #[test]
    fn lookup_after_registration() {
        let table = UnicastRoutingTable::new();
        table
            .add_or_replace_routes(
                "config",
                vec![
                    (mt("A"), UnicastRoute::Endpoint("Sales".into())),
                    (mt("B"), UnicastRoute::PhysicalAddress("audit".into())),
                ],
            )
            .unwrap();
        assert_eq!(table.get_route(&mt("A")), Some(UnicastRoute::Endpoint("Sales".into())));
        assert_eq!(table.len(), 2);
        assert!(table.get_route(&mt("C")).is_none());
    }

    #[test]
    fn replacing_a_source_drops_its_old_routes() {
        let table = UnicastRoutingTable::new();
        table
            .add_or_replace_routes("s", vec![(mt("A"), UnicastRoute::Endpoint("X".into()))])
            .unwrap();
        table
            .add_or_replace_routes("s", vec![(mt("B"), UnicastRoute::Endpoint("Y".into()))])
            .unwrap();
        assert!(table.get_route(&mt("A")).is_none());
        assert!(table.get_route(&mt("B")).is_some());
    }

    #[test]
    fn duplicate_across_sources_is_rejected_and_table_unchanged() {
        let table = UnicastRoutingTable::new();
        table
            .add_or_replace_routes("a", vec![(mt("A"), UnicastRoute::Endpoint("X".into()))])
            .unwrap();
        let err = table
            .add_or_replace_routes("b", vec![(mt("A"), UnicastRoute::Endpoint("Y".into()))])
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::DuplicateRoute { ref first, ref second, .. }
                if first == "a" && second == "b"
        ));
        assert_eq!(table.get_route(&mt("A")), Some(UnicastRoute::Endpoint("X".into())));
    }
}
