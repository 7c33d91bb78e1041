//! Selection of one instance address among the candidates of a logical endpoint.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use courier_core::{Headers, MessageType};
use dashmap::DashMap;

/// Operation a strategy is consulted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DistributionStrategyScope {
    Send,
    Publish,
}

impl fmt::Display for DistributionStrategyScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Send => f.write_str("send"),
            Self::Publish => f.write_str("publish"),
        }
    }
}

/// Candidates and metadata handed to a [`DistributionStrategy`].
#[derive(Debug, Clone, Copy)]
pub struct DistributionContext<'a> {
    pub receiver_addresses: &'a [String],
    pub message_id: &'a str,
    pub message_type: &'a MessageType,
    pub headers: &'a Headers,
}

/// Picks exactly one address from the candidates.
pub trait DistributionStrategy: Send + Sync {
    /// Logical endpoint this strategy serves.
    fn endpoint(&self) -> &str;

    fn scope(&self) -> DistributionStrategyScope;

    /// Returns `None` only when there are no candidates.
    fn select_destination(&self, context: &DistributionContext<'_>) -> Option<String>;
}

/// Cycles through the candidates in order, one step per call.
#[derive(Debug)]
pub struct RoundRobinStrategy {
    endpoint: String,
    scope: DistributionStrategyScope,
    next: AtomicUsize,
}

impl RoundRobinStrategy {
    pub fn new(endpoint: impl Into<String>, scope: DistributionStrategyScope) -> Self {
        Self {
            endpoint: endpoint.into(),
            scope,
            next: AtomicUsize::new(0),
        }
    }
}

impl DistributionStrategy for RoundRobinStrategy {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn scope(&self) -> DistributionStrategyScope {
        self.scope
    }

    fn select_destination(&self, context: &DistributionContext<'_>) -> Option<String> {
        let candidates = context.receiver_addresses;
        if candidates.is_empty() {
            return None;
        }
        let index = self.next.fetch_add(1, Ordering::Relaxed) % candidates.len();
        Some(candidates[index].clone())
    }
}

/// Strategy per (endpoint, scope); round-robin unless overridden.
#[derive(Default)]
pub struct DistributionPolicy {
    strategies: DashMap<(String, DistributionStrategyScope), Arc<dyn DistributionStrategy>>,
}

impl DistributionPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `strategy` for its endpoint and scope, replacing any previous one.
    pub fn set_distribution_strategy(&self, strategy: Arc<dyn DistributionStrategy>) {
        let key = (strategy.endpoint().to_string(), strategy.scope());
        self.strategies.insert(key, strategy);
    }

    /// Returns the strategy for `endpoint` and `scope`, creating the default
    /// round-robin strategy on first use so its position persists across calls.
    #[must_use]
    pub fn get_distribution_strategy(
        &self,
        endpoint: &str,
        scope: DistributionStrategyScope,
    ) -> Arc<dyn DistributionStrategy> {
        let entry = self
            .strategies
            .entry((endpoint.to_string(), scope))
            .or_insert_with(|| Arc::new(RoundRobinStrategy::new(endpoint, scope)));
        Arc::clone(entry.value())
    }
}
