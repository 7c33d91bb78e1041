//! Subscribers to published message types and the in-memory subscription store.

use std::collections::BTreeSet;
use std::fmt;

use async_trait::async_trait;
use courier_core::MessageType;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::traits::SubscriptionStore;

/// An endpoint that receives copies of a published message type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscriber {
    /// Transport address the copy is delivered to.
    pub transport_address: String,
    /// Logical endpoint the address belongs to, when known. Subscribers of the
    /// same endpoint share one copy.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub endpoint: Option<String>,
}

impl Subscriber {
    pub fn new(transport_address: impl Into<String>, endpoint: Option<String>) -> Self {
        Self {
            transport_address: transport_address.into(),
            endpoint,
        }
    }
}

impl fmt::Display for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.endpoint {
            Some(endpoint) => write!(f, "{} ({endpoint})", self.transport_address),
            None => f.write_str(&self.transport_address),
        }
    }
}

/// Subscriptions held in memory, keyed by message type.
#[derive(Debug, Default)]
pub struct InMemorySubscriptionStore {
    by_type: DashMap<MessageType, BTreeSet<Subscriber>>,
}

impl InMemorySubscriptionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn subscribe(
        &self,
        subscriber: Subscriber,
        message_type: &MessageType,
    ) -> anyhow::Result<()> {
        self.by_type
            .entry(message_type.clone())
            .or_default()
            .insert(subscriber);
        Ok(())
    }

    async fn unsubscribe(
        &self,
        subscriber: &Subscriber,
        message_type: &MessageType,
    ) -> anyhow::Result<()> {
        if let Some(mut subscribers) = self.by_type.get_mut(message_type) {
            subscribers.remove(subscriber);
        }
        self.by_type.remove_if(message_type, |_, s| s.is_empty());
        Ok(())
    }

    async fn subscribers_for(
        &self,
        message_types: &[MessageType],
    ) -> anyhow::Result<Vec<Subscriber>> {
        let mut all = BTreeSet::new();
        for message_type in message_types {
            if let Some(subscribers) = self.by_type.get(message_type) {
                all.extend(subscribers.iter().cloned());
            }
        }
        Ok(all.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_is_idempotent_and_deduplicated_across_types() {
        let store = InMemorySubscriptionStore::new();
        let a = MessageType::new("A");
        let b = MessageType::new("B");
        let sub = Subscriber::new("billing", Some("Billing".to_string()));

        store.subscribe(sub.clone(), &a).await.unwrap();
        store.subscribe(sub.clone(), &a).await.unwrap();
        store.subscribe(sub.clone(), &b).await.unwrap();

        let found = store.subscribers_for(&[a, b]).await.unwrap();
        assert_eq!(found, vec![sub]);
    }

    #[tokio::test]
    async fn unsubscribe_removes_only_that_type() {
        let store = InMemorySubscriptionStore::new();
        let a = MessageType::new("A");
        let b = MessageType::new("B");
        let sub = Subscriber::new("billing", None);
        store.subscribe(sub.clone(), &a).await.unwrap();
        store.subscribe(sub.clone(), &b).await.unwrap();

        store.unsubscribe(&sub, &a).await.unwrap();
        assert!(store.subscribers_for(&[a]).await.unwrap().is_empty());
        assert_eq!(store.subscribers_for(&[b]).await.unwrap().len(), 1);
    }

    #[test]
    fn display_includes_endpoint() {
        let sub = Subscriber::new("billing-1", Some("Billing".to_string()));
        assert_eq!(sub.to_string(), "billing-1 (Billing)");
    }
}
