//! Scheduling front-end over a [`TimeoutPersister`].

use std::sync::Arc;

use tracing::{debug, warn};

use super::{now_millis, TimeoutEntry, IMMEDIATE_DISPATCH_WINDOW};
use crate::traits::{TimeoutPersister, Transport};
use crate::transport::TransportTransaction;

/// Schedules, cancels, and dispatches timeout entries.
#[derive(Clone)]
pub struct TimeoutManager {
    persister: Arc<dyn TimeoutPersister>,
    transport: Arc<dyn Transport>,
}

impl TimeoutManager {
    #[must_use]
    pub fn new(persister: Arc<dyn TimeoutPersister>, transport: Arc<dyn Transport>) -> Self {
        Self {
            persister,
            transport,
        }
    }

    #[must_use]
    pub fn persister(&self) -> &Arc<dyn TimeoutPersister> {
        &self.persister
    }

    /// Schedules `entry`. Entries due within one second are sent right away,
    /// enlisted in `transaction` when one is given; later entries are stored
    /// for the poller.
    ///
    /// # Errors
    ///
    /// Returns an error if the immediate send or the store write fails.
    pub async fn push_timeout(
        &self,
        entry: TimeoutEntry,
        transaction: Option<&TransportTransaction>,
    ) -> anyhow::Result<()> {
        if entry.is_due_within(now_millis(), IMMEDIATE_DISPATCH_WINDOW) {
            debug!(timeout_id = %entry.id, destination = %entry.destination, "timeout due now, dispatching");
            let (destination, message) = entry.into_transport_message();
            self.transport
                .send(message, &destination, transaction)
                .await?;
            return Ok(());
        }
        debug!(timeout_id = %entry.id, due_at_ms = entry.due_at_ms, "timeout stored");
        self.persister.add(entry).await
    }

    /// Cancels one entry. Returns `false` if it was already gone.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn remove_timeout(&self, id: &str) -> anyhow::Result<bool> {
        Ok(self.persister.try_remove(id).await?.is_some())
    }

    /// Cancels every entry owned by `owner_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn remove_timeouts_by(&self, owner_id: &str) -> anyhow::Result<usize> {
        self.persister.remove_all_by(owner_id).await
    }

    /// Sends every entry due at `now_ms`, returning how many were dispatched.
    ///
    /// Each entry is claimed with `try_remove` first, so concurrent pollers
    /// never send the same entry twice. An entry whose send fails is stored
    /// again and retried on the next poll.
    ///
    /// # Errors
    ///
    /// Returns an error if the due-entry query fails.
    pub async fn dispatch_due(&self, now_ms: u64) -> anyhow::Result<usize> {
        let mut dispatched = 0;
        for candidate in self.persister.due_before(now_ms).await? {
            let Some(entry) = self.persister.try_remove(&candidate.id).await? else {
                continue;
            };
            let retained = entry.clone();
            let (destination, message) = entry.into_transport_message();
            match self.transport.send(message, &destination, None).await {
                Ok(()) => dispatched += 1,
                Err(e) => {
                    warn!(timeout_id = %retained.id, destination = %destination, error = %e, "timeout dispatch failed, will retry");
                    self.persister.add(retained).await?;
                }
            }
        }
        Ok(dispatched)
    }
}

#[cfg(test)]
mod tests {
    use courier_core::Headers;

    use super::*;
    use crate::timeouts::InMemoryTimeoutPersister;
    use crate::transport::{InMemoryBroker, InMemoryTransport};

    async fn setup() -> (TimeoutManager, Arc<InMemoryBroker>, Arc<InMemoryTimeoutPersister>) {
        let broker = Arc::new(InMemoryBroker::new());
        broker.create_queue("target");
        let transport = Arc::new(InMemoryTransport::new(Arc::clone(&broker)));
        transport.init("self").await.unwrap();
        let persister = Arc::new(InMemoryTimeoutPersister::new());
        let manager = TimeoutManager::new(persister.clone(), transport);
        (manager, broker, persister)
    }

    #[tokio::test]
    async fn due_now_entries_bypass_storage() {
        let (manager, broker, persister) = setup().await;
        let entry = TimeoutEntry::new("target", now_millis(), Headers::new(), b"x".to_vec());
        manager.push_timeout(entry, None).await.unwrap();
        assert_eq!(broker.len("target"), 1);
        assert!(persister.is_empty());
    }

    #[tokio::test]
    async fn future_entries_are_stored_until_due() {
        let (manager, broker, persister) = setup().await;
        let due = now_millis() + 60_000;
        let entry = TimeoutEntry::new("target", due, Headers::new(), Vec::new());
        manager.push_timeout(entry, None).await.unwrap();
        assert_eq!(persister.len(), 1);

        assert_eq!(manager.dispatch_due(due - 1).await.unwrap(), 0);
        assert_eq!(manager.dispatch_due(due).await.unwrap(), 1);
        assert_eq!(broker.len("target"), 1);
        assert!(persister.is_empty());
    }

    #[tokio::test]
    async fn failed_dispatch_keeps_entry() {
        let (manager, _broker, persister) = setup().await;
        let due = now_millis() + 60_000;
        let entry = TimeoutEntry::new("missing-queue", due, Headers::new(), Vec::new());
        manager.push_timeout(entry, None).await.unwrap();

        assert_eq!(manager.dispatch_due(due).await.unwrap(), 0);
        assert_eq!(persister.len(), 1);
    }

    #[tokio::test]
    async fn remove_by_owner_and_id() {
        let (manager, _broker, persister) = setup().await;
        let due = now_millis() + 60_000;
        let kept = TimeoutEntry::new("target", due, Headers::new(), Vec::new());
        let kept_id = kept.id.clone();
        manager.push_timeout(kept, None).await.unwrap();
        for _ in 0..2 {
            let owned = TimeoutEntry::new("target", due, Headers::new(), Vec::new()).with_owner("saga");
            manager.push_timeout(owned, None).await.unwrap();
        }

        assert_eq!(manager.remove_timeouts_by("saga").await.unwrap(), 2);
        assert_eq!(persister.len(), 1);
        assert!(manager.remove_timeout(&kept_id).await.unwrap());
        assert!(!manager.remove_timeout(&kept_id).await.unwrap());
    }
}
