//! `DashMap`-backed timeout storage.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::TimeoutEntry;
use crate::traits::TimeoutPersister;

/// In-process [`TimeoutPersister`]. Entries are lost on restart.
#[derive(Debug, Default)]
pub struct InMemoryTimeoutPersister {
    entries: DashMap<String, TimeoutEntry>,
}

impl InMemoryTimeoutPersister {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl TimeoutPersister for InMemoryTimeoutPersister {
    async fn add(&self, entry: TimeoutEntry) -> anyhow::Result<()> {
        match self.entries.entry(entry.id.clone()) {
            Entry::Occupied(existing) => {
                anyhow::bail!("timeout '{}' already exists", existing.key())
            }
            Entry::Vacant(slot) => {
                slot.insert(entry);
                Ok(())
            }
        }
    }

    async fn try_remove(&self, id: &str) -> anyhow::Result<Option<TimeoutEntry>> {
        Ok(self.entries.remove(id).map(|(_, entry)| entry))
    }

    async fn remove_all_by(&self, owner_id: &str) -> anyhow::Result<usize> {
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            let keep = entry.owner_id.as_deref() != Some(owner_id);
            if !keep {
                removed += 1;
            }
            keep
        });
        Ok(removed)
    }

    async fn due_before(&self, now_ms: u64) -> anyhow::Result<Vec<TimeoutEntry>> {
        let mut due: Vec<TimeoutEntry> = self
            .entries
            .iter()
            .filter(|e| e.due_at_ms <= now_ms)
            .map(|e| e.value().clone())
            .collect();
        due.sort_by(|a, b| a.due_at_ms.cmp(&b.due_at_ms).then_with(|| a.id.cmp(&b.id)));
        Ok(due)
    }
}
