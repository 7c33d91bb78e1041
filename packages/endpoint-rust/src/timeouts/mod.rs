//! Deferred delivery: timeout entries, their storage, and the due-entry poller.
//!
//! Delayed retries are scheduled here as well as user timeouts. An entry that
//! is due within [`IMMEDIATE_DISPATCH_WINDOW`] skips storage entirely.

pub mod manager;
pub mod persister;
pub mod poller;

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use courier_core::{headers, Headers, TransportMessage};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use manager::TimeoutManager;
pub use persister::InMemoryTimeoutPersister;
pub use poller::{PollTask, TimeoutPoller};

/// Entries due sooner than this are dispatched instead of stored.
pub const IMMEDIATE_DISPATCH_WINDOW: Duration = Duration::from_secs(1);

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// A message scheduled for delivery at a later time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutEntry {
    pub id: String,
    pub destination: String,
    pub due_at_ms: u64,
    pub headers: Headers,
    #[serde(with = "serde_bytes")]
    pub body: Vec<u8>,
    /// Groups entries for bulk removal (a saga id, for example).
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub owner_id: Option<String>,
}

impl TimeoutEntry {
    /// Creates an entry with a fresh id that delivers `headers`/`body` to
    /// `destination` at `due_at_ms`.
    pub fn new(
        destination: impl Into<String>,
        due_at_ms: u64,
        headers: Headers,
        body: Vec<u8>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            destination: destination.into(),
            due_at_ms,
            headers,
            body,
            owner_id: None,
        }
    }

    #[must_use]
    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    /// Returns `true` if the entry should be dispatched rather than stored.
    #[must_use]
    pub fn is_due_within(&self, now_ms: u64, window: Duration) -> bool {
        let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
        self.due_at_ms <= now_ms.saturating_add(window_ms)
    }

    /// Builds the transport message to deliver. The message id header wins
    /// over the entry id so redeliveries keep the original identity.
    #[must_use]
    pub fn into_transport_message(self) -> (String, TransportMessage) {
        let message_id = self
            .headers
            .get(headers::MESSAGE_ID)
            .cloned()
            .unwrap_or(self.id);
        (
            self.destination,
            TransportMessage::new(message_id, self.headers, self.body),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn due_window_is_inclusive() {
        let entry = TimeoutEntry::new("q", 2_000, Headers::new(), Vec::new());
        assert!(entry.is_due_within(1_000, IMMEDIATE_DISPATCH_WINDOW));
        assert!(!entry.is_due_within(999, IMMEDIATE_DISPATCH_WINDOW));
    }

    #[test]
    fn transport_message_keeps_original_id() {
        let mut h = Headers::new();
        h.insert(headers::MESSAGE_ID.to_string(), "original".to_string());
        let entry = TimeoutEntry::new("q", 0, h, b"body".to_vec());
        let (destination, message) = entry.into_transport_message();
        assert_eq!(destination, "q");
        assert_eq!(message.message_id, "original");
        assert_eq!(message.body, b"body");
    }

    #[test]
    fn transport_message_falls_back_to_entry_id() {
        let entry = TimeoutEntry::new("q", 0, Headers::new(), Vec::new());
        let id = entry.id.clone();
        let (_, message) = entry.into_transport_message();
        assert_eq!(message.message_id, id);
    }
}
