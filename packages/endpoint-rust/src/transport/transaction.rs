//! Explicit unit-of-work handle threaded through receive → handle → send.

use std::sync::Arc;

use courier_core::TransportMessage;
use parking_lot::Mutex;
use uuid::Uuid;

/// A send waiting for its transaction to commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSend {
    pub message: TransportMessage,
    pub destination: String,
}

/// A message taken from a queue under a transaction and not yet acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub queue: String,
    pub message: TransportMessage,
}

#[derive(Debug, Default)]
struct TransactionState {
    receipt: Option<Receipt>,
    sends: Vec<PendingSend>,
}

/// Shared handle to one message attempt's transport unit of work.
///
/// Cloning yields another handle to the same transaction, so sends issued deep
/// inside a handler and the receive owned by the receive loop end up in the
/// same unit of work. Transports decide what commit and rollback mean; this
/// type only records what was enlisted.
#[derive(Debug, Clone)]
pub struct TransportTransaction {
    id: Uuid,
    state: Arc<Mutex<TransactionState>>,
}

impl TransportTransaction {
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: Arc::new(Mutex::new(TransactionState::default())),
        }
    }

    /// Unique id, used for log correlation.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Records the message received under this transaction.
    pub fn record_receive(&self, queue: impl Into<String>, message: TransportMessage) {
        self.state.lock().receipt = Some(Receipt {
            queue: queue.into(),
            message,
        });
    }

    /// Enlists a send to be delivered on commit.
    pub fn enlist_send(&self, message: TransportMessage, destination: impl Into<String>) {
        self.state.lock().sends.push(PendingSend {
            message,
            destination: destination.into(),
        });
    }

    /// Number of sends enlisted so far.
    #[must_use]
    pub fn pending_sends(&self) -> usize {
        self.state.lock().sends.len()
    }

    /// Drops the enlisted sends while keeping the receive, returning how many
    /// were dropped. Used between in-place retries of the same message.
    pub fn discard_sends(&self) -> usize {
        let mut state = self.state.lock();
        let dropped = state.sends.len();
        state.sends.clear();
        dropped
    }

    /// Removes and returns the enlisted sends in enlistment order.
    #[must_use]
    pub fn take_sends(&self) -> Vec<PendingSend> {
        std::mem::take(&mut self.state.lock().sends)
    }

    /// Puts `sends` back ahead of anything enlisted since they were taken,
    /// keeping enlistment order.
    pub fn restore_sends(&self, mut sends: Vec<PendingSend>) {
        let mut state = self.state.lock();
        sends.append(&mut state.sends);
        state.sends = sends;
    }

    /// Removes and returns the receipt of the enlisted receive.
    #[must_use]
    pub fn take_receipt(&self) -> Option<Receipt> {
        self.state.lock().receipt.take()
    }
}

impl Default for TransportTransaction {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use courier_core::Headers;

    use super::*;

    fn message(id: &str) -> TransportMessage {
        TransportMessage::new(id, Headers::new(), Vec::new())
    }

    #[test]
    fn clones_share_state() {
        let tx = TransportTransaction::new();
        let other = tx.clone();
        other.enlist_send(message("1"), "q");
        assert_eq!(tx.pending_sends(), 1);
        assert_eq!(tx.id(), other.id());
    }

    #[test]
    fn discard_keeps_receipt() {
        let tx = TransportTransaction::new();
        tx.record_receive("input", message("in"));
        tx.enlist_send(message("1"), "a");
        tx.enlist_send(message("2"), "b");

        assert_eq!(tx.discard_sends(), 2);
        assert_eq!(tx.pending_sends(), 0);
        assert_eq!(tx.take_receipt().unwrap().queue, "input");
        assert!(tx.take_receipt().is_none());
    }

    #[test]
    fn take_sends_preserves_order() {
        let tx = TransportTransaction::new();
        tx.enlist_send(message("1"), "a");
        tx.enlist_send(message("2"), "b");
        let sends = tx.take_sends();
        let destinations: Vec<_> = sends.iter().map(|s| s.destination.as_str()).collect();
        assert_eq!(destinations, vec!["a", "b"]);
        assert_eq!(tx.pending_sends(), 0);
    }

    #[test]
    fn restored_sends_precede_later_enlistments() {
        let tx = TransportTransaction::new();
        tx.enlist_send(message("1"), "a");
        tx.enlist_send(message("2"), "b");
        let taken = tx.take_sends();
        tx.enlist_send(message("3"), "c");
        tx.restore_sends(taken);

        let ids: Vec<_> = tx
            .take_sends()
            .into_iter()
            .map(|s| s.message.message_id)
            .collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }
}
