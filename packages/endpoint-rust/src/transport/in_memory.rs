//! In-memory queue broker and [`Transport`] implementation.
//!
//! [`InMemoryBroker`] holds named FIFO queues shared by any number of
//! [`InMemoryTransport`]s, so several endpoints can exchange messages inside
//! one process. Used by tests, demos, and as the reference for transactional
//! semantics.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use courier_core::TransportMessage;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use super::transaction::TransportTransaction;
use crate::error::TransportError;
use crate::traits::Transport;

// ---------------------------------------------------------------------------
// InMemoryBroker
// ---------------------------------------------------------------------------

/// Named in-memory FIFO queues.
#[derive(Debug, Default)]
pub struct InMemoryBroker {
    queues: DashMap<String, Arc<Mutex<VecDeque<TransportMessage>>>>,
}

impl InMemoryBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a queue if it does not exist yet.
    pub fn create_queue(&self, name: &str) {
        self.queues.entry(name.to_string()).or_default();
    }

    /// Returns `true` if the queue exists.
    #[must_use]
    pub fn has_queue(&self, name: &str) -> bool {
        self.queues.contains_key(name)
    }

    fn queue(&self, name: &str) -> Result<Arc<Mutex<VecDeque<TransportMessage>>>, TransportError> {
        self.queues
            .get(name)
            .map(|q| Arc::clone(q.value()))
            .ok_or_else(|| TransportError::QueueNotFound(name.to_string()))
    }

    /// Appends a message to the back of a queue.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::QueueNotFound`] if the queue does not exist.
    pub fn enqueue(&self, queue: &str, message: TransportMessage) -> Result<(), TransportError> {
        self.queue(queue)?.lock().push_back(message);
        Ok(())
    }

    /// Returns a message to the front of its queue so it is redelivered next.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::QueueNotFound`] if the queue does not exist.
    pub fn requeue(&self, queue: &str, message: TransportMessage) -> Result<(), TransportError> {
        self.queue(queue)?.lock().push_front(message);
        Ok(())
    }

    /// Removes the message at the front of a queue.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::QueueNotFound`] if the queue does not exist.
    pub fn dequeue(&self, queue: &str) -> Result<Option<TransportMessage>, TransportError> {
        Ok(self.queue(queue)?.lock().pop_front())
    }

    /// Number of messages in a queue; zero for unknown queues.
    #[must_use]
    pub fn len(&self, queue: &str) -> usize {
        self.queue(queue).map_or(0, |q| q.lock().len())
    }

    /// Returns `true` if the queue is empty or unknown.
    #[must_use]
    pub fn is_empty(&self, queue: &str) -> bool {
        self.len(queue) == 0
    }

    /// Copies the current contents of a queue without consuming them.
    #[must_use]
    pub fn peek_all(&self, queue: &str) -> Vec<TransportMessage> {
        self.queue(queue)
            .map(|q| q.lock().iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Removes and returns every message in a queue.
    #[must_use]
    pub fn drain(&self, queue: &str) -> Vec<TransportMessage> {
        self.queue(queue)
            .map(|q| q.lock().drain(..).collect())
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// InMemoryTransport
// ---------------------------------------------------------------------------

/// Transport bound to one input queue of a shared [`InMemoryBroker`].
#[derive(Debug)]
pub struct InMemoryTransport {
    broker: Arc<InMemoryBroker>,
    input_queue: RwLock<Option<String>>,
}

impl InMemoryTransport {
    #[must_use]
    pub fn new(broker: Arc<InMemoryBroker>) -> Self {
        Self {
            broker,
            input_queue: RwLock::new(None),
        }
    }

    /// Returns the broker this transport is attached to.
    #[must_use]
    pub fn broker(&self) -> Arc<InMemoryBroker> {
        Arc::clone(&self.broker)
    }

    fn input_queue(&self) -> Result<String, TransportError> {
        self.input_queue
            .read()
            .clone()
            .ok_or(TransportError::NotInitialized)
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn init(&self, input_queue: &str) -> Result<(), TransportError> {
        self.broker.create_queue(input_queue);
        *self.input_queue.write() = Some(input_queue.to_string());
        Ok(())
    }

    async fn create_queue(&self, queue: &str) -> Result<(), TransportError> {
        self.broker.create_queue(queue);
        Ok(())
    }

    async fn send(
        &self,
        message: TransportMessage,
        destination: &str,
        transaction: Option<&TransportTransaction>,
    ) -> Result<(), TransportError> {
        if !self.broker.has_queue(destination) {
            return Err(TransportError::QueueNotFound(destination.to_string()));
        }
        match transaction {
            Some(tx) => {
                debug!(
                    transaction = %tx.id(),
                    message_id = %message.message_id,
                    destination,
                    "enlisted send"
                );
                tx.enlist_send(message, destination);
                Ok(())
            }
            None => self.broker.enqueue(destination, message),
        }
    }

    async fn receive(
        &self,
        transaction: Option<&TransportTransaction>,
    ) -> Result<Option<TransportMessage>, TransportError> {
        let queue = self.input_queue()?;
        let Some(message) = self.broker.dequeue(&queue)? else {
            return Ok(None);
        };
        if let Some(tx) = transaction {
            tx.record_receive(queue, message.clone());
        }
        Ok(Some(message))
    }

    fn has_message(&self) -> bool {
        self.input_queue()
            .map(|queue| !self.broker.is_empty(&queue))
            .unwrap_or(false)
    }

    async fn commit(&self, transaction: &TransportTransaction) -> Result<(), TransportError> {
        let sends = transaction.take_sends();
        // Validate every destination before delivering anything so a commit
        // either delivers all enlisted sends or none of them.
        if let Some(missing) = sends.iter().find(|s| !self.broker.has_queue(&s.destination)) {
            let err = TransportError::QueueNotFound(missing.destination.clone());
            transaction.restore_sends(sends);
            return Err(err);
        }
        for send in sends {
            self.broker.enqueue(&send.destination, send.message)?;
        }
        // Acknowledging an in-memory receive means forgetting the receipt.
        if let Some(receipt) = transaction.take_receipt() {
            debug!(
                transaction = %transaction.id(),
                message_id = %receipt.message.message_id,
                queue = %receipt.queue,
                "receive acknowledged"
            );
        }
        Ok(())
    }

    async fn rollback(&self, transaction: &TransportTransaction) -> Result<(), TransportError> {
        let dropped = transaction.discard_sends();
        if let Some(receipt) = transaction.take_receipt() {
            debug!(
                transaction = %transaction.id(),
                message_id = %receipt.message.message_id,
                dropped_sends = dropped,
                "returning message to queue"
            );
            self.broker.requeue(&receipt.queue, receipt.message)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
