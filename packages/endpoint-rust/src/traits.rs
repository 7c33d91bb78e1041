use async_trait::async_trait;
use courier_core::{LogicalMessage, MessageType, TransportMessage};

use crate::error::TransportError;
use crate::subscriptions::Subscriber;
use crate::timeouts::TimeoutEntry;
use crate::transport::TransportTransaction;

/// Queue-based transport the endpoint sends through and receives from.
/// Implementations: in-memory broker (tests, demos); real brokers plug in here.
///
/// Passing a [`TransportTransaction`] makes the operation part of that unit of
/// work: a transactional receive is acknowledged by [`Transport::commit`] and
/// returned to the queue by [`Transport::rollback`]; a transactional send is
/// only delivered on commit.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Binds the transport to the queue that `receive` reads from.
    async fn init(&self, input_queue: &str) -> Result<(), TransportError>;

    /// Creates a queue if it does not exist yet.
    async fn create_queue(&self, queue: &str) -> Result<(), TransportError>;

    /// Sends `message` to `destination`, enlisting in `transaction` when given.
    async fn send(
        &self,
        message: TransportMessage,
        destination: &str,
        transaction: Option<&TransportTransaction>,
    ) -> Result<(), TransportError>;

    /// Takes the next message from the input queue, if any.
    async fn receive(
        &self,
        transaction: Option<&TransportTransaction>,
    ) -> Result<Option<TransportMessage>, TransportError>;

    /// Returns `true` if the input queue currently holds a message.
    fn has_message(&self) -> bool;

    /// Delivers the enlisted sends and acknowledges the enlisted receive.
    async fn commit(&self, transaction: &TransportTransaction) -> Result<(), TransportError>;

    /// Discards the enlisted sends and returns the enlisted receive to its queue.
    async fn rollback(&self, transaction: &TransportTransaction) -> Result<(), TransportError>;
}

/// Durable storage for scheduled timeouts and delayed retries.
/// Implementations: in-memory (`DashMap`); databases plug in here.
///
/// Every operation must be atomic per entry: two concurrent `try_remove`
/// calls for the same id return the entry to exactly one caller.
#[async_trait]
pub trait TimeoutPersister: Send + Sync {
    /// Stores a new entry.
    async fn add(&self, entry: TimeoutEntry) -> anyhow::Result<()>;

    /// Removes and returns the entry with the given id, if still present.
    async fn try_remove(&self, id: &str) -> anyhow::Result<Option<TimeoutEntry>>;

    /// Removes every entry owned by `owner_id`, returning how many were removed.
    async fn remove_all_by(&self, owner_id: &str) -> anyhow::Result<usize>;

    /// Returns the entries due at or before `now_ms`, earliest first.
    async fn due_before(&self, now_ms: u64) -> anyhow::Result<Vec<TimeoutEntry>>;
}

/// Storage of which endpoints subscribe to which published message types.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Adds a subscription. Subscribing twice is a no-op.
    async fn subscribe(&self, subscriber: Subscriber, message_type: &MessageType)
        -> anyhow::Result<()>;

    /// Removes a subscription if present.
    async fn unsubscribe(
        &self,
        subscriber: &Subscriber,
        message_type: &MessageType,
    ) -> anyhow::Result<()>;

    /// Returns all subscribers to any of `message_types`, without duplicates.
    async fn subscribers_for(&self, message_types: &[MessageType]) -> anyhow::Result<Vec<Subscriber>>;
}

/// Converts logical messages to body bytes and back.
pub trait MessageSerializer: Send + Sync {
    /// Value written to the content-type header of outgoing messages.
    fn content_type(&self) -> &'static str;

    /// Serializes the message instance.
    fn serialize(&self, message: &LogicalMessage) -> anyhow::Result<Vec<u8>>;

    /// Restores a logical message of the given type from body bytes.
    fn deserialize(&self, body: &[u8], message_type: &MessageType)
        -> anyhow::Result<LogicalMessage>;
}
