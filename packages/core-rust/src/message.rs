//! Logical and transport-level message representations.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::headers::{self, Headers};

/// Stable name identifying a message contract.
///
/// Routing tables, handler registries, and subscriptions are all keyed by
/// `MessageType`, so the name must stay stable across deployments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageType(String);

impl MessageType {
    /// Creates a message type from its name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the message type name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if the name is empty or whitespace only.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageType {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for MessageType {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// An application message contract.
///
/// ```
/// use courier_core::Message;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct PlaceOrder {
///     order_id: u64,
/// }
///
/// impl Message for PlaceOrder {
///     const MESSAGE_TYPE: &'static str = "Sales.PlaceOrder";
/// }
/// ```
pub trait Message: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Wire name of this message type.
    const MESSAGE_TYPE: &'static str;

    /// Returns the [`MessageType`] for this contract.
    #[must_use]
    fn message_type() -> MessageType {
        MessageType::new(Self::MESSAGE_TYPE)
    }
}

/// A message instance in its logical (pre-serialization) form.
///
/// The instance is held as a JSON value so that mutators can inspect or
/// replace it without knowing the concrete Rust type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogicalMessage {
    pub message_type: MessageType,
    pub instance: serde_json::Value,
}

impl LogicalMessage {
    /// Creates a logical message from an untyped instance.
    pub fn new(message_type: impl Into<MessageType>, instance: serde_json::Value) -> Self {
        Self {
            message_type: message_type.into(),
            instance,
        }
    }

    /// Captures a typed message.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be represented as JSON.
    pub fn from_message<M: Message>(message: &M) -> Result<Self, serde_json::Error> {
        Ok(Self {
            message_type: M::message_type(),
            instance: serde_json::to_value(message)?,
        })
    }

    /// Returns `true` if this message carries the contract `M`.
    #[must_use]
    pub fn is<M: Message>(&self) -> bool {
        self.message_type.as_str() == M::MESSAGE_TYPE
    }

    /// Converts the instance back into a typed message.
    ///
    /// # Errors
    ///
    /// Returns an error if the instance does not match the shape of `M`.
    pub fn to_message<M: Message>(&self) -> Result<M, serde_json::Error> {
        M::deserialize(&self.instance)
    }
}

/// A message as seen by the transport: id, headers, and an opaque body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportMessage {
    pub message_id: String,
    pub headers: Headers,
    #[serde(with = "serde_bytes")]
    pub body: Vec<u8>,
}

impl TransportMessage {
    /// Creates a transport message and stamps the message id header.
    pub fn new(message_id: impl Into<String>, mut headers: Headers, body: Vec<u8>) -> Self {
        let message_id = message_id.into();
        headers.insert(headers::MESSAGE_ID.to_string(), message_id.clone());
        Self {
            message_id,
            headers,
            body,
        }
    }

    /// Returns the value of a header, if present.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}
