//! Default JSON body serializer.

use anyhow::Context as _;
use courier_core::{LogicalMessage, MessageType};

use crate::traits::MessageSerializer;

/// Writes the message instance as a JSON document.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSerializer;

impl MessageSerializer for JsonSerializer {
    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn serialize(&self, message: &LogicalMessage) -> anyhow::Result<Vec<u8>> {
        serde_json::to_vec(&message.instance)
            .with_context(|| format!("serializing '{}'", message.message_type))
    }

    fn deserialize(&self, body: &[u8], message_type: &MessageType) -> anyhow::Result<LogicalMessage> {
        let instance = serde_json::from_slice(body)
            .with_context(|| format!("deserializing '{message_type}'"))?;
        Ok(LogicalMessage::new(message_type.clone(), instance))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn body_is_the_bare_instance() {
        let message = LogicalMessage::new("Sales.PlaceOrder", json!({ "orderId": 7 }));
        let body = JsonSerializer.serialize(&message).unwrap();
        assert_eq!(body, br#"{"orderId":7}"#);

        let back = JsonSerializer
            .deserialize(&body, &MessageType::new("Sales.PlaceOrder"))
            .unwrap();
        assert_eq!(back, message);
    }

    #[test]
    fn malformed_body_names_the_type() {
        let err = JsonSerializer
            .deserialize(b"{not json", &MessageType::new("Sales.PlaceOrder"))
            .unwrap_err();
        assert!(err.to_string().contains("Sales.PlaceOrder"));
    }
}
