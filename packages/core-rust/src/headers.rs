//! Message headers and the well-known header names used across the pipeline.

use std::collections::BTreeMap;

/// Header map carried by every message.
///
/// Uses `BTreeMap` so that headers serialize and log in a deterministic order.
pub type Headers = BTreeMap<String, String>;

/// Unique message identifier.
pub const MESSAGE_ID: &str = "Courier.MessageId";
/// Message type names enclosed in the body, used to pick a deserializer target.
pub const ENCLOSED_MESSAGE_TYPES: &str = "Courier.EnclosedMessageTypes";
/// Content type of the serialized body (e.g. `application/json`).
pub const CONTENT_TYPE: &str = "Courier.ContentType";
/// Address replies to this message should be sent to.
pub const REPLY_TO_ADDRESS: &str = "Courier.ReplyToAddress";
/// Logical name of the endpoint that sent the message.
pub const ORIGINATING_ENDPOINT: &str = "Courier.OriginatingEndpoint";
/// Send time in milliseconds since the Unix epoch.
pub const TIME_SENT: &str = "Courier.TimeSent";
/// Id of the incoming message that caused this one to be sent.
pub const RELATED_TO: &str = "Courier.RelatedTo";

/// Number of failed processing attempts accumulated before the current delivery.
pub const PROCESSING_FAILURES: &str = "Courier.ProcessingFailures";
/// Number of delayed retries already performed for this message.
pub const DELAYED_RETRIES: &str = "Courier.DelayedRetries";
/// Time the last delayed retry was scheduled, in milliseconds since the Unix epoch.
pub const DELAYED_RETRIES_TIMESTAMP: &str = "Courier.DelayedRetries.Timestamp";

/// Queue the message failed in before it was moved to the error queue.
pub const FAILED_QUEUE: &str = "Courier.FailedQ";
/// Stable name of the failure kind.
pub const EXCEPTION_KIND: &str = "Courier.ExceptionInfo.Kind";
/// Human-readable failure message.
pub const EXCEPTION_MESSAGE: &str = "Courier.ExceptionInfo.Message";
/// Chain of underlying error causes, joined with `: `.
pub const EXCEPTION_SOURCE: &str = "Courier.ExceptionInfo.Source";
/// Time of the final failure in milliseconds since the Unix epoch.
pub const TIME_OF_FAILURE: &str = "Courier.TimeOfFailure";

/// Reads a header as an unsigned counter, treating absent or malformed values as zero.
#[must_use]
pub fn counter(headers: &Headers, name: &str) -> u32 {
    headers
        .get(name)
        .and_then(|value| value.parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_reads_numeric_header() {
        let mut headers = Headers::new();
        headers.insert(DELAYED_RETRIES.to_string(), "3".to_string());
        assert_eq!(counter(&headers, DELAYED_RETRIES), 3);
    }

    #[test]
    fn counter_defaults_to_zero() {
        let mut headers = Headers::new();
        assert_eq!(counter(&headers, PROCESSING_FAILURES), 0);

        headers.insert(PROCESSING_FAILURES.to_string(), "many".to_string());
        assert_eq!(counter(&headers, PROCESSING_FAILURES), 0);
    }
}
