//! Endpoint configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// How outgoing sends relate to the receive operation of the message being handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransactionMode {
    /// The receive is acknowledged only after successful processing; sends are
    /// dispatched as soon as they are issued.
    ReceiveOnly,
    /// Sends are enlisted in the receive transaction and dispatched atomically
    /// with the acknowledgement. A rollback discards them.
    #[default]
    SendsAtomicWithReceive,
}

/// Retry limits and back-off for failed messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecoverabilityConfig {
    /// Immediate (in-place) retries before escalating to delayed retries.
    pub immediate_retries: u32,
    /// Delayed retries before the message is moved to the error queue.
    pub delayed_retries: u32,
    /// Back-off added per delayed retry, in milliseconds.
    pub delayed_retry_time_increase_ms: u64,
}

impl RecoverabilityConfig {
    /// Back-off added per delayed retry.
    #[must_use]
    pub fn time_increase(&self) -> Duration {
        Duration::from_millis(self.delayed_retry_time_increase_ms)
    }
}

impl Default for RecoverabilityConfig {
    fn default() -> Self {
        Self {
            immediate_retries: 5,
            delayed_retries: 3,
            delayed_retry_time_increase_ms: 10_000,
        }
    }
}

/// Endpoint-level configuration.
///
/// Controls addressing, concurrency, transaction behavior, and recoverability.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EndpointConfig {
    /// Logical endpoint name; also the shared input queue name.
    pub endpoint_name: String,
    /// Makes this instance uniquely addressable (`{endpoint}-{discriminator}`).
    pub instance_discriminator: Option<String>,
    /// A send-only endpoint has no input queue and never receives.
    pub send_only: bool,
    /// Maximum number of messages processed concurrently.
    pub max_concurrency: u32,
    /// Relationship between receives and outgoing sends.
    pub transaction_mode: TransactionMode,
    /// Address failed messages are moved to.
    pub error_queue: String,
    /// Idle wait between receive attempts on an empty queue, in milliseconds.
    pub receive_poll_interval_ms: u64,
    /// Interval between scans for due timeouts, in milliseconds.
    pub timeout_poll_interval_ms: u64,
    pub recoverability: RecoverabilityConfig,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            endpoint_name: String::new(),
            instance_discriminator: None,
            send_only: false,
            max_concurrency: 8,
            transaction_mode: TransactionMode::default(),
            error_queue: "error".to_string(),
            receive_poll_interval_ms: 20,
            timeout_poll_interval_ms: 1000,
            recoverability: RecoverabilityConfig::default(),
        }
    }
}

impl EndpointConfig {
    /// Creates a configuration for the named endpoint with default settings.
    pub fn new(endpoint_name: impl Into<String>) -> Self {
        Self {
            endpoint_name: endpoint_name.into(),
            ..Self::default()
        }
    }

    /// Parses a JSON configuration document. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::Invalid`] if the document is malformed or
    /// fails [`EndpointConfig::validate`].
    pub fn from_json(json: &str) -> Result<Self, ConfigurationError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigurationError::Invalid(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the settings that cannot be expressed by the types alone.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::Invalid`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.endpoint_name.trim().is_empty() {
            return Err(ConfigurationError::Invalid(
                "endpoint name must not be empty".to_string(),
            ));
        }
        if !self.send_only && self.error_queue.trim().is_empty() {
            return Err(ConfigurationError::Invalid(
                "an error queue is required for endpoints that receive".to_string(),
            ));
        }
        if self.max_concurrency == 0 {
            return Err(ConfigurationError::Invalid(
                "max concurrency must be at least 1".to_string(),
            ));
        }
        if matches!(&self.instance_discriminator, Some(d) if d.trim().is_empty()) {
            return Err(ConfigurationError::Invalid(
                "instance discriminator must not be blank".to_string(),
            ));
        }
        Ok(())
    }

    /// Idle wait between receive attempts on an empty queue.
    #[must_use]
    pub fn receive_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receive_poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_config_defaults() {
        let config = EndpointConfig::default();
        assert_eq!(config.max_concurrency, 8);
        assert_eq!(config.error_queue, "error");
        assert_eq!(
            config.transaction_mode,
            TransactionMode::SendsAtomicWithReceive
        );
        assert!(!config.send_only);
        assert!(config.instance_discriminator.is_none());
    }

    #[test]
    fn recoverability_defaults() {
        let config = RecoverabilityConfig::default();
        assert_eq!(config.immediate_retries, 5);
        assert_eq!(config.delayed_retries, 3);
        assert_eq!(config.time_increase(), Duration::from_secs(10));
    }

    #[test]
    fn from_json_fills_missing_fields() {
        let config = EndpointConfig::from_json(
            r#"{
                "endpointName": "Sales",
                "instanceDiscriminator": "blue",
                "transactionMode": "receiveOnly",
                "recoverability": { "immediateRetries": 1 }
            }"#,
        )
        .unwrap();
        assert_eq!(config.endpoint_name, "Sales");
        assert_eq!(config.instance_discriminator.as_deref(), Some("blue"));
        assert_eq!(config.transaction_mode, TransactionMode::ReceiveOnly);
        assert_eq!(config.recoverability.immediate_retries, 1);
        assert_eq!(config.recoverability.delayed_retries, 3);
        assert_eq!(config.max_concurrency, 8);
    }

    #[test]
    fn validation_rejects_bad_settings() {
        assert!(EndpointConfig::default().validate().is_err());
        assert!(EndpointConfig::from_json(r#"{"endpointName": "A", "maxConcurrency": 0}"#).is_err());
        assert!(EndpointConfig::from_json("not json").is_err());

        let mut config = EndpointConfig::new("A");
        config.instance_discriminator = Some(" ".to_string());
        assert!(config.validate().is_err());
    }
}
