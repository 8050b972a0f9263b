//! Configuration recognised by the delivery coordinator.

use super::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default lifetime applied when the sender picks no timer: four minutes.
pub const DEFAULT_EXPIRY_SECONDS: u64 = 240;

/// Default sync cadence when polling.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;

/// Default abort threshold for external calls.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// Default number of consecutive failures reported as a lost connection.
pub const DEFAULT_CONNECTION_LOST_THRESHOLD: u32 = 3;

/// Delivery coordinator configuration.
///
/// Keys are camelCase when loaded from JSON, and every key is optional.
///
/// # Examples
///
/// ```
/// use ephemera::chat::config::DeliveryConfig;
///
/// let config = DeliveryConfig::from_json(r#"{ "pollIntervalMs": 250 }"#)
///     .expect("valid configuration");
/// assert_eq!(config.poll_interval_ms, 250);
/// assert_eq!(config.default_expiry_seconds, Some(240));
///
/// let never_expire = DeliveryConfig::from_json(r#"{ "defaultExpirySeconds": null }"#)
///     .expect("valid configuration");
/// assert_eq!(never_expire.default_expiry_seconds, None);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeliveryConfig {
    /// Sync cadence when polling, in milliseconds.
    pub poll_interval_ms: u64,
    /// Lifetime applied when the user selects no timer; `None` keeps such
    /// messages forever.
    pub default_expiry_seconds: Option<u64>,
    /// Abort threshold for external fetch, send, and upload calls.
    pub request_timeout_ms: u64,
    /// Consecutive failures after which the connection counts as lost.
    pub connection_lost_threshold: u32,
    /// Whether refreshing partners selects the first one when nothing is
    /// selected yet.
    pub auto_select_first_partner: bool,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            default_expiry_seconds: Some(DEFAULT_EXPIRY_SECONDS),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            connection_lost_threshold: DEFAULT_CONNECTION_LOST_THRESHOLD,
            auto_select_first_partner: true,
        }
    }
}

impl DeliveryConfig {
    /// Parses and validates a JSON configuration document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Malformed`] for unparsable input and
    /// [`ConfigError::ZeroValue`] when validation fails.
    pub fn from_json(document: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(document)
            .map_err(|err| ConfigError::Malformed(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that every duration and threshold is positive.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroValue`] naming the first offending option.
    pub const fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::ZeroValue("pollIntervalMs"));
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::ZeroValue("requestTimeoutMs"));
        }
        if matches!(self.default_expiry_seconds, Some(0)) {
            return Err(ConfigError::ZeroValue("defaultExpirySeconds"));
        }
        if self.connection_lost_threshold == 0 {
            return Err(ConfigError::ZeroValue("connectionLostThreshold"));
        }
        Ok(())
    }

    /// Sets the polling cadence.
    #[must_use]
    pub const fn with_poll_interval_ms(mut self, poll_interval_ms: u64) -> Self {
        self.poll_interval_ms = poll_interval_ms;
        self
    }

    /// Sets the default message lifetime.
    #[must_use]
    pub const fn with_default_expiry_seconds(mut self, seconds: Option<u64>) -> Self {
        self.default_expiry_seconds = seconds;
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub const fn with_request_timeout_ms(mut self, request_timeout_ms: u64) -> Self {
        self.request_timeout_ms = request_timeout_ms;
        self
    }

    /// Sets the connection-lost threshold.
    #[must_use]
    pub const fn with_connection_lost_threshold(mut self, threshold: u32) -> Self {
        self.connection_lost_threshold = threshold;
        self
    }

    /// Enables or disables automatic selection of the first partner.
    #[must_use]
    pub const fn with_auto_select_first_partner(mut self, enabled: bool) -> Self {
        self.auto_select_first_partner = enabled;
        self
    }

    /// Returns the polling cadence as a duration.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Returns the request timeout as a duration.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
