//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// Runtime knobs of the [`ScopeEngine`](crate::ScopeEngine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound for one relationship load.
    pub relationship_timeout_ms: u64,
    /// Upper bound for one action handler.
    pub action_timeout_ms: u64,
    /// Report expiries that no write observed.
    ///
    /// A null expiry column counts as expired. With the sweep enabled, a row
    /// whose expiry is null because it never expires (a permanent purchase,
    /// say) is reported as transitioning to the rule's status value.
    pub passive_expiry_sweep: bool,
    /// Capacity of the outbound event queue.
    pub event_queue_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            relationship_timeout_ms: 5_000,
            action_timeout_ms: 10_000,
            passive_expiry_sweep: false,
            event_queue_capacity: 1024,
        }
    }
}

impl EngineConfig {
    /// Parses and validates a JSON document. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::InvalidConfig`] for malformed JSON or
    /// zero-valued limits.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigurationError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigurationError::InvalidConfig {
                reason: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects zero timeouts and a zero queue capacity.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::InvalidConfig`] naming the offending key.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let zero = [
            ("relationship_timeout_ms", self.relationship_timeout_ms == 0),
            ("action_timeout_ms", self.action_timeout_ms == 0),
            ("event_queue_capacity", self.event_queue_capacity == 0),
        ];
        if let Some((key, _)) = zero.iter().find(|(_, is_zero)| *is_zero) {
            return Err(ConfigurationError::InvalidConfig {
                reason: format!("{key} must be greater than zero"),
            });
        }
        Ok(())
    }

    /// Timeout for one relationship load.
    #[must_use]
    pub const fn relationship_timeout(&self) -> Duration {
        Duration::from_millis(self.relationship_timeout_ms)
    }

    /// Timeout for one action handler.
    #[must_use]
    pub const fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.action_timeout_ms)
    }
}
