//! Configuration for the coordination core
//!
//! All retry budgets, durations and service identity live here so that the
//! runtime never hard-codes a constant and tests can shrink every timeout.

use std::time::Duration;

use uuid::{uuid, Uuid};

use crate::errors::VeridieError;

/// Service UUID advertised on the radio link
pub const SERVICE_UUID: Uuid = uuid!("76445157-4f39-42e9-a62e-877390cbb4bb");

/// Service name advertised on the radio link
pub const SERVICE_NAME: &str = "VeriDie";

// ----------------------------------------------------------------------------
// Config
// ----------------------------------------------------------------------------

/// Tunable parameters of the coordination core
#[derive(Debug, Clone)]
pub struct Config {
    /// Service UUID handed to discovery and listening
    pub service_uuid: Uuid,
    /// Service name handed to discovery and listening
    pub service_name: String,
    /// How long the device stays discoverable after StartListening
    pub discoverability_duration: Duration,
    /// Window after entering Playing during which inbound offers do not
    /// trigger renegotiation
    pub ignore_offers_duration: Duration,
    /// Successful response displays before the generator is rotated
    pub rounds_per_generator: u32,
    /// Fixed pause between retries of a transient failure
    pub retry_backoff: Duration,
    /// Send attempts for the hello greeting
    pub max_send_retries: u32,
    /// Send attempts for a request aimed at the generator
    pub request_attempts: u32,
    /// One-second polls while waiting for the local address before
    /// negotiation can start
    pub max_game_start_retries: u32,
    /// Extra attempts (beyond the first) at starting discovery
    pub max_discovery_retries: u32,
    /// Extra attempts (beyond the first) at starting listening
    pub max_listening_retries: u32,
    /// Send attempts for traffic in the Playing state
    pub playing_send_retries: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_uuid: SERVICE_UUID,
            service_name: SERVICE_NAME.to_string(),
            discoverability_duration: Duration::from_secs(5 * 60),
            ignore_offers_duration: Duration::from_secs(10),
            rounds_per_generator: 10,
            retry_backoff: Duration::from_secs(1),
            max_send_retries: 10,
            request_attempts: 3,
            max_game_start_retries: 30,
            max_discovery_retries: 2,
            max_listening_retries: 2,
            playing_send_retries: 5,
        }
    }
}

impl Config {
    /// Check that every budget leaves the core able to make progress
    pub fn validate(&self) -> Result<(), VeridieError> {
        if self.service_name.is_empty() {
            return Err(VeridieError::config_error("service name must not be empty"));
        }
        if self.rounds_per_generator == 0 {
            return Err(VeridieError::config_error(
                "rounds_per_generator must be at least 1",
            ));
        }
        for (name, value) in [
            ("max_send_retries", self.max_send_retries),
            ("request_attempts", self.request_attempts),
            ("max_game_start_retries", self.max_game_start_retries),
            ("playing_send_retries", self.playing_send_retries),
        ] {
            if value == 0 {
                return Err(VeridieError::config_error(format!(
                    "{name} must be at least 1"
                )));
            }
        }
        Ok(())
    }

    /// Discoverability window in whole seconds, as shipped to the host
    pub fn discoverability_secs(&self) -> u32 {
        self.discoverability_duration.as_secs() as u32
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.discoverability_secs(), 300);
        assert_eq!(config.rounds_per_generator, 10);
        assert_eq!(
            config.service_uuid.to_string(),
            "76445157-4f39-42e9-a62e-877390cbb4bb"
        );
    }

    #[test]
    fn test_validate_rejects_zero_budgets() {
        let mut config = Config::default();
        config.request_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.service_name.clear();
        assert!(config.validate().is_err());
    }
}
