//! Configuration for the route arbiter
//!
//! The Bluetooth connect timeout and retry count are deliberately plain
//! settings: they depend on the headset population and the OS, not on the
//! policy.

use std::time::Duration;

use crate::error::{Result, RouteError};

/// Configuration for the RouteArbiter
#[derive(Debug, Clone, PartialEq)]
pub struct ArbiterConfig {
    /// Whether the device has a built-in earpiece (phones do, tablets don't)
    /// Default: true
    pub has_earpiece: bool,

    /// How long an SCO connect may stay unconfirmed before it counts as failed
    /// Default: 5 seconds
    pub bluetooth_connect_timeout: Duration,

    /// How long a single platform call may run before it counts as failed
    /// Default: 2 seconds
    pub command_timeout: Duration,

    /// How long a device that failed to come up is skipped by the policy
    /// Default: 10 seconds
    pub failure_cooldown: Duration,

    /// Connect attempts per Bluetooth device arrival before giving up on it
    /// Default: 3
    pub max_bluetooth_attempts: u32,

    /// Capacity of the worker's command channel
    /// Default: 64
    pub command_buffer_size: usize,

    /// Capacity of the notification channel shared by all subscribers
    /// Default: 64
    pub event_buffer_size: usize,

    /// How long `shutdown()` waits for the worker to finish
    /// Default: 5 seconds
    pub shutdown_timeout: Duration,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            has_earpiece: true,
            bluetooth_connect_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(2),
            failure_cooldown: Duration::from_secs(10),
            max_bluetooth_attempts: 3,
            command_buffer_size: 64,
            event_buffer_size: 64,
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl ArbiterConfig {
    /// Create a new ArbiterConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration for devices without an earpiece
    pub fn tablet() -> Self {
        Self {
            has_earpiece: false,
            ..Default::default()
        }
    }

    /// Configuration that gives up on Bluetooth quickly
    pub fn fast_failover() -> Self {
        Self {
            bluetooth_connect_timeout: Duration::from_secs(2),
            failure_cooldown: Duration::from_secs(30),
            max_bluetooth_attempts: 1,
            ..Default::default()
        }
    }

    /// Validate the configuration and return any issues
    pub fn validate(&self) -> Result<()> {
        if self.bluetooth_connect_timeout.is_zero() {
            return Err(RouteError::Configuration(
                "Bluetooth connect timeout must be greater than 0".to_string(),
            ));
        }

        if self.command_timeout.is_zero() {
            return Err(RouteError::Configuration(
                "Platform command timeout must be greater than 0".to_string(),
            ));
        }

        if self.max_bluetooth_attempts == 0 {
            return Err(RouteError::Configuration(
                "Max Bluetooth attempts must be at least 1".to_string(),
            ));
        }

        if self.command_buffer_size == 0 {
            return Err(RouteError::Configuration(
                "Command buffer size must be greater than 0".to_string(),
            ));
        }

        if self.event_buffer_size == 0 {
            return Err(RouteError::Configuration(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
