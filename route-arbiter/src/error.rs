//! Error types for the route-arbiter crate.

use std::time::Duration;

use crate::device::DeviceKind;

/// Errors that can occur while arbitrating the audio route.
///
/// None of these are fatal. While a call is active the arbiter always keeps
/// some route enabled, degrading to the speaker if everything else fails.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    /// A platform device identifier did not map to a known device kind.
    ///
    /// This is a programming error in the presence source; the update is
    /// logged and ignored.
    #[error("Invalid device kind: {0}")]
    InvalidDeviceKind(String),

    /// The requested route is not currently present.
    #[error("Device not available: {0}")]
    DeviceNotAvailable(DeviceKind),

    /// The OS did not finish enabling the device in time.
    #[error("Enabling {device} timed out after {timeout:?}")]
    DeviceEnableTimeout {
        /// The device that failed to come up
        device: DeviceKind,
        /// How long the arbiter waited
        timeout: Duration,
    },

    /// The OS route setter rejected a call.
    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    /// Invalid configuration provided
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The arbiter worker is no longer running.
    #[error("Route arbiter worker has shut down")]
    WorkerDisconnected,

    /// The worker did not stop within the configured shutdown timeout.
    #[error("Shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),
}

/// Errors reported by an [`AudioPlatform`](crate::platform::AudioPlatform)
/// implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlatformError {
    /// The device the command targets is not known to the OS.
    #[error("No such device: {0}")]
    NoSuchDevice(DeviceKind),

    /// The OS refused the request.
    #[error("Request rejected: {0}")]
    Rejected(String),

    /// The OS audio service is not reachable.
    #[error("Audio service unavailable: {0}")]
    Unavailable(String),
}

impl PlatformError {
    /// Creates a rejected error with the given reason.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected(reason.into())
    }
}

/// Convenience type alias for Results using RouteError.
pub type Result<T> = std::result::Result<T, RouteError>;
