//! Seams to the operating system
//!
//! The arbiter never talks to the OS directly. It is handed an
//! [`AudioPlatform`] that performs route changes, and any number of
//! [`EventSource`]s that deliver device presence, Bluetooth link reports and
//! call lifecycle notifications.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::bluetooth::LinkReport;
use crate::device::{CallMode, Device, DeviceKind, Route};
use crate::error::PlatformError;

/// OS audio-route setter.
///
/// Every method should return once the OS has accepted the request. Link
/// confirmation for SCO arrives later as a [`SourceEvent::BluetoothLink`].
#[async_trait]
pub trait AudioPlatform: Send + Sync {
    /// Route call audio to the built-in loudspeaker.
    async fn enable_speaker(&self) -> Result<(), PlatformError>;

    /// Route call audio to the built-in earpiece.
    async fn enable_earpiece(&self) -> Result<(), PlatformError>;

    /// Route call audio to the wired headset.
    async fn enable_wired_headset(&self) -> Result<(), PlatformError>;

    /// Route call audio over the (already connected) SCO link.
    async fn enable_bluetooth(&self) -> Result<(), PlatformError>;

    /// Ask the OS to bring up the SCO link.
    async fn start_bluetooth_sco(&self) -> Result<(), PlatformError>;

    /// Tear down the SCO link, cancelling a connect in flight.
    async fn stop_bluetooth_sco(&self) -> Result<(), PlatformError>;

    /// Hand routing back to the OS after a call.
    async fn reset_route(&self) -> Result<(), PlatformError>;
}

/// A request for the [`AudioPlatform`], produced by the arbiter core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlatformCommand {
    EnableRoute(DeviceKind),
    StartBluetoothSco,
    StopBluetoothSco,
    ResetRoute,
}

impl PlatformCommand {
    /// The device this command brings up or tears down, if any.
    pub fn device(self) -> Option<DeviceKind> {
        match self {
            PlatformCommand::EnableRoute(kind) => Some(kind),
            PlatformCommand::StartBluetoothSco | PlatformCommand::StopBluetoothSco => {
                Some(DeviceKind::Bluetooth)
            }
            PlatformCommand::ResetRoute => None,
        }
    }

    /// Run this command against a platform.
    pub async fn execute(self, platform: &dyn AudioPlatform) -> Result<(), PlatformError> {
        match self {
            PlatformCommand::EnableRoute(DeviceKind::Speaker) => platform.enable_speaker().await,
            PlatformCommand::EnableRoute(DeviceKind::Earpiece) => {
                platform.enable_earpiece().await
            }
            PlatformCommand::EnableRoute(DeviceKind::WiredHeadset) => {
                platform.enable_wired_headset().await
            }
            PlatformCommand::EnableRoute(DeviceKind::Bluetooth) => {
                platform.enable_bluetooth().await
            }
            PlatformCommand::StartBluetoothSco => platform.start_bluetooth_sco().await,
            PlatformCommand::StopBluetoothSco => platform.stop_bluetooth_sco().await,
            PlatformCommand::ResetRoute => platform.reset_route().await,
        }
    }
}

/// Something the OS or the call layer tells the arbiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    /// A device was plugged in, paired, unplugged or lost
    DevicePresence { device: Device, present: bool },
    /// Raw Android `AudioDeviceInfo` type code, decoded by the arbiter
    AndroidDevice { type_code: i32, present: bool },
    /// SCO link state broadcast
    BluetoothLink(LinkReport),
    /// The route the OS is actually using
    RouteReported(Route),
    CallStarted(CallMode),
    CallStopped,
}

/// A stream of [`SourceEvent`]s, drained by a forwarder task.
#[async_trait]
pub trait EventSource: Send {
    /// Next event, or `None` once the source is exhausted.
    async fn next_event(&mut self) -> Option<SourceEvent>;

    /// Name used in logs
    fn name(&self) -> &str {
        "event-source"
    }
}

/// [`EventSource`] fed through a tokio channel.
///
/// Useful for glue code that receives OS callbacks on foreign threads:
/// keep the sender there and give this source to the manager builder.
pub struct ChannelEventSource {
    name: String,
    rx: mpsc::Receiver<SourceEvent>,
}

impl ChannelEventSource {
    /// Create a source and the sender that feeds it.
    pub fn new(name: impl Into<String>, capacity: usize) -> (mpsc::Sender<SourceEvent>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            tx,
            Self {
                name: name.into(),
                rx,
            },
        )
    }
}

#[async_trait]
impl EventSource for ChannelEventSource {
    async fn next_event(&mut self) -> Option<SourceEvent> {
        self.rx.recv().await
    }

    fn name(&self) -> &str {
        &self.name
    }
}
