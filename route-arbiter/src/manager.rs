//! Async handle to a running route arbiter
//!
//! [`RouteManager`] is what applications hold. It is cheap to call from any
//! task: every method just posts a command to the worker, which owns the
//! arbiter state.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::arbiter::RouteArbiter;
use crate::bluetooth::LinkReport;
use crate::config::ArbiterConfig;
use crate::device::{CallMode, Device, DeviceKind, Route};
use crate::error::{Result, RouteError};
use crate::event::RouteEvent;
use crate::iter::RouteEvents;
use crate::platform::{AudioPlatform, EventSource, SourceEvent};
use crate::state::RouteSnapshot;
use crate::worker::{spawn_route_worker, Command};

/// Handle to the route arbiter worker
///
/// # Example
///
/// ```rust,ignore
/// use route_arbiter::prelude::*;
///
/// let manager = RouteManager::builder()
///     .with_platform(Arc::new(AndroidAudio::new(ctx)))
///     .with_event_source(device_callbacks)
///     .build()?;
///
/// let mut events = manager.subscribe();
/// manager.call_started(CallMode::Voice).await?;
///
/// while let Some(event) = events.recv().await {
///     println!("{:?}", event);
/// }
/// ```
pub struct RouteManager {
    command_tx: mpsc::Sender<Command>,
    event_tx: broadcast::Sender<RouteEvent>,
    worker: Option<JoinHandle<()>>,
    forwarders: Vec<JoinHandle<()>>,
    shutdown_timeout: Duration,
}

impl RouteManager {
    /// Start configuring a manager
    pub fn builder() -> RouteManagerBuilder {
        RouteManagerBuilder::new()
    }

    /// A device was plugged in, paired, unplugged or lost
    pub async fn device_presence_changed(&self, device: Device, present: bool) -> Result<()> {
        self.send(Command::Source(SourceEvent::DevicePresence { device, present })).await
    }

    /// Presence update carrying a raw Android `AudioDeviceInfo` type code
    ///
    /// Unknown codes are rejected here with [`RouteError::InvalidDeviceKind`]
    /// and never reach the arbiter.
    pub async fn report_platform_device(&self, type_code: i32, present: bool) -> Result<()> {
        let device = Device::from_android_type(type_code)?;
        self.device_presence_changed(device, present).await
    }

    /// A call started, or an active call switched between voice and video
    pub async fn call_started(&self, mode: CallMode) -> Result<()> {
        self.send(Command::Source(SourceEvent::CallStarted(mode))).await
    }

    /// The call ended
    pub async fn call_stopped(&self) -> Result<()> {
        self.send(Command::Source(SourceEvent::CallStopped)).await
    }

    /// SCO link report from the OS
    pub async fn bluetooth_link_changed(&self, report: LinkReport) -> Result<()> {
        self.send(Command::Source(SourceEvent::BluetoothLink(report))).await
    }

    /// The route the OS reports it is using
    pub async fn route_reported(&self, route: Route) -> Result<()> {
        self.send(Command::Source(SourceEvent::RouteReported(route))).await
    }

    /// Route the call to `kind` until the user or a device change says
    /// otherwise
    ///
    /// Resolves once the resulting platform commands have been issued and
    /// returns the route now active. For Bluetooth that can still be the
    /// interim route while the SCO link comes up.
    pub async fn request_route(&self, kind: DeviceKind) -> Result<Route> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::RequestRoute { kind, reply }).await?;
        rx.await.map_err(|_| RouteError::WorkerDisconnected)?
    }

    /// Drop the user override
    pub async fn clear_override(&self) -> Result<()> {
        self.send(Command::ClearOverride).await
    }

    /// The active route
    pub async fn current_route(&self) -> Result<Route> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::CurrentRoute { reply }).await?;
        rx.await.map_err(|_| RouteError::WorkerDisconnected)
    }

    /// Full view of the arbiter state
    pub async fn snapshot(&self) -> Result<RouteSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot { reply }).await?;
        rx.await.map_err(|_| RouteError::WorkerDisconnected)
    }

    /// Receive route notifications from now on
    pub fn subscribe(&self) -> RouteEvents {
        RouteEvents::new(self.event_tx.subscribe())
    }

    /// Stop the worker and the source forwarders
    ///
    /// Waits up to [`ArbiterConfig::shutdown_timeout`] for the worker to
    /// finish the command it is on.
    pub async fn shutdown(mut self) -> Result<()> {
        for forwarder in self.forwarders.drain(..) {
            forwarder.abort();
        }

        let _ = self.command_tx.send(Command::Shutdown).await;

        if let Some(worker) = self.worker.take() {
            match timeout(self.shutdown_timeout, worker).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!("Route worker panicked: {}", e),
                Err(_) => return Err(RouteError::ShutdownTimeout(self.shutdown_timeout)),
            }
        }

        tracing::debug!("Route manager shut down");
        Ok(())
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| RouteError::WorkerDisconnected)
    }
}

impl Drop for RouteManager {
    fn drop(&mut self) {
        for forwarder in self.forwarders.drain(..) {
            forwarder.abort();
        }

        if self.worker.is_some() {
            tracing::debug!("RouteManager dropping, signalling worker shutdown");
            let _ = self.command_tx.try_send(Command::Shutdown);
        }
    }
}

/// Builder for [`RouteManager`]
///
/// A platform is required. Event sources are optional; callers that receive
/// OS callbacks themselves can call the manager methods directly instead.
pub struct RouteManagerBuilder {
    config: ArbiterConfig,
    platform: Option<Arc<dyn AudioPlatform>>,
    sources: Vec<Box<dyn EventSource>>,
}

impl RouteManagerBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            config: ArbiterConfig::default(),
            platform: None,
            sources: Vec::new(),
        }
    }

    /// Replace the configuration
    pub fn with_config(mut self, config: ArbiterConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the OS route setter
    pub fn with_platform(mut self, platform: Arc<dyn AudioPlatform>) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Add a source of device, link and call events
    ///
    /// Each source is drained by its own task. Events from one source keep
    /// their order; events from different sources interleave in arrival
    /// order.
    pub fn with_event_source(mut self, source: impl EventSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    /// Validate the configuration and start the worker
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Result<RouteManager> {
        self.config.validate()?;

        let platform = self.platform.ok_or_else(|| {
            RouteError::Configuration("An audio platform is required".to_string())
        })?;

        let (command_tx, command_rx) = mpsc::channel(self.config.command_buffer_size);
        let (event_tx, _) = broadcast::channel(self.config.event_buffer_size);

        let shutdown_timeout = self.config.shutdown_timeout;
        let arbiter = RouteArbiter::new(self.config);
        let worker = spawn_route_worker(arbiter, platform, command_rx, event_tx.clone());

        let forwarders = self
            .sources
            .into_iter()
            .map(|source| spawn_forwarder(source, command_tx.clone()))
            .collect();

        tracing::debug!("Route manager started");

        Ok(RouteManager {
            command_tx,
            event_tx,
            worker: Some(worker),
            forwarders,
            shutdown_timeout,
        })
    }
}

impl Default for RouteManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Drain an event source into the worker's command channel
fn spawn_forwarder(
    mut source: Box<dyn EventSource>,
    command_tx: mpsc::Sender<Command>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let name = source.name().to_string();
        tracing::debug!("Forwarding events from {}", name);

        while let Some(event) = source.next_event().await {
            if command_tx.send(Command::Source(event)).await.is_err() {
                tracing::debug!("Worker gone, stopping {} forwarder", name);
                return;
            }
        }

        tracing::debug!("Event source {} ended", name);
    })
}
