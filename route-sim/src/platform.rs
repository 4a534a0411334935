//! Simulated audio platform
//!
//! Accepts every route change immediately and answers SCO start requests
//! the way a phone does: the link report arrives later, through the event
//! source, after a configurable latency. A headset that never connects is
//! simulated by leaving the latency unset.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use route_arbiter::{
    AudioPlatform, DeviceKind, LinkReport, PlatformCommand, PlatformError, SourceEvent,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub struct SimulatedPlatform {
    link_tx: mpsc::Sender<SourceEvent>,
    sco_latency: Option<Duration>,
    pending_connect: Mutex<Option<JoinHandle<()>>>,
    log: Arc<Mutex<Vec<PlatformCommand>>>,
}

impl SimulatedPlatform {
    /// `link_tx` feeds the manager's event source. `sco_latency` of `None`
    /// means SCO connects are never confirmed.
    pub fn new(link_tx: mpsc::Sender<SourceEvent>, sco_latency: Option<Duration>) -> Self {
        Self {
            link_tx,
            sco_latency,
            pending_connect: Mutex::new(None),
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Shared view of every command executed so far
    pub fn command_log(&self) -> Arc<Mutex<Vec<PlatformCommand>>> {
        Arc::clone(&self.log)
    }

    fn record(&self, command: PlatformCommand) {
        tracing::info!("platform: {:?}", command);
        if let Ok(mut log) = self.log.lock() {
            log.push(command);
        }
    }

    fn cancel_pending_connect(&self) {
        if let Ok(mut pending) = self.pending_connect.lock() {
            if let Some(task) = pending.take() {
                task.abort();
            }
        }
    }

    async fn report(&self, report: LinkReport) -> Result<(), PlatformError> {
        self.link_tx
            .send(SourceEvent::BluetoothLink(report))
            .await
            .map_err(|_| PlatformError::Unavailable("link report channel closed".to_string()))
    }
}

#[async_trait]
impl AudioPlatform for SimulatedPlatform {
    async fn enable_speaker(&self) -> Result<(), PlatformError> {
        self.record(PlatformCommand::EnableRoute(DeviceKind::Speaker));
        Ok(())
    }

    async fn enable_earpiece(&self) -> Result<(), PlatformError> {
        self.record(PlatformCommand::EnableRoute(DeviceKind::Earpiece));
        Ok(())
    }

    async fn enable_wired_headset(&self) -> Result<(), PlatformError> {
        self.record(PlatformCommand::EnableRoute(DeviceKind::WiredHeadset));
        Ok(())
    }

    async fn enable_bluetooth(&self) -> Result<(), PlatformError> {
        self.record(PlatformCommand::EnableRoute(DeviceKind::Bluetooth));
        Ok(())
    }

    async fn start_bluetooth_sco(&self) -> Result<(), PlatformError> {
        self.record(PlatformCommand::StartBluetoothSco);
        self.cancel_pending_connect();

        let Some(latency) = self.sco_latency else {
            tracing::debug!("platform: SCO will never connect");
            return Ok(());
        };

        let link_tx = self.link_tx.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(latency).await;
            let _ = link_tx
                .send(SourceEvent::BluetoothLink(LinkReport::Connected))
                .await;
        });
        if let Ok(mut pending) = self.pending_connect.lock() {
            *pending = Some(task);
        }
        Ok(())
    }

    async fn stop_bluetooth_sco(&self) -> Result<(), PlatformError> {
        self.record(PlatformCommand::StopBluetoothSco);
        self.cancel_pending_connect();
        self.report(LinkReport::Disconnected).await
    }

    async fn reset_route(&self) -> Result<(), PlatformError> {
        self.record(PlatformCommand::ResetRoute);
        Ok(())
    }
}
