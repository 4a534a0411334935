//! Background task that owns the arbiter
//!
//! Every input (source events, user requests, timer deadlines) is funnelled
//! through one task, so the [`RouteArbiter`] is only ever touched by a single
//! writer and events are applied in the order they were received. Platform
//! commands are awaited one at a time, which keeps SCO teardown ahead of the
//! next enable. Each call is bounded by `command_timeout`; one that does not
//! return in time is treated as a failed command.

use std::collections::VecDeque;
use std::future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};

use crate::arbiter::{Effect, RouteArbiter};
use crate::device::{DeviceKind, Route};
use crate::error::{PlatformError, Result, RouteError};
use crate::event::RouteEvent;
use crate::platform::{AudioPlatform, PlatformCommand, SourceEvent};
use crate::state::RouteSnapshot;

/// Commands sent from the [`RouteManager`](crate::RouteManager) and the
/// source forwarders to the worker
#[derive(Debug)]
pub enum Command {
    /// Event from the OS or the call layer
    Source(SourceEvent),
    /// Explicit user route choice
    RequestRoute {
        kind: DeviceKind,
        reply: oneshot::Sender<Result<Route>>,
    },
    /// Go back to default priority
    ClearOverride,
    /// Read the full arbiter state
    Snapshot { reply: oneshot::Sender<RouteSnapshot> },
    /// Read the active route
    CurrentRoute { reply: oneshot::Sender<Route> },
    /// Stop the worker
    Shutdown,
}

/// Spawns the worker task on the current tokio runtime
pub fn spawn_route_worker(
    arbiter: RouteArbiter,
    platform: Arc<dyn AudioPlatform>,
    command_rx: mpsc::Receiver<Command>,
    event_tx: broadcast::Sender<RouteEvent>,
) -> JoinHandle<()> {
    let worker = RouteWorker {
        arbiter,
        platform,
        event_tx,
    };
    tokio::spawn(worker.run(command_rx))
}

struct RouteWorker {
    arbiter: RouteArbiter,
    platform: Arc<dyn AudioPlatform>,
    event_tx: broadcast::Sender<RouteEvent>,
}

impl RouteWorker {
    async fn run(mut self, mut command_rx: mpsc::Receiver<Command>) {
        tracing::info!("Route worker started");

        loop {
            let deadline = self.arbiter.next_deadline();

            tokio::select! {
                command = command_rx.recv() => {
                    match command {
                        Some(Command::Shutdown) => {
                            tracing::info!("Route worker received shutdown command");
                            break;
                        }
                        Some(command) => self.handle_command(command).await,
                        None => {
                            tracing::debug!("All command senders dropped, shutting down worker");
                            break;
                        }
                    }
                }

                _ = wait_for(deadline) => {
                    let effects = self.arbiter.on_timer(Instant::now());
                    self.apply(effects).await;
                }
            }
        }

        tracing::info!("Route worker shut down");
    }

    async fn handle_command(&mut self, command: Command) {
        let now = Instant::now();

        match command {
            Command::Source(event) => {
                tracing::trace!("Worker: {:?}", event);
                let effects = match event {
                    SourceEvent::DevicePresence { device, present } => {
                        self.arbiter.on_device_presence_changed(device, present, now)
                    }
                    SourceEvent::AndroidDevice { type_code, present } => {
                        match self.arbiter.report_android_device(type_code, present, now) {
                            Ok(effects) => effects,
                            Err(e) => {
                                tracing::warn!("Ignoring presence update: {}", e);
                                return;
                            }
                        }
                    }
                    SourceEvent::BluetoothLink(report) => self.arbiter.on_link_report(report, now),
                    SourceEvent::RouteReported(route) => self.arbiter.on_route_reported(route, now),
                    SourceEvent::CallStarted(mode) => self.arbiter.on_call_started(mode, now),
                    SourceEvent::CallStopped => self.arbiter.on_call_stopped(now),
                };
                self.apply(effects).await;
            }
            Command::RequestRoute { kind, reply } => {
                let result = match self.arbiter.request_route(kind, now) {
                    Ok(effects) => {
                        self.apply(effects).await;
                        Ok(self.arbiter.active_route())
                    }
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            Command::ClearOverride => {
                let effects = self.arbiter.clear_override(now);
                self.apply(effects).await;
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.arbiter.snapshot(now));
            }
            Command::CurrentRoute { reply } => {
                let _ = reply.send(self.arbiter.active_route());
            }
            Command::Shutdown => {}
        }
    }

    async fn execute(&self, command: PlatformCommand) -> Result<()> {
        let limit = self.arbiter.config().command_timeout;
        match timeout(limit, command.execute(self.platform.as_ref())).await {
            Ok(result) => result.map_err(RouteError::from),
            Err(_) => Err(command_timed_out(command, limit)),
        }
    }

    /// Execute effects in order. A failed platform command is handed back
    /// to the arbiter and whatever it asks for next is queued behind the
    /// remaining effects.
    async fn apply(&mut self, effects: Vec<Effect>) {
        let mut queue: VecDeque<Effect> = effects.into();

        while let Some(effect) = queue.pop_front() {
            match effect {
                Effect::Platform(command) => {
                    tracing::debug!("Platform: {:?}", command);
                    if let Err(error) = self.execute(command).await {
                        tracing::warn!("Platform command {:?} failed: {}", command, error);
                        let follow_up = self.arbiter.on_command_failed(command, &error, Instant::now());
                        queue.extend(follow_up);
                    }
                }
                Effect::Notify(event) => {
                    tracing::debug!("Notify: {}", event.name());
                    if self.event_tx.send(event).is_err() {
                        tracing::trace!("No route event subscribers");
                    }
                }
            }
        }
    }
}

/// Error for a platform call that did not return within `limit`.
fn command_timed_out(command: PlatformCommand, limit: Duration) -> RouteError {
    match command.device() {
        Some(device) => RouteError::DeviceEnableTimeout {
            device,
            timeout: limit,
        },
        None => RouteError::Platform(PlatformError::Unavailable(format!(
            "{:?} did not return within {:?}",
            command, limit
        ))),
    }
}

/// Resolves at `deadline`, or never if there is none.
async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ArbiterConfig;
    use crate::device::{BluetoothProfile, CallMode, Device};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Platform whose earpiece is broken
    #[derive(Default)]
    struct NoEarpiece {
        enabled: Mutex<Vec<DeviceKind>>,
    }

    #[async_trait]
    impl AudioPlatform for NoEarpiece {
        async fn enable_speaker(&self) -> std::result::Result<(), PlatformError> {
            self.enabled.lock().unwrap().push(DeviceKind::Speaker);
            Ok(())
        }
        async fn enable_earpiece(&self) -> std::result::Result<(), PlatformError> {
            Err(PlatformError::NoSuchDevice(DeviceKind::Earpiece))
        }
        async fn enable_wired_headset(&self) -> std::result::Result<(), PlatformError> {
            self.enabled.lock().unwrap().push(DeviceKind::WiredHeadset);
            Ok(())
        }
        async fn enable_bluetooth(&self) -> std::result::Result<(), PlatformError> {
            self.enabled.lock().unwrap().push(DeviceKind::Bluetooth);
            Ok(())
        }
        async fn start_bluetooth_sco(&self) -> std::result::Result<(), PlatformError> {
            Ok(())
        }
        async fn stop_bluetooth_sco(&self) -> std::result::Result<(), PlatformError> {
            Ok(())
        }
        async fn reset_route(&self) -> std::result::Result<(), PlatformError> {
            Ok(())
        }
    }

    /// Platform whose SCO start never returns
    #[derive(Default)]
    struct StuckSco {
        enabled: Mutex<Vec<DeviceKind>>,
    }

    #[async_trait]
    impl AudioPlatform for StuckSco {
        async fn enable_speaker(&self) -> std::result::Result<(), PlatformError> {
            self.enabled.lock().unwrap().push(DeviceKind::Speaker);
            Ok(())
        }
        async fn enable_earpiece(&self) -> std::result::Result<(), PlatformError> {
            self.enabled.lock().unwrap().push(DeviceKind::Earpiece);
            Ok(())
        }
        async fn enable_wired_headset(&self) -> std::result::Result<(), PlatformError> {
            self.enabled.lock().unwrap().push(DeviceKind::WiredHeadset);
            Ok(())
        }
        async fn enable_bluetooth(&self) -> std::result::Result<(), PlatformError> {
            self.enabled.lock().unwrap().push(DeviceKind::Bluetooth);
            Ok(())
        }
        async fn start_bluetooth_sco(&self) -> std::result::Result<(), PlatformError> {
            std::future::pending().await
        }
        async fn stop_bluetooth_sco(&self) -> std::result::Result<(), PlatformError> {
            Ok(())
        }
        async fn reset_route(&self) -> std::result::Result<(), PlatformError> {
            Ok(())
        }
    }

    #[test]
    fn test_command_debug() {
        let cmd = Command::Source(SourceEvent::CallStopped);
        assert!(format!("{:?}", cmd).contains("CallStopped"));
    }

    #[tokio::test]
    async fn test_failed_enable_falls_back() {
        let platform = Arc::new(NoEarpiece::default());
        let (command_tx, command_rx) = mpsc::channel(8);
        let (event_tx, mut event_rx) = broadcast::channel(16);
        let handle = spawn_route_worker(
            RouteArbiter::new(ArbiterConfig::default()),
            platform.clone(),
            command_rx,
            event_tx,
        );

        command_tx
            .send(Command::Source(SourceEvent::CallStarted(
                crate::device::CallMode::Voice,
            )))
            .await
            .unwrap();

        let (reply, route) = oneshot::channel();
        command_tx
            .send(Command::CurrentRoute { reply })
            .await
            .unwrap();
        assert_eq!(route.await.unwrap(), Route::Speaker);
        assert_eq!(*platform.enabled.lock().unwrap(), vec![DeviceKind::Speaker]);

        let mut names = Vec::new();
        while let Ok(event) = event_rx.try_recv() {
            names.push(event.name());
        }
        assert_eq!(
            names,
            vec!["route_changed", "fallback_triggered", "route_changed"]
        );

        command_tx.send(Command::Shutdown).await.unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_platform_call_does_not_stall_worker() {
        let platform = Arc::new(StuckSco::default());
        let (command_tx, command_rx) = mpsc::channel(8);
        let (event_tx, mut event_rx) = broadcast::channel(16);
        let handle = spawn_route_worker(
            RouteArbiter::new(ArbiterConfig::default()),
            platform.clone(),
            command_rx,
            event_tx,
        );

        command_tx
            .send(Command::Source(SourceEvent::DevicePresence {
                device: Device::bluetooth(BluetoothProfile::Sco),
                present: true,
            }))
            .await
            .unwrap();
        command_tx
            .send(Command::Source(SourceEvent::CallStarted(CallMode::Voice)))
            .await
            .unwrap();

        let (reply, route) = oneshot::channel();
        command_tx
            .send(Command::CurrentRoute { reply })
            .await
            .unwrap();
        let route = tokio::time::timeout(Duration::from_secs(60), route)
            .await
            .expect("worker stalled on a platform call")
            .unwrap();

        assert_eq!(route, Route::Earpiece);
        assert_eq!(*platform.enabled.lock().unwrap(), vec![DeviceKind::Earpiece]);

        let mut fell_back = false;
        while let Ok(event) = event_rx.try_recv() {
            if let RouteEvent::FallbackTriggered { device, reason } = event {
                assert_eq!(device, DeviceKind::Bluetooth);
                assert!(reason.contains("timed out"), "{reason}");
                fell_back = true;
            }
        }
        assert!(fell_back);

        command_tx.send(Command::Shutdown).await.unwrap();
        handle.await.unwrap();
    }
}
