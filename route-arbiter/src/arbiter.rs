//! The route arbiter core
//!
//! `RouteArbiter` is a plain synchronous state machine. Each operation
//! mutates the [`RouteState`] and returns the ordered list of [`Effect`]s
//! needed to reach the new route: platform commands first (teardown before
//! enable), then notifications. It never touches the OS or the clock itself,
//! which keeps it deterministic; the [`worker`](crate::worker) owns it,
//! executes the effects and feeds back failures and timer ticks.

use tokio::time::Instant;

use crate::bluetooth::{LinkOutcome, LinkReport, LinkState, ScoLink};
use crate::config::ArbiterConfig;
use crate::device::{CallMode, Device, DeviceKind, Route};
use crate::error::{Result, RouteError};
use crate::event::RouteEvent;
use crate::platform::PlatformCommand;
use crate::policy::{self, Availability};
use crate::state::{PresenceTransition, RouteSnapshot, RouteState};

/// Something the worker must do after an arbiter operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Call into the OS audio-route setter
    Platform(PlatformCommand),
    /// Deliver a notification to subscribers
    Notify(RouteEvent),
}

/// Deterministic audio route arbiter.
#[derive(Debug, Clone)]
pub struct RouteArbiter {
    config: ArbiterConfig,
    state: RouteState,
    link: ScoLink,
}

impl RouteArbiter {
    pub fn new(config: ArbiterConfig) -> Self {
        let state = RouteState::new(config.has_earpiece);
        Self {
            config,
            state,
            link: ScoLink::new(),
        }
    }

    pub fn config(&self) -> &ArbiterConfig {
        &self.config
    }

    pub fn state(&self) -> &RouteState {
        &self.state
    }

    pub fn active_route(&self) -> Route {
        self.state.active()
    }

    pub fn link_state(&self) -> LinkState {
        self.link.state()
    }

    pub fn snapshot(&self, now: Instant) -> RouteSnapshot {
        self.state.snapshot(self.link.state(), now)
    }

    /// The next instant [`on_timer`](Self::on_timer) has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.link.deadline(), self.state.next_cooldown_expiry()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// A device was plugged in, paired, unplugged or lost.
    ///
    /// A newly connected wired headset or voice-capable Bluetooth device
    /// drops any user override so the call follows it. The earpiece coming
    /// back does not. When the overridden
    /// device goes away its override goes with it.
    pub fn on_device_presence_changed(
        &mut self,
        device: Device,
        present: bool,
        now: Instant,
    ) -> Vec<Effect> {
        let mut effects = Vec::new();

        match device.kind {
            DeviceKind::Speaker if !present => {
                tracing::warn!("Ignoring speaker removal, the speaker is the last-resort route");
                return effects;
            }
            DeviceKind::Earpiece if present && !self.config.has_earpiece => {
                tracing::warn!("Ignoring earpiece on a device configured without one");
                return effects;
            }
            _ => {}
        }

        let transition = self.state.set_present(device, present);
        tracing::debug!(
            "Presence: {} {} ({:?})",
            device,
            if present { "present" } else { "absent" },
            transition
        );

        match transition {
            PresenceTransition::Arrived => {
                if matches!(device.kind, DeviceKind::WiredHeadset | DeviceKind::Bluetooth) {
                    if let Some(previous) = self.state.override_route.take() {
                        tracing::info!("{} connected, dropping {} override", device.kind, previous);
                    }
                }
                if device.kind == DeviceKind::Bluetooth {
                    self.state.bluetooth_attempts = 0;
                }
                self.state.clear_cooldown(device.kind);
            }
            PresenceTransition::Departed => {
                if self.state.override_route == Some(device.kind) {
                    tracing::info!("{} removed, dropping its override", device.kind);
                    self.state.override_route = None;
                }
                if device.kind == DeviceKind::Bluetooth {
                    if self.link.is_engaged() {
                        effects.push(Effect::Platform(PlatformCommand::StopBluetoothSco));
                    }
                    if self.link.state() != LinkState::Disconnected {
                        self.link.reset();
                        effects.push(link_changed(LinkState::Disconnected));
                    }
                    self.state.bluetooth_attempts = 0;
                }
                self.state.clear_cooldown(device.kind);
            }
            PresenceTransition::Unchanged => {}
        }

        self.reevaluate(now, &mut effects);
        effects
    }

    /// Presence update carrying a raw Android `AudioDeviceInfo` type code.
    pub fn report_android_device(
        &mut self,
        type_code: i32,
        present: bool,
        now: Instant,
    ) -> Result<Vec<Effect>> {
        let device = Device::from_android_type(type_code)?;
        Ok(self.on_device_presence_changed(device, present, now))
    }

    /// A call started. Starting an already running call only updates its
    /// mode (voice to video upgrade and back).
    pub fn on_call_started(&mut self, mode: CallMode, now: Instant) -> Vec<Effect> {
        let mut effects = Vec::new();

        if self.state.call_active {
            if self.state.call_mode == mode {
                tracing::debug!("Call already active, ignoring start");
                return effects;
            }
            tracing::info!("Call mode changed to {:?}", mode);
        } else {
            tracing::info!("Call started ({:?})", mode);
            self.state.call_active = true;
            self.state.route_before_call = self.state.reported_route;
        }
        self.state.call_mode = mode;

        self.reevaluate(now, &mut effects);
        effects
    }

    /// The call ended: stop SCO, hand routing back to the OS and report
    /// [`Route::Invalid`]. Calling this without an active call does nothing.
    pub fn on_call_stopped(&mut self, _now: Instant) -> Vec<Effect> {
        let mut effects = Vec::new();

        if !self.state.call_active {
            tracing::debug!("No active call, ignoring stop");
            return effects;
        }

        tracing::info!("Call stopped");

        if self.link.is_engaged() {
            effects.push(Effect::Platform(PlatformCommand::StopBluetoothSco));
        }
        self.link.reset();
        effects.push(Effect::Platform(PlatformCommand::ResetRoute));

        let previous = self.state.active;
        self.state.end_call();
        effects.push(Effect::Notify(RouteEvent::RouteChanged {
            route: Route::Invalid,
            previous,
        }));

        effects
    }

    /// Explicit user route choice.
    ///
    /// Fails with [`RouteError::DeviceNotAvailable`] if the device is not
    /// present, leaving the override and the active route untouched. A
    /// request also clears that device's failure cooldown, so tapping the
    /// Bluetooth button retries a headset that timed out.
    pub fn request_route(&mut self, kind: DeviceKind, now: Instant) -> Result<Vec<Effect>> {
        if !self.state.is_present(kind) {
            tracing::warn!("Route request for {} rejected, device not present", kind);
            return Err(RouteError::DeviceNotAvailable(kind));
        }

        tracing::info!("Route override: {}", kind);
        self.state.override_route = Some(kind);
        self.state.clear_cooldown(kind);
        if kind == DeviceKind::Bluetooth {
            self.state.bluetooth_attempts = 0;
        }

        let mut effects = Vec::new();
        self.reevaluate(now, &mut effects);
        Ok(effects)
    }

    /// Drop the user override and go back to default priority.
    pub fn clear_override(&mut self, now: Instant) -> Vec<Effect> {
        let mut effects = Vec::new();
        if let Some(previous) = self.state.override_route.take() {
            tracing::info!("Cleared {} override", previous);
            self.reevaluate(now, &mut effects);
        }
        effects
    }

    /// SCO link report from the OS.
    pub fn on_link_report(&mut self, report: LinkReport, now: Instant) -> Vec<Effect> {
        let mut effects = Vec::new();

        match self.link.on_report(report) {
            LinkOutcome::Established => {
                tracing::info!("Bluetooth SCO connected");
                self.state.bluetooth_attempts = 0;
                effects.push(link_changed(LinkState::Connected));
            }
            LinkOutcome::Released => {
                tracing::debug!("Bluetooth SCO released");
                effects.push(link_changed(LinkState::Disconnected));
            }
            LinkOutcome::Refused => {
                effects.push(link_changed(LinkState::Disconnected));
                self.fail_device(DeviceKind::Bluetooth, "SCO connect refused", now, &mut effects);
            }
            LinkOutcome::Dropped => {
                effects.push(link_changed(LinkState::Disconnected));
                self.fail_device(DeviceKind::Bluetooth, "SCO link dropped", now, &mut effects);
            }
            LinkOutcome::Unchanged | LinkOutcome::TimedOut => return effects,
        }

        self.reevaluate(now, &mut effects);
        effects
    }

    /// The OS reports the route it is using. If a call is active and the OS
    /// drifted from the arbiter's choice, the enable is issued again.
    pub fn on_route_reported(&mut self, route: Route, _now: Instant) -> Vec<Effect> {
        self.state.reported_route = route;

        let active = self.state.active;
        if !self.state.call_active || route == active {
            return Vec::new();
        }

        match active.device() {
            Some(kind) => {
                tracing::info!("OS reports {} while routed to {}, re-applying", route, active);
                vec![Effect::Platform(PlatformCommand::EnableRoute(kind))]
            }
            None => Vec::new(),
        }
    }

    /// A platform command returned an error.
    pub fn on_command_failed(
        &mut self,
        command: PlatformCommand,
        error: &RouteError,
        now: Instant,
    ) -> Vec<Effect> {
        let mut effects = Vec::new();

        if !self.state.call_active {
            tracing::warn!("{:?} failed outside a call: {}", command, error);
            return effects;
        }

        match command {
            PlatformCommand::EnableRoute(DeviceKind::Speaker) => {
                tracing::warn!("Enabling the speaker failed, nothing left to fall back to: {}", error);
                return effects;
            }
            PlatformCommand::EnableRoute(DeviceKind::Bluetooth) => {
                if self.link.is_engaged() {
                    effects.push(Effect::Platform(PlatformCommand::StopBluetoothSco));
                }
                if self.link.state() != LinkState::Disconnected {
                    self.link.reset();
                    effects.push(link_changed(LinkState::Disconnected));
                }
                self.fail_device(DeviceKind::Bluetooth, &error.to_string(), now, &mut effects);
            }
            PlatformCommand::EnableRoute(kind) => {
                self.fail_device(kind, &error.to_string(), now, &mut effects);
            }
            PlatformCommand::StartBluetoothSco => {
                if self.link.state() != LinkState::Disconnected {
                    self.link.reset();
                    effects.push(link_changed(LinkState::Disconnected));
                }
                self.fail_device(DeviceKind::Bluetooth, &error.to_string(), now, &mut effects);
            }
            PlatformCommand::StopBluetoothSco | PlatformCommand::ResetRoute => {
                tracing::warn!("{:?} failed: {}", command, error);
                return effects;
            }
        }

        self.reevaluate(now, &mut effects);
        effects
    }

    /// Fire expired deadlines: SCO connect timeouts, unconfirmed
    /// disconnects and failure cooldowns.
    pub fn on_timer(&mut self, now: Instant) -> Vec<Effect> {
        let mut effects = Vec::new();

        match self.link.check_deadline(now) {
            LinkOutcome::TimedOut => {
                let error = RouteError::DeviceEnableTimeout {
                    device: DeviceKind::Bluetooth,
                    timeout: self.config.bluetooth_connect_timeout,
                };
                // Cancel the connect the OS may still be working on
                effects.push(Effect::Platform(PlatformCommand::StopBluetoothSco));
                effects.push(link_changed(LinkState::Disconnected));
                self.fail_device(DeviceKind::Bluetooth, &error.to_string(), now, &mut effects);
            }
            LinkOutcome::Released => {
                tracing::debug!("SCO disconnect not confirmed, assuming released");
                effects.push(link_changed(LinkState::Disconnected));
            }
            _ => {}
        }

        let expired = self.state.expire_cooldowns(now);
        if expired > 0 {
            tracing::debug!("{} device cooldown(s) expired", expired);
        }

        self.reevaluate(now, &mut effects);
        effects
    }

    /// Mark a device unusable for the cooldown period and announce the
    /// fallback. The caller re-evaluates afterwards.
    fn fail_device(&mut self, kind: DeviceKind, reason: &str, now: Instant, effects: &mut Vec<Effect>) {
        tracing::warn!("{} failed ({}), falling back", kind, reason);
        self.state.start_cooldown(kind, now + self.config.failure_cooldown);
        effects.push(Effect::Notify(RouteEvent::FallbackTriggered {
            device: kind,
            reason: reason.to_string(),
        }));
    }

    /// Devices the policy may pick right now, with Bluetooth counted as
    /// long as it could be connected.
    fn availability(&self, now: Instant) -> Availability {
        let usable = |kind| self.state.is_present(kind) && !self.state.is_cooling_down(kind, now);

        let bluetooth = usable(DeviceKind::Bluetooth)
            && (self.link.is_engaged()
                || self.state.bluetooth_attempts < self.config.max_bluetooth_attempts);

        Availability {
            earpiece: self.config.has_earpiece && usable(DeviceKind::Earpiece),
            wired_headset: usable(DeviceKind::WiredHeadset),
            bluetooth,
        }
    }

    /// Recompute the route and append whatever it takes to get there.
    ///
    /// Bluetooth is only routed to once its SCO link is up. While the link
    /// is connecting the next best device carries the call, so audio is
    /// never left without an output.
    fn reevaluate(&mut self, now: Instant, effects: &mut Vec<Effect>) {
        if !self.state.call_active {
            return;
        }

        let available = self.availability(now);
        let mode = self.state.call_mode;
        let desired = policy::select_route(available, self.state.override_route, mode);

        if desired == DeviceKind::Bluetooth {
            if self
                .link
                .begin_connect(now, self.config.bluetooth_connect_timeout)
            {
                self.state.bluetooth_attempts += 1;
                tracing::info!(
                    "Connecting Bluetooth SCO (attempt {}/{})",
                    self.state.bluetooth_attempts,
                    self.config.max_bluetooth_attempts
                );
                effects.push(Effect::Platform(PlatformCommand::StartBluetoothSco));
                effects.push(link_changed(LinkState::Connecting));
            }
        } else if self
            .link
            .begin_disconnect(now, self.config.bluetooth_connect_timeout)
        {
            // Leaving Bluetooth: tear the link down before enabling the next route
            effects.push(Effect::Platform(PlatformCommand::StopBluetoothSco));
            effects.push(link_changed(LinkState::Disconnecting));
        }

        let selected = if desired == DeviceKind::Bluetooth && !self.link.is_connected() {
            policy::select_route(
                available.without(DeviceKind::Bluetooth),
                self.state.override_route,
                mode,
            )
        } else {
            desired
        };

        let route = Route::from(selected);
        let previous = self.state.active;
        if route == previous {
            return;
        }

        tracing::info!("Route changed: {} -> {}", previous, route);
        self.state.active = route;
        effects.push(Effect::Platform(PlatformCommand::EnableRoute(selected)));
        effects.push(Effect::Notify(RouteEvent::RouteChanged { route, previous }));
    }
}

fn link_changed(state: LinkState) -> Effect {
    Effect::Notify(RouteEvent::BluetoothLinkChanged { state })
}
