//! Route state: what the arbiter remembers between events.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use tokio::time::Instant;

use crate::bluetooth::LinkState;
use crate::device::{BluetoothProfile, CallMode, Device, DeviceKind, Route};

/// How a presence update changed a device kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceTransition {
    /// The kind became usable for calls
    Arrived,
    /// The kind is no longer usable for calls
    Departed,
    Unchanged,
}

/// The arbiter's memory.
///
/// Presence outlives calls; override, active route, cooldowns and the
/// Bluetooth attempt counter are call-scoped and cleared by
/// [`RouteState::end_call`].
#[derive(Debug, Clone)]
pub struct RouteState {
    earpiece: bool,
    wired_headset: bool,
    /// Connected Bluetooth devices per profile
    bluetooth_profiles: BTreeMap<BluetoothProfile, usize>,
    pub(crate) override_route: Option<DeviceKind>,
    pub(crate) active: Route,
    pub(crate) call_active: bool,
    pub(crate) call_mode: CallMode,
    pub(crate) route_before_call: Route,
    pub(crate) reported_route: Route,
    cooldowns: HashMap<DeviceKind, Instant>,
    pub(crate) bluetooth_attempts: u32,
}

impl RouteState {
    /// Fresh state with only the built-in outputs present.
    pub fn new(has_earpiece: bool) -> Self {
        Self {
            earpiece: has_earpiece,
            wired_headset: false,
            bluetooth_profiles: BTreeMap::new(),
            override_route: None,
            active: Route::Invalid,
            call_active: false,
            call_mode: CallMode::Voice,
            route_before_call: Route::Invalid,
            reported_route: Route::Invalid,
            cooldowns: HashMap::new(),
            bluetooth_attempts: 0,
        }
    }

    /// Whether `kind` is present and able to carry call audio.
    ///
    /// The speaker is always present. Bluetooth counts only with a
    /// voice-capable profile connected.
    pub fn is_present(&self, kind: DeviceKind) -> bool {
        match kind {
            DeviceKind::Earpiece => self.earpiece,
            DeviceKind::Speaker => true,
            DeviceKind::WiredHeadset => self.wired_headset,
            DeviceKind::Bluetooth => self.bluetooth_profiles.keys().any(|p| p.carries_voice()),
        }
    }

    pub fn active(&self) -> Route {
        self.active
    }

    pub fn call_active(&self) -> bool {
        self.call_active
    }

    pub fn call_mode(&self) -> CallMode {
        self.call_mode
    }

    pub fn override_route(&self) -> Option<DeviceKind> {
        self.override_route
    }

    /// Record a presence update and report what it did to the device kind.
    pub fn set_present(&mut self, device: Device, present: bool) -> PresenceTransition {
        let before = self.is_present(device.kind);

        match device.kind {
            DeviceKind::Earpiece => self.earpiece = present,
            DeviceKind::WiredHeadset => self.wired_headset = present,
            DeviceKind::Bluetooth => {
                let profile = device.bluetooth_profile().unwrap_or(BluetoothProfile::Sco);
                if present {
                    *self.bluetooth_profiles.entry(profile).or_insert(0) += 1;
                } else if let Some(count) = self.bluetooth_profiles.get_mut(&profile) {
                    *count -= 1;
                    if *count == 0 {
                        self.bluetooth_profiles.remove(&profile);
                    }
                }
            }
            DeviceKind::Speaker => {}
        }

        match (before, self.is_present(device.kind)) {
            (false, true) => PresenceTransition::Arrived,
            (true, false) => PresenceTransition::Departed,
            _ => PresenceTransition::Unchanged,
        }
    }

    /// Skip `kind` in route selection until `until`.
    pub fn start_cooldown(&mut self, kind: DeviceKind, until: Instant) {
        self.cooldowns.insert(kind, until);
    }

    pub fn clear_cooldown(&mut self, kind: DeviceKind) {
        self.cooldowns.remove(&kind);
    }

    pub fn is_cooling_down(&self, kind: DeviceKind, now: Instant) -> bool {
        self.cooldowns.get(&kind).is_some_and(|until| *until > now)
    }

    /// Forget cooldowns that have run out, returning how many were dropped.
    pub fn expire_cooldowns(&mut self, now: Instant) -> usize {
        let before = self.cooldowns.len();
        self.cooldowns.retain(|_, until| *until > now);
        before - self.cooldowns.len()
    }

    /// The next instant a cooldown runs out.
    pub fn next_cooldown_expiry(&self) -> Option<Instant> {
        self.cooldowns.values().min().copied()
    }

    /// Drop everything that only lives for the duration of a call.
    pub fn end_call(&mut self) {
        self.call_active = false;
        self.call_mode = CallMode::Voice;
        self.override_route = None;
        self.active = Route::Invalid;
        self.cooldowns.clear();
        self.bluetooth_attempts = 0;
    }

    /// Copy of the state for callers outside the worker.
    pub fn snapshot(&self, link: LinkState, now: Instant) -> RouteSnapshot {
        let mut cooling_down: Vec<DeviceKind> = self
            .cooldowns
            .iter()
            .filter(|(_, until)| **until > now)
            .map(|(kind, _)| *kind)
            .collect();
        cooling_down.sort();

        RouteSnapshot {
            active: self.active,
            call_active: self.call_active,
            call_mode: self.call_mode,
            override_route: self.override_route,
            present: DeviceKind::ALL
                .into_iter()
                .filter(|kind| self.is_present(*kind))
                .collect(),
            bluetooth_profiles: self.bluetooth_profiles.keys().copied().collect(),
            link,
            cooling_down,
            route_before_call: self.route_before_call,
            reported_route: self.reported_route,
        }
    }
}

/// Point-in-time view of the arbiter, returned by
/// [`RouteManager::snapshot`](crate::manager::RouteManager::snapshot).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteSnapshot {
    pub active: Route,
    pub call_active: bool,
    pub call_mode: CallMode,
    pub override_route: Option<DeviceKind>,
    /// Device kinds currently able to carry call audio
    pub present: Vec<DeviceKind>,
    /// Every connected Bluetooth profile, including media-only ones
    pub bluetooth_profiles: Vec<BluetoothProfile>,
    pub link: LinkState,
    /// Devices skipped after a failed enable
    pub cooling_down: Vec<DeviceKind>,
    /// Route the OS reported when the current call started
    pub route_before_call: Route,
    /// Last route the OS reported
    pub reported_route: Route,
}
