//! Notifications emitted by the route arbiter.

use serde::Serialize;

use crate::bluetooth::LinkState;
use crate::device::{DeviceKind, Route};

/// Events delivered to every [`RouteEvents`](crate::iter::RouteEvents)
/// subscriber.
///
/// Subscribers are independent; no ordering between them is guaranteed,
/// only the order of events seen by a single subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RouteEvent {
    /// The active route changed.
    RouteChanged { route: Route, previous: Route },

    /// The Bluetooth SCO link changed state.
    BluetoothLinkChanged { state: LinkState },

    /// A device failed to come up and the arbiter fell back.
    FallbackTriggered { device: DeviceKind, reason: String },
}

impl RouteEvent {
    /// The new route, if this is a route change.
    pub fn route_change(&self) -> Option<Route> {
        match self {
            RouteEvent::RouteChanged { route, .. } => Some(*route),
            _ => None,
        }
    }

    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            RouteEvent::RouteChanged { .. } => "route_changed",
            RouteEvent::BluetoothLinkChanged { .. } => "bluetooth_link_changed",
            RouteEvent::FallbackTriggered { .. } => "fallback_triggered",
        }
    }
}
