//! Route selection policy
//!
//! A pure function from "what can be used right now" plus the user's
//! override to a single device. It knows nothing about timers, links or the
//! OS; [`RouteArbiter`](crate::arbiter::RouteArbiter) works out which devices
//! are usable and feeds them in here.

use crate::device::{CallMode, DeviceKind};

/// Devices that can be routed to at this instant.
///
/// The speaker is not listed: it is always usable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Availability {
    pub earpiece: bool,
    pub wired_headset: bool,
    pub bluetooth: bool,
}

impl Availability {
    /// Whether a route to `kind` can be established right now.
    pub fn contains(&self, kind: DeviceKind) -> bool {
        match kind {
            DeviceKind::Earpiece => self.earpiece,
            DeviceKind::Speaker => true,
            DeviceKind::WiredHeadset => self.wired_headset,
            DeviceKind::Bluetooth => self.bluetooth,
        }
    }

    /// Same availability with `kind` taken away (speaker cannot be removed).
    pub fn without(mut self, kind: DeviceKind) -> Self {
        match kind {
            DeviceKind::Earpiece => self.earpiece = false,
            DeviceKind::WiredHeadset => self.wired_headset = false,
            DeviceKind::Bluetooth => self.bluetooth = false,
            DeviceKind::Speaker => {}
        }
        self
    }
}

/// Default preference order for a call mode, most preferred first.
///
/// Video calls put the loudspeaker ahead of the earpiece; the earpiece is
/// only reachable there through an explicit override.
pub fn priority(mode: CallMode) -> &'static [DeviceKind] {
    match mode {
        CallMode::Voice => &[
            DeviceKind::Bluetooth,
            DeviceKind::WiredHeadset,
            DeviceKind::Earpiece,
            DeviceKind::Speaker,
        ],
        CallMode::Video => &[
            DeviceKind::Bluetooth,
            DeviceKind::WiredHeadset,
            DeviceKind::Speaker,
        ],
    }
}

/// Pick the route for the given availability.
///
/// An override wins whenever its device is available. Otherwise the first
/// available device in [`priority`] order is chosen, falling back to the
/// speaker, so the result is never empty.
pub fn select_route(
    available: Availability,
    override_route: Option<DeviceKind>,
    mode: CallMode,
) -> DeviceKind {
    if let Some(kind) = override_route {
        if available.contains(kind) {
            return kind;
        }
    }

    priority(mode)
        .iter()
        .copied()
        .find(|kind| available.contains(*kind))
        .unwrap_or(DeviceKind::Speaker)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn avail(earpiece: bool, wired_headset: bool, bluetooth: bool) -> Availability {
        Availability {
            earpiece,
            wired_headset,
            bluetooth,
        }
    }

    #[rstest]
    #[case(avail(true, true, true), DeviceKind::Bluetooth)]
    #[case(avail(true, true, false), DeviceKind::WiredHeadset)]
    #[case(avail(true, false, false), DeviceKind::Earpiece)]
    #[case(avail(false, false, false), DeviceKind::Speaker)]
    #[case(avail(false, true, true), DeviceKind::Bluetooth)]
    fn test_voice_priority(#[case] available: Availability, #[case] expected: DeviceKind) {
        assert_eq!(select_route(available, None, CallMode::Voice), expected);
    }

    #[rstest]
    #[case(avail(true, false, false), DeviceKind::Speaker)]
    #[case(avail(true, true, false), DeviceKind::WiredHeadset)]
    #[case(avail(true, true, true), DeviceKind::Bluetooth)]
    fn test_video_prefers_speaker_over_earpiece(
        #[case] available: Availability,
        #[case] expected: DeviceKind,
    ) {
        assert_eq!(select_route(available, None, CallMode::Video), expected);
    }

    #[rstest]
    #[case(Some(DeviceKind::Speaker), DeviceKind::Speaker)]
    #[case(Some(DeviceKind::Earpiece), DeviceKind::Earpiece)]
    #[case(Some(DeviceKind::WiredHeadset), DeviceKind::WiredHeadset)]
    fn test_override_beats_priority(
        #[case] override_route: Option<DeviceKind>,
        #[case] expected: DeviceKind,
    ) {
        let available = avail(true, true, true);
        assert_eq!(
            select_route(available, override_route, CallMode::Voice),
            expected
        );
    }

    #[test]
    fn test_unavailable_override_is_ignored() {
        let available = avail(true, true, false);
        assert_eq!(
            select_route(available, Some(DeviceKind::Bluetooth), CallMode::Voice),
            DeviceKind::WiredHeadset
        );
    }

    #[test]
    fn test_earpiece_override_in_video_call() {
        let available = avail(true, false, false);
        assert_eq!(
            select_route(available, Some(DeviceKind::Earpiece), CallMode::Video),
            DeviceKind::Earpiece
        );
    }

    #[test]
    fn test_without_never_removes_speaker() {
        let available = avail(true, true, true)
            .without(DeviceKind::Bluetooth)
            .without(DeviceKind::Speaker);
        assert!(!available.bluetooth);
        assert!(available.contains(DeviceKind::Speaker));
    }
}
