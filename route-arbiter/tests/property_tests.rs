//! Property-based tests for route selection and the arbiter state machine
//!
//! The arbiter core is synchronous and takes time as an argument, so random
//! operation sequences can be replayed against it directly.

use proptest::prelude::*;
use std::time::Duration;
use tokio::time::Instant;

use route_arbiter::arbiter::{Effect, RouteArbiter};
use route_arbiter::policy::{priority, select_route, Availability};
use route_arbiter::{
    ArbiterConfig, BluetoothProfile, CallMode, Device, DeviceKind, LinkReport, LinkState,
    PlatformCommand, PlatformError, Route, RouteError,
};

// ============================================================================
// Strategies
// ============================================================================

fn kind_strategy() -> impl Strategy<Value = DeviceKind> {
    prop_oneof![
        Just(DeviceKind::Earpiece),
        Just(DeviceKind::Speaker),
        Just(DeviceKind::WiredHeadset),
        Just(DeviceKind::Bluetooth),
    ]
}

fn mode_strategy() -> impl Strategy<Value = CallMode> {
    prop_oneof![Just(CallMode::Voice), Just(CallMode::Video)]
}

fn availability_strategy() -> impl Strategy<Value = Availability> {
    (any::<bool>(), any::<bool>(), any::<bool>()).prop_map(|(earpiece, wired_headset, bluetooth)| {
        Availability {
            earpiece,
            wired_headset,
            bluetooth,
        }
    })
}

fn device_strategy() -> impl Strategy<Value = Device> {
    prop_oneof![
        Just(Device::earpiece()),
        Just(Device::speaker()),
        Just(Device::wired_headset()),
        Just(Device::bluetooth(BluetoothProfile::Sco)),
        Just(Device::bluetooth(BluetoothProfile::A2dp)),
        Just(Device::bluetooth(BluetoothProfile::Ble)),
    ]
}

fn command_strategy() -> impl Strategy<Value = PlatformCommand> {
    prop_oneof![
        kind_strategy().prop_map(PlatformCommand::EnableRoute),
        Just(PlatformCommand::StartBluetoothSco),
        Just(PlatformCommand::StopBluetoothSco),
        Just(PlatformCommand::ResetRoute),
    ]
}

/// One input to the arbiter
#[derive(Debug, Clone)]
enum Op {
    Presence(Device, bool),
    CallStarted(CallMode),
    CallStopped,
    Request(DeviceKind),
    ClearOverride,
    Link(LinkReport),
    Reported(Route),
    Failed(PlatformCommand),
    Advance(u64),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (device_strategy(), any::<bool>()).prop_map(|(d, p)| Op::Presence(d, p)),
        2 => mode_strategy().prop_map(Op::CallStarted),
        1 => Just(Op::CallStopped),
        2 => kind_strategy().prop_map(Op::Request),
        1 => Just(Op::ClearOverride),
        2 => prop_oneof![
            Just(LinkReport::Connecting),
            Just(LinkReport::Connected),
            Just(LinkReport::Disconnected),
        ]
        .prop_map(Op::Link),
        1 => kind_strategy().prop_map(|k| Op::Reported(Route::from(k))),
        1 => command_strategy().prop_map(Op::Failed),
        2 => (0u64..20).prop_map(Op::Advance),
    ]
}

fn apply(arbiter: &mut RouteArbiter, op: &Op, now: &mut Instant) -> Vec<Effect> {
    match op {
        Op::Presence(device, present) => arbiter.on_device_presence_changed(*device, *present, *now),
        Op::CallStarted(mode) => arbiter.on_call_started(*mode, *now),
        Op::CallStopped => arbiter.on_call_stopped(*now),
        Op::Request(kind) => arbiter.request_route(*kind, *now).unwrap_or_default(),
        Op::ClearOverride => arbiter.clear_override(*now),
        Op::Link(report) => arbiter.on_link_report(*report, *now),
        Op::Reported(route) => arbiter.on_route_reported(*route, *now),
        Op::Failed(command) => {
            let error = RouteError::Platform(PlatformError::rejected("test"));
            arbiter.on_command_failed(*command, &error, *now)
        }
        Op::Advance(secs) => {
            *now += Duration::from_secs(*secs);
            arbiter.on_timer(*now)
        }
    }
}

// ============================================================================
// Selection policy
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// An override is honoured whenever its device is available.
    #[test]
    fn prop_available_override_wins(
        available in availability_strategy(),
        kind in kind_strategy(),
        mode in mode_strategy(),
    ) {
        prop_assume!(available.contains(kind));
        prop_assert_eq!(select_route(available, Some(kind), mode), kind);
    }

    /// Without a usable override the first available device in priority
    /// order is chosen, and the choice is always available.
    #[test]
    fn prop_priority_order(
        available in availability_strategy(),
        override_route in proptest::option::of(kind_strategy()),
        mode in mode_strategy(),
    ) {
        prop_assume!(override_route.map_or(true, |kind| !available.contains(kind)));

        let selected = select_route(available, override_route, mode);
        prop_assert!(available.contains(selected));

        let expected = priority(mode)
            .iter()
            .copied()
            .find(|kind| available.contains(*kind))
            .unwrap_or(DeviceKind::Speaker);
        prop_assert_eq!(selected, expected);
    }

    /// Video calls never land on the earpiece unless it was asked for.
    #[test]
    fn prop_video_skips_earpiece(available in availability_strategy()) {
        prop_assert_ne!(select_route(available, None, CallMode::Video), DeviceKind::Earpiece);
    }
}

// ============================================================================
// Arbiter state machine
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// For any sequence of inputs:
    /// - a call always has a valid route, and no call means `Invalid`
    /// - the active route's device is present
    /// - Bluetooth is only the route while its SCO link is connected
    /// - each input yields at most one route change, matching the new route
    /// - SCO teardown is issued before the next route is enabled
    #[test]
    fn prop_arbiter_invariants(ops in proptest::collection::vec(op_strategy(), 1..60)) {
        let mut arbiter = RouteArbiter::new(ArbiterConfig::default());
        let mut now = Instant::now();

        for op in &ops {
            let effects = apply(&mut arbiter, op, &mut now);
            let active = arbiter.active_route();
            let state = arbiter.state();

            if state.call_active() {
                prop_assert!(active.is_valid(), "no route during call after {:?}", op);
                let kind = active.device().unwrap();
                prop_assert!(state.is_present(kind), "{} not present after {:?}", kind, op);
            } else {
                prop_assert_eq!(active, Route::Invalid);
            }

            if active == Route::Bluetooth {
                prop_assert_eq!(arbiter.link_state(), LinkState::Connected);
            }

            let changes: Vec<Route> = effects
                .iter()
                .filter_map(|effect| match effect {
                    Effect::Notify(event) => event.route_change(),
                    _ => None,
                })
                .collect();
            prop_assert!(changes.len() <= 1, "{:?} produced {:?}", op, changes);
            if let Some(route) = changes.first() {
                prop_assert_eq!(*route, active);
            }

            let position = |wanted: fn(&PlatformCommand) -> bool| {
                effects.iter().position(|effect| matches!(effect, Effect::Platform(c) if wanted(c)))
            };
            let stop = position(|c| *c == PlatformCommand::StopBluetoothSco);
            let enable = position(|c| matches!(c, PlatformCommand::EnableRoute(_)));
            if let (Some(stop), Some(enable)) = (stop, enable) {
                prop_assert!(stop < enable, "enable before SCO teardown: {:?}", effects);
            }
        }
    }

    /// Stopping a call twice is the same as stopping it once.
    #[test]
    fn prop_call_stop_idempotent(ops in proptest::collection::vec(op_strategy(), 0..30)) {
        let mut arbiter = RouteArbiter::new(ArbiterConfig::default());
        let mut now = Instant::now();
        for op in &ops {
            apply(&mut arbiter, op, &mut now);
        }

        arbiter.on_call_stopped(now);
        prop_assert!(arbiter.on_call_stopped(now).is_empty());
        prop_assert_eq!(arbiter.active_route(), Route::Invalid);
        prop_assert_eq!(arbiter.link_state(), LinkState::Disconnected);
    }
}
