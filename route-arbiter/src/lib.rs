//! # Route Arbiter
//!
//! Decides which audio output carries a call (earpiece, loudspeaker, wired
//! headset or Bluetooth) and keeps that decision correct as devices come and
//! go, the user picks a route, and Bluetooth links succeed or fail.
//!
//! ## Key Features
//!
//! - **Priority policy**: Bluetooth, then wired headset, then earpiece, then
//!   speaker for voice calls; video calls skip the earpiece
//! - **User override**: an explicit route choice wins while its device is present
//! - **Bluetooth SCO state machine**: connect timeout, bounded retries and
//!   fallback to the next best device while the link comes up
//! - **Single writer**: one worker task owns all state, so there are no locks
//!   and events are applied in order
//! - **Injectable platform**: OS calls go through the [`AudioPlatform`] trait,
//!   OS callbacks come in through [`EventSource`]s
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use route_arbiter::prelude::*;
//!
//! let (callbacks, source) = ChannelEventSource::new("android", 32);
//! let manager = RouteManager::builder()
//!     .with_config(ArbiterConfig::default())
//!     .with_platform(Arc::new(MyPlatform::new()))
//!     .with_event_source(source)
//!     .build()?;
//!
//! let mut events = manager.subscribe();
//!
//! // From the OS callback thread
//! callbacks.blocking_send(SourceEvent::AndroidDevice { type_code: 7, present: true })?;
//!
//! manager.call_started(CallMode::Voice).await?;
//! while let Some(RouteEvent::RouteChanged { route, .. }) = events.recv().await {
//!     println!("now routed to {route}");
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//!  EventSource ──▶ forwarder ─┐
//!                             ├─▶ command channel ─▶ worker ─▶ AudioPlatform
//!  RouteManager ──────────────┘                        │
//!                                                      ▼
//!                                              broadcast ─▶ RouteEvents
//! ```
//!
//! The worker owns a [`RouteArbiter`], a synchronous state machine that turns
//! each input into an ordered list of [`Effect`]s. The worker executes them
//! one by one, feeds platform failures back into the arbiter, and sleeps
//! until the next link or cooldown deadline when idle.

pub mod arbiter;
pub mod bluetooth;
pub mod config;
pub mod device;
pub mod error;
pub mod event;
pub mod iter;
pub mod logging;
pub mod manager;
pub mod platform;
pub mod policy;
pub mod state;
pub mod worker;

// Re-export main types for convenience
pub use arbiter::{Effect, RouteArbiter};
pub use bluetooth::{LinkReport, LinkState};
pub use config::ArbiterConfig;
pub use device::{BluetoothProfile, CallMode, Device, DeviceKind, Route};
pub use error::{PlatformError, Result, RouteError};
pub use event::RouteEvent;
pub use iter::RouteEvents;
pub use manager::{RouteManager, RouteManagerBuilder};
pub use platform::{AudioPlatform, ChannelEventSource, EventSource, PlatformCommand, SourceEvent};
pub use state::RouteSnapshot;

/// Prelude module for convenient imports
///
/// ```rust
/// use route_arbiter::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        ArbiterConfig, AudioPlatform, BluetoothProfile, CallMode, ChannelEventSource, Device,
        DeviceKind, EventSource, LinkReport, LinkState, PlatformError, Result, Route, RouteError,
        RouteEvent, RouteEvents, RouteManager, SourceEvent,
    };
}
