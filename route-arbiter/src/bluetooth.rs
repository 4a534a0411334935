//! Bluetooth SCO link state machine
//!
//! ```text
//! Disconnected ──begin_connect──▶ Connecting ──Connected──▶ Connected
//!      ▲                              │                         │
//!      │                        timeout / refused        begin_disconnect
//!      │                              ▼                         ▼
//!      └──────────Disconnected────────┴────────────────── Disconnecting
//! ```
//!
//! The OS reports link changes asynchronously (Android's
//! `ACTION_SCO_AUDIO_STATE_UPDATED`), so every pending state carries a
//! deadline. A connect that is not confirmed in time is a failure; a
//! disconnect that is not confirmed in time is simply assumed to be done.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// State of the SCO link as tracked by the arbiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    #[default]
    Disconnected,
    /// Connect requested, waiting for the OS to confirm
    Connecting,
    Connected,
    /// Disconnect requested, waiting for the OS to confirm
    Disconnecting,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
            LinkState::Disconnecting => "disconnecting",
        };
        f.write_str(s)
    }
}

/// Link state as reported by the OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkReport {
    Connecting,
    Connected,
    Disconnected,
}

/// Result of feeding a report or a clock tick into the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    /// Nothing the arbiter needs to react to
    Unchanged,
    /// A requested connect completed
    Established,
    /// A requested disconnect completed
    Released,
    /// The OS refused or aborted a requested connect
    Refused,
    /// An established link went away without being asked to
    Dropped,
    /// A requested connect was not confirmed before its deadline
    TimedOut,
}

/// The SCO link of the current Bluetooth device.
#[derive(Debug, Clone, Default)]
pub struct ScoLink {
    state: LinkState,
    deadline: Option<Instant>,
}

impl ScoLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// When the pending connect or disconnect gives up, if one is pending.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_connected(&self) -> bool {
        self.state == LinkState::Connected
    }

    /// Whether a connect has been requested or completed.
    pub fn is_engaged(&self) -> bool {
        matches!(self.state, LinkState::Connecting | LinkState::Connected)
    }

    /// Request a connect.
    ///
    /// Returns `true` when the caller must ask the OS to start SCO. A link
    /// that is still disconnecting has to settle first.
    pub fn begin_connect(&mut self, now: Instant, timeout: Duration) -> bool {
        match self.state {
            LinkState::Disconnected => {
                self.state = LinkState::Connecting;
                self.deadline = Some(now + timeout);
                true
            }
            LinkState::Connecting | LinkState::Connected | LinkState::Disconnecting => false,
        }
    }

    /// Request a disconnect.
    ///
    /// Returns `true` when the caller must ask the OS to stop SCO, which
    /// also cancels a connect still in flight.
    pub fn begin_disconnect(&mut self, now: Instant, timeout: Duration) -> bool {
        match self.state {
            LinkState::Connecting | LinkState::Connected => {
                self.state = LinkState::Disconnecting;
                self.deadline = Some(now + timeout);
                true
            }
            LinkState::Disconnected | LinkState::Disconnecting => false,
        }
    }

    /// Drop straight to `Disconnected` without waiting for the OS.
    pub fn reset(&mut self) {
        self.state = LinkState::Disconnected;
        self.deadline = None;
    }

    /// Apply a link report from the OS.
    pub fn on_report(&mut self, report: LinkReport) -> LinkOutcome {
        match (self.state, report) {
            (LinkState::Connecting, LinkReport::Connected) => {
                self.state = LinkState::Connected;
                self.deadline = None;
                LinkOutcome::Established
            }
            (LinkState::Connecting, LinkReport::Disconnected) => {
                self.reset();
                LinkOutcome::Refused
            }
            (LinkState::Connected, LinkReport::Disconnected) => {
                self.reset();
                LinkOutcome::Dropped
            }
            (LinkState::Disconnecting, LinkReport::Disconnected) => {
                self.reset();
                LinkOutcome::Released
            }
            (state, report) => {
                tracing::debug!("Ignoring SCO report {:?} while {}", report, state);
                LinkOutcome::Unchanged
            }
        }
    }

    /// Expire a pending transition whose deadline has passed.
    pub fn check_deadline(&mut self, now: Instant) -> LinkOutcome {
        match self.deadline {
            Some(deadline) if now >= deadline => {}
            _ => return LinkOutcome::Unchanged,
        }

        let outcome = match self.state {
            LinkState::Connecting => LinkOutcome::TimedOut,
            LinkState::Disconnecting => LinkOutcome::Released,
            LinkState::Connected | LinkState::Disconnected => LinkOutcome::Unchanged,
        };
        self.reset();
        outcome
    }
}
