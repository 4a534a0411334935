//! Subscriber handle for route notifications
//!
//! Each [`RouteEvents`] owns its own position in the notification stream.
//! A subscriber that falls behind loses the oldest events rather than
//! holding up the worker or the other subscribers.

use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};

use crate::event::RouteEvent;

/// Stream of [`RouteEvent`]s for one subscriber
///
/// Dropping it unsubscribes.
pub struct RouteEvents {
    rx: broadcast::Receiver<RouteEvent>,
}

impl RouteEvents {
    pub(crate) fn new(rx: broadcast::Receiver<RouteEvent>) -> Self {
        Self { rx }
    }

    /// Wait for the next event
    ///
    /// Returns `None` once the manager has shut down and every pending event
    /// has been delivered.
    pub async fn recv(&mut self) -> Option<RouteEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Route event subscriber lagged, skipped {} events", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Wait for the next event for at most `timeout`
    ///
    /// Returns `None` if the timeout expires or the manager has shut down.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<RouteEvent> {
        tokio::time::timeout(timeout, self.recv()).await.ok().flatten()
    }

    /// Take an event if one is already queued
    pub fn try_recv(&mut self) -> Option<RouteEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!("Route event subscriber lagged, skipped {} events", skipped);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Drain every event currently queued
    pub fn drain(&mut self) -> Vec<RouteEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

impl Clone for RouteEvents {
    /// The clone only sees events sent after it was created.
    fn clone(&self) -> Self {
        Self {
            rx: self.rx.resubscribe(),
        }
    }
}
