//! Connection status classification.
//!
//! The receiver only reports link-established and link-lost events. A device
//! entering power-saving mode reports a connect followed roughly 400ms later
//! by a disconnect, so a disconnect arriving within [`POWERSAVE_WINDOW`] of
//! the last connect is classified as [`DeviceStatus::Powersave`].

use crate::device::{DeviceRegistry, DeviceStatus};
use crate::hidpp::{LinkEvent, Notification};
use std::time::{Duration, Instant};
use tracing::debug;

/// Default gap below which a disconnect means powersave.
pub const POWERSAVE_WINDOW: Duration = Duration::from_millis(500);

/// Source of monotonic timestamps.
pub trait Clock {
    fn now(&self) -> Instant;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A status change for one slot, to be forwarded to the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub slot: usize,
    pub status: DeviceStatus,
    /// The slot has no name yet and one should be queried before emitting.
    pub needs_name: bool,
}

/// Result of feeding one notification to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Step {
    /// The registry grew to cover the notified slot; re-announce first.
    pub grew: bool,
    pub transition: Option<Transition>,
}

/// Per-slot connection state machine.
#[derive(Debug, Clone, Copy)]
pub struct Connectivity {
    powersave_window: Duration,
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(POWERSAVE_WINDOW)
    }
}

impl Connectivity {
    pub fn new(powersave_window: Duration) -> Self {
        Self { powersave_window }
    }

    /// Apply a decoded notification received at `now`.
    pub fn observe(
        &self,
        registry: &mut DeviceRegistry,
        notification: Notification,
        now: Instant,
    ) -> Step {
        let Notification::Link { slot, event } = notification else {
            return Step::default();
        };

        let grew = registry.ensure_slot(slot);
        let transition = match event {
            LinkEvent::Connect => Some(self.connect(registry, slot, now)),
            LinkEvent::Disconnect => Some(self.disconnect(registry, slot, now)),
            LinkEvent::Other(sub_type) => {
                debug!(slot, sub_type = format_args!("0x{:02X}", sub_type), "Ignoring link event");
                None
            }
        };

        Step { grew, transition }
    }

    fn connect(&self, registry: &mut DeviceRegistry, slot: usize, now: Instant) -> Transition {
        let device = registry.get_mut(slot);
        device.status = DeviceStatus::Connected;
        device.last_connected_at = Some(now);
        Transition {
            slot,
            status: DeviceStatus::Connected,
            needs_name: device.name.is_empty(),
        }
    }

    fn disconnect(&self, registry: &mut DeviceRegistry, slot: usize, now: Instant) -> Transition {
        let device = registry.get_mut(slot);
        let sleeping = device
            .last_connected_at
            .is_some_and(|at| now.saturating_duration_since(at) < self.powersave_window);
        device.status = if sleeping {
            DeviceStatus::Powersave
        } else {
            DeviceStatus::Disconnected
        };
        Transition {
            slot,
            status: device.status,
            needs_name: false,
        }
    }
}
