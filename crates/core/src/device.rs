//! Device model: per-slot status and the registry of paired devices.

use std::time::Instant;
use tracing::{debug, warn};

/// Maximum number of devices a Unifying receiver can pair.
pub const MAX_PAIRED_DEVICES: usize = 6;

/// Connection status of a paired device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DeviceStatus {
    #[default]
    Disconnected,
    Connected,
    /// Link dropped right after being established: the device is sleeping.
    Powersave,
}

impl DeviceStatus {
    /// Lowercase wire name, used as the sink payload.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connected => "connected",
            Self::Powersave => "powersave",
        }
    }
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One paired device, addressed by its 0-indexed slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceSlot {
    pub status: DeviceStatus,
    /// Resolved display name; empty until a name query succeeds.
    pub name: String,
    /// Time of the most recent Connected transition, `None` if never connected.
    pub last_connected_at: Option<Instant>,
}

impl DeviceSlot {
    /// Name to show when the device has not reported one yet.
    pub fn display_name(&self, slot: usize) -> String {
        if self.name.is_empty() {
            format!("Device {}", slot + 1)
        } else {
            self.name.clone()
        }
    }
}

/// Ordered table of device slots, grown on demand and never shrunk.
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    slots: Vec<DeviceSlot>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of known slots.
    pub fn size(&self) -> usize {
        self.slots.len()
    }

    /// Grow to `n` slots. Smaller values are ignored.
    ///
    /// Returns whether the registry grew.
    pub fn resize(&mut self, n: usize) -> bool {
        if n <= self.slots.len() {
            return false;
        }
        if n > MAX_PAIRED_DEVICES {
            warn!(
                size = n,
                max = MAX_PAIRED_DEVICES,
                "Registry grown past receiver capacity"
            );
        }
        debug!(from = self.slots.len(), to = n, "Growing device registry");
        self.slots.resize_with(n, DeviceSlot::default);
        true
    }

    /// Grow so that `slot` is addressable. Returns whether the registry grew.
    pub fn ensure_slot(&mut self, slot: usize) -> bool {
        self.resize(slot + 1)
    }

    /// Slot access. Panics when out of range; callers resize first.
    pub fn get(&self, slot: usize) -> &DeviceSlot {
        &self.slots[slot]
    }

    /// Mutable slot access. Panics when out of range; callers resize first.
    pub fn get_mut(&mut self, slot: usize) -> &mut DeviceSlot {
        &mut self.slots[slot]
    }

    /// Copy of all slots, for readers outside the session worker.
    pub fn snapshot(&self) -> Vec<DeviceSlot> {
        self.slots.clone()
    }
}
