//! unify-status-core: Unifying receiver protocol, device registry, and
//! session supervision.
//!
//! This crate talks to a Logitech Unifying receiver over its raw HID++ 1.0
//! collections, tracks the connection status of every paired device, and
//! forwards status changes to a [`sink::StatusSink`].

pub mod comm;
pub mod config;
pub mod connectivity;
pub mod device;
pub mod error;
pub mod hidpp;
#[cfg(test)]
mod integration_tests;
pub mod mqtt;
pub mod session;
pub mod sink;
pub mod transport;

/// Logitech USB Vendor ID.
pub const LOGITECH_VID: u16 = 0x046D;

/// Known Logitech receiver product IDs.
pub mod pids {
    /// Unifying receiver.
    pub const UNIFYING_RECEIVER: u16 = 0xC52B;
}
