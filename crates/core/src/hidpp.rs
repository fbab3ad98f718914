//! HID++ 1.0 receiver protocol encoding and decoding.
//!
//! The Unifying receiver speaks two report formats:
//! - Short reports: 7 bytes (report ID 0x10), used for commands and notifications
//! - Long reports: 20 bytes (report ID 0x11), used for register reads such as names
//!
//! Every command here is a register access addressed to the receiver itself
//! (device index 0xFF). Responses are validated by comparing a fixed prefix
//! byte-for-byte; trailing bytes are unconstrained.
//!
//! Protocol reference: Logitech HID++ 1.0 specification for Unifying receivers.

use crate::error::{Error, Result};

/// HID++ report ID for short messages (7 bytes total).
pub const SHORT_REPORT_ID: u8 = 0x10;
/// HID++ report ID for long messages (20 bytes total).
pub const LONG_REPORT_ID: u8 = 0x11;

/// Short report length (including report ID).
pub const SHORT_REPORT_LEN: usize = 7;
/// Long report length (including report ID).
pub const LONG_REPORT_LEN: usize = 20;

/// Device index addressing the receiver rather than a paired device.
pub const RECEIVER_INDEX: u8 = 0xFF;

/// A short report as written to or read from the primary channel.
pub type ShortFrame = [u8; SHORT_REPORT_LEN];

/// Receiver register sub-IDs and addresses.
pub mod registers {
    /// Set short register.
    pub const SET_REGISTER: u8 = 0x80;
    /// Get short register.
    pub const GET_REGISTER: u8 = 0x81;
    /// Get long register.
    pub const GET_LONG_REGISTER: u8 = 0x83;
    /// Notification flags register.
    pub const NOTIFICATIONS: u8 = 0x00;
    /// Connection state register (holds the paired device count).
    pub const CONNECTION_STATE: u8 = 0x02;
    /// Pairing information register.
    pub const PAIRING_INFO: u8 = 0xB5;
    /// Pairing info sub-page for device names; the slot index is or-ed in.
    pub const DEVICE_NAME_PAGE: u8 = 0x40;
}

/// Notification family for device connection status.
pub const DEVICE_CONNECTION: u8 = 0x41;

/// Connection sub-type flagging a link establishment.
pub const LINK_ESTABLISHED: u8 = 0xA1;
/// Connection sub-type flagging a link loss.
pub const LINK_LOST: u8 = 0x61;

/// Enable-notifications acknowledgement prefix.
pub const ENABLE_NOTIFICATIONS_ACK: &[u8] = &[SHORT_REPORT_ID, RECEIVER_INDEX, 0x80, 0x00];

/// Register-read echo the receiver driver emits after enabling notifications.
pub const NOTIFICATIONS_READ_ECHO: &[u8] = &[SHORT_REPORT_ID, RECEIVER_INDEX, 0x81, 0x00];

/// Device count response prefix.
pub const DEVICE_COUNT_RESPONSE: &[u8] = &[SHORT_REPORT_ID, RECEIVER_INDEX, 0x81, 0x02, 0x00];

/// Device name response prefix.
pub const DEVICE_NAME_RESPONSE: &[u8] = &[LONG_REPORT_ID, RECEIVER_INDEX, 0x83, 0xB5];

/// Undocumented long frame the receiver sends after a link is established,
/// ahead of any name response.
pub const CONNECT_PREAMBLE: &[u8] = &[LONG_REPORT_ID, 0x01, 0x04];

/// Offset of the device count in its response.
const DEVICE_COUNT_OFFSET: usize = 5;
/// Offset of the name length in a name response.
const NAME_LENGTH_OFFSET: usize = 5;
/// Offset of the first name byte in a name response.
const NAME_OFFSET: usize = 6;

/// Build a short register command addressed to the receiver.
fn receiver_command(sub_id: u8, address: u8, params: [u8; 3]) -> ShortFrame {
    [
        SHORT_REPORT_ID,
        RECEIVER_INDEX,
        sub_id,
        address,
        params[0],
        params[1],
        params[2],
    ]
}

/// Command enabling the receiver's wireless-status notification stream.
pub fn encode_enable_notifications() -> ShortFrame {
    receiver_command(
        registers::SET_REGISTER,
        registers::NOTIFICATIONS,
        [0x00, 0x01, 0x00],
    )
}

/// Validate the enable-notifications acknowledgement.
pub fn decode_enable_notifications(response: &[u8]) -> Result<()> {
    check_prefix(ENABLE_NOTIFICATIONS_ACK, response)
}

/// Command asking the receiver how many devices are paired.
pub fn encode_get_device_count() -> ShortFrame {
    receiver_command(
        registers::GET_REGISTER,
        registers::CONNECTION_STATE,
        [0x00, 0x00, 0x00],
    )
}

/// Read the paired device count from its response.
pub fn decode_device_count(response: &[u8]) -> Result<u8> {
    check_prefix(DEVICE_COUNT_RESPONSE, response)?;
    response
        .get(DEVICE_COUNT_OFFSET)
        .copied()
        .ok_or_else(|| mismatch(DEVICE_COUNT_RESPONSE, response))
}

/// Command reading the name of a 0-indexed slot.
///
/// The firmware addresses the name page by or-ing the slot with 0x40.
pub fn encode_get_name(slot: u8) -> ShortFrame {
    receiver_command(
        registers::GET_LONG_REGISTER,
        registers::PAIRING_INFO,
        [slot | registers::DEVICE_NAME_PAGE, 0x00, 0x00],
    )
}

/// Extract the length-prefixed device name from a long response.
pub fn decode_name(response: &[u8]) -> Result<String> {
    check_prefix(DEVICE_NAME_RESPONSE, response)?;
    let len = *response
        .get(NAME_LENGTH_OFFSET)
        .ok_or_else(|| mismatch(DEVICE_NAME_RESPONSE, response))? as usize;
    let bytes = response
        .get(NAME_OFFSET..NAME_OFFSET + len)
        .ok_or_else(|| mismatch(DEVICE_NAME_RESPONSE, response))?;
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

/// Link-level event carried by a connection notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    Connect,
    Disconnect,
    /// Connection notification with a sub-type this crate does not interpret.
    Other(u8),
}

/// A decoded notification from the primary channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    /// Device connection notification for a 0-indexed slot.
    Link { slot: usize, event: LinkEvent },
    /// Anything else the receiver reports; discarded by callers.
    Unrelated,
}

/// Decode a raw frame read from the primary channel.
///
/// The wire carries 1-indexed device ids; the returned slot is 0-indexed.
pub fn decode_notification(frame: &[u8]) -> Notification {
    if frame.len() != SHORT_REPORT_LEN
        || frame[0] != SHORT_REPORT_ID
        || frame[2] != DEVICE_CONNECTION
    {
        return Notification::Unrelated;
    }

    let Some(slot) = (frame[1] as usize).checked_sub(1) else {
        return Notification::Unrelated;
    };

    let event = match frame[4] {
        LINK_ESTABLISHED => LinkEvent::Connect,
        LINK_LOST => LinkEvent::Disconnect,
        other => LinkEvent::Other(other),
    };

    Notification::Link { slot, event }
}

/// Accept `response` iff every byte of `expected` matches its prefix.
pub fn check_prefix(expected: &[u8], response: &[u8]) -> Result<()> {
    if response.starts_with(expected) {
        Ok(())
    } else {
        Err(mismatch(expected, response))
    }
}

fn mismatch(expected: &[u8], response: &[u8]) -> Error {
    Error::PrefixMismatch {
        expected: expected.to_vec(),
        actual: response.to_vec(),
    }
}
