//! Receiver communication layer: command/response exchanges and error
//! classification.
//!
//! Commands are written to the primary channel. Short responses come back on
//! the primary channel, long responses (names) on the responder channel.

use crate::error::{Error, Result};
use crate::hidpp::{self, LONG_REPORT_LEN, SHORT_REPORT_LEN};
use crate::transport::HidChannel;
use tracing::{debug, trace, warn};

/// Classification of communication errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Receiver was unplugged or its handle went stale.
    Disconnected,
    /// Read interrupted by the control context.
    Cancelled,
    /// Response did not match the expected prefix.
    InvalidResponse,
    /// Anything else.
    Unexpected,
}

impl ErrorClass {
    /// Classify an error for session lifecycle decisions.
    pub fn classify(err: &Error) -> Self {
        match err {
            Error::Cancelled => Self::Cancelled,
            Error::DeviceNotFound(_) => Self::Disconnected,
            Error::PrefixMismatch { .. } => Self::InvalidResponse,
            Error::Hid(msg) => {
                let lower = msg.to_lowercase();
                if lower.contains("disconnect")
                    || lower.contains("not connected")
                    || lower.contains("no such device")
                    || lower.contains("not found")
                {
                    Self::Disconnected
                } else if lower.contains("aborted") || lower.contains("cancelled") {
                    Self::Cancelled
                } else {
                    Self::Unexpected
                }
            }
            Error::Config(_) | Error::Sink(_) => Self::Unexpected,
        }
    }

    /// Whether a read failure of this class is part of normal operation.
    pub fn is_expected(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Cancelled)
    }
}

/// Read one report of at most `len` bytes.
pub fn read_frame(channel: &dyn HidChannel, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    let n = channel.read(&mut buf)?;
    buf.truncate(n);
    Ok(buf)
}

/// Read the next long report from the responder, discarding short ones.
///
/// Where both collections share one OS node (hidraw), every handle sees every
/// input report, so acks and notifications also queue up on the responder.
pub fn read_long_frame(responder: &dyn HidChannel) -> Result<Vec<u8>> {
    loop {
        let frame = read_frame(responder, LONG_REPORT_LEN)?;
        if frame.first() == Some(&hidpp::LONG_REPORT_ID) {
            return Ok(frame);
        }
        trace!(frame = format_args!("{:02X?}", frame), "Skipping short report on responder");
    }
}

/// Outcome of a non-fatal check: transport errors propagate, prefix
/// mismatches are logged and reported as `false`.
fn tolerate_mismatch(result: Result<()>, what: &str) -> Result<bool> {
    match result {
        Ok(()) => Ok(true),
        Err(Error::PrefixMismatch { actual, .. }) => {
            warn!(bytes = format_args!("{:02X?}", actual), "Failed to confirm {what}");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

/// Enable wireless notifications and check the acknowledgement.
///
/// A mismatching acknowledgement is only a warning; the receiver has been
/// seen to deliver it out of order. With `read_echo`, also consume the
/// register-read echo some drivers provoke right after.
pub fn enable_notifications(receiver: &dyn HidChannel, read_echo: bool) -> Result<bool> {
    receiver.write(&hidpp::encode_enable_notifications())?;
    let ack = read_frame(receiver, SHORT_REPORT_LEN)?;
    let confirmed = tolerate_mismatch(
        hidpp::decode_enable_notifications(&ack),
        "enabled notifications",
    )?;

    if read_echo {
        let echo = read_frame(receiver, SHORT_REPORT_LEN)?;
        tolerate_mismatch(
            hidpp::check_prefix(hidpp::NOTIFICATIONS_READ_ECHO, &echo),
            "notification read after enable",
        )?;
    }

    Ok(confirmed)
}

/// Ask the receiver for its paired device count.
pub fn query_device_count(receiver: &dyn HidChannel) -> Result<u8> {
    receiver.write(&hidpp::encode_get_device_count())?;
    let resp = read_frame(receiver, SHORT_REPORT_LEN)?;
    let count = hidpp::decode_device_count(&resp)?;
    debug!(count, "Paired device count");
    Ok(count)
}

/// Read the name of a 0-indexed slot.
///
/// With `skip_preamble`, the undocumented frame the receiver sends after a
/// link is established is consumed first; a mismatch there is only logged.
pub fn query_name(
    receiver: &dyn HidChannel,
    responder: &dyn HidChannel,
    slot: usize,
    skip_preamble: bool,
) -> Result<String> {
    receiver.write(&hidpp::encode_get_name(slot as u8))?;

    if skip_preamble {
        let preamble = read_long_frame(responder)?;
        tolerate_mismatch(
            hidpp::check_prefix(hidpp::CONNECT_PREAMBLE, &preamble),
            "connect preamble",
        )?;
    }

    let resp = read_long_frame(responder)?;
    let name = hidpp::decode_name(&resp)?;
    debug!(slot, name = %name, "Resolved device name");
    Ok(name)
}
