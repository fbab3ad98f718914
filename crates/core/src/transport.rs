//! HID channel abstraction for receiver communication.
//!
//! Provides a trait-based channel layer so that the real receiver and
//! scripted mock receivers share the same interface. Reads block until a
//! report arrives, the device fails, or the channel's [`CancelToken`] fires.

use crate::error::{Error, Result};
use hidapi::{HidApi, HidDevice};
use std::ffi::CString;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// How long a hidapi read waits before re-checking its cancel token.
const READ_SLICE_MS: i32 = 50;

/// Selector for one HID collection exposed by the receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct HidEndpoint {
    pub vendor_id: u16,
    pub product_id: u16,
    /// USB interface number.
    pub interface: i32,
    /// Vendor usage page of the collection.
    pub usage_page: u16,
    /// Usage identifying the collection within the page.
    pub usage: u16,
}

/// Shared flag interrupting blocking reads from another thread.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every pending and future read on channels holding this token fail
    /// with [`Error::Cancelled`].
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Re-arm the token before opening a new session.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Raw bidirectional byte channel to one HID collection.
///
/// Closing the channel is dropping it.
pub trait HidChannel {
    /// Block until a report is read into `buf`; returns the byte count.
    fn read(&self, buf: &mut [u8]) -> Result<usize>;

    /// Write a raw report.
    fn write(&self, data: &[u8]) -> Result<()>;
}

/// Locates receiver collections and opens channels to them.
pub trait ChannelProvider {
    type Channel: HidChannel;

    /// Resolve the OS path of `endpoint`, if currently present.
    fn find_path(&mut self, endpoint: &HidEndpoint) -> Option<String>;

    /// Open a channel whose reads honour `cancel`.
    fn open(&mut self, path: &str, cancel: CancelToken) -> Result<Self::Channel>;
}

/// Channel provider backed by hidapi.
pub struct HidapiProvider {
    api: HidApi,
}

impl HidapiProvider {
    /// Initialize the HID subsystem.
    pub fn new() -> Result<Self> {
        let api = HidApi::new().map_err(|e| Error::Hid(format!("hidapi init: {e}")))?;
        Ok(Self { api })
    }
}

impl ChannelProvider for HidapiProvider {
    type Channel = HidapiChannel;

    fn find_path(&mut self, endpoint: &HidEndpoint) -> Option<String> {
        if let Err(e) = self.api.refresh_devices() {
            debug!(error = %e, "HID device refresh failed");
            return None;
        }

        self.api
            .device_list()
            .find(|info| {
                info.vendor_id() == endpoint.vendor_id
                    && info.product_id() == endpoint.product_id
                    && info.interface_number() == endpoint.interface
                    && info.usage_page() == endpoint.usage_page
                    && info.usage() == endpoint.usage
            })
            .map(|info| info.path().to_string_lossy().into_owned())
    }

    fn open(&mut self, path: &str, cancel: CancelToken) -> Result<Self::Channel> {
        let c_path = CString::new(path)
            .map_err(|_| Error::DeviceNotFound(format!("invalid device path: {path}")))?;
        let device = self
            .api
            .open_path(&c_path)
            .map_err(|e| Error::Hid(format!("open {path}: {e}")))?;
        debug!(path, "Opened HID channel");
        Ok(HidapiChannel { device, cancel })
    }
}

/// An open hidapi device with a cancellable blocking read.
pub struct HidapiChannel {
    device: HidDevice,
    cancel: CancelToken,
}

impl HidChannel for HidapiChannel {
    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let n = self
                .device
                .read_timeout(buf, READ_SLICE_MS)
                .map_err(|e| Error::Hid(format!("read: {e}")))?;
            if n > 0 {
                trace!(report_hex = format_args!("{:02X?}", &buf[..n]), "HID RX");
                return Ok(n);
            }
        }
    }

    fn write(&self, data: &[u8]) -> Result<()> {
        trace!(report_hex = format_args!("{:02X?}", data), "HID TX");
        self.device
            .write(data)
            .map_err(|e| Error::Hid(format!("write: {e}")))?;
        Ok(())
    }
}
