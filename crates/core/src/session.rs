//! Session supervisor: receiver channel lifecycle and the notification loop.
//!
//! One worker thread runs [`Supervisor::run`]:
//!
//! ```text
//! SEARCHING --both paths found--> OPEN --read failure--> CLOSED --+--> SEARCHING
//!                                                                 +--> TERMINATED (shutdown requested)
//! ```
//!
//! Other threads steer it through a [`SessionControl`]: shutdown and restart
//! both cancel the in-flight blocking read, after which the worker closes the
//! channels and decides whether to search again.

use crate::comm::{self, ErrorClass};
use crate::config::Config;
use crate::connectivity::{Clock, Connectivity, SystemClock};
use crate::device::{DeviceRegistry, DeviceSlot};
use crate::error::{Error, Result};
use crate::hidpp::{self, Notification, SHORT_REPORT_LEN};
use crate::sink::{self, StatusSink, Topics};
use crate::transport::{CancelToken, ChannelProvider, HidChannel, HidEndpoint};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Granularity at which idle waits notice a shutdown request.
const IDLE_SLICE: Duration = Duration::from_millis(50);

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Searching,
    Open,
    Closed,
    Terminated,
}

#[derive(Debug, Default)]
struct Shared {
    terminate: AtomicBool,
    cancel: CancelToken,
    state: Mutex<SessionState>,
    devices: RwLock<Vec<DeviceSlot>>,
}

/// Handle for steering a running supervisor from another thread.
#[derive(Debug, Clone, Default)]
pub struct SessionControl {
    shared: Arc<Shared>,
}

impl SessionControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop the supervisor for good, interrupting any pending read.
    pub fn shutdown(&self) {
        info!("Shutdown requested");
        self.shared.terminate.store(true, Ordering::SeqCst);
        self.shared.cancel.cancel();
    }

    /// Close the current session and search for the receiver again.
    ///
    /// Has no effect while no session is open.
    pub fn restart(&self) {
        info!("Session restart requested");
        self.shared.cancel.cancel();
    }

    pub fn is_terminating(&self) -> bool {
        self.shared.terminate.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.lock()
    }

    /// Copy of the device table as last published by the worker.
    pub fn devices(&self) -> Vec<DeviceSlot> {
        self.shared.devices.read().clone()
    }

    /// Sleep for `duration`, returning early once shutdown is requested.
    pub fn idle(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while !self.is_terminating() {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                break;
            }
            std::thread::sleep(left.min(IDLE_SLICE));
        }
    }

    fn set_state(&self, state: SessionState) {
        debug!(?state, "Session state");
        *self.shared.state.lock() = state;
    }

    fn publish_devices(&self, registry: &DeviceRegistry) {
        *self.shared.devices.write() = registry.snapshot();
    }
}

/// Tunables for a supervisor.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub primary: HidEndpoint,
    pub responder: HidEndpoint,
    pub topics: Topics,
    pub poll_interval: Duration,
    pub powersave_window: Duration,
    pub read_enable_echo: bool,
    pub read_connect_preamble: bool,
}

impl From<&Config> for SessionOptions {
    fn from(config: &Config) -> Self {
        Self {
            primary: config.receiver.primary(),
            responder: config.receiver.responder(),
            topics: config.topics(),
            poll_interval: config.poll_interval(),
            powersave_window: config.powersave_window(),
            read_enable_echo: config.read_enable_echo,
            read_connect_preamble: config.read_connect_preamble,
        }
    }
}

/// OS paths of both receiver collections, resolved in the same poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverPaths {
    pub primary: String,
    pub responder: String,
}

/// Drives the receiver: search, open, enumerate, then classify notifications
/// until the channel fails.
pub struct Supervisor<P, S, C = SystemClock> {
    provider: P,
    sink: S,
    clock: C,
    options: SessionOptions,
    machine: Connectivity,
    registry: DeviceRegistry,
    control: SessionControl,
}

impl<P: ChannelProvider, S: StatusSink> Supervisor<P, S> {
    pub fn new(provider: P, sink: S, options: SessionOptions, control: SessionControl) -> Self {
        Self::with_clock(provider, sink, SystemClock, options, control)
    }
}

impl<P: ChannelProvider, S: StatusSink, C: Clock> Supervisor<P, S, C> {
    pub fn with_clock(
        provider: P,
        sink: S,
        clock: C,
        options: SessionOptions,
        control: SessionControl,
    ) -> Self {
        Self {
            provider,
            sink,
            clock,
            machine: Connectivity::new(options.powersave_window),
            options,
            registry: DeviceRegistry::new(),
            control,
        }
    }

    pub fn control(&self) -> SessionControl {
        self.control.clone()
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Run sessions back to back until shutdown is requested.
    pub fn run(&mut self) {
        info!("Supervisor started");
        while let Some(paths) = self.search() {
            // Re-arm before checking for shutdown so a request racing with
            // this point still cancels the first read.
            self.control.shared.cancel.reset();
            if self.control.is_terminating() {
                break;
            }

            let reason = self.run_session(&paths);
            self.control.set_state(SessionState::Closed);
            match ErrorClass::classify(&reason) {
                class if class.is_expected() => info!(%reason, "Receiver session closed"),
                ErrorClass::InvalidResponse => {
                    warn!(%reason, "Receiver session closed on malformed response")
                }
                _ => {
                    warn!(%reason, "Unexpected receiver failure, restarting session");
                    // Avoid spinning when the receiver is present but unusable.
                    self.control.idle(self.options.poll_interval);
                }
            }

            if self.control.is_terminating() {
                break;
            }
        }
        self.control.set_state(SessionState::Terminated);
        info!("Supervisor terminated");
    }

    /// Poll for both receiver collections.
    ///
    /// Returns `None` once shutdown is requested.
    pub fn search(&mut self) -> Option<ReceiverPaths> {
        self.control.set_state(SessionState::Searching);
        loop {
            if self.control.is_terminating() {
                return None;
            }

            let primary = self.provider.find_path(&self.options.primary);
            let responder = self.provider.find_path(&self.options.responder);
            if let (Some(primary), Some(responder)) = (primary, responder) {
                info!(%primary, %responder, "Found receiver");
                return Some(ReceiverPaths { primary, responder });
            }

            self.control.idle(self.options.poll_interval);
            debug!("Waiting on receiver");
        }
    }

    /// Open both channels and serve them until a read fails.
    ///
    /// Returns the failure that ended the session. Channels are closed on
    /// return.
    pub fn run_session(&mut self, paths: &ReceiverPaths) -> Error {
        let cancel = self.control.shared.cancel.clone();
        let receiver = match self.provider.open(&paths.primary, cancel.clone()) {
            Ok(channel) => channel,
            Err(e) => return e,
        };
        let responder = match self.provider.open(&paths.responder, cancel) {
            Ok(channel) => channel,
            Err(e) => return e,
        };

        self.registry = DeviceRegistry::new();
        self.control.publish_devices(&self.registry);
        self.control.set_state(SessionState::Open);

        if let Err(e) = self.setup(&receiver, &responder) {
            return e;
        }

        loop {
            if self.control.is_terminating() {
                return Error::Cancelled;
            }
            let frame = match comm::read_frame(&receiver, SHORT_REPORT_LEN) {
                Ok(frame) => frame,
                Err(e) => return e,
            };
            if let Err(e) = self.handle_frame(&frame, &receiver, &responder) {
                return e;
            }
        }
    }

    /// Enable notifications, enumerate paired devices, and announce them.
    fn setup(&mut self, receiver: &dyn HidChannel, responder: &dyn HidChannel) -> Result<()> {
        comm::enable_notifications(receiver, self.options.read_enable_echo)?;
        self.enumerate(receiver, responder)?;
        self.announce();
        Ok(())
    }

    /// Size the registry from the receiver's device count and resolve names.
    ///
    /// Slots that already carry a name are not queried again.
    pub fn enumerate(&mut self, receiver: &dyn HidChannel, responder: &dyn HidChannel) -> Result<()> {
        let count = match comm::query_device_count(receiver) {
            Ok(count) => count,
            Err(Error::PrefixMismatch { actual, .. }) => {
                warn!(bytes = format_args!("{:02X?}", actual), "Failed to get paired devices");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        self.registry.resize(count as usize);
        for slot in 0..self.registry.size() {
            if self.registry.get(slot).name.is_empty() {
                self.resolve_name(slot, receiver, responder, false)?;
            }
        }
        self.control.publish_devices(&self.registry);
        info!(count, "Enumerated paired devices");
        Ok(())
    }

    fn resolve_name(
        &mut self,
        slot: usize,
        receiver: &dyn HidChannel,
        responder: &dyn HidChannel,
        skip_preamble: bool,
    ) -> Result<()> {
        match comm::query_name(receiver, responder, slot, skip_preamble) {
            Ok(name) => {
                self.registry.get_mut(slot).name = name;
                Ok(())
            }
            Err(Error::PrefixMismatch { actual, .. }) => {
                warn!(
                    slot,
                    bytes = format_args!("{:02X?}", actual),
                    "Failed to find name for device"
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Publish the discovery document for every known slot.
    fn announce(&mut self) {
        let slots = self.registry.snapshot();
        if let Err(e) = sink::publish_discovery(&mut self.sink, &self.options.topics, &slots) {
            warn!(error = %e, "Failed to publish discovery document");
        }
    }

    /// Decode one notification frame and forward any resulting transition.
    fn handle_frame(
        &mut self,
        frame: &[u8],
        receiver: &dyn HidChannel,
        responder: &dyn HidChannel,
    ) -> Result<()> {
        let now = self.clock.now();
        let notification = hidpp::decode_notification(frame);
        if notification == Notification::Unrelated {
            trace!(frame = format_args!("{:02X?}", frame), "Discarding unrelated frame");
            return Ok(());
        }

        let step = self.machine.observe(&mut self.registry, notification, now);
        if step.grew {
            info!(size = self.registry.size(), "New device slot, re-announcing");
            self.announce();
        }

        // A failed name read still ends the session, after the transition is out.
        let mut outcome = Ok(());
        if let Some(transition) = step.transition {
            if transition.needs_name {
                outcome = self.resolve_name(
                    transition.slot,
                    receiver,
                    responder,
                    self.options.read_connect_preamble,
                );
            }
            info!(
                slot = transition.slot,
                status = %transition.status,
                "Device status changed"
            );
            if let Err(e) = sink::publish_status(
                &mut self.sink,
                &self.options.topics,
                transition.slot,
                transition.status,
            ) {
                warn!(error = %e, "Failed to publish device status");
            }
        }

        self.control.publish_devices(&self.registry);
        outcome
    }
}
