//! Integration tests: exercise the full flow using a simulated receiver.
//!
//! These tests script a complete Unifying receiver session (setup
//! responses, names, and notifications) and run it through the supervisor,
//! checking what reaches the sink and in which order.

#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::connectivity::mock::StepClock;
    use crate::device::DeviceStatus;
    use crate::error::{Error, Result};
    use crate::hidpp::LONG_REPORT_LEN;
    use crate::session::{ReceiverPaths, SessionControl, SessionOptions, SessionState, Supervisor};
    use crate::sink::mock::RecordingSink;
    use crate::transport::mock::MockProvider;
    use crate::transport::{CancelToken, ChannelProvider, HidChannel, HidEndpoint};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::{Duration, Instant};

    const RX: &str = "primary";
    const LONG: &str = "responder";
    const TOPIC_PREFIX: &str = "homeassistant/device/logitech-unify-mqtt/";

    fn ack() -> Vec<u8> {
        vec![0x10, 0xFF, 0x80, 0x00, 0x00, 0x00, 0x00]
    }

    fn count(n: u8) -> Vec<u8> {
        vec![0x10, 0xFF, 0x81, 0x02, 0x00, n, 0x00]
    }

    fn name(s: &str) -> Vec<u8> {
        let mut data = vec![0x11, 0xFF, 0x83, 0xB5, 0x40, s.len() as u8];
        data.extend_from_slice(s.as_bytes());
        data.resize(LONG_REPORT_LEN, 0);
        data
    }

    fn connect(id: u8) -> Vec<u8> {
        vec![0x10, id, 0x41, 0x04, 0xA1, 0x00, 0x00]
    }

    fn disconnect(id: u8) -> Vec<u8> {
        vec![0x10, id, 0x41, 0x04, 0x61, 0x00, 0x00]
    }

    fn options() -> SessionOptions {
        let mut options = SessionOptions::from(&Config::default());
        options.poll_interval = Duration::ZERO;
        options
    }

    fn paths() -> ReceiverPaths {
        ReceiverPaths {
            primary: RX.into(),
            responder: LONG.into(),
        }
    }

    fn locate(endpoint: &HidEndpoint) -> Option<String> {
        Some(if endpoint.usage == 0x0001 { RX } else { LONG }.to_string())
    }

    /// Create a receiver with `names` paired and `notifications` queued after setup.
    fn create_mock_receiver(names: &[&str], notifications: Vec<Vec<u8>>) -> MockProvider {
        let mut provider = MockProvider::new(locate);
        let mut rx = vec![Ok(ack()), Ok(count(names.len() as u8))];
        rx.extend(notifications.into_iter().map(Ok));
        provider.script(RX, rx);
        provider.script(LONG, names.iter().map(|n| Ok(name(n))).collect());
        provider
    }

    fn run_one_session(
        provider: MockProvider,
        offsets_ms: &[u64],
    ) -> Supervisor<MockProvider, RecordingSink, StepClock> {
        let mut sup = Supervisor::with_clock(
            provider,
            RecordingSink::default(),
            StepClock::new(offsets_ms),
            options(),
            SessionControl::new(),
        );
        sup.run_session(&paths());
        sup
    }

    fn status(slot: usize, payload: &str) -> (String, String) {
        (
            format!("{TOPIC_PREFIX}dev{slot}/power_state"),
            payload.to_string(),
        )
    }

    /// Test: names resolve at startup, a connect then quick disconnect reads as powersave.
    #[test]
    fn connect_then_sleep_scenario() {
        let provider = create_mock_receiver(&["Mouse", "Keyboard"], vec![connect(1), disconnect(1)]);
        let sup = run_one_session(provider, &[0, 200]);

        assert_eq!(sup.registry().get(0).name, "Mouse");
        assert_eq!(sup.registry().get(1).name, "Keyboard");
        assert_eq!(
            sup.sink().statuses(),
            vec![status(0, "connected"), status(0, "powersave")]
        );
        assert_eq!(sup.registry().get(0).status, DeviceStatus::Powersave);
    }

    /// Test: the discovery document carries both resolved names.
    #[test]
    fn startup_announcement_lists_names() {
        let provider = create_mock_receiver(&["Mouse", "Keyboard"], vec![]);
        let sup = run_one_session(provider, &[]);

        let (topic, payload) = &sup.sink().published[0];
        assert_eq!(topic, &format!("{TOPIC_PREFIX}config"));
        let doc: serde_json::Value = serde_json::from_str(payload).unwrap();
        assert_eq!(doc["cmps"]["dev0"]["name"], "Mouse");
        assert_eq!(doc["cmps"]["dev1"]["name"], "Keyboard");
    }

    /// Test: powersave boundary through the whole pipeline.
    #[test]
    fn powersave_boundary_end_to_end() {
        for (gap, expected) in [(499, "powersave"), (500, "disconnected"), (2000, "disconnected")] {
            let provider = create_mock_receiver(&["Mouse"], vec![connect(1), disconnect(1)]);
            let sup = run_one_session(provider, &[0, gap]);
            assert_eq!(
                sup.sink().statuses(),
                vec![status(0, "connected"), status(0, expected)],
                "gap {gap}ms"
            );
        }
    }

    /// Test: a device that stays connected past the window then disconnects is disconnected.
    #[test]
    fn long_lived_connection_disconnects() {
        let provider = create_mock_receiver(
            &["Mouse"],
            vec![connect(1), disconnect(1), connect(1), disconnect(1)],
        );
        let sup = run_one_session(provider, &[0, 100, 1_000, 60_000]);
        assert_eq!(
            sup.sink().statuses(),
            vec![
                status(0, "connected"),
                status(0, "powersave"),
                status(0, "connected"),
                status(0, "disconnected"),
            ]
        );
    }

    /// Test: wire id 7 on a full receiver grows the registry and re-announces once, first.
    #[test]
    fn registry_growth_announces_before_transition() {
        let mut provider = MockProvider::new(locate);
        provider.script(RX, vec![Ok(ack()), Ok(count(6)), Ok(connect(7))]);
        // Six names at startup, then the one queried by the connect on the new slot.
        provider.script(
            LONG,
            ["A", "B", "C", "D", "E", "F", "G"]
                .iter()
                .map(|n| Ok(name(n)))
                .collect(),
        );
        let sup = run_one_session(provider, &[0]);

        assert_eq!(sup.registry().size(), 7);
        assert_eq!(sup.registry().get(6).name, "G");
        let published = &sup.sink().published;
        let topics: Vec<&str> = published.iter().map(|(t, _)| t.as_str()).collect();
        let config = format!("{TOPIC_PREFIX}config");
        let dev6 = format!("{TOPIC_PREFIX}dev6/power_state");
        assert_eq!(topics, vec![config.as_str(), config.as_str(), dev6.as_str()]);

        let regrown: serde_json::Value = serde_json::from_str(&published[1].1).unwrap();
        assert_eq!(regrown["cmps"]["dev6"]["name"], "Device 7");
    }

    /// Test: notifications for different devices are forwarded in read order.
    #[test]
    fn transitions_keep_read_order_across_devices() {
        let provider = create_mock_receiver(
            &["Mouse", "Keyboard"],
            vec![connect(2), connect(1), disconnect(2), disconnect(1)],
        );
        let sup = run_one_session(provider, &[0, 10, 20, 3_000]);
        assert_eq!(
            sup.sink().statuses(),
            vec![
                status(1, "connected"),
                status(0, "connected"),
                status(1, "powersave"),
                status(0, "disconnected"),
            ]
        );
    }

    /// Test: both collections behind one OS node, each handle sees every report.
    #[test]
    fn shared_node_still_resolves_names() {
        const NODE: &str = "/dev/hidraw3";
        let every_report = || {
            vec![Ok(ack()), Ok(count(1)), Ok(name("Mouse")), Ok(connect(1))]
        };
        let mut provider = MockProvider::new(|_| Some(NODE.to_string()));
        provider.script(NODE, every_report());
        provider.script(NODE, every_report());
        let mut sup = Supervisor::with_clock(
            provider,
            RecordingSink::default(),
            StepClock::new(&[0]),
            options(),
            SessionControl::new(),
        );

        let found = sup.search().expect("receiver found");
        assert_eq!(found.primary, found.responder);
        sup.run_session(&found);

        assert_eq!(sup.registry().get(0).name, "Mouse");
        assert_eq!(sup.sink().statuses(), vec![status(0, "connected")]);
    }

    /// Test: a fresh session rebuilds the registry from scratch.
    #[test]
    fn registry_rebuilt_per_session() {
        let mut provider = create_mock_receiver(&["Mouse", "Keyboard"], vec![]);
        provider.script(RX, vec![Ok(ack()), Ok(count(1))]);
        provider.script(LONG, vec![Ok(name("Trackball"))]);
        let mut sup = Supervisor::with_clock(
            provider,
            RecordingSink::default(),
            StepClock::new(&[]),
            options(),
            SessionControl::new(),
        );

        sup.run_session(&paths());
        assert_eq!(sup.registry().size(), 2);
        sup.run_session(&paths());
        assert_eq!(sup.registry().size(), 1);
        assert_eq!(sup.registry().get(0).name, "Trackball");
    }

    /// Channel that replays frames, then blocks until cancelled like a real read.
    struct BlockingChannel {
        frames: Mutex<VecDeque<Vec<u8>>>,
        cancel: CancelToken,
    }

    impl HidChannel for BlockingChannel {
        fn read(&self, buf: &mut [u8]) -> Result<usize> {
            if let Some(frame) = self.frames.lock().unwrap().pop_front() {
                let n = frame.len().min(buf.len());
                buf[..n].copy_from_slice(&frame[..n]);
                return Ok(n);
            }
            while !self.cancel.is_cancelled() {
                thread::sleep(Duration::from_millis(2));
            }
            Err(Error::Cancelled)
        }

        fn write(&self, _data: &[u8]) -> Result<()> {
            Ok(())
        }
    }

    /// Receiver with one paired mouse that never sends notifications.
    struct IdleReceiver {
        sessions: Arc<AtomicUsize>,
    }

    impl ChannelProvider for IdleReceiver {
        type Channel = BlockingChannel;

        fn find_path(&mut self, endpoint: &HidEndpoint) -> Option<String> {
            locate(endpoint)
        }

        fn open(&mut self, path: &str, cancel: CancelToken) -> Result<BlockingChannel> {
            let frames = if path == RX {
                self.sessions.fetch_add(1, Ordering::SeqCst);
                vec![ack(), count(1)]
            } else {
                vec![name("Mouse")]
            };
            Ok(BlockingChannel {
                frames: Mutex::new(frames.into()),
                cancel,
            })
        }
    }

    fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            thread::sleep(Duration::from_millis(2));
        }
    }

    /// Test: restart and shutdown from another thread interrupt a blocking read.
    #[test]
    fn control_interrupts_blocking_read() {
        let control = SessionControl::new();
        let sessions = Arc::new(AtomicUsize::new(0));

        let worker_control = control.clone();
        let worker_sessions = Arc::clone(&sessions);
        let worker = thread::spawn(move || {
            let provider = IdleReceiver {
                sessions: worker_sessions,
            };
            let mut sup = Supervisor::new(provider, RecordingSink::default(), options(), worker_control);
            sup.run();
            sup.sink().announcements()
        });

        let mouse_listed = |control: &SessionControl| {
            control.state() == SessionState::Open
                && control.devices().first().is_some_and(|d| d.name == "Mouse")
        };

        wait_until("first session", || mouse_listed(&control));
        control.restart();
        wait_until("second session", || {
            sessions.load(Ordering::SeqCst) == 2 && mouse_listed(&control)
        });
        control.shutdown();

        let announcements = worker.join().expect("worker panicked");
        assert_eq!(control.state(), SessionState::Terminated);
        assert_eq!(sessions.load(Ordering::SeqCst), 2);
        assert_eq!(announcements, 2);
    }
}
