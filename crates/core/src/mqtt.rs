//! MQTT broker sink.
//!
//! Publications go out at QoS 0 and are never retained. The client's network
//! event loop runs on its own thread and reconnects on its own, so a broker
//! outage only costs the publications made while it lasts.

use crate::config::MqttConfig;
use crate::error::{Error, Result};
use crate::sink::StatusSink;
use rumqttc::{Client, Connection, Event, MqttOptions, Packet, QoS};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Port used when the broker address does not name one.
pub const DEFAULT_PORT: u16 = 1883;

/// Outgoing requests buffered while the event loop is busy or reconnecting.
const REQUEST_CAPACITY: usize = 32;

/// Pause between reconnect attempts.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Split a broker address such as `tcp://host:1883` into host and port.
///
/// The scheme is optional; `tcp` and `mqtt` are accepted.
pub fn parse_address(address: &str) -> Result<(String, u16)> {
    let rest = match address.split_once("://") {
        Some(("tcp" | "mqtt", rest)) => rest,
        Some((scheme, _)) => {
            return Err(Error::Config(format!("unsupported MQTT scheme '{scheme}'")));
        }
        None => address,
    };
    let rest = rest.trim_end_matches('/');
    if rest.is_empty() {
        return Err(Error::Config("MQTT address is empty".to_string()));
    }

    match rest.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse()
                .map_err(|_| Error::Config(format!("invalid MQTT port in '{address}'")))?;
            Ok((host.to_string(), port))
        }
        None => Ok((rest.to_string(), DEFAULT_PORT)),
    }
}

/// Sink publishing to an MQTT broker.
pub struct MqttSink {
    client: Client,
}

impl MqttSink {
    /// Start a client for `config`, identifying as `client_id`.
    ///
    /// Returns once the event loop thread is running; the broker connection
    /// itself is established in the background.
    pub fn connect(config: &MqttConfig, client_id: &str) -> Result<Self> {
        let (host, port) = parse_address(&config.address)?;
        let mut options = MqttOptions::new(client_id, host.clone(), port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
        if !config.username.is_empty() {
            options.set_credentials(config.username.clone(), config.password.clone());
        }

        let (client, connection) = Client::new(options, REQUEST_CAPACITY);
        thread::Builder::new()
            .name("mqtt".into())
            .spawn(move || drive(connection))
            .map_err(|e| Error::Sink(format!("spawn MQTT event loop: {e}")))?;

        info!(%host, port, client_id, "MQTT client started");
        Ok(Self { client })
    }
}

/// Run the client's event loop until the client is dropped.
fn drive(mut connection: Connection) {
    for event in connection.iter() {
        match event {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                info!(code = ?ack.code, "Connected to MQTT broker");
            }
            Ok(event) => trace!(?event, "MQTT event"),
            Err(e) => {
                warn!(error = %e, "MQTT connection failed, retrying");
                thread::sleep(RECONNECT_DELAY);
            }
        }
    }
    debug!("MQTT event loop stopped");
}

impl StatusSink for MqttSink {
    fn publish(&mut self, topic: &str, payload: &str) -> Result<()> {
        trace!(topic, payload, "MQTT publish");
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload.as_bytes().to_vec())
            .map_err(|e| Error::Sink(format!("publish {topic}: {e}")))
    }
}

impl Drop for MqttSink {
    fn drop(&mut self) {
        if let Err(e) = self.client.try_disconnect() {
            debug!(error = %e, "MQTT disconnect not sent");
        }
    }
}
