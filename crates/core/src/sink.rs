//! Status sink: topic layout, discovery document, and publishers.
//!
//! Topics follow the Home Assistant device-discovery layout:
//! `<discovery_prefix>/device/<node_id>/config` for the discovery document and
//! `<discovery_prefix>/device/<node_id>/dev<n>/power_state` per slot.

use crate::device::{DeviceSlot, DeviceStatus};
use crate::error::{Error, Result};
use serde_json::{json, Value};
use std::io::Write;
use tracing::info;

/// Home page advertised as the discovery origin.
const ORIGIN_URL: &str = "https://github.com/user/unify-status";

/// Receiver of status publications.
pub trait StatusSink {
    fn publish(&mut self, topic: &str, payload: &str) -> Result<()>;
}

/// Topic builder for one receiver node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    node_id: String,
    prefix: String,
}

impl Topics {
    pub fn new(discovery_prefix: &str, node_id: &str) -> Self {
        Self {
            node_id: node_id.to_string(),
            prefix: format!("{discovery_prefix}/device/{node_id}/"),
        }
    }

    /// Common prefix of every topic, ending in `/`.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Topic carrying the status of a slot.
    pub fn power_state(&self, slot: usize) -> String {
        format!("{}dev{slot}/power_state", self.prefix)
    }

    /// Topic carrying the discovery document.
    pub fn config(&self) -> String {
        format!("{}config", self.prefix)
    }

    /// Discovery document describing every known slot.
    pub fn discovery_document(&self, slots: &[DeviceSlot]) -> Value {
        let components: serde_json::Map<String, Value> = slots
            .iter()
            .enumerate()
            .map(|(i, slot)| {
                let id = format!("dev{i}");
                let component = json!({
                    "p": "sensor",
                    "state_topic": self.power_state(i),
                    "unique_id": id,
                    "name": slot.display_name(i),
                });
                (id, component)
            })
            .collect();

        json!({
            "dev": { "ids": self.node_id, "name": "Logitech Unifying Receiver" },
            "o": { "name": self.node_id, "url": ORIGIN_URL },
            "qos": 0,
            "cmps": components,
        })
    }
}

/// Publish the status of one slot.
pub fn publish_status(
    sink: &mut dyn StatusSink,
    topics: &Topics,
    slot: usize,
    status: DeviceStatus,
) -> Result<()> {
    sink.publish(&topics.power_state(slot), status.as_str())
}

/// Publish the discovery document for `slots`.
pub fn publish_discovery(
    sink: &mut dyn StatusSink,
    topics: &Topics,
    slots: &[DeviceSlot],
) -> Result<()> {
    let doc = topics.discovery_document(slots);
    sink.publish(&topics.config(), &doc.to_string())
}

/// Sink that only logs publications.
#[derive(Debug, Default)]
pub struct LogSink;

impl StatusSink for LogSink {
    fn publish(&mut self, topic: &str, payload: &str) -> Result<()> {
        info!(topic, payload, "Publish");
        Ok(())
    }
}

/// Sink writing one `{"topic": .., "payload": ..}` object per line.
pub struct JsonLinesSink<W: Write> {
    out: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> StatusSink for JsonLinesSink<W> {
    fn publish(&mut self, topic: &str, payload: &str) -> Result<()> {
        let line = json!({ "topic": topic, "payload": payload });
        writeln!(self.out, "{line}")
            .and_then(|_| self.out.flush())
            .map_err(|e| Error::Sink(format!("write: {e}")))
    }
}
