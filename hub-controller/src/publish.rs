//! Publisher Listener abstraction (spec §4.4, design note "listener/observer
//! pattern → typed callback or channel").
//!
//! A `Node`/`HubDevice` never touches `rumqttc` or a topic string directly.
//! Each gets a `Listener<T>` bound to one topic/QoS/retain triple; calling
//! `publish` serializes the value and hands it to `Mqtt`, which is itself
//! backed by a channel drained by the dedicated `MqttClient` task — so the
//! "channel of tagged publish-events drained by a publisher task" the design
//! note describes is the `Mqtt` handle itself, not a second layer on top of
//! it.

use hub_common::mqtt::{QoS as MqttQoS, Retain};
use serde::Serialize;
use tracing::error;

use crate::services::mqtt::Mqtt;

/// Publishes one topic's typed payload.
#[derive(Clone)]
pub struct Listener {
    topic: String,
    qos: MqttQoS,
    retain: Retain,
    mqtt: Mqtt,
}

impl Listener {
    /// Bind a listener to `topic`, publishing at the given QoS/retain.
    #[must_use]
    pub fn new(mqtt: Mqtt, topic: String, qos: MqttQoS, retain: Retain) -> Self {
        Self {
            topic,
            qos,
            retain,
            mqtt,
        }
    }

    /// Serialize `value` to JSON and publish it.
    ///
    /// Per the source's own `_create_listener` closure (spec §9): a publish
    /// failure is logged, never propagated — the caller (a node transition,
    /// a telemetry tick) must not fail because the broker write did.
    pub fn publish(&self, value: &impl Serialize) {
        match hub_common::mqtt::MqttMessage::from_json(
            self.topic.clone(),
            value,
            self.retain,
            self.qos,
        ) {
            Ok(msg) => self.mqtt.publish(msg),
            Err(err) => error!("{}: failed to serialize payload: {err}", self.topic),
        }
    }
}
