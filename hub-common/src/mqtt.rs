//! The MQTT message envelope and small serde adapters around it.

use core::fmt;
use std::{fmt::Formatter, ops::Deref, str::Utf8Error, string::FromUtf8Error};

use serde::{de::DeserializeOwned, Serialize};
#[cfg(test)]
use serde::Deserialize;
use thiserror::Error;

/// The retain flag for an outgoing MQTT message.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Retain {
    /// The broker should keep this as the topic's last-value message.
    Retain,

    /// The message is not retained.
    NoRetain,
}

/// The `QoS` level for an MQTT message.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum QoS {
    /// At most once.
    AtMostOnce = 0,

    /// At least once.
    AtLeastOnce = 1,

    /// Exactly once.
    ExactlyOnce = 2,
}

/// A message sent to or received from the broker.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct MqttMessage {
    /// Topic the message was published to / is to be published to.
    pub topic: String,

    /// Raw payload bytes.
    pub payload: Vec<u8>,

    /// Was/is this message retained?
    pub retain: Retain,

    /// QoS of this message.
    pub qos: QoS,
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        None => s,
        Some((idx, _)) => &s[..idx],
    }
}

impl fmt::Debug for MqttMessage {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let payload = String::from_utf8(self.payload.clone())
            .unwrap_or_else(|_| format!("{:?}", self.payload));
        let payload = truncate(&payload, 80);

        f.debug_struct("MqttMessage")
            .field("topic", &self.topic)
            .field("payload", &payload)
            .field("retain", &self.retain)
            .field("qos", &self.qos)
            .finish()
    }
}

impl MqttMessage {
    /// Create a new message from a string payload.
    #[must_use]
    pub fn new(
        topic: impl Into<String>,
        payload: impl Into<String>,
        retain: Retain,
        qos: QoS,
    ) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into().into_bytes(),
            retain,
            qos,
        }
    }

    /// Create a new message by serializing a value to JSON.
    ///
    /// # Errors
    ///
    /// If the value cannot be serialized.
    pub fn from_json(
        topic: impl Into<String>,
        payload: &impl Serialize,
        retain: Retain,
        qos: QoS,
    ) -> Result<Self, serde_json::Error> {
        let payload = serde_json::to_string(payload)?;
        Ok(Self::new(topic, payload, retain, qos))
    }

    /// Return the payload decoded as UTF-8.
    ///
    /// # Errors
    ///
    /// If the payload is not valid UTF-8.
    pub fn payload_as_str(&self) -> Result<&str, Utf8Error> {
        std::str::from_utf8(&self.payload)
    }
}

impl TryFrom<MqttMessage> for String {
    type Error = FromUtf8Error;

    fn try_from(msg: MqttMessage) -> Result<Self, Self::Error> {
        String::from_utf8(msg.payload)
    }
}

/// A message payload parsed as JSON on the way out of a subscription.
pub struct Json<T>(pub T);

impl<T> Json<T> {
    /// Unwrap the inner value.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T: Clone> Clone for Json<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: fmt::Debug> fmt::Debug for Json<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl<T> Deref for Json<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// An error converting an `MqttMessage` payload into a `Json<T>`.
#[derive(Error, Debug)]
pub enum JsonError {
    /// The payload was not valid JSON for the target type.
    #[error("Invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// The payload was not valid UTF-8.
    #[error("Invalid UTF-8: {0}")]
    InvalidUtf8(#[from] Utf8Error),
}

impl<Body: DeserializeOwned> TryFrom<MqttMessage> for Json<Body> {
    type Error = JsonError;

    fn try_from(msg: MqttMessage) -> Result<Self, Self::Error> {
        let payload: &str = msg.payload_as_str()?;
        let value = serde_json::from_str(payload)?;
        Ok(Json(value))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Sample {
        a: i32,
    }

    #[test]
    fn test_string_to_message() {
        let msg = MqttMessage::new("test", "hello", Retain::NoRetain, QoS::AtLeastOnce);
        assert_eq!(msg.topic, "test");
        assert_eq!(msg.payload, b"hello");
        assert_eq!(msg.qos, QoS::AtLeastOnce);
        assert_eq!(msg.retain, Retain::NoRetain);
    }

    #[test]
    fn test_json_parse() {
        let msg = MqttMessage::new(
            "test",
            r#"{"a":1}"#.to_string(),
            Retain::NoRetain,
            QoS::AtLeastOnce,
        );
        let Json(sample): Json<Sample> = msg.try_into().unwrap();
        assert_eq!(sample, Sample { a: 1 });
    }

    #[test]
    fn test_json_parse_invalid() {
        let msg = MqttMessage::new("test", "not json", Retain::NoRetain, QoS::AtLeastOnce);
        let result: Result<Json<Sample>, _> = msg.try_into();
        assert!(result.is_err());
    }
}
