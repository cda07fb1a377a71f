//! Services: the MQTT broker client.

pub mod mqtt;
