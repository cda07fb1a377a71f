//! Wire types shared between the edge hub controller and anything that talks
//! to it over the pub/sub fabric: the MQTT message envelope, the hub/node/DLM
//! JSON payloads, and topic helpers.
//!
//! This crate has no async runtime dependency; it is pure data + serde, so it
//! can be reused by tests, tools, or a future second consumer without pulling
//! in tokio.
#![warn(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod datetime;
pub mod model;
pub mod mqtt;
pub mod topics;
