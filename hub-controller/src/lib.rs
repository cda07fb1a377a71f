//! The Edge Hub Controller: per-hub state machines, load management, and
//! hardware abstraction for wireless EV charging nodes.
#![warn(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod config;
pub mod dlm;
pub mod hardware;
pub mod hub;
pub mod intake;
pub mod logging;
pub mod node;
pub mod pipes;
pub mod policy;
pub mod publish;
pub mod services;
pub mod shutdown;
pub mod vehicle_tap;

use std::future::Future;

use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Spawn a task and abort the process if it panics.
///
/// A loop that's supposed to run for the life of the hub (DLM, telemetry,
/// MQTT client) dying silently is worse than the process exiting loudly.
pub fn spawn<T>(future: T) -> JoinHandle<()>
where
    T: Future + Send + 'static,
    T::Output: Send + 'static,
{
    let task = tokio::spawn(future);

    tokio::spawn(async move {
        match task.await {
            Ok(_) => debug!("task terminated normally"),
            Err(err) => {
                error!("task aborted with error: {err}");
                std::process::exit(1);
            }
        }
    })
}
