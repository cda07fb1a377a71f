//! Fan-out channels used to decouple domain objects from the MQTT client.
//!
//! Trimmed from the teacher's `pipes` module: only the stateless variant is
//! kept (the Hub/Node change-detection that the teacher's stateful pipe
//! re-derives from `Eq` comparison is domain logic here — spec I4's "publish
//! only on `(state, error_code)` change" — so it is implemented directly on
//! `Node` rather than through a generic pipe).

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod stateless;

/// Size of all pipes.
pub const PIPE_SIZE: usize = 16;

async fn try_receive<T: Send>(rx: &mut Option<mpsc::Receiver<T>>) -> Option<Option<T>> {
    match rx {
        Some(rx) => Some(rx.recv().await),
        None => None,
    }
}

/// Something went wrong in a `Receiver`.
#[derive(Error, Debug)]
pub enum RecvError {
    /// The pipe was closed.
    #[error("The pipe was closed")]
    Closed,
}

/// Allow subscribing to a pipe.
#[async_trait]
pub trait Subscriber<T> {
    /// The type of the subscription.
    type SubscriptionType: Subscription<T> + Send + 'static;

    /// Subscribe to a pipe.
    async fn subscribe(&self) -> Self::SubscriptionType;
}

/// A subscription to a pipe.
#[async_trait]
pub trait Subscription<T> {
    /// Wait for the next value.
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Closed` if the pipe is closed.
    async fn recv(&mut self) -> Result<T, RecvError>;
}
