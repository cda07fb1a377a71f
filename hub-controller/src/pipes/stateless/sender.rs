//! Stateless sender.

use tokio::sync::mpsc;
use tracing::error;

pub(super) enum SendMessage<T> {
    Set(T),
}

/// Send a value to a pipe.
#[derive(Clone)]
pub struct Sender<T> {
    pub(super) name: String,
    pub(super) tx: mpsc::Sender<SendMessage<T>>,
}

impl<T> Sender<T> {
    /// Send data to the pipe, logging (not propagating) if the buffer is full.
    pub fn try_send(&self, data: T) {
        let msg = SendMessage::Set(data);
        if let Err(err) = self.tx.try_send(msg) {
            error!("{}: send failed: {err}", self.name);
        }
    }

    /// Completes when the pipe is closed.
    pub async fn closed(&self)
    where
        T: Send,
    {
        self.tx.closed().await;
    }
}
