//! Stateless receiver.

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::error;

use crate::pipes::{RecvError, Subscriber, Subscription as SubscriptionTrait};

type SubscribeMessage<T> = broadcast::Receiver<T>;

pub(in crate::pipes) enum ReceiveMessage<T> {
    Subscribe(oneshot::Sender<SubscribeMessage<T>>),
}

/// Receive values from a pipe.
#[derive(Clone)]
pub struct Receiver<T> {
    pub(in crate::pipes) name: String,
    pub(in crate::pipes) tx: mpsc::Sender<ReceiveMessage<T>>,
}

#[async_trait]
impl<T> Subscriber<T> for Receiver<T>
where
    T: Send + Clone + 'static,
{
    type SubscriptionType = Subscription<T>;

    async fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = oneshot::channel();
        let msg = ReceiveMessage::Subscribe(tx);
        if let Err(err) = self.tx.send(msg).await {
            error!("{}: subscribe/send failed: {err}", self.name);
            return Subscription::null(self.tx.clone());
        }
        rx.await.map_or_else(
            |_| {
                error!("{}: subscribe/await failed", self.name);
                Subscription::null(self.tx.clone())
            },
            |rx| Subscription {
                rx,
                _tx: self.tx.clone(),
            },
        )
    }
}

/// A subscription to receive data from a pipe.
pub struct Subscription<T> {
    rx: broadcast::Receiver<T>,
    _tx: mpsc::Sender<ReceiveMessage<T>>,
}

impl<T> Subscription<T>
where
    T: Clone,
{
    fn null(tx: mpsc::Sender<ReceiveMessage<T>>) -> Self {
        let (_tx, rx) = broadcast::channel(1);
        Self { rx, _tx: tx }
    }
}

#[async_trait]
impl<T> SubscriptionTrait<T> for Subscription<T>
where
    T: Send + Clone,
{
    async fn recv(&mut self) -> Result<T, RecvError> {
        loop {
            match self.rx.recv().await {
                Ok(v) => return Ok(v),
                Err(broadcast::error::RecvError::Closed) => return Err(RecvError::Closed),
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    error!("recv failed: the pipe was lagged");
                }
            }
        }
    }
}
