//! Stateless pipes broadcast every value sent, without change-detection.

pub mod receiver;
pub mod sender;

pub use receiver::{Receiver, Subscription};
pub use sender::Sender;

use tokio::select;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use super::{try_receive, PIPE_SIZE};
use crate::spawn;
pub(super) use receiver::ReceiveMessage;
use sender::SendMessage;

/// Create a stateless pipe: everything sent is broadcast to every subscriber.
#[must_use]
pub fn create_pipe<T>(name: impl Into<String>) -> (Sender<T>, Receiver<T>)
where
    T: Clone + Send + 'static,
{
    let (send_tx, mut send_rx) = mpsc::channel::<SendMessage<T>>(PIPE_SIZE);
    let (receive_tx, receive_rx) = mpsc::channel::<ReceiveMessage<T>>(PIPE_SIZE);
    let (out_tx, out_rx) = broadcast::channel::<T>(PIPE_SIZE);
    drop(out_rx);

    let name = name.into();
    let sender = Sender {
        tx: send_tx,
        name: name.clone(),
    };
    let receiver = Receiver {
        tx: receive_tx,
        name: name.clone(),
    };

    spawn(async move {
        let mut receive_rx = Some(receive_rx);

        loop {
            select! {
                Some(msg) = send_rx.recv() => {
                    match msg {
                        SendMessage::Set(data) => {
                            // Not an error if there are no subscribers.
                            let _ = out_tx.send(data);
                        }
                    }
                }
                Some(msg) = try_receive(&mut receive_rx) => {
                    match msg {
                        Some(ReceiveMessage::Subscribe(tx)) => {
                            let rx = out_tx.subscribe();
                            if tx.send(rx).is_err() {
                                debug!("{name}: subscribe send failed, subscriber already gone");
                            }
                        }
                        None => {
                            debug!("{name}: command channel closed");
                            receive_rx = None;
                        }
                    }
                }
                else => {
                    debug!("{name}: all inputs closed");
                    break;
                }
            }

            if matches!((&receive_rx, out_tx.receiver_count()), (None, 0)) {
                debug!("{name}: receiver closed and no subscribers left");
                break;
            }
        }
    });

    (sender, receiver)
}
