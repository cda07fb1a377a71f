//! The MQTT broker client: `Mqtt`/`MqttClient` split matching the teacher's
//! `services/mqtt/mod.rs`, adapted to `hub_common::mqtt::MqttMessage` (the
//! newer, `Vec<u8>`-payload generation of that type) and without TLS/auth,
//! since the pub/sub fabric's own authentication is explicitly out of scope
//! (spec §1 Non-goals).

use std::collections::HashMap;
use std::time::Duration;

use hub_common::mqtt::{MqttMessage, QoS, Retain};
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, Outgoing};
use thiserror::Error;
use tokio::select;
use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep;
use tracing::{debug, error, info};

use crate::pipes::stateless::{self, Receiver, Sender};
use crate::pipes::PIPE_SIZE;

const fn qos_to_rumqttc(qos: QoS) -> rumqttc::QoS {
    match qos {
        QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

const fn qos_from_rumqttc(qos: rumqttc::QoS) -> QoS {
    match qos {
        rumqttc::QoS::AtMostOnce => QoS::AtMostOnce,
        rumqttc::QoS::AtLeastOnce => QoS::AtLeastOnce,
        rumqttc::QoS::ExactlyOnce => QoS::ExactlyOnce,
    }
}

fn retain_from_bool(retain: bool) -> Retain {
    if retain {
        Retain::Retain
    } else {
        Retain::NoRetain
    }
}

/// An error subscribing to a topic.
#[derive(Error, Debug)]
pub enum SubscribeError {
    /// The command could not be sent to the client task.
    #[error("send error")]
    Send,

    /// The client task dropped the reply channel.
    #[error("receive error: {0}")]
    Receive(#[from] oneshot::error::RecvError),
}

enum MqttCommand {
    Publish(MqttMessage),
    Subscribe(String, oneshot::Sender<Receiver<MqttMessage>>),
}

/// A handle for publishing to, and subscribing on, the broker connection
/// owned by the paired `MqttClient`.
#[derive(Clone)]
pub struct Mqtt(mpsc::Sender<MqttCommand>);

impl Mqtt {
    /// Publish a message. Fire-and-forget: failures are logged by the
    /// client loop, never returned here (spec §7 "transient broker
    /// failures").
    pub fn publish(&self, msg: MqttMessage) {
        if let Err(err) = self.0.try_send(MqttCommand::Publish(msg)) {
            error!("mqtt publish dropped, command channel full: {err}");
        }
    }

    /// Subscribe to a topic, receiving every future message for it.
    ///
    /// # Errors
    ///
    /// If the client task is not running.
    pub async fn subscribe(&self, topic: &str) -> Result<Receiver<MqttMessage>, SubscribeError> {
        let (tx, rx) = oneshot::channel();
        self.0
            .send(MqttCommand::Subscribe(topic.to_string(), tx))
            .await
            .map_err(|_| SubscribeError::Send)?;
        Ok(rx.await?)
    }
}

/// The half of the client that owns the broker connection.
pub struct MqttClient {
    rx: mpsc::Receiver<MqttCommand>,
}

impl MqttClient {
    /// Create a new, unconnected client and its `Mqtt` handle.
    #[must_use]
    pub fn new() -> (Self, Mqtt) {
        let (tx, rx) = mpsc::channel(PIPE_SIZE);
        (Self { rx }, Mqtt(tx))
    }

    /// Connect to the broker and run the client loop. Never returns under
    /// normal operation; runtime broker errors are logged and the loop
    /// keeps going (spec §7). `connected` fires once, on the first
    /// `ConnAck`, so the caller can treat "no connack within N seconds" as
    /// the startup broker-connect failure (spec §6 exit code 1).
    pub async fn do_loop(
        self,
        host: &str,
        port: u16,
        client_id: &str,
        mut connected: Option<oneshot::Sender<()>>,
    ) {
        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(Duration::from_secs(30));

        let (client, mut event_loop) = AsyncClient::new(options, PIPE_SIZE);
        let mut rx = self.rx;
        let mut subscriptions: HashMap<String, (Sender<MqttMessage>, Receiver<MqttMessage>)> =
            HashMap::new();

        loop {
            select! {
                event = event_loop.poll() => {
                    match event {
                        Ok(Event::Incoming(Incoming::Publish(p))) => {
                            let msg = MqttMessage {
                                topic: p.topic.clone(),
                                payload: p.payload.to_vec(),
                                retain: retain_from_bool(p.retain),
                                qos: qos_from_rumqttc(p.qos),
                            };
                            if let Some((sender, _)) = subscriptions.get(&p.topic) {
                                sender.try_send(msg);
                            }
                        }
                        Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                            if let Some(tx) = connected.take() {
                                let _ = tx.send(());
                            }
                            info!("mqtt connected, resubscribing {} topics", subscriptions.len());
                            for topic in subscriptions.keys() {
                                if let Err(err) = client.try_subscribe(topic, rumqttc::QoS::ExactlyOnce) {
                                    error!("mqtt resubscribe to {topic} failed: {err}");
                                }
                            }
                        }
                        Ok(Event::Outgoing(Outgoing::Publish(id))) => {
                            debug!("mqtt published packet {id}");
                        }
                        Ok(_) => {}
                        Err(err) => {
                            error!("mqtt connection error: {err}");
                            sleep(Duration::from_secs(5)).await;
                        }
                    }
                }
                Some(command) = rx.recv() => {
                    match command {
                        MqttCommand::Publish(msg) => {
                            info!("mqtt out: {} (retain={:?})", msg.topic, msg.retain);
                            let retain = matches!(msg.retain, Retain::Retain);
                            if let Err(err) = client
                                .try_publish(&msg.topic, qos_to_rumqttc(msg.qos), retain, msg.payload)
                            {
                                error!("mqtt publish failed: {err}");
                            }
                        }
                        MqttCommand::Subscribe(topic, reply) => {
                            let receiver = subscribe_topic(&client, &mut subscriptions, &topic);
                            let _ = reply.send(receiver);
                        }
                    }
                }
                else => break,
            }
        }
    }
}

impl Default for MqttClient {
    fn default() -> Self {
        Self::new().0
    }
}

fn subscribe_topic(
    client: &AsyncClient,
    subscriptions: &mut HashMap<String, (Sender<MqttMessage>, Receiver<MqttMessage>)>,
    topic: &str,
) -> Receiver<MqttMessage> {
    if let Some((_, rx)) = subscriptions.get(topic) {
        return rx.clone();
    }

    let (tx, rx) = stateless::create_pipe(format!("mqtt:{topic}"));
    info!("mqtt subscribing to {topic}");
    if let Err(err) = client.try_subscribe(topic, rumqttc::QoS::ExactlyOnce) {
        error!("mqtt subscribe to {topic} failed: {err}");
    }
    subscriptions.insert(topic.to_string(), (tx, rx.clone()));
    rx
}
