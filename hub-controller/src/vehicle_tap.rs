//! Vehicle-Telemetry Tap (spec §4.7): one subscription per active charging
//! session, used to detect charging completion.
//!
//! Spawned with plain `tokio::spawn`, not the monitored `crate::spawn`: this
//! task is routinely and intentionally cancelled (session end, shutdown),
//! so an abort here must not be mistaken for a crash.

use std::sync::Arc;

use hub_common::mqtt::{Json, MqttMessage};
use hub_common::model::VehicleTelemetry;
use hub_common::topics;
use tracing::{info, warn};

use crate::node::Node;
use crate::pipes::{Subscriber, Subscription};
use crate::services::mqtt::Mqtt;

/// Subscribe to `vehicle_id`'s telemetry on behalf of `node` and track the
/// resulting task on the node so it can be aborted on session end or
/// shutdown.
pub async fn spawn(mqtt: Mqtt, node: Arc<Node>, vehicle_id: String) {
    let topic = topics::vehicle_telemetry(&vehicle_id);
    let receiver = match mqtt.subscribe(&topic).await {
        Ok(receiver) => receiver,
        Err(err) => {
            warn!("{}: failed to subscribe to {topic}: {err}", node.node_id);
            return;
        }
    };

    let handle = tokio::spawn(run(receiver, node.clone(), vehicle_id));
    node.set_vehicle_tap(handle).await;
}

async fn run(receiver: crate::pipes::stateless::Receiver<MqttMessage>, node: Arc<Node>, vehicle_id: String) {
    let mut subscription = receiver.subscribe().await;

    loop {
        let Ok(msg) = subscription.recv().await else {
            info!("{}: vehicle telemetry subscription closed", node.node_id);
            break;
        };

        if !node.is_charging_vehicle(&vehicle_id).await {
            info!(
                "{}: session for {vehicle_id} ended elsewhere, tap exiting",
                node.node_id
            );
            break;
        }

        let Some(telemetry) = parse(&msg) else {
            warn!("{}: malformed VehicleTelemetry, dropping", node.node_id);
            continue;
        };

        node.update_vehicle_soc(telemetry.battery_level).await;

        if !telemetry.is_charging {
            node.finish_charging().await;
            break;
        }
    }
}

fn parse(msg: &MqttMessage) -> Option<VehicleTelemetry> {
    let Json(telemetry) = Json::<VehicleTelemetry>::try_from(msg.clone()).ok()?;
    Some(telemetry)
}
