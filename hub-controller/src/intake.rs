//! Request Intake (spec §4.6): subscribes to vehicle charging requests and
//! binds them to nodes.

use std::sync::Arc;

use hub_common::mqtt::{Json, MqttMessage};
use hub_common::model::VehicleRequest;
use hub_common::topics;
use tracing::{info, warn};

use crate::dlm::DlmService;
use crate::hub::HubDevice;
use crate::pipes::{Subscriber, Subscription};
use crate::services::mqtt::Mqtt;
use crate::shutdown::Shutdown;
use crate::vehicle_tap;

/// Subscribe to `iot/hubs/<hub_id>/requests` and run request intake until
/// shutdown (spec §4.6 steps 1-6).
pub async fn run(mqtt: Mqtt, hub: Arc<HubDevice>, dlm_service: Arc<DlmService>, shutdown: Shutdown) {
    let topic = topics::hub_requests(&hub.hub_id);
    let receiver = match mqtt.subscribe(&topic).await {
        Ok(receiver) => receiver,
        Err(err) => {
            tracing::error!("{}: failed to subscribe to {topic}: {err}", hub.hub_id);
            return;
        }
    };

    let mut subscription = receiver.subscribe().await;

    loop {
        tokio::select! {
            result = subscription.recv() => {
                let Ok(msg) = result else {
                    info!("{}: request intake subscription closed", hub.hub_id);
                    break;
                };
                handle_message(&mqtt, &hub, &dlm_service, msg).await;
            }
            () = shutdown.cancelled() => {
                info!("{}: request intake stopping", hub.hub_id);
                break;
            }
        }
    }
}

async fn handle_message(mqtt: &Mqtt, hub: &Arc<HubDevice>, dlm_service: &Arc<DlmService>, msg: MqttMessage) {
    let request: VehicleRequest = match parse(&msg) {
        Some(request) => request,
        None => {
            warn!("{}: malformed VehicleRequest, dropping", hub.hub_id);
            return;
        }
    };

    // Step 1: look up the target node.
    let Some(node) = hub.node(&request.node_id) else {
        warn!(
            "{}: request for unknown node {}, dropping",
            hub.hub_id, request.node_id
        );
        return;
    };

    // Step 2: assign vehicle fields.
    node.bind_vehicle(request.vehicle_id.clone(), request.soc_percent)
        .await;

    // Step 3: force a sensor read; reject if not physically occupied.
    if !node.force_sensor_read().await {
        warn!(
            "{}: node {} not occupied, rejecting request from {}",
            hub.hub_id, request.node_id, request.vehicle_id
        );
        return;
    }

    // Step 4: transition to charging.
    if !node.start_charging().await {
        warn!(
            "{}: node {} already charging, rejecting request from {}",
            hub.hub_id, request.node_id, request.vehicle_id
        );
        return;
    }

    // Step 5: subscribe to the vehicle's telemetry to detect completion.
    vehicle_tap::spawn(
        mqtt.clone(),
        Arc::clone(node),
        request.vehicle_id.clone(),
    )
    .await;

    // Step 6: synchronously run a DLM pass so the new allocation publishes
    // before this call returns, not whenever the periodic loop next ticks.
    dlm_service.apply_now().await;
}

fn parse(msg: &MqttMessage) -> Option<VehicleRequest> {
    let Json(request) = Json::<VehicleRequest>::try_from(msg.clone()).ok()?;
    Some(request)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use std::time::Duration;

    use hub_common::mqtt::{QoS, Retain};
    use hub_common::model::GeoLocation;

    use super::*;
    use crate::dlm::DlmService;
    use crate::hardware::sim::{SimActuator, SimPowerMeter, SimProximitySensor};
    use crate::hub::HubDevice;
    use crate::node::Node;
    use crate::policy::PolicyKind;
    use crate::publish::Listener;
    use crate::services::mqtt::MqttClient;

    #[test]
    fn test_parse_rejects_malformed_json() {
        let msg = MqttMessage::new("t", "not json", Retain::NoRetain, QoS::AtLeastOnce);
        assert!(parse(&msg).is_none());
    }

    #[test]
    fn test_parse_accepts_valid_request() {
        let msg = MqttMessage::from_json(
            "t",
            &VehicleRequest {
                vehicle_id: "V1".into(),
                node_id: "A".into(),
                soc_percent: 30,
                timestamp: hub_common::datetime::utc_now(),
            },
            Retain::NoRetain,
            QoS::AtLeastOnce,
        )
        .unwrap();
        let request = parse(&msg).unwrap();
        assert_eq!(request.vehicle_id, "V1");
    }

    /// Exercises the real production path (not the hand-wired scenarios in
    /// `tests/end_to_end.rs`): `handle_message`'s step 6 must have already
    /// applied the DLM allocation by the time it returns, not merely queued
    /// one for a periodic loop to pick up later.
    #[tokio::test]
    async fn test_handle_message_applies_dlm_allocation_synchronously() {
        let (client, mqtt) = MqttClient::new();
        tokio::spawn(client.do_loop("127.0.0.1", 1, "test-client", None));

        let node_a = Node::new(
            "A".to_string(),
            "hub-1".into(),
            None,
            22.0,
            true,
            Box::new(SimPowerMeter),
            Box::new(SimProximitySensor),
            Box::new(SimActuator::default()),
            Listener::new(mqtt.clone(), "t/A/info".into(), QoS::AtLeastOnce, Retain::Retain),
            Listener::new(mqtt.clone(), "t/A/status".into(), QoS::AtLeastOnce, Retain::NoRetain),
            Listener::new(mqtt.clone(), "t/A/telemetry".into(), QoS::AtMostOnce, Retain::NoRetain),
        );

        let hub = std::sync::Arc::new(HubDevice::new(
            "hub-1".into(),
            GeoLocation {
                latitude: 0.0,
                longitude: 0.0,
                altitude: 0.0,
            },
            60.0,
            "1.0.0".into(),
            "10.0.0.1".into(),
            Listener::new(mqtt.clone(), "t/hub/info".into(), QoS::AtLeastOnce, Retain::Retain),
            Listener::new(mqtt.clone(), "t/hub/status".into(), QoS::AtLeastOnce, Retain::NoRetain),
            vec![node_a.clone()],
        ));

        let events = Listener::new(mqtt.clone(), "t/dlm/events".into(), QoS::AtLeastOnce, Retain::NoRetain);
        let dlm_service = DlmService::new(
            hub.hub_id.clone(),
            hub.nodes.clone(),
            hub.max_grid_capacity_kw(),
            PolicyKind::EqualSharing,
            Duration::from_secs(999),
            events,
        );

        let msg = MqttMessage::from_json(
            "t",
            &VehicleRequest {
                vehicle_id: "V1".into(),
                node_id: "A".into(),
                soc_percent: 30,
                timestamp: hub_common::datetime::utc_now(),
            },
            Retain::NoRetain,
            QoS::AtLeastOnce,
        )
        .unwrap();

        handle_message(&mqtt, &hub, &dlm_service, msg).await;

        let (_, limit, ..) = node_a.snapshot_fields().await;
        assert!(
            (limit - 22.0).abs() < 0.001,
            "step 6 must synchronously apply the DLM allocation before handle_message returns"
        );
    }
}
