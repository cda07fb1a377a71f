//! Process entry point: load configuration, wire the hub and its nodes,
//! connect to the broker, and run until signalled to stop (spec §5, §6).

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use hub_common::mqtt::{QoS as MqttQoS, Retain};
use hub_common::topics;
use hub_controller::config::{Config, Environment, NodeConfig};
use hub_controller::dlm::DlmService;
use hub_controller::hardware::serial::{SerialActuator, SerialBridge, SerialPowerMeter, SerialProximitySensor};
use hub_controller::hardware::sim::{SimActuator, SimPowerMeter, SimProximitySensor};
use hub_controller::hardware::{Actuator, PowerMeter, ProximitySensor};
use hub_controller::hub::HubDevice;
use hub_controller::node::{self, Node};
use hub_controller::publish::Listener;
use hub_controller::services::mqtt::{Mqtt, MqttClient};
use hub_controller::shutdown::Shutdown;
use hub_controller::{intake, logging};
use tokio::sync::oneshot;
use tracing::{error, info};

/// Per-node telemetry tick period (spec §4.2 "default 2.0 s").
const TELEMETRY_INTERVAL: Duration = Duration::from_secs(2);

/// How long to wait for the broker's first `ConnAck` before treating startup
/// as failed (spec §6, exit code 1).
const BROKER_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// DLM loop shutdown grace period (spec §5 step 1).
const DLM_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-node telemetry loop shutdown grace period (spec §5 step 2).
const TELEMETRY_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    logging::init();

    let config = match load_config() {
        Ok(config) => config,
        Err(err) => {
            error!("configuration error: {err:#}");
            std::process::exit(2);
        }
    };

    let (client, mqtt) = MqttClient::new();
    let (connected_tx, connected_rx) = oneshot::channel();
    let (mqtt_host, mqtt_port, mqtt_client_id) = (
        config.mqtt.host.clone(),
        config.mqtt.port,
        config.mqtt.client_id.clone(),
    );
    hub_controller::spawn(async move {
        client
            .do_loop(&mqtt_host, mqtt_port, &mqtt_client_id, Some(connected_tx))
            .await;
    });

    if tokio::time::timeout(BROKER_CONNECT_TIMEOUT, connected_rx)
        .await
        .is_err()
    {
        error!("failed to connect to broker at {}:{} within {BROKER_CONNECT_TIMEOUT:?}", config.mqtt.host, config.mqtt.port);
        std::process::exit(1);
    }
    info!("connected to broker at {}:{}", config.mqtt.host, config.mqtt.port);

    let shutdown = Shutdown::new();
    let hub = build_hub(&config, mqtt.clone());

    let dlm_interval = Duration::from_secs_f64(config.dlm_interval_s);
    let events_listener = Listener::new(
        mqtt.clone(),
        topics::dlm_events(&hub.hub_id),
        MqttQoS::AtLeastOnce,
        Retain::NoRetain,
    );
    let dlm_service = DlmService::new(
        hub.hub_id.clone(),
        hub.nodes.clone(),
        hub.max_grid_capacity_kw(),
        config.policy,
        dlm_interval,
        events_listener,
    );
    let dlm_handle = hub_controller::dlm::spawn_loop(dlm_service.clone(), shutdown.clone());

    let telemetry_handles: Vec<_> = hub
        .nodes
        .iter()
        .map(|node| node::spawn_telemetry_loop(node.clone(), TELEMETRY_INTERVAL, shutdown.clone()))
        .collect();

    hub_controller::spawn(intake::run(
        mqtt.clone(),
        hub.clone(),
        dlm_service,
        shutdown.clone(),
    ));

    hub.start().await;
    info!("{}: hub running with {} node(s)", hub.hub_id, hub.nodes.len());

    if tokio::signal::ctrl_c().await.is_err() {
        error!("failed to install ctrl-c handler, shutting down immediately");
    }

    info!("{}: shutdown signal received", hub.hub_id);
    shutdown.trigger();

    // Stop sequence (spec §5): DLM loop joined (5s timeout), then per-node
    // telemetry loops, then the hub goes offline with a final status.
    if tokio::time::timeout(DLM_SHUTDOWN_TIMEOUT, dlm_handle).await.is_err() {
        error!("{}: dlm loop did not stop within {DLM_SHUTDOWN_TIMEOUT:?}, abandoning it", hub.hub_id);
    }
    for handle in telemetry_handles {
        if tokio::time::timeout(TELEMETRY_SHUTDOWN_TIMEOUT, handle)
            .await
            .is_err()
        {
            error!(
                "{}: telemetry loop did not stop within {TELEMETRY_SHUTDOWN_TIMEOUT:?}, abandoning it",
                hub.hub_id
            );
        }
    }

    hub.stop().await;
    info!("{}: shutdown complete", hub.hub_id);
}

fn load_config() -> anyhow::Result<Config> {
    let env = Environment::load().context("CONFIG_FILE not set")?;
    env.config().context("failed to parse config file")
}

fn build_hub(config: &Config, mqtt: Mqtt) -> Arc<HubDevice> {
    let hub_id = config.hub.hub_id.clone();

    let nodes = config
        .nodes
        .iter()
        .map(|node_config| build_node(&hub_id, node_config, mqtt.clone()))
        .collect();

    Arc::new(HubDevice::new(
        hub_id.clone(),
        config.hub.location,
        config.hub.max_grid_capacity_kw,
        config.hub.firmware_version.clone(),
        config.hub.ip_address.clone(),
        Listener::new(mqtt.clone(), topics::hub_info(&hub_id), MqttQoS::AtLeastOnce, Retain::Retain),
        Listener::new(mqtt, topics::hub_status(&hub_id), MqttQoS::AtLeastOnce, Retain::NoRetain),
        nodes,
    ))
}

fn build_node(hub_id: &str, node_config: &NodeConfig, mqtt: Mqtt) -> Arc<Node> {
    let (power_meter, proximity_sensor, actuator): (
        Box<dyn PowerMeter>,
        Box<dyn ProximitySensor>,
        Box<dyn Actuator>,
    ) = if node_config.simulation {
        (
            Box::new(SimPowerMeter),
            Box::new(SimProximitySensor),
            Box::new(SimActuator::default()),
        )
    } else {
        let path = node_config.serial_port.as_deref().unwrap_or_else(|| {
            error!(
                "{}: node {} is not simulated but has no serial_port configured",
                hub_id, node_config.node_id
            );
            std::process::exit(2);
        });
        let bridge = match SerialBridge::open(path) {
            Ok(bridge) => bridge,
            Err(err) => {
                error!("{}: node {}: failed to open serial port {path}: {err}", hub_id, node_config.node_id);
                std::process::exit(2);
            }
        };
        (
            Box::new(SerialPowerMeter::new(bridge.clone())),
            Box::new(SerialProximitySensor::new(bridge.clone())),
            Box::new(SerialActuator::new(bridge)),
        )
    };

    Node::new(
        node_config.node_id.clone(),
        hub_id.to_string(),
        node_config.name.clone(),
        node_config.max_power_kw,
        node_config.simulation,
        power_meter,
        proximity_sensor,
        actuator,
        Listener::new(
            mqtt.clone(),
            topics::node_info(hub_id, &node_config.node_id),
            MqttQoS::AtLeastOnce,
            Retain::Retain,
        ),
        Listener::new(
            mqtt.clone(),
            topics::node_status(hub_id, &node_config.node_id),
            MqttQoS::AtLeastOnce,
            Retain::NoRetain,
        ),
        Listener::new(
            mqtt,
            topics::node_telemetry(hub_id, &node_config.node_id),
            MqttQoS::AtMostOnce,
            Retain::NoRetain,
        ),
    )
}
