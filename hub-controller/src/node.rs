//! Per-node state machine + hardware abstraction (spec §4.1, §4.2, §4.3).
//!
//! `Node` is always held as `Arc<Node>`; the mutable fields from spec §3
//! live behind one `tokio::sync::Mutex` so transitions (including the
//! actuator write that's part of them) are mutually exclusive per spec §5,
//! and the lock can be held across the `.await` points that I/O requires.

use std::sync::Arc;
use std::time::Duration;

use hub_common::model::{ChargingState, NodeInfo, NodeStatus, NodeTelemetry};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::shutdown::Shutdown;
use crate::spawn;

use crate::hardware::{
    Actuator, ActuatorCommand, PowerMeter, PowerSample, ProximitySample, ProximitySensor,
};
use crate::publish::Listener;

const VEHICLE_DETECTION_THRESHOLD_CM: f64 = 50.0;

/// Mutable node state (spec §3).
struct NodeState {
    charging_state: ChargingState,
    error_code: u16,
    power_limit_kw: f64,
    is_occupied: bool,
    connected_vehicle_id: Option<String>,
    current_vehicle_soc: Option<u8>,
    power: PowerSample,
    proximity: ProximitySample,
    vehicle_tap: Option<JoinHandle<()>>,
}

/// A single charging node.
pub struct Node {
    /// Unique node identifier.
    pub node_id: String,
    /// Parent hub ID.
    pub hub_id: String,
    name: Option<String>,
    /// Node max power in kW, (0, 350].
    pub max_power_kw: f64,
    /// Whether this node uses simulated hardware (affects occupancy
    /// derivation: sim mode trusts the request pipeline, hardware mode
    /// trusts the proximity sensor; spec §4.2 step 2).
    pub simulation: bool,
    power_meter: Box<dyn PowerMeter>,
    proximity_sensor: Box<dyn ProximitySensor>,
    actuator: Box<dyn Actuator>,
    info_listener: Listener,
    status_listener: Listener,
    telemetry_listener: Listener,
    state: Mutex<NodeState>,
}

impl Node {
    /// Construct a new, idle node and wrap it for shared ownership.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        node_id: String,
        hub_id: String,
        name: Option<String>,
        max_power_kw: f64,
        simulation: bool,
        power_meter: Box<dyn PowerMeter>,
        proximity_sensor: Box<dyn ProximitySensor>,
        actuator: Box<dyn Actuator>,
        info_listener: Listener,
        status_listener: Listener,
        telemetry_listener: Listener,
    ) -> Arc<Self> {
        Arc::new(Self {
            node_id,
            hub_id,
            name,
            max_power_kw,
            simulation,
            power_meter,
            proximity_sensor,
            actuator,
            info_listener,
            status_listener,
            telemetry_listener,
            state: Mutex::new(NodeState {
                charging_state: ChargingState::Idle,
                error_code: 0,
                power_limit_kw: max_power_kw,
                is_occupied: false,
                connected_vehicle_id: None,
                current_vehicle_soc: None,
                power: PowerSample {
                    voltage: 0.0,
                    current: 0.0,
                    power_kw: 0.0,
                },
                proximity: ProximitySample { distance_cm: 999.0 },
                vehicle_tap: None,
            }),
        })
    }

    /// The retained `NodeInfo` record.
    #[must_use]
    pub fn get_info(&self) -> NodeInfo {
        NodeInfo {
            node_id: self.node_id.clone(),
            hub_id: self.hub_id.clone(),
            name: self.name.clone(),
            max_power_kw: self.max_power_kw,
        }
    }

    /// The current `NodeStatus` record.
    pub async fn get_status(&self) -> NodeStatus {
        let state = self.state.lock().await;
        NodeStatus::new(state.charging_state, state.error_code)
    }

    /// The current `NodeTelemetry` record.
    pub async fn get_telemetry(&self) -> NodeTelemetry {
        let state = self.state.lock().await;
        NodeTelemetry {
            voltage: state.power.voltage,
            current: state.power.current,
            power_kw: state.power.power_kw,
            power_limit_kw: state.power_limit_kw,
            is_occupied: state.is_occupied,
            connected_vehicle_id: state.connected_vehicle_id.clone(),
            current_vehicle_soc: state.current_vehicle_soc,
            timestamp: hub_common::datetime::utc_now(),
        }
    }

    /// Publish the retained `NodeInfo`.
    pub fn notify_info(&self) {
        self.info_listener.publish(&self.get_info());
    }

    /// Publish the current `NodeStatus`.
    pub async fn notify_status(&self) {
        self.status_listener.publish(&self.get_status().await);
    }

    /// Publish the current `NodeTelemetry`.
    pub async fn notify_telemetry(&self) {
        self.telemetry_listener.publish(&self.get_telemetry().await);
    }

    /// Current charging state, DLM-allocated limit, and occupancy/vehicle
    /// fields — the inputs a DLM snapshot needs (spec §4.5).
    pub async fn snapshot_fields(&self) -> (ChargingState, f64, bool, Option<String>, Option<u8>) {
        let state = self.state.lock().await;
        (
            state.charging_state,
            state.power_limit_kw,
            state.is_occupied,
            state.connected_vehicle_id.clone(),
            state.current_vehicle_soc,
        )
    }

    /// Current measured power draw, for DLM's `total_grid_load` (spec §4.5).
    pub async fn current_power_kw(&self) -> f64 {
        self.state.lock().await.power.power_kw
    }

    /// Bind a vehicle to this node ahead of a charging transition (spec
    /// §4.6 step 2).
    pub async fn bind_vehicle(&self, vehicle_id: String, soc_percent: u8) {
        let mut state = self.state.lock().await;
        state.connected_vehicle_id = Some(vehicle_id);
        state.current_vehicle_soc = Some(soc_percent);
    }

    /// Force a fresh sensor read (spec §4.6 step 3). In hardware mode this
    /// updates `is_occupied` from the proximity reading; in simulation mode
    /// occupancy is left to the request pipeline (already asserted by the
    /// caller before this is invoked).
    pub async fn force_sensor_read(&self) -> bool {
        let proximity = self.proximity_sensor.measure().await;
        let mut state = self.state.lock().await;
        state.proximity = proximity;
        if !self.simulation {
            state.is_occupied = proximity.distance_cm < VEHICLE_DETECTION_THRESHOLD_CM;
        } else {
            state.is_occupied = true;
        }
        state.is_occupied
    }

    /// Transition `idle -> charging` once a vehicle is bound and occupancy
    /// confirmed (spec §4.1, §4.6 step 4). Returns `false` (and does
    /// nothing) if the node was not idle or wasn't occupied — the
    /// "phantom-occupancy" / "already charging" guards.
    pub async fn start_charging(&self) -> bool {
        let publish = {
            let mut state = self.state.lock().await;
            if state.charging_state != ChargingState::Idle || !state.is_occupied {
                warn!(
                    "{}: refusing to start charging (state={:?}, occupied={})",
                    self.node_id, state.charging_state, state.is_occupied
                );
                false
            } else {
                state.charging_state = ChargingState::Charging;
                state.power_limit_kw = self.max_power_kw;
                true
            }
        };

        if publish {
            let command = ActuatorCommand::for_limit(self.max_power_kw, self.max_power_kw);
            if let Err(err) = self.actuator.apply(command).await {
                tracing::error!("{}: actuator apply failed: {err}", self.node_id);
            }
            info!("{}: idle -> charging", self.node_id);
            self.notify_status().await;
        }
        publish
    }

    /// Apply a new DLM power limit while charging (spec §4.1: "DLM changes
    /// `power_limit_kw`" transition). No status publish — state doesn't
    /// change, only the ceiling does.
    pub async fn apply_power_limit(&self, new_limit_kw: f64) {
        let is_charging = {
            let mut state = self.state.lock().await;
            state.power_limit_kw = new_limit_kw;
            state.charging_state == ChargingState::Charging
        };

        if is_charging {
            let command = ActuatorCommand::for_limit(new_limit_kw, self.max_power_kw);
            if let Err(err) = self.actuator.apply(command).await {
                tracing::error!("{}: actuator apply failed: {err}", self.node_id);
            }
        }
    }

    /// Record the task handle for this session's vehicle-telemetry tap, so
    /// it can be aborted on session end or shutdown (spec §4.7).
    pub async fn set_vehicle_tap(&self, handle: JoinHandle<()>) {
        let mut state = self.state.lock().await;
        if let Some(previous) = state.vehicle_tap.replace(handle) {
            previous.abort();
        }
    }

    /// `charging -> full` on vehicle-telemetry `is_charging = false` (spec
    /// §4.1, §4.7). Aborts the vehicle-telemetry tap and clears vehicle
    /// fields; does not clear occupancy (hardware truth), except in
    /// simulation where nothing else would ever clear it.
    pub async fn finish_charging(&self) {
        let (changed, tap) = {
            let mut state = self.state.lock().await;
            if state.charging_state != ChargingState::Charging {
                (false, None)
            } else {
                state.charging_state = ChargingState::Full;
                state.connected_vehicle_id = None;
                state.current_vehicle_soc = None;
                if self.simulation {
                    state.is_occupied = false;
                }
                (true, state.vehicle_tap.take())
            }
        };

        if let Some(tap) = tap {
            tap.abort();
        }

        if changed {
            if let Err(err) = self.actuator.apply(ActuatorCommand::off()).await {
                tracing::error!("{}: actuator apply failed: {err}", self.node_id);
            }
            info!("{}: charging -> full", self.node_id);
            self.notify_status().await;
        }
    }

    /// `full -> idle` once occupancy has dropped (spec §4.1, §4.2 step 3).
    /// Actuator is already off from the `full` transition.
    async fn finish_session(&self) {
        let mut state = self.state.lock().await;
        if state.charging_state == ChargingState::Full && !state.is_occupied {
            state.charging_state = ChargingState::Idle;
            drop(state);
            info!("{}: full -> idle", self.node_id);
            self.notify_status().await;
        }
    }

    /// Assert a fault (spec §4.1: `charging/idle -> faulted`).
    pub async fn assert_fault(&self, error_code: u16) {
        let changed = {
            let mut state = self.state.lock().await;
            if state.charging_state == ChargingState::Faulted && state.error_code == error_code {
                false
            } else {
                state.charging_state = ChargingState::Faulted;
                state.error_code = error_code;
                true
            }
        };

        if changed {
            if let Err(err) = self.actuator.apply(ActuatorCommand::off()).await {
                tracing::error!("{}: actuator apply failed: {err}", self.node_id);
            }
            info!("{}: -> faulted ({error_code})", self.node_id);
            self.notify_status().await;
        }
    }

    /// Update SoC from a vehicle-telemetry message (spec §4.7).
    pub async fn update_vehicle_soc(&self, battery_level: u8) {
        self.state.lock().await.current_vehicle_soc = Some(battery_level);
    }

    /// Is this node currently bound to `vehicle_id` and charging? Used by
    /// the vehicle-telemetry tap to decide whether a stale subscription is
    /// still live.
    pub async fn is_charging_vehicle(&self, vehicle_id: &str) -> bool {
        let state = self.state.lock().await;
        state.charging_state == ChargingState::Charging
            && state.connected_vehicle_id.as_deref() == Some(vehicle_id)
    }

    /// One periodic telemetry tick (spec §4.2): measure, derive occupancy,
    /// drive `full -> idle` if warranted, publish telemetry.
    pub async fn telemetry_tick(&self) {
        let power = self.power_meter.measure().await;
        let proximity = self.proximity_sensor.measure().await;

        {
            let mut state = self.state.lock().await;
            state.power = power;
            state.proximity = proximity;
            if !self.simulation {
                state.is_occupied = proximity.distance_cm < VEHICLE_DETECTION_THRESHOLD_CM;
            }
        }

        self.finish_session().await;
        self.notify_telemetry().await;
    }
}

/// Spawn this node's periodic telemetry loop (spec §4.2, §5 "per-node
/// telemetry timers"), stopping when `shutdown` fires. Returns the join
/// handle so the caller can wait on it during the stop sequence.
pub fn spawn_telemetry_loop(
    node: Arc<Node>,
    telemetry_interval: Duration,
    shutdown: Shutdown,
) -> JoinHandle<()> {
    spawn(async move {
        let mut ticker = tokio::time::interval(telemetry_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => node.telemetry_tick().await,
                () = shutdown.cancelled() => {
                    info!("{}: telemetry loop stopping", node.node_id);
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use hub_common::mqtt::QoS as MqttQoS;
    use hub_common::mqtt::Retain;

    use super::*;
    use crate::hardware::sim::{SimActuator, SimPowerMeter, SimProximitySensor};
    use crate::services::mqtt::MqttClient;

    fn listeners() -> (Listener, Listener, Listener) {
        let (_client, mqtt) = MqttClient::new();
        (
            Listener::new(mqtt.clone(), "t/info".into(), MqttQoS::AtLeastOnce, Retain::Retain),
            Listener::new(
                mqtt.clone(),
                "t/status".into(),
                MqttQoS::AtLeastOnce,
                Retain::NoRetain,
            ),
            Listener::new(mqtt, "t/telemetry".into(), MqttQoS::AtMostOnce, Retain::NoRetain),
        )
    }

    fn sim_node(simulation: bool) -> Arc<Node> {
        let (info, status, telemetry) = listeners();
        Node::new(
            "A".into(),
            "hub-1".into(),
            None,
            22.0,
            simulation,
            Box::new(SimPowerMeter),
            Box::new(SimProximitySensor),
            Box::new(SimActuator::default()),
            info,
            status,
            telemetry,
        )
    }

    #[tokio::test]
    async fn test_starts_idle() {
        let node = sim_node(true);
        assert_eq!(node.get_status().await.state, ChargingState::Idle);
    }

    #[tokio::test]
    async fn test_refuses_charging_without_occupancy() {
        let node = sim_node(false);
        assert!(!node.start_charging().await);
        assert_eq!(node.get_status().await.state, ChargingState::Idle);
    }

    #[tokio::test]
    async fn test_bind_then_start_charging() {
        let node = sim_node(true);
        node.bind_vehicle("V1".into(), 30).await;
        node.force_sensor_read().await;
        assert!(node.start_charging().await);
        assert_eq!(node.get_status().await.state, ChargingState::Charging);
    }

    #[tokio::test]
    async fn test_double_start_charging_rejected() {
        let node = sim_node(true);
        node.bind_vehicle("V1".into(), 30).await;
        node.force_sensor_read().await;
        assert!(node.start_charging().await);
        assert!(!node.start_charging().await);
    }

    #[tokio::test]
    async fn test_full_transition_clears_vehicle_and_stops_actuator() {
        let node = sim_node(true);
        node.bind_vehicle("V1".into(), 30).await;
        node.force_sensor_read().await;
        node.start_charging().await;

        node.finish_charging().await;
        let telemetry = node.get_telemetry().await;
        assert_eq!(node.get_status().await.state, ChargingState::Full);
        assert!(telemetry.connected_vehicle_id.is_none());
    }

    #[tokio::test]
    async fn test_full_to_idle_once_unoccupied() {
        let node = sim_node(true);
        node.bind_vehicle("V1".into(), 30).await;
        node.force_sensor_read().await;
        node.start_charging().await;
        node.finish_charging().await; // clears is_occupied in sim mode

        node.telemetry_tick().await;
        assert_eq!(node.get_status().await.state, ChargingState::Idle);
    }

    #[tokio::test]
    async fn test_apply_power_limit_stores_value_unclamped() {
        // Node stores whatever limit it's given; clamping to max_power_kw is
        // the policy's job (see policy::tests), not the node's.
        let node = sim_node(true);
        node.bind_vehicle("V1".into(), 30).await;
        node.force_sensor_read().await;
        node.start_charging().await;
        node.apply_power_limit(15.0).await;
        let (_, limit, ..) = node.snapshot_fields().await;
        assert!((limit - 15.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_fault_turns_actuator_off() {
        let node = sim_node(true);
        node.bind_vehicle("V1".into(), 30).await;
        node.force_sensor_read().await;
        node.start_charging().await;
        node.assert_fault(42).await;
        let status = node.get_status().await;
        assert_eq!(status.state, ChargingState::Faulted);
        assert_eq!(status.error_code, 42);
    }
}
