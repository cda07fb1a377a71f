//! JSON payloads published and consumed on the pub/sub fabric.
//!
//! Field shapes follow the hub/node/DLM/vehicle DTOs of the source system
//! (`HubInfo`, `NodeStatus`, `DLMNotification`, ...); range constraints
//! documented there are recorded here as doc comments rather than enforced
//! validation, since nothing downstream of this crate validates wire
//! payloads beyond `serde`'s own type checking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::datetime::utc_now;

/// Connection state of a hub.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Connected to the broker and operating normally.
    Online,
    /// Not connected, or shut down.
    Offline,
    /// Operator-flagged maintenance window.
    Maintenance,
}

/// Charging state of a node.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChargingState {
    /// No vehicle bound, actuator off.
    Idle,
    /// Vehicle bound and actuator engaged.
    Charging,
    /// Vehicle finished charging but has not yet left the pad.
    Full,
    /// Error asserted; actuator off.
    Faulted,
}

/// Geographic location: latitude/longitude in degrees, altitude in metres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    /// Latitude in \[-90, 90\].
    pub latitude: f64,
    /// Longitude in \[-180, 180\].
    pub longitude: f64,
    /// Altitude in metres, \[-500, 10000\].
    #[serde(default)]
    pub altitude: f64,
}

/// Topic: `iot/hubs/<hub_id>/info` (retain=true).
///
/// Published when the hub comes online or restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubInfo {
    /// Unique hub identifier (max 50 chars).
    pub hub_id: String,
    /// Hub's physical location.
    pub location: GeoLocation,
    /// Hub grid capacity in kW, (0, 1000].
    pub max_grid_capacity_kw: f64,
    /// Hub IP address (IPv4 or IPv6).
    pub ip_address: String,
    /// Firmware version string (max 20 chars).
    pub firmware_version: String,
}

/// Topic: `iot/hubs/<hub_id>/status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubStatus {
    /// Hub connection state.
    pub state: ConnectionState,
    /// CPU temperature in °C, \[-40, 125\]. Not a health signal — noise.
    pub cpu_temp: f64,
    /// Status timestamp.
    pub timestamp: DateTime<Utc>,
}

impl HubStatus {
    /// Build a status record stamped with the current time.
    #[must_use]
    pub fn new(state: ConnectionState, cpu_temp: f64) -> Self {
        Self {
            state,
            cpu_temp,
            timestamp: utc_now(),
        }
    }
}

/// Topic: `iot/hubs/<hub_id>/nodes/<node_id>/info` (retain=true).
///
/// Published when the node is registered or comes online.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Unique node identifier (max 50 chars).
    pub node_id: String,
    /// Parent hub ID.
    pub hub_id: String,
    /// Optional display name (max 100 chars).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Node max power in kW, (0, 350].
    pub max_power_kw: f64,
}

/// Topic: `iot/hubs/<hub_id>/nodes/<node_id>/status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStatus {
    /// Current charging state.
    pub state: ChargingState,
    /// Error code, 0 = no error, \[0, 9999\].
    #[serde(default)]
    pub error_code: u16,
    /// Status timestamp.
    pub timestamp: DateTime<Utc>,
}

impl NodeStatus {
    /// Build a status record stamped with the current time.
    #[must_use]
    pub fn new(state: ChargingState, error_code: u16) -> Self {
        Self {
            state,
            error_code,
            timestamp: utc_now(),
        }
    }
}

/// Topic: `iot/hubs/<hub_id>/nodes/<node_id>/telemetry`.
///
/// Invariant: `power_kw <= power_limit_kw`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeTelemetry {
    /// Voltage in volts, \[0, 1000\].
    pub voltage: f64,
    /// Current in amps, \[0, 500\].
    pub current: f64,
    /// Actual power draw in kW, \[0, 350\].
    pub power_kw: f64,
    /// DLM-enforced ceiling in kW, \[0, 350\].
    pub power_limit_kw: f64,
    /// Whether a vehicle is physically present.
    pub is_occupied: bool,
    /// Connected vehicle ID, if any (max 50 chars).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connected_vehicle_id: Option<String>,
    /// Connected vehicle's state of charge, \[0, 100\], if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_vehicle_soc: Option<u8>,
    /// Telemetry timestamp.
    pub timestamp: DateTime<Utc>,
}

/// Topic: `iot/hubs/<hub_id>/dlm/events`.
///
/// Emitted when a node's `power_limit_kw` changes by more than 0.1 kW.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DlmNotification {
    /// Short reason string for audit (max 50 chars), e.g. "Equal share (2 active)".
    pub trigger_reason: String,
    /// Previous power limit in kW.
    pub original_limit: f64,
    /// New power limit in kW.
    pub new_limit: f64,
    /// Node this allocation applies to (max 50 chars).
    pub affected_node_id: String,
    /// Total measured grid load at trigger time, in kW.
    pub total_grid_load: f64,
    /// Event timestamp.
    pub timestamp: DateTime<Utc>,
}

/// Topic: `iot/hubs/<hub_id>/requests` (hub-inbound).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleRequest {
    /// Requesting vehicle's ID (max 50 chars).
    pub vehicle_id: String,
    /// Target node ID (max 50 chars).
    pub node_id: String,
    /// Vehicle's state of charge at request time, \[0, 100\].
    pub soc_percent: u8,
    /// Request timestamp.
    pub timestamp: DateTime<Utc>,
}

/// Topic: `iot/vehicles/<vehicle_id>/telemetry`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleTelemetry {
    /// Vehicle's GPS location.
    pub geo_location: GeoLocation,
    /// Battery state of charge, \[0, 100\].
    pub battery_level: u8,
    /// Vehicle speed in km/h, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed_kmh: Option<f64>,
    /// Engine temperature in °C, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine_temp_c: Option<f64>,
    /// Whether the vehicle is currently charging.
    pub is_charging: bool,
    /// Telemetry timestamp.
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn test_connection_state_serializes_lowercase() {
        let json = serde_json::to_string(&ConnectionState::Online).unwrap();
        assert_eq!(json, "\"online\"");
    }

    #[test]
    fn test_charging_state_round_trips() {
        for state in [
            ChargingState::Idle,
            ChargingState::Charging,
            ChargingState::Full,
            ChargingState::Faulted,
        ] {
            let json = serde_json::to_string(&state).unwrap();
            let back: ChargingState = serde_json::from_str(&json).unwrap();
            assert_eq!(state, back);
        }
    }

    #[test]
    fn test_node_telemetry_omits_absent_vehicle_fields() {
        let telemetry = NodeTelemetry {
            voltage: 230.0,
            current: 10.0,
            power_kw: 2.3,
            power_limit_kw: 22.0,
            is_occupied: false,
            connected_vehicle_id: None,
            current_vehicle_soc: None,
            timestamp: utc_now(),
        };
        let json = serde_json::to_string(&telemetry).unwrap();
        assert!(!json.contains("connected_vehicle_id"));
        assert!(!json.contains("current_vehicle_soc"));
    }

    #[test]
    fn test_hub_info_round_trip() {
        let info = HubInfo {
            hub_id: "hub-1".to_string(),
            location: GeoLocation {
                latitude: -37.8,
                longitude: 144.9,
                altitude: 10.0,
            },
            max_grid_capacity_kw: 60.0,
            ip_address: "10.0.0.1".to_string(),
            firmware_version: "1.0.0".to_string(),
        };
        let json = serde_json::to_string(&info).unwrap();
        let back: HubInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(info, back);
    }
}
