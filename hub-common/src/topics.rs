//! Canonical topic strings and wildcard matching.

/// `iot/hubs/<hub_id>/info` (retain).
#[must_use]
pub fn hub_info(hub_id: &str) -> String {
    format!("iot/hubs/{hub_id}/info")
}

/// `iot/hubs/<hub_id>/status`.
#[must_use]
pub fn hub_status(hub_id: &str) -> String {
    format!("iot/hubs/{hub_id}/status")
}

/// `iot/hubs/<hub_id>/nodes/<node_id>/info` (retain).
#[must_use]
pub fn node_info(hub_id: &str, node_id: &str) -> String {
    format!("iot/hubs/{hub_id}/nodes/{node_id}/info")
}

/// `iot/hubs/<hub_id>/nodes/<node_id>/status`.
#[must_use]
pub fn node_status(hub_id: &str, node_id: &str) -> String {
    format!("iot/hubs/{hub_id}/nodes/{node_id}/status")
}

/// `iot/hubs/<hub_id>/nodes/<node_id>/telemetry`.
#[must_use]
pub fn node_telemetry(hub_id: &str, node_id: &str) -> String {
    format!("iot/hubs/{hub_id}/nodes/{node_id}/telemetry")
}

/// `iot/hubs/<hub_id>/dlm/events`.
#[must_use]
pub fn dlm_events(hub_id: &str) -> String {
    format!("iot/hubs/{hub_id}/dlm/events")
}

/// `iot/hubs/<hub_id>/requests`.
#[must_use]
pub fn hub_requests(hub_id: &str) -> String {
    format!("iot/hubs/{hub_id}/requests")
}

/// `iot/vehicles/<vehicle_id>/telemetry`.
#[must_use]
pub fn vehicle_telemetry(vehicle_id: &str) -> String {
    format!("iot/vehicles/{vehicle_id}/telemetry")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_builders() {
        assert_eq!(hub_info("h1"), "iot/hubs/h1/info");
        assert_eq!(node_status("h1", "n1"), "iot/hubs/h1/nodes/n1/status");
        assert_eq!(
            vehicle_telemetry("v1"),
            "iot/vehicles/v1/telemetry"
        );
    }

}
