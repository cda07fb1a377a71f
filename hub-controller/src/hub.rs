//! The Hub Device (spec §2, §3, §4.4): owns identity, location, grid
//! capacity, and the node registry; publishes `HubInfo`/`HubStatus`.

use std::sync::Arc;

use hub_common::model::{ConnectionState, GeoLocation, HubInfo, HubStatus};
use rand::Rng;
use tokio::sync::Mutex;
use tracing::info;

use crate::node::Node;
use crate::publish::Listener;

/// A hub: singleton per process (spec §3 "Hub (singleton per process)").
pub struct HubDevice {
    /// Unique hub identifier.
    pub hub_id: String,
    location: GeoLocation,
    max_grid_capacity_kw: f64,
    firmware_version: String,
    ip_address: String,
    connection_state: Mutex<ConnectionState>,
    info_listener: Listener,
    status_listener: Listener,
    /// The nodes this hub manages. Read-mostly: populated once at startup
    /// from config, never mutated after (spec §5).
    pub nodes: Vec<Arc<Node>>,
}

impl HubDevice {
    /// Construct a new hub, starting `offline` until `start()` runs.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        hub_id: String,
        location: GeoLocation,
        max_grid_capacity_kw: f64,
        firmware_version: String,
        ip_address: String,
        info_listener: Listener,
        status_listener: Listener,
        nodes: Vec<Arc<Node>>,
    ) -> Self {
        Self {
            hub_id,
            location,
            max_grid_capacity_kw,
            firmware_version,
            ip_address,
            connection_state: Mutex::new(ConnectionState::Offline),
            info_listener,
            status_listener,
            nodes,
        }
    }

    /// The hub's grid capacity, used by the DLM service.
    #[must_use]
    pub fn max_grid_capacity_kw(&self) -> f64 {
        self.max_grid_capacity_kw
    }

    /// Look up a managed node by id.
    #[must_use]
    pub fn node(&self, node_id: &str) -> Option<&Arc<Node>> {
        self.nodes.iter().find(|n| n.node_id == node_id)
    }

    /// The retained `HubInfo` record.
    #[must_use]
    pub fn get_info(&self) -> HubInfo {
        HubInfo {
            hub_id: self.hub_id.clone(),
            location: self.location,
            max_grid_capacity_kw: self.max_grid_capacity_kw,
            ip_address: self.ip_address.clone(),
            firmware_version: self.firmware_version.clone(),
        }
    }

    /// The current `HubStatus` record. `cpu_temp` is representative noise,
    /// not a health signal (spec §7's note, confirmed against the source).
    pub async fn get_status(&self) -> HubStatus {
        let state = *self.connection_state.lock().await;
        let cpu_temp = rand::thread_rng().gen_range(40.0..=85.0);
        HubStatus::new(state, cpu_temp)
    }

    /// Publish the retained `HubInfo`.
    pub fn publish_info(&self) {
        self.info_listener.publish(&self.get_info());
    }

    /// Publish the current `HubStatus`.
    pub async fn publish_status(&self) {
        self.status_listener.publish(&self.get_status().await);
    }

    /// Set connection state, gated on change (mirrors the node status
    /// change-detection rule, spec §4.1).
    pub async fn set_state(&self, new_state: ConnectionState) {
        let mut state = self.connection_state.lock().await;
        if *state != new_state {
            *state = new_state;
            info!("{}: hub -> {:?}", self.hub_id, new_state);
        }
    }

    /// Startup sequence (spec §2's "Control flow on startup" / the source's
    /// `Hub.start()`): online, publish hub info+status, then each node's
    /// retained info and initial status.
    pub async fn start(&self) {
        self.set_state(ConnectionState::Online).await;
        self.publish_info();
        self.publish_status().await;

        for node in &self.nodes {
            node.notify_info();
            node.notify_status().await;
        }
    }

    /// Shutdown sequence (spec §5 step 3): go offline and publish a final
    /// status.
    pub async fn stop(&self) {
        self.set_state(ConnectionState::Offline).await;
        self.publish_status().await;
    }
}
