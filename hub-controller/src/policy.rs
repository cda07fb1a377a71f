//! Allocation policies: pure functions from a node-state snapshot to a list
//! of power allocations. Per design note "policy as strategy → pure function
//! value" — no trait object, just a `PolicyKind` switched on at call time.

use hub_common::model::ChargingState;
use serde::Deserialize;

/// Which policy a hub runs, set via config.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    /// Split capacity evenly across charging nodes.
    EqualSharing,
    /// Weight allocation by how depleted each vehicle's battery is.
    Priority,
}

impl PolicyKind {
    /// Run this policy against a snapshot.
    #[must_use]
    pub fn compute(self, snapshot: &[NodeSnapshot], capacity_kw: f64) -> Vec<PowerAllocation> {
        match self {
            Self::EqualSharing => equal_share(snapshot, capacity_kw),
            Self::Priority => priority_by_soc(snapshot, capacity_kw),
        }
    }
}

/// A node's state as seen by the DLM service at tick time (spec §4.5).
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSnapshot {
    /// Node identifier.
    pub node_id: String,
    /// Node's hardware ceiling.
    pub max_power_kw: f64,
    /// Currently measured power draw.
    pub current_power_kw: f64,
    /// Current charging state.
    pub state: ChargingState,
    /// Bound vehicle, if any.
    pub vehicle_id: Option<String>,
    /// Bound vehicle's last-known SoC, if any.
    pub vehicle_soc: Option<u8>,
    /// Physical occupancy.
    pub is_occupied: bool,
}

/// A computed power ceiling for one node (spec §3 `PowerAllocation`).
#[derive(Debug, Clone, PartialEq)]
pub struct PowerAllocation {
    /// Node this allocation applies to.
    pub node_id: String,
    /// The new power ceiling in kW.
    pub allocated_power_kw: f64,
    /// Free-form audit string, e.g. "Equal share (2 active)".
    pub reason: String,
}

fn charging_nodes(snapshot: &[NodeSnapshot]) -> impl Iterator<Item = &NodeSnapshot> {
    snapshot
        .iter()
        .filter(|n| n.is_occupied && n.state == ChargingState::Charging)
}

/// Equal-share policy (spec §4.5.1): split capacity evenly across charging,
/// occupied nodes. Idle nodes are left alone — this spec's resolution of the
/// "two competing equal-sharing policies" open question.
#[must_use]
pub fn equal_share(snapshot: &[NodeSnapshot], capacity_kw: f64) -> Vec<PowerAllocation> {
    let nodes: Vec<&NodeSnapshot> = charging_nodes(snapshot).collect();
    if nodes.is_empty() {
        return Vec::new();
    }

    let per_node = capacity_kw / nodes.len() as f64;
    let reason = format!("Equal share ({} active)", nodes.len());
    nodes
        .into_iter()
        .map(|n| PowerAllocation {
            node_id: n.node_id.clone(),
            allocated_power_kw: per_node.min(n.max_power_kw),
            reason: reason.clone(),
        })
        .collect()
}

/// Priority (SoC-weighted) policy (spec §4.5.2): vehicles closer to empty
/// get a greater share of capacity.
#[must_use]
pub fn priority_by_soc(snapshot: &[NodeSnapshot], capacity_kw: f64) -> Vec<PowerAllocation> {
    let nodes: Vec<(&NodeSnapshot, f64)> = charging_nodes(snapshot)
        .filter(|n| n.vehicle_id.is_some())
        .map(|n| {
            let soc = f64::from(n.vehicle_soc.unwrap_or(50));
            let priority = (100.0 - soc).max(1.0);
            (n, priority)
        })
        .collect();

    if nodes.is_empty() {
        return Vec::new();
    }

    let total_priority: f64 = nodes.iter().map(|(_, p)| p).sum();
    let active = nodes.len();

    nodes
        .into_iter()
        .map(|(n, priority)| {
            let share = (priority / total_priority) * capacity_kw;
            let soc_display = n.vehicle_soc.unwrap_or(50);
            PowerAllocation {
                node_id: n.node_id.clone(),
                allocated_power_kw: share.min(n.max_power_kw),
                reason: format!("Priority-based (SoC: {soc_display}%, {active} active)"),
            }
        })
        .collect()
}
