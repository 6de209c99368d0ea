//! RPC Request/Response Types
//!
//! Method parameters and results of the `sim.*.v1` methods.

use serde::{Deserialize, Serialize};
use simrunner_core::domain::{InstanceState, InstanceStatus};

/// sim.spawn.v1 - Clone a branch and start its simulation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnRequest {
    pub source_url: String,
    pub branch: String,
    /// Generated (UUID v4) when omitted
    #[serde(default)]
    pub sim_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnResponse {
    pub sim_id: String,
    pub state: InstanceState,
}

/// sim.kill.v1 - Stop a simulation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KillRequest {
    pub sim_id: String,
    /// Forget the simulation without closing its worker
    #[serde(default)]
    pub remove_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KillResponse {
    pub sim_id: String,
    pub removed: bool,
}

/// sim.status.v1 - Is a simulation active
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusRequest {
    pub sim_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub sim_id: String,
    pub running: bool,
}

/// sim.list.v1 - Every registered simulation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResponse {
    pub simulations: Vec<SimulationSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationSummary {
    pub sim_id: String,
    pub state: InstanceState,
    pub registered_at: i64,
}

impl From<InstanceStatus> for SimulationSummary {
    fn from(status: InstanceStatus) -> Self {
        Self {
            sim_id: status.id.to_string(),
            state: status.state,
            registered_at: status.registered_at,
        }
    }
}

/// sim.send.v1 - Deliver a JSON message to a simulation's worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendRequest {
    pub sim_id: String,
    pub message: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendResponse {
    pub sim_id: String,
    pub delivered: bool,
}

/// sim.subscribe.v1 - Stream a simulation's client messages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribeRequest {
    pub sim_id: String,
}
