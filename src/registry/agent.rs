//! The `Agent` entity (spec §3): identity, capabilities, status, capacity,
//! trust vector, spectral fingerprint, and rolling performance stats.

use crate::governance::tier::Tier;
use crate::trust::{SpectralFingerprint, TrustVector};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Closed vocabulary of capability tags an agent may advertise (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    CodeGeneration,
    CodeReview,
    Testing,
    Documentation,
    SecurityScan,
    Deployment,
    Monitoring,
    DataAnalysis,
    Orchestration,
    Communication,
}

/// Agent lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Busy,
    Offline,
    Suspended,
    Quarantined,
}

/// Caller-supplied fields for `AgentRegistry::register`. The registry
/// derives identity, fingerprint, initial status and timestamps itself.
#[derive(Debug, Clone)]
pub struct RegisterOptions {
    pub name: String,
    pub provider: String,
    pub model: String,
    pub capabilities: HashSet<Capability>,
    pub max_concurrent_tasks: u32,
    pub max_governance_tier: Tier,
    pub trust_vector: TrustVector,
}

/// A registered agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub provider: String,
    pub model: String,
    pub capabilities: HashSet<Capability>,
    pub status: AgentStatus,
    pub max_concurrent_tasks: u32,
    pub current_task_count: u32,
    pub max_governance_tier: Tier,
    pub trust_vector: TrustVector,
    pub fingerprint: SpectralFingerprint,
    pub last_active_at: DateTime<Utc>,
    pub tasks_completed: u64,
    pub success_rate: f64,
}

impl Agent {
    /// Whether this agent never appears as a dispatch/vote candidate (spec
    /// §3 invariant).
    pub fn is_excluded_from_candidacy(&self) -> bool {
        matches!(self.status, AgentStatus::Suspended | AgentStatus::Quarantined)
    }

    pub fn has_capacity(&self) -> bool {
        self.current_task_count < self.max_concurrent_tasks
    }
}
