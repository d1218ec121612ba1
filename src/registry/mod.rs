//! Agent Registry & Trust (spec §4.1): admission, lifecycle, the 6-component
//! trust vector, and per-agent capability/tier state.

mod agent;

pub use agent::{Agent, AgentStatus, Capability, RegisterOptions};

use crate::error::{FleetError, FleetResult};
use crate::events::{EventChannel, EventType, FleetEvent};
use crate::governance::tier::Tier;
use crate::trust::{SpectralFingerprint, TrustLevel, TrustVector};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use uuid::Uuid;

/// Smoothing factor for the exponential moving average of `successRate`
/// (spec §4.1: "α=0.1").
const SUCCESS_RATE_ALPHA: f64 = 0.1;

struct RegistryState {
    agents: HashMap<String, Agent>,
    by_status: HashMap<AgentStatus, HashSet<String>>,
    by_capability: HashMap<Capability, HashSet<String>>,
}

impl RegistryState {
    fn new() -> Self {
        Self {
            agents: HashMap::new(),
            by_status: HashMap::new(),
            by_capability: HashMap::new(),
        }
    }

    fn index_insert(&mut self, agent: &Agent) {
        self.by_status.entry(agent.status).or_default().insert(agent.id.clone());
        for cap in &agent.capabilities {
            self.by_capability.entry(*cap).or_default().insert(agent.id.clone());
        }
    }

    fn index_remove_status(&mut self, id: &str, status: AgentStatus) {
        if let Some(set) = self.by_status.get_mut(&status) {
            set.remove(id);
        }
    }

    fn set_status(&mut self, id: &str, new_status: AgentStatus) {
        if let Some(agent) = self.agents.get_mut(id) {
            let old = agent.status;
            if old == new_status {
                return;
            }
            agent.status = new_status;
            self.index_remove_status(id, old);
            self.by_status.entry(new_status).or_default().insert(id.to_string());
        }
    }
}

/// The agent registry: a primary map plus secondary indices by status,
/// capability, and trust level, protected by a single exclusive lock (spec
/// §5: "each top-level subsystem owns its data and protects mutations with
/// a single exclusive lock").
pub struct AgentRegistry {
    state: RwLock<RegistryState>,
    events: EventChannel,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self { state: RwLock::new(RegistryState::new()), events: EventChannel::new() }
    }

    pub fn events(&self) -> &EventChannel {
        &self.events
    }

    /// Register a new agent. Always succeeds with a freshly generated
    /// identity; registering the same `name` twice yields two distinct
    /// agents (spec §4.1: "duplicate registration name → non-fatal").
    pub fn register(&self, options: RegisterOptions) -> Agent {
        let id = format!("agent-{}", Uuid::new_v4());
        let fingerprint = SpectralFingerprint::generate(&options.name, &options.model);
        let agent = Agent {
            id: id.clone(),
            name: options.name,
            provider: options.provider,
            model: options.model,
            capabilities: options.capabilities,
            status: AgentStatus::Idle,
            max_concurrent_tasks: options.max_concurrent_tasks,
            current_task_count: 0,
            max_governance_tier: options.max_governance_tier,
            trust_vector: options.trust_vector,
            fingerprint,
            last_active_at: Utc::now(),
            tasks_completed: 0,
            success_rate: 1.0,
        };

        let mut state = self.state.write().expect("registry lock poisoned");
        state.index_insert(&agent);
        state.agents.insert(id.clone(), agent.clone());
        drop(state);

        self.events.publish(
            FleetEvent::new(EventType::AgentRegistered)
                .with_agent(id)
                .with_data("name", agent.name.clone()),
        );
        agent
    }

    pub fn get(&self, id: &str) -> Option<Agent> {
        self.state.read().expect("registry lock poisoned").agents.get(id).cloned()
    }

    /// Update an agent's trust vector. Validates length/range; emits
    /// `trust_updated` only when the derived trust *level* actually changes.
    pub fn update_trust_vector(&self, id: &str, vector: TrustVector) -> FleetResult<()> {
        let mut state = self.state.write().expect("registry lock poisoned");
        let agent = state
            .agents
            .get_mut(id)
            .ok_or_else(|| FleetError::NotFound(format!("agent {id} not found")))?;
        let old_level = agent.trust_vector.level();
        agent.trust_vector = vector;
        let new_level = vector.level();
        drop(state);

        if old_level != new_level {
            self.events.publish(
                FleetEvent::new(EventType::TrustUpdated)
                    .with_agent(id)
                    .with_data("level", format!("{new_level:?}")),
            );
        }
        Ok(())
    }

    /// Record the outcome of a task execution: increments `tasksCompleted`,
    /// updates `successRate` as an EMA, decrements in-flight count, and
    /// transitions back to idle once it reaches zero (spec §4.1).
    pub fn record_task_completion(&self, id: &str, success: bool) -> FleetResult<()> {
        let mut state = self.state.write().expect("registry lock poisoned");
        let agent = state
            .agents
            .get_mut(id)
            .ok_or_else(|| FleetError::NotFound(format!("agent {id} not found")))?;
        agent.tasks_completed += 1;
        let sample = if success { 1.0 } else { 0.0 };
        agent.success_rate =
            SUCCESS_RATE_ALPHA * sample + (1.0 - SUCCESS_RATE_ALPHA) * agent.success_rate;
        agent.current_task_count = agent.current_task_count.saturating_sub(1);
        agent.last_active_at = Utc::now();
        let id_owned = id.to_string();
        if agent.current_task_count == 0 && agent.status == AgentStatus::Busy {
            state.set_status(&id_owned, AgentStatus::Idle);
        }
        Ok(())
    }

    /// Mark an agent as having picked up a task: increments in-flight count
    /// and transitions `idle -> busy`.
    pub fn mark_assigned(&self, id: &str) -> FleetResult<()> {
        let mut state = self.state.write().expect("registry lock poisoned");
        let agent = state
            .agents
            .get_mut(id)
            .ok_or_else(|| FleetError::NotFound(format!("agent {id} not found")))?;
        agent.current_task_count += 1;
        agent.last_active_at = Utc::now();
        let id_owned = id.to_string();
        state.set_status(&id_owned, AgentStatus::Busy);
        Ok(())
    }

    pub fn suspend(&self, id: &str) -> FleetResult<()> {
        self.transition_status(id, AgentStatus::Suspended, EventType::AgentSuspended)
    }

    pub fn quarantine(&self, id: &str) -> FleetResult<()> {
        self.transition_status(id, AgentStatus::Quarantined, EventType::AgentQuarantined)
    }

    fn transition_status(
        &self,
        id: &str,
        status: AgentStatus,
        event_type: EventType,
    ) -> FleetResult<()> {
        let mut state = self.state.write().expect("registry lock poisoned");
        if !state.agents.contains_key(id) {
            return Err(FleetError::NotFound(format!("agent {id} not found")));
        }
        state.set_status(id, status);
        drop(state);
        self.events.publish(FleetEvent::new(event_type).with_agent(id));
        Ok(())
    }

    /// Explicit deregistration. Cascades per spec §3 "Lifecycle": the
    /// caller is responsible for cancelling outstanding assignments and
    /// recording abstains on open roundtables using the returned agent's id
    /// before it disappears from the registry — this method only removes
    /// the agent and its index entries, and returns the removed agent so
    /// the caller (dispatcher/roundtable) can complete the cascade.
    pub fn deregister(&self, id: &str) -> FleetResult<Agent> {
        let mut state = self.state.write().expect("registry lock poisoned");
        let agent = state
            .agents
            .remove(id)
            .ok_or_else(|| FleetError::NotFound(format!("agent {id} not found")))?;
        state.index_remove_status(id, agent.status);
        for cap in &agent.capabilities {
            if let Some(set) = state.by_capability.get_mut(cap) {
                set.remove(id);
            }
        }
        drop(state);
        self.events.publish(FleetEvent::new(EventType::AgentRemoved).with_agent(id));
        Ok(agent)
    }

    /// Agents eligible for a given tier: `maxGovernanceTier >= tier` AND
    /// `trustLevel != CRITICAL` AND `status in {idle, busy}` (spec §4.1).
    pub fn get_agents_for_tier(&self, tier: Tier) -> Vec<Agent> {
        let state = self.state.read().expect("registry lock poisoned");
        state
            .agents
            .values()
            .filter(|a| {
                a.max_governance_tier >= tier
                    && a.trust_vector.level() != TrustLevel::Critical
                    && matches!(a.status, AgentStatus::Idle | AgentStatus::Busy)
            })
            .cloned()
            .collect()
    }

    pub fn agents_with_capability(&self, capability: Capability) -> Vec<Agent> {
        let state = self.state.read().expect("registry lock poisoned");
        state
            .by_capability
            .get(&capability)
            .into_iter()
            .flatten()
            .filter_map(|id| state.agents.get(id).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.read().expect("registry lock poisoned").agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}
