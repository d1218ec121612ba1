//! Crawl coordinator (spec §4.4): owns crawl agents, routes frontier work
//! to them by role, and arbitrates role switches and sentinel quarantine.

use super::agent::{CrawlAgent, CrawlAgentStatus, Role};
use super::frontier::{Frontier, FrontierEntry};
use super::runner::{GovernanceResult, TrajectoryPoint};
use crate::error::{FleetError, FleetResult};
use crate::events::{EventChannel, EventType, FleetEvent};
use std::collections::HashMap;
use std::sync::RwLock;

/// Minimum safety score before a sentinel auto-quarantines an agent
/// (spec §4.4 "Sentinel").
pub const DEFAULT_MIN_SAFETY_SCORE: f64 = 0.3;

fn chebyshev(a: (i32, i32), b: (i32, i32)) -> i32 {
    (a.0 - b.0).abs().max((a.1 - b.1).abs())
}

struct CoordinatorState {
    agents: HashMap<String, CrawlAgent>,
}

/// A pending role-switch request awaiting quorum approval, when
/// `role_switch_quorum` is configured above zero.
#[derive(Debug, Clone)]
pub struct RoleSwitchRequest {
    pub agent_id: String,
    pub target_role: Role,
    pub approvals: Vec<String>,
}

pub struct CrawlCoordinator {
    state: RwLock<CoordinatorState>,
    min_safety_score: f64,
    role_switch_quorum: u32,
    pending_switches: RwLock<HashMap<String, RoleSwitchRequest>>,
    events: EventChannel,
}

impl CrawlCoordinator {
    pub fn new(min_safety_score: f64, role_switch_quorum: u32) -> Self {
        Self {
            state: RwLock::new(CoordinatorState { agents: HashMap::new() }),
            min_safety_score,
            role_switch_quorum,
            pending_switches: RwLock::new(HashMap::new()),
            events: EventChannel::new(),
        }
    }

    pub fn events(&self) -> &EventChannel {
        &self.events
    }

    pub fn add_agent(&self, agent: CrawlAgent) {
        let mut state = self.state.write().expect("coordinator lock poisoned");
        state.agents.insert(agent.id.clone(), agent);
    }

    pub fn get_agent(&self, agent_id: &str) -> Option<CrawlAgent> {
        self.state.read().expect("coordinator lock poisoned").agents.get(agent_id).cloned()
    }

    /// Agents whose grid position is within Chebyshev distance 1 of
    /// `agent_id`'s role — the "braid neighborhood" used for coordination
    /// handoffs (spec §4.4: "adjacent roles in the 3x3 braid").
    pub fn braid_neighbors(&self, agent_id: &str) -> Vec<CrawlAgent> {
        let state = self.state.read().expect("coordinator lock poisoned");
        let Some(origin) = state.agents.get(agent_id) else { return Vec::new() };
        let origin_pos = origin.role.grid_position();
        state
            .agents
            .values()
            .filter(|a| a.id != agent_id && chebyshev(a.role.grid_position(), origin_pos) <= 1)
            .cloned()
            .collect()
    }

    /// Assign the next unit of work to `agent_id`, routed by its current
    /// role: scouts pull fresh frontier entries, analyzers pull completed
    /// entries for a second pass; sentinels and reporters never pull
    /// frontier work directly — they act on other agents' output (spec
    /// §4.4 "URL routing by role": "Sentinel / Reporter: always null").
    pub fn assign_next(&self, agent_id: &str, frontier: &Frontier) -> FleetResult<Option<FrontierEntry>> {
        let role = {
            let state = self.state.read().expect("coordinator lock poisoned");
            state
                .agents
                .get(agent_id)
                .ok_or_else(|| FleetError::NotFound(format!("crawl agent {agent_id} not found")))?
                .role
        };

        let entry = match role {
            Role::Scout => frontier.claim_highest_priority(agent_id),
            Role::Analyzer => frontier.completed_for_second_pass(),
            Role::Reporter => None,
            Role::Sentinel => None,
        };

        if let Some(entry) = &entry {
            let mut state = self.state.write().expect("coordinator lock poisoned");
            if let Some(agent) = state.agents.get_mut(agent_id) {
                agent.status = match role {
                    Role::Scout => CrawlAgentStatus::Crawling,
                    Role::Analyzer => CrawlAgentStatus::Analyzing,
                    Role::Reporter => CrawlAgentStatus::Reporting,
                    Role::Sentinel => CrawlAgentStatus::Idle,
                };
                agent.record_visit(&entry.url);
            }
        }
        Ok(entry)
    }

    /// Request a role switch. If `role_switch_quorum` is zero the switch
    /// takes effect immediately; otherwise it stays pending until enough
    /// distinct approvers have signed off (spec §4.4 "role-switch quorum").
    /// A target role outside the agent's Chebyshev-1 braid neighborhood is
    /// rejected outright (spec §8: "Implementation MUST use Chebyshev ...
    /// Any other target -> reject").
    pub fn request_role_switch(
        &self,
        agent_id: &str,
        target_role: Role,
        approver_id: Option<&str>,
    ) -> FleetResult<bool> {
        let current_role = {
            let state = self.state.read().expect("coordinator lock poisoned");
            state
                .agents
                .get(agent_id)
                .ok_or_else(|| FleetError::NotFound(format!("crawl agent {agent_id} not found")))?
                .role
        };
        if chebyshev(target_role.grid_position(), current_role.grid_position()) > 1 {
            return Ok(false);
        }

        if self.role_switch_quorum == 0 {
            self.apply_role_switch(agent_id, target_role)?;
            return Ok(true);
        }

        let mut pending = self.pending_switches.write().expect("coordinator lock poisoned");
        let request = pending.entry(agent_id.to_string()).or_insert_with(|| RoleSwitchRequest {
            agent_id: agent_id.to_string(),
            target_role,
            approvals: Vec::new(),
        });
        if request.target_role != target_role {
            request.target_role = target_role;
            request.approvals.clear();
        }
        if let Some(approver) = approver_id {
            if !request.approvals.iter().any(|a| a == approver) {
                request.approvals.push(approver.to_string());
            }
        }
        let satisfied = request.approvals.len() as u32 >= self.role_switch_quorum;
        if satisfied {
            pending.remove(agent_id);
            drop(pending);
            self.apply_role_switch(agent_id, target_role)?;
        }
        Ok(satisfied)
    }

    fn apply_role_switch(&self, agent_id: &str, target_role: Role) -> FleetResult<()> {
        let mut state = self.state.write().expect("coordinator lock poisoned");
        let agent = state
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| FleetError::NotFound(format!("crawl agent {agent_id} not found")))?;
        agent.switch_role(target_role);
        drop(state);
        self.events.publish(
            FleetEvent::new(EventType::AgentRoleSwitched)
                .with_agent(agent_id)
                .with_data("role", format!("{target_role:?}")),
        );
        Ok(())
    }

    /// Apply a sentinel's safety judgement on `target_id`. Quarantines the
    /// target if its score falls below `min_safety_score` (spec §4.4
    /// "Sentinel auto-quarantine").
    pub fn sentinel_score(&self, target_id: &str, delta: f64) -> FleetResult<bool> {
        let mut state = self.state.write().expect("coordinator lock poisoned");
        let agent = state
            .agents
            .get_mut(target_id)
            .ok_or_else(|| FleetError::NotFound(format!("crawl agent {target_id} not found")))?;
        agent.apply_safety_delta(delta);
        let quarantined = agent.safety_score < self.min_safety_score;
        if quarantined {
            agent.status = CrawlAgentStatus::Quarantined;
        }
        drop(state);
        if quarantined {
            self.events.publish(
                FleetEvent::new(EventType::AgentQuarantined).with_agent(target_id),
            );
        }
        Ok(quarantined)
    }

    /// Snapshot of every managed agent, for the sentinel scan to inspect
    /// trajectory/governance history without holding the coordinator lock
    /// across the scan (spec §5 "Concurrency of sentinel scans").
    pub fn agents_snapshot(&self) -> Vec<CrawlAgent> {
        self.state.read().expect("coordinator lock poisoned").agents.values().cloned().collect()
    }

    /// Directly quarantine `agent_id`: excludes it from future assignment
    /// and decays its safety score to zero (spec §4.4 "Sentinel action":
    /// `QuarantineAgent`).
    pub fn quarantine_agent(&self, agent_id: &str) -> FleetResult<()> {
        let mut state = self.state.write().expect("coordinator lock poisoned");
        let agent = state
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| FleetError::NotFound(format!("crawl agent {agent_id} not found")))?;
        agent.status = CrawlAgentStatus::Quarantined;
        agent.safety_score = 0.0;
        drop(state);
        self.events.publish(FleetEvent::new(EventType::AgentQuarantined).with_agent(agent_id));
        Ok(())
    }

    /// Append a completed step's trajectory point and governance record to
    /// the managed agent and return it to `Idle` (spec §4.5 "append
    /// trajectory point and governance record to the managed agent").
    pub fn record_step_success(
        &self,
        agent_id: &str,
        trajectory: TrajectoryPoint,
        governance: GovernanceResult,
    ) -> FleetResult<()> {
        let mut state = self.state.write().expect("coordinator lock poisoned");
        let agent = state
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| FleetError::NotFound(format!("crawl agent {agent_id} not found")))?;
        agent.push_trajectory(trajectory);
        agent.push_governance(governance);
        agent.status = CrawlAgentStatus::Idle;
        Ok(())
    }

    /// Record a failed step against the managed agent (spec §4.5 "On any
    /// exception: increment error counter").
    pub fn record_step_failure(&self, agent_id: &str) -> FleetResult<()> {
        let mut state = self.state.write().expect("coordinator lock poisoned");
        let agent = state
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| FleetError::NotFound(format!("crawl agent {agent_id} not found")))?;
        agent.record_failure();
        agent.status = CrawlAgentStatus::Idle;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.state.read().expect("coordinator lock poisoned").agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CrawlCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_SAFETY_SCORE, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn braid_neighbors_are_chebyshev_adjacent() {
        // Scenario 4 from spec §8.
        let coord = CrawlCoordinator::default();
        coord.add_agent(CrawlAgent::new("reporter-1", Role::Reporter));
        coord.add_agent(CrawlAgent::new("sentinel-1", Role::Sentinel));
        coord.add_agent(CrawlAgent::new("scout-1", Role::Scout));
        coord.add_agent(CrawlAgent::new("analyzer-1", Role::Analyzer));

        let neighbors: Vec<String> = coord.braid_neighbors("reporter-1").into_iter().map(|a| a.id).collect();
        assert!(neighbors.contains(&"sentinel-1".to_string()));
        assert!(neighbors.contains(&"scout-1".to_string()));
        assert!(neighbors.contains(&"analyzer-1".to_string()));
    }

    #[test]
    fn scout_assign_next_claims_frontier_entry() {
        let coord = CrawlCoordinator::default();
        coord.add_agent(CrawlAgent::new("scout-1", Role::Scout));
        let frontier = Frontier::new(chrono::Duration::seconds(30), 0);
        frontier.add("https://a.com", 0, 10.0, None);

        let entry = coord.assign_next("scout-1", &frontier).unwrap();
        assert!(entry.is_some());
        assert_eq!(coord.get_agent("scout-1").unwrap().status, CrawlAgentStatus::Crawling);
    }

    #[test]
    fn role_switch_requires_quorum() {
        let coord = CrawlCoordinator::new(DEFAULT_MIN_SAFETY_SCORE, 2);
        coord.add_agent(CrawlAgent::new("scout-1", Role::Scout));

        let satisfied = coord.request_role_switch("scout-1", Role::Analyzer, Some("voter-a")).unwrap();
        assert!(!satisfied);
        assert_eq!(coord.get_agent("scout-1").unwrap().role, Role::Scout);

        let satisfied = coord.request_role_switch("scout-1", Role::Analyzer, Some("voter-b")).unwrap();
        assert!(satisfied);
        assert_eq!(coord.get_agent("scout-1").unwrap().role, Role::Analyzer);
    }

    #[test]
    fn sentinel_score_below_threshold_quarantines() {
        let coord = CrawlCoordinator::new(0.5, 0);
        coord.add_agent(CrawlAgent::new("scout-1", Role::Scout));
        let quarantined = coord.sentinel_score("scout-1", -0.8).unwrap();
        assert!(quarantined);
        assert_eq!(coord.get_agent("scout-1").unwrap().status, CrawlAgentStatus::Quarantined);
    }
}
