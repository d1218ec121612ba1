//! Roundtable: multi-signature approval sessions across the six tongue
//! roles, with expiration and vote accounting (spec §4.3).

use super::tier::Tier;
use crate::error::{FleetError, FleetResult};
use crate::events::{EventChannel, EventType, FleetEvent};
use crate::registry::AgentRegistry;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

/// Default session lifetime (spec §4.3: "Sets expiration to now + timeoutMs
/// (default 5 minutes)").
pub const DEFAULT_TIMEOUT_MS: i64 = 5 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Vote {
    Approve,
    Reject,
    Abstain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Approved,
    Rejected,
    Expired,
}

/// A roundtable approval session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundtableSession {
    pub id: String,
    pub topic: String,
    pub linked_task: Option<String>,
    pub participants: Vec<String>,
    pub votes: HashMap<String, Vote>,
    pub required_consensus: f64,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl RoundtableSession {
    fn approvals(&self) -> usize {
        self.votes.values().filter(|v| **v == Vote::Approve).count()
    }

    fn rejections(&self) -> usize {
        self.votes.values().filter(|v| **v == Vote::Reject).count()
    }

    fn approval_threshold(&self) -> usize {
        (self.participants.len() as f64 * self.required_consensus).ceil() as usize
    }
}

/// Outcome of casting a vote: whether the session concluded as a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    Pending,
    Approved,
    Rejected,
}

struct SessionLock {
    session: RwLock<RoundtableSession>,
}

/// The roundtable subsystem: owns every session, serializes votes per
/// session, and emits the governance event stream.
pub struct Roundtable {
    sessions: RwLock<HashMap<String, std::sync::Arc<SessionLock>>>,
    events: EventChannel,
}

impl Roundtable {
    pub fn new() -> Self {
        Self { sessions: RwLock::new(HashMap::new()), events: EventChannel::new() }
    }

    pub fn events(&self) -> &EventChannel {
        &self.events
    }

    /// Open a session. If `participants` is `None`, selects agents eligible
    /// for `tier` from the registry (spec §4.1 eligibility rule). Fails if
    /// fewer than `requiredTongues` participants are available.
    pub fn open(
        &self,
        registry: &AgentRegistry,
        topic: impl Into<String>,
        tier: Tier,
        participants: Option<Vec<String>>,
        timeout_ms: Option<i64>,
    ) -> FleetResult<RoundtableSession> {
        self.open_with_task(registry, topic, tier, participants, timeout_ms, None)
    }

    pub fn open_with_task(
        &self,
        registry: &AgentRegistry,
        topic: impl Into<String>,
        tier: Tier,
        participants: Option<Vec<String>>,
        timeout_ms: Option<i64>,
        linked_task: Option<String>,
    ) -> FleetResult<RoundtableSession> {
        let required_tongues = tier.requirements().required_tongues as usize;
        let participants = match participants {
            Some(p) => p,
            None => registry
                .get_agents_for_tier(tier)
                .into_iter()
                .map(|a| a.id)
                .collect::<Vec<_>>(),
        };

        if participants.len() < required_tongues {
            return Err(FleetError::PreconditionFailed(format!(
                "only {} participants available, {required_tongues} required for tier",
                participants.len()
            )));
        }

        let required_consensus = required_tongues as f64 / participants.len() as f64;
        let now = Utc::now();
        let timeout_ms = timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS);
        let session = RoundtableSession {
            id: format!("session-{}", Uuid::new_v4()),
            topic: topic.into(),
            linked_task,
            participants,
            votes: HashMap::new(),
            required_consensus,
            status: SessionStatus::Active,
            created_at: now,
            expires_at: now + Duration::milliseconds(timeout_ms),
        };

        let mut sessions = self.sessions.write().expect("roundtable lock poisoned");
        sessions.insert(
            session.id.clone(),
            std::sync::Arc::new(SessionLock { session: RwLock::new(session.clone()) }),
        );
        drop(sessions);

        self.events.publish(
            FleetEvent::new(EventType::RoundtableStarted)
                .with_data("session_id", session.id.clone())
                .with_data("topic", session.topic.clone()),
        );
        Ok(session)
    }

    fn session_lock(&self, session_id: &str) -> FleetResult<std::sync::Arc<SessionLock>> {
        self.sessions
            .read()
            .expect("roundtable lock poisoned")
            .get(session_id)
            .cloned()
            .ok_or_else(|| FleetError::NotFound(format!("session {session_id} not found")))
    }

    /// Cast a vote. Votes are serialized through the session's own lock so
    /// two concurrent votes are both observed atomically and the first to
    /// cross the threshold concludes the session (spec §4.3 "Ordering").
    pub fn cast_vote(
        &self,
        session_id: &str,
        voter_id: &str,
        choice: Vote,
        registry: &AgentRegistry,
    ) -> FleetResult<VoteOutcome> {
        let lock = self.session_lock(session_id)?;
        let mut session = lock.session.write().expect("session lock poisoned");

        if session.status != SessionStatus::Active {
            return Err(FleetError::Conflict("session already closed".to_string()));
        }
        if Utc::now() > session.expires_at {
            session.status = SessionStatus::Expired;
            drop(session);
            self.events.publish(
                FleetEvent::new(EventType::RoundtableConcluded)
                    .with_data("session_id", session_id.to_string())
                    .with_data("result", "expired"),
            );
            return Err(FleetError::PreconditionFailed("session expired".to_string()));
        }
        if !session.participants.iter().any(|p| p == voter_id) {
            return Err(FleetError::InvalidArgument(format!(
                "{voter_id} is not a participant of this session"
            )));
        }
        if session.votes.contains_key(voter_id) {
            return Err(FleetError::Conflict(format!("{voter_id} already voted")));
        }
        if let Some(agent) = registry.get(voter_id) {
            if agent.is_excluded_from_candidacy() {
                return Err(FleetError::PreconditionFailed(format!(
                    "{voter_id} is suspended or quarantined"
                )));
            }
        }

        session.votes.insert(voter_id.to_string(), choice);
        self.events.publish(
            FleetEvent::new(EventType::RoundtableVote)
                .with_agent(voter_id)
                .with_data("session_id", session_id.to_string())
                .with_data("choice", format!("{choice:?}")),
        );

        let threshold = session.approval_threshold();
        let approvals = session.approvals();
        let rejections = session.rejections();
        let n = session.participants.len();

        let outcome = if approvals >= threshold {
            session.status = SessionStatus::Approved;
            VoteOutcome::Approved
        } else if rejections > n / 2 {
            session.status = SessionStatus::Rejected;
            VoteOutcome::Rejected
        } else if session.votes.len() == n && approvals < threshold {
            session.status = SessionStatus::Rejected;
            VoteOutcome::Rejected
        } else {
            VoteOutcome::Pending
        };

        if outcome != VoteOutcome::Pending {
            let result = match outcome {
                VoteOutcome::Approved => "approved",
                VoteOutcome::Rejected => "rejected",
                VoteOutcome::Pending => unreachable!(),
            };
            self.events.publish(
                FleetEvent::new(EventType::RoundtableConcluded)
                    .with_data("session_id", session_id.to_string())
                    .with_data("result", result),
            );
        }
        Ok(outcome)
    }

    /// Record an abstain vote for an agent on every active session it
    /// participates in (spec §3: deregistration cascades to an abstain).
    pub fn abstain_everywhere(&self, agent_id: &str) {
        let sessions = self.sessions.read().expect("roundtable lock poisoned").clone();
        for lock in sessions.values() {
            let mut session = lock.session.write().expect("session lock poisoned");
            if session.status == SessionStatus::Active
                && session.participants.iter().any(|p| p == agent_id)
                && !session.votes.contains_key(agent_id)
            {
                session.votes.insert(agent_id.to_string(), Vote::Abstain);
            }
        }
    }

    /// Expire any active session past its deadline without requiring a vote
    /// to trigger it (spec §5: "expire passively ... on next vote or
    /// explicit sweep").
    pub fn sweep(&self) -> Vec<String> {
        let sessions = self.sessions.read().expect("roundtable lock poisoned").clone();
        let mut expired = Vec::new();
        let now = Utc::now();
        for (id, lock) in &sessions {
            let mut session = lock.session.write().expect("session lock poisoned");
            if session.status == SessionStatus::Active && now > session.expires_at {
                session.status = SessionStatus::Expired;
                expired.push(id.clone());
            }
        }
        drop(sessions);
        for id in &expired {
            self.events.publish(
                FleetEvent::new(EventType::RoundtableConcluded)
                    .with_data("session_id", id.clone())
                    .with_data("result", "expired"),
            );
        }
        expired
    }

    pub fn get(&self, session_id: &str) -> FleetResult<RoundtableSession> {
        Ok(self.session_lock(session_id)?.session.read().expect("session lock poisoned").clone())
    }
}

impl Default for Roundtable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::governance::tier::Tier;
    use crate::registry::{Capability, RegisterOptions};
    use crate::trust::TrustVector;
    use std::collections::HashSet;

    fn make_registry_with(n: usize, tier: Tier, trust: f64) -> (AgentRegistry, Vec<String>) {
        let registry = AgentRegistry::new();
        let mut ids = Vec::new();
        for i in 0..n {
            let agent = registry.register(RegisterOptions {
                name: format!("agent-{i}"),
                provider: "anthropic".to_string(),
                model: "claude".to_string(),
                capabilities: HashSet::from([Capability::Orchestration]),
                max_concurrent_tasks: 3,
                max_governance_tier: tier,
                trust_vector: TrustVector::new([trust; 6]).unwrap(),
            });
            ids.push(agent.id);
        }
        (registry, ids)
    }

    #[test]
    fn insufficient_participants_fails_open() {
        let (registry, _ids) = make_registry_with(2, Tier::Dr, 0.99);
        let rt = Roundtable::new();
        let err = rt.open(&registry, "delete prod", Tier::Dr, None, None).unwrap_err();
        assert!(matches!(err, FleetError::PreconditionFailed(_)));
    }

    #[test]
    fn six_agent_approval_scenario() {
        // Scenario 2 from spec §8.
        let (registry, ids) = make_registry_with(6, Tier::Dr, 0.95);
        let rt = Roundtable::new();
        let session = rt.open(&registry, "requires UM", Tier::Um, Some(ids.clone()), None).unwrap();
        assert_eq!(session.participants.len(), 6);

        for id in &ids[0..4] {
            let outcome = rt.cast_vote(&session.id, id, Vote::Approve, &registry).unwrap();
            assert_eq!(outcome, VoteOutcome::Pending);
        }
        let outcome = rt.cast_vote(&session.id, &ids[4], Vote::Approve, &registry).unwrap();
        assert_eq!(outcome, VoteOutcome::Approved);
        assert_eq!(rt.get(&session.id).unwrap().status, SessionStatus::Approved);
    }

    #[test]
    fn duplicate_vote_is_conflict() {
        let (registry, ids) = make_registry_with(3, Tier::Ru, 0.6);
        let rt = Roundtable::new();
        let session = rt.open(&registry, "t", Tier::Ru, Some(ids.clone()), None).unwrap();
        rt.cast_vote(&session.id, &ids[0], Vote::Approve, &registry).unwrap();
        let err = rt.cast_vote(&session.id, &ids[0], Vote::Approve, &registry).unwrap_err();
        assert!(matches!(err, FleetError::Conflict(_)));
    }

    #[test]
    fn majority_rejection_concludes_rejected() {
        let (registry, ids) = make_registry_with(3, Tier::Ru, 0.6);
        let rt = Roundtable::new();
        let session = rt.open(&registry, "t", Tier::Ru, Some(ids.clone()), None).unwrap();
        rt.cast_vote(&session.id, &ids[0], Vote::Reject, &registry).unwrap();
        let outcome = rt.cast_vote(&session.id, &ids[1], Vote::Reject, &registry).unwrap();
        assert_eq!(outcome, VoteOutcome::Rejected);
    }
}
