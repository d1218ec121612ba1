//! Mission Coordinator & Squad (spec §4.10): BFT quorum voting across a
//! 6-member squad, with phase- and crisis-driven mode reassignment.

use crate::events::{EventChannel, EventType, FleetEvent};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

pub const SQUAD_SIZE: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Routine,
    Critical,
    Destructive,
}

impl Severity {
    /// `routine=3, critical=4, destructive=5` (spec §4.10).
    pub fn quorum(self) -> usize {
        match self {
            Severity::Routine => 3,
            Severity::Critical => 4,
            Severity::Destructive => 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Transit,
    ScienceOps,
    Maintenance,
    Crisis,
    EarthSync,
    Standby,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecialistMode {
    Pilot,
    Scientist,
    Engineer,
    Medic,
    Comms,
    Commander,
}

fn phase_assignment(phase: Phase) -> [SpecialistMode; SQUAD_SIZE] {
    use SpecialistMode::*;
    match phase {
        Phase::Transit => [Pilot, Engineer, Comms, Medic, Scientist, Commander],
        Phase::ScienceOps => [Scientist, Scientist, Engineer, Medic, Comms, Commander],
        Phase::Maintenance => [Engineer, Engineer, Pilot, Medic, Comms, Commander],
        Phase::Crisis => [Commander, Engineer, Medic, Medic, Comms, Pilot],
        Phase::EarthSync => [Comms, Comms, Scientist, Engineer, Medic, Commander],
        Phase::Standby => [Commander, Pilot, Engineer, Medic, Comms, Scientist],
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Vote {
    Approve,
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VotingStatus {
    Open,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VotingSession {
    pub id: String,
    pub proposal: String,
    pub proposer: String,
    pub severity: Severity,
    pub votes: HashMap<String, Vote>,
    pub status: VotingStatus,
}

impl VotingSession {
    fn approvals(&self) -> usize {
        self.votes.values().filter(|v| **v == Vote::Approve).count()
    }

    fn rejections(&self) -> usize {
        self.votes.values().filter(|v| **v == Vote::Reject).count()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SquadMember {
    pub id: String,
    pub mode: SpecialistMode,
    pub last_heartbeat: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrisisAssessment {
    pub crisis_type: String,
    pub severity: Severity,
    pub requires_earth_contact: bool,
    pub estimated_resolution_minutes: u32,
}

struct SquadState {
    members: Vec<SquadMember>,
    phase: Phase,
    crisis_active: bool,
    sessions: HashMap<String, VotingSession>,
}

pub struct Squad {
    state: RwLock<SquadState>,
    heartbeat_staleness: Duration,
    events: EventChannel,
}

impl Squad {
    pub fn new(member_ids: Vec<String>, heartbeat_staleness: Duration) -> Self {
        let now = Utc::now();
        let assignment = phase_assignment(Phase::Standby);
        let members = member_ids
            .into_iter()
            .enumerate()
            .take(SQUAD_SIZE)
            .map(|(i, id)| SquadMember { id, mode: assignment[i], last_heartbeat: now })
            .collect();
        Self {
            state: RwLock::new(SquadState { members, phase: Phase::Standby, crisis_active: false, sessions: HashMap::new() }),
            heartbeat_staleness,
            events: EventChannel::new(),
        }
    }

    pub fn events(&self) -> &EventChannel {
        &self.events
    }

    pub fn members(&self) -> Vec<SquadMember> {
        self.state.read().expect("squad lock poisoned").members.clone()
    }

    pub fn heartbeat(&self, member_id: &str) -> bool {
        let mut state = self.state.write().expect("squad lock poisoned");
        match state.members.iter_mut().find(|m| m.id == member_id) {
            Some(member) => {
                member.last_heartbeat = Utc::now();
                true
            }
            None => false,
        }
    }

    fn is_healthy(&self, state: &SquadState, member_id: &str) -> bool {
        state
            .members
            .iter()
            .find(|m| m.id == member_id)
            .is_some_and(|m| Utc::now() - m.last_heartbeat <= self.heartbeat_staleness)
    }

    pub fn open_session(&self, id: impl Into<String>, proposal: impl Into<String>, proposer: impl Into<String>, severity: Severity) -> String {
        let session = VotingSession {
            id: id.into(),
            proposal: proposal.into(),
            proposer: proposer.into(),
            severity,
            votes: HashMap::new(),
            status: VotingStatus::Open,
        };
        let id = session.id.clone();
        self.state.write().expect("squad lock poisoned").sessions.insert(id.clone(), session);
        id
    }

    /// A member may vote exactly once; unhealthy members (stale heartbeat)
    /// cannot vote (spec §4.10 "VotingSession").
    pub fn cast_vote(&self, session_id: &str, member_id: &str, vote: Vote) -> Result<VotingStatus, String> {
        let mut state = self.state.write().expect("squad lock poisoned");
        if !self.is_healthy(&state, member_id) {
            return Err(format!("{member_id} is unhealthy and cannot vote"));
        }
        let n = state.members.len();
        let session = state.sessions.get_mut(session_id).ok_or_else(|| format!("session {session_id} not found"))?;
        if session.status != VotingStatus::Open {
            return Err("session already closed".to_string());
        }
        if session.votes.contains_key(member_id) {
            return Err(format!("{member_id} already voted"));
        }
        session.votes.insert(member_id.to_string(), vote);

        let quorum = session.severity.quorum();
        if session.approvals() >= quorum {
            session.status = VotingStatus::Approved;
        } else if session.rejections() >= n - quorum + 1 {
            session.status = VotingStatus::Rejected;
        }
        Ok(session.status)
    }

    pub fn get_session(&self, session_id: &str) -> Option<VotingSession> {
        self.state.read().expect("squad lock poisoned").sessions.get(session_id).cloned()
    }

    /// Switch mission phase, reassigning every member's specialist mode
    /// (spec §4.10 "Mission phases").
    pub fn switch_phase(&self, phase: Phase) {
        let assignment = phase_assignment(phase);
        let mut state = self.state.write().expect("squad lock poisoned");
        state.phase = phase;
        for (member, mode) in state.members.iter_mut().zip(assignment.iter()) {
            member.mode = *mode;
        }
        drop(state);
        self.events.publish(FleetEvent::new(EventType::TrustUpdated).with_data("mission_phase", format!("{phase:?}")));
    }

    pub fn phase(&self) -> Phase {
        self.state.read().expect("squad lock poisoned").phase
    }

    /// Switches to crisis mode assignment, flags the crisis active, and
    /// returns an assessment scaled by severity (spec §4.10
    /// "handleCrisis").
    pub fn handle_crisis(&self, crisis_type: &str, severity: Severity) -> CrisisAssessment {
        self.switch_phase(Phase::Crisis);
        self.state.write().expect("squad lock poisoned").crisis_active = true;
        let (requires_earth_contact, minutes_per_severity) = match severity {
            Severity::Routine => (false, 15),
            Severity::Critical => (true, 45),
            Severity::Destructive => (true, 120),
        };
        CrisisAssessment {
            crisis_type: crisis_type.to_string(),
            severity,
            requires_earth_contact,
            estimated_resolution_minutes: minutes_per_severity,
        }
    }

    pub fn crisis_active(&self) -> bool {
        self.state.read().expect("squad lock poisoned").crisis_active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn squad() -> Squad {
        let ids: Vec<String> = (0..SQUAD_SIZE).map(|i| format!("member-{i}")).collect();
        Squad::new(ids, Duration::seconds(60))
    }

    #[test]
    fn critical_quorum_requires_four_of_six() {
        let s = squad();
        let id = s.open_session("s1", "vent reactor", "member-0", Severity::Critical);
        for i in 0..3 {
            let status = s.cast_vote(&id, &format!("member-{i}"), Vote::Approve).unwrap();
            assert_eq!(status, VotingStatus::Open);
        }
        let status = s.cast_vote(&id, "member-3", Vote::Approve).unwrap();
        assert_eq!(status, VotingStatus::Approved);
    }

    #[test]
    fn unhealthy_member_cannot_vote() {
        let s = Squad::new((0..SQUAD_SIZE).map(|i| format!("member-{i}")).collect(), Duration::milliseconds(1));
        std::thread::sleep(std::time::Duration::from_millis(5));
        let id = s.open_session("s1", "proposal", "member-0", Severity::Routine);
        let err = s.cast_vote(&id, "member-0", Vote::Approve).unwrap_err();
        assert!(err.contains("unhealthy"));
    }

    #[test]
    fn heartbeat_keeps_member_healthy() {
        let s = Squad::new((0..SQUAD_SIZE).map(|i| format!("member-{i}")).collect(), Duration::milliseconds(50));
        std::thread::sleep(std::time::Duration::from_millis(20));
        s.heartbeat("member-0");
        let id = s.open_session("s1", "proposal", "member-0", Severity::Routine);
        let status = s.cast_vote(&id, "member-0", Vote::Approve);
        assert!(status.is_ok());
    }

    #[test]
    fn crisis_reassigns_modes_and_flags_active() {
        let s = squad();
        let assessment = s.handle_crisis("hull breach", Severity::Destructive);
        assert_eq!(s.phase(), Phase::Crisis);
        assert!(s.crisis_active());
        assert!(assessment.requires_earth_contact);
        assert_eq!(assessment.estimated_resolution_minutes, 120);
        assert_eq!(s.members()[0].mode, SpecialistMode::Commander);
    }
}
