//! Crawl agents (spec §4.4): distinct from [`crate::registry::Agent`] — a
//! crawl agent holds role/position/safety state scoped to the crawl
//! coordinator rather than fleet-wide trust/capability state.

use super::runner::{Decision, GovernanceResult, TrajectoryPoint};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Scout,
    Analyzer,
    Sentinel,
    Reporter,
}

impl Role {
    /// Position of this role in the 3x3 role braid grid (spec §4.4).
    pub fn grid_position(self) -> (i32, i32) {
        match self {
            Role::Scout => (1, 0),
            Role::Analyzer => (1, 1),
            Role::Sentinel => (0, 1),
            Role::Reporter => (0, 0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlAgentStatus {
    Idle,
    Crawling,
    Analyzing,
    Reporting,
    Quarantined,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlAgent {
    pub id: String,
    pub role: Role,
    pub status: CrawlAgentStatus,
    pub current_url: Option<String>,
    pub urls_visited: u64,
    pub urls_failed: u64,
    /// 0.0 (unsafe) to 1.0 (fully trusted); below `minSafetyScore` the
    /// coordinator auto-quarantines the agent (spec §4.4 "Sentinel").
    pub safety_score: f64,
    pub role_switch_count: u32,
    pub last_activity: DateTime<Utc>,
    /// Trajectory points appended by the runner after each completed step
    /// (spec §4.5 "append trajectory point and governance record to the
    /// managed agent").
    pub trajectory: Vec<TrajectoryPoint>,
    pub governance_log: Vec<GovernanceResult>,
    pub error_count: u64,
}

impl CrawlAgent {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
            status: CrawlAgentStatus::Idle,
            current_url: None,
            urls_visited: 0,
            urls_failed: 0,
            safety_score: 1.0,
            role_switch_count: 0,
            last_activity: Utc::now(),
            trajectory: Vec::new(),
            governance_log: Vec::new(),
            error_count: 0,
        }
    }

    pub fn push_trajectory(&mut self, point: TrajectoryPoint) {
        self.trajectory.push(point);
    }

    pub fn push_governance(&mut self, result: GovernanceResult) {
        self.governance_log.push(result);
    }

    /// Count of `Decision::Deny` entries among the last `n` governance
    /// records (spec §4.5 "SentinelScan fallback").
    pub fn recent_denies(&self, n: usize) -> usize {
        self.governance_log.iter().rev().take(n).filter(|g| g.decision == Decision::Deny).count()
    }

    pub fn record_visit(&mut self, url: &str) {
        self.current_url = Some(url.to_string());
        self.urls_visited += 1;
        self.last_activity = Utc::now();
    }

    pub fn record_failure(&mut self) {
        self.urls_failed += 1;
        self.error_count += 1;
        self.last_activity = Utc::now();
    }

    pub fn switch_role(&mut self, role: Role) {
        self.role = role;
        self.role_switch_count += 1;
        self.last_activity = Utc::now();
    }

    pub fn apply_safety_delta(&mut self, delta: f64) {
        self.safety_score = (self.safety_score + delta).clamp(0.0, 1.0);
    }
}
