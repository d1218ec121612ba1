//! Crawl runner (spec §4.5): the backend-agnostic execution contract a
//! crawl agent drives each step, plus sentinel scanning for unsafe pages.

use super::agent::{CrawlAgent, CrawlAgentStatus, Role};
use super::coordinator::CrawlCoordinator;
use super::frontier::Frontier;
use crate::bus::{build_topic, Channel, MessageBus};
use crate::payload::Payload;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// What a backend observed after navigating to a page (spec §4.5
/// "PageObservation"). Field values are never carried — forms expose
/// structure only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageObservation {
    pub url: String,
    pub status_code: u16,
    pub title: Option<String>,
    pub ready_state: String,
    pub viewport: (u32, u32),
    pub scroll: (i64, i64),
    pub elements: Vec<InteractiveElement>,
    pub forms: Vec<FormMetadata>,
    pub dialogs: Vec<String>,
    pub load_time_ms: u64,
    pub text_excerpt: String,
    pub risk_factors: HashMap<String, f64>,
}

/// An interactive element on the page. Data attributes are the only
/// source of link extraction (spec §6 "Backend contract").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractiveElement {
    pub tag: String,
    pub data_attributes: HashMap<String, String>,
    pub visible: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormField {
    pub name: String,
    pub field_type: String,
}

/// Form structure minus values (spec §4.5 "analyzer -> page metadata,
/// form structure minus values").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormMetadata {
    pub action: Option<String>,
    pub fields: Vec<FormField>,
}

/// A 21-dimensional trajectory point synthesized from a step's risk
/// factors, for downstream drift/oscillator consumption (spec §4.4 "Step
/// trajectory"). Per spec §9: the remaining context-encoding/embedding
/// dimensions the original computes are left at explicit zero rather than
/// invented.
pub const TRAJECTORY_DIMENSIONS: usize = 21;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrajectoryPoint {
    pub values: [f64; TRAJECTORY_DIMENSIONS],
}

impl TrajectoryPoint {
    /// Build a trajectory point from an observation's risk factors. Factors
    /// are read in a fixed, well-known key order so the same risk-factor
    /// name always lands in the same dimension; any dimension with no
    /// corresponding factor is left at zero.
    pub fn from_risk_factors(factors: &HashMap<String, f64>) -> Self {
        const KEYS: [&str; TRAJECTORY_DIMENSIONS] = [
            "redirect_chain_length",
            "external_script_count",
            "form_count",
            "password_field_count",
            "obfuscated_script_score",
            "domain_age_days_norm",
            "tls_valid",
            "known_bad_domain",
            "popup_count",
            "download_prompt_count",
            "iframe_count",
            "cross_origin_iframe_count",
            "js_eval_count",
            "cookie_count",
            "third_party_cookie_count",
            "text_entropy",
            "link_density",
            "hidden_element_count",
            "clipboard_access_attempt",
            "geolocation_request",
            "notification_request",
        ];
        let mut values = [0.0; TRAJECTORY_DIMENSIONS];
        for (i, key) in KEYS.iter().enumerate() {
            if let Some(v) = factors.get(*key) {
                values[i] = *v;
            }
        }
        Self { values }
    }
}

/// Decision recommended by a governance synthesis or an injected detection
/// function (spec §6 "Detection function").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Allow,
    Quarantine,
    Escalate,
    Deny,
}

/// The governance result synthesized for a single step (spec §4.5
/// "synthesize a governance result (decision, riskScore, five risk
/// factors)").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernanceResult {
    pub decision: Decision,
    pub risk_score: f64,
    pub risk_factors: [f64; 5],
}

/// The five risk-factor keys a governance result tracks, read off the
/// same `PageObservation.risk_factors` map the trajectory point reads.
const GOVERNANCE_RISK_KEYS: [&str; 5] =
    ["password_field_count", "obfuscated_script_score", "known_bad_domain", "popup_count", "cross_origin_iframe_count"];

impl GovernanceResult {
    /// `riskScore` is the strongest of the five normalized factors; the
    /// decision escalates through Allow/Quarantine/Escalate once that
    /// score crosses fixed bands, and is forced to Deny whenever the
    /// six-check heuristic (spec §4.4 "Sentinel scan fallback") flags the
    /// page outright.
    pub fn synthesize(observation: &PageObservation) -> Self {
        let mut risk_factors = [0.0; 5];
        for (i, key) in GOVERNANCE_RISK_KEYS.iter().enumerate() {
            risk_factors[i] = observation.risk_factors.get(*key).copied().unwrap_or(0.0);
        }
        let risk_score = risk_factors.iter().copied().fold(0.0_f64, f64::max).clamp(0.0, 1.0);
        let decision = if heuristic_detector(observation) {
            Decision::Deny
        } else if risk_score >= 0.5 {
            Decision::Escalate
        } else if risk_score > 0.0 {
            Decision::Quarantine
        } else {
            Decision::Allow
        };
        Self { decision, risk_score, risk_factors }
    }
}

/// An execution backend a crawl runner drives. Implementations wrap a
/// specific browser automation or HTTP client; the runner contract is
/// oblivious to which. None of these may throw through `step` except
/// `close`, which is treated as best-effort (spec §6 "Backend contract").
#[async_trait]
pub trait Backend: Send + Sync {
    async fn initialize(&mut self) -> Result<(), String>;
    async fn navigate(&mut self, url: &str) -> Result<(), String>;
    async fn observe(&mut self) -> Result<PageObservation, String>;
    async fn close(&mut self) -> Result<(), String>;
    fn is_connected(&self) -> bool;
}

/// Outcome of a single `step` call that was actually attempted (i.e. the
/// agent was neither gated out nor unmanaged). A backend error anywhere
/// in the contract produces `Failed` rather than propagating (spec §4.5:
/// "never throw out of Step").
#[derive(Debug, Clone)]
pub enum StepOutcome {
    Completed { observation: PageObservation, trajectory: TrajectoryPoint, governance: GovernanceResult, extracted: Payload },
    Failed { reason: String },
}

fn extract_links(observation: &PageObservation) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for element in &observation.elements {
        let Some(href) = element.data_attributes.get("href") else { continue };
        if !(href.starts_with("http://") || href.starts_with("https://")) {
            continue;
        }
        if seen.insert(href.clone()) {
            links.push(href.clone());
        }
    }
    links
}

fn extract_page_metadata(observation: &PageObservation) -> Value {
    serde_json::json!({
        "url": observation.url,
        "title": observation.title,
        "ready_state": observation.ready_state,
        "load_time_ms": observation.load_time_ms,
        "forms": observation.forms.iter().map(|form| {
            serde_json::json!({
                "action": form.action,
                "fields": form.fields.iter().map(|f| {
                    serde_json::json!({"name": f.name, "type": f.field_type})
                }).collect::<Vec<_>>(),
            })
        }).collect::<Vec<_>>(),
    })
}

async fn fail_step(
    frontier: &Frontier,
    coordinator: &CrawlCoordinator,
    agent_id: &str,
    url: &str,
    reason: String,
) -> StepOutcome {
    let _ = frontier.fail(url, true);
    let _ = coordinator.record_step_failure(agent_id);
    StepOutcome::Failed { reason }
}

/// Drive `agent_id` through one step of the navigate/observe/extract
/// contract (spec §4.5 "Step(agentId) contract"). Returns `None` when the
/// agent is unmanaged, quarantined, or holds a role that never drives a
/// step directly (sentinel/reporter act on other agents' output); returns
/// `Some(StepOutcome::Failed)` rather than propagating any backend error.
pub async fn step(
    agent_id: &str,
    backend: &mut dyn Backend,
    coordinator: &CrawlCoordinator,
    frontier: &Frontier,
) -> Option<StepOutcome> {
    let agent = coordinator.get_agent(agent_id)?;
    if agent.status == CrawlAgentStatus::Quarantined || matches!(agent.role, Role::Sentinel | Role::Reporter) {
        return None;
    }

    let entry = match coordinator.assign_next(agent_id, frontier) {
        Ok(Some(entry)) => entry,
        Ok(None) => return Some(StepOutcome::Failed { reason: "frontier_empty".to_string() }),
        Err(e) => return Some(StepOutcome::Failed { reason: e.to_string() }),
    };

    if !backend.is_connected() {
        if let Err(e) = backend.initialize().await {
            return Some(fail_step(frontier, coordinator, agent_id, &entry.url, e).await);
        }
    }
    if let Err(e) = backend.navigate(&entry.url).await {
        return Some(fail_step(frontier, coordinator, agent_id, &entry.url, e).await);
    }
    let observation = match backend.observe().await {
        Ok(o) => o,
        Err(e) => return Some(fail_step(frontier, coordinator, agent_id, &entry.url, e).await),
    };

    let governance = GovernanceResult::synthesize(&observation);
    let trajectory = TrajectoryPoint::from_risk_factors(&observation.risk_factors);

    let extracted = match agent.role {
        Role::Scout => {
            let links = extract_links(&observation);
            for link in &links {
                frontier.add(link, entry.depth + 1, 1.0, Some(entry.url.clone()));
            }
            Payload::LinkList(links)
        }
        Role::Analyzer => Payload::FormMetadata(extract_page_metadata(&observation)),
        Role::Sentinel | Role::Reporter => unreachable!("gated above"),
    };

    let _ = frontier.complete(&entry.url);
    let _ = coordinator.record_step_success(agent_id, trajectory.clone(), governance.clone());

    Some(StepOutcome::Completed { observation, trajectory, governance, extracted })
}

/// A detector injected into a sentinel scan: given an agent's full
/// trajectory history, returns `(combinedScore, flagged, flagCount)`
/// (spec §6 "Detection function", simplified to the trajectory-only
/// signature this crate's crawl agents actually carry — no tongue index
/// or external config is modeled here).
pub type DetectorFn = dyn Fn(&[TrajectoryPoint]) -> (f64, bool, usize) + Send + Sync;

/// Heuristic fallback: flags an observation unsafe once at least 3 risk
/// signals cross their individual thresholds (spec §4.4 "Sentinel scan
/// fallback").
pub fn heuristic_detector(observation: &PageObservation) -> bool {
    let mut denies = 0;
    let checks: [(&str, f64); 6] = [
        ("password_field_count", 1.0),
        ("obfuscated_script_score", 0.5),
        ("known_bad_domain", 0.5),
        ("popup_count", 2.0),
        ("clipboard_access_attempt", 0.5),
        ("cross_origin_iframe_count", 3.0),
    ];
    for (key, threshold) in checks {
        if observation.risk_factors.get(key).copied().unwrap_or(0.0) >= threshold {
            denies += 1;
        }
    }
    denies >= 3
}

/// Runs a sentinel's periodic safety sweep over every other managed agent
/// (spec §4.5 "SentinelScan(sentinelId)").
pub struct SentinelScan<'a> {
    detector: Option<&'a DetectorFn>,
    min_trajectory_length: usize,
    quarantine_threshold: f64,
}

impl<'a> SentinelScan<'a> {
    pub fn new(detector: &'a DetectorFn, min_trajectory_length: usize, quarantine_threshold: f64) -> Self {
        Self { detector: Some(detector), min_trajectory_length, quarantine_threshold }
    }

    /// No injected detector: falls back to counting `Deny` decisions in
    /// the agent's recent governance log (spec §4.5 "a fallback that
    /// flags when the recent governance log contains ≥3 denies").
    pub fn with_heuristic(min_trajectory_length: usize, quarantine_threshold: f64) -> SentinelScan<'static> {
        SentinelScan { detector: None, min_trajectory_length, quarantine_threshold }
    }

    fn judge(&self, agent: &CrawlAgent) -> (f64, bool, usize) {
        match self.detector {
            Some(detector) => detector(&agent.trajectory),
            None => {
                let denies = agent.recent_denies(agent.governance_log.len());
                let combined_score = (denies as f64 / 3.0).min(1.0);
                (combined_score, denies >= 3, denies)
            }
        }
    }

    /// Run one pass. Agents below `min_trajectory_length` are skipped.
    /// Flagged agents at or above `quarantine_threshold` are quarantined
    /// via the coordinator and a `sentinel.quarantine_notice` message is
    /// published for each. Returns the ids quarantined this pass.
    pub fn scan(&self, sentinel_id: &str, coordinator: &CrawlCoordinator, bus: &MessageBus) -> Vec<String> {
        let mut quarantined = Vec::new();
        for agent in coordinator.agents_snapshot() {
            if agent.id == sentinel_id || agent.trajectory.len() < self.min_trajectory_length {
                continue;
            }
            let (combined_score, flagged, flag_count) = self.judge(&agent);
            if !(flagged && combined_score >= self.quarantine_threshold) {
                continue;
            }
            if coordinator.quarantine_agent(&agent.id).is_ok() {
                bus.publish(
                    build_topic(Channel::Sentinel, "quarantine_notice"),
                    sentinel_id,
                    Payload::Telemetry(serde_json::json!({
                        "agent_id": agent.id,
                        "combined_score": combined_score,
                        "flag_count": flag_count,
                    })),
                );
                quarantined.push(agent.id);
            }
        }
        quarantined
    }
}
