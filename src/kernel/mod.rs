//! Node Kernel (spec §4.9): per-node governance envelope — policy
//! manifest lifecycle, invariant checks, audit log, human override.

use crate::oscillator::Mode;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::RwLock;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyParams {
    pub allowed_roles: Vec<String>,
    pub min_trust: f64,
    pub energy_floor: f64,
    pub suppressed_modes: Vec<Mode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyManifest {
    pub epoch: u64,
    pub params: PolicyParams,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(with = "crate::trust::fingerprint_hex")]
    pub signature: [u8; 32],
}

impl PolicyManifest {
    fn canonical_bytes(epoch: u64, params: &PolicyParams, issued_at: DateTime<Utc>, expires_at: DateTime<Utc>) -> Vec<u8> {
        let payload = serde_json::json!({
            "epoch": epoch,
            "allowed_roles": params.allowed_roles,
            "min_trust": params.min_trust,
            "energy_floor": params.energy_floor,
            "suppressed_modes": params.suppressed_modes,
            "issued_at": issued_at.to_rfc3339(),
            "expires_at": expires_at.to_rfc3339(),
        });
        serde_json::to_vec(&payload).expect("manifest payload always serializes")
    }

    fn signed(key: &[u8; 32], epoch: u64, params: PolicyParams, issued_at: DateTime<Utc>, expires_at: DateTime<Utc>) -> Self {
        let bytes = Self::canonical_bytes(epoch, &params, issued_at, expires_at);
        let signature = *blake3::keyed_hash(key, &bytes).as_bytes();
        Self { epoch, params, issued_at, expires_at, signature }
    }

    fn signature_valid(&self, key: &[u8; 32]) -> bool {
        let bytes = Self::canonical_bytes(self.epoch, &self.params, self.issued_at, self.expires_at);
        let expected = *blake3::keyed_hash(key, &bytes).as_bytes();
        expected == self.signature
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvariantKind {
    PolicyPresent,
    EnergyFloor,
    MinTrust,
    AllowedRole,
    SuppressedMode,
    HazardFlag,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub neighbor_count: usize,
    pub violations: Vec<InvariantKind>,
    pub allowed: bool,
}

/// The live state a `checkInvariants` call is evaluated against.
#[derive(Debug, Clone, Copy)]
pub struct NodeState {
    pub energy: f64,
    pub trust: f64,
    pub role: &'static str,
    pub current_mode: Mode,
    pub hazard_flag: bool,
    pub neighbor_count: usize,
}

pub struct NodeKernel {
    signing_key: [u8; 32],
    manifest: RwLock<Option<PolicyManifest>>,
    history: RwLock<Vec<PolicyManifest>>,
    audit_log: RwLock<Vec<AuditEntry>>,
    human_override: RwLock<bool>,
}

impl NodeKernel {
    pub fn new() -> Self {
        let mut signing_key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut signing_key);
        Self {
            signing_key,
            manifest: RwLock::new(None),
            history: RwLock::new(Vec::new()),
            audit_log: RwLock::new(Vec::new()),
            human_override: RwLock::new(false),
        }
    }

    /// `epoch = previousEpoch + 1`, signature over the canonical
    /// serialization of every other field, keyed with this kernel's own
    /// signing key (spec §4.9 "Policy lifecycle").
    pub fn create_policy(&self, params: PolicyParams, ttl: Duration) -> PolicyManifest {
        let previous_epoch = self.manifest.read().expect("kernel lock poisoned").as_ref().map(|m| m.epoch).unwrap_or(0);
        let now = Utc::now();
        PolicyManifest::signed(&self.signing_key, previous_epoch + 1, params, now, now + ttl)
    }

    /// Rejects if the signature doesn't verify, the epoch isn't strictly
    /// greater than the current one, or the manifest has already expired
    /// (spec §4.9 "ApplyPolicy"). On success the previous manifest is
    /// archived into history.
    pub fn apply_policy(&self, candidate: PolicyManifest) -> Result<(), String> {
        if !candidate.signature_valid(&self.signing_key) {
            return Err("signature_invalid".to_string());
        }
        if Utc::now() > candidate.expires_at {
            return Err("policy_expired".to_string());
        }
        let mut manifest = self.manifest.write().expect("kernel lock poisoned");
        if let Some(current) = manifest.as_ref() {
            if candidate.epoch <= current.epoch {
                return Err("epoch_not_monotonic".to_string());
            }
        }
        if let Some(previous) = manifest.take() {
            self.history.write().expect("kernel lock poisoned").push(previous);
        }
        *manifest = Some(candidate);
        Ok(())
    }

    pub fn current_policy(&self) -> Option<PolicyManifest> {
        self.manifest.read().expect("kernel lock poisoned").clone()
    }

    pub fn history(&self) -> Vec<PolicyManifest> {
        self.history.read().expect("kernel lock poisoned").clone()
    }

    pub fn set_human_override(&self, enabled: bool) {
        *self.human_override.write().expect("kernel lock poisoned") = enabled;
    }

    /// Evaluate the six invariants from spec §4.9 against `state` for
    /// `action`, append an audit entry, and return whether the action is
    /// allowed. Under human override every invariant reports passed and
    /// the action is always allowed.
    pub fn check_invariants(&self, action: &str, state: NodeState) -> bool {
        let overridden = *self.human_override.read().expect("kernel lock poisoned");
        let mut violations = Vec::new();

        if !overridden {
            let manifest = self.manifest.read().expect("kernel lock poisoned");
            let policy_ok = manifest.as_ref().is_some_and(|m| Utc::now() <= m.expires_at);
            if !policy_ok {
                violations.push(InvariantKind::PolicyPresent);
            }
            if let Some(m) = manifest.as_ref() {
                if state.energy < m.params.energy_floor {
                    violations.push(InvariantKind::EnergyFloor);
                }
                if state.trust < m.params.min_trust {
                    violations.push(InvariantKind::MinTrust);
                }
                if !m.params.allowed_roles.iter().any(|r| r == state.role) {
                    violations.push(InvariantKind::AllowedRole);
                }
                if m.params.suppressed_modes.contains(&state.current_mode) {
                    violations.push(InvariantKind::SuppressedMode);
                }
            }
            if state.hazard_flag {
                violations.push(InvariantKind::HazardFlag);
            }
        }

        let allowed = overridden || violations.is_empty();
        self.audit_log.write().expect("kernel lock poisoned").push(AuditEntry {
            timestamp: Utc::now(),
            action: action.to_string(),
            neighbor_count: state.neighbor_count,
            violations,
            allowed,
        });
        allowed
    }

    /// Count disallowed actions among the last `n` audit entries.
    pub fn recent_violation_count(&self, n: usize) -> usize {
        let log = self.audit_log.read().expect("kernel lock poisoned");
        log.iter().rev().take(n).filter(|e| !e.allowed).count()
    }

    pub fn audit_log(&self) -> Vec<AuditEntry> {
        self.audit_log.read().expect("kernel lock poisoned").clone()
    }
}

impl Default for NodeKernel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_params() -> PolicyParams {
        PolicyParams {
            allowed_roles: vec!["scout".to_string()],
            min_trust: 0.3,
            energy_floor: 0.1,
            suppressed_modes: vec![Mode::Hazard],
        }
    }

    fn healthy_state() -> NodeState {
        NodeState { energy: 0.9, trust: 0.9, role: "scout", current_mode: Mode::Explore, hazard_flag: false, neighbor_count: 2 }
    }

    #[test]
    fn policy_monotonicity_scenario() {
        // Scenario 6 from spec §8.
        let kernel = NodeKernel::new();
        let m1 = kernel.create_policy(default_params(), Duration::hours(1));
        assert_eq!(m1.epoch, 1);
        kernel.apply_policy(m1.clone()).unwrap();

        let err = kernel.apply_policy(m1.clone()).unwrap_err();
        assert_eq!(err, "epoch_not_monotonic");

        let m2 = kernel.create_policy(default_params(), Duration::hours(1));
        assert_eq!(m2.epoch, 2);
        kernel.apply_policy(m2).unwrap();
        assert!(kernel.history().iter().any(|m| m.epoch == 1));
    }

    #[test]
    fn invalid_signature_rejected() {
        let kernel = NodeKernel::new();
        let mut m1 = kernel.create_policy(default_params(), Duration::hours(1));
        m1.signature[0] ^= 0xFF;
        let err = kernel.apply_policy(m1).unwrap_err();
        assert_eq!(err, "signature_invalid");
    }

    #[test]
    fn expired_policy_rejected_at_apply() {
        let kernel = NodeKernel::new();
        let m1 = kernel.create_policy(default_params(), Duration::milliseconds(-1));
        let err = kernel.apply_policy(m1).unwrap_err();
        assert_eq!(err, "policy_expired");
    }

    #[test]
    fn human_override_bypasses_all_invariants() {
        let kernel = NodeKernel::new();
        kernel.set_human_override(true);
        let mut state = healthy_state();
        state.hazard_flag = true;
        state.trust = 0.0;
        assert!(kernel.check_invariants("launch", state));
    }

    #[test]
    fn invariant_violation_without_policy_is_recorded() {
        let kernel = NodeKernel::new();
        let allowed = kernel.check_invariants("act", healthy_state());
        assert!(!allowed);
        assert_eq!(kernel.recent_violation_count(1), 1);
    }
}
