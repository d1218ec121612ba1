//! Governed Drift (spec §4.7): a bounded stochastic exploration vector per
//! node, gated by trust/energy/risk/mode and decaying when undriven.

use crate::geometry::Vec3;
use crate::oscillator::Mode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Clone, Copy)]
pub struct DriftConfig {
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
    pub delta: f64,
    pub max_drift_magnitude: f64,
    pub natural_decay: f64,
    pub trust_threshold: f64,
    pub energy_floor: f64,
    pub risk_ceiling: f64,
    pub suppression_modes: Vec<Mode>,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            alpha: 0.4,
            beta: 0.3,
            gamma: 0.3,
            delta: 1.0,
            max_drift_magnitude: 1.0,
            natural_decay: 0.05,
            trust_threshold: 0.2,
            energy_floor: 0.1,
            risk_ceiling: 0.8,
            suppression_modes: vec![Mode::Hazard, Mode::Regroup],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftHistoryEntry {
    pub vector: Vec3,
    pub timestamp: DateTime<Utc>,
    pub zeroed: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct NodeDriftState {
    current: Option<Vec3>,
    history: Vec<DriftHistoryEntry>,
}

/// A node's inputs to the drift budget and auto-zero gating for one step.
#[derive(Debug, Clone, Copy)]
pub struct DriftInputs {
    pub mode: Mode,
    pub trust: f64,
    pub energy: f64,
    pub risk: f64,
    pub uncertainty: f64,
}

pub struct GovernedDrift {
    config: DriftConfig,
    nodes: RwLock<HashMap<String, NodeDriftState>>,
}

impl GovernedDrift {
    pub fn new(config: DriftConfig) -> Self {
        Self { config, nodes: RwLock::new(HashMap::new()) }
    }

    /// Textual reasons any auto-zero condition fires for these inputs
    /// (spec §4.7 "Auto-zero conditions"; boundary behavior in §8 requires
    /// *all* applicable reasons to be reported, not just the first).
    pub fn auto_zero_reasons(&self, inputs: &DriftInputs) -> Vec<String> {
        let mut reasons = Vec::new();
        if self.config.suppression_modes.contains(&inputs.mode) {
            reasons.push(format!("mode {:?} is suppressed", inputs.mode));
        }
        if inputs.trust < self.config.trust_threshold {
            reasons.push(format!("trust {:.2} below threshold {:.2}", inputs.trust, self.config.trust_threshold));
        }
        if inputs.energy < self.config.energy_floor {
            reasons.push(format!("energy {:.2} below floor {:.2}", inputs.energy, self.config.energy_floor));
        }
        if inputs.risk > self.config.risk_ceiling {
            reasons.push(format!("risk {:.2} above ceiling {:.2}", inputs.risk, self.config.risk_ceiling));
        }
        reasons
    }

    /// `(alpha*uncertainty + beta*energy + gamma*trust) * exp(-delta*risk)`,
    /// capped to `maxDriftMagnitude` (spec §4.7 "Budget").
    pub fn budget(&self, inputs: &DriftInputs) -> f64 {
        let raw = (self.config.alpha * inputs.uncertainty
            + self.config.beta * inputs.energy
            + self.config.gamma * inputs.trust)
            * (-self.config.delta * inputs.risk).exp();
        raw.min(self.config.max_drift_magnitude).max(0.0)
    }

    /// Compose this step's drift for `node_id`. `direction` is an optional
    /// requested heading; absent one, a prior drift decays toward zero
    /// (spec §4.7 "Compose").
    pub fn compose(&self, node_id: &str, inputs: &DriftInputs, direction: Option<Vec3>) -> Vec3 {
        let reasons = self.auto_zero_reasons(inputs);
        let mut nodes = self.nodes.write().expect("drift lock poisoned");
        let state = nodes.entry(node_id.to_string()).or_default();

        if !reasons.is_empty() {
            state.current = Some(Vec3::ZERO);
            state.history.push(DriftHistoryEntry {
                vector: Vec3::ZERO,
                timestamp: Utc::now(),
                zeroed: true,
                reason: Some(reasons.join("; ")),
            });
            return Vec3::ZERO;
        }

        let budget = self.budget(inputs);
        let drift = if let Some(d) = direction {
            d.normalize().scale(budget)
        } else if let Some(prior) = state.current {
            let magnitude = (prior.magnitude() - self.config.natural_decay).max(0.0);
            if magnitude <= f64::EPSILON {
                Vec3::ZERO
            } else {
                prior.normalize().scale(magnitude)
            }
        } else {
            Vec3::ZERO
        };

        state.current = Some(drift);
        state.history.push(DriftHistoryEntry { vector: drift, timestamp: Utc::now(), zeroed: drift == Vec3::ZERO, reason: None });
        drift
    }

    pub fn current(&self, node_id: &str) -> Vec3 {
        self.nodes.read().expect("drift lock poisoned").get(node_id).and_then(|s| s.current).unwrap_or(Vec3::ZERO)
    }

    /// Total drift energy `sum(|v|^2)` across every tracked node's current
    /// vector (spec §4.7 "Analysis").
    pub fn total_drift_energy(&self) -> f64 {
        self.nodes
            .read()
            .expect("drift lock poisoned")
            .values()
            .map(|s| s.current.unwrap_or(Vec3::ZERO).dot(s.current.unwrap_or(Vec3::ZERO)))
            .sum()
    }

    pub fn average_magnitude(&self) -> f64 {
        let nodes = self.nodes.read().expect("drift lock poisoned");
        if nodes.is_empty() {
            return 0.0;
        }
        let total: f64 = nodes.values().map(|s| s.current.unwrap_or(Vec3::ZERO).magnitude()).sum();
        total / nodes.len() as f64
    }

    pub fn zero_ratio(&self, node_id: &str) -> f64 {
        let nodes = self.nodes.read().expect("drift lock poisoned");
        let Some(state) = nodes.get(node_id) else { return 0.0 };
        if state.history.is_empty() {
            return 0.0;
        }
        let zeroed = state.history.iter().filter(|h| h.zeroed).count();
        zeroed as f64 / state.history.len() as f64
    }

    /// Zero every tracked node's current drift immediately (spec §4.7
    /// "Emergency").
    pub fn zero_all(&self) {
        let mut nodes = self.nodes.write().expect("drift lock poisoned");
        for state in nodes.values_mut() {
            state.current = Some(Vec3::ZERO);
        }
    }
}

impl Default for GovernedDrift {
    fn default() -> Self {
        Self::new(DriftConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn healthy_inputs() -> DriftInputs {
        DriftInputs { mode: Mode::Explore, trust: 0.9, energy: 0.9, risk: 0.1, uncertainty: 0.5 }
    }

    #[test]
    fn suppressed_mode_zeroes_drift() {
        let drift = GovernedDrift::default();
        let mut inputs = healthy_inputs();
        inputs.mode = Mode::Hazard;
        let v = drift.compose("n1", &inputs, None);
        assert_eq!(v, Vec3::ZERO);
    }

    #[test]
    fn multiple_violations_all_reported() {
        let drift = GovernedDrift::default();
        let inputs = DriftInputs { mode: Mode::Explore, trust: 0.05, energy: 0.01, risk: 0.1, uncertainty: 0.5 };
        let reasons = drift.auto_zero_reasons(&inputs);
        assert_eq!(reasons.len(), 2);
    }

    #[test]
    fn directed_drift_scales_to_budget() {
        let drift = GovernedDrift::default();
        let inputs = healthy_inputs();
        let v = drift.compose("n1", &inputs, Some(Vec3::new(1.0, 0.0, 0.0)));
        let expected_budget = drift.budget(&inputs);
        assert!((v.magnitude() - expected_budget).abs() < 1e-9);
    }

    #[test]
    fn undirected_drift_decays_from_prior() {
        let drift = GovernedDrift::default();
        let inputs = healthy_inputs();
        let first = drift.compose("n1", &inputs, Some(Vec3::new(1.0, 0.0, 0.0)));
        let second = drift.compose("n1", &inputs, None);
        assert!(second.magnitude() < first.magnitude());
    }

    #[test]
    fn zero_all_makes_total_energy_zero() {
        let drift = GovernedDrift::default();
        let inputs = healthy_inputs();
        drift.compose("n1", &inputs, Some(Vec3::new(1.0, 0.0, 0.0)));
        drift.compose("n2", &inputs, Some(Vec3::new(0.0, 1.0, 0.0)));
        drift.zero_all();
        assert_eq!(drift.total_drift_energy(), 0.0);
    }
}
