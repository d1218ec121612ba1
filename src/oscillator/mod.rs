//! Oscillator Bus (spec §4.6): Kuramoto-style phase coupling driving a
//! shared mode across nodes.

use crate::events::{EventChannel, EventType, FleetEvent};
use crate::geometry::Vec3;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::f64::consts::PI;
use std::sync::RwLock;

const TWO_PI: f64 = 2.0 * PI;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Regroup,
    Explore,
    Commit,
    Hazard,
}

impl Mode {
    /// Classify a node's mode from its natural frequency in Hz (spec
    /// §4.6 "Mode bands").
    pub fn from_frequency(f: f64) -> Self {
        if f < 2.5 {
            Mode::Regroup
        } else if f < 6.0 {
            Mode::Explore
        } else if f < 10.0 {
            Mode::Commit
        } else {
            Mode::Hazard
        }
    }

    /// Nominal centre frequency of this mode's band (spec §4.6
    /// "BroadcastMode").
    pub fn nominal_frequency(self) -> f64 {
        match self {
            Mode::Regroup => 1.0,
            Mode::Explore => 3.5,
            Mode::Commit => 7.5,
            Mode::Hazard => 15.0,
        }
    }
}

fn wrap_phase(phase: f64) -> f64 {
    phase.rem_euclid(TWO_PI)
}

/// `phaseDist(a,b) = pi - |pi - |a-b| mod 2pi|` (spec §4.6).
pub fn phase_dist(a: f64, b: f64) -> f64 {
    PI - (PI - (a - b).abs() % TWO_PI).abs()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OscillatorNode {
    pub id: String,
    pub phase: f64,
    pub frequency_hz: f64,
    pub phase_velocity: f64,
    pub trust: f64,
    pub position: Vec3,
    pub mode: Mode,
}

impl OscillatorNode {
    pub fn new(id: impl Into<String>, frequency_hz: f64, trust: f64, position: Vec3) -> Self {
        Self {
            id: id.into(),
            phase: 0.0,
            frequency_hz,
            phase_velocity: 0.0,
            trust,
            position,
            mode: Mode::from_frequency(frequency_hz),
        }
    }
}

/// A synchronization snapshot produced by `compute_snapshot`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub order_parameter: f64,
    pub mean_phase: f64,
    pub mode_histogram: HashMap<String, usize>,
    pub dominant_mode: Option<Mode>,
    pub cluster_count: usize,
}

/// Bus-wide coupling configuration.
#[derive(Debug, Clone, Copy)]
pub struct CouplingConfig {
    pub k: f64,
    pub coupling_radius: f64,
    pub min_trust_for_coupling: f64,
    pub max_frequency: f64,
}

impl Default for CouplingConfig {
    fn default() -> Self {
        Self { k: 1.0, coupling_radius: f64::INFINITY, min_trust_for_coupling: 0.0, max_frequency: 50.0 }
    }
}

struct BusState {
    nodes: HashMap<String, OscillatorNode>,
}

pub struct OscillatorBus {
    state: RwLock<BusState>,
    config: CouplingConfig,
    events: EventChannel,
}

impl OscillatorBus {
    pub fn new(config: CouplingConfig) -> Self {
        Self { state: RwLock::new(BusState { nodes: HashMap::new() }), config, events: EventChannel::new() }
    }

    pub fn events(&self) -> &EventChannel {
        &self.events
    }

    pub fn add_node(&self, node: OscillatorNode) {
        self.state.write().expect("oscillator lock poisoned").nodes.insert(node.id.clone(), node);
    }

    pub fn get_node(&self, id: &str) -> Option<OscillatorNode> {
        self.state.read().expect("oscillator lock poisoned").nodes.get(id).cloned()
    }

    fn coupling_for(&self, state: &BusState, id: &str) -> f64 {
        let node = &state.nodes[id];
        let neighbors: Vec<&OscillatorNode> = state
            .nodes
            .values()
            .filter(|n| {
                n.id != id
                    && n.trust >= self.config.min_trust_for_coupling
                    && node.position.distance(n.position) <= self.config.coupling_radius
            })
            .collect();
        if neighbors.is_empty() {
            return 0.0;
        }
        let tau: f64 = neighbors.iter().map(|n| n.trust).sum();
        if tau <= 0.0 {
            return 0.0;
        }
        let sum: f64 = neighbors.iter().map(|n| n.trust * (n.phase - node.phase).sin()).sum();
        (self.config.k / tau) * sum
    }

    /// Advance every node's phase by one coupled step of duration `dt`
    /// seconds (spec §4.6 "Step").
    pub fn tick(&self, dt: f64) {
        let mut state = self.state.write().expect("oscillator lock poisoned");
        let couplings: HashMap<String, f64> =
            state.nodes.keys().map(|id| (id.clone(), self.coupling_for(&state, id))).collect();
        for (id, node) in state.nodes.iter_mut() {
            let coupling = couplings[id];
            let omega = TWO_PI * node.frequency_hz;
            let delta = (omega + coupling) * dt;
            node.phase = wrap_phase(node.phase + delta);
            node.phase_velocity = delta / dt;
            node.mode = Mode::from_frequency(node.frequency_hz);
        }
    }

    /// Kuramoto order parameter and mode summary across every node (spec
    /// §4.6 "Order parameter").
    pub fn compute_snapshot(&self) -> Snapshot {
        let state = self.state.read().expect("oscillator lock poisoned");
        let n = state.nodes.len();
        if n == 0 {
            return Snapshot {
                order_parameter: 0.0,
                mean_phase: 0.0,
                mode_histogram: HashMap::new(),
                dominant_mode: None,
                cluster_count: 0,
            };
        }
        let (mut sum_cos, mut sum_sin) = (0.0, 0.0);
        let mut histogram: HashMap<String, usize> = HashMap::new();
        let mut cells = [false; 32]; // 2*pi / 0.2 ~= 31.4 cells
        for node in state.nodes.values() {
            sum_cos += node.phase.cos();
            sum_sin += node.phase.sin();
            *histogram.entry(mode_key(node.mode)).or_insert(0) += 1;
            let cell = ((node.phase / 0.2) as usize).min(31);
            cells[cell] = true;
        }
        let mean_cos = sum_cos / n as f64;
        let mean_sin = sum_sin / n as f64;
        let order_parameter = (mean_cos * mean_cos + mean_sin * mean_sin).sqrt();
        let mean_phase = wrap_phase(mean_sin.atan2(mean_cos));
        let dominant_mode = histogram
            .iter()
            .max_by_key(|(_, count)| **count)
            .map(|(k, _)| mode_from_key(k));
        let cluster_count = cells.iter().filter(|c| **c).count();
        Snapshot { order_parameter, mean_phase, mode_histogram: histogram, dominant_mode, cluster_count }
    }

    /// Set every node's frequency to `mode`'s nominal centre frequency and
    /// reclassify immediately (spec §4.6 "BroadcastMode").
    pub fn broadcast_mode(&self, mode: Mode) {
        let mut state = self.state.write().expect("oscillator lock poisoned");
        for node in state.nodes.values_mut() {
            node.frequency_hz = mode.nominal_frequency();
            node.mode = mode;
        }
        drop(state);
        self.events.publish(FleetEvent::new(EventType::TrustUpdated).with_data("oscillator_mode", format!("{mode:?}")));
    }

    /// Target one node's frequency, capped at `maxFrequency` (spec §4.6
    /// "InjectFrequency").
    pub fn inject_frequency(&self, id: &str, f: f64) -> bool {
        let mut state = self.state.write().expect("oscillator lock poisoned");
        let Some(node) = state.nodes.get_mut(id) else { return false };
        node.frequency_hz = f.min(self.config.max_frequency);
        node.mode = Mode::from_frequency(node.frequency_hz);
        true
    }
}

fn mode_key(mode: Mode) -> String {
    format!("{mode:?}")
}

fn mode_from_key(key: &str) -> Mode {
    match key {
        "Regroup" => Mode::Regroup,
        "Explore" => Mode::Explore,
        "Commit" => Mode::Commit,
        _ => Mode::Hazard,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_bands_classify_correctly() {
        assert_eq!(Mode::from_frequency(1.0), Mode::Regroup);
        assert_eq!(Mode::from_frequency(2.5), Mode::Explore);
        assert_eq!(Mode::from_frequency(6.0), Mode::Commit);
        assert_eq!(Mode::from_frequency(10.0), Mode::Hazard);
    }

    #[test]
    fn phase_wraps_into_unit_circle() {
        let bus = OscillatorBus::new(CouplingConfig::default());
        bus.add_node(OscillatorNode::new("n1", 100.0, 1.0, Vec3::ZERO));
        for _ in 0..1000 {
            bus.tick(0.1);
        }
        let node = bus.get_node("n1").unwrap();
        assert!(node.phase >= 0.0 && node.phase < TWO_PI);
    }

    #[test]
    fn isolated_node_has_zero_coupling() {
        let bus = OscillatorBus::new(CouplingConfig::default());
        bus.add_node(OscillatorNode::new("n1", 1.0, 1.0, Vec3::ZERO));
        bus.tick(1.0);
        let node = bus.get_node("n1").unwrap();
        let expected = wrap_phase(TWO_PI * 1.0);
        assert!((node.phase - expected).abs() < 1e-9);
    }

    #[test]
    fn eight_node_strong_coupling_synchronizes() {
        // Scenario 5 from spec §8.
        let config = CouplingConfig { k: 5.0, coupling_radius: f64::INFINITY, min_trust_for_coupling: 0.0, max_frequency: 50.0 };
        let bus = OscillatorBus::new(config);
        for i in 0..8 {
            let phase = (i as f64) * TWO_PI / 8.0;
            let mut node = OscillatorNode::new(format!("n{i}"), 3.0, 1.0, Vec3::ZERO);
            node.phase = phase;
            bus.add_node(node);
        }
        for _ in 0..5000 {
            bus.tick(0.01);
        }
        let snapshot = bus.compute_snapshot();
        assert!(snapshot.order_parameter > 0.8);
        assert_eq!(snapshot.dominant_mode, Some(Mode::Explore));
    }

    #[test]
    fn broadcast_mode_sets_nominal_frequency() {
        let bus = OscillatorBus::new(CouplingConfig::default());
        bus.add_node(OscillatorNode::new("n1", 1.0, 1.0, Vec3::ZERO));
        bus.broadcast_mode(Mode::Hazard);
        let node = bus.get_node("n1").unwrap();
        assert_eq!(node.frequency_hz, 15.0);
        assert_eq!(node.mode, Mode::Hazard);
    }

    #[test]
    fn inject_frequency_caps_at_max() {
        let config = CouplingConfig { max_frequency: 10.0, ..Default::default() };
        let bus = OscillatorBus::new(config);
        bus.add_node(OscillatorNode::new("n1", 1.0, 1.0, Vec3::ZERO));
        bus.inject_frequency("n1", 100.0);
        assert_eq!(bus.get_node("n1").unwrap().frequency_hz, 10.0);
    }
}
