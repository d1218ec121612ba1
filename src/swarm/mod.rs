//! Swarm Geometry (spec §4.8): cohesion/separation/goal/drift force
//! composition, no-go zones, and minimum-separation enforcement.

use crate::geometry::{weighted_centroid, Vec3};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

pub const ALPHA_CAP: f64 = 2.0;
pub const BETA_CAP: f64 = 3.0;
pub const GAMMA_CAP: f64 = 2.5;
pub const DELTA_CAP: f64 = 1.0;

#[derive(Debug, Clone, Copy)]
pub struct ForceWeights {
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
    pub delta: f64,
}

impl ForceWeights {
    /// Weights are taken absolute then clamped to their static caps (spec
    /// §4.8: "Negative weights are made absolute then clamped").
    pub fn new(alpha: f64, beta: f64, gamma: f64, delta: f64) -> Self {
        Self {
            alpha: alpha.abs().min(ALPHA_CAP),
            beta: beta.abs().min(BETA_CAP),
            gamma: gamma.abs().min(GAMMA_CAP),
            delta: delta.abs().min(DELTA_CAP),
        }
    }
}

impl Default for ForceWeights {
    fn default() -> Self {
        Self::new(1.0, 1.0, 1.0, 1.0)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NoGoZone {
    pub centre: Vec3,
    pub radius: f64,
}

impl NoGoZone {
    pub fn contains(&self, p: Vec3) -> bool {
        self.centre.distance(p) <= self.radius
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmNode {
    pub id: String,
    pub position: Vec3,
    pub velocity: Vec3,
    pub goal: Option<Vec3>,
    pub drift: Vec3,
    pub trust: f64,
}

pub struct SwarmConfig {
    pub weights: ForceWeights,
    pub separation_radius: f64,
    pub min_separation: f64,
    pub max_speed: f64,
    pub no_go_zones: Vec<NoGoZone>,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            weights: ForceWeights::default(),
            separation_radius: 5.0,
            min_separation: 1.0,
            max_speed: 10.0,
            no_go_zones: Vec::new(),
        }
    }
}

struct GeometryState {
    nodes: HashMap<String, SwarmNode>,
}

pub struct SwarmGeometry {
    state: RwLock<GeometryState>,
    config: SwarmConfig,
}

impl SwarmGeometry {
    pub fn new(config: SwarmConfig) -> Self {
        Self { state: RwLock::new(GeometryState { nodes: HashMap::new() }), config }
    }

    pub fn add_node(&self, node: SwarmNode) {
        self.state.write().expect("swarm lock poisoned").nodes.insert(node.id.clone(), node);
    }

    pub fn get_node(&self, id: &str) -> Option<SwarmNode> {
        self.state.read().expect("swarm lock poisoned").nodes.get(id).cloned()
    }

    fn centroid(&self, nodes: &HashMap<String, SwarmNode>) -> Vec3 {
        let points: Vec<(Vec3, f64)> = nodes.values().map(|n| (n.position, n.trust)).collect();
        weighted_centroid(&points)
    }

    fn separation_force(&self, nodes: &HashMap<String, SwarmNode>, node: &SwarmNode) -> Vec3 {
        let mut sum = Vec3::ZERO;
        for other in nodes.values() {
            if other.id == node.id {
                continue;
            }
            let dist = node.position.distance(other.position);
            if dist < self.config.separation_radius && dist > f64::EPSILON {
                let unit = node.position.sub(other.position).normalize();
                sum = sum.add(unit.scale((self.config.separation_radius - dist) / self.config.separation_radius));
            }
        }
        sum
    }

    fn goal_force(node: &SwarmNode) -> Vec3 {
        match node.goal {
            None => Vec3::ZERO,
            Some(goal) => {
                let to_goal = goal.sub(node.position);
                let dist = to_goal.magnitude();
                to_goal.normalize().scale(dist.min(1.0))
            }
        }
    }

    /// Combine the four forces for `node`, scale to `max_speed` if the
    /// resultant exceeds it, and return the new velocity (spec §4.8
    /// "Forces on node i" / "Resultant").
    fn resultant(&self, nodes: &HashMap<String, SwarmNode>, node: &SwarmNode, centroid: Vec3) -> Vec3 {
        let w = self.config.weights;
        let cohesion = centroid.sub(node.position);
        let separation = self.separation_force(nodes, node);
        let goal = Self::goal_force(node);
        let drift = node.drift;

        let resultant =
            cohesion.scale(w.alpha).add(separation.scale(w.beta)).add(goal.scale(w.gamma)).add(drift.scale(w.delta));
        resultant.clamp_magnitude(self.config.max_speed)
    }

    /// Integrate every node one step of duration `dt`: compute forces,
    /// update velocity/position, then enforce no-go zones and minimum
    /// separation (spec §4.8).
    pub fn step(&self, dt: f64) {
        let mut state = self.state.write().expect("swarm lock poisoned");
        let centroid = self.centroid(&state.nodes);
        let resultants: HashMap<String, Vec3> =
            state.nodes.values().map(|n| (n.id.clone(), self.resultant(&state.nodes, n, centroid))).collect();

        for (id, node) in state.nodes.iter_mut() {
            let resultant = resultants[id];
            node.velocity = resultant;
            node.position = node.position.add(node.velocity.scale(dt));
        }

        for node in state.nodes.values_mut() {
            for zone in &self.config.no_go_zones {
                if zone.contains(node.position) {
                    let outward = node.position.sub(zone.centre).normalize();
                    let outward = if outward == Vec3::ZERO { Vec3::new(1.0, 0.0, 0.0) } else { outward };
                    // Push strictly past the boundary; landing exactly on it
                    // would still satisfy `contains`'s inclusive `<=`.
                    node.position = zone.centre.add(outward.scale(zone.radius * (1.0 + 1e-9)));
                }
            }
        }

        self.enforce_min_separation(&mut state.nodes);
    }

    /// One pass is sufficient because `minSeparation < separationRadius`
    /// (spec §4.8 "Minimum separation").
    fn enforce_min_separation(&self, nodes: &mut HashMap<String, SwarmNode>) {
        let ids: Vec<String> = nodes.keys().cloned().collect();
        for i in 0..ids.len() {
            for j in (i + 1)..ids.len() {
                let (a, b) = (nodes[&ids[i]].position, nodes[&ids[j]].position);
                let dist = a.distance(b);
                if dist < self.config.min_separation {
                    let push = if dist > f64::EPSILON {
                        a.sub(b).normalize()
                    } else {
                        Vec3::new(1.0, 0.0, 0.0)
                    };
                    let overlap = (self.config.min_separation - dist) / 2.0;
                    let a_new = a.add(push.scale(overlap));
                    let b_new = b.sub(push.scale(overlap));
                    nodes.get_mut(&ids[i]).unwrap().position = a_new;
                    nodes.get_mut(&ids[j]).unwrap().position = b_new;
                }
            }
        }
    }

    pub fn is_in_no_go_zone(&self, p: Vec3) -> bool {
        self.config.no_go_zones.iter().any(|z| z.contains(p))
    }
}
