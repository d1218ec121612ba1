//! Vector & geometry primitives shared by the oscillator, drift and swarm
//! subsystems: a 3-vector type, distances, centroid, and the Poincaré disk
//! projection used by an external risk encoder.

use serde::{Deserialize, Serialize};

/// A point or free vector in 3-space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 { x: 0.0, y: 0.0, z: 0.0 };

    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn add(self, other: Vec3) -> Vec3 {
        Vec3::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }

    pub fn sub(self, other: Vec3) -> Vec3 {
        Vec3::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }

    pub fn scale(self, k: f64) -> Vec3 {
        Vec3::new(self.x * k, self.y * k, self.z * k)
    }

    pub fn dot(self, other: Vec3) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn magnitude(self) -> f64 {
        self.dot(self).sqrt()
    }

    /// Unit vector in this direction, or `Vec3::ZERO` when the input is the
    /// zero vector (no direction to normalize).
    pub fn normalize(self) -> Vec3 {
        let m = self.magnitude();
        if m <= f64::EPSILON {
            Vec3::ZERO
        } else {
            self.scale(1.0 / m)
        }
    }

    pub fn distance(self, other: Vec3) -> f64 {
        self.sub(other).magnitude()
    }

    /// Scale this vector so its magnitude equals `max` if it currently
    /// exceeds it; otherwise return it unchanged.
    pub fn clamp_magnitude(self, max: f64) -> Vec3 {
        let m = self.magnitude();
        if m > max && m > f64::EPSILON {
            self.scale(max / m)
        } else {
            self
        }
    }
}

impl Default for Vec3 {
    fn default() -> Self {
        Vec3::ZERO
    }
}

/// Trust-weighted centroid of a set of positions.
///
/// A trust of exactly `0.0` is clamped to `1e-10` so the centroid remains
/// defined even when every weight would otherwise be zero (spec §4.8).
pub fn weighted_centroid(points: &[(Vec3, f64)]) -> Vec3 {
    if points.is_empty() {
        return Vec3::ZERO;
    }
    let mut sum = Vec3::ZERO;
    let mut total_weight = 0.0;
    for &(p, trust) in points {
        let w = if trust <= 0.0 { 1e-10 } else { trust };
        sum = sum.add(p.scale(w));
        total_weight += w;
    }
    if total_weight <= 0.0 {
        Vec3::ZERO
    } else {
        sum.scale(1.0 / total_weight)
    }
}

/// Project a 3-vector into the open Poincaré unit disk (first two
/// coordinates), used by an external hyperbolic-geometry risk encoder.
///
/// Points are scaled to keep the result strictly inside the unit disk
/// (radius < 1), matching the conformal model's domain.
pub fn poincare_project(v: Vec3) -> (f64, f64) {
    let r = (v.x * v.x + v.y * v.y).sqrt();
    if r <= f64::EPSILON {
        return (0.0, 0.0);
    }
    // tanh keeps the projected radius in [0, 1) for any finite input.
    let scaled = r.tanh();
    (v.x / r * scaled, v.y / r * scaled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_zero_vector_stays_zero() {
        assert_eq!(Vec3::ZERO.normalize(), Vec3::ZERO);
    }

    #[test]
    fn clamp_magnitude_preserves_direction() {
        let v = Vec3::new(3.0, 4.0, 0.0); // magnitude 5
        let clamped = v.clamp_magnitude(2.0);
        assert!((clamped.magnitude() - 2.0).abs() < 1e-9);
        let unit = v.normalize();
        let clamped_unit = clamped.normalize();
        assert!((unit.x - clamped_unit.x).abs() < 1e-9);
    }

    #[test]
    fn zero_trust_still_yields_centroid() {
        let pts = [(Vec3::new(0.0, 0.0, 0.0), 0.0), (Vec3::new(10.0, 0.0, 0.0), 0.0)];
        let c = weighted_centroid(&pts);
        assert!((c.x - 5.0).abs() < 1e-6);
    }

    #[test]
    fn poincare_projection_stays_in_unit_disk() {
        let (px, py) = poincare_project(Vec3::new(100.0, 100.0, 0.0));
        assert!((px * px + py * py).sqrt() < 1.0);
    }
}
