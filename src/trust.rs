//! Trust & identity primitives: the 6-component trust vector, trust-level
//! classification, and the opaque spectral fingerprint generated at
//! admission (spec §3, §4.1, §9 "Open questions").

use crate::error::FleetError;
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// One component per "tongue" role (spec GLOSSARY: Tongue / Tier).
pub const TRUST_VECTOR_LEN: usize = 6;

/// A 6-component trust vector, one component per tongue, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrustVector([f64; TRUST_VECTOR_LEN]);

impl TrustVector {
    /// Build a trust vector from exactly 6 components, each in `[0, 1]`.
    pub fn new(components: [f64; TRUST_VECTOR_LEN]) -> Result<Self, FleetError> {
        for c in components {
            if !(0.0..=1.0).contains(&c) {
                return Err(FleetError::InvalidArgument(format!(
                    "trust component {c} out of range [0, 1]"
                )));
            }
        }
        Ok(Self(components))
    }

    /// Build from a slice, validating length 6 (spec: "validates length 6
    /// and range").
    pub fn from_slice(components: &[f64]) -> Result<Self, FleetError> {
        if components.len() != TRUST_VECTOR_LEN {
            return Err(FleetError::InvalidArgument(format!(
                "trust vector length {} must be {TRUST_VECTOR_LEN}",
                components.len()
            )));
        }
        let mut arr = [0.0; TRUST_VECTOR_LEN];
        arr.copy_from_slice(components);
        Self::new(arr)
    }

    pub fn components(&self) -> &[f64; TRUST_VECTOR_LEN] {
        &self.0
    }

    /// Euclidean magnitude of the vector, used to derive the trust level.
    pub fn magnitude(&self) -> f64 {
        self.0.iter().map(|c| c * c).sum::<f64>().sqrt()
    }

    /// Mean of the six components; used where a single scalar trust score
    /// is required (dispatcher scoring, tier eligibility).
    pub fn scalar(&self) -> f64 {
        self.0.iter().sum::<f64>() / TRUST_VECTOR_LEN as f64
    }

    /// The trust level this vector currently classifies as.
    pub fn level(&self) -> TrustLevel {
        TrustLevel::classify(self.magnitude())
    }
}

impl Default for TrustVector {
    fn default() -> Self {
        Self([0.0; TRUST_VECTOR_LEN])
    }
}

/// Coarse trust classification derived from a trust vector's magnitude.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TrustLevel {
    Critical,
    Low,
    Medium,
    High,
}

impl TrustLevel {
    /// Thresholds fixed by spec §4.1: HIGH≥0.8, MEDIUM≥0.5, LOW≥0.2, else
    /// CRITICAL. Classification is by vector magnitude, not by component.
    pub fn classify(magnitude: f64) -> Self {
        if magnitude >= 0.8 {
            TrustLevel::High
        } else if magnitude >= 0.5 {
            TrustLevel::Medium
        } else if magnitude >= 0.2 {
            TrustLevel::Low
        } else {
            TrustLevel::Critical
        }
    }
}

/// Opaque 32-byte spectral fingerprint generated at admission.
///
/// Per spec §9 "Open questions": the source's spectral identity is opaque.
/// This implementation treats it as a random token, keyed-hashed from the
/// agent's name/model and a fresh random nonce so two admissions of the same
/// name never collide, without attempting to reverse-engineer any further
/// semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpectralFingerprint(#[serde(with = "fingerprint_hex")] [u8; 32]);

impl SpectralFingerprint {
    pub fn generate(name: &str, model: &str) -> Self {
        let mut nonce = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut nonce);
        Self::generate_with_nonce(name, model, nonce)
    }

    fn generate_with_nonce(name: &str, model: &str, nonce: [u8; 16]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(name.as_bytes());
        hasher.update(b"\0");
        hasher.update(model.as_bytes());
        hasher.update(b"\0");
        hasher.update(&nonce);
        Self(*hasher.finalize().as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

pub(crate) mod fingerprint_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex_encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(d)?;
        hex_decode(&s).map_err(serde::de::Error::custom)
    }

    fn hex_encode(bytes: &[u8; 32]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }

    fn hex_decode(s: &str) -> Result<[u8; 32], String> {
        if s.len() != 64 {
            return Err("fingerprint hex must be 64 chars".to_string());
        }
        let mut out = [0u8; 32];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let byte_str = std::str::from_utf8(chunk).map_err(|e| e.to_string())?;
            out[i] = u8::from_str_radix(byte_str, 16).map_err(|e| e.to_string())?;
        }
        Ok(out)
    }
}
