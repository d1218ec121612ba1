//! The static governance tier table (spec §4.3) and the action→tier keyword
//! map used to compute a required tier from an action name.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// One of the six authorization levels, ordered by increasing authority
/// (GLOSSARY: Tongue / Tier).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tier {
    /// KO
    Ko,
    /// AV
    Av,
    /// RU
    Ru,
    /// CA
    Ca,
    /// UM
    Um,
    /// DR
    Dr,
}

impl Tier {
    const ORDER: [Tier; 6] = [Tier::Ko, Tier::Av, Tier::Ru, Tier::Ca, Tier::Um, Tier::Dr];

    fn rank(self) -> u8 {
        Self::ORDER.iter().position(|&t| t == self).expect("exhaustive") as u8
    }

    /// Minimum trust score and required distinct tier-holding signers for a
    /// roundtable approving an action at this tier.
    pub const fn requirements(self) -> TierRequirement {
        match self {
            Tier::Ko => TierRequirement { min_trust: 0.1, required_tongues: 1 },
            Tier::Av => TierRequirement { min_trust: 0.3, required_tongues: 2 },
            Tier::Ru => TierRequirement { min_trust: 0.5, required_tongues: 3 },
            Tier::Ca => TierRequirement { min_trust: 0.7, required_tongues: 4 },
            Tier::Um => TierRequirement { min_trust: 0.85, required_tongues: 5 },
            Tier::Dr => TierRequirement { min_trust: 0.95, required_tongues: 6 },
        }
    }
}

impl PartialOrd for Tier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Tier {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

/// Minimum trust and signer-count requirement for a tier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierRequirement {
    pub min_trust: f64,
    pub required_tongues: u32,
}

/// Resolve an action keyword to its required tier (spec §4.3: "Action → tier
/// is a static keyword map"). Unknown actions default to `Ru`.
pub fn tier_for_action(action: &str) -> Tier {
    let action = action.to_ascii_lowercase();
    const DR_WORDS: [&str; 3] = ["delete", "destroy", "rollback"];
    const UM_WORDS: [&str; 2] = ["configure", "admin"];

    if DR_WORDS.iter().any(|w| action.contains(w)) {
        Tier::Dr
    } else if UM_WORDS.iter().any(|w| action.contains(w)) {
        Tier::Um
    } else {
        Tier::Ru
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_order_by_increasing_authority() {
        assert!(Tier::Ko < Tier::Av);
        assert!(Tier::Av < Tier::Ru);
        assert!(Tier::Ru < Tier::Ca);
        assert!(Tier::Ca < Tier::Um);
        assert!(Tier::Um < Tier::Dr);
    }

    #[test]
    fn requirements_match_table() {
        assert_eq!(Tier::Ko.requirements().min_trust, 0.1);
        assert_eq!(Tier::Dr.requirements().required_tongues, 6);
    }

    #[test]
    fn action_keywords_map_to_expected_tier() {
        assert_eq!(tier_for_action("delete_record"), Tier::Dr);
        assert_eq!(tier_for_action("Rollback-deploy"), Tier::Dr);
        assert_eq!(tier_for_action("configure_policy"), Tier::Um);
        assert_eq!(tier_for_action("admin_panel"), Tier::Um);
        assert_eq!(tier_for_action("read_status"), Tier::Ru);
    }
}
