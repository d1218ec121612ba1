//! Governance / Roundtable Consensus (spec §4.3): the static tier table and
//! multi-signature approval sessions built on top of it.

pub mod roundtable;
pub mod tier;

pub use roundtable::{Roundtable, RoundtableSession, SessionStatus, Vote, VoteOutcome};
pub use tier::{tier_for_action, Tier, TierRequirement};

use crate::registry::{Agent, AgentRegistry};

/// The governance tier decision contract returned to callers of
/// `can_perform_action` (spec §6).
#[derive(Debug, Clone, PartialEq)]
pub struct TierDecision {
    pub allowed: bool,
    pub reason: Option<String>,
    pub required_tier: Tier,
    pub requires_roundtable: bool,
}

/// Whether `agent` may perform `action` unilaterally, and if not, what tier
/// roundtable approval would be required.
///
/// An action always requires a roundtable unless the agent's own
/// `maxGovernanceTier` already covers the action's tier *and* its trust
/// score meets that tier's floor — in which case it is "allowed" in the
/// sense that the agent is itself a valid unilateral actor for it.
pub fn can_perform_action(agent: &Agent, action: &str) -> TierDecision {
    let required_tier = tier_for_action(action);
    let requirements = required_tier.requirements();

    if agent.is_excluded_from_candidacy() {
        return TierDecision {
            allowed: false,
            reason: Some(format!("agent {} is suspended or quarantined", agent.id)),
            required_tier,
            requires_roundtable: true,
        };
    }

    if agent.max_governance_tier < required_tier {
        return TierDecision {
            allowed: false,
            reason: Some(format!(
                "Agent tier {:?} insufficient for {:?} action",
                agent.max_governance_tier, required_tier
            )),
            required_tier,
            requires_roundtable: true,
        };
    }

    let trust = agent.trust_vector.scalar();
    if trust < requirements.min_trust {
        return TierDecision {
            allowed: false,
            reason: Some(format!(
                "Trust score {trust:.2} below required {:.2}",
                requirements.min_trust
            )),
            required_tier,
            requires_roundtable: true,
        };
    }

    TierDecision { allowed: true, reason: None, required_tier, requires_roundtable: false }
}

/// Select a set of agents eligible for `tier` from the registry, for use as
/// roundtable participants.
pub fn eligible_participants(registry: &AgentRegistry, tier: Tier) -> Vec<Agent> {
    registry.get_agents_for_tier(tier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Capability, RegisterOptions};
    use crate::trust::TrustVector;
    use std::collections::HashSet;

    fn agent(tier: Tier, trust: f64) -> Agent {
        let registry = AgentRegistry::new();
        registry.register(RegisterOptions {
            name: "a".to_string(),
            provider: "anthropic".to_string(),
            model: "claude".to_string(),
            capabilities: HashSet::from([Capability::Orchestration]),
            max_concurrent_tasks: 1,
            max_governance_tier: tier,
            trust_vector: TrustVector::new([trust; 6]).unwrap(),
        })
    }

    #[test]
    fn low_trust_is_denied_with_exact_reason_shape() {
        let a = agent(Tier::Dr, 0.14);
        let decision = can_perform_action(&a, "delete_everything");
        assert!(!decision.allowed);
        assert_eq!(decision.reason.unwrap(), "Trust score 0.14 below required 0.95");
    }

    #[test]
    fn tier_shortfall_is_denied() {
        let a = agent(Tier::Ru, 0.9);
        let decision = can_perform_action(&a, "configure_networking");
        assert!(!decision.allowed);
        assert!(decision.reason.unwrap().contains("insufficient"));
    }

    #[test]
    fn sufficient_tier_and_trust_allowed() {
        let a = agent(Tier::Dr, 0.99);
        let decision = can_perform_action(&a, "rollback_release");
        assert!(decision.allowed);
        assert!(decision.reason.is_none());
    }
}
