use crate::task::RiskTier;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Whether a risk tier requires human confirmation before the Governor's
/// `approve` verdict becomes final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalRequirement {
    Automatic,
    RequireExternalConfirmation,
    NeverApprove,
}

/// Mutable-only-through-the-Governor-API policy state (spec §3, §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyWeights {
    pub per_action_cap_usd: f64,
    pub per_goal_cap_usd: f64,
    pub per_day_cap_usd: f64,
    pub region_allow_list: Option<HashSet<String>>,
    pub region_deny_list: HashSet<String>,
    pub risk_tier_requirement: [ApprovalRequirement; 4],
    pub version: u64,
}

impl PolicyWeights {
    pub fn requirement_for(&self, tier: RiskTier) -> ApprovalRequirement {
        self.risk_tier_requirement[tier as usize]
    }

    pub fn region_allowed(&self, region: &str) -> bool {
        if self.region_deny_list.contains(region) {
            return false;
        }
        match &self.region_allow_list {
            Some(allow) => allow.contains(region),
            None => true,
        }
    }
}

impl Default for PolicyWeights {
    fn default() -> Self {
        Self {
            per_action_cap_usd: 50.0,
            per_goal_cap_usd: 500.0,
            per_day_cap_usd: 2000.0,
            region_allow_list: None,
            region_deny_list: HashSet::new(),
            risk_tier_requirement: [
                ApprovalRequirement::Automatic,          // Low
                ApprovalRequirement::Automatic,          // Normal
                ApprovalRequirement::RequireExternalConfirmation, // Elevated
                ApprovalRequirement::NeverApprove,       // Blocked
            ],
            version: 0,
        }
    }
}
