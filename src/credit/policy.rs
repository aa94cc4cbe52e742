//! Active policies of the time-credit engine
//!
//! A weighting policy turns raw hours into weighted hours; a decay rule
//! erodes idle balances. Both are durable entities with an id so records
//! can snapshot exactly which policy produced them.

use crate::config::{DecayConfig, WeightingConfig};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Skill tier of a labor event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillTier {
    Low,
    Medium,
    High,
    Expert,
}

impl SkillTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkillTier::Low => "low",
            SkillTier::Medium => "medium",
            SkillTier::High => "high",
            SkillTier::Expert => "expert",
        }
    }
}

/// Multipliers and clamps applied when weighting labor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightingPolicy {
    pub id: String,
    pub node_id: String,
    pub effective_from: DateTime<Utc>,
    pub base_weights_by_skill: HashMap<String, f64>,
    pub task_type_modifiers: HashMap<String, f64>,
    pub urgency_weight: f64,
    pub eco_sensitivity_weight: f64,
    pub scarcity_weight: f64,
    pub context_factor_min: f64,
    pub context_factor_max: f64,
    pub min_weight_multiplier: f64,
    pub max_weight_multiplier: f64,
}

impl WeightingPolicy {
    pub fn from_config(node_id: impl Into<String>, config: &WeightingConfig) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            node_id: node_id.into(),
            effective_from: Utc::now(),
            base_weights_by_skill: config.base_weights_by_skill.clone(),
            task_type_modifiers: config.task_type_modifiers.clone(),
            urgency_weight: config.urgency_weight,
            eco_sensitivity_weight: config.eco_sensitivity_weight,
            scarcity_weight: config.scarcity_weight,
            context_factor_min: config.context_factor_min,
            context_factor_max: config.context_factor_max,
            min_weight_multiplier: config.min_weight_multiplier,
            max_weight_multiplier: config.max_weight_multiplier,
        }
    }

    /// Base weight for a skill tier. Tiers missing from policy weigh 1.0.
    pub fn base_weight(&self, tier: SkillTier) -> f64 {
        self.base_weights_by_skill
            .get(tier.as_str())
            .copied()
            .unwrap_or(1.0)
    }

    /// Task-type modifier. Unknown task types fall back to `generic`, and
    /// to 1.0 when no `generic` entry exists either.
    pub fn task_factor(&self, task_type: &str) -> f64 {
        self.task_type_modifiers
            .get(task_type)
            .or_else(|| self.task_type_modifiers.get("generic"))
            .copied()
            .unwrap_or(1.0)
    }
}

/// Balance decay parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecayRule {
    pub id: String,
    pub label: String,
    pub inactivity_grace_days: f64,
    pub half_life_days: f64,
    pub min_balance_protected: f64,
    pub max_annual_decay_fraction: f64,
    pub effective_from: DateTime<Utc>,
}

impl DecayRule {
    pub fn from_config(config: &DecayConfig) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            label: "default".to_string(),
            inactivity_grace_days: config.inactivity_grace_days,
            half_life_days: config.half_life_days,
            min_balance_protected: config.min_balance_protected,
            max_annual_decay_fraction: config.max_annual_decay_fraction,
            effective_from: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_unknown_task_type_falls_back_to_generic() {
        let config = Config::default();
        let policy = WeightingPolicy::from_config("node-a", &config.weighting);
        assert_eq!(policy.task_factor("generic"), 1.0);
        assert_eq!(policy.task_factor("never-seen-before"), 1.0);
        assert_eq!(policy.task_factor("care"), 1.1);
    }

    #[test]
    fn test_missing_tier_weight_defaults_to_one() {
        let mut config = Config::default().weighting;
        config.base_weights_by_skill.remove("expert");
        let policy = WeightingPolicy::from_config("node-a", &config);
        assert_eq!(policy.base_weight(SkillTier::Expert), 1.0);
        assert_eq!(policy.base_weight(SkillTier::High), 1.5);
    }
}
