//! Configuration management for coopnet
//!
//! Policy numbers live here rather than in code: consensus thresholds,
//! labor weighting, decay, bottleneck coefficients, and feedback index
//! coefficients are all loaded from a TOML file and snapshotted into the
//! entities they influence.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub node: NodeConfig,
    pub consensus: ConsensusConfig,
    pub weighting: WeightingConfig,
    pub decay: DecayConfig,
    pub bottleneck: BottleneckConfig,
    pub feedback: FeedbackConfig,
    pub web: WebConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub node_id: String,
    pub display_name: String,
    /// Capabilities advertised in federation announcements.
    pub capabilities: Vec<String>,
}

/// CDS directive thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConfig {
    pub consensus_threshold: f64,
    pub min_consensus_threshold: f64,
    pub objection_threshold: f64,
    pub escalation_enabled: bool,
}

/// ITC weighting policy defaults applied when a node-specific policy has
/// not been installed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightingConfig {
    pub urgency_weight: f64,
    pub eco_sensitivity_weight: f64,
    pub scarcity_weight: f64,
    pub context_factor_min: f64,
    pub context_factor_max: f64,
    pub min_weight_multiplier: f64,
    pub max_weight_multiplier: f64,
    /// Declared last so the TOML tables follow the scalar values.
    pub base_weights_by_skill: HashMap<String, f64>,
    pub task_type_modifiers: HashMap<String, f64>,
}

/// ITC balance decay defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecayConfig {
    pub inactivity_grace_days: f64,
    pub half_life_days: f64,
    pub min_balance_protected: f64,
    pub max_annual_decay_fraction: f64,
}

/// COS bottleneck scoring coefficients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BottleneckConfig {
    /// Weight of schedule deviation in the severity score.
    pub alpha: f64,
    /// Weight of the blocked-instance ratio in the severity score.
    pub beta: f64,
    pub threshold: f64,
    /// Lookback for the blocked-task ratio: instances untouched for longer
    /// than this leave the sample.
    pub rolling_window_days: f64,
}

/// FRS detector thresholds and index coefficients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackConfig {
    pub eco_overshoot_threshold: f64,
    pub labor_stress_utilization: f64,
    pub supplier_hhi_threshold: f64,
    pub critical_external_threshold: f64,
    pub qa_fail_rate_threshold: f64,
    pub valuation_drift_threshold: f64,
    pub governance_stuck_threshold: f64,
    pub blocked_ratio_threshold: f64,
    /// Version stamp recorded on every index computation.
    pub coefficients_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
    pub cors_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for Config {
    fn default() -> Self {
        let mut base_weights = HashMap::new();
        base_weights.insert("low".to_string(), 1.0);
        base_weights.insert("medium".to_string(), 1.2);
        base_weights.insert("high".to_string(), 1.5);
        base_weights.insert("expert".to_string(), 1.8);

        let mut task_modifiers = HashMap::new();
        task_modifiers.insert("generic".to_string(), 1.0);
        task_modifiers.insert("care".to_string(), 1.1);
        task_modifiers.insert("maintenance".to_string(), 1.05);

        Self {
            node: NodeConfig {
                node_id: "coopnet-node-default".to_string(),
                display_name: "Default Node".to_string(),
                capabilities: vec![
                    "cds".into(),
                    "oad".into(),
                    "itc".into(),
                    "cos".into(),
                    "frs".into(),
                ],
            },
            consensus: ConsensusConfig {
                consensus_threshold: 0.6,
                min_consensus_threshold: 0.4,
                objection_threshold: 0.3,
                escalation_enabled: true,
            },
            weighting: WeightingConfig {
                base_weights_by_skill: base_weights,
                task_type_modifiers: task_modifiers,
                urgency_weight: 0.2,
                eco_sensitivity_weight: 0.15,
                scarcity_weight: 0.25,
                context_factor_min: 0.8,
                context_factor_max: 1.6,
                min_weight_multiplier: 0.5,
                max_weight_multiplier: 3.0,
            },
            decay: DecayConfig {
                inactivity_grace_days: 30.0,
                half_life_days: 180.0,
                min_balance_protected: 10.0,
                max_annual_decay_fraction: 0.25,
            },
            bottleneck: BottleneckConfig {
                alpha: 0.6,
                beta: 0.4,
                threshold: 0.15,
                rolling_window_days: 14.0,
            },
            feedback: FeedbackConfig {
                eco_overshoot_threshold: 0.6,
                labor_stress_utilization: 0.6,
                supplier_hhi_threshold: 0.5,
                critical_external_threshold: 0.1,
                qa_fail_rate_threshold: 0.2,
                valuation_drift_threshold: 0.25,
                governance_stuck_threshold: 0.5,
                blocked_ratio_threshold: 0.3,
                coefficients_version: "indices-v1".to_string(),
            },
            web: WebConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                cors_enabled: true,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&raw).map_err(|e| {
            crate::error::EngineError::ConstraintViolation(format!("invalid config file: {e}"))
        })?;
        Ok(config)
    }

    /// Write configuration to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let raw = toml::to_string_pretty(self).map_err(|e| {
            crate::error::EngineError::ConstraintViolation(format!("config serialization: {e}"))
        })?;
        fs::write(path, raw)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_skill_weights() {
        let config = Config::default();
        assert_eq!(config.weighting.base_weights_by_skill["high"], 1.5);
        assert_eq!(config.weighting.base_weights_by_skill["expert"], 1.8);
    }

    #[test]
    fn test_round_trip_through_toml_file() {
        let config = Config::default();
        let file = NamedTempFile::new().unwrap();
        config.save(file.path()).unwrap();
        let loaded = Config::load(file.path()).unwrap();
        assert_eq!(loaded.node.node_id, config.node.node_id);
        assert_eq!(
            loaded.consensus.consensus_threshold,
            config.consensus.consensus_threshold
        );
    }

    #[test]
    fn test_load_rejects_malformed_file() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "not = [valid").unwrap();
        assert!(Config::load(file.path()).is_err());
    }
}
