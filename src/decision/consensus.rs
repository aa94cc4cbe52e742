//! Consensus scoring and the directive rule
//!
//! A scenario's consensus score is the weight-normalized mean of vote
//! support in [-1, +1]; the objection index is the mean severity*scope mass
//! over the scenario's voter count. The directive rule turns the pair into
//! approve / revise / escalate against configured thresholds.

use crate::config::ConsensusConfig;
use serde::{Deserialize, Serialize};

use super::{Objection, Vote};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Directive {
    Approve,
    Revise,
    Escalate,
}

/// Numeric outcome of evaluating one scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsensusResult {
    pub scenario_id: String,
    pub consensus_score: f64,
    pub objection_index: f64,
    pub directive: Directive,
    pub vote_count: usize,
    pub total_weight: f64,
}

/// Evaluate votes and objections for a scenario.
pub fn evaluate(
    scenario_id: &str,
    votes: &[Vote],
    objections: &[Objection],
    thresholds: &ConsensusConfig,
) -> ConsensusResult {
    let total_weight: f64 = votes.iter().map(|v| v.weight).sum();
    let consensus_score = if total_weight > 0.0 {
        votes
            .iter()
            .map(|v| v.weight * v.support_level.numeric())
            .sum::<f64>()
            / total_weight
    } else {
        0.0
    };

    let objection_mass: f64 = objections.iter().map(|o| o.severity * o.scope).sum();
    let objection_index = objection_mass / (votes.len().max(1) as f64);

    let directive = if consensus_score >= thresholds.consensus_threshold
        && objection_index <= thresholds.objection_threshold
    {
        Directive::Approve
    } else if consensus_score >= thresholds.min_consensus_threshold
        && objection_index > thresholds.objection_threshold
    {
        Directive::Revise
    } else if thresholds.escalation_enabled {
        // Neither approvable nor merely contested.
        if consensus_score >= thresholds.min_consensus_threshold {
            Directive::Revise
        } else {
            Directive::Escalate
        }
    } else {
        Directive::Revise
    };

    ConsensusResult {
        scenario_id: scenario_id.to_string(),
        consensus_score,
        objection_index,
        directive,
        vote_count: votes.len(),
        total_weight,
    }
}
