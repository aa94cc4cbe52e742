//! The node: one engine instance wiring every subsystem to the shared ledger
//!
//! Subsystems own their state and never hold references into each other;
//! the node moves explicit signal values between them (a valuation profile
//! from the design registry into the credit engine, a workload signal from
//! production into valuation and feedback, packet metrics from everywhere
//! into the feedback engine). All mutations flow through `&mut self`, which
//! is the critical section over subsystem state and the ledger tail.

use crate::config::Config;
use crate::credit::{CreditEngine, DecayRule, ValuationSignals, WeightingPolicy};
use crate::decision::DecisionEngine;
use crate::design::DesignRegistry;
use crate::error::Result;
use crate::federation::{Envelope, FederationLayer};
use crate::feedback::{FeedbackEngine, PacketMetrics, SignalPacket};
use crate::guard::OpGuard;
use crate::identity::IdentityRegistry;
use crate::ledger::Ledger;
use crate::production::{ProductionEngine, WorkloadSignal};
use serde::Serialize;
use tracing::info;

/// One logical engine instance per node.
pub struct CoopNode {
    pub config: Config,
    pub ledger: Ledger,
    pub identity: IdentityRegistry,
    pub designs: DesignRegistry,
    pub credits: CreditEngine,
    pub decisions: DecisionEngine,
    pub production: ProductionEngine,
    pub feedback: FeedbackEngine,
    pub federation: FederationLayer,
}

/// Summary exposed by the health and dashboard endpoints.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    pub node_id: String,
    pub ledger_length: usize,
    pub ledger_tail_hash: String,
    pub issue_count: usize,
    pub engine_version: String,
}

impl CoopNode {
    pub fn new(config: Config) -> Self {
        let node_id = config.node.node_id.clone();
        let policy = WeightingPolicy::from_config(node_id.clone(), &config.weighting);
        let decay_rule = DecayRule::from_config(&config.decay);
        info!(%node_id, "engine node starting");
        Self {
            ledger: Ledger::new(node_id.clone()),
            identity: IdentityRegistry::new(node_id.clone()),
            designs: DesignRegistry::new(),
            credits: CreditEngine::new(node_id.clone(), policy, decay_rule),
            decisions: DecisionEngine::new(node_id.clone(), config.consensus.clone()),
            production: ProductionEngine::new(
                node_id.clone(),
                config.bottleneck.alpha,
                config.bottleneck.beta,
                config.bottleneck.threshold,
                config.bottleneck.rolling_window_days,
            ),
            feedback: FeedbackEngine::new(node_id.clone(), config.feedback.clone()),
            federation: FederationLayer::new(node_id),
            config,
        }
    }

    pub fn status(&self) -> NodeStatus {
        NodeStatus {
            node_id: self.config.node.node_id.clone(),
            ledger_length: self.ledger.len(),
            ledger_tail_hash: self.ledger.tail_hash(),
            issue_count: self.decisions.issues().count(),
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Full-chain audit; a failure poisons the ledger against writes.
    pub fn audit_ledger(&mut self) -> Result<()> {
        self.ledger.audit()
    }

    /// Price access to an item built from a design version, pulling the
    /// current scarcity signals from production and feedback.
    pub fn price_item(
        &mut self,
        item_id: &str,
        version_id: &str,
        plan_id: Option<&str>,
        guard: &OpGuard,
    ) -> Result<crate::credit::AccessValuation> {
        let profile = self.designs.valuation_profile(version_id)?;
        let workload = match plan_id {
            Some(plan_id) => Some(self.production.workload_signal(&mut self.ledger, plan_id)?),
            None => None,
        };
        let signals = ValuationSignals {
            cos_material_scarcity_index: workload.as_ref().map(|w| w.material_scarcity_index),
            frs_scarcity_amplifier: Some(self.feedback.scarcity_amplifier()),
        };
        self.credits
            .compute_access_value(&mut self.ledger, item_id, &profile, signals, guard)
    }

    /// Gather the cross-subsystem metrics a signal packet snapshots.
    pub fn collect_metrics(&self, workload: Option<&WorkloadSignal>) -> PacketMetrics {
        let status_counts = self.decisions.status_counts();
        let mut issue_counts_by_state = std::collections::HashMap::new();
        let mut pending = 0usize;
        let mut progressed = 0usize;
        for (status, count) in &status_counts {
            let key = serde_json::to_value(status)
                .ok()
                .and_then(|v| v.as_str().map(String::from))
                .unwrap_or_else(|| format!("{status:?}"));
            if matches!(key.as_str(), "intake" | "structured" | "context_ready") {
                pending += count;
            } else {
                progressed += count;
            }
            issue_counts_by_state.insert(key, *count);
        }
        let total_issues = pending + progressed;
        let governance_participation = if total_issues == 0 {
            0.5
        } else {
            progressed as f64 / total_issues as f64
        };

        let mut recent_valuations: Vec<(chrono::DateTime<chrono::Utc>, f64)> = self
            .credits
            .valuations()
            .map(|v| (v.computed_at, v.final_itc_cost))
            .collect();
        recent_valuations.sort_by_key(|(at, _)| *at);

        PacketMetrics {
            issue_counts_by_state,
            labor_verification_ratio: self.credits.verification_ratio(),
            certified_design_ratio: self.designs.certified_ratio(),
            avg_certified_eco_score: self.designs.certified_eco_average(),
            task_completion_rate: self.production.completion_rate(),
            blocked_task_ratio: self.production.blocked_ratio(),
            material_scarcity_index: workload.map(|w| w.material_scarcity_index).unwrap_or(0.0),
            qa_fail_rate: self.production.qa_fail_rate(),
            active_finding_count: self.feedback.findings().count(),
            skill_utilization: workload
                .map(|w| {
                    // Demand relative to a nominal 40-hour crew week per tier.
                    w.labor_by_skill
                        .iter()
                        .map(|(tier, hours)| (tier.clone(), hours / 40.0))
                        .collect()
                })
                .unwrap_or_default(),
            supplier_shares: Vec::new(),
            critical_external_ratio: 0.0,
            recent_valuations: recent_valuations.into_iter().map(|(_, v)| v).collect(),
            pending_issue_count: pending,
            high_scarcity_material_count: workload
                .map(|w| if w.material_scarcity_index > 0.5 { 1 } else { 0 })
                .unwrap_or(0),
            governance_participation,
        }
    }

    /// Snapshot the node into a signal packet, optionally against one
    /// plan's workload.
    pub fn create_signal_packet(&mut self, plan_id: Option<&str>) -> Result<SignalPacket> {
        let workload = match plan_id {
            Some(plan_id) => Some(self.production.workload_signal(&mut self.ledger, plan_id)?),
            None => None,
        };
        let metrics = self.collect_metrics(workload.as_ref());
        self.feedback.create_packet(&mut self.ledger, metrics)
    }

    /// Announce this node with its configured capabilities.
    pub fn announce(&mut self) -> Result<Envelope> {
        let capabilities = self.config.node.capabilities.clone();
        self.federation
            .announce_node(&mut self.ledger, &self.identity, capabilities)
    }
}
