//! FRS — feedback and diagnostic engine
//!
//! Signal packets snapshot cross-subsystem metrics; detectors turn packets
//! into findings, findings map to advisory recommendations, and the
//! autonomy/fragility indices compress the whole picture into two bounded
//! numbers. Memory records keep the cooperative's narrative history.

use crate::config::FeedbackConfig;
use crate::error::{EngineError, Result};
use crate::guard::OpGuard;
use crate::ledger::{related, Ledger};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

/// Metrics gathered from every subsystem at packet creation time. All
/// values are copies; the feedback engine never holds references into
/// other subsystems' state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PacketMetrics {
    pub issue_counts_by_state: HashMap<String, usize>,
    pub labor_verification_ratio: f64,
    pub certified_design_ratio: f64,
    pub avg_certified_eco_score: Option<f64>,
    pub task_completion_rate: f64,
    pub blocked_task_ratio: f64,
    pub material_scarcity_index: f64,
    pub qa_fail_rate: f64,
    pub active_finding_count: usize,
    /// Demand/capacity ratio per skill tier.
    pub skill_utilization: HashMap<String, f64>,
    pub supplier_shares: Vec<f64>,
    pub critical_external_ratio: f64,
    /// Final costs of recent access valuations, oldest first.
    pub recent_valuations: Vec<f64>,
    pub pending_issue_count: usize,
    pub high_scarcity_material_count: usize,
    /// Fraction of members active in governance.
    pub governance_participation: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalPacket {
    pub id: String,
    pub node_id: String,
    pub created_at: DateTime<Utc>,
    pub metrics: PacketMetrics,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingType {
    EcologicalOvershoot,
    LaborStress,
    MaterialDependency,
    DesignFriction,
    ValuationDrift,
    GovernanceLoad,
    CoordinationFragility,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingSeverity {
    Info,
    Low,
    Moderate,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingConfidence {
    Provisional,
    Confident,
    Strong,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticFinding {
    pub id: String,
    pub packet_id: String,
    pub finding_type: FindingType,
    pub severity: FindingSeverity,
    pub confidence: FindingConfidence,
    pub summary: String,
    pub rationale: String,
    pub indicators: HashMap<String, f64>,
    pub created_at: DateTime<Utc>,
}

/// Subsystems a recommendation can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecommendationTarget {
    #[serde(rename = "CDS")]
    Cds,
    #[serde(rename = "OAD")]
    Oad,
    #[serde(rename = "ITC")]
    Itc,
    #[serde(rename = "COS")]
    Cos,
    #[serde(rename = "FED")]
    Fed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub id: String,
    pub finding_id: String,
    pub target: RecommendationTarget,
    pub severity: FindingSeverity,
    pub summary: String,
    pub rationale: String,
    pub action_type: String,
    pub created_at: DateTime<Utc>,
}

/// Version-stamped autonomy/fragility snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndicesReport {
    pub packet_id: String,
    pub autonomy: f64,
    pub fragility: f64,
    pub coefficients_version: String,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    Lesson,
    Incident,
    Outcome,
}

/// Immutable narrative record. There is deliberately no update operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryRecord {
    pub id: String,
    pub record_type: MemoryType,
    pub title: String,
    pub narrative: String,
    pub created_at: DateTime<Utc>,
}

// Index coefficients. Each autonomy input contributes at most +/- its
// coefficient around the 0.5 baseline; fragility inputs add up from zero.
const AUTONOMY_COEFF: f64 = 0.125;
const FRAGILITY_BLOCKED_COEFF: f64 = 0.5;
const FRAGILITY_FINDINGS_COEFF: f64 = 0.2;
const FRAGILITY_SCARCITY_COEFF: f64 = 0.2;
const FRAGILITY_PENDING_COEFF: f64 = 0.1;

/// Feedback engine state for one node.
pub struct FeedbackEngine {
    node_id: String,
    config: FeedbackConfig,
    packets: HashMap<String, SignalPacket>,
    findings: HashMap<String, DiagnosticFinding>,
    recommendations: Vec<Recommendation>,
    memory: Vec<MemoryRecord>,
}

impl FeedbackEngine {
    pub fn new(node_id: impl Into<String>, config: FeedbackConfig) -> Self {
        Self {
            node_id: node_id.into(),
            config,
            packets: HashMap::new(),
            findings: HashMap::new(),
            recommendations: Vec::new(),
            memory: Vec::new(),
        }
    }

    pub fn packet(&self, id: &str) -> Option<&SignalPacket> {
        self.packets.get(id)
    }

    pub fn finding(&self, id: &str) -> Option<&DiagnosticFinding> {
        self.findings.get(id)
    }

    pub fn findings(&self) -> impl Iterator<Item = &DiagnosticFinding> {
        self.findings.values()
    }

    pub fn recommendations(&self) -> &[Recommendation] {
        &self.recommendations
    }

    pub fn memory(&self) -> &[MemoryRecord] {
        &self.memory
    }

    /// Count of moderate-or-worse findings, used by valuation callers as a
    /// scarcity amplifier input.
    pub fn active_critical_count(&self) -> usize {
        self.findings
            .values()
            .filter(|f| f.severity >= FindingSeverity::Moderate)
            .count()
    }

    /// Scarcity amplifier handed to access valuation: 1.0 when quiet,
    /// rising 0.05 per active moderate-or-worse finding, capped at 1.5.
    pub fn scarcity_amplifier(&self) -> f64 {
        (1.0 + 0.05 * self.active_critical_count() as f64).min(1.5)
    }

    /// Store a metrics snapshot as a signal packet.
    pub fn create_packet(
        &mut self,
        ledger: &mut Ledger,
        metrics: PacketMetrics,
    ) -> Result<SignalPacket> {
        let packet = SignalPacket {
            id: Uuid::new_v4().to_string(),
            node_id: self.node_id.clone(),
            created_at: Utc::now(),
            metrics,
        };
        ledger.append(
            "frs.packet_created",
            None,
            related(&[("packet", &packet.id)]),
            json!({
                "blockedTaskRatio": packet.metrics.blocked_task_ratio,
                "materialScarcityIndex": packet.metrics.material_scarcity_index,
            }),
        )?;
        self.packets.insert(packet.id.clone(), packet.clone());
        Ok(packet)
    }

    fn severity_for(ratio_over: f64) -> FindingSeverity {
        if ratio_over >= 1.5 {
            FindingSeverity::Critical
        } else if ratio_over >= 1.0 {
            FindingSeverity::Moderate
        } else {
            FindingSeverity::Low
        }
    }

    /// Run every configured detector over a stored packet. Findings are
    /// computed first and ledgered after the last checkpoint, so a
    /// cancelled or expired run leaves no partial entries.
    pub fn analyze_packet(
        &mut self,
        ledger: &mut Ledger,
        packet_id: &str,
        guard: &OpGuard,
    ) -> Result<Vec<DiagnosticFinding>> {
        let packet = self
            .packets
            .get(packet_id)
            .ok_or_else(|| EngineError::not_found("signal packet", packet_id))?
            .clone();
        let m = &packet.metrics;
        let mut found: Vec<DiagnosticFinding> = Vec::new();
        let now = Utc::now();

        let mut push = |finding_type: FindingType,
                        severity: FindingSeverity,
                        confidence: FindingConfidence,
                        summary: String,
                        rationale: String,
                        indicators: HashMap<String, f64>| {
            found.push(DiagnosticFinding {
                id: Uuid::new_v4().to_string(),
                packet_id: packet_id.to_string(),
                finding_type,
                severity,
                confidence,
                summary,
                rationale,
                indicators,
                created_at: now,
            });
        };

        guard.checkpoint()?;
        if let Some(avg_eco) = m.avg_certified_eco_score {
            if avg_eco > self.config.eco_overshoot_threshold {
                push(
                    FindingType::EcologicalOvershoot,
                    Self::severity_for(avg_eco / self.config.eco_overshoot_threshold),
                    FindingConfidence::Confident,
                    "certified designs trend toward high ecological burden".to_string(),
                    format!(
                        "average certified eco score {avg_eco:.3} exceeds threshold {:.3}",
                        self.config.eco_overshoot_threshold
                    ),
                    HashMap::from([("avgCertifiedEcoScore".to_string(), avg_eco)]),
                );
            }
        }

        guard.checkpoint()?;
        for tier in ["high", "expert"] {
            if let Some(&utilization) = m.skill_utilization.get(tier) {
                if utilization > self.config.labor_stress_utilization {
                    push(
                        FindingType::LaborStress,
                        Self::severity_for(utilization / self.config.labor_stress_utilization),
                        FindingConfidence::Confident,
                        format!("{tier}-tier labor is over-utilized"),
                        format!(
                            "{tier} utilization {utilization:.2} exceeds {:.2}",
                            self.config.labor_stress_utilization
                        ),
                        HashMap::from([("utilization".to_string(), utilization)]),
                    );
                }
            }
        }

        guard.checkpoint()?;
        let herfindahl: f64 = m.supplier_shares.iter().map(|s| s * s).sum();
        if herfindahl > self.config.supplier_hhi_threshold
            || m.critical_external_ratio > self.config.critical_external_threshold
        {
            push(
                FindingType::MaterialDependency,
                Self::severity_for(
                    (herfindahl / self.config.supplier_hhi_threshold)
                        .max(m.critical_external_ratio / self.config.critical_external_threshold),
                ),
                if m.supplier_shares.len() < 3 {
                    FindingConfidence::Provisional
                } else {
                    FindingConfidence::Confident
                },
                "material sourcing is concentrated".to_string(),
                format!(
                    "supplier Herfindahl {herfindahl:.3} (threshold {:.2}), critical-external ratio {:.3} (threshold {:.2})",
                    self.config.supplier_hhi_threshold,
                    m.critical_external_ratio,
                    self.config.critical_external_threshold
                ),
                HashMap::from([
                    ("herfindahl".to_string(), herfindahl),
                    ("criticalExternalRatio".to_string(), m.critical_external_ratio),
                ]),
            );
        }

        guard.checkpoint()?;
        if m.qa_fail_rate > self.config.qa_fail_rate_threshold {
            push(
                FindingType::DesignFriction,
                Self::severity_for(m.qa_fail_rate / self.config.qa_fail_rate_threshold),
                FindingConfidence::Confident,
                "quality failures are spiking".to_string(),
                format!(
                    "QA fail rate {:.2} exceeds {:.2}",
                    m.qa_fail_rate, self.config.qa_fail_rate_threshold
                ),
                HashMap::from([("qaFailRate".to_string(), m.qa_fail_rate)]),
            );
        }

        guard.checkpoint()?;
        if m.recent_valuations.len() >= 4 {
            let (history, latest) = m
                .recent_valuations
                .split_at(m.recent_valuations.len() - 1);
            let mut sorted = history.to_vec();
            sorted.sort_by(f64::total_cmp);
            let median = sorted[sorted.len() / 2];
            if median > 0.0 {
                let drift = (latest[0] - median).abs() / median;
                if drift > self.config.valuation_drift_threshold {
                    push(
                        FindingType::ValuationDrift,
                        Self::severity_for(drift / self.config.valuation_drift_threshold),
                        FindingConfidence::Confident,
                        "access valuations are drifting from recent history".to_string(),
                        format!(
                            "latest valuation {:.4} deviates {:.0}% from median {:.4}",
                            latest[0],
                            drift * 100.0,
                            median
                        ),
                        HashMap::from([("drift".to_string(), drift), ("median".to_string(), median)]),
                    );
                }
            }
        }

        guard.checkpoint()?;
        let total_issues: usize = m.issue_counts_by_state.values().sum();
        if total_issues > 0 {
            let stuck: usize = ["intake", "structured", "context_ready"]
                .iter()
                .filter_map(|s| m.issue_counts_by_state.get(*s))
                .sum();
            let stuck_fraction = stuck as f64 / total_issues as f64;
            if stuck_fraction > self.config.governance_stuck_threshold {
                push(
                    FindingType::GovernanceLoad,
                    Self::severity_for(stuck_fraction / self.config.governance_stuck_threshold),
                    if total_issues < 5 {
                        FindingConfidence::Provisional
                    } else {
                        FindingConfidence::Confident
                    },
                    "issues are piling up before deliberation".to_string(),
                    format!(
                        "{stuck} of {total_issues} issues sit in pre-deliberation states ({:.0}%)",
                        stuck_fraction * 100.0
                    ),
                    HashMap::from([("stuckFraction".to_string(), stuck_fraction)]),
                );
            }
        }

        guard.checkpoint()?;
        if m.blocked_task_ratio > self.config.blocked_ratio_threshold {
            push(
                FindingType::CoordinationFragility,
                Self::severity_for(m.blocked_task_ratio / self.config.blocked_ratio_threshold),
                FindingConfidence::Strong,
                "production is fragmenting under blocked tasks".to_string(),
                format!(
                    "blocked-task ratio {:.2} exceeds {:.2}",
                    m.blocked_task_ratio, self.config.blocked_ratio_threshold
                ),
                HashMap::from([("blockedTaskRatio".to_string(), m.blocked_task_ratio)]),
            );
        }

        // Detection is complete; now it is safe to ledger the results.
        guard.checkpoint()?;
        for finding in &found {
            ledger.append(
                "frs.finding_recorded",
                None,
                related(&[("packet", packet_id), ("finding", &finding.id)]),
                json!({
                    "type": finding.finding_type,
                    "severity": finding.severity,
                    "confidence": finding.confidence,
                }),
            )?;
        }
        for finding in &found {
            self.findings.insert(finding.id.clone(), finding.clone());
        }
        Ok(found)
    }

    fn default_action(finding_type: FindingType) -> (RecommendationTarget, &'static str) {
        match finding_type {
            FindingType::EcologicalOvershoot => {
                (RecommendationTarget::Oad, "tighten_certification_thresholds")
            }
            FindingType::LaborStress => (RecommendationTarget::Cos, "rebalance_workload"),
            FindingType::MaterialDependency => (RecommendationTarget::Fed, "broaden_sourcing"),
            FindingType::DesignFriction => (RecommendationTarget::Oad, "revise_design"),
            FindingType::ValuationDrift => (RecommendationTarget::Itc, "review_valuation_policy"),
            FindingType::GovernanceLoad => (RecommendationTarget::Cds, "streamline_deliberation"),
            FindingType::CoordinationFragility => (RecommendationTarget::Cos, "unblock_tasks"),
        }
    }

    /// Map findings to advisory recommendations. Acceptance is mediated by
    /// the decision engine; nothing here mutates other subsystems.
    pub fn generate_recommendations(
        &mut self,
        ledger: &mut Ledger,
        finding_ids: &[String],
    ) -> Result<Vec<Recommendation>> {
        let mut out = Vec::new();
        for finding_id in finding_ids {
            let finding = self
                .findings
                .get(finding_id)
                .ok_or_else(|| EngineError::not_found("finding", finding_id))?;
            let (target, action_type) = Self::default_action(finding.finding_type);
            let rec = Recommendation {
                id: Uuid::new_v4().to_string(),
                finding_id: finding_id.clone(),
                target,
                severity: finding.severity,
                summary: finding.summary.clone(),
                rationale: finding.rationale.clone(),
                action_type: action_type.to_string(),
                created_at: Utc::now(),
            };
            ledger.append(
                "frs.recommendation_issued",
                None,
                related(&[("finding", finding_id), ("recommendation", &rec.id)]),
                json!({"target": rec.target, "actionType": rec.action_type}),
            )?;
            self.recommendations.push(rec.clone());
            out.push(rec);
        }
        Ok(out)
    }

    /// Compute the autonomy and fragility indices for a stored packet.
    ///
    /// Autonomy starts from a 0.5 baseline; verification, certification,
    /// completion, and governance participation each shift it by a bounded
    /// increment. Fragility accumulates from blockage, active findings,
    /// scarce materials, and pending issues. Both land in [0,1].
    pub fn compute_indices(&self, ledger: &mut Ledger, packet_id: &str) -> Result<IndicesReport> {
        let packet = self
            .packets
            .get(packet_id)
            .ok_or_else(|| EngineError::not_found("signal packet", packet_id))?;
        let m = &packet.metrics;

        let autonomy = (0.5
            + AUTONOMY_COEFF * (m.labor_verification_ratio - 0.5) * 2.0
            + AUTONOMY_COEFF * (m.certified_design_ratio - 0.5) * 2.0
            + AUTONOMY_COEFF * (m.task_completion_rate - 0.5) * 2.0
            + AUTONOMY_COEFF * (m.governance_participation - 0.5) * 2.0)
            .clamp(0.0, 1.0);

        let moderate_plus = self.active_critical_count() as f64;
        let fragility = (FRAGILITY_BLOCKED_COEFF * m.blocked_task_ratio
            + FRAGILITY_FINDINGS_COEFF * (moderate_plus / 5.0).min(1.0)
            + FRAGILITY_SCARCITY_COEFF * (m.high_scarcity_material_count as f64 / 5.0).min(1.0)
            + FRAGILITY_PENDING_COEFF * (m.pending_issue_count as f64 / 10.0).min(1.0))
        .clamp(0.0, 1.0);

        let report = IndicesReport {
            packet_id: packet_id.to_string(),
            autonomy,
            fragility,
            coefficients_version: self.config.coefficients_version.clone(),
            computed_at: Utc::now(),
        };
        ledger.append(
            "frs.indices_computed",
            None,
            related(&[("packet", packet_id)]),
            json!({
                "autonomy": autonomy,
                "fragility": fragility,
                "coefficientsVersion": report.coefficients_version,
            }),
        )?;
        Ok(report)
    }

    /// Write an immutable narrative record.
    pub fn record_memory(
        &mut self,
        ledger: &mut Ledger,
        record_type: MemoryType,
        title: impl Into<String>,
        narrative: impl Into<String>,
    ) -> Result<MemoryRecord> {
        let record = MemoryRecord {
            id: Uuid::new_v4().to_string(),
            record_type,
            title: title.into(),
            narrative: narrative.into(),
            created_at: Utc::now(),
        };
        ledger.append(
            "frs.memory_recorded",
            None,
            related(&[("memory", &record.id)]),
            json!({"type": record.record_type, "title": record.title}),
        )?;
        self.memory.push(record.clone());
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn engine() -> (FeedbackEngine, Ledger) {
        let config = Config::default();
        (
            FeedbackEngine::new("node-a", config.feedback),
            Ledger::new("node-a"),
        )
    }

    fn quiet_metrics() -> PacketMetrics {
        PacketMetrics {
            labor_verification_ratio: 0.9,
            certified_design_ratio: 0.7,
            task_completion_rate: 0.8,
            governance_participation: 0.6,
            ..Default::default()
        }
    }

    #[test]
    fn test_quiet_packet_produces_no_findings() {
        let (mut engine, mut ledger) = engine();
        let packet = engine.create_packet(&mut ledger, quiet_metrics()).unwrap();
        let findings = engine
            .analyze_packet(&mut ledger, &packet.id, &OpGuard::unbounded("analysis"))
            .unwrap();
        assert!(findings.is_empty());
    }

    #[test]
    fn test_labor_stress_detector_fires_per_tier() {
        let (mut engine, mut ledger) = engine();
        let mut metrics = quiet_metrics();
        metrics.skill_utilization =
            HashMap::from([("high".to_string(), 0.8), ("expert".to_string(), 0.95)]);
        let packet = engine.create_packet(&mut ledger, metrics).unwrap();
        let findings = engine
            .analyze_packet(&mut ledger, &packet.id, &OpGuard::unbounded("analysis"))
            .unwrap();
        let stress: Vec<_> = findings
            .iter()
            .filter(|f| f.finding_type == FindingType::LaborStress)
            .collect();
        assert_eq!(stress.len(), 2);
    }

    #[test]
    fn test_material_dependency_detector() {
        let (mut engine, mut ledger) = engine();
        let mut metrics = quiet_metrics();
        metrics.supplier_shares = vec![0.8, 0.1, 0.1];
        let packet = engine.create_packet(&mut ledger, metrics).unwrap();
        let findings = engine
            .analyze_packet(&mut ledger, &packet.id, &OpGuard::unbounded("analysis"))
            .unwrap();
        assert!(findings
            .iter()
            .any(|f| f.finding_type == FindingType::MaterialDependency));
    }

    #[test]
    fn test_valuation_drift_detector() {
        let (mut engine, mut ledger) = engine();
        let mut metrics = quiet_metrics();
        metrics.recent_valuations = vec![10.0, 10.5, 9.8, 10.2, 14.0];
        let packet = engine.create_packet(&mut ledger, metrics).unwrap();
        let findings = engine
            .analyze_packet(&mut ledger, &packet.id, &OpGuard::unbounded("analysis"))
            .unwrap();
        assert!(findings
            .iter()
            .any(|f| f.finding_type == FindingType::ValuationDrift));
    }

    #[test]
    fn test_governance_load_detector() {
        let (mut engine, mut ledger) = engine();
        let mut metrics = quiet_metrics();
        metrics.issue_counts_by_state = HashMap::from([
            ("intake".to_string(), 4),
            ("structured".to_string(), 2),
            ("deliberation".to_string(), 1),
            ("decided".to_string(), 1),
        ]);
        let packet = engine.create_packet(&mut ledger, metrics).unwrap();
        let findings = engine
            .analyze_packet(&mut ledger, &packet.id, &OpGuard::unbounded("analysis"))
            .unwrap();
        assert!(findings
            .iter()
            .any(|f| f.finding_type == FindingType::GovernanceLoad));
    }

    #[test]
    fn test_recommendations_follow_deterministic_mapping() {
        let (mut engine, mut ledger) = engine();
        let mut metrics = quiet_metrics();
        metrics.skill_utilization = HashMap::from([("expert".to_string(), 0.9)]);
        metrics.blocked_task_ratio = 0.5;
        let packet = engine.create_packet(&mut ledger, metrics).unwrap();
        let findings = engine
            .analyze_packet(&mut ledger, &packet.id, &OpGuard::unbounded("analysis"))
            .unwrap();
        let ids: Vec<String> = findings.iter().map(|f| f.id.clone()).collect();
        let recs = engine.generate_recommendations(&mut ledger, &ids).unwrap();
        assert_eq!(recs.len(), findings.len());
        for rec in &recs {
            let finding = engine.finding(&rec.finding_id).unwrap();
            match finding.finding_type {
                FindingType::LaborStress | FindingType::CoordinationFragility => {
                    assert_eq!(rec.target, RecommendationTarget::Cos)
                }
                _ => {}
            }
        }
    }

    #[test]
    fn test_indices_stay_in_bounds() {
        let (mut engine, mut ledger) = engine();
        let mut metrics = quiet_metrics();
        metrics.blocked_task_ratio = 1.0;
        metrics.pending_issue_count = 50;
        metrics.high_scarcity_material_count = 20;
        let packet = engine.create_packet(&mut ledger, metrics).unwrap();
        let report = engine.compute_indices(&mut ledger, &packet.id).unwrap();
        assert!((0.0..=1.0).contains(&report.autonomy));
        assert!((0.0..=1.0).contains(&report.fragility));
        assert_eq!(report.coefficients_version, "indices-v1");
    }

    #[test]
    fn test_healthy_metrics_raise_autonomy_above_baseline() {
        let (mut engine, mut ledger) = engine();
        let packet = engine.create_packet(&mut ledger, quiet_metrics()).unwrap();
        let report = engine.compute_indices(&mut ledger, &packet.id).unwrap();
        assert!(report.autonomy > 0.5);
        assert!(report.fragility < 0.2);
    }

    #[test]
    fn test_cancelled_analysis_leaves_no_entries() {
        let (mut engine, mut ledger) = engine();
        let mut metrics = quiet_metrics();
        metrics.blocked_task_ratio = 0.9;
        let packet = engine.create_packet(&mut ledger, metrics).unwrap();
        let flag = crate::guard::CancelFlag::new();
        flag.cancel();
        let guard = OpGuard::unbounded("analysis").with_cancel(flag);
        assert!(engine.analyze_packet(&mut ledger, &packet.id, &guard).is_err());
        assert!(ledger
            .trail(&crate::ledger::TrailFilter::prefix("frs.finding_recorded"))
            .is_empty());
    }

    #[test]
    fn test_memory_records_accumulate() {
        let (mut engine, mut ledger) = engine();
        engine
            .record_memory(&mut ledger, MemoryType::Lesson, "batch sizing", "small batches flow better")
            .unwrap();
        engine
            .record_memory(&mut ledger, MemoryType::Incident, "timber shortage", "supplier failed in March")
            .unwrap();
        assert_eq!(engine.memory().len(), 2);
        assert_eq!(engine.memory()[0].record_type, MemoryType::Lesson);
    }
}
