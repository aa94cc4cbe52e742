//! CDS — collaborative decision engine
//!
//! Issues move through a fixed lifecycle (intake -> structured ->
//! context_ready -> deliberation -> decided -> dispatched, with a review
//! loop back through reopened and amended). Scenarios collect weighted
//! votes and objections; the consensus evaluation decides whether a
//! decision may be made, and an approved decision dispatches sub-tasks to
//! the other subsystems strictly from its scenario's parameters.

pub mod consensus;

use crate::config::ConsensusConfig;
use crate::error::{EngineError, Result};
use crate::identity::W_MAX;
use crate::ledger::{canonical, related, Ledger};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use uuid::Uuid;

pub use consensus::{ConsensusResult, Directive};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    Intake,
    Structured,
    ContextReady,
    Deliberation,
    Decided,
    Dispatched,
    UnderReview,
    Reopened,
    Amended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionType {
    Proposal,
    Objection,
    Comment,
    SystemSignal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub id: String,
    pub issue_id: String,
    pub author_id: String,
    pub submission_type: SubmissionType,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub id: String,
    pub title: String,
    pub description: String,
    pub node_id: String,
    pub status: IssueStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub submissions: Vec<Submission>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

/// Parameters a scenario carries; dispatch routing reads only these.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioParameters {
    #[serde(default)]
    pub oad_design_required: bool,
    #[serde(default)]
    pub cos_task_required: bool,
    #[serde(default)]
    pub itc_policy_change: Option<Value>,
    #[serde(default)]
    pub materials: Vec<String>,
    #[serde(default)]
    pub oad_flags: Vec<String>,
    #[serde(default)]
    pub itc_adjustments: Option<Value>,
    #[serde(default)]
    pub monitors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    pub id: String,
    pub issue_id: String,
    pub label: String,
    pub parameters: ScenarioParameters,
    #[serde(default)]
    pub indicators: HashMap<String, f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupportLevel {
    StrongSupport,
    Support,
    Neutral,
    Concern,
    Block,
}

impl SupportLevel {
    /// Numeric support in [-1, +1].
    pub fn numeric(&self) -> f64 {
        match self {
            SupportLevel::StrongSupport => 1.0,
            SupportLevel::Support => 0.5,
            SupportLevel::Neutral => 0.0,
            SupportLevel::Concern => -0.5,
            SupportLevel::Block => -1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub participant_id: String,
    pub scenario_id: String,
    pub support_level: SupportLevel,
    pub weight: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Objection {
    pub id: String,
    pub participant_id: String,
    pub issue_id: String,
    pub scenario_id: String,
    pub severity: f64,
    pub scope: f64,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    Approved,
    Amended,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub id: String,
    pub issue_id: String,
    pub scenario_id: String,
    pub status: DecisionStatus,
    pub consensus_score: f64,
    pub objection_index: f64,
    pub decided_at: DateTime<Utc>,
    pub rationale_hash: String,
    pub supersedes_decision_id: Option<String>,
}

/// Subsystems dispatch can route work to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetSystem {
    #[serde(rename = "OAD")]
    Oad,
    #[serde(rename = "COS")]
    Cos,
    #[serde(rename = "ITC")]
    Itc,
    #[serde(rename = "FRS")]
    Frs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchTask {
    pub system: TargetSystem,
    pub payload: Value,
}

/// Structured hand-off from an approved decision to downstream subsystems.
/// Dispatch does not execute the work; consumers pull from the packet.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchPacket {
    pub id: String,
    pub issue_id: String,
    pub scenario_id: String,
    pub created_at: DateTime<Utc>,
    pub tasks: Vec<DispatchTask>,
    pub materials: Vec<String>,
    pub oad_flags: Vec<String>,
    pub itc_adjustments: Option<Value>,
    pub frs_monitors: Vec<String>,
}

/// Decision engine state for one node.
pub struct DecisionEngine {
    node_id: String,
    thresholds: ConsensusConfig,
    issues: HashMap<String, Issue>,
    scenarios: HashMap<String, Scenario>,
    votes: HashMap<String, HashMap<String, Vote>>,
    objections: HashMap<String, Vec<Objection>>,
    decisions: HashMap<String, Decision>,
    dispatches: HashMap<String, DispatchPacket>,
}

impl DecisionEngine {
    pub fn new(node_id: impl Into<String>, thresholds: ConsensusConfig) -> Self {
        Self {
            node_id: node_id.into(),
            thresholds,
            issues: HashMap::new(),
            scenarios: HashMap::new(),
            votes: HashMap::new(),
            objections: HashMap::new(),
            decisions: HashMap::new(),
            dispatches: HashMap::new(),
        }
    }

    pub fn issue(&self, id: &str) -> Option<&Issue> {
        self.issues.get(id)
    }

    pub fn issues(&self) -> impl Iterator<Item = &Issue> {
        self.issues.values()
    }

    pub fn scenario(&self, id: &str) -> Option<&Scenario> {
        self.scenarios.get(id)
    }

    pub fn decision(&self, id: &str) -> Option<&Decision> {
        self.decisions.get(id)
    }

    pub fn dispatch_packet(&self, id: &str) -> Option<&DispatchPacket> {
        self.dispatches.get(id)
    }

    pub fn votes_for(&self, scenario_id: &str) -> Vec<Vote> {
        self.votes
            .get(scenario_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Issue counts by status, for diagnostic snapshots.
    pub fn status_counts(&self) -> HashMap<IssueStatus, usize> {
        let mut counts = HashMap::new();
        for issue in self.issues.values() {
            *counts.entry(issue.status).or_insert(0) += 1;
        }
        counts
    }

    pub fn create_issue(
        &mut self,
        ledger: &mut Ledger,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Result<Issue> {
        let now = Utc::now();
        let issue = Issue {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            description: description.into(),
            node_id: self.node_id.clone(),
            status: IssueStatus::Intake,
            created_at: now,
            updated_at: now,
            submissions: Vec::new(),
            metadata: HashMap::new(),
        };
        ledger.append(
            "cds.issue_created",
            None,
            related(&[("issue", &issue.id)]),
            json!({"title": issue.title}),
        )?;
        self.issues.insert(issue.id.clone(), issue.clone());
        Ok(issue)
    }

    /// Submissions are accepted while the issue is still being shaped.
    pub fn add_submission(
        &mut self,
        ledger: &mut Ledger,
        issue_id: &str,
        author_id: impl Into<String>,
        submission_type: SubmissionType,
        content: impl Into<String>,
    ) -> Result<Submission> {
        let issue = self
            .issues
            .get_mut(issue_id)
            .ok_or_else(|| EngineError::not_found("issue", issue_id))?;
        if !matches!(
            issue.status,
            IssueStatus::Intake
                | IssueStatus::Structured
                | IssueStatus::ContextReady
                | IssueStatus::Deliberation
        ) {
            return Err(EngineError::invalid_transition(
                "issue",
                issue_id,
                format!("submissions closed in status {:?}", issue.status),
            ));
        }
        let submission = Submission {
            id: Uuid::new_v4().to_string(),
            issue_id: issue_id.to_string(),
            author_id: author_id.into(),
            submission_type,
            content: content.into(),
            created_at: Utc::now(),
            metadata: HashMap::new(),
        };
        ledger.append(
            "cds.submission_added",
            Some(submission.author_id.clone()),
            related(&[("issue", issue_id), ("submission", &submission.id)]),
            json!({"type": submission.submission_type}),
        )?;
        issue.submissions.push(submission.clone());
        issue.updated_at = Utc::now();
        Ok(submission)
    }

    fn transition(
        &mut self,
        ledger: &mut Ledger,
        issue_id: &str,
        from: &[IssueStatus],
        to: IssueStatus,
        entry_type: &str,
        details: Value,
    ) -> Result<()> {
        let issue = self
            .issues
            .get_mut(issue_id)
            .ok_or_else(|| EngineError::not_found("issue", issue_id))?;
        if !from.contains(&issue.status) {
            return Err(EngineError::invalid_transition(
                "issue",
                issue_id,
                format!("{:?} -> {:?}", issue.status, to),
            ));
        }
        ledger.append(entry_type, None, related(&[("issue", issue_id)]), details)?;
        issue.status = to;
        issue.updated_at = Utc::now();
        Ok(())
    }

    pub fn structure_issue(
        &mut self,
        ledger: &mut Ledger,
        issue_id: &str,
        structured_data: Value,
    ) -> Result<()> {
        self.transition(
            ledger,
            issue_id,
            &[IssueStatus::Intake],
            IssueStatus::Structured,
            "cds.issue_structured",
            json!({"structured": true}),
        )?;
        if let Some(issue) = self.issues.get_mut(issue_id) {
            issue.metadata.insert("structured".to_string(), structured_data);
        }
        Ok(())
    }

    pub fn prepare_context(
        &mut self,
        ledger: &mut Ledger,
        issue_id: &str,
        context_data: Value,
    ) -> Result<()> {
        self.transition(
            ledger,
            issue_id,
            &[IssueStatus::Structured],
            IssueStatus::ContextReady,
            "cds.context_prepared",
            json!({"contextReady": true}),
        )?;
        if let Some(issue) = self.issues.get_mut(issue_id) {
            issue.metadata.insert("context".to_string(), context_data);
        }
        Ok(())
    }

    pub fn open_deliberation(&mut self, ledger: &mut Ledger, issue_id: &str) -> Result<()> {
        self.transition(
            ledger,
            issue_id,
            &[IssueStatus::ContextReady, IssueStatus::Reopened],
            IssueStatus::Deliberation,
            "cds.deliberation_opened",
            json!({}),
        )
    }

    /// Scenarios may only be added during deliberation.
    pub fn add_scenario(
        &mut self,
        ledger: &mut Ledger,
        issue_id: &str,
        label: impl Into<String>,
        parameters: ScenarioParameters,
    ) -> Result<Scenario> {
        let issue = self
            .issues
            .get(issue_id)
            .ok_or_else(|| EngineError::not_found("issue", issue_id))?;
        if issue.status != IssueStatus::Deliberation {
            return Err(EngineError::invalid_transition(
                "issue",
                issue_id,
                format!("scenarios require deliberation, status is {:?}", issue.status),
            ));
        }
        let scenario = Scenario {
            id: Uuid::new_v4().to_string(),
            issue_id: issue_id.to_string(),
            label: label.into(),
            parameters,
            indicators: HashMap::new(),
        };
        ledger.append(
            "cds.scenario_added",
            None,
            related(&[("issue", issue_id), ("scenario", &scenario.id)]),
            json!({"label": scenario.label}),
        )?;
        self.scenarios.insert(scenario.id.clone(), scenario.clone());
        Ok(scenario)
    }

    /// Cast or replace a vote. Weight is clamped to `[0, W_MAX]`.
    pub fn cast_vote(
        &mut self,
        ledger: &mut Ledger,
        scenario_id: &str,
        participant_id: &str,
        support_level: SupportLevel,
        weight: f64,
    ) -> Result<Vote> {
        if !self.scenarios.contains_key(scenario_id) {
            return Err(EngineError::not_found("scenario", scenario_id));
        }
        let vote = Vote {
            participant_id: participant_id.to_string(),
            scenario_id: scenario_id.to_string(),
            support_level,
            weight: weight.clamp(0.0, W_MAX),
            created_at: Utc::now(),
        };
        ledger.append(
            "cds.vote_cast",
            Some(participant_id.to_string()),
            related(&[("scenario", scenario_id)]),
            json!({"support": support_level, "weight": vote.weight}),
        )?;
        self.votes
            .entry(scenario_id.to_string())
            .or_default()
            .insert(participant_id.to_string(), vote.clone());
        Ok(vote)
    }

    /// Register an objection. Severity and scope are clamped to [0,1].
    pub fn register_objection(
        &mut self,
        ledger: &mut Ledger,
        issue_id: &str,
        scenario_id: &str,
        participant_id: &str,
        severity: f64,
        scope: f64,
        description: impl Into<String>,
    ) -> Result<Objection> {
        if !self.issues.contains_key(issue_id) {
            return Err(EngineError::not_found("issue", issue_id));
        }
        if !self.scenarios.contains_key(scenario_id) {
            return Err(EngineError::not_found("scenario", scenario_id));
        }
        let objection = Objection {
            id: Uuid::new_v4().to_string(),
            participant_id: participant_id.to_string(),
            issue_id: issue_id.to_string(),
            scenario_id: scenario_id.to_string(),
            severity: severity.clamp(0.0, 1.0),
            scope: scope.clamp(0.0, 1.0),
            description: description.into(),
            created_at: Utc::now(),
        };
        ledger.append(
            "cds.objection_registered",
            Some(participant_id.to_string()),
            related(&[("issue", issue_id), ("scenario", scenario_id), ("objection", &objection.id)]),
            json!({"severity": objection.severity, "scope": objection.scope}),
        )?;
        self.objections
            .entry(scenario_id.to_string())
            .or_default()
            .push(objection.clone());
        Ok(objection)
    }

    /// Evaluate a scenario's consensus state. Read-only.
    pub fn evaluate_scenario(&self, scenario_id: &str) -> Result<ConsensusResult> {
        if !self.scenarios.contains_key(scenario_id) {
            return Err(EngineError::not_found("scenario", scenario_id));
        }
        let votes = self.votes_for(scenario_id);
        let empty = Vec::new();
        let objections = self.objections.get(scenario_id).unwrap_or(&empty);
        Ok(consensus::evaluate(
            scenario_id,
            &votes,
            objections,
            &self.thresholds,
        ))
    }

    /// Hash of the payload a decision commits to: the issue snapshot (id,
    /// title, description, submission ids with content hashes), the scenario
    /// snapshot, and the consensus result, canonically serialized.
    fn rationale_hash(issue: &Issue, scenario: &Scenario, result: &ConsensusResult) -> String {
        let submissions: Vec<Value> = issue
            .submissions
            .iter()
            .map(|s| {
                let mut hasher = Sha256::new();
                hasher.update(s.content.as_bytes());
                json!({
                    "id": s.id,
                    "authorId": s.author_id,
                    "type": s.submission_type,
                    "contentHash": hex::encode(hasher.finalize()),
                })
            })
            .collect();
        let payload = json!({
            "issue": {
                "id": issue.id,
                "title": issue.title,
                "description": issue.description,
                "submissions": submissions,
            },
            "scenario": {
                "id": scenario.id,
                "label": scenario.label,
                "parameters": serde_json::to_value(&scenario.parameters).unwrap_or(Value::Null),
            },
            "consensus": {
                "consensusScore": result.consensus_score,
                "objectionIndex": result.objection_index,
                "voteCount": result.vote_count,
            },
        });
        let mut hasher = Sha256::new();
        hasher.update(canonical::stable_serialize(&payload).as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Record a decision for an approved scenario. The directive must be
    /// approve; anything else is rejected by policy.
    pub fn make_decision(
        &mut self,
        ledger: &mut Ledger,
        issue_id: &str,
        scenario_id: &str,
        result: &ConsensusResult,
    ) -> Result<Decision> {
        if result.directive != Directive::Approve {
            return Err(EngineError::PolicyRejected(format!(
                "decision requires an approve directive, got {:?}",
                result.directive
            )));
        }
        let issue = self
            .issues
            .get(issue_id)
            .ok_or_else(|| EngineError::not_found("issue", issue_id))?;
        if issue.status != IssueStatus::Deliberation {
            return Err(EngineError::invalid_transition(
                "issue",
                issue_id,
                format!("{:?} -> decided", issue.status),
            ));
        }
        let scenario = self
            .scenarios
            .get(scenario_id)
            .ok_or_else(|| EngineError::not_found("scenario", scenario_id))?;
        if scenario.issue_id != issue_id {
            return Err(EngineError::ConstraintViolation(format!(
                "scenario {scenario_id} does not belong to issue {issue_id}"
            )));
        }

        let decision = Decision {
            id: Uuid::new_v4().to_string(),
            issue_id: issue_id.to_string(),
            scenario_id: scenario_id.to_string(),
            status: DecisionStatus::Approved,
            consensus_score: result.consensus_score,
            objection_index: result.objection_index,
            decided_at: Utc::now(),
            rationale_hash: Self::rationale_hash(issue, scenario, result),
            supersedes_decision_id: None,
        };
        ledger.append(
            "cds.decision_made",
            None,
            related(&[("issue", issue_id), ("scenario", scenario_id), ("decision", &decision.id)]),
            json!({
                "consensusScore": decision.consensus_score,
                "objectionIndex": decision.objection_index,
                "rationaleHash": decision.rationale_hash,
            }),
        )?;
        if let Some(issue) = self.issues.get_mut(issue_id) {
            issue.status = IssueStatus::Decided;
            issue.updated_at = Utc::now();
        }
        self.decisions.insert(decision.id.clone(), decision.clone());
        Ok(decision)
    }

    /// Build and record the dispatch packet for a decision. Routing comes
    /// exclusively from the scenario's parameters; downstream subsystems
    /// consume the packet, dispatch itself executes nothing.
    pub fn dispatch(&mut self, ledger: &mut Ledger, decision_id: &str) -> Result<DispatchPacket> {
        let decision = self
            .decisions
            .get(decision_id)
            .ok_or_else(|| EngineError::not_found("decision", decision_id))?
            .clone();
        let issue = self
            .issues
            .get(&decision.issue_id)
            .ok_or_else(|| EngineError::not_found("issue", &decision.issue_id))?;
        if issue.status != IssueStatus::Decided {
            return Err(EngineError::invalid_transition(
                "issue",
                &decision.issue_id,
                format!("{:?} -> dispatched", issue.status),
            ));
        }
        let scenario = self
            .scenarios
            .get(&decision.scenario_id)
            .ok_or_else(|| EngineError::not_found("scenario", &decision.scenario_id))?;

        let mut tasks = Vec::new();
        let p = &scenario.parameters;
        if p.oad_design_required {
            tasks.push(DispatchTask {
                system: TargetSystem::Oad,
                payload: json!({
                    "action": "create_design",
                    "issueId": decision.issue_id,
                    "flags": p.oad_flags,
                }),
            });
        }
        if p.cos_task_required {
            tasks.push(DispatchTask {
                system: TargetSystem::Cos,
                payload: json!({
                    "action": "schedule_production",
                    "issueId": decision.issue_id,
                    "materials": p.materials,
                }),
            });
        }
        if let Some(change) = &p.itc_policy_change {
            tasks.push(DispatchTask {
                system: TargetSystem::Itc,
                payload: json!({
                    "action": "policy_change",
                    "change": change,
                }),
            });
        }
        if !p.monitors.is_empty() {
            tasks.push(DispatchTask {
                system: TargetSystem::Frs,
                payload: json!({
                    "action": "install_monitors",
                    "monitors": p.monitors,
                }),
            });
        }

        let packet = DispatchPacket {
            id: Uuid::new_v4().to_string(),
            issue_id: decision.issue_id.clone(),
            scenario_id: decision.scenario_id.clone(),
            created_at: Utc::now(),
            tasks,
            materials: p.materials.clone(),
            oad_flags: p.oad_flags.clone(),
            itc_adjustments: p.itc_adjustments.clone(),
            frs_monitors: p.monitors.clone(),
        };
        ledger.append(
            "cds.decision_dispatched",
            None,
            related(&[("decision", decision_id), ("issue", &decision.issue_id), ("packet", &packet.id)]),
            json!({
                "targets": packet.tasks.iter().map(|t| t.system).collect::<Vec<_>>(),
            }),
        )?;
        if let Some(issue) = self.issues.get_mut(&decision.issue_id) {
            issue.status = IssueStatus::Dispatched;
            issue.updated_at = Utc::now();
        }
        self.dispatches.insert(packet.id.clone(), packet.clone());
        Ok(packet)
    }

    /// Record an escalation in the issue's metadata. The numeric consensus
    /// is never overridden here; a later amendment has to do that.
    pub fn escalate_to_deliberation(
        &mut self,
        ledger: &mut Ledger,
        issue_id: &str,
        reason: impl Into<String>,
    ) -> Result<()> {
        let reason = reason.into();
        let issue = self
            .issues
            .get_mut(issue_id)
            .ok_or_else(|| EngineError::not_found("issue", issue_id))?;
        if !matches!(
            issue.status,
            IssueStatus::ContextReady | IssueStatus::Deliberation
        ) {
            return Err(EngineError::invalid_transition(
                "issue",
                issue_id,
                format!("cannot escalate from {:?}", issue.status),
            ));
        }
        ledger.append(
            "cds.escalated",
            None,
            related(&[("issue", issue_id)]),
            json!({"reason": reason}),
        )?;
        let escalations = issue
            .metadata
            .entry("escalations".to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(items) = escalations {
            items.push(json!({"reason": reason, "at": canonical::format_timestamp(Utc::now())}));
        }
        issue.status = IssueStatus::Deliberation;
        issue.updated_at = Utc::now();
        Ok(())
    }

    /// Open a review of an existing decision: creates a linked review issue
    /// and parks the original under review.
    pub fn request_review(
        &mut self,
        ledger: &mut Ledger,
        decision_id: &str,
        reviewer_id: &str,
        reason: impl Into<String>,
    ) -> Result<Issue> {
        let decision = self
            .decisions
            .get(decision_id)
            .ok_or_else(|| EngineError::not_found("decision", decision_id))?
            .clone();
        let original_status = self
            .issues
            .get(&decision.issue_id)
            .ok_or_else(|| EngineError::not_found("issue", &decision.issue_id))?
            .status;
        if !matches!(original_status, IssueStatus::Decided | IssueStatus::Dispatched) {
            return Err(EngineError::invalid_transition(
                "issue",
                &decision.issue_id,
                format!("{original_status:?} -> under_review"),
            ));
        }

        let reason = reason.into();
        let now = Utc::now();
        let mut review_issue = Issue {
            id: Uuid::new_v4().to_string(),
            title: format!("Review of decision {decision_id}"),
            description: reason.clone(),
            node_id: self.node_id.clone(),
            status: IssueStatus::Intake,
            created_at: now,
            updated_at: now,
            submissions: Vec::new(),
            metadata: HashMap::new(),
        };
        review_issue
            .metadata
            .insert("reviewOfDecision".to_string(), json!(decision_id));
        ledger.append(
            "cds.review_requested",
            Some(reviewer_id.to_string()),
            related(&[
                ("decision", decision_id),
                ("originalIssue", &decision.issue_id),
                ("reviewIssue", &review_issue.id),
            ]),
            json!({"reason": reason}),
        )?;
        if let Some(original) = self.issues.get_mut(&decision.issue_id) {
            original.status = IssueStatus::UnderReview;
            original.updated_at = now;
        }
        self.issues
            .insert(review_issue.id.clone(), review_issue.clone());
        Ok(review_issue)
    }

    /// Reopen an issue under review so deliberation can resume.
    pub fn reopen_issue(&mut self, ledger: &mut Ledger, issue_id: &str) -> Result<()> {
        self.transition(
            ledger,
            issue_id,
            &[IssueStatus::UnderReview],
            IssueStatus::Reopened,
            "cds.issue_reopened",
            json!({}),
        )
    }

    /// Supersede an earlier decision with an amended one. Only the newest
    /// undisputed decision in the supersession chain is in effect.
    pub fn amend_decision(
        &mut self,
        ledger: &mut Ledger,
        original_decision_id: &str,
        new_scenario_id: &str,
        result: &ConsensusResult,
    ) -> Result<Decision> {
        if result.directive != Directive::Approve {
            return Err(EngineError::PolicyRejected(format!(
                "amendment requires an approve directive, got {:?}",
                result.directive
            )));
        }
        let original = self
            .decisions
            .get(original_decision_id)
            .ok_or_else(|| EngineError::not_found("decision", original_decision_id))?
            .clone();
        let issue = self
            .issues
            .get(&original.issue_id)
            .ok_or_else(|| EngineError::not_found("issue", &original.issue_id))?;
        if issue.status != IssueStatus::Deliberation {
            return Err(EngineError::invalid_transition(
                "issue",
                &original.issue_id,
                format!("{:?} -> amended", issue.status),
            ));
        }
        let scenario = self
            .scenarios
            .get(new_scenario_id)
            .ok_or_else(|| EngineError::not_found("scenario", new_scenario_id))?;

        let amended = Decision {
            id: Uuid::new_v4().to_string(),
            issue_id: original.issue_id.clone(),
            scenario_id: new_scenario_id.to_string(),
            status: DecisionStatus::Amended,
            consensus_score: result.consensus_score,
            objection_index: result.objection_index,
            decided_at: Utc::now(),
            rationale_hash: Self::rationale_hash(issue, scenario, result),
            supersedes_decision_id: Some(original_decision_id.to_string()),
        };
        ledger.append(
            "cds.decision_amended",
            None,
            related(&[
                ("decision", &amended.id),
                ("supersedes", original_decision_id),
                ("issue", &original.issue_id),
            ]),
            json!({"consensusScore": amended.consensus_score}),
        )?;
        if let Some(issue) = self.issues.get_mut(&original.issue_id) {
            issue.status = IssueStatus::Amended;
            issue.updated_at = Utc::now();
        }
        self.decisions.insert(amended.id.clone(), amended.clone());
        Ok(amended)
    }

    /// Walk the supersession chain from a decision to the one currently in
    /// effect. Supersession is transitive.
    pub fn effective_decision(&self, decision_id: &str) -> Result<&Decision> {
        let mut current = self
            .decisions
            .get(decision_id)
            .ok_or_else(|| EngineError::not_found("decision", decision_id))?;
        loop {
            match self
                .decisions
                .values()
                .find(|d| d.supersedes_decision_id.as_deref() == Some(current.id.as_str()))
            {
                Some(newer) => current = newer,
                None => return Ok(current),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn engine() -> (DecisionEngine, Ledger) {
        let config = Config::default();
        (
            DecisionEngine::new("node-a", config.consensus),
            Ledger::new("node-a"),
        )
    }

    fn issue_in_deliberation(engine: &mut DecisionEngine, ledger: &mut Ledger) -> Issue {
        let issue = engine
            .create_issue(ledger, "shared tool library", "how to run it")
            .unwrap();
        engine
            .structure_issue(ledger, &issue.id, json!({"domain": "tools"}))
            .unwrap();
        engine
            .prepare_context(ledger, &issue.id, json!({"members": 12}))
            .unwrap();
        engine.open_deliberation(ledger, &issue.id).unwrap();
        engine.issue(&issue.id).unwrap().clone()
    }

    fn approved_scenario(
        engine: &mut DecisionEngine,
        ledger: &mut Ledger,
        issue_id: &str,
        parameters: ScenarioParameters,
    ) -> (Scenario, ConsensusResult) {
        let scenario = engine
            .add_scenario(ledger, issue_id, "baseline", parameters)
            .unwrap();
        for participant in ["a", "b", "c"] {
            engine
                .cast_vote(ledger, &scenario.id, participant, SupportLevel::StrongSupport, 1.0)
                .unwrap();
        }
        let result = engine.evaluate_scenario(&scenario.id).unwrap();
        assert_eq!(result.directive, Directive::Approve);
        (scenario, result)
    }

    #[test]
    fn test_lifecycle_happy_path() {
        let (mut engine, mut ledger) = engine();
        let issue = issue_in_deliberation(&mut engine, &mut ledger);
        assert_eq!(issue.status, IssueStatus::Deliberation);
    }

    #[test]
    fn test_lifecycle_rejects_skipping_states() {
        let (mut engine, mut ledger) = engine();
        let issue = engine.create_issue(&mut ledger, "t", "d").unwrap();
        let err = engine.open_deliberation(&mut ledger, &issue.id).unwrap_err();
        assert_eq!(err.code(), "invalid_transition");
    }

    #[test]
    fn test_vote_replacement_keeps_single_vote() {
        let (mut engine, mut ledger) = engine();
        let issue = issue_in_deliberation(&mut engine, &mut ledger);
        let scenario = engine
            .add_scenario(&mut ledger, &issue.id, "s", ScenarioParameters::default())
            .unwrap();
        engine
            .cast_vote(&mut ledger, &scenario.id, "p1", SupportLevel::Block, 1.0)
            .unwrap();
        engine
            .cast_vote(&mut ledger, &scenario.id, "p1", SupportLevel::Support, 1.0)
            .unwrap();
        let votes = engine.votes_for(&scenario.id);
        assert_eq!(votes.len(), 1);
        assert_eq!(votes[0].support_level, SupportLevel::Support);
    }

    #[test]
    fn test_vote_weight_is_clamped() {
        let (mut engine, mut ledger) = engine();
        let issue = issue_in_deliberation(&mut engine, &mut ledger);
        let scenario = engine
            .add_scenario(&mut ledger, &issue.id, "s", ScenarioParameters::default())
            .unwrap();
        let vote = engine
            .cast_vote(&mut ledger, &scenario.id, "p1", SupportLevel::Support, 10.0)
            .unwrap();
        assert_eq!(vote.weight, W_MAX);
    }

    #[test]
    fn test_vote_on_unknown_scenario_fails() {
        let (mut engine, mut ledger) = engine();
        let err = engine
            .cast_vote(&mut ledger, "ghost", "p1", SupportLevel::Support, 1.0)
            .unwrap_err();
        assert_eq!(err.code(), "not_found");
    }

    #[test]
    fn test_objection_severity_and_scope_clamped() {
        let (mut engine, mut ledger) = engine();
        let issue = issue_in_deliberation(&mut engine, &mut ledger);
        let scenario = engine
            .add_scenario(&mut ledger, &issue.id, "s", ScenarioParameters::default())
            .unwrap();
        let objection = engine
            .register_objection(&mut ledger, &issue.id, &scenario.id, "p1", 2.0, -0.5, "too big")
            .unwrap();
        assert_eq!(objection.severity, 1.0);
        assert_eq!(objection.scope, 0.0);
    }

    #[test]
    fn test_decision_requires_approve_directive() {
        let (mut engine, mut ledger) = engine();
        let issue = issue_in_deliberation(&mut engine, &mut ledger);
        let scenario = engine
            .add_scenario(&mut ledger, &issue.id, "s", ScenarioParameters::default())
            .unwrap();
        engine
            .cast_vote(&mut ledger, &scenario.id, "p1", SupportLevel::Neutral, 1.0)
            .unwrap();
        let result = engine.evaluate_scenario(&scenario.id).unwrap();
        let err = engine
            .make_decision(&mut ledger, &issue.id, &scenario.id, &result)
            .unwrap_err();
        assert_eq!(err.code(), "policy_rejected");
    }

    #[test]
    fn test_dispatch_routes_only_declared_systems() {
        let (mut engine, mut ledger) = engine();
        let issue = issue_in_deliberation(&mut engine, &mut ledger);
        let (scenario, result) = approved_scenario(
            &mut engine,
            &mut ledger,
            &issue.id,
            ScenarioParameters {
                oad_design_required: true,
                cos_task_required: true,
                materials: vec!["timber".into()],
                ..Default::default()
            },
        );
        let decision = engine
            .make_decision(&mut ledger, &issue.id, &scenario.id, &result)
            .unwrap();
        let packet = engine.dispatch(&mut ledger, &decision.id).unwrap();
        let systems: Vec<TargetSystem> = packet.tasks.iter().map(|t| t.system).collect();
        assert_eq!(systems, vec![TargetSystem::Oad, TargetSystem::Cos]);
        assert_eq!(engine.issue(&issue.id).unwrap().status, IssueStatus::Dispatched);
    }

    #[test]
    fn test_dispatch_twice_fails() {
        let (mut engine, mut ledger) = engine();
        let issue = issue_in_deliberation(&mut engine, &mut ledger);
        let (scenario, result) = approved_scenario(
            &mut engine,
            &mut ledger,
            &issue.id,
            ScenarioParameters::default(),
        );
        let decision = engine
            .make_decision(&mut ledger, &issue.id, &scenario.id, &result)
            .unwrap();
        engine.dispatch(&mut ledger, &decision.id).unwrap();
        let err = engine.dispatch(&mut ledger, &decision.id).unwrap_err();
        assert_eq!(err.code(), "invalid_transition");
    }

    #[test]
    fn test_review_and_amend_supersession() {
        let (mut engine, mut ledger) = engine();
        let issue = issue_in_deliberation(&mut engine, &mut ledger);
        let (scenario, result) = approved_scenario(
            &mut engine,
            &mut ledger,
            &issue.id,
            ScenarioParameters::default(),
        );
        let decision = engine
            .make_decision(&mut ledger, &issue.id, &scenario.id, &result)
            .unwrap();

        engine
            .request_review(&mut ledger, &decision.id, "reviewer-1", "new information")
            .unwrap();
        assert_eq!(engine.issue(&issue.id).unwrap().status, IssueStatus::UnderReview);

        engine.reopen_issue(&mut ledger, &issue.id).unwrap();
        engine.open_deliberation(&mut ledger, &issue.id).unwrap();
        let (scenario2, result2) = approved_scenario(
            &mut engine,
            &mut ledger,
            &issue.id,
            ScenarioParameters::default(),
        );
        let amended = engine
            .amend_decision(&mut ledger, &decision.id, &scenario2.id, &result2)
            .unwrap();
        assert_eq!(amended.status, DecisionStatus::Amended);
        assert_eq!(
            amended.supersedes_decision_id.as_deref(),
            Some(decision.id.as_str())
        );
        let effective = engine.effective_decision(&decision.id).unwrap();
        assert_eq!(effective.id, amended.id);
    }

    #[test]
    fn test_rationale_hash_is_deterministic_and_sensitive() {
        let (mut engine, mut ledger) = engine();
        let issue = issue_in_deliberation(&mut engine, &mut ledger);
        let scenario = engine
            .add_scenario(&mut ledger, &issue.id, "s", ScenarioParameters::default())
            .unwrap();
        engine
            .cast_vote(&mut ledger, &scenario.id, "p", SupportLevel::StrongSupport, 1.0)
            .unwrap();
        let result = engine.evaluate_scenario(&scenario.id).unwrap();
        let issue_snapshot = engine.issue(&issue.id).unwrap().clone();
        let h1 = DecisionEngine::rationale_hash(&issue_snapshot, &scenario, &result);
        let h2 = DecisionEngine::rationale_hash(&issue_snapshot, &scenario, &result);
        assert_eq!(h1, h2);

        let mut altered = issue_snapshot.clone();
        altered.description = "different".to_string();
        assert_ne!(h1, DecisionEngine::rationale_hash(&altered, &scenario, &result));
    }

    #[test]
    fn test_submissions_close_after_deliberation() {
        let (mut engine, mut ledger) = engine();
        let issue = issue_in_deliberation(&mut engine, &mut ledger);
        engine
            .add_submission(&mut ledger, &issue.id, "p1", SubmissionType::Proposal, "use cedar")
            .unwrap();
        let (scenario, result) = approved_scenario(
            &mut engine,
            &mut ledger,
            &issue.id,
            ScenarioParameters::default(),
        );
        engine
            .make_decision(&mut ledger, &issue.id, &scenario.id, &result)
            .unwrap();
        let err = engine
            .add_submission(&mut ledger, &issue.id, "p1", SubmissionType::Comment, "late")
            .unwrap_err();
        assert_eq!(err.code(), "invalid_transition");
    }
}
