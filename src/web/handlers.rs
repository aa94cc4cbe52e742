//! HTTP handlers for the REST API endpoints
//!
//! Every mutation takes the node's write lock, which is the critical
//! section over subsystem state and the ledger tail: requests serialize in
//! arrival order and no entry is ever appended concurrently.

use crate::credit::{AccessValuation, Account, LaborEvent, RedemptionRecord, WeightedLaborRecord};
use crate::decision::{
    ConsensusResult, Decision, DispatchPacket, Issue, Objection, Scenario, Submission, Vote,
};
use crate::design::{
    CertificationRecord, DesignSpec, DesignVersion, EcoAssessment, ValuationProfile,
};
use crate::error::EngineError;
use crate::federation::{Envelope, NodeProfile};
use crate::feedback::{
    DiagnosticFinding, IndicesReport, MemoryRecord, Recommendation, SignalPacket,
};
use crate::guard::OpGuard;
use crate::ledger::{LedgerEntry, TrailFilter};
use crate::node::{CoopNode, NodeStatus};
use crate::production::{Constraint, ProductionPlan, QaResult, TaskInstance, WorkloadSignal};
use crate::web::models::*;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Budget applied to valuation, bottleneck detection, and packet analysis.
const LONG_OP_BUDGET: Duration = Duration::from_secs(5);

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub node: Arc<RwLock<CoopNode>>,
}

impl AppState {
    pub fn new(node: CoopNode) -> Self {
        Self {
            node: Arc::new(RwLock::new(node)),
        }
    }
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ApiError>)>;

fn reject(err: EngineError) -> (StatusCode, Json<ApiError>) {
    let status = match &err {
        EngineError::NotFound { .. } => StatusCode::NOT_FOUND,
        EngineError::InvalidTransition { .. } => StatusCode::CONFLICT,
        EngineError::OutOfRange { .. } => StatusCode::BAD_REQUEST,
        EngineError::InsufficientBalance { .. } => StatusCode::CONFLICT,
        EngineError::ConstraintViolation(_) => StatusCode::BAD_REQUEST,
        EngineError::Integrity { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        EngineError::DeadlineExceeded(_) => StatusCode::GATEWAY_TIMEOUT,
        EngineError::Cancelled(_) => StatusCode::SERVICE_UNAVAILABLE,
        EngineError::PolicyRejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
        EngineError::FederationRejected(_) => StatusCode::BAD_REQUEST,
        EngineError::Io(_) | EngineError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ApiError {
            error: err.code().to_string(),
            message: err.to_string(),
            timestamp: Utc::now(),
        }),
    )
}

pub async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    let node = state.node.read().await;
    Json(serde_json::json!({
        "status": "healthy",
        "nodeId": node.config.node.node_id,
        "timestamp": Utc::now(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn get_status(State(state): State<AppState>) -> Json<NodeStatus> {
    Json(state.node.read().await.status())
}

// --- CDS -----------------------------------------------------------------

pub async fn create_issue(
    State(state): State<AppState>,
    Json(request): Json<CreateIssueRequest>,
) -> ApiResult<Issue> {
    let mut node = state.node.write().await;
    let node = &mut *node;
    node.decisions
        .create_issue(&mut node.ledger, request.title, request.description)
        .map(Json)
        .map_err(reject)
}

pub async fn get_issues(State(state): State<AppState>) -> ApiResult<Vec<Issue>> {
    let node = state.node.read().await;
    Ok(Json(node.decisions.issues().cloned().collect()))
}

pub async fn get_issue(
    State(state): State<AppState>,
    Path(issue_id): Path<String>,
) -> ApiResult<Issue> {
    let node = state.node.read().await;
    node.decisions
        .issue(&issue_id)
        .cloned()
        .map(Json)
        .ok_or_else(|| reject(EngineError::not_found("issue", issue_id)))
}

pub async fn add_submission(
    State(state): State<AppState>,
    Path(issue_id): Path<String>,
    Json(request): Json<AddSubmissionRequest>,
) -> ApiResult<Submission> {
    let mut node = state.node.write().await;
    let node = &mut *node;
    node.decisions
        .add_submission(
            &mut node.ledger,
            &issue_id,
            request.author_id,
            request.submission_type,
            request.content,
        )
        .map(Json)
        .map_err(reject)
}

pub async fn structure_issue(
    State(state): State<AppState>,
    Path(issue_id): Path<String>,
    Json(request): Json<StructuredDataRequest>,
) -> ApiResult<Issue> {
    let mut node = state.node.write().await;
    let node = &mut *node;
    node.decisions
        .structure_issue(&mut node.ledger, &issue_id, request.data)
        .map_err(reject)?;
    Ok(Json(node.decisions.issue(&issue_id).cloned().expect("issue just updated")))
}

pub async fn prepare_context(
    State(state): State<AppState>,
    Path(issue_id): Path<String>,
    Json(request): Json<StructuredDataRequest>,
) -> ApiResult<Issue> {
    let mut node = state.node.write().await;
    let node = &mut *node;
    node.decisions
        .prepare_context(&mut node.ledger, &issue_id, request.data)
        .map_err(reject)?;
    Ok(Json(node.decisions.issue(&issue_id).cloned().expect("issue just updated")))
}

pub async fn open_deliberation(
    State(state): State<AppState>,
    Path(issue_id): Path<String>,
) -> ApiResult<Issue> {
    let mut node = state.node.write().await;
    let node = &mut *node;
    node.decisions
        .open_deliberation(&mut node.ledger, &issue_id)
        .map_err(reject)?;
    Ok(Json(node.decisions.issue(&issue_id).cloned().expect("issue just updated")))
}

pub async fn add_scenario(
    State(state): State<AppState>,
    Path(issue_id): Path<String>,
    Json(request): Json<AddScenarioRequest>,
) -> ApiResult<Scenario> {
    let mut node = state.node.write().await;
    let node = &mut *node;
    node.decisions
        .add_scenario(&mut node.ledger, &issue_id, request.label, request.parameters)
        .map(Json)
        .map_err(reject)
}

pub async fn cast_vote(
    State(state): State<AppState>,
    Path(scenario_id): Path<String>,
    Json(request): Json<CastVoteRequest>,
) -> ApiResult<Vote> {
    let mut node = state.node.write().await;
    let node = &mut *node;
    let weight = node.identity.participant_weight(&request.participant_id);
    node.decisions
        .cast_vote(
            &mut node.ledger,
            &scenario_id,
            &request.participant_id,
            request.support_level,
            weight,
        )
        .map(Json)
        .map_err(reject)
}

pub async fn register_objection(
    State(state): State<AppState>,
    Path(scenario_id): Path<String>,
    Json(request): Json<RegisterObjectionRequest>,
) -> ApiResult<Objection> {
    let mut node = state.node.write().await;
    let node = &mut *node;
    node.decisions
        .register_objection(
            &mut node.ledger,
            &request.issue_id,
            &scenario_id,
            &request.participant_id,
            request.severity,
            request.scope,
            request.description,
        )
        .map(Json)
        .map_err(reject)
}

pub async fn evaluate_scenario(
    State(state): State<AppState>,
    Path(scenario_id): Path<String>,
) -> ApiResult<ConsensusResult> {
    let node = state.node.read().await;
    node.decisions
        .evaluate_scenario(&scenario_id)
        .map(Json)
        .map_err(reject)
}

pub async fn make_decision(
    State(state): State<AppState>,
    Json(request): Json<MakeDecisionRequest>,
) -> ApiResult<Decision> {
    let mut node = state.node.write().await;
    let node = &mut *node;
    let result = node
        .decisions
        .evaluate_scenario(&request.scenario_id)
        .map_err(reject)?;
    node.decisions
        .make_decision(&mut node.ledger, &request.issue_id, &request.scenario_id, &result)
        .map(Json)
        .map_err(reject)
}

pub async fn dispatch_decision(
    State(state): State<AppState>,
    Path(decision_id): Path<String>,
) -> ApiResult<DispatchPacket> {
    let mut node = state.node.write().await;
    let node = &mut *node;
    node.decisions
        .dispatch(&mut node.ledger, &decision_id)
        .map(Json)
        .map_err(reject)
}

pub async fn request_review(
    State(state): State<AppState>,
    Path(decision_id): Path<String>,
    Json(request): Json<ReviewRequest>,
) -> ApiResult<Issue> {
    let mut node = state.node.write().await;
    let node = &mut *node;
    node.decisions
        .request_review(&mut node.ledger, &decision_id, &request.reviewer_id, request.reason)
        .map(Json)
        .map_err(reject)
}

// --- OAD -----------------------------------------------------------------

pub async fn create_spec(
    State(state): State<AppState>,
    Json(request): Json<CreateSpecRequest>,
) -> ApiResult<DesignSpec> {
    let mut node = state.node.write().await;
    let node = &mut *node;
    node.designs
        .create_spec(&mut node.ledger, request.purpose, request.functional_requirements)
        .map(Json)
        .map_err(reject)
}

pub async fn create_version(
    State(state): State<AppState>,
    Json(request): Json<CreateVersionRequest>,
) -> ApiResult<DesignVersion> {
    let mut node = state.node.write().await;
    let node = &mut *node;
    node.designs
        .create_version(
            &mut node.ledger,
            &request.spec_id,
            request.label,
            request.authors,
            request.parameters,
        )
        .map(Json)
        .map_err(reject)
}

pub async fn compute_eco(
    State(state): State<AppState>,
    Path(version_id): Path<String>,
) -> ApiResult<EcoAssessment> {
    let mut node = state.node.write().await;
    let node = &mut *node;
    node.designs
        .compute_eco_assessment(&mut node.ledger, &version_id)
        .map(Json)
        .map_err(reject)
}

pub async fn request_certification(
    State(state): State<AppState>,
    Path(version_id): Path<String>,
    Json(request): Json<RequestCertificationRequest>,
) -> ApiResult<CertificationRecord> {
    let mut node = state.node.write().await;
    let node = &mut *node;
    node.designs
        .request_certification(&mut node.ledger, &version_id, request.certifier_ids)
        .map(Json)
        .map_err(reject)
}

pub async fn sign_certification(
    State(state): State<AppState>,
    Path(version_id): Path<String>,
    Json(request): Json<SignCertificationRequest>,
) -> ApiResult<CertificationRecord> {
    let mut node = state.node.write().await;
    let node = &mut *node;
    node.designs
        .record_certifier_signature(&mut node.ledger, &version_id, &request.certifier_id)
        .map(Json)
        .map_err(reject)
}

pub async fn valuation_profile(
    State(state): State<AppState>,
    Path(version_id): Path<String>,
) -> ApiResult<ValuationProfile> {
    let node = state.node.read().await;
    node.designs
        .valuation_profile(&version_id)
        .map(Json)
        .map_err(reject)
}

// --- ITC -----------------------------------------------------------------

pub async fn record_labor(
    State(state): State<AppState>,
    Json(request): Json<RecordLaborRequest>,
) -> ApiResult<LaborEvent> {
    let mut node = state.node.write().await;
    let node = &mut *node;
    node.credits
        .record_labor(
            &mut node.ledger,
            request.member_id,
            request.coop_id,
            request.task_id,
            request.task_label,
            request.start_time,
            request.end_time,
            request.skill_tier,
            request.context,
        )
        .map(Json)
        .map_err(reject)
}

pub async fn verify_labor(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
    Json(request): Json<VerifyLaborRequest>,
) -> ApiResult<LaborEvent> {
    let mut node = state.node.write().await;
    let node = &mut *node;
    node.credits
        .verify_labor(&mut node.ledger, &event_id, &request.verifier_id)
        .map(Json)
        .map_err(reject)
}

pub async fn compute_weighted(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
) -> ApiResult<WeightedLaborRecord> {
    let mut node = state.node.write().await;
    let node = &mut *node;
    node.credits
        .compute_weighted(&mut node.ledger, &event_id)
        .map(Json)
        .map_err(reject)
}

pub async fn credit_account(
    State(state): State<AppState>,
    Path(member_id): Path<String>,
    Json(request): Json<CreditAccountRequest>,
) -> ApiResult<Account> {
    let mut node = state.node.write().await;
    let node = &mut *node;
    node.credits
        .credit_account(&mut node.ledger, &member_id, &request.record_id)
        .map(Json)
        .map_err(reject)
}

pub async fn apply_decay(
    State(state): State<AppState>,
    Path(member_id): Path<String>,
) -> ApiResult<serde_json::Value> {
    let mut node = state.node.write().await;
    let node = &mut *node;
    let amount = node
        .credits
        .apply_decay(&mut node.ledger, &member_id)
        .map_err(reject)?;
    Ok(Json(serde_json::json!({"memberId": member_id, "decayed": amount})))
}

pub async fn get_account(
    State(state): State<AppState>,
    Path(member_id): Path<String>,
) -> ApiResult<Account> {
    let node = state.node.read().await;
    node.credits
        .account(&member_id)
        .cloned()
        .map(Json)
        .ok_or_else(|| reject(EngineError::not_found("account", member_id)))
}

pub async fn compute_valuation(
    State(state): State<AppState>,
    Json(request): Json<ComputeValuationRequest>,
) -> ApiResult<AccessValuation> {
    let mut node = state.node.write().await;
    let guard = OpGuard::unbounded("valuation").with_deadline(LONG_OP_BUDGET);
    node.price_item(
        &request.item_id,
        &request.version_id,
        request.plan_id.as_deref(),
        &guard,
    )
    .map(Json)
    .map_err(reject)
}

pub async fn redeem_access(
    State(state): State<AppState>,
    Json(request): Json<RedeemRequest>,
) -> ApiResult<RedemptionRecord> {
    let mut node = state.node.write().await;
    let node = &mut *node;
    node.credits
        .redeem_access(
            &mut node.ledger,
            &request.member_id,
            &request.item_id,
            request.redemption_type,
            request.expires_at,
        )
        .map(Json)
        .map_err(reject)
}

// --- COS -----------------------------------------------------------------

pub async fn create_plan(
    State(state): State<AppState>,
    Json(request): Json<CreatePlanRequest>,
) -> ApiResult<ProductionPlan> {
    let mut node = state.node.write().await;
    let node = &mut *node;
    node.production
        .create_production_plan(
            &mut node.ledger,
            &request.design_version_id,
            &request.labor_profile,
            &request.batch_id,
            request.batch_size,
            request.expected_materials,
        )
        .map(Json)
        .map_err(reject)
}

pub async fn assign_task(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
    Json(request): Json<AssignTaskRequest>,
) -> ApiResult<TaskInstance> {
    let mut node = state.node.write().await;
    let node = &mut *node;
    node.production
        .assign_task(
            &mut node.ledger,
            &instance_id,
            &request.coop_id,
            request.participants,
            request.scheduled_start,
            request.scheduled_end,
        )
        .map(Json)
        .map_err(reject)
}

pub async fn start_task(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
) -> ApiResult<TaskInstance> {
    let mut node = state.node.write().await;
    let node = &mut *node;
    node.production
        .start_task(&mut node.ledger, &instance_id)
        .map(Json)
        .map_err(reject)
}

pub async fn block_task(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
    Json(request): Json<BlockTaskRequest>,
) -> ApiResult<TaskInstance> {
    let mut node = state.node.write().await;
    let node = &mut *node;
    node.production
        .block_task(&mut node.ledger, &instance_id, request.reason)
        .map(Json)
        .map_err(reject)
}

pub async fn complete_task(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
    Json(request): Json<CompleteTaskRequest>,
) -> ApiResult<TaskInstance> {
    let mut node = state.node.write().await;
    let node = &mut *node;
    node.production
        .complete_task(&mut node.ledger, &instance_id, request.actual_hours)
        .map(Json)
        .map_err(reject)
}

pub async fn record_material_flow(
    State(state): State<AppState>,
    Json(request): Json<MaterialFlowRequest>,
) -> ApiResult<crate::production::MaterialLedgerEntry> {
    let mut node = state.node.write().await;
    let node = &mut *node;
    node.production
        .record_material_flow(
            &mut node.ledger,
            &request.plan_id,
            &request.material_id,
            request.quantity_kg,
            request.direction,
            request.ecological_impact_index,
            request.task_instance_id,
        )
        .map(Json)
        .map_err(reject)
}

pub async fn material_inventory(
    State(state): State<AppState>,
    Path(plan_id): Path<String>,
) -> ApiResult<HashMap<String, f64>> {
    let node = state.node.read().await;
    node.production
        .material_inventory(&plan_id)
        .map(Json)
        .map_err(reject)
}

pub async fn detect_bottlenecks(
    State(state): State<AppState>,
    Path(plan_id): Path<String>,
) -> ApiResult<Vec<Constraint>> {
    let mut node = state.node.write().await;
    let node = &mut *node;
    let guard = OpGuard::unbounded("bottlenecks").with_deadline(LONG_OP_BUDGET);
    node.production
        .detect_bottlenecks(&mut node.ledger, &plan_id, &guard)
        .map(Json)
        .map_err(reject)
}

pub async fn workload_signal(
    State(state): State<AppState>,
    Path(plan_id): Path<String>,
) -> ApiResult<WorkloadSignal> {
    let mut node = state.node.write().await;
    let node = &mut *node;
    node.production
        .workload_signal(&mut node.ledger, &plan_id)
        .map(Json)
        .map_err(reject)
}

pub async fn record_qa(
    State(state): State<AppState>,
    Json(request): Json<QaResultRequest>,
) -> ApiResult<QaResult> {
    let mut node = state.node.write().await;
    let node = &mut *node;
    node.production
        .record_qa_result(
            &mut node.ledger,
            &request.plan_id,
            &request.item,
            request.passed,
            request.inspectors,
            request.defects,
            request.severity_index,
        )
        .map(Json)
        .map_err(reject)
}

// --- FRS -----------------------------------------------------------------

pub async fn create_packet(
    State(state): State<AppState>,
    Json(request): Json<CreatePacketRequest>,
) -> ApiResult<SignalPacket> {
    let mut node = state.node.write().await;
    node.create_signal_packet(request.plan_id.as_deref())
        .map(Json)
        .map_err(reject)
}

pub async fn analyze_packet(
    State(state): State<AppState>,
    Json(request): Json<AnalyzePacketRequest>,
) -> ApiResult<Vec<DiagnosticFinding>> {
    let mut node = state.node.write().await;
    let node = &mut *node;
    let guard = OpGuard::unbounded("analysis").with_deadline(LONG_OP_BUDGET);
    node.feedback
        .analyze_packet(&mut node.ledger, &request.packet_id, &guard)
        .map(Json)
        .map_err(reject)
}

pub async fn generate_recommendations(
    State(state): State<AppState>,
    Json(request): Json<RecommendationsRequest>,
) -> ApiResult<Vec<Recommendation>> {
    let mut node = state.node.write().await;
    let node = &mut *node;
    node.feedback
        .generate_recommendations(&mut node.ledger, &request.finding_ids)
        .map(Json)
        .map_err(reject)
}

pub async fn compute_indices(
    State(state): State<AppState>,
    Path(packet_id): Path<String>,
) -> ApiResult<IndicesReport> {
    let mut node = state.node.write().await;
    let node = &mut *node;
    node.feedback
        .compute_indices(&mut node.ledger, &packet_id)
        .map(Json)
        .map_err(reject)
}

pub async fn record_memory(
    State(state): State<AppState>,
    Json(request): Json<MemoryRecordRequest>,
) -> ApiResult<MemoryRecord> {
    let mut node = state.node.write().await;
    let node = &mut *node;
    node.feedback
        .record_memory(&mut node.ledger, request.record_type, request.title, request.narrative)
        .map(Json)
        .map_err(reject)
}

pub async fn dashboard(State(state): State<AppState>) -> ApiResult<DashboardResponse> {
    let node = state.node.read().await;
    Ok(Json(DashboardResponse {
        status: node.status(),
        finding_count: node.feedback.findings().count(),
        recommendation_count: node.feedback.recommendations().len(),
        memory_count: node.feedback.memory().len(),
        scarcity_amplifier: node.feedback.scarcity_amplifier(),
    }))
}

// --- Federation ----------------------------------------------------------

pub async fn announce_node(State(state): State<AppState>) -> ApiResult<Envelope> {
    let mut node = state.node.write().await;
    node.announce().map(Json).map_err(reject)
}

pub async fn send_message(
    State(state): State<AppState>,
    Json(request): Json<SendMessageRequest>,
) -> ApiResult<Envelope> {
    let mut node = state.node.write().await;
    let node = &mut *node;
    node.federation
        .send_message(
            &mut node.ledger,
            &node.identity,
            request.message_type,
            request.to_scope,
            request.payload,
            request.summary,
        )
        .map(Json)
        .map_err(reject)
}

pub async fn query_node(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
) -> ApiResult<NodeProfile> {
    let node = state.node.read().await;
    node.federation
        .query_node(&node_id)
        .cloned()
        .map(Json)
        .map_err(reject)
}

// --- Ledger --------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrailQuery {
    #[serde(default)]
    pub related_id: Option<String>,
    #[serde(default)]
    pub type_prefix: Option<String>,
}

pub async fn get_ledger_entries(
    State(state): State<AppState>,
    Query(query): Query<TrailQuery>,
) -> ApiResult<Vec<LedgerEntry>> {
    let node = state.node.read().await;
    let filter = TrailFilter {
        related_id: query.related_id,
        type_prefix: query.type_prefix,
    };
    Ok(Json(
        node.ledger.trail(&filter).into_iter().cloned().collect(),
    ))
}

pub async fn verify_ledger(State(state): State<AppState>) -> ApiResult<serde_json::Value> {
    let mut node = state.node.write().await;
    match node.audit_ledger() {
        Ok(()) => Ok(Json(serde_json::json!({
            "valid": true,
            "entries": node.ledger.len(),
        }))),
        Err(e) => Err(reject(e)),
    }
}
