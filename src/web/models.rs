//! Data models for web API requests and responses
//!
//! Entities serialize with camelCase keys straight from their definitions;
//! the structs here are the request bodies and thin response wrappers the
//! HTTP facade needs on top of them.

use crate::credit::{LaborContext, RedemptionType, SkillTier};
use crate::decision::{ScenarioParameters, SubmissionType, SupportLevel};
use crate::federation::{MessageType, ToScope};
use crate::feedback::MemoryType;
use crate::production::{ExpectedMaterial, MaterialDirection, ProductionStep};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// API error response; `error` is the stable engine code.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateIssueRequest {
    pub title: String,
    pub description: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredDataRequest {
    pub data: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddSubmissionRequest {
    pub author_id: String,
    pub submission_type: SubmissionType,
    pub content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddScenarioRequest {
    pub label: String,
    #[serde(default)]
    pub parameters: ScenarioParameters,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CastVoteRequest {
    pub participant_id: String,
    pub support_level: SupportLevel,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterObjectionRequest {
    pub issue_id: String,
    pub participant_id: String,
    pub severity: f64,
    pub scope: f64,
    pub description: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MakeDecisionRequest {
    pub issue_id: String,
    pub scenario_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRequest {
    pub reviewer_id: String,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSpecRequest {
    pub purpose: String,
    #[serde(default)]
    pub functional_requirements: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVersionRequest {
    pub spec_id: String,
    pub label: String,
    #[serde(default)]
    pub authors: Vec<String>,
    pub parameters: crate::design::VersionParameters,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestCertificationRequest {
    pub certifier_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignCertificationRequest {
    pub certifier_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordLaborRequest {
    pub member_id: String,
    pub coop_id: String,
    pub task_id: String,
    pub task_label: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub skill_tier: SkillTier,
    #[serde(default)]
    pub context: LaborContext,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyLaborRequest {
    pub verifier_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditAccountRequest {
    pub record_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputeValuationRequest {
    pub item_id: String,
    pub version_id: String,
    #[serde(default)]
    pub plan_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedeemRequest {
    pub member_id: String,
    pub item_id: String,
    pub redemption_type: RedemptionType,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePlanRequest {
    pub design_version_id: String,
    pub labor_profile: Vec<ProductionStep>,
    pub batch_id: String,
    pub batch_size: usize,
    #[serde(default)]
    pub expected_materials: Vec<ExpectedMaterial>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignTaskRequest {
    pub coop_id: String,
    #[serde(default)]
    pub participants: Vec<String>,
    #[serde(default)]
    pub scheduled_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scheduled_end: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockTaskRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteTaskRequest {
    pub actual_hours: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterialFlowRequest {
    pub plan_id: String,
    pub material_id: String,
    pub quantity_kg: f64,
    pub direction: MaterialDirection,
    pub ecological_impact_index: f64,
    #[serde(default)]
    pub task_instance_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QaResultRequest {
    pub plan_id: String,
    pub item: String,
    pub passed: bool,
    #[serde(default)]
    pub inspectors: Vec<String>,
    #[serde(default)]
    pub defects: Vec<String>,
    pub severity_index: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePacketRequest {
    #[serde(default)]
    pub plan_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzePacketRequest {
    pub packet_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationsRequest {
    pub finding_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryRecordRequest {
    pub record_type: MemoryType,
    pub title: String,
    pub narrative: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub message_type: MessageType,
    pub to_scope: ToScope,
    pub payload: Value,
    pub summary: String,
}

/// Aggregate view for the feedback dashboard endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardResponse {
    pub status: crate::node::NodeStatus,
    pub finding_count: usize,
    pub recommendation_count: usize,
    pub memory_count: usize,
    pub scarcity_amplifier: f64,
}
