//! COS — production and constraint coordinator
//!
//! A production plan turns a design's labor profile into task definitions
//! and per-unit task instances, tracks material flows, and watches itself
//! for bottlenecks. Workload signals summarize the plan for the time-credit
//! and feedback engines.

use crate::credit::SkillTier;
use crate::error::{EngineError, Result};
use crate::guard::OpGuard;
use crate::ledger::{related, Ledger};
use chrono::{DateTime, Utc};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use tracing::warn;
use uuid::Uuid;

/// One step of a design's labor profile, the input to plan synthesis.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductionStep {
    pub step_name: String,
    pub skill_tier: SkillTier,
    pub estimated_hours_per_unit: f64,
    #[serde(default)]
    pub tool_requirements: Vec<String>,
    #[serde(default)]
    pub workspace_requirements: Vec<String>,
    #[serde(default)]
    pub material_requirements: Vec<String>,
    /// Names of steps that must complete first.
    #[serde(default)]
    pub predecessors: Vec<String>,
}

/// A production step instantiated inside a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDefinition {
    pub id: String,
    pub plan_id: String,
    pub step_name: String,
    pub skill_tier: SkillTier,
    pub estimated_hours_per_unit: f64,
    pub tool_requirements: Vec<String>,
    pub workspace_requirements: Vec<String>,
    pub material_requirements: Vec<String>,
    /// Ids of predecessor task definitions in the same plan.
    pub predecessors: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Assigned,
    InProgress,
    Blocked,
    Done,
    Cancelled,
}

/// Per-unit execution of a task definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInstance {
    pub id: String,
    pub plan_id: String,
    pub task_definition_id: String,
    pub unit_index: usize,
    pub status: TaskStatus,
    pub assigned_coop_id: Option<String>,
    pub participants: Vec<String>,
    pub scheduled_start: Option<DateTime<Utc>>,
    pub scheduled_end: Option<DateTime<Utc>>,
    pub actual_start: Option<DateTime<Utc>>,
    pub actual_end: Option<DateTime<Utc>>,
    pub actual_hours: Option<f64>,
    pub block_reasons: Vec<String>,
    /// Instant of the last status change; drives the rolling-window
    /// blockage sample.
    pub updated_at: DateTime<Utc>,
}

/// Material expected by a plan, with what is currently on hand.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpectedMaterial {
    pub material_id: String,
    pub expected_kg: f64,
    pub available_kg: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductionPlan {
    pub id: String,
    pub design_version_id: String,
    pub batch_id: String,
    pub batch_size: usize,
    pub expected_materials: Vec<ExpectedMaterial>,
    /// Longest path through the predecessor DAG, hours per unit.
    pub cycle_time_hours: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaterialDirection {
    InternalRecycle,
    ExternalProcurement,
    ProductionUse,
    LossScrap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterialLedgerEntry {
    pub id: String,
    pub material_id: String,
    pub quantity_kg: f64,
    pub direction: MaterialDirection,
    pub ecological_impact_index: f64,
    pub timestamp: DateTime<Utc>,
    pub plan_id: String,
    pub task_instance_id: Option<String>,
}

/// Constraint surfaced by bottleneck detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Constraint {
    pub plan_id: String,
    pub node_id: String,
    pub task_definition_id: String,
    pub constraint_type: String,
    pub severity: f64,
    pub description: String,
    pub suggested_actions: Vec<String>,
}

/// Snapshot of a plan's labor demand and material pressure, consumed by
/// the time-credit and feedback engines. A copied value, never a live view.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadSignal {
    pub plan_id: String,
    pub labor_by_skill: HashMap<String, f64>,
    pub material_scarcity_index: f64,
    pub throughput_constraints: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QaResult {
    pub id: String,
    pub plan_id: String,
    pub item: String,
    pub passed: bool,
    pub inspectors: Vec<String>,
    pub defects: Vec<String>,
    pub severity_index: f64,
    pub recorded_at: DateTime<Utc>,
}

/// Production coordinator state for one node.
pub struct ProductionEngine {
    node_id: String,
    alpha: f64,
    beta: f64,
    bottleneck_threshold: f64,
    rolling_window_days: f64,
    plans: HashMap<String, ProductionPlan>,
    definitions: HashMap<String, TaskDefinition>,
    instances: HashMap<String, TaskInstance>,
    material_ledger: Vec<MaterialLedgerEntry>,
    constraints: HashMap<String, Vec<Constraint>>,
    qa_results: Vec<QaResult>,
}

impl ProductionEngine {
    pub fn new(
        node_id: impl Into<String>,
        alpha: f64,
        beta: f64,
        threshold: f64,
        rolling_window_days: f64,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            alpha,
            beta,
            bottleneck_threshold: threshold,
            rolling_window_days,
            plans: HashMap::new(),
            definitions: HashMap::new(),
            instances: HashMap::new(),
            material_ledger: Vec::new(),
            constraints: HashMap::new(),
            qa_results: Vec::new(),
        }
    }

    pub fn plan(&self, id: &str) -> Option<&ProductionPlan> {
        self.plans.get(id)
    }

    pub fn definition(&self, id: &str) -> Option<&TaskDefinition> {
        self.definitions.get(id)
    }

    pub fn instance(&self, id: &str) -> Option<&TaskInstance> {
        self.instances.get(id)
    }

    pub fn instances_for_plan(&self, plan_id: &str) -> Vec<&TaskInstance> {
        self.instances
            .values()
            .filter(|i| i.plan_id == plan_id)
            .collect()
    }

    pub fn definitions_for_plan(&self, plan_id: &str) -> Vec<&TaskDefinition> {
        self.definitions
            .values()
            .filter(|d| d.plan_id == plan_id)
            .collect()
    }

    pub fn constraints_for_plan(&self, plan_id: &str) -> &[Constraint] {
        self.constraints
            .get(plan_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn qa_results(&self) -> &[QaResult] {
        &self.qa_results
    }

    /// QA fail rate across all recorded results.
    pub fn qa_fail_rate(&self) -> f64 {
        if self.qa_results.is_empty() {
            return 0.0;
        }
        let failed = self.qa_results.iter().filter(|r| !r.passed).count();
        failed as f64 / self.qa_results.len() as f64
    }

    /// Blocked instances over the rolling window, for diagnostics.
    pub fn blocked_ratio(&self) -> f64 {
        self.blocked_ratio_at(Utc::now())
    }

    /// Blocked-task ratio over the rolling window ending at `as_of`.
    /// Only instances whose status changed inside the window are sampled;
    /// an empty window reads 0.
    pub fn blocked_ratio_at(&self, as_of: DateTime<Utc>) -> f64 {
        let window_start =
            as_of - chrono::Duration::seconds((self.rolling_window_days * 86_400.0) as i64);
        let sampled: Vec<&TaskInstance> = self
            .instances
            .values()
            .filter(|i| i.status != TaskStatus::Cancelled && i.updated_at >= window_start)
            .collect();
        if sampled.is_empty() {
            return 0.0;
        }
        let blocked = sampled
            .iter()
            .filter(|i| i.status == TaskStatus::Blocked)
            .count();
        blocked as f64 / sampled.len() as f64
    }

    /// Done instances / total non-cancelled instances.
    pub fn completion_rate(&self) -> f64 {
        let active: Vec<&TaskInstance> = self
            .instances
            .values()
            .filter(|i| i.status != TaskStatus::Cancelled)
            .collect();
        if active.is_empty() {
            return 0.0;
        }
        let done = active.iter().filter(|i| i.status == TaskStatus::Done).count();
        done as f64 / active.len() as f64
    }

    /// Longest path through the step DAG in hours per unit.
    ///
    /// A predecessor name that resolves to no step, or a dependency cycle,
    /// makes the cycle time undefined and fails the plan.
    fn compute_cycle_time(steps: &[ProductionStep]) -> Result<f64> {
        let mut graph: DiGraph<f64, ()> = DiGraph::new();
        let mut index_by_name: HashMap<&str, NodeIndex> = HashMap::new();
        for step in steps {
            let idx = graph.add_node(step.estimated_hours_per_unit);
            index_by_name.insert(step.step_name.as_str(), idx);
        }
        for step in steps {
            let to = index_by_name[step.step_name.as_str()];
            for pred in &step.predecessors {
                let from = *index_by_name.get(pred.as_str()).ok_or_else(|| {
                    EngineError::ConstraintViolation(format!(
                        "step '{}' names unknown predecessor '{pred}'; cycle time is undefined",
                        step.step_name
                    ))
                })?;
                graph.add_edge(from, to, ());
            }
        }
        let order = toposort(&graph, None).map_err(|_| {
            EngineError::ConstraintViolation(
                "predecessor graph contains a cycle; cycle time is undefined".to_string(),
            )
        })?;

        // Longest finishing time per node, filled in topological order.
        let mut finish: HashMap<NodeIndex, f64> = HashMap::new();
        let mut max_finish: f64 = 0.0;
        for idx in order {
            let own = graph[idx];
            let longest_pred = graph
                .neighbors_directed(idx, petgraph::Direction::Incoming)
                .map(|p| finish[&p])
                .fold(0.0_f64, f64::max);
            let total = own + longest_pred;
            finish.insert(idx, total);
            max_finish = max_finish.max(total);
        }
        Ok(max_finish)
    }

    /// Synthesize a plan from a labor profile: one task definition per step,
    /// `batch_size` instances per definition.
    pub fn create_production_plan(
        &mut self,
        ledger: &mut Ledger,
        design_version_id: &str,
        labor_profile: &[ProductionStep],
        batch_id: &str,
        batch_size: usize,
        expected_materials: Vec<ExpectedMaterial>,
    ) -> Result<ProductionPlan> {
        if labor_profile.is_empty() {
            return Err(EngineError::ConstraintViolation(
                "a production plan needs at least one step".to_string(),
            ));
        }
        if batch_size == 0 {
            return Err(EngineError::OutOfRange {
                field: "batch_size",
                value: 0.0,
                min: 1.0,
                max: f64::MAX,
            });
        }
        let cycle_time_hours = Self::compute_cycle_time(labor_profile)?;

        let plan_id = Uuid::new_v4().to_string();
        let mut def_id_by_name: HashMap<&str, String> = HashMap::new();
        for step in labor_profile {
            def_id_by_name.insert(step.step_name.as_str(), Uuid::new_v4().to_string());
        }

        let plan = ProductionPlan {
            id: plan_id.clone(),
            design_version_id: design_version_id.to_string(),
            batch_id: batch_id.to_string(),
            batch_size,
            expected_materials,
            cycle_time_hours,
            created_at: Utc::now(),
        };
        ledger.append(
            "cos.plan_created",
            None,
            related(&[("plan", &plan_id), ("version", design_version_id)]),
            json!({
                "batchId": batch_id,
                "batchSize": batch_size,
                "steps": labor_profile.len(),
                "cycleTimeHours": cycle_time_hours,
            }),
        )?;

        for step in labor_profile {
            let def = TaskDefinition {
                id: def_id_by_name[step.step_name.as_str()].clone(),
                plan_id: plan_id.clone(),
                step_name: step.step_name.clone(),
                skill_tier: step.skill_tier,
                estimated_hours_per_unit: step.estimated_hours_per_unit,
                tool_requirements: step.tool_requirements.clone(),
                workspace_requirements: step.workspace_requirements.clone(),
                material_requirements: step.material_requirements.clone(),
                predecessors: step
                    .predecessors
                    .iter()
                    .map(|p| def_id_by_name[p.as_str()].clone())
                    .collect(),
            };
            for unit_index in 0..batch_size {
                let instance = TaskInstance {
                    id: Uuid::new_v4().to_string(),
                    plan_id: plan_id.clone(),
                    task_definition_id: def.id.clone(),
                    unit_index,
                    status: TaskStatus::Pending,
                    assigned_coop_id: None,
                    participants: Vec::new(),
                    scheduled_start: None,
                    scheduled_end: None,
                    actual_start: None,
                    actual_end: None,
                    actual_hours: None,
                    block_reasons: Vec::new(),
                    updated_at: Utc::now(),
                };
                self.instances.insert(instance.id.clone(), instance);
            }
            self.definitions.insert(def.id.clone(), def);
        }
        self.plans.insert(plan_id, plan.clone());
        Ok(plan)
    }

    /// Assign an instance to a coop crew. Re-assigning with identical coop
    /// and participants is a no-op; assigning a blocked instance unblocks it.
    pub fn assign_task(
        &mut self,
        ledger: &mut Ledger,
        instance_id: &str,
        coop_id: &str,
        participants: Vec<String>,
        scheduled_start: Option<DateTime<Utc>>,
        scheduled_end: Option<DateTime<Utc>>,
    ) -> Result<TaskInstance> {
        let instance = self
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| EngineError::not_found("task instance", instance_id))?;
        let same_crew = instance.assigned_coop_id.as_deref() == Some(coop_id)
            && instance.participants == participants;
        match instance.status {
            TaskStatus::Assigned if same_crew => return Ok(instance.clone()),
            TaskStatus::Pending | TaskStatus::Assigned | TaskStatus::Blocked => {}
            status => {
                return Err(EngineError::invalid_transition(
                    "task instance",
                    instance_id,
                    format!("{status:?} -> assigned"),
                ));
            }
        }
        ledger.append(
            "cos.task_assigned",
            None,
            related(&[("instance", instance_id), ("plan", &instance.plan_id)]),
            json!({"coop": coop_id, "participants": participants}),
        )?;
        instance.status = TaskStatus::Assigned;
        instance.assigned_coop_id = Some(coop_id.to_string());
        instance.participants = participants;
        instance.scheduled_start = scheduled_start;
        instance.scheduled_end = scheduled_end;
        instance.updated_at = Utc::now();
        Ok(instance.clone())
    }

    pub fn start_task(&mut self, ledger: &mut Ledger, instance_id: &str) -> Result<TaskInstance> {
        let instance = self
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| EngineError::not_found("task instance", instance_id))?;
        if instance.status != TaskStatus::Assigned {
            return Err(EngineError::invalid_transition(
                "task instance",
                instance_id,
                format!("{:?} -> in_progress", instance.status),
            ));
        }
        ledger.append(
            "cos.task_started",
            None,
            related(&[("instance", instance_id), ("plan", &instance.plan_id)]),
            json!({}),
        )?;
        instance.status = TaskStatus::InProgress;
        instance.actual_start = Some(Utc::now());
        instance.updated_at = Utc::now();
        Ok(instance.clone())
    }

    pub fn block_task(
        &mut self,
        ledger: &mut Ledger,
        instance_id: &str,
        reason: impl Into<String>,
    ) -> Result<TaskInstance> {
        let reason = reason.into();
        let instance = self
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| EngineError::not_found("task instance", instance_id))?;
        if !matches!(instance.status, TaskStatus::Assigned | TaskStatus::InProgress) {
            return Err(EngineError::invalid_transition(
                "task instance",
                instance_id,
                format!("{:?} -> blocked", instance.status),
            ));
        }
        ledger.append(
            "cos.task_blocked",
            None,
            related(&[("instance", instance_id), ("plan", &instance.plan_id)]),
            json!({"reason": reason}),
        )?;
        warn!(instance_id, reason = %reason, "task blocked");
        instance.status = TaskStatus::Blocked;
        instance.block_reasons.push(reason);
        instance.updated_at = Utc::now();
        Ok(instance.clone())
    }

    pub fn complete_task(
        &mut self,
        ledger: &mut Ledger,
        instance_id: &str,
        actual_hours: f64,
    ) -> Result<TaskInstance> {
        if actual_hours < 0.0 {
            return Err(EngineError::OutOfRange {
                field: "actual_hours",
                value: actual_hours,
                min: 0.0,
                max: f64::MAX,
            });
        }
        let instance = self
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| EngineError::not_found("task instance", instance_id))?;
        if instance.status != TaskStatus::InProgress {
            return Err(EngineError::invalid_transition(
                "task instance",
                instance_id,
                format!("{:?} -> done", instance.status),
            ));
        }
        ledger.append(
            "cos.task_completed",
            None,
            related(&[("instance", instance_id), ("plan", &instance.plan_id)]),
            json!({"actualHours": actual_hours}),
        )?;
        instance.status = TaskStatus::Done;
        instance.actual_end = Some(Utc::now());
        instance.actual_hours = Some(actual_hours);
        instance.updated_at = Utc::now();
        Ok(instance.clone())
    }

    pub fn cancel_task(&mut self, ledger: &mut Ledger, instance_id: &str) -> Result<TaskInstance> {
        let instance = self
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| EngineError::not_found("task instance", instance_id))?;
        if matches!(instance.status, TaskStatus::Done | TaskStatus::Cancelled) {
            return Err(EngineError::invalid_transition(
                "task instance",
                instance_id,
                format!("{:?} -> cancelled", instance.status),
            ));
        }
        ledger.append(
            "cos.task_cancelled",
            None,
            related(&[("instance", instance_id), ("plan", &instance.plan_id)]),
            json!({}),
        )?;
        instance.status = TaskStatus::Cancelled;
        instance.updated_at = Utc::now();
        Ok(instance.clone())
    }

    /// Append to the plan's material ledger.
    #[allow(clippy::too_many_arguments)]
    pub fn record_material_flow(
        &mut self,
        ledger: &mut Ledger,
        plan_id: &str,
        material_id: &str,
        quantity_kg: f64,
        direction: MaterialDirection,
        ecological_impact_index: f64,
        task_instance_id: Option<String>,
    ) -> Result<MaterialLedgerEntry> {
        if !self.plans.contains_key(plan_id) {
            return Err(EngineError::not_found("production plan", plan_id));
        }
        if quantity_kg <= 0.0 {
            return Err(EngineError::OutOfRange {
                field: "quantity_kg",
                value: quantity_kg,
                min: f64::MIN_POSITIVE,
                max: f64::MAX,
            });
        }
        let entry = MaterialLedgerEntry {
            id: Uuid::new_v4().to_string(),
            material_id: material_id.to_string(),
            quantity_kg,
            direction,
            ecological_impact_index,
            timestamp: Utc::now(),
            plan_id: plan_id.to_string(),
            task_instance_id,
        };
        ledger.append(
            "cos.material_flow_recorded",
            None,
            related(&[("plan", plan_id), ("material", material_id), ("flow", &entry.id)]),
            json!({"quantityKg": quantity_kg, "direction": direction}),
        )?;
        self.material_ledger.push(entry.clone());
        Ok(entry)
    }

    /// Net on-hand quantity per material: recycled + procured - used - lost.
    pub fn material_inventory(&self, plan_id: &str) -> Result<HashMap<String, f64>> {
        if !self.plans.contains_key(plan_id) {
            return Err(EngineError::not_found("production plan", plan_id));
        }
        let mut inventory: HashMap<String, f64> = HashMap::new();
        for entry in self.material_ledger.iter().filter(|e| e.plan_id == plan_id) {
            let signed = match entry.direction {
                MaterialDirection::InternalRecycle | MaterialDirection::ExternalProcurement => {
                    entry.quantity_kg
                }
                MaterialDirection::ProductionUse | MaterialDirection::LossScrap => {
                    -entry.quantity_kg
                }
            };
            *inventory.entry(entry.material_id.clone()).or_insert(0.0) += signed;
        }
        Ok(inventory)
    }

    /// Score each task definition for schedule deviation and blockage and
    /// emit a constraint for every score above the threshold.
    pub fn detect_bottlenecks(
        &mut self,
        ledger: &mut Ledger,
        plan_id: &str,
        guard: &OpGuard,
    ) -> Result<Vec<Constraint>> {
        let plan = self
            .plans
            .get(plan_id)
            .ok_or_else(|| EngineError::not_found("production plan", plan_id))?
            .clone();

        let mut found = Vec::new();
        let def_ids: Vec<String> = self
            .definitions
            .values()
            .filter(|d| d.plan_id == plan_id)
            .map(|d| d.id.clone())
            .collect();
        for def_id in def_ids {
            guard.checkpoint()?;
            let def = &self.definitions[&def_id];
            let instances: Vec<&TaskInstance> = self
                .instances
                .values()
                .filter(|i| i.task_definition_id == def_id)
                .collect();
            let n = plan.batch_size as f64;
            let actual_total: f64 = instances.iter().filter_map(|i| i.actual_hours).sum();
            let estimated_total = n * def.estimated_hours_per_unit;
            let deviation = (actual_total - estimated_total) / estimated_total.max(1.0);
            let blocked = instances
                .iter()
                .filter(|i| i.status == TaskStatus::Blocked)
                .count() as f64;
            let blocked_ratio = blocked / n;
            let score = self.alpha * deviation.max(0.0) + self.beta * blocked_ratio;
            if score > self.bottleneck_threshold {
                found.push(Constraint {
                    plan_id: plan_id.to_string(),
                    node_id: self.node_id.clone(),
                    task_definition_id: def_id.clone(),
                    constraint_type: "bottleneck".to_string(),
                    severity: score.min(1.0),
                    description: format!(
                        "step '{}' is running {:.0}% over estimate with {:.0}% of units blocked",
                        def.step_name,
                        deviation.max(0.0) * 100.0,
                        blocked_ratio * 100.0
                    ),
                    suggested_actions: vec![
                        "rebalance crew assignments toward the constrained step".to_string(),
                        "review tool and workspace availability".to_string(),
                    ],
                });
            }
        }

        guard.checkpoint()?;
        if !found.is_empty() {
            ledger.append(
                "cos.bottlenecks_detected",
                None,
                related(&[("plan", plan_id)]),
                json!({
                    "count": found.len(),
                    "maxSeverity": found.iter().map(|c| c.severity).fold(0.0, f64::max),
                }),
            )?;
        }
        self.constraints.insert(plan_id.to_string(), found.clone());
        Ok(found)
    }

    /// Emit the plan's workload signal: remaining labor demand per skill
    /// tier plus material scarcity pressure.
    pub fn workload_signal(&self, ledger: &mut Ledger, plan_id: &str) -> Result<WorkloadSignal> {
        let plan = self
            .plans
            .get(plan_id)
            .ok_or_else(|| EngineError::not_found("production plan", plan_id))?;

        let mut labor_by_skill: HashMap<String, f64> = HashMap::new();
        for def in self.definitions.values().filter(|d| d.plan_id == plan_id) {
            let remaining = self
                .instances
                .values()
                .filter(|i| {
                    i.task_definition_id == def.id
                        && !matches!(i.status, TaskStatus::Done | TaskStatus::Cancelled)
                })
                .count() as f64;
            *labor_by_skill
                .entry(def.skill_tier.as_str().to_string())
                .or_insert(0.0) += remaining * def.estimated_hours_per_unit;
        }

        let material_scarcity_index = if plan.expected_materials.is_empty() {
            0.0
        } else {
            let shortfall_sum: f64 = plan
                .expected_materials
                .iter()
                .map(|m| {
                    if m.expected_kg <= 0.0 {
                        0.0
                    } else {
                        (m.expected_kg - m.available_kg).max(0.0) / m.expected_kg
                    }
                })
                .sum();
            (shortfall_sum / plan.expected_materials.len() as f64).min(1.0)
        };

        let throughput_constraints = self
            .constraints_for_plan(plan_id)
            .iter()
            .map(|c| c.description.clone())
            .collect();

        let signal = WorkloadSignal {
            plan_id: plan_id.to_string(),
            labor_by_skill,
            material_scarcity_index,
            throughput_constraints,
            timestamp: Utc::now(),
        };
        ledger.append(
            "cos.workload_signal_emitted",
            None,
            related(&[("plan", plan_id)]),
            json!({"materialScarcityIndex": material_scarcity_index}),
        )?;
        Ok(signal)
    }

    /// Record a quality inspection outcome.
    #[allow(clippy::too_many_arguments)]
    pub fn record_qa_result(
        &mut self,
        ledger: &mut Ledger,
        plan_id: &str,
        item: &str,
        passed: bool,
        inspectors: Vec<String>,
        defects: Vec<String>,
        severity_index: f64,
    ) -> Result<QaResult> {
        if !self.plans.contains_key(plan_id) {
            return Err(EngineError::not_found("production plan", plan_id));
        }
        if !(0.0..=1.0).contains(&severity_index) {
            return Err(EngineError::OutOfRange {
                field: "severity_index",
                value: severity_index,
                min: 0.0,
                max: 1.0,
            });
        }
        let result = QaResult {
            id: Uuid::new_v4().to_string(),
            plan_id: plan_id.to_string(),
            item: item.to_string(),
            passed,
            inspectors,
            defects,
            severity_index,
            recorded_at: Utc::now(),
        };
        ledger.append(
            "cos.qa_recorded",
            None,
            related(&[("plan", plan_id), ("qa", &result.id)]),
            json!({"item": item, "passed": passed, "severityIndex": severity_index}),
        )?;
        self.qa_results.push(result.clone());
        Ok(result)
    }
}
