//! End-to-end demo: one cooperative cycle across all five subsystems
//!
//! A community decides to build solar dryers, certifies the design, plans a
//! batch, records and credits the labor, prices access, redeems it, and
//! lets the feedback engine look at the result. Run with `coopnet demo`.

use crate::config::Config;
use crate::credit::{LaborContext, RedemptionType, SkillTier};
use crate::decision::{ScenarioParameters, SubmissionType, SupportLevel};
use crate::design::VersionParameters;
use crate::guard::OpGuard;
use crate::node::CoopNode;
use crate::production::{ExpectedMaterial, ProductionStep};
use anyhow::Result;
use chrono::{Duration, Utc};
use std::collections::HashMap;

pub fn run_demo() -> Result<()> {
    let mut node = CoopNode::new(Config::default());
    node.identity.register_member("ada", "Ada", 1.0, None);
    node.identity.register_member("ben", "Ben", 1.0, None);
    node.identity.register_member("chloe", "Chloe", 1.5, None);

    // Decide to build solar dryers.
    let issue = node.decisions.create_issue(
        &mut node.ledger,
        "Preserve the autumn harvest",
        "Too much produce spoils before winter; we need drying capacity.",
    )?;
    node.decisions.add_submission(
        &mut node.ledger,
        &issue.id,
        "ada",
        SubmissionType::Proposal,
        "Build six solar dryers from the open design library.",
    )?;
    node.decisions
        .structure_issue(&mut node.ledger, &issue.id, serde_json::json!({"domain": "food"}))?;
    node.decisions
        .prepare_context(&mut node.ledger, &issue.id, serde_json::json!({"households": 40}))?;
    node.decisions.open_deliberation(&mut node.ledger, &issue.id)?;
    let scenario = node.decisions.add_scenario(
        &mut node.ledger,
        &issue.id,
        "six dryers this season",
        ScenarioParameters {
            oad_design_required: true,
            cos_task_required: true,
            materials: vec!["timber".into(), "glass".into()],
            ..Default::default()
        },
    )?;
    for member in ["ada", "ben", "chloe"] {
        let weight = node.identity.participant_weight(member);
        node.decisions.cast_vote(
            &mut node.ledger,
            &scenario.id,
            member,
            SupportLevel::StrongSupport,
            weight,
        )?;
    }
    let consensus = node.decisions.evaluate_scenario(&scenario.id)?;
    let decision =
        node.decisions
            .make_decision(&mut node.ledger, &issue.id, &scenario.id, &consensus)?;
    let packet = node.decisions.dispatch(&mut node.ledger, &decision.id)?;
    println!(
        "decision {} dispatched to {} subsystem(s)",
        decision.id,
        packet.tasks.len()
    );

    // Register and certify the design.
    let spec = node.designs.create_spec(
        &mut node.ledger,
        "solar food dryer",
        vec!["dry 5kg of produce per day".into(), "no grid power".into()],
    )?;
    let version = node.designs.create_version(
        &mut node.ledger,
        &spec.id,
        "v1",
        vec!["ada".into()],
        VersionParameters {
            labor_by_skill_tier: HashMap::from([
                ("low".to_string(), 10.0),
                ("medium".to_string(), 5.0),
                ("high".to_string(), 5.0),
            ]),
            repairability: 0.6,
            expected_lifespan_hours: 10_000.0,
            material_impact: 0.4,
            energy_impact: 0.2,
            waste_impact: 0.2,
            expected_longevity_years: 8.0,
            extra: HashMap::new(),
        },
    )?;
    let assessment = node
        .designs
        .compute_eco_assessment(&mut node.ledger, &version.id)?;
    println!("eco score {:.3}: {}", assessment.eco_score, assessment.rationale);
    node.designs.request_certification(
        &mut node.ledger,
        &version.id,
        vec!["ben".into(), "chloe".into()],
    )?;
    node.designs
        .record_certifier_signature(&mut node.ledger, &version.id, "ben")?;
    node.designs
        .record_certifier_signature(&mut node.ledger, &version.id, "chloe")?;

    // Plan the batch.
    let plan = node.production.create_production_plan(
        &mut node.ledger,
        &version.id,
        &[
            ProductionStep {
                step_name: "frame".to_string(),
                skill_tier: SkillTier::Medium,
                estimated_hours_per_unit: 3.0,
                tool_requirements: vec!["saw".into()],
                workspace_requirements: vec![],
                material_requirements: vec!["timber".into()],
                predecessors: vec![],
            },
            ProductionStep {
                step_name: "glazing".to_string(),
                skill_tier: SkillTier::High,
                estimated_hours_per_unit: 2.0,
                tool_requirements: vec![],
                workspace_requirements: vec!["bench".into()],
                material_requirements: vec!["glass".into()],
                predecessors: vec!["frame".to_string()],
            },
        ],
        "dryers-autumn",
        6,
        vec![ExpectedMaterial {
            material_id: "timber".to_string(),
            expected_kg: 120.0,
            available_kg: 90.0,
        }],
    )?;
    println!(
        "plan {} cycle time {:.1}h per unit",
        plan.batch_id, plan.cycle_time_hours
    );

    // Record a day of framing labor and credit it.
    let start = Utc::now() - Duration::hours(4);
    let event = node.credits.record_labor(
        &mut node.ledger,
        "ada",
        "coop-main",
        "frame-unit-1",
        "framing",
        start,
        Utc::now(),
        SkillTier::Medium,
        LaborContext::default(),
    )?;
    node.credits.verify_labor(&mut node.ledger, &event.id, "ben")?;
    let record = node.credits.compute_weighted(&mut node.ledger, &event.id)?;
    let account = node
        .credits
        .credit_account(&mut node.ledger, "ada", &record.id)?;
    println!("ada's balance: {:.4} weighted hours", account.balance);

    // Price and redeem access to a dryer.
    let valuation = node.price_item(
        "dryer-1",
        &version.id,
        Some(&plan.id),
        &OpGuard::unbounded("valuation"),
    )?;
    println!("dryer access costs {:.4} ITC", valuation.final_itc_cost);
    if account.balance >= valuation.final_itc_cost {
        node.credits.redeem_access(
            &mut node.ledger,
            "ada",
            "dryer-1",
            RedemptionType::Share,
            None,
        )?;
    }

    // Let the feedback engine look at the cycle.
    let packet = node.create_signal_packet(Some(&plan.id))?;
    let findings =
        node.feedback
            .analyze_packet(&mut node.ledger, &packet.id, &OpGuard::unbounded("analysis"))?;
    let indices = node.feedback.compute_indices(&mut node.ledger, &packet.id)?;
    println!(
        "{} finding(s); autonomy {:.2}, fragility {:.2}",
        findings.len(),
        indices.autonomy,
        indices.fragility
    );

    node.announce()?;
    node.ledger.verify(None)?;
    println!(
        "ledger verified: {} entries, tail {}",
        node.ledger.len(),
        node.ledger.tail_hash()
    );
    Ok(())
}
