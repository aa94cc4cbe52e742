//! Production stress feeding the feedback loop: plan, block, detect,
//! snapshot, analyze, recommend.

use coopnet::config::Config;
use coopnet::credit::SkillTier;
use coopnet::feedback::{FindingType, RecommendationTarget};
use coopnet::guard::OpGuard;
use coopnet::node::CoopNode;
use coopnet::production::{ExpectedMaterial, ProductionStep};

fn node() -> CoopNode {
    CoopNode::new(Config::default())
}

fn stressed_plan(node: &mut CoopNode) -> String {
    let profile = vec![ProductionStep {
        step_name: "assembly".to_string(),
        skill_tier: SkillTier::Expert,
        estimated_hours_per_unit: 2.0,
        tool_requirements: vec![],
        workspace_requirements: vec![],
        material_requirements: vec!["steel".into()],
        predecessors: vec![],
    }];
    let plan = node
        .production
        .create_production_plan(
            &mut node.ledger,
            "version-x",
            &profile,
            "batch-stress",
            10,
            vec![ExpectedMaterial {
                material_id: "steel".to_string(),
                expected_kg: 100.0,
                available_kg: 20.0,
            }],
        )
        .unwrap();

    let ids: Vec<String> = node
        .production
        .instances_for_plan(&plan.id)
        .iter()
        .map(|i| i.id.clone())
        .collect();
    // Run most units over estimate and block the rest.
    for id in ids.iter().take(6) {
        node.production
            .assign_task(&mut node.ledger, id, "coop-1", vec!["m".into()], None, None)
            .unwrap();
        node.production.start_task(&mut node.ledger, id).unwrap();
        node.production
            .complete_task(&mut node.ledger, id, 4.0)
            .unwrap();
    }
    for id in ids.iter().skip(6) {
        node.production
            .assign_task(&mut node.ledger, id, "coop-1", vec!["m".into()], None, None)
            .unwrap();
        node.production
            .block_task(&mut node.ledger, id, "steel shortage")
            .unwrap();
    }
    plan.id
}

#[test]
fn test_bottleneck_feeds_workload_signal() {
    let mut node = node();
    let plan_id = stressed_plan(&mut node);
    let constraints = node
        .production
        .detect_bottlenecks(&mut node.ledger, &plan_id, &OpGuard::unbounded("bottlenecks"))
        .unwrap();
    assert!(!constraints.is_empty());
    let signal = node
        .production
        .workload_signal(&mut node.ledger, &plan_id)
        .unwrap();
    assert_eq!(signal.throughput_constraints.len(), constraints.len());
    assert!((signal.material_scarcity_index - 0.8).abs() < 1e-9);
}

#[test]
fn test_packet_analysis_surfaces_fragility_and_stress() {
    let mut node = node();
    let plan_id = stressed_plan(&mut node);
    node.production
        .detect_bottlenecks(&mut node.ledger, &plan_id, &OpGuard::unbounded("bottlenecks"))
        .unwrap();
    let packet = node.create_signal_packet(Some(&plan_id)).unwrap();
    assert!(packet.metrics.blocked_task_ratio > 0.3);

    let findings = node
        .feedback
        .analyze_packet(&mut node.ledger, &packet.id, &OpGuard::unbounded("analysis"))
        .unwrap();
    assert!(findings
        .iter()
        .any(|f| f.finding_type == FindingType::CoordinationFragility));

    let ids: Vec<String> = findings.iter().map(|f| f.id.clone()).collect();
    let recs = node
        .feedback
        .generate_recommendations(&mut node.ledger, &ids)
        .unwrap();
    assert_eq!(recs.len(), findings.len());
    assert!(recs
        .iter()
        .any(|r| r.target == RecommendationTarget::Cos && r.action_type == "unblock_tasks"));
}

#[test]
fn test_indices_reflect_stress() {
    let mut node = node();
    let plan_id = stressed_plan(&mut node);
    let packet = node.create_signal_packet(Some(&plan_id)).unwrap();
    node.feedback
        .analyze_packet(&mut node.ledger, &packet.id, &OpGuard::unbounded("analysis"))
        .unwrap();
    let report = node.feedback.compute_indices(&mut node.ledger, &packet.id).unwrap();
    assert!((0.0..=1.0).contains(&report.autonomy));
    assert!((0.0..=1.0).contains(&report.fragility));
    assert!(report.fragility > 0.1, "stressed plan should register fragility");
}

#[test]
fn test_stress_amplifier_raises_access_cost() {
    let mut node = node();
    let plan_id = stressed_plan(&mut node);
    let packet = node.create_signal_packet(Some(&plan_id)).unwrap();
    node.feedback
        .analyze_packet(&mut node.ledger, &packet.id, &OpGuard::unbounded("analysis"))
        .unwrap();
    assert!(node.feedback.scarcity_amplifier() > 1.0);
}

#[test]
fn test_ledger_valid_after_production_cycle() {
    let mut node = node();
    let plan_id = stressed_plan(&mut node);
    node.production
        .detect_bottlenecks(&mut node.ledger, &plan_id, &OpGuard::unbounded("bottlenecks"))
        .unwrap();
    node.create_signal_packet(Some(&plan_id)).unwrap();
    assert!(node.ledger.verify(None).is_ok());
}
