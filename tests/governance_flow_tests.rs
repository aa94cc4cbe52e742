//! Issue lifecycle through decision and dispatch, exercised via the node.

use coopnet::config::Config;
use coopnet::decision::{
    Directive, IssueStatus, ScenarioParameters, SubmissionType, SupportLevel, TargetSystem,
};
use coopnet::node::CoopNode;
use serde_json::json;

fn node() -> CoopNode {
    CoopNode::new(Config::default())
}

fn deliberating_issue(node: &mut CoopNode) -> String {
    let issue = node
        .decisions
        .create_issue(&mut node.ledger, "tool library", "shared workshop tooling")
        .unwrap();
    node.decisions
        .add_submission(
            &mut node.ledger,
            &issue.id,
            "ada",
            SubmissionType::Proposal,
            "start with woodworking tools",
        )
        .unwrap();
    node.decisions
        .structure_issue(&mut node.ledger, &issue.id, json!({"domain": "tools"}))
        .unwrap();
    node.decisions
        .prepare_context(&mut node.ledger, &issue.id, json!({"members": 30}))
        .unwrap();
    node.decisions
        .open_deliberation(&mut node.ledger, &issue.id)
        .unwrap();
    issue.id
}

#[test]
fn test_full_decision_flow_dispatches_declared_systems_only() {
    let mut node = node();
    let issue_id = deliberating_issue(&mut node);
    let scenario = node
        .decisions
        .add_scenario(
            &mut node.ledger,
            &issue_id,
            "buy and build",
            ScenarioParameters {
                cos_task_required: true,
                itc_policy_change: Some(json!({"taskTypeModifier": {"toolcare": 1.05}})),
                materials: vec!["steel".into()],
                monitors: vec!["tool-usage".into()],
                ..Default::default()
            },
        )
        .unwrap();
    for participant in ["ada", "ben", "chloe", "dev"] {
        node.decisions
            .cast_vote(
                &mut node.ledger,
                &scenario.id,
                participant,
                SupportLevel::StrongSupport,
                1.0,
            )
            .unwrap();
    }
    let result = node.decisions.evaluate_scenario(&scenario.id).unwrap();
    assert_eq!(result.directive, Directive::Approve);

    let decision = node
        .decisions
        .make_decision(&mut node.ledger, &issue_id, &scenario.id, &result)
        .unwrap();
    let packet = node.decisions.dispatch(&mut node.ledger, &decision.id).unwrap();

    let systems: Vec<TargetSystem> = packet.tasks.iter().map(|t| t.system).collect();
    assert!(systems.contains(&TargetSystem::Cos));
    assert!(systems.contains(&TargetSystem::Itc));
    assert!(systems.contains(&TargetSystem::Frs));
    assert!(!systems.contains(&TargetSystem::Oad), "OAD was not requested");
    assert_eq!(
        node.decisions.issue(&issue_id).unwrap().status,
        IssueStatus::Dispatched
    );
    assert!(node.ledger.verify(None).is_ok());
}

#[test]
fn test_literal_consensus_revise_case() {
    // Weighted supports {+1, +0.5, +0.5, 0} give C = 0.5; one objection
    // with severity 0.7 and scope 0.6 gives O = 0.105. Directive: revise.
    let mut node = node();
    let issue_id = deliberating_issue(&mut node);
    let scenario = node
        .decisions
        .add_scenario(&mut node.ledger, &issue_id, "s", ScenarioParameters::default())
        .unwrap();
    let supports = [
        ("a", SupportLevel::StrongSupport),
        ("b", SupportLevel::Support),
        ("c", SupportLevel::Support),
        ("d", SupportLevel::Neutral),
    ];
    for (participant, support) in supports {
        node.decisions
            .cast_vote(&mut node.ledger, &scenario.id, participant, support, 1.0)
            .unwrap();
    }
    node.decisions
        .register_objection(
            &mut node.ledger,
            &issue_id,
            &scenario.id,
            "e",
            0.7,
            0.6,
            "scope concern",
        )
        .unwrap();
    let result = node.decisions.evaluate_scenario(&scenario.id).unwrap();
    assert!((result.consensus_score - 0.5).abs() < 1e-9);
    assert!((result.objection_index - 0.105).abs() < 1e-9);
    assert_eq!(result.directive, Directive::Revise);
}

#[test]
fn test_recast_vote_keeps_vote_count_at_one() {
    let mut node = node();
    let issue_id = deliberating_issue(&mut node);
    let scenario = node
        .decisions
        .add_scenario(&mut node.ledger, &issue_id, "s", ScenarioParameters::default())
        .unwrap();
    node.decisions
        .cast_vote(&mut node.ledger, &scenario.id, "ada", SupportLevel::Concern, 1.0)
        .unwrap();
    node.decisions
        .cast_vote(&mut node.ledger, &scenario.id, "ada", SupportLevel::Support, 1.0)
        .unwrap();
    assert_eq!(node.decisions.votes_for(&scenario.id).len(), 1);
}

#[test]
fn test_review_reopen_amend_cycle() {
    let mut node = node();
    let issue_id = deliberating_issue(&mut node);
    let scenario = node
        .decisions
        .add_scenario(&mut node.ledger, &issue_id, "first", ScenarioParameters::default())
        .unwrap();
    for p in ["a", "b"] {
        node.decisions
            .cast_vote(&mut node.ledger, &scenario.id, p, SupportLevel::StrongSupport, 1.0)
            .unwrap();
    }
    let result = node.decisions.evaluate_scenario(&scenario.id).unwrap();
    let decision = node
        .decisions
        .make_decision(&mut node.ledger, &issue_id, &scenario.id, &result)
        .unwrap();

    node.decisions
        .request_review(&mut node.ledger, &decision.id, "reviewer", "costs changed")
        .unwrap();
    node.decisions.reopen_issue(&mut node.ledger, &issue_id).unwrap();
    node.decisions
        .open_deliberation(&mut node.ledger, &issue_id)
        .unwrap();

    let scenario2 = node
        .decisions
        .add_scenario(&mut node.ledger, &issue_id, "second", ScenarioParameters::default())
        .unwrap();
    for p in ["a", "b"] {
        node.decisions
            .cast_vote(&mut node.ledger, &scenario2.id, p, SupportLevel::StrongSupport, 1.0)
            .unwrap();
    }
    let result2 = node.decisions.evaluate_scenario(&scenario2.id).unwrap();
    let amended = node
        .decisions
        .amend_decision(&mut node.ledger, &decision.id, &scenario2.id, &result2)
        .unwrap();

    let effective = node.decisions.effective_decision(&decision.id).unwrap();
    assert_eq!(effective.id, amended.id);
    assert_eq!(
        node.decisions.issue(&issue_id).unwrap().status,
        IssueStatus::Amended
    );
}
