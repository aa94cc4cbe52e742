//! Two-node federation exchange through the envelope layer.

use coopnet::config::Config;
use coopnet::credit::ConditionPair;
use coopnet::federation::{MessageType, ToScope};
use coopnet::node::CoopNode;
use serde_json::json;

fn node(id: &str) -> CoopNode {
    let mut config = Config::default();
    config.node.node_id = id.to_string();
    CoopNode::new(config)
}

#[test]
fn test_two_nodes_exchange_equivalence_update() {
    let mut alpha = node("node-alpha");
    let mut beta = node("node-beta");

    // Announcements bootstrap each other's keys.
    let alpha_hello = alpha.announce().unwrap();
    let beta_hello = beta.announce().unwrap();
    assert!(beta
        .federation
        .receive_envelope(&mut beta.ledger, alpha_hello)
        .unwrap());
    assert!(alpha
        .federation
        .receive_envelope(&mut alpha.ledger, beta_hello)
        .unwrap());

    // Alpha derives a band against beta and shares it.
    let band = alpha
        .credits
        .equivalence_band(
            &mut alpha.ledger,
            "node-alpha",
            "node-beta",
            ConditionPair { home: 1.0, local: 1.04 },
            ConditionPair { home: 1.0, local: 0.97 },
        )
        .unwrap();
    let update = alpha
        .federation
        .send_message(
            &mut alpha.ledger,
            &alpha.identity,
            MessageType::EquivalenceUpdate,
            ToScope::Node {
                id: "node-beta".to_string(),
            },
            json!({
                "laborContextFactor": band.labor_context_factor,
                "ecoContextFactor": band.eco_context_factor,
            }),
            "labor/eco equivalence refresh",
        )
        .unwrap();
    assert_eq!(update.message_type.kind_code(), 30650);

    assert!(beta
        .federation
        .receive_envelope(&mut beta.ledger, update.clone())
        .unwrap());
    // Replays are dropped.
    assert!(!beta
        .federation
        .receive_envelope(&mut beta.ledger, update)
        .unwrap());

    // Every envelope was ledgered on both sides and both chains verify.
    assert!(alpha.ledger.verify(None).is_ok());
    assert!(beta.ledger.verify(None).is_ok());
    assert!(!alpha
        .ledger
        .trail(&coopnet::ledger::TrailFilter::prefix("fed."))
        .is_empty());
    assert!(!beta
        .ledger
        .trail(&coopnet::ledger::TrailFilter::prefix("fed."))
        .is_empty());
}

#[test]
fn test_peer_capabilities_are_queryable_after_announcement() {
    let mut alpha = node("node-alpha");
    let mut beta = node("node-beta");
    let hello = beta.announce().unwrap();
    alpha
        .federation
        .receive_envelope(&mut alpha.ledger, hello)
        .unwrap();
    let profile = alpha.federation.query_node("node-beta").unwrap();
    assert!(profile.capabilities.contains(&"itc".to_string()));
    assert!(alpha.federation.query_node("node-gamma").is_err());
}
