//! Account lifecycle through the engine node: record, verify, weight,
//! credit, decay, price, redeem.

use chrono::{Duration, TimeZone, Utc};
use coopnet::config::Config;
use coopnet::credit::{LaborContext, RedemptionType, SkillTier};
use coopnet::design::VersionParameters;
use coopnet::guard::OpGuard;
use coopnet::ledger::TrailFilter;
use coopnet::node::CoopNode;
use float_cmp::approx_eq;
use std::collections::HashMap;

fn node() -> CoopNode {
    CoopNode::new(Config::default())
}

fn earn(node: &mut CoopNode, member: &str, hours: i64, tier: SkillTier) -> f64 {
    let end = Utc::now();
    let start = end - Duration::hours(hours);
    let event = node
        .credits
        .record_labor(
            &mut node.ledger,
            member,
            "coop-main",
            "task",
            "labor",
            start,
            end,
            tier,
            LaborContext::default(),
        )
        .unwrap();
    node.credits
        .verify_labor(&mut node.ledger, &event.id, "verifier")
        .unwrap();
    let record = node
        .credits
        .compute_weighted(&mut node.ledger, &event.id)
        .unwrap();
    node.credits
        .credit_account(&mut node.ledger, member, &record.id)
        .unwrap()
        .balance
}

#[test]
fn test_four_hours_high_tier_credits_six_itc() {
    let mut node = node();
    let balance = earn(&mut node, "ada", 4, SkillTier::High);
    assert!(approx_eq!(f64, balance, 6.0, epsilon = 1e-9));
}

#[test]
fn test_decay_literal_values() {
    // Default rule {grace 30d, half-life 180d, protected 10, annual 0.25}:
    // balance 100 evaluated 40 days after the last application decays by
    // the pro-rated annual cap, about 0.685.
    let mut node = node();
    let as_of = Utc.with_ymd_and_hms(2025, 2, 10, 0, 0, 0).unwrap();
    {
        let account = node.credits.open_account("nia");
        account.balance = 100.0;
        account.total_earned = 100.0;
        account.last_decay_applied_at = as_of - Duration::days(40);
    }
    let decay = node
        .credits
        .apply_decay_at(&mut node.ledger, "nia", as_of)
        .unwrap();
    assert!(approx_eq!(f64, decay, 0.685, epsilon = 1e-3));
    let account = node.credits.account("nia").unwrap();
    assert!(approx_eq!(f64, account.balance, 100.0 - decay, epsilon = 1e-6));
    assert_eq!(account.last_decay_applied_at, as_of);

    // A second application at the same instant is a no-op.
    let again = node
        .credits
        .apply_decay_at(&mut node.ledger, "nia", as_of)
        .unwrap();
    assert_eq!(again, 0.0);
}

fn priced_item(node: &mut CoopNode) -> f64 {
    let spec = node
        .designs
        .create_spec(&mut node.ledger, "dryer", vec![])
        .unwrap();
    let version = node
        .designs
        .create_version(
            &mut node.ledger,
            &spec.id,
            "v1",
            vec![],
            VersionParameters {
                labor_by_skill_tier: HashMap::from([
                    ("low".to_string(), 10.0),
                    ("medium".to_string(), 5.0),
                    ("high".to_string(), 5.0),
                ]),
                repairability: 0.6,
                expected_lifespan_hours: 10_000.0,
                material_impact: 0.4,
                energy_impact: 0.4,
                waste_impact: 0.4,
                expected_longevity_years: 10.0,
                extra: HashMap::new(),
            },
        )
        .unwrap();
    node.designs
        .compute_eco_assessment(&mut node.ledger, &version.id)
        .unwrap();
    node.price_item("dryer-1", &version.id, None, &OpGuard::unbounded("valuation"))
        .unwrap()
        .final_itc_cost
}

#[test]
fn test_redemption_is_atomic_with_ledger() {
    let mut node = node();
    let cost = priced_item(&mut node);

    // Fund exactly the valuation cost; redemption leaves zero.
    {
        let account = node.credits.open_account("ada");
        account.balance = cost;
        account.total_earned = cost;
    }
    node.credits
        .redeem_access(&mut node.ledger, "ada", "dryer-1", RedemptionType::OneTime, None)
        .unwrap();
    let account = node.credits.account("ada").unwrap();
    assert!(approx_eq!(f64, account.balance, 0.0, epsilon = 1e-9));
    assert_eq!(
        node.ledger
            .trail(&TrailFilter::prefix("itc.access_redeemed"))
            .len(),
        1
    );

    // One cent short fails with no ledger entry and no mutation.
    {
        let account = node.credits.open_account("ben");
        account.balance = cost - 0.01;
        account.total_earned = cost - 0.01;
    }
    let err = node
        .credits
        .redeem_access(&mut node.ledger, "ben", "dryer-1", RedemptionType::OneTime, None)
        .unwrap_err();
    assert_eq!(err.code(), "insufficient_balance");
    assert_eq!(
        node.ledger
            .trail(&TrailFilter::prefix("itc.access_redeemed"))
            .len(),
        1
    );
    let ben = node.credits.account("ben").unwrap();
    assert!(approx_eq!(f64, ben.balance, cost - 0.01, epsilon = 1e-9));
}

#[test]
fn test_account_invariant_survives_full_lifecycle() {
    let mut node = node();
    earn(&mut node, "ada", 4, SkillTier::High);
    earn(&mut node, "ada", 3, SkillTier::Medium);
    let account = node.credits.account("ada").unwrap();
    assert!(account.balance >= 0.0);
    assert!(approx_eq!(
        f64,
        account.total_earned - account.total_redeemed - account.total_decayed,
        account.balance,
        epsilon = 1e-6
    ));
}

#[test]
fn test_ledger_stays_valid_through_credit_lifecycle() {
    let mut node = node();
    earn(&mut node, "ada", 4, SkillTier::High);
    let cost = priced_item(&mut node);
    assert!(cost > 0.0);
    assert!(node.ledger.verify(None).is_ok());
}
