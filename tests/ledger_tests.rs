use coopnet::ledger::{related, Ledger, TrailFilter};
use serde_json::json;

fn seeded_ledger() -> Ledger {
    let mut ledger = Ledger::new("node-test");
    ledger
        .append(
            "itc.labor_event_recorded",
            Some("ada".into()),
            related(&[("event", "ev-1")]),
            json!({"hours": "4.0000"}),
        )
        .unwrap();
    ledger
        .append(
            "cos.plan_created",
            None,
            related(&[("plan", "plan-1")]),
            json!({"batchSize": 6}),
        )
        .unwrap();
    ledger
}

#[test]
fn test_ledger_append_and_verify() {
    let ledger = seeded_ledger();
    assert!(ledger.verify(None).is_ok(), "chain should verify after appends");
}

#[test]
fn test_ledger_detects_tampered_details() {
    let ledger = seeded_ledger();
    let mut dump = ledger.dump().unwrap();
    dump = dump.replace("4.0000", "400.0000");
    assert!(
        Ledger::load("node-test", &dump).is_err(),
        "tampered details must break verification"
    );
}

#[test]
fn test_hash_differs_for_different_details() {
    let mut a = Ledger::new("node-test");
    a.append("cds.issue_created", None, related(&[]), json!({"title": "one"}))
        .unwrap();
    let mut b = Ledger::new("node-test");
    b.append("cds.issue_created", None, related(&[]), json!({"title": "two"}))
        .unwrap();
    assert_ne!(a.entries()[0].entry_hash, b.entries()[0].entry_hash);
}

#[test]
fn test_genesis_hash_is_stable() {
    assert_eq!(Ledger::genesis_hash(), Ledger::genesis_hash());
    let ledger = seeded_ledger();
    assert_eq!(ledger.entries()[0].prev_hash, Ledger::genesis_hash());
}

#[test]
fn test_trail_filters_by_subsystem_prefix() {
    let ledger = seeded_ledger();
    assert_eq!(ledger.trail(&TrailFilter::prefix("itc.")).len(), 1);
    assert_eq!(ledger.trail(&TrailFilter::prefix("cos.")).len(), 1);
    assert_eq!(ledger.trail(&TrailFilter::prefix("frs.")).len(), 0);
}

#[test]
fn test_dump_round_trips_bit_for_bit_hashes() {
    let ledger = seeded_ledger();
    let restored = Ledger::load("node-test", &ledger.dump().unwrap()).unwrap();
    for (original, loaded) in ledger.entries().iter().zip(restored.entries()) {
        assert_eq!(original.entry_hash, loaded.entry_hash);
        assert_eq!(loaded.entry_hash, loaded.calculate_hash());
    }
}
