//! Property-based checks of the universal invariants.

use coopnet::config::Config;
use coopnet::credit::{rounding, CreditEngine, ConditionPair, DecayRule, WeightingPolicy};
use coopnet::ledger::{related, Ledger};
use proptest::prelude::*;
use serde_json::json;

fn fresh_engine() -> (CreditEngine, Ledger) {
    let config = Config::default();
    let policy = WeightingPolicy::from_config("node-p", &config.weighting);
    let rule = DecayRule::from_config(&config.decay);
    (CreditEngine::new("node-p", policy, rule), Ledger::new("node-p"))
}

proptest! {
    #[test]
    fn prop_ledger_verifies_after_arbitrary_appends(
        payloads in proptest::collection::vec("[a-z0-9 ]{0,32}", 1..20)
    ) {
        let mut ledger = Ledger::new("node-p");
        for (i, payload) in payloads.iter().enumerate() {
            let note_id = format!("n-{i}");
            ledger
                .append(
                    format!("cds.note_{}", i % 3),
                    None,
                    related(&[("note", note_id.as_str())]),
                    json!({"text": payload}),
                )
                .unwrap();
        }
        prop_assert!(ledger.verify(None).is_ok());
    }

    #[test]
    fn prop_tampering_any_entry_breaks_verification(
        payloads in proptest::collection::vec("[a-z]{1,16}", 2..12),
        victim in 0usize..11,
    ) {
        let mut ledger = Ledger::new("node-p");
        for payload in &payloads {
            ledger
                .append("itc.note", None, related(&[]), json!({"text": payload}))
                .unwrap();
        }
        let victim = victim % payloads.len();
        let mut dump: Vec<coopnet::ledger::LedgerEntry> =
            serde_json::from_str(&ledger.dump().unwrap()).unwrap();
        dump[victim].details = json!({"text": "tampered-beyond-recognition"});
        let raw = serde_json::to_string(&dump).unwrap();
        prop_assert!(Ledger::load("node-p", &raw).is_err());
    }

    #[test]
    fn prop_round4_is_idempotent_and_close(x in -1.0e6f64..1.0e6) {
        let once = rounding::round4(x);
        prop_assert_eq!(once, rounding::round4(once));
        prop_assert!((once - x).abs() <= 0.00005 + 1e-9);
    }

    #[test]
    fn prop_equivalence_band_always_bounded(
        home_labor in 0.01f64..100.0,
        local_labor in 0.01f64..100.0,
        home_eco in 0.01f64..100.0,
        local_eco in 0.01f64..100.0,
    ) {
        let (mut engine, mut ledger) = fresh_engine();
        let band = engine
            .equivalence_band(
                &mut ledger,
                "home",
                "local",
                ConditionPair { home: home_labor, local: local_labor },
                ConditionPair { home: home_eco, local: local_eco },
            )
            .unwrap();
        prop_assert!((0.9..=1.1).contains(&band.labor_context_factor));
        prop_assert!((0.9..=1.1).contains(&band.eco_context_factor));
    }

    #[test]
    fn prop_autonomy_fragility_bounded(
        internal in 0.0f64..1.0,
        federated in 0.0f64..1.0,
        external in 0.0f64..1.0,
        critical in 0.0f64..1.0,
        shares in proptest::collection::vec(0.0f64..1.0, 0..8),
    ) {
        let out = CreditEngine::autonomy_and_fragility(
            internal, federated, external, critical, &shares,
        );
        prop_assert!((0.0..=1.0).contains(&out.autonomy));
        prop_assert!((0.0..=1.0).contains(&out.fragility));
    }

    #[test]
    fn prop_decay_never_increases_balance(
        balance in 0.0f64..10_000.0,
        days in 0i64..2000,
    ) {
        let (mut engine, mut ledger) = fresh_engine();
        let as_of = chrono::Utc::now();
        {
            let account = engine.open_account("m");
            account.balance = rounding::round4(balance);
            account.total_earned = rounding::round4(balance);
            account.last_decay_applied_at = as_of - chrono::Duration::days(days);
        }
        let before = engine.account("m").unwrap().balance;
        let decay = engine.apply_decay_at(&mut ledger, "m", as_of).unwrap();
        let after = engine.account("m").unwrap().balance;
        prop_assert!(decay >= 0.0);
        prop_assert!(after <= before);
        prop_assert!(after >= 0.0);
    }
}
