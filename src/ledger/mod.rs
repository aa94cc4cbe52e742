//! Hash-chained audit ledger shared by all subsystems
//!
//! Every durable mutation in the engine is recorded here before the
//! operation reports success. Entries form a single append-only sequence per
//! node; each entry's hash covers its canonicalized payload concatenated
//! with the previous entry's hash, so tampering with any field of any entry
//! breaks verification from that point on.

pub mod canonical;

use crate::error::{EngineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Seed string hashed into the genesis `prev_hash`.
const GENESIS_SEED: &str = "INTEGRAL_GENESIS";

/// A single tamper-evident audit record.
///
/// Entry types are namespaced by subsystem (`cds.*`, `oad.*`, `itc.*`,
/// `cos.*`, `frs.*`, `fed.*`). Subsystems hold only entry ids; the ledger
/// owns the entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub entry_type: String,
    pub node_id: String,
    pub member_id: Option<String>,
    /// Role name -> entity id of every entity this entry touches.
    pub related_ids: BTreeMap<String, String>,
    /// Opaque structured payload; subsystems choose the shape per entry type.
    pub details: Value,
    pub prev_hash: String,
    pub entry_hash: String,
}

impl LedgerEntry {
    /// Recompute this entry's hash from its fields.
    pub fn calculate_hash(&self) -> String {
        let payload = json!({
            "id": self.id,
            "timestamp": canonical::format_timestamp(self.timestamp),
            "entryType": self.entry_type,
            "nodeId": self.node_id,
            "memberId": self.member_id,
            "relatedIds": self.related_ids,
            "details": self.details,
        });
        let mut hasher = Sha256::new();
        hasher.update(canonical::stable_serialize(&payload).as_bytes());
        hasher.update(self.prev_hash.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Filter for [`Ledger::trail`]. Both fields may be combined; an empty
/// filter matches everything.
#[derive(Debug, Clone, Default)]
pub struct TrailFilter {
    /// Match entries whose `related_ids` contain this id as a value.
    pub related_id: Option<String>,
    /// Match entries whose `entry_type` starts with this prefix.
    pub type_prefix: Option<String>,
}

impl TrailFilter {
    pub fn related(id: impl Into<String>) -> Self {
        Self {
            related_id: Some(id.into()),
            type_prefix: None,
        }
    }

    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self {
            related_id: None,
            type_prefix: Some(prefix.into()),
        }
    }

    fn matches(&self, entry: &LedgerEntry) -> bool {
        if let Some(id) = &self.related_id {
            if !entry.related_ids.values().any(|v| v == id) {
                return false;
            }
        }
        if let Some(prefix) = &self.type_prefix {
            if !entry.entry_type.starts_with(prefix.as_str()) {
                return false;
            }
        }
        true
    }
}

/// The node's append-only hash chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ledger {
    node_id: String,
    entries: Vec<LedgerEntry>,
    /// Set when an audit detected corruption; refuses writes until a clean
    /// audit clears it.
    #[serde(default)]
    poisoned: bool,
}

impl Ledger {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            entries: Vec::new(),
            poisoned: false,
        }
    }

    /// Hash every chain starts from.
    pub fn genesis_hash() -> String {
        let mut hasher = Sha256::new();
        hasher.update(GENESIS_SEED.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn get(&self, id: &str) -> Option<&LedgerEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// Hash the next entry will chain from.
    pub fn tail_hash(&self) -> String {
        self.entries
            .last()
            .map(|e| e.entry_hash.clone())
            .unwrap_or_else(Self::genesis_hash)
    }

    /// Append a new entry to the chain.
    ///
    /// The caller's logical mutation must not be reported as successful
    /// unless this returns `Ok`; a poisoned ledger rejects all writes.
    pub fn append(
        &mut self,
        entry_type: impl Into<String>,
        member_id: Option<String>,
        related_ids: BTreeMap<String, String>,
        details: Value,
    ) -> Result<&LedgerEntry> {
        if self.poisoned {
            return Err(EngineError::Integrity {
                index: self.entries.len(),
                detail: "ledger is poisoned; audit required before further writes".into(),
            });
        }
        let prev_hash = self.tail_hash();
        let mut entry = LedgerEntry {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            entry_type: entry_type.into(),
            node_id: self.node_id.clone(),
            member_id,
            related_ids,
            details,
            prev_hash,
            entry_hash: String::new(),
        };
        entry.entry_hash = entry.calculate_hash();
        self.entries.push(entry);
        Ok(self.entries.last().expect("entry just pushed"))
    }

    /// Verify hash linkage over a range of the chain (whole chain if `None`).
    ///
    /// Checks that every entry's stored hash matches a recomputation and
    /// that each `prev_hash` equals the previous entry's `entry_hash` (the
    /// first entry chains from the genesis hash).
    pub fn verify(&self, range: Option<std::ops::Range<usize>>) -> Result<()> {
        let range = range.unwrap_or(0..self.entries.len());
        for i in range {
            let entry = self.entries.get(i).ok_or(EngineError::Integrity {
                index: i,
                detail: "verification range exceeds chain length".into(),
            })?;
            let expected_prev = if i == 0 {
                Self::genesis_hash()
            } else {
                self.entries[i - 1].entry_hash.clone()
            };
            if entry.prev_hash != expected_prev {
                return Err(EngineError::Integrity {
                    index: i,
                    detail: format!(
                        "broken linkage: prev_hash {} does not match {}",
                        entry.prev_hash, expected_prev
                    ),
                });
            }
            let recomputed = entry.calculate_hash();
            if entry.entry_hash != recomputed {
                return Err(EngineError::Integrity {
                    index: i,
                    detail: format!(
                        "hash mismatch: stored {} recomputed {}",
                        entry.entry_hash, recomputed
                    ),
                });
            }
        }
        Ok(())
    }

    /// Run a full verification and update the poisoned flag accordingly.
    pub fn audit(&mut self) -> Result<()> {
        match self.verify(None) {
            Ok(()) => {
                self.poisoned = false;
                Ok(())
            }
            Err(e) => {
                self.poisoned = true;
                Err(e)
            }
        }
    }

    /// Entries matching the filter, in chain order.
    pub fn trail(&self, filter: &TrailFilter) -> Vec<&LedgerEntry> {
        self.entries.iter().filter(|e| filter.matches(e)).collect()
    }

    /// Serialize the whole chain as JSON for operational audit.
    pub fn dump(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.entries)?)
    }

    /// Rebuild a ledger from a previously dumped chain, verifying it.
    pub fn load(node_id: impl Into<String>, dump: &str) -> Result<Self> {
        let entries: Vec<LedgerEntry> = serde_json::from_str(dump)?;
        let ledger = Self {
            node_id: node_id.into(),
            entries,
            poisoned: false,
        };
        ledger.verify(None)?;
        Ok(ledger)
    }
}

/// Convenience constructor for `related_ids` maps.
pub fn related(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_ledger() -> Ledger {
        let mut ledger = Ledger::new("node-a");
        ledger
            .append(
                "itc.labor_event_recorded",
                Some("member-1".into()),
                related(&[("event", "ev-1")]),
                json!({"hours": "4.0000"}),
            )
            .unwrap();
        ledger
            .append(
                "cds.issue_created",
                None,
                related(&[("issue", "is-1")]),
                json!({"title": "water catchment"}),
            )
            .unwrap();
        ledger
    }

    #[test]
    fn test_append_links_from_genesis() {
        let ledger = sample_ledger();
        assert_eq!(ledger.entries()[0].prev_hash, Ledger::genesis_hash());
        assert_eq!(
            ledger.entries()[1].prev_hash,
            ledger.entries()[0].entry_hash
        );
    }

    #[test]
    fn test_verify_accepts_untampered_chain() {
        let ledger = sample_ledger();
        assert!(ledger.verify(None).is_ok());
    }

    #[test]
    fn test_tampering_details_breaks_verification() {
        let mut ledger = sample_ledger();
        ledger.entries[0].details = json!({"hours": "400.0000"});
        assert!(matches!(
            ledger.verify(None),
            Err(EngineError::Integrity { index: 0, .. })
        ));
    }

    #[test]
    fn test_tampering_type_breaks_verification() {
        let mut ledger = sample_ledger();
        ledger.entries[1].entry_type = "cds.issue_decided".into();
        assert!(ledger.verify(None).is_err());
    }

    #[test]
    fn test_poisoned_ledger_refuses_appends() {
        let mut ledger = sample_ledger();
        ledger.entries[0].details = json!({});
        assert!(ledger.audit().is_err());
        let err = ledger
            .append("cds.noop", None, BTreeMap::new(), json!({}))
            .unwrap_err();
        assert_eq!(err.code(), "integrity_error");
    }

    #[test]
    fn test_trail_by_related_id_and_prefix() {
        let ledger = sample_ledger();
        assert_eq!(ledger.trail(&TrailFilter::related("ev-1")).len(), 1);
        assert_eq!(ledger.trail(&TrailFilter::prefix("cds.")).len(), 1);
        assert_eq!(ledger.trail(&TrailFilter::default()).len(), 2);
    }

    #[test]
    fn test_dump_and_load_round_trip() {
        let ledger = sample_ledger();
        let dump = ledger.dump().unwrap();
        let restored = Ledger::load("node-a", &dump).unwrap();
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.tail_hash(), ledger.tail_hash());
    }

    #[test]
    fn test_load_rejects_tampered_dump() {
        let ledger = sample_ledger();
        let dump = ledger.dump().unwrap().replace("water catchment", "altered");
        assert!(Ledger::load("node-a", &dump).is_err());
    }

    #[test]
    fn test_stored_hash_reproducible_from_serialization() {
        let ledger = sample_ledger();
        for entry in ledger.entries() {
            assert_eq!(entry.entry_hash, entry.calculate_hash());
        }
    }
}
