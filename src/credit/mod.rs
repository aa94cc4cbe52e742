//! ITC — the time-credit accounting engine
//!
//! Labor events become weighted labor records once verified, weighted hours
//! become account credits, balances decay with inactivity, and certified
//! designs get priced into access valuations that members redeem against.
//! Every mutation appends to the shared audit ledger before the operation
//! reports success.

pub mod policy;
pub mod rounding;

use crate::error::{EngineError, Result};
use crate::design::ValuationProfile;
use crate::guard::OpGuard;
use crate::ledger::{related, Ledger};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeSet, HashMap};
use tracing::info;
use uuid::Uuid;

pub use policy::{DecayRule, SkillTier, WeightingPolicy};
use rounding::{amount_str, round4};

/// Situational factors attached to a labor event, each in [0,1].
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaborContext {
    pub urgency: f64,
    pub eco_sensitivity: f64,
    pub scarcity: f64,
}

impl LaborContext {
    fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("urgency", self.urgency),
            ("eco_sensitivity", self.eco_sensitivity),
            ("scarcity", self.scarcity),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(EngineError::OutOfRange {
                    field,
                    value,
                    min: 0.0,
                    max: 1.0,
                });
            }
        }
        Ok(())
    }
}

/// A recorded stretch of cooperative labor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaborEvent {
    pub id: String,
    pub member_id: String,
    pub coop_id: String,
    pub task_id: String,
    pub task_label: String,
    pub node_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub skill_tier: SkillTier,
    pub context: LaborContext,
    pub verified_by: BTreeSet<String>,
    pub verification_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl LaborEvent {
    /// Duration in hours, derived rather than stored.
    pub fn hours(&self) -> f64 {
        (self.end_time - self.start_time).num_seconds() as f64 / 3600.0
    }

    pub fn is_verified(&self) -> bool {
        !self.verified_by.is_empty()
    }
}

/// Factor decomposition of a weight multiplier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightBreakdown {
    pub skill_factor: f64,
    pub task_factor: f64,
    pub context_factor: f64,
}

/// Weighted form of a verified labor event. One per event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightedLaborRecord {
    pub id: String,
    pub event_id: String,
    pub member_id: String,
    pub node_id: String,
    pub base_hours: f64,
    pub weight_multiplier: f64,
    pub weighted_hours: f64,
    pub breakdown: WeightBreakdown,
    pub created_at: DateTime<Utc>,
    /// Set once the record has been credited to an account.
    pub credited: bool,
}

/// A member's time-credit account on this node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: String,
    pub member_id: String,
    pub node_id: String,
    pub balance: f64,
    pub last_decay_applied_at: DateTime<Utc>,
    pub active_decay_rule_id: String,
    pub total_earned: f64,
    pub total_redeemed: f64,
    pub total_decayed: f64,
}

/// Priced access to an item built from a certified design.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessValuation {
    pub item_id: String,
    pub design_version_id: String,
    pub node_id: String,
    pub base_weighted_labor_hours: f64,
    pub eco_burden_adjustment: f64,
    pub material_scarcity_adjustment: f64,
    pub repairability_credit: f64,
    pub longevity_credit: f64,
    pub final_itc_cost: f64,
    pub computed_at: DateTime<Utc>,
    pub policy_snapshot_id: String,
    pub rationale: String,
}

/// Scarcity inputs the valuation reads from the other subsystems. These are
/// copied signal values, never live references into COS or FRS state.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValuationSignals {
    pub cos_material_scarcity_index: Option<f64>,
    pub frs_scarcity_amplifier: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedemptionType {
    OneTime,
    Subscription,
    Share,
}

/// A completed redemption; deduction and ledger entry are atomic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedemptionRecord {
    pub id: String,
    pub member_id: String,
    pub node_id: String,
    pub item_id: String,
    pub itc_spent: f64,
    pub redemption_time: DateTime<Utc>,
    pub redemption_type: RedemptionType,
    pub expires_at: Option<DateTime<Utc>>,
    pub valuation_snapshot: AccessValuation,
}

/// Cross-node conversion factors, bounded to cap arbitrage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EquivalenceBand {
    pub home_node_id: String,
    pub local_node_id: String,
    pub labor_context_factor: f64,
    pub eco_context_factor: f64,
    pub updated_at: DateTime<Utc>,
}

/// Home/local measurements of a condition, used to derive a band factor.
#[derive(Debug, Clone, Copy)]
pub struct ConditionPair {
    pub home: f64,
    pub local: f64,
}

/// Combined self-sufficiency indices.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutonomyFragility {
    pub autonomy: f64,
    pub fragility: f64,
}

/// Advisory flag raised by the coercion detector. Never mutates balances.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EthicsEvent {
    pub id: String,
    pub member_id: String,
    pub flag: EthicsFlag,
    pub ratio: f64,
    pub window_days: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EthicsFlag {
    ExcessiveHours,
    LowTierMonotony,
}

// Coercion detector thresholds. Sustained work above 80% of an
// eight-hour-day pace, or a near-exclusive diet of low-tier assignments,
// raises an advisory flag.
const REFERENCE_DAILY_HOURS: f64 = 8.0;
const EXCESSIVE_HOURS_RATIO: f64 = 0.8;
const LOW_TIER_RATIO: f64 = 0.9;
const MIN_EVENTS_FOR_TIER_FLAG: usize = 5;

const BAND_MIN: f64 = 0.9;
const BAND_MAX: f64 = 1.1;

/// The time-credit engine for one node.
pub struct CreditEngine {
    node_id: String,
    policy: WeightingPolicy,
    decay_rule: DecayRule,
    events: HashMap<String, LaborEvent>,
    records: HashMap<String, WeightedLaborRecord>,
    record_by_event: HashMap<String, String>,
    accounts: HashMap<String, Account>,
    valuations: HashMap<String, AccessValuation>,
    redemptions: Vec<RedemptionRecord>,
    bands: HashMap<(String, String), EquivalenceBand>,
    ethics_events: Vec<EthicsEvent>,
}

impl CreditEngine {
    pub fn new(node_id: impl Into<String>, policy: WeightingPolicy, decay_rule: DecayRule) -> Self {
        Self {
            node_id: node_id.into(),
            policy,
            decay_rule,
            events: HashMap::new(),
            records: HashMap::new(),
            record_by_event: HashMap::new(),
            accounts: HashMap::new(),
            valuations: HashMap::new(),
            redemptions: Vec::new(),
            bands: HashMap::new(),
            ethics_events: Vec::new(),
        }
    }

    pub fn policy(&self) -> &WeightingPolicy {
        &self.policy
    }

    pub fn decay_rule(&self) -> &DecayRule {
        &self.decay_rule
    }

    pub fn event(&self, id: &str) -> Option<&LaborEvent> {
        self.events.get(id)
    }

    pub fn record(&self, id: &str) -> Option<&WeightedLaborRecord> {
        self.records.get(id)
    }

    pub fn record_for_event(&self, event_id: &str) -> Option<&WeightedLaborRecord> {
        self.record_by_event
            .get(event_id)
            .and_then(|id| self.records.get(id))
    }

    pub fn account(&self, member_id: &str) -> Option<&Account> {
        self.accounts.get(member_id)
    }

    /// Mutable account access for administrative corrections. Changes made
    /// here bypass the ledger; callers are expected to append their own
    /// audit entry.
    pub fn account_mut(&mut self, member_id: &str) -> Option<&mut Account> {
        self.accounts.get_mut(member_id)
    }

    /// Create an empty account for a member if none exists yet.
    pub fn open_account(&mut self, member_id: &str) -> &mut Account {
        let decay_rule_id = self.decay_rule.id.clone();
        let node_id = self.node_id.clone();
        self.accounts
            .entry(member_id.to_string())
            .or_insert_with(|| Account {
                id: Uuid::new_v4().to_string(),
                member_id: member_id.to_string(),
                node_id,
                balance: 0.0,
                last_decay_applied_at: Utc::now(),
                active_decay_rule_id: decay_rule_id,
                total_earned: 0.0,
                total_redeemed: 0.0,
                total_decayed: 0.0,
            })
    }

    pub fn valuation(&self, item_id: &str) -> Option<&AccessValuation> {
        self.valuations.get(item_id)
    }

    pub fn valuations(&self) -> impl Iterator<Item = &AccessValuation> {
        self.valuations.values()
    }

    pub fn redemptions(&self) -> &[RedemptionRecord] {
        &self.redemptions
    }

    pub fn ethics_events(&self) -> &[EthicsEvent] {
        &self.ethics_events
    }

    pub fn band(&self, home: &str, local: &str) -> Option<&EquivalenceBand> {
        self.bands.get(&(home.to_string(), local.to_string()))
    }

    /// Fraction of labor events with at least one verifier, for diagnostics.
    pub fn verification_ratio(&self) -> f64 {
        if self.events.is_empty() {
            return 0.0;
        }
        let verified = self.events.values().filter(|e| e.is_verified()).count();
        verified as f64 / self.events.len() as f64
    }

    /// Record a stretch of labor. Hours are derived from the interval;
    /// `end` must lie strictly after `start`.
    #[allow(clippy::too_many_arguments)]
    pub fn record_labor(
        &mut self,
        ledger: &mut Ledger,
        member_id: impl Into<String>,
        coop_id: impl Into<String>,
        task_id: impl Into<String>,
        task_label: impl Into<String>,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        skill_tier: SkillTier,
        context: LaborContext,
    ) -> Result<LaborEvent> {
        if end_time <= start_time {
            return Err(EngineError::ConstraintViolation(format!(
                "labor event must end after it starts ({start_time} >= {end_time})"
            )));
        }
        context.validate()?;
        let event = LaborEvent {
            id: Uuid::new_v4().to_string(),
            member_id: member_id.into(),
            coop_id: coop_id.into(),
            task_id: task_id.into(),
            task_label: task_label.into(),
            node_id: self.node_id.clone(),
            start_time,
            end_time,
            skill_tier,
            context,
            verified_by: BTreeSet::new(),
            verification_timestamp: None,
            metadata: HashMap::new(),
        };
        ledger.append(
            "itc.labor_event_recorded",
            Some(event.member_id.clone()),
            related(&[("event", &event.id), ("task", &event.task_id)]),
            json!({
                "hours": amount_str(event.hours()),
                "skillTier": event.skill_tier.as_str(),
                "coop": event.coop_id,
            }),
        )?;
        self.events.insert(event.id.clone(), event.clone());
        Ok(event)
    }

    /// Add a verifier to an event. Idempotent when the verifier has already
    /// signed off.
    pub fn verify_labor(
        &mut self,
        ledger: &mut Ledger,
        event_id: &str,
        verifier_id: &str,
    ) -> Result<LaborEvent> {
        let event = self
            .events
            .get_mut(event_id)
            .ok_or_else(|| EngineError::not_found("labor event", event_id))?;
        if event.verified_by.contains(verifier_id) {
            return Ok(event.clone());
        }
        ledger.append(
            "itc.labor_verified",
            Some(verifier_id.to_string()),
            related(&[("event", event_id)]),
            json!({"verifier": verifier_id}),
        )?;
        event.verified_by.insert(verifier_id.to_string());
        event.verification_timestamp = Some(Utc::now());
        Ok(event.clone())
    }

    /// Weight a verified event. Idempotent: a second call returns the
    /// existing record.
    pub fn compute_weighted(
        &mut self,
        ledger: &mut Ledger,
        event_id: &str,
    ) -> Result<WeightedLaborRecord> {
        if let Some(existing) = self.record_for_event(event_id) {
            return Ok(existing.clone());
        }
        let event = self
            .events
            .get(event_id)
            .ok_or_else(|| EngineError::not_found("labor event", event_id))?;
        if !event.is_verified() {
            return Err(EngineError::PolicyRejected(format!(
                "labor event {event_id} has no verifier; weighting requires verification"
            )));
        }

        let skill_factor = self.policy.base_weight(event.skill_tier);
        let task_type = event
            .metadata
            .get("task_type")
            .map(String::as_str)
            .unwrap_or("generic");
        let task_factor = self.policy.task_factor(task_type);
        let ctx = event.context;
        let context_factor = (1.0
            + self.policy.urgency_weight * ctx.urgency
            + self.policy.eco_sensitivity_weight * ctx.eco_sensitivity
            + self.policy.scarcity_weight * ctx.scarcity)
            .clamp(self.policy.context_factor_min, self.policy.context_factor_max);
        let raw = skill_factor * task_factor * context_factor;
        let weight_multiplier = raw.clamp(
            self.policy.min_weight_multiplier,
            self.policy.max_weight_multiplier,
        );
        let base_hours = event.hours();
        let weighted_hours = round4(base_hours * weight_multiplier);

        let record = WeightedLaborRecord {
            id: Uuid::new_v4().to_string(),
            event_id: event_id.to_string(),
            member_id: event.member_id.clone(),
            node_id: self.node_id.clone(),
            base_hours,
            weight_multiplier,
            weighted_hours,
            breakdown: WeightBreakdown {
                skill_factor,
                task_factor,
                context_factor,
            },
            created_at: Utc::now(),
            credited: false,
        };
        ledger.append(
            "itc.labor_weighted",
            Some(record.member_id.clone()),
            related(&[("event", event_id), ("record", &record.id)]),
            json!({
                "baseHours": amount_str(base_hours),
                "weightMultiplier": weight_multiplier,
                "weightedHours": amount_str(weighted_hours),
            }),
        )?;
        self.record_by_event
            .insert(event_id.to_string(), record.id.clone());
        self.records.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    /// Credit a weighted record to its member's account, creating the
    /// account on first use. A record credits at most once.
    pub fn credit_account(
        &mut self,
        ledger: &mut Ledger,
        member_id: &str,
        record_id: &str,
    ) -> Result<Account> {
        let record = self
            .records
            .get(record_id)
            .ok_or_else(|| EngineError::not_found("weighted labor record", record_id))?
            .clone();
        if record.member_id != member_id {
            return Err(EngineError::ConstraintViolation(format!(
                "record {record_id} belongs to {}, not {member_id}",
                record.member_id
            )));
        }
        if record.credited {
            return Err(EngineError::ConstraintViolation(format!(
                "record {record_id} has already been credited"
            )));
        }

        let account = self.open_account(member_id);
        let new_balance = round4(account.balance + record.weighted_hours);
        ledger.append(
            "itc.account_credited",
            Some(member_id.to_string()),
            related(&[("account", &account.id), ("record", record_id)]),
            json!({
                "amount": amount_str(record.weighted_hours),
                "balance": amount_str(new_balance),
            }),
        )?;
        account.balance = new_balance;
        account.total_earned = round4(account.total_earned + record.weighted_hours);
        let snapshot = account.clone();
        if let Some(r) = self.records.get_mut(record_id) {
            r.credited = true;
        }
        Ok(snapshot)
    }

    /// Apply inactivity decay as of now. See [`CreditEngine::apply_decay_at`].
    pub fn apply_decay(&mut self, ledger: &mut Ledger, member_id: &str) -> Result<f64> {
        self.apply_decay_at(ledger, member_id, Utc::now())
    }

    /// Apply inactivity decay as of a given instant.
    ///
    /// Within the grace window this is a no-op returning 0 and leaving
    /// `last_decay_applied_at` untouched. Past the grace window the decay is
    /// the half-life erosion of the unprotected balance, capped by the
    /// pro-rated annual maximum. Decay never increases a balance.
    pub fn apply_decay_at(
        &mut self,
        ledger: &mut Ledger,
        member_id: &str,
        as_of: DateTime<Utc>,
    ) -> Result<f64> {
        let rule = self.decay_rule.clone();
        let account = self
            .accounts
            .get_mut(member_id)
            .ok_or_else(|| EngineError::not_found("account", member_id))?;

        let elapsed_days =
            (as_of - account.last_decay_applied_at).num_seconds() as f64 / 86_400.0;
        if elapsed_days <= rule.inactivity_grace_days {
            return Ok(0.0);
        }
        let d = elapsed_days - rule.inactivity_grace_days;
        let unprotected = (account.balance - rule.min_balance_protected).max(0.0);
        let raw_decay = unprotected * (1.0 - (2.0_f64).powf(-d / rule.half_life_days));
        let annual_cap = account.balance * rule.max_annual_decay_fraction * (d / 365.0);
        let decay_amount = round4(raw_decay.min(annual_cap));
        if decay_amount <= 0.0 {
            return Ok(0.0);
        }

        let new_balance = round4(account.balance - decay_amount);
        ledger.append(
            "itc.decay_applied",
            Some(member_id.to_string()),
            related(&[("account", &account.id), ("rule", &rule.id)]),
            json!({
                "amount": amount_str(decay_amount),
                "balance": amount_str(new_balance),
                "windowDays": d,
            }),
        )?;
        account.balance = new_balance;
        account.total_decayed = round4(account.total_decayed + decay_amount);
        account.last_decay_applied_at = as_of;
        Ok(decay_amount)
    }

    /// Price access to an item built from a design profile.
    ///
    /// Ecological burden and material scarcity surcharge the weighted labor
    /// base; repairability and longevity earn credits. The final cost never
    /// drops below zero, and the active policy id is snapshotted into the
    /// valuation.
    pub fn compute_access_value(
        &mut self,
        ledger: &mut Ledger,
        item_id: &str,
        profile: &ValuationProfile,
        signals: ValuationSignals,
        guard: &OpGuard,
    ) -> Result<AccessValuation> {
        guard.checkpoint()?;
        let mut weighted_labor = 0.0;
        for (tier, hours) in &profile.labor_by_skill_tier {
            let weight = self
                .policy
                .base_weights_by_skill
                .get(tier)
                .copied()
                .unwrap_or(1.0);
            weighted_labor += hours * weight;
        }
        guard.checkpoint()?;

        let scarcity_index = signals.cos_material_scarcity_index.unwrap_or(0.0);
        let amplifier = signals.frs_scarcity_amplifier.unwrap_or(1.0);

        let eco_adj = weighted_labor * profile.eco_score * 0.5;
        let scarcity_adj = weighted_labor * scarcity_index * amplifier * 0.3;
        let repair_credit = weighted_labor * profile.repairability * 0.15;
        let longevity_credit =
            weighted_labor * (profile.expected_lifespan_hours / 20_000.0).min(1.0) * 0.10;
        let final_cost =
            round4((weighted_labor + eco_adj + scarcity_adj - repair_credit - longevity_credit).max(0.0));

        let rationale = format!(
            "labor {:.4} + eco {:.4} (score {:.3} x 0.5) + scarcity {:.4} (index {:.3} x amp {:.3} x 0.3) - repair {:.4} (x0.15) - longevity {:.4} (x0.10) = {:.4}",
            weighted_labor, eco_adj, profile.eco_score, scarcity_adj, scarcity_index, amplifier,
            repair_credit, longevity_credit, final_cost
        );
        let valuation = AccessValuation {
            item_id: item_id.to_string(),
            design_version_id: profile.version_id.clone(),
            node_id: self.node_id.clone(),
            base_weighted_labor_hours: round4(weighted_labor),
            eco_burden_adjustment: round4(eco_adj),
            material_scarcity_adjustment: round4(scarcity_adj),
            repairability_credit: round4(repair_credit),
            longevity_credit: round4(longevity_credit),
            final_itc_cost: final_cost,
            computed_at: Utc::now(),
            policy_snapshot_id: self.policy.id.clone(),
            rationale,
        };
        guard.checkpoint()?;
        ledger.append(
            "itc.valuation_computed",
            None,
            related(&[("item", item_id), ("version", &profile.version_id)]),
            json!({
                "finalItcCost": amount_str(final_cost),
                "policy": valuation.policy_snapshot_id,
            }),
        )?;
        self.valuations
            .insert(item_id.to_string(), valuation.clone());
        Ok(valuation)
    }

    /// Redeem access against a priced item. The balance deduction and the
    /// ledger entry happen together or not at all.
    pub fn redeem_access(
        &mut self,
        ledger: &mut Ledger,
        member_id: &str,
        item_id: &str,
        redemption_type: RedemptionType,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<RedemptionRecord> {
        let valuation = self
            .valuations
            .get(item_id)
            .ok_or_else(|| EngineError::not_found("access valuation", item_id))?
            .clone();
        let account = self
            .accounts
            .get_mut(member_id)
            .ok_or_else(|| EngineError::not_found("account", member_id))?;
        let cost = valuation.final_itc_cost;
        if account.balance < cost {
            return Err(EngineError::InsufficientBalance {
                required: cost,
                available: account.balance,
            });
        }

        let record = RedemptionRecord {
            id: Uuid::new_v4().to_string(),
            member_id: member_id.to_string(),
            node_id: account.node_id.clone(),
            item_id: item_id.to_string(),
            itc_spent: cost,
            redemption_time: Utc::now(),
            redemption_type,
            expires_at,
            valuation_snapshot: valuation,
        };
        let new_balance = round4(account.balance - cost);
        // All checks passed; the append is the last fallible step, so the
        // deduction below cannot be observed without its ledger entry.
        ledger.append(
            "itc.access_redeemed",
            Some(member_id.to_string()),
            related(&[("account", &account.id), ("item", item_id), ("redemption", &record.id)]),
            json!({
                "itcSpent": amount_str(cost),
                "balance": amount_str(new_balance),
            }),
        )?;
        account.balance = new_balance;
        account.total_redeemed = round4(account.total_redeemed + cost);
        info!(member_id, item_id, cost, "access redeemed");
        self.redemptions.push(record.clone());
        Ok(record)
    }

    /// Derive cross-node conversion factors from home/local condition
    /// measurements. Both factors are bounded to [0.9, 1.1].
    pub fn equivalence_band(
        &mut self,
        ledger: &mut Ledger,
        home_node_id: &str,
        local_node_id: &str,
        labor_conditions: ConditionPair,
        eco_conditions: ConditionPair,
    ) -> Result<EquivalenceBand> {
        for (field, pair) in [("labor_conditions", labor_conditions), ("eco_conditions", eco_conditions)] {
            if pair.home <= 0.0 || pair.local <= 0.0 {
                return Err(EngineError::ConstraintViolation(format!(
                    "{field} must be positive on both nodes"
                )));
            }
        }
        let band = EquivalenceBand {
            home_node_id: home_node_id.to_string(),
            local_node_id: local_node_id.to_string(),
            labor_context_factor: (labor_conditions.local / labor_conditions.home)
                .clamp(BAND_MIN, BAND_MAX),
            eco_context_factor: (eco_conditions.local / eco_conditions.home)
                .clamp(BAND_MIN, BAND_MAX),
            updated_at: Utc::now(),
        };
        ledger.append(
            "itc.equivalence_band_updated",
            None,
            related(&[("homeNode", home_node_id), ("localNode", local_node_id)]),
            json!({
                "laborContextFactor": band.labor_context_factor,
                "ecoContextFactor": band.eco_context_factor,
            }),
        )?;
        self.bands.insert(
            (home_node_id.to_string(), local_node_id.to_string()),
            band.clone(),
        );
        Ok(band)
    }

    /// Self-sufficiency indices from sourcing shares.
    ///
    /// `autonomy = clamp(internal + 0.7*federated - external, 0, 1)`;
    /// `fragility = clamp(Herfindahl(unit_shares) + 0.3*critical_external, 0, 1)`.
    pub fn autonomy_and_fragility(
        internal_share: f64,
        federated_share: f64,
        external_share: f64,
        critical_external: f64,
        unit_shares: &[f64],
    ) -> AutonomyFragility {
        let autonomy =
            (internal_share + 0.7 * federated_share - external_share).clamp(0.0, 1.0);
        let herfindahl: f64 = unit_shares.iter().map(|s| s * s).sum();
        let fragility = (herfindahl + 0.3 * critical_external).clamp(0.0, 1.0);
        AutonomyFragility {
            autonomy,
            fragility,
        }
    }

    /// Inspect a member's recent labor for coercion signatures. Advisory:
    /// flags are ledgered but balances are never touched.
    pub fn detect_coercion(
        &mut self,
        ledger: &mut Ledger,
        member_id: &str,
        window_days: f64,
    ) -> Result<Vec<EthicsEvent>> {
        self.detect_coercion_at(ledger, member_id, window_days, Utc::now())
    }

    pub fn detect_coercion_at(
        &mut self,
        ledger: &mut Ledger,
        member_id: &str,
        window_days: f64,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<EthicsEvent>> {
        let window_start = as_of - chrono::Duration::seconds((window_days * 86_400.0) as i64);
        let recent: Vec<&LaborEvent> = self
            .events
            .values()
            .filter(|e| e.member_id == member_id && e.end_time >= window_start)
            .collect();
        if recent.is_empty() {
            return Ok(Vec::new());
        }

        let mut flags = Vec::new();
        let total_hours: f64 = recent.iter().map(|e| e.hours()).sum();
        let hours_ratio = total_hours / (window_days * REFERENCE_DAILY_HOURS);
        if hours_ratio > EXCESSIVE_HOURS_RATIO {
            flags.push((EthicsFlag::ExcessiveHours, hours_ratio));
        }

        if recent.len() >= MIN_EVENTS_FOR_TIER_FLAG {
            let low_tier = recent
                .iter()
                .filter(|e| e.skill_tier == SkillTier::Low)
                .count();
            let low_ratio = low_tier as f64 / recent.len() as f64;
            if low_ratio >= LOW_TIER_RATIO {
                flags.push((EthicsFlag::LowTierMonotony, low_ratio));
            }
        }

        let mut events = Vec::new();
        for (flag, ratio) in flags {
            let ethics = EthicsEvent {
                id: Uuid::new_v4().to_string(),
                member_id: member_id.to_string(),
                flag,
                ratio,
                window_days,
                created_at: as_of,
            };
            ledger.append(
                "itc.ethics_flag",
                Some(member_id.to_string()),
                related(&[("ethicsEvent", &ethics.id)]),
                json!({"flag": flag, "ratio": ratio, "windowDays": window_days}),
            )?;
            self.ethics_events.push(ethics.clone());
            events.push(ethics);
        }
        Ok(events)
    }
}
