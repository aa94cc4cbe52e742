//! OAD — open design registry with ecological assessment
//!
//! Design specs collect functional requirements; versions carry the concrete
//! parameters a cooperative can build from. A version moves draft ->
//! under_review -> certified once a quorum of certifiers has signed, and its
//! valuation profile is what the time-credit engine prices access against.

use crate::error::{EngineError, Result};
use crate::ledger::{related, Ledger};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

/// Lifecycle of a design version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionStatus {
    Draft,
    UnderReview,
    Certified,
    Deprecated,
}

/// A design spec: the problem statement a version answers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DesignSpec {
    pub id: String,
    pub purpose: String,
    pub functional_requirements: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Concrete buildable parameters of a design version.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionParameters {
    /// Estimated build hours per skill tier (tier name -> hours).
    pub labor_by_skill_tier: HashMap<String, f64>,
    /// Fraction of the design serviceable with common tools, in [0,1].
    pub repairability: f64,
    pub expected_lifespan_hours: f64,
    /// Ecological input factors, each in [0,1].
    pub material_impact: f64,
    pub energy_impact: f64,
    pub waste_impact: f64,
    /// Expected service life in years, used as the longevity term.
    pub expected_longevity_years: f64,
    /// Free-form extras (dimensions, tolerances, notes).
    #[serde(default)]
    pub extra: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DesignVersion {
    pub id: String,
    pub spec_id: String,
    pub label: String,
    pub authors: Vec<String>,
    pub parameters: VersionParameters,
    pub status: VersionStatus,
    pub eco_score: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// Result of an ecological assessment. Lower scores are more sustainable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EcoAssessment {
    pub id: String,
    pub version_id: String,
    pub eco_score: f64,
    /// Weights used, recorded so the score can be re-derived.
    pub weights: EcoWeights,
    pub rationale: String,
    pub assessed_at: DateTime<Utc>,
}

/// Policy weights of the eco-score composite.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EcoWeights {
    pub material: f64,
    pub energy: f64,
    pub waste: f64,
    pub longevity: f64,
}

impl Default for EcoWeights {
    fn default() -> Self {
        Self {
            material: 0.3,
            energy: 0.3,
            waste: 0.2,
            longevity: 0.2,
        }
    }
}

/// A certifier's recorded approval of a version.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertifierSignature {
    pub certifier_id: String,
    pub signed_at: DateTime<Utc>,
    pub ledger_entry_id: String,
}

/// Certification state for a version under review.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificationRecord {
    pub id: String,
    pub version_id: String,
    pub policy_id: String,
    /// Certifiers invited to review.
    pub certifier_ids: Vec<String>,
    pub signatures: Vec<CertifierSignature>,
    pub required_quorum: usize,
    pub requested_at: DateTime<Utc>,
    pub certified_at: Option<DateTime<Utc>>,
}

/// Snapshot handed to the time-credit engine for access valuation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValuationProfile {
    pub version_id: String,
    pub labor_by_skill_tier: HashMap<String, f64>,
    pub estimated_labor_hours: f64,
    pub eco_score: f64,
    pub repairability: f64,
    pub expected_lifespan_hours: f64,
}

/// Design registry state for one node.
pub struct DesignRegistry {
    specs: HashMap<String, DesignSpec>,
    versions: HashMap<String, DesignVersion>,
    assessments: HashMap<String, EcoAssessment>,
    certifications: HashMap<String, CertificationRecord>,
    eco_weights: EcoWeights,
    certification_quorum: usize,
    certification_policy_id: String,
}

impl DesignRegistry {
    pub fn new() -> Self {
        Self {
            specs: HashMap::new(),
            versions: HashMap::new(),
            assessments: HashMap::new(),
            certifications: HashMap::new(),
            eco_weights: EcoWeights::default(),
            certification_quorum: 2,
            certification_policy_id: "cert-policy-v1".to_string(),
        }
    }

    pub fn with_quorum(mut self, quorum: usize) -> Self {
        self.certification_quorum = quorum.max(1);
        self
    }

    pub fn spec(&self, id: &str) -> Option<&DesignSpec> {
        self.specs.get(id)
    }

    pub fn version(&self, id: &str) -> Option<&DesignVersion> {
        self.versions.get(id)
    }

    pub fn assessment(&self, version_id: &str) -> Option<&EcoAssessment> {
        self.assessments.get(version_id)
    }

    pub fn certification(&self, version_id: &str) -> Option<&CertificationRecord> {
        self.certifications.get(version_id)
    }

    pub fn versions(&self) -> impl Iterator<Item = &DesignVersion> {
        self.versions.values()
    }

    /// Average eco score over certified versions, for feedback snapshots.
    pub fn certified_eco_average(&self) -> Option<f64> {
        let scores: Vec<f64> = self
            .versions
            .values()
            .filter(|v| v.status == VersionStatus::Certified)
            .filter_map(|v| v.eco_score)
            .collect();
        if scores.is_empty() {
            None
        } else {
            Some(scores.iter().sum::<f64>() / scores.len() as f64)
        }
    }

    /// Fraction of versions that reached certification.
    pub fn certified_ratio(&self) -> f64 {
        if self.versions.is_empty() {
            return 0.0;
        }
        let certified = self
            .versions
            .values()
            .filter(|v| v.status == VersionStatus::Certified)
            .count();
        certified as f64 / self.versions.len() as f64
    }

    pub fn create_spec(
        &mut self,
        ledger: &mut Ledger,
        purpose: impl Into<String>,
        functional_requirements: Vec<String>,
    ) -> Result<DesignSpec> {
        let spec = DesignSpec {
            id: Uuid::new_v4().to_string(),
            purpose: purpose.into(),
            functional_requirements,
            created_at: Utc::now(),
        };
        ledger.append(
            "oad.spec_created",
            None,
            related(&[("spec", &spec.id)]),
            json!({"purpose": spec.purpose, "requirementCount": spec.functional_requirements.len()}),
        )?;
        self.specs.insert(spec.id.clone(), spec.clone());
        Ok(spec)
    }

    pub fn create_version(
        &mut self,
        ledger: &mut Ledger,
        spec_id: &str,
        label: impl Into<String>,
        authors: Vec<String>,
        parameters: VersionParameters,
    ) -> Result<DesignVersion> {
        if !self.specs.contains_key(spec_id) {
            return Err(EngineError::not_found("design spec", spec_id));
        }
        let version = DesignVersion {
            id: Uuid::new_v4().to_string(),
            spec_id: spec_id.to_string(),
            label: label.into(),
            authors,
            parameters,
            status: VersionStatus::Draft,
            eco_score: None,
            created_at: Utc::now(),
        };
        ledger.append(
            "oad.version_created",
            None,
            related(&[("spec", spec_id), ("version", &version.id)]),
            json!({"label": version.label, "authors": version.authors}),
        )?;
        self.versions.insert(version.id.clone(), version.clone());
        Ok(version)
    }

    /// Score a version's ecological burden.
    ///
    /// `E = w_m * material + w_e * energy + w_w * waste + w_l / longevity`,
    /// clamped to [0,1]. Input factors must already sit in [0,1] and the
    /// longevity term must be positive; out-of-range inputs are rejected,
    /// not clamped.
    pub fn compute_eco_assessment(
        &mut self,
        ledger: &mut Ledger,
        version_id: &str,
    ) -> Result<EcoAssessment> {
        let version = self
            .versions
            .get(version_id)
            .ok_or_else(|| EngineError::not_found("design version", version_id))?;
        let p = &version.parameters;
        for (field, value) in [
            ("material_impact", p.material_impact),
            ("energy_impact", p.energy_impact),
            ("waste_impact", p.waste_impact),
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
        if p.expected_longevity_years <= 0.0 {
            return Err(EngineError::OutOfRange {
                field: "expected_longevity_years",
                value: p.expected_longevity_years,
                min: f64::MIN_POSITIVE,
                max: f64::MAX,
            });
        }

        let w = self.eco_weights;
        let raw = w.material * p.material_impact
            + w.energy * p.energy_impact
            + w.waste * p.waste_impact
            + w.longevity / p.expected_longevity_years;
        let eco_score = raw.clamp(0.0, 1.0);
        let rationale = format!(
            "eco = {:.2}*material({:.3}) + {:.2}*energy({:.3}) + {:.2}*waste({:.3}) + {:.2}/longevity({:.1}y) = {:.4} (clamped to [0,1])",
            w.material, p.material_impact, w.energy, p.energy_impact,
            w.waste, p.waste_impact, w.longevity, p.expected_longevity_years, eco_score
        );

        let assessment = EcoAssessment {
            id: Uuid::new_v4().to_string(),
            version_id: version_id.to_string(),
            eco_score,
            weights: w,
            rationale,
            assessed_at: Utc::now(),
        };
        ledger.append(
            "oad.eco_assessed",
            None,
            related(&[("version", version_id), ("assessment", &assessment.id)]),
            json!({"ecoScore": eco_score, "rationale": assessment.rationale}),
        )?;
        self.assessments
            .insert(version_id.to_string(), assessment.clone());
        if let Some(v) = self.versions.get_mut(version_id) {
            v.eco_score = Some(eco_score);
        }
        Ok(assessment)
    }

    /// Open a certification round; the version moves to under_review.
    pub fn request_certification(
        &mut self,
        ledger: &mut Ledger,
        version_id: &str,
        certifier_ids: Vec<String>,
    ) -> Result<CertificationRecord> {
        let status = self
            .versions
            .get(version_id)
            .ok_or_else(|| EngineError::not_found("design version", version_id))?
            .status;
        if status != VersionStatus::Draft {
            return Err(EngineError::invalid_transition(
                "design version",
                version_id,
                format!("{status:?} -> under_review"),
            ));
        }
        if certifier_ids.len() < self.certification_quorum {
            return Err(EngineError::PolicyRejected(format!(
                "certification needs at least {} certifiers, got {}",
                self.certification_quorum,
                certifier_ids.len()
            )));
        }
        let record = CertificationRecord {
            id: Uuid::new_v4().to_string(),
            version_id: version_id.to_string(),
            policy_id: self.certification_policy_id.clone(),
            certifier_ids,
            signatures: Vec::new(),
            required_quorum: self.certification_quorum,
            requested_at: Utc::now(),
            certified_at: None,
        };
        ledger.append(
            "oad.certification_requested",
            None,
            related(&[("version", version_id), ("certification", &record.id)]),
            json!({"certifiers": record.certifier_ids, "quorum": record.required_quorum}),
        )?;
        if let Some(version) = self.versions.get_mut(version_id) {
            version.status = VersionStatus::UnderReview;
        }
        self.certifications
            .insert(version_id.to_string(), record.clone());
        Ok(record)
    }

    /// Record one certifier's approval. Idempotent per certifier; when the
    /// quorum is reached the version becomes certified.
    pub fn record_certifier_signature(
        &mut self,
        ledger: &mut Ledger,
        version_id: &str,
        certifier_id: &str,
    ) -> Result<CertificationRecord> {
        let record = self
            .certifications
            .get_mut(version_id)
            .ok_or_else(|| EngineError::not_found("certification record", version_id))?;
        if !record.certifier_ids.iter().any(|c| c == certifier_id) {
            return Err(EngineError::PolicyRejected(format!(
                "{certifier_id} is not an invited certifier for this version"
            )));
        }
        if record.certified_at.is_some() {
            return Ok(record.clone());
        }
        if record.signatures.iter().any(|s| s.certifier_id == certifier_id) {
            return Ok(record.clone());
        }

        let entry = ledger.append(
            "oad.certification_signed",
            Some(certifier_id.to_string()),
            related(&[("version", version_id), ("certification", &record.id)]),
            json!({"certifier": certifier_id}),
        )?;
        record.signatures.push(CertifierSignature {
            certifier_id: certifier_id.to_string(),
            signed_at: Utc::now(),
            ledger_entry_id: entry.id.clone(),
        });

        if record.signatures.len() >= record.required_quorum {
            record.certified_at = Some(Utc::now());
            let cert_id = record.id.clone();
            let snapshot = record.clone();
            ledger.append(
                "oad.version_certified",
                None,
                related(&[("version", version_id), ("certification", &cert_id)]),
                json!({"signatures": snapshot.signatures.len()}),
            )?;
            if let Some(v) = self.versions.get_mut(version_id) {
                v.status = VersionStatus::Certified;
            }
            return Ok(snapshot);
        }
        Ok(record.clone())
    }

    /// Retire a certified or reviewed version.
    pub fn deprecate_version(&mut self, ledger: &mut Ledger, version_id: &str) -> Result<()> {
        let version = self
            .versions
            .get_mut(version_id)
            .ok_or_else(|| EngineError::not_found("design version", version_id))?;
        if version.status == VersionStatus::Deprecated {
            return Err(EngineError::invalid_transition(
                "design version",
                version_id,
                "deprecated -> deprecated",
            ));
        }
        ledger.append(
            "oad.version_deprecated",
            None,
            related(&[("version", version_id)]),
            json!({"previousStatus": format!("{:?}", version.status)}),
        )?;
        version.status = VersionStatus::Deprecated;
        Ok(())
    }

    /// Snapshot the numbers the time-credit engine prices access from.
    /// Requires a completed eco assessment.
    pub fn valuation_profile(&self, version_id: &str) -> Result<ValuationProfile> {
        let version = self
            .versions
            .get(version_id)
            .ok_or_else(|| EngineError::not_found("design version", version_id))?;
        let eco_score = version.eco_score.ok_or_else(|| {
            EngineError::PolicyRejected(format!(
                "version {version_id} has no eco assessment; assess before valuation"
            ))
        })?;
        let estimated: f64 = version.parameters.labor_by_skill_tier.values().sum();
        Ok(ValuationProfile {
            version_id: version_id.to_string(),
            labor_by_skill_tier: version.parameters.labor_by_skill_tier.clone(),
            estimated_labor_hours: estimated,
            eco_score,
            repairability: version.parameters.repairability,
            expected_lifespan_hours: version.parameters.expected_lifespan_hours,
        })
    }
}

impl Default for DesignRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (DesignRegistry, Ledger) {
        (DesignRegistry::new(), Ledger::new("node-a"))
    }

    fn sample_parameters() -> VersionParameters {
        VersionParameters {
            labor_by_skill_tier: HashMap::from([
                ("low".to_string(), 10.0),
                ("medium".to_string(), 5.0),
            ]),
            repairability: 0.6,
            expected_lifespan_hours: 10_000.0,
            material_impact: 0.4,
            energy_impact: 0.3,
            waste_impact: 0.2,
            expected_longevity_years: 10.0,
            extra: HashMap::new(),
        }
    }

    fn spec_and_version(registry: &mut DesignRegistry, ledger: &mut Ledger) -> DesignVersion {
        let spec = registry
            .create_spec(ledger, "rainwater harvester", vec!["collect".into(), "filter".into()])
            .unwrap();
        registry
            .create_version(ledger, &spec.id, "v1", vec!["m1".into()], sample_parameters())
            .unwrap()
    }

    #[test]
    fn test_version_starts_as_draft() {
        let (mut registry, mut ledger) = setup();
        let version = spec_and_version(&mut registry, &mut ledger);
        assert_eq!(version.status, VersionStatus::Draft);
    }

    #[test]
    fn test_eco_assessment_composite_and_clamp() {
        let (mut registry, mut ledger) = setup();
        let version = spec_and_version(&mut registry, &mut ledger);
        let assessment = registry
            .compute_eco_assessment(&mut ledger, &version.id)
            .unwrap();
        // 0.3*0.4 + 0.3*0.3 + 0.2*0.2 + 0.2/10 = 0.27
        assert!((assessment.eco_score - 0.27).abs() < 1e-9);
        assert!(assessment.rationale.contains("0.30*material"));
    }

    #[test]
    fn test_eco_assessment_rejects_out_of_range_inputs() {
        let (mut registry, mut ledger) = setup();
        let spec = registry
            .create_spec(&mut ledger, "x", vec![])
            .unwrap();
        let mut params = sample_parameters();
        params.material_impact = 1.5;
        let version = registry
            .create_version(&mut ledger, &spec.id, "v1", vec![], params)
            .unwrap();
        let err = registry
            .compute_eco_assessment(&mut ledger, &version.id)
            .unwrap_err();
        assert_eq!(err.code(), "out_of_range");
    }

    #[test]
    fn test_certification_quorum_flow() {
        let (mut registry, mut ledger) = setup();
        let version = spec_and_version(&mut registry, &mut ledger);
        registry
            .request_certification(
                &mut ledger,
                &version.id,
                vec!["c1".into(), "c2".into(), "c3".into()],
            )
            .unwrap();
        assert_eq!(
            registry.version(&version.id).unwrap().status,
            VersionStatus::UnderReview
        );

        registry
            .record_certifier_signature(&mut ledger, &version.id, "c1")
            .unwrap();
        assert_eq!(
            registry.version(&version.id).unwrap().status,
            VersionStatus::UnderReview
        );
        registry
            .record_certifier_signature(&mut ledger, &version.id, "c2")
            .unwrap();
        assert_eq!(
            registry.version(&version.id).unwrap().status,
            VersionStatus::Certified
        );
    }

    #[test]
    fn test_certifier_signature_is_idempotent() {
        let (mut registry, mut ledger) = setup();
        let version = spec_and_version(&mut registry, &mut ledger);
        registry
            .request_certification(&mut ledger, &version.id, vec!["c1".into(), "c2".into()])
            .unwrap();
        registry
            .record_certifier_signature(&mut ledger, &version.id, "c1")
            .unwrap();
        let record = registry
            .record_certifier_signature(&mut ledger, &version.id, "c1")
            .unwrap();
        assert_eq!(record.signatures.len(), 1);
    }

    #[test]
    fn test_uninvited_certifier_is_rejected() {
        let (mut registry, mut ledger) = setup();
        let version = spec_and_version(&mut registry, &mut ledger);
        registry
            .request_certification(&mut ledger, &version.id, vec!["c1".into(), "c2".into()])
            .unwrap();
        let err = registry
            .record_certifier_signature(&mut ledger, &version.id, "outsider")
            .unwrap_err();
        assert_eq!(err.code(), "policy_rejected");
    }

    #[test]
    fn test_valuation_profile_requires_assessment() {
        let (mut registry, mut ledger) = setup();
        let version = spec_and_version(&mut registry, &mut ledger);
        assert!(registry.valuation_profile(&version.id).is_err());
        registry
            .compute_eco_assessment(&mut ledger, &version.id)
            .unwrap();
        let profile = registry.valuation_profile(&version.id).unwrap();
        assert_eq!(profile.estimated_labor_hours, 15.0);
        assert_eq!(profile.repairability, 0.6);
    }

    #[test]
    fn test_certification_of_non_draft_version_fails() {
        let (mut registry, mut ledger) = setup();
        let version = spec_and_version(&mut registry, &mut ledger);
        registry
            .request_certification(&mut ledger, &version.id, vec!["c1".into(), "c2".into()])
            .unwrap();
        let err = registry
            .request_certification(&mut ledger, &version.id, vec!["c1".into(), "c2".into()])
            .unwrap_err();
        assert_eq!(err.code(), "invalid_transition");
    }
}
