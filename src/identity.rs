//! Identity and weighting service
//!
//! The engine does not mint identities; it consumes them. This module keeps
//! the node's signing key, the directory of known members with their
//! governance base weights, and the verifying keys used to check federation
//! envelopes and certifier signatures.

use crate::error::{EngineError, Result};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Upper bound on governance vote weight.
pub const W_MAX: f64 = 3.0;

/// A member known to this node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub id: String,
    pub display_name: String,
    /// Governance base weight, clamped to `[0, W_MAX]` on registration.
    pub weight: f64,
    pub verifying_key: Option<VerifyingKey>,
}

/// Node identity plus member directory.
pub struct IdentityRegistry {
    node_id: String,
    signing_key: SigningKey,
    members: HashMap<String, Member>,
}

impl IdentityRegistry {
    /// Create a registry with a freshly generated node key.
    pub fn new(node_id: impl Into<String>) -> Self {
        let mut csprng = OsRng;
        Self {
            node_id: node_id.into(),
            signing_key: SigningKey::generate(&mut csprng),
            members: HashMap::new(),
        }
    }

    /// Create a registry around an existing node key.
    pub fn with_key(node_id: impl Into<String>, signing_key: SigningKey) -> Self {
        Self {
            node_id: node_id.into(),
            signing_key,
            members: HashMap::new(),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn node_verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Register or update a member. The declared weight is clamped to
    /// `[0, W_MAX]`.
    pub fn register_member(
        &mut self,
        id: impl Into<String>,
        display_name: impl Into<String>,
        weight: f64,
        verifying_key: Option<VerifyingKey>,
    ) -> &Member {
        let id = id.into();
        let member = Member {
            id: id.clone(),
            display_name: display_name.into(),
            weight: weight.clamp(0.0, W_MAX),
            verifying_key,
        };
        self.members.insert(id.clone(), member);
        &self.members[&id]
    }

    pub fn member(&self, id: &str) -> Option<&Member> {
        self.members.get(id)
    }

    /// Governance weight for a participant. Unknown participants weigh 1.0.
    pub fn participant_weight(&self, participant_id: &str) -> f64 {
        self.members
            .get(participant_id)
            .map(|m| m.weight)
            .unwrap_or(1.0)
    }

    /// Verifying key for a known member, for checking detached signatures.
    pub fn verifier_public_key(&self, member_id: &str) -> Result<VerifyingKey> {
        self.members
            .get(member_id)
            .and_then(|m| m.verifying_key)
            .ok_or_else(|| EngineError::not_found("member verifying key", member_id))
    }

    /// Sign bytes with the node identity key.
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }

    /// Verify a detached signature against a known member's key. A signer
    /// that does not resolve to a known member id is rejected.
    pub fn verify_member_signature(
        &self,
        member_id: &str,
        message: &[u8],
        signature: &Signature,
    ) -> Result<()> {
        let key = self.verifier_public_key(member_id)?;
        key.verify(message, signature)
            .map_err(|e| EngineError::FederationRejected(format!("bad signature: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_participant_weight_defaults_to_one() {
        let registry = IdentityRegistry::new("node-a");
        assert_eq!(registry.participant_weight("stranger"), 1.0);
    }

    #[test]
    fn test_registered_weight_is_clamped() {
        let mut registry = IdentityRegistry::new("node-a");
        registry.register_member("m1", "Ada", 99.0, None);
        assert_eq!(registry.participant_weight("m1"), W_MAX);
        registry.register_member("m2", "Ben", -1.0, None);
        assert_eq!(registry.participant_weight("m2"), 0.0);
    }

    #[test]
    fn test_member_signature_round_trip() {
        let mut registry = IdentityRegistry::new("node-a");
        let mut csprng = OsRng;
        let member_key = SigningKey::generate(&mut csprng);
        registry.register_member("m1", "Ada", 1.0, Some(member_key.verifying_key()));

        let sig = member_key.sign(b"certify version v-1");
        assert!(registry
            .verify_member_signature("m1", b"certify version v-1", &sig)
            .is_ok());
        assert!(registry
            .verify_member_signature("m1", b"certify version v-2", &sig)
            .is_err());
    }

    #[test]
    fn test_unknown_signer_is_rejected() {
        let registry = IdentityRegistry::new("node-a");
        let mut csprng = OsRng;
        let key = SigningKey::generate(&mut csprng);
        let sig = key.sign(b"anything");
        let err = registry
            .verify_member_signature("ghost", b"anything", &sig)
            .unwrap_err();
        assert_eq!(err.code(), "not_found");
    }
}
