//! Federation envelope layer
//!
//! The engine does not know the transport. It produces signed envelopes
//! for the relay mesh to carry, verifies and deduplicates whatever comes
//! back, and drops anything whose signature does not check out against a
//! known peer. Node announcements bootstrap peer keys; every envelope is
//! ledgered under `fed.*`.

use crate::error::{EngineError, Result};
use crate::identity::IdentityRegistry;
use crate::ledger::{canonical, related, Ledger};
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    NodeAnnouncement,
    BestPractice,
    DesignSuccess,
    StressSignature,
    EarlyWarning,
    ModelTemplate,
    EquivalenceUpdate,
}

impl MessageType {
    /// Namespaced wire kind code.
    pub fn kind_code(&self) -> u32 {
        match self {
            MessageType::NodeAnnouncement => 30100,
            MessageType::BestPractice => 30200,
            MessageType::DesignSuccess => 30300,
            MessageType::StressSignature => 30400,
            MessageType::EarlyWarning => 30500,
            MessageType::ModelTemplate => 30600,
            MessageType::EquivalenceUpdate => 30650,
        }
    }
}

/// Delivery scope of an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToScope {
    Federation,
    Regional,
    Node { id: String },
}

/// A signed federation message. The payload is opaque to the envelope
/// layer; subsystems interpret it after delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub id: String,
    pub message_type: MessageType,
    pub from_node_id: String,
    pub to_scope: ToScope,
    pub payload: Value,
    pub summary: String,
    pub created_at: DateTime<Utc>,
    pub signature: Signature,
}

impl Envelope {
    /// Bytes covered by the signature: everything except the signature
    /// itself, canonically serialized.
    fn signing_bytes(
        id: &str,
        message_type: MessageType,
        from_node_id: &str,
        to_scope: &ToScope,
        payload: &Value,
        summary: &str,
        created_at: DateTime<Utc>,
    ) -> Vec<u8> {
        let body = json!({
            "id": id,
            "kindCode": message_type.kind_code(),
            "fromNodeId": from_node_id,
            "toScope": serde_json::to_value(to_scope).unwrap_or(Value::Null),
            "payload": payload,
            "summary": summary,
            "createdAt": canonical::format_timestamp(created_at),
        });
        canonical::stable_serialize(&body).into_bytes()
    }

    /// Verify this envelope's signature against a verifying key.
    pub fn verify(&self, key: &VerifyingKey) -> Result<()> {
        let bytes = Self::signing_bytes(
            &self.id,
            self.message_type,
            &self.from_node_id,
            &self.to_scope,
            &self.payload,
            &self.summary,
            self.created_at,
        );
        key.verify(&bytes, &self.signature)
            .map_err(|e| EngineError::FederationRejected(format!("envelope signature invalid: {e}")))
    }
}

/// What a peer node advertised about itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeProfile {
    pub node_id: String,
    pub capabilities: Vec<String>,
    pub announced_at: DateTime<Utc>,
    pub verifying_key: VerifyingKey,
}

/// Envelope layer state for one node.
pub struct FederationLayer {
    node_id: String,
    peers: HashMap<String, NodeProfile>,
    seen_ids: HashSet<String>,
    inbox: Vec<Envelope>,
    outbox: Vec<Envelope>,
    last_announcement: Option<(Vec<String>, Envelope)>,
}

impl FederationLayer {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            peers: HashMap::new(),
            seen_ids: HashSet::new(),
            inbox: Vec::new(),
            outbox: Vec::new(),
            last_announcement: None,
        }
    }

    pub fn inbox(&self) -> &[Envelope] {
        &self.inbox
    }

    pub fn outbox(&self) -> &[Envelope] {
        &self.outbox
    }

    /// Look up a peer announced to this node.
    pub fn query_node(&self, node_id: &str) -> Result<&NodeProfile> {
        self.peers
            .get(node_id)
            .ok_or_else(|| EngineError::not_found("federation peer", node_id))
    }

    fn build_signed(
        identity: &IdentityRegistry,
        message_type: MessageType,
        to_scope: ToScope,
        payload: Value,
        summary: impl Into<String>,
    ) -> Envelope {
        let id = Uuid::new_v4().to_string();
        let created_at = Utc::now();
        let summary = summary.into();
        let bytes = Envelope::signing_bytes(
            &id,
            message_type,
            identity.node_id(),
            &to_scope,
            &payload,
            &summary,
            created_at,
        );
        let signature = identity.sign(&bytes);
        Envelope {
            id,
            message_type,
            from_node_id: identity.node_id().to_string(),
            to_scope,
            payload,
            summary,
            created_at,
            signature,
        }
    }

    /// Announce this node to the federation. Repeating the announcement
    /// with unchanged capabilities returns the previous envelope without a
    /// new ledger entry.
    pub fn announce_node(
        &mut self,
        ledger: &mut Ledger,
        identity: &IdentityRegistry,
        capabilities: Vec<String>,
    ) -> Result<Envelope> {
        if let Some((last_caps, envelope)) = &self.last_announcement {
            if *last_caps == capabilities {
                return Ok(envelope.clone());
            }
        }
        let payload = json!({
            "capabilities": capabilities,
            "verifyingKey": hex::encode(identity.node_verifying_key().to_bytes()),
        });
        let envelope = Self::build_signed(
            identity,
            MessageType::NodeAnnouncement,
            ToScope::Federation,
            payload,
            format!("node {} announcing", self.node_id),
        );
        ledger.append(
            "fed.node_announced",
            None,
            related(&[("envelope", &envelope.id)]),
            json!({"capabilities": capabilities}),
        )?;
        self.outbox.push(envelope.clone());
        self.last_announcement = Some((capabilities, envelope.clone()));
        Ok(envelope)
    }

    /// Sign and queue an outbound message.
    pub fn send_message(
        &mut self,
        ledger: &mut Ledger,
        identity: &IdentityRegistry,
        message_type: MessageType,
        to_scope: ToScope,
        payload: Value,
        summary: impl Into<String>,
    ) -> Result<Envelope> {
        let envelope = Self::build_signed(identity, message_type, to_scope, payload, summary);
        ledger.append(
            "fed.message_sent",
            None,
            related(&[("envelope", &envelope.id)]),
            json!({
                "kindCode": envelope.message_type.kind_code(),
                "summary": envelope.summary,
            }),
        )?;
        self.outbox.push(envelope.clone());
        Ok(envelope)
    }

    /// Process an inbound envelope: verify, deduplicate, deliver.
    ///
    /// Returns `Ok(true)` when the envelope was delivered to the inbox,
    /// `Ok(false)` when it was a duplicate. Signature failures and unknown
    /// senders reject without any state change.
    pub fn receive_envelope(&mut self, ledger: &mut Ledger, envelope: Envelope) -> Result<bool> {
        if self.seen_ids.contains(&envelope.id) {
            debug!(envelope_id = %envelope.id, "duplicate envelope dropped");
            return Ok(false);
        }

        let key = if envelope.message_type == MessageType::NodeAnnouncement {
            // Announcements carry their own key; trust on first use.
            let key_hex = envelope
                .payload
                .get("verifyingKey")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    EngineError::FederationRejected(
                        "node announcement lacks a verifying key".to_string(),
                    )
                })?;
            let raw: [u8; 32] = hex::decode(key_hex)
                .map_err(|e| EngineError::FederationRejected(format!("bad key encoding: {e}")))?
                .try_into()
                .map_err(|_| {
                    EngineError::FederationRejected("verifying key has wrong length".to_string())
                })?;
            VerifyingKey::from_bytes(&raw)
                .map_err(|e| EngineError::FederationRejected(format!("invalid key: {e}")))?
        } else {
            self.peers
                .get(&envelope.from_node_id)
                .map(|p| p.verifying_key)
                .ok_or_else(|| {
                    EngineError::FederationRejected(format!(
                        "no announced key for node {}",
                        envelope.from_node_id
                    ))
                })?
        };

        if let Err(e) = envelope.verify(&key) {
            warn!(envelope_id = %envelope.id, from = %envelope.from_node_id, "envelope rejected");
            return Err(e);
        }

        ledger.append(
            "fed.message_received",
            None,
            related(&[("envelope", &envelope.id), ("fromNode", &envelope.from_node_id)]),
            json!({"kindCode": envelope.message_type.kind_code()}),
        )?;

        if envelope.message_type == MessageType::NodeAnnouncement {
            let capabilities = envelope
                .payload
                .get("capabilities")
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default();
            self.peers.insert(
                envelope.from_node_id.clone(),
                NodeProfile {
                    node_id: envelope.from_node_id.clone(),
                    capabilities,
                    announced_at: envelope.created_at,
                    verifying_key: key,
                },
            );
        }

        self.seen_ids.insert(envelope.id.clone());
        self.inbox.push(envelope);
        Ok(true)
    }
}
