/// Core attestation data structures
///
/// LivenessClaim, PartialAttestation, SignerSet and AttestationEvent, plus
/// the canonical message every signature is computed over.

use crate::crypto::{hash_data, BLSSignature, Hash};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Stable identifier of an operator, unique within a deployment
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperatorId(String);

impl OperatorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OperatorId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for OperatorId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Self-reported liveness of a node
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LivenessStatus {
    Up,
    Down,
}

impl LivenessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LivenessStatus::Up => "up",
            LivenessStatus::Down => "down",
        }
    }
}

impl fmt::Display for LivenessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node's liveness claim, as served by `GET /status`
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LivenessClaim {
    pub node_id: String,
    pub status: LivenessStatus,
    /// Epoch seconds
    pub timestamp: u64,
}

impl LivenessClaim {
    pub fn new(node_id: impl Into<String>, status: LivenessStatus, timestamp: u64) -> Self {
        Self {
            node_id: node_id.into(),
            status,
            timestamp,
        }
    }

    pub fn down(node_id: impl Into<String>, timestamp: u64) -> Self {
        Self::new(node_id, LivenessStatus::Down, timestamp)
    }

    pub fn up(node_id: impl Into<String>, timestamp: u64) -> Self {
        Self::new(node_id, LivenessStatus::Up, timestamp)
    }

    pub fn is_down(&self) -> bool {
        self.status == LivenessStatus::Down
    }

    /// `nodeId,status,timestamp`. Any change to this layout invalidates
    /// every signature ever produced.
    pub fn canonical_message(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl fmt::Display for LivenessClaim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.node_id, self.status, self.timestamp)
    }
}

/// One operator's signature over a claim
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialAttestation {
    pub claim: LivenessClaim,
    pub signer_id: OperatorId,
    pub signature: BLSSignature,
}

impl PartialAttestation {
    pub fn new(claim: LivenessClaim, signer_id: OperatorId, signature: BLSSignature) -> Self {
        Self {
            claim,
            signer_id,
            signature,
        }
    }
}

/// Who contributed to an aggregate, either listed directly or as the
/// complement relative to the full roster
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SignerSet {
    Signers(BTreeSet<OperatorId>),
    NonSigners(BTreeSet<OperatorId>),
}

impl SignerSet {
    pub fn ids(&self) -> &BTreeSet<OperatorId> {
        match self {
            SignerSet::Signers(ids) | SignerSet::NonSigners(ids) => ids,
        }
    }

    fn tag(&self) -> u8 {
        match self {
            SignerSet::Signers(_) => 0,
            SignerSet::NonSigners(_) => 1,
        }
    }
}

/// Aggregated downtime attestation, submitted to the sequencer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationEvent {
    pub claim: LivenessClaim,
    pub aggregate_signature: BLSSignature,
    pub signers: SignerSet,
    /// Commitment to the roster the signer set refers to
    pub roster_digest: Hash,
}

impl AttestationEvent {
    pub fn new(
        claim: LivenessClaim,
        aggregate_signature: BLSSignature,
        signers: SignerSet,
        roster_digest: Hash,
    ) -> Self {
        Self {
            claim,
            aggregate_signature,
            signers,
            roster_digest,
        }
    }

    /// Identity of the event, used to make re-delivery idempotent
    pub fn digest(&self) -> Hash {
        let mut data = Vec::new();
        let message = self.claim.canonical_message();
        data.extend_from_slice(&(message.len() as u32).to_le_bytes());
        data.extend_from_slice(&message);
        data.extend_from_slice(&self.aggregate_signature.to_bytes());
        data.push(self.signers.tag());
        for id in self.signers.ids() {
            data.extend_from_slice(&(id.as_str().len() as u32).to_le_bytes());
            data.extend_from_slice(id.as_str().as_bytes());
        }
        data.extend_from_slice(self.roster_digest.as_bytes());
        hash_data(&data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::BLSSecretKey;

    #[test]
    fn test_canonical_message_layout() {
        let claim = LivenessClaim::down("A", 1_700_000_000);
        assert_eq!(claim.canonical_message(), b"A,down,1700000000".to_vec());
        assert_eq!(
            LivenessClaim::up("node_1", 5).canonical_message(),
            b"node_1,up,5".to_vec()
        );
    }

    #[test]
    fn test_claim_wire_format() {
        let claim = LivenessClaim::down("node_1", 1_700_000_000);
        let json = serde_json::to_value(&claim).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"nodeId": "node_1", "status": "down", "timestamp": 1700000000u64})
        );

        let parsed: LivenessClaim =
            serde_json::from_str(r#"{"nodeId":"n","status":"up","timestamp":7}"#).unwrap();
        assert_eq!(parsed, LivenessClaim::up("n", 7));
    }

    #[test]
    fn test_malformed_claims_rejected() {
        for body in [
            r#"{"nodeId":"n","status":"sideways","timestamp":7}"#,
            r#"{"nodeId":"n","status":"up","timestamp":"7"}"#,
            r#"{"nodeId":"n","status":"up"}"#,
            r#"{"node_id":"n","status":"up","timestamp":7}"#,
            r#"{"nodeId":"n","status":"up","timestamp":-1}"#,
        ] {
            assert!(serde_json::from_str::<LivenessClaim>(body).is_err(), "{}", body);
        }
    }

    #[test]
    fn test_signer_set_wire_format() {
        let ids: BTreeSet<OperatorId> = ["A", "D"].into_iter().map(OperatorId::from).collect();
        let json = serde_json::to_value(SignerSet::NonSigners(ids.clone())).unwrap();
        assert_eq!(json, serde_json::json!({"nonSigners": ["A", "D"]}));

        let json = serde_json::to_value(SignerSet::Signers(ids)).unwrap();
        assert_eq!(json, serde_json::json!({"signers": ["A", "D"]}));
    }

    #[test]
    fn test_event_digest_tracks_every_field() {
        let sk = BLSSecretKey::from_ikm(&[9u8; 32]).unwrap();
        let claim = LivenessClaim::down("A", 1_700_000_000);
        let ids: BTreeSet<OperatorId> = ["A"].into_iter().map(OperatorId::from).collect();
        let event = AttestationEvent::new(
            claim.clone(),
            sk.sign(&claim.canonical_message()),
            SignerSet::NonSigners(ids.clone()),
            hash_data(b"roster"),
        );

        assert_eq!(event.digest(), event.clone().digest());

        let mut other = event.clone();
        other.signers = SignerSet::Signers(ids);
        assert_ne!(event.digest(), other.digest());

        let mut other = event.clone();
        other.claim.timestamp += 1;
        assert_ne!(event.digest(), other.digest());

        let mut other = event.clone();
        other.roster_digest = hash_data(b"another roster");
        assert_ne!(event.digest(), other.digest());
    }

    #[test]
    fn test_event_json_and_binary_encodings() {
        let sk = BLSSecretKey::from_ikm(&[3u8; 32]).unwrap();
        let claim = LivenessClaim::down("A", 1_700_000_000);
        let event = AttestationEvent::new(
            claim.clone(),
            sk.sign(&claim.canonical_message()),
            SignerSet::NonSigners(BTreeSet::new()),
            hash_data(b"roster"),
        );

        let json = serde_json::to_value(&event).unwrap();
        assert!(json["aggregateSignature"].is_string());
        assert!(json["rosterDigest"].is_string());
        let back: AttestationEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);

        let bin = bincode::serialize(&event).unwrap();
        let back: AttestationEvent = bincode::deserialize(&bin).unwrap();
        assert_eq!(back.digest(), event.digest());
    }
}
