/// Attestation event verification
///
/// Verifiers never take an aggregate public key from the wire. The expected
/// key is rebuilt from the local roster and the event's signer set, which is
/// what stops a colluding minority from passing off an unrelated key.

use crate::crypto::{ActiveScheme, SignatureScheme};
use crate::roster::{Roster, RosterError};
use crate::types::{AttestationEvent, OperatorId, SignerSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerificationError {
    #[error("Event was aggregated under a different roster")]
    RosterMismatch,
    #[error("Unknown operator in signer set: {0}")]
    UnknownOperator(OperatorId),
    #[error("Empty signer set")]
    EmptySignerSet,
    #[error("Insufficient signers: need {needed}, got {got}")]
    InsufficientSigners { needed: usize, got: usize },
    #[error("Cannot reconstruct aggregate key: {0}")]
    KeyReconstruction(String),
    #[error("Signer and non-signer keys do not sum to the roster key")]
    RosterCrossCheckFailed,
    #[error("Aggregate signature does not verify")]
    InvalidSignature,
}

impl From<RosterError> for VerificationError {
    fn from(err: RosterError) -> Self {
        match err {
            RosterError::UnknownOperator(id) => VerificationError::UnknownOperator(id),
            other => VerificationError::KeyReconstruction(other.to_string()),
        }
    }
}

/// Checks events against a fixed roster
#[derive(Clone)]
pub struct EventVerifier {
    roster: Arc<Roster>,
}

impl EventVerifier {
    pub fn new(roster: Arc<Roster>) -> Self {
        Self { roster }
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    /// Full check; returns the number of signers on success
    pub fn check(&self, event: &AttestationEvent) -> Result<usize, VerificationError> {
        if event.roster_digest != self.roster.digest() {
            return Err(VerificationError::RosterMismatch);
        }

        let signers = self.roster.resolve_signers(&event.signers)?;
        if signers.is_empty() {
            return Err(VerificationError::EmptySignerSet);
        }
        let needed = self.roster.threshold();
        if signers.len() < needed {
            return Err(VerificationError::InsufficientSigners {
                needed,
                got: signers.len(),
            });
        }

        let aggregate_key = self.roster.aggregate_key_for(&signers)?;

        // apk(signers) + apk(non-signers) must give back the roster key
        if let SignerSet::NonSigners(non_signers) = &event.signers {
            if !non_signers.is_empty() {
                let complement_key = self.roster.aggregate_key_for(non_signers)?;
                let total = ActiveScheme::aggregate_public_keys(&[&aggregate_key, &complement_key])
                    .map_err(|e| VerificationError::KeyReconstruction(e.to_string()))?;
                if &total != self.roster.aggregate_public_key() {
                    return Err(VerificationError::RosterCrossCheckFailed);
                }
            }
        }

        let message = event.claim.canonical_message();
        if !ActiveScheme::verify(&message, &event.aggregate_signature, &aggregate_key) {
            return Err(VerificationError::InvalidSignature);
        }

        Ok(signers.len())
    }

    /// True only when the event fully verifies; failures are logged
    pub fn verify(&self, event: &AttestationEvent) -> bool {
        match self.check(event) {
            Ok(_) => true,
            Err(e) => {
                warn!("Rejected attestation for {}: {}", event.claim, e);
                false
            }
        }
    }
}

/// Verify `event` against `roster`
pub fn verify_event(event: &AttestationEvent, roster: &Arc<Roster>) -> bool {
    EventVerifier::new(Arc::clone(roster)).verify(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::{AggregationOutcome, ThresholdAggregator};
    use crate::crypto::{BLSSignature, BLS_SIGNATURE_SIZE};
    use crate::keystore::Keystore;
    use crate::roster::RosterEntry;
    use crate::types::{LivenessClaim, PartialAttestation};
    use std::collections::BTreeSet;

    const TS: u64 = 1_700_000_000;

    fn keystores() -> Vec<Keystore> {
        ["A", "B", "C", "D"]
            .iter()
            .enumerate()
            .map(|(i, id)| Keystore::from_ikm(*id, &[i as u8 + 10; 32]).unwrap())
            .collect()
    }

    fn roster_of(keys: &[Keystore], threshold: usize) -> Arc<Roster> {
        let entries = keys
            .iter()
            .enumerate()
            .map(|(i, k)| {
                RosterEntry::new(
                    k.operator_id().clone(),
                    k.public_key().clone(),
                    format!("http://127.0.0.1:{}", 5001 + i),
                )
            })
            .collect();
        Arc::new(Roster::new(entries, threshold).unwrap())
    }

    fn ids(names: &[&str]) -> BTreeSet<OperatorId> {
        names.iter().map(|n| OperatorId::from(*n)).collect()
    }

    /// B and C sign "A,down,TS"
    fn event_from_b_and_c(keys: &[Keystore], roster: &Arc<Roster>) -> AttestationEvent {
        let claim = LivenessClaim::down("A", TS);
        let partials: Vec<_> = keys[1..3]
            .iter()
            .map(|k| {
                PartialAttestation::new(
                    claim.clone(),
                    k.operator_id().clone(),
                    k.sign(&claim.canonical_message()).unwrap(),
                )
            })
            .collect();
        match ThresholdAggregator::new(Arc::clone(roster))
            .aggregate(&claim, &partials)
            .unwrap()
        {
            AggregationOutcome::Event(event) => event,
            other => panic!("expected event, got {:?}", other),
        }
    }

    #[test]
    fn test_genuine_event_verifies() {
        let keys = keystores();
        let roster = roster_of(&keys, 2);
        let event = event_from_b_and_c(&keys, &roster);

        let verifier = EventVerifier::new(Arc::clone(&roster));
        assert_eq!(verifier.check(&event), Ok(2));
        assert!(verify_event(&event, &roster));
    }

    #[test]
    fn test_signer_form_verifies_identically() {
        let keys = keystores();
        let roster = roster_of(&keys, 2);
        let mut event = event_from_b_and_c(&keys, &roster);
        event.signers = SignerSet::Signers(ids(&["B", "C"]));

        assert!(verify_event(&event, &roster));
    }

    #[test]
    fn test_roster_with_different_key_rejects() {
        let keys = keystores();
        let roster = roster_of(&keys, 2);
        let event = event_from_b_and_c(&keys, &roster);

        let mut other = keystores();
        other[3] = Keystore::from_ikm("D", &[77u8; 32]).unwrap();
        let other_roster = roster_of(&other, 2);

        let verifier = EventVerifier::new(other_roster);
        assert_eq!(verifier.check(&event), Err(VerificationError::RosterMismatch));
        assert!(!verifier.verify(&event));
    }

    #[test]
    fn test_threshold_rechecked_on_receipt() {
        let keys = keystores();
        let roster = roster_of(&keys, 2);
        let event = event_from_b_and_c(&keys, &roster);

        // Same event presented to a verifier whose roster demands 3
        let strict = roster_of(&keys, 3);
        let mut event_for_strict = event.clone();
        event_for_strict.roster_digest = strict.digest();

        assert_eq!(
            EventVerifier::new(strict).check(&event_for_strict),
            Err(VerificationError::InsufficientSigners { needed: 3, got: 2 })
        );
    }

    #[test]
    fn test_tampered_signature_rejected() {
        let keys = keystores();
        let roster = roster_of(&keys, 2);
        let event = event_from_b_and_c(&keys, &roster);
        let verifier = EventVerifier::new(Arc::clone(&roster));

        let original = event.aggregate_signature.to_bytes();
        for byte in [0usize, 1, 47, BLS_SIGNATURE_SIZE - 1] {
            for bit in [0u8, 3, 7] {
                let mut bytes = original;
                bytes[byte] ^= 1 << bit;
                // Flipped encodings either fail to decode or fail to verify
                if let Ok(sig) = BLSSignature::from_bytes(&bytes) {
                    let mut tampered = event.clone();
                    tampered.aggregate_signature = sig;
                    assert!(!verifier.verify(&tampered));
                }
            }
        }
    }

    #[test]
    fn test_tampered_claim_rejected() {
        let keys = keystores();
        let roster = roster_of(&keys, 2);
        let event = event_from_b_and_c(&keys, &roster);
        let verifier = EventVerifier::new(Arc::clone(&roster));

        let mut tampered = event.clone();
        tampered.claim.timestamp ^= 1;
        assert_eq!(verifier.check(&tampered), Err(VerificationError::InvalidSignature));

        let mut tampered = event.clone();
        tampered.claim.node_id = "B".to_string();
        assert!(!verifier.verify(&tampered));
    }

    #[test]
    fn test_tampered_signer_set_rejected() {
        let keys = keystores();
        let roster = roster_of(&keys, 2);
        let event = event_from_b_and_c(&keys, &roster);
        let verifier = EventVerifier::new(Arc::clone(&roster));

        // Claim D signed instead of C
        let mut swapped = event.clone();
        swapped.signers = SignerSet::NonSigners(ids(&["A", "C"]));
        assert_eq!(verifier.check(&swapped), Err(VerificationError::InvalidSignature));

        // Claim D signed too
        let mut inflated = event.clone();
        inflated.signers = SignerSet::NonSigners(ids(&["A"]));
        assert!(!verifier.verify(&inflated));

        // Drop a signer
        let mut deflated = event.clone();
        deflated.signers = SignerSet::Signers(ids(&["B"]));
        assert_eq!(
            verifier.check(&deflated),
            Err(VerificationError::InsufficientSigners { needed: 2, got: 1 })
        );

        let mut unknown = event.clone();
        unknown.signers = SignerSet::Signers(ids(&["B", "C", "Z"]));
        assert_eq!(
            verifier.check(&unknown),
            Err(VerificationError::UnknownOperator(OperatorId::from("Z")))
        );

        let mut empty = event.clone();
        empty.signers = SignerSet::Signers(BTreeSet::new());
        assert_eq!(verifier.check(&empty), Err(VerificationError::EmptySignerSet));

        let mut everyone_missing = event;
        everyone_missing.signers = SignerSet::NonSigners(ids(&["A", "B", "C", "D"]));
        assert_eq!(
            verifier.check(&everyone_missing),
            Err(VerificationError::EmptySignerSet)
        );
    }

    #[test]
    fn test_forged_aggregate_from_minority_rejected() {
        let keys = keystores();
        let roster = roster_of(&keys, 3);
        let claim = LivenessClaim::down("A", TS);

        // B alone signs and claims C and D signed too
        let signature = keys[1].sign(&claim.canonical_message()).unwrap();
        let forged = AttestationEvent::new(
            claim,
            signature,
            SignerSet::Signers(ids(&["B", "C", "D"])),
            roster.digest(),
        );

        assert_eq!(
            EventVerifier::new(roster).check(&forged),
            Err(VerificationError::InvalidSignature)
        );
    }
}
