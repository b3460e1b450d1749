/// Threshold aggregation
///
/// Screens the partial attestations of one collection round, enforces the
/// quorum threshold and combines the surviving signatures into a single
/// attestation event.

use crate::crypto::{ActiveScheme, BLSError, BLSSignature, SignatureScheme};
use crate::roster::Roster;
use crate::types::{AttestationEvent, LivenessClaim, OperatorId, PartialAttestation, SignerSet};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Why a partial attestation was left out of the aggregate
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExclusionReason {
    /// Signer is not a roster member
    UnknownSigner,
    /// The target attested about itself
    TargetSelfAttestation,
    /// Signed claim is not byte-identical to the target claim
    ClaimMismatch,
    /// Signature does not verify under the signer's roster key
    InvalidSignature,
    /// A valid attestation from this signer was already counted
    Duplicate,
}

impl fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            ExclusionReason::UnknownSigner => "unknown signer",
            ExclusionReason::TargetSelfAttestation => "target attested about itself",
            ExclusionReason::ClaimMismatch => "claim mismatch",
            ExclusionReason::InvalidSignature => "invalid signature",
            ExclusionReason::Duplicate => "duplicate signer",
        };
        f.write_str(reason)
    }
}

/// Partial attestations split into usable signatures and exclusions
#[derive(Clone, Debug, Default)]
pub struct Screening {
    pub accepted: BTreeMap<OperatorId, BLSSignature>,
    pub excluded: Vec<(OperatorId, ExclusionReason)>,
}

/// Result of one aggregation attempt. Missing quorum is an expected outcome,
/// not an error.
#[derive(Clone, Debug)]
pub enum AggregationOutcome {
    Event(AttestationEvent),
    QuorumNotMet { needed: usize, got: usize },
}

impl AggregationOutcome {
    pub fn into_event(self) -> Option<AttestationEvent> {
        match self {
            AggregationOutcome::Event(event) => Some(event),
            AggregationOutcome::QuorumNotMet { .. } => None,
        }
    }
}

/// Combines partial signatures once the roster's threshold is met
#[derive(Clone)]
pub struct ThresholdAggregator {
    roster: Arc<Roster>,
}

impl ThresholdAggregator {
    pub fn new(roster: Arc<Roster>) -> Self {
        Self { roster }
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    /// Keep at most one valid attestation per roster member over exactly
    /// `target_claim`
    pub fn screen(&self, target_claim: &LivenessClaim, partials: &[PartialAttestation]) -> Screening {
        let message = target_claim.canonical_message();
        let mut screening = Screening::default();

        for partial in partials {
            let signer = &partial.signer_id;
            let reason = if screening.accepted.contains_key(signer) {
                Some(ExclusionReason::Duplicate)
            } else if signer.as_str() == target_claim.node_id {
                Some(ExclusionReason::TargetSelfAttestation)
            } else if partial.claim != *target_claim {
                Some(ExclusionReason::ClaimMismatch)
            } else {
                match self.roster.public_key(signer) {
                    None => Some(ExclusionReason::UnknownSigner),
                    Some(key) if !ActiveScheme::verify(&message, &partial.signature, key) => {
                        Some(ExclusionReason::InvalidSignature)
                    }
                    Some(_) => None,
                }
            };

            match reason {
                None => {
                    screening
                        .accepted
                        .insert(signer.clone(), partial.signature.clone());
                }
                Some(reason) => {
                    warn!(
                        "Excluding attestation from {} for {}: {}",
                        signer, target_claim, reason
                    );
                    screening.excluded.push((signer.clone(), reason));
                }
            }
        }

        screening
    }

    /// Aggregate the round's partial attestations for `target_claim`
    pub fn aggregate(
        &self,
        target_claim: &LivenessClaim,
        partials: &[PartialAttestation],
    ) -> Result<AggregationOutcome, BLSError> {
        let screening = self.screen(target_claim, partials);
        let needed = self.roster.threshold();
        let got = screening.accepted.len();

        if got < needed {
            info!(
                "Quorum not met for {}: {} of {} required signatures",
                target_claim, got, needed
            );
            return Ok(AggregationOutcome::QuorumNotMet { needed, got });
        }

        let signatures: Vec<&BLSSignature> = screening.accepted.values().collect();
        let aggregate_signature = ActiveScheme::aggregate(&signatures)?;

        let signers: BTreeSet<OperatorId> = screening.accepted.into_keys().collect();
        let non_signers = self.roster.complement(&signers);
        debug!(
            "Aggregated {} signatures for {} ({} non-signers)",
            got,
            target_claim,
            non_signers.len()
        );

        Ok(AggregationOutcome::Event(AttestationEvent::new(
            target_claim.clone(),
            aggregate_signature,
            SignerSet::NonSigners(non_signers),
            self.roster.digest(),
        )))
    }
}
