/// Downtime Attestation Core
/// 
/// Threshold attestation that a peer node is down:
/// - BLS aggregate signatures over a canonical liveness claim
/// - Quorum-gated aggregation of partial attestations
/// - Roster-anchored verification (aggregate keys are always recomputed
///   from the local roster, never taken from the wire)

pub mod aggregator;
pub mod crypto;
pub mod keystore;
pub mod roster;
pub mod types;
pub mod verifier;

pub use aggregator::{AggregationOutcome, ExclusionReason, Screening, ThresholdAggregator};
pub use crypto::{BLSPublicKey, BLSSecretKey, BLSSignature, Hash};
pub use keystore::{Keystore, KeystoreError};
pub use roster::{Roster, RosterEntry, RosterError};
pub use types::{AttestationEvent, LivenessClaim, LivenessStatus, OperatorId, PartialAttestation, SignerSet};
pub use verifier::{verify_event, EventVerifier, VerificationError};
