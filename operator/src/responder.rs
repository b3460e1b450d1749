/// Attestation responder
///
/// Serves `check_node` requests from the aggregator: re-probe the target,
/// pick the claim to sign and sign it with this operator's key.

use crate::probe::StatusProbe;
use attestation::{Keystore, KeystoreError, LivenessClaim, OperatorId, PartialAttestation};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum ResponderError {
    #[error("Signing failed: {0}")]
    Signing(#[from] KeystoreError),
}

pub struct AttestationResponder {
    keystore: Arc<Keystore>,
    probe: StatusProbe,
    claim_tolerance: Duration,
}

impl AttestationResponder {
    pub fn new(keystore: Arc<Keystore>, probe: StatusProbe, claim_tolerance: Duration) -> Self {
        Self {
            keystore,
            probe,
            claim_tolerance,
        }
    }

    pub fn operator_id(&self) -> &OperatorId {
        self.keystore.operator_id()
    }

    /// Probe `target_url` and sign either the proposed claim, when our own
    /// observation backs it, or what we observed
    pub async fn check_node(
        &self,
        target_url: &str,
        proposed: Option<&LivenessClaim>,
    ) -> Result<PartialAttestation, ResponderError> {
        let observed = self.probe.probe(target_url).await;

        let claim = match proposed {
            Some(proposed) if self.corroborates(&observed, proposed) => proposed.clone(),
            Some(proposed) => {
                debug!(
                    "Observed {} does not back proposed {}; signing observation",
                    observed, proposed
                );
                observed
            }
            None => observed,
        };

        let signature = self.keystore.sign(&claim.canonical_message())?;
        info!("Signed {} as {}", claim, self.operator_id());

        Ok(PartialAttestation::new(
            claim,
            self.operator_id().clone(),
            signature,
        ))
    }

    fn corroborates(&self, observed: &LivenessClaim, proposed: &LivenessClaim) -> bool {
        observed.is_down()
            && proposed.is_down()
            && observed.node_id == proposed.node_id
            && observed.timestamp.abs_diff(proposed.timestamp) <= self.claim_tolerance.as_secs()
    }
}
