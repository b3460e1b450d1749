/// Partial signature collection
///
/// Fans `check_node` out to every operator except the target and waits for
/// each answer or its timeout. Whatever did not come back well-formed and
/// from the operator that was asked counts as a non-responder.

use crate::transport::{CheckNodeRequest, PeerTransport};
use attestation::{LivenessClaim, OperatorId, PartialAttestation, Roster};
use futures::future::join_all;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Outcome of one collection round
#[derive(Debug, Default)]
pub struct CollectionResult {
    pub signatures: Vec<PartialAttestation>,
    pub non_responders: BTreeSet<OperatorId>,
}

#[derive(Clone)]
pub struct SignatureCollector {
    transport: Arc<dyn PeerTransport>,
    roster: Arc<Roster>,
    timeout: Duration,
}

impl SignatureCollector {
    pub fn new(transport: Arc<dyn PeerTransport>, roster: Arc<Roster>, timeout: Duration) -> Self {
        Self {
            transport,
            roster,
            timeout,
        }
    }

    pub async fn collect(
        &self,
        target_id: &str,
        target_url: &str,
        proposed: Option<&LivenessClaim>,
    ) -> CollectionResult {
        let request = CheckNodeRequest::new(target_url, proposed.cloned());
        let target_socket = target_url.trim_end_matches('/');

        let requests = self
            .roster
            .entries()
            .filter(|entry| entry.id.as_str() != target_id && entry.socket != target_socket)
            .map(|entry| {
                let request = &request;
                async move {
                    let answer = tokio::time::timeout(
                        self.timeout,
                        self.transport.check_node(&entry.socket, request),
                    )
                    .await;
                    (&entry.id, answer)
                }
            });

        let mut result = CollectionResult::default();
        for (operator, answer) in join_all(requests).await {
            match answer {
                Ok(Ok(response)) if &response.signer_id == operator => {
                    result.signatures.push(response.into_partial());
                }
                Ok(Ok(response)) => {
                    warn!(
                        "Operator {} answered as {}; counting as non-responder",
                        operator, response.signer_id
                    );
                    result.non_responders.insert(operator.clone());
                }
                Ok(Err(e)) => {
                    debug!("No attestation from {}: {}", operator, e);
                    result.non_responders.insert(operator.clone());
                }
                Err(_) => {
                    debug!("No attestation from {}: timed out after {:?}", operator, self.timeout);
                    result.non_responders.insert(operator.clone());
                }
            }
        }

        debug!(
            "Collected {} attestations for {} ({} non-responders)",
            result.signatures.len(),
            target_id,
            result.non_responders.len()
        );
        result
    }
}
