/// In-process transport for unit tests

use crate::transport::{CheckNodeRequest, CheckNodeResponse, PeerTransport, Result, TransportError};
use async_trait::async_trait;
use attestation::{Keystore, LivenessClaim, PartialAttestation};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How a mocked operator answers `check_node`
#[derive(Clone)]
pub enum PeerBehavior {
    /// Sign the proposed claim, or a down claim at time 0
    Sign(Arc<Keystore>),
    /// Return this response verbatim
    Respond(CheckNodeResponse),
    /// Answer with HTTP 500
    Fail,
    /// Never answer
    Hang,
}

#[derive(Default)]
pub struct MockTransport {
    statuses: Mutex<HashMap<String, LivenessClaim>>,
    peers: Mutex<HashMap<String, PeerBehavior>>,
    calls: Mutex<Vec<String>>,
}

fn key(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_status(&self, url: &str, claim: LivenessClaim) {
        self.statuses.lock().unwrap().insert(key(url), claim);
    }

    pub fn set_peer(&self, url: &str, behavior: PeerBehavior) {
        self.peers.lock().unwrap().insert(key(url), behavior);
    }

    /// Operator URLs that received `check_node`
    pub fn check_node_calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PeerTransport for MockTransport {
    async fn get_status(&self, node_url: &str) -> Result<LivenessClaim> {
        self.statuses
            .lock()
            .unwrap()
            .get(&key(node_url))
            .cloned()
            .ok_or_else(|| TransportError::Request {
                url: node_url.to_string(),
                reason: "connection refused".into(),
            })
    }

    async fn check_node(
        &self,
        operator_url: &str,
        request: &CheckNodeRequest,
    ) -> Result<CheckNodeResponse> {
        self.calls.lock().unwrap().push(key(operator_url));
        let behavior = self.peers.lock().unwrap().get(&key(operator_url)).cloned();
        match behavior {
            Some(PeerBehavior::Sign(keystore)) => {
                let claim = request
                    .claim
                    .clone()
                    .unwrap_or_else(|| LivenessClaim::down(request.node_url.clone(), 0));
                let signature = keystore
                    .sign(&claim.canonical_message())
                    .map_err(|e| TransportError::Request {
                        url: operator_url.to_string(),
                        reason: e.to_string(),
                    })?;
                Ok(PartialAttestation::new(claim, keystore.operator_id().clone(), signature).into())
            }
            Some(PeerBehavior::Respond(response)) => Ok(response),
            Some(PeerBehavior::Fail) => Err(TransportError::Status {
                url: operator_url.to_string(),
                status: 500,
            }),
            Some(PeerBehavior::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(TransportError::Timeout {
                    url: operator_url.to_string(),
                })
            }
            None => Err(TransportError::Request {
                url: operator_url.to_string(),
                reason: "connection refused".into(),
            }),
        }
    }
}
