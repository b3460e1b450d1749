/// Peer HTTP transport
///
/// Client side of the two peer calls: `GET /status` on a probed node and
/// `POST /check_node` on another operator. The wire structs here are shared
/// with the server so both ends agree on field names.

use async_trait::async_trait;
use attestation::{BLSSignature, LivenessClaim, LivenessStatus, OperatorId, PartialAttestation};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Request to {url} failed: {reason}")]
    Request { url: String, reason: String },
    #[error("Request to {url} timed out")]
    Timeout { url: String },
    #[error("{url} answered HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("Malformed response from {url}: {reason}")]
    Malformed { url: String, reason: String },
    #[error("Cannot build HTTP client: {0}")]
    Client(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Body of `POST /check_node`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckNodeRequest {
    pub node_url: String,
    /// Claim the aggregator would like co-signed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim: Option<LivenessClaim>,
}

impl CheckNodeRequest {
    pub fn new(node_url: impl Into<String>, claim: Option<LivenessClaim>) -> Self {
        Self {
            node_url: node_url.into(),
            claim,
        }
    }
}

/// Successful answer to `POST /check_node`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckNodeResponse {
    pub node_id: String,
    pub status: LivenessStatus,
    pub timestamp: u64,
    pub signature: BLSSignature,
    pub signer_id: OperatorId,
}

impl CheckNodeResponse {
    pub fn claim(&self) -> LivenessClaim {
        LivenessClaim::new(self.node_id.clone(), self.status, self.timestamp)
    }

    pub fn into_partial(self) -> PartialAttestation {
        let claim = self.claim();
        PartialAttestation::new(claim, self.signer_id, self.signature)
    }
}

impl From<PartialAttestation> for CheckNodeResponse {
    fn from(partial: PartialAttestation) -> Self {
        Self {
            node_id: partial.claim.node_id,
            status: partial.claim.status,
            timestamp: partial.claim.timestamp,
            signature: partial.signature,
            signer_id: partial.signer_id,
        }
    }
}

/// The calls operators make to each other
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// `GET {node_url}/status`
    async fn get_status(&self, node_url: &str) -> Result<LivenessClaim>;

    /// `POST {operator_url}/check_node`
    async fn check_node(
        &self,
        operator_url: &str,
        request: &CheckNodeRequest,
    ) -> Result<CheckNodeResponse>;
}

/// reqwest-backed transport
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Client(e.to_string()))?;
        Ok(Self { client })
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        url: &str,
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let body = response.bytes().await.map_err(|e| request_error(url, e))?;
        serde_json::from_slice(&body).map_err(|e| TransportError::Malformed {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }
}

fn endpoint(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path)
}

fn request_error(url: &str, err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout {
            url: url.to_string(),
        }
    } else {
        TransportError::Request {
            url: url.to_string(),
            reason: err.to_string(),
        }
    }
}

#[async_trait]
impl PeerTransport for HttpTransport {
    async fn get_status(&self, node_url: &str) -> Result<LivenessClaim> {
        let url = endpoint(node_url, "status");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| request_error(&url, e))?;
        Self::decode(&url, response).await
    }

    async fn check_node(
        &self,
        operator_url: &str,
        request: &CheckNodeRequest,
    ) -> Result<CheckNodeResponse> {
        let url = endpoint(operator_url, "check_node");
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| request_error(&url, e))?;
        Self::decode(&url, response).await
    }
}
