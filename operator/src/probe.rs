/// Liveness probe
///
/// Asks a node for its self-reported claim. Any failure to get a well-formed
/// answer in time is itself the observation: the node is down, now.

use crate::transport::PeerTransport;
use attestation::{LivenessClaim, Roster};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Current time in epoch seconds
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[derive(Clone)]
pub struct StatusProbe {
    transport: Arc<dyn PeerTransport>,
    roster: Arc<Roster>,
    timeout: Duration,
}

impl StatusProbe {
    pub fn new(transport: Arc<dyn PeerTransport>, roster: Arc<Roster>, timeout: Duration) -> Self {
        Self {
            transport,
            roster,
            timeout,
        }
    }

    /// Node id of the operator serving `node_url`, or the URL itself
    pub fn resolve_node_id(&self, node_url: &str) -> String {
        self.roster
            .operator_by_socket(node_url)
            .map(|id| id.to_string())
            .unwrap_or_else(|| node_url.to_string())
    }

    /// Never fails; unreachable nodes yield a locally synthesized down claim
    pub async fn probe(&self, node_url: &str) -> LivenessClaim {
        match tokio::time::timeout(self.timeout, self.transport.get_status(node_url)).await {
            Ok(Ok(claim)) => claim,
            Ok(Err(e)) => {
                debug!("Probe of {} failed: {}", node_url, e);
                LivenessClaim::down(self.resolve_node_id(node_url), unix_now())
            }
            Err(_) => {
                debug!("Probe of {} timed out after {:?}", node_url, self.timeout);
                LivenessClaim::down(self.resolve_node_id(node_url), unix_now())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;
    use crate::transport::{HttpTransport, TransportError};
    use attestation::{LivenessStatus, RosterEntry};
    use axum::{http::StatusCode, routing::get, Router};
    use testutil::{socket, TestCluster};

    fn probe_with(transport: Arc<MockTransport>, timeout: Duration) -> StatusProbe {
        let cluster = TestCluster::with_names(&["A", "B"], 1);
        StatusProbe::new(transport, cluster.roster, timeout)
    }

    #[tokio::test]
    async fn test_reachable_node_reports_its_claim() {
        let transport = Arc::new(MockTransport::new());
        transport.set_status(&socket(0), LivenessClaim::up("A", 42));
        let probe = probe_with(transport, Duration::from_secs(1));

        assert_eq!(probe.probe(&socket(0)).await, LivenessClaim::up("A", 42));
    }

    #[tokio::test]
    async fn test_unreachable_node_synthesizes_down() {
        let probe = probe_with(Arc::new(MockTransport::new()), Duration::from_secs(1));
        let before = unix_now();

        let claim = probe.probe(&format!("{}/", socket(1))).await;

        assert_eq!(claim.node_id, "B");
        assert_eq!(claim.status, LivenessStatus::Down);
        assert!(claim.timestamp >= before && claim.timestamp <= unix_now());
    }

    #[tokio::test]
    async fn test_unknown_url_used_as_node_id() {
        let probe = probe_with(Arc::new(MockTransport::new()), Duration::from_secs(1));
        let claim = probe.probe("http://10.0.0.7:9000").await;
        assert_eq!(claim.node_id, "http://10.0.0.7:9000");
        assert!(claim.is_down());
    }

    /// Serve `GET /status` with a fixed answer on an ephemeral port
    async fn spawn_status_stub(status: StatusCode, body: &'static str) -> String {
        let app = Router::new().route("/status", get(move || async move { (status, body) }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move { axum::serve(listener, app).await });
        url
    }

    #[tokio::test]
    async fn test_http_error_status_reads_as_down() {
        let url = spawn_status_stub(StatusCode::INTERNAL_SERVER_ERROR, "boom").await;
        let transport: Arc<dyn PeerTransport> =
            Arc::new(HttpTransport::new(Duration::from_secs(2)).unwrap());
        let probe = StatusProbe::new(
            Arc::clone(&transport),
            TestCluster::with_names(&["A"], 1).roster,
            Duration::from_secs(2),
        );

        assert!(matches!(
            transport.get_status(&url).await,
            Err(TransportError::Status { status: 500, .. })
        ));
        let claim = probe.probe(&url).await;
        assert!(claim.is_down());
        assert_eq!(claim.node_id, url);
    }

    #[tokio::test]
    async fn test_malformed_status_body_reads_as_down() {
        let url = spawn_status_stub(StatusCode::OK, r#"{"nodeId":1}"#).await;
        let transport: Arc<dyn PeerTransport> =
            Arc::new(HttpTransport::new(Duration::from_secs(2)).unwrap());
        let probe = StatusProbe::new(
            Arc::clone(&transport),
            TestCluster::with_names(&["A"], 1).roster,
            Duration::from_secs(2),
        );

        assert!(matches!(
            transport.get_status(&url).await,
            Err(TransportError::Malformed { .. })
        ));
        let claim = probe.probe(&url).await;
        assert!(claim.is_down());
        assert_eq!(claim.node_id, url);
    }

    #[test]
    fn test_resolution_ignores_trailing_slash() {
        let cluster = TestCluster::with_names(&["A"], 1);
        let entry: &RosterEntry = cluster.roster.entries().next().unwrap();
        let probe = StatusProbe::new(
            Arc::new(MockTransport::new()),
            Arc::clone(&cluster.roster),
            Duration::from_secs(1),
        );
        assert_eq!(probe.resolve_node_id(&format!("{}/", entry.socket)), "A");
    }
}
