/// Downtime monitor
///
/// The aggregator role's periodic cycle. Each tick probes every other
/// operator in turn; a target observed down gets one collection round, and
/// a quorum of matching attestations is aggregated and submitted to the
/// sequencer.

use crate::collector::SignatureCollector;
use crate::probe::StatusProbe;
use crate::sequencer::{SequencerClient, SequencerError};
use attestation::crypto::BLSError;
use attestation::{AggregationOutcome, Hash, OperatorId, RosterEntry, ThresholdAggregator};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Aggregation failed: {0}")]
    Aggregation(#[from] BLSError),
    #[error("Submission failed: {0}")]
    Submission(#[from] SequencerError),
}

/// What one target's round ended with
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundOutcome {
    Up,
    QuorumNotMet { needed: usize, got: usize },
    Submitted(Hash),
}

pub struct DowntimeMonitor {
    operator_id: OperatorId,
    probe: StatusProbe,
    collector: SignatureCollector,
    aggregator: ThresholdAggregator,
    sequencer: Arc<dyn SequencerClient>,
    interval: Duration,
}

impl DowntimeMonitor {
    pub fn new(
        operator_id: OperatorId,
        probe: StatusProbe,
        collector: SignatureCollector,
        aggregator: ThresholdAggregator,
        sequencer: Arc<dyn SequencerClient>,
        interval: Duration,
    ) -> Self {
        Self {
            operator_id,
            probe,
            collector,
            aggregator,
            sequencer,
            interval,
        }
    }

    /// Probe one target and, if it is down, attest to it
    pub async fn check_target(&self, target: &RosterEntry) -> Result<RoundOutcome, MonitorError> {
        let claim = self.probe.probe(&target.socket).await;
        if !claim.is_down() {
            debug!("{} is up", target.id);
            return Ok(RoundOutcome::Up);
        }

        info!("{} observed down; collecting attestations for {}", target.id, claim);
        let collection = self
            .collector
            .collect(target.id.as_str(), &target.socket, Some(&claim))
            .await;

        match self.aggregator.aggregate(&claim, &collection.signatures)? {
            AggregationOutcome::QuorumNotMet { needed, got } => {
                Ok(RoundOutcome::QuorumNotMet { needed, got })
            }
            AggregationOutcome::Event(event) => {
                self.sequencer.submit(&event).await?;
                let digest = event.digest();
                info!("Submitted downtime attestation {} for {}", digest, event.claim);
                Ok(RoundOutcome::Submitted(digest))
            }
        }
    }

    /// One pass over every other operator; failed rounds are dropped
    pub async fn run_cycle(&self) -> Vec<(OperatorId, RoundOutcome)> {
        let mut outcomes = Vec::new();
        for target in self.aggregator.roster().entries() {
            if target.id == self.operator_id {
                continue;
            }
            match self.check_target(target).await {
                Ok(outcome) => outcomes.push((target.id.clone(), outcome)),
                Err(e) => warn!("Round for {} dropped: {}", target.id, e),
            }
        }
        outcomes
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("Downtime monitor started, cycle every {:?}", self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_cycle().await;
                }
                _ = shutdown.changed() => {
                    info!("Downtime monitor stopping");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockTransport, PeerBehavior};
    use crate::sequencer::MemorySequencer;
    use crate::transport::PeerTransport;
    use attestation::{EventVerifier, Keystore, LivenessClaim};
    use futures::StreamExt;
    use testutil::{seeded_ikm, socket, TestCluster};

    /// Monitor run by B over roster {A, B, C, D}
    fn setup(threshold: usize) -> (Arc<MockTransport>, TestCluster, MemorySequencer, DowntimeMonitor) {
        let cluster = TestCluster::with_names(&["A", "B", "C", "D"], threshold);
        let transport = Arc::new(MockTransport::new());
        let dyn_transport: Arc<dyn PeerTransport> = transport.clone();
        let sequencer = MemorySequencer::new();
        let monitor = DowntimeMonitor::new(
            OperatorId::from("B"),
            StatusProbe::new(
                Arc::clone(&dyn_transport),
                Arc::clone(&cluster.roster),
                Duration::from_millis(200),
            ),
            SignatureCollector::new(
                dyn_transport,
                Arc::clone(&cluster.roster),
                Duration::from_millis(200),
            ),
            ThresholdAggregator::new(Arc::clone(&cluster.roster)),
            Arc::new(sequencer.clone()),
            Duration::from_secs(30),
        );
        (transport, cluster, sequencer, monitor)
    }

    fn signer(name: &str, index: u64) -> PeerBehavior {
        PeerBehavior::Sign(Arc::new(Keystore::from_ikm(name, &seeded_ikm(index)).unwrap()))
    }

    fn entry<'a>(cluster: &'a TestCluster, id: &str) -> &'a RosterEntry {
        cluster.roster.entry(&OperatorId::from(id)).unwrap()
    }

    #[tokio::test]
    async fn test_up_target_needs_no_round() {
        let (transport, cluster, sequencer, monitor) = setup(2);
        transport.set_status(&socket(0), LivenessClaim::up("A", 1));

        let outcome = monitor.check_target(entry(&cluster, "A")).await.unwrap();

        assert_eq!(outcome, RoundOutcome::Up);
        assert!(transport.check_node_calls().is_empty());
        assert_eq!(sequencer.head().await, 0);
    }

    #[tokio::test]
    async fn test_down_target_attested_and_submitted() {
        let (transport, cluster, sequencer, monitor) = setup(2);
        transport.set_peer(&socket(1), signer("B", 1));
        transport.set_peer(&socket(2), signer("C", 2));
        transport.set_peer(&socket(3), PeerBehavior::Hang);

        let outcome = monitor.check_target(entry(&cluster, "A")).await.unwrap();

        let (event, offset) = sequencer.stream_since(0).next().await.unwrap().unwrap();
        assert_eq!(offset, 1);
        assert_eq!(outcome, RoundOutcome::Submitted(event.digest()));
        assert_eq!(event.claim.node_id, "A");
        assert_eq!(EventVerifier::new(Arc::clone(&cluster.roster)).check(&event), Ok(2));
    }

    #[tokio::test]
    async fn test_quorum_not_met_submits_nothing() {
        let (transport, cluster, sequencer, monitor) = setup(3);
        transport.set_peer(&socket(1), signer("B", 1));
        transport.set_peer(&socket(2), signer("C", 2));

        let outcome = monitor.check_target(entry(&cluster, "A")).await.unwrap();

        assert_eq!(outcome, RoundOutcome::QuorumNotMet { needed: 3, got: 2 });
        assert_eq!(sequencer.head().await, 0);
    }

    #[tokio::test]
    async fn test_cycle_skips_self() {
        let (transport, _cluster, _sequencer, monitor) = setup(2);
        for i in [0, 2, 3] {
            transport.set_status(&socket(i), LivenessClaim::up("x", 1));
        }
        // B's own socket has no status and would read as down

        let outcomes = monitor.run_cycle().await;

        let targets: Vec<_> = outcomes.iter().map(|(id, _)| id.as_str().to_string()).collect();
        assert_eq!(targets, vec!["A", "C", "D"]);
        assert!(outcomes.iter().all(|(_, o)| *o == RoundOutcome::Up));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (_transport, _cluster, _sequencer, monitor) = setup(2);
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(monitor.run(rx));

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
