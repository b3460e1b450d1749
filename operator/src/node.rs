/// Operator node
///
/// Wires the keystore, roster, transport, store and sequencer together and
/// runs the three operator tasks: the HTTP server, the downtime monitor
/// (aggregator role only) and the sequencer consumer.

use crate::collector::SignatureCollector;
use crate::config::{ConfigError, OperatorConfig, SequencerConfig};
use crate::consumer::EventConsumer;
use crate::monitor::DowntimeMonitor;
use crate::probe::StatusProbe;
use crate::responder::AttestationResponder;
use crate::sequencer::{HttpSequencer, MemorySequencer, SequencerClient, SequencerError};
use crate::server;
use crate::store::{AttestationStore, StoreError};
use crate::transport::{HttpTransport, PeerTransport, TransportError};
use attestation::{EventVerifier, Keystore, KeystoreError, Roster, ThresholdAggregator};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Keystore error: {0}")]
    Keystore(#[from] KeystoreError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Sequencer error: {0}")]
    Sequencer(#[from] SequencerError),
    #[error("Local key does not match roster entry for {0}")]
    KeyMismatch(String),
    #[error("Server error: {0}")]
    Server(#[from] std::io::Error),
    #[error("Task failed: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, NodeError>;

pub struct OperatorNode {
    config: OperatorConfig,
    roster: Arc<Roster>,
    keystore: Arc<Keystore>,
    store: Arc<AttestationStore>,
    transport: Arc<dyn PeerTransport>,
    sequencer: Arc<dyn SequencerClient>,
}

impl OperatorNode {
    /// Assemble a node from already-built parts
    pub fn new(
        config: OperatorConfig,
        keystore: Keystore,
        store: AttestationStore,
        transport: Arc<dyn PeerTransport>,
        sequencer: Arc<dyn SequencerClient>,
    ) -> Result<Self> {
        config.validate()?;
        let roster = Arc::new(config.roster()?);
        if roster.public_key(keystore.operator_id()) != Some(keystore.public_key()) {
            return Err(NodeError::KeyMismatch(keystore.operator_id().to_string()));
        }
        Ok(Self {
            config,
            roster,
            keystore: Arc::new(keystore),
            store: Arc::new(store),
            transport,
            sequencer,
        })
    }

    /// Load key, database and adapters named by `config`
    pub fn from_config(config: OperatorConfig) -> Result<Self> {
        let keystore = Keystore::from_file(config.operator_id(), &config.key_file)?;
        let store = AttestationStore::open(&config.db_path)?;
        let transport: Arc<dyn PeerTransport> =
            Arc::new(HttpTransport::new(config.request_timeout())?);
        let sequencer: Arc<dyn SequencerClient> = match &config.sequencer {
            SequencerConfig::Memory => Arc::new(MemorySequencer::new()),
            SequencerConfig::Http {
                base_url,
                app,
                poll_interval_ms,
            } => Arc::new(HttpSequencer::new(
                base_url,
                app,
                Duration::from_millis(*poll_interval_ms),
            )?),
        };
        Self::new(config, keystore, store, transport, sequencer)
    }

    pub fn roster(&self) -> &Arc<Roster> {
        &self.roster
    }

    pub fn store(&self) -> &Arc<AttestationStore> {
        &self.store
    }

    fn probe(&self) -> StatusProbe {
        StatusProbe::new(
            Arc::clone(&self.transport),
            Arc::clone(&self.roster),
            self.config.probe_timeout(),
        )
    }

    fn monitor(&self) -> DowntimeMonitor {
        DowntimeMonitor::new(
            self.keystore.operator_id().clone(),
            self.probe(),
            SignatureCollector::new(
                Arc::clone(&self.transport),
                Arc::clone(&self.roster),
                self.config.request_timeout(),
            ),
            ThresholdAggregator::new(Arc::clone(&self.roster)),
            Arc::clone(&self.sequencer),
            self.config.cycle_interval(),
        )
    }

    /// Bind the configured listen address and run
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let listener = TcpListener::bind(self.config.listen_addr).await?;
        self.run_with_listener(listener, shutdown).await
    }

    /// Run all tasks until `shutdown` flips or one of them fails
    pub async fn run_with_listener(
        self,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        info!(
            "Operator {} starting ({} operators, threshold {}, aggregator: {})",
            self.keystore.operator_id(),
            self.roster.len(),
            self.roster.threshold(),
            self.config.aggregator
        );

        let (stop_tx, stop_rx) = watch::channel(false);

        let responder = Arc::new(AttestationResponder::new(
            Arc::clone(&self.keystore),
            self.probe(),
            self.config.claim_tolerance(),
        ));
        let mut server_task = tokio::spawn(server::serve(
            listener,
            server::router(responder),
            stop_rx.clone(),
        ));

        let monitor_task: Option<JoinHandle<()>> = self
            .config
            .aggregator
            .then(|| tokio::spawn(self.monitor().run(stop_rx.clone())));

        let consumer = EventConsumer::new(
            EventVerifier::new(Arc::clone(&self.roster)),
            Arc::clone(&self.store),
            Arc::clone(&self.sequencer),
            self.config.retry_delay(),
        );

        let mut server_finished = false;
        let result = tokio::select! {
            result = consumer.run(stop_rx.clone()) => result.map_err(NodeError::from),
            result = &mut server_task => {
                server_finished = true;
                flatten(result)
            }
            _ = shutdown.changed() => Ok(()),
        };

        if let Err(e) = &result {
            error!("Operator task failed: {}", e);
        }
        let _ = stop_tx.send(true);

        if !server_finished {
            flatten(server_task.await)?;
        }
        if let Some(task) = monitor_task {
            task.await.map_err(|e| NodeError::Task(e.to_string()))?;
        }
        info!("Operator {} stopped", self.keystore.operator_id());
        result
    }
}

fn flatten(joined: std::result::Result<std::io::Result<()>, tokio::task::JoinError>) -> Result<()> {
    match joined {
        Ok(result) => Ok(result?),
        Err(e) => Err(NodeError::Task(e.to_string())),
    }
}
