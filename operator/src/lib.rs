/// Downtime Attestation Operator
///
/// Everything an operator process runs around the attestation core:
/// - HTTP surface (`/status`, `/check_node`) and the matching client
/// - Probe, responder and signature collection
/// - Periodic downtime monitor for the aggregator role
/// - Sequencer adapters and the verifying consumer with its RocksDB store

pub mod collector;
pub mod config;
pub mod consumer;
pub mod monitor;
pub mod node;
pub mod probe;
pub mod responder;
pub mod sequencer;
pub mod server;
pub mod store;
pub mod transport;

#[cfg(test)]
mod mock;

pub use collector::{CollectionResult, SignatureCollector};
pub use config::{ConfigError, OperatorConfig, RosterMember, SequencerConfig};
pub use consumer::{Disposition, EventConsumer};
pub use monitor::{DowntimeMonitor, MonitorError, RoundOutcome};
pub use node::{NodeError, OperatorNode};
pub use probe::StatusProbe;
pub use responder::{AttestationResponder, ResponderError};
pub use sequencer::{EventStream, HttpSequencer, MemorySequencer, SequencerClient, SequencerError};
pub use store::{AttestationStore, StoreError};
pub use transport::{CheckNodeRequest, CheckNodeResponse, HttpTransport, PeerTransport, TransportError};
