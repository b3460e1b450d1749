/// Operator configuration
///
/// Loaded from a TOML file at startup. The roster section is validated into
/// an immutable `Roster` before any task starts.

use attestation::{BLSPublicKey, BLSSignature, OperatorId, Roster, RosterEntry, RosterError};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid public key for {id}: {reason}")]
    InvalidPublicKey { id: String, reason: String },
    #[error("Invalid proof of possession for {id}: {reason}")]
    InvalidProof { id: String, reason: String },
    #[error("Invalid roster: {0}")]
    Roster(#[from] RosterError),
    #[error("Operator {0} is not in the roster")]
    NotInRoster(String),
    #[error("Invalid setting {name}: {reason}")]
    InvalidSetting { name: &'static str, reason: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// One `[[roster]]` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterMember {
    pub id: String,
    /// Base URL of the operator's HTTP surface
    pub socket: String,
    /// Hex-encoded compressed G1 point
    pub public_key: String,
    /// Hex-encoded proof of possession
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pop: Option<String>,
}

/// Where finalized events are submitted and replayed from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SequencerConfig {
    /// In-process log; events never leave this operator
    #[default]
    Memory,
    Http {
        base_url: String,
        app: String,
        #[serde(default = "default_poll_interval_ms")]
        poll_interval_ms: u64,
    },
}

/// Full operator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorConfig {
    pub operator_id: String,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    pub key_file: PathBuf,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// Run the probe-and-collect cycle on this operator
    #[serde(default)]
    pub aggregator: bool,
    /// Quorum T. A roster member can gather at most `n - 1` attestations
    /// about itself, so operator targets need `T < n`.
    #[serde(default = "default_threshold")]
    pub threshold: usize,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_cycle_interval_secs")]
    pub cycle_interval_secs: u64,
    /// Max distance between a proposed and an observed down timestamp
    #[serde(default = "default_claim_tolerance_secs")]
    pub claim_tolerance_secs: u64,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default)]
    pub sequencer: SequencerConfig,
    #[serde(default)]
    pub roster: Vec<RosterMember>,
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 5001))
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data")
}

fn default_threshold() -> usize {
    2
}

fn default_probe_timeout_ms() -> u64 {
    3_000
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_cycle_interval_secs() -> u64 {
    30
}

fn default_claim_tolerance_secs() -> u64 {
    60
}

fn default_retry_delay_ms() -> u64 {
    1_000
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

impl OperatorConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: OperatorConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that do not need the roster to be built
    pub fn validate(&self) -> Result<()> {
        if self.operator_id.is_empty() {
            return Err(ConfigError::InvalidSetting {
                name: "operator_id",
                reason: "must not be empty".into(),
            });
        }
        for (name, value) in [
            ("probe_timeout_ms", self.probe_timeout_ms),
            ("request_timeout_ms", self.request_timeout_ms),
            ("cycle_interval_secs", self.cycle_interval_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidSetting {
                    name,
                    reason: "must be positive".into(),
                });
            }
        }
        if !self.roster.iter().any(|m| m.id == self.operator_id) {
            return Err(ConfigError::NotInRoster(self.operator_id.clone()));
        }
        Ok(())
    }

    pub fn operator_id(&self) -> OperatorId {
        OperatorId::new(self.operator_id.clone())
    }

    /// Decode every roster member and build the shared roster
    pub fn roster(&self) -> Result<Roster> {
        let mut entries = Vec::with_capacity(self.roster.len());
        for member in &self.roster {
            let public_key = BLSPublicKey::from_hex(&member.public_key).map_err(|e| {
                ConfigError::InvalidPublicKey {
                    id: member.id.clone(),
                    reason: e.to_string(),
                }
            })?;
            let mut entry = RosterEntry::new(member.id.as_str(), public_key, member.socket.as_str());
            if let Some(pop) = &member.pop {
                let bytes = hex::decode(pop.trim_start_matches("0x")).map_err(|e| {
                    ConfigError::InvalidProof {
                        id: member.id.clone(),
                        reason: e.to_string(),
                    }
                })?;
                let proof = BLSSignature::from_bytes(&bytes).map_err(|e| {
                    ConfigError::InvalidProof {
                        id: member.id.clone(),
                        reason: e.to_string(),
                    }
                })?;
                entry = entry.with_proof_of_possession(proof);
            }
            entries.push(entry);
        }
        let roster = Roster::new(entries, self.threshold)?;
        if roster.len() > 1 && roster.threshold() == roster.len() {
            warn!(
                "Threshold {} equals roster size; no operator can be attested down",
                roster.threshold()
            );
        }
        Ok(roster)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_secs)
    }

    pub fn claim_tolerance(&self) -> Duration {
        Duration::from_secs(self.claim_tolerance_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}
