/// Operator roster
///
/// The fixed, agreed mapping from operator id to public key, together with
/// the quorum threshold. Built once at startup, shared read-only.

use crate::crypto::{
    hash_data, ActiveScheme, BLSError, BLSPublicKey, BLSSignature, Hash, SignatureScheme,
};
use crate::types::{OperatorId, SignerSet};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RosterError {
    #[error("Roster is empty")]
    Empty,
    #[error("Invalid threshold {threshold} for roster of {size}")]
    InvalidThreshold { threshold: usize, size: usize },
    #[error("Duplicate operator: {0}")]
    DuplicateOperator(OperatorId),
    #[error("Public key of {0} is already registered")]
    DuplicatePublicKey(OperatorId),
    #[error("Socket {0} is registered twice")]
    DuplicateSocket(String),
    #[error("Invalid proof of possession for {0}")]
    InvalidProofOfPossession(OperatorId),
    #[error("Unknown operator: {0}")]
    UnknownOperator(OperatorId),
    #[error("Crypto error: {0}")]
    Crypto(#[from] BLSError),
}

pub type Result<T> = std::result::Result<T, RosterError>;

/// One registered operator
#[derive(Clone, Debug)]
pub struct RosterEntry {
    pub id: OperatorId,
    pub public_key: BLSPublicKey,
    /// Base URL of the operator's HTTP surface
    pub socket: String,
    pub proof_of_possession: Option<BLSSignature>,
}

impl RosterEntry {
    pub fn new(id: impl Into<OperatorId>, public_key: BLSPublicKey, socket: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            public_key,
            socket: normalize_socket(&socket.into()),
            proof_of_possession: None,
        }
    }

    pub fn with_proof_of_possession(mut self, proof: BLSSignature) -> Self {
        self.proof_of_possession = Some(proof);
        self
    }
}

/// Immutable operator roster
#[derive(Clone, Debug)]
pub struct Roster {
    entries: BTreeMap<OperatorId, RosterEntry>,
    threshold: usize,
    aggregate_key: BLSPublicKey,
    digest: Hash,
}

impl Roster {
    /// Validate and build a roster.
    ///
    /// `threshold == entries.len()` is accepted, but a target that is itself
    /// a roster member can then never be attested: its own attestation is
    /// always excluded, leaving at most `n - 1` signers.
    pub fn new(entries: Vec<RosterEntry>, threshold: usize) -> Result<Self> {
        if entries.is_empty() {
            return Err(RosterError::Empty);
        }
        if threshold == 0 || threshold > entries.len() {
            return Err(RosterError::InvalidThreshold {
                threshold,
                size: entries.len(),
            });
        }

        let mut map = BTreeMap::new();
        let mut keys = HashSet::new();
        let mut sockets = HashSet::new();
        for mut entry in entries {
            entry.socket = normalize_socket(&entry.socket);
            if map.contains_key(&entry.id) {
                return Err(RosterError::DuplicateOperator(entry.id));
            }
            if let Some(proof) = &entry.proof_of_possession {
                if !entry.public_key.verify_possession(proof) {
                    return Err(RosterError::InvalidProofOfPossession(entry.id));
                }
            }
            if !keys.insert(entry.public_key.to_bytes()) {
                return Err(RosterError::DuplicatePublicKey(entry.id));
            }
            if !sockets.insert(entry.socket.clone()) {
                return Err(RosterError::DuplicateSocket(entry.socket));
            }
            map.insert(entry.id.clone(), entry);
        }

        let all: Vec<&BLSPublicKey> = map.values().map(|e| &e.public_key).collect();
        let aggregate_key = ActiveScheme::aggregate_public_keys(&all)?;
        let digest = commitment(&map, threshold);

        Ok(Self {
            entries: map,
            threshold,
            aggregate_key,
            digest,
        })
    }

    /// Quorum threshold T
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &OperatorId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn entry(&self, id: &OperatorId) -> Option<&RosterEntry> {
        self.entries.get(id)
    }

    pub fn public_key(&self, id: &OperatorId) -> Option<&BLSPublicKey> {
        self.entries.get(id).map(|e| &e.public_key)
    }

    /// Entries in id order
    pub fn entries(&self) -> impl Iterator<Item = &RosterEntry> {
        self.entries.values()
    }

    pub fn operator_ids(&self) -> impl Iterator<Item = &OperatorId> {
        self.entries.keys()
    }

    /// Reverse lookup of an operator by its base URL
    pub fn operator_by_socket(&self, url: &str) -> Option<&OperatorId> {
        let url = normalize_socket(url);
        self.entries
            .values()
            .find(|e| e.socket == url)
            .map(|e| &e.id)
    }

    /// Sum of every roster key
    pub fn aggregate_public_key(&self) -> &BLSPublicKey {
        &self.aggregate_key
    }

    /// Commitment to ids, keys and threshold. Sockets are addressing only
    /// and are not committed to.
    pub fn digest(&self) -> Hash {
        self.digest
    }

    /// Roster members not in `signers`
    pub fn complement(&self, signers: &BTreeSet<OperatorId>) -> BTreeSet<OperatorId> {
        self.entries
            .keys()
            .filter(|id| !signers.contains(*id))
            .cloned()
            .collect()
    }

    /// Turn either signer-set representation into the explicit signer list.
    /// Every referenced id must be a roster member.
    pub fn resolve_signers(&self, set: &SignerSet) -> Result<BTreeSet<OperatorId>> {
        if let Some(unknown) = set.ids().iter().find(|id| !self.contains(id)) {
            return Err(RosterError::UnknownOperator(unknown.clone()));
        }
        Ok(match set {
            SignerSet::Signers(ids) => ids.clone(),
            SignerSet::NonSigners(ids) => self.complement(ids),
        })
    }

    /// Sum of the keys of `ids`
    pub fn aggregate_key_for<'a, I>(&self, ids: I) -> Result<BLSPublicKey>
    where
        I: IntoIterator<Item = &'a OperatorId>,
    {
        let mut keys = Vec::new();
        for id in ids {
            let key = self
                .public_key(id)
                .ok_or_else(|| RosterError::UnknownOperator(id.clone()))?;
            keys.push(key);
        }
        Ok(ActiveScheme::aggregate_public_keys(&keys)?)
    }
}

fn normalize_socket(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

fn commitment(entries: &BTreeMap<OperatorId, RosterEntry>, threshold: usize) -> Hash {
    let mut data = Vec::new();
    for (id, entry) in entries {
        data.extend_from_slice(&(id.as_str().len() as u32).to_le_bytes());
        data.extend_from_slice(id.as_str().as_bytes());
        data.extend_from_slice(&entry.public_key.to_bytes());
    }
    data.extend_from_slice(&(threshold as u64).to_le_bytes());
    hash_data(&data)
}
