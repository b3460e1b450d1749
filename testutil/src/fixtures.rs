/// Operator cluster fixture

use attestation::{Keystore, LivenessClaim, OperatorId, PartialAttestation, Roster, RosterEntry};
use std::sync::Arc;

use crate::generators::{operator_names, seeded_ikm};

/// Timestamp used by the canonical test scenario
pub const TIMESTAMP: u64 = 1_700_000_000;

/// Loopback socket of the `index`-th operator (0-based)
pub fn socket(index: usize) -> String {
    format!("http://127.0.0.1:{}", 5001 + index)
}

/// Keystores of every operator plus the shared roster
pub struct TestCluster {
    pub keystores: Vec<Keystore>,
    pub roster: Arc<Roster>,
}

impl TestCluster {
    /// Operators `operator_1_id`..`operator_n_id` with deterministic keys
    pub fn new(n: usize, threshold: usize) -> Self {
        Self::with_names(&operator_names(n), threshold)
    }

    pub fn with_names<S: AsRef<str>>(names: &[S], threshold: usize) -> Self {
        let keystores: Vec<Keystore> = names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                Keystore::from_ikm(name.as_ref(), &seeded_ikm(i as u64))
                    .expect("32-byte key material")
            })
            .collect();
        let roster = Arc::new(roster_for(&keystores, threshold));
        Self { keystores, roster }
    }

    pub fn id(&self, index: usize) -> OperatorId {
        self.keystores[index].operator_id().clone()
    }

    /// Genuine partial attestation of `claim` by operator `index`
    pub fn attest(&self, index: usize, claim: &LivenessClaim) -> PartialAttestation {
        let keystore = &self.keystores[index];
        PartialAttestation::new(
            claim.clone(),
            keystore.operator_id().clone(),
            keystore
                .sign(&claim.canonical_message())
                .expect("signing with a fixture key"),
        )
    }
}

/// Roster over `keystores`, socket `i` for keystore `i`
pub fn roster_for(keystores: &[Keystore], threshold: usize) -> Roster {
    let entries = keystores
        .iter()
        .enumerate()
        .map(|(i, k)| {
            RosterEntry::new(k.operator_id().clone(), k.public_key().clone(), socket(i))
                .with_proof_of_possession(k.proof_of_possession())
        })
        .collect();
    Roster::new(entries, threshold).expect("valid fixture roster")
}
