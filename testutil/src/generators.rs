/// Test data generators

use proptest::prelude::*;
use rand::{RngCore, SeedableRng};
use rand::rngs::StdRng;

/// Deterministic 32-byte key material for operator `index`
pub fn seeded_ikm(index: u64) -> [u8; 32] {
    let mut rng = StdRng::seed_from_u64(index);
    let mut ikm = [0u8; 32];
    rng.fill_bytes(&mut ikm);
    ikm
}

/// `operator_1_id`, `operator_2_id`, ...
pub fn operator_names(n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("operator_{}_id", i)).collect()
}

/// Plausible epoch-second timestamps
pub fn timestamp_strategy() -> impl Strategy<Value = u64> {
    1_600_000_000u64..2_000_000_000u64
}

/// Node ids without the claim separator
pub fn node_id_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,15}"
}

/// Membership mask over `n` operators
pub fn subset_strategy(n: usize) -> impl Strategy<Value = Vec<bool>> {
    proptest::collection::vec(any::<bool>(), n)
}
