/// Testing utilities for downtime attestation
/// 
/// Provides:
/// - Deterministic key material and operator names
/// - Proptest strategies for claims and signer subsets
/// - A ready-made operator cluster fixture

pub mod generators;
pub mod fixtures;

pub use generators::*;
pub use fixtures::*;
