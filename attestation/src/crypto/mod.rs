/// Cryptography module for downtime attestation
/// 
/// Implements:
/// - BLS aggregate signatures (constant-size proofs over a shared message)
/// - BLAKE3 digests for roster commitments and event identifiers

pub mod bls;
pub mod hash;

pub use bls::{
    BLSError, BLSPublicKey, BLSSecretKey, BLSSignature, Bls12381,
    BLS_PUBLIC_KEY_SIZE, BLS_SECRET_KEY_SIZE, BLS_SIGNATURE_SIZE,
};
pub use hash::{hash_data, Hash, HashError, HASH_SIZE};

/// Capability interface of an aggregate signature scheme.
///
/// Exactly one implementation is compiled in; aggregate-key reconstruction in
/// the verifier is specific to it.
pub trait SignatureScheme {
    type SecretKey;
    type PublicKey;
    type Signature;
    type Error: std::error::Error;

    fn sign(secret_key: &Self::SecretKey, message: &[u8]) -> Self::Signature;

    fn aggregate(signatures: &[&Self::Signature]) -> Result<Self::Signature, Self::Error>;

    fn aggregate_public_keys(
        public_keys: &[&Self::PublicKey],
    ) -> Result<Self::PublicKey, Self::Error>;

    fn verify(message: &[u8], signature: &Self::Signature, public_key: &Self::PublicKey) -> bool;
}

/// The scheme this deployment signs and verifies with
pub type ActiveScheme = Bls12381;
