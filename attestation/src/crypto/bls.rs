/// BLS Aggregate Signature Implementation
///
/// Based on BLS12-381 in the minimal-public-key configuration:
/// - Public keys in G1 (48 bytes compressed)
/// - Signatures in G2 (96 bytes compressed)
/// - Proof-of-possession ciphersuite, so that signatures over one shared
///   message can be combined and checked against a summed public key

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use blst::min_pk::{
    AggregatePublicKey, AggregateSignature, PublicKey as BlstPublicKey,
    SecretKey as BlstSecretKey, Signature as BlstSignature,
};
use blst::BLST_ERROR;
use std::fmt;
use thiserror::Error;

use super::SignatureScheme;

pub const BLS_SIGNATURE_SIZE: usize = 96;
pub const BLS_PUBLIC_KEY_SIZE: usize = 48;
pub const BLS_SECRET_KEY_SIZE: usize = 32;

/// Domain separation tag for attestation signatures
pub const SIGNATURE_DST: &[u8] = b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_POP_";

/// Domain separation tag for proofs of possession
pub const POP_DST: &[u8] = b"BLS_POP_BLS12381G2_XMD:SHA-256_SSWU_RO_POP_";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BLSError {
    #[error("Invalid signature encoding")]
    InvalidSignature,
    #[error("Invalid key")]
    InvalidKey,
    #[error("Key material must be at least 32 bytes")]
    InsufficientKeyMaterial,
    #[error("Invalid encoding: {0}")]
    InvalidEncoding(String),
    #[error("Cannot aggregate an empty set")]
    EmptyAggregate,
}

/// BLS secret key wrapper
#[derive(Clone)]
pub struct BLSSecretKey {
    inner: BlstSecretKey,
}

impl BLSSecretKey {
    /// Generate a new random secret key
    pub fn generate() -> Result<Self, BLSError> {
        let mut ikm = [0u8; BLS_SECRET_KEY_SIZE];
        rand::Rng::fill(&mut rand::thread_rng(), &mut ikm);
        Self::from_ikm(&ikm)
    }

    /// Derive a key from input key material (at least 32 bytes)
    pub fn from_ikm(ikm: &[u8]) -> Result<Self, BLSError> {
        let inner =
            BlstSecretKey::key_gen(ikm, &[]).map_err(|_| BLSError::InsufficientKeyMaterial)?;
        Ok(Self { inner })
    }

    /// Create from raw scalar bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BLSError> {
        let inner = BlstSecretKey::from_bytes(bytes).map_err(|_| BLSError::InvalidKey)?;
        Ok(Self { inner })
    }

    pub fn to_bytes(&self) -> [u8; BLS_SECRET_KEY_SIZE] {
        self.inner.to_bytes()
    }

    /// Get the corresponding public key
    pub fn public_key(&self) -> BLSPublicKey {
        BLSPublicKey {
            inner: self.inner.sk_to_pk(),
        }
    }

    /// Sign a message under the attestation DST
    pub fn sign(&self, message: &[u8]) -> BLSSignature {
        BLSSignature {
            inner: self.inner.sign(message, SIGNATURE_DST, &[]),
        }
    }

    /// Sign our own compressed public key under the PoP DST
    pub fn prove_possession(&self) -> BLSSignature {
        let pk = self.public_key().to_bytes();
        BLSSignature {
            inner: self.inner.sign(&pk, POP_DST, &[]),
        }
    }
}

impl fmt::Debug for BLSSecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BLSSecretKey(<redacted>)")
    }
}

/// BLS public key wrapper (G1 point)
#[derive(Clone, PartialEq, Eq)]
pub struct BLSPublicKey {
    inner: BlstPublicKey,
}

impl BLSPublicKey {
    /// Decode and validate (rejects the identity and points outside the subgroup)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BLSError> {
        let inner = BlstPublicKey::key_validate(bytes).map_err(|_| BLSError::InvalidKey)?;
        Ok(Self { inner })
    }

    pub fn from_hex(s: &str) -> Result<Self, BLSError> {
        let bytes = hex::decode(s.trim_start_matches("0x"))
            .map_err(|e| BLSError::InvalidEncoding(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    /// Serialize to compressed bytes
    pub fn to_bytes(&self) -> [u8; BLS_PUBLIC_KEY_SIZE] {
        self.inner.compress()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Check a proof of possession produced by `BLSSecretKey::prove_possession`
    pub fn verify_possession(&self, proof: &BLSSignature) -> bool {
        let result = proof
            .inner
            .verify(true, &self.to_bytes(), POP_DST, &[], &self.inner, false);
        result == BLST_ERROR::BLST_SUCCESS
    }
}

impl fmt::Debug for BLSPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BLSPublicKey({})", &self.to_hex()[..16])
    }
}

/// BLS signature wrapper (constant 96 bytes compressed)
#[derive(Clone, PartialEq, Eq)]
pub struct BLSSignature {
    inner: BlstSignature,
}

impl BLSSignature {
    /// Create from compressed bytes. Subgroup membership is checked on verify.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BLSError> {
        let inner = BlstSignature::from_bytes(bytes).map_err(|_| BLSError::InvalidSignature)?;
        Ok(Self { inner })
    }

    pub fn from_base64(s: &str) -> Result<Self, BLSError> {
        let bytes = BASE64
            .decode(s)
            .map_err(|e| BLSError::InvalidEncoding(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    /// Serialize to bytes (always 96 bytes)
    pub fn to_bytes(&self) -> [u8; BLS_SIGNATURE_SIZE] {
        self.inner.compress()
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(self.to_bytes())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }
}

impl fmt::Debug for BLSSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BLSSignature({})", &self.to_hex()[..16])
    }
}

/// BLS12-381 aggregate signature scheme, proof-of-possession variant
#[derive(Clone, Copy, Debug, Default)]
pub struct Bls12381;

impl SignatureScheme for Bls12381 {
    type SecretKey = BLSSecretKey;
    type PublicKey = BLSPublicKey;
    type Signature = BLSSignature;
    type Error = BLSError;

    fn sign(secret_key: &BLSSecretKey, message: &[u8]) -> BLSSignature {
        secret_key.sign(message)
    }

    /// Group-operation sum of the signatures (order independent)
    fn aggregate(signatures: &[&BLSSignature]) -> Result<BLSSignature, BLSError> {
        if signatures.is_empty() {
            return Err(BLSError::EmptyAggregate);
        }
        let sigs: Vec<&BlstSignature> = signatures.iter().map(|s| &s.inner).collect();
        let combined = AggregateSignature::aggregate(&sigs, true)
            .map_err(|_| BLSError::InvalidSignature)?
            .to_signature();
        Ok(BLSSignature { inner: combined })
    }

    /// Group-operation sum of the public keys. Inputs are expected to be
    /// validated already (roster keys are validated on load).
    fn aggregate_public_keys(public_keys: &[&BLSPublicKey]) -> Result<BLSPublicKey, BLSError> {
        if public_keys.is_empty() {
            return Err(BLSError::EmptyAggregate);
        }
        let pks: Vec<&BlstPublicKey> = public_keys.iter().map(|pk| &pk.inner).collect();
        let combined = AggregatePublicKey::aggregate(&pks, false)
            .map_err(|_| BLSError::InvalidKey)?
            .to_public_key();
        Ok(BLSPublicKey { inner: combined })
    }

    fn verify(message: &[u8], signature: &BLSSignature, public_key: &BLSPublicKey) -> bool {
        let result = signature
            .inner
            .verify(true, message, SIGNATURE_DST, &[], &public_key.inner, false);
        result == BLST_ERROR::BLST_SUCCESS
    }
}

// Signatures travel as base64 in JSON and as raw bytes in binary encodings.
impl serde::Serialize for BLSSignature {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_base64())
        } else {
            serializer.serialize_bytes(&self.to_bytes())
        }
    }
}

impl<'de> serde::Deserialize<'de> for BLSSignature {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::{self, Visitor};

        struct BLSSignatureVisitor;

        impl<'de> Visitor<'de> for BLSSignatureVisitor {
            type Value = BLSSignature;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a base64 string or a byte array")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                BLSSignature::from_base64(v).map_err(de::Error::custom)
            }

            fn visit_bytes<E>(self, v: &[u8]) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                BLSSignature::from_bytes(v).map_err(de::Error::custom)
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: de::SeqAccess<'de>,
            {
                let mut bytes = Vec::new();
                while let Some(byte) = seq.next_element()? {
                    bytes.push(byte);
                }
                BLSSignature::from_bytes(&bytes).map_err(de::Error::custom)
            }
        }

        if deserializer.is_human_readable() {
            deserializer.deserialize_str(BLSSignatureVisitor)
        } else {
            deserializer.deserialize_bytes(BLSSignatureVisitor)
        }
    }
}

// Public keys are hex in JSON (the roster file format) and raw bytes otherwise.
impl serde::Serialize for BLSPublicKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_hex())
        } else {
            serializer.serialize_bytes(&self.to_bytes())
        }
    }
}

impl<'de> serde::Deserialize<'de> for BLSPublicKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::{self, Visitor};

        struct BLSPublicKeyVisitor;

        impl<'de> Visitor<'de> for BLSPublicKeyVisitor {
            type Value = BLSPublicKey;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a hex string or a byte array")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                BLSPublicKey::from_hex(v).map_err(de::Error::custom)
            }

            fn visit_bytes<E>(self, v: &[u8]) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                BLSPublicKey::from_bytes(v).map_err(de::Error::custom)
            }
        }

        if deserializer.is_human_readable() {
            deserializer.deserialize_str(BLSPublicKeyVisitor)
        } else {
            deserializer.deserialize_bytes(BLSPublicKeyVisitor)
        }
    }
}
