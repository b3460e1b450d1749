/// Operator keystore
///
/// Holds one operator's private signing share. The secret never leaves this
/// type: no wire type carries it and `Debug` does not print it.

use crate::crypto::{ActiveScheme, BLSError, BLSPublicKey, BLSSecretKey, BLSSignature, SignatureScheme};
use crate::types::OperatorId;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KeystoreError {
    #[error("Cannot read key file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Key file is not valid hex: {0}")]
    InvalidHex(String),
    #[error("Invalid secret key: {0}")]
    InvalidKey(#[from] BLSError),
    #[error("Signature failed its self-check against the local public key")]
    SelfCheckFailed,
}

pub type Result<T> = std::result::Result<T, KeystoreError>;

pub struct Keystore {
    operator_id: OperatorId,
    secret_key: BLSSecretKey,
    public_key: BLSPublicKey,
}

impl Keystore {
    pub fn new(operator_id: impl Into<OperatorId>, secret_key: BLSSecretKey) -> Self {
        let public_key = secret_key.public_key();
        Self {
            operator_id: operator_id.into(),
            secret_key,
            public_key,
        }
    }

    /// Fresh random key; for development deployments and tests
    pub fn generate(operator_id: impl Into<OperatorId>) -> Result<Self> {
        Ok(Self::new(operator_id, BLSSecretKey::generate()?))
    }

    /// Derive from input key material (at least 32 bytes)
    pub fn from_ikm(operator_id: impl Into<OperatorId>, ikm: &[u8]) -> Result<Self> {
        Ok(Self::new(operator_id, BLSSecretKey::from_ikm(ikm)?))
    }

    pub fn from_hex(operator_id: impl Into<OperatorId>, secret_hex: &str) -> Result<Self> {
        let bytes = hex::decode(secret_hex.trim().trim_start_matches("0x"))
            .map_err(|e| KeystoreError::InvalidHex(e.to_string()))?;
        Ok(Self::new(operator_id, BLSSecretKey::from_bytes(&bytes)?))
    }

    /// Load a key file holding the hex-encoded 32-byte secret scalar
    pub fn from_file(operator_id: impl Into<OperatorId>, path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| KeystoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_hex(operator_id, &contents)
    }

    /// Write the secret as hex; the counterpart of `from_file`
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        std::fs::write(path, hex::encode(self.secret_key.to_bytes())).map_err(|source| {
            KeystoreError::Io {
                path: path.to_path_buf(),
                source,
            }
        })
    }

    pub fn operator_id(&self) -> &OperatorId {
        &self.operator_id
    }

    pub fn public_key(&self) -> &BLSPublicKey {
        &self.public_key
    }

    pub fn proof_of_possession(&self) -> BLSSignature {
        self.secret_key.prove_possession()
    }

    /// Sign, then check the result against our own public key before
    /// releasing it
    pub fn sign(&self, message: &[u8]) -> Result<BLSSignature> {
        let signature = ActiveScheme::sign(&self.secret_key, message);
        if !ActiveScheme::verify(message, &signature, &self.public_key) {
            return Err(KeystoreError::SelfCheckFailed);
        }
        Ok(signature)
    }
}

impl fmt::Debug for Keystore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keystore")
            .field("operator_id", &self.operator_id)
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}
