/// Attestation store using RocksDB
///
/// Keeps every accepted attestation event, keyed by its digest, and the
/// sequencer offset this operator has processed up to. Offsets only move
/// forward; recording a known event again changes nothing.

use attestation::{AttestationEvent, Hash};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, DB};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rocksdb::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Column family names
const CF_ATTESTATIONS: &str = "attestations";
const CF_METADATA: &str = "metadata";

/// Metadata keys
const KEY_LAST_OFFSET: &[u8] = b"last_offset";

pub struct AttestationStore {
    db: Arc<DB>,
    // Keeps a temporary database directory alive
    _temp_dir: Option<TempDir>,
}

impl AttestationStore {
    /// Open or create the store at `path`
    pub fn open(path: &Path) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cfs = vec![
            ColumnFamilyDescriptor::new(CF_ATTESTATIONS, Options::default()),
            ColumnFamilyDescriptor::new(CF_METADATA, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&opts, path, cfs)?;
        Ok(Self {
            db: Arc::new(db),
            _temp_dir: None,
        })
    }

    /// Store in a fresh temporary directory, removed on drop
    pub fn new_temp() -> Result<Self> {
        let temp_dir = tempfile::tempdir().map_err(|e| StoreError::InvalidData(e.to_string()))?;
        let mut store = Self::open(temp_dir.path())?;
        store._temp_dir = Some(temp_dir);
        Ok(store)
    }

    /// Record an accepted event delivered at `offset`. Returns false when
    /// the event was already known.
    pub fn record(&self, offset: u64, event: &AttestationEvent) -> Result<bool> {
        let digest = event.digest();
        let cf_attestations = self.get_cf(CF_ATTESTATIONS)?;
        let is_new = self.db.get_cf(cf_attestations, digest.as_bytes())?.is_none();

        let mut batch = WriteBatch::default();
        if is_new {
            let bytes = bincode::serialize(event)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            batch.put_cf(cf_attestations, digest.as_bytes(), &bytes);
        }
        if offset > self.last_offset()? {
            batch.put_cf(self.get_cf(CF_METADATA)?, KEY_LAST_OFFSET, offset.to_le_bytes());
        }
        if !batch.is_empty() {
            self.db.write(batch)?;
        }

        debug!(
            "Recorded {} at offset {} (new: {})",
            digest, offset, is_new
        );
        Ok(is_new)
    }

    /// Move the processed offset forward without recording anything
    pub fn advance_offset(&self, offset: u64) -> Result<()> {
        if offset > self.last_offset()? {
            self.db
                .put_cf(self.get_cf(CF_METADATA)?, KEY_LAST_OFFSET, offset.to_le_bytes())?;
        }
        Ok(())
    }

    /// Highest processed offset; 0 before anything was processed
    pub fn last_offset(&self) -> Result<u64> {
        let cf_metadata = self.get_cf(CF_METADATA)?;

        match self.db.get_cf(cf_metadata, KEY_LAST_OFFSET)? {
            Some(bytes) => {
                let bytes: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| StoreError::InvalidData("Invalid offset bytes".into()))?;
                Ok(u64::from_le_bytes(bytes))
            }
            None => Ok(0),
        }
    }

    pub fn get(&self, digest: &Hash) -> Result<Option<AttestationEvent>> {
        let cf_attestations = self.get_cf(CF_ATTESTATIONS)?;

        match self.db.get_cf(cf_attestations, digest.as_bytes())? {
            Some(bytes) => {
                let event = bincode::deserialize(&bytes)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                Ok(Some(event))
            }
            None => Ok(None),
        }
    }

    pub fn contains(&self, digest: &Hash) -> Result<bool> {
        let cf_attestations = self.get_cf(CF_ATTESTATIONS)?;
        Ok(self.db.get_cf(cf_attestations, digest.as_bytes())?.is_some())
    }

    /// Number of stored events
    pub fn count(&self) -> Result<usize> {
        let cf_attestations = self.get_cf(CF_ATTESTATIONS)?;
        let mut count = 0;
        for item in self.db.iterator_cf(cf_attestations, IteratorMode::Start) {
            item?;
            count += 1;
        }
        Ok(count)
    }

    fn get_cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::InvalidData(format!("Column family not found: {}", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attestation::{LivenessClaim, ThresholdAggregator};
    use testutil::{TestCluster, TIMESTAMP};

    fn event(timestamp: u64) -> AttestationEvent {
        let cluster = TestCluster::new(3, 2);
        let claim = LivenessClaim::down("operator_1_id", timestamp);
        let partials: Vec<_> = (1..3).map(|i| cluster.attest(i, &claim)).collect();
        ThresholdAggregator::new(Arc::clone(&cluster.roster))
            .aggregate(&claim, &partials)
            .unwrap()
            .into_event()
            .unwrap()
    }

    #[test]
    fn test_store_creation() {
        let store = AttestationStore::new_temp().unwrap();
        assert_eq!(store.last_offset().unwrap(), 0);
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_record_and_retrieve() {
        let store = AttestationStore::new_temp().unwrap();
        let event = event(TIMESTAMP);

        assert!(store.record(1, &event).unwrap());

        assert_eq!(store.get(&event.digest()).unwrap(), Some(event.clone()));
        assert!(store.contains(&event.digest()).unwrap());
        assert_eq!(store.last_offset().unwrap(), 1);
    }

    #[test]
    fn test_rerecording_is_a_no_op() {
        let store = AttestationStore::new_temp().unwrap();
        let event = event(TIMESTAMP);

        assert!(store.record(4, &event).unwrap());
        assert!(!store.record(4, &event).unwrap());

        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(store.last_offset().unwrap(), 4);
    }

    #[test]
    fn test_offset_never_moves_backwards() {
        let store = AttestationStore::new_temp().unwrap();

        store.record(5, &event(TIMESTAMP)).unwrap();
        store.record(3, &event(TIMESTAMP + 1)).unwrap();
        store.advance_offset(2).unwrap();
        assert_eq!(store.last_offset().unwrap(), 5);

        store.advance_offset(9).unwrap();
        assert_eq!(store.last_offset().unwrap(), 9);
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn test_missing_event() {
        let store = AttestationStore::new_temp().unwrap();
        assert!(store.get(&Hash::new([7u8; 32])).unwrap().is_none());
    }

    #[test]
    fn test_store_persistence() {
        let temp_dir = tempfile::tempdir().unwrap();
        let event = event(TIMESTAMP);

        {
            let store = AttestationStore::open(temp_dir.path()).unwrap();
            store.record(7, &event).unwrap();
        }

        let store = AttestationStore::open(temp_dir.path()).unwrap();
        assert_eq!(store.last_offset().unwrap(), 7);
        assert_eq!(store.get(&event.digest()).unwrap(), Some(event));
    }
}
