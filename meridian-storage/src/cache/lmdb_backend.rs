//! LMDB-backed durable tier.
//!
//! Uses the heed crate (Rust bindings for LMDB) as the overflow store that
//! caches push evicted entries into.
//!
//! # Cache Isolation
//!
//! Every row is keyed by a [`DurableKey`], so each cache's rows live
//! under their own prefix. Age and count cleanup for one cache never
//! touches another cache's rows.
//!
//! # Value Format
//!
//! `[written_at millis: i64 LE][serialized item]`

use std::path::Path;

use chrono::DateTime;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use meridian_core::{MeridianError, ObjectId, StorageError, Timestamp};

use super::durable_key::DurableKey;
use super::traits::{DurableBackend, DurableResult, DurableRow};

/// Width of the timestamp header in every stored value.
const TIMESTAMP_LEN: usize = 8;

/// Error type for LMDB durable-tier operations.
#[derive(Debug, thiserror::Error)]
pub enum DurableError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// A stored value is shorter than its timestamp header.
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    /// Key construction failed.
    #[error("Invalid key: {0}")]
    Key(#[from] StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<DurableError> for StorageError {
    fn from(e: DurableError) -> Self {
        match e {
            DurableError::EnvOpen(reason) | DurableError::DbOpen(reason) => StorageError::Open { reason },
            DurableError::Transaction(reason) => StorageError::Transaction { reason },
            DurableError::Corrupt(reason) => StorageError::Deserialization { reason },
            DurableError::Key(inner) => inner,
            DurableError::Io(io) => StorageError::Io {
                reason: io.to_string(),
            },
        }
    }
}

impl From<DurableError> for MeridianError {
    fn from(e: DurableError) -> Self {
        MeridianError::Storage(e.into())
    }
}

fn txn_error(e: heed::Error) -> DurableError {
    DurableError::Transaction(e.to_string())
}

/// One row as seen during a prefix scan.
struct ScannedRow {
    key: Vec<u8>,
    object_id: ObjectId,
    written_at: Timestamp,
}

/// LMDB durable backend shared by any number of caches.
///
/// # Example
///
/// ```ignore
/// use meridian_storage::LmdbDurableBackend;
///
/// let backend = Arc::new(LmdbDurableBackend::new("/var/cache/meridian", 256)?);
/// let points = ItemCache::new("points", CacheLimits::default()).with_backend(backend.clone());
/// ```
pub struct LmdbDurableBackend {
    env: Env,
    db: Database<Bytes, Bytes>,
}

impl LmdbDurableBackend {
    /// Create a new LMDB durable backend.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    /// - Database cannot be created
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, DurableError> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| DurableError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_error)?;

        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| DurableError::DbOpen(e.to_string()))?;

        wtxn.commit().map_err(txn_error)?;

        Ok(Self { env, db })
    }

    /// Number of rows stored for one cache.
    pub fn row_count(&self, cache_name: &str) -> Result<usize, DurableError> {
        Ok(self.scan_cache(cache_name)?.len())
    }

    /// Collect every row of one cache. The read transaction ends before
    /// this returns, so callers may open a write transaction next.
    fn scan_cache(&self, cache_name: &str) -> Result<Vec<ScannedRow>, DurableError> {
        let prefix = DurableKey::cache_prefix(cache_name)?;
        let rtxn = self.env.read_txn().map_err(txn_error)?;

        let mut rows = Vec::new();
        for result in self.db.iter(&rtxn).map_err(txn_error)? {
            let (key, value) = result.map_err(txn_error)?;
            if !key.starts_with(&prefix) {
                continue;
            }
            let Some(decoded) = DurableKey::decode(key) else {
                continue;
            };
            let (written_at, _) = split_value(value)?;
            rows.push(ScannedRow {
                key: key.to_vec(),
                object_id: decoded.object_id(),
                written_at,
            });
        }

        Ok(rows)
    }

    fn delete_keys(&self, keys: &[Vec<u8>]) -> Result<u64, DurableError> {
        if keys.is_empty() {
            return Ok(0);
        }

        let mut wtxn = self.env.write_txn().map_err(txn_error)?;

        let mut deleted = 0u64;
        for key in keys {
            if self.db.delete(&mut wtxn, key).map_err(txn_error)? {
                deleted += 1;
            }
        }

        wtxn.commit().map_err(txn_error)?;
        Ok(deleted)
    }

    fn get_row(&self, cache_name: &str, id: ObjectId) -> Result<Option<DurableRow>, DurableError> {
        let encoded_key = DurableKey::new(cache_name, id)?.encode();
        let rtxn = self.env.read_txn().map_err(txn_error)?;

        match self.db.get(&rtxn, &encoded_key).map_err(txn_error)? {
            Some(bytes) => {
                let (written_at, data) = split_value(bytes)?;
                Ok(Some(DurableRow {
                    data: data.to_vec(),
                    written_at,
                }))
            }
            None => Ok(None),
        }
    }

    fn put_row(&self, cache_name: &str, id: ObjectId, data: &[u8], written_at: Timestamp) -> Result<(), DurableError> {
        let encoded_key = DurableKey::new(cache_name, id)?.encode();

        let mut full_bytes = Vec::with_capacity(TIMESTAMP_LEN + data.len());
        full_bytes.extend_from_slice(&written_at.timestamp_millis().to_le_bytes());
        full_bytes.extend_from_slice(data);

        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        self.db
            .put(&mut wtxn, &encoded_key, &full_bytes)
            .map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)?;
        Ok(())
    }
}

fn split_value(bytes: &[u8]) -> Result<(Timestamp, &[u8]), DurableError> {
    if bytes.len() < TIMESTAMP_LEN {
        return Err(DurableError::Corrupt(format!(
            "value is {} bytes, shorter than its timestamp",
            bytes.len()
        )));
    }
    let (header, data) = bytes.split_at(TIMESTAMP_LEN);
    let mut millis = [0u8; TIMESTAMP_LEN];
    millis.copy_from_slice(header);
    let written_at = DateTime::from_timestamp_millis(i64::from_le_bytes(millis))
        .ok_or_else(|| DurableError::Corrupt("timestamp out of range".into()))?;
    Ok((written_at, data))
}

impl DurableBackend for LmdbDurableBackend {
    fn get(&self, cache_name: &str, id: ObjectId) -> DurableResult<Option<DurableRow>> {
        Ok(self.get_row(cache_name, id)?)
    }

    fn list_ids(&self, cache_name: &str) -> DurableResult<Vec<ObjectId>> {
        Ok(self
            .scan_cache(cache_name)?
            .into_iter()
            .map(|row| row.object_id)
            .collect())
    }

    fn upsert(&self, cache_name: &str, id: ObjectId, data: &[u8], written_at: Timestamp) -> DurableResult<()> {
        Ok(self.put_row(cache_name, id, data, written_at)?)
    }

    fn delete_older_than(&self, cache_name: &str, cutoff: Timestamp) -> DurableResult<u64> {
        let stale: Vec<Vec<u8>> = self
            .scan_cache(cache_name)?
            .into_iter()
            .filter(|row| row.written_at < cutoff)
            .map(|row| row.key)
            .collect();
        Ok(self.delete_keys(&stale)?)
    }

    fn delete_beyond_most_recent(&self, cache_name: &str, keep: usize) -> DurableResult<u64> {
        let mut rows = self.scan_cache(cache_name)?;
        if rows.len() <= keep {
            return Ok(0);
        }
        // Newest first; ties keep the higher id.
        rows.sort_by(|a, b| {
            b.written_at
                .cmp(&a.written_at)
                .then_with(|| b.object_id.cmp(&a.object_id))
        });
        let excess: Vec<Vec<u8>> = rows.into_iter().skip(keep).map(|row| row.key).collect();
        Ok(self.delete_keys(&excess)?)
    }
}
