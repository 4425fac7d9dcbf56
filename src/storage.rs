/// Persistent Log
///
/// An ordered KV store indexed by fixed-width big-endian height, so
/// lexicographic key order equals numeric height order. Values are the
/// codec-encoded `BlockAppended` payload only; micro-blocks never reach
/// this layer. A thin handle over `Arc<DB>`, with atomic multi-key commits
/// via a single `WriteBatch`.

use crate::error::RepoError;
use crate::types::Height;
use byteorder::{BigEndian, ByteOrder};
use rocksdb::{IteratorMode, Options, WriteBatch, DB};
use std::path::Path;
use std::sync::Arc;

fn height_key(height: Height) -> [u8; 4] {
    let mut key = [0u8; 4];
    BigEndian::write_u32(&mut key, height);
    key
}

fn key_height(key: &[u8]) -> Height {
    BigEndian::read_u32(key)
}

/// Contract the repository core writes and reads against. Kept as a trait
/// so the repository and subscription engine are testable against an
/// in-memory fake without standing up RocksDB.
pub trait Log: Send + Sync + 'static {
    fn get(&self, height: Height) -> Result<Option<Vec<u8>>, RepoError>;
    fn put(&self, height: Height, bytes: &[u8]) -> Result<(), RepoError>;
    /// Forward range scan starting at `from`, yielding up to `limit` entries
    /// in ascending height order. Does not hold any lock of its own; the
    /// repository's shared lock bounds how long a caller may hold results
    /// before releasing it between batches.
    fn scan_from(&self, from: Height, limit: usize) -> Result<Vec<(Height, Vec<u8>)>, RepoError>;
    /// Deletes all persisted entries in `[from_inclusive, ..]`. Used by
    /// historical rollback to truncate orphaned heights.
    fn delete_from(&self, from_inclusive: Height) -> Result<(), RepoError>;
    /// Highest persisted height, or `None` if the log is empty.
    fn max_height(&self) -> Result<Option<Height>, RepoError>;
}

/// RocksDB-backed `Log`. A single column family holds the one key space
/// the design allows: 4-byte BE height -> encoded `BlockAppended`.
pub struct RocksLog {
    db: Arc<DB>,
}

impl RocksLog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RepoError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path)?;
        Ok(Self { db: Arc::new(db) })
    }

    #[cfg(test)]
    pub fn open_temp(dir: &tempfile::TempDir) -> Result<Self, RepoError> {
        Self::open(dir.path())
    }
}

impl Log for RocksLog {
    fn get(&self, height: Height) -> Result<Option<Vec<u8>>, RepoError> {
        Ok(self.db.get(height_key(height))?)
    }

    fn put(&self, height: Height, bytes: &[u8]) -> Result<(), RepoError> {
        let mut batch = WriteBatch::default();
        batch.put(height_key(height), bytes);
        self.db.write(batch)?;
        Ok(())
    }

    fn scan_from(&self, from: Height, limit: usize) -> Result<Vec<(Height, Vec<u8>)>, RepoError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let start = height_key(from);
        let mut out = Vec::with_capacity(limit);
        let iter = self
            .db
            .iterator(IteratorMode::From(&start, rocksdb::Direction::Forward));
        for item in iter.take(limit) {
            let (key, value) = item?;
            out.push((key_height(&key), value.to_vec()));
        }
        Ok(out)
    }

    fn delete_from(&self, from_inclusive: Height) -> Result<(), RepoError> {
        let Some(max) = self.max_height()? else {
            return Ok(());
        };
        if from_inclusive > max {
            return Ok(());
        }
        let mut batch = WriteBatch::default();
        for height in from_inclusive..=max {
            batch.delete(height_key(height));
        }
        self.db.write(batch)?;
        Ok(())
    }

    fn max_height(&self) -> Result<Option<Height>, RepoError> {
        let mut iter = self.db.iterator(IteratorMode::End);
        match iter.next() {
            Some(item) => {
                let (key, _) = item?;
                Ok(Some(key_height(&key)))
            }
            None => Ok(None),
        }
    }
}
