/// Typed error surface for the updates repository.
///
/// The write path, read path, and subscription engine all report failures
/// through this single enum so callers can match on failure kind instead of
/// parsing a message.

use crate::types::{BlockId, Height};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepoError {
    /// A write violated the height/parent ordering preconditions.
    #[error("out of order write: expected height {expected:?}, got {got}")]
    OutOfOrder { expected: Option<Height>, got: Height },

    /// `appendMicroBlock` was called with no liquid key block installed.
    #[error("no liquid key block to append a micro-block onto")]
    NoLiquidKeyBlock,

    /// A rollback target id did not match the persisted block at that height.
    #[error("rollback target height {height} has id {found}, expected {expected}")]
    InconsistentRollback {
        height: Height,
        expected: BlockId,
        found: BlockId,
    },

    /// The codec failed to decode a persisted or in-flight payload.
    #[error("corrupt record at height {height:?}: {source}")]
    CorruptRecord {
        height: Option<Height>,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A durable read or write against the embedded store failed.
    #[error("storage error: {0}")]
    StorageError(#[from] rocksdb::Error),

    /// This subscription's replay buffer cursor fell out of the retained
    /// window; the subscription has been severed. Other subscribers and the
    /// producer are unaffected.
    #[error("subscriber lagged behind the recent-updates buffer and was disconnected")]
    LaggedBehind,

    /// This subscription could not keep its outbound buffer drained in
    /// time and was severed as a slow consumer.
    #[error("subscriber was too slow to drain its back-pressure buffer")]
    SlowConsumer,

    /// `stream(fromHeight)` was called with `fromHeight` past the tip.
    #[error("stream requested from height {requested}, which is past the tip ({tip})")]
    OutOfRange { requested: Height, tip: Height },
}

pub type RepoResult<T> = Result<T, RepoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_stable_enough_to_match_on_variant() {
        let err = RepoError::NoLiquidKeyBlock;
        assert!(matches!(err, RepoError::NoLiquidKeyBlock));
    }
}
