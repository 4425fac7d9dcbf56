/// Repository Core - Write Path & Read Path
///
/// Owns the log handle, the liquid state, and the recent-updates buffer
/// exclusively; no other code may touch them directly. A single
/// `tokio::sync::RwLock` over the liquid state serializes writers against
/// readers: writers take it exclusive and hold it across the full (state
/// mutation, durable log write, buffer publish) triple so a reader never
/// observes a partially applied update; readers take it shared.

use crate::codec::Codec;
use crate::config::RepoConfig;
use crate::error::{RepoError, RepoResult};
use crate::liquid::LiquidState;
use crate::metrics;
use crate::recent_buffer::RecentUpdatesBuffer;
use crate::storage::Log;
use crate::types::{
    BlockAppended, BlockId, Height, MicroBlockAppended, MicroBlockRollbackCompleted,
    RollbackCompleted, Update,
};
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::{info, instrument, warn};

pub struct Repository<L: Log, C: Codec> {
    log: L,
    codec: C,
    liquid: RwLock<LiquidState>,
    pub(crate) buffer: RecentUpdatesBuffer,
    pub(crate) config: RepoConfig,
}

impl<L: Log, C: Codec> Repository<L, C> {
    pub fn new(log: L, codec: C, config: RepoConfig) -> Self {
        let buffer = RecentUpdatesBuffer::new(config.recent_updates_buffer_size);
        Self {
            log,
            codec,
            liquid: RwLock::new(LiquidState::Empty),
            buffer,
            config,
        }
    }

    pub(crate) fn log(&self) -> &L {
        &self.log
    }

    pub(crate) fn codec(&self) -> &C {
        &self.codec
    }

    // ---- write path ------------------------------------------------

    #[instrument(skip(self, block), fields(height = block.height))]
    pub async fn append_block(&self, block: BlockAppended) -> RepoResult<()> {
        let mut liquid = self.liquid.write().await;
        let expected = liquid.key_block_height().map(|h| h + 1).unwrap_or(1);
        if block.height != expected {
            metrics::record_write("append_block", "out_of_order");
            return Err(RepoError::OutOfOrder {
                expected: liquid.key_block_height().map(|h| h + 1),
                got: block.height,
            });
        }

        if let Some(solid) = liquid.solidify() {
            let bytes = match self.codec.encode(&solid) {
                Ok(b) => b,
                Err(e) => {
                    metrics::record_write("append_block", "error");
                    return Err(e);
                }
            };
            if let Err(e) = self.log.put(solid.height, &bytes) {
                metrics::record_write("append_block", "error");
                return Err(e);
            }
        }

        *liquid = LiquidState::KeyBlock(block.clone());
        metrics::CURRENT_HEIGHT.set(expected as i64);
        self.buffer.publish(Update::BlockAppended(block));
        metrics::record_write("append_block", "ok");
        info!(height = expected, "appended key block");
        Ok(())
    }

    #[instrument(skip(self, micro), fields(parent = micro.parent_block_height))]
    pub async fn append_micro_block(&self, micro: MicroBlockAppended) -> RepoResult<()> {
        let mut liquid = self.liquid.write().await;
        let Some(kb_height) = liquid.key_block_height() else {
            metrics::record_write("append_micro_block", "no_liquid_key_block");
            return Err(RepoError::NoLiquidKeyBlock);
        };
        if micro.parent_block_height != kb_height {
            metrics::record_write("append_micro_block", "out_of_order");
            return Err(RepoError::OutOfOrder {
                expected: Some(kb_height),
                got: micro.parent_block_height,
            });
        }

        *liquid = std::mem::take(&mut *liquid).with_micro_block(micro.clone());
        self.buffer.publish(Update::MicroBlockAppended(micro));
        metrics::record_write("append_micro_block", "ok");
        Ok(())
    }

    #[instrument(skip(self, r), fields(to_height = r.to_height))]
    pub async fn rollback(&self, r: RollbackCompleted) -> RepoResult<()> {
        let mut liquid = self.liquid.write().await;
        let current_height = current_height(&liquid, &self.log)?;
        if r.to_height > current_height {
            metrics::record_write("rollback", "out_of_order");
            return Err(RepoError::OutOfOrder {
                expected: Some(current_height),
                got: r.to_height,
            });
        }

        // Verify the target id against the log before mutating anything --
        // a failed rollback must leave both the log and liquid state as-is.
        let bytes = self.log.get(r.to_height)?;
        let Some(bytes) = bytes else {
            metrics::record_write("rollback", "inconsistent");
            return Err(RepoError::InconsistentRollback {
                height: r.to_height,
                expected: r.to_id,
                found: BlockId::from_slice(&[0u8; 32]).unwrap(),
            });
        };
        let block = self.codec.decode(&bytes)?;
        if block.id != r.to_id {
            metrics::record_write("rollback", "inconsistent");
            return Err(RepoError::InconsistentRollback {
                height: r.to_height,
                expected: r.to_id,
                found: block.id,
            });
        }

        self.log.delete_from(r.to_height + 1)?;
        *liquid = LiquidState::KeyBlock(block);
        metrics::CURRENT_HEIGHT.set(r.to_height as i64);
        warn!(to_height = r.to_height, "rolled back history");
        self.buffer.publish(Update::RollbackCompleted(r));
        metrics::record_write("rollback", "ok");
        Ok(())
    }

    #[instrument(skip(self, mr))]
    pub async fn rollback_micro_block(&self, mr: MicroBlockRollbackCompleted) -> RepoResult<()> {
        let mut liquid = self.liquid.write().await;
        // Validate against a clone first: a failed truncation (unknown
        // `to_id`, or no liquid state at all) must leave state untouched.
        let Some(truncated) = liquid.clone().truncate_micros_to(mr.to_id) else {
            metrics::record_write("rollback_micro_block", "no_liquid_key_block");
            return Err(RepoError::NoLiquidKeyBlock);
        };
        *liquid = truncated;
        self.buffer
            .publish(Update::MicroBlockRollbackCompleted(mr));
        metrics::record_write("rollback_micro_block", "ok");
        Ok(())
    }

    // ---- read path -------------------------------------------------

    pub async fn height(&self) -> RepoResult<Height> {
        let liquid = self.liquid.read().await;
        current_height(&liquid, &self.log)
    }

    pub async fn update_for_height(&self, h: Height) -> RepoResult<Option<BlockAppended>> {
        let liquid = self.liquid.read().await;
        if let Some(kb_height) = liquid.key_block_height() {
            if h == kb_height {
                return Ok(liquid.solidify());
            }
            if h > kb_height {
                return Ok(None);
            }
        }
        match self.log.get(h)? {
            Some(bytes) => Ok(Some(self.codec.decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Inclusive `[from, to]` range of solidified `BlockAppended`s, ignoring
    /// micro-blocks and rollback events.
    pub async fn updates_range(&self, from: Height, to: Height) -> RepoResult<Vec<BlockAppended>> {
        let mut out = Vec::new();
        let mut h = from;
        while h <= to {
            match self.update_for_height(h).await? {
                Some(b) => out.push(b),
                None => break,
            }
            h += 1;
        }
        Ok(out)
    }

    /// Shared-lock access for the subscription engine's Phase H/L reads.
    pub(crate) async fn liquid_read(&self) -> RwLockReadGuard<'_, LiquidState> {
        self.liquid.read().await
    }
}

pub(crate) fn current_height<L: Log>(liquid: &LiquidState, log: &L) -> RepoResult<Height> {
    if let Some(h) = liquid.key_block_height() {
        return Ok(h);
    }
    Ok(log.max_height()?.unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::BincodeCodec;
    use crate::storage::RocksLog;
    use crate::types::BlockId;
    use tempfile::TempDir;

    fn repo() -> (Repository<RocksLog, BincodeCodec>, TempDir) {
        let dir = TempDir::new().unwrap();
        let log = RocksLog::open_temp(&dir).unwrap();
        let repo = Repository::new(log, BincodeCodec, RepoConfig::default());
        (repo, dir)
    }

    fn block(height: Height, id: u8) -> BlockAppended {
        BlockAppended { height, id: BlockId([id; 32]), payload: vec![id] }
    }

    fn micro(parent: Height, id: u8) -> MicroBlockAppended {
        MicroBlockAppended { parent_block_height: parent, id: BlockId([id; 32]), payload: vec![id] }
    }

    #[tokio::test]
    async fn scenario_1_append_block_micro_block_append_block() {
        let (repo, _dir) = repo();
        repo.append_block(block(1, 0xA1)).await.unwrap();
        repo.append_micro_block(micro(1, 0xA2)).await.unwrap();
        repo.append_block(block(2, 0xB1)).await.unwrap();

        assert_eq!(repo.height().await.unwrap(), 2);
        let h1 = repo.update_for_height(1).await.unwrap().unwrap();
        assert_eq!(h1.id, BlockId([0xA1; 32]));
        assert!(h1.payload.len() > 1, "micro-block payload should be folded in");
        let h2 = repo.update_for_height(2).await.unwrap().unwrap();
        assert_eq!(h2, block(2, 0xB1));
        assert_eq!(repo.log().max_height().unwrap(), Some(1));
    }

    #[tokio::test]
    async fn append_block_at_height_1_on_empty_repo_succeeds() {
        let (repo, _dir) = repo();
        repo.append_block(block(1, 0x01)).await.unwrap();
        assert_eq!(repo.height().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn append_block_out_of_order_is_rejected() {
        let (repo, _dir) = repo();
        repo.append_block(block(1, 0x01)).await.unwrap();
        let err = repo.append_block(block(3, 0x02)).await.unwrap_err();
        assert!(matches!(err, RepoError::OutOfOrder { .. }));
    }

    #[tokio::test]
    async fn append_micro_block_with_no_liquid_state_fails() {
        let (repo, _dir) = repo();
        let err = repo.append_micro_block(micro(1, 0x01)).await.unwrap_err();
        assert!(matches!(err, RepoError::NoLiquidKeyBlock));
    }

    #[tokio::test]
    async fn scenario_4_historical_rollback() {
        let (repo, _dir) = repo();
        repo.append_block(block(1, 0xA1)).await.unwrap();
        repo.append_micro_block(micro(1, 0xA2)).await.unwrap();
        repo.append_block(block(2, 0xB1)).await.unwrap();

        repo.rollback(RollbackCompleted { to_height: 1, to_id: BlockId([0xA1; 32]) })
            .await
            .unwrap();

        assert_eq!(repo.height().await.unwrap(), 1);
        let h1 = repo.update_for_height(1).await.unwrap().unwrap();
        assert_eq!(h1.id, BlockId([0xA1; 32]));
        assert!(h1.payload.len() > 1, "solidified micro-block is preserved across rollback");
    }

    #[tokio::test]
    async fn rollback_with_mismatched_id_is_inconsistent() {
        let (repo, _dir) = repo();
        repo.append_block(block(1, 0xA1)).await.unwrap();
        repo.append_block(block(2, 0xB1)).await.unwrap();

        let err = repo
            .rollback(RollbackCompleted { to_height: 1, to_id: BlockId([0xFF; 32]) })
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::InconsistentRollback { .. }));
    }

    #[tokio::test]
    async fn scenario_5_micro_block_rollback() {
        let (repo, _dir) = repo();
        repo.append_block(block(1, 0xA1)).await.unwrap();
        repo.append_block(block(2, 0xB1)).await.unwrap();
        repo.append_micro_block(micro(2, 0xB2)).await.unwrap();
        repo.append_micro_block(micro(2, 0xB3)).await.unwrap();

        repo.rollback_micro_block(MicroBlockRollbackCompleted { to_id: BlockId([0xB1; 32]) })
            .await
            .unwrap();

        let solid = repo.update_for_height(2).await.unwrap().unwrap();
        assert_eq!(solid, block(2, 0xB1));
    }

    #[tokio::test]
    async fn updates_range_is_inclusive() {
        let (repo, _dir) = repo();
        for h in 1..=5u32 {
            repo.append_block(block(h, h as u8)).await.unwrap();
        }
        let range = repo.updates_range(2, 4).await.unwrap();
        assert_eq!(range.len(), 3);
        assert_eq!(range[0].height, 2);
        assert_eq!(range[2].height, 4);
    }
}
