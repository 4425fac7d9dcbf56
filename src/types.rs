/// Domain Types - Blockchain Update Events
///
/// Defines the wire-independent shape of the four write operations the
/// repository accepts and the `Update` sum type delivered to subscribers.
/// The repository treats `payload` fields as opaque bytes; only the codec
/// (see `codec.rs`) knows how to turn a `BlockAppended` into storage bytes
/// and back.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Chain height. Strictly positive once any block has been appended.
pub type Height = u32;

/// 32-byte opaque block identifier (hash).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockId(pub [u8; 32]);

impl BlockId {
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId({})", crate::telemetry::truncate_hex(&self.to_hex(), 16))
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// A finalized key block. Advances `height` by exactly one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockAppended {
    pub height: Height,
    pub id: BlockId,
    pub payload: Vec<u8>,
}

/// A micro-block sitting atop the current liquid tip key block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MicroBlockAppended {
    pub parent_block_height: Height,
    pub id: BlockId,
    pub payload: Vec<u8>,
}

/// Truncates persistent history so `to_height`/`to_id` becomes the new tip
/// key block, with no micro-blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackCompleted {
    pub to_height: Height,
    pub to_id: BlockId,
}

/// Truncates the micro-block suffix of the liquid state so that `to_id`
/// (the key block or one of its micro-blocks) becomes the new tip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MicroBlockRollbackCompleted {
    pub to_id: BlockId,
}

/// The unit delivered to subscribers: a tagged sum of the four write events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Update {
    BlockAppended(BlockAppended),
    MicroBlockAppended(MicroBlockAppended),
    RollbackCompleted(RollbackCompleted),
    MicroBlockRollbackCompleted(MicroBlockRollbackCompleted),
}

impl Update {
    /// The id carried by this event, used for the Phase L -> Phase T
    /// hand-off (`LAST_ID` matching in the subscription engine).
    pub fn event_id(&self) -> BlockId {
        match self {
            Update::BlockAppended(b) => b.id,
            Update::MicroBlockAppended(m) => m.id,
            Update::RollbackCompleted(r) => r.to_id,
            Update::MicroBlockRollbackCompleted(m) => m.to_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_id_hex_round_trips() {
        let id = BlockId([7u8; 32]);
        let hex = id.to_hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(BlockId::from_slice(&id.0).unwrap(), id);
    }

    #[test]
    fn event_id_picks_the_right_field() {
        let id = BlockId([1u8; 32]);
        let u = Update::MicroBlockRollbackCompleted(MicroBlockRollbackCompleted { to_id: id });
        assert_eq!(u.event_id(), id);
    }
}
