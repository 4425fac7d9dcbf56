/// Liquid State Machine
///
/// The in-memory chain tip: the most recent key block plus whatever
/// micro-blocks have been appended on top of it, not yet folded into
/// persistent storage. `solidify` is a pure function over this shape so the
/// write path is testable without the codec or the log.

use crate::types::{BlockAppended, BlockId, Height, MicroBlockAppended};
use byteorder::{BigEndian, WriteBytesExt};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LiquidState {
    #[default]
    Empty,
    KeyBlock(BlockAppended),
    KeyBlockWithMicros(BlockAppended, Vec<MicroBlockAppended>),
}

impl LiquidState {
    pub fn key_block(&self) -> Option<&BlockAppended> {
        match self {
            LiquidState::Empty => None,
            LiquidState::KeyBlock(kb) | LiquidState::KeyBlockWithMicros(kb, _) => Some(kb),
        }
    }

    pub fn key_block_height(&self) -> Option<Height> {
        self.key_block().map(|kb| kb.height)
    }

    pub fn micro_blocks(&self) -> &[MicroBlockAppended] {
        match self {
            LiquidState::KeyBlockWithMicros(_, ms) => ms,
            _ => &[],
        }
    }

    /// Deterministic fold of the key block and its micro-block suffix into
    /// the single `BlockAppended` that will be persisted at this height.
    /// Height and id are the key block's; the payload absorbs each
    /// micro-block's payload behind a length prefix, so two liquid states
    /// with the same key block and micro sequence solidify byte-identically.
    pub fn solidify(&self) -> Option<BlockAppended> {
        let kb = self.key_block()?;
        let micros = self.micro_blocks();
        if micros.is_empty() {
            return Some(kb.clone());
        }
        let mut payload = kb.payload.clone();
        for micro in micros {
            payload.write_u32::<BigEndian>(micro.payload.len() as u32).expect("writing to a Vec never fails");
            payload.extend_from_slice(&micro.payload);
        }
        Some(BlockAppended {
            height: kb.height,
            id: kb.id,
            payload,
        })
    }

    /// Appends a micro-block, returning the updated state. Caller is
    /// responsible for the `parent_block_height` precondition check.
    pub fn with_micro_block(self, micro: MicroBlockAppended) -> Self {
        match self {
            LiquidState::KeyBlock(kb) => LiquidState::KeyBlockWithMicros(kb, vec![micro]),
            LiquidState::KeyBlockWithMicros(kb, mut ms) => {
                ms.push(micro);
                LiquidState::KeyBlockWithMicros(kb, ms)
            }
            LiquidState::Empty => LiquidState::Empty,
        }
    }

    /// Truncates the micro-block suffix so `to_id` becomes the new tip: the
    /// key block itself, or the micro-block with that id.
    pub fn truncate_micros_to(self, to_id: BlockId) -> Option<Self> {
        match self {
            LiquidState::KeyBlock(kb) if kb.id == to_id => Some(LiquidState::KeyBlock(kb)),
            LiquidState::KeyBlockWithMicros(kb, ms) => {
                if kb.id == to_id {
                    return Some(LiquidState::KeyBlock(kb));
                }
                let cut = ms.iter().position(|m| m.id == to_id)?;
                let mut kept = ms;
                kept.truncate(cut + 1);
                Some(LiquidState::KeyBlockWithMicros(kb, kept))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(height: Height, id: u8) -> BlockAppended {
        BlockAppended { height, id: BlockId([id; 32]), payload: vec![id] }
    }

    fn micro(parent: Height, id: u8) -> MicroBlockAppended {
        MicroBlockAppended { parent_block_height: parent, id: BlockId([id; 32]), payload: vec![id] }
    }

    #[test]
    fn solidify_on_empty_is_none() {
        assert_eq!(LiquidState::Empty.solidify(), None);
    }

    #[test]
    fn solidify_with_no_micros_is_the_key_block_unchanged() {
        let kb = block(1, 0xAA);
        let state = LiquidState::KeyBlock(kb.clone());
        assert_eq!(state.solidify(), Some(kb));
    }

    #[test]
    fn solidify_folds_micros_deterministically() {
        let kb = block(1, 0xAA);
        let state = LiquidState::KeyBlock(kb.clone())
            .with_micro_block(micro(1, 0x01))
            .with_micro_block(micro(1, 0x02));
        let solid_a = state.clone().solidify().unwrap();
        let solid_b = state.solidify().unwrap();
        assert_eq!(solid_a, solid_b);
        assert_eq!(solid_a.height, kb.height);
        assert_eq!(solid_a.id, kb.id);
        assert!(solid_a.payload.len() > kb.payload.len());
    }

    #[test]
    fn truncate_micros_to_key_block_clears_all_micros() {
        let kb = block(1, 0xAA);
        let state = LiquidState::KeyBlock(kb.clone())
            .with_micro_block(micro(1, 0x01))
            .with_micro_block(micro(1, 0x02));
        let truncated = state.truncate_micros_to(kb.id).unwrap();
        assert_eq!(truncated, LiquidState::KeyBlock(kb));
    }

    #[test]
    fn truncate_micros_to_a_mid_sequence_micro_drops_the_rest() {
        let kb = block(1, 0xAA);
        let m1 = micro(1, 0x01);
        let m2 = micro(1, 0x02);
        let state = LiquidState::KeyBlock(kb.clone())
            .with_micro_block(m1.clone())
            .with_micro_block(m2);
        let truncated = state.truncate_micros_to(m1.id).unwrap();
        assert_eq!(truncated, LiquidState::KeyBlockWithMicros(kb, vec![m1]));
    }

    #[test]
    fn truncate_micros_to_unknown_id_fails() {
        let kb = block(1, 0xAA);
        let state = LiquidState::KeyBlock(kb).with_micro_block(micro(1, 0x01));
        assert_eq!(state.truncate_micros_to(BlockId([0xFF; 32])), None);
    }
}
