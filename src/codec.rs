/// Codec Boundary
///
/// The repository never interprets the bytes of a persisted or in-flight
/// `BlockAppended` beyond what it needs to solidify liquid state; encoding
/// and decoding are an injected capability so the repository stays testable
/// without pulling in whatever wire format the producing node actually
/// uses. Production wiring (see `main.rs`) plugs in `BincodeCodec`; tests
/// can plug in a trivial stand-in.

use crate::error::RepoError;
use crate::types::BlockAppended;

pub trait Codec: Send + Sync + 'static {
    fn encode(&self, block: &BlockAppended) -> Result<Vec<u8>, RepoError>;
    fn decode(&self, bytes: &[u8]) -> Result<BlockAppended, RepoError>;
}

/// Default codec used by the binary entry point: `bincode` over the
/// `serde`-derived `BlockAppended` shape.
#[derive(Debug, Default, Clone, Copy)]
pub struct BincodeCodec;

impl Codec for BincodeCodec {
    fn encode(&self, block: &BlockAppended) -> Result<Vec<u8>, RepoError> {
        bincode::serialize(block).map_err(|e| RepoError::CorruptRecord {
            height: Some(block.height),
            source: e,
        })
    }

    fn decode(&self, bytes: &[u8]) -> Result<BlockAppended, RepoError> {
        bincode::deserialize(bytes).map_err(|e| RepoError::CorruptRecord {
            height: None,
            source: e,
        })
    }
}
