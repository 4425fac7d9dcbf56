pub mod codec;
pub mod config;
pub mod error;
pub mod liquid;
pub mod metrics;
pub mod recent_buffer;
pub mod repository;
pub mod storage;
pub mod subscription;
pub mod telemetry;
pub mod types;

pub use codec::{BincodeCodec, Codec};
pub use config::RepoConfig;
pub use error::{RepoError, RepoResult};
pub use liquid::LiquidState;
pub use repository::Repository;
pub use storage::{Log, RocksLog};
pub use types::{
    BlockAppended, BlockId, Height, MicroBlockAppended, MicroBlockRollbackCompleted,
    RollbackCompleted, Update,
};
