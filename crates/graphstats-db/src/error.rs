use graphstats_config::ConfigError;
use graphstats_storage::StorageError;

pub type Result<T> = std::result::Result<T, StatsError>;

#[derive(Debug, thiserror::Error)]
pub enum StatsError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("chunk {chunk} is out of range; the database tracks {chunks} chunks")]
    InvalidChunk { chunk: u16, chunks: u32 },

    #[error("owner {owner} is out of range; the database tracks {chunks} chunks")]
    InvalidOwner { owner: u16, chunks: u32 },

    #[error("resource {resource:#x} is already owned by {owner}")]
    OwnerConflict { resource: u64, owner: u16 },

    #[error("counter {column} of resource {resource:#x} overflowed")]
    CounterOverflow { resource: u64, column: usize },

    #[error("{field} is {stored} in statistics.meta but {configured} in the configuration")]
    MetadataMismatch {
        field: &'static str,
        stored: u64,
        configured: u64,
    },

    #[error("statistics are corrupted: {0}")]
    Corrupted(String),

    #[error("the statistics database is closed")]
    Closed,
}
