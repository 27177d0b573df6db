use std::path::PathBuf;

use crate::free_space::FreeSpaceError;
use crate::layout::{BlockId, FileId, RowId};

pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors produced by row storage backends and accessors.
///
/// Running out of cache space is not an error; see
/// [`WriteOutcome::NoSpace`](crate::WriteOutcome::NoSpace).
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage file {} does not exist", .path.display())]
    StorageUnavailable { path: PathBuf },

    #[error("storage {file_id} is closed")]
    Closed { file_id: FileId },

    #[error("storage {file_id}: row length must be non-zero")]
    ZeroRowLength { file_id: FileId },

    #[error("storage {file_id}: row of {len} bytes exceeds the row length {expected}")]
    RowTooLong {
        file_id: FileId,
        len: usize,
        expected: usize,
    },

    #[error("storage {file_id}: block {block_id} has {len} bytes but the block size is {expected}")]
    InvalidBlock {
        file_id: FileId,
        block_id: BlockId,
        len: usize,
        expected: usize,
    },

    #[error("storage {file_id}: row {row_id} is not allocated")]
    RowNotAllocated { file_id: FileId, row_id: RowId },

    #[error("storage {file_id} is corrupted: {message}")]
    Corruption { file_id: FileId, message: String },

    #[error("invalid free space index: {0}")]
    FreeSpace(#[from] FreeSpaceError),
}
