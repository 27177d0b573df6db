use crate::error::{Result, StorageError};

pub type RowId = u64;
pub type BlockId = u64;
pub type FileId = u64;

/// A block of consecutive rows, the unit of caching and bulk transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub id: BlockId,
    pub bytes: Vec<u8>,
}

impl Block {
    pub fn is_zeroed(&self) -> bool {
        is_zeroed(&self.bytes)
    }
}

pub(crate) fn is_zeroed(bytes: &[u8]) -> bool {
    bytes.iter().all(|&b| b == 0)
}

/// How rows of one length are packed into blocks.
///
/// A block holds `floor(requested / row_len)` rows and its size is rounded
/// down to a whole number of rows. Rows longer than the requested block size
/// get one block each.
///
/// Row `r` always starts at byte `r * row_len`, in memory and on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockLayout {
    row_len: usize,
    rows_per_block: u64,
    block_size: usize,
    rows_as_blocks: bool,
}

impl BlockLayout {
    pub fn new(file_id: FileId, row_len: usize, requested_block_size: usize) -> Result<Self> {
        if row_len == 0 {
            return Err(StorageError::ZeroRowLength { file_id });
        }

        if requested_block_size >= row_len {
            let rows_per_block = requested_block_size / row_len;
            Ok(Self {
                row_len,
                rows_per_block: rows_per_block as u64,
                block_size: rows_per_block * row_len,
                rows_as_blocks: false,
            })
        } else {
            tracing::warn!(
                target: "graphstats.storage",
                file_id,
                row_len,
                block_size = requested_block_size,
                "block size is smaller than the row length; storing one row per block"
            );
            Ok(Self {
                row_len,
                rows_per_block: 1,
                block_size: row_len,
                rows_as_blocks: true,
            })
        }
    }

    pub fn row_len(&self) -> usize {
        self.row_len
    }

    pub fn rows_per_block(&self) -> u64 {
        self.rows_per_block
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn rows_as_blocks(&self) -> bool {
        self.rows_as_blocks
    }

    pub fn block_of(&self, row_id: RowId) -> BlockId {
        row_id / self.rows_per_block
    }

    /// Byte offset of `row_id` inside its block.
    pub fn offset_in_block(&self, row_id: RowId) -> usize {
        (row_id % self.rows_per_block) as usize * self.row_len
    }

    pub fn row_offset(&self, row_id: RowId) -> u64 {
        row_id * self.row_len as u64
    }

    pub fn block_offset(&self, block_id: BlockId) -> u64 {
        block_id * self.block_size as u64
    }

    /// Number of blocks needed to hold `len` bytes.
    pub fn blocks_for_len(&self, len: u64) -> u64 {
        len.div_ceil(self.block_size as u64)
    }

    pub(crate) fn check_row(&self, file_id: FileId, row: &[u8]) -> Result<()> {
        if row.len() > self.row_len {
            return Err(StorageError::RowTooLong {
                file_id,
                len: row.len(),
                expected: self.row_len,
            });
        }
        Ok(())
    }

    pub(crate) fn check_block(&self, file_id: FileId, block: &Block) -> Result<()> {
        if block.bytes.len() < self.block_size {
            return Err(StorageError::InvalidBlock {
                file_id,
                block_id: block.id,
                len: block.bytes.len(),
                expected: self.block_size,
            });
        }
        Ok(())
    }
}
