use crate::error::Result;
use crate::layout::{Block, BlockLayout, FileId, RowId};

/// Bulk block transfer between backends, ordered by block id.
pub type BlockIter<'a> = Box<dyn Iterator<Item = Result<Block>> + 'a>;

/// Result of a row write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Accepted,
    /// The backend has no room for the block this row belongs to. Nothing was
    /// written.
    NoSpace,
}

/// Row-addressed storage implemented by the in-memory block store and the
/// random-access row file.
///
/// Rows shorter than the row length are zero-padded. All-zero rows read as
/// absent.
pub trait RowStorage {
    fn file_id(&self) -> FileId;

    fn layout(&self) -> &BlockLayout;

    fn row_len(&self) -> usize {
        self.layout().row_len()
    }

    /// Opens or reopens the backend.
    ///
    /// Fails with [`StorageError::StorageUnavailable`](crate::StorageError::StorageUnavailable)
    /// when durable data is missing and `create_if_missing` is false.
    fn open(&mut self, create_if_missing: bool) -> Result<()>;

    /// Returns `None` for rows that were never written.
    fn read_row(&mut self, row_id: RowId) -> Result<Option<Vec<u8>>>;

    fn write_row(&mut self, row_id: RowId, row: &[u8]) -> Result<WriteOutcome>;

    /// Iterates over all non-empty blocks in block id order.
    fn blocks(&mut self) -> Result<BlockIter<'_>>;

    /// Stores whole blocks, replacing existing content.
    ///
    /// Blocks shorter than [`BlockLayout::block_size`] are rejected.
    fn store_blocks(&mut self, blocks: BlockIter<'_>) -> Result<()>;

    /// Zeroes the given released rows where they are stored. Returns whether
    /// anything changed.
    fn defrag(&mut self, free_rows: &[RowId]) -> Result<bool>;

    fn is_valid(&self) -> bool;

    /// Whether the storage holds no row at all and could be deleted.
    fn is_empty(&mut self) -> Result<bool>;

    /// Bytes currently occupied.
    fn len_bytes(&self) -> Result<u64>;

    fn flush(&mut self) -> Result<()>;

    /// Discards all content, including durable data.
    fn delete(&mut self) -> Result<()>;

    fn close(&mut self) -> Result<()>;

    /// Tries to free space without losing data. Returns whether it did.
    fn make_room(&mut self) -> Result<bool>;
}
