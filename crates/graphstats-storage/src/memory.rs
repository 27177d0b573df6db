use std::collections::BTreeMap;

use graphstats_space::SpaceHandle;

use crate::error::{Result, StorageError};
use crate::layout::{is_zeroed, Block, BlockId, BlockLayout, FileId, RowId};
use crate::row_storage::{BlockIter, RowStorage, WriteOutcome};

/// Where the in-memory store gets permission to add a block.
#[derive(Debug, Clone)]
pub enum CacheBudget {
    /// At most `max_bytes / block_size` blocks.
    Fixed { max_bytes: u64 },
    /// One block's worth of bytes is requested from a shared budget per new
    /// block and everything is returned on close.
    Shared(SpaceHandle),
}

/// Block store kept entirely in memory.
///
/// Writing into an existing block always succeeds. Writing a row whose block
/// does not exist yet needs budget for a whole block; without it the write
/// returns [`WriteOutcome::NoSpace`] and the store is unchanged.
#[derive(Debug)]
pub struct InMemoryRowStorage {
    file_id: FileId,
    layout: BlockLayout,
    budget: CacheBudget,
    blocks: Option<BTreeMap<BlockId, Vec<u8>>>,
}

impl InMemoryRowStorage {
    pub fn new(file_id: FileId, layout: BlockLayout, budget: CacheBudget) -> Self {
        Self {
            file_id,
            layout,
            budget,
            blocks: Some(BTreeMap::new()),
        }
    }

    pub fn block_count(&self) -> usize {
        self.blocks.as_ref().map_or(0, BTreeMap::len)
    }

    /// Number of blocks a fixed budget allows, `None` for a shared budget.
    pub fn max_blocks(&self) -> Option<u64> {
        match &self.budget {
            CacheBudget::Fixed { max_bytes } => Some(max_bytes / self.layout.block_size() as u64),
            CacheBudget::Shared(_) => None,
        }
    }

    pub fn budget(&self) -> &CacheBudget {
        &self.budget
    }

    /// Stores one block, asking the budget for room if the block is new.
    pub fn store_block(&mut self, block: &Block) -> Result<WriteOutcome> {
        self.layout.check_block(self.file_id, block)?;
        let exists = self.map()?.contains_key(&block.id);
        if !exists && !self.reserve_block() {
            return Ok(WriteOutcome::NoSpace);
        }
        self.insert_block(block.clone())?;
        Ok(WriteOutcome::Accepted)
    }

    fn reserve_block(&mut self) -> bool {
        let block_size = self.layout.block_size() as u64;
        let count = self.block_count() as u64;
        match &self.budget {
            CacheBudget::Fixed { max_bytes } => count < max_bytes / block_size,
            CacheBudget::Shared(handle) => handle.request(block_size),
        }
    }

    fn release_budget(&mut self) {
        if let CacheBudget::Shared(handle) = &self.budget {
            handle.release_all();
        }
    }

    fn insert_block(&mut self, mut block: Block) -> Result<()> {
        block.bytes.truncate(self.layout.block_size());
        self.map_mut()?.insert(block.id, block.bytes);
        Ok(())
    }

    fn map(&self) -> Result<&BTreeMap<BlockId, Vec<u8>>> {
        self.blocks.as_ref().ok_or(StorageError::Closed {
            file_id: self.file_id,
        })
    }

    fn map_mut(&mut self) -> Result<&mut BTreeMap<BlockId, Vec<u8>>> {
        self.blocks.as_mut().ok_or(StorageError::Closed {
            file_id: self.file_id,
        })
    }
}

impl RowStorage for InMemoryRowStorage {
    fn file_id(&self) -> FileId {
        self.file_id
    }

    fn layout(&self) -> &BlockLayout {
        &self.layout
    }

    fn open(&mut self, _create_if_missing: bool) -> Result<()> {
        if self.blocks.is_none() {
            self.blocks = Some(BTreeMap::new());
        }
        Ok(())
    }

    fn read_row(&mut self, row_id: RowId) -> Result<Option<Vec<u8>>> {
        let layout = self.layout;
        let Some(block) = self.map()?.get(&layout.block_of(row_id)) else {
            return Ok(None);
        };
        let start = layout.offset_in_block(row_id);
        let row = &block[start..start + layout.row_len()];
        Ok((!is_zeroed(row)).then(|| row.to_vec()))
    }

    fn write_row(&mut self, row_id: RowId, row: &[u8]) -> Result<WriteOutcome> {
        self.layout.check_row(self.file_id, row)?;
        let layout = self.layout;
        let block_id = layout.block_of(row_id);

        if layout.rows_as_blocks() {
            let exists = self.map()?.contains_key(&block_id);
            if !exists && !self.reserve_block() {
                return Ok(WriteOutcome::NoSpace);
            }
            let mut bytes = row.to_vec();
            bytes.resize(layout.row_len(), 0);
            self.map_mut()?.insert(block_id, bytes);
            return Ok(WriteOutcome::Accepted);
        }

        let exists = self.map()?.contains_key(&block_id);
        if !exists && !self.reserve_block() {
            return Ok(WriteOutcome::NoSpace);
        }
        let block = self
            .map_mut()?
            .entry(block_id)
            .or_insert_with(|| vec![0; layout.block_size()]);
        let start = layout.offset_in_block(row_id);
        let slot = &mut block[start..start + layout.row_len()];
        slot[..row.len()].copy_from_slice(row);
        slot[row.len()..].fill(0);
        Ok(WriteOutcome::Accepted)
    }

    fn blocks(&mut self) -> Result<BlockIter<'_>> {
        let map = self.map()?;
        Ok(Box::new(map.iter().map(|(&id, bytes)| {
            Ok(Block {
                id,
                bytes: bytes.clone(),
            })
        })))
    }

    /// Stores blocks without consulting the budget. Used to preload from a
    /// file after the accessor reserved space for the whole file.
    fn store_blocks(&mut self, blocks: BlockIter<'_>) -> Result<()> {
        for block in blocks {
            let block = block?;
            self.layout.check_block(self.file_id, &block)?;
            self.insert_block(block)?;
        }
        Ok(())
    }

    fn defrag(&mut self, free_rows: &[RowId]) -> Result<bool> {
        let layout = self.layout;
        let map = self.map_mut()?;
        let mut changed = false;
        for &row_id in free_rows {
            if let Some(block) = map.get_mut(&layout.block_of(row_id)) {
                let start = layout.offset_in_block(row_id);
                let slot = &mut block[start..start + layout.row_len()];
                if !is_zeroed(slot) {
                    slot.fill(0);
                    changed = true;
                }
            }
        }
        Ok(changed)
    }

    fn is_valid(&self) -> bool {
        self.blocks.is_some()
    }

    fn is_empty(&mut self) -> Result<bool> {
        Ok(self.map()?.values().all(|block| is_zeroed(block)))
    }

    fn len_bytes(&self) -> Result<u64> {
        Ok(self.map()?.len() as u64 * self.layout.block_size() as u64)
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn delete(&mut self) -> Result<()> {
        self.close()
    }

    fn close(&mut self) -> Result<()> {
        self.release_budget();
        self.blocks = None;
        Ok(())
    }

    fn make_room(&mut self) -> Result<bool> {
        Ok(false)
    }
}

impl Drop for InMemoryRowStorage {
    fn drop(&mut self) {
        if self.blocks.is_some() {
            self.release_budget();
        }
    }
}

#[cfg(test)]
mod tests {
    use graphstats_space::SpaceManager;

    use super::*;

    fn layout(row_len: usize, block_size: usize) -> BlockLayout {
        BlockLayout::new(1, row_len, block_size).unwrap()
    }

    fn row(len: usize, fill: u8) -> Vec<u8> {
        vec![fill; len]
    }

    #[test]
    fn unwritten_rows_are_absent() {
        let mut storage =
            InMemoryRowStorage::new(1, layout(10, 100), CacheBudget::Fixed { max_bytes: 1000 });
        assert_eq!(storage.read_row(3).unwrap(), None);

        storage.write_row(3, &row(10, 7)).unwrap();
        assert_eq!(storage.read_row(3).unwrap(), Some(row(10, 7)));
        assert_eq!(storage.read_row(4).unwrap(), None);
    }

    #[test]
    fn short_rows_are_zero_padded_and_long_rows_rejected() {
        let mut storage =
            InMemoryRowStorage::new(1, layout(4, 16), CacheBudget::Fixed { max_bytes: 64 });
        storage.write_row(0, &[1, 2, 3, 4]).unwrap();
        storage.write_row(0, &[9]).unwrap();
        assert_eq!(storage.read_row(0).unwrap(), Some(vec![9, 0, 0, 0]));

        let err = storage.write_row(0, &[1, 2, 3, 4, 5]).unwrap_err();
        assert!(matches!(err, StorageError::RowTooLong { len: 5, .. }));
    }

    #[test]
    fn fixed_budget_rejects_new_blocks_but_not_existing_ones() {
        // Two blocks of ten rows.
        let mut storage =
            InMemoryRowStorage::new(1, layout(10, 100), CacheBudget::Fixed { max_bytes: 250 });
        assert_eq!(storage.max_blocks(), Some(2));

        assert_eq!(storage.write_row(0, &row(10, 1)).unwrap(), WriteOutcome::Accepted);
        assert_eq!(storage.write_row(15, &row(10, 1)).unwrap(), WriteOutcome::Accepted);
        assert_eq!(storage.write_row(25, &row(10, 1)).unwrap(), WriteOutcome::NoSpace);
        assert_eq!(storage.read_row(25).unwrap(), None);

        assert_eq!(storage.write_row(9, &row(10, 2)).unwrap(), WriteOutcome::Accepted);
        assert_eq!(storage.block_count(), 2);
    }

    #[test]
    fn shared_budget_is_requested_per_block_and_released_on_close() {
        let manager = SpaceManager::new(200);
        let registration = manager.register("file-1");
        let mut storage = InMemoryRowStorage::new(
            1,
            layout(10, 100),
            CacheBudget::Shared(registration.handle()),
        );

        storage.write_row(0, &row(10, 1)).unwrap();
        storage.write_row(1, &row(10, 1)).unwrap();
        assert_eq!(manager.granted(), 100);
        storage.write_row(10, &row(10, 1)).unwrap();
        assert_eq!(manager.granted(), 200);
        assert_eq!(storage.write_row(20, &row(10, 1)).unwrap(), WriteOutcome::NoSpace);

        storage.close().unwrap();
        assert!(!storage.is_valid());
        assert_eq!(manager.granted(), 0);
        assert!(matches!(
            storage.read_row(0),
            Err(StorageError::Closed { file_id: 1 })
        ));
    }

    #[test]
    fn dropping_an_open_store_returns_its_budget() {
        let manager = SpaceManager::new(1000);
        let registration = manager.register("file-1");
        {
            let mut storage = InMemoryRowStorage::new(
                1,
                layout(10, 100),
                CacheBudget::Shared(registration.handle()),
            );
            storage.write_row(0, &row(10, 1)).unwrap();
            assert_eq!(manager.granted(), 100);
        }
        assert_eq!(manager.granted(), 0);
    }

    #[test]
    fn rows_as_blocks_store_each_row_in_its_own_block() {
        let mut storage =
            InMemoryRowStorage::new(1, layout(8, 4), CacheBudget::Fixed { max_bytes: 16 });
        storage.write_row(5, &[1, 2, 3]).unwrap();
        storage.write_row(9, &[4]).unwrap();
        assert_eq!(storage.write_row(11, &[5]).unwrap(), WriteOutcome::NoSpace);

        let blocks: Vec<Block> = storage.blocks().unwrap().map(|b| b.unwrap()).collect();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].id, 5);
        assert_eq!(blocks[0].bytes, vec![1, 2, 3, 0, 0, 0, 0, 0]);
        assert_eq!(blocks[1].id, 9);
    }

    #[test]
    fn store_blocks_rejects_short_blocks() {
        let mut storage =
            InMemoryRowStorage::new(1, layout(10, 100), CacheBudget::Fixed { max_bytes: 1000 });
        let blocks: BlockIter<'_> = Box::new(std::iter::once(Ok(Block {
            id: 0,
            bytes: vec![1; 99],
        })));
        let err = storage.store_blocks(blocks).unwrap_err();
        assert!(matches!(
            err,
            StorageError::InvalidBlock {
                len: 99,
                expected: 100,
                ..
            }
        ));
    }

    #[test]
    fn defrag_zeroes_released_rows() {
        let mut storage =
            InMemoryRowStorage::new(1, layout(10, 100), CacheBudget::Fixed { max_bytes: 1000 });
        storage.write_row(0, &row(10, 1)).unwrap();
        storage.write_row(1, &row(10, 1)).unwrap();

        assert!(storage.defrag(&[1, 50]).unwrap());
        assert_eq!(storage.read_row(1).unwrap(), None);
        assert!(!storage.defrag(&[1]).unwrap());
        assert!(!storage.is_empty().unwrap());

        storage.defrag(&[0]).unwrap();
        assert!(storage.is_empty().unwrap());
    }
}
