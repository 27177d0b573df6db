use std::path::PathBuf;

use graphstats_space::OwnerId;

use crate::accessor::{AccessorOptions, CachePolicy, StorageAccessor};
use crate::error::{Result, StorageError};
use crate::free_space::{FreeSpaceError, FreeSpaceIndex};
use crate::layout::{FileId, RowId};
use crate::row_storage::RowStorage;

/// Storage for overflow records whose row ids are allocated internally.
///
/// Ids come from a [`FreeSpaceIndex`]; the caller persists
/// [`ExtraStorageAccessor::free_space_data`] next to its own metadata and
/// hands it back on reopen.
#[derive(Debug)]
pub struct ExtraStorageAccessor {
    storage: StorageAccessor,
    free_space: FreeSpaceIndex,
}

impl ExtraStorageAccessor {
    pub fn new(
        path: impl Into<PathBuf>,
        file_id: FileId,
        row_len: usize,
        policy: CachePolicy,
        options: AccessorOptions,
        free_space_data: &[u64],
    ) -> Result<Self> {
        let free_space = FreeSpaceIndex::from_data(free_space_data)?;
        let storage = StorageAccessor::new(path, file_id, row_len, policy, options, true)?;
        Ok(Self {
            storage,
            free_space,
        })
    }

    pub fn file_id(&self) -> FileId {
        self.storage.file_id()
    }

    pub fn row_len(&self) -> usize {
        self.storage.row_len()
    }

    pub fn owner_id(&self) -> Option<OwnerId> {
        self.storage.owner_id()
    }

    pub fn is_cached(&self) -> bool {
        self.storage.is_cached()
    }

    pub fn storage(&self) -> &StorageAccessor {
        &self.storage
    }

    pub fn free_space(&self) -> &FreeSpaceIndex {
        &self.free_space
    }

    pub fn free_space_data(&self) -> Vec<u64> {
        self.free_space.data()
    }

    /// Whether no row is allocated.
    pub fn is_empty(&self) -> bool {
        self.free_space.is_empty()
    }

    /// Returns `None` for ids that are not currently allocated.
    pub fn read_row(&mut self, row_id: RowId) -> Result<Option<Vec<u8>>> {
        if !self.free_space.is_used(row_id) {
            return Ok(None);
        }
        self.storage.read_row(row_id)
    }

    /// Stores `row` under a newly allocated id.
    pub fn write_row(&mut self, row: &[u8]) -> Result<RowId> {
        let row_id = self.free_space.allocate();
        if let Err(err) = self.storage.write_row(row_id, row) {
            // Nothing was stored, so the id goes straight back.
            let _ = self.free_space.release(row_id);
            return Err(err);
        }
        Ok(row_id)
    }

    /// Replaces the content of an allocated row.
    pub fn update_row(&mut self, row_id: RowId, row: &[u8]) -> Result<()> {
        if !self.free_space.is_used(row_id) {
            return Err(StorageError::RowNotAllocated {
                file_id: self.file_id(),
                row_id,
            });
        }
        self.storage.write_row(row_id, row)?;
        Ok(())
    }

    /// Releases `row_id` for reuse. Its bytes stay in place until
    /// [`ExtraStorageAccessor::defrag`].
    pub fn delete_row(&mut self, row_id: RowId) -> Result<()> {
        self.free_space.release(row_id).map_err(|err| match err {
            FreeSpaceError::NotAllocated(row_id) => StorageError::Corruption {
                file_id: self.storage.file_id(),
                message: format!("row {row_id} was released twice or never allocated"),
            },
            other => other.into(),
        })
    }

    pub fn defrag_free_space_index(&mut self) -> bool {
        self.free_space.defrag()
    }

    /// Compacts the free space index, then zeroes released rows in storage.
    pub fn defrag(&mut self) -> Result<bool> {
        let compacted = self.free_space.defrag();
        let mut free_rows: Vec<RowId> = self.free_space.free_ids().collect();
        let tail_start = self.free_space.next_unused();
        let stored_rows = self.storage.len_bytes()? / self.storage.row_len() as u64;
        free_rows.extend(tail_start..stored_rows.max(tail_start));
        let zeroed = self.storage.defrag(&free_rows)?;
        Ok(compacted || zeroed)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.storage.flush()
    }

    pub fn make_room(&mut self) -> Result<bool> {
        self.storage.make_room()
    }

    pub fn close(&mut self) -> Result<()> {
        self.storage.close()
    }

    /// Removes the backing file and forgets every allocation.
    pub fn delete(&mut self) -> Result<()> {
        self.free_space = FreeSpaceIndex::new();
        self.storage.delete()
    }
}
