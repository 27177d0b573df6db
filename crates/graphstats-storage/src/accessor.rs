use std::path::{Path, PathBuf};

use graphstats_space::{OwnerId, SpaceManager, SpaceRegistration};

use crate::error::{Result, StorageError};
use crate::file::{RowFile, RowFileStats};
use crate::layout::{BlockLayout, FileId, RowId};
use crate::memory::{CacheBudget, InMemoryRowStorage};
use crate::row_storage::{BlockIter, RowStorage, WriteOutcome};

pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// How an accessor decides whether it may cache its file in memory.
#[derive(Debug, Clone)]
pub enum CachePolicy {
    /// Cache files smaller than `max_cache_bytes`, and never grow past it.
    Fixed { max_cache_bytes: u64 },
    /// Cache while the shared manager grants space.
    Shared(SpaceManager),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessorOptions {
    pub block_size: usize,
    /// Blocks kept by the row file's write-back cache while file-backed.
    pub file_cache_blocks: usize,
}

impl Default for AccessorOptions {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            file_cache_blocks: 16,
        }
    }
}

enum State {
    Closed,
    /// Rows live in memory; the file handle is closed until the next flush.
    Cached(InMemoryRowStorage),
    FileBacked,
}

/// Owns one row file and serves it from memory while the budget allows.
///
/// State changes only along `Closed -> Cached | FileBacked`,
/// `Cached -> FileBacked` and back to `Closed`. Once a cache write is rejected
/// the cached blocks are copied into the file and the accessor stays
/// file-backed until it is closed; it never promotes itself back.
pub struct StorageAccessor {
    file_id: FileId,
    layout: BlockLayout,
    policy: CachePolicy,
    registration: Option<SpaceRegistration>,
    file: RowFile,
    state: State,
}

impl StorageAccessor {
    pub fn new(
        path: impl Into<PathBuf>,
        file_id: FileId,
        row_len: usize,
        policy: CachePolicy,
        options: AccessorOptions,
        create_if_missing: bool,
    ) -> Result<Self> {
        let layout = BlockLayout::new(file_id, row_len, options.block_size)?;
        let registration = match &policy {
            CachePolicy::Shared(manager) => Some(manager.register(format!("rows-{file_id}"))),
            CachePolicy::Fixed { .. } => None,
        };
        let file = RowFile::new(file_id, path, layout, options.file_cache_blocks);

        let mut accessor = Self {
            file_id,
            layout,
            policy,
            registration,
            file,
            state: State::Closed,
        };
        accessor.open(create_if_missing)?;
        Ok(accessor)
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn is_cached(&self) -> bool {
        matches!(self.state, State::Cached(_))
    }

    /// Owner id in the shared space manager, if any.
    pub fn owner_id(&self) -> Option<OwnerId> {
        self.registration.as_ref().map(SpaceRegistration::id)
    }

    pub fn file_stats(&self) -> RowFileStats {
        self.file.stats()
    }

    fn closed(&self) -> StorageError {
        StorageError::Closed {
            file_id: self.file_id,
        }
    }

    fn new_cache(&self, file_len: u64) -> Option<InMemoryRowStorage> {
        match (&self.policy, &self.registration) {
            (CachePolicy::Fixed { max_cache_bytes }, _) => (file_len < *max_cache_bytes).then(|| {
                InMemoryRowStorage::new(
                    self.file_id,
                    self.layout,
                    CacheBudget::Fixed {
                        max_bytes: *max_cache_bytes,
                    },
                )
            }),
            (CachePolicy::Shared(_), Some(registration)) => {
                // Room for the whole file and at least one new block.
                let blocks = self.layout.blocks_for_len(file_len).max(1);
                let handle = registration.handle();
                handle
                    .request(blocks * self.layout.block_size() as u64)
                    .then(|| {
                        InMemoryRowStorage::new(self.file_id, self.layout, CacheBudget::Shared(handle))
                    })
            }
            (CachePolicy::Shared(_), None) => None,
        }
    }

    /// Gives back the part of the open-time reservation the preloaded blocks
    /// did not use.
    fn trim_reservation(&self, cache: &InMemoryRowStorage) -> Result<()> {
        if let CacheBudget::Shared(handle) = cache.budget() {
            let used = cache.len_bytes()?;
            let granted = handle.granted();
            if granted > used {
                handle.release(granted - used);
            }
        }
        Ok(())
    }

    /// Copies every cached block into the file and switches to it for good.
    fn demote(&mut self) -> Result<()> {
        let mut cache = match std::mem::replace(&mut self.state, State::FileBacked) {
            State::Cached(cache) => cache,
            other => {
                self.state = other;
                return Ok(());
            }
        };
        if let Err(err) = copy_into_file(&mut self.file, &mut cache) {
            self.state = State::Cached(cache);
            return Err(err);
        }
        let bytes = cache.len_bytes()?;
        cache.close()?;
        tracing::info!(
            target: "graphstats.storage",
            file_id = self.file_id,
            bytes,
            "switched storage from memory to file"
        );
        Ok(())
    }
}

fn copy_into_file(file: &mut RowFile, cache: &mut InMemoryRowStorage) -> Result<()> {
    if !file.is_valid() {
        file.open(true)?;
    }
    file.store_blocks(cache.blocks()?)
}

impl RowStorage for StorageAccessor {
    fn file_id(&self) -> FileId {
        self.file_id
    }

    fn layout(&self) -> &BlockLayout {
        &self.layout
    }

    /// Opens the file and preloads it into memory when the policy allows.
    /// Does nothing if the accessor is already open.
    fn open(&mut self, create_if_missing: bool) -> Result<()> {
        if !matches!(self.state, State::Closed) {
            return Ok(());
        }
        self.file.open(create_if_missing)?;
        let file_len = self.file.len_bytes()?;

        let Some(mut cache) = self.new_cache(file_len) else {
            tracing::debug!(
                target: "graphstats.storage",
                file_id = self.file_id,
                file_len,
                "serving storage from file"
            );
            self.state = State::FileBacked;
            return Ok(());
        };

        let preloaded = match self.file.blocks() {
            Ok(blocks) => cache.store_blocks(blocks),
            Err(err) => Err(err),
        };
        let preloaded = preloaded.and_then(|()| self.trim_reservation(&cache));
        if let Err(err) = preloaded {
            let _ = cache.close();
            let _ = self.file.close();
            return Err(err);
        }
        self.file.close()?;
        tracing::debug!(
            target: "graphstats.storage",
            file_id = self.file_id,
            file_len,
            blocks = cache.block_count(),
            "serving storage from memory"
        );
        self.state = State::Cached(cache);
        Ok(())
    }

    fn read_row(&mut self, row_id: RowId) -> Result<Option<Vec<u8>>> {
        match &mut self.state {
            State::Closed => Err(self.closed()),
            State::Cached(cache) => cache.read_row(row_id),
            State::FileBacked => self.file.read_row(row_id),
        }
    }

    /// Always accepts the row unless I/O fails. A full cache demotes the
    /// accessor and the row goes to the file.
    fn write_row(&mut self, row_id: RowId, row: &[u8]) -> Result<WriteOutcome> {
        let outcome = match &mut self.state {
            State::Closed => return Err(self.closed()),
            State::Cached(cache) => cache.write_row(row_id, row)?,
            State::FileBacked => return self.file.write_row(row_id, row),
        };
        if outcome == WriteOutcome::NoSpace {
            self.demote()?;
            self.file.write_row(row_id, row)?;
        }
        Ok(WriteOutcome::Accepted)
    }

    fn blocks(&mut self) -> Result<BlockIter<'_>> {
        let file_id = self.file_id;
        match &mut self.state {
            State::Closed => Err(StorageError::Closed { file_id }),
            State::Cached(cache) => cache.blocks(),
            State::FileBacked => self.file.blocks(),
        }
    }

    fn store_blocks(&mut self, mut blocks: BlockIter<'_>) -> Result<()> {
        while let State::Cached(cache) = &mut self.state {
            let Some(block) = blocks.next() else {
                return Ok(());
            };
            let block = block?;
            if cache.store_block(&block)? == WriteOutcome::NoSpace {
                self.demote()?;
                self.file.store_blocks(Box::new(std::iter::once(Ok(block))))?;
            }
        }
        match self.state {
            State::FileBacked => self.file.store_blocks(blocks),
            _ => Err(self.closed()),
        }
    }

    fn defrag(&mut self, free_rows: &[RowId]) -> Result<bool> {
        match &mut self.state {
            State::Closed => Err(self.closed()),
            State::Cached(cache) => cache.defrag(free_rows),
            State::FileBacked => self.file.defrag(free_rows),
        }
    }

    fn is_valid(&self) -> bool {
        !matches!(self.state, State::Closed)
    }

    fn is_empty(&mut self) -> Result<bool> {
        match &mut self.state {
            State::Closed => Err(self.closed()),
            State::Cached(cache) => cache.is_empty(),
            State::FileBacked => self.file.is_empty(),
        }
    }

    fn len_bytes(&self) -> Result<u64> {
        match &self.state {
            State::Closed => Err(self.closed()),
            State::Cached(cache) => cache.len_bytes(),
            State::FileBacked => self.file.len_bytes(),
        }
    }

    /// Makes the file reflect every accepted write. A cached accessor stays
    /// cached and parks its file handle again.
    fn flush(&mut self) -> Result<()> {
        match &mut self.state {
            State::Closed => Err(self.closed()),
            State::Cached(cache) => {
                copy_into_file(&mut self.file, cache)?;
                self.file.close()
            }
            State::FileBacked => self.file.flush(),
        }
    }

    fn delete(&mut self) -> Result<()> {
        if let State::Cached(mut cache) = std::mem::replace(&mut self.state, State::Closed) {
            cache.delete()?;
        }
        self.file.delete()
    }

    /// Returns cached space to the budget even when the final flush fails.
    fn close(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.state, State::Closed) {
            State::Closed => Ok(()),
            State::FileBacked => self.file.close(),
            State::Cached(mut cache) => {
                let copied = copy_into_file(&mut self.file, &mut cache);
                let closed = self.file.close();
                cache.close()?;
                copied.and(closed)
            }
        }
    }

    /// A cached accessor frees its memory by switching to the file; a
    /// file-backed one truncates trailing empty blocks.
    fn make_room(&mut self) -> Result<bool> {
        match self.state {
            State::Closed => Ok(false),
            State::Cached(_) => {
                self.demote()?;
                Ok(true)
            }
            State::FileBacked => self.file.make_room(),
        }
    }
}

impl Drop for StorageAccessor {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::warn!(
                target: "graphstats.storage",
                file_id = self.file_id,
                error = %err,
                "failed to close storage on drop"
            );
        }
    }
}

impl std::fmt::Debug for StorageAccessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state {
            State::Closed => "closed",
            State::Cached(_) => "cached",
            State::FileBacked => "file_backed",
        };
        f.debug_struct("StorageAccessor")
            .field("file_id", &self.file_id)
            .field("path", &self.file.path())
            .field("state", &state)
            .field("owner", &self.owner_id())
            .finish()
    }
}
