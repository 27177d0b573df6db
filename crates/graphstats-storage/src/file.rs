use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use graphstats_lru::LruCache;
use serde::Serialize;

use crate::error::{Result, StorageError};
use crate::layout::{is_zeroed, Block, BlockId, BlockLayout, FileId, RowId};
use crate::row_storage::{BlockIter, RowStorage, WriteOutcome};

/// Counters for one open row file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RowFileStats {
    pub block_hits: u64,
    pub block_misses: u64,
    pub rows_read: u64,
    pub rows_written: u64,
    pub blocks_written_back: u64,
}

#[derive(Debug)]
struct CachedBlock {
    bytes: Vec<u8>,
    dirty: bool,
}

/// Flat file of fixed-length rows; row `r` lives at byte `r * row_len`.
///
/// Reads and writes go through a small write-back LRU of whole blocks when
/// `cache_blocks > 0`. Dirty blocks reach the file on eviction, `flush`,
/// `blocks` and `close`.
pub struct RowFile {
    file_id: FileId,
    path: PathBuf,
    layout: BlockLayout,
    file: Option<File>,
    len: u64,
    cache: LruCache<BlockId, CachedBlock>,
    stats: RowFileStats,
}

impl RowFile {
    /// Creates a closed row file; call [`RowStorage::open`] before use.
    pub fn new(
        file_id: FileId,
        path: impl Into<PathBuf>,
        layout: BlockLayout,
        cache_blocks: usize,
    ) -> Self {
        Self {
            file_id,
            path: path.into(),
            layout,
            file: None,
            len: 0,
            cache: LruCache::new(cache_blocks),
            stats: RowFileStats::default(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn stats(&self) -> RowFileStats {
        self.stats
    }

    fn closed(&self) -> StorageError {
        StorageError::Closed {
            file_id: self.file_id,
        }
    }

    fn handle(&mut self) -> Result<&mut File> {
        match self.file.as_mut() {
            Some(file) => Ok(file),
            None => Err(StorageError::Closed {
                file_id: self.file_id,
            }),
        }
    }

    /// Loads a block into the cache, writing back whatever it evicts.
    fn cached_block(&mut self, block_id: BlockId) -> Result<&mut CachedBlock> {
        if self.cache.contains_key(&block_id) {
            self.stats.block_hits += 1;
        } else {
            self.stats.block_misses += 1;
            let offset = self.layout.block_offset(block_id);
            let block_size = self.layout.block_size();
            let bytes = read_padded(self.handle()?, offset, block_size)?;
            if let Some((evicted_id, evicted)) =
                self.cache.put(block_id, CachedBlock { bytes, dirty: false })
            {
                self.write_back(evicted_id, &evicted)?;
            }
        }
        let file_id = self.file_id;
        self.cache.get_mut(&block_id).ok_or(StorageError::Closed { file_id })
    }

    fn write_back(&mut self, block_id: BlockId, block: &CachedBlock) -> Result<()> {
        if !block.dirty {
            return Ok(());
        }
        let offset = self.layout.block_offset(block_id);
        write_at(self.handle()?, offset, &block.bytes)?;
        self.stats.blocks_written_back += 1;
        Ok(())
    }

    fn write_back_all(&mut self) -> Result<()> {
        let dirty: Vec<BlockId> = self
            .cache
            .iter()
            .filter(|(_, block)| block.dirty)
            .map(|(id, _)| *id)
            .collect();
        for block_id in dirty {
            let offset = self.layout.block_offset(block_id);
            let Some(block) = self.cache.peek(&block_id) else {
                continue;
            };
            let bytes = block.bytes.clone();
            write_at(self.handle()?, offset, &bytes)?;
            self.stats.blocks_written_back += 1;
            if let Some(block) = self.cache.get_mut(&block_id) {
                block.dirty = false;
            }
        }
        Ok(())
    }

    fn read_block_from_disk(&mut self, block_id: BlockId) -> Result<Vec<u8>> {
        let offset = self.layout.block_offset(block_id);
        let block_size = self.layout.block_size();
        Ok(read_padded(self.handle()?, offset, block_size)?)
    }
}

impl RowStorage for RowFile {
    fn file_id(&self) -> FileId {
        self.file_id
    }

    fn layout(&self) -> &BlockLayout {
        &self.layout
    }

    fn open(&mut self, create_if_missing: bool) -> Result<()> {
        if self.file.is_some() {
            return Ok(());
        }
        if !self.path.exists() {
            if !create_if_missing {
                return Err(StorageError::StorageUnavailable {
                    path: self.path.clone(),
                });
            }
            if let Some(parent) = self.path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(create_if_missing)
            .truncate(false)
            .open(&self.path)?;
        self.len = file.metadata()?.len();
        self.file = Some(file);
        self.cache.clear();
        tracing::trace!(
            target: "graphstats.storage",
            file_id = self.file_id,
            path = %self.path.display(),
            len = self.len,
            "opened row file"
        );
        Ok(())
    }

    fn read_row(&mut self, row_id: RowId) -> Result<Option<Vec<u8>>> {
        if self.file.is_none() {
            return Err(self.closed());
        }
        let offset = self.layout.row_offset(row_id);
        if offset >= self.len {
            return Ok(None);
        }
        self.stats.rows_read += 1;

        let row_len = self.layout.row_len();
        let row = if self.cache.capacity() > 0 {
            let start = self.layout.offset_in_block(row_id);
            let block_id = self.layout.block_of(row_id);
            let block = self.cached_block(block_id)?;
            block.bytes[start..start + row_len].to_vec()
        } else {
            read_padded(self.handle()?, offset, row_len)?
        };
        Ok((!is_zeroed(&row)).then_some(row))
    }

    fn write_row(&mut self, row_id: RowId, row: &[u8]) -> Result<WriteOutcome> {
        self.layout.check_row(self.file_id, row)?;
        if self.file.is_none() {
            return Err(self.closed());
        }
        let row_len = self.layout.row_len();
        let offset = self.layout.row_offset(row_id);

        if self.cache.capacity() > 0 {
            let start = self.layout.offset_in_block(row_id);
            let block_id = self.layout.block_of(row_id);
            let block = self.cached_block(block_id)?;
            let slot = &mut block.bytes[start..start + row_len];
            slot[..row.len()].copy_from_slice(row);
            slot[row.len()..].fill(0);
            block.dirty = true;
        } else {
            let mut padded = row.to_vec();
            padded.resize(row_len, 0);
            write_at(self.handle()?, offset, &padded)?;
        }
        self.len = self.len.max(offset + row_len as u64);
        self.stats.rows_written += 1;
        Ok(WriteOutcome::Accepted)
    }

    fn blocks(&mut self) -> Result<BlockIter<'_>> {
        self.write_back_all()?;
        let count = self.layout.blocks_for_len(self.len);
        let layout = self.layout;
        let file = self.handle()?;
        let iter = (0..count).filter_map(move |block_id| {
            match read_padded(file, layout.block_offset(block_id), layout.block_size()) {
                Ok(bytes) if is_zeroed(&bytes) => None,
                Ok(bytes) => Some(Ok(Block { id: block_id, bytes })),
                Err(err) => Some(Err(err.into())),
            }
        });
        Ok(Box::new(iter))
    }

    fn store_blocks(&mut self, blocks: BlockIter<'_>) -> Result<()> {
        let block_size = self.layout.block_size();
        for block in blocks {
            let block = block?;
            self.layout.check_block(self.file_id, &block)?;
            let bytes = &block.bytes[..block_size];
            let offset = self.layout.block_offset(block.id);
            write_at(self.handle()?, offset, bytes)?;
            if let Some(cached) = self.cache.get_mut(&block.id) {
                cached.bytes.copy_from_slice(bytes);
                cached.dirty = false;
            }
            self.len = self.len.max(offset + block_size as u64);
        }
        Ok(())
    }

    fn defrag(&mut self, free_rows: &[RowId]) -> Result<bool> {
        let mut changed = false;
        for &row_id in free_rows {
            if self.read_row(row_id)?.is_some() {
                self.write_row(row_id, &[])?;
                changed = true;
            }
        }
        Ok(changed)
    }

    fn is_valid(&self) -> bool {
        self.file.is_some()
    }

    fn is_empty(&mut self) -> Result<bool> {
        let mut blocks = self.blocks()?;
        match blocks.next() {
            None => Ok(true),
            Some(block) => block.map(|_| false),
        }
    }

    fn len_bytes(&self) -> Result<u64> {
        if self.file.is_none() {
            return Err(self.closed());
        }
        Ok(self.len)
    }

    fn flush(&mut self) -> Result<()> {
        self.write_back_all()?;
        let file = self.handle()?;
        file.flush()?;
        file.sync_data()?;
        Ok(())
    }

    fn delete(&mut self) -> Result<()> {
        self.file = None;
        self.cache.clear();
        self.len = 0;
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn close(&mut self) -> Result<()> {
        if self.file.is_none() {
            return Ok(());
        }
        let result = self.flush();
        self.file = None;
        self.cache.clear();
        result
    }

    /// Drops trailing all-zero blocks from the end of the file.
    fn make_room(&mut self) -> Result<bool> {
        self.flush()?;
        let mut keep = self.layout.blocks_for_len(self.len);
        while keep > 0 && is_zeroed(&self.read_block_from_disk(keep - 1)?) {
            keep -= 1;
        }

        let new_len = self.layout.block_offset(keep).min(self.len);
        if new_len >= self.len {
            return Ok(false);
        }
        self.handle()?.set_len(new_len)?;
        let stale: Vec<BlockId> = self
            .cache
            .iter()
            .map(|(id, _)| *id)
            .filter(|id| *id >= keep)
            .collect();
        for block_id in stale {
            self.cache.remove(&block_id);
        }
        tracing::debug!(
            target: "graphstats.storage",
            file_id = self.file_id,
            from = self.len,
            to = new_len,
            "truncated row file"
        );
        self.len = new_len;
        Ok(true)
    }
}

impl std::fmt::Debug for RowFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowFile")
            .field("file_id", &self.file_id)
            .field("path", &self.path)
            .field("open", &self.file.is_some())
            .field("len", &self.len)
            .field("cached_blocks", &self.cache.len())
            .finish()
    }
}

/// Reads `len` bytes at `offset`, zero-filling past the end of the file.
fn read_padded(file: &mut File, offset: u64, len: usize) -> io::Result<Vec<u8>> {
    let mut buf = vec![0; len];
    file.seek(SeekFrom::Start(offset))?;
    let mut filled = 0;
    while filled < len {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(buf)
}

fn write_at(file: &mut File, offset: u64, bytes: &[u8]) -> io::Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(bytes)
}
