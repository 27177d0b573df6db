use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use graphstats_config::GraphStatsConfig;
use graphstats_lru::LruCache;
use graphstats_space::{OwnerId, SpaceManager, SpaceReport};
use graphstats_storage::{
    AccessorOptions, BlockLayout, CachePolicy, ExtraStorageAccessor, FileId, RowId, RowStorage,
    StorageAccessor,
};
use serde::Serialize;

use crate::error::{Result, StatsError};
use crate::id::{local_id, owner_of, with_owner};
use crate::meta::{remove_metadata, Metadata};
use crate::row::{Counters, ResourceStatistics, RowCodec, StoredRow};

const OVERFLOW_FILE: &str = "overflow.rows";
const OVERFLOW_FILE_ID: FileId = u64::MAX;
const PARTITION_PREFIX: &str = "partition-";
const PARTITION_SUFFIX: &str = ".rows";

#[derive(Debug, Clone, Serialize)]
pub struct DatabaseSpaceReport {
    pub open_partitions: usize,
    pub cached_partitions: usize,
    /// Shared budget of the partition accessors, if sharing is enabled.
    pub partitions: Option<SpaceReport>,
    pub overflow: Option<SpaceReport>,
}

/// Per-resource occurrence counters of an RDF graph, partitioned over row
/// files.
///
/// A resource's local id (its low 48 bits) picks the partition file and the
/// row inside it. Counters are `u32` in the partition row; a row whose counter
/// would overflow moves all its counters to a `u64` row in the overflow store.
pub struct StatisticsDatabase {
    dir: PathBuf,
    codec: RowCodec,
    rows_per_file: u64,
    options: AccessorOptions,
    partition_policy: CachePolicy,
    partition_space: Option<SpaceManager>,
    overflow_space: Option<SpaceManager>,
    overflow_policy: CachePolicy,
    block_bytes: u64,
    partitions: LruCache<FileId, StorageAccessor>,
    owners: HashMap<OwnerId, FileId>,
    overflow: Option<ExtraStorageAccessor>,
    chunk_sizes: Vec<u64>,
    owner_load: Vec<u64>,
}

fn cache_policy(shared: bool, bytes: u64) -> (Option<SpaceManager>, CachePolicy) {
    if shared {
        let manager = SpaceManager::new(bytes);
        (Some(manager.clone()), CachePolicy::Shared(manager))
    } else {
        (
            None,
            CachePolicy::Fixed {
                max_cache_bytes: bytes,
            },
        )
    }
}

impl StatisticsDatabase {
    pub fn open(config: &GraphStatsConfig) -> Result<Self> {
        config.validate()?;
        let storage = &config.storage;
        let dir = storage.dir.clone();
        fs::create_dir_all(&dir)?;

        let meta = Metadata::load_or_new(&dir, storage.chunks, storage.rows_per_file)?;
        let codec = RowCodec::new(storage.chunks);
        let options = AccessorOptions {
            block_size: storage.block_size.0 as usize,
            file_cache_blocks: storage.file_cache_blocks,
        };
        let (partition_space, partition_policy) =
            cache_policy(config.space.shared, config.space.total_bytes.0);
        let (overflow_space, overflow_policy) =
            cache_policy(config.space.shared, config.space.extra_total_bytes.0);
        let block_bytes =
            BlockLayout::new(0, codec.row_len(), options.block_size)?.block_size() as u64;

        let overflow = ExtraStorageAccessor::new(
            dir.join(OVERFLOW_FILE),
            OVERFLOW_FILE_ID,
            codec.overflow_row_len(),
            overflow_policy.clone(),
            options,
            &meta.overflow_free_space,
        )?;

        tracing::info!(
            target: "graphstats.db",
            dir = %dir.display(),
            chunks = storage.chunks,
            rows_per_file = storage.rows_per_file,
            shared = config.space.shared,
            "opened statistics database"
        );

        Ok(Self {
            dir,
            codec,
            rows_per_file: storage.rows_per_file,
            options,
            partition_policy,
            partition_space,
            overflow_space,
            overflow_policy,
            block_bytes,
            partitions: LruCache::new(storage.max_open_files.max(1)),
            owners: HashMap::new(),
            overflow: Some(overflow),
            chunk_sizes: meta.chunk_sizes,
            owner_load: meta.owner_load,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn chunks(&self) -> usize {
        self.codec.chunks()
    }

    pub fn increment_subject_count(&mut self, subject: u64, chunk: u16) -> Result<()> {
        let column = self.chunk_column(chunk)?;
        self.increment(subject, column)
    }

    pub fn increment_property_count(&mut self, property: u64, chunk: u16) -> Result<()> {
        let column = self.chunks() + self.chunk_column(chunk)?;
        self.increment(property, column)
    }

    pub fn increment_object_count(&mut self, object: u64, chunk: u16) -> Result<()> {
        let column = 2 * self.chunks() + self.chunk_column(chunk)?;
        self.increment(object, column)
    }

    pub fn increment_resource_occurrences(&mut self, resource: u64) -> Result<()> {
        self.increment(resource, 3 * self.chunks())
    }

    pub fn increment_triples_per_chunk(&mut self, chunk: u16) -> Result<()> {
        self.ensure_open()?;
        let column = self.chunk_column(chunk)?;
        self.chunk_sizes[column] += 1;
        Ok(())
    }

    /// Records one quad `(subject, property, object)` stored in `chunk`.
    pub fn count_quad(&mut self, subject: u64, property: u64, object: u64, chunk: u16) -> Result<()> {
        self.chunk_column(chunk)?;
        self.increment_subject_count(subject, chunk)?;
        self.increment_property_count(property, chunk)?;
        self.increment_object_count(object, chunk)?;
        for resource in [subject, property, object] {
            self.increment_resource_occurrences(resource)?;
        }
        self.increment_triples_per_chunk(chunk)
    }

    /// Returns `None` if nothing was counted for `resource` under its current
    /// owner.
    pub fn statistics(&mut self, resource: u64) -> Result<Option<ResourceStatistics>> {
        let Some(stored) = self.read_stored(resource, false)? else {
            return Ok(None);
        };
        if stored.owner != owner_of(resource) {
            return Ok(None);
        }
        let counters = self.load_counters(resource, &stored.counters)?;
        Ok(Some(ResourceStatistics::from_columns(
            resource,
            stored.owner,
            self.chunks(),
            &counters,
        )))
    }

    pub fn chunk_sizes(&self) -> Vec<u64> {
        self.chunk_sizes.clone()
    }

    /// Number of resources per owner.
    pub fn owner_load(&self) -> Vec<u64> {
        self.owner_load.clone()
    }

    /// Moves an unassigned resource to `owner` and returns its new id.
    ///
    /// The id's current owner must be `0` or already `owner`. The statistics
    /// row stays where it is; only the owner recorded in it changes.
    pub fn set_owner(&mut self, old_id: u64, owner: u16) -> Result<u64> {
        self.ensure_open()?;
        self.check_owner(owner)?;
        let old_owner = owner_of(old_id);
        if old_owner != 0 && old_owner != owner {
            return Err(StatsError::OwnerConflict {
                resource: old_id,
                owner: old_owner,
            });
        }
        if old_owner == owner {
            return Ok(old_id);
        }

        let new_id = with_owner(old_id, owner);
        let Some(mut stored) = self.read_stored(old_id, false)? else {
            return Ok(new_id);
        };
        if stored.owner != old_owner {
            return Err(StatsError::OwnerConflict {
                resource: old_id,
                owner: stored.owner,
            });
        }
        stored.owner = owner;
        self.write_stored(new_id, &stored)?;

        let old_load = &mut self.owner_load[usize::from(old_owner)];
        *old_load = old_load.saturating_sub(1);
        self.owner_load[usize::from(owner)] += 1;
        Ok(new_id)
    }

    /// Forgets everything counted for `resource`. Returns whether there was
    /// anything to forget.
    pub fn remove_statistics(&mut self, resource: u64) -> Result<bool> {
        let owner = owner_of(resource);
        let Some(stored) = self.read_stored(resource, false)? else {
            return Ok(false);
        };
        if stored.owner != owner {
            return Ok(false);
        }
        if let Counters::Spilled(overflow_row) = stored.counters {
            self.overflow()?.delete_row(overflow_row)?;
        }
        let (file_id, row_id) = self.locate(resource);
        self.open_partition(file_id)?.write_row(row_id, &[])?;

        let load = &mut self.owner_load[usize::from(owner)];
        *load = load.saturating_sub(1);
        Ok(true)
    }

    /// Visits every resource with statistics, partition by partition in row
    /// order.
    pub fn for_each_resource(&mut self, mut f: impl FnMut(ResourceStatistics)) -> Result<()> {
        self.ensure_open()?;
        for file_id in self.partition_file_ids()? {
            for (local, stored) in self.partition_rows(file_id)? {
                let resource = with_owner(local, stored.owner);
                let counters = self.load_counters(resource, &stored.counters)?;
                f(ResourceStatistics::from_columns(
                    resource,
                    stored.owner,
                    self.chunks(),
                    &counters,
                ));
            }
        }
        Ok(())
    }

    /// Demotes cached partitions, least recently active first, until `bytes`
    /// of the shared budget are free. Returns whether they are.
    pub fn make_room(&mut self, bytes: u64) -> Result<bool> {
        self.ensure_open()?;
        self.make_room_for(bytes)
    }

    pub fn space_report(&self) -> DatabaseSpaceReport {
        DatabaseSpaceReport {
            open_partitions: self.partitions.len(),
            cached_partitions: self
                .partitions
                .iter()
                .filter(|(_, accessor)| accessor.is_cached())
                .count(),
            partitions: self.partition_space.as_ref().map(SpaceManager::report),
            overflow: self.overflow_space.as_ref().map(SpaceManager::report),
        }
    }

    /// Writes every open partition, the overflow store and the metadata.
    pub fn flush(&mut self) -> Result<()> {
        self.ensure_open()?;
        let open: Vec<FileId> = self.partitions.iter().map(|(id, _)| *id).collect();
        for file_id in open {
            if let Some(accessor) = self.partitions.peek_mut(&file_id) {
                accessor.flush()?;
            }
        }
        self.overflow()?.flush()?;
        self.store_metadata()?;
        tracing::debug!(target: "graphstats.db", dir = %self.dir.display(), "flushed statistics");
        Ok(())
    }

    /// Deletes all statistics, on disk and in memory.
    pub fn clear(&mut self) -> Result<()> {
        self.ensure_open()?;
        while let Some((_, mut accessor)) = self.partitions.pop_lru() {
            accessor.delete()?;
        }
        self.owners.clear();
        for file_id in self.partition_file_ids()? {
            remove_if_exists(&self.partition_path(file_id))?;
        }

        self.overflow()?.delete()?;
        self.overflow = Some(ExtraStorageAccessor::new(
            self.dir.join(OVERFLOW_FILE),
            OVERFLOW_FILE_ID,
            self.codec.overflow_row_len(),
            self.overflow_policy.clone(),
            self.options,
            &[],
        )?);

        self.chunk_sizes.fill(0);
        self.owner_load.fill(0);
        remove_metadata(&self.dir)?;
        tracing::info!(target: "graphstats.db", dir = %self.dir.display(), "cleared statistics");
        Ok(())
    }

    /// Closes every partition and persists the metadata. Later calls do
    /// nothing; every other operation fails with [`StatsError::Closed`].
    pub fn close(&mut self) -> Result<()> {
        let Some(mut overflow) = self.overflow.take() else {
            return Ok(());
        };
        let mut first_error: Option<StatsError> = None;
        let mut record = |result: Result<()>| {
            if let Err(err) = result {
                first_error.get_or_insert(err);
            }
        };

        while let Some((_, mut accessor)) = self.partitions.pop_lru() {
            record(accessor.close().map_err(StatsError::from));
        }
        self.owners.clear();

        overflow.defrag_free_space_index();
        let meta = self.metadata(&overflow);
        record(meta.store(&self.dir));
        record(overflow.close().map_err(StatsError::from));

        tracing::info!(target: "graphstats.db", dir = %self.dir.display(), "closed statistics database");
        first_error.map_or(Ok(()), Err)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.overflow.is_none() {
            return Err(StatsError::Closed);
        }
        Ok(())
    }

    fn overflow(&mut self) -> Result<&mut ExtraStorageAccessor> {
        self.overflow.as_mut().ok_or(StatsError::Closed)
    }

    fn chunk_column(&self, chunk: u16) -> Result<usize> {
        let column = usize::from(chunk);
        if column >= self.chunks() {
            return Err(StatsError::InvalidChunk {
                chunk,
                chunks: self.chunks() as u32,
            });
        }
        Ok(column)
    }

    fn check_owner(&self, owner: u16) -> Result<()> {
        if usize::from(owner) >= self.owner_load.len() {
            return Err(StatsError::InvalidOwner {
                owner,
                chunks: self.chunks() as u32,
            });
        }
        Ok(())
    }

    fn locate(&self, resource: u64) -> (FileId, RowId) {
        let local = local_id(resource);
        (local / self.rows_per_file, local % self.rows_per_file)
    }

    fn partition_path(&self, file_id: FileId) -> PathBuf {
        self.dir
            .join(format!("{PARTITION_PREFIX}{file_id}{PARTITION_SUFFIX}"))
    }

    fn partition_file_ids(&self) -> Result<Vec<FileId>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let name = entry?.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let id = name
                .strip_prefix(PARTITION_PREFIX)
                .and_then(|rest| rest.strip_suffix(PARTITION_SUFFIX))
                .and_then(|id| id.parse::<FileId>().ok());
            ids.extend(id);
        }
        ids.sort_unstable();
        Ok(ids)
    }

    /// Returns the accessor for `file_id`, opening it if needed. With
    /// `create == false` a partition without a file yields `None`.
    fn partition(&mut self, file_id: FileId, create: bool) -> Result<Option<&mut StorageAccessor>> {
        self.ensure_open()?;
        if !self.partitions.contains_key(&file_id) {
            let path = self.partition_path(file_id);
            if !create && !path.exists() {
                return Ok(None);
            }
            self.make_room_for(self.block_bytes)?;
            let accessor = StorageAccessor::new(
                path,
                file_id,
                self.codec.row_len(),
                self.partition_policy.clone(),
                self.options,
                true,
            )?;
            if let Some(owner) = accessor.owner_id() {
                self.owners.insert(owner, file_id);
            }
            if let Some((evicted_id, evicted)) = self.partitions.put(file_id, accessor) {
                self.retire(evicted_id, evicted)?;
            }
        }
        Ok(self.partitions.get_mut(&file_id))
    }

    fn open_partition(&mut self, file_id: FileId) -> Result<&mut StorageAccessor> {
        self.partition(file_id, true)?.ok_or_else(|| {
            StatsError::Corrupted(format!("partition {file_id} could not be kept open"))
        })
    }

    fn retire(&mut self, file_id: FileId, mut accessor: StorageAccessor) -> Result<()> {
        if let Some(owner) = accessor.owner_id() {
            self.owners.remove(&owner);
        }
        accessor.close()?;
        tracing::debug!(target: "graphstats.db", file_id, "closed least recently used partition");
        Ok(())
    }

    fn make_room_for(&mut self, bytes: u64) -> Result<bool> {
        let Some(manager) = self.partition_space.clone() else {
            return Ok(true);
        };
        if manager.is_available(bytes) {
            return Ok(true);
        }
        for owner in manager.eviction_candidates(None) {
            let Some(&file_id) = self.owners.get(&owner) else {
                continue;
            };
            if let Some(accessor) = self.partitions.peek_mut(&file_id) {
                if accessor.make_room()? {
                    tracing::debug!(
                        target: "graphstats.db",
                        file_id,
                        bytes,
                        "moved partition to file to free shared space"
                    );
                }
            }
            if manager.is_available(bytes) {
                return Ok(true);
            }
        }
        Ok(manager.is_available(bytes))
    }

    fn read_stored(&mut self, resource: u64, create: bool) -> Result<Option<StoredRow>> {
        let (file_id, row_id) = self.locate(resource);
        let Some(accessor) = self.partition(file_id, create)? else {
            return Ok(None);
        };
        let Some(bytes) = accessor.read_row(row_id)? else {
            return Ok(None);
        };
        self.codec.decode(&bytes).map(Some)
    }

    fn write_stored(&mut self, resource: u64, row: &StoredRow) -> Result<()> {
        let bytes = self.codec.encode(row);
        let (file_id, row_id) = self.locate(resource);
        self.open_partition(file_id)?.write_row(row_id, &bytes)?;
        Ok(())
    }

    fn load_counters(&mut self, resource: u64, counters: &Counters) -> Result<Vec<u64>> {
        match counters {
            Counters::Inline(counters) => Ok(counters.clone()),
            Counters::Spilled(overflow_row) => {
                let bytes = self.overflow()?.read_row(*overflow_row)?.ok_or_else(|| {
                    StatsError::Corrupted(format!(
                        "resource {resource:#x} points to missing overflow row {overflow_row}"
                    ))
                })?;
                self.codec.decode_overflow(&bytes)
            }
        }
    }

    fn increment(&mut self, resource: u64, column: usize) -> Result<()> {
        let owner = owner_of(resource);
        self.check_owner(owner)?;

        let Some(stored) = self.read_stored(resource, true)? else {
            let mut counters = vec![0; self.codec.columns()];
            counters[column] = 1;
            let row = StoredRow {
                owner,
                counters: Counters::Inline(counters),
            };
            self.write_stored(resource, &row)?;
            self.owner_load[usize::from(owner)] += 1;
            return Ok(());
        };
        if stored.owner != owner {
            return Err(StatsError::OwnerConflict {
                resource,
                owner: stored.owner,
            });
        }

        match stored.counters {
            Counters::Inline(mut counters) => {
                counters[column] += 1;
                if RowCodec::fits_inline(&counters) {
                    let row = StoredRow {
                        owner,
                        counters: Counters::Inline(counters),
                    };
                    return self.write_stored(resource, &row);
                }
                let bytes = self.codec.encode_overflow(&counters);
                let overflow_row = self.overflow()?.write_row(&bytes)?;
                let row = StoredRow {
                    owner,
                    counters: Counters::Spilled(overflow_row),
                };
                self.write_stored(resource, &row)?;
                tracing::debug!(
                    target: "graphstats.db",
                    resource,
                    overflow_row,
                    "moved counters to overflow storage"
                );
                Ok(())
            }
            Counters::Spilled(overflow_row) => {
                let mut counters =
                    self.load_counters(resource, &Counters::Spilled(overflow_row))?;
                counters[column] = counters[column]
                    .checked_add(1)
                    .ok_or(StatsError::CounterOverflow { resource, column })?;
                let bytes = self.codec.encode_overflow(&counters);
                self.overflow()?.update_row(overflow_row, &bytes)?;
                Ok(())
            }
        }
    }

    fn partition_rows(&mut self, file_id: FileId) -> Result<Vec<(u64, StoredRow)>> {
        let codec = self.codec;
        let first_local = file_id * self.rows_per_file;
        let Some(accessor) = self.partition(file_id, false)? else {
            return Ok(Vec::new());
        };
        let rows_per_block = accessor.layout().rows_per_block();
        let row_len = accessor.row_len();

        let mut rows = Vec::new();
        for block in accessor.blocks()? {
            let block = block?;
            for (index, bytes) in block.bytes.chunks_exact(row_len).enumerate() {
                if bytes.iter().all(|&b| b == 0) {
                    continue;
                }
                let row_id = block.id * rows_per_block + index as u64;
                rows.push((first_local + row_id, codec.decode(bytes)?));
            }
        }
        Ok(rows)
    }

    fn metadata(&self, overflow: &ExtraStorageAccessor) -> Metadata {
        Metadata {
            chunk_sizes: self.chunk_sizes.clone(),
            owner_load: self.owner_load.clone(),
            overflow_free_space: overflow.free_space_data(),
            ..Metadata::new(self.chunks() as u32, self.rows_per_file)
        }
    }

    fn store_metadata(&mut self) -> Result<()> {
        let overflow = self.overflow.as_ref().ok_or(StatsError::Closed)?;
        self.metadata(overflow).store(&self.dir)
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

impl Drop for StatisticsDatabase {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::warn!(
                target: "graphstats.db",
                dir = %self.dir.display(),
                error = %err,
                "failed to close statistics database on drop"
            );
        }
    }
}

impl std::fmt::Debug for StatisticsDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatisticsDatabase")
            .field("dir", &self.dir)
            .field("chunks", &self.chunks())
            .field("rows_per_file", &self.rows_per_file)
            .field("open_partitions", &self.partitions.len())
            .field("closed", &self.overflow.is_none())
            .finish()
    }
}
