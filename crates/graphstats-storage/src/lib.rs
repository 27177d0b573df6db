//! Row storage with in-memory caching and one-way demotion to disk.
//!
//! The crate is layered like this:
//! - [`RowStorage`] is the contract shared by both backends: rows are fixed
//!   length byte records addressed by a 64-bit [`RowId`], grouped into blocks
//!   of [`BlockLayout::rows_per_block`] rows.
//! - [`InMemoryRowStorage`] keeps blocks in an ordered map and rejects writes
//!   that would need a new block once its budget (fixed, or granted by a
//!   shared [`graphstats_space::SpaceManager`]) is exhausted.
//! - [`RowFile`] is a random-access file with the same addressing, so blocks
//!   move between the two backends as plain byte copies.
//! - [`StorageAccessor`] owns one row file and decides at open time whether it
//!   can be served from memory. A rejected cache write demotes it to the file
//!   for the rest of the session.
//! - [`ExtraStorageAccessor`] hands out reusable row ids from a
//!   [`FreeSpaceIndex`] for overflow records.
//!
//! ## Absent rows
//! Both backends treat an all-zero row as "never written": `read_row` returns
//! `None` for it. Callers that need to persist an otherwise empty record must
//! set at least one non-zero byte.
//!
//! ## Threading
//! Accessors are single-writer: every operation takes `&mut self` and nothing
//! inside is synchronised. Only the shared space budget is safe to use from
//! many threads at once.

mod accessor;
mod error;
mod extra;
mod file;
mod free_space;
mod layout;
mod memory;
mod row_storage;

pub use accessor::{AccessorOptions, CachePolicy, StorageAccessor, DEFAULT_BLOCK_SIZE};
pub use error::{Result, StorageError};
pub use extra::ExtraStorageAccessor;
pub use file::{RowFile, RowFileStats};
pub use free_space::{FreeSpaceError, FreeSpaceIndex};
pub use layout::{Block, BlockId, BlockLayout, FileId, RowId};
pub use memory::{CacheBudget, InMemoryRowStorage};
pub use row_storage::{BlockIter, RowStorage, WriteOutcome};
