//! Graph statistics database.
//!
//! Counts, per resource and per graph chunk, how often the resource occurs as
//! subject, property and object, plus the total occurrences. Rows live in
//! partition files managed by [`graphstats_storage::StorageAccessor`]s that
//! cache themselves in memory while a shared budget allows.

mod database;
mod error;
pub mod id;
mod meta;
mod row;

pub use database::{DatabaseSpaceReport, StatisticsDatabase};
pub use error::{Result, StatsError};
pub use row::ResourceStatistics;
