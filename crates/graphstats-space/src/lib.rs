//! A single memory budget shared by many independently opened row stores.
//!
//! Every store that wants to keep rows in memory registers with the
//! [`SpaceManager`] and asks for bytes before it allocates them. The manager
//! does not own memory; it only meters a budget that owners voluntarily
//! respect:
//! - [`SpaceManager::request`] grants or denies atomically and never evicts on
//!   the caller's behalf. A denied owner is expected to shed its own cache.
//! - Every grant is paired with [`SpaceManager::release`] or
//!   [`SpaceManager::release_all`] when the owner drops or demotes its cache.
//!   Dropping a [`SpaceRegistration`] releases whatever is still held.
//! - The manager remembers which owners were granted space most recently, so
//!   callers that need room can pick victims least-recently-active first
//!   ([`SpaceManager::eviction_candidates`]).
//!
//! All accounting happens under one lock, so `request`, `release` and
//! `is_available` are atomic with respect to each other even when owners run
//! on different threads.

mod manager;
mod pressure;
mod report;
mod size;

pub use manager::{OwnerId, SpaceHandle, SpaceManager, SpaceRegistration};
pub use pressure::{SpacePressure, SpacePressureThresholds};
pub use report::{OwnerUsage, SpaceReport};
pub use size::{parse_byte_size, GB, KB, MB};
