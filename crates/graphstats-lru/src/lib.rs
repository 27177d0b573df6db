//! Recency tracking with O(1) operations.
//!
//! [`LruIndex`] is a doubly linked list of key/value nodes plus a key map. The
//! list is stored in an arena and links are arena indices, so there are no
//! reference cycles and no `unsafe`. Iteration runs from the least recently
//! used entry (head) to the most recently used entry (tail).
//!
//! [`LruCache`] adds a capacity bound on top of the index: inserting into a full
//! cache evicts the head first and hands the evicted entry back to the caller,
//! who decides what to do with it (write it back, close it, drop it).

mod cache;
mod index;

pub use cache::LruCache;
pub use index::{Iter, LruIndex};
