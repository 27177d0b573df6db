use std::collections::BTreeMap;

use crate::layout::RowId;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FreeSpaceError {
    #[error("expected the next unused id followed by start/length pairs, got {0} values")]
    MalformedData(usize),

    #[error("free range {start}+{len} is empty, overlaps another range or ends past {next_unused}")]
    InvalidRange {
        start: RowId,
        len: u64,
        next_unused: RowId,
    },

    #[error("row {0} is not allocated")]
    NotAllocated(RowId),
}

/// Allocator of reusable row ids.
///
/// Ids below `next_unused` are either allocated or inside one of the released
/// ranges. Allocation always returns the smallest free id. Released ids are
/// recorded one by one; [`FreeSpaceIndex::defrag`] merges adjacent ranges and
/// gives a free tail back to `next_unused`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FreeSpaceIndex {
    next_unused: RowId,
    free: BTreeMap<RowId, u64>,
    free_count: u64,
}

impl FreeSpaceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restores an index from [`FreeSpaceIndex::data`]. Empty data yields an
    /// empty index.
    pub fn from_data(data: &[u64]) -> Result<Self, FreeSpaceError> {
        let Some((&next_unused, ranges)) = data.split_first() else {
            return Ok(Self::new());
        };
        if ranges.len() % 2 != 0 {
            return Err(FreeSpaceError::MalformedData(data.len()));
        }

        let mut index = Self {
            next_unused,
            ..Self::default()
        };
        for pair in ranges.chunks_exact(2) {
            let (start, len) = (pair[0], pair[1]);
            let invalid = FreeSpaceError::InvalidRange {
                start,
                len,
                next_unused,
            };
            let end = start.checked_add(len).ok_or(invalid.clone())?;
            if len == 0 || end > next_unused || index.overlaps(start, end) {
                return Err(invalid);
            }
            index.free.insert(start, len);
            index.free_count += len;
        }
        Ok(index)
    }

    /// Serialised form: `[next_unused, start_1, len_1, start_2, len_2, ...]`.
    pub fn data(&self) -> Vec<u64> {
        let mut data = Vec::with_capacity(1 + self.free.len() * 2);
        data.push(self.next_unused);
        for (&start, &len) in &self.free {
            data.push(start);
            data.push(len);
        }
        data
    }

    pub fn next_unused(&self) -> RowId {
        self.next_unused
    }

    pub fn used_count(&self) -> u64 {
        self.next_unused - self.free_count
    }

    pub fn free_count(&self) -> u64 {
        self.free_count
    }

    /// Number of separate released ranges.
    pub fn fragments(&self) -> usize {
        self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.used_count() == 0
    }

    pub fn is_used(&self, id: RowId) -> bool {
        id < self.next_unused && !self.is_free(id)
    }

    fn is_free(&self, id: RowId) -> bool {
        self.free
            .range(..=id)
            .next_back()
            .is_some_and(|(&start, &len)| id < start + len)
    }

    fn overlaps(&self, start: RowId, end: RowId) -> bool {
        let before = self
            .free
            .range(..start)
            .next_back()
            .is_some_and(|(&s, &len)| s + len > start);
        let inside = self.free.range(start..end).next().is_some();
        before || inside
    }

    pub fn allocate(&mut self) -> RowId {
        let Some((start, len)) = self.free.pop_first() else {
            let id = self.next_unused;
            self.next_unused += 1;
            return id;
        };
        if len > 1 {
            self.free.insert(start + 1, len - 1);
        }
        self.free_count -= 1;
        start
    }

    pub fn release(&mut self, id: RowId) -> Result<(), FreeSpaceError> {
        if !self.is_used(id) {
            return Err(FreeSpaceError::NotAllocated(id));
        }
        self.free.insert(id, 1);
        self.free_count += 1;
        Ok(())
    }

    /// All released ids in ascending order.
    pub fn free_ids(&self) -> impl Iterator<Item = RowId> + '_ {
        self.free
            .iter()
            .flat_map(|(&start, &len)| start..start + len)
    }

    /// Coalesces adjacent ranges and shrinks `next_unused` past a free tail.
    /// Returns whether anything changed.
    pub fn defrag(&mut self) -> bool {
        let before = (self.free.len(), self.next_unused);

        let mut merged: BTreeMap<RowId, u64> = BTreeMap::new();
        let mut current: Option<(RowId, u64)> = None;
        for (&start, &len) in &self.free {
            current = match current {
                Some((s, l)) if s + l == start => Some((s, l + len)),
                Some((s, l)) => {
                    merged.insert(s, l);
                    Some((start, len))
                }
                None => Some((start, len)),
            };
        }
        if let Some((s, l)) = current {
            if s + l == self.next_unused {
                self.next_unused = s;
                self.free_count -= l;
            } else {
                merged.insert(s, l);
            }
        }
        self.free = merged;

        before != (self.free.len(), self.next_unused)
    }
}
