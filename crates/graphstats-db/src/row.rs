use graphstats_storage::RowId;
use serde::Serialize;

use crate::error::{Result, StatsError};

const PRESENT: u8 = 1;
const SPILLED: u8 = 2;
const HEADER_LEN: usize = 3;

/// Statistics kept for one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceStatistics {
    pub resource: u64,
    pub owner: u16,
    /// Occurrences as subject, per chunk.
    pub subject: Vec<u64>,
    pub property: Vec<u64>,
    pub object: Vec<u64>,
    /// Total occurrences in any position.
    pub occurrences: u64,
}

impl ResourceStatistics {
    pub(crate) fn from_columns(resource: u64, owner: u16, chunks: usize, columns: &[u64]) -> Self {
        Self {
            resource,
            owner,
            subject: columns[..chunks].to_vec(),
            property: columns[chunks..2 * chunks].to_vec(),
            object: columns[2 * chunks..3 * chunks].to_vec(),
            occurrences: columns[3 * chunks],
        }
    }

    /// Counters in column order: subject per chunk, property per chunk, object
    /// per chunk, then total occurrences.
    pub fn columns(&self) -> Vec<u64> {
        let mut columns = Vec::with_capacity(self.subject.len() * 3 + 1);
        columns.extend_from_slice(&self.subject);
        columns.extend_from_slice(&self.property);
        columns.extend_from_slice(&self.object);
        columns.push(self.occurrences);
        columns
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Counters {
    Inline(Vec<u64>),
    /// Counters live in the overflow store under this row id.
    Spilled(RowId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StoredRow {
    pub owner: u16,
    pub counters: Counters,
}

/// Fixed-length partition row:
///
/// | bytes | content |
/// |---|---|
/// | 0 | flags (`PRESENT`, `SPILLED`) |
/// | 1..3 | owner, u16 LE |
/// | 3.. | one u32 LE per column, or the overflow row id when spilled |
///
/// Overflow rows hold one u64 LE per column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RowCodec {
    chunks: usize,
}

impl RowCodec {
    pub fn new(chunks: u32) -> Self {
        Self {
            chunks: chunks as usize,
        }
    }

    pub fn chunks(&self) -> usize {
        self.chunks
    }

    pub fn columns(&self) -> usize {
        3 * self.chunks + 1
    }

    pub fn row_len(&self) -> usize {
        HEADER_LEN + 4 * self.columns()
    }

    pub fn overflow_row_len(&self) -> usize {
        8 * self.columns()
    }

    pub fn fits_inline(counters: &[u64]) -> bool {
        counters.iter().all(|&c| c <= u64::from(u32::MAX))
    }

    pub fn decode(&self, row: &[u8]) -> Result<StoredRow> {
        if row.len() < self.row_len() {
            return Err(StatsError::Corrupted(format!(
                "row has {} bytes, expected {}",
                row.len(),
                self.row_len()
            )));
        }
        let flags = row[0];
        if flags & PRESENT == 0 {
            return Err(StatsError::Corrupted(format!(
                "row without presence flag (flags {flags:#04x})"
            )));
        }
        let owner = u16::from_le_bytes([row[1], row[2]]);
        let body = &row[HEADER_LEN..self.row_len()];

        let counters = if flags & SPILLED != 0 {
            Counters::Spilled(u64::from_le_bytes(read_array(&body[..8])))
        } else {
            Counters::Inline(
                body.chunks_exact(4)
                    .map(|c| u64::from(u32::from_le_bytes(read_array(c))))
                    .collect(),
            )
        };
        Ok(StoredRow { owner, counters })
    }

    /// Counters must fit in `u32`; see [`RowCodec::fits_inline`].
    pub fn encode_inline(&self, owner: u16, counters: &[u64]) -> Vec<u8> {
        let mut row = self.header(PRESENT, owner);
        for &counter in counters {
            row.extend_from_slice(&(counter as u32).to_le_bytes());
        }
        row
    }

    pub fn encode_spilled(&self, owner: u16, overflow_row: RowId) -> Vec<u8> {
        let mut row = self.header(PRESENT | SPILLED, owner);
        row.extend_from_slice(&overflow_row.to_le_bytes());
        row.resize(self.row_len(), 0);
        row
    }

    pub fn encode(&self, row: &StoredRow) -> Vec<u8> {
        match &row.counters {
            Counters::Inline(counters) => self.encode_inline(row.owner, counters),
            Counters::Spilled(overflow_row) => self.encode_spilled(row.owner, *overflow_row),
        }
    }

    pub fn encode_overflow(&self, counters: &[u64]) -> Vec<u8> {
        counters.iter().flat_map(|c| c.to_le_bytes()).collect()
    }

    pub fn decode_overflow(&self, row: &[u8]) -> Result<Vec<u64>> {
        if row.len() < self.overflow_row_len() {
            return Err(StatsError::Corrupted(format!(
                "overflow row has {} bytes, expected {}",
                row.len(),
                self.overflow_row_len()
            )));
        }
        Ok(row[..self.overflow_row_len()]
            .chunks_exact(8)
            .map(|c| u64::from_le_bytes(read_array(c)))
            .collect())
    }

    fn header(&self, flags: u8, owner: u16) -> Vec<u8> {
        let mut row = Vec::with_capacity(self.row_len());
        row.push(flags);
        row.extend_from_slice(&owner.to_le_bytes());
        row
    }
}

fn read_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_length_follows_chunk_count() {
        let codec = RowCodec::new(4);
        assert_eq!(codec.columns(), 13);
        assert_eq!(codec.row_len(), 3 + 4 * 13);
        assert_eq!(codec.overflow_row_len(), 8 * 13);
    }

    #[test]
    fn inline_rows_decode_to_their_counters() {
        let codec = RowCodec::new(1);
        let row = codec.encode_inline(5, &[1, 2, 3, u64::from(u32::MAX)]);
        assert_eq!(row.len(), codec.row_len());
        assert_eq!(row[0], PRESENT);
        assert_eq!(
            codec.decode(&row).unwrap(),
            StoredRow {
                owner: 5,
                counters: Counters::Inline(vec![1, 2, 3, u64::from(u32::MAX)]),
            }
        );
    }

    #[test]
    fn spilled_rows_point_to_overflow() {
        let codec = RowCodec::new(2);
        let row = codec.encode_spilled(1, 42);
        assert_eq!(row.len(), codec.row_len());
        assert_eq!(
            codec.decode(&row).unwrap().counters,
            Counters::Spilled(42)
        );

        let counters = vec![1, 0, 0, 0, 0, 0, u64::from(u32::MAX) + 1];
        let overflow = codec.encode_overflow(&counters);
        assert_eq!(overflow.len(), codec.overflow_row_len());
        assert_eq!(codec.decode_overflow(&overflow).unwrap(), counters);
        assert!(!RowCodec::fits_inline(&counters));
    }

    #[test]
    fn rows_without_presence_flag_are_corrupt() {
        let codec = RowCodec::new(1);
        let mut row = codec.encode_inline(0, &[1, 0, 0, 1]);
        row[0] = 0;
        assert!(matches!(codec.decode(&row), Err(StatsError::Corrupted(_))));
        assert!(matches!(codec.decode(&row[..4]), Err(StatsError::Corrupted(_))));
    }

    #[test]
    fn statistics_split_columns_by_position() {
        let stats = ResourceStatistics::from_columns(9, 0, 2, &[1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(stats.subject, vec![1, 2]);
        assert_eq!(stats.property, vec![3, 4]);
        assert_eq!(stats.object, vec![5, 6]);
        assert_eq!(stats.occurrences, 7);
        assert_eq!(stats.columns(), vec![1, 2, 3, 4, 5, 6, 7]);
    }
}
