//! 🧩 Chunk planning: how big each part is, how many there are, and where each one starts.
//!
//! Chunk size is `max(min_chunk_size, ceil(len / max_parts))`. The ceiling matters: with
//! plain division a 999.5-part object would need 1001 parts. With it, the part count is
//! at most `max_parts` for every length the chunked strategy accepts.

use std::ops::Range;

use crate::replicator::ReplicatorLimits;

/// 📏 The part size used for an object of `len` bytes.
pub fn chunk_size_for(len: u64, limits: &ReplicatorLimits) -> u64 {
    let the_floor = limits.min_chunk_size.max(1);
    let the_spread = len.div_ceil(limits.max_parts.max(1));
    the_floor.max(the_spread)
}

/// 🧩 One planned part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedChunk {
    pub part_number: i32,
    pub range: Range<u64>,
}

/// 🗺️ The byte ranges of a chunked copy, numbered from 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPlan {
    len: u64,
    chunk_size: u64,
}

impl ChunkPlan {
    pub fn new(len: u64, limits: &ReplicatorLimits) -> Self {
        Self {
            len,
            chunk_size: chunk_size_for(len, limits),
        }
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn part_count(&self) -> u64 {
        self.len.div_ceil(self.chunk_size)
    }

    /// 📍 The range of the part starting at `offset`. The last one is cut short at `len`.
    /// `None` once `offset` reaches the end.
    pub fn range_at(&self, offset: u64) -> Option<Range<u64>> {
        if offset >= self.len {
            return None;
        }
        Some(offset..(offset + self.chunk_size).min(self.len))
    }

    pub fn chunks(&self) -> impl Iterator<Item = PlannedChunk> + '_ {
        let mut offset = 0;
        let mut part_number = 0;
        std::iter::from_fn(move || {
            let range = self.range_at(offset)?;
            offset = range.end;
            part_number += 1;
            Some(PlannedChunk { part_number, range })
        })
    }
}
