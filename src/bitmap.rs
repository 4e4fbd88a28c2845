// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Dense and sparse row-ID bitmaps used by the iterator engine's
//! bitmap-vs-list policy (spec §4.5).

/// Number of rows per sparse chunk (spec §4.5: "64K-chunked").
pub const CHUNK_ROWS: u64 = 65_536;

/// A `u64`-backed dense bitmap over `[0, len)` row IDs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenseBitmap {
    words: Vec<u64>,
    len: u64,
}

impl DenseBitmap {
    #[must_use]
    pub fn new(len: u64) -> Self {
        Self { words: vec![0; (len as usize).div_ceil(64)], len }
    }

    #[must_use]
    pub fn len(&self) -> u64 {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn set(&mut self, row: u64) {
        if row >= self.len {
            return;
        }
        self.words[(row / 64) as usize] |= 1u64 << (row % 64);
    }

    #[must_use]
    pub fn get(&self, row: u64) -> bool {
        if row >= self.len {
            return false;
        }
        self.words[(row / 64) as usize] & (1u64 << (row % 64)) != 0
    }

    /// Shrinks `len` to `new_len` and clears any bits beyond it. Used when
    /// cutoff trips mid-construction so `invert` never sets bits past the
    /// last real row (spec §4.5).
    pub fn truncate(&mut self, new_len: u64) {
        if new_len >= self.len {
            return;
        }
        self.len = new_len;
        self.words.truncate((new_len as usize).div_ceil(64));
        if let Some(last) = self.words.last_mut() {
            let valid_bits = new_len % 64;
            if valid_bits != 0 {
                *last &= (1u64 << valid_bits) - 1;
            }
        }
    }

    /// Flips every bit within `[0, len)`. `invert(invert(b)) == b` (spec
    /// invariant 7).
    #[must_use]
    pub fn invert(&self) -> Self {
        let mut words: Vec<u64> = self.words.iter().map(|w| !w).collect();
        let valid_bits = self.len % 64;
        if valid_bits != 0 {
            if let Some(last) = words.last_mut() {
                *last &= (1u64 << valid_bits) - 1;
            }
        }
        Self { words, len: self.len }
    }

    /// Ascending row IDs with a set bit.
    pub fn iter_set(&self) -> impl Iterator<Item = u64> + '_ {
        (0..self.len).filter(move |&r| self.get(r))
    }

    #[must_use]
    pub fn count_set(&self) -> u64 {
        self.words.iter().map(|w| u64::from(w.count_ones())).sum()
    }
}

/// A sparse bitmap split into `CHUNK_ROWS`-wide chunks, allocated lazily.
/// Scanning skips unallocated chunks entirely. Per spec §4.5, inverting a
/// split bitmap is forbidden (excludes always use [`DenseBitmap`]).
#[derive(Debug, Clone)]
pub struct SplitBitmap {
    len: u64,
    chunks: Vec<Option<Box<[u64]>>>,
}

impl SplitBitmap {
    #[must_use]
    pub fn new(len: u64) -> Self {
        let chunk_count = (len as usize).div_ceil(CHUNK_ROWS as usize);
        Self { len, chunks: vec![None; chunk_count] }
    }

    #[must_use]
    pub fn len(&self) -> u64 {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn set(&mut self, row: u64) {
        if row >= self.len {
            return;
        }
        let chunk_idx = (row / CHUNK_ROWS) as usize;
        let within = row % CHUNK_ROWS;
        let chunk = self.chunks[chunk_idx]
            .get_or_insert_with(|| vec![0u64; (CHUNK_ROWS as usize).div_ceil(64)].into_boxed_slice());
        chunk[(within / 64) as usize] |= 1u64 << (within % 64);
    }

    #[must_use]
    pub fn get(&self, row: u64) -> bool {
        if row >= self.len {
            return false;
        }
        let chunk_idx = (row / CHUNK_ROWS) as usize;
        let within = row % CHUNK_ROWS;
        match &self.chunks[chunk_idx] {
            Some(chunk) => chunk[(within / 64) as usize] & (1u64 << (within % 64)) != 0,
            None => false,
        }
    }

    /// Ascending row IDs with a set bit, skipping unallocated chunks.
    pub fn iter_set(&self) -> impl Iterator<Item = u64> + '_ {
        let len = self.len;
        self.chunks.iter().enumerate().flat_map(move |(ci, chunk)| {
            let base = ci as u64 * CHUNK_ROWS;
            chunk.iter().flat_map(move |bits| {
                (0..CHUNK_ROWS)
                    .filter(move |&off| {
                        base + off < len && bits[(off / 64) as usize] & (1u64 << (off % 64)) != 0
                    })
                    .map(move |off| base + off)
            })
        })
    }

    #[must_use]
    pub fn count_set(&self) -> u64 {
        self.chunks
            .iter()
            .flatten()
            .flat_map(|c| c.iter())
            .map(|w| u64::from(w.count_ones()))
            .sum()
    }
}

/// Which result-set representation the iterator engine picked (spec §4.5).
#[derive(Debug, Clone)]
pub enum RowSet {
    List(Vec<u64>),
    Dense(DenseBitmap),
    Split(SplitBitmap),
}

impl RowSet {
    /// Decides a representation from the estimated cardinality (spec §4.5
    /// policy table). `iterator_count` is how many value-exact iterators
    /// would otherwise be instantiated; `exclude` marks a NOT filter.
    #[must_use]
    pub fn choose_policy(total_rows: u64, estimated_matches: u64, iterator_count: usize, exclude: bool) -> Policy {
        if exclude {
            return Policy::Dense;
        }
        if iterator_count < 8 {
            return Policy::List;
        }
        if total_rows > 262_144 && estimated_matches.saturating_mul(100) <= total_rows {
            return Policy::Split;
        }
        Policy::Dense
    }
}

/// The representation [`RowSet::choose_policy`] selects before construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    List,
    Dense,
    Split,
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn dense_set_get_roundtrip() {
        let mut bm = DenseBitmap::new(200);
        for r in [0, 1, 63, 64, 65, 199] {
            bm.set(r);
        }
        for r in 0..200 {
            assert_eq!(bm.get(r), [0, 1, 63, 64, 65, 199].contains(&r));
        }
    }

    #[test]
    fn invert_invert_is_identity() {
        let mut bm = DenseBitmap::new(100);
        for r in (0..100).step_by(3) {
            bm.set(r);
        }
        let back = bm.invert().invert();
        assert_eq!(bm, back);
    }

    #[test]
    fn invert_respects_len_window() {
        let mut bm = DenseBitmap::new(10);
        bm.set(0);
        let inv = bm.invert();
        assert!((1..10).all(|r| inv.get(r)));
        assert!(!inv.get(0));
        assert!(!inv.get(10));
    }

    #[test]
    fn truncate_clears_trailing_bits() {
        let mut bm = DenseBitmap::new(128);
        bm.set(100);
        bm.set(10);
        bm.truncate(50);
        assert!(bm.get(10));
        assert!(!bm.get(100));
        assert_eq!(bm.len(), 50);
    }

    #[test]
    fn split_bitmap_skips_unallocated_chunks() {
        let mut bm = SplitBitmap::new(200_000);
        bm.set(5);
        bm.set(150_000);
        let set: Vec<u64> = bm.iter_set().collect();
        assert_eq!(set, vec![5, 150_000]);
    }

    #[test]
    fn policy_exclude_always_dense() {
        assert_eq!(RowSet::choose_policy(1000, 1, 20, true), Policy::Dense);
    }

    #[test]
    fn policy_few_iterators_is_list() {
        assert_eq!(RowSet::choose_policy(1_000_000, 10, 3, false), Policy::List);
    }

    #[test]
    fn policy_sparse_large_is_split() {
        assert_eq!(RowSet::choose_policy(1_000_000, 5_000, 20, false), Policy::Split);
    }

    #[test]
    fn policy_dense_default() {
        assert_eq!(RowSet::choose_policy(100_000, 90_000, 20, false), Policy::Dense);
    }
}
