// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! C5: the iterator / analyzer engine (spec §4.5).
//!
//! Three producers share one contract (`hint`/`next_block`/`processed`/
//! `set_cutoff`/`hit_cutoff`): [`RowidIterator`] (block-list prefilter, no
//! value decode), [`BlockReader`] (value-exact: decode candidate blocks and
//! filter), and [`Analyzer`] (full scan with filter, no pruning). Each
//! decoded block's matches are materialized as a [`crate::row_list::RowList`]
//! (choosing the minimal `ROW`/`ROW_BLOCK`/`ROW_BLOCKS_LIST` representation
//! for that block) before being streamed onward as row IDs, per spec §4.5
//! "stream their row IDs via one of {ROW, ROW_BLOCK, ROW_BLOCKS_LIST}".

mod cutoff;
mod rowset_builder;

pub use cutoff::Cutoff;
pub use rowset_builder::collect_row_set;

use crate::attribute::AttributeHeader;
use crate::block;
use crate::block::hash_block;
use crate::columnar::Columnar;
use crate::error::Result;
use crate::min_max_tree::BlockTester;
use crate::row_list::RowList;

/// Default chunk size for block-list emission (spec §4.5).
pub const DEFAULT_CHUNK_ROWS: usize = 1024;

/// Shared contract for every row-ID producer in the engine (spec §4.5).
pub trait RowIdSource {
    /// Advances to the first matching block whose max row ID is `>= rowid`.
    /// Returns `false` if nothing remains.
    fn hint(&mut self, rowid: u64) -> bool;

    /// Emits the next chunk of ascending row IDs into `out` (appended, not
    /// cleared). Returns `false` once exhausted.
    fn next_block(&mut self, out: &mut Vec<u64>) -> bool;

    /// Count of row IDs emitted so far.
    fn processed(&self) -> i64;

    /// Sets a soft cap on rows the source should still produce.
    fn set_cutoff(&mut self, n: i64);

    /// Whether the cutoff has been reached.
    fn hit_cutoff(&self) -> bool;
}

/// Block-list prefilter: emits every row ID in every surviving leaf block,
/// without decoding any value (spec §4.5 "used when no value-filter is
/// applicable").
pub struct RowidIterator {
    blocks: Vec<usize>,
    block_pos: usize,
    rows_per_block: u64,
    total_rows: u64,
    min_rowid: u64,
    max_rowid: u64,
    cursor_row: u64,
    cutoff: Cutoff,
}

impl RowidIterator {
    /// `blocks` must be ascending, already pruned (e.g. via
    /// [`crate::min_max_tree::MinMaxTree::prune_blocks`]).
    #[must_use]
    pub fn new(blocks: Vec<usize>, rows_per_block: u64, total_rows: u64, row_range: Option<(u64, u64)>) -> Self {
        let (min_rowid, max_rowid) = row_range.unwrap_or((0, total_rows.saturating_sub(1)));
        let cursor_row = blocks.first().map_or(0, |&b| (b as u64 * rows_per_block).max(min_rowid));
        Self {
            blocks,
            block_pos: 0,
            rows_per_block,
            total_rows,
            min_rowid,
            max_rowid,
            cursor_row,
            cutoff: Cutoff::default(),
        }
    }

    fn current_block_end(&self) -> Option<u64> {
        let block_idx = *self.blocks.get(self.block_pos)?;
        let start = block_idx as u64 * self.rows_per_block;
        let end = (start + self.rows_per_block).min(self.total_rows);
        Some(end.min(self.max_rowid + 1))
    }
}

impl RowIdSource for RowidIterator {
    fn hint(&mut self, rowid: u64) -> bool {
        while let Some(block_idx) = self.blocks.get(self.block_pos).copied() {
            let end = (block_idx as u64 * self.rows_per_block + self.rows_per_block).min(self.total_rows);
            if end > rowid {
                self.cursor_row = self.cursor_row.max(rowid);
                return true;
            }
            self.block_pos += 1;
        }
        false
    }

    fn next_block(&mut self, out: &mut Vec<u64>) -> bool {
        if self.cutoff.hit() {
            return false;
        }
        let Some(end) = self.current_block_end() else { return false };

        let mut emitted = 0;
        while self.cursor_row < end && emitted < DEFAULT_CHUNK_ROWS {
            if self.cursor_row >= self.min_rowid && self.cursor_row <= self.max_rowid && !self.cutoff.hit() {
                out.push(self.cursor_row);
                self.cutoff.record(1);
                emitted += 1;
            }
            self.cursor_row += 1;
            if self.cutoff.hit() {
                break;
            }
        }

        if self.cursor_row >= end {
            self.block_pos += 1;
            if let Some(block_idx) = self.blocks.get(self.block_pos).copied() {
                self.cursor_row = block_idx as u64 * self.rows_per_block;
            }
        }

        emitted > 0 || self.blocks.get(self.block_pos).is_some()
    }

    fn processed(&self) -> i64 {
        self.cutoff.processed()
    }

    fn set_cutoff(&mut self, n: i64) {
        self.cutoff.set(n);
    }

    fn hit_cutoff(&self) -> bool {
        self.cutoff.hit()
    }
}

/// Value-exact iterator: decodes candidate blocks and keeps rows whose
/// word satisfies `predicate` (spec §4.5 `BlockReader`).
pub struct BlockReader<'a> {
    columnar: &'a Columnar,
    attribute_index: usize,
    blocks: Vec<usize>,
    block_pos: usize,
    predicate: Box<dyn Fn(Option<u64>) -> bool + 'a>,
    row_range: (u64, u64),
    rowids_per_block: usize,
    pending: std::collections::VecDeque<u64>,
    cutoff: Cutoff,
}

impl<'a> BlockReader<'a> {
    #[must_use]
    pub fn new(
        columnar: &'a Columnar,
        attribute_index: usize,
        blocks: Vec<usize>,
        predicate: impl Fn(Option<u64>) -> bool + 'a,
        row_range: Option<(u64, u64)>,
    ) -> Self {
        let header = &columnar.headers()[attribute_index];
        let range = row_range.unwrap_or((0, header.total_rows.saturating_sub(1)));
        let rowids_per_block = columnar.rowids_per_block() as usize;
        Self {
            columnar,
            attribute_index,
            blocks,
            block_pos: 0,
            predicate: Box::new(predicate),
            row_range: range,
            rowids_per_block,
            pending: std::collections::VecDeque::new(),
            cutoff: Cutoff::default(),
        }
    }

    fn header(&self) -> &AttributeHeader {
        &self.columnar.headers()[self.attribute_index]
    }

    fn decode_current_block(&mut self) -> Result<()> {
        let Some(&block_idx) = self.blocks.get(self.block_pos) else { return Ok(()) };
        let header = self.header();
        let rows_in_block = header.rows_in_block(block_idx);
        let block_start = block_idx as u64 * header.rows_per_block();

        let bytes = self.columnar.read_block_bytes(self.attribute_index, block_idx)?;

        let mut matched = Vec::new();
        if header.have_string_hashes {
            let values = hash_block::decode_block(&bytes, rows_in_block as usize, header.subblock_size as usize)?;
            for (i, v) in values.into_iter().enumerate() {
                let row = block_start + i as u64;
                if row < self.row_range.0 || row > self.row_range.1 {
                    continue;
                }
                if (self.predicate)(v) {
                    matched.push(row);
                }
            }
        } else {
            let values = block::decode(&bytes, rows_in_block as usize, header.subblock_size as usize, header.codec)?;
            for (i, v) in values.into_iter().enumerate() {
                let row = block_start + i as u64;
                if row < self.row_range.0 || row > self.row_range.1 {
                    continue;
                }
                if (self.predicate)(Some(v)) {
                    matched.push(row);
                }
            }
        }

        // Materialize this block's matches as a RowList (spec §4.5's
        // {ROW, ROW_BLOCK, ROW_BLOCKS_LIST}) before streaming them onward.
        if !matched.is_empty() {
            let list = RowList::from_rows(matched, self.rowids_per_block);
            self.pending.extend(list.to_rows());
        }

        Ok(())
    }
}

impl RowIdSource for BlockReader<'_> {
    fn hint(&mut self, rowid: u64) -> bool {
        let rows_per_block = self.header().rows_per_block();
        while let Some(&block_idx) = self.blocks.get(self.block_pos) {
            let end = (block_idx as u64 * rows_per_block + rows_per_block).min(self.header().total_rows);
            if end > rowid {
                return true;
            }
            self.block_pos += 1;
            self.pending.clear();
        }
        false
    }

    fn next_block(&mut self, out: &mut Vec<u64>) -> bool {
        if self.cutoff.hit() {
            return false;
        }

        while self.pending.is_empty() && self.block_pos < self.blocks.len() {
            // Decode errors surface as an empty remainder; the engine treats
            // them as fatal at a higher layer (spec §4.5 failure semantics).
            if self.decode_current_block().is_err() {
                self.block_pos = self.blocks.len();
                return false;
            }
            self.block_pos += 1;
        }

        let mut emitted = 0;
        while emitted < DEFAULT_CHUNK_ROWS {
            if self.cutoff.hit() {
                break;
            }
            let Some(row) = self.pending.pop_front() else { break };
            out.push(row);
            self.cutoff.record(1);
            emitted += 1;
        }

        emitted > 0 || !self.pending.is_empty() || self.block_pos < self.blocks.len()
    }

    fn processed(&self) -> i64 {
        self.cutoff.processed()
    }

    fn set_cutoff(&mut self, n: i64) {
        self.cutoff.set(n);
    }

    fn hit_cutoff(&self) -> bool {
        self.cutoff.hit()
    }
}

struct ValueRangeTester {
    lo: u64,
    hi: u64,
}

impl BlockTester<u64> for ValueRangeTester {
    fn intersects(&self, min: u64, max: u64) -> bool {
        !(max < self.lo || min > self.hi)
    }
}

/// Builds a value-exact `BlockReader` for `[lo_word, hi_word]`, combining
/// the C3 min/max prune (exact, always applied — no block it excludes can
/// contain a match) with the C4 PGM index (applied only when
/// [`AttributeHeader::pgm_block_range`] reports narrowing is sound for this
/// attribute): the "C5 asks C4 for an approximate block range, folds it
/// into the candidate block indices" step (spec §2, §4.4).
#[must_use]
pub fn block_reader_for_range<'a>(
    columnar: &'a Columnar,
    attribute_index: usize,
    lo_word: u64,
    hi_word: u64,
    row_range: Option<(u64, u64)>,
) -> BlockReader<'a> {
    let header = &columnar.headers()[attribute_index];
    let tester = ValueRangeTester { lo: lo_word, hi: hi_word };
    let mut blocks = header.min_max_tree.prune_blocks(&tester, row_range, header.rows_per_block());

    if let Some((first, last)) = header.pgm_block_range(lo_word, hi_word) {
        blocks.retain(|&b| (b as usize) >= first && (b as usize) <= last);
    }

    let predicate = move |v: Option<u64>| matches!(v, Some(w) if (lo_word..=hi_word).contains(&w));
    BlockReader::new(columnar, attribute_index, blocks.into_iter().map(|b| b as usize).collect(), predicate, row_range)
}

/// Cardinality estimate for a `[lo_word, hi_word]` range query, used for
/// the bitmap-vs-list policy (spec §4.5 "sum of PGM `hi-lo` bounds").
/// Falls back to the C3 min/max tree's own estimate when this attribute
/// has no PGM index.
#[must_use]
pub fn estimate_range_matches(header: &AttributeHeader, lo_word: u64, hi_word: u64) -> u64 {
    header.pgm_estimate_matches(lo_word, hi_word).unwrap_or_else(|| {
        let tester = ValueRangeTester { lo: lo_word, hi: hi_word };
        header.min_max_tree.estimate_matching_rows(&tester, 2, header.rows_per_block())
    })
}

/// Builds an O(1)-membership predicate for a multi-value filter (spec §4.5
/// "one or more value-exact iterators"; spec S2's `value ∈ {20, 40}`).
#[must_use]
pub fn value_set_predicate(values: &[u64]) -> impl Fn(Option<u64>) -> bool {
    let set: rustc_hash::FxHashSet<u64> = values.iter().copied().collect();
    move |v| matches!(v, Some(w) if set.contains(&w))
}

/// Full-column scan with filter, used when no block pruning applies (spec
/// §4.5 "Analyzer").
pub struct Analyzer<'a> {
    reader: BlockReader<'a>,
}

impl<'a> Analyzer<'a> {
    #[must_use]
    pub fn new(columnar: &'a Columnar, attribute_index: usize, predicate: impl Fn(Option<u64>) -> bool + 'a) -> Self {
        let block_count = columnar.headers()[attribute_index].block_count();
        let blocks = (0..block_count).collect();
        Self { reader: BlockReader::new(columnar, attribute_index, blocks, predicate, None) }
    }
}

impl RowIdSource for Analyzer<'_> {
    fn hint(&mut self, rowid: u64) -> bool {
        self.reader.hint(rowid)
    }

    fn next_block(&mut self, out: &mut Vec<u64>) -> bool {
        self.reader.next_block(out)
    }

    fn processed(&self) -> i64 {
        self.reader.processed()
    }

    fn set_cutoff(&mut self, n: i64) {
        self.reader.set_cutoff(n);
    }

    fn hit_cutoff(&self) -> bool {
        self.reader.hit_cutoff()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::{AttributeType, Value};
    use crate::columnar::create_builder;
    use crate::config::Settings;
    use test_log::test;

    fn build(dir: &std::path::Path) -> std::path::PathBuf {
        let path = dir.join("iter.columnar");
        let mut builder = create_builder(Settings::new());
        {
            let col = builder.column("n", AttributeType::U32);
            for i in 0..500u32 {
                col.add(&Value::U32(i)).unwrap();
            }
        }
        builder.finish(&path).unwrap();
        path
    }

    #[test]
    fn rowid_iterator_emits_all_rows_in_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = build(dir.path());
        let columnar = Columnar::open(&path, 0).unwrap();
        let header = &columnar.headers()[0];

        let mut it = RowidIterator::new(vec![0], header.rows_per_block(), header.total_rows, Some((10, 20)));
        let mut out = Vec::new();
        while it.next_block(&mut out) {}
        assert_eq!(out, (10..=20).collect::<Vec<_>>());
    }

    #[test]
    fn block_reader_filters_by_predicate() {
        let dir = tempfile::tempdir().unwrap();
        let path = build(dir.path());
        let columnar = Columnar::open(&path, 0).unwrap();

        let mut reader = BlockReader::new(&columnar, 0, vec![0], |v| v == Some(42), None);
        let mut out = Vec::new();
        while reader.next_block(&mut out) {}
        assert_eq!(out, vec![42]);
    }

    #[test]
    fn analyzer_scans_without_pruning() {
        let dir = tempfile::tempdir().unwrap();
        let path = build(dir.path());
        let columnar = Columnar::open(&path, 0).unwrap();

        let mut analyzer = Analyzer::new(&columnar, 0, |v| matches!(v, Some(n) if n % 100 == 0));
        let mut out = Vec::new();
        while analyzer.next_block(&mut out) {}
        assert_eq!(out, vec![0, 100, 200, 300, 400]);
    }

    #[test]
    fn cutoff_stops_emission_early() {
        let dir = tempfile::tempdir().unwrap();
        let path = build(dir.path());
        let columnar = Columnar::open(&path, 0).unwrap();
        let header = &columnar.headers()[0];

        let mut it = RowidIterator::new(vec![0], header.rows_per_block(), header.total_rows, None);
        it.set_cutoff(5);
        let mut out = Vec::new();
        while it.next_block(&mut out) {}
        assert_eq!(out.len(), 5);
        assert!(it.hit_cutoff());
    }

    #[test]
    fn block_reader_for_range_uses_pgm_on_sorted_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sorted.columnar");
        let mut builder = create_builder(Settings::new());
        {
            let col = builder.column("seq", AttributeType::I64);
            for r in 0..200_000i64 {
                col.add(&Value::I64(r)).unwrap();
            }
        }
        builder.finish(&path).unwrap();
        let columnar = Columnar::open(&path, 0).unwrap();
        let idx = columnar.attribute_index("seq").unwrap();
        let header = &columnar.headers()[idx];
        assert!(header.block_count() > 1);
        assert!(header.blocks_globally_sorted());
        assert!(header.pgm_index.is_some());

        let lo = crate::block::word_from_i64(1_000);
        let hi = crate::block::word_from_i64(2_000);
        let mut reader = block_reader_for_range(&columnar, idx, lo, hi, None);
        let mut out = Vec::new();
        while reader.next_block(&mut out) {}
        assert_eq!(out, (1_000..=2_000).collect::<Vec<_>>());

        let estimate = estimate_range_matches(header, lo, hi);
        assert!(estimate >= 1001, "estimate {estimate} should cover the true match count");
    }

    #[test]
    fn block_reader_for_range_falls_back_without_narrowing_on_non_sorted_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bucket.columnar");
        let values = [10u32, 20, 30, 40];
        let mut builder = create_builder(Settings::new());
        {
            let col = builder.column("bucket", AttributeType::U32);
            for r in 0..4000u32 {
                col.add(&Value::U32(values[(r % 4) as usize])).unwrap();
            }
        }
        builder.finish(&path).unwrap();
        let columnar = Columnar::open(&path, 0).unwrap();
        let idx = columnar.attribute_index("bucket").unwrap();
        let header = &columnar.headers()[idx];
        assert!(!header.blocks_globally_sorted());
        assert!(header.pgm_block_range(20, 20).is_none());

        let mut reader = block_reader_for_range(&columnar, idx, 20, 20, None);
        let mut out = Vec::new();
        while reader.next_block(&mut out) {}
        assert_eq!(out.len(), 1000);
    }
}
