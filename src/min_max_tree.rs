// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! C3: the min/max range tree used to prune leaf blocks before decoding.
//!
//! A complete binary tree over per-block `(min, max)` summaries. Query
//! descent is parameterized by a caller-supplied [`BlockTester`] so the
//! tree itself never knows about filter semantics (spec §4.3).

use crate::serde::{Deserializable, DeserializeError, SerializeError, Serializable};
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};
use varint_rs::{VarintReader, VarintWriter};

/// Tests whether a node's `(min, max)` summary can contain a match for the
/// filter the caller is evaluating. The tree only descends; it never knows
/// what the filter means.
pub trait BlockTester<T> {
    /// Returns `true` if `[min, max]` might contain a matching value.
    fn intersects(&self, min: T, max: T) -> bool;
}

/// Complete binary tree of `(min, max)` pairs, leaves first.
#[derive(Debug, Clone)]
pub struct MinMaxTree<T> {
    /// `levels[0]` are the leaves (one per block); the last entry is the root.
    levels: Vec<Vec<(T, T)>>,
}

impl<T> MinMaxTree<T>
where
    T: Copy + Ord,
{
    /// Builds the tree bottom-up from per-block `(min, max)` leaves.
    #[must_use]
    pub fn build(leaves: Vec<(T, T)>) -> Self {
        let mut levels = vec![leaves];

        while levels.last().map(Vec::len).unwrap_or(0) > 1 {
            #[allow(clippy::expect_used)]
            let prev = levels.last().expect("just checked non-empty");
            let mut next = Vec::with_capacity(prev.len().div_ceil(2));

            for pair in prev.chunks(2) {
                let min = pair.iter().map(|(mn, _)| *mn).min().expect("chunk non-empty");
                let max = pair.iter().map(|(_, mx)| *mx).max().expect("chunk non-empty");
                next.push((min, max));
            }

            levels.push(next);
        }

        Self { levels }
    }

    /// Number of leaf blocks (= number of blocks in the attribute).
    #[must_use]
    pub fn leaf_count(&self) -> usize {
        self.levels.first().map(Vec::len).unwrap_or(0)
    }

    /// Root `(min, max)`, if the tree has any leaves.
    #[must_use]
    pub fn root(&self) -> Option<(T, T)> {
        self.levels.last().and_then(|l| l.first()).copied()
    }

    /// Per-block `(min, max)` leaves, in block order.
    #[must_use]
    pub fn leaves(&self) -> &[(T, T)] {
        self.levels.first().map_or(&[], Vec::as_slice)
    }

    /// Returns the ascending, deduplicated set of leaf block indices whose
    /// `(min, max)` intersects the filter (and, if given, whose implied
    /// row-ID range intersects `rowid_range`). Descends to the leaf level
    /// unconditionally: the block-list path needs exact blocks, not an
    /// estimate (spec §4.3).
    pub fn prune_blocks(
        &self,
        tester: &impl BlockTester<T>,
        rowid_range: Option<(u64, u64)>,
        rows_per_block: u64,
    ) -> Vec<u32> {
        let mut out = Vec::new();
        if self.levels.is_empty() {
            return out;
        }
        let top = self.levels.len() - 1;
        self.descend(top, 0, tester, rowid_range, rows_per_block, &mut out);
        out
    }

    /// Estimates the number of matching rows by stopping the descent up to
    /// `raise_levels` (capped at 3) above the leaf level, widening each
    /// accounted unit by `2^raise_levels` blocks (spec §4.3). This is a
    /// cheap over-estimate used only for cost decisions, never for
    /// correctness: callers must not treat it as exact.
    pub fn estimate_matching_rows(
        &self,
        tester: &impl BlockTester<T>,
        raise_levels: u32,
        rows_per_block: u64,
    ) -> u64 {
        if self.levels.is_empty() {
            return 0;
        }
        let raise_levels = raise_levels.min(3) as usize;
        let stop_level = raise_levels.min(self.levels.len() - 1);
        let mut count = 0u64;
        self.count_descend(self.levels.len() - 1, 0, stop_level, tester, rows_per_block, &mut count);
        count
    }

    #[allow(clippy::too_many_arguments)]
    fn descend(
        &self,
        level: usize,
        index: usize,
        tester: &impl BlockTester<T>,
        rowid_range: Option<(u64, u64)>,
        rows_per_block: u64,
        out: &mut Vec<u32>,
    ) {
        let Some(&(min, max)) = self.levels.get(level).and_then(|l| l.get(index)) else {
            return;
        };

        if !tester.intersects(min, max) {
            return;
        }

        if let Some((lo, hi)) = rowid_range {
            let span = 1u64 << level_shift(rows_per_block, level);
            let node_lo = (index as u64) * span;
            let node_hi = node_lo + span;
            if node_hi <= lo || node_lo >= hi {
                return;
            }
        }

        if level == 0 {
            #[allow(clippy::cast_possible_truncation)]
            out.push(index as u32);
            return;
        }

        self.descend(level - 1, index * 2, tester, rowid_range, rows_per_block, out);
        self.descend(level - 1, index * 2 + 1, tester, rowid_range, rows_per_block, out);
    }

    #[allow(clippy::too_many_arguments)]
    fn count_descend(
        &self,
        level: usize,
        index: usize,
        stop_level: usize,
        tester: &impl BlockTester<T>,
        rows_per_block: u64,
        count: &mut u64,
    ) {
        let Some(&(min, max)) = self.levels.get(level).and_then(|l| l.get(index)) else {
            return;
        };

        if !tester.intersects(min, max) {
            return;
        }

        if level <= stop_level {
            let leaves_under = leaves_under_node(self, level, index);
            *count += leaves_under * rows_per_block;
            return;
        }

        self.count_descend(level - 1, index * 2, stop_level, tester, rows_per_block, count);
        self.count_descend(level - 1, index * 2 + 1, stop_level, tester, rows_per_block, count);
    }
}

fn leaves_under_node<T>(tree: &MinMaxTree<T>, level: usize, index: usize) -> u64 {
    let span = 1u64 << level;
    let leaf_count = tree.leaf_count() as u64;
    let start = index as u64 * span;
    span.min(leaf_count.saturating_sub(start))
}

fn level_shift(rows_per_block: u64, level: usize) -> u32 {
    rows_per_block.trailing_zeros() + level as u32
}

impl<T> Serializable for MinMaxTree<T>
where
    T: Copy + Ord + BoundCodec,
{
    fn serialize<W: Write>(&self, writer: &mut W) -> Result<(), SerializeError> {
        writer.write_u32_varint(self.levels.len() as u32)?;
        for level in &self.levels {
            writer.write_u32_varint(level.len() as u32)?;
            for &(min, max) in level {
                T::encode(min, max, writer)?;
            }
        }
        Ok(())
    }
}

impl<T> Deserializable for MinMaxTree<T>
where
    T: Copy + Ord + BoundCodec,
{
    fn deserialize<R: Read>(reader: &mut R) -> Result<Self, DeserializeError> {
        let level_count = reader.read_u32_varint()? as usize;
        let mut levels = Vec::with_capacity(level_count);
        for _ in 0..level_count {
            let node_count = reader.read_u32_varint()? as usize;
            let mut nodes = Vec::with_capacity(node_count);
            for _ in 0..node_count {
                nodes.push(T::decode(reader)?);
            }
            levels.push(nodes);
        }
        Ok(Self { levels })
    }
}

/// How a scalar type's `(min, max)` pair is packed on disk (spec §3: bools
/// pack into one byte, floats as raw bit-cast words, everything else as
/// `(min, max - min)` varints).
pub trait BoundCodec: Sized {
    fn encode<W: Write>(min: Self, max: Self, writer: &mut W) -> Result<(), SerializeError>;
    fn decode<R: Read>(reader: &mut R) -> Result<(Self, Self), DeserializeError>;
}

impl BoundCodec for bool {
    fn encode<W: Write>(min: Self, max: Self, writer: &mut W) -> Result<(), SerializeError> {
        let byte = (u8::from(min) << 1) | u8::from(max);
        writer.write_u8(byte)?;
        Ok(())
    }

    fn decode<R: Read>(reader: &mut R) -> Result<(Self, Self), DeserializeError> {
        let byte = reader.read_u8()?;
        Ok((byte & 0b10 != 0, byte & 0b01 != 0))
    }
}

impl BoundCodec for u32 {
    fn encode<W: Write>(min: Self, max: Self, writer: &mut W) -> Result<(), SerializeError> {
        writer.write_u32_varint(min)?;
        writer.write_u32_varint(max - min)?;
        Ok(())
    }

    fn decode<R: Read>(reader: &mut R) -> Result<(Self, Self), DeserializeError> {
        let min = reader.read_u32_varint()?;
        let delta = reader.read_u32_varint()?;
        Ok((min, min + delta))
    }
}

impl BoundCodec for u64 {
    fn encode<W: Write>(min: Self, max: Self, writer: &mut W) -> Result<(), SerializeError> {
        writer.write_u64_varint(min)?;
        writer.write_u64_varint(max - min)?;
        Ok(())
    }

    fn decode<R: Read>(reader: &mut R) -> Result<(Self, Self), DeserializeError> {
        let min = reader.read_u64_varint()?;
        let delta = reader.read_u64_varint()?;
        Ok((min, min + delta))
    }
}

impl BoundCodec for i64 {
    fn encode<W: Write>(min: Self, max: Self, writer: &mut W) -> Result<(), SerializeError> {
        writer.write_i64_varint(min)?;
        #[allow(clippy::cast_sign_loss)]
        writer.write_u64_varint((max - min) as u64)?;
        Ok(())
    }

    fn decode<R: Read>(reader: &mut R) -> Result<(Self, Self), DeserializeError> {
        let min = reader.read_i64_varint()?;
        let delta = reader.read_u64_varint()?;
        #[allow(clippy::cast_possible_wrap)]
        Ok((min, min + delta as i64))
    }
}

/// `f32` bounds are stored as raw bit-cast `u32` words (spec §3); the build
/// refuses NaN so bit-pattern ordering over non-negative values is monotone.
impl BoundCodec for u32_bits_of_f32 {
    fn encode<W: Write>(min: Self, max: Self, writer: &mut W) -> Result<(), SerializeError> {
        writer.write_u32::<byteorder::LittleEndian>(min.0)?;
        writer.write_u32::<byteorder::LittleEndian>(max.0)?;
        Ok(())
    }

    fn decode<R: Read>(reader: &mut R) -> Result<(Self, Self), DeserializeError> {
        let min = reader.read_u32::<byteorder::LittleEndian>()?;
        let max = reader.read_u32::<byteorder::LittleEndian>()?;
        Ok((Self(min), Self(max)))
    }
}

/// Newtype so `f32`'s bit-cast `u32` representation gets its own
/// [`BoundCodec`] impl (raw words, not varint-delta like other integers).
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[allow(non_camel_case_types)]
pub struct u32_bits_of_f32(pub u32);

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    struct RangeTester<T> {
        lo: T,
        hi: T,
    }

    impl<T: Ord + Copy> BlockTester<T> for RangeTester<T> {
        fn intersects(&self, min: T, max: T) -> bool {
            min <= self.hi && max >= self.lo
        }
    }

    #[test]
    fn soundness_internal_node_is_union_of_children() {
        let tree = MinMaxTree::build(vec![(0u32, 5), (10, 15), (20, 25), (30, 35)]);
        assert_eq!(tree.levels[1], vec![(0, 15), (20, 35)]);
        assert_eq!(tree.levels[2], vec![(0, 35)]);
    }

    #[test]
    fn prune_returns_only_intersecting_leaves() {
        let tree = MinMaxTree::build(vec![(0u32, 5), (10, 15), (20, 25), (30, 35)]);
        let tester = RangeTester { lo: 12, hi: 22 };
        let mut blocks = tree.prune_blocks(&tester, None, 1);
        blocks.sort_unstable();
        assert_eq!(blocks, vec![1, 2]);
    }

    #[test]
    fn prune_respects_rowid_range() {
        let tree = MinMaxTree::build(vec![(0u32, 100), (0, 100), (0, 100), (0, 100)]);
        let tester = RangeTester { lo: 0, hi: 100 };
        let mut blocks = tree.prune_blocks(&tester, Some((0, 10)), 10);
        blocks.sort_unstable();
        assert_eq!(blocks, vec![0]);
    }

    #[test]
    fn odd_leaf_count_builds() {
        let tree = MinMaxTree::build(vec![(0u32, 1), (2, 3), (4, 5)]);
        assert_eq!(tree.leaf_count(), 3);
        assert_eq!(tree.root(), Some((0, 5)));
    }

    #[test]
    fn serialize_roundtrip_u32() {
        let tree = MinMaxTree::build(vec![(5u32, 9), (1, 20), (100, 150)]);
        let mut buf = Vec::new();
        tree.serialize(&mut buf).unwrap();
        let back: MinMaxTree<u32> = MinMaxTree::deserialize(&mut &buf[..]).unwrap();
        assert_eq!(back.levels, tree.levels);
    }

    #[test]
    fn empty_leaf_is_zero_zero_by_convention() {
        // spec §9 open question: an all-empty leaf is (0, 0), which is a
        // known false positive for filters like `value >= 0`. We preserve
        // this rather than silently diverging.
        let tree = MinMaxTree::build(vec![(0u32, 0)]);
        let tester = RangeTester { lo: 0, hi: 0 };
        assert!(tester.intersects(tree.root().unwrap().0, tree.root().unwrap().1));
    }
}
