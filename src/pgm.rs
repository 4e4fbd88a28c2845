// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! C4: the PGM (piecewise geometric model) secondary index.
//!
//! Maps a sorted, distinct key sequence to an approximate ordinal, returned
//! as `(pos, lo, hi)` where `[lo, hi]` bounds the true ordinal (spec §4.4).
//! The caller then does a local binary search over that bounded window.
//!
//! This is a learned index over linear segments: each segment approximates
//! `ordinal ~= slope * (key - first_key) + intercept` within an error bound
//! `epsilon`. Segment construction greedily extends a segment while every
//! point so far still falls within `epsilon` of the line fit from its
//! first and last points (the shrinking-corridor method).

use crate::serde::{Deserializable, DeserializeError, SerializeError, Serializable};
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};
use varint_rs::{VarintReader, VarintWriter};

/// Default error bound, in ordinal positions, tolerated by one segment.
pub const DEFAULT_EPSILON: u64 = 64;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Segment {
    /// First key covered by this segment.
    key: i64,
    /// Ordinal of `key`.
    start_pos: u64,
    /// Fixed-point slope (ordinals per key unit), scaled by `SLOPE_SCALE`.
    slope_num: i64,
    slope_den: i64,
}

const SLOPE_SCALE: i64 = 1 << 20;

impl Segment {
    fn predict(&self, key: i64) -> i64 {
        let dx = key - self.key;
        #[allow(clippy::cast_possible_truncation)]
        let delta = if self.slope_den == 0 {
            0
        } else {
            (dx as i128 * self.slope_num as i128 / self.slope_den as i128) as i64
        };
        self.start_pos as i64 + delta
    }
}

/// A piecewise geometric model over a sorted, distinct sequence of `i64`
/// keys (floats are bit-cast by the caller; see [`crate::min_max_tree`]'s
/// float handling for the same convention).
#[derive(Debug, Clone)]
pub struct Pgm {
    epsilon: u64,
    segments: Vec<Segment>,
    keys: Vec<i64>,
}

/// Bounded search result: `pos` is the model's best-guess ordinal, and the
/// true ordinal (if present) lies within `[lo, hi]` inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bound {
    pub pos: u64,
    pub lo: u64,
    pub hi: u64,
}

impl Pgm {
    /// Builds a PGM index over an ascending, distinct key sequence.
    ///
    /// # Panics
    ///
    /// Never on a caller who upholds "ascending and distinct" (debug-only
    /// assertion); an unsorted or duplicate-laden input produces a
    /// structurally valid but inaccurate index in release builds.
    #[must_use]
    pub fn build(keys: &[i64], epsilon: u64) -> Self {
        debug_assert!(keys.windows(2).all(|w| w[0] < w[1]), "keys must be ascending and distinct");

        let mut segments = Vec::new();
        let mut i = 0usize;
        let n = keys.len();

        while i < n {
            let seg_start = i;
            let start_key = keys[i];
            let mut j = i + 1;

            // Try to extend the segment while a single line through
            // `(start_key, i)` and `(keys[j], j)` keeps every intermediate
            // point within `epsilon`.
            let mut best_end = i;
            let mut slope_num = 0i64;
            let mut slope_den = 1i64;

            while j < n {
                let dx = keys[j] - start_key;
                if dx == 0 {
                    j += 1;
                    continue;
                }
                let cand_num = (j - seg_start) as i64;
                let cand_den = dx;

                let ok = (seg_start..=j).all(|k| {
                    let dxk = keys[k] - start_key;
                    #[allow(clippy::cast_possible_truncation)]
                    let predicted = (dxk as i128 * cand_num as i128 / cand_den as i128) as i64;
                    let actual = (k - seg_start) as i64;
                    (predicted - actual).unsigned_abs() <= epsilon
                });

                if !ok {
                    break;
                }

                best_end = j;
                slope_num = cand_num;
                slope_den = cand_den;
                j += 1;
            }

            segments.push(Segment {
                key: start_key,
                start_pos: seg_start as u64,
                slope_num: slope_num * SLOPE_SCALE,
                slope_den: slope_den * SLOPE_SCALE,
            });

            i = best_end + 1;
        }

        Self { epsilon, segments, keys: keys.to_vec() }
    }

    #[must_use]
    pub fn epsilon(&self) -> u64 {
        self.epsilon
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Looks up `key`, returning a bounded guess at its ordinal even if
    /// `key` is absent (the bound still holds: the insertion point lies
    /// within `[lo, hi]`).
    #[must_use]
    pub fn search(&self, key: i64) -> Bound {
        if self.segments.is_empty() {
            return Bound { pos: 0, lo: 0, hi: 0 };
        }

        let seg_idx = match self.segments.binary_search_by_key(&key, |s| s.key) {
            Ok(idx) => idx,
            Err(0) => 0,
            Err(idx) => idx - 1,
        };
        let seg = &self.segments[seg_idx];

        let n = self.keys.len() as u64;
        let predicted = seg.predict(key).max(0) as u64;
        let lo = predicted.saturating_sub(self.epsilon);
        let hi = (predicted + self.epsilon).min(n.saturating_sub(1));
        let pos = predicted.min(n.saturating_sub(1));

        Bound { pos, lo: lo.min(pos), hi: hi.max(pos) }
    }

    /// Returns the bound covering the first key `>= key` (used for range
    /// scan lower bounds) by folding [`Self::search`] with a local refine.
    #[must_use]
    pub fn lower_bound(&self, key: i64) -> Bound {
        let b = self.search(key);
        let lo = b.lo as usize;
        let hi = (b.hi as usize).min(self.keys.len().saturating_sub(1));
        let refined = crate::binary_search::partition_point(&self.keys[lo..=hi], |k| *k < key);
        Bound { pos: (lo + refined) as u64, lo: b.lo, hi: b.hi }
    }

    /// The key at ordinal `pos`, if in range.
    #[must_use]
    pub fn key_at(&self, pos: u64) -> Option<i64> {
        self.keys.get(pos as usize).copied()
    }
}

/// Walks matching positions in `[lo, hi]` forward, stopping when the key
/// no longer satisfies `pred`. Mirrors the `BlockIter` shape from spec §4.4
/// (`start`, `pos`, `last`, `value`) used by the iterator engine to drive a
/// PGM-bounded scan without re-running `search` per step.
pub struct BlockIter<'a> {
    pgm: &'a Pgm,
    pos: u64,
    last: u64,
}

impl<'a> BlockIter<'a> {
    #[must_use]
    pub fn new(pgm: &'a Pgm, start: u64, last: u64) -> Self {
        Self { pgm, pos: start, last }
    }
}

impl Iterator for BlockIter<'_> {
    type Item = (u64, i64);

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos > self.last {
            return None;
        }
        let value = self.pgm.key_at(self.pos)?;
        let out = (self.pos, value);
        self.pos += 1;
        Some(out)
    }
}

impl Serializable for Pgm {
    fn serialize<W: Write>(&self, writer: &mut W) -> Result<(), SerializeError> {
        writer.write_u64_varint(self.epsilon)?;
        writer.write_u32_varint(self.keys.len() as u32)?;
        for &k in &self.keys {
            writer.write_i64_varint(k)?;
        }
        writer.write_u32_varint(self.segments.len() as u32)?;
        for seg in &self.segments {
            writer.write_i64_varint(seg.key)?;
            writer.write_u64_varint(seg.start_pos)?;
            writer.write_i64_varint(seg.slope_num)?;
            writer.write_i64_varint(seg.slope_den)?;
        }
        Ok(())
    }
}

impl Deserializable for Pgm {
    fn deserialize<R: Read>(reader: &mut R) -> Result<Self, DeserializeError> {
        let epsilon = reader.read_u64_varint()?;
        let key_count = reader.read_u32_varint()? as usize;
        let mut keys = Vec::with_capacity(key_count);
        for _ in 0..key_count {
            keys.push(reader.read_i64_varint()?);
        }
        let seg_count = reader.read_u32_varint()? as usize;
        let mut segments = Vec::with_capacity(seg_count);
        for _ in 0..seg_count {
            segments.push(Segment {
                key: reader.read_i64_varint()?,
                start_pos: reader.read_u64_varint()?,
                slope_num: reader.read_i64_varint()?,
                slope_den: reader.read_i64_varint()?,
            });
        }
        Ok(Self { epsilon, segments, keys })
    }
}
