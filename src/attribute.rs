// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Attribute types and the per-attribute header (spec §3).

use crate::codec::CodecKind;
use crate::error::{Error, Result};
use crate::min_max_tree::MinMaxTree;
use crate::pgm::Pgm;
use crate::serde::{Deserializable, DeserializeError, SerializeError, Serializable};
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};
use varint_rs::{VarintReader, VarintWriter};

/// Logical attribute types (spec §3). `u32set`/`i64set`/`f32vec` are
/// supplemented from `original_source/` (MVA columns and plain float-vector
/// columns, distinct from the ANN index).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum AttributeType {
    U32 = 0,
    I64 = 1,
    Bool = 2,
    F32 = 3,
    String = 4,
    U32Set = 5,
    I64Set = 6,
    F32Vec = 7,
    Timestamp = 8,
    U64 = 9,
}

impl AttributeType {
    #[must_use]
    pub fn is_scalar(self) -> bool {
        !matches!(self, Self::U32Set | Self::I64Set | Self::F32Vec)
    }

    fn from_tag(tag: u32) -> Result<Self> {
        Ok(match tag {
            0 => Self::U32,
            1 => Self::I64,
            2 => Self::Bool,
            3 => Self::F32,
            4 => Self::String,
            5 => Self::U32Set,
            6 => Self::I64Set,
            7 => Self::F32Vec,
            8 => Self::Timestamp,
            9 => Self::U64,
            _ => return Err(Error::CorruptHeader("unknown attribute type tag")),
        })
    }
}

/// A single logical row value, as presented by the host to [`crate::builder`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    U32(u32),
    I64(i64),
    Bool(bool),
    F32(f32),
    String(String),
    U32Set(Vec<u32>),
    I64Set(Vec<i64>),
    F32Vec(Vec<f32>),
    Timestamp(i64),
    U64(u64),
}

impl Value {
    #[must_use]
    pub fn attribute_type(&self) -> AttributeType {
        match self {
            Self::U32(_) => AttributeType::U32,
            Self::I64(_) => AttributeType::I64,
            Self::Bool(_) => AttributeType::Bool,
            Self::F32(_) => AttributeType::F32,
            Self::String(_) => AttributeType::String,
            Self::U32Set(_) => AttributeType::U32Set,
            Self::I64Set(_) => AttributeType::I64Set,
            Self::F32Vec(_) => AttributeType::F32Vec,
            Self::Timestamp(_) => AttributeType::Timestamp,
            Self::U64(_) => AttributeType::U64,
        }
    }

    /// Converts a scalar value to its order-preserving block word (spec
    /// §4.1/§4.4 convention; see [`crate::block`]'s module doc).
    pub fn to_word(&self) -> Result<u64> {
        Ok(match self {
            Self::U32(v) => u64::from(*v),
            Self::I64(v) => crate::block::word_from_i64(*v),
            Self::Bool(v) => u64::from(*v),
            Self::F32(v) => {
                if v.is_nan() {
                    return Err(Error::NotANumber);
                }
                u64::from(v.to_bits())
            }
            Self::Timestamp(v) => crate::block::word_from_i64(*v),
            Self::U64(v) => *v,
            Self::String(_) => return Err(Error::UnsupportedType { attribute: String::new(), reason: "strings use hashing, not words" }),
            Self::U32Set(_) | Self::I64Set(_) | Self::F32Vec(_) => {
                return Err(Error::UnsupportedType { attribute: String::new(), reason: "MVA/vector attributes are not single words" })
            }
        })
    }
}

/// Converts a word back to a typed scalar value.
#[must_use]
pub fn word_to_value(ty: AttributeType, word: u64) -> Value {
    match ty {
        #[allow(clippy::cast_possible_truncation)]
        AttributeType::U32 => Value::U32(word as u32),
        AttributeType::I64 => Value::I64(crate::block::i64_from_word(word)),
        AttributeType::Bool => Value::Bool(word != 0),
        #[allow(clippy::cast_possible_truncation)]
        AttributeType::F32 => Value::F32(f32::from_bits(word as u32)),
        AttributeType::Timestamp => Value::Timestamp(crate::block::i64_from_word(word)),
        AttributeType::U64 => Value::U64(word),
        AttributeType::String | AttributeType::U32Set | AttributeType::I64Set | AttributeType::F32Vec => {
            unreachable!("non-scalar types are never represented as a single word")
        }
    }
}

/// Rebuilds a `u32set` row from its flattened words (spec §4 "MVA types").
#[must_use]
pub fn words_to_u32set(words: &[u64]) -> Vec<u32> {
    #[allow(clippy::cast_possible_truncation)]
    words.iter().map(|&w| w as u32).collect()
}

/// Rebuilds an `i64set` row from its flattened words.
#[must_use]
pub fn words_to_i64set(words: &[u64]) -> Vec<i64> {
    words.iter().map(|&w| crate::block::i64_from_word(w)).collect()
}

/// Rebuilds an `f32vec` row from its flattened words.
#[must_use]
pub fn words_to_f32vec(words: &[u64]) -> Vec<f32> {
    #[allow(clippy::cast_possible_truncation)]
    words.iter().map(|&w| f32::from_bits(w as u32)).collect()
}

/// Maps a block word to its PGM sort key (spec §4.4). Signed types go
/// through the sign-flip bijection; every other scalar word is already a
/// small non-negative quantity (a `u32`, a bool, or an `f32` bit pattern)
/// and is used as-is — sign-flipping it would scramble the ordering PGM
/// relies on. PGM soundness for `F32`/`U64` is therefore bounded to
/// non-negative values that fit in `i64`, matching the min/max tree's own
/// float convention.
#[must_use]
pub fn pgm_sort_key(attribute_type: AttributeType, word: u64) -> i64 {
    match attribute_type {
        AttributeType::I64 | AttributeType::Timestamp => crate::block::i64_from_word(word),
        #[allow(clippy::cast_possible_wrap)]
        _ => word as i64,
    }
}

/// Per-attribute metadata: everything needed to locate and decode its
/// blocks, plus the C3/C4 index structures (spec §3 "AttributeHeader").
#[derive(Debug, Clone)]
pub struct AttributeHeader {
    pub name: String,
    pub attribute_type: AttributeType,
    pub total_rows: u64,
    pub subblock_size: u32,
    pub codec: CodecKind,
    /// Absolute file offset of each block; strictly increasing.
    pub block_offsets: Vec<u64>,
    /// Byte length of each block (block `i` spans `[block_offsets[i],
    /// block_offsets[i] + block_lengths[i])`); kept alongside the offsets
    /// rather than inferred, since the last block's length isn't derivable
    /// from offsets alone.
    pub block_lengths: Vec<u64>,
    pub min_max_tree: MinMaxTree<u64>,
    pub pgm_index: Option<Pgm>,
    pub have_string_hashes: bool,
    /// For `U32Set`/`I64Set`: element count of each logical row, in row
    /// order. Empty for every other type. Per-row offsets are the prefix
    /// sum of this table, not stored separately (spec §4 "a per-row
    /// `(offset, len)` table").
    pub mva_lens: Vec<u32>,
    /// For `F32Vec`: the fixed width of every row's vector. `0` for every
    /// other type.
    pub vector_dim: u32,
}

impl AttributeHeader {
    #[must_use]
    pub fn rows_per_block(&self) -> u64 {
        crate::config::DEFAULT_ROWS_PER_BLOCK as u64
    }

    #[must_use]
    pub fn block_count(&self) -> usize {
        self.block_offsets.len()
    }

    /// Rows in block `i` (the last block may be short). For MVA/vector
    /// types this counts *flattened elements*, not logical rows; use
    /// [`Self::logical_row_count`] for the row count.
    #[must_use]
    pub fn rows_in_block(&self, block_idx: usize) -> u64 {
        let full = self.rows_per_block();
        let start = block_idx as u64 * full;
        full.min(self.total_rows.saturating_sub(start))
    }

    /// Number of logical rows. For scalar/string types this is
    /// `total_rows`; for MVA types it's `mva_lens.len()`; for `F32Vec` it's
    /// `total_rows / vector_dim`.
    #[must_use]
    pub fn logical_row_count(&self) -> u64 {
        match self.attribute_type {
            AttributeType::U32Set | AttributeType::I64Set => self.mva_lens.len() as u64,
            AttributeType::F32Vec if self.vector_dim > 0 => self.total_rows / u64::from(self.vector_dim),
            _ => self.total_rows,
        }
    }

    /// The `[start, end)` element range for logical row `row` within the
    /// flattened word stream, for `U32Set`/`I64Set` attributes.
    #[must_use]
    pub fn mva_row_range(&self, row: u64) -> (u64, u64) {
        let mut offset = 0u64;
        for (i, &len) in self.mva_lens.iter().enumerate() {
            if i as u64 == row {
                return (offset, offset + u64::from(len));
            }
            offset += u64::from(len);
        }
        (offset, offset)
    }

    /// The `[start, end)` element range for logical row `row` within the
    /// flattened word stream, for an `F32Vec` attribute.
    #[must_use]
    pub fn vector_row_range(&self, row: u64) -> (u64, u64) {
        let dim = u64::from(self.vector_dim);
        (row * dim, row * dim + dim)
    }

    /// Whether leaf blocks are non-overlapping and ascending in value, i.e.
    /// block order tracks value order. Only then is a PGM ordinal bound a
    /// sound block-range restriction (spec §4.4); this holds for a
    /// `DELTA`-packed, already-sorted column and generally fails for
    /// `TABLE`/`GENERIC`-packed columns whose values aren't stored in
    /// sorted order.
    #[must_use]
    pub fn blocks_globally_sorted(&self) -> bool {
        self.min_max_tree.leaves().windows(2).all(|w| w[0].1 <= w[1].0)
    }

    /// Narrows `[lo_word, hi_word]` to a block-index range using the C4 PGM
    /// index (spec §4.4's `block = pos >> log2(subblock_size)` step,
    /// generalized to the block count since the PGM's domain is ordinal
    /// position over distinct values, not rows). Returns `None` when there
    /// is no PGM index, or when [`Self::blocks_globally_sorted`] is false
    /// and narrowing would risk dropping a matching block.
    #[must_use]
    pub fn pgm_block_range(&self, lo_word: u64, hi_word: u64) -> Option<(usize, usize)> {
        if !self.blocks_globally_sorted() {
            return None;
        }
        let pgm = self.pgm_index.as_ref()?;
        let blocks = self.block_count() as u64;
        let distinct = pgm.len() as u64;
        if blocks == 0 || distinct == 0 {
            return None;
        }
        let lo_key = pgm_sort_key(self.attribute_type, lo_word.min(hi_word));
        let hi_key = pgm_sort_key(self.attribute_type, lo_word.max(hi_word));
        let lo_bound = pgm.search(lo_key);
        let hi_bound = pgm.search(hi_key);

        let first = (lo_bound.lo * blocks / distinct) as usize;
        let last = ((hi_bound.hi * blocks) / distinct).min(blocks - 1) as usize;
        Some((first, last.max(first)))
    }

    /// Cardinality estimate for rows whose value lies in `[lo_word,
    /// hi_word]` (spec §4.5: "sum of PGM `hi-lo` bounds, capped by total
    /// rows"). `None` when this attribute has no PGM index.
    #[must_use]
    pub fn pgm_estimate_matches(&self, lo_word: u64, hi_word: u64) -> Option<u64> {
        let pgm = self.pgm_index.as_ref()?;
        let lo_key = pgm_sort_key(self.attribute_type, lo_word.min(hi_word));
        let hi_key = pgm_sort_key(self.attribute_type, lo_word.max(hi_word));
        let lo_bound = pgm.search(lo_key);
        let hi_bound = pgm.search(hi_key);
        let span = hi_bound.hi.saturating_sub(lo_bound.lo).max(1);
        Some(span.min(self.total_rows))
    }
}

impl Serializable for AttributeHeader {
    fn serialize<W: Write>(&self, writer: &mut W) -> Result<(), SerializeError> {
        writer.write_u32_varint(self.attribute_type as u32)?;
        writer.write_u8(u8::from(self.have_string_hashes))?;
        writer.write_u32_varint(self.subblock_size)?;
        write_str(writer, self.codec.name())?;
        write_str(writer, &self.name)?;
        writer.write_u64_varint(self.total_rows)?;
        writer.write_u32_varint(self.block_offsets.len() as u32)?;

        let mut prev = 0u64;
        for &off in &self.block_offsets {
            writer.write_u64_varint(off - prev)?;
            prev = off;
        }
        for &len in &self.block_lengths {
            writer.write_u64_varint(len)?;
        }

        self.min_max_tree.serialize(writer)?;

        writer.write_u8(u8::from(self.pgm_index.is_some()))?;
        if let Some(pgm) = &self.pgm_index {
            pgm.serialize(writer)?;
        }

        writer.write_u32_varint(self.mva_lens.len() as u32)?;
        for &len in &self.mva_lens {
            writer.write_u32_varint(len)?;
        }
        writer.write_u32_varint(self.vector_dim)?;

        Ok(())
    }
}

impl Deserializable for AttributeHeader {
    fn deserialize<R: Read>(reader: &mut R) -> Result<Self, DeserializeError> {
        let type_tag = reader.read_u32_varint()?;
        let attribute_type = AttributeType::from_tag(type_tag)
            .map_err(|_| DeserializeError::InvalidTag(("attribute_type", 0)))?;
        let have_string_hashes = reader.read_u8()? != 0;
        let subblock_size = reader.read_u32_varint()?;
        let codec_name = read_str(reader)?;
        let codec = CodecKind::parse(&codec_name).map_err(|_| DeserializeError::InvalidTag(("codec", 0)))?;
        let name = read_str(reader)?;
        let total_rows = reader.read_u64_varint()?;

        let block_count = reader.read_u32_varint()? as usize;
        let mut block_offsets = Vec::with_capacity(block_count);
        let mut prev = 0u64;
        for _ in 0..block_count {
            let delta = reader.read_u64_varint()?;
            prev += delta;
            block_offsets.push(prev);
        }
        let mut block_lengths = Vec::with_capacity(block_count);
        for _ in 0..block_count {
            block_lengths.push(reader.read_u64_varint()?);
        }

        let min_max_tree = MinMaxTree::deserialize(reader)?;

        let has_pgm = reader.read_u8()? != 0;
        let pgm_index = if has_pgm { Some(Pgm::deserialize(reader)?) } else { None };

        let mva_len_count = reader.read_u32_varint()? as usize;
        let mut mva_lens = Vec::with_capacity(mva_len_count);
        for _ in 0..mva_len_count {
            mva_lens.push(reader.read_u32_varint()?);
        }
        let vector_dim = reader.read_u32_varint()?;

        Ok(Self {
            name,
            attribute_type,
            total_rows,
            subblock_size,
            codec,
            block_offsets,
            block_lengths,
            min_max_tree,
            pgm_index,
            have_string_hashes,
            mva_lens,
            vector_dim,
        })
    }
}

/// Sanity cap on a length-prefixed string field (spec §7: "header string
/// length outside sane range" is a corruption error).
const MAX_NAME_LEN: usize = 4096;

fn write_str<W: Write>(writer: &mut W, s: &str) -> Result<(), SerializeError> {
    writer.write_u32_varint(s.len() as u32)?;
    writer.write_all(s.as_bytes())?;
    Ok(())
}

fn read_str<R: Read>(reader: &mut R) -> Result<String, DeserializeError> {
    let len = reader.read_u32_varint()? as usize;
    if len > MAX_NAME_LEN {
        return Err(DeserializeError::InvalidLength { what: "attribute name", len });
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(std::str::from_utf8(&buf)?.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn float_roundtrip_through_word() {
        for v in [0.0f32, 1.5, 100.25, f32::MAX] {
            let word = Value::F32(v).to_word().unwrap();
            let back = word_to_value(AttributeType::F32, word);
            assert_eq!(back, Value::F32(v));
        }
    }

    #[test]
    fn nan_is_rejected() {
        assert!(matches!(Value::F32(f32::NAN).to_word(), Err(Error::NotANumber)));
    }

    #[test]
    fn signed_roundtrip_through_word() {
        for v in [i64::MIN, -5, 0, 5, i64::MAX] {
            let word = Value::I64(v).to_word().unwrap();
            assert_eq!(word_to_value(AttributeType::I64, word), Value::I64(v));
        }
    }

    #[test]
    fn header_roundtrip() {
        let tree = MinMaxTree::build(vec![(0u64, 100), (100, 200)]);
        let pgm = Pgm::build(&[1, 2, 3, 4], 8);
        let header = AttributeHeader {
            name: "price".to_owned(),
            attribute_type: AttributeType::U32,
            total_rows: 131_072,
            subblock_size: 128,
            codec: CodecKind::Pfor,
            block_offsets: vec![100, 5000],
            block_lengths: vec![4900, 1000],
            min_max_tree: tree,
            pgm_index: Some(pgm),
            have_string_hashes: false,
            mva_lens: Vec::new(),
            vector_dim: 0,
        };

        let mut buf = Vec::new();
        header.serialize(&mut buf).unwrap();
        let back = AttributeHeader::deserialize(&mut &buf[..]).unwrap();
        assert_eq!(back.name, header.name);
        assert_eq!(back.total_rows, header.total_rows);
        assert_eq!(back.block_offsets, header.block_offsets);
    }
}
