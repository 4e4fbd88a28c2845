// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! C1: the block packer. Buffers one attribute's rows, picks a packing per
//! 65 536-row block, and serializes the block stream plus its header
//! (spec §4.1).

use crate::attribute::{pgm_sort_key, AttributeHeader, AttributeType, Value};
use crate::block::{self, hash_block, Packing};
use crate::codec::CodecKind;
use crate::config::{Settings, DEFAULT_ROWS_PER_BLOCK};
use crate::error::{Error, Result};
use crate::hash::hash64;
use crate::min_max_tree::MinMaxTree;
use crate::pgm::{Pgm, DEFAULT_EPSILON};
use std::collections::BTreeSet;

/// Output of [`ColumnBuilder::finish`]: a ready-to-write block stream plus
/// its header, with block offsets relative to the start of this
/// attribute's body (the caller adds the attribute's base file offset).
pub struct BuiltAttribute {
    pub header: AttributeHeader,
    pub blocks_bytes: Vec<u8>,
}

/// Accumulates `(row, value)` pairs for one attribute and flushes blocks
/// as they fill (spec §4.1 contract: `add`, implicit flush at 65 536 rows,
/// `finish`).
pub struct ColumnBuilder {
    name: String,
    attribute_type: AttributeType,
    settings: Settings,
    pending_words: Vec<u64>,
    pending_hashes: Vec<Option<u64>>,
    total_rows: u64,
    blocks_bytes: Vec<u8>,
    block_offsets: Vec<u64>,
    block_lengths: Vec<u64>,
    minmax_leaves: Vec<(u64, u64)>,
    distinct_words: BTreeSet<u64>,
    /// `U32Set`/`I64Set` only: element count of each logical row seen so far.
    mva_lens: Vec<u32>,
    /// `F32Vec` only: the dimension inferred from the first row.
    vector_dim: Option<u32>,
}

impl ColumnBuilder {
    #[must_use]
    pub fn new(name: impl Into<String>, attribute_type: AttributeType, settings: Settings) -> Self {
        Self {
            name: name.into(),
            attribute_type,
            settings,
            pending_words: Vec::new(),
            pending_hashes: Vec::new(),
            total_rows: 0,
            blocks_bytes: Vec::new(),
            block_offsets: Vec::new(),
            block_lengths: Vec::new(),
            minmax_leaves: Vec::new(),
            distinct_words: BTreeSet::new(),
            mva_lens: Vec::new(),
            vector_dim: None,
        }
    }

    fn rows_per_block(&self) -> usize {
        DEFAULT_ROWS_PER_BLOCK as usize
    }

    fn codec_for(&self) -> CodecKind {
        if matches!(self.attribute_type, AttributeType::U32 | AttributeType::Bool | AttributeType::F32 | AttributeType::F32Vec) {
            self.settings.codec_32_value()
        } else {
            self.settings.codec_64_value()
        }
    }

    /// Appends one row's value. Rows must be presented in ascending row-ID
    /// order starting at 0 (the builder assigns row IDs implicitly by
    /// arrival order, matching the block-packer's "buffers rows" model).
    /// `U32Set`/`I64Set`/`F32Vec` rows are flattened into the same word
    /// stream the scalar path uses (spec §4 "reusing the same block
    /// packings over a flattened value stream").
    pub fn add(&mut self, value: &Value) -> Result<()> {
        if value.attribute_type() != self.attribute_type {
            return Err(Error::UnsupportedType {
                attribute: self.name.clone(),
                reason: "value type does not match attribute type",
            });
        }

        match value {
            Value::String(s) => {
                let h = hash64(s.as_bytes());
                self.pending_hashes.push(Some(h));
                self.distinct_words.insert(h);
                self.total_rows += 1;
            }
            Value::U32Set(items) => {
                self.mva_lens.push(items.len() as u32);
                for &v in items {
                    let word = u64::from(v);
                    self.pending_words.push(word);
                    self.distinct_words.insert(word);
                }
                self.total_rows += items.len() as u64;
            }
            Value::I64Set(items) => {
                self.mva_lens.push(items.len() as u32);
                for &v in items {
                    let word = crate::block::word_from_i64(v);
                    self.pending_words.push(word);
                    self.distinct_words.insert(word);
                }
                self.total_rows += items.len() as u64;
            }
            Value::F32Vec(items) => {
                let dim = *self.vector_dim.get_or_insert(items.len() as u32);
                if items.len() as u32 != dim {
                    return Err(Error::DimensionMismatch { expected: dim, got: items.len() as u32 });
                }
                for &v in items {
                    if v.is_nan() {
                        return Err(Error::NotANumber);
                    }
                    self.pending_words.push(u64::from(v.to_bits()));
                }
                self.total_rows += items.len() as u64;
            }
            _ => {
                let word = value.to_word()?;
                self.pending_words.push(word);
                self.distinct_words.insert(word);
                self.total_rows += 1;
            }
        }

        if self.pending_words.len() >= self.rows_per_block() || self.pending_hashes.len() >= self.rows_per_block() {
            self.flush_block()?;
        }

        Ok(())
    }

    fn flush_block(&mut self) -> Result<()> {
        if self.attribute_type == AttributeType::String {
            if self.pending_hashes.is_empty() {
                return Ok(());
            }
            let min = self.pending_hashes.iter().flatten().min().copied().unwrap_or(0);
            let max = self.pending_hashes.iter().flatten().max().copied().unwrap_or(0);
            self.minmax_leaves.push((min, max));

            let subblock_size = self.settings.subblock_size_value() as usize;
            let encoded = hash_block::encode_block(&self.pending_hashes, subblock_size)?;
            self.block_offsets.push(self.blocks_bytes.len() as u64);
            self.block_lengths.push(encoded.len() as u64);
            self.blocks_bytes.extend_from_slice(&encoded);
            self.pending_hashes.clear();
        } else {
            if self.pending_words.is_empty() {
                return Ok(());
            }
            let min = self.pending_words.iter().copied().min().unwrap_or(0);
            let max = self.pending_words.iter().copied().max().unwrap_or(0);
            self.minmax_leaves.push((min, max));

            // F32Vec gets no packing selection: a raw-float block stream
            // (spec §4 "no packing selection -- GENERIC-equivalent only").
            let packing = if self.attribute_type == AttributeType::F32Vec {
                Packing::Generic
            } else {
                block::choose_packing(&self.pending_words)
            };
            let subblock_size = self.settings.subblock_size_value() as usize;
            let codec = self.codec_for();
            let encoded = block::encode(packing, &self.pending_words, subblock_size, codec)?;
            self.block_offsets.push(self.blocks_bytes.len() as u64);
            self.block_lengths.push(encoded.len() as u64);
            self.blocks_bytes.extend_from_slice(&encoded);
            self.pending_words.clear();
        }

        Ok(())
    }

    /// Flushes the last (possibly partial) block and builds the C3/C4
    /// index structures, returning the finished attribute.
    pub fn finish(mut self) -> Result<BuiltAttribute> {
        self.flush_block()?;

        let is_string = self.attribute_type == AttributeType::String;
        let min_max_tree = MinMaxTree::build(self.minmax_leaves);

        // MVA and vector columns have no meaningful per-row scalar order, so
        // they get no PGM (spec §4.4 scopes C4 to scalar attributes).
        let pgm_index = if is_string || !self.attribute_type.is_scalar() {
            None
        } else {
            let mut sorted: Vec<i64> = self
                .distinct_words
                .iter()
                .map(|&w| pgm_sort_key(self.attribute_type, w))
                .collect();
            sorted.sort_unstable();
            sorted.dedup();
            Some(Pgm::build(&sorted, DEFAULT_EPSILON))
        };

        let codec = self.codec_for();

        let header = AttributeHeader {
            name: self.name,
            attribute_type: self.attribute_type,
            total_rows: self.total_rows,
            subblock_size: self.settings.subblock_size_value(),
            codec,
            block_offsets: self.block_offsets,
            block_lengths: self.block_lengths,
            min_max_tree,
            pgm_index,
            have_string_hashes: is_string,
            mva_lens: self.mva_lens,
            vector_dim: self.vector_dim.unwrap_or(0),
        };

        Ok(BuiltAttribute { header, blocks_bytes: self.blocks_bytes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use test_log::test;

    #[test]
    fn builds_const_attribute() {
        let mut builder = ColumnBuilder::new("flag", AttributeType::I64, Settings::new());
        for _ in 0..1000 {
            builder.add(&Value::I64(42)).unwrap();
        }
        let built = builder.finish().unwrap();
        assert_eq!(built.header.total_rows, 1000);
        assert_eq!(built.header.block_count(), 1);

        let decoded = block::decode(&built.blocks_bytes, 1000, 128, built.header.codec).unwrap();
        assert!(decoded.iter().all(|&w| crate::block::i64_from_word(w) == 42));
    }

    #[test]
    fn builds_multi_block_attribute() {
        let mut builder = ColumnBuilder::new("id", AttributeType::U32, Settings::new());
        let rows: u32 = 150_000;
        for i in 0..rows {
            builder.add(&Value::U32(i)).unwrap();
        }
        let built = builder.finish().unwrap();
        assert_eq!(built.header.total_rows, u64::from(rows));
        assert_eq!(built.header.block_count(), 3);
        assert!(built.header.block_offsets.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn string_attribute_builds_hash_blocks() {
        let mut builder = ColumnBuilder::new("tag", AttributeType::String, Settings::new());
        let cycle = ["a", "b", "c"];
        for i in 0..9 {
            builder.add(&Value::String(cycle[i % 3].to_owned())).unwrap();
        }
        let built = builder.finish().unwrap();
        assert!(built.header.have_string_hashes);
        assert!(built.header.pgm_index.is_none());

        let decoded = hash_block::decode_block(&built.blocks_bytes, 9, 128).unwrap();
        let target = hash64(b"a");
        let matches: Vec<usize> =
            decoded.iter().enumerate().filter_map(|(i, v)| (*v == Some(target)).then_some(i)).collect();
        assert_eq!(matches, vec![0, 3, 6]);
    }

    #[test]
    fn rejects_mismatched_value_type() {
        let mut builder = ColumnBuilder::new("n", AttributeType::U32, Settings::new());
        assert!(builder.add(&Value::I64(1)).is_err());
    }

    #[test]
    fn u32set_flattens_and_tracks_row_lengths() {
        let mut builder = ColumnBuilder::new("tags", AttributeType::U32Set, Settings::new());
        let rows: Vec<Vec<u32>> = vec![vec![1, 2, 3], vec![], vec![4]];
        for row in &rows {
            builder.add(&Value::U32Set(row.clone())).unwrap();
        }
        let built = builder.finish().unwrap();
        assert_eq!(built.header.total_rows, 4);
        assert_eq!(built.header.mva_lens, vec![3, 0, 1]);
        assert!(built.header.pgm_index.is_none());

        let words = block::decode(&built.blocks_bytes, 4, 128, built.header.codec).unwrap();
        for (i, row) in rows.iter().enumerate() {
            let (start, end) = built.header.mva_row_range(i as u64);
            let values = crate::attribute::words_to_u32set(&words[start as usize..end as usize]);
            assert_eq!(&values, row);
        }
    }

    #[test]
    fn i64set_flattens_signed_values() {
        let mut builder = ColumnBuilder::new("ints", AttributeType::I64Set, Settings::new());
        builder.add(&Value::I64Set(vec![-5, 0, 5])).unwrap();
        builder.add(&Value::I64Set(vec![i64::MIN, i64::MAX])).unwrap();
        let built = builder.finish().unwrap();
        assert_eq!(built.header.mva_lens, vec![3, 2]);

        let words = block::decode(&built.blocks_bytes, 5, 128, built.header.codec).unwrap();
        let (start, end) = built.header.mva_row_range(1);
        let values = crate::attribute::words_to_i64set(&words[start as usize..end as usize]);
        assert_eq!(values, vec![i64::MIN, i64::MAX]);
    }

    #[test]
    fn f32vec_round_trips_and_uses_generic_packing() {
        let mut builder = ColumnBuilder::new("embedding", AttributeType::F32Vec, Settings::new());
        let rows: Vec<Vec<f32>> = (0..10).map(|i| vec![i as f32, (i * 2) as f32, -(i as f32)]).collect();
        for row in &rows {
            builder.add(&Value::F32Vec(row.clone())).unwrap();
        }
        let built = builder.finish().unwrap();
        assert_eq!(built.header.vector_dim, 3);
        assert!(built.header.pgm_index.is_none());

        let peeked = block::peek_packing(&built.blocks_bytes).unwrap();
        assert_eq!(peeked, Packing::Generic);

        let words = block::decode(&built.blocks_bytes, 30, 128, built.header.codec).unwrap();
        for (i, row) in rows.iter().enumerate() {
            let (start, end) = built.header.vector_row_range(i as u64);
            let values = crate::attribute::words_to_f32vec(&words[start as usize..end as usize]);
            assert_eq!(values, *row);
        }
    }

    #[test]
    fn f32vec_rejects_dimension_mismatch() {
        let mut builder = ColumnBuilder::new("embedding", AttributeType::F32Vec, Settings::new());
        builder.add(&Value::F32Vec(vec![1.0, 2.0])).unwrap();
        let err = builder.add(&Value::F32Vec(vec![1.0, 2.0, 3.0]));
        assert!(matches!(err, Err(Error::DimensionMismatch { expected: 2, got: 3 })));
    }

    #[test]
    fn f32vec_rejects_nan() {
        let mut builder = ColumnBuilder::new("embedding", AttributeType::F32Vec, Settings::new());
        assert!(matches!(builder.add(&Value::F32Vec(vec![f32::NAN])), Err(Error::NotANumber)));
    }
}
