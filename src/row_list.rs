// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Per-distinct-value row lists inside a block (spec §3).

use crate::codec::{self, CodecKind};
use crate::error::{Error, Result};
use byteorder::{ReadBytesExt, WriteBytesExt};
use varint_rs::{VarintReader, VarintWriter};

/// Row IDs are chunked into `ROW_BLOCKS_LIST` groups of this size (spec §3).
pub const CHUNK_SIZE: usize = 1024;

/// The tag byte distinguishing the three row-list encodings on disk.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
enum Tag {
    Row = 0,
    RowBlock = 1,
    RowBlocksList = 2,
}

/// A distinct value's row occurrences inside one block (spec §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowList {
    /// Exactly one row; encoded implicitly, no payload beyond the row ID.
    Row(u64),
    /// Up to [`crate::config::DEFAULT_ROWIDS_PER_BLOCK`] row IDs.
    RowBlock(Vec<u64>),
    /// More than the `ROW_BLOCK` cap; split into disjoint ascending chunks.
    RowBlocksList(Vec<u64>),
}

impl RowList {
    /// Builds the correct variant from an ascending, deduplicated row-ID
    /// list and the configured `ROW_BLOCK` threshold.
    #[must_use]
    pub fn from_rows(rows: Vec<u64>, rowids_per_block: usize) -> Self {
        debug_assert!(rows.windows(2).all(|w| w[0] < w[1]), "row ids must be ascending and distinct");
        match rows.len() {
            0 => Self::RowBlock(rows),
            1 => Self::Row(rows[0]),
            n if n <= rowids_per_block => Self::RowBlock(rows),
            _ => Self::RowBlocksList(rows),
        }
    }

    /// Expands back into the ascending row-ID sequence.
    #[must_use]
    pub fn to_rows(&self) -> Vec<u64> {
        match self {
            Self::Row(r) => vec![*r],
            Self::RowBlock(rows) | Self::RowBlocksList(rows) => rows.clone(),
        }
    }

    pub fn serialize(&self, codec: CodecKind, out: &mut Vec<u8>) -> Result<()> {
        match self {
            Self::Row(r) => {
                out.write_u8(Tag::Row as u8)?;
                out.write_u64_varint(*r)?;
            }
            Self::RowBlock(rows) => {
                out.write_u8(Tag::RowBlock as u8)?;
                out.write_u32_varint(rows.len() as u32)?;
                let encoded = codec::encode_delta_u64(codec, rows);
                out.write_u32_varint(encoded.len() as u32)?;
                out.extend_from_slice(&encoded);
            }
            Self::RowBlocksList(rows) => {
                out.write_u8(Tag::RowBlocksList as u8)?;
                let chunks: Vec<&[u64]> = rows.chunks(CHUNK_SIZE).collect();
                out.write_u32_varint(chunks.len() as u32)?;

                for chunk in &chunks {
                    #[allow(clippy::expect_used)]
                    let min = *chunk.first().expect("chunk non-empty");
                    #[allow(clippy::expect_used)]
                    let max = *chunk.last().expect("chunk non-empty");
                    out.write_u64_varint(min)?;
                    out.write_u64_varint(max - min)?;
                }

                let mut payloads = Vec::with_capacity(chunks.len());
                for chunk in &chunks {
                    let encoded = codec::encode_delta_u64(codec, chunk);
                    out.write_u32_varint(encoded.len() as u32)?;
                    payloads.push(encoded);
                }
                for payload in payloads {
                    out.extend_from_slice(&payload);
                }
            }
        }
        Ok(())
    }

    /// Deserializes a row list. `total_rows` must be supplied by the caller
    /// (e.g. the distinct-value table entry this list belongs to) because a
    /// `ROW_BLOCKS_LIST`'s chunk boundaries can't be derived from `(min,
    /// max)` alone.
    pub fn deserialize(codec: CodecKind, bytes: &[u8], total_rows: usize) -> Result<(Self, usize)> {
        let mut cursor = bytes;
        let start_len = cursor.len();
        let tag = cursor.read_u8()?;

        match tag {
            t if t == Tag::Row as u8 => {
                let r = cursor.read_u64_varint()?;
                Ok((Self::Row(r), start_len - cursor.len()))
            }
            t if t == Tag::RowBlock as u8 => {
                let count = cursor.read_u32_varint()? as usize;
                let payload_len = cursor.read_u32_varint()? as usize;
                let payload = cursor.get(..payload_len).ok_or(Error::ResidualCodecInput)?;
                cursor = &cursor[payload_len..];
                let rows = codec::decode_delta_u64(codec, payload, count)?;
                Ok((Self::RowBlock(rows), start_len - cursor.len()))
            }
            t if t == Tag::RowBlocksList as u8 => {
                let chunk_count = cursor.read_u32_varint()? as usize;
                let mut bounds = Vec::with_capacity(chunk_count);
                for _ in 0..chunk_count {
                    let min = cursor.read_u64_varint()?;
                    let delta = cursor.read_u64_varint()?;
                    bounds.push((min, min + delta));
                }
                let mut payload_lens = Vec::with_capacity(chunk_count);
                for _ in 0..chunk_count {
                    payload_lens.push(cursor.read_u32_varint()? as usize);
                }

                let full_chunks = total_rows / CHUNK_SIZE;
                let remainder = total_rows % CHUNK_SIZE;
                let mut rows = Vec::with_capacity(total_rows);
                for (i, &len) in payload_lens.iter().enumerate() {
                    let payload = cursor.get(..len).ok_or(Error::ResidualCodecInput)?;
                    cursor = &cursor[len..];
                    let chunk_rows = if i < full_chunks { CHUNK_SIZE } else { remainder };
                    let decoded = codec::decode_delta_u64(codec, payload, chunk_rows)?;
                    let (min, max) = bounds[i];
                    if decoded.first().copied() != Some(min) || decoded.last().copied() != Some(max) {
                        return Err(Error::CorruptHeader("ROW_BLOCKS_LIST chunk bounds mismatch"));
                    }
                    rows.extend(decoded);
                }

                Ok((Self::RowBlocksList(rows), start_len - cursor.len()))
            }
            other => Err(Error::UnknownPackingTag(u32::from(other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use test_log::test;

    const CODEC: CodecKind = CodecKind::Pfor;

    #[test]
    fn row_roundtrip() {
        let list = RowList::Row(12345);
        let mut buf = Vec::new();
        list.serialize(CODEC, &mut buf).unwrap();
        let (back, consumed) = RowList::deserialize(CODEC, &buf, 1).unwrap();
        assert_eq!(back, list);
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn row_block_roundtrip() {
        let rows: Vec<u64> = (0..500).map(|i| i * 3).collect();
        let list = RowList::from_rows(rows.clone(), 1024);
        assert!(matches!(list, RowList::RowBlock(_)));
        let mut buf = Vec::new();
        list.serialize(CODEC, &mut buf).unwrap();
        let (back, _) = RowList::deserialize(CODEC, &buf, rows.len()).unwrap();
        assert_eq!(back.to_rows(), rows);
    }

    #[test]
    fn row_blocks_list_roundtrip() {
        let rows: Vec<u64> = (0..5000).map(|i| i * 7).collect();
        let list = RowList::from_rows(rows.clone(), 1024);
        assert!(matches!(list, RowList::RowBlocksList(_)));
        let mut buf = Vec::new();
        list.serialize(CODEC, &mut buf).unwrap();
        let (back, _) = RowList::deserialize(CODEC, &buf, rows.len()).unwrap();
        assert_eq!(back.to_rows(), rows);
    }

    #[test]
    fn random_fuzz_roundtrip() {
        let mut rng = rand::rng();
        for _ in 0..20 {
            let n = rng.random_range(1..6000);
            let mut rows: Vec<u64> = Vec::with_capacity(n);
            let mut acc = 0u64;
            for _ in 0..n {
                acc += rng.random_range(1..50);
                rows.push(acc);
            }
            let list = RowList::from_rows(rows.clone(), 1024);
            let mut buf = Vec::new();
            list.serialize(CODEC, &mut buf).unwrap();
            let (back, consumed) = RowList::deserialize(CODEC, &buf, rows.len()).unwrap();
            assert_eq!(back.to_rows(), rows);
            assert_eq!(consumed, buf.len());
        }
    }
}
