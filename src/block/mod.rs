// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! C1's block payload: a tagged union over the five packings (spec §3,
//! §9's "`BlockPayload` tagged union with one variant per packing").
//!
//! Block code is deliberately blind to the attribute's logical type: every
//! value is an opaque `u64` "word". The attribute layer is responsible for
//! mapping a logical value to a word such that ascending word order implies
//! ascending logical order (plain zero-extension for `u32`/`bool`/`u64`/
//! timestamps; a sign-flipped bit-cast for `i64`; a raw bit-cast for
//! non-negative `f32`, matching spec §4.4's float convention). That keeps
//! `DELTA`'s monotonicity test and `TABLE`'s sort order correct regardless
//! of the attribute's real type.

pub mod hash_block;

use crate::codec::{self, bitpack, CodecKind};
use crate::config::MAX_TABLE_DISTINCT;
use crate::error::{Error, Result};
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::collections::BTreeSet;
use varint_rs::{VarintReader, VarintWriter};

/// Packing tags, written as a leading varint (spec §6: "`[varint
/// packing_tag]`"; §3's "`u32` at the block head" describes the same field
/// before the varint format was settled on — we follow §6's byte layout).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum Packing {
    Const = 0,
    Table = 1,
    Delta = 2,
    Generic = 3,
    Hash = 4,
}

impl Packing {
    fn from_tag(tag: u32) -> Result<Self> {
        Ok(match tag {
            0 => Self::Const,
            1 => Self::Table,
            2 => Self::Delta,
            3 => Self::Generic,
            4 => Self::Hash,
            other => return Err(Error::UnknownPackingTag(other)),
        })
    }
}

/// Picks the cheapest encoding for a block of row-ordered words, per the
/// packing decision in spec §4.1. Callers building a `string` attribute
/// override `Generic` to `Hash` themselves (block code has no notion of
/// "string").
#[must_use]
pub fn choose_packing(values: &[u64]) -> Packing {
    let distinct: BTreeSet<u64> = values.iter().copied().collect();

    if distinct.len() == 1 {
        return Packing::Const;
    }
    if distinct.len() < MAX_TABLE_DISTINCT {
        return Packing::Table;
    }
    if is_monotone_ascending(values) || is_monotone_descending(values) {
        return Packing::Delta;
    }
    Packing::Generic
}

fn is_monotone_ascending(values: &[u64]) -> bool {
    values.windows(2).all(|w| w[0] <= w[1])
}

fn is_monotone_descending(values: &[u64]) -> bool {
    values.windows(2).all(|w| w[0] >= w[1])
}

/// Encodes one block's worth of row-ordered words with the given packing.
pub fn encode(packing: Packing, values: &[u64], subblock_size: usize, codec: CodecKind) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    out.write_u32_varint(packing as u32)?;

    match packing {
        Packing::Const => encode_const(values, &mut out)?,
        Packing::Table => encode_table(values, subblock_size, codec, &mut out)?,
        Packing::Delta => encode_delta(values, subblock_size, codec, &mut out)?,
        Packing::Generic => encode_generic(values, subblock_size, codec, &mut out)?,
        Packing::Hash => return Err(Error::UnsupportedType { attribute: String::new(), reason: "use hash_block::encode for HASH" }),
    }

    Ok(out)
}

/// Decodes a block payload (any packing except `HASH`) back into row-
/// ordered words.
pub fn decode(bytes: &[u8], row_count: usize, subblock_size: usize, codec: CodecKind) -> Result<Vec<u64>> {
    let mut cursor = bytes;
    let tag = cursor.read_u32_varint()?;
    let packing = Packing::from_tag(tag)?;

    match packing {
        Packing::Const => decode_const(cursor, row_count),
        Packing::Table => decode_table(cursor, row_count, subblock_size, codec),
        Packing::Delta => decode_delta(cursor, row_count, subblock_size, codec),
        Packing::Generic => decode_generic(cursor, row_count, subblock_size, codec),
        Packing::Hash => Err(Error::UnsupportedType { attribute: String::new(), reason: "use hash_block::decode for HASH" }),
    }
}

/// Reads just the packing tag without decoding the payload (used by the
/// iterator engine to branch without a full block decode).
pub fn peek_packing(bytes: &[u8]) -> Result<Packing> {
    let mut cursor = bytes;
    Packing::from_tag(cursor.read_u32_varint()?)
}

fn encode_const(values: &[u64], out: &mut Vec<u8>) -> Result<()> {
    let v = values.first().copied().unwrap_or(0);
    out.write_u64_varint(v)?;
    Ok(())
}

fn decode_const(mut bytes: &[u8], row_count: usize) -> Result<Vec<u64>> {
    let v = bytes.read_u64_varint()?;
    Ok(vec![v; row_count])
}

fn encode_table(values: &[u64], subblock_size: usize, codec: CodecKind, out: &mut Vec<u8>) -> Result<()> {
    let distinct: Vec<u64> = {
        let set: BTreeSet<u64> = values.iter().copied().collect();
        set.into_iter().collect()
    };
    #[allow(clippy::cast_possible_truncation)]
    out.write_u8(distinct.len() as u8)?;

    let table_encoded = codec::encode_delta_u64(codec, &distinct);
    out.write_u32_varint(table_encoded.len() as u32)?;
    out.extend_from_slice(&table_encoded);

    let bit_width = bitpack::bits_for_max((distinct.len() - 1) as u64);
    for chunk in values.chunks(subblock_size) {
        let ordinals: Vec<u32> = chunk
            .iter()
            .map(|v| {
                #[allow(clippy::expect_used)]
                distinct.binary_search(v).expect("value came from this block") as u32
            })
            .collect();
        let packed = bitpack::bitpack128(&ordinals, bit_width);
        out.write_u32_varint(packed.len() as u32)?;
        out.extend_from_slice(&packed);
    }

    Ok(())
}

fn decode_table(mut bytes: &[u8], row_count: usize, subblock_size: usize, codec: CodecKind) -> Result<Vec<u64>> {
    let table_len = usize::from(bytes.read_u8()?);
    let table_bytes_len = bytes.read_u32_varint()? as usize;
    let table_bytes = bytes.get(..table_bytes_len).ok_or(Error::ResidualCodecInput)?;
    bytes = &bytes[table_bytes_len..];
    let distinct = codec::decode_delta_u64(codec, table_bytes, table_len)?;

    let bit_width = bitpack::bits_for_max((table_len.max(1) - 1) as u64);
    let mut out = Vec::with_capacity(row_count);
    let mut remaining = row_count;

    while remaining > 0 {
        let lanes = remaining.min(subblock_size);
        let chunk_len = bytes.read_u32_varint()? as usize;
        let chunk_bytes = bytes.get(..chunk_len).ok_or(Error::ResidualCodecInput)?;
        bytes = &bytes[chunk_len..];
        let ordinals = bitpack::bitunpack128(chunk_bytes, bit_width, lanes);
        for ord in ordinals {
            out.push(*distinct.get(ord as usize).ok_or(Error::ResidualCodecInput)?);
        }
        remaining -= lanes;
    }

    Ok(out)
}

fn encode_delta(values: &[u64], subblock_size: usize, codec: CodecKind, out: &mut Vec<u8>) -> Result<()> {
    for chunk in values.chunks(subblock_size) {
        let ascending = is_monotone_ascending(chunk);
        let direction: u8 = if ascending { 0 } else { 1 };
        out.write_u8(direction)?;

        let ordered: Vec<u64> = if ascending { chunk.to_vec() } else { chunk.iter().rev().copied().collect() };
        let encoded = codec::encode_delta_u64(codec, &ordered);
        out.write_u32_varint(encoded.len() as u32)?;
        out.extend_from_slice(&encoded);
    }
    Ok(())
}

fn decode_delta(mut bytes: &[u8], row_count: usize, subblock_size: usize, codec: CodecKind) -> Result<Vec<u64>> {
    let mut out = Vec::with_capacity(row_count);
    let mut remaining = row_count;

    while remaining > 0 {
        let lanes = remaining.min(subblock_size);
        let direction = bytes.read_u8()?;
        let chunk_len = bytes.read_u32_varint()? as usize;
        let chunk_bytes = bytes.get(..chunk_len).ok_or(Error::ResidualCodecInput)?;
        bytes = &bytes[chunk_len..];
        let mut ordered = codec::decode_delta_u64(codec, chunk_bytes, lanes)?;
        if direction != 0 {
            ordered.reverse();
        }
        out.extend(ordered);
        remaining -= lanes;
    }

    Ok(out)
}

fn encode_generic(values: &[u64], subblock_size: usize, codec: CodecKind, out: &mut Vec<u8>) -> Result<()> {
    for chunk in values.chunks(subblock_size) {
        let min = chunk.iter().copied().min().unwrap_or(0);
        let shifted: Vec<u64> = chunk.iter().map(|v| v.wrapping_sub(min)).collect();
        out.write_u64_varint(min)?;
        let encoded = codec::encode_u64_with(codec, &shifted);
        out.write_u32_varint(encoded.len() as u32)?;
        out.extend_from_slice(&encoded);
    }
    Ok(())
}

fn decode_generic(mut bytes: &[u8], row_count: usize, subblock_size: usize, codec: CodecKind) -> Result<Vec<u64>> {
    let mut out = Vec::with_capacity(row_count);
    let mut remaining = row_count;

    while remaining > 0 {
        let lanes = remaining.min(subblock_size);
        let min = bytes.read_u64_varint()?;
        let chunk_len = bytes.read_u32_varint()? as usize;
        let chunk_bytes = bytes.get(..chunk_len).ok_or(Error::ResidualCodecInput)?;
        bytes = &bytes[chunk_len..];
        let shifted = codec::decode_u64(codec, chunk_bytes, lanes)?;
        out.extend(shifted.into_iter().map(|v| v.wrapping_add(min)));
        remaining -= lanes;
    }

    Ok(out)
}

/// Maps a logical `i64` value to an order-preserving `u64` word (sign bit
/// flip, the standard offset-binary trick): ascending `i64` order becomes
/// ascending `u64` order, so `DELTA`/`TABLE`/min-max comparisons stay
/// correct without block code needing to know about signedness.
#[must_use]
pub fn word_from_i64(v: i64) -> u64 {
    (v as u64) ^ (1u64 << 63)
}

/// Inverse of [`word_from_i64`].
#[must_use]
pub fn i64_from_word(w: u64) -> i64 {
    (w ^ (1u64 << 63)) as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use test_log::test;

    const CODEC: CodecKind = CodecKind::Pfor;

    #[test]
    fn const_block_roundtrip() {
        let values = vec![42u64; 1000];
        let packing = choose_packing(&values);
        assert_eq!(packing, Packing::Const);
        let encoded = encode(packing, &values, 128, CODEC).unwrap();
        let decoded = decode(&encoded, values.len(), 128, CODEC).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn table_block_roundtrip() {
        let values: Vec<u64> = (0..2000).map(|i| [10u64, 20, 30, 40][i % 4]).collect();
        let packing = choose_packing(&values);
        assert_eq!(packing, Packing::Table);
        let encoded = encode(packing, &values, 128, CODEC).unwrap();
        let decoded = decode(&encoded, values.len(), 128, CODEC).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn delta_ascending_block_roundtrip() {
        let values: Vec<u64> = (0..10_000).map(|i| 100 + 3 * i).collect();
        let packing = choose_packing(&values);
        assert_eq!(packing, Packing::Delta);
        let encoded = encode(packing, &values, 128, CODEC).unwrap();
        let decoded = decode(&encoded, values.len(), 128, CODEC).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn delta_descending_block_roundtrip() {
        let values: Vec<u64> = (0..5000).map(|i| 50_000 - 3 * i).collect();
        let packing = choose_packing(&values);
        assert_eq!(packing, Packing::Delta);
        let encoded = encode(packing, &values, 128, CODEC).unwrap();
        let decoded = decode(&encoded, values.len(), 128, CODEC).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn generic_random_block_roundtrip() {
        let values: Vec<u64> = (0..200_000).map(|i: u64| (i * 17) % 1_000_003).collect();
        let packing = choose_packing(&values);
        assert_eq!(packing, Packing::Generic);
        let encoded = encode(packing, &values, 128, CODEC).unwrap();
        let decoded = decode(&encoded, values.len(), 128, CODEC).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn signed_word_roundtrip_preserves_order() {
        let values = [i64::MIN, -1_000_000, -1, 0, 1, 1_000_000, i64::MAX];
        let words: Vec<u64> = values.iter().map(|&v| word_from_i64(v)).collect();
        assert!(words.windows(2).all(|w| w[0] < w[1]));
        let back: Vec<i64> = words.iter().map(|&w| i64_from_word(w)).collect();
        assert_eq!(back, values);
    }

    #[test]
    fn random_fuzz_all_packings() {
        let mut rng = rand::rng();
        for _ in 0..10 {
            let n = rng.random_range(1..2000);
            let values: Vec<u64> = (0..n).map(|_| rng.random_range(0..100)).collect();
            let packing = choose_packing(&values);
            let encoded = encode(packing, &values, 128, CODEC).unwrap();
            let decoded = decode(&encoded, values.len(), 128, CODEC).unwrap();
            assert_eq!(decoded, values);
        }
    }

    #[test]
    fn peek_packing_matches_decode() {
        let values: Vec<u64> = (0..500).map(|i| 5 + i).collect();
        let packing = choose_packing(&values);
        let encoded = encode(packing, &values, 128, CODEC).unwrap();
        assert_eq!(peek_packing(&encoded).unwrap(), packing);
    }
}
