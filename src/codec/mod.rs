// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! C2: the integer codec / bitpack layer.
//!
//! Treated by the spec as an external collaborator behind a small
//! interface (`Encode`/`EncodeDelta`/`Decode`/`DecodeDelta` over 32- and
//! 64-bit streams). This module is that collaborator: a single in-crate
//! implementation, selectable by [`CodecKind`], rather than bindings to an
//! external FastPFOR/StreamVByte library (no such crate exists on
//! crates.io with a compatible wire format — see `DESIGN.md`).

pub mod bitpack;
pub mod streamvbyte;

use crate::error::{Error, Result};
use bitpack::{bitpack128, bits_for_max, bitunpack128};
use byteorder::{ReadBytesExt, WriteBytesExt};
use varint_rs::{VarintReader, VarintWriter};

/// Names of permissible algorithms (spec §4.2). Several names share one
/// underlying strategy in this implementation — see [`CodecKind::strategy`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CodecKind {
    Fastpfor128,
    Fastpfor256,
    Simdfastpfor128,
    Simdfastpfor256,
    Pfor,
    Simdpfor,
    Simple8b,
    Simple8bRle,
    Streamvbyte,
    Varintgb,
    Copy,
}

impl CodecKind {
    /// Name as written into the file footer's settings block (spec §6).
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Fastpfor128 => "fastpfor128",
            Self::Fastpfor256 => "fastpfor256",
            Self::Simdfastpfor128 => "simdfastpfor128",
            Self::Simdfastpfor256 => "simdfastpfor256",
            Self::Pfor => "pfor",
            Self::Simdpfor => "simdpfor",
            Self::Simple8b => "simple8b",
            Self::Simple8bRle => "simple8b_rle",
            Self::Streamvbyte => "streamvbyte",
            Self::Varintgb => "varintgb",
            Self::Copy => "copy",
        }
    }

    /// Parses a codec name as stored in the footer settings block.
    pub fn parse(name: &str) -> Result<Self> {
        Ok(match name {
            "fastpfor128" => Self::Fastpfor128,
            "fastpfor256" => Self::Fastpfor256,
            "simdfastpfor128" => Self::Simdfastpfor128,
            "simdfastpfor256" => Self::Simdfastpfor256,
            "pfor" => Self::Pfor,
            "simdpfor" => Self::Simdpfor,
            "simple8b" => Self::Simple8b,
            "simple8b_rle" => Self::Simple8bRle,
            "streamvbyte" => Self::Streamvbyte,
            "varintgb" => Self::Varintgb,
            "copy" => Self::Copy,
            _ => return Err(Error::CorruptHeader("unknown codec name")),
        })
    }

    fn strategy(self) -> Strategy {
        match self {
            Self::Streamvbyte => Strategy::StreamVByte,
            Self::Varintgb => Strategy::Varint,
            Self::Copy => Strategy::Raw,
            _ => Strategy::Pfor,
        }
    }
}

enum Strategy {
    /// Frame-of-reference plus fixed-width bitpacking (covers the PFOR/
    /// simple8b family's role in this crate: a workhorse bulk codec).
    Pfor,
    StreamVByte,
    Varint,
    Raw,
}

/// Encodes a plain (non-delta) `u32` stream.
#[must_use]
pub fn encode_u32(values: &[u32]) -> Vec<u8> {
    encode_u32_with(CodecKind::Fastpfor128, values)
}

/// Encodes a plain `u32` stream with an explicit codec choice.
#[must_use]
pub fn encode_u32_with(codec: CodecKind, values: &[u32]) -> Vec<u8> {
    match codec.strategy() {
        Strategy::Pfor => pfor_encode_u32(values),
        Strategy::StreamVByte => streamvbyte::encode(values),
        Strategy::Varint => varint_encode_u32(values),
        Strategy::Raw => raw_encode_u32(values),
    }
}

/// Decodes a plain `u32` stream written by the matching `encode_*` call.
pub fn decode_u32(codec: CodecKind, bytes: &[u8], count: usize) -> Result<Vec<u32>> {
    let out = match codec.strategy() {
        Strategy::Pfor => pfor_decode_u32(bytes, count)?,
        Strategy::StreamVByte => streamvbyte::decode(bytes)?,
        Strategy::Varint => varint_decode_u32(bytes, count)?,
        Strategy::Raw => raw_decode_u32(bytes, count)?,
    };
    if out.len() != count {
        return Err(Error::ResidualCodecInput);
    }
    Ok(out)
}

/// Encodes the first-difference sequence of `values` (ascending), seeding
/// with the absolute first value so decode needs no external context.
#[must_use]
pub fn encode_delta_u32(codec: CodecKind, values: &[u32]) -> Vec<u8> {
    let deltas = to_deltas_u32(values);
    encode_u32_with(codec, &deltas)
}

/// Inverse of [`encode_delta_u32`].
pub fn decode_delta_u32(codec: CodecKind, bytes: &[u8], count: usize) -> Result<Vec<u32>> {
    let deltas = decode_u32(codec, bytes, count)?;
    Ok(from_deltas_u32(&deltas))
}

fn to_deltas_u32(values: &[u32]) -> Vec<u32> {
    let mut out = Vec::with_capacity(values.len());
    let mut prev = 0u32;
    for (i, &v) in values.iter().enumerate() {
        if i == 0 {
            out.push(v);
        } else {
            out.push(v.wrapping_sub(prev));
        }
        prev = v;
    }
    out
}

fn from_deltas_u32(deltas: &[u32]) -> Vec<u32> {
    let mut out = Vec::with_capacity(deltas.len());
    let mut acc = 0u32;
    for (i, &d) in deltas.iter().enumerate() {
        if i == 0 {
            acc = d;
        } else {
            acc = acc.wrapping_add(d);
        }
        out.push(acc);
    }
    out
}

// ---- u64 variants (same shapes, 64-bit lanes) ----

/// Encodes a plain `u64` stream.
#[must_use]
pub fn encode_u64_with(codec: CodecKind, values: &[u64]) -> Vec<u8> {
    match codec.strategy() {
        Strategy::Pfor => pfor_encode_u64(values),
        Strategy::StreamVByte | Strategy::Varint => varint_encode_u64(values),
        Strategy::Raw => raw_encode_u64(values),
    }
}

/// Decodes a plain `u64` stream.
pub fn decode_u64(codec: CodecKind, bytes: &[u8], count: usize) -> Result<Vec<u64>> {
    let out = match codec.strategy() {
        Strategy::Pfor => pfor_decode_u64(bytes, count)?,
        Strategy::StreamVByte | Strategy::Varint => varint_decode_u64(bytes, count)?,
        Strategy::Raw => raw_decode_u64(bytes, count)?,
    };
    if out.len() != count {
        return Err(Error::ResidualCodecInput);
    }
    Ok(out)
}

/// Encodes the first-difference sequence of a `u64` stream (ascending).
#[must_use]
pub fn encode_delta_u64(codec: CodecKind, values: &[u64]) -> Vec<u8> {
    let deltas = to_deltas_u64(values);
    encode_u64_with(codec, &deltas)
}

/// Inverse of [`encode_delta_u64`].
pub fn decode_delta_u64(codec: CodecKind, bytes: &[u8], count: usize) -> Result<Vec<u64>> {
    let deltas = decode_u64(codec, bytes, count)?;
    Ok(from_deltas_u64(&deltas))
}

fn to_deltas_u64(values: &[u64]) -> Vec<u64> {
    let mut out = Vec::with_capacity(values.len());
    let mut prev = 0u64;
    for (i, &v) in values.iter().enumerate() {
        if i == 0 {
            out.push(v);
        } else {
            out.push(v.wrapping_sub(prev));
        }
        prev = v;
    }
    out
}

fn from_deltas_u64(deltas: &[u64]) -> Vec<u64> {
    let mut out = Vec::with_capacity(deltas.len());
    let mut acc = 0u64;
    for (i, &d) in deltas.iter().enumerate() {
        if i == 0 {
            acc = d;
        } else {
            acc = acc.wrapping_add(d);
        }
        out.push(acc);
    }
    out
}

// ---- Pfor strategy: frame-of-reference + fixed-width bitpack ----

fn pfor_encode_u32(values: &[u32]) -> Vec<u8> {
    let min = values.iter().copied().min().unwrap_or(0);
    let shifted: Vec<u32> = values.iter().map(|v| v - min).collect();
    let max = shifted.iter().copied().max().unwrap_or(0);
    let bit_width = bits_for_max(u64::from(max));
    let packed = bitpack128(&shifted, bit_width);

    let mut out = Vec::new();
    out.write_u32_varint(min).expect("write to Vec cannot fail");
    out.write_u8(bit_width as u8).expect("write to Vec cannot fail");
    out.extend_from_slice(&packed);
    out
}

fn pfor_decode_u32(mut bytes: &[u8], count: usize) -> Result<Vec<u32>> {
    let min = bytes.read_u32_varint()?;
    let bit_width = u32::from(bytes.read_u8()?);
    let shifted = bitunpack128(bytes, bit_width, count);
    Ok(shifted.into_iter().map(|v| v + min).collect())
}

fn pfor_encode_u64(values: &[u64]) -> Vec<u8> {
    let min = values.iter().copied().min().unwrap_or(0);
    let shifted: Vec<u64> = values.iter().map(|v| v - min).collect();
    // NOTE: reuse the 32-bit packer two lanes at a time (hi/lo words);
    // simpler than a second bitpack implementation and equally correct.
    let bit_width = bits_for_max(shifted.iter().copied().max().unwrap_or(0));

    let mut out = Vec::new();
    out.write_u64_varint(min).expect("write to Vec cannot fail");
    out.write_u8(bit_width as u8).expect("write to Vec cannot fail");
    for v in &shifted {
        write_bits_u64(&mut out, *v, bit_width);
    }
    out
}

fn pfor_decode_u64(mut bytes: &[u8], count: usize) -> Result<Vec<u64>> {
    let min = bytes.read_u64_varint()?;
    let bit_width = u32::from(bytes.read_u8()?);
    let byte_len = (bit_width as usize).div_ceil(8).max(1);
    let mut out = Vec::with_capacity(count);
    for chunk in bytes.chunks(byte_len).take(count) {
        out.push(read_bits_u64(chunk, bit_width) + min);
    }
    if out.len() != count {
        return Err(Error::ResidualCodecInput);
    }
    Ok(out)
}

fn write_bits_u64(out: &mut Vec<u8>, v: u64, bit_width: u32) {
    let byte_len = (bit_width as usize).div_ceil(8).max(1);
    let bytes = v.to_le_bytes();
    out.extend_from_slice(&bytes[..byte_len]);
}

fn read_bits_u64(bytes: &[u8], bit_width: u32) -> u64 {
    let mask: u64 = if bit_width >= 64 {
        u64::MAX
    } else {
        (1u64 << bit_width) - 1
    };
    let mut buf = [0u8; 8];
    let n = bytes.len().min(8);
    buf[..n].copy_from_slice(&bytes[..n]);
    u64::from_le_bytes(buf) & mask
}

// ---- Varint strategy: sequential LEB128 ----

fn varint_encode_u32(values: &[u32]) -> Vec<u8> {
    let mut out = Vec::new();
    for &v in values {
        out.write_u32_varint(v).expect("write to Vec cannot fail");
    }
    out
}

fn varint_decode_u32(mut bytes: &[u8], count: usize) -> Result<Vec<u32>> {
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        out.push(bytes.read_u32_varint()?);
    }
    Ok(out)
}

fn varint_encode_u64(values: &[u64]) -> Vec<u8> {
    let mut out = Vec::new();
    for &v in values {
        out.write_u64_varint(v).expect("write to Vec cannot fail");
    }
    out
}

fn varint_decode_u64(mut bytes: &[u8], count: usize) -> Result<Vec<u64>> {
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        out.push(bytes.read_u64_varint()?);
    }
    Ok(out)
}

// ---- Raw strategy: fixed-width little-endian, no compression ----

fn raw_encode_u32(values: &[u32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * 4);
    for &v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

fn raw_decode_u32(bytes: &[u8], count: usize) -> Result<Vec<u32>> {
    if bytes.len() != count * 4 {
        return Err(Error::ResidualCodecInput);
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes(c.try_into().expect("chunk is 4 bytes")))
        .collect())
}

fn raw_encode_u64(values: &[u64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * 8);
    for &v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

fn raw_decode_u64(bytes: &[u8], count: usize) -> Result<Vec<u64>> {
    if bytes.len() != count * 8 {
        return Err(Error::ResidualCodecInput);
    }
    Ok(bytes
        .chunks_exact(8)
        .map(|c| u64::from_le_bytes(c.try_into().expect("chunk is 8 bytes")))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use test_log::test;

    const ALL_CODECS: &[CodecKind] = &[
        CodecKind::Fastpfor128,
        CodecKind::Fastpfor256,
        CodecKind::Simdfastpfor128,
        CodecKind::Simdfastpfor256,
        CodecKind::Pfor,
        CodecKind::Simdpfor,
        CodecKind::Simple8b,
        CodecKind::Simple8bRle,
        CodecKind::Streamvbyte,
        CodecKind::Varintgb,
        CodecKind::Copy,
    ];

    #[test]
    fn name_roundtrip() {
        for &c in ALL_CODECS {
            assert_eq!(CodecKind::parse(c.name()).unwrap(), c);
        }
    }

    #[test]
    fn u32_roundtrip_all_codecs() {
        let values: Vec<u32> = (0..500).map(|i| (i * 31) % 10_007).collect();
        for &codec in ALL_CODECS {
            let encoded = encode_u32_with(codec, &values);
            let decoded = decode_u32(codec, &encoded, values.len()).unwrap();
            assert_eq!(decoded, values, "codec {:?}", codec.name());
        }
    }

    #[test]
    fn u32_delta_roundtrip() {
        let values: Vec<u32> = (0..1000).map(|i| 100 + i * 3).collect();
        for &codec in ALL_CODECS {
            let encoded = encode_delta_u32(codec, &values);
            let decoded = decode_delta_u32(codec, &encoded, values.len()).unwrap();
            assert_eq!(decoded, values, "codec {:?}", codec.name());
        }
    }

    #[test]
    fn u64_roundtrip_all_codecs() {
        let values: Vec<u64> = (0..300).map(|i| (i as u64) * 1_000_003).collect();
        for &codec in ALL_CODECS {
            let encoded = encode_u64_with(codec, &values);
            let decoded = decode_u64(codec, &encoded, values.len()).unwrap();
            assert_eq!(decoded, values, "codec {:?}", codec.name());
        }
    }

    #[test]
    fn u64_delta_roundtrip() {
        let values: Vec<u64> = (0..1000).map(|i| 1_000_000 + i as u64 * 7).collect();
        for &codec in ALL_CODECS {
            let encoded = encode_delta_u64(codec, &values);
            let decoded = decode_delta_u64(codec, &encoded, values.len()).unwrap();
            assert_eq!(decoded, values, "codec {:?}", codec.name());
        }
    }

    #[test]
    fn empty_stream_roundtrips() {
        for &codec in ALL_CODECS {
            let encoded = encode_u32_with(codec, &[]);
            let decoded = decode_u32(codec, &encoded, 0).unwrap();
            assert!(decoded.is_empty());
        }
    }

    #[test]
    fn random_fuzz_u32() {
        let mut rng = rand::rng();
        for _ in 0..20 {
            let n = rng.random_range(0..300);
            let values: Vec<u32> = (0..n).map(|_| rng.random_range(0..1_000_000)).collect();
            for &codec in ALL_CODECS {
                let encoded = encode_u32_with(codec, &values);
                let decoded = decode_u32(codec, &encoded, values.len()).unwrap();
                assert_eq!(decoded, values);
            }
        }
    }
}
