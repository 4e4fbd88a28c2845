// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! `HASH` block packing: string attributes with `have_string_hashes` set
//! (spec §3). Per subblock: `[u16 non-null-count][optional null-bitmap][u64
//! hashes x non-null-count]`. The null bitmap is omitted entirely when
//! every row in the subblock is non-null.

use super::Packing;
use crate::error::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use varint_rs::{VarintReader, VarintWriter};

/// Encodes a full block of per-row optional hashes (`None` = null).
pub fn encode_block(values: &[Option<u64>], subblock_size: usize) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    out.write_u32_varint(Packing::Hash as u32)?;

    for chunk in values.chunks(subblock_size) {
        let non_null_count = chunk.iter().filter(|v| v.is_some()).count();
        #[allow(clippy::cast_possible_truncation)]
        out.write_u16::<LittleEndian>(non_null_count as u16)?;

        if non_null_count != chunk.len() {
            let bitmap_len = chunk.len().div_ceil(8);
            let mut bitmap = vec![0u8; bitmap_len];
            for (i, v) in chunk.iter().enumerate() {
                if v.is_none() {
                    bitmap[i / 8] |= 1 << (i % 8);
                }
            }
            out.extend_from_slice(&bitmap);
        }

        for v in chunk.iter().flatten() {
            out.write_u64::<LittleEndian>(*v)?;
        }
    }

    Ok(out)
}

/// Decodes a `HASH`-packed block back into per-row optional hashes.
pub fn decode_block(bytes: &[u8], row_count: usize, subblock_size: usize) -> Result<Vec<Option<u64>>> {
    let mut cursor = bytes;
    let tag = cursor.read_u32_varint()?;
    if Packing::from_tag(tag)? != Packing::Hash {
        return Err(Error::UnknownPackingTag(tag));
    }

    let mut out = Vec::with_capacity(row_count);
    let mut remaining = row_count;

    while remaining > 0 {
        let lanes = remaining.min(subblock_size);
        let non_null_count = usize::from(cursor.read_u16::<LittleEndian>()?);

        let nulls: Vec<bool> = if non_null_count == lanes {
            vec![false; lanes]
        } else {
            let bitmap_len = lanes.div_ceil(8);
            let bitmap = cursor.get(..bitmap_len).ok_or(Error::ResidualCodecInput)?;
            cursor = &cursor[bitmap_len..];
            (0..lanes).map(|i| bitmap[i / 8] & (1 << (i % 8)) != 0).collect()
        };

        for is_null in nulls {
            if is_null {
                out.push(None);
            } else {
                out.push(Some(cursor.read_u64::<LittleEndian>()?));
            }
        }

        remaining -= lanes;
    }

    Ok(out)
}
