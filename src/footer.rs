// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The file footer: attribute headers, the enabled bitmap, and settings
//! (spec §3, §6).

use crate::attribute::AttributeHeader;
use crate::codec::CodecKind;
use crate::serde::{Deserializable, DeserializeError, SerializeError, Serializable};
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};
use varint_rs::{VarintReader, VarintWriter};

/// The footer written at `meta_offset` (spec §6). `next_meta_offset` is
/// always `0` in this revision (the format reserves the field for a future
/// chained-footer scheme, matching the header-chaining convention used for
/// attribute headers elsewhere in the file).
#[derive(Debug, Clone)]
pub struct Footer {
    pub version: u32,
    pub subblock_size: u32,
    pub rowids_per_block: u32,
    pub codec_32: CodecKind,
    pub codec_64: CodecKind,
    /// One bit per attribute; mutable post-build via [`crate::io::patch_in_place`].
    pub enabled: Vec<bool>,
    pub headers: Vec<AttributeHeader>,
}

impl Footer {
    /// Byte offset, from the start of the serialized footer, where the
    /// packed enabled-bitmap begins. Callers flipping a single attribute's
    /// bit should prefer [`Self::enabled_bitmap_bytes`] plus this offset
    /// over a full footer rewrite.
    #[must_use]
    pub fn enabled_bitmap_header_len() -> u64 {
        // u64 next_meta_offset + u32 num_attributes
        8 + 4
    }

    #[must_use]
    pub fn enabled_bitmap_bytes(&self) -> Vec<u8> {
        pack_bitmap(&self.enabled)
    }
}

fn pack_bitmap(bits: &[bool]) -> Vec<u8> {
    let mut out = vec![0u8; bits.len().div_ceil(8)];
    for (i, &b) in bits.iter().enumerate() {
        if b {
            out[i / 8] |= 1 << (i % 8);
        }
    }
    out
}

fn unpack_bitmap(bytes: &[u8], count: usize) -> Vec<bool> {
    (0..count).map(|i| bytes[i / 8] & (1 << (i % 8)) != 0).collect()
}

impl Serializable for Footer {
    fn serialize<W: Write>(&self, writer: &mut W) -> Result<(), SerializeError> {
        writer.write_u64_varint(0)?; // next_meta_offset
        writer.write_u32_varint(self.headers.len() as u32)?;

        let bitmap = self.enabled_bitmap_bytes();
        writer.write_u32_varint(bitmap.len() as u32)?;
        writer.write_all(&bitmap)?;

        writer.write_u32_varint(self.subblock_size)?;
        writer.write_u32_varint(self.rowids_per_block)?;
        write_codec_name(writer, self.codec_32)?;
        write_codec_name(writer, self.codec_64)?;

        for header in &self.headers {
            header.serialize(writer)?;
        }

        Ok(())
    }
}

impl Deserializable for Footer {
    fn deserialize<R: Read>(reader: &mut R) -> Result<Self, DeserializeError> {
        let _next_meta_offset = reader.read_u64_varint()?;
        let num_attributes = reader.read_u32_varint()? as usize;

        let bitmap_len = reader.read_u32_varint()? as usize;
        let mut bitmap_bytes = vec![0u8; bitmap_len];
        reader.read_exact(&mut bitmap_bytes)?;
        let enabled = unpack_bitmap(&bitmap_bytes, num_attributes);

        let subblock_size = reader.read_u32_varint()?;
        let rowids_per_block = reader.read_u32_varint()?;
        let codec_32 = read_codec_name(reader)?;
        let codec_64 = read_codec_name(reader)?;

        let mut headers = Vec::with_capacity(num_attributes);
        for _ in 0..num_attributes {
            headers.push(AttributeHeader::deserialize(reader)?);
        }

        Ok(Self {
            version: 0, // filled in by the caller, which already validated the file-level version
            subblock_size,
            rowids_per_block,
            codec_32,
            codec_64,
            enabled,
            headers,
        })
    }
}

fn write_codec_name<W: Write>(writer: &mut W, codec: CodecKind) -> Result<(), SerializeError> {
    let name = codec.name();
    writer.write_u32_varint(name.len() as u32)?;
    writer.write_all(name.as_bytes())?;
    Ok(())
}

fn read_codec_name<R: Read>(reader: &mut R) -> Result<CodecKind, DeserializeError> {
    let len = reader.read_u32_varint()? as usize;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    let name = std::str::from_utf8(&buf)?;
    CodecKind::parse(name).map_err(|_| DeserializeError::InvalidTag(("codec", 0)))
}
