// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The vector (ANN) file-format envelope (spec §1, §6). The HNSW/ANN
//! search algorithm itself, text embedding loading, and quantization are
//! out of scope ("only the file-format envelope is noted"); this module
//! only reads and writes the container around a raw vector blob.

use crate::error::{Error, Result};
use crate::serde::{Deserializable, DeserializeError, SerializeError, Serializable};
use crate::version::{self, VECTOR_CURRENT, VECTOR_MIN_READABLE};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// Distance metric the ANN collaborator is expected to use; stored so a
/// future index build doesn't have to be told again.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Metric {
    L2,
    Cosine,
    DotProduct,
}

impl Metric {
    fn to_tag(self) -> u8 {
        match self {
            Self::L2 => 0,
            Self::Cosine => 1,
            Self::DotProduct => 2,
        }
    }

    fn from_tag(tag: u8) -> Result<Self> {
        Ok(match tag {
            0 => Self::L2,
            1 => Self::Cosine,
            2 => Self::DotProduct,
            _ => return Err(Error::CorruptHeader("unknown vector metric tag")),
        })
    }
}

/// The vector envelope header (spec §6, §7 "quantization asked for but dim
/// mismatch" is a schema/argument error this module is responsible for
/// catching before handing a blob to the ANN collaborator).
#[derive(Debug, Clone)]
pub struct VectorHeader {
    pub version: u32,
    pub dim: u32,
    pub count: u64,
    pub metric: Metric,
    pub quantized: bool,
}

impl VectorHeader {
    #[must_use]
    pub fn raw_vector_len_bytes(&self) -> u64 {
        let element_size: u64 = if self.quantized { 1 } else { 4 };
        u64::from(self.dim) * element_size
    }
}

impl Serializable for VectorHeader {
    fn serialize<W: Write>(&self, writer: &mut W) -> Result<(), SerializeError> {
        writer.write_u32::<LittleEndian>(self.version)?;
        writer.write_u32::<LittleEndian>(self.dim)?;
        writer.write_u64::<LittleEndian>(self.count)?;
        writer.write_u8(self.metric.to_tag())?;
        writer.write_u8(u8::from(self.quantized))?;
        Ok(())
    }
}

impl Deserializable for VectorHeader {
    fn deserialize<R: Read>(reader: &mut R) -> Result<Self, DeserializeError> {
        let version = reader.read_u32::<LittleEndian>()?;
        let dim = reader.read_u32::<LittleEndian>()?;
        let count = reader.read_u64::<LittleEndian>()?;
        let metric_tag = reader.read_u8()?;
        let metric = Metric::from_tag(metric_tag).map_err(|_| DeserializeError::InvalidTag(("metric", metric_tag)))?;
        let quantized = reader.read_u8()? != 0;
        Ok(Self { version, dim, count, metric, quantized })
    }
}

/// Accumulates raw (unquantized f32) vectors and writes the envelope plus
/// the concatenated blob. Mirrors [`crate::builder::ColumnBuilder`]'s
/// buffer-then-flush shape, but the ANN graph itself is never built here.
pub struct VectorEnvelopeBuilder {
    dim: u32,
    metric: Metric,
    quantized: bool,
    vectors: Vec<f32>,
    count: u64,
}

impl VectorEnvelopeBuilder {
    #[must_use]
    pub fn new(dim: u32, metric: Metric, quantized: bool) -> Self {
        Self { dim, metric, quantized, vectors: Vec::new(), count: 0 }
    }

    /// Appends one vector. Errors if its length doesn't match `dim`.
    pub fn add(&mut self, vector: &[f32]) -> Result<()> {
        if vector.len() as u32 != self.dim {
            return Err(Error::DimensionMismatch { expected: self.dim, got: vector.len() as u32 });
        }
        self.vectors.extend_from_slice(vector);
        self.count += 1;
        Ok(())
    }

    /// Writes the header followed by the raw vector blob (row-major,
    /// little-endian `f32`; quantization is out of scope so `quantized`
    /// vectors are rejected here rather than silently mishandled).
    pub fn finish<W: Write>(self, writer: &mut W) -> Result<()> {
        if self.quantized {
            return Err(Error::UnsupportedType {
                attribute: String::new(),
                reason: "quantized vector envelopes are not produced by this build",
            });
        }

        let header = VectorHeader { version: VECTOR_CURRENT, dim: self.dim, count: self.count, metric: self.metric, quantized: false };
        header.serialize(writer)?;
        for v in &self.vectors {
            writer.write_f32::<LittleEndian>(*v)?;
        }
        Ok(())
    }
}

/// Opens a vector envelope for reading, version-checking it against `[2, 3]`.
pub struct VectorReader<R> {
    header: VectorHeader,
    reader: R,
}

impl<R: Read> VectorReader<R> {
    pub fn open(mut reader: R) -> Result<Self> {
        let header = VectorHeader::deserialize(&mut reader)?;
        version::check_range(header.version, VECTOR_MIN_READABLE, VECTOR_CURRENT)?;
        Ok(Self { header, reader })
    }

    #[must_use]
    pub fn header(&self) -> &VectorHeader {
        &self.header
    }

    /// Reads the `i`-th vector sequentially (this envelope is a flat blob,
    /// not randomly addressable without an external offset index — the
    /// ANN collaborator is expected to own that).
    pub fn read_next(&mut self) -> Result<Vec<f32>> {
        if self.header.quantized {
            return Err(Error::UnsupportedType {
                attribute: String::new(),
                reason: "quantized vector envelopes are not decoded by this build",
            });
        }
        let mut out = Vec::with_capacity(self.header.dim as usize);
        for _ in 0..self.header.dim {
            out.push(self.reader.read_f32::<LittleEndian>()?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn header_roundtrip() {
        let header = VectorHeader { version: VECTOR_CURRENT, dim: 128, count: 10, metric: Metric::Cosine, quantized: false };
        let mut buf = Vec::new();
        header.serialize(&mut buf).unwrap();
        let back = VectorHeader::deserialize(&mut &buf[..]).unwrap();
        assert_eq!(back.dim, 128);
        assert_eq!(back.metric, Metric::Cosine);
    }

    #[test]
    fn envelope_roundtrip() {
        let mut builder = VectorEnvelopeBuilder::new(3, Metric::L2, false);
        builder.add(&[1.0, 2.0, 3.0]).unwrap();
        builder.add(&[4.0, 5.0, 6.0]).unwrap();

        let mut buf = Vec::new();
        builder.finish(&mut buf).unwrap();

        let mut reader = VectorReader::open(&buf[..]).unwrap();
        assert_eq!(reader.header().count, 2);
        assert_eq!(reader.read_next().unwrap(), vec![1.0, 2.0, 3.0]);
        assert_eq!(reader.read_next().unwrap(), vec![4.0, 5.0, 6.0]);
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let mut builder = VectorEnvelopeBuilder::new(3, Metric::L2, false);
        assert!(matches!(builder.add(&[1.0, 2.0]), Err(Error::DimensionMismatch { .. })));
    }

    #[test]
    fn rejects_out_of_range_version() {
        let header = VectorHeader { version: 99, dim: 4, count: 0, metric: Metric::L2, quantized: false };
        let mut buf = Vec::new();
        header.serialize(&mut buf).unwrap();
        assert!(matches!(VectorReader::open(&buf[..]), Err(Error::InvalidVersion { .. })));
    }
}
