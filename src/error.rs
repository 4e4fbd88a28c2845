// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::serde::{DeserializeError, SerializeError};
use crate::version::Version;

/// Represents errors that can occur in the columnar storage engine
#[derive(Debug)]
pub enum Error {
    /// I/O error
    Io(std::io::Error),

    /// Serialization failed
    Encode(SerializeError),

    /// Deserialization failed
    Decode(DeserializeError),

    /// Invalid or unparsable data format version
    InvalidVersion {
        /// version found in the file
        got: Version,
        /// lowest version this build can still read
        min_readable: u32,
        /// highest version this build knows how to read
        current: u32,
    },

    /// A block's packing tag did not match any known encoding
    UnknownPackingTag(u32),

    /// A block or region's checksum did not match
    ChecksumMismatch {
        /// checksum recomputed from the bytes on disk
        got: crate::Checksum,
        /// checksum recorded when the region was written
        expected: crate::Checksum,
    },

    /// A stored offset pointed outside the file
    OffsetOutOfBounds {
        /// attribute this offset belongs to
        attribute: String,
        /// the offending offset
        offset: u64,
    },

    /// A decoded integer stream did not fully consume its input
    ResidualCodecInput,

    /// The attribute name or header failed a sanity check
    CorruptHeader(&'static str),

    /// `subblock_size` is not a power of two, or is smaller than 128
    InvalidSubblockSize(u32),

    /// An attribute type does not support the requested operation
    UnsupportedType {
        /// attribute this was attempted on
        attribute: String,
        /// reason for the rejection
        reason: &'static str,
    },

    /// A float value used as a PGM/sort key was NaN
    NotANumber,

    /// An ANN index dimension did not match the vector envelope's declared dimension
    DimensionMismatch {
        /// dimension declared in the envelope header
        expected: u32,
        /// dimension of the vector actually supplied
        got: u32,
    },

    /// No more rows to iterate; not a fatal error
    Exhausted,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Encode(e) => write!(f, "encode error: {e}"),
            Self::Decode(e) => write!(f, "decode error: {e}"),
            Self::InvalidVersion {
                got,
                min_readable,
                current,
            } => write!(
                f,
                "storage_version {got} is outside readable range [{min_readable}, {current}]"
            ),
            Self::UnknownPackingTag(tag) => write!(f, "unknown block packing tag {tag}"),
            Self::ChecksumMismatch { got, expected } => {
                write!(f, "checksum mismatch: got {got}, expected {expected}")
            }
            Self::OffsetOutOfBounds { attribute, offset } => {
                write!(f, "offset {offset} for attribute '{attribute}' is out of file bounds")
            }
            Self::ResidualCodecInput => write!(f, "codec decode left unconsumed input"),
            Self::CorruptHeader(reason) => write!(f, "corrupt header: {reason}"),
            Self::InvalidSubblockSize(n) => {
                write!(f, "subblock_size {n} must be a power of two >= 128")
            }
            Self::UnsupportedType { attribute, reason } => {
                write!(f, "attribute '{attribute}' does not support this operation: {reason}")
            }
            Self::NotANumber => write!(f, "NaN is not a valid indexable value"),
            Self::DimensionMismatch { expected, got } => {
                write!(f, "vector dimension {got} does not match envelope dimension {expected}")
            }
            Self::Exhausted => write!(f, "iterator exhausted"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<SerializeError> for Error {
    fn from(value: SerializeError) -> Self {
        Self::Encode(value)
    }
}

impl From<DeserializeError> for Error {
    fn from(value: DeserializeError) -> Self {
        Self::Decode(value)
    }
}

/// Columnar storage result
pub type Result<T> = std::result::Result<T, Error>;
