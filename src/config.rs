// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Build-time settings for a column file.

use crate::codec::CodecKind;
use crate::error::{Error, Result};

/// Default number of rows per block (spec §3).
pub const DEFAULT_ROWS_PER_BLOCK: u32 = 65_536;

/// Default number of values per subblock (spec §3).
pub const DEFAULT_SUBBLOCK_SIZE: u32 = 128;

/// Default cap, in row IDs, before a per-distinct-value row list switches
/// from `ROW_BLOCK` to `ROW_BLOCKS_LIST` (spec §3).
pub const DEFAULT_ROWIDS_PER_BLOCK: u32 = 1024;

/// Threshold beyond which a `TABLE`-encoded block becomes `GENERIC` (spec §4.1).
pub const MAX_TABLE_DISTINCT: usize = 256;

/// Build-time settings, fixed for the lifetime of a column file.
///
/// Mirrors the teacher's `Config` builder: a plain struct with `#[must_use]`
/// chained setters, validated once in [`Settings::build`].
#[derive(Debug, Clone)]
pub struct Settings {
    subblock_size: u32,
    rowids_per_block: u32,
    codec_32: CodecKind,
    codec_64: CodecKind,
    block_cache_capacity_bytes: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            subblock_size: DEFAULT_SUBBLOCK_SIZE,
            rowids_per_block: DEFAULT_ROWIDS_PER_BLOCK,
            codec_32: CodecKind::Fastpfor128,
            codec_64: CodecKind::Fastpfor256,
            block_cache_capacity_bytes: 0,
        }
    }
}

impl Settings {
    /// Starts building settings with the spec defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the subblock size. Must be a power of two, >= 128.
    #[must_use]
    pub fn subblock_size(mut self, n: u32) -> Self {
        self.subblock_size = n;
        self
    }

    /// Sets the row-ID list split threshold (`ROW_BLOCK` -> `ROW_BLOCKS_LIST`).
    #[must_use]
    pub fn rowids_per_block(mut self, n: u32) -> Self {
        self.rowids_per_block = n;
        self
    }

    /// Sets the codec used for 32-bit integer streams.
    #[must_use]
    pub fn codec_32(mut self, codec: CodecKind) -> Self {
        self.codec_32 = codec;
        self
    }

    /// Sets the codec used for 64-bit integer streams.
    #[must_use]
    pub fn codec_64(mut self, codec: CodecKind) -> Self {
        self.codec_64 = codec;
        self
    }

    /// Sets the block cache's byte capacity. `0` disables caching.
    #[must_use]
    pub fn block_cache_capacity_bytes(mut self, bytes: u64) -> Self {
        self.block_cache_capacity_bytes = bytes;
        self
    }

    #[must_use]
    pub fn subblock_size_value(&self) -> u32 {
        self.subblock_size
    }

    #[must_use]
    pub fn rowids_per_block_value(&self) -> u32 {
        self.rowids_per_block
    }

    #[must_use]
    pub fn codec_32_value(&self) -> CodecKind {
        self.codec_32
    }

    #[must_use]
    pub fn codec_64_value(&self) -> CodecKind {
        self.codec_64
    }

    #[must_use]
    pub fn block_cache_capacity_bytes_value(&self) -> u64 {
        self.block_cache_capacity_bytes
    }

    /// Validates and freezes the settings.
    pub fn build(self) -> Result<Self> {
        if self.subblock_size < 128 || !self.subblock_size.is_power_of_two() {
            return Err(Error::InvalidSubblockSize(self.subblock_size));
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_power_of_two() {
        assert!(Settings::new().subblock_size(129).build().is_err());
    }

    #[test]
    fn rejects_too_small() {
        assert!(Settings::new().subblock_size(64).build().is_err());
    }

    #[test]
    fn accepts_default() {
        assert!(Settings::new().build().is_ok());
    }
}
