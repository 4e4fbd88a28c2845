// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Top-level orchestration: building a columnar file from attribute
//! builders, and opening one back up for querying (spec §4.1 "atomic"
//! file assembly, §5 lifecycles, §6 on-disk container).

use crate::attribute::{AttributeHeader, AttributeType, Value};
use crate::block_cache::BlockCache;
use crate::builder::ColumnBuilder;
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::footer::Footer;
use crate::serde::{Deserializable, Serializable};
use crate::version::{self, COLUMNAR_CURRENT, COLUMNAR_MIN_READABLE};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Builds a columnar file attribute-by-attribute, then assembles the final
/// file in one atomic write (spec §4.1: "the file is atomic: body is built
/// in a tempfile per attribute; `finish()` concatenates all bodies behind
/// the header table").
pub struct ColumnarBuilder {
    settings: Settings,
    builders: Vec<ColumnBuilder>,
}

impl ColumnarBuilder {
    #[must_use]
    pub fn new(settings: Settings) -> Self {
        Self { settings, builders: Vec::new() }
    }

    /// Registers a new attribute and returns a handle to append its values.
    pub fn column(&mut self, name: impl Into<String>, attribute_type: AttributeType) -> &mut ColumnBuilder {
        self.builders.push(ColumnBuilder::new(name, attribute_type, self.settings.clone()));
        #[allow(clippy::unwrap_used)]
        self.builders.last_mut().unwrap()
    }

    /// Finishes every attribute, assembles the file layout, and atomically
    /// writes it to `path` (spec §6 container layout).
    pub fn finish(self, path: &Path) -> Result<()> {
        let mut built = Vec::with_capacity(self.builders.len());
        for builder in self.builders {
            built.push(builder.finish()?);
        }

        let mut out = Vec::new();
        out.write_u32::<LittleEndian>(COLUMNAR_CURRENT)?;

        // meta_offset is patched in after we know the body length.
        let meta_offset_pos = out.len();
        out.write_u64::<LittleEndian>(0)?;

        let mut headers = Vec::with_capacity(built.len());
        for attribute in built {
            let base = out.len() as u64;
            out.extend_from_slice(&attribute.blocks_bytes);

            let mut header = attribute.header;
            header.block_offsets = header.block_offsets.iter().map(|&o| o + base).collect();
            headers.push(header);
        }

        let meta_offset = out.len() as u64;
        #[allow(clippy::indexing_slicing)]
        {
            let mut cursor = &mut out[meta_offset_pos..meta_offset_pos + 8];
            cursor.write_u64::<LittleEndian>(meta_offset)?;
        }

        let footer = Footer {
            version: COLUMNAR_CURRENT,
            subblock_size: self.settings.subblock_size_value(),
            rowids_per_block: self.settings.rowids_per_block_value(),
            codec_32: self.settings.codec_32_value(),
            codec_64: self.settings.codec_64_value(),
            enabled: vec![true; headers.len()],
            headers,
        };
        footer.serialize(&mut out)?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        crate::io::rewrite_atomic(path, &out)?;

        Ok(())
    }
}

/// Creates a fresh builder with the given settings (spec §6 "Invocation is
/// via function calls... `create_builder`").
#[must_use]
pub fn create_builder(settings: Settings) -> ColumnarBuilder {
    ColumnarBuilder::new(settings)
}

/// A read-only handle to an on-disk columnar file.
pub struct Columnar {
    file: File,
    path: PathBuf,
    meta_offset: u64,
    footer: Footer,
    block_cache: Option<Arc<BlockCache>>,
}

impl Columnar {
    /// Opens and version-checks an existing columnar file (spec §6
    /// "`create_columnar_storage_reader`").
    pub fn open(path: impl Into<PathBuf>, cache_capacity_bytes: u64) -> Result<Self> {
        let path = path.into();
        let file = File::open(&path)?;
        let file_len = file.metadata()?.len();

        let header_bytes = crate::io::read_exact(&file, 0, 12)?;
        let mut cursor: &[u8] = &header_bytes;
        let storage_version = cursor.read_u32::<LittleEndian>()?;
        version::check_range(storage_version, COLUMNAR_MIN_READABLE, COLUMNAR_CURRENT)?;
        let meta_offset = cursor.read_u64::<LittleEndian>()?;

        if meta_offset > file_len {
            return Err(Error::OffsetOutOfBounds { attribute: String::new(), offset: meta_offset });
        }

        #[allow(clippy::cast_possible_truncation)]
        let footer_bytes = crate::io::read_exact(&file, meta_offset, (file_len - meta_offset) as usize)?;
        let mut footer = Footer::deserialize(&mut &*footer_bytes)?;
        footer.version = storage_version;

        let blocks_per_attribute: Vec<usize> = footer.headers.iter().map(AttributeHeader::block_count).collect();
        let block_cache = (cache_capacity_bytes > 0)
            .then(|| Arc::new(BlockCache::new(&blocks_per_attribute, cache_capacity_bytes)));

        Ok(Self { file, path, meta_offset, footer, block_cache })
    }

    #[must_use]
    pub fn storage_version(&self) -> u32 {
        self.footer.version
    }

    #[must_use]
    pub fn attribute_count(&self) -> usize {
        self.footer.headers.len()
    }

    #[must_use]
    pub fn headers(&self) -> &[AttributeHeader] {
        &self.footer.headers
    }

    #[must_use]
    pub fn is_enabled(&self, attribute_index: usize) -> bool {
        self.footer.enabled.get(attribute_index).copied().unwrap_or(false)
    }

    #[must_use]
    pub fn attribute_index(&self, name: &str) -> Option<usize> {
        self.footer.headers.iter().position(|h| h.name == name)
    }

    pub(crate) fn block_cache(&self) -> Option<&Arc<BlockCache>> {
        self.block_cache.as_ref()
    }

    /// `ROW_BLOCK`/`ROW_BLOCKS_LIST` threshold configured at build time
    /// (spec §3), needed to reconstitute a [`crate::row_list::RowList`]
    /// from a matched-row set.
    #[must_use]
    pub fn rowids_per_block(&self) -> u32 {
        self.footer.rowids_per_block
    }

    /// Decodes every block of one attribute and concatenates them into a
    /// single flat word stream. Needed for `U32Set`/`I64Set`/`F32Vec`
    /// row reads, since a flattened element's position doesn't generally
    /// align to a block boundary (spec §4 MVA/vector supplement).
    pub fn decode_attribute_words(&self, attribute_index: usize) -> Result<Vec<u64>> {
        let header = self
            .headers()
            .get(attribute_index)
            .ok_or(Error::CorruptHeader("attribute index out of range"))?;

        let mut words = Vec::with_capacity(header.total_rows as usize);
        for block_idx in 0..header.block_count() {
            let rows_in_block = header.rows_in_block(block_idx) as usize;
            let bytes = self.read_block_bytes(attribute_index, block_idx)?;
            words.extend(crate::block::decode(&bytes, rows_in_block, header.subblock_size as usize, header.codec)?);
        }
        Ok(words)
    }

    /// Reads one attribute's block `block_index` off disk, without
    /// decoding it (callers decode via [`crate::block`] or
    /// [`crate::block::hash_block`] depending on the attribute type).
    pub fn read_block_bytes(&self, attribute_index: usize, block_index: usize) -> Result<crate::Slice> {
        let header = self
            .footer
            .headers
            .get(attribute_index)
            .ok_or(Error::CorruptHeader("attribute index out of range"))?;
        let offset = *header
            .block_offsets
            .get(block_index)
            .ok_or(Error::CorruptHeader("block index out of range"))?;
        let length = *header
            .block_lengths
            .get(block_index)
            .ok_or(Error::CorruptHeader("block index out of range"))?;

        #[allow(clippy::cast_possible_truncation)]
        crate::io::read_exact(&self.file, offset, length as usize).map_err(Into::into)
    }

    /// Flips one attribute's enabled bit in place (spec §5: "the only
    /// mutable on-disk state; mutation is single-writer and serialized by
    /// the host").
    pub fn set_enabled(&mut self, attribute_index: usize, enabled: bool) -> Result<()> {
        if attribute_index >= self.footer.enabled.len() {
            return Err(Error::CorruptHeader("attribute index out of range"));
        }
        self.footer.enabled[attribute_index] = enabled;

        let bitmap = self.footer.enabled_bitmap_bytes();
        let bitmap_offset = self.meta_offset + Footer::enabled_bitmap_header_len();
        let file = std::fs::OpenOptions::new().write(true).open(&self.path)?;
        crate::io::patch_in_place(&file, bitmap_offset, &bitmap)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn build_sample(dir: &Path) -> PathBuf {
        let path = dir.join("sample.columnar");
        let mut builder = create_builder(Settings::new());
        {
            let col = builder.column("id", AttributeType::U32);
            for i in 0..10u32 {
                col.add(&Value::U32(i)).unwrap();
            }
        }
        {
            let col = builder.column("tag", AttributeType::String);
            for i in 0..9 {
                col.add(&Value::String(["a", "b", "c"][i % 3].to_owned())).unwrap();
            }
        }
        builder.finish(&path).unwrap();
        path
    }

    #[test]
    fn roundtrip_open_and_read_headers() {
        let dir = tempfile::tempdir().unwrap();
        let path = build_sample(dir.path());

        let columnar = Columnar::open(&path, 0).unwrap();
        assert_eq!(columnar.storage_version(), COLUMNAR_CURRENT);
        assert_eq!(columnar.attribute_count(), 2);
        assert_eq!(columnar.headers()[0].name, "id");
        assert_eq!(columnar.headers()[1].name, "tag");
        assert!(columnar.is_enabled(0));
    }

    #[test]
    fn read_block_bytes_decodes_correctly() {
        let dir = tempfile::tempdir().unwrap();
        let path = build_sample(dir.path());
        let columnar = Columnar::open(&path, 0).unwrap();

        let idx = columnar.attribute_index("id").unwrap();
        let header = &columnar.headers()[idx];
        let block_bytes = columnar.read_block_bytes(idx, 0).unwrap();
        let decoded = crate::block::decode(&block_bytes, header.total_rows as usize, header.subblock_size as usize, header.codec).unwrap();
        assert_eq!(decoded, (0..10u64).collect::<Vec<_>>());
    }

    #[test]
    fn mva_column_round_trips_through_a_real_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mva.columnar");
        let rows: Vec<Vec<u32>> = vec![vec![1, 2], vec![], vec![3, 4, 5]];
        {
            let mut builder = create_builder(Settings::new());
            let col = builder.column("tags", AttributeType::U32Set);
            for row in &rows {
                col.add(&Value::U32Set(row.clone())).unwrap();
            }
            builder.finish(&path).unwrap();
        }

        let columnar = Columnar::open(&path, 0).unwrap();
        let idx = columnar.attribute_index("tags").unwrap();
        let header = &columnar.headers()[idx];
        assert_eq!(header.logical_row_count(), 3);

        let words = columnar.decode_attribute_words(idx).unwrap();
        for (i, row) in rows.iter().enumerate() {
            let (start, end) = header.mva_row_range(i as u64);
            let values = crate::attribute::words_to_u32set(&words[start as usize..end as usize]);
            assert_eq!(&values, row);
        }
    }

    #[test]
    fn disable_attribute_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = build_sample(dir.path());

        {
            let mut columnar = Columnar::open(&path, 0).unwrap();
            columnar.set_enabled(1, false).unwrap();
        }

        let reopened = Columnar::open(&path, 0).unwrap();
        assert!(reopened.is_enabled(0));
        assert!(!reopened.is_enabled(1));
    }

    #[test]
    fn rejects_out_of_range_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.columnar");
        let mut bytes = Vec::new();
        bytes.write_u32::<LittleEndian>(999).unwrap();
        bytes.write_u64::<LittleEndian>(12).unwrap();
        std::fs::write(&path, &bytes).unwrap();

        assert!(matches!(Columnar::open(&path, 0), Err(Error::InvalidVersion { .. })));
    }
}
