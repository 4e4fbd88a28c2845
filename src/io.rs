// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Positional (`pread`-style) file access and atomic file rewrites.
//!
//! Iterators and readers never share a file-offset cursor: every read
//! specifies its own offset, so concurrent query threads never contend on
//! `seek`.

use crate::Slice;
use std::fs::File;
use std::io::Write;
use std::path::Path;

#[cfg(unix)]
fn read_at_impl(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buf, offset)
}

#[cfg(windows)]
fn read_at_impl(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buf, offset)
}

/// Reads exactly `size` bytes at `offset`, without moving the file cursor.
pub fn read_exact(file: &File, offset: u64, size: usize) -> std::io::Result<Slice> {
    // SAFETY: the buffer is never read before `read_at` overwrites it in full;
    // if fewer bytes come back we bail out before returning it to the caller.
    #[allow(unsafe_code)]
    let mut builder = unsafe { Slice::builder_unzeroed(size) };

    let bytes_read = read_at_impl(file, &mut builder, offset)?;

    if bytes_read != size {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!(
                "read_exact({bytes_read}) at {offset} did not read enough bytes ({size} requested)"
            ),
        ));
    }

    Ok(builder.freeze().into())
}

/// Atomically rewrites a file's full contents via a sibling tempfile + rename.
///
/// Used for the footer's enabled-bitmap flip: build the new footer bytes,
/// call this, and the old file is never observed half-written.
pub fn rewrite_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    #[allow(clippy::expect_used)]
    let folder = path.parent().expect("path should have a parent");

    let mut temp_file = tempfile::NamedTempFile::new_in(folder)?;
    temp_file.write_all(content)?;
    temp_file.flush()?;
    temp_file.as_file_mut().sync_all()?;
    temp_file.persist(path)?;

    #[cfg(not(target_os = "windows"))]
    {
        let file = File::open(path)?;
        file.sync_all()?;
    }

    Ok(())
}

/// Patches `content` into `file` at `offset`, in place (no rename).
///
/// Used for the attribute-enabled bitmap, which lives at a fixed, known
/// footer offset and is small enough that an in-place write is safe: the
/// host serializes all mutators itself (spec §5).
pub fn patch_in_place(file: &File, offset: u64, content: &[u8]) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::FileExt;
        file.write_at(content, offset)
    }

    #[cfg(windows)]
    {
        use std::os::windows::fs::FileExt;
        let mut written = 0;
        while written < content.len() {
            written += file.seek_write(&content[written..], offset + written as u64)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use test_log::test;

    #[test]
    fn read_exact_roundtrip() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("data.bin");
        std::fs::write(&path, b"hello columnar world")?;

        let file = File::open(&path)?;
        let slice = read_exact(&file, 6, 9)?;
        assert_eq!(&*slice, b"columnar ");

        Ok(())
    }

    #[test]
    fn atomic_rewrite_replaces_contents() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("footer.bin");
        std::fs::write(&path, b"old-footer-bytes")?;

        rewrite_atomic(&path, b"new")?;

        assert_eq!(std::fs::read(&path)?, b"new");
        Ok(())
    }

    #[test]
    fn patch_in_place_overwrites_region() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("bitmap.bin");
        std::fs::write(&path, [0u8; 16])?;

        let file = std::fs::OpenOptions::new().write(true).open(&path)?;
        patch_in_place(&file, 4, &[0xFF, 0xFF])?;
        drop(file);

        let bytes = std::fs::read(&path)?;
        assert_eq!(&bytes[4..6], &[0xFF, 0xFF]);
        assert_eq!(&bytes[0..4], &[0, 0, 0, 0]);

        Ok(())
    }
}
