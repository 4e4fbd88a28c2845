// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Non-mutating validation (spec §7 "Check/repair"): walks every header,
//! min/max tree, and block header, validating ranges, without touching
//! the file.

use crate::columnar::Columnar;

/// One problem found while checking a file. `attribute`/`block` are
/// `None` when the problem isn't scoped to a specific attribute or block
/// (spec §7: "Reported with attribute/block identifier").
#[derive(Debug, Clone)]
pub struct CheckIssue {
    pub attribute: Option<String>,
    pub block: Option<usize>,
    pub message: String,
}

/// Summary returned by [`check_storage`].
#[derive(Debug, Clone, Default)]
pub struct CheckReport {
    pub issues: Vec<CheckIssue>,
}

impl CheckReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Walks `columnar`'s headers, block offsets, and min/max trees, reporting
/// (but never repairing) anything out of range. `progress_reporter` is
/// called once per attribute with a human-readable status line.
pub fn check_storage(columnar: &Columnar, mut progress_reporter: impl FnMut(&str)) -> CheckReport {
    let mut report = CheckReport::default();
    let file_len = columnar
        .headers()
        .iter()
        .flat_map(|h| h.block_offsets.iter().zip(h.block_lengths.iter()))
        .map(|(&off, &len)| off + len)
        .max()
        .unwrap_or(0);

    for (attribute_index, header) in columnar.headers().iter().enumerate() {
        progress_reporter(&format!("checking attribute '{}' ({attribute_index})", header.name));
        log::trace!("checking attribute '{}'", header.name);

        let expected_blocks = (header.total_rows).div_ceil(header.rows_per_block()).max(1) as usize;
        if header.block_count() != expected_blocks && header.total_rows > 0 {
            report.issues.push(CheckIssue {
                attribute: Some(header.name.clone()),
                block: None,
                message: format!(
                    "block_count {} does not match ceil(total_rows / rows_per_block) = {expected_blocks}",
                    header.block_count()
                ),
            });
        }

        if header.block_offsets.windows(2).any(|w| w[0] >= w[1]) {
            report.issues.push(CheckIssue {
                attribute: Some(header.name.clone()),
                block: None,
                message: "block_offsets is not strictly increasing".to_owned(),
            });
        }

        for (block_idx, (&offset, &length)) in header.block_offsets.iter().zip(header.block_lengths.iter()).enumerate() {
            if offset + length > file_len {
                report.issues.push(CheckIssue {
                    attribute: Some(header.name.clone()),
                    block: Some(block_idx),
                    message: format!("block spans [{offset}, {}) which is out of file bounds", offset + length),
                });
            }
        }

        if header.min_max_tree.leaf_count() != header.block_count() && header.block_count() > 0 {
            report.issues.push(CheckIssue {
                attribute: Some(header.name.clone()),
                block: None,
                message: format!(
                    "min_max_tree has {} leaves but header has {} blocks",
                    header.min_max_tree.leaf_count(),
                    header.block_count()
                ),
            });
        }

        for block_idx in 0..header.block_count() {
            match columnar.read_block_bytes(attribute_index, block_idx) {
                Ok(bytes) => {
                    if crate::block::peek_packing(&bytes).is_err() {
                        report.issues.push(CheckIssue {
                            attribute: Some(header.name.clone()),
                            block: Some(block_idx),
                            message: "unknown packing tag".to_owned(),
                        });
                    }
                }
                Err(e) => {
                    report.issues.push(CheckIssue {
                        attribute: Some(header.name.clone()),
                        block: Some(block_idx),
                        message: format!("failed to read block: {e}"),
                    });
                }
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::{AttributeType, Value};
    use crate::columnar::create_builder;
    use crate::config::Settings;
    use test_log::test;

    #[test]
    fn clean_file_reports_no_issues() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clean.columnar");
        let mut builder = create_builder(Settings::new());
        {
            let col = builder.column("n", AttributeType::U32);
            for i in 0..500u32 {
                col.add(&Value::U32(i)).unwrap();
            }
        }
        builder.finish(&path).unwrap();

        let columnar = Columnar::open(&path, 0).unwrap();
        let report = check_storage(&columnar, |_| {});
        assert!(report.is_clean(), "{:?}", report.issues);
    }
}
