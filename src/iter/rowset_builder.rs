// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Drains a set of [`super::RowIdSource`]s into a [`crate::bitmap::RowSet`],
//! using the bitmap-vs-list policy table (spec §4.5).

use super::RowIdSource;
use crate::bitmap::{DenseBitmap, Policy, RowSet, SplitBitmap};
use std::collections::BTreeSet;

/// Drains every source to exhaustion and assembles the result per
/// [`RowSet::choose_policy`]. `estimated_matches` should come from the
/// PGM-bound cardinality estimate (spec §4.5: "sum of PGM `hi-lo` bounds,
/// capped by total rows").
pub fn collect_row_set<'a>(
    mut sources: Vec<Box<dyn RowIdSource + 'a>>,
    total_rows: u64,
    estimated_matches: u64,
    exclude: bool,
) -> RowSet {
    let policy = RowSet::choose_policy(total_rows, estimated_matches, sources.len(), exclude);

    match policy {
        Policy::List => {
            let mut rows = BTreeSet::new();
            for source in &mut sources {
                drain_into(source.as_mut(), |r| {
                    rows.insert(r);
                });
            }
            RowSet::List(rows.into_iter().collect())
        }
        Policy::Dense => {
            let mut bitmap = DenseBitmap::new(total_rows);
            let mut last_set = None;
            for source in &mut sources {
                drain_into(source.as_mut(), |r| {
                    bitmap.set(r);
                    last_set = Some(r);
                });
            }
            if sources.iter().any(|s| s.hit_cutoff()) {
                // cutoff tripped mid-construction: shrink so invert() never
                // sets bits past the last real row (spec §4.5).
                if let Some(last) = last_set {
                    bitmap.truncate(last + 1);
                }
            }
            let bitmap = if exclude { bitmap.invert() } else { bitmap };
            RowSet::Dense(bitmap)
        }
        Policy::Split => {
            let mut bitmap = SplitBitmap::new(total_rows);
            for source in &mut sources {
                drain_into(source.as_mut(), |r| bitmap.set(r));
            }
            RowSet::Split(bitmap)
        }
    }
}

fn drain_into(source: &mut dyn RowIdSource, mut f: impl FnMut(u64)) {
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let more = source.next_block(&mut buf);
        for &row in &buf {
            f(row);
        }
        if !more {
            break;
        }
    }
}
