// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The decoded-block cache (spec §5): "an atomic array of
//! `Option<Arc<BlockValues>>` slots (one per block per attribute, pre-sized
//! at open). Fill uses compare-exchange; a losing thread drops its computed
//! copy. Eviction is not supported... bounded at construction by a byte cap;
//! when the cap is exceeded, further inserts are skipped."
//!
//! This deliberately drops the teacher's `quick_cache` LRU in favor of a
//! plain compare-exchange array: the spec rules out eviction, so an LRU's
//! recency bookkeeping buys nothing (see `DESIGN.md`).

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

/// Decoded words for one block, cached by `(attribute_index, block_index)`.
pub type BlockValues = Vec<u64>;

#[derive(Default)]
struct Slot {
    value: OnceLock<Arc<BlockValues>>,
}

/// A fixed-size, no-eviction cache of decoded blocks.
///
/// One slot per `(attribute, block)` pair, sized once at construction from
/// the file's attribute/block counts. The first writer to fill a slot wins
/// (via [`OnceLock`], the single-writer-CAS equivalent); a caller that loses
/// the race just keeps using its own freshly-decoded value.
pub struct BlockCache {
    slots: Vec<Slot>,
    blocks_per_attribute: Vec<usize>,
    offsets: Vec<usize>,
    capacity_bytes: u64,
    used_bytes: AtomicU64,
    hits: AtomicI64,
}

impl BlockCache {
    /// Builds a cache sized for `blocks_per_attribute[i]` blocks in
    /// attribute `i`. `capacity_bytes == 0` still allocates the slot array
    /// (so lookups stay branch-free) but every insert is skipped.
    #[must_use]
    pub fn new(blocks_per_attribute: &[usize], capacity_bytes: u64) -> Self {
        let mut offsets = Vec::with_capacity(blocks_per_attribute.len());
        let mut total = 0usize;
        for &n in blocks_per_attribute {
            offsets.push(total);
            total += n;
        }

        let slots = (0..total).map(|_| Slot::default()).collect();

        Self {
            slots,
            blocks_per_attribute: blocks_per_attribute.to_vec(),
            offsets,
            capacity_bytes,
            used_bytes: AtomicU64::new(0),
            hits: AtomicI64::new(0),
        }
    }

    fn slot_index(&self, attribute_index: usize, block_index: usize) -> Option<usize> {
        let base = *self.offsets.get(attribute_index)?;
        if block_index >= *self.blocks_per_attribute.get(attribute_index)? {
            return None;
        }
        Some(base + block_index)
    }

    /// Returns the cached block, if present, bumping the (saturating) hit counter.
    #[must_use]
    pub fn get(&self, attribute_index: usize, block_index: usize) -> Option<Arc<BlockValues>> {
        let idx = self.slot_index(attribute_index, block_index)?;
        #[allow(clippy::indexing_slicing)]
        let found = self.slots[idx].value.get().cloned();
        if found.is_some() {
            self.bump_hits();
        }
        found
    }

    /// Inserts a freshly-decoded block. No-op past the byte cap or if
    /// another thread already filled this slot (that thread's value wins;
    /// the caller keeps using its own `values`).
    pub fn insert(&self, attribute_index: usize, block_index: usize, values: Arc<BlockValues>) {
        if self.capacity_bytes == 0 {
            return;
        }
        let Some(idx) = self.slot_index(attribute_index, block_index) else { return };

        #[allow(clippy::cast_possible_truncation)]
        let size = (values.len() * std::mem::size_of::<u64>()) as u64;

        let mut used = self.used_bytes.load(Ordering::Relaxed);
        loop {
            if used.saturating_add(size) > self.capacity_bytes {
                return;
            }
            match self.used_bytes.compare_exchange_weak(
                used,
                used + size,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => used = observed,
            }
        }

        #[allow(clippy::indexing_slicing)]
        let _ = self.slots[idx].value.set(values);
    }

    fn bump_hits(&self) {
        let mut current = self.hits.load(Ordering::Relaxed);
        loop {
            if current == i64::MAX {
                return;
            }
            match self.hits.compare_exchange_weak(current, current + 1, Ordering::Relaxed, Ordering::Relaxed) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    /// Cumulative cache hits, saturating at `i64::MAX` (spec §5).
    #[must_use]
    pub fn hit_count(&self) -> i64 {
        self.hits.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn used_bytes(&self) -> u64 {
        self.used_bytes.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn miss_then_hit() {
        let cache = BlockCache::new(&[2, 3], 1_000_000);
        assert!(cache.get(0, 0).is_none());

        cache.insert(0, 0, Arc::new(vec![1, 2, 3]));
        assert!(cache.get(0, 0).is_some());
        assert_eq!(cache.hit_count(), 1);
    }

    #[test]
    fn zero_capacity_never_caches() {
        let cache = BlockCache::new(&[1], 0);
        cache.insert(0, 0, Arc::new(vec![1, 2, 3]));
        assert!(cache.get(0, 0).is_none());
    }

    #[test]
    fn out_of_bounds_lookup_is_none() {
        let cache = BlockCache::new(&[1], 1_000);
        assert!(cache.get(0, 5).is_none());
        assert!(cache.get(5, 0).is_none());
    }

    #[test]
    fn over_capacity_insert_is_skipped() {
        let cache = BlockCache::new(&[1, 1], 8);
        cache.insert(0, 0, Arc::new(vec![1, 2])); // 16 bytes > cap
        assert!(cache.get(0, 0).is_none());
    }

    #[test]
    fn second_insert_into_same_slot_is_ignored() {
        let cache = BlockCache::new(&[1], 1_000);
        cache.insert(0, 0, Arc::new(vec![1]));
        cache.insert(0, 0, Arc::new(vec![2, 3]));
        assert_eq!(cache.get(0, 0).unwrap().as_slice(), &[1]);
    }
}
