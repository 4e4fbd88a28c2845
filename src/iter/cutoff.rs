// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The soft row-count ceiling shared by every [`super::RowIdSource`] (spec
//! §4.5: "each Fetch decrements; when exhausted the iterator stops
//! producing even if more rows match... a ceiling, not a guarantee of
//! exactness").

#[derive(Debug, Clone, Default)]
pub struct Cutoff {
    remaining: Option<i64>,
    processed: i64,
}

impl Cutoff {
    /// Sets (or replaces) the remaining-row budget.
    pub fn set(&mut self, n: i64) {
        self.remaining = Some(n);
    }

    /// Records `n` newly-emitted rows against both the budget and the
    /// monitoring-only `processed` counter.
    pub fn record(&mut self, n: i64) {
        self.processed += n;
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= n;
        }
    }

    #[must_use]
    pub fn hit(&self) -> bool {
        matches!(self.remaining, Some(r) if r <= 0)
    }

    #[must_use]
    pub fn processed(&self) -> i64 {
        self.processed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn no_cutoff_never_hits() {
        let mut c = Cutoff::default();
        c.record(1_000_000);
        assert!(!c.hit());
    }

    #[test]
    fn cutoff_trips_at_zero() {
        let mut c = Cutoff::default();
        c.set(3);
        c.record(2);
        assert!(!c.hit());
        c.record(1);
        assert!(c.hit());
    }

    #[test]
    fn processed_tracks_total_regardless_of_cutoff() {
        let mut c = Cutoff::default();
        c.set(1);
        c.record(1);
        c.record(1);
        assert_eq!(c.processed(), 2);
    }
}
