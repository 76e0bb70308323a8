//! New Entrant Tracker
//!
//! Default [`ChangeDetector`]: reports symbols that entered the top of the
//! fluctuation ranking since the previous cycle.

use std::collections::HashSet;

use async_trait::async_trait;

use crate::application::ports::ChangeDetector;
use crate::domain::ranking::RankEntry;
use crate::domain::streaming::Symbol;
use crate::infrastructure::metrics;

/// Compares each cycle's top-N symbols against the previous cycle.
///
/// The first cycle has nothing to compare against, so every entry counts
/// as new.
#[derive(Debug)]
pub struct NewEntrantTracker {
    top_n: usize,
    previous: parking_lot::Mutex<Option<HashSet<Symbol>>>,
}

impl NewEntrantTracker {
    /// Track the first `top_n` entries of each ranking.
    #[must_use]
    pub const fn new(top_n: usize) -> Self {
        Self {
            top_n,
            previous: parking_lot::Mutex::new(None),
        }
    }

    /// Record this cycle and return the entries that are new to the top-N.
    pub fn observe<'a>(&self, entries: &'a [RankEntry]) -> Vec<&'a RankEntry> {
        let mut seen = HashSet::new();
        let current: Vec<&RankEntry> = entries
            .iter()
            .filter(|entry| seen.insert(entry.symbol.as_str()))
            .take(self.top_n)
            .collect();

        let mut previous = self.previous.lock();
        let entrants = current
            .iter()
            .copied()
            .filter(|entry| previous.as_ref().is_none_or(|p| !p.contains(&entry.symbol)))
            .collect();

        *previous = Some(current.iter().map(|entry| entry.symbol.clone()).collect());
        entrants
    }
}

#[async_trait]
impl ChangeDetector for NewEntrantTracker {
    async fn detect_and_process_changes(&self, entries: &[RankEntry]) -> anyhow::Result<usize> {
        let entrants = self.observe(entries);

        for entry in &entrants {
            tracing::info!(
                symbol = %entry.symbol,
                name = %entry.name,
                rank = ?entry.rank,
                change_rate = ?entry.change_rate,
                "New ranking entrant"
            );
        }

        metrics::record_new_entrants(entrants.len());
        Ok(entrants.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranking(symbols: &[&str]) -> Vec<RankEntry> {
        symbols
            .iter()
            .enumerate()
            .map(|(i, symbol)| RankEntry {
                symbol: (*symbol).to_string(),
                rank: u32::try_from(i + 1).ok(),
                ..RankEntry::default()
            })
            .collect()
    }

    #[tokio::test]
    async fn first_cycle_counts_everything() {
        let tracker = NewEntrantTracker::new(30);
        let count = tracker
            .detect_and_process_changes(&ranking(&["A", "B", "C"]))
            .await
            .unwrap();
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn later_cycles_count_only_newcomers() {
        let tracker = NewEntrantTracker::new(30);
        tracker.observe(&ranking(&["A", "B", "C"]));

        let count = tracker
            .detect_and_process_changes(&ranking(&["B", "D", "A", "E"]))
            .await
            .unwrap();

        assert_eq!(count, 2);
    }

    #[test]
    fn only_top_n_is_compared() {
        let tracker = NewEntrantTracker::new(2);
        tracker.observe(&ranking(&["A", "B", "C"]));

        // C was outside the top two last time, so it is new now
        let rows = ranking(&["C", "A", "B"]);
        let entrants = tracker.observe(&rows);

        let symbols: Vec<&str> = entrants.iter().map(|e| e.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["C"]);
    }

    #[test]
    fn duplicate_rows_count_once() {
        let tracker = NewEntrantTracker::new(30);
        assert_eq!(tracker.observe(&ranking(&["A", "A", "B"])).len(), 2);
    }

    #[test]
    fn unchanged_ranking_has_no_entrants() {
        let tracker = NewEntrantTracker::new(30);
        tracker.observe(&ranking(&["A", "B"]));
        assert!(tracker.observe(&ranking(&["B", "A"])).is_empty());
    }
}
