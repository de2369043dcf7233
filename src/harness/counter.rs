/*
 * STRESS FORGE - RESULT AGGREGATOR
 * =================================================================
 * Component Name: src/harness/counter.rs
 * Core Responsibility: Outcome -> occurrence count, one private instance per actor role.
 * Design Pattern: Commutative Monoid (merge is order-independent, empty is the identity)
 * Forensic Impact: The final histogram is the verdict of a run. Losing a merge loses evidence.
 * =================================================================
 */

use std::collections::HashMap;
use std::hash::Hash;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultAggregator<K: Eq + Hash> {
    counts: HashMap<K, u64>,
}

impl<K: Eq + Hash> Default for ResultAggregator<K> {
    fn default() -> Self {
        Self { counts: HashMap::new() }
    }
}

impl<K: Eq + Hash + Clone> ResultAggregator<K> {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record(&mut self, outcome: K) {
        self.record_n(outcome, 1);
    }

    /// Adds `n` occurrences. Recording zero still leaves no entry.
    pub fn record_n(&mut self, outcome: K, n: u64) {
        if n == 0 {
            return;
        }
        *self.counts.entry(outcome).or_insert(0) += n;
    }

    /// Missing outcomes count as 0.
    pub fn count(&self, outcome: &K) -> u64 {
        self.counts.get(outcome).copied().unwrap_or(0)
    }

    /// Sum of both inputs, neither input modified.
    pub fn merge(&self, other: &Self) -> Self {
        let mut out = self.clone();
        out.merge_from(other);
        out
    }

    pub fn merge_from(&mut self, other: &Self) {
        for (k, &n) in &other.counts {
            self.record_n(k.clone(), n);
        }
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Number of distinct outcomes.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, u64)> {
        self.counts.iter().map(|(k, &n)| (k, n))
    }
}

impl<K: Eq + Hash + Clone + Ord> ResultAggregator<K> {
    /// Entries ordered by outcome, for stable reports.
    pub fn sorted(&self) -> Vec<(K, u64)> {
        let mut entries: Vec<(K, u64)> = self.counts.iter().map(|(k, &n)| (k.clone(), n)).collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

impl<K: Eq + Hash + Clone> FromIterator<K> for ResultAggregator<K> {
    fn from_iter<I: IntoIterator<Item = K>>(iter: I) -> Self {
        let mut agg = Self::new();
        for k in iter {
            agg.record(k);
        }
        agg
    }
}
