//! Bounded, approximate top-N sets
//!
//! Entries are appended unsorted until the set is full, sorted once in
//! descending order, and from then on a candidate replaces the first entry
//! it strictly beats. Equal metrics bump the entry's collision counter.
//! The result is approximate: a replaced entry is dropped, not shifted down.

use super::key_info::KeyInfo;

/// Ranking metric
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Frequency,
    Length,
    Memory,
}

impl Metric {
    pub fn of(&self, key: &KeyInfo) -> i64 {
        match self {
            Metric::Frequency => key.frequency,
            Metric::Length => key.length,
            Metric::Memory => key.memory,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TopN {
    limit: usize,
    metric: Metric,
    entries: Vec<KeyInfo>,
}

impl TopN {
    pub fn new(limit: usize, metric: Metric) -> Self {
        Self {
            limit,
            metric,
            entries: Vec::with_capacity(limit),
        }
    }

    pub fn offer(&mut self, candidate: KeyInfo) {
        if self.entries.len() < self.limit {
            self.entries.push(candidate);
            if self.entries.len() == self.limit {
                let metric = self.metric;
                self.entries
                    .sort_by(|a, b| metric.of(b).cmp(&metric.of(a)));
            }
            return;
        }

        let value = self.metric.of(&candidate);
        for entry in self.entries.iter_mut() {
            let current = self.metric.of(entry);
            if value == current {
                entry.collisions += 1;
                return;
            }
            if value > current {
                *entry = candidate;
                return;
            }
        }
    }

    pub fn entries(&self) -> &[KeyInfo] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Hand the entries out and leave the set empty
    pub fn take(&mut self) -> Vec<KeyInfo> {
        std::mem::take(&mut self.entries)
    }
}
