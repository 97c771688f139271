//! Trial leaderboard: bounded, deduplicated by parameter fingerprint, best first.
//!
//! A trial whose fingerprint is already present replaces the existing entry
//! only when it scores strictly better. Non-finite scores are never admitted.

use serde::{Deserialize, Serialize};

use crate::optimizer::TrialRecord;
use crate::scoring::is_better;

/// Outcome of an insert operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertResult {
    Inserted,
    /// Replaced an existing entry with the same fingerprint (better score).
    Replaced,
    /// Duplicate with worse or equal score, non-finite score, or board full.
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialLeaderboard {
    entries: Vec<TrialRecord>,
    max_size: usize,
}

impl TrialLeaderboard {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: Vec::with_capacity(max_size.min(1024)),
            max_size,
        }
    }

    pub fn insert(&mut self, record: TrialRecord) -> InsertResult {
        if !record.score.is_finite() {
            return InsertResult::Skipped;
        }

        if let Some(idx) = self.entries.iter().position(|e| e.run_id == record.run_id) {
            if is_better(record.score, self.entries[idx].score) {
                self.entries[idx] = record;
                self.sort_entries();
                return InsertResult::Replaced;
            }
            return InsertResult::Skipped;
        }

        if self.entries.len() < self.max_size {
            self.entries.push(record);
            self.sort_entries();
            InsertResult::Inserted
        } else if let Some(worst) = self.entries.last() {
            if is_better(record.score, worst.score) {
                self.entries.pop();
                self.entries.push(record);
                self.sort_entries();
                InsertResult::Inserted
            } else {
                InsertResult::Skipped
            }
        } else {
            InsertResult::Skipped
        }
    }

    pub fn entries(&self) -> &[TrialRecord] {
        &self.entries
    }

    pub fn best(&self) -> Option<&TrialRecord> {
        self.entries.first()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // Descending score; ties keep the earlier trial first.
    fn sort_entries(&mut self) {
        self.entries.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.index.cmp(&b.index))
        });
    }
}
