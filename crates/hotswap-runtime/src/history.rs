//! Version history
//!
//! Bounded, append-only record of swaps. The coordinator keeps two of these:
//! one for completed swaps and one for the backups taken before each attempt.

use std::collections::VecDeque;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One activated implementation version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub version: u64,
    pub timestamp: DateTime<Utc>,
    pub type_name: String,
    pub module_path: PathBuf,
    /// Identity of the instance that served this version
    pub instance_id: String,
}

/// Fixed-capacity log of [`VersionRecord`]s, oldest evicted first
#[derive(Debug, Clone)]
pub struct VersionHistory {
    records: VecDeque<VersionRecord>,
    max_history: usize,
}

impl VersionHistory {
    /// Create a history holding at most `max_history` records (at least one).
    pub fn new(max_history: usize) -> Self {
        let max_history = max_history.max(1);
        Self {
            records: VecDeque::with_capacity(max_history),
            max_history,
        }
    }

    /// Append a record, returning the evicted one if the history was full.
    pub fn push(&mut self, record: VersionRecord) -> Option<VersionRecord> {
        let evicted = if self.records.len() >= self.max_history {
            self.records.pop_front()
        } else {
            None
        };
        self.records.push_back(record);
        evicted
    }

    /// Remove and return the newest record
    pub fn pop_latest(&mut self) -> Option<VersionRecord> {
        self.records.pop_back()
    }

    pub fn latest(&self) -> Option<&VersionRecord> {
        self.records.back()
    }

    /// Records, newest last
    pub fn records(&self) -> Vec<VersionRecord> {
        self.records.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn max_history(&self) -> usize {
        self.max_history
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(version: u64) -> VersionRecord {
        VersionRecord {
            version,
            timestamp: Utc::now(),
            type_name: "Calculator".to_string(),
            module_path: PathBuf::from("calc.rhai"),
            instance_id: format!("instance-{}", version),
        }
    }

    #[test]
    fn test_history_bound_keeps_newest() {
        let mut history = VersionHistory::new(3);
        for v in 1..=5 {
            history.push(record(v));
        }

        assert_eq!(history.len(), 3);
        let versions: Vec<u64> = history.records().iter().map(|r| r.version).collect();
        assert_eq!(versions, vec![3, 4, 5]);
        assert_eq!(history.latest().map(|r| r.version), Some(5));
    }

    #[test]
    fn test_push_reports_eviction() {
        let mut history = VersionHistory::new(2);
        assert!(history.push(record(1)).is_none());
        assert!(history.push(record(2)).is_none());
        assert_eq!(history.push(record(3)).map(|r| r.version), Some(1));
    }

    #[test]
    fn test_pop_latest() {
        let mut history = VersionHistory::new(10);
        history.push(record(1));
        history.push(record(2));

        assert_eq!(history.pop_latest().map(|r| r.version), Some(2));
        assert_eq!(history.pop_latest().map(|r| r.version), Some(1));
        assert!(history.pop_latest().is_none());
        assert!(history.is_empty());
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut history = VersionHistory::new(0);
        assert_eq!(history.max_history(), 1);
        history.push(record(1));
        history.push(record(2));
        assert_eq!(history.records(), vec![history.latest().cloned().unwrap()]);
        assert_eq!(history.latest().map(|r| r.version), Some(2));
    }
}
