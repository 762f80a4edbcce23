//! Lock state store: per-lock-name records held by one server process.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Caller identity type, stable across a client's retries.
pub type CallerId = u64;

/// Caller-supplied logical timestamp type.
pub type Timestamp = u64;

/// State of a single named lock. An absent name is equivalent to the
/// `Default` record: not held, all identities and timestamps zero.
#[derive(Debug, Default, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct LockRecord {
    /// Whether the lock is currently held.
    pub held: bool,

    /// Caller that currently holds, or most recently was granted, the lock.
    pub holder: CallerId,

    /// Caller that performed the most recent successful unlock.
    pub releaser: CallerId,

    /// Timestamp of the most recent successful lock grant.
    pub lock_ts: Timestamp,

    /// Timestamp of the most recent successful unlock.
    pub unlock_ts: Timestamp,
}

/// In-memory table of lock records. Records are created lazily on first
/// mutation and never deleted; nothing is persisted.
#[derive(Debug, Default)]
pub(crate) struct LockTable {
    records: HashMap<String, LockRecord>,
}

impl LockTable {
    /// Creates an empty lock table.
    pub(crate) fn new() -> Self {
        LockTable {
            records: HashMap::new(),
        }
    }

    /// Returns a copy of the record for `name`, or the default record if the
    /// name has never been touched.
    pub(crate) fn get(&self, name: &str) -> LockRecord {
        self.records.get(name).cloned().unwrap_or_default()
    }

    /// Returns a mutable reference to the record for `name`, creating it if
    /// absent.
    pub(crate) fn entry(&mut self, name: &str) -> &mut LockRecord {
        self.records.entry(name.to_string()).or_default()
    }

    /// Returns all records sorted by lock name.
    pub(crate) fn snapshot(&self) -> Vec<(String, LockRecord)> {
        let mut records: Vec<(String, LockRecord)> = self
            .records
            .iter()
            .map(|(name, record)| (name.clone(), record.clone()))
            .collect();
        records.sort_by(|a, b| a.0.cmp(&b.0));
        records
    }
}

#[cfg(test)]
mod store_tests {
    use super::*;

    #[test]
    fn absent_is_default() {
        let table = LockTable::new();
        assert_eq!(table.get("nobody"), LockRecord::default());
        assert!(table.snapshot().is_empty());
    }

    #[test]
    fn entry_creates_lazily() {
        let mut table = LockTable::new();
        {
            let record = table.entry("A");
            assert!(!record.held);
            record.held = true;
            record.holder = 3;
            record.lock_ts = 10;
        }
        assert_eq!(table.snapshot().len(), 1);
        assert_eq!(
            table.get("A"),
            LockRecord {
                held: true,
                holder: 3,
                releaser: 0,
                lock_ts: 10,
                unlock_ts: 0,
            }
        );
        // reading an absent name does not create it
        let _ = table.get("B");
        assert_eq!(table.snapshot().len(), 1);
    }

    #[test]
    fn snapshot_sorted() {
        let mut table = LockTable::new();
        table.entry("zeta").held = true;
        table.entry("alpha").releaser = 5;
        table.entry("mid");
        let names: Vec<String> =
            table.snapshot().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    }
}
