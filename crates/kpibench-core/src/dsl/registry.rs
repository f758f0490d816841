//! Known metric identifiers for formula resolution.
//!
//! Names are stored uppercase; lookups and inserts normalize their input the
//! same way, so membership is case-insensitive. The set only grows.

use std::collections::BTreeSet;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Metric identifiers every registry starts with.
pub const DEFAULT_METRIC_KEYS: [&str; 6] =
    ["ROUGE", "BLEU", "ACCURACY", "PRECISION", "RECALL", "F1_SCORE"];

/// Normalize a metric identifier the way the registry stores it.
pub fn normalize_metric_key(name: &str) -> String {
    name.trim().to_uppercase()
}

/// Guarded, monotonically growing set of metric identifiers.
///
/// Registration takes the write lock once for the whole batch, so a
/// concurrent reader sees either none or all of the names in a call.
#[derive(Debug)]
pub struct MetricRegistry {
    keys: RwLock<BTreeSet<String>>,
}

impl Default for MetricRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricRegistry {
    /// Registry seeded with [`DEFAULT_METRIC_KEYS`].
    pub fn new() -> Self {
        Self::empty().with_keys(DEFAULT_METRIC_KEYS)
    }

    /// Registry with no known metrics.
    pub fn empty() -> Self {
        Self {
            keys: RwLock::new(BTreeSet::new()),
        }
    }

    pub fn with_keys<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.register(names);
        self
    }

    /// Add names to the registry. Re-registering a known name is a no-op.
    ///
    /// Returns how many names were new.
    pub fn register<I, S>(&self, names: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let normalized: Vec<String> = names
            .into_iter()
            .map(|n| normalize_metric_key(n.as_ref()))
            .filter(|n| !n.is_empty())
            .collect();

        let mut keys = self.write();
        normalized
            .into_iter()
            .filter(|n| keys.insert(n.clone()))
            .count()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().contains(&normalize_metric_key(name))
    }

    /// Point-in-time copy of the registry contents.
    pub fn snapshot(&self) -> BTreeSet<String> {
        self.read().clone()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Read guard for callers that need several lookups against one
    /// consistent view.
    pub(crate) fn read(&self) -> RwLockReadGuard<'_, BTreeSet<String>> {
        self.keys.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeSet<String>> {
        self.keys.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
