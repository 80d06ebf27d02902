//! Atomically replaced keyed tables.

use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A keyed table that is only ever replaced as a whole.
///
/// Readers see either the previous or the new table, never a mix.
pub struct SnapshotMap<V> {
    entries: ArcSwap<HashMap<String, Arc<V>>>,
}

impl<V> SnapshotMap<V> {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    /// Replace the whole table. Keys absent from `entries` disappear.
    pub fn replace(&self, entries: impl IntoIterator<Item = (String, V)>) {
        let table = entries
            .into_iter()
            .map(|(key, value)| (key, Arc::new(value)))
            .collect::<HashMap<_, _>>();
        self.entries.store(Arc::new(table));
    }

    /// Entry stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Arc<V>> {
        self.entries.load().get(key).cloned()
    }

    /// Whether `key` is present.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.load().contains_key(key)
    }

    /// The current table.
    #[must_use]
    pub fn snapshot(&self) -> Arc<HashMap<String, Arc<V>>> {
        self.entries.load_full()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.load().len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.load().is_empty()
    }
}

impl<V> Default for SnapshotMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> fmt::Debug for SnapshotMap<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotMap")
            .field("len", &self.len())
            .finish()
    }
}
