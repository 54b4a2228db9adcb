//! Owns the named B-tree indexes of one collection.

use dashmap::DashMap;

use crate::btree::BTreeIndex;

/// Minimum degree for every index this manager creates. Not exposed as a
/// configuration option; a fixed, reasonable fan-out keeps the
/// tree shallow without the caller needing to reason about it.
const DEFAULT_MIN_DEGREE: usize = 8;

pub struct IndexManager {
    indexes: DashMap<String, BTreeIndex<String>>,
}

impl IndexManager {
    pub fn new() -> Self {
        Self {
            indexes: DashMap::new(),
        }
    }

    /// Idempotent: a second call on an already-indexed field is a no-op.
    pub fn create_index(&self, field: &str) -> bool {
        if self.indexes.contains_key(field) {
            return false;
        }
        self.indexes
            .entry(field.to_string())
            .or_insert_with(|| BTreeIndex::new(DEFAULT_MIN_DEGREE));
        true
    }

    pub fn has_index(&self, field: &str) -> bool {
        self.indexes.contains_key(field)
    }

    pub fn fields(&self) -> Vec<String> {
        self.indexes.iter().map(|e| e.key().clone()).collect()
    }

    /// No-op on an unknown field: operations on unknown fields return empty
    /// results, not an error, so the planner can fall through to a scan.
    pub fn insert(&self, field: &str, key: &str, bytes: Vec<u8>) {
        if let Some(mut index) = self.indexes.get_mut(field) {
            index.insert(key.to_string(), bytes);
        }
    }

    pub fn delete(&self, field: &str, key: &str, bytes: &[u8]) {
        if let Some(mut index) = self.indexes.get_mut(field) {
            index.delete(&key.to_string(), bytes);
        }
    }

    pub fn search(&self, field: &str, key: &str) -> Vec<Vec<u8>> {
        match self.indexes.get(field) {
            Some(index) => index
                .search(&key.to_string())
                .map(|values| values.to_vec())
                .unwrap_or_default(),
            None => Vec::new(),
        }
    }

    pub fn range_search(&self, field: &str, low: &str, high: &str, inclusive: bool) -> Vec<Vec<u8>> {
        match self.indexes.get(field) {
            Some(index) => index.range_search(&low.to_string(), &high.to_string(), inclusive),
            None => Vec::new(),
        }
    }

    /// Open-ended lower bound: every entry with key `>= low` (or `> low`
    /// when `inclusive` is false). No finite string sorts above every
    /// possible key, so `greaterThan`/`greaterOrEqual` predicates need this
    /// rather than a synthetic upper bound.
    pub fn range_from(&self, field: &str, low: &str, inclusive: bool) -> Vec<Vec<u8>> {
        match self.indexes.get(field) {
            Some(index) => index.range_from(&low.to_string(), inclusive),
            None => Vec::new(),
        }
    }

    /// Open-ended upper bound: every entry with key `<= high` (or `< high`
    /// when `inclusive` is false).
    pub fn range_to(&self, field: &str, high: &str, inclusive: bool) -> Vec<Vec<u8>> {
        match self.indexes.get(field) {
            Some(index) => index.range_to(&high.to_string(), inclusive),
            None => Vec::new(),
        }
    }

    /// Per-key document counts for one field, used by the stats engine.
    /// Empty for an unknown field.
    pub fn key_counts(&self, field: &str) -> Vec<(String, usize)> {
        match self.indexes.get(field) {
            Some(index) => index.key_counts(),
            None => Vec::new(),
        }
    }
}

impl Default for IndexManager {
    fn default() -> Self {
        Self::new()
    }
}
