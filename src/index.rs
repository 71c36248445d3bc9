//! Deterministic multi-valued relation index.
//!
//! A multimap `key -> ordered set<value>` used three times by the checker:
//! child->parent, parent->children, reference-source->targets. Values under
//! a key are de-duplicated and iteration is sorted by key then value, so
//! checker output is a pure function of content and diffs cleanly across
//! runs on identical input.
//!
//! The index reflects raw storage as observed and may be internally
//! inconsistent (e.g. a child->parent entry with no matching
//! parent->children entry). That is expected input, not a violation.

use std::collections::{BTreeMap, BTreeSet};

/// Multimap with deterministic (sorted) iteration order.
pub struct RelationIndex<K, V> {
    map: BTreeMap<K, BTreeSet<V>>,
    /// Total (key, value) pair count, maintained incrementally.
    entries: usize,
}

impl<K: Ord + Copy, V: Ord + Copy> RelationIndex<K, V> {
    pub fn new() -> Self {
        Self {
            map: BTreeMap::new(),
            entries: 0,
        }
    }

    /// Insert one pair. Returns false if the pair was already present.
    pub fn put(&mut self, key: K, value: V) -> bool {
        let inserted = self.map.entry(key).or_default().insert(value);
        if inserted {
            self.entries += 1;
        }
        inserted
    }

    /// Insert every value under one key.
    pub fn put_all<I: IntoIterator<Item = V>>(&mut self, key: K, values: I) {
        for value in values {
            self.put(key, value);
        }
    }

    /// Values under a key, in sorted order. Empty if the key is absent.
    pub fn get(&self, key: &K) -> impl Iterator<Item = V> + '_ {
        self.map.get(key).into_iter().flatten().copied()
    }

    /// Single representative value for a key (the smallest).
    ///
    /// Callers expecting exactly one value must treat `value_count(key) > 1`
    /// as a corruption signal in its own right, not silently take the first.
    pub fn get_first(&self, key: &K) -> Option<V> {
        self.map.get(key).and_then(|set| set.iter().next().copied())
    }

    /// Number of values stored under a key.
    pub fn value_count(&self, key: &K) -> usize {
        self.map.get(key).map_or(0, BTreeSet::len)
    }

    /// Remove a key and all its values.
    pub fn remove_key(&mut self, key: &K) {
        if let Some(set) = self.map.remove(key) {
            self.entries -= set.len();
        }
    }

    /// Remove one pair. Returns false if it was not present.
    pub fn remove(&mut self, key: &K, value: &V) -> bool {
        let Some(set) = self.map.get_mut(key) else {
            return false;
        };
        let removed = set.remove(value);
        if removed {
            self.entries -= 1;
            if set.is_empty() {
                self.map.remove(key);
            }
        }
        removed
    }

    pub fn contains(&self, key: &K, value: &V) -> bool {
        self.map.get(key).is_some_and(|set| set.contains(value))
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Total number of (key, value) pairs.
    pub fn entry_count(&self) -> usize {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.entries = 0;
    }

    /// All keys, sorted.
    pub fn keys(&self) -> impl Iterator<Item = K> + '_ {
        self.map.keys().copied()
    }

    /// All (key, value) pairs, sorted by key then value.
    pub fn iter(&self) -> impl Iterator<Item = (K, V)> + '_ {
        self.map
            .iter()
            .flat_map(|(k, set)| set.iter().map(move |v| (*k, *v)))
    }
}

impl<K: Ord + Copy, V: Ord + Copy> Default for RelationIndex<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
