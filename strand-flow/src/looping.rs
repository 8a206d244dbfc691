//! Resumable looping iteration over ordered keys.
//!
//! Work selection walks shards starting where the previous pass stopped so
//! that a small `max` does not starve shards late in the key order. The
//! iterator visits each key of a snapshot exactly once: from the start key
//! (or its successor when absent) to the end, then from the beginning up to
//! but excluding the start.

use std::collections::BTreeMap;

/// Iterates a snapshot of keys, resuming from a given position and wrapping.
#[derive(Debug, Clone)]
pub struct LoopingResumingIterator<K> {
    keys: Vec<K>,
    start: usize,
    visited: usize,
}

impl<K: Ord + Clone> LoopingResumingIterator<K> {
    /// Creates an iterator over `keys`, resuming at `start`.
    ///
    /// A `start` not present in the map resumes at its successor. A `start`
    /// beyond every key resumes at the first key.
    #[must_use]
    pub fn new<V>(map: &BTreeMap<K, V>, start: Option<&K>) -> Self {
        Self::from_sorted(map.keys().cloned().collect(), start)
    }

    /// Creates an iterator over already-sorted keys.
    #[must_use]
    pub fn from_sorted(keys: Vec<K>, start: Option<&K>) -> Self {
        debug_assert!(keys.windows(2).all(|w| w[0] < w[1]));

        let start = match start {
            Some(key) => {
                let idx = keys.partition_point(|k| k < key);
                if idx >= keys.len() {
                    0
                } else {
                    idx
                }
            }
            None => 0,
        };
        Self {
            keys,
            start,
            visited: 0,
        }
    }

    /// Number of keys in the snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns true if the snapshot has no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl<K: Clone> Iterator for LoopingResumingIterator<K> {
    type Item = K;

    fn next(&mut self) -> Option<K> {
        if self.visited >= self.keys.len() {
            return None;
        }
        let idx = (self.start + self.visited) % self.keys.len();
        self.visited += 1;
        Some(self.keys[idx].clone())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.keys.len() - self.visited;
        (remaining, Some(remaining))
    }
}

impl<K: Clone> ExactSizeIterator for LoopingResumingIterator<K> {}
