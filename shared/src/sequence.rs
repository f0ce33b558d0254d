use std::collections::HashMap;
use std::hash::Hash;

/// True if `a` is strictly newer than `b`, tolerating wrap-around.
pub fn seq_newer(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) > 0
}

/// Drops stale continuous updates per key.
///
/// Position updates may arrive late or out of order; applying them would
/// snap an entity backwards. Each key remembers the newest sequence it has
/// accepted and rejects anything not newer.
#[derive(Debug, Clone)]
pub struct SequenceFilter<K> {
    latest: HashMap<K, u32>,
}

impl<K: Eq + Hash + Copy> Default for SequenceFilter<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Copy> SequenceFilter<K> {
    pub fn new() -> Self {
        Self {
            latest: HashMap::new(),
        }
    }

    /// Records `seq` for `key` and returns true if it should be applied.
    pub fn accept(&mut self, key: K, seq: u32) -> bool {
        match self.latest.get(&key) {
            Some(&latest) if !seq_newer(seq, latest) => false,
            _ => {
                self.latest.insert(key, seq);
                true
            }
        }
    }

    /// Forces the floor for `key`, so only updates newer than `seq` pass.
    pub fn reset(&mut self, key: K, seq: u32) {
        self.latest.insert(key, seq);
    }

    pub fn forget(&mut self, key: &K) {
        self.latest.remove(key);
    }

    pub fn latest(&self, key: &K) -> Option<u32> {
        self.latest.get(key).copied()
    }
}
