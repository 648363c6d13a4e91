//! Integer references handed across the protocol boundary.
//!
//! A handle packs a generation in its upper 32 bits and `index + 1` in the
//! lower ones, so `0` is never a handle and handles from an earlier stop are
//! rejected after [`HandleTable::invalidate`].

use std::hash::Hash;

use hashbrown::HashMap;

pub(crate) struct HandleTable<K, T> {
    generation: u32,
    entries: Vec<T>,
    by_key: HashMap<K, u64>,
}

impl<K: Hash + Eq, T> HandleTable<K, T> {
    pub(crate) fn new() -> Self {
        HandleTable {
            generation: 1,
            entries: Vec::new(),
            by_key: HashMap::new(),
        }
    }

    /// The handle for `key`, storing `make()` the first time it is seen in
    /// this generation.
    pub(crate) fn intern(&mut self, key: K, make: impl FnOnce() -> T) -> u64 {
        if let Some(handle) = self.by_key.get(&key) {
            return *handle;
        }
        self.entries.push(make());
        let handle = (u64::from(self.generation) << 32) | self.entries.len() as u64;
        self.by_key.insert(key, handle);
        handle
    }

    pub(crate) fn get(&self, handle: u64) -> Option<&T> {
        let generation = (handle >> 32) as u32;
        let index = (handle & u64::from(u32::MAX)) as usize;
        if generation != self.generation || index == 0 {
            return None;
        }
        self.entries.get(index - 1)
    }

    /// Drop every entry; handles issued so far stop resolving.
    pub(crate) fn invalidate(&mut self) {
        self.entries.clear();
        self.by_key.clear();
        self.generation = self.generation.wrapping_add(1).max(1);
    }
}
