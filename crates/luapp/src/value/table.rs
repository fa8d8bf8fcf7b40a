// String-keyed hash table with open addressing.
//
// Keys are interned strings, so identity comparison is content comparison.
// Probing uses the string's cached FNV-1a hash, which callers pass in (the
// hash lives on the GcString; tables do not reach back into the pool).
// Deletion leaves tombstones; `count` includes them, matching the load-factor
// bookkeeping of the grow policy.

use crate::gc::{Arena, GcString, StringId};
use crate::value::Value;

const TABLE_MAX_LOAD_NUM: usize = 3;
const TABLE_MAX_LOAD_DEN: usize = 4;

/// FNV-1a over raw bytes. Every interned string caches this once.
pub fn hash_bytes(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 2166136261;
    for &b in bytes {
        hash ^= b as u32;
        hash = hash.wrapping_mul(16777619);
    }
    hash
}

/// One bucket. `key == None` with a nil value is empty; `key == None` with a
/// true value is a tombstone left by a deletion.
#[derive(Debug, Clone, Copy)]
pub struct TableEntry {
    pub key: Option<StringId>,
    pub hash: u32,
    pub value: Value,
}

impl TableEntry {
    const EMPTY: TableEntry = TableEntry {
        key: None,
        hash: 0,
        value: Value::Nil,
    };

    #[inline]
    fn is_tombstone(&self) -> bool {
        self.key.is_none() && matches!(self.value, Value::Bool(true))
    }
}

#[derive(Debug, Clone, Default)]
pub struct Table {
    entries: Vec<TableEntry>,
    count: usize, // live entries + tombstones
}

impl Table {
    pub fn new() -> Self {
        Table {
            entries: Vec::new(),
            count: 0,
        }
    }

    /// Number of live key/value pairs (excludes tombstones).
    pub fn live_count(&self) -> usize {
        self.entries.iter().filter(|e| e.key.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.live_count() == 0
    }

    /// Probe for `key`. Returns the index of its bucket, or of the slot an
    /// insertion should use (the first tombstone seen, else the empty slot).
    fn find_entry(entries: &[TableEntry], key: StringId, hash: u32) -> usize {
        let mask = entries.len() - 1;
        let mut index = hash as usize & mask;
        let mut tombstone: Option<usize> = None;
        loop {
            let entry = &entries[index];
            match entry.key {
                None => {
                    if entry.is_tombstone() {
                        if tombstone.is_none() {
                            tombstone = Some(index);
                        }
                    } else {
                        return tombstone.unwrap_or(index);
                    }
                }
                Some(k) if k == key => return index,
                Some(_) => {}
            }
            index = (index + 1) & mask;
        }
    }

    fn adjust_capacity(&mut self, capacity: usize) {
        let mut entries = vec![TableEntry::EMPTY; capacity];
        self.count = 0;
        for entry in &self.entries {
            if let Some(key) = entry.key {
                let dest = Self::find_entry(&entries, key, entry.hash);
                entries[dest] = *entry;
                self.count += 1;
            }
        }
        self.entries = entries;
    }

    pub fn get(&self, key: StringId, hash: u32) -> Option<Value> {
        if self.entries.is_empty() {
            return None;
        }
        let index = Self::find_entry(&self.entries, key, hash);
        let entry = &self.entries[index];
        entry.key.map(|_| entry.value)
    }

    /// Insert or update. Returns true if the key was new.
    pub fn set(&mut self, key: StringId, hash: u32, value: Value) -> bool {
        if (self.count + 1) * TABLE_MAX_LOAD_DEN > self.entries.len() * TABLE_MAX_LOAD_NUM {
            let capacity = if self.entries.len() < 8 {
                8
            } else {
                self.entries.len() * 2
            };
            self.adjust_capacity(capacity);
        }

        let index = Self::find_entry(&self.entries, key, hash);
        let entry = &mut self.entries[index];
        let is_new = entry.key.is_none();
        if is_new && !entry.is_tombstone() {
            self.count += 1;
        }
        *entry = TableEntry {
            key: Some(key),
            hash,
            value,
        };
        is_new
    }

    /// Remove a key, leaving a tombstone. Returns true if it was present.
    pub fn delete(&mut self, key: StringId, hash: u32) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        let index = Self::find_entry(&self.entries, key, hash);
        let entry = &mut self.entries[index];
        if entry.key.is_none() {
            return false;
        }
        *entry = TableEntry {
            key: None,
            hash: 0,
            value: Value::Bool(true),
        };
        true
    }

    /// Copy every live entry into `dest` (shallow method inheritance and
    /// trait flattening both reduce to this).
    pub fn add_all_into(&self, dest: &mut Table) {
        for entry in &self.entries {
            if let Some(key) = entry.key {
                dest.set(key, entry.hash, entry.value);
            }
        }
    }

    /// Live (key, value) pairs in bucket order.
    pub fn iter(&self) -> impl Iterator<Item = (StringId, Value)> + '_ {
        self.entries
            .iter()
            .filter_map(|e| e.key.map(|k| (k, e.value)))
    }

    /// Live entries with cached hashes, for callers that re-insert elsewhere.
    pub fn entries(&self) -> impl Iterator<Item = (StringId, u32, Value)> + '_ {
        self.entries
            .iter()
            .filter_map(|e| e.key.map(|k| (k, e.hash, e.value)))
    }

    /// The live pair stored at or after bucket `start`, with its bucket index.
    /// Drives the runtime's `next` over the hash part.
    pub fn entry_at_or_after(&self, start: usize) -> Option<(usize, StringId, Value)> {
        self.entries
            .iter()
            .enumerate()
            .skip(start)
            .find_map(|(i, e)| e.key.map(|k| (i, k, e.value)))
    }

    /// Bucket index of `key`, if present.
    pub fn bucket_of(&self, key: StringId, hash: u32) -> Option<usize> {
        if self.entries.is_empty() {
            return None;
        }
        let index = Self::find_entry(&self.entries, key, hash);
        self.entries[index].key.map(|_| index)
    }

    /// Content lookup used by the string interner: find an existing key whose
    /// bytes equal `needle`. Probes with the precomputed hash and only falls
    /// back to byte comparison within the probe sequence.
    pub fn find_string(
        &self,
        strings: &Arena<GcString>,
        needle: &str,
        hash: u32,
    ) -> Option<StringId> {
        if self.entries.is_empty() {
            return None;
        }
        let mask = self.entries.len() - 1;
        let mut index = hash as usize & mask;
        loop {
            let entry = &self.entries[index];
            match entry.key {
                None => {
                    if !entry.is_tombstone() {
                        return None;
                    }
                }
                Some(key) => {
                    if entry.hash == hash {
                        if let Some(s) = strings.get(key.0) {
                            if &*s.chars == needle {
                                return Some(key);
                            }
                        }
                    }
                }
            }
            index = (index + 1) & mask;
        }
    }

    /// Weak-table sweep support: drop entries whose key string is unmarked.
    /// Must run after marking and before the string arena is swept.
    pub fn remove_white(&mut self, strings: &Arena<GcString>) {
        for i in 0..self.entries.len() {
            if let Some(key) = self.entries[i].key {
                let dead = strings.get(key.0).map(|s| !s.header.marked).unwrap_or(true);
                if dead {
                    self.entries[i] = TableEntry {
                        key: None,
                        hash: 0,
                        value: Value::Bool(true),
                    };
                }
            }
        }
    }
}
