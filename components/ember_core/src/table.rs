//! Open-hash tables with separate chaining.
//!
//! Tables bucket entries by the key's cached FNV-1a hash masked against
//! a power-of-two capacity. Collisions chain through the entry's `next`
//! link. Capacity starts at 8 or above and doubles (with a full rehash)
//! before an insert would push the load factor past 0.75.
//!
//! Keys are always interned strings: the VM normalizes every key value
//! through its printed form before interning, so a numeric key and a
//! string key with the same printed form address the same slot.

use std::fmt;

use crate::string::InternedStr;
use crate::value::Value;

/// Minimum bucket count for a fresh table.
const MIN_CAPACITY: usize = 8;

/// A generation-checked reference to a heap table.
///
/// The heap recycles table slots; the generation field is bumped on
/// every free so a handle held across a collection that reclaimed its
/// table is detectably stale instead of silently aliasing a new table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TableHandle {
    /// Slot index in the heap
    pub index: u32,
    /// Slot generation the handle was issued for
    pub generation: u32,
}

impl TableHandle {
    /// Create a handle for a slot and generation.
    pub fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }
}

impl fmt::Display for TableHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.index, self.generation)
    }
}

/// One key/value pair in a bucket chain.
#[derive(Debug, Clone)]
struct Entry {
    key: InternedStr,
    value: Value,
    next: Option<Box<Entry>>,
}

/// An open-hash table mapping interned-string keys to values.
#[derive(Debug, Clone, Default)]
pub struct Table {
    buckets: Vec<Option<Box<Entry>>>,
    len: usize,
}

/// Round a capacity hint up to a power of two, clamped to the minimum.
fn round_capacity(hint: usize) -> usize {
    hint.max(MIN_CAPACITY).next_power_of_two()
}

impl Table {
    /// Create an empty table with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(MIN_CAPACITY)
    }

    /// Create an empty table with at least the given bucket count.
    pub fn with_capacity(hint: usize) -> Self {
        let capacity = round_capacity(hint);
        Self {
            buckets: (0..capacity).map(|_| None).collect(),
            len: 0,
        }
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Current bucket count (always a power of two).
    pub fn capacity(&self) -> usize {
        self.buckets.len()
    }

    fn bucket_index(&self, key: &InternedStr) -> usize {
        (key.hash() as usize) & (self.buckets.len() - 1)
    }

    /// Insert or update an entry. Returns `true` when a new key was
    /// added, `false` when an existing key was overwritten.
    ///
    /// The resize check runs *before* the insert so the load factor
    /// never exceeds 0.75.
    pub fn set(&mut self, key: InternedStr, value: Value) -> bool {
        if !self.has(&key) && (self.len + 1) * 4 > self.capacity() * 3 {
            self.resize();
        }

        let index = self.bucket_index(&key);
        let mut slot = &mut self.buckets[index];
        while let Some(entry) = slot {
            if entry.key.ptr_eq(&key) {
                entry.value = value;
                return false;
            }
            slot = &mut entry.next;
        }

        let index = self.bucket_index(&key);
        let head = self.buckets[index].take();
        self.buckets[index] = Some(Box::new(Entry {
            key,
            value,
            next: head,
        }));
        self.len += 1;
        true
    }

    /// Look up a value by key.
    pub fn get(&self, key: &InternedStr) -> Option<&Value> {
        let index = self.bucket_index(key);
        let mut slot = self.buckets[index].as_deref();
        while let Some(entry) = slot {
            if entry.key.ptr_eq(key) {
                return Some(&entry.value);
            }
            slot = entry.next.as_deref();
        }
        None
    }

    /// Whether a key is present.
    pub fn has(&self, key: &InternedStr) -> bool {
        self.get(key).is_some()
    }

    /// Remove an entry. Returns `true` when the key was present.
    pub fn remove(&mut self, key: &InternedStr) -> bool {
        fn unlink(slot: &mut Option<Box<Entry>>, key: &InternedStr) -> bool {
            match slot {
                None => false,
                Some(entry) if entry.key.ptr_eq(key) => {
                    let next = entry.next.take();
                    *slot = next;
                    true
                }
                Some(entry) => unlink(&mut entry.next, key),
            }
        }

        let index = self.bucket_index(key);
        if unlink(&mut self.buckets[index], key) {
            self.len -= 1;
            true
        } else {
            false
        }
    }

    /// Visit every entry (used by the GC mark phase).
    pub fn for_each(&self, mut f: impl FnMut(&InternedStr, &Value)) {
        for bucket in &self.buckets {
            let mut slot = bucket.as_deref();
            while let Some(entry) = slot {
                f(&entry.key, &entry.value);
                slot = entry.next.as_deref();
            }
        }
    }

    /// Double the capacity and rehash every entry.
    fn resize(&mut self) {
        let new_capacity = self.capacity() * 2;
        let old_buckets = std::mem::replace(
            &mut self.buckets,
            (0..new_capacity).map(|_| None).collect(),
        );

        for bucket in old_buckets {
            let mut slot = bucket;
            while let Some(mut entry) = slot {
                slot = entry.next.take();
                let index = (entry.key.hash() as usize) & (new_capacity - 1);
                entry.next = self.buckets[index].take();
                self.buckets[index] = Some(entry);
            }
        }
    }

    /// Approximate heap footprint in bytes: bucket array plus entries.
    pub fn heap_size(&self) -> usize {
        std::mem::size_of::<Table>()
            + self.buckets.len() * std::mem::size_of::<Option<Box<Entry>>>()
            + self.len * std::mem::size_of::<Entry>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::string::Interner;

    #[test]
    fn test_capacity_rounding() {
        assert_eq!(Table::new().capacity(), 8);
        assert_eq!(Table::with_capacity(0).capacity(), 8);
        assert_eq!(Table::with_capacity(9).capacity(), 16);
        assert_eq!(Table::with_capacity(64).capacity(), 64);
    }

    #[test]
    fn test_set_get_overwrite() {
        let mut strings = Interner::new();
        let mut table = Table::new();
        let key = strings.intern("hp");

        assert!(table.set(key.clone(), Value::Number(100.0)));
        assert_eq!(table.get(&key), Some(&Value::Number(100.0)));

        // Overwrite keeps the size stable.
        assert!(!table.set(key.clone(), Value::Number(50.0)));
        assert_eq!(table.get(&key), Some(&Value::Number(50.0)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_remove_decrements_size() {
        let mut strings = Interner::new();
        let mut table = Table::new();
        let key = strings.intern("mana");

        table.set(key.clone(), Value::Number(30.0));
        assert_eq!(table.len(), 1);
        assert!(table.has(&key));

        assert!(table.remove(&key));
        assert!(!table.has(&key));
        assert_eq!(table.len(), 0);

        // Removing again is a no-op.
        assert!(!table.remove(&key));
    }

    #[test]
    fn test_many_keys_across_resizes() {
        let mut strings = Interner::new();
        let mut table = Table::new();

        let keys: Vec<_> = (0..100).map(|i| strings.intern(&format!("k{}", i))).collect();
        for (i, key) in keys.iter().enumerate() {
            table.set(key.clone(), Value::Number(i as f64));
        }

        assert_eq!(table.len(), 100);
        assert!(table.capacity() >= 128);
        assert!(table.capacity().is_power_of_two());

        for (i, key) in keys.iter().enumerate() {
            assert_eq!(table.get(key), Some(&Value::Number(i as f64)));
        }
    }

    #[test]
    fn test_load_factor_bound() {
        let mut strings = Interner::new();
        let mut table = Table::new();
        for i in 0..64 {
            table.set(strings.intern(&format!("f{}", i)), Value::Nil);
            assert!(table.len() * 4 <= table.capacity() * 3);
        }
    }

    #[test]
    fn test_for_each_visits_all() {
        let mut strings = Interner::new();
        let mut table = Table::new();
        for i in 0..20 {
            table.set(strings.intern(&format!("v{}", i)), Value::Number(i as f64));
        }

        let mut seen = 0;
        table.for_each(|_, _| seen += 1);
        assert_eq!(seen, 20);
    }
}
