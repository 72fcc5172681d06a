//! Interned strings and the string intern table.
//!
//! Every script string is allocated exactly once: interning hashes the
//! bytes (FNV-1a) and returns the existing allocation when the content
//! is already known. After interning, identity implies equality, so the
//! VM compares strings by pointer rather than by bytes.

use std::cell::Cell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

const FNV_OFFSET_BASIS: u32 = 2166136261;
const FNV_PRIME: u32 = 16777619;

/// FNV-1a hash over a byte slice.
pub(crate) fn hash_bytes(bytes: &[u8]) -> u32 {
    let mut hash = FNV_OFFSET_BASIS;
    for &b in bytes {
        hash ^= b as u32;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Backing storage for one interned string.
#[derive(Debug)]
struct StrData {
    /// FNV-1a hash of the bytes, cached for table bucket indexing
    hash: u32,
    /// The string content
    bytes: Box<str>,
    /// GC mark bit, set during root traversal
    mark: Cell<bool>,
}

/// A canonical, shared string allocation.
///
/// Equality is identity: two `InternedStr` values compare equal exactly
/// when they came from the same interner entry. The `Rc` strong count
/// plays the role of the reference count the original design tracked by
/// hand.
#[derive(Clone)]
pub struct InternedStr(Rc<StrData>);

impl InternedStr {
    fn new(s: &str) -> Self {
        InternedStr(Rc::new(StrData {
            hash: hash_bytes(s.as_bytes()),
            bytes: s.into(),
            mark: Cell::new(false),
        }))
    }

    /// The string content.
    pub fn as_str(&self) -> &str {
        &self.0.bytes
    }

    /// Byte length of the content.
    pub fn len(&self) -> usize {
        self.0.bytes.len()
    }

    /// Whether the content is empty. Note that the empty string is
    /// still truthy as a script value.
    pub fn is_empty(&self) -> bool {
        self.0.bytes.is_empty()
    }

    /// Cached FNV-1a hash of the content.
    pub fn hash(&self) -> u32 {
        self.0.hash
    }

    /// Identity comparison: true only for the same allocation.
    pub fn ptr_eq(&self, other: &InternedStr) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Set the GC mark bit.
    pub fn mark(&self) {
        self.0.mark.set(true);
    }

    /// Read the GC mark bit.
    pub fn is_marked(&self) -> bool {
        self.0.mark.get()
    }

    /// Clear the GC mark bit.
    pub fn clear_mark(&self) {
        self.0.mark.set(false);
    }

    /// Approximate heap footprint of this string in bytes.
    pub fn heap_size(&self) -> usize {
        std::mem::size_of::<StrData>() + self.0.bytes.len()
    }

    fn strong_count(&self) -> usize {
        Rc::strong_count(&self.0)
    }
}

impl PartialEq for InternedStr {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for InternedStr {}

impl std::hash::Hash for InternedStr {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        state.write_u32(self.0.hash);
    }
}

impl fmt::Debug for InternedStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InternedStr({:?})", self.as_str())
    }
}

impl fmt::Display for InternedStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The string intern table.
///
/// Buckets are keyed by the FNV-1a hash; a lookup walks the bucket
/// comparing length then bytes. The interner is a *weak* owner with
/// respect to garbage collection: a string kept alive only by the
/// interner itself is eligible for eviction during the sweep.
#[derive(Debug, Default)]
pub struct Interner {
    buckets: HashMap<u32, Vec<InternedStr>>,
    len: usize,
}

impl Interner {
    /// Create an empty intern table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an already-interned string by content.
    pub fn get(&self, s: &str) -> Option<InternedStr> {
        let hash = hash_bytes(s.as_bytes());
        let bucket = self.buckets.get(&hash)?;
        bucket
            .iter()
            .find(|i| i.len() == s.len() && i.as_str() == s)
            .cloned()
    }

    /// Intern a string, returning the canonical allocation.
    ///
    /// A hit returns the existing instance; a miss allocates and
    /// registers a new one.
    pub fn intern(&mut self, s: &str) -> InternedStr {
        if let Some(existing) = self.get(s) {
            return existing;
        }
        let interned = InternedStr::new(s);
        self.buckets
            .entry(interned.hash())
            .or_default()
            .push(interned.clone());
        self.len += 1;
        interned
    }

    /// Number of distinct interned strings.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Total heap footprint of every registered string.
    pub fn heap_size(&self) -> usize {
        self.buckets
            .values()
            .flat_map(|bucket| bucket.iter())
            .map(|s| s.heap_size())
            .sum()
    }

    /// Clear every mark bit ahead of a collection.
    pub fn clear_marks(&self) {
        for bucket in self.buckets.values() {
            for s in bucket {
                s.clear_mark();
            }
        }
    }

    /// Evict strings that survived marking by no root.
    ///
    /// A string is removed only when it is unmarked *and* the interner
    /// holds the last reference; a string still held by the host stays
    /// registered so future interning of the same content preserves
    /// identity. Returns the number of evicted strings and their total
    /// heap footprint.
    pub fn sweep_unmarked(&mut self) -> (usize, usize) {
        let mut freed = 0;
        let mut freed_bytes = 0;
        for bucket in self.buckets.values_mut() {
            bucket.retain(|s| {
                if !s.is_marked() && s.strong_count() == 1 {
                    freed += 1;
                    freed_bytes += s.heap_size();
                    false
                } else {
                    true
                }
            });
        }
        self.buckets.retain(|_, bucket| !bucket.is_empty());
        self.len -= freed;
        (freed, freed_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fnv1a_known_values() {
        // FNV-1a reference vectors
        assert_eq!(hash_bytes(b""), 0x811c9dc5);
        assert_eq!(hash_bytes(b"a"), 0xe40c292c);
    }

    #[test]
    fn test_intern_same_bytes_same_identity() {
        let mut interner = Interner::new();
        let a = interner.intern("position");
        let b = interner.intern("position");
        assert!(a.ptr_eq(&b));
        assert_eq!(interner.len(), 1);
    }

    #[test]
    fn test_intern_distinct_bytes_distinct_identity() {
        let mut interner = Interner::new();
        let a = interner.intern("x");
        let b = interner.intern("y");
        assert!(!a.ptr_eq(&b));
        assert_eq!(interner.len(), 2);
    }

    #[test]
    fn test_get_without_intern() {
        let mut interner = Interner::new();
        assert!(interner.get("missing").is_none());
        let a = interner.intern("present");
        assert!(interner.get("present").unwrap().ptr_eq(&a));
    }

    #[test]
    fn test_sweep_unmarked_evicts_orphans() {
        let mut interner = Interner::new();
        interner.intern("orphan");
        let kept = interner.intern("kept");

        interner.clear_marks();
        kept.mark();

        let (freed, freed_bytes) = interner.sweep_unmarked();
        assert_eq!(freed, 1);
        assert!(freed_bytes > 0);
        assert_eq!(interner.len(), 1);
        assert!(interner.get("orphan").is_none());
        assert!(interner.get("kept").is_some());
    }

    #[test]
    fn test_sweep_keeps_host_held_strings() {
        let mut interner = Interner::new();
        let held = interner.intern("held");

        interner.clear_marks();
        let (freed, _) = interner.sweep_unmarked();

        // Unmarked but still referenced from outside the interner.
        assert_eq!(freed, 0);
        assert!(interner.get("held").unwrap().ptr_eq(&held));
    }

    #[test]
    fn test_reintern_after_sweep_is_fresh_identity() {
        let mut interner = Interner::new();
        interner.intern("ghost");
        interner.clear_marks();
        interner.sweep_unmarked();

        let again = interner.intern("ghost");
        assert_eq!(again.as_str(), "ghost");
        assert_eq!(interner.len(), 1);
    }
}
