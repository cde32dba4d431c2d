// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bounded hash map (and, specialized to a zero-width value, set) using
//! open addressing with linear probing and tombstones.
//!
//! Header: `{bucket_count, size, version, max_load_factor}`. Insert fails
//! once `size / bucket_count` would exceed `max_load_factor` rather than
//! growing the table, since the bucket array is fixed-size shared memory
//! allocated at creation time. `version` increments on every structural
//! change (insert/erase/clear) so a caller iterating with `for_each` can
//! detect a concurrent mutation.
//!
//! Hashing uses [`PassthroughHasher`], not `DefaultHasher`/`RandomState`:
//! the original `shm_hash_map<Key, Value>` this is grounded on buckets
//! with `std::hash<Key>{}(key) % bucket_count`, and libstdc++'s
//! `std::hash` for an integral key is the identity function. A Rust peer
//! that instead scrambled integer keys through SipHash would compute a
//! different bucket than a C++ peer attached to the same named map for
//! the same key, breaking the cross-language discovery this whole crate
//! exists for. `PassthroughHasher` reproduces the identity behavior for
//! every primitive integer type and falls back to an FNV-1a byte mix
//! only for composite keys, which has no C++ counterpart to match since
//! the original's `Hash` template parameter is only ever instantiated
//! with integral keys in its own call sites.

use crate::error::{Error, Result};
use crate::segment::Segment;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// A hasher whose output is the identity function for every primitive
/// integer type, matching libstdc++'s `std::hash<integral>` so integer
/// keys bucket identically in a C++ peer and this Rust peer. Composite
/// (derived) keys fall back to a plain FNV-1a byte mix, since the
/// original has no equivalent case to match.
#[derive(Default)]
struct PassthroughHasher {
    state: u64,
}

impl Hasher for PassthroughHasher {
    fn finish(&self) -> u64 {
        self.state
    }

    fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.state ^= u64::from(b);
            self.state = self.state.wrapping_mul(0x0000_0100_0000_01B3);
        }
    }

    fn write_u8(&mut self, i: u8) {
        self.state = u64::from(i);
    }
    fn write_u16(&mut self, i: u16) {
        self.state = u64::from(i);
    }
    fn write_u32(&mut self, i: u32) {
        self.state = u64::from(i);
    }
    fn write_u64(&mut self, i: u64) {
        self.state = i;
    }
    fn write_usize(&mut self, i: usize) {
        self.state = i as u64;
    }
    fn write_i8(&mut self, i: i8) {
        self.state = i as u64;
    }
    fn write_i16(&mut self, i: i16) {
        self.state = i as u64;
    }
    fn write_i32(&mut self, i: i32) {
        self.state = i as u64;
    }
    fn write_i64(&mut self, i: i64) {
        self.state = i as u64;
    }
    fn write_isize(&mut self, i: isize) {
        self.state = i as u64;
    }
}

const EMPTY: u32 = 0;
const OCCUPIED: u32 = 1;
const TOMBSTONE: u32 = 2;

const DEFAULT_MAX_LOAD_PERMILLE: u32 = 750;

#[repr(C)]
struct Header {
    bucket_count: u64,
    size: AtomicU64,
    version: AtomicU64,
    max_load_permille: u32,
    _pad: u32,
}

#[repr(C)]
struct Bucket<K, V> {
    state: AtomicU32,
    key: K,
    value: V,
}

/// A bounded hash map living inside a segment.
pub struct Map<'seg, K: Copy + Eq + Hash, V: Copy> {
    segment: &'seg Segment,
    offset: u64,
    bucket_count: u64,
    _marker: PhantomData<(K, V)>,
}

// SAFETY: every bucket transition is gated by a CAS on its state word;
// the key/value fields are only written by whichever writer won that
// CAS, and only read once a later loader observes OCCUPIED.
unsafe impl<K: Copy + Eq + Hash + Send, V: Copy + Send> Send for Map<'_, K, V> {}
unsafe impl<K: Copy + Eq + Hash + Send, V: Copy + Send> Sync for Map<'_, K, V> {}

impl<'seg, K: Copy + Eq + Hash, V: Copy> Map<'seg, K, V> {
    /// Create-or-open: the first caller to name a map with a nonzero
    /// `capacity` creates it (rounded up to the next power-of-two bucket
    /// count at the default load factor); later callers passing `0` or a
    /// capacity that rounds to the same bucket count attach to the
    /// existing one; a capacity that rounds to a different bucket count
    /// fails with `Error::SizeMismatch` (§3 Lifecycle, testable
    /// property #10). Bucket count, not the raw requested capacity, is
    /// the on-wire quantity, so that is what this check compares.
    pub fn create(segment: &'seg Segment, name: &str, capacity: usize) -> Result<Self> {
        if capacity != 0 {
            if let Ok(existing) = Self::open(segment, name) {
                let wanted = Self::rounded_bucket_count(capacity);
                if wanted != existing.bucket_count {
                    return Err(Error::SizeMismatch {
                        expected: existing.bucket_count,
                        actual: wanted,
                    });
                }
                return Ok(existing);
            }
        } else {
            return Self::open(segment, name)
                .map_err(|_| Error::NotFound(name.to_string()));
        }

        let bucket_count = Self::rounded_bucket_count(capacity);

        let header_size = std::mem::size_of::<Header>() as u64;
        let bucket_size = std::mem::size_of::<Bucket<K, V>>() as u64;
        let total = header_size + bucket_count * bucket_size;
        let offset = segment.allocate(total, std::mem::align_of::<Header>() as u64)?;
        let elem_size = (std::mem::size_of::<K>() + std::mem::size_of::<V>()) as u64;
        segment
            .table()
            .add(name, offset, total, elem_size, capacity as u64)?;

        // SAFETY: offset..offset+total was just bump-allocated and is
        // exclusively owned here.
        unsafe {
            let header = segment.at(offset)?.cast::<Header>();
            (*header).bucket_count = bucket_count;
            (*header).size = AtomicU64::new(0);
            (*header).version = AtomicU64::new(0);
            (*header).max_load_permille = DEFAULT_MAX_LOAD_PERMILLE;

            let buckets = segment.at(offset + header_size)?.cast::<Bucket<K, V>>();
            for i in 0..bucket_count {
                (*buckets.add(i as usize)).state = AtomicU32::new(EMPTY);
            }
        }

        Ok(Self {
            segment,
            offset,
            bucket_count,
            _marker: PhantomData,
        })
    }

    fn rounded_bucket_count(capacity: usize) -> u64 {
        let mut bucket_count: u64 = 1;
        while (bucket_count as f64) < capacity as f64 * 1.5 {
            bucket_count <<= 1;
        }
        bucket_count
    }

    /// Open an existing map by name.
    pub fn open(segment: &'seg Segment, name: &str) -> Result<Self> {
        let entry = segment
            .find(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        // SAFETY: entry.offset was initialized by `create`.
        let bucket_count = unsafe {
            let header = segment.at(entry.offset)?.cast::<Header>();
            (*header).bucket_count
        };
        Ok(Self {
            segment,
            offset: entry.offset,
            bucket_count,
            _marker: PhantomData,
        })
    }

    fn header(&self) -> &Header {
        // SAFETY: offset was validated at create/open time.
        unsafe { &*self.segment.at(self.offset).unwrap().cast::<Header>() }
    }

    fn bucket(&self, index: u64) -> &Bucket<K, V> {
        let header_size = std::mem::size_of::<Header>() as u64;
        let bucket_size = std::mem::size_of::<Bucket<K, V>>() as u64;
        let ptr = self
            .segment
            .at(self.offset + header_size + index * bucket_size)
            .unwrap()
            .cast::<Bucket<K, V>>();
        // SAFETY: index < bucket_count for every caller below.
        unsafe { &*ptr }
    }

    #[allow(clippy::mut_from_ref)]
    fn bucket_mut(&self, index: u64) -> &mut Bucket<K, V> {
        let header_size = std::mem::size_of::<Header>() as u64;
        let bucket_size = std::mem::size_of::<Bucket<K, V>>() as u64;
        let ptr = self
            .segment
            .at(self.offset + header_size + index * bucket_size)
            .unwrap()
            .cast::<Bucket<K, V>>();
        // SAFETY: index < bucket_count; exclusive field access is gated
        // by the CAS on `state` performed by every caller.
        unsafe { &mut *ptr }
    }

    fn hash_key(&self, key: &K) -> u64 {
        let mut hasher = PassthroughHasher::default();
        key.hash(&mut hasher);
        hasher.finish() % self.bucket_count
    }

    #[must_use]
    pub fn bucket_count(&self) -> u64 {
        self.bucket_count
    }

    #[must_use]
    pub fn len(&self) -> u64 {
        self.header().size.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn load_factor(&self) -> f64 {
        self.len() as f64 / self.bucket_count as f64
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.header().version.load(Ordering::Acquire)
    }

    /// Insert a new key/value pair. Fails with `Error::Full` at the load
    /// factor ceiling, `Error::AlreadyExists` if the key is present.
    pub fn insert(&self, key: K, value: V) -> Result<()> {
        let header = self.header();
        let max_load = header.max_load_permille as u64;
        if header.size.load(Ordering::Acquire) * 1000 >= self.bucket_count * max_load {
            return Err(Error::Full);
        }

        let start = self.hash_key(&key);
        let mut idx = start;
        loop {
            let bucket = self.bucket(idx);
            let state = bucket.state.load(Ordering::Acquire);

            if state == EMPTY || state == TOMBSTONE {
                let expected = state;
                if bucket
                    .state
                    .compare_exchange_weak(expected, OCCUPIED, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
                {
                    let bucket = self.bucket_mut(idx);
                    bucket.key = key;
                    bucket.value = value;
                    header.size.fetch_add(1, Ordering::Relaxed);
                    header.version.fetch_add(1, Ordering::Release);
                    return Ok(());
                }
                continue;
            }

            if state == OCCUPIED && bucket.key == key {
                return Err(Error::AlreadyExists(String::new()));
            }

            idx = (idx + 1) % self.bucket_count;
            if idx == start {
                return Err(Error::Full);
            }
        }
    }

    /// Look up a key, returning a copy of its value.
    #[must_use]
    pub fn find(&self, key: &K) -> Option<V> {
        let start = self.hash_key(key);
        let mut idx = start;
        loop {
            let bucket = self.bucket(idx);
            let state = bucket.state.load(Ordering::Acquire);
            if state == EMPTY {
                return None;
            }
            if state == OCCUPIED && bucket.key == *key {
                return Some(bucket.value);
            }
            idx = (idx + 1) % self.bucket_count;
            if idx == start {
                return None;
            }
        }
    }

    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.find(key).is_some()
    }

    /// Overwrite the value for an existing key.
    pub fn update(&self, key: &K, value: V) -> Result<()> {
        let start = self.hash_key(key);
        let mut idx = start;
        loop {
            let bucket = self.bucket(idx);
            let state = bucket.state.load(Ordering::Acquire);
            if state == EMPTY {
                return Err(Error::NotFound(String::new()));
            }
            if state == OCCUPIED && bucket.key == *key {
                self.bucket_mut(idx).value = value;
                self.header().version.fetch_add(1, Ordering::Release);
                return Ok(());
            }
            idx = (idx + 1) % self.bucket_count;
            if idx == start {
                return Err(Error::NotFound(String::new()));
            }
        }
    }

    /// Remove a key, tombstoning its bucket to preserve the probe chain
    /// for any key that hashed past it.
    pub fn erase(&self, key: &K) -> Result<()> {
        let start = self.hash_key(key);
        let mut idx = start;
        loop {
            let bucket = self.bucket(idx);
            let state = bucket.state.load(Ordering::Acquire);
            if state == EMPTY {
                return Err(Error::NotFound(String::new()));
            }
            if state == OCCUPIED && bucket.key == *key {
                loop {
                    if bucket
                        .state
                        .compare_exchange_weak(OCCUPIED, TOMBSTONE, Ordering::AcqRel, Ordering::Relaxed)
                        .is_ok()
                    {
                        self.header().size.fetch_sub(1, Ordering::Relaxed);
                        self.header().version.fetch_add(1, Ordering::Release);
                        return Ok(());
                    }
                    if bucket.state.load(Ordering::Acquire) != OCCUPIED {
                        return Err(Error::NotFound(String::new()));
                    }
                }
            }
            idx = (idx + 1) % self.bucket_count;
            if idx == start {
                return Err(Error::NotFound(String::new()));
            }
        }
    }

    /// Visit every occupied entry. Not a consistent snapshot under
    /// concurrent mutation; `version()` can be compared before and after
    /// to detect interference.
    pub fn for_each(&self, mut f: impl FnMut(K, V)) {
        for i in 0..self.bucket_count {
            let bucket = self.bucket(i);
            if bucket.state.load(Ordering::Acquire) == OCCUPIED {
                f(bucket.key, bucket.value);
            }
        }
    }

    /// Reset every bucket to empty. Not safe to call concurrently with
    /// other writers.
    pub fn clear(&self) {
        let header = self.header();
        for i in 0..self.bucket_count {
            self.bucket(i).state.store(EMPTY, Ordering::Relaxed);
        }
        header.size.store(0, Ordering::Release);
        header.version.fetch_add(1, Ordering::Release);
    }
}

/// A set is a map specialized to a zero-width value.
pub type Set<'seg, K> = Map<'seg, K, ()>;

impl<'seg, K: Copy + Eq + Hash> Map<'seg, K, ()> {
    /// Insert an element into a set.
    pub fn insert_elem(&self, key: K) -> Result<()> {
        self.insert(key, ())
    }
}

/// Union of `a` and `b`, written into a newly created set named
/// `result_name` in `segment`.
pub fn union<'seg, K: Copy + Eq + Hash>(
    segment: &'seg Segment,
    result_name: &str,
    a: &Set<K>,
    b: &Set<K>,
) -> Result<Set<'seg, K>> {
    let capacity = (a.len() + b.len()).max(1) as usize;
    let result = Set::create(segment, result_name, capacity)?;
    a.for_each(|k, _| {
        let _ = result.insert_elem(k);
    });
    b.for_each(|k, _| {
        let _ = result.insert_elem(k);
    });
    Ok(result)
}

/// Intersection of `a` and `b`, iterating the smaller operand.
pub fn intersection<'seg, K: Copy + Eq + Hash>(
    segment: &'seg Segment,
    result_name: &str,
    a: &Set<K>,
    b: &Set<K>,
) -> Result<Set<'seg, K>> {
    let (smaller, larger) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let result = Set::create(segment, result_name, smaller.len().max(1) as usize)?;
    smaller.for_each(|k, _| {
        if larger.contains(&k) {
            let _ = result.insert_elem(k);
        }
    });
    Ok(result)
}

/// Elements present in `a` but not in `b`.
pub fn difference<'seg, K: Copy + Eq + Hash>(
    segment: &'seg Segment,
    result_name: &str,
    a: &Set<K>,
    b: &Set<K>,
) -> Result<Set<'seg, K>> {
    let result = Set::create(segment, result_name, a.len().max(1) as usize)?;
    a.for_each(|k, _| {
        if !b.contains(&k) {
            let _ = result.insert_elem(k);
        }
    });
    Ok(result)
}

/// Whether every element of `a` is present in `b`.
#[must_use]
pub fn is_subset<K: Copy + Eq + Hash>(a: &Set<K>, b: &Set<K>) -> bool {
    if a.len() > b.len() {
        return false;
    }
    let mut subset = true;
    a.for_each(|k, _| {
        if !b.contains(&k) {
            subset = false;
        }
    });
    subset
}

/// Whether `a` contains every element of `b`.
#[must_use]
pub fn is_superset<K: Copy + Eq + Hash>(a: &Set<K>, b: &Set<K>) -> bool {
    is_subset(b, a)
}

/// Whether `a` and `b` share no elements.
#[must_use]
pub fn is_disjoint<K: Copy + Eq + Hash>(a: &Set<K>, b: &Set<K>) -> bool {
    let (smaller, larger) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let mut disjoint = true;
    smaller.for_each(|k, _| {
        if larger.contains(&k) {
            disjoint = false;
        }
    });
    disjoint
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::TableCapacity;

    fn unique_name() -> String {
        use std::time::{SystemTime, UNIX_EPOCH};
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        format!("/zeroipc_map_test_{ts}")
    }

    #[test]
    fn passthrough_hasher_is_identity_for_integers() {
        // Mirrors libstdc++'s std::hash<integral>, which the original
        // shm_hash_map relies on for its default Hash parameter: a C++
        // and a Rust peer attached to the same named map must compute
        // the same bucket for the same integer key.
        let mut h = PassthroughHasher::default();
        42u64.hash(&mut h);
        assert_eq!(h.finish(), 42);

        let mut h = PassthroughHasher::default();
        7u32.hash(&mut h);
        assert_eq!(h.finish(), 7);
    }

    #[test]
    fn tombstone_preserves_probe_chain_scenario() {
        // S4: bucket_count 8 (requested capacity chosen so the map
        // rounds to 8 buckets). Insert (0,100) (8,200) (16,300) so 8 and
        // 16 both hash to bucket 0 and probe forward; erase(8); find(16)
        // must still succeed through the tombstone left at 8's bucket;
        // insert(24,400) reuses a slot; final size is 3.
        let name = unique_name();
        let seg = Segment::create(&name, 1 << 20, TableCapacity::Default).unwrap();
        let m = Map::<u64, u64>::create(&seg, "m", 5).unwrap();
        assert_eq!(m.bucket_count(), 8);

        m.insert(0, 100).unwrap();
        m.insert(8, 200).unwrap();
        m.insert(16, 300).unwrap();

        m.erase(&8).unwrap();
        assert_eq!(m.find(&16), Some(300));
        assert_eq!(m.find(&8), None);

        m.insert(24, 400).unwrap();
        assert_eq!(m.find(&24), Some(400));
        assert_eq!(m.len(), 3);

        Segment::unlink(&name).ok();
    }

    #[test]
    fn duplicate_insert_rejected() {
        let name = unique_name();
        let seg = Segment::create(&name, 65536, TableCapacity::Default).unwrap();
        let m = Map::<u32, u32>::create(&seg, "m", 4).unwrap();
        m.insert(1, 10).unwrap();
        assert!(matches!(m.insert(1, 20), Err(Error::AlreadyExists(_))));
    }

    #[test]
    fn set_algebra_operations() {
        let name = unique_name();
        let seg = Segment::create(&name, 1 << 20, TableCapacity::Default).unwrap();
        let a = Set::<u32>::create(&seg, "a", 8).unwrap();
        let b = Set::<u32>::create(&seg, "b", 8).unwrap();
        for v in [1, 2, 3] {
            a.insert_elem(v).unwrap();
        }
        for v in [2, 3, 4] {
            b.insert_elem(v).unwrap();
        }

        let u = union(&seg, "u", &a, &b).unwrap();
        assert_eq!(u.len(), 4);

        let i = intersection(&seg, "i", &a, &b).unwrap();
        assert_eq!(i.len(), 2);
        assert!(i.contains(&2) && i.contains(&3));

        let d = difference(&seg, "d", &a, &b).unwrap();
        assert_eq!(d.len(), 1);
        assert!(d.contains(&1));

        assert!(!is_subset(&a, &b));
        assert!(!is_superset(&a, &b));
        assert!(!is_disjoint(&a, &b));

        Segment::unlink(&name).ok();
    }

    #[test]
    fn create_or_open_matches_property_10() {
        let name = unique_name();
        let seg = Segment::create(&name, 1 << 20, TableCapacity::Default).unwrap();

        let first = Map::<u32, u32>::create(&seg, "m", 5).unwrap();
        first.insert(1, 100).unwrap();

        let zero = Map::<u32, u32>::create(&seg, "m", 0).unwrap();
        assert_eq!(zero.find(&1), Some(100));

        // 6 rounds to the same bucket count (8) as 5, so it reattaches.
        let matching = Map::<u32, u32>::create(&seg, "m", 6).unwrap();
        assert_eq!(matching.bucket_count(), 8);

        // a capacity that forces a different bucket count is rejected.
        assert!(matches!(
            Map::<u32, u32>::create(&seg, "m", 100),
            Err(Error::SizeMismatch { .. })
        ));
        assert!(matches!(
            Map::<u32, u32>::create(&seg, "missing", 0),
            Err(Error::NotFound(_))
        ));

        Segment::unlink(&name).ok();
    }
}
