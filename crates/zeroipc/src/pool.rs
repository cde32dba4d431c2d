// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fixed-capacity object pool: a lock-free Treiber-stack free list over a
//! bump-allocated array of slots, handed out as stable integer handles.
//!
//! The original pool this is grounded on (`ShmPool`) links free slots
//! through an intrusive `next` pointer stored in the slot's own memory,
//! guarded by a POSIX semaphore. Two changes here: the free list is
//! CAS-based rather than semaphore-guarded (Pool is one of the lock-free
//! containers), and slot indices take the place of pointers, since a
//! slot's address differs across processes that map the segment at
//! different base addresses but its offset does not.
//!
//! The free-list head is a single `AtomicU64` packing a 32-bit generation
//! counter with the 32-bit head index, so a pop/push pair on the same
//! slot between a reader's load and its CAS (the ABA problem) is
//! detected: the generation changed even though the index came back
//! around to the same value.

use crate::error::{Error, Result};
use crate::segment::Segment;
use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

const NIL: u32 = u32::MAX;

fn pack(generation: u32, index: u32) -> u64 {
    (u64::from(generation) << 32) | u64::from(index)
}

fn unpack(head: u64) -> (u32, u32) {
    ((head >> 32) as u32, head as u32)
}

#[repr(C)]
struct Header {
    capacity: u64,
    free_head: AtomicU64,
    in_use: AtomicU64,
}

#[repr(C)]
struct Slot<T> {
    next: UnsafeCell<u32>,
    value: UnsafeCell<T>,
}

/// A fixed-capacity lock-free object pool living inside a segment.
/// Allocated objects are addressed by a stable `u32` handle (the slot
/// index), valid until the handle is freed.
pub struct Pool<'seg, T: Copy> {
    segment: &'seg Segment,
    offset: u64,
    capacity: u64,
    _marker: PhantomData<T>,
}

// SAFETY: every slot transition goes through the CAS on `free_head`;
// a slot's value is only touched by the handle holder that the free
// list most recently handed it to, and the free-list link is only
// touched while the slot is on the free list.
unsafe impl<T: Copy + Send> Send for Pool<'_, T> {}
unsafe impl<T: Copy + Send> Sync for Pool<'_, T> {}

impl<'seg, T: Copy> Pool<'seg, T> {
    /// Create-or-open: the first caller to name a pool with a nonzero
    /// `capacity` creates it; later callers passing `0` or the same
    /// capacity attach to the existing one; a different nonzero capacity
    /// fails with `Error::SizeMismatch` (§3 Lifecycle, testable
    /// property #10).
    pub fn create(segment: &'seg Segment, name: &str, capacity: usize) -> Result<Self> {
        if let Ok(existing) = Self::open(segment, name) {
            if capacity != 0 && capacity as u64 != existing.capacity {
                return Err(Error::SizeMismatch {
                    expected: existing.capacity,
                    actual: capacity as u64,
                });
            }
            return Ok(existing);
        }
        if capacity == 0 {
            return Err(Error::NotFound(name.to_string()));
        }
        if capacity as u64 >= u64::from(NIL) {
            return Err(Error::InvalidArgument("pool capacity too large".into()));
        }
        let header_size = std::mem::size_of::<Header>() as u64;
        let slot_size = std::mem::size_of::<Slot<T>>() as u64;
        let total = header_size + capacity as u64 * slot_size;
        let offset = segment.allocate(total, std::mem::align_of::<Header>() as u64)?;
        let elem_size = std::mem::size_of::<T>() as u64;
        segment
            .table()
            .add(name, offset, total, elem_size, capacity as u64)?;

        // SAFETY: offset..offset+total was just bump-allocated and is
        // exclusively owned here.
        unsafe {
            let header = segment.at(offset)?.cast::<Header>();
            (*header).capacity = capacity as u64;
            (*header).in_use = AtomicU64::new(0);
            (*header).free_head = AtomicU64::new(pack(0, 0));

            let slots = segment.at(offset + header_size)?.cast::<Slot<T>>();
            for i in 0..capacity {
                let next = if i + 1 < capacity { (i + 1) as u32 } else { NIL };
                *(*slots.add(i)).next.get() = next;
            }
        }

        Ok(Self {
            segment,
            offset,
            capacity: capacity as u64,
            _marker: PhantomData,
        })
    }

    /// Open an existing pool by name.
    pub fn open(segment: &'seg Segment, name: &str) -> Result<Self> {
        let entry = segment
            .find(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        // SAFETY: entry.offset was initialized by `create`.
        let capacity = unsafe {
            let header = segment.at(entry.offset)?.cast::<Header>();
            (*header).capacity
        };
        Ok(Self {
            segment,
            offset: entry.offset,
            capacity,
            _marker: PhantomData,
        })
    }

    fn header(&self) -> &Header {
        // SAFETY: offset was validated at create/open time.
        unsafe { &*self.segment.at(self.offset).unwrap().cast::<Header>() }
    }

    fn slot(&self, index: u32) -> &Slot<T> {
        let header_size = std::mem::size_of::<Header>() as u64;
        let slot_size = std::mem::size_of::<Slot<T>>() as u64;
        let ptr = self
            .segment
            .at(self.offset + header_size + u64::from(index) * slot_size)
            .unwrap()
            .cast::<Slot<T>>();
        // SAFETY: index < capacity for every caller below.
        unsafe { &*ptr }
    }

    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    #[must_use]
    pub fn len(&self) -> u64 {
        self.header().in_use.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.len() == self.capacity
    }

    /// Allocate a slot and initialize it with `value`, returning its
    /// handle. Fails with `Error::Full` if no slots remain.
    pub fn alloc(&self, value: T) -> Result<u32> {
        let header = self.header();
        loop {
            let head = header.free_head.load(Ordering::Acquire);
            let (generation, index) = unpack(head);
            if index == NIL {
                return Err(Error::Full);
            }
            let slot = self.slot(index);
            // SAFETY: this slot is still on the free list (not yet
            // claimed by anyone else) until the CAS below succeeds, so
            // reading its `next` link here is race-free with respect to
            // concurrent allocators: a loser simply retries on a new head.
            let next = unsafe { *slot.next.get() };
            let new_head = pack(generation.wrapping_add(1), next);
            if header
                .free_head
                .compare_exchange_weak(head, new_head, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                // SAFETY: this call uniquely won the CAS claiming `index`;
                // no other allocator can address this slot until it is
                // freed again.
                unsafe {
                    *slot.value.get() = value;
                }
                header.in_use.fetch_add(1, Ordering::Relaxed);
                return Ok(index);
            }
            std::hint::spin_loop();
        }
    }

    /// Read the value held by `handle`.
    pub fn get(&self, handle: u32) -> Result<T> {
        if u64::from(handle) >= self.capacity {
            return Err(Error::OutOfRange);
        }
        // SAFETY: caller is responsible for handle validity (not yet
        // freed); out-of-range indices were rejected above.
        Ok(unsafe { *self.slot(handle).value.get() })
    }

    /// Overwrite the value held by `handle`.
    pub fn set(&self, handle: u32, value: T) -> Result<()> {
        if u64::from(handle) >= self.capacity {
            return Err(Error::OutOfRange);
        }
        // SAFETY: see `get`.
        unsafe {
            *self.slot(handle).value.get() = value;
        }
        Ok(())
    }

    /// Return `handle`'s slot to the free list.
    pub fn dealloc(&self, handle: u32) -> Result<()> {
        if u64::from(handle) >= self.capacity {
            return Err(Error::OutOfRange);
        }
        let header = self.header();
        let slot = self.slot(handle);
        loop {
            let head = header.free_head.load(Ordering::Acquire);
            let (generation, index) = unpack(head);
            // SAFETY: the caller guarantees `handle` is not already free
            // and not concurrently freed elsewhere (a double-free is
            // caller misuse, not a data race this type can detect).
            unsafe {
                *slot.next.get() = index;
            }
            let new_head = pack(generation.wrapping_add(1), handle);
            if header
                .free_head
                .compare_exchange_weak(head, new_head, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                header.in_use.fetch_sub(1, Ordering::Relaxed);
                return Ok(());
            }
            std::hint::spin_loop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::TableCapacity;
    use std::sync::Arc;
    use std::thread;

    fn unique_name() -> String {
        use std::time::{SystemTime, UNIX_EPOCH};
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        format!("/zeroipc_pool_test_{ts}")
    }

    #[test]
    fn alloc_dealloc_cycle() {
        let name = unique_name();
        let seg = Segment::create(&name, 65536, TableCapacity::Default).unwrap();
        let pool = Pool::<u64>::create(&seg, "p", 4).unwrap();

        let a = pool.alloc(10).unwrap();
        let b = pool.alloc(20).unwrap();
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.get(a).unwrap(), 10);
        assert_eq!(pool.get(b).unwrap(), 20);

        pool.dealloc(a).unwrap();
        assert_eq!(pool.len(), 1);
        let c = pool.alloc(30).unwrap();
        assert_eq!(c, a); // reused slot
        assert_eq!(pool.get(c).unwrap(), 30);

        Segment::unlink(&name).ok();
    }

    #[test]
    fn exhaustion_reports_full() {
        let name = unique_name();
        let seg = Segment::create(&name, 65536, TableCapacity::Default).unwrap();
        let pool = Pool::<u8>::create(&seg, "p", 2).unwrap();
        pool.alloc(1).unwrap();
        pool.alloc(2).unwrap();
        assert!(matches!(pool.alloc(3), Err(Error::Full)));
        Segment::unlink(&name).ok();
    }

    #[test]
    fn concurrent_alloc_dealloc_yields_distinct_handles() {
        let name = unique_name();
        let seg = Arc::new(Segment::create(&name, 1 << 20, TableCapacity::Default).unwrap());
        let capacity = 64usize;
        {
            Pool::<u64>::create(&seg, "p", capacity).unwrap();
        }

        let threads = 8usize;
        let per_thread = 500u64;
        let mut handles = Vec::new();
        for _ in 0..threads {
            let seg = Arc::clone(&seg);
            handles.push(thread::spawn(move || {
                let pool = Pool::<u64>::open(&seg, "p").unwrap();
                for i in 0..per_thread {
                    loop {
                        match pool.alloc(i) {
                            Ok(h) => {
                                pool.dealloc(h).unwrap();
                                break;
                            }
                            Err(Error::Full) => std::thread::yield_now(),
                            Err(e) => panic!("unexpected error: {e}"),
                        }
                    }
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        let pool = Pool::<u64>::open(&seg, "p").unwrap();
        assert!(pool.is_empty());
        Segment::unlink(&name).ok();
    }

    #[test]
    fn create_or_open_matches_property_10() {
        let name = unique_name();
        let seg = Segment::create(&name, 65536, TableCapacity::Default).unwrap();

        let first = Pool::<u32>::create(&seg, "p", 4).unwrap();
        let h = first.alloc(11).unwrap();

        let zero = Pool::<u32>::create(&seg, "p", 0).unwrap();
        assert_eq!(zero.get(h).unwrap(), 11);

        let matching = Pool::<u32>::create(&seg, "p", 4).unwrap();
        assert_eq!(matching.capacity(), 4);

        assert!(matches!(
            Pool::<u32>::create(&seg, "p", 9),
            Err(Error::SizeMismatch { .. })
        ));
        assert!(matches!(
            Pool::<u32>::create(&seg, "missing", 0),
            Err(Error::NotFound(_))
        ));

        Segment::unlink(&name).ok();
    }
}
