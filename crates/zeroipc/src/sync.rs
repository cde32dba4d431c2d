// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Cross-process synchronization primitives: counting semaphore, latch,
//! and reusable barrier, all built on the futex wrapper in
//! [`crate::futex`].
//!
//! Each primitive follows the same create/open pattern as the
//! containers: its state lives in a named, table-registered allocation
//! inside a [`Segment`], so any process that can open the segment can
//! attach to the same semaphore/latch/barrier by name.

use crate::error::{Error, Result};
use crate::futex;
use crate::segment::Segment;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

#[repr(C)]
struct SemaphoreHeader {
    count: AtomicU32,
    waiting: AtomicU32,
    max_count: u32,
    _pad: u32,
}

/// A cross-process counting semaphore.
pub struct Semaphore<'seg> {
    segment: &'seg Segment,
    offset: u64,
}

impl<'seg> Semaphore<'seg> {
    /// Create a semaphore starting at `initial_count`. `max_count = 0`
    /// means unbounded; otherwise `release` fails once `count` would
    /// exceed it.
    pub fn create(
        segment: &'seg Segment,
        name: &str,
        initial_count: u32,
        max_count: u32,
    ) -> Result<Self> {
        if max_count != 0 && initial_count > max_count {
            return Err(Error::InvalidArgument(
                "initial_count exceeds max_count".into(),
            ));
        }
        let size = std::mem::size_of::<SemaphoreHeader>() as u64;
        let offset = segment.allocate(size, std::mem::align_of::<SemaphoreHeader>() as u64)?;
        segment.table().add(name, offset, size, 0, 0)?;

        // SAFETY: offset..offset+size was just bump-allocated and is
        // exclusively owned here.
        unsafe {
            let header = segment.at(offset)?.cast::<SemaphoreHeader>();
            (*header).count = AtomicU32::new(initial_count);
            (*header).waiting = AtomicU32::new(0);
            (*header).max_count = max_count;
        }

        Ok(Self { segment, offset })
    }

    /// Open an existing semaphore by name.
    pub fn open(segment: &'seg Segment, name: &str) -> Result<Self> {
        let entry = segment
            .find(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        Ok(Self {
            segment,
            offset: entry.offset,
        })
    }

    fn header(&self) -> &SemaphoreHeader {
        // SAFETY: offset was validated at create/open time.
        unsafe {
            &*self
                .segment
                .at(self.offset)
                .unwrap()
                .cast::<SemaphoreHeader>()
        }
    }

    #[must_use]
    pub fn count(&self) -> u32 {
        self.header().count.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn waiting(&self) -> u32 {
        self.header().waiting.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn max_count(&self) -> u32 {
        self.header().max_count
    }

    /// Acquire a permit without blocking. Returns `true` if one was
    /// available and claimed.
    pub fn try_acquire(&self) -> bool {
        let header = self.header();
        loop {
            let c = header.count.load(Ordering::Acquire);
            if c == 0 {
                return false;
            }
            if header
                .count
                .compare_exchange_weak(c, c - 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return true;
            }
            std::hint::spin_loop();
        }
    }

    /// Acquire a permit, blocking until one is available.
    pub fn acquire(&self) {
        self.acquire_for(None).expect("unbounded wait cannot time out");
    }

    /// Acquire a permit, blocking until one is available or `timeout`
    /// elapses. `None` waits indefinitely.
    pub fn acquire_for(&self, timeout: Option<Duration>) -> Result<()> {
        let header = self.header();
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if self.try_acquire() {
                return Ok(());
            }
            header.waiting.fetch_add(1, Ordering::AcqRel);
            let remaining = match deadline {
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        header.waiting.fetch_sub(1, Ordering::AcqRel);
                        return Err(Error::Timeout);
                    }
                    Some(d - now)
                }
                None => None,
            };
            futex::futex_wait(&header.count, 0, remaining);
            header.waiting.fetch_sub(1, Ordering::AcqRel);
        }
    }

    /// Release a permit. Fails with `Error::Overflow` if this would push
    /// `count` past a nonzero `max_count`.
    pub fn release(&self) -> Result<()> {
        let header = self.header();
        loop {
            let c = header.count.load(Ordering::Acquire);
            if header.max_count != 0 && c >= header.max_count {
                return Err(Error::Overflow);
            }
            if header
                .count
                .compare_exchange_weak(c, c + 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                futex::futex_wake_one(&header.count);
                return Ok(());
            }
            std::hint::spin_loop();
        }
    }

    /// Acquire a permit for the duration of the returned guard, which
    /// releases it on drop.
    pub fn lock(&self) -> SemaphoreGuard<'_, 'seg> {
        self.acquire();
        SemaphoreGuard { sem: self }
    }
}

/// RAII guard releasing its semaphore permit on drop.
pub struct SemaphoreGuard<'a, 'seg> {
    sem: &'a Semaphore<'seg>,
}

impl Drop for SemaphoreGuard<'_, '_> {
    fn drop(&mut self) {
        let _ = self.sem.release();
    }
}

#[repr(C)]
struct LatchHeader {
    count: AtomicU32,
}

/// A cross-process single-use countdown latch.
pub struct Latch<'seg> {
    segment: &'seg Segment,
    offset: u64,
}

impl<'seg> Latch<'seg> {
    /// Create a latch that opens once `count` arrivals have been counted
    /// down.
    pub fn create(segment: &'seg Segment, name: &str, count: u32) -> Result<Self> {
        if count == 0 {
            return Err(Error::InvalidArgument("latch count must be > 0".into()));
        }
        let size = std::mem::size_of::<LatchHeader>() as u64;
        let offset = segment.allocate(size, std::mem::align_of::<LatchHeader>() as u64)?;
        segment.table().add(name, offset, size, 0, 0)?;

        // SAFETY: offset..offset+size was just bump-allocated and is
        // exclusively owned here.
        unsafe {
            let header = segment.at(offset)?.cast::<LatchHeader>();
            (*header).count = AtomicU32::new(count);
        }

        Ok(Self { segment, offset })
    }

    /// Open an existing latch by name.
    pub fn open(segment: &'seg Segment, name: &str) -> Result<Self> {
        let entry = segment
            .find(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        Ok(Self {
            segment,
            offset: entry.offset,
        })
    }

    fn header(&self) -> &LatchHeader {
        // SAFETY: offset was validated at create/open time.
        unsafe { &*self.segment.at(self.offset).unwrap().cast::<LatchHeader>() }
    }

    #[must_use]
    pub fn remaining(&self) -> u32 {
        self.header().count.load(Ordering::Acquire)
    }

    /// Count down by one. Wakes every waiter once the count reaches zero.
    pub fn count_down(&self) {
        let header = self.header();
        loop {
            let c = header.count.load(Ordering::Acquire);
            if c == 0 {
                return;
            }
            if header
                .count
                .compare_exchange_weak(c, c - 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                if c == 1 {
                    futex::futex_wake_all(&header.count);
                }
                return;
            }
            std::hint::spin_loop();
        }
    }

    #[must_use]
    pub fn try_wait(&self) -> bool {
        self.remaining() == 0
    }

    /// Block until the latch reaches zero.
    pub fn wait(&self) {
        self.wait_for(None).expect("unbounded wait cannot time out");
    }

    /// Block until the latch reaches zero or `timeout` elapses.
    pub fn wait_for(&self, timeout: Option<Duration>) -> Result<()> {
        let header = self.header();
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let c = header.count.load(Ordering::Acquire);
            if c == 0 {
                return Ok(());
            }
            let remaining = match deadline {
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        return Err(Error::Timeout);
                    }
                    Some(d - now)
                }
                None => None,
            };
            futex::futex_wait(&header.count, c, remaining);
        }
    }
}

#[repr(C)]
struct BarrierHeader {
    parties: u32,
    waiting: AtomicU32,
    generation: AtomicU32,
}

/// A cross-process reusable rendezvous barrier.
pub struct Barrier<'seg> {
    segment: &'seg Segment,
    offset: u64,
}

impl<'seg> Barrier<'seg> {
    /// Create a barrier that releases all waiters once `parties`
    /// arrivals have been observed, then resets for the next round.
    pub fn create(segment: &'seg Segment, name: &str, parties: u32) -> Result<Self> {
        if parties == 0 {
            return Err(Error::InvalidArgument("barrier parties must be > 0".into()));
        }
        let size = std::mem::size_of::<BarrierHeader>() as u64;
        let offset = segment.allocate(size, std::mem::align_of::<BarrierHeader>() as u64)?;
        segment.table().add(name, offset, size, 0, 0)?;

        // SAFETY: offset..offset+size was just bump-allocated and is
        // exclusively owned here.
        unsafe {
            let header = segment.at(offset)?.cast::<BarrierHeader>();
            (*header).parties = parties;
            (*header).waiting = AtomicU32::new(0);
            (*header).generation = AtomicU32::new(0);
        }

        Ok(Self { segment, offset })
    }

    /// Open an existing barrier by name.
    pub fn open(segment: &'seg Segment, name: &str) -> Result<Self> {
        let entry = segment
            .find(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        Ok(Self {
            segment,
            offset: entry.offset,
        })
    }

    fn header(&self) -> &BarrierHeader {
        // SAFETY: offset was validated at create/open time.
        unsafe {
            &*self
                .segment
                .at(self.offset)
                .unwrap()
                .cast::<BarrierHeader>()
        }
    }

    #[must_use]
    pub fn parties(&self) -> u32 {
        self.header().parties
    }

    /// Arrive and block until every party has arrived for this
    /// generation, then return. The barrier resets automatically and
    /// can be reused for the next round.
    pub fn wait(&self) {
        let header = self.header();
        let generation = header.generation.load(Ordering::Acquire);
        let arrived = header.waiting.fetch_add(1, Ordering::AcqRel) + 1;

        if arrived == header.parties {
            header.waiting.store(0, Ordering::Release);
            header.generation.fetch_add(1, Ordering::Release);
            futex::futex_wake_all(&header.generation);
            return;
        }

        loop {
            let current = header.generation.load(Ordering::Acquire);
            if current != generation {
                return;
            }
            futex::futex_wait(&header.generation, generation, None);
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
        format!("/zeroipc_sync_test_{ts}")
    }

    #[test]
    fn semaphore_try_acquire_and_release() {
        let name = unique_name();
        let seg = Segment::create(&name, 65536, TableCapacity::Default).unwrap();
        let sem = Semaphore::create(&seg, "s", 1, 2).unwrap();
        assert!(sem.try_acquire());
        assert!(!sem.try_acquire());
        sem.release().unwrap();
        assert_eq!(sem.count(), 1);
        Segment::unlink(&name).ok();
    }

    #[test]
    fn semaphore_release_past_max_errors() {
        let name = unique_name();
        let seg = Segment::create(&name, 65536, TableCapacity::Default).unwrap();
        let sem = Semaphore::create(&seg, "s", 1, 1).unwrap();
        assert!(matches!(sem.release(), Err(Error::Overflow)));
        Segment::unlink(&name).ok();
    }

    #[test]
    fn semaphore_acquire_for_times_out() {
        let name = unique_name();
        let seg = Segment::create(&name, 65536, TableCapacity::Default).unwrap();
        let sem = Semaphore::create(&seg, "s", 0, 0).unwrap();
        let result = sem.acquire_for(Some(Duration::from_millis(20)));
        assert!(matches!(result, Err(Error::Timeout)));
        Segment::unlink(&name).ok();
    }

    #[test]
    fn semaphore_guard_releases_on_drop() {
        let name = unique_name();
        let seg = Segment::create(&name, 65536, TableCapacity::Default).unwrap();
        let sem = Semaphore::create(&seg, "s", 1, 1).unwrap();
        {
            let _guard = sem.lock();
            assert_eq!(sem.count(), 0);
        }
        assert_eq!(sem.count(), 1);
        Segment::unlink(&name).ok();
    }

    #[test]
    fn latch_releases_all_waiters() {
        let name = unique_name();
        let seg = Arc::new(Segment::create(&name, 65536, TableCapacity::Default).unwrap());
        Latch::create(&seg, "l", 3).unwrap();

        let mut handles = Vec::new();
        for _ in 0..3 {
            let seg = Arc::clone(&seg);
            handles.push(thread::spawn(move || {
                let waiter = Latch::open(&seg, "l").unwrap();
                waiter.wait();
            }));
        }

        let counter = Latch::open(&seg, "l").unwrap();
        thread::sleep(Duration::from_millis(5));
        counter.count_down();
        counter.count_down();
        counter.count_down();

        for h in handles {
            h.join().unwrap();
        }
        assert!(counter.try_wait());
        Segment::unlink(&name).ok();
    }

    #[test]
    fn barrier_releases_all_parties_and_resets() {
        let name = unique_name();
        let seg = Arc::new(Segment::create(&name, 65536, TableCapacity::Default).unwrap());
        Barrier::create(&seg, "b", 4).unwrap();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let seg = Arc::clone(&seg);
            handles.push(thread::spawn(move || {
                let b = Barrier::open(&seg, "b").unwrap();
                b.wait();
                b.wait(); // second round reuses the barrier
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        Segment::unlink(&name).ok();
    }
}
