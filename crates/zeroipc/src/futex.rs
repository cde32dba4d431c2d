// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Linux futex wrapper used as the blocking primitive behind the
//! semaphore, latch, and barrier.
//!
//! # CRITICAL: SHARED vs PRIVATE
//!
//! This module uses `FUTEX_WAIT` and `FUTEX_WAKE` (NOT the `_PRIVATE`
//! variants). The `_PRIVATE` variants only work within a single process
//! and will silently fail to wake threads in other processes. Every
//! futex word used by this crate lives in shared memory and may be
//! waited on from a different process than the one that wakes it.

use std::ptr;
use std::sync::atomic::AtomicU32;
use std::time::Duration;

const FUTEX_WAIT: i32 = 0; // NOT 128 (FUTEX_WAIT_PRIVATE)
const FUTEX_WAKE: i32 = 1; // NOT 129 (FUTEX_WAKE_PRIVATE)

/// Wait on a futex word until it changes from `expected` or the timeout
/// expires.
///
/// Returns `0` on wake or spurious wakeup, `-1` with `EAGAIN` if the
/// value no longer equals `expected`, `-1` with `ETIMEDOUT` on timeout.
///
/// # Safety
///
/// `addr` must remain valid (mapped) for the duration of the call. For
/// cross-process use it must point into shared memory.
#[cfg(target_os = "linux")]
pub fn futex_wait(addr: &AtomicU32, expected: u32, timeout: Option<Duration>) -> i32 {
    let ts = timeout.map(|d| libc::timespec {
        tv_sec: d.as_secs() as libc::time_t,
        tv_nsec: d.subsec_nanos() as libc::c_long,
    });
    let ts_ptr = ts
        .as_ref()
        .map_or(ptr::null(), |t| t as *const libc::timespec);

    // SAFETY: addr is a valid reference to an AtomicU32 for the duration
    // of this call; the futex syscall only reads/compares its value and
    // does not retain the pointer beyond the call.
    unsafe {
        libc::syscall(
            libc::SYS_futex,
            addr as *const AtomicU32 as *const u32,
            FUTEX_WAIT,
            expected,
            ts_ptr,
            ptr::null::<u32>(),
            0i32,
        ) as i32
    }
}

/// Wake up to `count` waiters blocked on `addr`.
///
/// # Safety
///
/// `addr` must be the same address waiters are blocked on.
#[cfg(target_os = "linux")]
pub fn futex_wake(addr: &AtomicU32, count: i32) -> i32 {
    // SAFETY: addr is a valid reference to an AtomicU32; FUTEX_WAKE
    // never dereferences uaddr2 or the timeout argument.
    unsafe {
        libc::syscall(
            libc::SYS_futex,
            addr as *const AtomicU32 as *const u32,
            FUTEX_WAKE,
            count,
            ptr::null::<libc::timespec>(),
            ptr::null::<u32>(),
            0i32,
        ) as i32
    }
}

/// Wake a single waiter.
#[cfg(target_os = "linux")]
#[inline]
pub fn futex_wake_one(addr: &AtomicU32) -> i32 {
    futex_wake(addr, 1)
}

/// Wake every waiter.
#[cfg(target_os = "linux")]
#[inline]
pub fn futex_wake_all(addr: &AtomicU32) -> i32 {
    futex_wake(addr, i32::MAX)
}

// Non-Linux fallback: sleep-based busy-wait. Correct but not efficient;
// good enough for tests and for platforms without futex.
#[cfg(not(target_os = "linux"))]
pub fn futex_wait(_addr: &AtomicU32, _expected: u32, timeout: Option<Duration>) -> i32 {
    let sleep_time = timeout.unwrap_or(Duration::from_millis(1));
    std::thread::sleep(sleep_time.min(Duration::from_millis(10)));
    0
}

#[cfg(not(target_os = "linux"))]
pub fn futex_wake(_addr: &AtomicU32, _count: i32) -> i32 {
    0
}

#[cfg(not(target_os = "linux"))]
#[inline]
pub fn futex_wake_one(_addr: &AtomicU32) -> i32 {
    0
}

#[cfg(not(target_os = "linux"))]
#[inline]
pub fn futex_wake_all(_addr: &AtomicU32) -> i32 {
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn wake_without_waiters() {
        let val = AtomicU32::new(0);
        let woken = futex_wake(&val, 1);
        assert!(woken >= 0);
    }

    #[test]
    fn wait_value_mismatch() {
        let val = AtomicU32::new(42);
        let result = futex_wait(&val, 0, Some(Duration::from_millis(100)));
        #[cfg(target_os = "linux")]
        assert_eq!(result, -1);
        let _ = result;
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn wake_waiter() {
        let val = Arc::new(AtomicU32::new(0));
        let val_clone = Arc::clone(&val);

        let handle = thread::spawn(move || {
            while val_clone.load(Ordering::Acquire) == 0 {
                futex_wait(&val_clone, 0, Some(Duration::from_secs(1)));
            }
            val_clone.load(Ordering::Acquire)
        });

        thread::sleep(Duration::from_millis(10));
        val.store(42, Ordering::Release);
        futex_wake(&val, 1);

        assert_eq!(handle.join().expect("thread panicked"), 42);
    }
}
