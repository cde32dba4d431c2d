// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fixed-length, bit-copyable record vector in shared memory.
//!
//! No atomic operations are performed on the array as a whole; element
//! access is bounds-checked at the API boundary, and element-level
//! atomicity is the element type's own responsibility.

use crate::error::{Error, Result};
use crate::segment::Segment;
use std::marker::PhantomData;

#[repr(C)]
struct Header {
    capacity: u64,
}

/// A fixed-length array of `T` living inside a segment.
pub struct Array<'seg, T: Copy> {
    segment: &'seg Segment,
    offset: u64,
    capacity: usize,
    _marker: PhantomData<T>,
}

impl<'seg, T: Copy> Array<'seg, T> {
    /// Create-or-open: the first caller to name an array with a nonzero
    /// `capacity` creates it; later callers passing `0` or the same
    /// capacity attach to the existing one; a later caller passing a
    /// different nonzero capacity fails with `Error::SizeMismatch`
    /// (§3 Lifecycle, testable property #10).
    pub fn create(segment: &'seg Segment, name: &str, capacity: usize) -> Result<Self> {
        if let Ok(existing) = Self::open(segment, name) {
            if capacity != 0 && capacity != existing.capacity {
                return Err(Error::SizeMismatch {
                    expected: existing.capacity as u64,
                    actual: capacity as u64,
                });
            }
            return Ok(existing);
        }
        if capacity == 0 {
            return Err(Error::NotFound(name.to_string()));
        }
        let elem_size = std::mem::size_of::<T>() as u64;
        let total = std::mem::size_of::<Header>() as u64 + capacity as u64 * elem_size;
        let offset = segment.allocate(total, std::mem::align_of::<Header>() as u64)?;
        segment
            .table()
            .add(name, offset, total, elem_size, capacity as u64)?;

        // SAFETY: offset..offset+total was just bump-allocated and is
        // exclusively owned by this call.
        unsafe {
            let header = segment.at(offset)?.cast::<Header>();
            (*header).capacity = capacity as u64;
            let data = segment.at(offset + std::mem::size_of::<Header>() as u64)?;
            std::ptr::write_bytes(data, 0, capacity * std::mem::size_of::<T>());
        }

        Ok(Self {
            segment,
            offset,
            capacity,
            _marker: PhantomData,
        })
    }

    /// Open an existing array by name.
    pub fn open(segment: &'seg Segment, name: &str) -> Result<Self> {
        let entry = segment
            .find(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        // SAFETY: entry.offset was previously initialized by `create`.
        let capacity = unsafe {
            let header = segment.at(entry.offset)?.cast::<Header>();
            (*header).capacity as usize
        };
        Ok(Self {
            segment,
            offset: entry.offset,
            capacity,
            _marker: PhantomData,
        })
    }

    fn data_ptr(&self) -> *mut T {
        // SAFETY: offset + Header was validated at create/open time.
        unsafe {
            self.segment
                .at(self.offset + std::mem::size_of::<Header>() as u64)
                .expect("array offset within segment bounds")
                .cast::<T>()
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Read element `index`.
    pub fn get(&self, index: usize) -> Result<T> {
        if index >= self.capacity {
            return Err(Error::OutOfRange);
        }
        // SAFETY: index < capacity, data_ptr points to capacity elements.
        Ok(unsafe { *self.data_ptr().add(index) })
    }

    /// Write element `index`.
    pub fn set(&self, index: usize, value: T) -> Result<()> {
        if index >= self.capacity {
            return Err(Error::OutOfRange);
        }
        // SAFETY: index < capacity, data_ptr points to capacity elements.
        unsafe {
            *self.data_ptr().add(index) = value;
        }
        Ok(())
    }

    /// Fill every element with `value`.
    pub fn fill(&self, value: T) {
        for i in 0..self.capacity {
            // SAFETY: i < capacity.
            unsafe {
                *self.data_ptr().add(i) = value;
            }
        }
    }

    /// Copy `src` into the array starting at `index`.
    pub fn write_slice(&self, index: usize, src: &[T]) -> Result<()> {
        if index + src.len() > self.capacity {
            return Err(Error::OutOfRange);
        }
        // SAFETY: bounds checked above; T: Copy so a non-overlapping
        // memcpy is sound.
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), self.data_ptr().add(index), src.len());
        }
        Ok(())
    }

    /// Copy `len` elements starting at `index` into a new vector.
    pub fn read_slice(&self, index: usize, len: usize) -> Result<Vec<T>> {
        if index + len > self.capacity {
            return Err(Error::OutOfRange);
        }
        let mut out = Vec::with_capacity(len);
        // SAFETY: bounds checked above.
        unsafe {
            out.set_len(len);
            std::ptr::copy_nonoverlapping(self.data_ptr().add(index), out.as_mut_ptr(), len);
        }
        Ok(out)
    }
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
        format!("/zeroipc_array_test_{ts}")
    }

    #[test]
    fn cross_process_array_scenario() {
        // S1: writer creates an array, writes bytes, a reader opens it by
        // name alone and reads them back.
        let name = unique_name();
        let seg_a = Segment::create(&name, 1 << 20, TableCapacity::Default).unwrap();
        let msg = Array::<u8>::create(&seg_a, "msg", 14).unwrap();
        let bytes = b"Hello, World!\0";
        msg.write_slice(0, bytes).unwrap();

        let seg_b = Segment::open(&name).unwrap();
        let msg_b = Array::<u8>::open(&seg_b, "msg").unwrap();
        let read = msg_b.read_slice(0, 14).unwrap();
        assert_eq!(&read, bytes);

        drop(seg_a);
        drop(seg_b);
        Segment::unlink(&name).ok();
    }

    #[test]
    fn out_of_range_access_fails() {
        let name = unique_name();
        let seg = Segment::create(&name, 65536, TableCapacity::Default).unwrap();
        let arr = Array::<u32>::create(&seg, "nums", 4).unwrap();
        assert!(arr.get(4).is_err());
        assert!(arr.set(10, 1).is_err());
        Segment::unlink(&name).ok();
    }

    #[test]
    fn fill_sets_every_element() {
        let name = unique_name();
        let seg = Segment::create(&name, 65536, TableCapacity::Default).unwrap();
        let arr = Array::<i32>::create(&seg, "nums", 5).unwrap();
        arr.fill(7);
        for i in 0..5 {
            assert_eq!(arr.get(i).unwrap(), 7);
        }
        Segment::unlink(&name).ok();
    }

    #[test]
    fn create_or_open_matches_property_10() {
        let name = unique_name();
        let seg = Segment::create(&name, 65536, TableCapacity::Default).unwrap();

        let first = Array::<u32>::create(&seg, "nums", 6).unwrap();
        first.fill(9);

        // capacity 0 or matching capacity attaches to the same array.
        let zero = Array::<u32>::create(&seg, "nums", 0).unwrap();
        assert_eq!(zero.get(0).unwrap(), 9);
        let matching = Array::<u32>::create(&seg, "nums", 6).unwrap();
        assert_eq!(matching.get(0).unwrap(), 9);

        // a differing nonzero capacity is a hard error.
        assert!(matches!(
            Array::<u32>::create(&seg, "nums", 7),
            Err(Error::SizeMismatch { .. })
        ));

        // capacity 0 against a name nothing has created yet is not-found.
        assert!(matches!(
            Array::<u32>::create(&seg, "missing", 0),
            Err(Error::NotFound(_))
        ));

        Segment::unlink(&name).ok();
    }
}
