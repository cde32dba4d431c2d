// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! POSIX shared memory segment management.
//!
//! A `Segment` owns a memory-mapped region created or attached via
//! `shm_open`/`mmap`. Its first bytes are the [`Table`](crate::table::Table)
//! header and entry array; everything after the table is bump-allocated
//! structure storage.
//!
//! # Lifecycle
//!
//! 1. The first process calls [`Segment::create`], which initializes the
//!    table and sets the reference count to 1.
//! 2. Later processes call [`Segment::open`], which validates the table
//!    header and increments the reference count.
//! 3. Dropping a `Segment` unmaps the region and decrements the
//!    reference count; it does not unlink the name.
//! 4. [`Segment::unlink`] removes the name so future opens fail; existing
//!    mappings remain valid.

use crate::error::{Error, Result};
use crate::table::{Table, TableCapacity};
use std::ffi::CString;
use std::io;
use std::ptr;

/// A mapped shared-memory segment plus its table.
pub struct Segment {
    ptr: *mut u8,
    size: usize,
    name: String,
    table: Table,
}

// SAFETY: all mutable access to the mapped region goes through atomics
// in the table header or through the caller-synchronized container
// headers; the raw pointer itself has no thread affinity.
unsafe impl Send for Segment {}
unsafe impl Sync for Segment {}

impl Segment {
    /// Create a new segment of `size` bytes with a table sized per
    /// `capacity`. Fails with `CreateConflict` if a segment of this name
    /// already exists with a different size; otherwise an existing
    /// segment of the same size is treated as already-created and
    /// simply opened (matching the create-or-open contract in §4.1).
    pub fn create(name: &str, size: usize, capacity: TableCapacity) -> Result<Self> {
        let name = normalize_name(name);
        Self::validate_name(&name)?;

        let c_name = CString::new(name.clone())
            .map_err(|_| Error::InvalidArgument(format!("embedded NUL in name: {name}")))?;

        // SAFETY: c_name is a valid NUL-terminated string. O_CREAT|O_EXCL
        // fails if the segment already exists rather than silently
        // truncating it, matching the create-conflict contract.
        let fd = unsafe {
            libc::shm_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_RDWR | libc::O_EXCL,
                0o600,
            )
        };

        if fd < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::AlreadyExists {
                return Self::open(&name).and_then(|seg| {
                    if seg.size != size {
                        Err(Error::CreateConflict)
                    } else {
                        Ok(seg)
                    }
                });
            }
            return Err(Error::SegmentCreate(err));
        }

        // SAFETY: fd is a valid fd from the shm_open call above; size is
        // caller-supplied and bounded by practical memory limits.
        if unsafe { libc::ftruncate(fd, size as libc::off_t) } < 0 {
            let err = io::Error::last_os_error();
            // SAFETY: fd is valid and we are on an error path that does
            // not reuse it afterward.
            unsafe { libc::close(fd) };
            return Err(Error::SegmentCreate(err));
        }

        // SAFETY: fd is valid and sized by the ftruncate call above; the
        // requested protection/flags are valid for a read-write mapping
        // visible to other processes.
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };

        // SAFETY: fd is valid; mmap (success or failure) does not
        // invalidate it, and the mapping itself holds its own reference.
        unsafe { libc::close(fd) };

        if ptr == libc::MAP_FAILED {
            return Err(Error::Mmap(io::Error::last_os_error()));
        }

        // SAFETY: ptr is a valid mapping of exactly `size` bytes with
        // write permission, freshly created and not yet visible to any
        // other process.
        unsafe { ptr::write_bytes(ptr as *mut u8, 0, size) };

        let max_entries = capacity.max_entries();
        let table_size = Table::calculate_size(max_entries);
        if table_size > size as u64 {
            // SAFETY: ptr/size describe the mapping just created above.
            unsafe { libc::munmap(ptr, size) };
            let _ = Self::unlink(&name);
            return Err(Error::InvalidArgument(format!(
                "segment size {size} too small for a table of {max_entries} entries"
            )));
        }

        // SAFETY: the mapping is exclusively owned here, zeroed above,
        // and at least `table_size` bytes long.
        let table = unsafe { Table::create(ptr as *mut u8, max_entries, size as u64) };

        log::debug!("segment create: {name} ({size} bytes, {max_entries} table entries)");

        Ok(Self {
            ptr: ptr as *mut u8,
            size,
            name,
            table,
        })
    }

    /// Attach to an existing segment by name, incrementing its reference
    /// counter. Fails with `NotFound` if no segment of this name exists.
    pub fn open(name: &str) -> Result<Self> {
        let name = normalize_name(name);
        Self::validate_name(&name)?;

        let c_name = CString::new(name.clone())
            .map_err(|_| Error::InvalidArgument(format!("embedded NUL in name: {name}")))?;

        // SAFETY: c_name is a valid NUL-terminated string; O_RDWR opens
        // an existing segment without creating one.
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0) };
        if fd < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::NotFound {
                return Err(Error::NotFound(name));
            }
            return Err(Error::SegmentOpen(err));
        }

        // SAFETY: fd refers to an existing shared-memory object; fstat
        // reads its current size so we can map exactly that many bytes.
        let mut stat: libc::stat = unsafe { std::mem::zeroed() };
        if unsafe { libc::fstat(fd, &mut stat) } < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(Error::SegmentOpen(err));
        }
        let size = stat.st_size as usize;

        // SAFETY: fd is valid and `size` is the segment's real size per
        // fstat above.
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };

        // SAFETY: fd is valid; closing after a successful or failed mmap
        // is safe, the mapping (if any) holds its own reference.
        unsafe { libc::close(fd) };

        if ptr == libc::MAP_FAILED {
            return Err(Error::Mmap(io::Error::last_os_error()));
        }

        // SAFETY: ptr is a valid mapping of at least HEADER_SIZE bytes
        // (enforced implicitly: no valid create() produces a segment
        // smaller than a single table header).
        let table = unsafe { Table::open(ptr as *mut u8) }?;
        table.inc_ref();

        log::debug!("segment open: {name} ({size} bytes)");

        Ok(Self {
            ptr: ptr as *mut u8,
            size,
            name,
            table,
        })
    }

    fn validate_name(name: &str) -> Result<()> {
        if !name.starts_with('/') {
            return Err(Error::InvalidArgument(format!(
                "segment name must start with '/': {name}"
            )));
        }
        if name.len() > 1 && name[1..].contains('/') {
            return Err(Error::InvalidArgument(format!(
                "segment name cannot contain '/' after the prefix: {name}"
            )));
        }
        if name.len() > 255 {
            return Err(Error::InvalidArgument(format!(
                "segment name too long (max 255): {name}"
            )));
        }
        Ok(())
    }

    /// Remove the segment's name so future `open` calls fail. Existing
    /// mappings remain valid. Idempotent: unlinking a name that does not
    /// exist is not an error.
    pub fn unlink(name: &str) -> Result<()> {
        let name = normalize_name(name);
        let c_name = CString::new(name.clone())
            .map_err(|_| Error::InvalidArgument(format!("embedded NUL in name: {name}")))?;

        // SAFETY: c_name is a valid NUL-terminated string; shm_unlink
        // only removes the name from the shm filesystem namespace.
        let ret = unsafe { libc::shm_unlink(c_name.as_ptr()) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::NotFound {
                return Err(Error::SegmentOpen(err));
            }
        }
        Ok(())
    }

    /// Check whether a segment of this name currently exists.
    #[must_use]
    pub fn exists(name: &str) -> bool {
        let name = normalize_name(name);
        let Ok(c_name) = CString::new(name) else {
            return false;
        };
        // SAFETY: c_name is valid; O_RDONLY performs no mutation.
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDONLY, 0) };
        if fd >= 0 {
            // SAFETY: fd >= 0 is a valid descriptor from the call above.
            unsafe { libc::close(fd) };
            true
        } else {
            false
        }
    }

    /// Base address of the mapping.
    #[must_use]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    /// Total mapped size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Segment name, as normalized at create/open time.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The table at the head of this segment's memory.
    #[must_use]
    pub fn table(&self) -> Table {
        self.table
    }

    /// Resolve an offset within the segment to a raw pointer, bounds
    /// checked against the segment size.
    pub fn at(&self, offset: u64) -> Result<*mut u8> {
        if offset > self.size as u64 {
            return Err(Error::OutOfRange);
        }
        // SAFETY: offset <= self.size is checked above, so the result
        // stays within the mapped region (callers are responsible for
        // not reading past size - offset).
        Ok(unsafe { self.ptr.add(offset as usize) })
    }

    /// Bump-allocate `size` bytes at `alignment`, returning the offset.
    pub fn allocate(&self, size: u64, alignment: u64) -> Result<u64> {
        self.table.allocate(size, alignment)
    }

    /// Find a table entry by name.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<crate::table::Entry> {
        self.table.find(name)
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        let remaining = self.table.dec_ref();
        if remaining == 0 {
            log::debug!("segment {} observed zero attachers on detach", self.name);
        }
        // SAFETY: self.ptr/self.size describe the mapping created in
        // create() or open(); Drop runs at most once per Segment.
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, self.size);
        }
    }
}

fn normalize_name(name: &str) -> String {
    if name.starts_with('/') {
        name.to_string()
    } else {
        format!("/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_name() -> String {
        use std::time::{SystemTime, UNIX_EPOCH};
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        format!("/zeroipc_test_{ts}_{:?}", std::thread::current().id())
    }

    #[test]
    fn create_then_open_shares_memory() {
        let name = unique_name();
        let seg1 = Segment::create(&name, 65536, TableCapacity::Default).unwrap();
        let off = seg1.allocate(64, 8).unwrap();
        // SAFETY: off is within bounds from allocate(); ptr is valid.
        unsafe {
            *seg1.at(off).unwrap() = 0x42;
        }

        let seg2 = Segment::open(&name).unwrap();
        // SAFETY: seg2 maps the same memory as seg1.
        unsafe {
            assert_eq!(*seg2.at(off).unwrap(), 0x42);
        }

        drop(seg1);
        drop(seg2);
        Segment::unlink(&name).ok();
    }

    #[test]
    fn open_missing_segment_fails_not_found() {
        let result = Segment::open("/zeroipc_does_not_exist_12345");
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[test]
    fn unlink_is_idempotent() {
        let name = unique_name();
        let _seg = Segment::create(&name, 4096, TableCapacity::Small).unwrap();
        assert!(Segment::unlink(&name).is_ok());
        assert!(Segment::unlink(&name).is_ok());
    }

    #[test]
    fn exists_reflects_lifecycle() {
        let name = unique_name();
        assert!(!Segment::exists(&name));
        let seg = Segment::create(&name, 4096, TableCapacity::Small).unwrap();
        assert!(Segment::exists(&name));
        drop(seg);
        Segment::unlink(&name).ok();
    }

    #[test]
    fn reference_count_tracks_attachers() {
        let name = unique_name();
        let seg1 = Segment::create(&name, 65536, TableCapacity::Default).unwrap();
        assert_eq!(seg1.table().entry_count(), 0);

        let seg2 = Segment::open(&name).unwrap();
        drop(seg2);
        drop(seg1);
        Segment::unlink(&name).ok();
    }

    #[test]
    fn create_with_mismatched_size_is_conflict() {
        let name = unique_name();
        let seg1 = Segment::create(&name, 65536, TableCapacity::Default).unwrap();
        let result = Segment::create(&name, 131072, TableCapacity::Default);
        assert!(matches!(result, Err(Error::CreateConflict)));
        drop(seg1);
        Segment::unlink(&name).ok();
    }

    #[test]
    fn create_with_matching_size_reattaches() {
        let name = unique_name();
        let seg1 = Segment::create(&name, 65536, TableCapacity::Default).unwrap();
        let seg2 = Segment::create(&name, 65536, TableCapacity::Default).unwrap();
        assert_eq!(seg1.size(), seg2.size());
        drop(seg1);
        drop(seg2);
        Segment::unlink(&name).ok();
    }

    #[test]
    fn name_without_leading_slash_is_normalized() {
        let raw = format!(
            "zeroipc_test_noprefix_{:?}",
            std::time::SystemTime::now()
        );
        let seg = Segment::create(&raw, 4096, TableCapacity::Small).unwrap();
        assert!(seg.name().starts_with('/'));
        let name = seg.name().to_string();
        drop(seg);
        Segment::unlink(&name).ok();
    }
}
