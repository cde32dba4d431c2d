// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error taxonomy for segment, table, and container operations.

use std::fmt;
use std::io;

/// Errors produced by segment, table, and container operations.
#[derive(Debug)]
pub enum Error {
    /// A segment of this name already exists with a different size.
    CreateConflict,

    /// No segment, or no table entry, exists under this name.
    NotFound(String),

    /// A segment of this name already exists and a structure was created
    /// a second time under the same name.
    AlreadyExists(String),

    /// An existing structure's declared capacity does not match the
    /// capacity requested by a later opener.
    SizeMismatch { expected: u64, actual: u64 },

    /// The segment header's version field is not one this build understands.
    UnsupportedVersion(u32),

    /// The segment header's magic tag does not match `ZIPM`.
    CorruptMagic(u32),

    /// Caller-supplied argument is invalid (name too long, zero capacity
    /// on create, negative count, and similar misuse).
    InvalidArgument(String),

    /// An index or offset fell outside the valid range.
    OutOfRange,

    /// The table's fixed entry array has no free slots.
    TableFull,

    /// The segment has no room left for the requested allocation.
    OutOfSpace,

    /// The requested allocation overflowed an internal 64-bit counter.
    AllocationOverflow,

    /// The container cannot accept another record (queue/stack/ring/pool
    /// at capacity, or map at its load-factor ceiling).
    Full,

    /// The container has no record to return.
    Empty,

    /// A semaphore release would exceed its configured maximum count.
    Overflow,

    /// A ring reader was lapped by the writer while copying; the data
    /// read back may be torn and was discarded.
    Overrun,

    /// A blocking acquire did not complete within its deadline.
    Timeout,

    /// The underlying `shm_open` call failed.
    SegmentCreate(io::Error),

    /// The underlying `shm_open` call for an existing segment failed.
    SegmentOpen(io::Error),

    /// `mmap` or `munmap` failed.
    Mmap(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateConflict => write!(f, "segment already exists with a different size"),
            Self::NotFound(name) => write!(f, "not found: {name}"),
            Self::AlreadyExists(name) => write!(f, "already exists: {name}"),
            Self::SizeMismatch { expected, actual } => write!(
                f,
                "capacity mismatch: existing structure has {expected}, requested {actual}"
            ),
            Self::UnsupportedVersion(v) => write!(f, "unsupported table version: {v}"),
            Self::CorruptMagic(m) => write!(f, "invalid table magic: {m:#010x}"),
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Self::OutOfRange => write!(f, "index out of range"),
            Self::TableFull => write!(f, "table has no free entry slots"),
            Self::OutOfSpace => write!(f, "segment has no space left for this allocation"),
            Self::AllocationOverflow => write!(f, "allocation size overflowed"),
            Self::Full => write!(f, "container is full"),
            Self::Empty => write!(f, "container is empty"),
            Self::Overflow => write!(f, "release would exceed configured maximum"),
            Self::Overrun => write!(f, "reader was lapped by the writer during a bulk copy"),
            Self::Timeout => write!(f, "timed out waiting to acquire"),
            Self::SegmentCreate(e) => write!(f, "segment creation failed: {e}"),
            Self::SegmentOpen(e) => write!(f, "segment open failed: {e}"),
            Self::Mmap(e) => write!(f, "memory mapping failed: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::SegmentCreate(e) | Self::SegmentOpen(e) | Self::Mmap(e) => Some(e),
            _ => None,
        }
    }
}

/// Result type for zeroipc operations.
pub type Result<T> = std::result::Result<T, Error>;
