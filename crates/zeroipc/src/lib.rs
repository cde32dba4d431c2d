// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # zeroipc - cross-language shared-memory IPC
//!
//! A POSIX shared-memory substrate for communicating between unrelated
//! processes, possibly written in different languages, without a
//! broker or serialization step in the hot path. A [`Segment`] is one
//! `shm_open` mapping; inside it a [`Table`] of named entries lets any
//! attaching process discover the concurrent containers another
//! process has placed there, by name, without prior coordination.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use zeroipc::{Segment, Queue, TableCapacity, Result};
//!
//! fn main() -> Result<()> {
//!     // Writer process
//!     let segment = Segment::create("/sensors", 1 << 20, TableCapacity::Default)?;
//!     let queue = Queue::<f64>::create(&segment, "temperature", 1024)?;
//!     queue.push(21.5)?;
//!
//!     // Reader process (same name, possibly a different binary)
//!     let segment = Segment::open("/sensors")?;
//!     let queue = Queue::<f64>::open(&segment, "temperature")?;
//!     let sample = queue.pop()?;
//!     assert_eq!(sample, 21.5);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |                       Containers & Primitives                       |
//! |  Array | Queue | Stack | Ring | Map/Set | Pool | Semaphore/Latch/Barrier |
//! +---------------------------------------------------------------------+
//! |                              Table                                  |
//! |        name -> (offset, size) directory, ref-counted, fixed-size    |
//! +---------------------------------------------------------------------+
//! |                             Segment                                 |
//! |         shm_open + mmap, bump allocator, header (magic/version)     |
//! +---------------------------------------------------------------------+
//! |                         POSIX shared memory                         |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Segment`] | A mapped shared-memory region and its bump allocator |
//! | [`Table`] | The named-entry directory living at the front of a segment |
//! | [`Array`] | Fixed-capacity typed array, no synchronization |
//! | [`Queue`] | Bounded MPMC FIFO |
//! | [`Stack`] | Bounded MPMC LIFO |
//! | [`Ring`] | SPSC streaming ring buffer with bulk transfer |
//! | [`Map`] | Open-addressed hash map with tombstone deletion |
//! | [`Pool`] | Fixed-capacity lock-free object allocator |
//! | [`Semaphore`], [`Latch`], [`Barrier`] | Cross-process blocking coordination |
//!
//! ## Non-goals
//!
//! This crate does not provide network transport, serialization of
//! arbitrary Rust types, or schema evolution. Every value stored in a
//! container must be `Copy` and have a stable `#[repr(C)]`-compatible
//! layout shared by every attaching process.

pub mod array;
pub mod error;
pub mod futex;
pub mod map;
pub mod pool;
pub mod queue;
pub mod ring;
pub mod segment;
pub mod stack;
pub mod sync;
pub mod table;

pub use array::Array;
pub use error::{Error, Result};
pub use map::{Map, Set};
pub use pool::Pool;
pub use queue::Queue;
pub use ring::Ring;
pub use segment::Segment;
pub use stack::Stack;
pub use sync::{Barrier, Latch, Semaphore, SemaphoreGuard};
pub use table::{Entry, NamedEntry, Table, TableCapacity};

/// zeroipc version string.
pub const VERSION: &str = "0.1.0";
