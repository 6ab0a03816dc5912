//! # Sub-Allocators
//!
//! One sub-allocator owns the objects of exactly one payload type.
//!
//! ## Design Philosophy
//!
//! The measuring pass allocates from the heap and counts. The fixed pass
//! allocates from a slot table sized to what was counted:
//! - No growth after construction
//! - O(1) alloc and free through an intrusive free list
//! - Exhaustion is a sizing error, never a recoverable condition

mod fixed;
mod measuring;
mod records;
mod sub;

use std::fmt;

pub use fixed::FixedSubAllocator;
pub use measuring::MeasuringSubAllocator;
pub use records::{Mode, RecordStore};
pub use sub::{ReleaseQueue, SubAllocator};

pub(crate) use sub::{busy, reject, release_slot, teardown};

/// Which backing strategy a sub-allocator (and its arena) uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArenaKind {
    /// Heap-backed, profiling.
    Measuring,
    /// Pre-sized slot table.
    Fixed,
}

impl fmt::Display for ArenaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Measuring => f.write_str("measuring"),
            Self::Fixed => f.write_str("fixed"),
        }
    }
}
