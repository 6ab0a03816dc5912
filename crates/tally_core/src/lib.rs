//! # TALLY Core
//!
//! Two-phase, per-type sized memory arena with relocatable references:
//! - Measure peak concurrent allocations per type by running a workload once
//! - Size a fixed arena exactly to that profile and run the workload again
//! - Transport results as address-independent mementos
//!
//! ## Architecture Rules
//!
//! 1. **No growth after sizing** - A fixed arena never allocates past its plan
//! 2. **Explicit release** - A live [`Handle`] must be cleared, never dropped
//! 3. **Offsets, not addresses** - A [`Memento`] names `(allocator id, offset)`
//!
//! ## Example
//!
//! ```rust,ignore
//! use tally_core::{run, TypeSet};
//!
//! let types = TypeSet::builder().register::<i32>().register::<f64>().build()?;
//! let execution = run(&types, |arena| {
//!     let mut a = arena.alloc(2i32);
//!     let mut b = arena.alloc(0.5f64);
//!     let sum = f64::from(*a.get()) + *b.get();
//!     a.clear();
//!     b.clear();
//!     arena.alloc(sum)
//! })?;
//! assert_eq!(execution.profile.peak("i32"), 1);
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod arena;
pub mod config;
pub mod driver;
pub mod error;
pub mod handle;
pub mod memento;
pub mod memory;
pub mod payload;
pub mod profile;

pub use arena::{Arena, TypeSet, TypeSetBuilder};
pub use config::{CapacityPlan, SizingConfig};
pub use driver::{run, run_with, Execution, Frozen};
pub use error::{ArenaError, ArenaResult};
pub use handle::{AllocatorId, DestructorClosure, Handle, Link, RawRef, SlotKey};
pub use memento::{Activator, DeactivationLedger, Deactivator, Memento, Reloc};
pub use memory::{
    ArenaKind, FixedSubAllocator, MeasuringSubAllocator, Mode, RecordStore, ReleaseQueue,
    SubAllocator,
};
pub use payload::{Outcome, Payload, Subtype};
pub use profile::{TypeUsage, UsageProfile};
