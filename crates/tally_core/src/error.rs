//! # Arena Error Types
//!
//! Every condition in this taxonomy except deactivation overflow is an
//! invariant violation. Overflow is recorded in the
//! [`DeactivationLedger`](crate::memento::DeactivationLedger) instead.

use thiserror::Error;

use crate::handle::{AllocatorId, SlotKey};

/// Errors raised by arenas, handles and the relocation protocol.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArenaError {
    /// A fixed sub-allocator's free list was empty on allocation.
    #[error("capacity exhausted for {type_name}: all {capacity} slots are live")]
    CapacityExhausted {
        /// The payload type that ran out of slots.
        type_name: &'static str,
        /// The declared capacity.
        capacity: usize,
    },

    /// A release targeted a slot that is not live (double release or stale key).
    #[error("dangling release of {type_name} at {key}")]
    DanglingRelease {
        /// The payload type.
        type_name: &'static str,
        /// The slot that was not live.
        key: SlotKey,
    },

    /// Access through a handle that owns nothing.
    #[error("handle to {0} is empty")]
    EmptyHandle(&'static str),

    /// Activation of a memento that was never initialized.
    #[error("attempt to use memento while memento has not been initialized")]
    UninitializedMemento,

    /// No sub-allocator of the requested type advertises the recorded id.
    #[error("no sub-allocator for {type_name} advertises allocator id {allocator_id}")]
    AllocatorIdentityMismatch {
        /// The requested (possibly abstract) type.
        type_name: &'static str,
        /// The id carried by the reference.
        allocator_id: AllocatorId,
    },

    /// More than one sub-allocator matched a polymorphic resolution.
    #[error("ambiguous resolution of {type_name}: {matches} sub-allocators advertise id {allocator_id}")]
    AmbiguousResolution {
        /// The requested (possibly abstract) type.
        type_name: &'static str,
        /// The id carried by the reference.
        allocator_id: AllocatorId,
        /// Number of matching sub-allocators.
        matches: usize,
    },

    /// The type was never registered in the arena's type set.
    #[error("type {0} is not a member of this type set")]
    UnregisteredType(&'static str),

    /// The same type (or name) was registered twice.
    #[error("type {0} registered twice")]
    DuplicateType(String),

    /// The operation is illegal in the sub-allocator's current mode.
    #[error("{operation} on {type_name} requires {expected} mode")]
    ModeViolation {
        /// The payload type.
        type_name: &'static str,
        /// What was attempted.
        operation: &'static str,
        /// The mode the operation needs.
        expected: &'static str,
    },

    /// A memento offset beyond the record store of its sub-allocator.
    #[error("memento offset {offset} out of range for {type_name} (record capacity {capacity})")]
    OffsetOutOfRange {
        /// The payload type.
        type_name: &'static str,
        /// The 1-based offset.
        offset: usize,
        /// Record capacity of the sub-allocator.
        capacity: usize,
    },

    /// Mutable access through a read-only activation.
    #[error("reference to {0} was activated read-only")]
    ReadOnlyReference(&'static str),

    /// The payload is already borrowed in a conflicting way.
    #[error("{0} is already borrowed")]
    BorrowConflict(&'static str),

    /// The fixed pass did not replay the measured allocation sequence.
    #[error("replay diverged for {type_name}: measured peak {measured}, replayed peak {replayed}")]
    ReplayDiverged {
        /// The payload type.
        type_name: String,
        /// Peak from the measuring pass.
        measured: usize,
        /// Peak from the fixed pass.
        replayed: usize,
    },

    /// Invalid sizing configuration or capacity plan.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for arena operations.
pub type ArenaResult<T> = Result<T, ArenaError>;
