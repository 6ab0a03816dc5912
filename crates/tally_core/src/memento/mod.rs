//! # Relocatable References
//!
//! A [`Memento`] replaces a live reference with `(allocator id, offset)`, an
//! address-independent record that any arena built from the same
//! [`TypeSet`](crate::TypeSet) can resolve.
//!
//! ```text
//! Handle ──Deactivator::deactivate──> Memento ──Activator::activate──> Reloc
//!                                        │
//!                                        └──Arena::activate_ref──> Reloc (read-only)
//! ```

mod ledger;
mod pass;
mod reloc;

use std::fmt;
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};

use crate::handle::AllocatorId;
use crate::payload::Subtype;

pub use ledger::DeactivationLedger;
pub use pass::{Activator, Deactivator};
pub use reloc::Reloc;

pub(crate) use pass::deactivate_slot;

/// Address-independent stand-in for a reference to a `T`.
///
/// Offset `0` is null. A memento that was never produced by a deactivation
/// is uninitialized, which is distinct from null: activating it fails.
#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Memento<T: ?Sized> {
    initialized: bool,
    allocator_id: AllocatorId,
    offset: usize,
    #[serde(skip)]
    _marker: PhantomData<fn() -> Box<T>>,
}

impl<T: ?Sized> Memento<T> {
    /// A memento that was never assigned.
    #[inline]
    #[must_use]
    pub const fn uninitialized() -> Self {
        Self {
            initialized: false,
            allocator_id: AllocatorId::NULL,
            offset: 0,
            _marker: PhantomData,
        }
    }

    /// The initialized null memento.
    #[inline]
    #[must_use]
    pub const fn null() -> Self {
        Self::new(AllocatorId::NULL, 0)
    }

    #[inline]
    pub(crate) const fn new(allocator_id: AllocatorId, offset: usize) -> Self {
        Self {
            initialized: true,
            allocator_id,
            offset,
            _marker: PhantomData,
        }
    }

    /// Whether a deactivation produced this memento.
    #[inline]
    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// True for offset 0, whether or not the memento is initialized.
    #[inline]
    #[must_use]
    pub const fn is_null(&self) -> bool {
        self.offset == 0
    }

    /// Id of the sub-allocator that recorded the object.
    #[inline]
    #[must_use]
    pub const fn allocator_id(&self) -> AllocatorId {
        self.allocator_id
    }

    /// 1-based index into that sub-allocator's memento storage.
    #[inline]
    #[must_use]
    pub const fn offset(&self) -> usize {
        self.offset
    }

    /// Same reference, viewed as a supertype.
    #[must_use]
    pub fn upcast<S>(self) -> Memento<S>
    where
        T: Subtype<S>,
        S: ?Sized,
    {
        Memento {
            initialized: self.initialized,
            allocator_id: self.allocator_id,
            offset: self.offset,
            _marker: PhantomData,
        }
    }
}

impl<T: ?Sized> Clone for Memento<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: ?Sized> Copy for Memento<T> {}

impl<T: ?Sized> Default for Memento<T> {
    fn default() -> Self {
        Self::uninitialized()
    }
}

impl<T: ?Sized> PartialEq for Memento<T> {
    fn eq(&self, other: &Self) -> bool {
        self.initialized == other.initialized
            && self.allocator_id == other.allocator_id
            && self.offset == other.offset
    }
}

impl<T: ?Sized> Eq for Memento<T> {}

impl<T: ?Sized> fmt::Debug for Memento<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.initialized {
            return f.write_str("Memento(uninitialized)");
        }
        f.debug_struct("Memento")
            .field("allocator", &self.allocator_id)
            .field("offset", &self.offset)
            .finish()
    }
}
