//! Activated relocatable references.

use std::any::type_name;
use std::cell::{Ref, RefMut};
use std::fmt;
use std::rc::Rc;

use crate::arena::SupertypeAccess;
use crate::error::{ArenaError, ArenaResult};
use crate::memento::Memento;

/// A memento resolved against an arena.
///
/// The reference reaches the record through the sub-allocator it resolved
/// to, so it stays valid if the arena value moves. After the arena drops,
/// [`Reloc::get`] yields `None`.
pub struct Reloc<T: ?Sized + 'static> {
    memento: Memento<T>,
    access: Option<Rc<dyn SupertypeAccess<T>>>,
    writable: bool,
}

impl<T: ?Sized + 'static> Reloc<T> {
    pub(crate) fn null(memento: Memento<T>) -> Self {
        Self {
            memento,
            access: None,
            writable: false,
        }
    }

    pub(crate) fn new(memento: Memento<T>, access: Rc<dyn SupertypeAccess<T>>, writable: bool) -> Self {
        Self {
            memento,
            access: Some(access),
            writable,
        }
    }

    /// True for a null memento.
    #[inline]
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.access.is_none()
    }

    /// Whether [`Reloc::get_mut`] may be used.
    #[inline]
    #[must_use]
    pub const fn is_writable(&self) -> bool {
        self.writable
    }

    /// The memento this reference was activated from.
    #[inline]
    #[must_use]
    pub const fn memento(&self) -> Memento<T> {
        self.memento
    }

    /// Name of the concrete type the memento resolved to.
    #[must_use]
    pub fn concrete_type(&self) -> Option<&'static str> {
        self.access.as_ref().map(|access| access.type_name())
    }

    /// Shared access to the payload.
    ///
    /// `None` for a null reference, or when the record is absent from the
    /// arena it was resolved against (a different arena instance than the
    /// one that deactivated it, or one that has since been dropped).
    #[must_use]
    pub fn get(&self) -> Option<Ref<'_, T>> {
        let access = self.access.as_ref()?;
        access.record(self.memento.offset()).ok().flatten()
    }

    /// Exclusive access to the payload.
    ///
    /// # Errors
    ///
    /// - [`ArenaError::ReadOnlyReference`] if activated read-only.
    /// - [`ArenaError::ModeViolation`] if the arena left active mode.
    /// - [`ArenaError::BorrowConflict`] if the record is already borrowed.
    pub fn get_mut(&self) -> ArenaResult<Option<RefMut<'_, T>>> {
        if !self.writable {
            return Err(ArenaError::ReadOnlyReference(type_name::<T>()));
        }
        match &self.access {
            Some(access) => access.record_mut(self.memento.offset()),
            None => Ok(None),
        }
    }
}

impl<T: ?Sized + 'static> Clone for Reloc<T> {
    fn clone(&self) -> Self {
        Self {
            memento: self.memento,
            access: self.access.clone(),
            writable: self.writable,
        }
    }
}

impl<T: ?Sized + 'static> PartialEq for Reloc<T> {
    fn eq(&self, other: &Self) -> bool {
        (self.is_null() && other.is_null()) || self.memento == other.memento
    }
}

impl<T: ?Sized + 'static> fmt::Debug for Reloc<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reloc")
            .field("memento", &self.memento)
            .field("writable", &self.writable)
            .finish()
    }
}
