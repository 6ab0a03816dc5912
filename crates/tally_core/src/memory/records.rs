//! # Memento Storage
//!
//! Each sub-allocator carries a bump-allocated record array. Deactivation
//! moves payloads here; a memento's offset is a 1-based index into it.

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::fmt;

use crate::error::{ArenaError, ArenaResult};

/// Whether a sub-allocator accepts allocations or is being relocated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Allocations, releases and mutable activations are allowed.
    #[default]
    Active,
    /// Allocations are disabled; deactivation may fill memento storage.
    Memento,
}

impl Mode {
    /// Lowercase name, for diagnostics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Memento => "memento",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed-capacity, bump-allocated storage for deactivated payloads.
pub struct RecordStore<T> {
    records: RefCell<Box<[Option<T>]>>,
    capacity: usize,
    bump: Cell<usize>,
    mode: Cell<Mode>,
    type_name: &'static str,
}

impl<T> RecordStore<T> {
    /// Creates storage for `capacity` records.
    #[must_use]
    pub fn new(capacity: usize, type_name: &'static str) -> Self {
        let records: Vec<Option<T>> = (0..capacity).map(|_| None).collect();
        Self {
            records: RefCell::new(records.into_boxed_slice()),
            capacity,
            bump: Cell::new(0),
            mode: Cell::new(Mode::Active),
            type_name,
        }
    }

    /// Maximum number of records.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Offsets handed out so far.
    #[inline]
    #[must_use]
    pub fn used(&self) -> usize {
        self.bump.get()
    }

    /// Offsets still available.
    #[inline]
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.capacity - self.bump.get()
    }

    /// Current mode.
    #[inline]
    #[must_use]
    pub fn mode(&self) -> Mode {
        self.mode.get()
    }

    pub(crate) fn set_mode(&self, mode: Mode) {
        self.mode.set(mode);
    }

    /// Hands out the next 1-based offset, or `None` when full.
    pub(crate) fn reserve(&self) -> Option<usize> {
        let used = self.bump.get();
        if used < self.capacity {
            self.bump.set(used + 1);
            Some(used + 1)
        } else {
            None
        }
    }

    /// Stores `value` at a reserved offset. Hands `value` back if the offset
    /// is out of range or the records are borrowed.
    pub(crate) fn fill(&self, offset: usize, value: T) -> Option<T> {
        if self.check_offset(offset).is_err() {
            return Some(value);
        }
        match self.records.try_borrow_mut() {
            Ok(mut records) => {
                records[offset - 1] = Some(value);
                None
            }
            Err(_) => Some(value),
        }
    }

    /// Fails unless every record handed out here fits into `target`, which
    /// must not have handed out any offset yet.
    pub(crate) fn check_move_into(&self, target: &Self) -> ArenaResult<()> {
        if target.used() > 0 || target.capacity < self.used() {
            return Err(ArenaError::InvalidConfig(format!(
                "cannot move {} records of {} into storage with {} of {} offsets used",
                self.used(),
                target.type_name,
                target.used(),
                target.capacity
            )));
        }
        Ok(())
    }

    /// Moves every record into `target` at the same offset and returns how
    /// many were moved. Offsets stay consumed here.
    pub(crate) fn move_into(&self, target: &Self) -> ArenaResult<usize> {
        self.check_move_into(target)?;
        let mut from = self
            .records
            .try_borrow_mut()
            .map_err(|_| ArenaError::BorrowConflict(self.type_name))?;
        let mut to = target
            .records
            .try_borrow_mut()
            .map_err(|_| ArenaError::BorrowConflict(target.type_name))?;

        let used = self.used();
        let mut moved = 0;
        for (slot, record) in to.iter_mut().zip(from.iter_mut()).take(used) {
            *slot = record.take();
            moved += usize::from(slot.is_some());
        }
        target.bump.set(used);
        Ok(moved)
    }

    /// Validates a non-null 1-based offset against the capacity.
    pub(crate) fn check_offset(&self, offset: usize) -> ArenaResult<()> {
        if offset == 0 || offset > self.capacity {
            return Err(ArenaError::OffsetOutOfRange {
                type_name: self.type_name,
                offset,
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    /// Shared access to the record at `offset`, `None` if the slot is unfilled.
    pub(crate) fn get(&self, offset: usize) -> ArenaResult<Option<Ref<'_, T>>> {
        self.check_offset(offset)?;
        let records = self
            .records
            .try_borrow()
            .map_err(|_| ArenaError::BorrowConflict(self.type_name))?;
        Ok(Ref::filter_map(records, |r| r[offset - 1].as_ref()).ok())
    }

    /// Exclusive access to the record at `offset`, `None` if the slot is unfilled.
    pub(crate) fn get_mut(&self, offset: usize) -> ArenaResult<Option<RefMut<'_, T>>> {
        self.check_offset(offset)?;
        let records = self
            .records
            .try_borrow_mut()
            .map_err(|_| ArenaError::BorrowConflict(self.type_name))?;
        Ok(RefMut::filter_map(records, |r| r[offset - 1].as_mut()).ok())
    }

    /// Removes every stored record.
    pub(crate) fn drain(&self) -> Vec<T> {
        let mut records = self.records.borrow_mut();
        records.iter_mut().filter_map(Option::take).collect()
    }
}
