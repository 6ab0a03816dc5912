//! Deactivation and activation passes.
//!
//! A [`Deactivator`] holds the arena exclusively for the whole pass: every
//! sub-allocator is switched to memento mode on entry, so nothing can be
//! allocated or released while references are being recorded. An
//! [`Activator`] switches the arena back.

use std::any::type_name;
use std::rc::Rc;

use crate::arena::Arena;
use crate::error::{ArenaError, ArenaResult};
use crate::handle::{Handle, Link, RawRef, SlotKey};
use crate::memento::{DeactivationLedger, Memento, Reloc};
use crate::memory::{Mode, SubAllocator};
use crate::payload::Payload;

/// One deactivation pass over an arena.
///
/// Deactivating the same object twice (through its handle, a [`RawRef`] or a
/// [`Link`]) yields the same memento and stores one record.
///
/// When the pass ends, through [`Deactivator::finish`] or drop, every object
/// still live in the arena is reclaimed.
///
/// Offsets are handed out as soon as a reference is deactivated; moving the
/// objects into memento storage happens in a loop owned by the outermost
/// call, so deep graphs do not deepen the stack.
pub struct Deactivator<'a> {
    arena: &'a mut Arena,
    ledger: DeactivationLedger,
    pending: Vec<PendingMove>,
    draining: bool,
    finished: bool,
}

type PendingMove = Box<dyn FnOnce(&mut Deactivator<'_>) -> ArenaResult<()>>;

impl<'a> Deactivator<'a> {
    /// Starts a pass.
    ///
    /// # Errors
    ///
    /// [`ArenaError::ModeViolation`](crate::ArenaError::ModeViolation) if the
    /// arena is not in active mode.
    pub fn new(arena: &'a mut Arena) -> ArenaResult<Self> {
        arena.expect_mode(Mode::Active, "deactivation pass")?;
        arena.set_mode(Mode::Memento);
        tracing::debug!(kind = %arena.kind(), "deactivation pass started");
        Ok(Self {
            arena,
            ledger: DeactivationLedger::new(),
            pending: Vec::new(),
            draining: false,
            finished: false,
        })
    }

    /// The arena being deactivated.
    #[must_use]
    pub fn arena(&self) -> &Arena {
        &*self.arena
    }

    /// Ledger of the pass so far.
    #[must_use]
    pub fn ledger(&self) -> &DeactivationLedger {
        &self.ledger
    }

    /// Converts a live handle into a memento, leaving the handle empty.
    ///
    /// An empty handle yields [`Memento::null`].
    ///
    /// # Errors
    ///
    /// Identity and borrow errors of the underlying lookup, and any error
    /// raised by the payload's [`Payload::deactivate_links`]. In the latter
    /// case the object has already moved into memento storage and the
    /// handle is left empty.
    pub fn deactivate<T: ?Sized + 'static>(&mut self, handle: &mut Handle<T>) -> ArenaResult<Memento<T>> {
        let Some(raw) = handle.raw() else {
            return Ok(Memento::null());
        };
        match self.deactivate_ref(raw) {
            Ok(memento) => {
                handle.disarm();
                Ok(memento)
            }
            Err(err) => {
                if matches!(handle.try_get(), Err(ArenaError::DanglingRelease { .. })) {
                    handle.disarm();
                }
                Err(err)
            }
        }
    }

    /// Converts a non-owning reference into a memento.
    ///
    /// The owning handle must still be deactivated (or cleared) by its owner.
    ///
    /// # Errors
    ///
    /// See [`Deactivator::deactivate`].
    pub fn deactivate_ref<T: ?Sized + 'static>(&mut self, raw: RawRef<T>) -> ArenaResult<Memento<T>> {
        let access = self.arena.resolve::<T>(raw.allocator_id())?;
        let offset = access.deactivate(raw.key(), self)?;
        Ok(Memento::new(raw.allocator_id(), offset))
    }

    /// Turns a live link dormant. Null and dormant links are left as they are.
    ///
    /// # Errors
    ///
    /// See [`Deactivator::deactivate`].
    pub fn deactivate_link<T: ?Sized + 'static>(&mut self, link: &mut Link<T>) -> ArenaResult<()> {
        if let Link::Live(handle) = link {
            let memento = self.deactivate(handle)?;
            *link = Link::Dormant(memento);
        }
        Ok(())
    }

    /// Ends the pass, reclaiming every object that was not deactivated.
    ///
    /// Releases issued after this point are ignored until the arena is
    /// activated again.
    #[must_use]
    pub fn finish(mut self) -> DeactivationLedger {
        self.reclaim();
        std::mem::take(&mut self.ledger)
    }

    /// Runs queued moves until none are left, including the ones they queue.
    /// Every move runs even after a failure; the first error is returned.
    fn drain(&mut self) -> ArenaResult<()> {
        self.draining = true;
        let mut result = Ok(());
        while let Some(pending) = self.pending.pop() {
            if let Err(err) = pending(self) {
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }
        self.draining = false;
        result
    }

    fn reclaim(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        let reclaimed = self.arena.teardown(false);
        tracing::debug!(
            deactivated = self.ledger.len(),
            reclaimed,
            overflow = self.ledger.overflow(),
            "deactivation pass finished"
        );
    }
}

impl Drop for Deactivator<'_> {
    fn drop(&mut self) {
        self.reclaim();
    }
}

/// Assigns the object at `key` its memento offset (0 on overflow) and queues
/// the move into memento storage.
///
/// The ledger entry is written before the payload's own links are visited,
/// so cycles through raw references terminate.
pub(crate) fn deactivate_slot<T: Payload>(
    sub: Rc<dyn SubAllocator<T>>,
    key: SlotKey,
    deactivator: &mut Deactivator<'_>,
) -> ArenaResult<usize> {
    let id = sub.allocator_id();
    if let Some(offset) = deactivator.ledger.lookup(id, key) {
        return Ok(offset);
    }
    // Keys that are not live never reach the ledger.
    drop(sub.borrow(key)?);

    let offset = match sub.records().reserve() {
        Some(offset) => offset,
        None => {
            deactivator.ledger.mark_overflow(id, type_name::<T>());
            0
        }
    };
    deactivator.ledger.record(id, type_name::<T>(), key, offset);

    let pending: PendingMove =
        Box::new(move |deactivator: &mut Deactivator<'_>| move_to_records(&*sub, key, offset, deactivator));
    deactivator.pending.push(pending);
    if deactivator.draining {
        return Ok(offset);
    }
    deactivator.drain()?;
    Ok(offset)
}

/// Moves the object at `key` into the record at `offset`, or releases it
/// when `offset` is 0.
///
/// The record is filled even if one of the payload's links fails to
/// deactivate, so the ledger never points at an empty record. Payloads that
/// cannot be stored or dropped are leaked; their live children are
/// reclaimed when the pass ends.
fn move_to_records<T: Payload>(
    sub: &dyn SubAllocator<T>,
    key: SlotKey,
    offset: usize,
    deactivator: &mut Deactivator<'_>,
) -> ArenaResult<()> {
    let mut value = sub.remove(key)?;
    let links = value.deactivate_links(deactivator);

    if offset == 0 {
        if links.is_ok() {
            drop(value);
        } else {
            std::mem::forget(value);
        }
        return links;
    }
    if let Some(value) = sub.records().fill(offset, value) {
        std::mem::forget(value);
        return Err(ArenaError::BorrowConflict(type_name::<T>()));
    }
    tracing::trace!(allocator = %sub.allocator_id(), %key, offset, "deactivated");
    links
}

/// Switches an arena from memento mode back to active mode.
///
/// References activated through an `Activator` are writable.
pub struct Activator<'a> {
    arena: &'a mut Arena,
}

impl<'a> Activator<'a> {
    /// Starts activation.
    ///
    /// # Errors
    ///
    /// [`ArenaError::ModeViolation`](crate::ArenaError::ModeViolation) unless
    /// the arena is in memento mode.
    pub fn new(arena: &'a mut Arena) -> ArenaResult<Self> {
        arena.expect_mode(Mode::Memento, "activation")?;
        arena.set_mode(Mode::Active);
        arena.set_torn_down(false);
        tracing::debug!(kind = %arena.kind(), "arena activated");
        Ok(Self { arena })
    }

    /// The arena being activated.
    #[must_use]
    pub fn arena(&self) -> &Arena {
        &*self.arena
    }

    /// Reconstructs a writable reference.
    ///
    /// # Errors
    ///
    /// - [`ArenaError::UninitializedMemento`](crate::ArenaError::UninitializedMemento)
    /// - [`ArenaError::AllocatorIdentityMismatch`](crate::ArenaError::AllocatorIdentityMismatch)
    /// - [`ArenaError::OffsetOutOfRange`](crate::ArenaError::OffsetOutOfRange)
    pub fn activate<T: ?Sized + 'static>(&self, memento: &Memento<T>) -> ArenaResult<Reloc<T>> {
        self.arena.relocate(memento, true)
    }
}
