//! The contract shared by measuring and fixed sub-allocators.

use std::any::type_name;
use std::cell::{Cell, RefCell};

use crate::error::{ArenaError, ArenaResult};
use crate::handle::{DestructorClosure, SlotKey};
use crate::memory::{ArenaKind, Mode, RecordStore};
use crate::payload::Payload;
use crate::profile::TypeUsage;

/// Allocation and release authority for one payload type.
///
/// Implementors are also the [`DestructorClosure`] of every handle they
/// produce.
pub trait SubAllocator<T: Payload>: DestructorClosure<T> {
    /// Backing strategy.
    fn kind(&self) -> ArenaKind;

    /// Slot capacity, `None` for heap-backed allocators.
    fn capacity(&self) -> Option<usize>;

    /// Live-object counters observed so far.
    fn usage(&self) -> TypeUsage;

    /// Stores `value` and returns its slot.
    ///
    /// # Errors
    ///
    /// [`ArenaError::ModeViolation`] outside active mode,
    /// [`ArenaError::CapacityExhausted`] when a fixed table is full.
    fn try_insert(&self, value: T) -> ArenaResult<SlotKey>;

    /// Moves the object at `key` out of its slot without running release hooks.
    ///
    /// # Errors
    ///
    /// [`ArenaError::DanglingRelease`] if `key` is not live.
    fn remove(&self, key: SlotKey) -> ArenaResult<T>;

    /// Memento storage of this sub-allocator.
    fn records(&self) -> &RecordStore<T>;

    /// Whether releases are currently ignored because of bulk teardown.
    fn is_torn_down(&self) -> bool;

    /// Enables or disables teardown.
    fn set_torn_down(&self, torn_down: bool);

    /// Releases requested while another release of this type is running.
    fn release_queue(&self) -> &ReleaseQueue;

    /// Moves every live object out, reclaiming all slots.
    fn drain_live(&self) -> Vec<T>;
}

/// Keys waiting to be released by the release already running on the same
/// sub-allocator.
///
/// Releasing a payload releases its links, which may target the same type.
/// Those nested releases are queued and drained by the outer one, so a long
/// chain is released in a loop instead of one stack frame per object.
#[derive(Debug, Default)]
pub struct ReleaseQueue {
    running: Cell<bool>,
    pending: RefCell<Vec<SlotKey>>,
}

impl ReleaseQueue {
    /// Creates an idle queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queued keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.borrow().len()
    }

    /// Whether nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.borrow().is_empty()
    }

    /// Claims the queue for a release of `key`. Returns `false`, queueing
    /// `key`, when a release is already running.
    fn begin(&self, key: SlotKey) -> bool {
        if self.running.get() {
            self.pending.borrow_mut().push(key);
            return false;
        }
        self.running.set(true);
        true
    }

    fn next(&self) -> Option<SlotKey> {
        let next = self.pending.borrow_mut().pop();
        if next.is_none() {
            self.running.set(false);
        }
        next
    }
}

/// Shared body of [`DestructorClosure::destroy`].
///
/// A release issued while another release of the same type is running is
/// queued and returns `Ok`; a failure of a queued key is reported by the
/// outermost release.
pub(crate) fn release_slot<T, A>(sub: &A, key: SlotKey) -> ArenaResult<()>
where
    T: Payload,
    A: SubAllocator<T> + ?Sized,
{
    if sub.is_torn_down() {
        return Ok(());
    }
    if sub.records().mode() != Mode::Active {
        return Err(ArenaError::ModeViolation {
            type_name: type_name::<T>(),
            operation: "release",
            expected: Mode::Active.as_str(),
        });
    }

    let queue = sub.release_queue();
    if !queue.begin(key) {
        return Ok(());
    }

    let mut result = Ok(());
    let mut next = Some(key);
    while let Some(key) = next {
        match sub.remove(key) {
            Ok(mut value) => {
                value.release_links();
                tracing::trace!(allocator = %sub.allocator_id(), %key, "released");
            }
            Err(err) => {
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }
        next = queue.next();
    }
    result
}

/// Builds the mode error for an allocation attempted outside active mode.
///
/// Links of the rejected payload cannot be released while releases are
/// disabled, so it is leaked instead of dropped. Its children stay live and
/// are reclaimed by the next teardown.
pub(crate) fn reject<T, A>(sub: &A, value: T, operation: &'static str) -> ArenaError
where
    T: Payload,
    A: SubAllocator<T> + ?Sized,
{
    tracing::warn!(allocator = %sub.allocator_id(), mode = %sub.records().mode(), operation, "allocation rejected");
    std::mem::forget(value);
    ArenaError::ModeViolation {
        type_name: type_name::<T>(),
        operation,
        expected: Mode::Active.as_str(),
    }
}

/// Builds the borrow error for an allocation attempted while the slots of
/// its type are borrowed. The payload is leaked, as in [`reject`].
pub(crate) fn busy<T, A>(sub: &A, value: T) -> ArenaError
where
    T: Payload,
    A: SubAllocator<T> + ?Sized,
{
    tracing::warn!(allocator = %sub.allocator_id(), "allocation while borrowed");
    std::mem::forget(value);
    ArenaError::BorrowConflict(type_name::<T>())
}

/// Reclaims every live object (and every record when asked), returning the
/// number of live objects reclaimed.
///
/// Releases issued by the dropped payloads' hooks are no-ops while the
/// teardown flag is set; the caller sets and clears it.
pub(crate) fn teardown<T, A>(sub: &A, include_records: bool) -> usize
where
    T: Payload,
    A: SubAllocator<T> + ?Sized,
{
    let mut values = sub.drain_live();
    let reclaimed = values.len();
    if include_records {
        values.extend(sub.records().drain());
    }
    for mut value in values {
        value.release_links();
    }
    reclaimed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_queue_defers_nested_keys() {
        let queue = ReleaseQueue::new();
        assert!(queue.begin(SlotKey::new(0, 0)));
        assert!(!queue.begin(SlotKey::new(1, 0)));
        assert!(!queue.begin(SlotKey::new(2, 0)));
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.next(), Some(SlotKey::new(2, 0)));
        assert_eq!(queue.next(), Some(SlotKey::new(1, 0)));
        assert_eq!(queue.next(), None);
        assert!(queue.is_empty());
        // Idle again.
        assert!(queue.begin(SlotKey::new(3, 0)));
    }
}
