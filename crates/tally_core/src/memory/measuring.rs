//! # Measuring Sub-Allocator
//!
//! Heap-backed, unbounded. Used for the first pass of a run, where the only
//! goal is to observe how many objects of each type are live at once.

use std::any::type_name;
use std::cell::{Cell, Ref, RefCell, RefMut};
use std::collections::BTreeMap;

use crate::error::{ArenaError, ArenaResult};
use crate::handle::{AllocatorId, DestructorClosure, SlotKey};
use crate::memory::{busy, reject, release_slot, ArenaKind, Mode, RecordStore, ReleaseQueue, SubAllocator};
use crate::payload::Payload;
use crate::profile::TypeUsage;

struct HeapState<T> {
    live: BTreeMap<SlotKey, Box<T>>,
    next_serial: u32,
    usage: TypeUsage,
}

/// Unbounded sub-allocator that records live-object counts.
///
/// Every object gets its own heap box, so keys are never reused within one
/// arena. Memento storage has capacity zero: deactivating out of a measuring
/// arena always overflows.
pub struct MeasuringSubAllocator<T> {
    id: AllocatorId,
    state: RefCell<HeapState<T>>,
    records: RecordStore<T>,
    torn_down: Cell<bool>,
    releases: ReleaseQueue,
}

impl<T: Payload> MeasuringSubAllocator<T> {
    /// Creates an empty allocator advertising `id`.
    #[must_use]
    pub fn new(id: AllocatorId) -> Self {
        Self {
            id,
            state: RefCell::new(HeapState {
                live: BTreeMap::new(),
                next_serial: 0,
                usage: TypeUsage::default(),
            }),
            records: RecordStore::new(0, type_name::<T>()),
            torn_down: Cell::new(false),
            releases: ReleaseQueue::new(),
        }
    }

    fn conflict(&self) -> ArenaError {
        ArenaError::BorrowConflict(type_name::<T>())
    }

    fn dangling(&self, key: SlotKey) -> ArenaError {
        ArenaError::DanglingRelease {
            type_name: type_name::<T>(),
            key,
        }
    }
}

impl<T: Payload> DestructorClosure<T> for MeasuringSubAllocator<T> {
    fn allocator_id(&self) -> AllocatorId {
        self.id
    }

    fn type_name(&self) -> &'static str {
        type_name::<T>()
    }

    fn destroy(&self, key: SlotKey) -> ArenaResult<()> {
        release_slot::<T, _>(self, key)
    }

    fn borrow(&self, key: SlotKey) -> ArenaResult<Ref<'_, T>> {
        let state = self.state.try_borrow().map_err(|_| self.conflict())?;
        Ref::filter_map(state, |s| s.live.get(&key).map(Box::as_ref))
            .map_err(|_| self.dangling(key))
    }

    fn borrow_mut(&self, key: SlotKey) -> ArenaResult<RefMut<'_, T>> {
        let state = self.state.try_borrow_mut().map_err(|_| self.conflict())?;
        RefMut::filter_map(state, |s| s.live.get_mut(&key).map(Box::as_mut))
            .map_err(|_| self.dangling(key))
    }
}

impl<T: Payload> SubAllocator<T> for MeasuringSubAllocator<T> {
    fn kind(&self) -> ArenaKind {
        ArenaKind::Measuring
    }

    fn capacity(&self) -> Option<usize> {
        None
    }

    fn usage(&self) -> TypeUsage {
        self.state.borrow().usage
    }

    fn try_insert(&self, value: T) -> ArenaResult<SlotKey> {
        if self.records.mode() != Mode::Active {
            return Err(reject(self, value, "alloc"));
        }
        let Ok(mut state) = self.state.try_borrow_mut() else {
            return Err(busy(self, value));
        };
        let key = SlotKey::new(state.next_serial, 0);
        state.next_serial = state.next_serial.wrapping_add(1);
        state.live.insert(key, Box::new(value));
        state.usage.record_alloc();
        tracing::trace!(allocator = %self.id, %key, live = state.usage.current, "measured alloc");
        Ok(key)
    }

    fn remove(&self, key: SlotKey) -> ArenaResult<T> {
        let mut state = self.state.try_borrow_mut().map_err(|_| self.conflict())?;
        let value = state.live.remove(&key).ok_or_else(|| self.dangling(key))?;
        state.usage.record_free();
        Ok(*value)
    }

    fn records(&self) -> &RecordStore<T> {
        &self.records
    }

    fn is_torn_down(&self) -> bool {
        self.torn_down.get()
    }

    fn set_torn_down(&self, torn_down: bool) {
        self.torn_down.set(torn_down);
    }

    fn release_queue(&self) -> &ReleaseQueue {
        &self.releases
    }

    fn drain_live(&self) -> Vec<T> {
        let mut state = self.state.borrow_mut();
        let live = std::mem::take(&mut state.live);
        for _ in 0..live.len() {
            state.usage.record_free();
        }
        live.into_values().map(|boxed| *boxed).collect()
    }
}
