//! # Fixed Sub-Allocator
//!
//! Pre-sized slot table for objects of one type, threaded by an intrusive
//! free list. Capacity is set at construction and never changes: resizing
//! means building a new arena.

use std::any::type_name;
use std::cell::{Cell, Ref, RefCell, RefMut};

use crate::error::{ArenaError, ArenaResult};
use crate::handle::{AllocatorId, DestructorClosure, SlotKey};
use crate::memory::{busy, reject, release_slot, ArenaKind, Mode, RecordStore, ReleaseQueue, SubAllocator};
use crate::payload::Payload;
use crate::profile::TypeUsage;

/// One slot of the table. Vacant slots carry the free-list link.
enum Slot<T> {
    Vacant { next: Option<u32>, generation: u32 },
    Occupied { value: T, generation: u32 },
}

struct SlotTable<T> {
    slots: Box<[Slot<T>]>,
    free_head: Option<u32>,
    usage: TypeUsage,
}

impl<T> SlotTable<T> {
    fn new(capacity: usize) -> Self {
        let capacity = u32::try_from(capacity).expect("slot capacity exceeds u32::MAX");

        // Seed the free list so every slot is threaded in index order.
        let slots: Vec<Slot<T>> = (0..capacity)
            .map(|index| Slot::Vacant {
                next: (index + 1 < capacity).then_some(index + 1),
                generation: 0,
            })
            .collect();

        Self {
            slots: slots.into_boxed_slice(),
            free_head: (capacity > 0).then_some(0),
            usage: TypeUsage::default(),
        }
    }

    fn insert(&mut self, value: T) -> Result<SlotKey, T> {
        let Some(index) = self.free_head else {
            return Err(value);
        };
        let slot = &mut self.slots[index as usize];
        let Slot::Vacant { next, generation } = *slot else {
            unreachable!("free list points at an occupied slot");
        };
        *slot = Slot::Occupied { value, generation };
        self.free_head = next;
        self.usage.record_alloc();
        Ok(SlotKey::new(index, generation))
    }

    fn remove(&mut self, key: SlotKey) -> Option<T> {
        let index = key.index();
        let slot = self.slots.get_mut(index as usize)?;
        match slot {
            Slot::Occupied { generation, .. } if *generation == key.generation() => {
                let vacated = Slot::Vacant {
                    next: self.free_head,
                    generation: generation.wrapping_add(1),
                };
                let Slot::Occupied { value, .. } = std::mem::replace(slot, vacated) else {
                    unreachable!();
                };
                self.free_head = Some(index);
                self.usage.record_free();
                Some(value)
            }
            _ => None,
        }
    }

    fn get(&self, key: SlotKey) -> Option<&T> {
        match self.slots.get(key.index() as usize)? {
            Slot::Occupied { value, generation } if *generation == key.generation() => Some(value),
            _ => None,
        }
    }

    fn get_mut(&mut self, key: SlotKey) -> Option<&mut T> {
        match self.slots.get_mut(key.index() as usize)? {
            Slot::Occupied { value, generation } if *generation == key.generation() => Some(value),
            _ => None,
        }
    }

    fn drain(&mut self) -> Vec<T> {
        let mut drained = Vec::with_capacity(self.usage.current);
        for index in 0..self.slots.len() {
            if let Slot::Occupied { generation, .. } = self.slots[index] {
                #[allow(clippy::cast_possible_truncation)]
                let key = SlotKey::new(index as u32, generation);
                if let Some(value) = self.remove(key) {
                    drained.push(value);
                }
            }
        }
        drained
    }
}

/// Fixed-capacity sub-allocator.
///
/// # Thread Safety
///
/// NOT thread-safe. Arenas are driven by a single thread.
///
/// # Example
///
/// ```rust,ignore
/// let sub: FixedSubAllocator<u32> = FixedSubAllocator::new(AllocatorId::new(1), 2, 2);
///
/// // O(1), no heap allocation
/// let key = sub.try_insert(7)?;
///
/// // O(1), slot pushed back on the free list
/// sub.destroy(key)?;
/// ```
pub struct FixedSubAllocator<T> {
    id: AllocatorId,
    capacity: usize,
    table: RefCell<SlotTable<T>>,
    records: RecordStore<T>,
    torn_down: Cell<bool>,
    releases: ReleaseQueue,
}

impl<T: Payload> FixedSubAllocator<T> {
    /// Creates a table of `capacity` slots and `record_capacity` memento records.
    ///
    /// All memory is allocated upfront.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` does not fit in `u32`.
    #[must_use]
    pub fn new(id: AllocatorId, capacity: usize, record_capacity: usize) -> Self {
        Self {
            id,
            capacity,
            table: RefCell::new(SlotTable::new(capacity)),
            records: RecordStore::new(record_capacity, type_name::<T>()),
            torn_down: Cell::new(false),
            releases: ReleaseQueue::new(),
        }
    }

    /// Number of currently live objects.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.table.borrow().usage.current
    }

    /// Number of free slots.
    #[must_use]
    pub fn free_count(&self) -> usize {
        self.capacity - self.live_count()
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

impl<T: Payload> DestructorClosure<T> for FixedSubAllocator<T> {
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
        let table = self.table.try_borrow().map_err(|_| self.conflict())?;
        Ref::filter_map(table, |t| t.get(key)).map_err(|_| self.dangling(key))
    }

    fn borrow_mut(&self, key: SlotKey) -> ArenaResult<RefMut<'_, T>> {
        let table = self.table.try_borrow_mut().map_err(|_| self.conflict())?;
        RefMut::filter_map(table, |t| t.get_mut(key)).map_err(|_| self.dangling(key))
    }
}

impl<T: Payload> SubAllocator<T> for FixedSubAllocator<T> {
    fn kind(&self) -> ArenaKind {
        ArenaKind::Fixed
    }

    fn capacity(&self) -> Option<usize> {
        Some(self.capacity)
    }

    fn usage(&self) -> TypeUsage {
        self.table.borrow().usage
    }

    fn try_insert(&self, value: T) -> ArenaResult<SlotKey> {
        if self.records.mode() != Mode::Active {
            return Err(reject(self, value, "alloc"));
        }

        // The table borrow must end before a rejected payload releases its
        // children, which may live in this same table.
        let inserted = match self.table.try_borrow_mut() {
            Ok(mut table) => table.insert(value),
            Err(_) => return Err(busy(self, value)),
        };
        match inserted {
            Ok(key) => {
                tracing::trace!(allocator = %self.id, %key, "fixed alloc");
                Ok(key)
            }
            Err(mut value) => {
                value.release_links();
                tracing::debug!(allocator = %self.id, capacity = self.capacity, "fixed table exhausted");
                Err(ArenaError::CapacityExhausted {
                    type_name: type_name::<T>(),
                    capacity: self.capacity,
                })
            }
        }
    }

    fn remove(&self, key: SlotKey) -> ArenaResult<T> {
        let mut table = self.table.try_borrow_mut().map_err(|_| self.conflict())?;
        table.remove(key).ok_or_else(|| self.dangling(key))
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
        self.table.borrow_mut().drain()
    }
}
