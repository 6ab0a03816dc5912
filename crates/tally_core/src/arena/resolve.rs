//! Type-erased sub-allocators and supertype views.
//!
//! Each registered type `T` owns one [`Registered<T>`]. For every supertype
//! `S` it was registered as (itself included), the arena keeps an
//! `Rc<dyn SupertypeAccess<S>>` under `TypeId::of::<S>()`. Resolving a
//! reference of type `S` probes that list for the recorded allocator id.

use std::any::{type_name, Any};
use std::cell::{Ref, RefMut};
use std::marker::PhantomData;
use std::rc::Rc;

use crate::error::{ArenaError, ArenaResult};
use crate::handle::{AllocatorId, DestructorClosure, SlotKey};
use crate::memento::{deactivate_slot, Deactivator};
use crate::memory::{teardown, FixedSubAllocator, MeasuringSubAllocator, Mode, SubAllocator};
use crate::payload::{Payload, Subtype};
use crate::profile::TypeUsage;

/// Slot and record capacity of one fixed sub-allocator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Sizing {
    pub(crate) slots: usize,
    pub(crate) records: usize,
}

/// Object-safe face of a [`Registered<T>`].
pub(crate) trait ErasedSub {
    fn as_any(&self) -> &dyn Any;
    fn name(&self) -> &str;
    fn type_name(&self) -> &'static str;
    fn allocator_id(&self) -> AllocatorId;
    fn usage(&self) -> TypeUsage;
    fn capacity(&self) -> Option<usize>;
    fn record_capacity(&self) -> usize;
    fn mode(&self) -> Mode;
    fn set_mode(&self, mode: Mode);
    fn set_torn_down(&self, torn_down: bool);
    fn teardown(&self, include_records: bool) -> usize;
    fn check_transfer(&self, target: &dyn ErasedSub) -> ArenaResult<()>;
    fn transfer_records(&self, target: &dyn ErasedSub) -> ArenaResult<usize>;
}

/// One registered type: its sub-allocator and the closure handed to handles.
pub(crate) struct Registered<T: Payload> {
    pub(crate) sub: Rc<dyn SubAllocator<T>>,
    pub(crate) closure: Rc<dyn DestructorClosure<T>>,
    name: String,
}

impl<T: Payload> Registered<T> {
    fn new<A: SubAllocator<T> + 'static>(sub: Rc<A>, name: &str) -> Self {
        let closure: Rc<dyn DestructorClosure<T>> = Rc::<A>::clone(&sub);
        Self {
            sub,
            closure,
            name: name.to_owned(),
        }
    }

    /// The sub-allocator of `T` in another arena, which must advertise the
    /// same id.
    fn counterpart<'t>(&self, target: &'t dyn ErasedSub) -> ArenaResult<&'t Self> {
        let other = target
            .as_any()
            .downcast_ref::<Self>()
            .ok_or_else(|| ArenaError::InvalidConfig(format!("target arena has no {} allocator", self.name)))?;
        if other.sub.allocator_id() != self.sub.allocator_id() {
            return Err(ArenaError::AllocatorIdentityMismatch {
                type_name: type_name::<T>(),
                allocator_id: self.sub.allocator_id(),
            });
        }
        Ok(other)
    }
}

impl<T: Payload> ErasedSub for Registered<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn type_name(&self) -> &'static str {
        type_name::<T>()
    }

    fn allocator_id(&self) -> AllocatorId {
        self.sub.allocator_id()
    }

    fn usage(&self) -> TypeUsage {
        self.sub.usage()
    }

    fn capacity(&self) -> Option<usize> {
        self.sub.capacity()
    }

    fn record_capacity(&self) -> usize {
        self.sub.records().capacity()
    }

    fn mode(&self) -> Mode {
        self.sub.records().mode()
    }

    fn set_mode(&self, mode: Mode) {
        self.sub.records().set_mode(mode);
    }

    fn set_torn_down(&self, torn_down: bool) {
        self.sub.set_torn_down(torn_down);
    }

    fn teardown(&self, include_records: bool) -> usize {
        teardown::<T, _>(&*self.sub, include_records)
    }

    fn check_transfer(&self, target: &dyn ErasedSub) -> ArenaResult<()> {
        let other = self.counterpart(target)?;
        let live = other.sub.usage().current;
        if live > 0 {
            return Err(ArenaError::InvalidConfig(format!(
                "target {} allocator still holds {live} live objects",
                other.name
            )));
        }
        self.sub.records().check_move_into(other.sub.records())
    }

    fn transfer_records(&self, target: &dyn ErasedSub) -> ArenaResult<usize> {
        let other = self.counterpart(target)?;
        self.sub.records().move_into(other.sub.records())
    }
}

/// Instantiates the sub-allocator for `T`: measuring without sizing, fixed with it.
pub(crate) fn build_sub<T: Payload>(
    id: AllocatorId,
    name: &str,
    sizing: Option<Sizing>,
) -> Box<dyn ErasedSub> {
    match sizing {
        None => Box::new(Registered::new(Rc::new(MeasuringSubAllocator::<T>::new(id)), name)),
        Some(sizing) => Box::new(Registered::new(
            Rc::new(FixedSubAllocator::<T>::new(id, sizing.slots, sizing.records)),
            name,
        )),
    }
}

/// Access to the objects of one concrete type, viewed as `S`.
pub(crate) trait SupertypeAccess<S: ?Sized> {
    /// Id of the underlying concrete sub-allocator.
    fn allocator_id(&self) -> AllocatorId;

    /// Name of the underlying concrete type.
    fn type_name(&self) -> &'static str;

    /// Moves the live object at `key` into memento storage and returns its
    /// offset (0 on overflow).
    fn deactivate(&self, key: SlotKey, deactivator: &mut Deactivator<'_>) -> ArenaResult<usize>;

    /// Rejects offsets beyond the record store.
    fn check_offset(&self, offset: usize) -> ArenaResult<()>;

    /// Shared view of the record at `offset`.
    fn record(&self, offset: usize) -> ArenaResult<Option<Ref<'_, S>>>;

    /// Exclusive view of the record at `offset`; requires active mode.
    fn record_mut(&self, offset: usize) -> ArenaResult<Option<RefMut<'_, S>>>;
}

struct SubtypeView<T: Payload, S: ?Sized> {
    sub: Rc<dyn SubAllocator<T>>,
    _target: PhantomData<fn() -> Box<S>>,
}

impl<T, S> SupertypeAccess<S> for SubtypeView<T, S>
where
    T: Subtype<S>,
    S: ?Sized + 'static,
{
    fn allocator_id(&self) -> AllocatorId {
        self.sub.allocator_id()
    }

    fn type_name(&self) -> &'static str {
        type_name::<T>()
    }

    fn deactivate(&self, key: SlotKey, deactivator: &mut Deactivator<'_>) -> ArenaResult<usize> {
        deactivate_slot(Rc::clone(&self.sub), key, deactivator)
    }

    fn check_offset(&self, offset: usize) -> ArenaResult<()> {
        self.sub.records().check_offset(offset)
    }

    fn record(&self, offset: usize) -> ArenaResult<Option<Ref<'_, S>>> {
        let record = self.sub.records().get(offset)?;
        Ok(record.map(|r| Ref::map(r, <T as Subtype<S>>::upcast)))
    }

    fn record_mut(&self, offset: usize) -> ArenaResult<Option<RefMut<'_, S>>> {
        let records = self.sub.records();
        if records.mode() != Mode::Active {
            return Err(ArenaError::ModeViolation {
                type_name: type_name::<T>(),
                operation: "mutable activation",
                expected: Mode::Active.as_str(),
            });
        }
        let record = records.get_mut(offset)?;
        Ok(record.map(|r| RefMut::map(r, <T as Subtype<S>>::upcast_mut)))
    }
}

/// Builds the `S` view of a registered `T`. Stored as a function pointer in
/// the type set, so the arena can build views without naming `T`.
pub(crate) fn make_view<T, S>(erased: &dyn ErasedSub) -> Option<Box<dyn Any>>
where
    T: Subtype<S>,
    S: ?Sized + 'static,
{
    let registered = erased.as_any().downcast_ref::<Registered<T>>()?;
    let view: Rc<dyn SupertypeAccess<S>> = Rc::new(SubtypeView::<T, S> {
        sub: Rc::clone(&registered.sub),
        _target: PhantomData,
    });
    Some(Box::new(view))
}

/// Finds the single view of `S` whose sub-allocator advertises `id`.
///
/// # Errors
///
/// [`ArenaError::AllocatorIdentityMismatch`] when nothing matches and
/// [`ArenaError::AmbiguousResolution`] when more than one view does.
pub(crate) fn probe<S: ?Sized + 'static>(
    views: &[Box<dyn Any>],
    id: AllocatorId,
) -> ArenaResult<Rc<dyn SupertypeAccess<S>>> {
    let mut matched = views
        .iter()
        .filter_map(|view| view.downcast_ref::<Rc<dyn SupertypeAccess<S>>>())
        .filter(|access| access.allocator_id() == id);

    let found = matched.next().ok_or(ArenaError::AllocatorIdentityMismatch {
        type_name: type_name::<S>(),
        allocator_id: id,
    })?;
    let extra = matched.count();
    if extra > 0 {
        return Err(ArenaError::AmbiguousResolution {
            type_name: type_name::<S>(),
            allocator_id: id,
            matches: extra + 1,
        });
    }
    Ok(Rc::clone(found))
}
