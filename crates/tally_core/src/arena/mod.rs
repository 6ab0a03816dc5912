//! # Heterogeneous Arenas
//!
//! An [`Arena`] composes one sub-allocator per member of a [`TypeSet`]. All
//! of them are measuring, or all of them are fixed: the two phases never mix.
//!
//! ## Performance Characteristics
//!
//! | Operation         | Measuring      | Fixed |
//! |-------------------|----------------|-------|
//! | alloc             | O(log n) + heap | O(1) |
//! | clear             | O(log n)       | O(1)  |
//! | resolve (`dyn S`) | O(views of S)  | O(views of S) |

mod resolve;
mod types;

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::config::CapacityPlan;
use crate::error::{ArenaError, ArenaResult};
use crate::handle::{AllocatorId, Handle};
use crate::memento::{Memento, Reloc};
use crate::memory::{ArenaKind, Mode};
use crate::payload::Payload;
use crate::profile::{TypeUsage, UsageProfile};

pub(crate) use resolve::SupertypeAccess;
pub use types::{TypeSet, TypeSetBuilder};

use resolve::{probe, ErasedSub, Registered, Sizing};

/// One sub-allocator per registered type, plus the supertype views used to
/// resolve abstract references.
///
/// Arenas are single-threaded and are not `Clone`: a second arena built from
/// the same type set and plan resolves the same mementos, but holds none of
/// the first arena's records.
pub struct Arena {
    kind: ArenaKind,
    /// Indexed by `allocator id - 1`.
    subs: Vec<Box<dyn ErasedSub>>,
    by_type: HashMap<TypeId, usize>,
    views: HashMap<TypeId, Vec<Box<dyn Any>>>,
}

impl Arena {
    /// Creates a heap-backed arena that records peak usage per type.
    #[must_use]
    pub fn measuring(types: &TypeSet) -> Self {
        let arena = Self::build(types, ArenaKind::Measuring, |_| Ok(None));
        // Measuring construction has no failure path.
        match arena {
            Ok(arena) => arena,
            Err(err) => unreachable!("measuring arena: {err}"),
        }
    }

    /// Creates a fixed arena sized by `plan`.
    ///
    /// # Errors
    ///
    /// [`ArenaError::InvalidConfig`] if `plan` has no capacity for a member.
    pub fn fixed(types: &TypeSet, plan: &CapacityPlan) -> ArenaResult<Self> {
        Self::build(types, ArenaKind::Fixed, |name| {
            let slots = plan
                .capacity(name)
                .ok_or_else(|| ArenaError::InvalidConfig(format!("no capacity planned for {name}")))?;
            let records = plan.record_capacity(name).unwrap_or(slots);
            Ok(Some(Sizing { slots, records }))
        })
    }

    fn build(
        types: &TypeSet,
        kind: ArenaKind,
        mut sizing: impl FnMut(&str) -> ArenaResult<Option<Sizing>>,
    ) -> ArenaResult<Self> {
        let mut subs = Vec::with_capacity(types.len());
        let mut by_type = HashMap::with_capacity(types.len());
        let mut views: HashMap<TypeId, Vec<Box<dyn Any>>> = HashMap::new();

        for (id, entry) in types.entries() {
            let sub = (entry.build)(id, &entry.name, sizing(&entry.name)?);
            for view in &entry.views {
                if let Some(access) = (view.make)(&*sub) {
                    views.entry(view.target).or_default().push(access);
                }
            }
            by_type.insert(entry.type_id, subs.len());
            subs.push(sub);
        }

        let arena = Self {
            kind,
            subs,
            by_type,
            views,
        };
        tracing::debug!(%kind, types = arena.subs.len(), slots = ?arena.total_capacity(), "arena built");
        Ok(arena)
    }

    /// Measuring or fixed.
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> ArenaKind {
        self.kind
    }

    /// Current mode. Every sub-allocator shares it.
    #[must_use]
    pub fn mode(&self) -> Mode {
        self.subs.first().map_or(Mode::Active, |sub| sub.mode())
    }

    /// Allocates `value` in the sub-allocator owning `T`.
    ///
    /// # Errors
    ///
    /// - [`ArenaError::UnregisteredType`] if `T` is not a member.
    /// - [`ArenaError::CapacityExhausted`] if a fixed table is full.
    /// - [`ArenaError::ModeViolation`] outside active mode.
    pub fn try_alloc<T: Payload>(&self, value: T) -> ArenaResult<Handle<T>> {
        let registered = match self.registered::<T>() {
            Ok(registered) => registered,
            Err(err) => {
                let mut value = value;
                value.release_links();
                return Err(err);
            }
        };
        let key = registered.sub.try_insert(value)?;
        Ok(Handle::new(key, Rc::clone(&registered.closure)))
    }

    /// Allocates `value`.
    ///
    /// # Panics
    ///
    /// Panics on any error of [`Arena::try_alloc`]. In a fixed arena,
    /// exhaustion means the workload did not replay what was measured.
    pub fn alloc<T: Payload>(&self, value: T) -> Handle<T> {
        match self.try_alloc(value) {
            Ok(handle) => handle,
            Err(err) => panic!("{err}"),
        }
    }

    /// Releases `handle` after checking that this arena can resolve it.
    ///
    /// # Errors
    ///
    /// [`ArenaError::AllocatorIdentityMismatch`] for a handle of a foreign
    /// sub-allocator, plus the errors of [`Handle::try_clear`].
    pub fn try_free<T: ?Sized + 'static>(&self, handle: &mut Handle<T>) -> ArenaResult<()> {
        if let Some(id) = handle.allocator_id() {
            self.resolve::<T>(id)?;
        }
        handle.try_clear()
    }

    /// Releases `handle`.
    ///
    /// # Panics
    ///
    /// Panics on any error of [`Arena::try_free`].
    pub fn free<T: ?Sized + 'static>(&self, handle: &mut Handle<T>) {
        if let Err(err) = self.try_free(handle) {
            panic!("{err}");
        }
    }

    /// Allocator id of `T`.
    ///
    /// # Errors
    ///
    /// [`ArenaError::UnregisteredType`] if `T` is not a member.
    pub fn allocator_id<T: Payload>(&self) -> ArenaResult<AllocatorId> {
        Ok(self.registered::<T>()?.sub.allocator_id())
    }

    /// Counters of `T`.
    ///
    /// # Errors
    ///
    /// [`ArenaError::UnregisteredType`] if `T` is not a member.
    pub fn usage<T: Payload>(&self) -> ArenaResult<TypeUsage> {
        Ok(self.registered::<T>()?.sub.usage())
    }

    /// Number of live objects of `T`, 0 for non-members.
    #[must_use]
    pub fn live_objects<T: Payload>(&self) -> usize {
        self.usage::<T>().map_or(0, |usage| usage.current)
    }

    /// Slot capacity of `T`; `None` for measuring arenas and non-members.
    #[must_use]
    pub fn capacity<T: Payload>(&self) -> Option<usize> {
        self.registered::<T>().ok()?.sub.capacity()
    }

    /// Memento records of `T` handed out so far, 0 for non-members.
    #[must_use]
    pub fn records_used<T: Payload>(&self) -> usize {
        self.registered::<T>()
            .map_or(0, |registered| registered.sub.records().used())
    }

    /// Usage of every member, keyed by registered name.
    #[must_use]
    pub fn profile(&self) -> UsageProfile {
        let mut profile = UsageProfile::new();
        for sub in &self.subs {
            profile.insert(sub.name(), sub.usage());
        }
        profile
    }

    /// The plan this arena's capacities correspond to.
    ///
    /// For a measuring arena, slot capacities are the peaks observed so far.
    #[must_use]
    pub fn capacity_plan(&self) -> CapacityPlan {
        self.subs.iter().fold(CapacityPlan::new(), |plan, sub| match sub.capacity() {
            Some(slots) => plan
                .with_capacity(sub.name(), slots)
                .with_record_capacity(sub.name(), sub.record_capacity()),
            None => plan.with_capacity(sub.name(), sub.usage().peak),
        })
    }

    /// Moves the memento storage of `source` into this arena.
    ///
    /// Both arenas must be built from the same [`TypeSet`], `source` must be
    /// in memento mode, and this arena must hold no live objects and no
    /// records. Every record keeps its offset, so mementos produced against
    /// `source` resolve here. Afterwards this arena is in memento mode;
    /// activate it with an [`Activator`](crate::Activator) for writing.
    ///
    /// Returns the number of records moved.
    ///
    /// # Errors
    ///
    /// - [`ArenaError::ModeViolation`] if `source` is not in memento mode.
    /// - [`ArenaError::InvalidConfig`] if the arenas differ in shape, a record
    ///   store here is too small or already used, or live objects remain.
    /// - [`ArenaError::AllocatorIdentityMismatch`] if ids differ.
    ///
    /// Nothing moves unless every member passes these checks.
    pub fn adopt_records(&self, source: &mut Arena) -> ArenaResult<usize> {
        source.expect_mode(Mode::Memento, "record transfer")?;
        if source.subs.len() != self.subs.len() {
            return Err(ArenaError::InvalidConfig(format!(
                "source arena has {} members, target has {}",
                source.subs.len(),
                self.subs.len()
            )));
        }
        for (from, to) in source.subs.iter().zip(&self.subs) {
            from.check_transfer(&**to)?;
        }

        let mut moved = 0;
        for (from, to) in source.subs.iter().zip(&self.subs) {
            moved += from.transfer_records(&**to)?;
        }
        self.set_mode(Mode::Memento);
        tracing::info!(moved, from = %source.kind, to = %self.kind, "memento records adopted");
        Ok(moved)
    }

    /// Read-only activation. Legal in any mode.
    ///
    /// # Errors
    ///
    /// - [`ArenaError::UninitializedMemento`]
    /// - [`ArenaError::AllocatorIdentityMismatch`] and
    ///   [`ArenaError::AmbiguousResolution`] from the resolution probe.
    /// - [`ArenaError::OffsetOutOfRange`]
    pub fn activate_ref<T: ?Sized + 'static>(&self, memento: &Memento<T>) -> ArenaResult<Reloc<T>> {
        self.relocate(memento, false)
    }

    /// Read-only reference to the record of `T` at `offset`.
    ///
    /// # Errors
    ///
    /// [`ArenaError::UnregisteredType`] plus the errors of [`Arena::activate_ref`].
    pub fn reference_at<T: Payload>(&self, offset: usize) -> ArenaResult<Reloc<T>> {
        let memento = Memento::new(self.allocator_id::<T>()?, offset);
        self.activate_ref(&memento)
    }

    pub(crate) fn relocate<T: ?Sized + 'static>(
        &self,
        memento: &Memento<T>,
        writable: bool,
    ) -> ArenaResult<Reloc<T>> {
        if !memento.is_initialized() {
            return Err(ArenaError::UninitializedMemento);
        }
        if memento.is_null() {
            return Ok(Reloc::null(*memento));
        }
        let access = self.resolve::<T>(memento.allocator_id())?;
        access.check_offset(memento.offset())?;
        Ok(Reloc::new(*memento, access, writable))
    }

    /// Finds the sub-allocator behind a reference of (possibly abstract) type `S`.
    pub(crate) fn resolve<S: ?Sized + 'static>(
        &self,
        id: AllocatorId,
    ) -> ArenaResult<Rc<dyn SupertypeAccess<S>>> {
        let views = self
            .views
            .get(&TypeId::of::<S>())
            .ok_or(ArenaError::UnregisteredType(type_name::<S>()))?;
        probe::<S>(views, id)
    }

    pub(crate) fn expect_mode(&self, expected: Mode, operation: &'static str) -> ArenaResult<()> {
        match self.subs.iter().find(|sub| sub.mode() != expected) {
            Some(sub) => Err(ArenaError::ModeViolation {
                type_name: sub.type_name(),
                operation,
                expected: expected.as_str(),
            }),
            None => Ok(()),
        }
    }

    pub(crate) fn set_mode(&self, mode: Mode) {
        for sub in &self.subs {
            sub.set_mode(mode);
        }
    }

    pub(crate) fn set_torn_down(&self, torn_down: bool) {
        for sub in &self.subs {
            sub.set_torn_down(torn_down);
        }
    }

    /// Reclaims every live object, returning how many there were. Every
    /// sub-allocator is marked torn down first, so releases issued by the
    /// reclaimed payloads are ignored whichever type they target.
    pub(crate) fn teardown(&self, include_records: bool) -> usize {
        self.set_torn_down(true);
        self.subs
            .iter()
            .map(|sub| sub.teardown(include_records))
            .sum()
    }

    fn registered<T: Payload>(&self) -> ArenaResult<&Registered<T>> {
        self.by_type
            .get(&TypeId::of::<T>())
            .and_then(|&index| self.subs[index].as_any().downcast_ref::<Registered<T>>())
            .ok_or(ArenaError::UnregisteredType(type_name::<T>()))
    }

    fn total_capacity(&self) -> Option<usize> {
        self.subs.iter().map(|sub| sub.capacity()).sum()
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        let leaked = self.teardown(true);
        if leaked > 0 {
            tracing::warn!(kind = %self.kind, leaked, "arena dropped with live objects");
        }
    }
}

impl fmt::Debug for Arena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for sub in &self.subs {
            map.entry(&sub.name(), &(sub.allocator_id(), sub.usage(), sub.capacity()));
        }
        map.finish()
    }
}
