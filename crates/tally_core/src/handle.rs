//! # Owned Handles
//!
//! A [`Handle`] exclusively owns one payload object together with the
//! [`DestructorClosure`] of the sub-allocator that produced it. Callers never
//! name the concrete allocator: releasing goes through the closure.
//!
//! ## State Machine
//!
//! ```text
//! empty ──alloc──> live ──clear()──> empty
//! ```
//!
//! Dropping a live handle is a logic fault: `clear()` is the only path to
//! destruction.

use std::any::type_name;
use std::cell::{Ref, RefMut};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::error::{ArenaError, ArenaResult};
use crate::memento::Memento;
use crate::payload::{Outcome, Payload, Subtype};

/// Identity a sub-allocator advertises within its arena.
///
/// Ids are assigned from 1 in registration order; 0 is reserved for null.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct AllocatorId(u32);

impl AllocatorId {
    /// The null id carried by null mementos.
    pub const NULL: Self = Self(0);

    /// Wraps a raw id.
    #[inline]
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// The raw id.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Whether this is the null id.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for AllocatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Slot identifier within one sub-allocator.
///
/// - Lower 32 bits: slot index
/// - Upper 32 bits: generation, bumped every time the slot is vacated
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct SlotKey(u64);

impl SlotKey {
    /// Creates a key from index and generation.
    #[inline]
    #[must_use]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self(((generation as u64) << 32) | (index as u64))
    }

    /// The slot index.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0 as u32
    }

    /// The generation of the slot when the key was issued.
    #[inline]
    #[must_use]
    pub const fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot {}v{}", self.index(), self.generation())
    }
}

/// Release capability for objects of type `T`.
///
/// Supplied by whichever sub-allocator produced a handle. The closure does
/// not own the object; it knows how to reclaim the slot holding it.
pub trait DestructorClosure<T: ?Sized> {
    /// Id of the sub-allocator that owns the slots.
    fn allocator_id(&self) -> AllocatorId;

    /// Name of the concrete payload type.
    fn type_name(&self) -> &'static str;

    /// Releases the object at `key`.
    ///
    /// # Errors
    ///
    /// [`ArenaError::DanglingRelease`] if `key` is not live.
    fn destroy(&self, key: SlotKey) -> ArenaResult<()>;

    /// Shared access to the object at `key`.
    ///
    /// # Errors
    ///
    /// [`ArenaError::DanglingRelease`] for stale keys,
    /// [`ArenaError::BorrowConflict`] if the storage is mutably borrowed.
    fn borrow(&self, key: SlotKey) -> ArenaResult<Ref<'_, T>>;

    /// Exclusive access to the object at `key`.
    ///
    /// # Errors
    ///
    /// Same as [`DestructorClosure::borrow`].
    fn borrow_mut(&self, key: SlotKey) -> ArenaResult<RefMut<'_, T>>;
}

/// Narrows a supertype release back to the concrete closure.
struct UpcastClosure<T: Payload, S: ?Sized> {
    inner: Rc<dyn DestructorClosure<T>>,
    _target: PhantomData<fn() -> Box<S>>,
}

impl<T, S> DestructorClosure<S> for UpcastClosure<T, S>
where
    T: Subtype<S>,
    S: ?Sized + 'static,
{
    fn allocator_id(&self) -> AllocatorId {
        self.inner.allocator_id()
    }

    fn type_name(&self) -> &'static str {
        self.inner.type_name()
    }

    fn destroy(&self, key: SlotKey) -> ArenaResult<()> {
        self.inner.destroy(key)
    }

    fn borrow(&self, key: SlotKey) -> ArenaResult<Ref<'_, S>> {
        Ok(Ref::map(self.inner.borrow(key)?, <T as Subtype<S>>::upcast))
    }

    fn borrow_mut(&self, key: SlotKey) -> ArenaResult<RefMut<'_, S>> {
        Ok(RefMut::map(self.inner.borrow_mut(key)?, <T as Subtype<S>>::upcast_mut))
    }
}

struct Live<T: ?Sized + 'static> {
    key: SlotKey,
    closure: Rc<dyn DestructorClosure<T>>,
}

/// Move-only ownership token for one allocated object.
///
/// # Panics
///
/// Dropping a live handle panics: call [`Handle::clear`] first.
///
/// # Example
///
/// ```rust,ignore
/// let mut h = arena.alloc(5i64);
/// assert_eq!(*h.get(), 5);
/// h.clear();
/// ```
pub struct Handle<T: ?Sized + 'static> {
    live: Option<Live<T>>,
}

impl<T: ?Sized + 'static> Handle<T> {
    /// A handle that owns nothing.
    #[inline]
    #[must_use]
    pub const fn empty() -> Self {
        Self { live: None }
    }

    pub(crate) fn new(key: SlotKey, closure: Rc<dyn DestructorClosure<T>>) -> Self {
        Self {
            live: Some(Live { key, closure }),
        }
    }

    /// Whether the handle owns an object.
    #[inline]
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.is_some()
    }

    /// Whether the handle owns nothing.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live.is_none()
    }

    /// Id of the owning sub-allocator.
    #[must_use]
    pub fn allocator_id(&self) -> Option<AllocatorId> {
        self.live.as_ref().map(|live| live.closure.allocator_id())
    }

    /// Slot of the owned object.
    #[must_use]
    pub fn key(&self) -> Option<SlotKey> {
        self.live.as_ref().map(|live| live.key)
    }

    /// Non-owning identity of the owned object.
    #[must_use]
    pub fn raw(&self) -> Option<RawRef<T>> {
        self.live
            .as_ref()
            .map(|live| RawRef::new(live.closure.allocator_id(), live.key))
    }

    /// Shared access to the owned object.
    ///
    /// # Errors
    ///
    /// [`ArenaError::EmptyHandle`] on an empty handle, otherwise whatever the
    /// closure reports.
    pub fn try_get(&self) -> ArenaResult<Ref<'_, T>> {
        let live = self
            .live
            .as_ref()
            .ok_or(ArenaError::EmptyHandle(type_name::<T>()))?;
        live.closure.borrow(live.key)
    }

    /// Exclusive access to the owned object.
    ///
    /// # Errors
    ///
    /// Same as [`Handle::try_get`].
    pub fn try_get_mut(&mut self) -> ArenaResult<RefMut<'_, T>> {
        let live = self
            .live
            .as_ref()
            .ok_or(ArenaError::EmptyHandle(type_name::<T>()))?;
        live.closure.borrow_mut(live.key)
    }

    /// Shared access to the owned object.
    ///
    /// # Panics
    ///
    /// Panics where [`Handle::try_get`] would return an error.
    #[must_use]
    pub fn get(&self) -> Ref<'_, T> {
        match self.try_get() {
            Ok(value) => value,
            Err(err) => panic!("{err}"),
        }
    }

    /// Exclusive access to the owned object.
    ///
    /// # Panics
    ///
    /// Panics where [`Handle::try_get_mut`] would return an error.
    #[must_use]
    pub fn get_mut(&mut self) -> RefMut<'_, T> {
        match self.try_get_mut() {
            Ok(value) => value,
            Err(err) => panic!("{err}"),
        }
    }

    /// Releases the owned object through its closure. No-op when empty.
    ///
    /// The handle is empty afterwards even if the release failed.
    ///
    /// # Errors
    ///
    /// [`ArenaError::DanglingRelease`] if the slot was already reclaimed.
    pub fn try_clear(&mut self) -> ArenaResult<()> {
        match self.live.take() {
            Some(live) => live.closure.destroy(live.key),
            None => Ok(()),
        }
    }

    /// Releases the owned object through its closure. No-op when empty.
    ///
    /// # Panics
    ///
    /// Panics on a dangling release.
    pub fn clear(&mut self) {
        if let Err(err) = self.try_clear() {
            panic!("{err}");
        }
    }

    /// Moves ownership out, leaving `self` empty.
    #[must_use]
    pub fn take(&mut self) -> Self {
        Self {
            live: self.live.take(),
        }
    }

    /// Move-assigns `other` into `self`.
    ///
    /// # Panics
    ///
    /// Panics if `self` is still live: it must be cleared first.
    pub fn assign(&mut self, mut other: Self) {
        assert!(
            self.live.is_none(),
            "handle to {} must be cleared before it is assigned",
            type_name::<T>()
        );
        self.live = other.live.take();
    }

    /// Forgets the object without releasing it. Used once the object has
    /// moved into memento storage.
    pub(crate) fn disarm(&mut self) {
        self.live = None;
    }
}

impl<T: Payload> Handle<T> {
    /// Re-types the handle as a supertype.
    ///
    /// The new handle releases through an adapter closure that forwards to
    /// the concrete one.
    #[must_use]
    pub fn upcast<S>(mut self) -> Handle<S>
    where
        T: Subtype<S>,
        S: ?Sized + 'static,
    {
        match self.live.take() {
            Some(live) => {
                let adapter: Rc<dyn DestructorClosure<S>> = Rc::new(UpcastClosure::<T, S> {
                    inner: live.closure,
                    _target: PhantomData,
                });
                Handle::new(live.key, adapter)
            }
            None => Handle::empty(),
        }
    }
}

impl<T: ?Sized + 'static> Default for Handle<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T: ?Sized + 'static> Drop for Handle<T> {
    fn drop(&mut self) {
        if self.live.is_some() && !std::thread::panicking() {
            panic!("handle to {} must be cleared before drop", type_name::<T>());
        }
    }
}

impl<T: ?Sized + 'static> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw() == other.raw()
    }
}

impl<T: ?Sized + 'static> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.live {
            Some(live) => f
                .debug_struct("Handle")
                .field("type", &live.closure.type_name())
                .field("allocator", &live.closure.allocator_id())
                .field("key", &live.key)
                .finish(),
            None => f.write_str("Handle(empty)"),
        }
    }
}

impl<T: ?Sized + 'static> Outcome for Handle<T> {
    fn release(&mut self) {
        self.clear();
    }
}

/// Non-owning, copyable identity of an allocated object.
pub struct RawRef<T: ?Sized> {
    allocator_id: AllocatorId,
    key: SlotKey,
    _marker: PhantomData<fn() -> Box<T>>,
}

impl<T: ?Sized> RawRef<T> {
    pub(crate) const fn new(allocator_id: AllocatorId, key: SlotKey) -> Self {
        Self {
            allocator_id,
            key,
            _marker: PhantomData,
        }
    }

    /// Id of the owning sub-allocator.
    #[inline]
    #[must_use]
    pub const fn allocator_id(&self) -> AllocatorId {
        self.allocator_id
    }

    /// Slot of the object.
    #[inline]
    #[must_use]
    pub const fn key(&self) -> SlotKey {
        self.key
    }
}

impl<T: ?Sized> Clone for RawRef<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: ?Sized> Copy for RawRef<T> {}

impl<T: ?Sized> PartialEq for RawRef<T> {
    fn eq(&self, other: &Self) -> bool {
        self.allocator_id == other.allocator_id && self.key == other.key
    }
}

impl<T: ?Sized> Eq for RawRef<T> {}

impl<T: ?Sized> Hash for RawRef<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.allocator_id.hash(state);
        self.key.hash(state);
    }
}

impl<T: ?Sized> fmt::Debug for RawRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawRef")
            .field("type", &type_name::<T>())
            .field("allocator", &self.allocator_id)
            .field("key", &self.key)
            .finish()
    }
}

/// Owning graph edge that is either live or relocated.
///
/// Payloads that build object graphs store their children as links so a
/// deactivation pass can turn the whole graph into mementos.
pub enum Link<T: ?Sized + 'static> {
    /// No target.
    Null,
    /// Owns a live object.
    Live(Handle<T>),
    /// Relocated: refers to memento storage.
    Dormant(Memento<T>),
}

impl<T: ?Sized + 'static> Link<T> {
    /// Whether the link has no target.
    #[must_use]
    pub fn is_null(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Live(handle) => handle.is_empty(),
            Self::Dormant(memento) => memento.is_null(),
        }
    }

    /// The live handle, if any.
    #[must_use]
    pub fn handle(&self) -> Option<&Handle<T>> {
        match self {
            Self::Live(handle) => Some(handle),
            _ => None,
        }
    }

    /// Shared access to a live target.
    #[must_use]
    pub fn get(&self) -> Option<Ref<'_, T>> {
        self.handle().and_then(|handle| handle.try_get().ok())
    }

    /// The memento of a relocated target.
    #[must_use]
    pub fn memento(&self) -> Option<Memento<T>> {
        match self {
            Self::Dormant(memento) => Some(*memento),
            _ => None,
        }
    }

    /// Releases a live target and resets the link to [`Link::Null`].
    ///
    /// # Panics
    ///
    /// Panics on a dangling release.
    pub fn clear(&mut self) {
        if let Self::Live(handle) = self {
            handle.clear();
        }
        *self = Self::Null;
    }
}

impl<T: ?Sized + 'static> Default for Link<T> {
    fn default() -> Self {
        Self::Null
    }
}

impl<T: ?Sized + 'static> From<Handle<T>> for Link<T> {
    fn from(handle: Handle<T>) -> Self {
        Self::Live(handle)
    }
}

impl<T: ?Sized + 'static> fmt::Debug for Link<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("Link::Null"),
            Self::Live(handle) => f.debug_tuple("Link::Live").field(handle).finish(),
            Self::Dormant(memento) => f.debug_tuple("Link::Dormant").field(memento).finish(),
        }
    }
}

impl<T: ?Sized + 'static> Outcome for Link<T> {
    fn release(&mut self) {
        self.clear();
    }
}
