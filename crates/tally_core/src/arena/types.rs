//! # Type Sets
//!
//! The closed list of payload types an arena may hold. Allocator ids are
//! assigned `1..=n` in registration order; `0` is reserved for null.

use std::any::{type_name, TypeId};
use std::collections::HashSet;
use std::fmt;

use crate::arena::resolve::{build_sub, make_view, ErasedSub, Sizing};
use crate::error::{ArenaError, ArenaResult};
use crate::handle::AllocatorId;
use crate::payload::{Payload, Subtype};

pub(crate) type BuildFn = fn(AllocatorId, &str, Option<Sizing>) -> Box<dyn ErasedSub>;
pub(crate) type MakeViewFn = fn(&dyn ErasedSub) -> Option<Box<dyn std::any::Any>>;

/// A supertype view of one registered type.
#[derive(Clone, Copy)]
pub(crate) struct ViewEntry {
    pub(crate) target: TypeId,
    pub(crate) target_name: &'static str,
    pub(crate) make: MakeViewFn,
}

#[derive(Clone)]
pub(crate) struct TypeEntry {
    pub(crate) type_id: TypeId,
    pub(crate) type_name: &'static str,
    pub(crate) name: String,
    pub(crate) build: BuildFn,
    pub(crate) views: Vec<ViewEntry>,
}

/// Fixed, closed set of payload types.
///
/// ```rust,ignore
/// let types = TypeSet::builder()
///     .register_named::<Circle>("circle")
///     .register_named::<Square>("square")
///     .register_as::<Circle, dyn Shape>()
///     .register_as::<Square, dyn Shape>()
///     .build()?;
/// ```
#[derive(Clone)]
pub struct TypeSet {
    entries: Vec<TypeEntry>,
}

impl TypeSet {
    /// Starts an empty builder.
    #[must_use]
    pub fn builder() -> TypeSetBuilder {
        TypeSetBuilder::default()
    }

    /// Number of registered types.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no type is registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered names, in allocator-id order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.name.as_str())
    }

    /// Whether `T` is a member.
    #[must_use]
    pub fn contains<T: Payload>(&self) -> bool {
        self.position::<T>().is_some()
    }

    /// Registered name of `T`.
    #[must_use]
    pub fn name_of<T: Payload>(&self) -> Option<&str> {
        self.position::<T>()
            .map(|index| self.entries[index].name.as_str())
    }

    /// Allocator id every arena built from this set assigns to `T`.
    #[must_use]
    pub fn allocator_id<T: Payload>(&self) -> Option<AllocatorId> {
        self.position::<T>().map(id_at)
    }

    pub(crate) fn entries(&self) -> impl Iterator<Item = (AllocatorId, &TypeEntry)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(index, entry)| (id_at(index), entry))
    }

    fn position<T: Payload>(&self) -> Option<usize> {
        let wanted = TypeId::of::<T>();
        self.entries.iter().position(|entry| entry.type_id == wanted)
    }
}

impl fmt::Debug for TypeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

#[allow(clippy::cast_possible_truncation)]
fn id_at(index: usize) -> AllocatorId {
    AllocatorId::new(index as u32 + 1)
}

struct PendingView {
    source: TypeId,
    source_name: &'static str,
    view: ViewEntry,
}

/// Accumulates registrations. Errors surface in [`TypeSetBuilder::build`].
#[derive(Default)]
pub struct TypeSetBuilder {
    entries: Vec<TypeEntry>,
    views: Vec<PendingView>,
}

impl TypeSetBuilder {
    /// Registers `T` under its Rust type name.
    #[must_use]
    pub fn register<T: Payload>(self) -> Self {
        self.register_named::<T>(type_name::<T>())
    }

    /// Registers `T` under `name`, the key used by profiles and capacity plans.
    #[must_use]
    pub fn register_named<T: Payload>(mut self, name: impl Into<String>) -> Self {
        self.entries.push(TypeEntry {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            name: name.into(),
            build: build_sub::<T>,
            views: vec![ViewEntry {
                target: TypeId::of::<T>(),
                target_name: type_name::<T>(),
                make: make_view::<T, T>,
            }],
        });
        self
    }

    /// Makes references to `T` resolvable as references to `S`.
    ///
    /// `T` must also be registered, before or after this call.
    #[must_use]
    pub fn register_as<T, S>(mut self) -> Self
    where
        T: Subtype<S>,
        S: ?Sized + 'static,
    {
        self.views.push(PendingView {
            source: TypeId::of::<T>(),
            source_name: type_name::<T>(),
            view: ViewEntry {
                target: TypeId::of::<S>(),
                target_name: type_name::<S>(),
                make: make_view::<T, S>,
            },
        });
        self
    }

    /// Validates the registrations.
    ///
    /// # Errors
    ///
    /// - [`ArenaError::DuplicateType`] if a type, a name or a supertype view
    ///   is registered twice.
    /// - [`ArenaError::UnregisteredType`] if a view names an unregistered type.
    pub fn build(self) -> ArenaResult<TypeSet> {
        let Self { mut entries, views } = self;

        let mut seen_types = HashSet::new();
        let mut seen_names = HashSet::new();
        for entry in &entries {
            if !seen_types.insert(entry.type_id) {
                return Err(ArenaError::DuplicateType(entry.type_name.to_owned()));
            }
            if !seen_names.insert(entry.name.as_str()) {
                return Err(ArenaError::DuplicateType(entry.name.clone()));
            }
        }

        for pending in views {
            let entry = entries
                .iter_mut()
                .find(|entry| entry.type_id == pending.source)
                .ok_or(ArenaError::UnregisteredType(pending.source_name))?;
            if entry.views.iter().any(|view| view.target == pending.view.target) {
                return Err(ArenaError::DuplicateType(format!(
                    "{} as {}",
                    pending.source_name, pending.view.target_name
                )));
            }
            entry.views.push(pending.view);
        }

        tracing::debug!(types = entries.len(), "type set built");
        Ok(TypeSet { entries })
    }
}
