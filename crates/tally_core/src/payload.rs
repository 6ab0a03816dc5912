//! # Payload Traits
//!
//! - [`Payload`]: implemented by every member of a [`TypeSet`](crate::TypeSet).
//! - [`Subtype`]: lets a handle or memento of a concrete payload be viewed
//!   through an abstract supertype (usually a `dyn Trait`).
//! - [`Outcome`]: lets the driver release whatever a workload returns.
//!
//! ```rust,ignore
//! trait Shape { fn area(&self) -> f64; }
//! struct Circle { r: f64 }
//! impl Shape for Circle { fn area(&self) -> f64 { 3.14 * self.r * self.r } }
//! impl Payload for Circle {}
//! tally_core::subtype!(Shape => Circle);
//! ```

use crate::error::ArenaResult;
use crate::memento::Deactivator;

/// A type an arena may hold.
///
/// Payloads that own [`Link`](crate::Link)s or [`Handle`](crate::Handle)s
/// must release them in [`Payload::release_links`], since a live handle
/// cannot be dropped.
pub trait Payload: 'static {
    /// Called right before the payload is dropped by its sub-allocator.
    fn release_links(&mut self) {}

    /// Called during a deactivation pass before the payload moves into
    /// memento storage. Owned links become mementos here.
    ///
    /// Every owned [`Handle`](crate::Handle) must be converted too, through
    /// [`Deactivator::deactivate`] or [`Deactivator::deactivate_link`]. When
    /// memento storage overflows the payload is dropped right after this
    /// hook without [`Payload::release_links`], so a handle left live here
    /// panics on drop.
    ///
    /// # Errors
    ///
    /// Propagates any relocation failure of a child reference.
    fn deactivate_links(&mut self, _deactivator: &mut Deactivator<'_>) -> ArenaResult<()> {
        Ok(())
    }
}

/// `Self` can be viewed as `S`.
///
/// Every payload is trivially a subtype of itself. Use [`subtype!`](crate::subtype)
/// to declare trait-object supertypes.
pub trait Subtype<S: ?Sized>: Payload {
    /// Shared view as the supertype.
    fn upcast(&self) -> &S;
    /// Exclusive view as the supertype.
    fn upcast_mut(&mut self) -> &mut S;
}

impl<T: Payload> Subtype<T> for T {
    #[inline]
    fn upcast(&self) -> &T {
        self
    }

    #[inline]
    fn upcast_mut(&mut self) -> &mut T {
        self
    }
}

/// Declares concrete payloads as subtypes of `dyn Trait`.
///
/// ```rust,ignore
/// tally_core::subtype!(Shape => Circle, Square);
/// ```
#[macro_export]
macro_rules! subtype {
    ($super:path => $($concrete:ty),+ $(,)?) => {
        $(
            impl $crate::Subtype<dyn $super> for $concrete {
                #[inline]
                fn upcast(&self) -> &(dyn $super + 'static) {
                    self
                }

                #[inline]
                fn upcast_mut(&mut self) -> &mut (dyn $super + 'static) {
                    self
                }
            }
        )+
    };
}

/// A workload result that can give back everything it owns.
///
/// The driver releases the measuring pass's result through this trait
/// before the measuring arena goes away.
pub trait Outcome {
    /// Clears every handle reachable from `self`.
    fn release(&mut self) {}
}

macro_rules! plain_data {
    ($($t:ty),* $(,)?) => {
        $(
            impl Payload for $t {}
            impl Outcome for $t {}
        )*
    };
}

plain_data!(
    (), bool, char, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64,
    String,
);

impl<T: Outcome> Outcome for Option<T> {
    fn release(&mut self) {
        if let Some(inner) = self {
            inner.release();
        }
    }
}

impl<T: Outcome> Outcome for Vec<T> {
    fn release(&mut self) {
        for item in self.iter_mut() {
            item.release();
        }
    }
}

impl<A: Outcome, B: Outcome> Outcome for (A, B) {
    fn release(&mut self) {
        self.0.release();
        self.1.release();
    }
}

impl<A: Outcome, B: Outcome, C: Outcome> Outcome for (A, B, C) {
    fn release(&mut self) {
        self.0.release();
        self.1.release();
        self.2.release();
    }
}
