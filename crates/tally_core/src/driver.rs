//! # Two-Phase Execution
//!
//! ```text
//! workload ──pass 1──> measuring arena ──> UsageProfile ──> CapacityPlan
//!                                                              │
//! workload ──pass 2──> fixed arena (sized by the plan) <───────┘
//!    │
//!    └──> Execution { result, arena, profile, plan }
//! ```
//!
//! The workload must be a pure function of the arena it is given and perform
//! the same sequence of allocations and releases on both passes. A workload
//! that does not is caught either as capacity exhaustion during pass 2 or,
//! with [`SizingConfig::verify_replay`], as [`ArenaError::ReplayDiverged`].

use crate::arena::{Arena, TypeSet};
use crate::config::{CapacityPlan, SizingConfig};
use crate::error::{ArenaError, ArenaResult};
use crate::handle::Handle;
use crate::memento::{Activator, DeactivationLedger, Deactivator, Memento, Reloc};
use crate::memory::Mode;
use crate::payload::Outcome;
use crate::profile::UsageProfile;

/// Runs `workload` twice with exact sizing.
///
/// # Errors
///
/// See [`run_with`].
pub fn run<R, F>(types: &TypeSet, workload: F) -> ArenaResult<Execution<R>>
where
    R: Outcome,
    F: FnMut(&Arena) -> R,
{
    run_with(types, &SizingConfig::default(), workload)
}

/// Runs `workload` against a measuring arena, sizes a fixed arena from the
/// observed peaks and `config`, then runs `workload` again against it.
///
/// The result of the first pass is released before its arena goes away.
///
/// # Errors
///
/// - [`ArenaError::InvalidConfig`] if the plan cannot be applied.
/// - [`ArenaError::ReplayDiverged`] if `config.verify_replay` is set and the
///   second pass peaked differently. The second result is released first.
///
/// # Panics
///
/// Panics if the workload panics, including on capacity exhaustion when it
/// allocates with [`Arena::alloc`].
pub fn run_with<R, F>(types: &TypeSet, config: &SizingConfig, mut workload: F) -> ArenaResult<Execution<R>>
where
    R: Outcome,
    F: FnMut(&Arena) -> R,
{
    let profile = {
        let measuring = Arena::measuring(types);
        let mut first = workload(&measuring);
        first.release();
        measuring.profile()
    };
    tracing::info!(types = profile.len(), total_peak = profile.total_peak(), "measuring pass complete");

    let plan = CapacityPlan::from_profile(&profile, config);
    tracing::debug!(total_slots = plan.total_slots(), headroom = config.headroom, "capacity plan");

    let arena = Arena::fixed(types, &plan)?;
    let mut result = workload(&arena);
    tracing::info!("fixed pass complete");

    if config.verify_replay {
        let replayed = arena.profile();
        for (name, measured) in profile.iter() {
            let replayed_peak = replayed.peak(name);
            if replayed_peak != measured.peak {
                result.release();
                return Err(ArenaError::ReplayDiverged {
                    type_name: name.to_owned(),
                    measured: measured.peak,
                    replayed: replayed_peak,
                });
            }
        }
    }

    Ok(Execution {
        result,
        arena,
        profile,
        plan,
    })
}

/// Outcome of a two-phase run.
///
/// Handles inside `result` belong to `arena` and must be released before
/// `result` is dropped, through [`Execution::release`] or a deactivation.
#[derive(Debug)]
pub struct Execution<R> {
    /// What the fixed pass returned.
    pub result: R,
    /// The fixed arena holding everything `result` references.
    pub arena: Arena,
    /// Peaks observed by the measuring pass.
    pub profile: UsageProfile,
    /// Capacities the fixed arena was built with.
    pub plan: CapacityPlan,
}

impl<R: Outcome> Execution<R> {
    /// Releases the result, then drops the arena.
    pub fn release(mut self) {
        self.result.release();
    }

    /// Runs one deactivation pass over the result.
    ///
    /// `walk` converts whatever the caller wants to transport into mementos.
    /// Anything it leaves live is reclaimed when the pass ends.
    ///
    /// # Errors
    ///
    /// Errors of [`Deactivator::new`] and of `walk`. The result is released
    /// either way.
    pub fn deactivate_with<M, G>(self, walk: G) -> ArenaResult<Frozen<M>>
    where
        G: FnOnce(&mut R, &mut Deactivator<'_>) -> ArenaResult<M>,
    {
        let Self {
            mut result,
            mut arena,
            ..
        } = self;

        let mut deactivator = match Deactivator::new(&mut arena) {
            Ok(deactivator) => deactivator,
            Err(err) => {
                result.release();
                return Err(err);
            }
        };
        let walked = walk(&mut result, &mut deactivator);
        let ledger = deactivator.finish();
        // Releases are ignored after the pass, this only empties the handles.
        result.release();

        Ok(Frozen {
            value: walked?,
            arena,
            ledger,
        })
    }
}

impl<T: ?Sized + 'static> Execution<Handle<T>> {
    /// Deactivates the returned handle and everything reachable from it.
    ///
    /// # Errors
    ///
    /// See [`Execution::deactivate_with`].
    pub fn freeze(self) -> ArenaResult<Frozen<Memento<T>>> {
        self.deactivate_with(|handle, deactivator| deactivator.deactivate(handle))
    }
}

/// A deactivated result and the arena holding its records.
#[derive(Debug)]
pub struct Frozen<M> {
    /// Mementos produced by the pass.
    pub value: M,
    /// Arena in memento mode (active again once thawed).
    pub arena: Arena,
    /// What the pass recorded, including overflow.
    pub ledger: DeactivationLedger,
}

impl<M> Frozen<M> {
    /// Moves the memento storage into `target`, which replaces the current
    /// arena. The mementos in `value` resolve against it unchanged.
    ///
    /// On error nothing moves and the current arena is kept.
    ///
    /// # Errors
    ///
    /// See [`Arena::adopt_records`].
    pub fn move_to(&mut self, target: Arena) -> ArenaResult<usize> {
        let moved = target.adopt_records(&mut self.arena)?;
        self.arena = target;
        Ok(moved)
    }
}

impl<T: ?Sized + 'static> Frozen<Memento<T>> {
    /// Read-only activation of the root.
    ///
    /// # Errors
    ///
    /// See [`Arena::activate_ref`].
    pub fn view(&self) -> ArenaResult<Reloc<T>> {
        self.arena.activate_ref(&self.value)
    }

    /// Switches the arena back to active mode and activates the root for
    /// writing. Thawing twice yields the same reference.
    ///
    /// # Errors
    ///
    /// See [`Activator::activate`].
    pub fn thaw(&mut self) -> ArenaResult<Reloc<T>> {
        if self.arena.mode() == Mode::Memento {
            return Activator::new(&mut self.arena)?.activate(&self.value);
        }
        self.arena.relocate(&self.value, true)
    }
}
