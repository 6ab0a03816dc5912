//! Per-pass record of what has been deactivated.

use std::collections::{BTreeMap, HashMap};

use crate::handle::{AllocatorId, SlotKey};

#[derive(Debug, Default)]
struct TypeLedger {
    type_name: &'static str,
    offsets: HashMap<SlotKey, usize>,
    overflow: bool,
}

/// Maps every reference deactivated during one pass to its offset, per
/// sub-allocator, and flags the sub-allocators whose memento storage ran out.
///
/// Overflow is the one recoverable outcome of relocation: the caller checks
/// [`DeactivationLedger::overflow`] after the pass and may grow the record
/// capacity of the flagged types and run again.
#[derive(Debug, Default)]
pub struct DeactivationLedger {
    types: BTreeMap<AllocatorId, TypeLedger>,
}

impl DeactivationLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True if any sub-allocator ran out of memento storage.
    #[must_use]
    pub fn overflow(&self) -> bool {
        self.types.values().any(|ledger| ledger.overflow)
    }

    /// True if the sub-allocator with `id` ran out of memento storage.
    #[must_use]
    pub fn overflowed(&self, id: AllocatorId) -> bool {
        self.types.get(&id).is_some_and(|ledger| ledger.overflow)
    }

    /// Type names of every overflowed sub-allocator, in id order.
    #[must_use]
    pub fn overflowed_types(&self) -> Vec<&'static str> {
        self.types
            .values()
            .filter(|ledger| ledger.overflow)
            .map(|ledger| ledger.type_name)
            .collect()
    }

    /// Number of distinct references deactivated.
    #[must_use]
    pub fn len(&self) -> usize {
        self.types.values().map(|ledger| ledger.offsets.len()).sum()
    }

    /// True if nothing was deactivated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn lookup(&self, id: AllocatorId, key: SlotKey) -> Option<usize> {
        self.types.get(&id)?.offsets.get(&key).copied()
    }

    pub(crate) fn record(&mut self, id: AllocatorId, type_name: &'static str, key: SlotKey, offset: usize) {
        let ledger = self.types.entry(id).or_default();
        ledger.type_name = type_name;
        ledger.offsets.insert(key, offset);
    }

    pub(crate) fn mark_overflow(&mut self, id: AllocatorId, type_name: &'static str) {
        let ledger = self.types.entry(id).or_default();
        ledger.type_name = type_name;
        if !ledger.overflow {
            tracing::warn!(allocator = %id, type_name, "memento storage overflow");
        }
        ledger.overflow = true;
    }
}
