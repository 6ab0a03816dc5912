//! # Usage Profiles
//!
//! Per-type current / peak live-object counters collected while a workload
//! runs. A profile from the measuring pass is the input to
//! [`CapacityPlan::from_profile`](crate::config::CapacityPlan::from_profile).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Live-object counters for one payload type.
///
/// `peak >= current` always holds and `peak` never decreases within one
/// execution.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeUsage {
    /// Objects currently live.
    pub current: usize,
    /// High-water mark of `current`.
    pub peak: usize,
}

impl TypeUsage {
    /// Counts one allocation.
    #[inline]
    pub fn record_alloc(&mut self) {
        self.current += 1;
        if self.current > self.peak {
            self.peak = self.current;
        }
    }

    /// Counts one release.
    ///
    /// # Panics
    ///
    /// Panics if no object is live. Sub-allocators only call this after a
    /// successful removal.
    #[inline]
    pub fn record_free(&mut self) {
        assert!(self.current > 0, "release with no live objects");
        self.current -= 1;
    }

    /// Copies both counters from `other`.
    #[inline]
    pub fn advance_to(&mut self, other: &Self) {
        self.current = other.current;
        self.peak = other.peak;
    }

    /// Keeps the larger of each counter.
    #[inline]
    pub fn merge(&mut self, other: &Self) {
        self.current = self.current.max(other.current);
        self.peak = self.peak.max(other.peak);
    }
}

/// Mapping from registered type name to its [`TypeUsage`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageProfile {
    types: BTreeMap<String, TypeUsage>,
}

impl UsageProfile {
    /// Creates an empty profile.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the counters recorded for `name`.
    pub fn insert(&mut self, name: impl Into<String>, usage: TypeUsage) {
        self.types.insert(name.into(), usage);
    }

    /// Counters for `name`, if the type was profiled.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<TypeUsage> {
        self.types.get(name).copied()
    }

    /// Peak for `name`, zero when the type never appeared.
    #[must_use]
    pub fn peak(&self, name: &str) -> usize {
        self.get(name).map_or(0, |usage| usage.peak)
    }

    /// Iterates over `(name, usage)` in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, TypeUsage)> {
        self.types.iter().map(|(name, usage)| (name.as_str(), *usage))
    }

    /// Number of profiled types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Whether no type has been profiled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Sum of all peaks.
    #[must_use]
    pub fn total_peak(&self) -> usize {
        self.types.values().map(|usage| usage.peak).sum()
    }

    /// Copies every type's counters from `other`.
    ///
    /// Types absent from `other` are left as they are.
    pub fn advance_to(&mut self, other: &Self) {
        for (name, usage) in &other.types {
            self.types.entry(name.clone()).or_default().advance_to(usage);
        }
    }

    /// Per-type maximum of both profiles. Types never interact.
    pub fn merge(&mut self, other: &Self) {
        for (name, usage) in &other.types {
            self.types.entry(name.clone()).or_default().merge(usage);
        }
    }

    /// Serializes the profile as TOML.
    ///
    /// # Errors
    ///
    /// Returns [`ArenaError::InvalidConfig`](crate::ArenaError::InvalidConfig)
    /// if serialization fails.
    pub fn to_toml(&self) -> crate::ArenaResult<String> {
        toml::to_string(self).map_err(|e| crate::ArenaError::InvalidConfig(e.to_string()))
    }

    /// Parses a profile written by [`UsageProfile::to_toml`].
    ///
    /// # Errors
    ///
    /// Returns [`ArenaError::InvalidConfig`](crate::ArenaError::InvalidConfig)
    /// on malformed input.
    pub fn from_toml_str(text: &str) -> crate::ArenaResult<Self> {
        toml::from_str(text).map_err(|e| crate::ArenaError::InvalidConfig(e.to_string()))
    }
}
