//! # Sizing Configuration
//!
//! Turns a measured [`UsageProfile`] into a [`CapacityPlan`] for the fixed
//! pass. Both the config and the plan are loaded once, from TOML.
//!
//! ```toml
//! headroom = 0
//! min_capacity = 0
//! verify_replay = true
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ArenaError, ArenaResult};
use crate::profile::UsageProfile;

/// How measured peaks become fixed capacities.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SizingConfig {
    /// Extra slots added to every measured peak.
    pub headroom: usize,
    /// Lower bound on every capacity.
    pub min_capacity: usize,
    /// Compare the fixed pass's peaks against the measured ones.
    pub verify_replay: bool,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            headroom: 0,
            min_capacity: 0,
            verify_replay: true,
        }
    }
}

impl SizingConfig {
    /// Exact sizing: capacity equals the measured peak.
    #[must_use]
    pub const fn exact() -> Self {
        Self {
            headroom: 0,
            min_capacity: 0,
            verify_replay: true,
        }
    }

    /// Parses a config from TOML text. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ArenaError::InvalidConfig`] on malformed input.
    pub fn from_toml_str(text: &str) -> ArenaResult<Self> {
        toml::from_str(text).map_err(|e| ArenaError::InvalidConfig(e.to_string()))
    }

    /// Reads and parses a TOML config file.
    ///
    /// # Errors
    ///
    /// Returns [`ArenaError::InvalidConfig`] if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> ArenaResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ArenaError::InvalidConfig(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Capacity for a type whose measured peak is `peak`.
    #[inline]
    #[must_use]
    pub fn capacity_for(&self, peak: usize) -> usize {
        (peak + self.headroom).max(self.min_capacity)
    }
}

/// Per-type slot and record capacities for a fixed arena.
///
/// Record capacity (memento storage) defaults to the slot capacity.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityPlan {
    slots: BTreeMap<String, usize>,
    #[serde(default)]
    records: BTreeMap<String, usize>,
}

impl CapacityPlan {
    /// Creates an empty plan.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sizes every profiled type from its peak.
    #[must_use]
    pub fn from_profile(profile: &UsageProfile, config: &SizingConfig) -> Self {
        let slots = profile
            .iter()
            .map(|(name, usage)| (name.to_owned(), config.capacity_for(usage.peak)))
            .collect();
        Self {
            slots,
            records: BTreeMap::new(),
        }
    }

    /// Gives every named type the same capacity.
    #[must_use]
    pub fn uniform<'a>(names: impl IntoIterator<Item = &'a str>, capacity: usize) -> Self {
        Self {
            slots: names.into_iter().map(|name| (name.to_owned(), capacity)).collect(),
            records: BTreeMap::new(),
        }
    }

    /// Sets the slot capacity of `name`.
    #[must_use]
    pub fn with_capacity(mut self, name: impl Into<String>, capacity: usize) -> Self {
        self.slots.insert(name.into(), capacity);
        self
    }

    /// Overrides the record capacity of `name`.
    #[must_use]
    pub fn with_record_capacity(mut self, name: impl Into<String>, capacity: usize) -> Self {
        self.records.insert(name.into(), capacity);
        self
    }

    /// Slot capacity planned for `name`.
    #[must_use]
    pub fn capacity(&self, name: &str) -> Option<usize> {
        self.slots.get(name).copied()
    }

    /// Record capacity planned for `name`.
    #[must_use]
    pub fn record_capacity(&self, name: &str) -> Option<usize> {
        self.records.get(name).copied().or_else(|| self.capacity(name))
    }

    /// Iterates over `(name, slot capacity)` in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.slots.iter().map(|(name, cap)| (name.as_str(), *cap))
    }

    /// Total slots across all types.
    #[must_use]
    pub fn total_slots(&self) -> usize {
        self.slots.values().sum()
    }

    /// Serializes the plan as TOML.
    ///
    /// # Errors
    ///
    /// Returns [`ArenaError::InvalidConfig`] if serialization fails.
    pub fn to_toml(&self) -> ArenaResult<String> {
        toml::to_string(self).map_err(|e| ArenaError::InvalidConfig(e.to_string()))
    }

    /// Parses a plan written by [`CapacityPlan::to_toml`].
    ///
    /// # Errors
    ///
    /// Returns [`ArenaError::InvalidConfig`] on malformed input.
    pub fn from_toml_str(text: &str) -> ArenaResult<Self> {
        toml::from_str(text).map_err(|e| ArenaError::InvalidConfig(e.to_string()))
    }
}
