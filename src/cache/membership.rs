//! Which assets are held or recently touched by the trading layer.
//!
//! Membership drives tier assignment: held assets cache at the Active
//! tier, recently touched ones at Recent. Both sets are owned by the
//! oracle and mutated only through its `mark_*` methods.

use std::collections::HashSet;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::types::AssetKey;

#[derive(Debug, Default)]
pub struct Membership {
    active: RwLock<HashSet<AssetKey>>,
    recent: RwLock<HashSet<AssetKey>>,
    well_known: HashSet<AssetKey>,
}

fn read(set: &RwLock<HashSet<AssetKey>>) -> RwLockReadGuard<'_, HashSet<AssetKey>> {
    set.read().unwrap_or_else(|p| p.into_inner())
}

fn write(set: &RwLock<HashSet<AssetKey>>) -> RwLockWriteGuard<'_, HashSet<AssetKey>> {
    set.write().unwrap_or_else(|p| p.into_inner())
}

impl Membership {
    pub fn new(well_known: HashSet<AssetKey>) -> Self {
        Self {
            well_known,
            ..Default::default()
        }
    }

    /// Returns `true` if the asset was not already active.
    pub fn mark_active(&self, key: &AssetKey) -> bool {
        write(&self.active).insert(key.clone())
    }

    /// Returns `true` if the asset was active.
    pub fn unmark_active(&self, key: &AssetKey) -> bool {
        write(&self.active).remove(key)
    }

    pub fn mark_recent_activity(&self, key: &AssetKey) {
        write(&self.recent).insert(key.clone());
    }

    pub fn is_active(&self, key: &AssetKey) -> bool {
        read(&self.active).contains(key)
    }

    pub fn is_recent(&self, key: &AssetKey) -> bool {
        read(&self.recent).contains(key)
    }

    pub fn is_well_known(&self, key: &AssetKey) -> bool {
        self.well_known.contains(key)
    }

    /// Snapshot of the active set, sorted for stable iteration.
    pub fn active_assets(&self) -> Vec<AssetKey> {
        let mut keys: Vec<AssetKey> = read(&self.active).iter().cloned().collect();
        keys.sort();
        keys
    }

    pub fn active_count(&self) -> usize {
        read(&self.active).len()
    }

    pub fn recent_count(&self) -> usize {
        read(&self.recent).len()
    }
}
