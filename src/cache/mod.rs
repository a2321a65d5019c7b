//! Tiered price cache.
//!
//! One authoritative [`PriceEntry`] per asset. Expiry is checked on read
//! against the TTL of the entry's tier and never evicts; a later `put`
//! simply overwrites. The tier is recomputed on every write from the
//! caller's priority and the asset's membership.

pub mod membership;

pub use membership::Membership;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

use crate::config::TierTtls;
use crate::types::{AssetKey, PriceEntry, Priority, Tier};

pub struct TieredCache {
    entries: RwLock<HashMap<AssetKey, PriceEntry>>,
    ttls: TierTtls,
    membership: Arc<Membership>,
}

impl TieredCache {
    pub fn new(ttls: TierTtls, membership: Arc<Membership>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttls,
            membership,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<AssetKey, PriceEntry>> {
        self.entries.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<AssetKey, PriceEntry>> {
        self.entries.write().unwrap_or_else(|p| p.into_inner())
    }

    pub fn get(&self, key: &AssetKey) -> Option<PriceEntry> {
        self.get_at(key, Utc::now())
    }

    /// The entry for `key` if it is still within its tier's TTL at `now`.
    pub fn get_at(&self, key: &AssetKey, now: DateTime<Utc>) -> Option<PriceEntry> {
        let entries = self.read();
        let entry = entries.get(key)?;
        if now - entry.captured_at >= self.ttls.ttl(entry.tier) {
            debug!(asset = %key.short(), tier = %entry.tier, "Cache entry expired");
            return None;
        }
        Some(entry.clone())
    }

    /// The entry for `key` regardless of expiry.
    pub fn peek(&self, key: &AssetKey) -> Option<PriceEntry> {
        self.read().get(key).cloned()
    }

    pub fn put(&self, key: AssetKey, entry: PriceEntry) {
        self.write().insert(key, entry);
    }

    /// Tier for a write of `key` at `priority`.
    pub fn tier_for(&self, key: &AssetKey, priority: Priority) -> Tier {
        if priority == Priority::High || self.membership.is_active(key) {
            Tier::Active
        } else if self.membership.is_recent(key) {
            Tier::Recent
        } else if self.membership.is_well_known(key) {
            Tier::Monitored
        } else {
            Tier::Background
        }
    }

    /// Build and write an entry for a validated price. Returns the entry stored.
    pub fn store(
        &self,
        key: &AssetKey,
        price: Decimal,
        source: &str,
        priority: Priority,
        fetch_duration_ms: u64,
        now: DateTime<Utc>,
    ) -> PriceEntry {
        let entry = PriceEntry {
            price,
            captured_at: now,
            source: source.to_string(),
            tier: self.tier_for(key, priority),
            fetch_duration_ms,
        };
        debug!(asset = %key.short(), %price, source, tier = %entry.tier, "Cached price");
        self.put(key.clone(), entry.clone());
        entry
    }

    pub fn invalidate(&self, key: &AssetKey) -> bool {
        self.write().remove(key).is_some()
    }

    pub fn invalidate_all(&self) -> usize {
        let mut entries = self.write();
        let n = entries.len();
        entries.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
