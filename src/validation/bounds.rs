//! Hard per-asset price ranges.

use std::collections::HashSet;

use crate::config::{AssetsConfig, PriceBounds, SanityBoundsConfig};
use crate::types::AssetKey;

/// Bounds class an asset falls into when it has no explicit override.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetClass {
    Base,
    Stable,
    Other,
}

/// Resolves the acceptable price range for an asset.
///
/// Lookup order: per-asset override, then the asset's class.
#[derive(Debug, Clone)]
pub struct SanityBoundsTable {
    config: SanityBoundsConfig,
    base_asset: AssetKey,
    stable_assets: HashSet<AssetKey>,
}

impl SanityBoundsTable {
    pub fn new(config: SanityBoundsConfig, assets: &AssetsConfig) -> Self {
        Self {
            config,
            base_asset: assets.base_asset.clone(),
            stable_assets: assets.stable_assets.clone(),
        }
    }

    pub fn asset_class(&self, key: &AssetKey) -> AssetClass {
        if key == &self.base_asset {
            AssetClass::Base
        } else if self.stable_assets.contains(key) {
            AssetClass::Stable
        } else {
            AssetClass::Other
        }
    }

    pub fn bounds_for(&self, key: &AssetKey) -> PriceBounds {
        if let Some(bounds) = self.config.overrides.get(key) {
            return *bounds;
        }
        match self.asset_class(key) {
            AssetClass::Base => self.config.base,
            AssetClass::Stable => self.config.stable,
            AssetClass::Other => self.config.default,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SOL_MINT, USDC_MINT};
    use rust_decimal_macros::dec;

    fn table() -> SanityBoundsTable {
        let mut config = SanityBoundsConfig::default();
        config.overrides.insert(
            AssetKey::new("MintA").unwrap(),
            PriceBounds::new(dec!(50), dec!(500)),
        );
        SanityBoundsTable::new(config, &AssetsConfig::default())
    }

    #[test]
    fn test_class_bounds() {
        let t = table();
        let sol = AssetKey::new(SOL_MINT).unwrap();
        let usdc = AssetKey::new(USDC_MINT).unwrap();
        let other = AssetKey::new("SomeMemeCoin").unwrap();

        assert_eq!(t.asset_class(&sol), AssetClass::Base);
        assert_eq!(t.bounds_for(&sol), PriceBounds::new(dec!(50), dec!(500)));
        assert_eq!(t.asset_class(&usdc), AssetClass::Stable);
        assert_eq!(t.bounds_for(&usdc).max, dec!(1.05));
        assert_eq!(t.asset_class(&other), AssetClass::Other);
        assert_eq!(t.bounds_for(&other).max, dec!(100));
    }

    #[test]
    fn test_override_wins() {
        let t = table();
        let a = AssetKey::new("MintA").unwrap();
        assert!(t.bounds_for(&a).contains(dec!(180)));
        assert!(!t.bounds_for(&a).contains(dec!(49.99)));
        assert!(!t.bounds_for(&a).contains(dec!(500.01)));
    }

    #[test]
    fn test_bounds_inclusive() {
        let t = table();
        let a = AssetKey::new("MintA").unwrap();
        assert!(t.bounds_for(&a).contains(dec!(50)));
        assert!(t.bounds_for(&a).contains(dec!(500)));
    }
}
