//! Delivery pricing policy: floor derivation and proposal validation.

use crate::error::MarketError;
use crate::geo;
use crate::types::{Cents, Coordinate};

/// Pricing constants for delivery amounts. The defaults are the reference
/// behaviour: 10.00 currency units per km, a 10.00 adjustment step, and a
/// 10 km substitute distance whenever either party has no coordinate.
#[derive(Debug, Clone)]
pub struct PricingConfig {
    /// Cents charged per whole kilometre.
    pub rate_per_km: Cents,
    /// Step size for courier ±adjustments in lock mode, in cents.
    pub adjust_step: Cents,
    /// Distance assumed when either coordinate is absent.
    pub fallback_distance_km: f64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            rate_per_km: 1_000,
            adjust_step: 1_000,
            fallback_distance_km: 10.0,
        }
    }
}

impl PricingConfig {
    /// Distance between two optional coordinates, substituting the fallback
    /// when either side is unknown. This is the only place the fallback
    /// policy is applied.
    pub fn distance_between(&self, a: Option<Coordinate>, b: Option<Coordinate>) -> f64 {
        match (a, b) {
            (Some(a), Some(b)) => geo::distance_km(a, b),
            _ => self.fallback_distance_km,
        }
    }

    /// The minimum valid delivery amount for a distance.
    ///
    /// The distance is already rounded to 2dp by [`geo::distance_km`], so the
    /// floor is integer-exact: hundredths-of-km times the per-km rate.
    pub fn delivery_floor(&self, distance_km: f64) -> Cents {
        let hundredths = (distance_km * 100.0).round() as u64;
        hundredths * self.rate_per_km / 100
    }

    /// Validate a courier-submitted proposal: strictly above the floor, at
    /// most twice the floor.
    pub fn validate_proposal(&self, amount: Cents, floor: Cents) -> Result<(), MarketError> {
        if amount <= floor {
            return Err(MarketError::PriceOutOfRange {
                amount,
                bound: "floor",
                limit: floor,
            });
        }
        let ceiling = floor * 2;
        if amount > ceiling {
            return Err(MarketError::PriceOutOfRange {
                amount,
                bound: "ceiling",
                limit: ceiling,
            });
        }
        Ok(())
    }

    /// Validate a lock-mode amount: the courier starts at the floor and may
    /// step it up or down, so the floor itself is acceptable, but it can
    /// never go below it nor past twice the floor.
    pub fn validate_locked(&self, amount: Cents, floor: Cents) -> Result<(), MarketError> {
        if amount < floor {
            return Err(MarketError::PriceOutOfRange {
                amount,
                bound: "floor",
                limit: floor,
            });
        }
        let ceiling = floor * 2;
        if amount > ceiling {
            return Err(MarketError::PriceOutOfRange {
                amount,
                bound: "ceiling",
                limit: ceiling,
            });
        }
        Ok(())
    }
}
