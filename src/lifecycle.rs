//! The master unit lifecycle: a forward-only ordinal progression with a
//! single terminal escape hatch (`Cancelled`) reachable before pickup.

use crate::error::MarketError;

/// Lifecycle status of a tradable unit. The order-flow naming
/// (New/Preparing/Ready/Picked Up/Out for Delivery/Delivered) collapses onto
/// the same ordinals; there is exactly one enumeration.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, minicbor::Encode, minicbor::Decode,
)]
pub enum UnitStatus {
    #[n(0)]
    Active,
    #[n(1)]
    Accepted,
    #[n(2)]
    Preparing,
    #[n(3)]
    Ready,
    #[n(4)]
    PickedUp,
    #[n(5)]
    Delivered,
    #[n(6)]
    Cancelled,
}

impl UnitStatus {
    /// Position in the forward progression. Used for the monotonicity
    /// invariant and for sort keys; `Cancelled` sits past the end.
    pub fn ordinal(self) -> u8 {
        match self {
            UnitStatus::Active => 0,
            UnitStatus::Accepted => 1,
            UnitStatus::Preparing => 2,
            UnitStatus::Ready => 3,
            UnitStatus::PickedUp => 4,
            UnitStatus::Delivered => 5,
            UnitStatus::Cancelled => 6,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, UnitStatus::Delivered | UnitStatus::Cancelled)
    }

    /// Cancellation is only allowed while the goods are still with the
    /// producer.
    pub fn cancellable(self) -> bool {
        self.ordinal() < UnitStatus::PickedUp.ordinal()
    }

    /// Whether `self -> to` is one of the legal forward transitions.
    pub fn can_advance_to(self, to: UnitStatus) -> bool {
        matches!(
            (self, to),
            (UnitStatus::Active, UnitStatus::Accepted)
                | (UnitStatus::Accepted, UnitStatus::Preparing)
                | (UnitStatus::Preparing, UnitStatus::Ready)
                | (UnitStatus::Ready, UnitStatus::PickedUp)
                | (UnitStatus::PickedUp, UnitStatus::Delivered)
        ) || (to == UnitStatus::Cancelled && self.cancellable())
    }

    /// Guarded transition, rejecting anything that would regress or skip.
    pub fn advance_to(self, to: UnitStatus) -> Result<UnitStatus, MarketError> {
        if !self.can_advance_to(to) {
            return Err(MarketError::InvalidTransition { from: self, to });
        }
        Ok(to)
    }
}
