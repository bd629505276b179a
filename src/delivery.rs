//! Courier delivery negotiation and the nested tracking progression.
//!
//! Two mutually exclusive negotiation paths produce the single
//! [`DeliveryAssignment`]: lock mode (one courier locks a floor-derived
//! amount, first commit wins) and proposal mode (many couriers propose, the
//! producer accepts exactly one). Either way the assignment then carries the
//! six-step tracking progression that mirrors pickup and delivery into the
//! outer lifecycle.

use chrono::Utc;

use crate::error::MarketError;
use crate::lifecycle::UnitStatus;
use crate::pricing::PricingConfig;
use crate::types::{Cents, TimeStamp};
use crate::unit::TradableUnit;

/// The ordered courier progress steps. Modelled as one enum with an index
/// so "next enabled step" and "complete" are computed, not re-derived from
/// a pile of booleans.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, minicbor::Encode, minicbor::Decode,
)]
pub enum TrackingStep {
    #[n(0)]
    OnMyWayToFarmer,
    #[n(1)]
    ReachedFarmer,
    #[n(2)]
    PickedUpOrder,
    #[n(3)]
    OnMyWayToBuyer,
    #[n(4)]
    ReachedBuyer,
    #[n(5)]
    DeliveredOrder,
}

impl TrackingStep {
    pub const ALL: [TrackingStep; 6] = [
        TrackingStep::OnMyWayToFarmer,
        TrackingStep::ReachedFarmer,
        TrackingStep::PickedUpOrder,
        TrackingStep::OnMyWayToBuyer,
        TrackingStep::ReachedBuyer,
        TrackingStep::DeliveredOrder,
    ];

    pub fn index(self) -> u8 {
        self as u8
    }

    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(usize::from(index)).copied()
    }
}

/// How the assignment came to be. Kept for audit; both modes behave
/// identically once the assignment exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub enum AssignmentMode {
    #[n(0)]
    Locked,
    #[n(1)]
    Proposal,
}

/// An open courier amount proposal. One per (unit, courier); re-proposing
/// supersedes.
#[derive(Debug, Clone, PartialEq, minicbor::Encode, minicbor::Decode)]
pub struct DeliveryProposal {
    #[n(0)]
    pub courier_id: String,
    #[n(1)]
    pub amount: Cents,
    #[n(2)]
    pub proposed_at: TimeStamp<Utc>,
}

/// The single delivery assignment. Single-writer-once; the lifecycle owns
/// it after creation.
#[derive(Debug, Clone, PartialEq, minicbor::Encode, minicbor::Decode)]
pub struct DeliveryAssignment {
    #[n(0)]
    pub courier_id: String,
    #[n(1)]
    pub amount: Cents,
    #[n(2)]
    pub locked_at: TimeStamp<Utc>,
    /// Count of completed tracking steps, 0..=6. The flags themselves are
    /// derived: step `i` is done iff `i < steps_done`.
    #[n(3)]
    pub steps_done: u8,
    #[n(4)]
    pub mode: AssignmentMode,
}

impl DeliveryAssignment {
    fn new(courier_id: String, amount: Cents, mode: AssignmentMode, now: TimeStamp<Utc>) -> Self {
        Self {
            courier_id,
            amount,
            locked_at: now,
            steps_done: 0,
            mode,
        }
    }

    /// The next step the courier may set, `None` once delivered.
    pub fn next_step(&self) -> Option<TrackingStep> {
        TrackingStep::from_index(self.steps_done)
    }

    pub fn step_done(&self, step: TrackingStep) -> bool {
        step.index() < self.steps_done
    }

    pub fn is_complete(&self) -> bool {
        self.steps_done as usize == TrackingStep::ALL.len()
    }
}

impl TradableUnit {
    /// The current delivery-price floor for this unit, with the fallback
    /// distance applied when a coordinate is missing.
    pub fn delivery_floor(&self, cfg: &PricingConfig) -> Cents {
        cfg.delivery_floor(cfg.distance_between(self.pickup, self.dropoff))
    }

    fn negotiable(&self) -> Result<(), MarketError> {
        match self.status {
            UnitStatus::Accepted | UnitStatus::Preparing | UnitStatus::Ready => Ok(()),
            _ => Err(MarketError::NotAwaitingDelivery {
                unit_id: self.unit_id.clone(),
                reason: format!("unit status is {:?}", self.status),
            }),
        }
    }

    /// Lock mode: the courier commits a floor-derived amount. First
    /// successful lock wins the unit; everyone after gets `AlreadyLocked`.
    pub fn lock_delivery(
        &mut self,
        courier_id: &str,
        amount: Cents,
        cfg: &PricingConfig,
        now: &TimeStamp<Utc>,
    ) -> Result<DeliveryAssignment, MarketError> {
        self.negotiable()?;
        if self.assignment.is_some() {
            return Err(MarketError::AlreadyLocked {
                unit_id: self.unit_id.clone(),
            });
        }
        cfg.validate_locked(amount, self.delivery_floor(cfg))?;

        let assignment = DeliveryAssignment::new(
            courier_id.to_string(),
            amount,
            AssignmentMode::Locked,
            now.clone(),
        );
        self.assignment = Some(assignment.clone());
        self.proposals.clear();
        Ok(assignment)
    }

    /// Proposal mode: record (or supersede) this courier's amount proposal.
    pub fn propose_delivery(
        &mut self,
        courier_id: &str,
        amount: Cents,
        cfg: &PricingConfig,
        now: &TimeStamp<Utc>,
    ) -> Result<DeliveryProposal, MarketError> {
        self.negotiable()?;
        if self.assignment.is_some() {
            return Err(MarketError::AlreadyAssigned {
                unit_id: self.unit_id.clone(),
            });
        }
        cfg.validate_proposal(amount, self.delivery_floor(cfg))?;

        let proposal = DeliveryProposal {
            courier_id: courier_id.to_string(),
            amount,
            proposed_at: now.clone(),
        };
        self.proposals
            .insert(courier_id.to_string(), proposal.clone());
        Ok(proposal)
    }

    /// Withdraw an open proposal. Cancels this courier's negotiation only;
    /// rival proposals are untouched.
    pub fn withdraw_proposal(&mut self, courier_id: &str) -> Result<(), MarketError> {
        if self.proposals.remove(courier_id).is_none() {
            return Err(MarketError::ProposalNotFound {
                unit_id: self.unit_id.clone(),
                courier_id: courier_id.to_string(),
            });
        }
        Ok(())
    }

    /// Producer accepts exactly one open proposal, creating the assignment
    /// with all tracking steps unset.
    pub fn accept_proposal(
        &mut self,
        courier_id: &str,
        now: &TimeStamp<Utc>,
    ) -> Result<DeliveryAssignment, MarketError> {
        self.negotiable()?;
        if self.assignment.is_some() {
            return Err(MarketError::AlreadyAssigned {
                unit_id: self.unit_id.clone(),
            });
        }
        let proposal =
            self.proposals
                .get(courier_id)
                .cloned()
                .ok_or_else(|| MarketError::ProposalNotFound {
                    unit_id: self.unit_id.clone(),
                    courier_id: courier_id.to_string(),
                })?;

        let assignment = DeliveryAssignment::new(
            proposal.courier_id,
            proposal.amount,
            AssignmentMode::Proposal,
            now.clone(),
        );
        self.assignment = Some(assignment.clone());
        self.proposals.clear();
        Ok(assignment)
    }

    /// Set the next tracking flag. Strictly ordered; a step out of order is
    /// rejected with `StepNotEnabled` and nothing changes. `PickedUpOrder`
    /// mirrors `Ready -> PickedUp`, `DeliveredOrder` mirrors
    /// `PickedUp -> Delivered` and stamps `delivered_at`.
    pub fn advance_tracking(
        &mut self,
        courier_id: &str,
        step: TrackingStep,
        now: &TimeStamp<Utc>,
    ) -> Result<DeliveryAssignment, MarketError> {
        self.apply_due_preparation(now);

        if self.status == UnitStatus::Cancelled {
            return Err(MarketError::NotAwaitingDelivery {
                unit_id: self.unit_id.clone(),
                reason: "unit was cancelled".into(),
            });
        }

        let mut assignment = self
            .assignment
            .as_ref()
            .filter(|a| a.courier_id == courier_id)
            .ok_or_else(|| MarketError::ActorUnauthorized {
                actor_id: courier_id.to_string(),
                action: "advance delivery tracking on this unit",
            })?
            .clone();

        let expected = assignment.next_step();
        if expected != Some(step) {
            return Err(MarketError::StepNotEnabled { step, expected });
        }

        // Mirror into the outer lifecycle before touching the step counter
        // so a rejected transition leaves the flags unchanged.
        match step {
            TrackingStep::PickedUpOrder => {
                self.status = self.status.advance_to(UnitStatus::PickedUp)?;
                self.picked_up_at = Some(now.clone());
            }
            TrackingStep::DeliveredOrder => {
                self.status = self.status.advance_to(UnitStatus::Delivered)?;
                self.delivered_at = Some(now.clone());
            }
            _ => {}
        }

        assignment.steps_done += 1;
        self.assignment = Some(assignment.clone());
        Ok(assignment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::UnitDraft;

    fn accepted_unit() -> TradableUnit {
        let now = TimeStamp::new();
        let (mut unit, _, _) = UnitDraft::new()
            .set_producer("farmer_1p")
            .set_description("5kg wildflower honey")
            .set_quantity(5)
            .set_base_price(9_000)
            .validate_and_finalise(now.clone())
            .unwrap();
        unit.place_bid("buyer_1a", 10_000, &now).unwrap();
        unit.accept_bid("buyer_1a", None, &now).unwrap();
        unit
    }

    #[test]
    fn lock_wins_once() {
        let mut unit = accepted_unit();
        let cfg = PricingConfig::default();
        let now = TimeStamp::new();
        let floor = unit.delivery_floor(&cfg); // fallback distance, 100.00

        unit.lock_delivery("courier_1a", floor, &cfg, &now).unwrap();
        let err = unit
            .lock_delivery("courier_1b", floor + 500, &cfg, &now)
            .unwrap_err();
        assert!(matches!(err, MarketError::AlreadyLocked { .. }));
    }

    #[test]
    fn proposals_supersede_per_courier_and_close_on_acceptance() {
        let mut unit = accepted_unit();
        let cfg = PricingConfig::default();
        let now = TimeStamp::new();
        let floor = unit.delivery_floor(&cfg);

        unit.propose_delivery("courier_1a", floor + 100, &cfg, &now)
            .unwrap();
        unit.propose_delivery("courier_1a", floor + 300, &cfg, &now)
            .unwrap();
        unit.propose_delivery("courier_1b", floor + 200, &cfg, &now)
            .unwrap();
        assert_eq!(unit.proposals.len(), 2);
        assert_eq!(unit.proposals["courier_1a"].amount, floor + 300);

        let assignment = unit.accept_proposal("courier_1b", &now).unwrap();
        assert_eq!(assignment.courier_id, "courier_1b");
        assert_eq!(assignment.steps_done, 0);
        assert!(unit.proposals.is_empty());

        let err = unit
            .propose_delivery("courier_1c", floor + 100, &cfg, &now)
            .unwrap_err();
        assert!(matches!(err, MarketError::AlreadyAssigned { .. }));
        let err = unit.accept_proposal("courier_1a", &now).unwrap_err();
        assert!(matches!(err, MarketError::AlreadyAssigned { .. }));
    }

    #[test]
    fn withdrawing_a_proposal_leaves_rivals_alone() {
        let mut unit = accepted_unit();
        let cfg = PricingConfig::default();
        let now = TimeStamp::new();
        let floor = unit.delivery_floor(&cfg);

        unit.propose_delivery("courier_1a", floor + 100, &cfg, &now)
            .unwrap();
        unit.propose_delivery("courier_1b", floor + 200, &cfg, &now)
            .unwrap();

        unit.withdraw_proposal("courier_1a").unwrap();
        assert_eq!(unit.proposals.len(), 1);

        let err = unit.withdraw_proposal("courier_1a").unwrap_err();
        assert!(matches!(err, MarketError::ProposalNotFound { .. }));
    }

    #[test]
    fn tracking_steps_enforce_order_without_side_effects() {
        let mut unit = accepted_unit();
        let cfg = PricingConfig::default();
        let now = TimeStamp::new();
        let floor = unit.delivery_floor(&cfg);

        unit.lock_delivery("courier_1a", floor, &cfg, &now).unwrap();

        let err = unit
            .advance_tracking("courier_1a", TrackingStep::PickedUpOrder, &now)
            .unwrap_err();
        assert!(matches!(
            err,
            MarketError::StepNotEnabled {
                step: TrackingStep::PickedUpOrder,
                expected: Some(TrackingStep::OnMyWayToFarmer),
            }
        ));
        assert_eq!(unit.assignment.as_ref().unwrap().steps_done, 0);

        // Only the assigned courier may advance.
        let err = unit
            .advance_tracking("courier_1b", TrackingStep::OnMyWayToFarmer, &now)
            .unwrap_err();
        assert!(matches!(err, MarketError::ActorUnauthorized { .. }));
    }

    #[test]
    fn pickup_and_delivery_mirror_into_the_lifecycle() {
        let mut unit = accepted_unit();
        let cfg = PricingConfig::default();
        let t0 = TimeStamp::new_with(2025, 4, 10, 10, 0, 0);
        let floor = unit.delivery_floor(&cfg);

        unit.start_preparation(5, &t0).unwrap();
        unit.lock_delivery("courier_1a", floor, &cfg, &t0).unwrap();

        unit.advance_tracking("courier_1a", TrackingStep::OnMyWayToFarmer, &t0)
            .unwrap();
        unit.advance_tracking("courier_1a", TrackingStep::ReachedFarmer, &t0)
            .unwrap();

        // Pickup before the unit is ready cannot commit.
        let err = unit
            .advance_tracking("courier_1a", TrackingStep::PickedUpOrder, &t0)
            .unwrap_err();
        assert!(matches!(err, MarketError::InvalidTransition { .. }));

        // Past the prep deadline the timer applies and pickup goes through.
        let t1 = t0.plus_minutes(6);
        let a = unit
            .advance_tracking("courier_1a", TrackingStep::PickedUpOrder, &t1)
            .unwrap();
        assert_eq!(unit.status, UnitStatus::PickedUp);
        assert!(a.step_done(TrackingStep::PickedUpOrder));

        unit.advance_tracking("courier_1a", TrackingStep::OnMyWayToBuyer, &t1)
            .unwrap();
        unit.advance_tracking("courier_1a", TrackingStep::ReachedBuyer, &t1)
            .unwrap();
        let a = unit
            .advance_tracking("courier_1a", TrackingStep::DeliveredOrder, &t1)
            .unwrap();

        assert_eq!(unit.status, UnitStatus::Delivered);
        assert!(a.is_complete());
        assert_eq!(unit.delivered_at, Some(t1));
    }
}
