//! Business-rule error taxonomy for the marketplace lifecycle.
//!
//! Every variant here is an expected, validated rejection surfaced to the
//! calling actor, not a fault. The one exception is [`MarketError::TransientConflict`],
//! which reports that optimistic retries against the unit document were
//! exhausted, and the storage/codec wrappers which indicate a damaged record.
use crate::delivery::TrackingStep;
use crate::lifecycle::UnitStatus;
use crate::types::Cents;

#[derive(thiserror::Error, Debug)]
pub enum MarketError {
    #[error("unit {unit_id} not found")]
    UnitNotFound { unit_id: String },

    #[error("unit {unit_id} is not open for bidding: {reason}")]
    UnitNotBiddable { unit_id: String, reason: String },

    #[error("bid of {amount} must be strictly greater than the current floor of {floor}")]
    BidTooLow { amount: Cents, floor: Cents },

    #[error("bidder {bidder_id} has no live bid to withdraw")]
    NoBidToWithdraw { bidder_id: String },

    #[error("the bid by {bidder_id} is no longer live")]
    BidNotLive { bidder_id: String },

    #[error("a bid has already been accepted for unit {unit_id}")]
    AlreadyAccepted { unit_id: String },

    #[error("amount {amount} violates the {bound} bound of {limit}")]
    PriceOutOfRange {
        amount: Cents,
        bound: &'static str,
        limit: Cents,
    },

    #[error("delivery for unit {unit_id} is already locked")]
    AlreadyLocked { unit_id: String },

    #[error("unit {unit_id} already has a delivery assignment")]
    AlreadyAssigned { unit_id: String },

    #[error("no delivery proposal from courier {courier_id} on unit {unit_id}")]
    ProposalNotFound {
        unit_id: String,
        courier_id: String,
    },

    #[error("unit {unit_id} is not awaiting delivery: {reason}")]
    NotAwaitingDelivery { unit_id: String, reason: String },

    #[error("tracking step {step:?} is not enabled; next expected step is {expected:?}")]
    StepNotEnabled {
        step: TrackingStep,
        expected: Option<TrackingStep>,
    },

    #[error("actor {actor_id} is not permitted to {action}")]
    ActorUnauthorized {
        actor_id: String,
        action: &'static str,
    },

    #[error("status cannot move from {from:?} to {to:?}")]
    InvalidTransition { from: UnitStatus, to: UnitStatus },

    #[error("invalid listing draft: {0}")]
    InvalidDraft(String),

    #[error("listing on unit {unit_id} can no longer be edited: {reason}")]
    ListingFrozen { unit_id: String, reason: String },

    #[error("conflicting concurrent writes on unit {unit_id}; retries exhausted")]
    TransientConflict { unit_id: String },

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("corrupt unit record: {0}")]
    Codec(String),
}

impl From<sled::Error> for MarketError {
    fn from(err: sled::Error) -> Self {
        MarketError::Storage(err.to_string())
    }
}

impl From<minicbor::decode::Error> for MarketError {
    fn from(err: minicbor::decode::Error) -> Self {
        MarketError::Codec(err.to_string())
    }
}

impl<E: std::fmt::Display> From<minicbor::encode::Error<E>> for MarketError {
    fn from(err: minicbor::encode::Error<E>) -> Self {
        MarketError::Codec(err.to_string())
    }
}
