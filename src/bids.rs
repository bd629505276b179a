//! The bid ledger: competing buyer bids on a unit, superseded per bidder,
//! closed by exactly one explicit acceptance.

use chrono::Utc;

use crate::error::MarketError;
use crate::lifecycle::UnitStatus;
use crate::types::{Cents, Coordinate, TimeStamp};
use crate::unit::TradableUnit;

/// A live bid. One per (unit, bidder); a newer bid from the same bidder
/// replaces this entry.
#[derive(Debug, Clone, PartialEq, minicbor::Encode, minicbor::Decode)]
pub struct Bid {
    #[n(0)]
    pub bidder_id: String,
    #[n(1)]
    pub amount: Cents,
    #[n(2)]
    pub placed_at: TimeStamp<Utc>,
}

/// The single accepted bid. Once written the ledger is read-only; no actor
/// may revert it.
#[derive(Debug, Clone, PartialEq, minicbor::Encode, minicbor::Decode)]
pub struct AcceptedBid {
    #[n(0)]
    pub bidder_id: String,
    #[n(1)]
    pub amount: Cents,
    #[n(2)]
    pub accepted_at: TimeStamp<Utc>,
}

/// A bid as shown to a viewer. Bidder identities are the producer's to see;
/// everyone else only learns which entry is their own.
#[derive(Debug, Clone, PartialEq)]
pub struct BidView {
    pub amount: Cents,
    pub placed_at: TimeStamp<Utc>,
    pub bidder_id: Option<String>,
    pub yours: bool,
}

impl TradableUnit {
    fn biddable(&self, now: &TimeStamp<Utc>) -> Result<(), MarketError> {
        if self.accepted_bid.is_some() {
            return Err(MarketError::UnitNotBiddable {
                unit_id: self.unit_id.clone(),
                reason: "a bid has already been accepted".into(),
            });
        }
        if self.status != UnitStatus::Active {
            return Err(MarketError::UnitNotBiddable {
                unit_id: self.unit_id.clone(),
                reason: format!("unit status is {:?}", self.status),
            });
        }
        if let Some(window) = &self.window {
            if *now < window.start {
                return Err(MarketError::UnitNotBiddable {
                    unit_id: self.unit_id.clone(),
                    reason: "the bidding window has not started".into(),
                });
            }
            if *now >= window.end {
                return Err(MarketError::UnitNotBiddable {
                    unit_id: self.unit_id.clone(),
                    reason: "the bidding window has closed".into(),
                });
            }
        }
        Ok(())
    }

    /// Place or supersede a bid. The floor is the base price or the bidder's
    /// own prior live bid, whichever is higher; the new amount must strictly
    /// beat it. Supersede is a map insert inside the same document write.
    pub fn place_bid(
        &mut self,
        bidder_id: &str,
        amount: Cents,
        now: &TimeStamp<Utc>,
    ) -> Result<Bid, MarketError> {
        self.biddable(now)?;

        let prior = self.bids.get(bidder_id).map(|b| b.amount).unwrap_or(0);
        let floor = self.base_price.max(prior);
        if amount <= floor {
            return Err(MarketError::BidTooLow { amount, floor });
        }

        let bid = Bid {
            bidder_id: bidder_id.to_string(),
            amount,
            placed_at: now.clone(),
        };
        self.bids.insert(bidder_id.to_string(), bid.clone());
        Ok(bid)
    }

    /// Withdraw the bidder's live bid. Fails cleanly (no side effect) when
    /// there is nothing to withdraw, so a double-withdraw is harmless.
    pub fn withdraw_bid(&mut self, bidder_id: &str) -> Result<(), MarketError> {
        if self.accepted_bid.is_some() {
            return Err(MarketError::UnitNotBiddable {
                unit_id: self.unit_id.clone(),
                reason: "a bid has already been accepted".into(),
            });
        }
        if self.bids.remove(bidder_id).is_none() {
            return Err(MarketError::NoBidToWithdraw {
                bidder_id: bidder_id.to_string(),
            });
        }
        Ok(())
    }

    /// Explicit producer acceptance of the named bidder's live bid. Never
    /// chosen implicitly by highest-bid logic. Transitions the unit out of
    /// open bidding (`Active -> Accepted`) and records the buyer's dropoff
    /// coordinate when one is supplied.
    pub fn accept_bid(
        &mut self,
        bidder_id: &str,
        dropoff: Option<Coordinate>,
        now: &TimeStamp<Utc>,
    ) -> Result<AcceptedBid, MarketError> {
        if self.accepted_bid.is_some() {
            return Err(MarketError::AlreadyAccepted {
                unit_id: self.unit_id.clone(),
            });
        }
        let bid = self
            .bids
            .get(bidder_id)
            .ok_or_else(|| MarketError::BidNotLive {
                bidder_id: bidder_id.to_string(),
            })?
            .clone();

        self.status = self.status.advance_to(UnitStatus::Accepted)?;

        let accepted = AcceptedBid {
            bidder_id: bid.bidder_id,
            amount: bid.amount,
            accepted_at: now.clone(),
        };
        self.accepted_bid = Some(accepted.clone());
        self.accepted_at = Some(now.clone());
        if dropoff.is_some() {
            self.dropoff = dropoff;
        }
        Ok(accepted)
    }

    /// Pure read: the current highest live bid, ties broken by the earliest
    /// timestamp.
    pub fn highest_bid(&self) -> Option<&Bid> {
        self.bids.values().max_by(|a, b| {
            a.amount
                .cmp(&b.amount)
                .then_with(|| b.placed_at.cmp(&a.placed_at))
        })
    }

    /// Live bids for display, highest first. The producer sees bidder ids;
    /// any other viewer sees amounts only, with their own entry flagged.
    pub fn live_bids_view(&self, viewer_id: &str) -> Vec<BidView> {
        let is_producer = viewer_id == self.producer_id;
        let mut views: Vec<BidView> = self
            .bids
            .values()
            .map(|bid| BidView {
                amount: bid.amount,
                placed_at: bid.placed_at.clone(),
                bidder_id: is_producer.then(|| bid.bidder_id.clone()),
                yours: bid.bidder_id == viewer_id,
            })
            .collect();
        views.sort_by(|a, b| {
            b.amount
                .cmp(&a.amount)
                .then_with(|| a.placed_at.cmp(&b.placed_at))
        });
        views
    }
}
