//! The tradable unit: the single persisted document every lifecycle
//! operation transacts against, plus the draft builder that creates one.
//!
//! A unit is a biddable listing or a standing order. Bids are keyed by
//! bidder and proposals by courier so that "supersede" is a map insert
//! inside one document write, never a remove-then-add across two.

use std::collections::BTreeMap;

use chrono::Utc;

use crate::bids::{AcceptedBid, Bid};
use crate::delivery::{DeliveryAssignment, DeliveryProposal};
use crate::error::MarketError;
use crate::lifecycle::UnitStatus;
use crate::types::{Cents, Coordinate, TimeStamp};
use crate::utils;

/// Optional bidding window `[start, end)`. Outside it, `place_bid` is
/// rejected with `UnitNotBiddable`.
#[derive(Debug, Clone, PartialEq, minicbor::Encode, minicbor::Decode)]
pub struct BidWindow {
    #[n(0)]
    pub start: TimeStamp<Utc>,
    #[n(1)]
    pub end: TimeStamp<Utc>,
}

impl BidWindow {
    pub fn contains(&self, now: &TimeStamp<Utc>) -> bool {
        *now >= self.start && *now < self.end
    }
}

/// Immutable snapshot of the producer-authored listing fields. Stored under
/// its own content hash so edits leave an audit trail; the unit document
/// references the current hash.
#[derive(Debug, Clone, PartialEq, minicbor::Encode, minicbor::Decode)]
pub struct ListingSnapshot {
    #[n(0)]
    pub producer_id: String,
    #[n(1)]
    pub description: String,
    #[n(2)]
    pub quantity: u64,
    #[n(3)]
    pub base_price: Cents,
}

impl ListingSnapshot {
    pub fn build(&self) -> Result<(String, Vec<u8>), MarketError> {
        let cbor = minicbor::to_vec(self)?;
        let hash = sha256::digest(&cbor);

        Ok((hash, cbor))
    }
}

/// The unit record. Persisted as one CBOR document under the unit id; every
/// mutating operation is a single compare-and-swap against it.
#[derive(Debug, Clone, minicbor::Encode, minicbor::Decode)]
pub struct TradableUnit {
    #[n(0)]
    pub unit_id: String,
    #[n(1)]
    pub producer_id: String,
    #[n(2)]
    pub description: String,
    #[n(3)]
    pub quantity: u64,
    #[n(4)]
    pub base_price: Cents,
    #[n(5)]
    pub status: UnitStatus,
    #[n(6)]
    pub created_at: TimeStamp<Utc>,
    #[n(7)]
    pub window: Option<BidWindow>,
    /// Live bids, one per bidder. A new bid from the same bidder replaces
    /// the old entry in the same document write.
    #[n(8)]
    pub bids: BTreeMap<String, Bid>,
    #[n(9)]
    pub accepted_bid: Option<AcceptedBid>,
    /// Open delivery proposals, one per courier.
    #[n(10)]
    pub proposals: BTreeMap<String, DeliveryProposal>,
    #[n(11)]
    pub assignment: Option<DeliveryAssignment>,
    #[n(12)]
    pub accepted_at: Option<TimeStamp<Utc>>,
    #[n(13)]
    pub prep_started_at: Option<TimeStamp<Utc>>,
    #[n(14)]
    pub prep_minutes: Option<u32>,
    #[n(15)]
    pub ready_at: Option<TimeStamp<Utc>>,
    #[n(16)]
    pub picked_up_at: Option<TimeStamp<Utc>>,
    #[n(17)]
    pub delivered_at: Option<TimeStamp<Utc>>,
    #[n(18)]
    pub cancelled_at: Option<TimeStamp<Utc>>,
    /// Producer-side pickup coordinate, from the identity collaborator.
    #[n(19)]
    pub pickup: Option<Coordinate>,
    /// Buyer-side dropoff coordinate, learned at acceptance.
    #[n(20)]
    pub dropoff: Option<Coordinate>,
    /// Reference to the current [`ListingSnapshot`].
    #[n(21)]
    pub listing_hash: String,
    /// Bumped on every committed write. Audit/sequencing only; atomicity
    /// comes from the CAS on the raw document bytes.
    #[n(22)]
    pub version: u64,
}

impl TradableUnit {
    pub fn snapshot(&self) -> ListingSnapshot {
        ListingSnapshot {
            producer_id: self.producer_id.clone(),
            description: self.description.clone(),
            quantity: self.quantity,
            base_price: self.base_price,
        }
    }

    /// The moment the preparation timer elapses, derived purely from stored
    /// timestamps so a process restart recomputes the identical deadline.
    pub fn prep_deadline(&self) -> Option<TimeStamp<Utc>> {
        match (&self.prep_started_at, self.prep_minutes) {
            (Some(start), Some(minutes)) => Some(start.plus_minutes(minutes)),
            _ => None,
        }
    }

    /// Commit the timer-driven `Preparing -> Ready` transition if it is due.
    /// Idempotent; safe to race against a manual `mark_ready`. Returns
    /// whether the status changed.
    pub fn apply_due_preparation(&mut self, now: &TimeStamp<Utc>) -> bool {
        if self.status != UnitStatus::Preparing {
            return false;
        }
        match self.prep_deadline() {
            Some(deadline) if *now >= deadline => {
                self.status = UnitStatus::Ready;
                // The unit became ready when the timer elapsed, not when we
                // happened to notice.
                self.ready_at = Some(deadline);
                true
            }
            _ => false,
        }
    }

    /// Read-side view of the status with the preparation timer applied.
    pub fn effective_status(&self, now: &TimeStamp<Utc>) -> UnitStatus {
        let mut probe = self.clone();
        probe.apply_due_preparation(now);
        probe.status
    }

    /// Producer starts preparation with a duration. The `Preparing -> Ready`
    /// transition is then scheduled off `prep_started_at + prep_minutes`.
    pub fn start_preparation(
        &mut self,
        minutes: u32,
        now: &TimeStamp<Utc>,
    ) -> Result<(), MarketError> {
        self.status = self.status.advance_to(UnitStatus::Preparing)?;
        self.prep_started_at = Some(now.clone());
        self.prep_minutes = Some(minutes);
        Ok(())
    }

    /// Producer manually marks the unit ready before the timer fires. If the
    /// timer already won the race this is a no-op, not an error. Returns
    /// whether this call performed the transition.
    pub fn mark_ready(&mut self, now: &TimeStamp<Utc>) -> Result<bool, MarketError> {
        if self.apply_due_preparation(now) {
            return Ok(false);
        }
        if self.status == UnitStatus::Ready {
            return Ok(false);
        }
        self.status = self.status.advance_to(UnitStatus::Ready)?;
        self.ready_at = Some(now.clone());
        Ok(true)
    }

    /// Terminal cancellation of the whole unit. Only before pickup.
    pub fn cancel(&mut self, now: &TimeStamp<Utc>) -> Result<(), MarketError> {
        self.status = self.status.advance_to(UnitStatus::Cancelled)?;
        self.cancelled_at = Some(now.clone());
        Ok(())
    }

    /// Producer edits to description/price. Only while `Active`, and the
    /// price is frozen as soon as any live bid exists (the bid floor must
    /// not move under the bidders). Returns the new snapshot to persist when
    /// anything changed.
    pub fn update_listing(
        &mut self,
        description: Option<String>,
        base_price: Option<Cents>,
    ) -> Result<Option<(String, Vec<u8>)>, MarketError> {
        if self.status != UnitStatus::Active {
            return Err(MarketError::ListingFrozen {
                unit_id: self.unit_id.clone(),
                reason: "unit has left the Active state".into(),
            });
        }
        if base_price.is_some() && !self.bids.is_empty() {
            return Err(MarketError::ListingFrozen {
                unit_id: self.unit_id.clone(),
                reason: "live bids exist; the base price is frozen".into(),
            });
        }

        let mut changed = false;
        if let Some(description) = description {
            if description.trim().is_empty() {
                return Err(MarketError::InvalidDraft("description is empty".into()));
            }
            self.description = description;
            changed = true;
        }
        if let Some(price) = base_price {
            if price == 0 {
                return Err(MarketError::InvalidDraft("base price is zero".into()));
            }
            self.base_price = price;
            changed = true;
        }
        if !changed {
            return Ok(None);
        }

        let (hash, cbor) = self.snapshot().build()?;
        self.listing_hash = hash.clone();
        Ok(Some((hash, cbor)))
    }
}

/// Fluent draft for a new unit. `validate_and_finalise` checks the fields,
/// mints the unit id and returns the unit together with its listing
/// snapshot for the initial batch write.
#[derive(Default)]
pub struct UnitDraft {
    producer_id: Option<String>,
    description: Option<String>,
    quantity: u64,
    base_price: Cents,
    window: Option<BidWindow>,
    pickup: Option<Coordinate>,
}

impl UnitDraft {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_producer(mut self, producer_id: impl Into<String>) -> Self {
        self.producer_id = Some(producer_id.into());
        self
    }
    pub fn set_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
    pub fn set_quantity(mut self, quantity: u64) -> Self {
        self.quantity = quantity;
        self
    }
    pub fn set_base_price(mut self, base_price: Cents) -> Self {
        self.base_price = base_price;
        self
    }
    pub fn set_window(mut self, start: TimeStamp<Utc>, end: TimeStamp<Utc>) -> Self {
        self.window = Some(BidWindow { start, end });
        self
    }
    pub fn set_pickup(mut self, pickup: Coordinate) -> Self {
        self.pickup = Some(pickup);
        self
    }

    pub fn validate_and_finalise(
        self,
        now: TimeStamp<Utc>,
    ) -> anyhow::Result<(TradableUnit, String, Vec<u8>)> {
        let producer_id = self
            .producer_id
            .ok_or_else(|| MarketError::InvalidDraft("producer id is not set".into()))?;
        let description = self
            .description
            .ok_or_else(|| MarketError::InvalidDraft("description is not set".into()))?;
        if description.trim().is_empty() {
            return Err(MarketError::InvalidDraft("description is empty".into()).into());
        }
        if self.quantity == 0 {
            return Err(MarketError::InvalidDraft("quantity is zero".into()).into());
        }
        if self.base_price == 0 {
            return Err(MarketError::InvalidDraft("base price is zero".into()).into());
        }
        if let Some(window) = &self.window
            && window.start >= window.end
        {
            return Err(
                MarketError::InvalidDraft("bidding window start is not before end".into()).into(),
            );
        }

        let unit_id = utils::new_unit_id()?;
        let snapshot = ListingSnapshot {
            producer_id: producer_id.clone(),
            description: description.clone(),
            quantity: self.quantity,
            base_price: self.base_price,
        };
        let (listing_hash, listing_cbor) = snapshot.build()?;

        let unit = TradableUnit {
            unit_id,
            producer_id,
            description,
            quantity: self.quantity,
            base_price: self.base_price,
            status: UnitStatus::Active,
            created_at: now,
            window: self.window,
            bids: BTreeMap::new(),
            accepted_bid: None,
            proposals: BTreeMap::new(),
            assignment: None,
            accepted_at: None,
            prep_started_at: None,
            prep_minutes: None,
            ready_at: None,
            picked_up_at: None,
            delivered_at: None,
            cancelled_at: None,
            pickup: self.pickup,
            dropoff: None,
            listing_hash,
            version: 0,
        };

        let hash = unit.listing_hash.clone();
        Ok((unit, hash, listing_cbor))
    }
}
