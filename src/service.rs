//! Service layer API for marketplace lifecycle operations.
//!
//! One method per command in the surface: bidding, delivery negotiation,
//! preparation, tracking, cancellation, plus the read-side queries. Every
//! mutation goes through the store's compare-and-swap transaction; events
//! for the notification collaborator are emitted only after the commit.

use std::sync::Arc;

use chrono::Utc;

use crate::bids::{AcceptedBid, Bid, BidView};
use crate::delivery::{DeliveryAssignment, DeliveryProposal, TrackingStep};
use crate::error::MarketError;
use crate::events::{MarketEvent, Notify, NullNotifier};
use crate::lifecycle::UnitStatus;
use crate::pricing::PricingConfig;
use crate::queue::{self, WorkItem};
use crate::store::UnitStore;
use crate::types::{Cents, Coordinate, TimeStamp};
use crate::unit::{TradableUnit, UnitDraft};

/// Tunables for the whole core. Pricing constants live in the nested
/// [`PricingConfig`].
#[derive(Debug, Clone)]
pub struct MarketConfig {
    pub pricing: PricingConfig,
    /// Optimistic-conflict retry budget per operation.
    pub txn_retries: u32,
    /// Policy toggle: allow `close_bidding` to accept the highest live bid
    /// automatically. Off by default; acceptance is an explicit producer
    /// action.
    pub auto_accept_highest: bool,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            pricing: PricingConfig::default(),
            txn_retries: 5,
            auto_accept_highest: false,
        }
    }
}

pub struct MarketService {
    store: UnitStore,
    config: MarketConfig,
    notifier: Arc<dyn Notify>,
}

impl MarketService {
    pub fn new(instance: Arc<sled::Db>) -> Self {
        Self::with_config(instance, MarketConfig::default())
    }

    pub fn with_config(instance: Arc<sled::Db>, config: MarketConfig) -> Self {
        Self {
            store: UnitStore::new(instance),
            config,
            notifier: Arc::new(NullNotifier),
        }
    }

    pub fn set_notifier(mut self, notifier: Arc<dyn Notify>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn config(&self) -> &MarketConfig {
        &self.config
    }

    /// Fire-and-forget event emission. A failing notifier is logged and
    /// never affects the committed transition.
    fn emit(&self, event: MarketEvent) {
        if let Err(err) = self.notifier.notify(event.clone()) {
            tracing::warn!(?event, %err, "dropping undeliverable notification");
        }
    }

    /// Actor ids a status-change notification should reach: the producer,
    /// the accepted buyer and the assigned courier, as far as they exist.
    fn affected_actors(unit: &TradableUnit) -> Vec<String> {
        let mut ids = vec![unit.producer_id.clone()];
        if let Some(accepted) = &unit.accepted_bid {
            ids.push(accepted.bidder_id.clone());
        }
        if let Some(assignment) = &unit.assignment {
            ids.push(assignment.courier_id.clone());
        }
        ids
    }

    // ---- creation & listing -------------------------------------------------

    /// Create a new unit from a draft: validate, mint the id and persist the
    /// `Active` document with its listing snapshot.
    pub fn create_unit(&self, draft: UnitDraft, now: TimeStamp<Utc>) -> anyhow::Result<TradableUnit> {
        let (unit, listing_hash, listing_cbor) = draft.validate_and_finalise(now)?;
        self.store.insert_new(&unit, &listing_hash, listing_cbor)?;

        tracing::info!(unit_id = %unit.unit_id, producer_id = %unit.producer_id, "unit created");
        Ok(unit)
    }

    /// Producer edits to description/base price while the unit is still
    /// `Active`. Writes a fresh listing snapshot when anything changed.
    pub fn update_listing(
        &self,
        unit_id: &str,
        producer_id: &str,
        description: Option<String>,
        base_price: Option<Cents>,
    ) -> anyhow::Result<()> {
        let snapshot = self.store.update(unit_id, self.config.txn_retries, |unit| {
            Self::require_producer(unit, producer_id, "edit this listing")?;
            unit.update_listing(description.clone(), base_price)
        })?;

        if let Some((hash, cbor)) = snapshot {
            self.store.insert_blob(&hash, cbor)?;
            tracing::info!(unit_id, listing_hash = %hash, "listing updated");
        }
        Ok(())
    }

    /// Terminal cancellation by the owning producer. Only before pickup.
    pub fn cancel_unit(
        &self,
        unit_id: &str,
        producer_id: &str,
        now: TimeStamp<Utc>,
    ) -> anyhow::Result<()> {
        let unit = self.store.update(unit_id, self.config.txn_retries, |unit| {
            Self::require_producer(unit, producer_id, "cancel this unit")?;
            unit.apply_due_preparation(&now);
            unit.cancel(&now)?;
            Ok(unit.clone())
        })?;

        tracing::info!(unit_id, "unit cancelled");
        self.emit(MarketEvent::StatusChanged {
            unit_id: unit_id.to_string(),
            status: UnitStatus::Cancelled,
            actor_ids: Self::affected_actors(&unit),
        });
        Ok(())
    }

    // ---- bidding ------------------------------------------------------------

    pub fn place_bid(
        &self,
        unit_id: &str,
        bidder_id: &str,
        amount: Cents,
        now: TimeStamp<Utc>,
    ) -> anyhow::Result<Bid> {
        let bid = self.store.update(unit_id, self.config.txn_retries, |unit| {
            unit.place_bid(bidder_id, amount, &now)
        })?;

        tracing::debug!(unit_id, bidder_id, amount, "bid placed");
        Ok(bid)
    }

    pub fn withdraw_bid(&self, unit_id: &str, bidder_id: &str) -> anyhow::Result<()> {
        self.store.update(unit_id, self.config.txn_retries, |unit| {
            unit.withdraw_bid(bidder_id)
        })?;

        tracing::debug!(unit_id, bidder_id, "bid withdrawn");
        Ok(())
    }

    /// Explicit producer acceptance of the named bidder's live bid. The
    /// buyer's dropoff coordinate, when known, is recorded for delivery
    /// pricing.
    pub fn accept_bid(
        &self,
        unit_id: &str,
        producer_id: &str,
        bidder_id: &str,
        dropoff: Option<Coordinate>,
        now: TimeStamp<Utc>,
    ) -> anyhow::Result<AcceptedBid> {
        let accepted = self.store.update(unit_id, self.config.txn_retries, |unit| {
            Self::require_producer(unit, producer_id, "accept a bid on this unit")?;
            unit.accept_bid(bidder_id, dropoff, &now)
        })?;

        tracing::info!(unit_id, bidder_id, amount = accepted.amount, "bid accepted");
        self.emit(MarketEvent::BidAccepted {
            unit_id: unit_id.to_string(),
            producer_id: producer_id.to_string(),
            bidder_id: accepted.bidder_id.clone(),
            amount: accepted.amount,
        });
        Ok(accepted)
    }

    /// Close bidding under the auto-accept-highest policy toggle: the
    /// highest live bid wins. Rejected outright when the toggle is off;
    /// explicit acceptance is the core behaviour.
    pub fn close_bidding(
        &self,
        unit_id: &str,
        producer_id: &str,
        now: TimeStamp<Utc>,
    ) -> anyhow::Result<AcceptedBid> {
        if !self.config.auto_accept_highest {
            anyhow::bail!("the auto-accept-highest policy is disabled");
        }

        let accepted = self.store.update(unit_id, self.config.txn_retries, |unit| {
            Self::require_producer(unit, producer_id, "close bidding on this unit")?;
            let highest = unit
                .highest_bid()
                .map(|b| b.bidder_id.clone())
                .ok_or_else(|| MarketError::UnitNotBiddable {
                    unit_id: unit.unit_id.clone(),
                    reason: "no live bids to accept".into(),
                })?;
            unit.accept_bid(&highest, None, &now)
        })?;

        tracing::info!(unit_id, bidder_id = %accepted.bidder_id, "bidding closed on highest bid");
        self.emit(MarketEvent::BidAccepted {
            unit_id: unit_id.to_string(),
            producer_id: producer_id.to_string(),
            bidder_id: accepted.bidder_id.clone(),
            amount: accepted.amount,
        });
        Ok(accepted)
    }

    // ---- delivery negotiation ----------------------------------------------

    /// The floor-derived default amount and the adjustment step, for a
    /// courier previewing a lock.
    pub fn preview_delivery_amount(&self, unit_id: &str) -> anyhow::Result<(Cents, Cents)> {
        let unit = self.store.load(unit_id)?;
        let floor = unit.delivery_floor(&self.config.pricing);
        Ok((floor, self.config.pricing.adjust_step))
    }

    pub fn lock_delivery(
        &self,
        unit_id: &str,
        courier_id: &str,
        amount: Cents,
        now: TimeStamp<Utc>,
    ) -> anyhow::Result<DeliveryAssignment> {
        let assignment = self.store.update(unit_id, self.config.txn_retries, |unit| {
            unit.lock_delivery(courier_id, amount, &self.config.pricing, &now)
        })?;

        tracing::info!(unit_id, courier_id, amount, "delivery locked");
        self.emit_assignment(unit_id, &assignment)?;
        Ok(assignment)
    }

    pub fn propose_delivery(
        &self,
        unit_id: &str,
        courier_id: &str,
        amount: Cents,
        now: TimeStamp<Utc>,
    ) -> anyhow::Result<DeliveryProposal> {
        let proposal = self.store.update(unit_id, self.config.txn_retries, |unit| {
            unit.propose_delivery(courier_id, amount, &self.config.pricing, &now)
        })?;

        tracing::debug!(unit_id, courier_id, amount, "delivery proposed");
        Ok(proposal)
    }

    pub fn withdraw_proposal(&self, unit_id: &str, courier_id: &str) -> anyhow::Result<()> {
        self.store.update(unit_id, self.config.txn_retries, |unit| {
            unit.withdraw_proposal(courier_id)
        })?;

        tracing::debug!(unit_id, courier_id, "delivery proposal withdrawn");
        Ok(())
    }

    pub fn accept_proposal(
        &self,
        unit_id: &str,
        producer_id: &str,
        courier_id: &str,
        now: TimeStamp<Utc>,
    ) -> anyhow::Result<DeliveryAssignment> {
        let assignment = self.store.update(unit_id, self.config.txn_retries, |unit| {
            Self::require_producer(unit, producer_id, "accept a delivery proposal")?;
            unit.accept_proposal(courier_id, &now)
        })?;

        tracing::info!(unit_id, courier_id, amount = assignment.amount, "delivery proposal accepted");
        self.emit_assignment(unit_id, &assignment)?;
        Ok(assignment)
    }

    fn emit_assignment(
        &self,
        unit_id: &str,
        assignment: &DeliveryAssignment,
    ) -> anyhow::Result<()> {
        let unit = self.store.load(unit_id)?;
        self.emit(MarketEvent::DeliveryAssigned {
            unit_id: unit_id.to_string(),
            producer_id: unit.producer_id,
            courier_id: assignment.courier_id.clone(),
            amount: assignment.amount,
        });
        Ok(())
    }

    // ---- fulfillment -------------------------------------------------------

    /// Producer starts preparation; the `Preparing -> Ready` transition is
    /// then due at `now + minutes` and committed by the sweep (or by any
    /// later mutation noticing it is due).
    pub fn start_preparation(
        &self,
        unit_id: &str,
        producer_id: &str,
        minutes: u32,
        now: TimeStamp<Utc>,
    ) -> anyhow::Result<()> {
        let unit = self.store.update(unit_id, self.config.txn_retries, |unit| {
            Self::require_producer(unit, producer_id, "start preparation")?;
            unit.start_preparation(minutes, &now)?;
            Ok(unit.clone())
        })?;

        tracing::info!(unit_id, minutes, "preparation started");
        self.emit(MarketEvent::StatusChanged {
            unit_id: unit_id.to_string(),
            status: UnitStatus::Preparing,
            actor_ids: Self::affected_actors(&unit),
        });
        Ok(())
    }

    /// Manual "mark ready". Returns whether this call performed the
    /// transition; losing the race against the timer is a no-op.
    pub fn mark_ready(
        &self,
        unit_id: &str,
        producer_id: &str,
        now: TimeStamp<Utc>,
    ) -> anyhow::Result<bool> {
        let (changed, unit) = self.store.update(unit_id, self.config.txn_retries, |unit| {
            Self::require_producer(unit, producer_id, "mark this unit ready")?;
            let changed = unit.mark_ready(&now)?;
            Ok((changed, unit.clone()))
        })?;

        if changed {
            tracing::info!(unit_id, "unit marked ready");
            self.emit(MarketEvent::StatusChanged {
                unit_id: unit_id.to_string(),
                status: UnitStatus::Ready,
                actor_ids: Self::affected_actors(&unit),
            });
        }
        Ok(changed)
    }

    /// Scheduler entry point: commit the timer-driven `Preparing -> Ready`
    /// transition for every unit whose stored deadline has passed. Purely
    /// derived from `prep_started_at + prep_minutes`, so a restarted process
    /// reaches the same result as continuous uptime. Returns the ids that
    /// transitioned.
    pub fn sweep_due_preparations(&self, now: TimeStamp<Utc>) -> anyhow::Result<Vec<String>> {
        let mut transitioned = Vec::new();

        for unit in self.store.units() {
            let unit = unit?;
            if unit.effective_status(&now) != UnitStatus::Ready
                || unit.status != UnitStatus::Preparing
            {
                continue;
            }

            let result = self.store.update(&unit.unit_id, self.config.txn_retries, |u| {
                Ok((u.apply_due_preparation(&now), u.clone()))
            });
            match result {
                Ok((true, fresh)) => {
                    tracing::info!(unit_id = %fresh.unit_id, "preparation timer elapsed, unit ready");
                    self.emit(MarketEvent::StatusChanged {
                        unit_id: fresh.unit_id.clone(),
                        status: UnitStatus::Ready,
                        actor_ids: Self::affected_actors(&fresh),
                    });
                    transitioned.push(fresh.unit_id);
                }
                Ok((false, _)) => {} // someone else got there first
                Err(err) => {
                    tracing::warn!(unit_id = %unit.unit_id, %err, "sweep skipped unit");
                }
            }
        }
        Ok(transitioned)
    }

    /// Courier sets the next tracking flag. Pickup and delivery mirror into
    /// the outer lifecycle.
    pub fn advance_tracking(
        &self,
        unit_id: &str,
        courier_id: &str,
        step: TrackingStep,
        now: TimeStamp<Utc>,
    ) -> anyhow::Result<DeliveryAssignment> {
        let (assignment, unit, was_preparing) =
            self.store.update(unit_id, self.config.txn_retries, |unit| {
                let was_preparing = unit.status == UnitStatus::Preparing;
                let assignment = unit.advance_tracking(courier_id, step, &now)?;
                Ok((assignment, unit.clone(), was_preparing))
            })?;

        tracing::info!(unit_id, courier_id, ?step, "tracking advanced");
        // The tracking call may have committed the due Preparing -> Ready
        // transition itself; the Ready notification must not wait for the
        // sweep in that case.
        if was_preparing && unit.status != UnitStatus::Preparing {
            self.emit(MarketEvent::StatusChanged {
                unit_id: unit_id.to_string(),
                status: UnitStatus::Ready,
                actor_ids: Self::affected_actors(&unit),
            });
        }
        if matches!(step, TrackingStep::PickedUpOrder | TrackingStep::DeliveredOrder) {
            self.emit(MarketEvent::StatusChanged {
                unit_id: unit_id.to_string(),
                status: unit.status,
                actor_ids: Self::affected_actors(&unit),
            });
        }
        Ok(assignment)
    }

    // ---- queries -----------------------------------------------------------

    /// The unit with its effective (timer-derived) status. The read never
    /// writes; the sweep owns the commit.
    pub fn unit(&self, unit_id: &str, now: &TimeStamp<Utc>) -> anyhow::Result<TradableUnit> {
        let mut unit = self.store.load(unit_id)?;
        unit.apply_due_preparation(now);
        Ok(unit)
    }

    /// Live bids for display, redacted for the viewer.
    pub fn live_bids(&self, unit_id: &str, viewer_id: &str) -> anyhow::Result<Vec<BidView>> {
        Ok(self.store.load(unit_id)?.live_bids_view(viewer_id))
    }

    pub fn highest_bid(&self, unit_id: &str) -> anyhow::Result<Option<Bid>> {
        Ok(self.store.load(unit_id)?.highest_bid().cloned())
    }

    /// The courier's assigned-but-incomplete units, highest priority first.
    pub fn work_queue(&self, courier_id: &str, now: &TimeStamp<Utc>) -> anyhow::Result<Vec<WorkItem>> {
        let mut items = Vec::new();
        for unit in self.store.units() {
            let unit = unit?;
            let Some(assignment) = &unit.assignment else {
                continue;
            };
            if assignment.courier_id != courier_id || assignment.is_complete() {
                continue;
            }
            let status = unit.effective_status(now);
            if status == UnitStatus::Cancelled {
                continue;
            }
            let distance_km = self
                .config
                .pricing
                .distance_between(unit.pickup, unit.dropoff);
            let Some(score) = queue::priority_score(status, assignment.steps_done, distance_km)
            else {
                continue;
            };
            items.push(WorkItem {
                unit_id: unit.unit_id.clone(),
                status,
                steps_done: assignment.steps_done,
                amount: assignment.amount,
                distance_km,
                score,
            });
        }
        Ok(queue::rank(items))
    }

    /// Total locked amounts over this courier's delivered assignments.
    pub fn courier_earnings(&self, courier_id: &str) -> anyhow::Result<Cents> {
        let mut total = 0;
        for unit in self.store.units() {
            let unit = unit?;
            if unit.status != UnitStatus::Delivered {
                continue;
            }
            if let Some(assignment) = &unit.assignment
                && assignment.courier_id == courier_id
            {
                total += assignment.amount;
            }
        }
        Ok(total)
    }

    fn require_producer(
        unit: &TradableUnit,
        actor_id: &str,
        action: &'static str,
    ) -> Result<(), MarketError> {
        if unit.producer_id != actor_id {
            return Err(MarketError::ActorUnauthorized {
                actor_id: actor_id.to_string(),
                action,
            });
        }
        Ok(())
    }
}
