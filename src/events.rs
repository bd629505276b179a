//! Collaborator-facing lifecycle events.
//!
//! The excluded notification layer consumes these to reach the affected
//! actors. Delivery is fire-and-forget: a notifier failure is logged and
//! never rolls back the committed state transition that produced it.

use crate::lifecycle::UnitStatus;
use crate::types::Cents;

#[derive(Debug, Clone, PartialEq)]
pub enum MarketEvent {
    BidAccepted {
        unit_id: String,
        producer_id: String,
        bidder_id: String,
        amount: Cents,
    },
    DeliveryAssigned {
        unit_id: String,
        producer_id: String,
        courier_id: String,
        amount: Cents,
    },
    StatusChanged {
        unit_id: String,
        status: UnitStatus,
        /// The actor ids the notification layer should reach.
        actor_ids: Vec<String>,
    },
}

/// Sink for lifecycle events, implemented by the push-notification
/// collaborator.
pub trait Notify: Send + Sync {
    fn notify(&self, event: MarketEvent) -> anyhow::Result<()>;
}

/// Default sink that drops every event. Used when no notification layer is
/// wired up, and in tests that don't observe events.
pub struct NullNotifier;

impl Notify for NullNotifier {
    fn notify(&self, _event: MarketEvent) -> anyhow::Result<()> {
        Ok(())
    }
}
