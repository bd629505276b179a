//! Smoke-screen unit tests spanning the marketplace components.
//!
//! These test behaviour in isolation from the full lifecycle scenarios and
//! generally cover the happy path plus the first layer of rejections.

use std::sync::Arc;

use sled::open;
use tempfile::tempdir;

use farmlink::delivery::TrackingStep;
use farmlink::error::MarketError;
use farmlink::geo;
use farmlink::lifecycle::UnitStatus;
use farmlink::service::MarketService;
use farmlink::types::{Coordinate, Role, TimeStamp};
use farmlink::unit::UnitDraft;
use farmlink::utils::{new_actor_id, new_uuid_to_bech32};

// UTILS MODULE TESTS
mod utils_tests {
    use super::*;

    /// Minted ids are bech32 strings carrying the role prefix.
    #[test]
    fn generates_valid_bech32_with_hrp() {
        let unit_id = new_uuid_to_bech32("unit_").unwrap();
        assert!(unit_id.starts_with("unit_1"));
        assert!(unit_id.len() > 10);

        let farmer = new_actor_id(Role::Farmer).unwrap();
        let courier = new_actor_id(Role::Courier).unwrap();
        assert!(farmer.starts_with("farmer_1"));
        assert!(courier.starts_with("courier_1"));
    }

    #[test]
    fn handles_empty_hrp() {
        assert!(new_uuid_to_bech32("").is_err());
    }

    #[test]
    fn generates_unique_ids() {
        let id1 = new_uuid_to_bech32("unit_").unwrap();
        let id2 = new_uuid_to_bech32("unit_").unwrap();
        assert_ne!(id1, id2);
    }
}

// GEO MODULE TESTS
mod geo_tests {
    use super::*;

    /// Haversine distance is symmetric and rounded to two decimals.
    #[test]
    fn distance_is_symmetric() {
        let a = Coordinate::new(51.5074, -0.1278);
        let b = Coordinate::new(53.4808, -2.2426);

        assert_eq!(geo::distance_km(a, b), geo::distance_km(b, a));
    }

    #[test]
    fn nearby_points_are_a_fraction_of_a_km() {
        let a = Coordinate::new(52.2053, 0.1218);
        let b = Coordinate::new(52.2063, 0.1218);

        let d = geo::distance_km(a, b);
        assert!(d > 0.0 && d < 0.2, "got {d}");
    }
}

// LIFECYCLE MODULE TESTS
mod lifecycle_tests {
    use super::*;

    #[test]
    fn terminal_states_are_terminal() {
        assert!(UnitStatus::Delivered.is_terminal());
        assert!(UnitStatus::Cancelled.is_terminal());
        assert!(!UnitStatus::Ready.is_terminal());
    }

    #[test]
    fn no_transition_leaves_a_terminal_state() {
        for to in [
            UnitStatus::Active,
            UnitStatus::Accepted,
            UnitStatus::Preparing,
            UnitStatus::Ready,
            UnitStatus::PickedUp,
            UnitStatus::Delivered,
            UnitStatus::Cancelled,
        ] {
            assert!(!UnitStatus::Delivered.can_advance_to(to));
            assert!(!UnitStatus::Cancelled.can_advance_to(to));
        }
    }
}

// TRACKING STEP TESTS
mod tracking_tests {
    use super::*;

    #[test]
    fn steps_index_in_declared_order() {
        for (i, step) in TrackingStep::ALL.iter().enumerate() {
            assert_eq!(usize::from(step.index()), i);
            assert_eq!(TrackingStep::from_index(step.index()), Some(*step));
        }
        assert_eq!(TrackingStep::from_index(6), None);
    }
}

// SERVICE SURFACE TESTS
mod service_tests {
    use super::*;

    fn service(name: &str) -> (MarketService, tempfile::TempDir) {
        let temp_dir = tempdir().unwrap();
        let db = open(temp_dir.path().join(name)).unwrap();
        (MarketService::new(Arc::new(db)), temp_dir)
    }

    fn draft(farmer: &str) -> UnitDraft {
        UnitDraft::new()
            .set_producer(farmer)
            .set_description("mixed veg box")
            .set_quantity(8)
            .set_base_price(400)
    }

    #[test]
    fn unknown_unit_is_unit_not_found() {
        let (service, _dir) = service("not_found.db");

        let err = service
            .place_bid("unit_1missing", "buyer_1a", 500, TimeStamp::new())
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MarketError>(),
            Some(MarketError::UnitNotFound { .. })
        ));
    }

    #[test]
    fn producer_only_commands_reject_strangers() {
        let (service, _dir) = service("strangers.db");
        let farmer = new_actor_id(Role::Farmer).unwrap();
        let buyer = new_actor_id(Role::Buyer).unwrap();
        let t0 = TimeStamp::new();

        let unit = service.create_unit(draft(&farmer), t0.clone()).unwrap();
        service
            .place_bid(&unit.unit_id, &buyer, 500, t0.plus_seconds(1))
            .unwrap();

        let err = service
            .accept_bid(&unit.unit_id, &buyer, &buyer, None, t0.plus_seconds(2))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MarketError>(),
            Some(MarketError::ActorUnauthorized { .. })
        ));

        let err = service
            .start_preparation(&unit.unit_id, &buyer, 10, t0.plus_seconds(3))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MarketError>(),
            Some(MarketError::ActorUnauthorized { .. })
        ));
    }

    #[test]
    fn listing_updates_write_a_fresh_snapshot() {
        let (service, _dir) = service("listing_update.db");
        let farmer = new_actor_id(Role::Farmer).unwrap();
        let t0 = TimeStamp::new();

        let unit = service.create_unit(draft(&farmer), t0.clone()).unwrap();
        service
            .update_listing(
                &unit.unit_id,
                &farmer,
                Some("mixed veg box, large".into()),
                Some(450),
            )
            .unwrap();

        let stored = service.unit(&unit.unit_id, &t0).unwrap();
        assert_eq!(stored.description, "mixed veg box, large");
        assert_eq!(stored.base_price, 450);
        assert_ne!(stored.listing_hash, unit.listing_hash);
    }

    #[test]
    fn preview_uses_fallback_distance_without_coordinates() {
        let (service, _dir) = service("preview.db");
        let farmer = new_actor_id(Role::Farmer).unwrap();

        let unit = service
            .create_unit(draft(&farmer), TimeStamp::new())
            .unwrap();

        // No pickup/dropoff known: 10 km at 10.00/km, step 10.00.
        let (floor, step) = service.preview_delivery_amount(&unit.unit_id).unwrap();
        assert_eq!(floor, 10_000);
        assert_eq!(step, 1_000);
    }

    #[test]
    fn delivery_negotiation_requires_an_accepted_unit() {
        let (service, _dir) = service("negotiation_gate.db");
        let farmer = new_actor_id(Role::Farmer).unwrap();
        let courier = new_actor_id(Role::Courier).unwrap();

        let unit = service
            .create_unit(draft(&farmer), TimeStamp::new())
            .unwrap();

        let err = service
            .lock_delivery(&unit.unit_id, &courier, 10_000, TimeStamp::new())
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MarketError>(),
            Some(MarketError::NotAwaitingDelivery { .. })
        ));
    }

    #[test]
    fn close_bidding_is_rejected_while_the_policy_is_off() {
        let (service, _dir) = service("policy_off.db");
        let farmer = new_actor_id(Role::Farmer).unwrap();
        let buyer = new_actor_id(Role::Buyer).unwrap();
        let t0 = TimeStamp::new();

        let unit = service.create_unit(draft(&farmer), t0.clone()).unwrap();
        service
            .place_bid(&unit.unit_id, &buyer, 500, t0.plus_seconds(1))
            .unwrap();

        let err = service
            .close_bidding(&unit.unit_id, &farmer, t0.plus_seconds(2))
            .unwrap_err();
        assert!(err.to_string().contains("auto-accept-highest"));
    }
}

// EVENT EMISSION TESTS
mod event_tests {
    use super::*;
    use farmlink::events::{MarketEvent, Notify};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingNotifier {
        events: Mutex<Vec<MarketEvent>>,
    }

    impl Notify for RecordingNotifier {
        fn notify(&self, event: MarketEvent) -> anyhow::Result<()> {
            self.events.lock().unwrap().push(event);
            Ok(())
        }
    }

    /// A notifier that always fails; commits must still go through.
    struct FailingNotifier;

    impl Notify for FailingNotifier {
        fn notify(&self, _event: MarketEvent) -> anyhow::Result<()> {
            anyhow::bail!("push gateway unreachable")
        }
    }

    #[test]
    fn accepted_bids_and_assignments_reach_the_notifier() {
        let temp_dir = tempdir().unwrap();
        let db = Arc::new(open(temp_dir.path().join("events.db")).unwrap());
        let notifier = Arc::new(RecordingNotifier::default());
        let service = MarketService::new(db).set_notifier(notifier.clone());

        let farmer = new_actor_id(Role::Farmer).unwrap();
        let buyer = new_actor_id(Role::Buyer).unwrap();
        let courier = new_actor_id(Role::Courier).unwrap();
        let t0 = TimeStamp::new();

        let unit = service
            .create_unit(
                UnitDraft::new()
                    .set_producer(&farmer)
                    .set_description("dozen duck eggs")
                    .set_quantity(12)
                    .set_base_price(400),
                t0.clone(),
            )
            .unwrap();
        service
            .place_bid(&unit.unit_id, &buyer, 500, t0.plus_seconds(1))
            .unwrap();
        service
            .accept_bid(&unit.unit_id, &farmer, &buyer, None, t0.plus_seconds(2))
            .unwrap();
        service
            .lock_delivery(&unit.unit_id, &courier, 10_000, t0.plus_seconds(3))
            .unwrap();

        let events = notifier.events.lock().unwrap();
        assert!(matches!(
            events[0],
            MarketEvent::BidAccepted { ref bidder_id, amount: 500, .. } if *bidder_id == buyer
        ));
        assert!(matches!(
            events[1],
            MarketEvent::DeliveryAssigned { ref courier_id, .. } if *courier_id == courier
        ));
    }

    #[test]
    fn tracking_that_trips_the_prep_timer_emits_the_ready_event() {
        let temp_dir = tempdir().unwrap();
        let db = Arc::new(open(temp_dir.path().join("timer_ready_event.db")).unwrap());
        let notifier = Arc::new(RecordingNotifier::default());
        let service = MarketService::new(db).set_notifier(notifier.clone());

        let farmer = new_actor_id(Role::Farmer).unwrap();
        let buyer = new_actor_id(Role::Buyer).unwrap();
        let courier = new_actor_id(Role::Courier).unwrap();
        let t0 = TimeStamp::new_with(2025, 8, 1, 9, 0, 0);

        let unit = service
            .create_unit(
                UnitDraft::new()
                    .set_producer(&farmer)
                    .set_description("sack of maincrop carrots")
                    .set_quantity(25)
                    .set_base_price(400),
                t0.clone(),
            )
            .unwrap();
        service
            .place_bid(&unit.unit_id, &buyer, 500, t0.plus_seconds(1))
            .unwrap();
        service
            .accept_bid(&unit.unit_id, &farmer, &buyer, None, t0.plus_seconds(2))
            .unwrap();
        service
            .start_preparation(&unit.unit_id, &farmer, 1, t0.clone())
            .unwrap();
        let (floor, _) = service.preview_delivery_amount(&unit.unit_id).unwrap();
        service
            .lock_delivery(&unit.unit_id, &courier, floor, t0.plus_seconds(3))
            .unwrap();
        service
            .advance_tracking(
                &unit.unit_id,
                &courier,
                TrackingStep::OnMyWayToFarmer,
                t0.plus_seconds(10),
            )
            .unwrap();
        service
            .advance_tracking(
                &unit.unit_id,
                &courier,
                TrackingStep::ReachedFarmer,
                t0.plus_seconds(20),
            )
            .unwrap();

        // Pickup past the deadline commits Preparing -> Ready -> PickedUp in
        // one transaction; both status notifications must go out, the sweep
        // never ran.
        service
            .advance_tracking(
                &unit.unit_id,
                &courier,
                TrackingStep::PickedUpOrder,
                t0.plus_minutes(2),
            )
            .unwrap();

        let events = notifier.events.lock().unwrap();
        let statuses: Vec<UnitStatus> = events
            .iter()
            .filter_map(|e| match e {
                MarketEvent::StatusChanged { status, .. } => Some(*status),
                _ => None,
            })
            .collect();
        assert_eq!(
            statuses,
            vec![UnitStatus::Preparing, UnitStatus::Ready, UnitStatus::PickedUp]
        );
    }

    #[test]
    fn a_failing_notifier_never_rolls_back_the_commit() {
        let temp_dir = tempdir().unwrap();
        let db = Arc::new(open(temp_dir.path().join("failing_notifier.db")).unwrap());
        let service = MarketService::new(db).set_notifier(Arc::new(FailingNotifier));

        let farmer = new_actor_id(Role::Farmer).unwrap();
        let buyer = new_actor_id(Role::Buyer).unwrap();
        let t0 = TimeStamp::new();

        let unit = service
            .create_unit(
                UnitDraft::new()
                    .set_producer(&farmer)
                    .set_description("bunch of rhubarb")
                    .set_quantity(3)
                    .set_base_price(400),
                t0.clone(),
            )
            .unwrap();
        service
            .place_bid(&unit.unit_id, &buyer, 500, t0.plus_seconds(1))
            .unwrap();
        service
            .accept_bid(&unit.unit_id, &farmer, &buyer, None, t0.plus_seconds(2))
            .unwrap();

        let stored = service.unit(&unit.unit_id, &t0.plus_seconds(3)).unwrap();
        assert_eq!(stored.status, UnitStatus::Accepted);
        assert!(stored.accepted_bid.is_some());
    }
}
