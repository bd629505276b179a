//! Order, bidding and delivery lifecycle core for a farm marketplace.
//!
//! Three actors (farmers, buyers, couriers) negotiate over tradable units:
//! fixed-price or open-bidding acquisition, then a staged fulfillment
//! pipeline with courier tracking. The crate owns the lifecycle rules and
//! their persistence; identity, payments, maps and notifications are
//! external collaborators behind small seams.

pub mod bids;
pub mod delivery;
pub mod error;
pub mod events;
pub mod geo;
pub mod lifecycle;
pub mod pricing;
pub mod queue;
pub mod service;
pub mod store;
pub mod types;
pub mod unit;
pub mod utils;
