//! Priority ordering of a courier's assigned-but-incomplete units.
//!
//! Purely advisory: the score ranks work for display and dispatch
//! suggestions and never gates the state machine.

use crate::lifecycle::UnitStatus;
use crate::types::Cents;

/// Stage weights by count of completed tracking steps: work that has not
/// even left for the farmer ranks highest, descending to the final
/// not-yet-delivered leg.
const STAGE_WEIGHTS: [f64; 6] = [100.0, 80.0, 60.0, 40.0, 20.0, 10.0];

const READY_OR_PICKED_UP_BONUS: f64 = 5.0;

const DISTANCE_PENALTY_PER_KM: f64 = 0.1;

/// One ranked entry of a courier's work queue.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem {
    pub unit_id: String,
    pub status: UnitStatus,
    pub steps_done: u8,
    pub amount: Cents,
    pub distance_km: f64,
    pub score: f64,
}

/// Score a single incomplete assignment. Returns `None` when all six steps
/// are done; completed work does not belong in the queue.
pub fn priority_score(status: UnitStatus, steps_done: u8, distance_km: f64) -> Option<f64> {
    let weight = STAGE_WEIGHTS.get(usize::from(steps_done))?;
    let bonus = match status {
        UnitStatus::Ready | UnitStatus::PickedUp => READY_OR_PICKED_UP_BONUS,
        _ => 0.0,
    };
    Some(weight + bonus - DISTANCE_PENALTY_PER_KM * distance_km)
}

/// Sort items into the total order: descending score, ties broken by unit
/// id so the ordering is stable across reads.
pub fn rank(mut items: Vec<WorkItem>) -> Vec<WorkItem> {
    items.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.unit_id.cmp(&b.unit_id))
    });
    items
}
