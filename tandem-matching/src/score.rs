use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tandem_shared::Campus;

/// One ranked candidate in a rider's shortlist. A denormalized snapshot of
/// the source post at recompute time, not a live view.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchEntry {
    pub post_id: String,
    pub destination_campus: Campus,
    pub seats_available: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver_reliability: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver_rating: Option<f64>,
    pub distance_meters: f64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub window_start: DateTime<Utc>,
}

/// Composite ranking: reliability desc, then rating desc, then pickup
/// distance asc, then most recent departure window. Posts with no score
/// yet rank as zero on that axis rather than being excluded. Distance is
/// compared in whole meters so that sub-meter differences do not decide
/// the order.
pub fn compare_matches(a: &MatchEntry, b: &MatchEntry) -> Ordering {
    let reliability = |e: &MatchEntry| e.driver_reliability.unwrap_or(0.0);
    let rating = |e: &MatchEntry| e.driver_rating.unwrap_or(0.0);
    let distance = |e: &MatchEntry| e.distance_meters.round();

    reliability(b)
        .total_cmp(&reliability(a))
        .then_with(|| rating(b).total_cmp(&rating(a)))
        .then_with(|| distance(a).total_cmp(&distance(b)))
        .then_with(|| b.window_start.cmp(&a.window_start))
}
