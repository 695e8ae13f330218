use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tandem_core::{EngineError, EngineResult};
use tandem_shared::geo::{geohash_encode, GEOHASH_PRECISION};
use tandem_shared::{Campus, GeoPoint};

pub const RIDE_POSTS_COLLECTION: &str = "ridePosts";

/// Ride post lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PostStatus {
    Open,
    Expired,
    Canceled,
    InTrip,
}

impl PostStatus {
    /// The single legal-transition table. Every mutation path consults
    /// this rather than comparing status strings at call sites.
    pub fn allowed_transitions(self) -> &'static [PostStatus] {
        match self {
            PostStatus::Open => &[PostStatus::Expired, PostStatus::Canceled, PostStatus::InTrip],
            PostStatus::Expired | PostStatus::Canceled | PostStatus::InTrip => &[],
        }
    }

    pub fn can_transition_to(self, next: PostStatus) -> bool {
        self.allowed_transitions().contains(&next)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PostStatus::Open => "open",
            PostStatus::Expired => "expired",
            PostStatus::Canceled => "canceled",
            PostStatus::InTrip => "inTrip",
        }
    }
}

/// Whether an origin is shown exactly or fuzzed for privacy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OriginPrecision {
    Exact,
    Approximate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Origin {
    pub lat: f64,
    pub lng: f64,
    pub label: String,
    pub precision: OriginPrecision,
    /// Derived cell index, computed once at create time.
    pub geohash: String,
}

impl Origin {
    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lng)
    }
}

/// A driver's offer of transportation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RidePost {
    pub driver_id: String,
    pub origin: Origin,
    pub destination_campus: Campus,
    pub seats_total: u32,
    pub seats_available: u32,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub window_start: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub window_end: DateTime<Utc>,
    pub status: PostStatus,
    /// Server-computed, never client-writable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver_reliability: Option<f64>,
    /// Server-computed, never client-writable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver_rating: Option<f64>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreatePostInput {
    pub driver_id: String,
    pub origin_lat: f64,
    pub origin_lng: f64,
    pub origin_label: String,
    pub origin_precision: OriginPrecision,
    pub destination_campus: Campus,
    pub seats_total: u32,
    /// Defaults to `seats_total` when absent.
    pub seats_available: Option<u32>,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

impl RidePost {
    pub fn create(input: CreatePostInput, now: DateTime<Utc>) -> EngineResult<Self> {
        if input.driver_id.is_empty() {
            return Err(EngineError::Validation("driverId is required".into()));
        }
        if input.origin_label.trim().is_empty() {
            return Err(EngineError::Validation("origin label is required".into()));
        }
        validate_coordinates(input.origin_lat, input.origin_lng)?;
        validate_window(input.window_start, input.window_end)?;

        let seats_available = input.seats_available.unwrap_or(input.seats_total);
        validate_seats(input.seats_total, seats_available)?;

        let geohash = geohash_encode(
            GeoPoint::new(input.origin_lat, input.origin_lng),
            GEOHASH_PRECISION,
        );

        Ok(Self {
            driver_id: input.driver_id,
            origin: Origin {
                lat: input.origin_lat,
                lng: input.origin_lng,
                label: input.origin_label,
                precision: input.origin_precision,
                geohash,
            },
            destination_campus: input.destination_campus,
            seats_total: input.seats_total,
            seats_available,
            window_start: input.window_start,
            window_end: input.window_end,
            status: PostStatus::Open,
            driver_reliability: None,
            driver_rating: None,
            created_at: now,
            updated_at: now,
        })
    }
}

pub fn validate_coordinates(lat: f64, lng: f64) -> EngineResult<()> {
    if lat.is_nan() || lng.is_nan() {
        return Err(EngineError::Validation(
            "origin coordinates must be valid numbers".into(),
        ));
    }
    if !(-90.0..=90.0).contains(&lat) {
        return Err(EngineError::Validation("latitude out of bounds".into()));
    }
    if !(-180.0..=180.0).contains(&lng) {
        return Err(EngineError::Validation("longitude out of bounds".into()));
    }
    Ok(())
}

pub fn validate_window(start: DateTime<Utc>, end: DateTime<Utc>) -> EngineResult<()> {
    if end <= start {
        return Err(EngineError::Validation(
            "windowEnd must be after windowStart".into(),
        ));
    }
    Ok(())
}

pub fn validate_seats(seats_total: u32, seats_available: u32) -> EngineResult<()> {
    if seats_total == 0 {
        return Err(EngineError::Validation(
            "seatsTotal must be a positive integer".into(),
        ));
    }
    if seats_available > seats_total {
        return Err(EngineError::Validation(
            "seatsAvailable cannot exceed seatsTotal".into(),
        ));
    }
    Ok(())
}
