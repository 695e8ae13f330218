use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tandem_shared::{Campus, GeoPoint};

pub const RIDE_REQUESTS_COLLECTION: &str = "rideRequests";
pub const HOLDS_COLLECTION: &str = "holds";
pub const BOOKINGS_COLLECTION: &str = "bookings";

/// A rider's pickup point.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PickupPoint {
    pub lat: f64,
    pub lng: f64,
    pub label: String,
    pub is_approx: bool,
}

impl PickupPoint {
    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lng)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Declined,
    Expired,
    Canceled,
    Booked,
}

impl RequestStatus {
    /// Legal-transition table for ride requests. `Accepted` is a legacy
    /// intermediate some historical documents carry; it behaves like
    /// pending for accept/decline.
    pub fn allowed_transitions(self) -> &'static [RequestStatus] {
        match self {
            RequestStatus::Pending => &[
                RequestStatus::Booked,
                RequestStatus::Declined,
                RequestStatus::Expired,
                RequestStatus::Canceled,
            ],
            RequestStatus::Accepted => &[RequestStatus::Booked, RequestStatus::Declined],
            RequestStatus::Declined
            | RequestStatus::Expired
            | RequestStatus::Canceled
            | RequestStatus::Booked => &[],
        }
    }

    pub fn can_transition_to(self, next: RequestStatus) -> bool {
        self.allowed_transitions().contains(&next)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Accepted => "accepted",
            RequestStatus::Declined => "declined",
            RequestStatus::Expired => "expired",
            RequestStatus::Canceled => "canceled",
            RequestStatus::Booked => "booked",
        }
    }
}

/// A rider's claim against a post. The hold carrying its seats shares the
/// request's document id, so transactional paths can address both without
/// an in-transaction query.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RideRequest {
    pub post_id: String,
    pub rider_id: String,
    pub destination_campus: Campus,
    pub pickup: PickupPoint,
    pub status: RequestStatus,
    pub auto_accepted: bool,
    #[serde(default)]
    pub booking_id: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HoldState {
    Active,
    Released,
    Consumed,
}

impl HoldState {
    pub fn allowed_transitions(self) -> &'static [HoldState] {
        match self {
            HoldState::Active => &[HoldState::Consumed, HoldState::Released],
            HoldState::Released | HoldState::Consumed => &[],
        }
    }

    pub fn can_transition_to(self, next: HoldState) -> bool {
        self.allowed_transitions().contains(&next)
    }
}

/// A temporary seat reservation tied to a ride request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hold {
    pub post_id: String,
    pub request_id: String,
    pub rider_id: String,
    pub seats: u32,
    pub state: HoldState,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BookingStatus {
    Confirmed,
    Canceled,
    Completed,
}

impl BookingStatus {
    pub fn allowed_transitions(self) -> &'static [BookingStatus] {
        match self {
            BookingStatus::Confirmed => &[BookingStatus::Canceled, BookingStatus::Completed],
            BookingStatus::Canceled | BookingStatus::Completed => &[],
        }
    }

    pub fn can_transition_to(self, next: BookingStatus) -> bool {
        self.allowed_transitions().contains(&next)
    }
}

/// A confirmed ride commitment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub post_id: String,
    pub rider_id: String,
    pub driver_id: String,
    pub seats: u32,
    pub pickup: PickupPoint,
    pub status: BookingStatus,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub completed_at: Option<DateTime<Utc>>,
    pub request_id: String,
}
