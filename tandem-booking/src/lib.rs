pub mod engine;
pub mod model;
pub mod policy;

pub use engine::{BookingEngine, RequestOutcome, RequestRideParams};
pub use model::{
    Booking, BookingStatus, Hold, HoldState, PickupPoint, RequestStatus, RideRequest,
    BOOKINGS_COLLECTION, HOLDS_COLLECTION, RIDE_REQUESTS_COLLECTION,
};
pub use policy::{AutoAcceptPolicy, NoShowLimitPolicy};
