/// Infrastructure failures surfaced by the persistence gateway.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable")]
    Unavailable,

    #[error("transaction conflict persisted past retry budget")]
    Conflict,

    #[error("document not found: {0}")]
    NotFound(String),

    #[error("reads must complete before the first write in a transaction")]
    ReadAfterWrite,

    #[error("document (de)serialization failed: {0}")]
    Serialization(String),
}

/// The engine-wide error taxonomy. Domain variants are permanent
/// rejections; `Store` wraps retryable infrastructure failures.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("ride post not found: {0}")]
    PostNotFound(String),

    #[error("ride post is no longer open: {0}")]
    PostClosed(String),

    #[error("departure window has already passed")]
    TimeWindowPast,

    #[error("not enough seats available")]
    NoSeats,

    #[error("pickup is {distance_meters:.0}m from origin, outside the {radius_meters:.0}m radius")]
    OutOfRadius {
        distance_meters: f64,
        radius_meters: f64,
    },

    #[error("ride request not found: {0}")]
    RequestNotFound(String),

    #[error("booking not found: {0}")]
    BookingNotFound(String),

    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("query rate limit exceeded")]
    Throttled,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EngineError {
    /// Stable machine-readable code for UI mapping and logs.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::PostNotFound(_) => "POST_NOT_FOUND",
            EngineError::PostClosed(_) => "POST_CLOSED",
            EngineError::TimeWindowPast => "TIME_WINDOW_PAST",
            EngineError::NoSeats => "NO_SEATS",
            EngineError::OutOfRadius { .. } => "OUT_OF_RADIUS",
            EngineError::RequestNotFound(_) => "REQUEST_NOT_FOUND",
            EngineError::BookingNotFound(_) => "BOOKING_NOT_FOUND",
            EngineError::InvalidTransition { .. } => "INVALID_TRANSITION",
            EngineError::Validation(_) => "VALIDATION",
            EngineError::Throttled => "THROTTLED",
            EngineError::Store(_) => "STORE",
        }
    }

    /// Whether the failure is a transient infrastructure condition that the
    /// client resilience layer may queue and retry. Domain validation errors
    /// are permanent and must never be queued.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngineError::Store(StoreError::Unavailable) | EngineError::Store(StoreError::Conflict)
        )
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
