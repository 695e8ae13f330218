use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Notification kinds emitted by the booking engine on state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    RequestCreated,
    RequestDeclined,
    RequestExpired,
    BookingConfirmed,
    RiderCanceledRequest,
    RiderCanceledBooking,
    PostCanceled,
}

/// An append-only notification record. The engine only produces these;
/// delivery is a collaborator's concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub user_id: String,
    pub kind: NotificationKind,
    pub data: serde_json::Value,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(user_id: impl Into<String>, kind: NotificationKind, data: serde_json::Value) -> Self {
        Self {
            user_id: user_id.into(),
            kind,
            data,
            created_at: Utc::now(),
        }
    }
}
