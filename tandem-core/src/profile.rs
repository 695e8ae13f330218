use serde::{Deserialize, Serialize};
use tandem_shared::{Campus, GeoPoint};

/// Collection holding per-user profile documents.
pub const USERS_COLLECTION: &str = "users";

/// Typed view of a user profile document. Every field the engine reads is
/// declared here with a serde default, so partially-populated documents
/// from the store deserialize cleanly instead of leaking loose lookups
/// into decision logic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserProfile {
    pub settings: UserSettings,
    pub stats: RiderStats,
    pub matching: Option<MatchingPrefs>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserSettings {
    /// Driver setting: confirm incoming requests without manual review.
    pub auto_accept: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RiderStats {
    /// Rider no-shows over the trailing week, server-maintained.
    pub no_shows_7d: u32,
}

/// Rider matching preferences consumed by the match cache and by
/// `request_ride` radius checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchingPrefs {
    pub destination_campus: Campus,
    pub pickup: GeoPoint,
    pub radius_meters: f64,
}
