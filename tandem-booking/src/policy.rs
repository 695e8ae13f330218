use async_trait::async_trait;
use tandem_core::profile::RiderStats;

/// Pluggable predicate deciding whether auto-accept may fire for a rider.
/// The exact suppression rule is a product knob, so it sits behind a trait
/// rather than a hardcoded constant in the engine.
#[async_trait]
pub trait AutoAcceptPolicy: Send + Sync {
    async fn admits(&self, rider_id: &str, stats: &RiderStats) -> bool;
}

/// Default policy: suppress auto-accept for riders at or above a recent
/// no-show limit.
pub struct NoShowLimitPolicy {
    limit: u32,
}

impl NoShowLimitPolicy {
    pub fn new(limit: u32) -> Self {
        Self { limit }
    }
}

#[async_trait]
impl AutoAcceptPolicy for NoShowLimitPolicy {
    async fn admits(&self, _rider_id: &str, stats: &RiderStats) -> bool {
        stats.no_shows_7d < self.limit
    }
}
