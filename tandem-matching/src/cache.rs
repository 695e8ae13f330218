use crate::score::{compare_matches, MatchEntry};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tandem_core::profile::{MatchingPrefs, UserProfile, USERS_COLLECTION};
use tandem_core::{Direction, DocRef, DocumentStore, EngineResult, Query, StoreError, TxFn};
use tandem_posts::{PostStatus, RidePost, RIDE_POSTS_COLLECTION};
use tandem_shared::geo::geodesic_distance_meters;
use tracing::{debug, info};

// Crate-private on purpose: the cache is the only writer of this
// collection.
const MATCHES_COLLECTION: &str = "matches";

/// The per-rider shortlist document stored at `matches/{riderId}`. Always
/// replaced wholesale, never patched entry by entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchShortlist {
    pub entries: Vec<MatchEntry>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub computed_at: DateTime<Utc>,
}

/// Precomputed match shortlists per rider. Recompute is driven by callers
/// after relevant post mutations; results are never memoized, so a score
/// change on a post is reflected by the next recompute.
pub struct MatchCache {
    store: Arc<dyn DocumentStore>,
    rules: tandem_store::MatchingRules,
}

impl MatchCache {
    pub fn new(store: Arc<dyn DocumentStore>, rules: tandem_store::MatchingRules) -> Self {
        Self { store, rules }
    }

    fn shortlist_ref(rider_id: &str) -> DocRef {
        DocRef::new(MATCHES_COLLECTION, rider_id)
    }

    /// Rebuild a rider's shortlist from scratch. A rider without matching
    /// preferences gets an empty shortlist rather than an error. Returns
    /// the number of entries written.
    pub async fn recompute_for_rider(
        &self,
        rider_id: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<usize> {
        let profile = match self
            .store
            .fetch(&DocRef::new(USERS_COLLECTION, rider_id))
            .await?
        {
            Some(doc) => doc.deserialize::<UserProfile>()?,
            None => UserProfile::default(),
        };
        let prefs = match profile.matching {
            Some(prefs) => prefs,
            None => {
                debug!(rider_id, "no matching prefs, writing empty shortlist");
                self.write_shortlist(rider_id, Vec::new(), now).await?;
                return Ok(0);
            }
        };

        let query = Query::collection(RIDE_POSTS_COLLECTION)
            .where_eq("destinationCampus", prefs.destination_campus.as_str())
            .where_eq("status", PostStatus::Open.as_str())
            .order_by("windowStart", Direction::Desc);
        let docs = self.store.run_query(&query).await?;

        let grace = Duration::from_std(self.rules.window_grace())
            .unwrap_or_else(|_| Duration::minutes(6));
        let mut entries = Vec::new();
        for doc in docs {
            let post: RidePost = doc.deserialize()?;
            if let Some(entry) = eligible_entry(&doc.id, &post, &prefs, now, grace) {
                entries.push(entry);
            }
        }
        entries.sort_by(compare_matches);
        entries.truncate(self.rules.top_n);

        let count = entries.len();
        self.write_shortlist(rider_id, entries, now).await?;
        info!(rider_id, entries = count, "match shortlist recomputed");
        Ok(count)
    }

    /// Drop shortlist entries whose source post has since become
    /// ineligible. Kept entries are refreshed from the live post. Returns
    /// how many entries were dropped.
    pub async fn sweep_for_rider(&self, rider_id: &str, now: DateTime<Utc>) -> EngineResult<usize> {
        let shortlist = match self.store.fetch(&Self::shortlist_ref(rider_id)).await? {
            Some(doc) => doc.deserialize::<MatchShortlist>()?,
            None => return Ok(0),
        };

        let grace = Duration::from_std(self.rules.window_grace())
            .unwrap_or_else(|_| Duration::minutes(6));
        let total = shortlist.entries.len();
        let mut kept = Vec::new();
        for mut entry in shortlist.entries {
            let post: Option<RidePost> = match self
                .store
                .fetch(&DocRef::new(RIDE_POSTS_COLLECTION, &entry.post_id))
                .await?
            {
                Some(doc) => Some(doc.deserialize()?),
                None => None,
            };
            let post = match post {
                Some(post) if post.status == PostStatus::Open => post,
                _ => continue,
            };
            // Same eligibility a recompute would apply, plus the elapsed
            // window-end case only a sweep can observe.
            if post.seats_available == 0
                || post.window_end <= now
                || post.window_start < now - grace
            {
                continue;
            }
            entry.seats_available = post.seats_available;
            entry.driver_reliability = post.driver_reliability;
            entry.driver_rating = post.driver_rating;
            kept.push(entry);
        }
        kept.sort_by(compare_matches);

        let dropped = total.saturating_sub(kept.len());
        self.write_shortlist(rider_id, kept, now).await?;
        if dropped > 0 {
            info!(rider_id, dropped, "stale shortlist entries swept");
        }
        Ok(dropped)
    }

    async fn write_shortlist(
        &self,
        rider_id: &str,
        entries: Vec<MatchEntry>,
        now: DateTime<Utc>,
    ) -> EngineResult<()> {
        let shortlist = MatchShortlist {
            entries,
            computed_at: now,
        };
        let data = serde_json::to_value(&shortlist)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let doc = Self::shortlist_ref(rider_id);
        let op: TxFn = Box::new(move |tx| {
            let doc = doc.clone();
            let data = data.clone();
            Box::pin(async move {
                tx.set(&doc, data);
                Ok(Value::Null)
            })
        });
        self.store.transaction(op).await?;
        Ok(())
    }

    /// Read-side accessor for the current shortlist, if one was computed.
    pub async fn shortlist(&self, rider_id: &str) -> EngineResult<Option<MatchShortlist>> {
        match self.store.fetch(&Self::shortlist_ref(rider_id)).await? {
            Some(doc) => Ok(Some(doc.deserialize()?)),
            None => Ok(None),
        }
    }
}

fn eligible_entry(
    post_id: &str,
    post: &RidePost,
    prefs: &MatchingPrefs,
    now: DateTime<Utc>,
    grace: Duration,
) -> Option<MatchEntry> {
    if post.status != PostStatus::Open || post.seats_available == 0 {
        return None;
    }
    // A window that started moments ago is still offered; one past the
    // grace period is not.
    if post.window_start < now - grace {
        return None;
    }
    let distance_meters = geodesic_distance_meters(prefs.pickup, post.origin.point());
    if distance_meters > prefs.radius_meters {
        return None;
    }
    Some(MatchEntry {
        post_id: post_id.to_string(),
        destination_campus: post.destination_campus.clone(),
        seats_available: post.seats_available,
        driver_reliability: post.driver_reliability,
        driver_rating: post.driver_rating,
        distance_meters,
        window_start: post.window_start,
    })
}
