use crate::model::{PostStatus, RidePost, RIDE_POSTS_COLLECTION};
use crate::throttle::QueryThrottle;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tandem_core::{Cursor, Direction, DocumentStore, EngineResult, Query};
use tandem_shared::geo::geodesic_distance_meters;
use tandem_shared::{Campus, GeoPoint};
use tracing::debug;

const DEFAULT_PAGE_SIZE: usize = 10;

#[derive(Debug, Clone)]
pub struct SearchFilters {
    pub campus: Campus,
    /// Posts with no rating pass only when no cut is set.
    pub min_driver_rating: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct PageParams {
    pub campus: Campus,
    pub pickup: GeoPoint,
    pub radius_meters: f64,
    pub limit: Option<usize>,
    pub cursor: Option<Cursor>,
}

#[derive(Debug, Clone)]
pub struct FoundPost {
    pub id: String,
    pub post: RidePost,
}

#[derive(Debug, Clone)]
pub struct Page {
    pub items: Vec<FoundPost>,
    /// Continuation token; `None` once the result set is exhausted.
    pub next_cursor: Option<Cursor>,
}

/// Read-side feed search over open ride posts, most-recent-window first.
pub struct FeedSearch {
    store: Arc<dyn DocumentStore>,
    throttle: QueryThrottle,
}

impl FeedSearch {
    pub fn new(store: Arc<dyn DocumentStore>, throttle: QueryThrottle) -> Self {
        Self { store, throttle }
    }

    fn base_query(campus: &Campus) -> Query {
        Query::collection(RIDE_POSTS_COLLECTION)
            .where_eq("destinationCampus", campus.as_str())
            .where_eq("status", PostStatus::Open.as_str())
            .order_by("windowStart", Direction::Desc)
    }

    fn eligible(post: &RidePost, now: DateTime<Utc>) -> bool {
        post.status == PostStatus::Open && post.seats_available > 0 && post.window_end > now
    }

    pub async fn search_open_rides(
        &self,
        rider_id: &str,
        filters: &SearchFilters,
        now: DateTime<Utc>,
    ) -> EngineResult<Vec<FoundPost>> {
        self.throttle.check(rider_id, now)?;

        let docs = self.store.run_query(&Self::base_query(&filters.campus)).await?;
        let mut found = Vec::new();
        for doc in docs {
            let post: RidePost = doc.deserialize()?;
            if !Self::eligible(&post, now) {
                continue;
            }
            if let Some(cut) = filters.min_driver_rating {
                match post.driver_rating {
                    Some(rating) if rating >= cut => {}
                    _ => continue,
                }
            }
            found.push(FoundPost { id: doc.id, post });
        }
        debug!(rider_id, results = found.len(), "open ride search");
        Ok(found)
    }

    /// Cursor-paginated search with a geofence radius filter. The cursor
    /// anchors on the store ordering (windowStart, id), so pages never
    /// duplicate rows even when in-memory filters drop candidates.
    pub async fn paginated_search(
        &self,
        rider_id: &str,
        params: &PageParams,
        now: DateTime<Utc>,
    ) -> EngineResult<Page> {
        self.throttle.check(rider_id, now)?;

        let mut query = Self::base_query(&params.campus);
        if let Some(cursor) = &params.cursor {
            query = query.start_after(cursor.clone());
        }
        let docs = self.store.run_query(&query).await?;

        let limit = params.limit.unwrap_or(DEFAULT_PAGE_SIZE);
        let mut items = Vec::new();
        let mut next_cursor = None;
        for doc in docs {
            let post: RidePost = doc.deserialize()?;
            if !Self::eligible(&post, now) {
                continue;
            }
            let distance = geodesic_distance_meters(params.pickup, post.origin.point());
            if distance > params.radius_meters {
                continue;
            }
            let order_value = doc.data["windowStart"].clone();
            let doc_id = doc.id.clone();
            items.push(FoundPost { id: doc.id, post });
            if items.len() == limit {
                next_cursor = Some(Cursor {
                    order_value,
                    doc_id,
                });
                break;
            }
        }
        Ok(Page { items, next_cursor })
    }
}
