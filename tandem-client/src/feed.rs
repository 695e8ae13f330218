use chrono::{DateTime, Duration, Utc};
use futures_util::{Stream, StreamExt};
use std::future::Future;
use tandem_core::{ChangeEvent, DocumentStore, EngineResult};
use tandem_posts::{PostStatus, RidePost, RIDE_POSTS_COLLECTION};
use tandem_store::ClientRules;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

/// Where a feed snapshot came from. Only server-confirmed data advances
/// the sync clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotSource {
    Server,
    Cache,
}

#[derive(Debug, Clone)]
pub struct FeedItem {
    pub post_id: String,
    pub post: RidePost,
    /// Set when the feed has gone too long without a confirmed sync.
    pub is_stale: bool,
}

/// Client-side view of the open-rides feed. Holds the last snapshot, knows
/// when it last heard from the source of truth, and degrades explicitly
/// instead of silently serving old data.
pub struct RideFeed {
    items: Vec<FeedItem>,
    last_synced: Option<DateTime<Utc>>,
    offline: bool,
    rules: ClientRules,
}

impl RideFeed {
    pub fn new(rules: ClientRules) -> Self {
        Self {
            items: Vec::new(),
            last_synced: None,
            offline: false,
            rules,
        }
    }

    pub fn items(&self) -> &[FeedItem] {
        &self.items
    }

    pub fn is_offline(&self) -> bool {
        self.offline
    }

    pub fn last_synced(&self) -> Option<DateTime<Utc>> {
        self.last_synced
    }

    /// Replace the feed contents wholesale. Items absent from the snapshot
    /// disappear, so a canceled post cannot linger from an older view. A
    /// cache-sourced snapshot keeps the sync clock where it was and
    /// inherits the current staleness.
    pub fn apply_snapshot(
        &mut self,
        posts: Vec<(String, RidePost)>,
        source: SnapshotSource,
        now: DateTime<Utc>,
    ) {
        let stale = match source {
            SnapshotSource::Server => false,
            SnapshotSource::Cache => self.is_overdue(now),
        };
        self.items = posts
            .into_iter()
            .map(|(post_id, post)| FeedItem {
                post_id,
                post,
                is_stale: stale,
            })
            .collect();
        if source == SnapshotSource::Server {
            self.last_synced = Some(now);
            self.offline = false;
        }
    }

    /// Pull a fresh snapshot through the injected fetcher. On success the
    /// snapshot replaces the feed and clears offline/staleness; on failure
    /// the cached items survive, flagged stale once they are overdue.
    /// Returns whether the refresh reached the server.
    pub async fn refresh<F, Fut>(&mut self, fetch: F, now: DateTime<Utc>) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = EngineResult<Vec<(String, RidePost)>>>,
    {
        match fetch().await {
            Ok(posts) => {
                debug!(items = posts.len(), "feed refreshed from server");
                self.apply_snapshot(posts, SnapshotSource::Server, now);
                true
            }
            Err(err) => {
                warn!(error = %err, "feed refresh failed, serving cached items");
                self.offline = true;
                if self.is_overdue(now) {
                    for item in &mut self.items {
                        item.is_stale = true;
                    }
                }
                false
            }
        }
    }

    /// Server-push path: fold one change-feed event into the snapshot.
    /// Closed or seatless posts drop out of the feed immediately.
    pub fn apply_change(&mut self, event: &ChangeEvent, now: DateTime<Utc>) {
        if event.collection != RIDE_POSTS_COLLECTION {
            return;
        }
        self.last_synced = Some(now);
        self.offline = false;

        let post: Option<RidePost> = match &event.doc {
            Some(doc) => match doc.deserialize() {
                Ok(post) => Some(post),
                Err(err) => {
                    warn!(doc_id = %event.doc_id, error = %err, "unreadable feed event");
                    return;
                }
            },
            None => None,
        };

        self.items.retain(|item| item.post_id != event.doc_id);
        if let Some(post) = post {
            if post.status == PostStatus::Open && post.seats_available > 0 {
                self.items.push(FeedItem {
                    post_id: event.doc_id.clone(),
                    post,
                    is_stale: false,
                });
            }
        }
    }

    fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        let stale_after = Duration::from_std(self.rules.stale_after())
            .unwrap_or_else(|_| Duration::minutes(5));
        match self.last_synced {
            Some(synced) => now - synced > stale_after,
            // Never synced at all: anything cached is suspect.
            None => true,
        }
    }
}

/// The store change feed filtered down to ride posts, as a stream. This is
/// the from-server snapshot source for `RideFeed::apply_change`.
pub fn post_change_stream(store: &dyn DocumentStore) -> impl Stream<Item = ChangeEvent> {
    BroadcastStream::new(store.subscribe()).filter_map(|event| async move {
        event
            .ok()
            .filter(|e| e.collection == RIDE_POSTS_COLLECTION)
    })
}
