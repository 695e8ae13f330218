use crate::model::{
    validate_window, CreatePostInput, PostStatus, RidePost, RIDE_POSTS_COLLECTION,
};
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tandem_core::{get_typed, DocRef, DocumentStore, EngineError, EngineResult, TxFn};
use tracing::info;
use uuid::Uuid;

/// Ordinary field edits a driver may make while the post is still open.
/// Status and seat counts are deliberately absent: status moves only
/// through `transition_status`, seats only through engine transactions.
#[derive(Debug, Clone, Default)]
pub struct PostEdit {
    pub origin_label: Option<String>,
    pub window_start: Option<DateTime<Utc>>,
    pub window_end: Option<DateTime<Utc>>,
}

/// Repository over the `ridePosts` collection.
pub struct PostRepository {
    store: Arc<dyn DocumentStore>,
}

impl PostRepository {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub fn doc_ref(post_id: &str) -> DocRef {
        DocRef::new(RIDE_POSTS_COLLECTION, post_id)
    }

    pub async fn create_post(&self, input: CreatePostInput) -> EngineResult<String> {
        let post = RidePost::create(input, Utc::now())?;
        let post_id = Uuid::new_v4().to_string();
        let data = serde_json::to_value(&post)
            .map_err(|e| tandem_core::StoreError::Serialization(e.to_string()))?;

        let doc = Self::doc_ref(&post_id);
        let op: TxFn = Box::new(move |tx| {
            let doc = doc.clone();
            let data = data.clone();
            Box::pin(async move {
                tx.set(&doc, data);
                Ok(Value::Null)
            })
        });
        self.store.transaction(op).await?;
        info!(post_id = %post_id, "ride post created");
        Ok(post_id)
    }

    pub async fn get_post(&self, post_id: &str) -> EngineResult<RidePost> {
        match self.store.fetch(&Self::doc_ref(post_id)).await? {
            Some(doc) => Ok(doc.deserialize()?),
            None => Err(EngineError::PostNotFound(post_id.to_string())),
        }
    }

    /// Apply driver edits to an open post. Closed posts reject edits.
    pub async fn edit_post(&self, post_id: &str, edit: PostEdit) -> EngineResult<()> {
        let post_id = post_id.to_string();
        let op: TxFn = Box::new(move |tx| {
            let post_id = post_id.clone();
            let edit = edit.clone();
            Box::pin(async move {
                let doc = PostRepository::doc_ref(&post_id);
                let post: RidePost = get_typed(tx, &doc)
                    .await?
                    .ok_or_else(|| EngineError::PostNotFound(post_id.clone()))?;
                if post.status != PostStatus::Open {
                    return Err(EngineError::PostClosed(post_id.clone()));
                }

                let window_start = edit.window_start.unwrap_or(post.window_start);
                let window_end = edit.window_end.unwrap_or(post.window_end);
                validate_window(window_start, window_end)?;

                let mut patch = Map::new();
                if let Some(label) = edit.origin_label {
                    let mut origin = post.origin.clone();
                    origin.label = label;
                    patch.insert("origin".into(), serde_json::to_value(&origin).map_err(
                        |e| tandem_core::StoreError::Serialization(e.to_string()),
                    )?);
                }
                patch.insert("windowStart".into(), json!(window_start.timestamp_millis()));
                patch.insert("windowEnd".into(), json!(window_end.timestamp_millis()));
                patch.insert("updatedAt".into(), json!(Utc::now().timestamp_millis()));
                tx.update(&doc, Value::Object(patch));
                Ok(Value::Null)
            })
        });
        self.store.transaction(op).await?;
        Ok(())
    }

    /// Privileged status transition, gated by the central table. Clients
    /// never flip status by direct field writes.
    pub async fn transition_status(&self, post_id: &str, next: PostStatus) -> EngineResult<()> {
        let log_id = post_id.to_string();
        let post_id = post_id.to_string();
        let op: TxFn = Box::new(move |tx| {
            let post_id = post_id.clone();
            Box::pin(async move {
                let doc = PostRepository::doc_ref(&post_id);
                let post: RidePost = get_typed(tx, &doc)
                    .await?
                    .ok_or_else(|| EngineError::PostNotFound(post_id.clone()))?;
                if !post.status.can_transition_to(next) {
                    return Err(EngineError::InvalidTransition {
                        from: post.status.as_str().to_string(),
                        to: next.as_str().to_string(),
                    });
                }
                tx.update(
                    &doc,
                    json!({
                        "status": next,
                        "updatedAt": Utc::now().timestamp_millis(),
                    }),
                );
                Ok(Value::Null)
            })
        });
        self.store.transaction(op).await?;
        info!(post_id = %log_id, next = next.as_str(), "ride post status transitioned");
        Ok(())
    }

    /// Privileged, server-side only: reliability and rating never come
    /// from a client edit.
    pub async fn set_driver_scores(
        &self,
        post_id: &str,
        reliability: Option<f64>,
        rating: Option<f64>,
    ) -> EngineResult<()> {
        let post_id = post_id.to_string();
        let op: TxFn = Box::new(move |tx| {
            let post_id = post_id.clone();
            Box::pin(async move {
                let doc = PostRepository::doc_ref(&post_id);
                get_typed::<RidePost>(tx, &doc)
                    .await?
                    .ok_or_else(|| EngineError::PostNotFound(post_id.clone()))?;

                let mut patch = Map::new();
                if let Some(reliability) = reliability {
                    patch.insert("driverReliability".into(), json!(reliability));
                }
                if let Some(rating) = rating {
                    patch.insert("driverRating".into(), json!(rating));
                }
                patch.insert("updatedAt".into(), json!(Utc::now().timestamp_millis()));
                tx.update(&doc, Value::Object(patch));
                Ok(Value::Null)
            })
        });
        self.store.transaction(op).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OriginPrecision;
    use chrono::Duration;
    use tandem_shared::Campus;
    use tandem_store::MemoryStore;

    fn repo() -> (Arc<MemoryStore>, PostRepository) {
        let store = Arc::new(MemoryStore::new());
        let repo = PostRepository::new(store.clone());
        (store, repo)
    }

    fn input() -> CreatePostInput {
        let now = Utc::now();
        CreatePostInput {
            driver_id: "driver-1".into(),
            origin_lat: 49.2488,
            origin_lng: -122.9805,
            origin_label: "Metrotown".into(),
            origin_precision: OriginPrecision::Exact,
            destination_campus: Campus::new("Burnaby"),
            seats_total: 2,
            seats_available: None,
            window_start: now + Duration::minutes(30),
            window_end: now + Duration::minutes(90),
        }
    }

    #[tokio::test]
    async fn test_create_and_get_round_trip() {
        let (_, repo) = repo();
        let post_id = repo.create_post(input()).await.unwrap();
        let post = repo.get_post(&post_id).await.unwrap();
        assert_eq!(post.status, PostStatus::Open);
        assert_eq!(post.seats_available, 2);
        assert_eq!(post.destination_campus.as_str(), "burnaby");
    }

    #[tokio::test]
    async fn test_get_missing_post_fails() {
        let (_, repo) = repo();
        let err = repo.get_post("nope").await.unwrap_err();
        assert_eq!(err.code(), "POST_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_transition_follows_table() {
        let (_, repo) = repo();
        let post_id = repo.create_post(input()).await.unwrap();

        repo.transition_status(&post_id, PostStatus::Canceled)
            .await
            .unwrap();
        assert_eq!(
            repo.get_post(&post_id).await.unwrap().status,
            PostStatus::Canceled
        );

        // Terminal states have no outgoing edges.
        let err = repo
            .transition_status(&post_id, PostStatus::InTrip)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_TRANSITION");
    }

    #[tokio::test]
    async fn test_edit_rejected_once_closed() {
        let (_, repo) = repo();
        let post_id = repo.create_post(input()).await.unwrap();
        repo.transition_status(&post_id, PostStatus::Expired)
            .await
            .unwrap();

        let err = repo
            .edit_post(
                &post_id,
                PostEdit {
                    origin_label: Some("New spot".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "POST_CLOSED");
    }

    #[tokio::test]
    async fn test_edit_updates_label_and_window() {
        let (_, repo) = repo();
        let post_id = repo.create_post(input()).await.unwrap();
        let new_end = Utc::now() + Duration::minutes(120);
        repo.edit_post(
            &post_id,
            PostEdit {
                origin_label: Some("Production Way".into()),
                window_end: Some(new_end),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let post = repo.get_post(&post_id).await.unwrap();
        assert_eq!(post.origin.label, "Production Way");
        assert_eq!(post.window_end.timestamp_millis(), new_end.timestamp_millis());
    }

    #[tokio::test]
    async fn test_driver_scores_are_set_server_side() {
        let (_, repo) = repo();
        let post_id = repo.create_post(input()).await.unwrap();
        repo.set_driver_scores(&post_id, Some(0.95), Some(4.4))
            .await
            .unwrap();
        let post = repo.get_post(&post_id).await.unwrap();
        assert_eq!(post.driver_reliability, Some(0.95));
        assert_eq!(post.driver_rating, Some(4.4));
    }
}
