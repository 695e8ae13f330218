use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tandem_core::{DocRef, DocumentStore, Notifier};
use tandem_shared::Notification;
use tracing::{debug, warn};
use uuid::Uuid;

const NOTIFICATIONS_COLLECTION: &str = "notifications";

/// Notifier that appends each event to the `notifications` collection.
/// Delivery failures are logged and swallowed: a notification must never
/// fail the state transition that produced it.
pub struct StoreNotifier {
    store: Arc<dyn DocumentStore>,
}

impl StoreNotifier {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Notifier for StoreNotifier {
    async fn emit(&self, notification: Notification) {
        let doc = DocRef::new(NOTIFICATIONS_COLLECTION, Uuid::new_v4().to_string());
        let data = match serde_json::to_value(&notification) {
            Ok(data) => data,
            Err(err) => {
                warn!(error = %err, "failed to serialize notification");
                return;
            }
        };
        let op: tandem_core::TxFn = Box::new(move |tx| {
            let doc = doc.clone();
            let data = data.clone();
            Box::pin(async move {
                tx.set(&doc, data);
                Ok(serde_json::Value::Null)
            })
        });
        match self.store.transaction(op).await {
            Ok(_) => debug!(kind = ?notification.kind, user = %notification.user_id, "notification emitted"),
            Err(err) => warn!(error = %err, kind = ?notification.kind, "notification emission failed"),
        }
    }
}

/// Notifier that records every emission in memory, for asserting on the
/// engine's notification contract in tests.
#[derive(Default)]
pub struct RecordingNotifier {
    emitted: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emitted(&self) -> Vec<Notification> {
        self.emitted.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn emitted_for(&self, user_id: &str) -> Vec<Notification> {
        self.emitted()
            .into_iter()
            .filter(|n| n.user_id == user_id)
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn emit(&self, notification: Notification) {
        if let Ok(mut emitted) = self.emitted.lock() {
            emitted.push(notification);
        }
    }
}
