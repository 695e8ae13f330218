use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tandem_core::query::compare_values;
use tandem_core::{
    ChangeEvent, Direction, DocRef, Document, DocumentStore, EngineError, Query, StoreError, TxFn,
    TxHandle,
};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Transparent re-runs of a transaction body before giving up with
/// `StoreError::Conflict`.
const MAX_TX_ATTEMPTS: u32 = 5;

const CHANGE_FEED_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
struct StoredDoc {
    version: u64,
    data: Value,
}

#[derive(Default)]
struct Inner {
    collections: HashMap<String, HashMap<String, StoredDoc>>,
}

impl Inner {
    fn get(&self, doc: &DocRef) -> Option<Document> {
        self.collections
            .get(&doc.collection)
            .and_then(|coll| coll.get(&doc.id))
            .map(|stored| Document {
                id: doc.id.clone(),
                version: stored.version,
                data: stored.data.clone(),
            })
    }

    fn version_of(&self, doc: &DocRef) -> u64 {
        self.collections
            .get(&doc.collection)
            .and_then(|coll| coll.get(&doc.id))
            .map(|stored| stored.version)
            .unwrap_or(0)
    }
}

enum BufferedWrite {
    Set(DocRef, Value),
    Merge(DocRef, Value),
}

/// In-memory implementation of the persistence gateway: versioned
/// documents, commit-time read-set validation, a broadcast change feed and
/// an offline switch for fault injection in resilience tests.
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    events: broadcast::Sender<ChangeEvent>,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            events,
            offline: AtomicBool::new(false),
        }
    }

    /// Fault injection: while offline, every operation fails with
    /// `StoreError::Unavailable`.
    pub fn set_offline(&self, offline: bool) {
        info!(offline, "store connectivity toggled");
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable);
        }
        Ok(())
    }

    /// Direct non-transactional write, used for fixtures and documents
    /// with no read dependencies.
    pub async fn put(&self, doc: &DocRef, data: Value) -> Result<(), StoreError> {
        self.check_online()?;
        let event = {
            let mut inner = self
                .inner
                .lock()
                .map_err(|_| StoreError::Serialization("store lock poisoned".into()))?;
            let coll = inner.collections.entry(doc.collection.clone()).or_default();
            let version = coll.get(&doc.id).map(|d| d.version).unwrap_or(0) + 1;
            coll.insert(
                doc.id.clone(),
                StoredDoc {
                    version,
                    data: data.clone(),
                },
            );
            ChangeEvent {
                collection: doc.collection.clone(),
                doc_id: doc.id.clone(),
                doc: Some(Document {
                    id: doc.id.clone(),
                    version,
                    data,
                }),
            }
        };
        let _ = self.events.send(event);
        Ok(())
    }

    fn commit(&self, tx: MemTx) -> Result<Vec<ChangeEvent>, CommitError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| CommitError::Store(StoreError::Serialization("store lock poisoned".into())))?;

        // Optimistic validation: every document read must still be at the
        // version the transaction observed (absent documents at version 0).
        for (doc, seen_version) in &tx.reads {
            if inner.version_of(doc) != *seen_version {
                return Err(CommitError::Conflict);
            }
        }

        // Verify merge targets up front so a missing document can never
        // leave the buffer half-applied.
        let mut created: Vec<DocRef> = Vec::new();
        for write in &tx.writes {
            match write {
                BufferedWrite::Set(doc, _) => created.push(doc.clone()),
                BufferedWrite::Merge(doc, _) => {
                    let exists =
                        inner.version_of(doc) > 0 || created.iter().any(|c| c == doc);
                    if !exists {
                        return Err(CommitError::Store(StoreError::NotFound(format!(
                            "{}/{}",
                            doc.collection, doc.id
                        ))));
                    }
                }
            }
        }

        let mut touched: Vec<DocRef> = Vec::new();
        for write in tx.writes {
            let target = match &write {
                BufferedWrite::Set(doc, _) | BufferedWrite::Merge(doc, _) => doc.clone(),
            };
            if !touched.contains(&target) {
                touched.push(target);
            }
            match write {
                BufferedWrite::Set(doc, data) => {
                    let coll = inner.collections.entry(doc.collection.clone()).or_default();
                    let version = coll.get(&doc.id).map(|d| d.version).unwrap_or(0) + 1;
                    coll.insert(doc.id, StoredDoc { version, data });
                }
                BufferedWrite::Merge(doc, patch) => {
                    let coll = inner.collections.entry(doc.collection.clone()).or_default();
                    let stored = coll.get_mut(&doc.id).ok_or_else(|| {
                        CommitError::Store(StoreError::NotFound(format!(
                            "{}/{}",
                            doc.collection, doc.id
                        )))
                    })?;
                    if let (Value::Object(target), Value::Object(fields)) =
                        (&mut stored.data, patch)
                    {
                        for (key, value) in fields {
                            target.insert(key, value);
                        }
                    }
                    stored.version += 1;
                }
            }
        }

        // One event per document, carrying its final committed state; a
        // feed subscriber never sees an intermediate snapshot of a commit.
        let events = touched
            .into_iter()
            .map(|doc| ChangeEvent {
                doc: inner.get(&doc),
                collection: doc.collection,
                doc_id: doc.id,
            })
            .collect();
        Ok(events)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

enum CommitError {
    Conflict,
    Store(StoreError),
}

struct MemTx {
    inner: Arc<Mutex<Inner>>,
    reads: HashMap<DocRef, u64>,
    read_cache: HashMap<DocRef, Option<Document>>,
    writes: Vec<BufferedWrite>,
}

#[async_trait]
impl TxHandle for MemTx {
    async fn get(&mut self, doc: &DocRef) -> Result<Option<Document>, StoreError> {
        if !self.writes.is_empty() {
            return Err(StoreError::ReadAfterWrite);
        }
        if let Some(cached) = self.read_cache.get(doc) {
            return Ok(cached.clone());
        }
        let snapshot = {
            let inner = self
                .inner
                .lock()
                .map_err(|_| StoreError::Serialization("store lock poisoned".into()))?;
            inner.get(doc)
        };
        let version = snapshot.as_ref().map(|d| d.version).unwrap_or(0);
        self.reads.insert(doc.clone(), version);
        self.read_cache.insert(doc.clone(), snapshot.clone());
        Ok(snapshot)
    }

    fn set(&mut self, doc: &DocRef, data: Value) {
        self.writes.push(BufferedWrite::Set(doc.clone(), data));
    }

    fn update(&mut self, doc: &DocRef, patch: Value) {
        self.writes.push(BufferedWrite::Merge(doc.clone(), patch));
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn transaction(&self, op: TxFn) -> Result<Value, EngineError> {
        self.check_online()?;

        for attempt in 1..=MAX_TX_ATTEMPTS {
            let mut tx = MemTx {
                inner: Arc::clone(&self.inner),
                reads: HashMap::new(),
                read_cache: HashMap::new(),
                writes: Vec::new(),
            };
            // Domain errors abort immediately: nothing was written and a
            // re-run cannot change the outcome's validity.
            let value = op(&mut tx).await?;
            match self.commit(tx) {
                Ok(events) => {
                    debug!(attempt, writes = events.len(), "transaction committed");
                    for event in events {
                        let _ = self.events.send(event);
                    }
                    return Ok(value);
                }
                Err(CommitError::Conflict) => {
                    warn!(attempt, "optimistic conflict, re-running transaction");
                    continue;
                }
                Err(CommitError::Store(err)) => return Err(err.into()),
            }
        }
        Err(StoreError::Conflict.into())
    }

    async fn fetch(&self, doc: &DocRef) -> Result<Option<Document>, StoreError> {
        self.check_online()?;
        let inner = self
            .inner
            .lock()
            .map_err(|_| StoreError::Serialization("store lock poisoned".into()))?;
        Ok(inner.get(doc))
    }

    async fn run_query(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        self.check_online()?;
        let mut matches: Vec<Document> = {
            let inner = self
                .inner
                .lock()
                .map_err(|_| StoreError::Serialization("store lock poisoned".into()))?;
            inner
                .collections
                .get(&query.collection)
                .map(|coll| {
                    coll.iter()
                        .filter(|(_, stored)| {
                            query.filters.iter().all(|f| {
                                stored.data.get(&f.field) == Some(&f.value)
                            })
                        })
                        .map(|(id, stored)| Document {
                            id: id.clone(),
                            version: stored.version,
                            data: stored.data.clone(),
                        })
                        .collect()
                })
                .unwrap_or_default()
        };

        let order = query.order_by.clone();
        matches.sort_by(|a, b| doc_cmp(a, b, order.as_ref()));

        if let Some(cursor) = &query.start_after {
            let anchor = (cursor.order_value.clone(), cursor.doc_id.clone());
            matches.retain(|doc| {
                let key = sort_key(doc, order.as_ref());
                key_cmp(&key, &anchor, order.as_ref()) == std::cmp::Ordering::Greater
            });
        }

        if let Some(limit) = query.limit {
            matches.truncate(limit);
        }
        Ok(matches)
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.events.subscribe()
    }
}

fn sort_key(doc: &Document, order: Option<&tandem_core::OrderBy>) -> (Value, String) {
    let value = order
        .and_then(|o| doc.data.get(&o.field).cloned())
        .unwrap_or(Value::Null);
    (value, doc.id.clone())
}

fn key_cmp(
    a: &(Value, String),
    b: &(Value, String),
    order: Option<&tandem_core::OrderBy>,
) -> std::cmp::Ordering {
    let by_value = compare_values(&a.0, &b.0);
    let by_value = match order.map(|o| o.direction) {
        Some(Direction::Desc) => by_value.reverse(),
        _ => by_value,
    };
    // Document id is the tie-break so cursor pagination never skips or
    // repeats rows with equal order values.
    by_value.then_with(|| a.1.cmp(&b.1))
}

fn doc_cmp(
    a: &Document,
    b: &Document,
    order: Option<&tandem_core::OrderBy>,
) -> std::cmp::Ordering {
    key_cmp(&sort_key(a, order), &sort_key(b, order), order)
}
