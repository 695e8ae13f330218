use crate::error::{EngineError, StoreError};
use crate::query::Query;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::broadcast;

/// Address of a document within the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocRef {
    pub collection: String,
    pub id: String,
}

impl DocRef {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }
}

/// A committed document snapshot. `version` advances on every write and
/// backs the store's optimistic conflict detection.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub version: u64,
    pub data: Value,
}

impl Document {
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        serde_json::from_value(self.data.clone())
            .map_err(|e| StoreError::Serialization(e.to_string()))
    }
}

/// Broadcast on every committed write. `doc == None` means deletion.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub collection: String,
    pub doc_id: String,
    pub doc: Option<Document>,
}

/// Handle passed to a transaction closure.
///
/// Reads are recorded in the read set and validated at commit. The store
/// forbids reads after the first buffered write; callers must gather every
/// document a decision depends on before writing.
#[async_trait]
pub trait TxHandle: Send {
    async fn get(&mut self, doc: &DocRef) -> Result<Option<Document>, StoreError>;

    /// Buffer a full-document write.
    fn set(&mut self, doc: &DocRef, data: Value);

    /// Buffer a shallow top-level merge. Fails the commit with `NotFound`
    /// if the target document does not exist.
    fn update(&mut self, doc: &DocRef, patch: Value);
}

/// Typed transactional read: narrows untyped JSON at the gateway boundary
/// so loose `Value`s never reach engine decision logic.
pub async fn get_typed<T: DeserializeOwned>(
    tx: &mut dyn TxHandle,
    doc: &DocRef,
) -> Result<Option<T>, StoreError> {
    match tx.get(doc).await? {
        Some(doc) => Ok(Some(doc.deserialize()?)),
        None => Ok(None),
    }
}

/// A re-runnable transaction body. The store may invoke it multiple times
/// when optimistic validation fails, so it must be `Fn`, not `FnOnce`, and
/// side-effect free outside the handle.
pub type TxFn = Box<
    dyn for<'t> Fn(&'t mut dyn TxHandle) -> BoxFuture<'t, Result<Value, EngineError>>
        + Send
        + Sync,
>;

/// The persistence gateway: an external transactional document store with
/// optimistic concurrency and a change feed. The engine depends on this
/// contract, never on a concrete backend.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Run `op` atomically. Commits the buffered writes if the read set is
    /// still current; re-runs `op` transparently on conflict (bounded),
    /// then surfaces `StoreError::Conflict`. A domain error returned by
    /// `op` aborts immediately with nothing written.
    async fn transaction(&self, op: TxFn) -> Result<Value, EngineError>;

    /// Non-transactional snapshot read.
    async fn fetch(&self, doc: &DocRef) -> Result<Option<Document>, StoreError>;

    /// Non-transactional snapshot query.
    async fn run_query(&self, query: &Query) -> Result<Vec<Document>, StoreError>;

    /// Change-notification feed over committed writes.
    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent>;
}
