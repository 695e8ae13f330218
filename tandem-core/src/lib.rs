pub mod error;
pub mod notify;
pub mod profile;
pub mod query;
pub mod store;

pub use error::{EngineError, EngineResult, StoreError};
pub use notify::Notifier;
pub use query::{Cursor, Direction, FieldFilter, OrderBy, Query};
pub use store::{get_typed, ChangeEvent, DocRef, Document, DocumentStore, TxFn, TxHandle};
