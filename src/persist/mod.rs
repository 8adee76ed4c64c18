//! Local persistence: the durable request queue and the record cache.

/// In-process store.
pub mod memory;
/// SQLite-backed store.
pub mod sqlite;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::{
    op::PendingRequest,
    types::{ResourceId, TimeRange},
};

/// Per-entity-kind cache tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Table {
    /// Activity records, range-indexed by `start`/`end`.
    Activities,
}

impl Table {
    /// Stable name used as the storage key.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Activities => "activities",
        }
    }
}

/// Store failures.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    /// SQLite rejected a statement.
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// A payload did not encode or decode.
    #[error("serde: {0}")]
    Serde(#[from] serde_json::Error),
    /// `add` hit an id that is already stored.
    #[error("{table} record {id} already exists")]
    Duplicate {
        /// Table name.
        table: &'static str,
        /// Conflicting id.
        id: String,
    },
    /// A cache document lacks a string or numeric `id`.
    #[error("record has no usable `id` field")]
    MissingId,
    /// Anything else, described.
    #[error("{0}")]
    Message(String),
}

/// Result alias for store calls.
pub type PersistResult<T> = Result<T, PersistError>;

/// Transactional local persistence: the durable request queue plus the cache tables.
///
/// Every call is atomic on its own.
pub trait DurableStore: Send {
    /// Appends `requests` and returns the full queue in FIFO order.
    fn enqueue(&mut self, requests: &[PendingRequest]) -> PersistResult<Vec<PendingRequest>>;
    /// Pops the head of the queue.
    fn dequeue(&mut self) -> PersistResult<Option<PendingRequest>>;
    /// Removes every queued request.
    fn clear_queue(&mut self) -> PersistResult<()>;
    /// Queue contents in FIFO order, without removing them.
    fn queued(&self) -> PersistResult<Vec<PendingRequest>>;

    /// Inserts records; fails without writing anything if any id exists.
    fn add(&mut self, table: Table, values: &[Value]) -> PersistResult<Vec<Value>>;
    /// Inserts or replaces records.
    fn put(&mut self, table: Table, values: &[Value]) -> PersistResult<Vec<Value>>;
    /// Removes records, returning the ids that were present.
    fn delete(&mut self, table: Table, ids: &[ResourceId]) -> PersistResult<Vec<ResourceId>>;
    /// Record stored under `id`.
    fn find_by_id(&self, table: Table, id: &ResourceId) -> PersistResult<Option<Value>>;
    /// Records whose `[start, end]` overlaps `range`, ordered by start.
    fn find(&self, table: Table, range: &TimeRange) -> PersistResult<Vec<Value>>;

    /// Pushes buffered writes to durable storage.
    fn flush(&mut self) -> PersistResult<()> {
        Ok(())
    }
}

/// Store shared by the queue engine and the request façade.
pub type SharedStore = Arc<Mutex<Box<dyn DurableStore>>>;

/// Wraps `store` for sharing.
pub fn shared(store: impl DurableStore + 'static) -> SharedStore {
    Arc::new(Mutex::new(Box::new(store)))
}

/// Runs `f` against the shared store on the blocking pool.
pub async fn with_store<T, F>(store: &SharedStore, f: F) -> PersistResult<T>
where
    T: Send + 'static,
    F: FnOnce(&mut dyn DurableStore) -> PersistResult<T> + Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || {
        let mut guard = store.blocking_lock();
        f(&mut **guard)
    })
    .await
    .map_err(|e| PersistError::Message(format!("join error: {e}")))?
}

/// `id` of a cache document. Numeric ids are stringified.
pub(crate) fn document_id(value: &Value) -> PersistResult<ResourceId> {
    match value.get("id") {
        Some(Value::String(s)) if !s.is_empty() => Ok(ResourceId::new(s.clone())),
        Some(Value::Number(n)) => Ok(ResourceId::new(n.to_string())),
        _ => Err(PersistError::MissingId),
    }
}

/// `start`/`end` of a cache document, when both parse as RFC 3339.
pub(crate) fn document_span(value: &Value) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let parse = |key: &str| {
        value
            .get(key)
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
    };
    Some((parse("start")?, parse("end")?))
}

/// [`document_span`] as epoch milliseconds.
pub(crate) fn document_span_ms(value: &Value) -> Option<(i64, i64)> {
    document_span(value).map(|(start, end)| (start.timestamp_millis(), end.timestamp_millis()))
}
