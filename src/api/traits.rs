use async_trait::async_trait;

use crate::{
    op::RequestArgs,
    persist::Table,
    types::{HttpMethod, OperationId, ResourceId},
};

use super::response::ApiResponse;

/// Store operation used on the cache side of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheAction {
    /// Insert new records.
    Add,
    /// Insert or replace records.
    Put,
    /// Remove records by id.
    Delete,
    /// Look up one record by id.
    FindById,
    /// Range query.
    Find,
}

/// Table/action pair an operation uses to read from or write to the local cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CachePath {
    /// Target table.
    pub table: Table,
    /// Store operation.
    pub action: CacheAction,
}

impl CachePath {
    /// Builds a cache path.
    pub const fn new(table: Table, action: CacheAction) -> Self {
        Self { table, action }
    }
}

/// Failure raised by an operation before any HTTP status was obtained.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    /// Connection, DNS, TLS, or similar transport failure.
    #[error("transport failure: {0}")]
    Transport(String),
    /// The operation was handed arguments of a different shape.
    #[error("operation {operation} cannot take {kind} arguments")]
    ArgumentMismatch {
        /// Operation that rejected the arguments.
        operation: OperationId,
        /// Shape it was given.
        kind: &'static str,
    },
}

/// A registered network operation.
#[async_trait]
pub trait ApiOperation: Send + Sync + 'static {
    /// Stable id under which the operation is registered and persisted.
    fn id(&self) -> &OperationId;

    /// Method classification.
    fn method(&self) -> HttpMethod;

    /// Where offline reads are served from.
    fn cache_read(&self) -> Option<CachePath> {
        None
    }

    /// Where successful results are written.
    fn cache_write(&self) -> Option<CachePath> {
        None
    }

    /// True when `args` has the shape this operation takes. Mismatched
    /// arguments are rejected before anything is called or queued.
    fn accepts(&self, args: &RequestArgs) -> bool {
        let _ = args;
        true
    }

    /// Performs the network call against `resource_id`.
    async fn call(
        &self,
        resource_id: &ResourceId,
        args: &RequestArgs,
    ) -> Result<ApiResponse, CallError>;
}
