//! Request façade: run-or-queue through the engine, then read or write the local cache.

use std::sync::Arc;

use serde_json::Value;
use tracing::{error, info, warn};

use crate::{
    core::queue::{EnqueueOutcome, QueueError},
    op::RequestArgs,
    persist::{PersistError, PersistResult, SharedStore, document_id, with_store},
    runtime::handle::{RequestQueueHandle, RuntimeError},
    types::{OperationId, ResourceId},
};

use super::{
    registry::Registry,
    response::ApiResponse,
    traits::{ApiOperation, CacheAction, CachePath},
};

/// Side effect fired when the server rejects the session.
pub trait AuthRedirect: Send + Sync {
    /// Called once for every 401 or 403 answer to `operation_id`.
    fn redirect_to_login(&self, operation_id: &OperationId, status: u16);
}

/// Redirect hook that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAuthRedirect;

impl AuthRedirect for LogAuthRedirect {
    fn redirect_to_login(&self, operation_id: &OperationId, status: u16) {
        warn!(fn_id = %operation_id, status, "session rejected; login required");
    }
}

/// Why a request did not succeed.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The server answered outside 2xx.
    #[error("{operation} [status:{status}]")]
    Status {
        /// Operation that was called.
        operation: OperationId,
        /// Response status.
        status: u16,
    },
    /// 401 or 403. The login redirect has already been fired.
    #[error("{operation} unauthorized [status:{status}]")]
    Unauthorized {
        /// Operation that was called.
        operation: OperationId,
        /// Response status.
        status: u16,
    },
    /// The resource is dead-lettered. The request joined its dead-letter list and
    /// will not run unless that list is cleared and the request is sent again.
    #[error("{operation} not sent: {resource_id} is dead-lettered")]
    DeadLettered {
        /// Operation that was diverted.
        operation: OperationId,
        /// Dead-lettered resource.
        resource_id: ResourceId,
    },
    /// The local store failed while queueing or serving a cached read.
    #[error("local storage failure: {0}")]
    Storage(#[source] PersistError),
    /// The response declared JSON but the body did not parse.
    #[error("{operation} returned malformed json: {source}")]
    Decode {
        /// Operation that was called.
        operation: OperationId,
        /// Parse failure.
        #[source]
        source: serde_json::Error,
    },
}

/// Outcome of [`ApiClient::request`]. Failures land in `error`, never in a panic or `Err`.
#[derive(Debug, Default)]
pub struct ApiResult {
    /// Decoded JSON body, or cached records for an offline read.
    pub data: Option<Value>,
    /// Status of the network response, when a call was made.
    pub status: Option<u16>,
    /// Set when the request failed or will not run.
    pub error: Option<ApiError>,
    /// `data` came from the local cache.
    pub from_cache: bool,
    /// The request was queued or diverted instead of executed.
    pub deferred: bool,
}

impl ApiResult {
    /// True when `error` is unset.
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    fn failed(error: ApiError, status: Option<u16>) -> Self {
        Self {
            status,
            error: Some(error),
            ..Self::default()
        }
    }
}

/// Entry point application code uses for network operations with offline support.
#[derive(Clone)]
pub struct ApiClient {
    queue: RequestQueueHandle,
    registry: Arc<Registry>,
    store: SharedStore,
    auth: Arc<dyn AuthRedirect>,
}

impl ApiClient {
    /// Façade over the runtime `queue`, resolving operations in `registry` and caching in `store`.
    ///
    /// Rejected sessions are only logged until [`ApiClient::with_auth_redirect`] installs a hook.
    pub fn new(queue: RequestQueueHandle, registry: Arc<Registry>, store: SharedStore) -> Self {
        Self {
            queue,
            registry,
            store,
            auth: Arc::new(LogAuthRedirect),
        }
    }

    /// Replaces the hook fired on 401 and 403.
    pub fn with_auth_redirect(mut self, auth: Arc<dyn AuthRedirect>) -> Self {
        self.auth = auth;
        self
    }

    /// Runtime handle the façade sends requests through.
    pub fn queue(&self) -> &RequestQueueHandle {
        &self.queue
    }

    /// Performs `operation_id` with `args`.
    ///
    /// `Err` is reserved for an unregistered operation or a stopped runtime.
    pub async fn request(
        &self,
        operation_id: &str,
        args: RequestArgs,
    ) -> Result<ApiResult, RuntimeError> {
        let operation = self.registry.lookup(operation_id).ok_or_else(|| {
            error!(fn_id = operation_id, "operation is not registered");
            RuntimeError::Queue(QueueError::UnknownOperation(OperationId::from(operation_id)))
        })?;

        let outcome = match self.queue.enqueue(operation_id, args.clone()).await {
            Ok(outcome) => outcome,
            Err(RuntimeError::Queue(QueueError::Persist(err))) => {
                return Ok(ApiResult::failed(ApiError::Storage(err), None));
            }
            Err(err) => return Err(err),
        };

        Ok(match outcome {
            EnqueueOutcome::Executed(response) => {
                self.settle_online(operation.as_ref(), &args, response).await
            }
            EnqueueOutcome::SkippedRead => self.read_cache(operation.as_ref(), &args).await,
            EnqueueOutcome::DeadLettered => {
                warn!(fn_id = operation_id, resource_id = %args.resource_id(), "request diverted to the dead-letter queue");
                ApiResult {
                    deferred: true,
                    ..ApiResult::failed(
                        ApiError::DeadLettered {
                            operation: operation.id().clone(),
                            resource_id: args.resource_id().clone(),
                        },
                        None,
                    )
                }
            }
            EnqueueOutcome::Queued(_) | EnqueueOutcome::RetryDeferred => ApiResult {
                deferred: true,
                ..ApiResult::default()
            },
        })
    }

    async fn settle_online(
        &self,
        operation: &dyn ApiOperation,
        args: &RequestArgs,
        response: ApiResponse,
    ) -> ApiResult {
        let status = response.status;
        if !response.ok() {
            error!(fn_id = %operation.id(), status, "request failed");
            let error = if matches!(status, 401 | 403) {
                self.auth.redirect_to_login(operation.id(), status);
                ApiError::Unauthorized {
                    operation: operation.id().clone(),
                    status,
                }
            } else {
                ApiError::Status {
                    operation: operation.id().clone(),
                    status,
                }
            };
            return ApiResult::failed(error, Some(status));
        }

        let mut result = ApiResult {
            status: Some(status),
            ..ApiResult::default()
        };
        if response.is_json() && !response.body().is_empty() {
            match response.json::<Value>() {
                Ok(value) => result.data = Some(value),
                Err(source) => {
                    error!(fn_id = %operation.id(), status, %source, "undecodable response body");
                    return ApiResult::failed(
                        ApiError::Decode {
                            operation: operation.id().clone(),
                            source,
                        },
                        Some(status),
                    );
                }
            }
        }

        if let Some(path) = operation.cache_write() {
            if operation.method().is_mutation() || result.data.is_some() {
                if let Err(err) = self.write_cache(path, args, result.data.as_ref()).await {
                    error!(fn_id = %operation.id(), %err, "cache write failed");
                } else {
                    info!(fn_id = %operation.id(), "cache updated");
                }
            }
        }
        result
    }

    async fn write_cache(
        &self,
        path: CachePath,
        args: &RequestArgs,
        data: Option<&Value>,
    ) -> PersistResult<()> {
        let table = path.table;
        match path.action {
            CacheAction::Delete => {
                let id = args.resource_id().clone();
                with_store(&self.store, move |store| store.delete(table, &[id]).map(drop)).await
            }
            action @ (CacheAction::Add | CacheAction::Put) => {
                let (docs, from_args) = match data {
                    Some(Value::Array(items)) => (items.clone(), false),
                    Some(value @ Value::Object(_)) => (vec![value.clone()], false),
                    _ => (args.document().into_iter().collect::<Vec<_>>(), true),
                };
                let merge = from_args && matches!(args, RequestArgs::PatchActivity { .. });
                with_store(&self.store, move |store| {
                    let docs = if merge {
                        docs.into_iter()
                            .map(|doc| {
                                let cached = store.find_by_id(table, &document_id(&doc)?)?;
                                Ok(merge_over(cached, doc))
                            })
                            .collect::<PersistResult<Vec<_>>>()?
                    } else {
                        docs
                    };
                    if action == CacheAction::Add {
                        store.add(table, &docs).map(drop)
                    } else {
                        store.put(table, &docs).map(drop)
                    }
                })
                .await
            }
            CacheAction::Find | CacheAction::FindById => {
                warn!(?path, "read action registered as cache write; skipped");
                Ok(())
            }
        }
    }

    async fn read_cache(&self, operation: &dyn ApiOperation, args: &RequestArgs) -> ApiResult {
        let Some(path) = operation.cache_read() else {
            info!(fn_id = %operation.id(), "offline read without cache path");
            return ApiResult {
                from_cache: true,
                ..ApiResult::default()
            };
        };

        let table = path.table;
        let read = match (path.action, args.range().copied()) {
            (CacheAction::Find, Some(range)) => {
                with_store(&self.store, move |store| {
                    store.find(table, &range).map(|rows| Some(Value::Array(rows)))
                })
                .await
            }
            (CacheAction::FindById, _) => {
                let id = args.resource_id().clone();
                with_store(&self.store, move |store| store.find_by_id(table, &id)).await
            }
            _ => {
                warn!(fn_id = %operation.id(), ?path, "cache read path does not fit the arguments");
                Ok(None)
            }
        };

        match read {
            Ok(data) => {
                info!(fn_id = %operation.id(), "offline; served from cache");
                ApiResult {
                    data,
                    from_cache: true,
                    ..ApiResult::default()
                }
            }
            Err(err) => {
                error!(fn_id = %operation.id(), %err, "cache read failed");
                ApiResult {
                    from_cache: true,
                    ..ApiResult::failed(ApiError::Storage(err), None)
                }
            }
        }
    }
}

/// Overlays the fields of `patch` on `cached` when a cached object exists.
fn merge_over(cached: Option<Value>, patch: Value) -> Value {
    match (cached, patch) {
        (Some(Value::Object(mut base)), Value::Object(fields)) => {
            base.extend(fields);
            Value::Object(base)
        }
        (_, patch) => patch,
    }
}
