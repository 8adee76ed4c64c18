//! Request queue engine: run-or-queue routing, drain, retry and dead-letter lanes.

use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use hashbrown::HashMap;
use tracing::{debug, error, info, warn};

use crate::{
    api::{
        registry::Registry,
        response::{ApiResponse, StatusClass},
        traits::ApiOperation,
    },
    connectivity::Connectivity,
    op::{PendingRequest, RequestArgs},
    persist::{PersistError, SharedStore, with_store},
    runtime::events::QueueEvent,
    types::{HttpMethod, OperationId, ResourceId},
};

use super::lanes::{Lane, ResourceLanes};

/// Engine tuning.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Lifetime of a deferred request, measured from its creation.
    pub request_ttl: TimeDelta,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            request_ttl: TimeDelta::hours(24),
        }
    }
}

/// Errors returned by the engine.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// No operation is registered under this id.
    #[error("operation {0} is not registered")]
    UnknownOperation(OperationId),
    /// Reads are never deferred.
    #[error("operation {0} is a read and cannot be queued")]
    NotAMutation(OperationId),
    /// The arguments have a shape the operation does not take.
    #[error("operation {operation} cannot take {kind} arguments")]
    ArgumentMismatch {
        /// Operation that was invoked.
        operation: OperationId,
        /// `RequestArgs::kind` of the arguments it was given.
        kind: &'static str,
    },
    /// The durable store failed.
    #[error(transparent)]
    Persist(#[from] PersistError),
}

/// What `enqueue` did with a request.
#[derive(Debug, Clone, PartialEq)]
pub enum EnqueueOutcome {
    /// Called the network directly. Call errors show up as a synthetic 500.
    Executed(ApiResponse),
    /// Stored in the durable queue; carries the queue contents after the append.
    Queued(Vec<PendingRequest>),
    /// The resource is dead-lettered; the request joined its list unexecuted.
    DeadLettered,
    /// The resource is awaiting retry; the request joined its list unexecuted.
    RetryDeferred,
    /// Offline read. Nothing was called or stored.
    SkippedRead,
}

/// Counters describing one drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Requests whose operation was invoked.
    pub attempted: usize,
    /// Requests discarded because they were past `exp`.
    pub expired: usize,
    /// Requests discarded because their operation is not registered or no longer takes their arguments.
    pub unknown: usize,
    /// Requests moved to the dead-letter queue.
    pub dead_lettered: usize,
    /// Requests moved to the retry queue.
    pub retrying: usize,
    /// Temp ids mapped to server ids.
    pub reconciled: usize,
    /// Retry-chain entries dropped without being executed.
    pub abandoned: usize,
    /// The pass stopped early (offline or storage failure).
    pub interrupted: bool,
}

/// The engine. Owns the in-memory lanes and the temp-id map; the main queue lives in the store.
///
/// Every operation buffers [`QueueEvent`]s until [`RequestQueue::take_events`] is called.
/// The runtime takes them after each command; code driving the engine directly must
/// call `take_events` itself or the buffer keeps growing.
pub struct RequestQueue {
    registry: Arc<Registry>,
    store: SharedStore,
    connectivity: Connectivity,
    config: QueueConfig,
    retry: ResourceLanes,
    dead_letter: ResourceLanes,
    temp_ids: HashMap<ResourceId, ResourceId>,
    pending_events: Vec<QueueEvent>,
}

impl RequestQueue {
    /// Engine over `store`, routing by `connectivity`. Lanes start empty.
    pub fn new(
        registry: Arc<Registry>,
        store: SharedStore,
        connectivity: Connectivity,
        config: QueueConfig,
    ) -> Self {
        Self {
            registry,
            store,
            connectivity,
            config,
            retry: ResourceLanes::new(),
            dead_letter: ResourceLanes::new(),
            temp_ids: HashMap::new(),
            pending_events: Vec::new(),
        }
    }

    /// Connectivity flag the engine routes by.
    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    /// Operations the engine can run.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Runs the operation now, diverts it behind earlier failures, or defers it.
    ///
    /// An unregistered operation id and arguments the operation does not take are
    /// rejected before anything is called or queued. Storage failures while
    /// deferring are logged and returned as `QueueError::Persist`.
    pub async fn enqueue(
        &mut self,
        operation_id: &str,
        args: RequestArgs,
    ) -> Result<EnqueueOutcome, QueueError> {
        let operation = self.operation(operation_id)?;
        if !operation.accepts(&args) {
            error!(fn_id = operation_id, kind = args.kind(), "arguments do not fit the operation");
            return Err(QueueError::ArgumentMismatch {
                operation: operation.id().clone(),
                kind: args.kind(),
            });
        }
        let method = operation.method();
        let resource_id = args.resource_id().clone();

        if method.is_mutation() {
            if self.dead_letter.contains(&resource_id) {
                let request = self.build(operation.as_ref(), args)?;
                self.dead_letter.push(resource_id.clone(), request);
                info!(
                    fn_id = operation_id,
                    %resource_id,
                    depth = self.dead_letter.len_for(&resource_id),
                    "resource is dead-lettered; request diverted"
                );
                self.pending_events.push(QueueEvent::Diverted {
                    resource_id,
                    lane: Lane::DeadLetter,
                });
                return Ok(EnqueueOutcome::DeadLettered);
            }
            if self.retry.contains(&resource_id) {
                let request = self.build(operation.as_ref(), args)?;
                self.retry.push(resource_id.clone(), request);
                info!(
                    fn_id = operation_id,
                    %resource_id,
                    depth = self.retry.len_for(&resource_id),
                    "resource awaits retry; request diverted"
                );
                self.pending_events.push(QueueEvent::Diverted {
                    resource_id,
                    lane: Lane::Retry,
                });
                return Ok(EnqueueOutcome::RetryDeferred);
            }
        }

        if self.connectivity.is_online() {
            let response = call_operation(operation.as_ref(), &resource_id, &args).await;
            self.pending_events.push(QueueEvent::Executed {
                operation_id: operation.id().clone(),
                resource_id,
                status: response.status,
            });
            return Ok(EnqueueOutcome::Executed(response));
        }

        if !method.is_mutation() {
            debug!(fn_id = operation_id, "offline read is not queued");
            return Ok(EnqueueOutcome::SkippedRead);
        }

        let request = self.build(operation.as_ref(), args)?;
        let queue = with_store(&self.store, move |store| {
            store.enqueue(std::slice::from_ref(&request))
        })
        .await
        .inspect_err(|err| error!(fn_id = operation_id, %resource_id, %err, "failed to persist request"))?;

        info!(fn_id = operation_id, %resource_id, depth = queue.len(), "offline; request queued");
        self.pending_events.push(QueueEvent::Queued {
            operation_id: operation.id().clone(),
            resource_id,
            depth: queue.len(),
        });
        Ok(EnqueueOutcome::Queued(queue))
    }

    /// Pops the head of the durable queue. `Ok(None)` when offline or empty.
    pub async fn dequeue(&mut self) -> Result<Option<PendingRequest>, QueueError> {
        if !self.connectivity.is_online() {
            debug!("offline; dequeue skipped");
            return Ok(None);
        }
        with_store(&self.store, |store| store.dequeue())
            .await
            .inspect_err(|err| error!(%err, "dequeue failed"))
            .map_err(QueueError::from)
    }

    /// Replays the durable queue in FIFO order and classifies every result.
    ///
    /// Connectivity is checked before each record. A pass that stops early keeps
    /// both the remaining queue and the temp-id map.
    pub async fn drain(&mut self) -> DrainReport {
        let mut report = DrainReport::default();
        if !self.connectivity.is_online() {
            info!("offline; drain skipped");
            report.interrupted = true;
            return report;
        }

        loop {
            let mut request = match self.dequeue().await {
                Ok(Some(request)) => request,
                Ok(None) if self.connectivity.is_online() => break,
                Ok(None) => {
                    warn!("connectivity lost; drain stopped");
                    report.interrupted = true;
                    break;
                }
                Err(_) => {
                    report.interrupted = true;
                    break;
                }
            };

            let Some(operation) = self.registry.lookup(request.operation_id.as_str()) else {
                warn!(fn_id = %request.operation_id, "unregistered operation; request dropped");
                report.unknown += 1;
                continue;
            };
            if !operation.accepts(&request.args) {
                warn!(fn_id = %request.operation_id, kind = request.args.kind(), "arguments do not fit the operation; request dropped");
                report.unknown += 1;
                continue;
            }
            if request.is_expired_at(Utc::now()) {
                warn!(fn_id = %request.operation_id, resource_id = %request.resource_id, "request expired; dropped");
                report.expired += 1;
                continue;
            }

            if request.http_method.is_mutation() {
                if let Some(real) = self.temp_ids.get(&request.resource_id).cloned() {
                    debug!(temp_id = %request.resource_id, real_id = %real, "resolved temp id");
                    request.rebind(real);
                }
            }

            report.attempted += 1;
            let response =
                call_operation(operation.as_ref(), &request.resource_id, &request.args).await;
            self.pending_events.push(QueueEvent::Executed {
                operation_id: request.operation_id.clone(),
                resource_id: request.resource_id.clone(),
                status: response.status,
            });
            self.settle(request, &response, &mut report);
        }

        if !report.interrupted {
            self.temp_ids.clear();
            if let Err(err) = with_store(&self.store, |store| store.clear_queue()).await {
                error!(%err, "failed to clear drained queue");
            }
        }

        info!(
            attempted = report.attempted,
            dead_lettered = report.dead_lettered,
            retrying = report.retrying,
            interrupted = report.interrupted,
            retry_total = self.retry.total(),
            dead_letter_total = self.dead_letter.total(),
            "drain finished"
        );
        self.pending_events.push(QueueEvent::Drained {
            report: report.clone(),
        });
        report
    }

    /// Gives the retry list of `resource_id` one more collective attempt.
    ///
    /// The first failing entry drops every entry still behind it.
    pub async fn drain_retry_queue_by_id(&mut self, resource_id: &ResourceId) -> DrainReport {
        let mut report = DrainReport::default();
        if !self.connectivity.is_online() {
            info!(%resource_id, "offline; retry drain skipped");
            report.interrupted = true;
            return report;
        }

        while let Some(request) = self.retry.pop_front(resource_id) {
            let Some(operation) = self.registry.lookup(request.operation_id.as_str()) else {
                warn!(fn_id = %request.operation_id, "unregistered operation; retry entry dropped");
                report.unknown += 1;
                continue;
            };
            if !operation.accepts(&request.args) {
                warn!(fn_id = %request.operation_id, kind = request.args.kind(), "arguments do not fit the operation; retry entry dropped");
                report.unknown += 1;
                continue;
            }
            if request.is_expired_at(Utc::now()) {
                report.expired += 1;
                continue;
            }

            report.attempted += 1;
            let response =
                call_operation(operation.as_ref(), &request.resource_id, &request.args).await;
            self.pending_events.push(QueueEvent::Executed {
                operation_id: request.operation_id.clone(),
                resource_id: request.resource_id.clone(),
                status: response.status,
            });

            if response.ok() {
                if request.http_method == HttpMethod::Post {
                    if let Some(real) = response.resource_id() {
                        if real != request.resource_id {
                            self.retry.rebind_entries(resource_id, &real);
                            self.record_temp_id(request.resource_id.clone(), real, &mut report);
                        }
                    }
                }
                continue;
            }

            let dropped = self.retry.remove(resource_id).map_or(0, |rest| rest.len());
            report.abandoned += dropped;
            warn!(
                fn_id = %request.operation_id,
                %resource_id,
                status = response.status,
                dropped,
                "retry failed; chain abandoned"
            );
            self.pending_events.push(QueueEvent::ChainAbandoned {
                resource_id: resource_id.clone(),
                dropped,
                status: response.status,
            });
            break;
        }

        report
    }

    /// Empties the durable queue and forgets every temp-id mapping.
    pub async fn clear(&mut self) -> Result<(), QueueError> {
        self.temp_ids.clear();
        with_store(&self.store, |store| store.clear_queue())
            .await
            .inspect_err(|err| error!(%err, "failed to clear queue"))?;
        Ok(())
    }

    /// Pushes buffered store writes to durable storage.
    pub async fn flush(&self) -> Result<(), QueueError> {
        with_store(&self.store, |store| store.flush())
            .await
            .inspect_err(|err| error!(%err, "store flush failed"))?;
        Ok(())
    }

    /// Drops every dead-lettered request.
    pub fn clear_dead_letter_queue(&mut self) {
        self.dead_letter.clear();
    }

    /// Drops every request awaiting retry.
    pub fn clear_retry_queue(&mut self) {
        self.retry.clear();
    }

    /// Retry list of one resource, `None` when it has none.
    pub fn retry_queue_by_id(&self, resource_id: &ResourceId) -> Option<Vec<PendingRequest>> {
        self.retry.get(resource_id)
    }

    /// Dead-letter list of one resource, `None` when it has none.
    pub fn dead_letter_queue_by_id(&self, resource_id: &ResourceId) -> Option<Vec<PendingRequest>> {
        self.dead_letter.get(resource_id)
    }

    /// Drops the retry list of one resource, returning what it held.
    pub fn clear_retry_queue_by_id(&mut self, resource_id: &ResourceId) -> Option<Vec<PendingRequest>> {
        self.retry.remove(resource_id)
    }

    /// Drops the dead-letter list of one resource, returning what it held.
    pub fn clear_dead_letter_queue_by_id(
        &mut self,
        resource_id: &ResourceId,
    ) -> Option<Vec<PendingRequest>> {
        self.dead_letter.remove(resource_id)
    }

    /// Every retry list, sorted by resource id.
    pub fn retry_queue(&self) -> Vec<(ResourceId, Vec<PendingRequest>)> {
        self.retry.snapshot()
    }

    /// Every dead-letter list, sorted by resource id.
    pub fn dead_letter_queue(&self) -> Vec<(ResourceId, Vec<PendingRequest>)> {
        self.dead_letter.snapshot()
    }

    /// Server id a temp id has been reconciled to during the current drain cycle.
    pub fn resolved_id(&self, temp_id: &ResourceId) -> Option<&ResourceId> {
        self.temp_ids.get(temp_id)
    }

    /// Durable queue contents in FIFO order.
    pub async fn queued(&self) -> Result<Vec<PendingRequest>, QueueError> {
        Ok(with_store(&self.store, |store| store.queued()).await?)
    }

    /// Takes the events buffered since the last call, oldest first.
    pub fn take_events(&mut self) -> Vec<QueueEvent> {
        std::mem::take(&mut self.pending_events)
    }

    fn operation(&self, operation_id: &str) -> Result<Arc<dyn ApiOperation>, QueueError> {
        self.registry.lookup(operation_id).ok_or_else(|| {
            error!(fn_id = operation_id, "operation is not registered");
            QueueError::UnknownOperation(OperationId::from(operation_id))
        })
    }

    fn build(
        &self,
        operation: &dyn ApiOperation,
        args: RequestArgs,
    ) -> Result<PendingRequest, QueueError> {
        PendingRequest::new(operation, args, self.config.request_ttl)
    }

    fn settle(&mut self, request: PendingRequest, response: &ApiResponse, report: &mut DrainReport) {
        let resource_id = request.resource_id.clone();
        match StatusClass::of(response.status) {
            StatusClass::Success => {
                if request.http_method == HttpMethod::Post {
                    if let Some(real) = response.resource_id() {
                        if real != resource_id {
                            self.record_temp_id(resource_id, real, report);
                        }
                    }
                }
            }
            StatusClass::ClientError => {
                warn!(fn_id = %request.operation_id, %resource_id, status = response.status, "request dead-lettered");
                self.dead_letter.push(resource_id.clone(), request);
                report.dead_lettered += 1;
                self.pending_events.push(QueueEvent::DeadLettered {
                    resource_id,
                    status: response.status,
                });
            }
            StatusClass::ServerError => {
                warn!(fn_id = %request.operation_id, %resource_id, status = response.status, "request scheduled for retry");
                self.retry.push(resource_id.clone(), request);
                report.retrying += 1;
                self.pending_events.push(QueueEvent::RetryScheduled {
                    resource_id,
                    status: response.status,
                });
            }
            StatusClass::Other => {
                warn!(fn_id = %request.operation_id, %resource_id, status = response.status, "unclassified status; request dropped");
            }
        }
    }

    fn record_temp_id(&mut self, temp_id: ResourceId, real_id: ResourceId, report: &mut DrainReport) {
        info!(%temp_id, %real_id, "temp id reconciled");
        self.temp_ids.insert(temp_id.clone(), real_id.clone());
        report.reconciled += 1;
        self.pending_events
            .push(QueueEvent::TempIdReconciled { temp_id, real_id });
    }
}

async fn call_operation(
    operation: &dyn ApiOperation,
    resource_id: &ResourceId,
    args: &RequestArgs,
) -> ApiResponse {
    match operation.call(resource_id, args).await {
        Ok(response) => response,
        Err(err) => {
            error!(fn_id = %operation.id(), %resource_id, %err, "operation failed");
            ApiResponse::synthetic_failure()
        }
    }
}
