#![allow(dead_code)]

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::Value;

use chronosync::{
    activity::{ActivityDraft, ActivityPatch, ActivityVariant},
    api::{
        registry::Registry,
        response::ApiResponse,
        traits::{ApiOperation, CacheAction, CachePath, CallError},
    },
    connectivity::Connectivity,
    core::queue::{QueueConfig, RequestQueue},
    op::{PendingRequest, RequestArgs},
    persist::{
        DurableStore, PersistError, PersistResult, SharedStore, Table, memory::MemoryStore, shared,
    },
    types::{HttpMethod, OperationId, ResourceId, TimeRange},
};

/// One recorded invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub operation_id: String,
    pub resource_id: String,
    pub args: RequestArgs,
}

pub type CallLog = Arc<Mutex<Vec<Call>>>;

/// Operation answering from a script, then with `fallback` once the script runs out.
pub struct ScriptedOp {
    id: OperationId,
    method: HttpMethod,
    cache_read: Option<CachePath>,
    cache_write: Option<CachePath>,
    script: Mutex<VecDeque<Result<ApiResponse, CallError>>>,
    fallback: u16,
    log: CallLog,
}

impl ScriptedOp {
    pub fn new(id: &str, method: HttpMethod, log: &CallLog) -> Self {
        Self {
            id: OperationId::from(id),
            method,
            cache_read: None,
            cache_write: None,
            script: Mutex::new(VecDeque::new()),
            fallback: 200,
            log: Arc::clone(log),
        }
    }

    pub fn with_cache_read(mut self, table: Table, action: CacheAction) -> Self {
        self.cache_read = Some(CachePath::new(table, action));
        self
    }

    pub fn with_cache_write(mut self, table: Table, action: CacheAction) -> Self {
        self.cache_write = Some(CachePath::new(table, action));
        self
    }

    pub fn respond(&self, response: ApiResponse) {
        self.script.lock().expect("lock").push_back(Ok(response));
    }

    pub fn respond_status(&self, status: u16) {
        self.respond(ApiResponse::empty(status));
    }

    pub fn respond_json(&self, status: u16, body: Value) {
        self.respond(ApiResponse::json_body(status, &body));
    }

    pub fn fail(&self) {
        self.script
            .lock()
            .expect("lock")
            .push_back(Err(CallError::Transport("connection reset".to_string())));
    }
}

#[async_trait]
impl ApiOperation for ScriptedOp {
    fn id(&self) -> &OperationId {
        &self.id
    }

    fn method(&self) -> HttpMethod {
        self.method
    }

    fn cache_read(&self) -> Option<CachePath> {
        self.cache_read
    }

    fn cache_write(&self) -> Option<CachePath> {
        self.cache_write
    }

    fn accepts(&self, args: &RequestArgs) -> bool {
        matches!(
            (self.method, args),
            (HttpMethod::Post, RequestArgs::CreateActivity { .. })
                | (HttpMethod::Patch, RequestArgs::PatchActivity { .. })
                | (HttpMethod::Delete, RequestArgs::DeleteActivity { .. })
                | (HttpMethod::Get, RequestArgs::GetActivities { .. })
        )
    }

    async fn call(
        &self,
        resource_id: &ResourceId,
        args: &RequestArgs,
    ) -> Result<ApiResponse, CallError> {
        self.log.lock().expect("lock").push(Call {
            operation_id: self.id.to_string(),
            resource_id: resource_id.to_string(),
            args: args.clone(),
        });
        self.script
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or_else(|| Ok(ApiResponse::empty(self.fallback)))
    }
}

/// The four activity operations as scripted fakes, wired with the activity cache paths.
pub struct ActivityOps {
    pub log: CallLog,
    pub post: Arc<ScriptedOp>,
    pub patch: Arc<ScriptedOp>,
    pub delete: Arc<ScriptedOp>,
    pub list: Arc<ScriptedOp>,
}

impl ActivityOps {
    pub fn new() -> Self {
        let log = CallLog::default();
        Self {
            post: Arc::new(
                ScriptedOp::new("postActivity", HttpMethod::Post, &log)
                    .with_cache_write(Table::Activities, CacheAction::Add),
            ),
            patch: Arc::new(
                ScriptedOp::new("patchActivity", HttpMethod::Patch, &log)
                    .with_cache_write(Table::Activities, CacheAction::Put),
            ),
            delete: Arc::new(
                ScriptedOp::new("deleteActivity", HttpMethod::Delete, &log)
                    .with_cache_write(Table::Activities, CacheAction::Delete),
            ),
            list: Arc::new(
                ScriptedOp::new("getActivities", HttpMethod::Get, &log)
                    .with_cache_read(Table::Activities, CacheAction::Find)
                    .with_cache_write(Table::Activities, CacheAction::Put),
            ),
            log,
        }
    }

    pub fn registry(&self) -> Arc<Registry> {
        let ops: Vec<Arc<dyn ApiOperation>> = vec![
            self.post.clone(),
            self.patch.clone(),
            self.delete.clone(),
            self.list.clone(),
        ];
        Arc::new(Registry::new().with_operations(ops))
    }

    pub fn calls(&self) -> Vec<Call> {
        self.log.lock().expect("lock").clone()
    }

    pub fn calls_to(&self, operation_id: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.operation_id == operation_id)
            .count()
    }
}

/// Engine over a fresh in-memory store.
pub fn engine(ops: &ActivityOps, online: bool) -> (RequestQueue, Connectivity, SharedStore) {
    engine_with_store(ops, online, shared(MemoryStore::new()))
}

pub fn engine_with_store(
    ops: &ActivityOps,
    online: bool,
    store: SharedStore,
) -> (RequestQueue, Connectivity, SharedStore) {
    let connectivity = Connectivity::new(online);
    let queue = RequestQueue::new(
        ops.registry(),
        store.clone(),
        connectivity.clone(),
        QueueConfig::default(),
    );
    (queue, connectivity, store)
}

pub fn id(s: &str) -> ResourceId {
    ResourceId::from(s)
}

pub fn draft(title: &str) -> ActivityDraft {
    ActivityDraft {
        title: title.to_string(),
        variant: ActivityVariant::Default,
        group: None,
        notes: None,
        start: Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).single().expect("start"),
        end: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).single().expect("end"),
        timezone: 0,
        color: None,
        data: None,
    }
}

pub fn create(resource: &str, title: &str) -> RequestArgs {
    RequestArgs::CreateActivity {
        resource_id: id(resource),
        payload: draft(title),
    }
}

pub fn patch(resource: &str, title: &str) -> RequestArgs {
    RequestArgs::PatchActivity {
        resource_id: id(resource),
        patch: ActivityPatch {
            title: Some(title.to_string()),
            ..ActivityPatch::default()
        },
    }
}

pub fn delete(resource: &str) -> RequestArgs {
    RequestArgs::DeleteActivity {
        resource_id: id(resource),
    }
}

pub fn may_first() -> TimeRange {
    TimeRange::new(
        Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).single().expect("start"),
        Utc.with_ymd_and_hms(2024, 5, 1, 23, 59, 59).single().expect("end"),
    )
}

pub fn list() -> RequestArgs {
    RequestArgs::GetActivities {
        resource_id: id("activities"),
        range: may_first(),
    }
}

/// Store whose every call fails.
pub struct FailingStore;

fn broken<T>() -> PersistResult<T> {
    Err(PersistError::Message("disk unavailable".to_string()))
}

impl DurableStore for FailingStore {
    fn enqueue(&mut self, _: &[PendingRequest]) -> PersistResult<Vec<PendingRequest>> {
        broken()
    }

    fn dequeue(&mut self) -> PersistResult<Option<PendingRequest>> {
        broken()
    }

    fn clear_queue(&mut self) -> PersistResult<()> {
        broken()
    }

    fn queued(&self) -> PersistResult<Vec<PendingRequest>> {
        broken()
    }

    fn add(&mut self, _: Table, _: &[Value]) -> PersistResult<Vec<Value>> {
        broken()
    }

    fn put(&mut self, _: Table, _: &[Value]) -> PersistResult<Vec<Value>> {
        broken()
    }

    fn delete(&mut self, _: Table, _: &[ResourceId]) -> PersistResult<Vec<ResourceId>> {
        broken()
    }

    fn find_by_id(&self, _: Table, _: &ResourceId) -> PersistResult<Option<Value>> {
        broken()
    }

    fn find(&self, _: Table, _: &TimeRange) -> PersistResult<Vec<Value>> {
        broken()
    }
}
