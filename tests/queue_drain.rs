mod common;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use serde_json::{Value, json};

use chronosync::{
    api::{
        response::ApiResponse,
        traits::{ApiOperation, CallError},
    },
    connectivity::Connectivity,
    core::queue::{EnqueueOutcome, QueueConfig, RequestQueue},
    op::{PendingRequest, RequestArgs},
    persist::{
        DurableStore, PersistError, PersistResult, Table, memory::MemoryStore, shared, with_store,
    },
    types::{HttpMethod, OperationId, ResourceId, TimeRange},
};

use common::{ActivityOps, create, delete, draft, engine, engine_with_store, id, patch};

/// Create endpoint that answers with a server id and takes the device offline while doing so.
struct CreateThenDisconnect {
    id: OperationId,
    connectivity: Connectivity,
}

#[async_trait]
impl ApiOperation for CreateThenDisconnect {
    fn id(&self) -> &OperationId {
        &self.id
    }

    fn method(&self) -> HttpMethod {
        HttpMethod::Post
    }

    async fn call(&self, _: &ResourceId, _: &RequestArgs) -> Result<ApiResponse, CallError> {
        self.connectivity.set_online(false);
        Ok(ApiResponse::json_body(201, &json!({ "id": "77" })))
    }
}

/// Memory store whose `dequeue` starts failing after `dequeues_left` successes.
struct FlakyStore {
    inner: MemoryStore,
    dequeues_left: usize,
}

impl DurableStore for FlakyStore {
    fn enqueue(&mut self, requests: &[PendingRequest]) -> PersistResult<Vec<PendingRequest>> {
        self.inner.enqueue(requests)
    }

    fn dequeue(&mut self) -> PersistResult<Option<PendingRequest>> {
        if self.dequeues_left == 0 {
            return Err(PersistError::Message("disk unavailable".to_string()));
        }
        self.dequeues_left -= 1;
        self.inner.dequeue()
    }

    fn clear_queue(&mut self) -> PersistResult<()> {
        self.inner.clear_queue()
    }

    fn queued(&self) -> PersistResult<Vec<PendingRequest>> {
        self.inner.queued()
    }

    fn add(&mut self, table: Table, values: &[Value]) -> PersistResult<Vec<Value>> {
        self.inner.add(table, values)
    }

    fn put(&mut self, table: Table, values: &[Value]) -> PersistResult<Vec<Value>> {
        self.inner.put(table, values)
    }

    fn delete(&mut self, table: Table, ids: &[ResourceId]) -> PersistResult<Vec<ResourceId>> {
        self.inner.delete(table, ids)
    }

    fn find_by_id(&self, table: Table, id: &ResourceId) -> PersistResult<Option<Value>> {
        self.inner.find_by_id(table, id)
    }

    fn find(&self, table: Table, range: &TimeRange) -> PersistResult<Vec<Value>> {
        self.inner.find(table, range)
    }
}

#[tokio::test]
async fn queued_create_replays_with_temp_id_and_payload() {
    let ops = ActivityOps::new();
    let (mut queue, connectivity, _) = engine(&ops, false);

    queue
        .enqueue("postActivity", create("temp-1", "Run"))
        .await
        .expect("enqueue");
    assert_eq!(queue.queued().await.expect("queued").len(), 1);

    connectivity.set_online(true);
    let report = queue.drain().await;

    assert_eq!(report.attempted, 1);
    assert!(!report.interrupted);
    let calls = ops.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].resource_id, "temp-1");
    assert_eq!(
        calls[0].args,
        RequestArgs::CreateActivity {
            resource_id: id("temp-1"),
            payload: draft("Run"),
        }
    );
    assert!(queue.queued().await.expect("queued").is_empty());
}

#[tokio::test]
async fn drain_preserves_enqueue_order() {
    let ops = ActivityOps::new();
    let (mut queue, connectivity, _) = engine(&ops, false);

    let sequence = [
        ("deleteActivity", delete("3")),
        ("patchActivity", patch("1", "a")),
        ("postActivity", create("temp-9", "b")),
        ("patchActivity", patch("2", "c")),
        ("deleteActivity", delete("1")),
    ];
    for (op, args) in sequence.clone() {
        queue.enqueue(op, args).await.expect("enqueue");
    }

    connectivity.set_online(true);
    queue.drain().await;

    let replayed: Vec<(String, String)> = ops
        .calls()
        .into_iter()
        .map(|c| (c.operation_id, c.resource_id))
        .collect();
    let expected: Vec<(String, String)> = sequence
        .iter()
        .map(|(op, args)| (op.to_string(), args.resource_id().to_string()))
        .collect();
    assert_eq!(replayed, expected);
}

#[tokio::test]
async fn server_error_moves_request_to_retry_queue_only() {
    let ops = ActivityOps::new();
    ops.patch.respond_status(503);
    let (mut queue, connectivity, _) = engine(&ops, false);

    queue
        .enqueue("patchActivity", patch("5", "Swim"))
        .await
        .expect("enqueue");
    connectivity.set_online(true);
    let report = queue.drain().await;

    assert_eq!(report.retrying, 1);
    assert_eq!(report.dead_lettered, 0);
    assert_eq!(queue.retry_queue_by_id(&id("5")).expect("retry").len(), 1);
    assert!(queue.dead_letter_queue_by_id(&id("5")).is_none());
}

#[tokio::test]
async fn client_error_moves_request_to_dead_letter_queue_only() {
    let ops = ActivityOps::new();
    ops.delete.respond_status(404);
    let (mut queue, connectivity, _) = engine(&ops, false);

    queue
        .enqueue("deleteActivity", delete("8"))
        .await
        .expect("enqueue");
    connectivity.set_online(true);
    let report = queue.drain().await;

    assert_eq!(report.dead_lettered, 1);
    assert_eq!(report.retrying, 0);
    assert_eq!(queue.dead_letter_queue_by_id(&id("8")).expect("dlq").len(), 1);
    assert!(queue.retry_queue_by_id(&id("8")).is_none());
}

#[tokio::test]
async fn call_error_during_drain_is_retried_and_drain_continues() {
    let ops = ActivityOps::new();
    ops.patch.fail();
    let (mut queue, connectivity, _) = engine(&ops, false);

    queue.enqueue("patchActivity", patch("5", "a")).await.expect("enqueue");
    queue.enqueue("deleteActivity", delete("6")).await.expect("enqueue");
    connectivity.set_online(true);
    let report = queue.drain().await;

    assert_eq!(report.attempted, 2);
    assert_eq!(report.retrying, 1);
    assert_eq!(ops.calls_to("deleteActivity"), 1);
    assert!(queue.retry_queue_by_id(&id("5")).is_some());
}

#[tokio::test]
async fn reconciled_temp_id_is_used_for_later_records() {
    let ops = ActivityOps::new();
    ops.post.respond_json(201, json!({ "id": "R" }));
    let (mut queue, connectivity, _) = engine(&ops, false);

    queue
        .enqueue("postActivity", create("T", "Run"))
        .await
        .expect("enqueue");
    queue.enqueue("patchActivity", patch("T", "Jog")).await.expect("enqueue");
    queue.enqueue("deleteActivity", delete("T")).await.expect("enqueue");

    connectivity.set_online(true);
    let report = queue.drain().await;
    assert_eq!(report.reconciled, 1);

    let calls = ops.calls();
    assert_eq!(calls[0].resource_id, "T");
    assert_eq!(calls[1].resource_id, "R");
    assert_eq!(calls[1].args.resource_id(), &id("R"));
    assert_eq!(calls[2].resource_id, "R");
    // The map only lives for one drain cycle.
    assert!(queue.resolved_id(&id("T")).is_none());
}

#[tokio::test]
async fn failed_record_after_reconciliation_is_keyed_by_real_id() {
    let ops = ActivityOps::new();
    ops.post.respond_json(201, json!({ "id": 71 }));
    ops.patch.respond_status(500);
    let (mut queue, connectivity, _) = engine(&ops, false);

    queue
        .enqueue("postActivity", create("temp-a", "Run"))
        .await
        .expect("enqueue");
    queue
        .enqueue("patchActivity", patch("temp-a", "Jog"))
        .await
        .expect("enqueue");
    connectivity.set_online(true);
    queue.drain().await;

    let retry = queue.retry_queue_by_id(&id("71")).expect("retry");
    assert_eq!(retry[0].args.resource_id(), &id("71"));
    assert!(queue.retry_queue_by_id(&id("temp-a")).is_none());
}

#[tokio::test]
async fn post_without_json_content_type_is_not_reconciled() {
    let ops = ActivityOps::new();
    ops.post
        .respond(ApiResponse::empty(201).with_body(json!({ "id": "R" }).to_string()));
    let (mut queue, connectivity, _) = engine(&ops, false);

    queue.enqueue("postActivity", create("T", "Run")).await.expect("enqueue");
    queue.enqueue("deleteActivity", delete("T")).await.expect("enqueue");
    connectivity.set_online(true);
    let report = queue.drain().await;

    assert_eq!(report.reconciled, 0);
    assert_eq!(ops.calls()[1].resource_id, "T");
}

#[tokio::test]
async fn expired_records_are_skipped_and_gone() {
    let ops = ActivityOps::new();
    let (mut queue, connectivity, store) = engine(&ops, false);

    let EnqueueOutcome::Queued(mut contents) = queue
        .enqueue("deleteActivity", delete("5"))
        .await
        .expect("enqueue")
    else {
        panic!("expected queued outcome");
    };
    let mut stale = contents.remove(0);
    stale.exp = Utc::now() - TimeDelta::seconds(1);
    with_store(&store, move |s| {
        s.clear_queue()?;
        s.enqueue(&[stale]).map(drop)
    })
    .await
    .expect("rewrite queue");

    connectivity.set_online(true);
    let report = queue.drain().await;

    assert_eq!(report.expired, 1);
    assert_eq!(report.attempted, 0);
    assert_eq!(ops.calls_to("deleteActivity"), 0);
    assert!(queue.queued().await.expect("queued").is_empty());
    assert!(queue.retry_queue_by_id(&id("5")).is_none());
    assert!(queue.dead_letter_queue_by_id(&id("5")).is_none());
}

#[tokio::test]
async fn unknown_operation_records_are_dropped() {
    let ops = ActivityOps::new();
    let (mut queue, connectivity, store) = engine(&ops, false);

    let EnqueueOutcome::Queued(mut contents) = queue
        .enqueue("deleteActivity", delete("5"))
        .await
        .expect("enqueue")
    else {
        panic!("expected queued outcome");
    };
    let mut orphan = contents.remove(0);
    orphan.operation_id = OperationId::from("archiveActivity");
    with_store(&store, move |s| {
        s.clear_queue()?;
        s.enqueue(&[orphan]).map(drop)
    })
    .await
    .expect("rewrite queue");

    connectivity.set_online(true);
    let report = queue.drain().await;
    assert_eq!(report.unknown, 1);
    assert!(ops.calls().is_empty());
}

#[tokio::test]
async fn offline_drain_is_a_no_op() {
    let ops = ActivityOps::new();
    let (mut queue, _, _) = engine(&ops, false);

    queue.enqueue("deleteActivity", delete("5")).await.expect("enqueue");
    let report = queue.drain().await;

    assert!(report.interrupted);
    assert!(ops.calls().is_empty());
    assert_eq!(queue.queued().await.expect("queued").len(), 1);
}

#[tokio::test]
async fn retry_diversion_after_server_error() {
    let ops = ActivityOps::new();
    ops.patch.respond_status(500);
    let (mut queue, connectivity, _) = engine(&ops, false);

    queue
        .enqueue("patchActivity", patch("5", "A"))
        .await
        .expect("enqueue");
    connectivity.set_online(true);
    queue.drain().await;
    assert_eq!(queue.retry_queue_by_id(&id("5")).expect("retry").len(), 1);

    connectivity.set_online(false);
    let outcome = queue
        .enqueue("deleteActivity", delete("5"))
        .await
        .expect("enqueue");
    assert_eq!(outcome, EnqueueOutcome::RetryDeferred);
    assert_eq!(queue.retry_queue_by_id(&id("5")).expect("retry").len(), 2);
    assert_eq!(ops.calls_to("deleteActivity"), 0);
    assert!(queue.queued().await.expect("queued").is_empty());
}

#[tokio::test]
async fn drain_emits_events_in_order() {
    use chronosync::runtime::events::QueueEvent;

    let ops = ActivityOps::new();
    ops.post.respond_json(201, json!({ "id": "R" }));
    let (mut queue, connectivity, _) = engine(&ops, false);

    queue.enqueue("postActivity", create("T", "Run")).await.expect("enqueue");
    connectivity.set_online(true);
    queue.drain().await;

    let events = queue.take_events();
    assert!(matches!(events[0], QueueEvent::Queued { depth: 1, .. }));
    assert!(matches!(events[1], QueueEvent::Executed { status: 201, .. }));
    assert_eq!(
        events[2],
        QueueEvent::TempIdReconciled {
            temp_id: id("T"),
            real_id: id("R"),
        }
    );
    assert!(matches!(events.last(), Some(QueueEvent::Drained { .. })));
    assert!(queue.take_events().is_empty());
}

#[tokio::test]
async fn connectivity_loss_mid_drain_keeps_the_rest_queued() {
    let ops = ActivityOps::new();
    let connectivity = Connectivity::new(false);
    let mut registry = (*ops.registry()).clone();
    registry.register(Arc::new(CreateThenDisconnect {
        id: OperationId::from("postActivity"),
        connectivity: connectivity.clone(),
    }));
    let mut queue = RequestQueue::new(
        Arc::new(registry),
        shared(MemoryStore::new()),
        connectivity.clone(),
        QueueConfig::default(),
    );

    queue
        .enqueue("postActivity", create("temp-1", "Run"))
        .await
        .expect("enqueue");
    queue
        .enqueue("patchActivity", patch("temp-1", "Jog"))
        .await
        .expect("enqueue");
    connectivity.set_online(true);
    let report = queue.drain().await;

    assert!(report.interrupted);
    assert_eq!(report.attempted, 1);
    assert_eq!(report.reconciled, 1);
    let remaining = queue.queued().await.expect("queued");
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].operation_id.as_str(), "patchActivity");
    assert_eq!(queue.resolved_id(&id("temp-1")), Some(&id("77")));
    assert_eq!(ops.calls_to("patchActivity"), 0);

    // The next pass resumes with the mapping from the interrupted one.
    connectivity.set_online(true);
    let report = queue.drain().await;
    assert!(!report.interrupted);
    assert_eq!(ops.calls()[0].resource_id, "77");
    assert!(queue.resolved_id(&id("temp-1")).is_none());
}

#[tokio::test]
async fn dequeue_failure_mid_drain_keeps_the_rest_queued() {
    let ops = ActivityOps::new();
    let store = shared(FlakyStore {
        inner: MemoryStore::new(),
        dequeues_left: 1,
    });
    let (mut queue, connectivity, _) = engine_with_store(&ops, false, store);

    queue.enqueue("deleteActivity", delete("1")).await.expect("enqueue");
    queue.enqueue("deleteActivity", delete("2")).await.expect("enqueue");
    connectivity.set_online(true);
    let report = queue.drain().await;

    assert!(report.interrupted);
    assert_eq!(report.attempted, 1);
    let remaining = queue.queued().await.expect("queued");
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].resource_id, id("2"));
    assert_eq!(ops.calls_to("deleteActivity"), 1);
}

#[tokio::test]
async fn records_whose_args_no_longer_fit_are_dropped() {
    let ops = ActivityOps::new();
    let (mut queue, connectivity, store) = engine(&ops, false);

    let EnqueueOutcome::Queued(mut contents) = queue
        .enqueue("patchActivity", patch("5", "Swim"))
        .await
        .expect("enqueue")
    else {
        panic!("expected queued outcome");
    };
    let mut stale = contents.remove(0);
    stale.args = RequestArgs::DeleteActivity {
        resource_id: id("5"),
    };
    with_store(&store, move |s| {
        s.clear_queue()?;
        s.enqueue(&[stale]).map(drop)
    })
    .await
    .expect("rewrite queue");

    connectivity.set_online(true);
    let report = queue.drain().await;
    assert_eq!(report.unknown, 1);
    assert_eq!(report.retrying, 0);
    assert!(ops.calls().is_empty());
    assert!(queue.retry_queue_by_id(&id("5")).is_none());

    let outcome = queue
        .enqueue("deleteActivity", delete("5"))
        .await
        .expect("enqueue");
    assert!(matches!(outcome, EnqueueOutcome::Executed(_)));
}

#[tokio::test]
async fn take_events_returns_only_new_events() {
    let ops = ActivityOps::new();
    let (mut queue, _, _) = engine(&ops, false);

    queue.enqueue("deleteActivity", delete("1")).await.expect("enqueue");
    assert_eq!(queue.take_events().len(), 1);

    queue.enqueue("deleteActivity", delete("2")).await.expect("enqueue");
    let events = queue.take_events();
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        chronosync::runtime::events::QueueEvent::Queued { depth: 2, .. }
    ));
}
