//! Offline-resilient request queue and cache synchronization for activity records.
//!
//! Mutations made while offline are stored in a durable FIFO queue and replayed
//! when connectivity returns. Failed replays are split into a retry queue (5xx)
//! and a dead-letter queue (4xx), both grouped by resource id, and temporary
//! client ids are reconciled with server-assigned ids as creates succeed.
//!
//! # Examples
//!
//! Deferring a delete while offline and replaying it on reconnect:
//! ```
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use chronosync::{
//!     activity::{ActivityDraft, ActivityPatch},
//!     api::{
//!         activity::{activity_registry, ActivityEndpoints, DELETE_ACTIVITY},
//!         response::ApiResponse,
//!         traits::CallError,
//!     },
//!     connectivity::Connectivity,
//!     core::queue::{EnqueueOutcome, QueueConfig, RequestQueue},
//!     op::RequestArgs,
//!     persist::{memory::MemoryStore, shared},
//!     runtime::handle::{spawn_request_queue, RuntimeConfig},
//!     types::{ResourceId, TimeRange},
//! };
//!
//! struct Accepting;
//!
//! #[async_trait]
//! impl ActivityEndpoints for Accepting {
//!     async fn post_activity(&self, _: &ResourceId, _: &ActivityDraft) -> Result<ApiResponse, CallError> {
//!         Ok(ApiResponse::empty(201))
//!     }
//!     async fn patch_activity(&self, _: &ResourceId, _: &ActivityPatch) -> Result<ApiResponse, CallError> {
//!         Ok(ApiResponse::empty(200))
//!     }
//!     async fn delete_activity(&self, _: &ResourceId) -> Result<ApiResponse, CallError> {
//!         Ok(ApiResponse::empty(204))
//!     }
//!     async fn get_activities(&self, _: &TimeRange) -> Result<ApiResponse, CallError> {
//!         Ok(ApiResponse::empty(200))
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let registry = Arc::new(activity_registry(Arc::new(Accepting)));
//! let connectivity = Connectivity::new(false);
//! let queue = RequestQueue::new(
//!     registry,
//!     shared(MemoryStore::new()),
//!     connectivity.clone(),
//!     QueueConfig::default(),
//! );
//! let cfg = RuntimeConfig { drain_on_reconnect: false, ..RuntimeConfig::default() };
//! let handle = spawn_request_queue(queue, cfg);
//!
//! let args = RequestArgs::DeleteActivity { resource_id: ResourceId::from("42") };
//! let outcome = handle.enqueue(DELETE_ACTIVITY, args).await.expect("enqueue");
//! assert!(matches!(outcome, EnqueueOutcome::Queued(ref q) if q.len() == 1));
//!
//! connectivity.set_online(true);
//! let report = handle.drain().await.expect("drain");
//! assert_eq!(report.attempted, 1);
//! assert!(handle.queued().await.expect("queued").is_empty());
//! handle.shutdown().await.expect("shutdown");
//! # }
//! ```
#![deny(missing_docs)]

/// Activity records and patches.
pub mod activity;
/// Operation registry, response model, request façade, and optimistic flow.
pub mod api;
/// Live connectivity flag.
pub mod connectivity;
/// Queue engine and per-resource side queues.
pub mod core;
/// Deferred request model and persistence wrapper types.
pub mod op;
/// Durable store abstraction with SQLite and in-memory implementations.
pub mod persist;
/// Single-owner runtime handle and events.
pub mod runtime;
/// Shared primitive types.
pub mod types;
