//! Runtime event stream payloads.

use crate::{
    core::{lanes::Lane, queue::DrainReport},
    types::{OperationId, ResourceId},
};

/// Events emitted by the queue engine, forwarded on the runtime's broadcast channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
    /// An operation was invoked, directly or during a drain.
    Executed {
        /// Invoked operation.
        operation_id: OperationId,
        /// Resource it was invoked with, after temp-id resolution.
        resource_id: ResourceId,
        /// Status of the response, 500 for a call error.
        status: u16,
    },
    /// A mutation was written to the durable queue.
    Queued {
        /// Deferred operation.
        operation_id: OperationId,
        /// Target resource.
        resource_id: ResourceId,
        /// Queue length after the append.
        depth: usize,
    },
    /// A new mutation joined an existing retry or dead-letter list without executing.
    Diverted {
        /// Target resource.
        resource_id: ResourceId,
        /// List it joined.
        lane: Lane,
    },
    /// A drained request was rejected with a 4xx.
    DeadLettered {
        /// Resolved resource id.
        resource_id: ResourceId,
        /// Rejection status.
        status: u16,
    },
    /// A drained request failed with a 5xx or a call error.
    RetryScheduled {
        /// Resolved resource id.
        resource_id: ResourceId,
        /// Failure status.
        status: u16,
    },
    /// A queued create succeeded and the server assigned an id.
    TempIdReconciled {
        /// Client-generated id.
        temp_id: ResourceId,
        /// Server-assigned id.
        real_id: ResourceId,
    },
    /// A retry chain failed again and its remaining entries were dropped.
    ChainAbandoned {
        /// Resource whose chain was dropped.
        resource_id: ResourceId,
        /// Entries dropped without being executed.
        dropped: usize,
        /// Status of the failing attempt.
        status: u16,
    },
    /// A drain pass of the durable queue finished.
    Drained {
        /// Pass counters.
        report: DrainReport,
    },
}
