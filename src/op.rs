//! Deferred request model and persistence wrappers.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    activity::{ActivityDraft, ActivityPatch},
    api::traits::ApiOperation,
    core::queue::QueueError,
    types::{HttpMethod, OperationId, ResourceId, TimeRange},
};

/// Version number for serialized [`PendingRequestEnvelope`] payloads.
pub const REQUEST_FORMAT_VERSION: u16 = 1;

/// Arguments of a single operation invocation, one variant per operation shape.
///
/// Every variant names the target resource explicitly; for creates this is the
/// client-generated temp id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RequestArgs {
    /// Create an activity.
    CreateActivity {
        /// Temp id the client uses until the server assigns one.
        resource_id: ResourceId,
        /// Create payload.
        payload: ActivityDraft,
    },
    /// Patch an activity.
    PatchActivity {
        /// Activity to patch.
        resource_id: ResourceId,
        /// Fields to overwrite.
        patch: ActivityPatch,
    },
    /// Delete an activity.
    DeleteActivity {
        /// Activity to delete.
        resource_id: ResourceId,
    },
    /// List activities overlapping a time window.
    GetActivities {
        /// Collection id.
        resource_id: ResourceId,
        /// Window to list.
        range: TimeRange,
    },
}

impl RequestArgs {
    /// Target resource of this invocation.
    pub fn resource_id(&self) -> &ResourceId {
        match self {
            Self::CreateActivity { resource_id, .. }
            | Self::PatchActivity { resource_id, .. }
            | Self::DeleteActivity { resource_id }
            | Self::GetActivities { resource_id, .. } => resource_id,
        }
    }

    /// Points this invocation at `id`.
    pub fn rebind(&mut self, id: ResourceId) {
        match self {
            Self::CreateActivity { resource_id, .. }
            | Self::PatchActivity { resource_id, .. }
            | Self::DeleteActivity { resource_id }
            | Self::GetActivities { resource_id, .. } => *resource_id = id,
        }
    }

    /// Short name of the variant, as used in the `kind` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CreateActivity { .. } => "create_activity",
            Self::PatchActivity { .. } => "patch_activity",
            Self::DeleteActivity { .. } => "delete_activity",
            Self::GetActivities { .. } => "get_activities",
        }
    }

    /// Time window carried by range reads.
    pub fn range(&self) -> Option<&TimeRange> {
        match self {
            Self::GetActivities { range, .. } => Some(range),
            _ => None,
        }
    }

    /// JSON document the arguments describe, keyed by the resource id.
    ///
    /// Creates yield a full record, patches a partial one. Deletes and reads yield nothing.
    pub fn document(&self) -> Option<serde_json::Value> {
        let (resource_id, body) = match self {
            Self::CreateActivity { resource_id, payload } => {
                (resource_id, serde_json::to_value(payload).ok()?)
            }
            Self::PatchActivity { resource_id, patch } => {
                (resource_id, serde_json::to_value(patch).ok()?)
            }
            Self::DeleteActivity { .. } | Self::GetActivities { .. } => return None,
        };
        let serde_json::Value::Object(mut map) = body else {
            return None;
        };
        map.insert(
            "id".to_string(),
            serde_json::Value::String(resource_id.to_string()),
        );
        Some(serde_json::Value::Object(map))
    }
}

/// One deferred mutation, serializable for the durable queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingRequest {
    /// Target resource; a temp id for creates.
    pub resource_id: ResourceId,
    /// Method declared by the operation. Never `get`.
    pub http_method: HttpMethod,
    /// Creation instant.
    pub timestamp: DateTime<Utc>,
    /// Registered operation to invoke on replay.
    pub operation_id: OperationId,
    /// Invocation arguments.
    pub args: RequestArgs,
    /// Absolute expiry, stored as epoch milliseconds.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub exp: DateTime<Utc>,
}

impl PendingRequest {
    /// Builds a record for `operation` that expires `ttl` from now.
    ///
    /// Reads are never deferred, so a `get` operation is rejected.
    pub fn new(
        operation: &dyn ApiOperation,
        args: RequestArgs,
        ttl: TimeDelta,
    ) -> Result<Self, QueueError> {
        let http_method = operation.method();
        if !http_method.is_mutation() {
            return Err(QueueError::NotAMutation(operation.id().clone()));
        }

        let timestamp = Utc::now();
        Ok(Self {
            resource_id: args.resource_id().clone(),
            http_method,
            timestamp,
            operation_id: operation.id().clone(),
            args,
            exp: timestamp + ttl,
        })
    }

    /// True once `now` is past the expiry instant.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.exp < now
    }

    /// Rewrites the target resource, keeping `resource_id` and `args` in step.
    pub fn rebind(&mut self, id: ResourceId) {
        self.args.rebind(id.clone());
        self.resource_id = id;
    }
}

/// Versioned wrapper for stable on-disk payload decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingRequestEnvelope {
    /// Payload format version.
    pub format_version: u16,
    /// Wrapped request.
    pub request: PendingRequest,
}

impl PendingRequestEnvelope {
    /// Constructs an envelope using [`REQUEST_FORMAT_VERSION`].
    pub fn new(request: PendingRequest) -> Self {
        Self {
            format_version: REQUEST_FORMAT_VERSION,
            request,
        }
    }
}
