//! Registrations for the activity resource.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    activity::{ActivityDraft, ActivityPatch},
    op::RequestArgs,
    persist::Table,
    types::{HttpMethod, OperationId, ResourceId, TimeRange},
};

use super::{
    registry::Registry,
    response::ApiResponse,
    traits::{ApiOperation, CacheAction, CachePath, CallError},
};

/// Create an activity.
pub const POST_ACTIVITY: &str = "postActivity";
/// Patch an activity.
pub const PATCH_ACTIVITY: &str = "patchActivity";
/// Delete an activity.
pub const DELETE_ACTIVITY: &str = "deleteActivity";
/// List activities in a time window.
pub const GET_ACTIVITIES: &str = "getActivities";

/// Network calls for the activity resource. Transport and URL layout live behind this trait.
#[async_trait]
pub trait ActivityEndpoints: Send + Sync + 'static {
    /// `POST /activity`. `temp_id` is the client id the record is known by until the server answers.
    async fn post_activity(
        &self,
        temp_id: &ResourceId,
        draft: &ActivityDraft,
    ) -> Result<ApiResponse, CallError>;

    /// `PATCH /activity/{id}`.
    async fn patch_activity(
        &self,
        id: &ResourceId,
        patch: &ActivityPatch,
    ) -> Result<ApiResponse, CallError>;

    /// `DELETE /activity/{id}`.
    async fn delete_activity(&self, id: &ResourceId) -> Result<ApiResponse, CallError>;

    /// `GET /activity?start=..&end=..`.
    async fn get_activities(&self, range: &TimeRange) -> Result<ApiResponse, CallError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endpoint {
    Post,
    Patch,
    Delete,
    List,
}

/// One activity endpoint exposed as a registrable operation.
pub struct ActivityOperation {
    id: OperationId,
    endpoint: Endpoint,
    endpoints: Arc<dyn ActivityEndpoints>,
}

#[async_trait]
impl ApiOperation for ActivityOperation {
    fn id(&self) -> &OperationId {
        &self.id
    }

    fn method(&self) -> HttpMethod {
        match self.endpoint {
            Endpoint::Post => HttpMethod::Post,
            Endpoint::Patch => HttpMethod::Patch,
            Endpoint::Delete => HttpMethod::Delete,
            Endpoint::List => HttpMethod::Get,
        }
    }

    fn cache_read(&self) -> Option<CachePath> {
        match self.endpoint {
            Endpoint::List => Some(CachePath::new(Table::Activities, CacheAction::Find)),
            _ => None,
        }
    }

    fn cache_write(&self) -> Option<CachePath> {
        let action = match self.endpoint {
            Endpoint::Post => CacheAction::Add,
            Endpoint::Patch | Endpoint::List => CacheAction::Put,
            Endpoint::Delete => CacheAction::Delete,
        };
        Some(CachePath::new(Table::Activities, action))
    }

    fn accepts(&self, args: &RequestArgs) -> bool {
        matches!(
            (self.endpoint, args),
            (Endpoint::Post, RequestArgs::CreateActivity { .. })
                | (Endpoint::Patch, RequestArgs::PatchActivity { .. })
                | (Endpoint::Delete, RequestArgs::DeleteActivity { .. })
                | (Endpoint::List, RequestArgs::GetActivities { .. })
        )
    }

    async fn call(
        &self,
        resource_id: &ResourceId,
        args: &RequestArgs,
    ) -> Result<ApiResponse, CallError> {
        match (self.endpoint, args) {
            (Endpoint::Post, RequestArgs::CreateActivity { payload, .. }) => {
                self.endpoints.post_activity(resource_id, payload).await
            }
            (Endpoint::Patch, RequestArgs::PatchActivity { patch, .. }) => {
                self.endpoints.patch_activity(resource_id, patch).await
            }
            (Endpoint::Delete, RequestArgs::DeleteActivity { .. }) => {
                self.endpoints.delete_activity(resource_id).await
            }
            (Endpoint::List, RequestArgs::GetActivities { range, .. }) => {
                self.endpoints.get_activities(range).await
            }
            (_, other) => Err(CallError::ArgumentMismatch {
                operation: self.id.clone(),
                kind: other.kind(),
            }),
        }
    }
}

/// The four activity operations, ready to register.
pub fn activity_operations(endpoints: Arc<dyn ActivityEndpoints>) -> Vec<Arc<dyn ApiOperation>> {
    [
        (POST_ACTIVITY, Endpoint::Post),
        (PATCH_ACTIVITY, Endpoint::Patch),
        (DELETE_ACTIVITY, Endpoint::Delete),
        (GET_ACTIVITIES, Endpoint::List),
    ]
    .into_iter()
    .map(|(id, endpoint)| {
        Arc::new(ActivityOperation {
            id: OperationId::from(id),
            endpoint,
            endpoints: Arc::clone(&endpoints),
        }) as Arc<dyn ApiOperation>
    })
    .collect()
}

/// Registry holding exactly the activity operations.
pub fn activity_registry(endpoints: Arc<dyn ActivityEndpoints>) -> Registry {
    Registry::new().with_operations(activity_operations(endpoints))
}
