//! Optimistic create/update/delete against a local activity index, rolled back on failure.

use hashbrown::HashMap;
use tracing::{debug, warn};

use crate::{
    activity::{Activity, ActivityDraft, ActivityPatch},
    op::RequestArgs,
    runtime::{events::QueueEvent, handle::RuntimeError},
    types::ResourceId,
};

use super::{
    activity::{DELETE_ACTIVITY, PATCH_ACTIVITY, POST_ACTIVITY},
    request::{ApiClient, ApiResult},
    response::id_field,
};

/// Derived activity state that receives optimistic updates.
pub trait ActivityIndex {
    /// Current copy of the activity indexed under `id`.
    fn activity(&self, id: &ResourceId) -> Option<Activity>;
    /// Inserts or replaces `activity` under its id.
    fn create_activity(&mut self, activity: Activity);
    /// Replaces the activity stored under its id.
    fn update_activity(&mut self, activity: Activity);
    /// Removes and returns the activity indexed under `id`.
    fn delete_activity(&mut self, id: &ResourceId) -> Option<Activity>;
    /// Re-keys the activity known by `temp_id`.
    fn replace_temp_id(&mut self, temp_id: &ResourceId, real_id: ResourceId);
}

/// Flat id-keyed index.
impl ActivityIndex for HashMap<ResourceId, Activity> {
    fn activity(&self, id: &ResourceId) -> Option<Activity> {
        self.get(id).cloned()
    }

    fn create_activity(&mut self, activity: Activity) {
        self.insert(activity.id.clone(), activity);
    }

    fn update_activity(&mut self, activity: Activity) {
        self.insert(activity.id.clone(), activity);
    }

    fn delete_activity(&mut self, id: &ResourceId) -> Option<Activity> {
        self.remove(id)
    }

    fn replace_temp_id(&mut self, temp_id: &ResourceId, real_id: ResourceId) {
        if let Some(mut activity) = self.remove(temp_id) {
            activity.id = real_id.clone();
            self.insert(real_id, activity);
        }
    }
}

/// Creates an activity under a fresh temp id, then adopts the server id.
///
/// Returns the id the activity is indexed under afterwards: the server id when
/// the request executed, the temp id when it was deferred or failed.
pub async fn create_activity<I: ActivityIndex + ?Sized>(
    client: &ApiClient,
    index: &mut I,
    draft: ActivityDraft,
) -> Result<(ResourceId, ApiResult), RuntimeError> {
    let temp_id = ResourceId::temporary();
    index.create_activity(draft.clone().into_activity(temp_id.clone()));

    let args = RequestArgs::CreateActivity {
        resource_id: temp_id.clone(),
        payload: draft,
    };
    let result = match client.request(POST_ACTIVITY, args).await {
        Ok(result) => result,
        Err(err) => {
            index.delete_activity(&temp_id);
            return Err(err);
        }
    };

    if let Some(err) = &result.error {
        warn!(%temp_id, %err, "create failed; optimistic entry removed");
        index.delete_activity(&temp_id);
        return Ok((temp_id, result));
    }

    match result.data.as_ref().and_then(id_field) {
        Some(real_id) if real_id != temp_id => {
            index.replace_temp_id(&temp_id, real_id.clone());
            Ok((real_id, result))
        }
        _ => Ok((temp_id, result)),
    }
}

/// Applies `patch` locally, then sends it. The previous activity is restored on failure.
///
/// An empty patch is neither applied nor sent.
pub async fn update_activity<I: ActivityIndex + ?Sized>(
    client: &ApiClient,
    index: &mut I,
    id: ResourceId,
    patch: ActivityPatch,
) -> Result<ApiResult, RuntimeError> {
    if patch.is_empty() {
        debug!(resource_id = %id, "empty patch; nothing sent");
        return Ok(ApiResult::default());
    }
    let previous = index.activity(&id);
    if let Some(current) = &previous {
        let mut next = current.clone();
        patch.apply_to(&mut next);
        index.update_activity(next);
    } else {
        debug!(resource_id = %id, "patching an activity the index does not hold");
    }

    let args = RequestArgs::PatchActivity {
        resource_id: id,
        patch,
    };
    let outcome = client.request(PATCH_ACTIVITY, args).await;
    if outcome.as_ref().map_or(true, |result| !result.is_ok()) {
        if let Some(previous) = previous {
            warn!(resource_id = %previous.id, "update failed; previous activity restored");
            index.update_activity(previous);
        }
    }
    outcome
}

/// Removes the activity locally, then sends the delete. The activity is re-inserted on failure.
pub async fn delete_activity<I: ActivityIndex + ?Sized>(
    client: &ApiClient,
    index: &mut I,
    id: ResourceId,
) -> Result<ApiResult, RuntimeError> {
    let previous = index.delete_activity(&id);

    let outcome = client
        .request(DELETE_ACTIVITY, RequestArgs::DeleteActivity { resource_id: id })
        .await;
    if outcome.as_ref().map_or(true, |result| !result.is_ok()) {
        if let Some(previous) = previous {
            warn!(resource_id = %previous.id, "delete failed; activity restored");
            index.create_activity(previous);
        }
    }
    outcome
}

/// Forwards background reconciliation to the index. Returns whether the event applied.
pub fn apply_event<I: ActivityIndex + ?Sized>(index: &mut I, event: &QueueEvent) -> bool {
    match event {
        QueueEvent::TempIdReconciled { temp_id, real_id } => {
            index.replace_temp_id(temp_id, real_id.clone());
            true
        }
        _ => false,
    }
}
