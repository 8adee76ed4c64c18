//! Activity records, create payloads, and sparse patches.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::ResourceId;

/// Activity kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ActivityVariant {
    /// Plain time-boxed activity.
    #[default]
    Default,
    /// Activity carrying exercise data.
    Exercise,
}

/// Fully materialized activity as stored by the server and the local cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    /// Server id, or a temp id while the create is pending.
    pub id: ResourceId,
    /// Display title.
    pub title: String,
    /// Activity kind.
    pub variant: ActivityVariant,
    /// Optional grouping label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Free-form notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Start instant.
    pub start: DateTime<Utc>,
    /// End instant.
    pub end: DateTime<Utc>,
    /// UTC offset in hours of the device that recorded the activity.
    pub timezone: i8,
    /// Display color chosen for the activity title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// Exercise payload, opaque to the sync layer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Create payload; the server assigns the id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityDraft {
    /// Display title.
    pub title: String,
    /// Activity kind.
    pub variant: ActivityVariant,
    /// Optional grouping label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Free-form notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Start instant.
    pub start: DateTime<Utc>,
    /// End instant.
    pub end: DateTime<Utc>,
    /// UTC offset in hours.
    pub timezone: i8,
    /// Display color.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// Exercise payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ActivityDraft {
    /// Materializes the draft under `id` (typically a temp id).
    pub fn into_activity(self, id: ResourceId) -> Activity {
        Activity {
            id,
            title: self.title,
            variant: self.variant,
            group: self.group,
            notes: self.notes,
            start: self.start,
            end: self.end,
            timezone: self.timezone,
            color: self.color,
            data: self.data,
        }
    }
}

/// Sparse patch where each `Some` field overwrites the activity value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ActivityPatch {
    /// Optional replacement for title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Optional replacement for variant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<ActivityVariant>,
    /// Optional replacement for group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Optional replacement for notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Optional replacement for start.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    /// Optional replacement for end.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
    /// Optional replacement for timezone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<i8>,
    /// Optional replacement for color.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// Optional replacement for exercise data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ActivityPatch {
    /// Returns true when no fields are set.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Applies this patch in place to `activity`.
    pub fn apply_to(&self, activity: &mut Activity) {
        if let Some(v) = &self.title {
            activity.title = v.clone();
        }
        if let Some(v) = self.variant {
            activity.variant = v;
        }
        if let Some(v) = &self.group {
            activity.group = Some(v.clone());
        }
        if let Some(v) = &self.notes {
            activity.notes = Some(v.clone());
        }
        if let Some(v) = self.start {
            activity.start = v;
        }
        if let Some(v) = self.end {
            activity.end = v;
        }
        if let Some(v) = self.timezone {
            activity.timezone = v;
        }
        if let Some(v) = &self.color {
            activity.color = Some(v.clone());
        }
        if let Some(v) = &self.data {
            activity.data = Some(v.clone());
        }
    }
}
