use super::enums::{ContentKind, Role};
use crate::ids::Id;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: Id,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_env_id: Option<Id>,
    #[serde(default)]
    pub display_order: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workspace {
    pub fn new(id: Id, name: &str) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.to_string(),
            active_env_id: None,
            display_order: 0.0,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceMember {
    pub id: Id,
    pub workspace_id: Id,
    pub user_id: Id,
    pub role: Role,
}

/// Left-nav entry over folders, requests and flows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    pub id: Id,
    pub workspace_id: Id,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Id>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_id: Option<Id>,
    pub kind: ContentKind,
    pub name: String,
    #[serde(default)]
    pub display_order: f64,
}
