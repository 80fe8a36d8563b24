//! HTTP request definitions and their child collections.
//!
//! Every row can be a base or a delta. Delta rows point at the base row they override
//! through `parent_*` and carry the overridden values in `delta_*` shadow columns; an
//! unset shadow column inherits the base value.

use super::enums::{BodyKind, KeyValueKind};
use crate::ids::Id;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Http {
    pub id: Id,
    pub workspace_id: Id,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<Id>,
    pub name: String,
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub body_kind: BodyKind,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_delta: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_http_id: Option<Id>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta_method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta_body_kind: Option<BodyKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta_description: Option<String>,
    /// Frozen execution snapshot; never edited after creation.
    #[serde(default)]
    pub is_version: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Http {
    pub fn new(id: Id, workspace_id: Id, name: &str, method: &str, url: &str) -> Self {
        let now = Utc::now();
        Self {
            id,
            workspace_id,
            folder_id: None,
            name: name.to_string(),
            url: url.to_string(),
            method: method.to_uppercase(),
            body_kind: BodyKind::None,
            description: String::new(),
            is_delta: false,
            parent_http_id: None,
            delta_name: None,
            delta_url: None,
            delta_method: None,
            delta_body_kind: None,
            delta_description: None,
            is_version: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// An empty delta over `base`: inherits everything.
    pub fn new_delta(id: Id, base: &Http) -> Self {
        let mut delta = Http::new(id, base.workspace_id, &base.name, &base.method, &base.url);
        delta.folder_id = base.folder_id;
        delta.body_kind = base.body_kind;
        delta.description = base.description.clone();
        delta.is_delta = true;
        delta.parent_http_id = Some(base.id);
        delta
    }

    pub fn has_delta_fields(&self) -> bool {
        self.delta_name.is_some()
            || self.delta_url.is_some()
            || self.delta_method.is_some()
            || self.delta_body_kind.is_some()
            || self.delta_description.is_some()
    }

    /// Scalars of `delta` layered over `self`.
    pub fn merged_with(&self, delta: &Http) -> Http {
        let mut merged = delta.clone();
        merged.name = delta.delta_name.clone().unwrap_or_else(|| self.name.clone());
        merged.url = delta.delta_url.clone().unwrap_or_else(|| self.url.clone());
        merged.method = delta.delta_method.clone().unwrap_or_else(|| self.method.clone());
        merged.body_kind = delta.delta_body_kind.unwrap_or(self.body_kind);
        merged.description = delta
            .delta_description
            .clone()
            .unwrap_or_else(|| self.description.clone());
        merged.folder_id = self.folder_id;
        merged
    }
}

/// Behaviour shared by every child row that can be overridden by a delta.
pub trait DeltaChild: Clone {
    fn id(&self) -> Id;
    fn http_id(&self) -> Id;
    fn is_delta(&self) -> bool;
    fn parent_id(&self) -> Option<Id>;
    /// Any `delta_*` column populated.
    fn has_shadow(&self) -> bool;
    /// `self` is the base; returns base attributes overridden by `delta`.
    fn merged_with(&self, delta: &Self) -> Self;
    /// The override removes the child from the merged view.
    fn disables(&self) -> bool;
    /// Same collection as `other` (always true for single-kind tables).
    fn same_kind(&self, _other: &Self) -> bool {
        true
    }
    /// A plain (non-delta) copy under a new id and owner, used for snapshots.
    fn frozen_copy(&self, id: Id, http_id: Id) -> Self;
}

/// Header, search param, form field or url-encoded field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpKeyValue {
    pub id: Id,
    pub http_id: Id,
    pub kind: KeyValueKind,
    pub key: String,
    pub value: String,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub display_order: f64,
    #[serde(default)]
    pub is_delta: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Id>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta_description: Option<String>,
}

fn enabled_default() -> bool {
    true
}

impl HttpKeyValue {
    pub fn new(id: Id, http_id: Id, kind: KeyValueKind, key: &str, value: &str) -> Self {
        Self {
            id,
            http_id,
            kind,
            key: key.to_string(),
            value: value.to_string(),
            enabled: true,
            description: String::new(),
            display_order: 0.0,
            is_delta: false,
            parent_id: None,
            delta_key: None,
            delta_value: None,
            delta_enabled: None,
            delta_description: None,
        }
    }

    /// An override row on `delta_http_id` for `base`, with no field overridden yet.
    pub fn new_override(id: Id, delta_http_id: Id, base: &HttpKeyValue) -> Self {
        let mut row = base.clone();
        row.id = id;
        row.http_id = delta_http_id;
        row.is_delta = true;
        row.parent_id = Some(base.id);
        row.delta_key = None;
        row.delta_value = None;
        row.delta_enabled = None;
        row.delta_description = None;
        row
    }
}

impl DeltaChild for HttpKeyValue {
    fn id(&self) -> Id {
        self.id
    }
    fn http_id(&self) -> Id {
        self.http_id
    }
    fn is_delta(&self) -> bool {
        self.is_delta
    }
    fn parent_id(&self) -> Option<Id> {
        self.parent_id
    }
    fn has_shadow(&self) -> bool {
        self.delta_key.is_some()
            || self.delta_value.is_some()
            || self.delta_enabled.is_some()
            || self.delta_description.is_some()
    }
    fn merged_with(&self, delta: &Self) -> Self {
        let mut merged = self.clone();
        if let Some(key) = &delta.delta_key {
            merged.key = key.clone();
        }
        if let Some(value) = &delta.delta_value {
            merged.value = value.clone();
        }
        if let Some(enabled) = delta.delta_enabled {
            merged.enabled = enabled;
        }
        if let Some(description) = &delta.delta_description {
            merged.description = description.clone();
        }
        merged
    }
    fn disables(&self) -> bool {
        self.delta_enabled == Some(false)
    }
    fn same_kind(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
    fn frozen_copy(&self, id: Id, http_id: Id) -> Self {
        let mut copy = HttpKeyValue::new(id, http_id, self.kind, &self.key, &self.value);
        copy.enabled = self.enabled;
        copy.description = self.description.clone();
        copy.display_order = self.display_order;
        copy
    }
}

/// Raw request body; at most one per request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpBodyRaw {
    pub id: Id,
    pub http_id: Id,
    pub data: String,
    #[serde(default)]
    pub is_delta: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Id>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta_data: Option<String>,
}

impl HttpBodyRaw {
    pub fn new(id: Id, http_id: Id, data: &str) -> Self {
        Self {
            id,
            http_id,
            data: data.to_string(),
            is_delta: false,
            parent_id: None,
            delta_data: None,
        }
    }
}

impl DeltaChild for HttpBodyRaw {
    fn id(&self) -> Id {
        self.id
    }
    fn http_id(&self) -> Id {
        self.http_id
    }
    fn is_delta(&self) -> bool {
        self.is_delta
    }
    fn parent_id(&self) -> Option<Id> {
        self.parent_id
    }
    fn has_shadow(&self) -> bool {
        self.delta_data.is_some()
    }
    fn merged_with(&self, delta: &Self) -> Self {
        let mut merged = self.clone();
        if let Some(data) = &delta.delta_data {
            merged.data = data.clone();
        }
        merged
    }
    fn disables(&self) -> bool {
        false
    }
    fn frozen_copy(&self, id: Id, http_id: Id) -> Self {
        HttpBodyRaw::new(id, http_id, &self.data)
    }
}

/// Assertion expression evaluated against the response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpAssert {
    pub id: Id,
    pub http_id: Id,
    pub expression: String,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub display_order: f64,
    #[serde(default)]
    pub is_delta: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Id>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta_expression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta_description: Option<String>,
}

impl HttpAssert {
    pub fn new(id: Id, http_id: Id, expression: &str) -> Self {
        Self {
            id,
            http_id,
            expression: expression.to_string(),
            enabled: true,
            description: String::new(),
            display_order: 0.0,
            is_delta: false,
            parent_id: None,
            delta_expression: None,
            delta_enabled: None,
            delta_description: None,
        }
    }

    pub fn new_override(id: Id, delta_http_id: Id, base: &HttpAssert) -> Self {
        let mut row = base.clone();
        row.id = id;
        row.http_id = delta_http_id;
        row.is_delta = true;
        row.parent_id = Some(base.id);
        row.delta_expression = None;
        row.delta_enabled = None;
        row.delta_description = None;
        row
    }
}

impl DeltaChild for HttpAssert {
    fn id(&self) -> Id {
        self.id
    }
    fn http_id(&self) -> Id {
        self.http_id
    }
    fn is_delta(&self) -> bool {
        self.is_delta
    }
    fn parent_id(&self) -> Option<Id> {
        self.parent_id
    }
    fn has_shadow(&self) -> bool {
        self.delta_expression.is_some()
            || self.delta_enabled.is_some()
            || self.delta_description.is_some()
    }
    fn merged_with(&self, delta: &Self) -> Self {
        let mut merged = self.clone();
        if let Some(expression) = &delta.delta_expression {
            merged.expression = expression.clone();
        }
        if let Some(enabled) = delta.delta_enabled {
            merged.enabled = enabled;
        }
        if let Some(description) = &delta.delta_description {
            merged.description = description.clone();
        }
        merged
    }
    fn disables(&self) -> bool {
        self.delta_enabled == Some(false)
    }
    fn frozen_copy(&self, id: Id, http_id: Id) -> Self {
        let mut copy = HttpAssert::new(id, http_id, &self.expression);
        copy.enabled = self.enabled;
        copy.description = self.description.clone();
        copy.display_order = self.display_order;
        copy
    }
}

/// Links a frozen snapshot back to the live request it was taken from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpVersion {
    pub id: Id,
    pub http_id: Id,
    pub snapshot_id: Id,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<Id>,
    pub created_at: DateTime<Utc>,
}
