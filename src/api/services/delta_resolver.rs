//! Delta resolution, version snapshots and on-demand overrides.
//!
//! A delta request inherits every attribute of its base that it does not shadow.
//! [`resolve`] produces the merged view; [`snapshot`] freezes a merged view into a new
//! `is_version` row with copied children. The base row is never written here.

use crate::ids::Id;
use crate::models::{
    BodyKind, DeltaChild, Http, HttpAssert, HttpBodyRaw, HttpKeyValue, HttpVersion,
    KeyValueKind,
};
use crate::storage::{StorageError, Tables};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolveError {
    #[error("http {0} not found")]
    NotFound(Id),
    #[error("delta {delta_id} points at missing parent {parent_id}")]
    OrphanDelta { delta_id: Id, parent_id: Id },
    #[error("delta {id} is inconsistent: {reason}")]
    InconsistentDelta { id: Id, reason: String },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

fn inconsistent(id: Id, reason: impl Into<String>) -> ResolveError {
    ResolveError::InconsistentDelta {
        id,
        reason: reason.into(),
    }
}

/// A request with every child collection, deltas applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedHttp {
    pub http: Http,
    pub headers: Vec<HttpKeyValue>,
    pub params: Vec<HttpKeyValue>,
    pub form: Vec<HttpKeyValue>,
    pub url_encoded: Vec<HttpKeyValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_raw: Option<HttpBodyRaw>,
    pub asserts: Vec<HttpAssert>,
}

impl ResolvedHttp {
    pub fn key_values(&self, kind: KeyValueKind) -> &[HttpKeyValue] {
        match kind {
            KeyValueKind::Header => &self.headers,
            KeyValueKind::SearchParam => &self.params,
            KeyValueKind::BodyForm => &self.form,
            KeyValueKind::BodyUrlEncoded => &self.url_encoded,
        }
    }

    fn key_values_mut(&mut self, kind: KeyValueKind) -> &mut Vec<HttpKeyValue> {
        match kind {
            KeyValueKind::Header => &mut self.headers,
            KeyValueKind::SearchParam => &mut self.params,
            KeyValueKind::BodyForm => &mut self.form,
            KeyValueKind::BodyUrlEncoded => &mut self.url_encoded,
        }
    }
}

/// Layer `delta_rows` over `base_rows`.
///
/// Overrides merge in place (or drop the child when they disable it); delta-context
/// additions are appended in their own order.
fn merge_children<C: DeltaChild>(
    delta_id: Id,
    base_rows: Vec<C>,
    delta_rows: Vec<C>,
) -> Result<Vec<C>, ResolveError> {
    let base_ids: HashSet<Id> = base_rows.iter().map(DeltaChild::id).collect();
    let mut overrides: HashMap<Id, C> = HashMap::new();
    let mut additions = Vec::new();

    for row in delta_rows {
        if !row.is_delta() {
            additions.push(row);
            continue;
        }
        let parent_id = row
            .parent_id()
            .ok_or_else(|| inconsistent(delta_id, format!("override {} has no parent", row.id())))?;
        if !base_ids.contains(&parent_id) {
            return Err(inconsistent(
                delta_id,
                format!("override {} targets {} outside the base", row.id(), parent_id),
            ));
        }
        overrides.insert(parent_id, row);
    }

    let mut merged = Vec::with_capacity(base_rows.len() + additions.len());
    for base in base_rows {
        match overrides.get(&base.id()) {
            Some(over) if over.disables() => {}
            Some(over) => {
                if !base.same_kind(over) {
                    return Err(inconsistent(delta_id, "override of another kind"));
                }
                merged.push(base.merged_with(over));
            }
            None => merged.push(base),
        }
    }
    merged.extend(additions);
    Ok(merged)
}

fn own_children(tables: &Tables, http: Http) -> ResolvedHttp {
    ResolvedHttp {
        headers: tables.list_key_values(http.id, KeyValueKind::Header),
        params: tables.list_key_values(http.id, KeyValueKind::SearchParam),
        form: tables.list_key_values(http.id, KeyValueKind::BodyForm),
        url_encoded: tables.list_key_values(http.id, KeyValueKind::BodyUrlEncoded),
        body_raw: tables.body_raw_for(http.id),
        asserts: tables.list_asserts(http.id),
        http,
    }
}

/// Merged view of `id`. Reads only.
pub fn resolve(tables: &Tables, id: Id) -> Result<ResolvedHttp, ResolveError> {
    let http = tables.get_http(id).ok_or(ResolveError::NotFound(id))?;
    if !http.is_delta {
        return Ok(own_children(tables, http));
    }

    let parent_id = http
        .parent_http_id
        .ok_or_else(|| inconsistent(id, "delta without parent"))?;
    let base = tables.get_http(parent_id).ok_or(ResolveError::OrphanDelta {
        delta_id: id,
        parent_id,
    })?;
    if base.is_delta {
        return Err(inconsistent(id, "parent is itself a delta"));
    }

    let mut resolved = ResolvedHttp {
        http: base.merged_with(&http),
        headers: Vec::new(),
        params: Vec::new(),
        form: Vec::new(),
        url_encoded: Vec::new(),
        body_raw: None,
        asserts: merge_children(id, tables.list_asserts(base.id), tables.list_asserts(id))?,
    };
    for kind in KeyValueKind::ALL {
        *resolved.key_values_mut(kind) = merge_children(
            id,
            tables.list_key_values(base.id, kind),
            tables.list_key_values(id, kind),
        )?;
    }
    resolved.body_raw = merge_children(
        id,
        tables.body_raw_for(base.id).into_iter().collect(),
        tables.body_raw_for(id).into_iter().collect(),
    )?
    .into_iter()
    .next();

    debug!("Resolved delta {} over base {}", id, base.id);
    Ok(resolved)
}

/// Rows written by [`snapshot`].
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotRows {
    pub version: HttpVersion,
    pub http: Http,
    pub key_values: Vec<HttpKeyValue>,
    pub body_raw: Option<HttpBodyRaw>,
    pub asserts: Vec<HttpAssert>,
}

/// Freeze `resolved` into a new version row linked to the live request.
pub fn snapshot(
    tables: &mut Tables,
    resolved: &ResolvedHttp,
    created_by: Option<Id>,
) -> Result<SnapshotRows, StorageError> {
    let live_id = resolved.http.id;
    let snapshot_id = Id::new();

    let mut http = Http::new(
        snapshot_id,
        resolved.http.workspace_id,
        &resolved.http.name,
        &resolved.http.method,
        &resolved.http.url,
    );
    http.body_kind = resolved.http.body_kind;
    http.description = resolved.http.description.clone();
    http.is_version = true;
    tables.create_http(http.clone())?;

    let mut key_values = Vec::new();
    for kind in KeyValueKind::ALL {
        key_values.extend(
            resolved
                .key_values(kind)
                .iter()
                .map(|kv| kv.frozen_copy(Id::new(), snapshot_id)),
        );
    }
    tables.create_key_values(key_values.clone())?;

    let body_raw = resolved
        .body_raw
        .as_ref()
        .map(|b| b.frozen_copy(Id::new(), snapshot_id));
    if let Some(body) = &body_raw {
        tables.create_body_raw(body.clone())?;
    }

    let asserts: Vec<HttpAssert> = resolved
        .asserts
        .iter()
        .map(|a| a.frozen_copy(Id::new(), snapshot_id))
        .collect();
    for assert in &asserts {
        tables.create_assert(assert.clone())?;
    }

    let ordinal = tables.list_versions(live_id).len() + 1;
    let version = HttpVersion {
        id: Id::new(),
        http_id: live_id,
        snapshot_id,
        name: format!("{} #{}", resolved.http.name, ordinal),
        created_by,
        created_at: Utc::now(),
    };
    tables.create_version(version.clone())?;

    Ok(SnapshotRows {
        version,
        http,
        key_values,
        body_raw,
        asserts,
    })
}

/// Scalar overrides on a delta request. `reset` clears shadow columns by name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeltaHttpPatch {
    pub name: Option<String>,
    pub url: Option<String>,
    pub method: Option<String>,
    pub body_kind: Option<BodyKind>,
    pub description: Option<String>,
    #[serde(default)]
    pub reset: Vec<String>,
}

/// Field overrides on one child; unset fields keep inheriting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChildPatch {
    pub key: Option<String>,
    pub value: Option<String>,
    pub enabled: Option<bool>,
    pub description: Option<String>,
    pub expression: Option<String>,
    pub data: Option<String>,
}

fn load_delta(tables: &Tables, delta_id: Id) -> Result<(Http, Http), ResolveError> {
    let delta = tables
        .get_http(delta_id)
        .ok_or(ResolveError::NotFound(delta_id))?;
    if !delta.is_delta {
        return Err(inconsistent(delta_id, "not a delta request"));
    }
    let parent_id = delta
        .parent_http_id
        .ok_or_else(|| inconsistent(delta_id, "delta without parent"))?;
    let base = tables.get_http(parent_id).ok_or(ResolveError::OrphanDelta {
        delta_id,
        parent_id,
    })?;
    Ok((delta, base))
}

/// Create an empty delta over a base request.
pub fn create_delta_http(
    tables: &mut Tables,
    base_id: Id,
    name: Option<String>,
) -> Result<Http, ResolveError> {
    let base = tables
        .get_http(base_id)
        .ok_or(ResolveError::NotFound(base_id))?;
    if base.is_delta || base.is_version {
        return Err(inconsistent(base_id, "deltas can only extend base requests"));
    }
    let mut delta = Http::new_delta(Id::new(), &base);
    delta.delta_name = name;
    tables.create_http(delta.clone())?;
    Ok(delta)
}

/// Apply scalar overrides to a delta request.
pub fn update_delta_http(
    tables: &mut Tables,
    delta_id: Id,
    patch: DeltaHttpPatch,
) -> Result<Http, ResolveError> {
    let (mut delta, _) = load_delta(tables, delta_id)?;
    if let Some(v) = patch.name {
        delta.delta_name = Some(v);
    }
    if let Some(v) = patch.url {
        delta.delta_url = Some(v);
    }
    if let Some(v) = patch.method {
        delta.delta_method = Some(v.to_uppercase());
    }
    if let Some(v) = patch.body_kind {
        delta.delta_body_kind = Some(v);
    }
    if let Some(v) = patch.description {
        delta.delta_description = Some(v);
    }
    for field in &patch.reset {
        match field.as_str() {
            "name" => delta.delta_name = None,
            "url" => delta.delta_url = None,
            "method" => delta.delta_method = None,
            "body_kind" => delta.delta_body_kind = None,
            "description" => delta.delta_description = None,
            other => {
                return Err(StorageError::invalid("http", format!("unknown field {}", other)).into());
            }
        }
    }
    delta.updated_at = Utc::now();
    tables.update_http(delta.clone())?;
    Ok(delta)
}

/// Ensure `delta_id` overrides key/value `base_child_id`, writing only the given fields.
/// Returns the override row and whether it was created.
pub fn override_key_value(
    tables: &mut Tables,
    delta_id: Id,
    base_child_id: Id,
    patch: &ChildPatch,
) -> Result<(HttpKeyValue, bool), ResolveError> {
    let (_, base) = load_delta(tables, delta_id)?;
    let child = tables
        .get_key_value(base_child_id)
        .ok_or(ResolveError::NotFound(base_child_id))?;
    if child.is_delta || child.http_id != base.id {
        return Err(inconsistent(delta_id, "child does not belong to the base request"));
    }
    let (mut row, created) = match tables.find_key_value_override(delta_id, base_child_id) {
        Some(existing) => (existing, false),
        None => (HttpKeyValue::new_override(Id::new(), delta_id, &child), true),
    };
    if let Some(v) = &patch.key {
        row.delta_key = Some(v.clone());
    }
    if let Some(v) = &patch.value {
        row.delta_value = Some(v.clone());
    }
    if let Some(v) = patch.enabled {
        row.delta_enabled = Some(v);
    }
    if let Some(v) = &patch.description {
        row.delta_description = Some(v.clone());
    }
    if created {
        tables.create_key_value(row.clone())?;
    } else {
        tables.update_key_value(row.clone())?;
    }
    Ok((row, created))
}

pub fn override_assert(
    tables: &mut Tables,
    delta_id: Id,
    base_child_id: Id,
    patch: &ChildPatch,
) -> Result<(HttpAssert, bool), ResolveError> {
    let (_, base) = load_delta(tables, delta_id)?;
    let child = tables
        .get_assert(base_child_id)
        .ok_or(ResolveError::NotFound(base_child_id))?;
    if child.is_delta || child.http_id != base.id {
        return Err(inconsistent(delta_id, "assertion does not belong to the base request"));
    }
    let (mut row, created) = match tables.find_assert_override(delta_id, base_child_id) {
        Some(existing) => (existing, false),
        None => (HttpAssert::new_override(Id::new(), delta_id, &child), true),
    };
    if let Some(v) = &patch.expression {
        row.delta_expression = Some(v.clone());
    }
    if let Some(v) = patch.enabled {
        row.delta_enabled = Some(v);
    }
    if let Some(v) = &patch.description {
        row.delta_description = Some(v.clone());
    }
    if created {
        tables.create_assert(row.clone())?;
    } else {
        tables.update_assert(row.clone())?;
    }
    Ok((row, created))
}

/// Override the base raw body on a delta.
pub fn override_body_raw(
    tables: &mut Tables,
    delta_id: Id,
    data: &str,
) -> Result<(HttpBodyRaw, bool), ResolveError> {
    let (_, base) = load_delta(tables, delta_id)?;
    let base_body = tables.body_raw_for(base.id);
    match (tables.body_raw_for(delta_id), base_body) {
        (Some(mut existing), _) => {
            if existing.is_delta {
                existing.delta_data = Some(data.to_string());
            } else {
                existing.data = data.to_string();
            }
            tables.update_body_raw(existing.clone())?;
            Ok((existing, false))
        }
        (None, Some(base_body)) => {
            let row = HttpBodyRaw {
                id: Id::new(),
                http_id: delta_id,
                data: base_body.data.clone(),
                is_delta: true,
                parent_id: Some(base_body.id),
                delta_data: Some(data.to_string()),
            };
            tables.create_body_raw(row.clone())?;
            Ok((row, true))
        }
        (None, None) => {
            let row = HttpBodyRaw::new(Id::new(), delta_id, data);
            tables.create_body_raw(row.clone())?;
            Ok((row, true))
        }
    }
}
