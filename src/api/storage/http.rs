//! HTTP requests, their child collections, deltas and version snapshots.

use super::memory::{BULK_CHUNK, Tables, insert_unique, replace_existing, require};
use super::ordering::cmp_order;
use super::StorageError;
use crate::ids::Id;
use crate::models::{
    DeltaChild, FileEntry, Http, HttpAssert, HttpBodyRaw, HttpKeyValue, HttpVersion,
    KeyValueKind, Node, NodeConfig,
};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Rows removed or rewritten by [`Tables::delete_http`].
#[derive(Debug, Default)]
pub struct HttpCascade {
    /// The request, its deltas and their snapshots, in id order.
    pub http: Vec<Id>,
    pub key_values: Vec<HttpKeyValue>,
    pub body_raw: Vec<Id>,
    pub asserts: Vec<Id>,
    pub versions: Vec<Id>,
    pub responses: Vec<Id>,
    pub response_headers: Vec<Id>,
    pub response_asserts: Vec<Id>,
    pub files: Vec<FileEntry>,
    /// Request nodes whose `http_id` was cleared.
    pub nodes: Vec<Node>,
}

/// Ids of the rows matching `pred`, in id order.
fn matching_ids<T>(table: &BTreeMap<Id, T>, pred: impl Fn(&T) -> bool) -> Vec<Id> {
    table
        .iter()
        .filter(|(_, row)| pred(row))
        .map(|(id, _)| *id)
        .collect()
}

/// Removes the rows matching `pred` and returns their ids.
fn take_ids<T>(table: &mut BTreeMap<Id, T>, pred: impl Fn(&T) -> bool) -> Vec<Id> {
    let doomed = matching_ids(table, pred);
    for id in &doomed {
        table.remove(id);
    }
    doomed
}

/// Removes and returns the rows matching `pred`.
fn take_where<T>(table: &mut BTreeMap<Id, T>, pred: impl Fn(&T) -> bool) -> Vec<T> {
    matching_ids(table, pred)
        .into_iter()
        .filter_map(|id| table.remove(&id))
        .collect()
}

/// Checks the base/delta invariants of a child row against its owner and parent.
fn check_child<C: DeltaChild>(
    http: &BTreeMap<Id, Http>,
    table: &BTreeMap<Id, C>,
    row: &C,
    entity: &str,
) -> Result<(), StorageError> {
    let owner = http.get(&row.http_id()).ok_or_else(|| {
        StorageError::referential(entity, format!("http {} does not exist", row.http_id()))
    })?;

    if !row.is_delta() {
        if row.parent_id().is_some() || row.has_shadow() {
            return Err(StorageError::invalid(
                entity,
                "base row carries delta columns",
            ));
        }
        return Ok(());
    }

    if !owner.is_delta {
        return Err(StorageError::invalid(
            entity,
            "override rows belong to delta requests",
        ));
    }
    let parent_id = row
        .parent_id()
        .ok_or_else(|| StorageError::invalid(entity, "override row without parent"))?;
    let parent = table.get(&parent_id).ok_or_else(|| {
        StorageError::referential(entity, format!("parent {} does not exist", parent_id))
    })?;
    if parent.is_delta() {
        return Err(StorageError::invalid(entity, "parent is itself an override"));
    }
    if !parent.same_kind(row) {
        return Err(StorageError::invalid(entity, "parent is of another kind"));
    }
    if Some(parent.http_id()) != owner.parent_http_id {
        return Err(StorageError::invalid(
            entity,
            "parent does not belong to the base request",
        ));
    }
    if table.values().any(|c| {
        c.id() != row.id() && c.http_id() == row.http_id() && c.parent_id() == Some(parent_id)
    }) {
        return Err(StorageError::conflict(
            entity,
            format!("{} is already overridden", parent_id),
        ));
    }
    Ok(())
}

fn sorted<T: Clone>(rows: impl Iterator<Item = T>, key: impl Fn(&T) -> (f64, Id)) -> Vec<T> {
    let mut out: Vec<T> = rows.collect();
    out.sort_by(|a, b| cmp_order(key(a), key(b)));
    out
}

impl Tables {
    pub fn get_http(&self, id: Id) -> Option<Http> {
        self.http.get(&id).cloned()
    }

    /// Base requests of a workspace in insertion order.
    pub fn list_http(&self, workspace_id: Id) -> Vec<Http> {
        self.http
            .values()
            .filter(|h| h.workspace_id == workspace_id && !h.is_delta && !h.is_version)
            .cloned()
            .collect()
    }

    pub fn list_deltas(&self, base_id: Id) -> Vec<Http> {
        self.http
            .values()
            .filter(|h| h.is_delta && h.parent_http_id == Some(base_id))
            .cloned()
            .collect()
    }

    pub fn find_base_by_method_url(&self, workspace_id: Id, method: &str, url: &str) -> Option<Http> {
        self.http
            .values()
            .find(|h| {
                h.workspace_id == workspace_id
                    && !h.is_delta
                    && !h.is_version
                    && h.method.eq_ignore_ascii_case(method)
                    && h.url == url
            })
            .cloned()
    }

    pub fn create_http(&mut self, http: Http) -> Result<(), StorageError> {
        require(&self.workspaces, http.workspace_id, "http", "workspace")?;
        if let Some(folder_id) = http.folder_id {
            require(&self.files, folder_id, "http", "folder")?;
        }
        self.check_http(&http)?;
        insert_unique(&mut self.http, http.id, http, "http")
    }

    pub fn create_http_bulk(&mut self, rows: Vec<Http>) -> Result<(), StorageError> {
        for chunk in rows.chunks(BULK_CHUNK) {
            for http in chunk {
                self.create_http(http.clone())?;
            }
        }
        Ok(())
    }

    pub fn update_http(&mut self, http: Http) -> Result<(), StorageError> {
        match self.http.get(&http.id) {
            Some(existing) if existing.is_version => {
                return Err(StorageError::invalid("http", "snapshots are read-only"));
            }
            Some(existing) if existing.is_delta != http.is_delta => {
                return Err(StorageError::invalid("http", "cannot change delta marker"));
            }
            _ => {}
        }
        self.check_http(&http)?;
        replace_existing(&mut self.http, http.id, http, "http")
    }

    fn check_http(&self, http: &Http) -> Result<(), StorageError> {
        if !http.is_delta {
            if http.parent_http_id.is_some() || http.has_delta_fields() {
                return Err(StorageError::invalid("http", "base row carries delta columns"));
            }
            return Ok(());
        }
        let parent_id = http
            .parent_http_id
            .ok_or_else(|| StorageError::invalid("http", "delta without parent"))?;
        match self.http.get(&parent_id) {
            None => Err(StorageError::referential(
                "http",
                format!("parent {} does not exist", parent_id),
            )),
            Some(parent) if parent.is_delta || parent.is_version => Err(StorageError::invalid(
                "http",
                "delta parent must be a base request",
            )),
            Some(parent) if parent.workspace_id != http.workspace_id => Err(
                StorageError::invalid("http", "delta parent is in another workspace"),
            ),
            Some(_) => Ok(()),
        }
    }

    /// Delete a request with its deltas, children, snapshots, responses and tree entries.
    /// Returns the ids of every removed request row.
    /// Removes a request with its deltas, snapshots, child rows, responses and tree
    /// entries, and detaches request nodes that pointed at any of them.
    pub fn delete_http(&mut self, id: Id) -> Result<HttpCascade, StorageError> {
        if !self.http.contains_key(&id) {
            return Err(StorageError::not_found("http", id));
        }
        let mut doomed: HashSet<Id> = HashSet::from([id]);
        doomed.extend(
            self.http
                .values()
                .filter(|h| h.parent_http_id == Some(id))
                .map(|h| h.id),
        );
        let snapshots: Vec<Id> = self
            .versions
            .values()
            .filter(|v| doomed.contains(&v.http_id))
            .map(|v| v.snapshot_id)
            .collect();
        doomed.extend(snapshots);

        let mut cascade = HttpCascade {
            key_values: take_where(&mut self.key_values, |c| doomed.contains(&c.http_id)),
            body_raw: take_ids(&mut self.body_raw, |c| doomed.contains(&c.http_id)),
            asserts: take_ids(&mut self.asserts, |c| doomed.contains(&c.http_id)),
            versions: take_ids(&mut self.versions, |v| {
                doomed.contains(&v.http_id) || doomed.contains(&v.snapshot_id)
            }),
            ..HttpCascade::default()
        };

        cascade.responses = take_ids(&mut self.responses, |r| {
            doomed.contains(&r.http_id) || doomed.contains(&r.snapshot_id)
        });
        let responses: HashSet<Id> = cascade.responses.iter().copied().collect();
        cascade.response_headers = take_ids(&mut self.response_headers, |h| {
            responses.contains(&h.response_id)
        });
        cascade.response_asserts = take_ids(&mut self.response_asserts, |a| {
            responses.contains(&a.response_id)
        });

        cascade.files = take_where(&mut self.files, |f| {
            f.content_id.is_some_and(|c| doomed.contains(&c))
        });
        for node in self.nodes.values_mut() {
            if let NodeConfig::Request { http_id, .. } = &mut node.config {
                if http_id.is_some_and(|h| doomed.contains(&h)) {
                    *http_id = None;
                    cascade.nodes.push(node.clone());
                }
            }
        }

        let mut removed: Vec<Id> = doomed.into_iter().collect();
        removed.sort();
        for http_id in &removed {
            self.http.remove(http_id);
        }
        cascade.http = removed;
        Ok(cascade)
    }

    pub fn get_key_value(&self, id: Id) -> Option<HttpKeyValue> {
        self.key_values.get(&id).cloned()
    }

    /// Rows of one collection on one request, by display order.
    pub fn list_key_values(&self, http_id: Id, kind: KeyValueKind) -> Vec<HttpKeyValue> {
        sorted(
            self.key_values
                .values()
                .filter(|kv| kv.http_id == http_id && kv.kind == kind)
                .cloned(),
            |kv| (kv.display_order, kv.id),
        )
    }

    /// Bulk hydration: rows of one collection keyed by owning request.
    pub fn key_values_by_http(
        &self,
        http_ids: &[Id],
        kind: KeyValueKind,
    ) -> HashMap<Id, Vec<HttpKeyValue>> {
        http_ids
            .iter()
            .map(|id| (*id, self.list_key_values(*id, kind)))
            .collect()
    }

    pub fn find_key_value_override(&self, delta_http_id: Id, parent_id: Id) -> Option<HttpKeyValue> {
        self.key_values
            .values()
            .find(|kv| kv.http_id == delta_http_id && kv.parent_id == Some(parent_id))
            .cloned()
    }

    pub fn create_key_value(&mut self, row: HttpKeyValue) -> Result<(), StorageError> {
        check_child(&self.http, &self.key_values, &row, "key_value")?;
        insert_unique(&mut self.key_values, row.id, row, "key_value")
    }

    pub fn create_key_values(&mut self, rows: Vec<HttpKeyValue>) -> Result<(), StorageError> {
        for chunk in rows.chunks(BULK_CHUNK) {
            for row in chunk {
                self.create_key_value(row.clone())?;
            }
        }
        Ok(())
    }

    pub fn update_key_value(&mut self, row: HttpKeyValue) -> Result<(), StorageError> {
        if !self.key_values.contains_key(&row.id) {
            return Err(StorageError::not_found("key_value", row.id));
        }
        check_child(&self.http, &self.key_values, &row, "key_value")?;
        replace_existing(&mut self.key_values, row.id, row, "key_value")
    }

    /// Deletes the row and every override pointing at it.
    pub fn delete_key_value(&mut self, id: Id) -> Result<Vec<HttpKeyValue>, StorageError> {
        let row = self
            .key_values
            .remove(&id)
            .ok_or_else(|| StorageError::not_found("key_value", id))?;
        let overrides: Vec<Id> = self
            .key_values
            .values()
            .filter(|kv| kv.parent_id == Some(id))
            .map(|kv| kv.id)
            .collect();
        let mut removed = vec![row];
        removed.extend(overrides.iter().filter_map(|oid| self.key_values.remove(oid)));
        Ok(removed)
    }

    pub fn get_body_raw(&self, id: Id) -> Option<HttpBodyRaw> {
        self.body_raw.get(&id).cloned()
    }

    /// The raw body row owned by `http_id`, base or override.
    pub fn body_raw_for(&self, http_id: Id) -> Option<HttpBodyRaw> {
        self.body_raw.values().find(|b| b.http_id == http_id).cloned()
    }

    pub fn create_body_raw(&mut self, row: HttpBodyRaw) -> Result<(), StorageError> {
        check_child(&self.http, &self.body_raw, &row, "body_raw")?;
        if self.body_raw.values().any(|b| b.http_id == row.http_id) {
            return Err(StorageError::conflict(
                "body_raw",
                format!("http {} already has a body", row.http_id),
            ));
        }
        insert_unique(&mut self.body_raw, row.id, row, "body_raw")
    }

    pub fn update_body_raw(&mut self, row: HttpBodyRaw) -> Result<(), StorageError> {
        if !self.body_raw.contains_key(&row.id) {
            return Err(StorageError::not_found("body_raw", row.id));
        }
        check_child(&self.http, &self.body_raw, &row, "body_raw")?;
        replace_existing(&mut self.body_raw, row.id, row, "body_raw")
    }

    pub fn delete_body_raw(&mut self, id: Id) -> Result<Vec<HttpBodyRaw>, StorageError> {
        let row = self
            .body_raw
            .remove(&id)
            .ok_or_else(|| StorageError::not_found("body_raw", id))?;
        let mut removed = vec![row];
        let overrides: Vec<Id> = self
            .body_raw
            .values()
            .filter(|b| b.parent_id == Some(id))
            .map(|b| b.id)
            .collect();
        removed.extend(overrides.iter().filter_map(|oid| self.body_raw.remove(oid)));
        Ok(removed)
    }

    pub fn get_assert(&self, id: Id) -> Option<HttpAssert> {
        self.asserts.get(&id).cloned()
    }

    pub fn list_asserts(&self, http_id: Id) -> Vec<HttpAssert> {
        sorted(
            self.asserts.values().filter(|a| a.http_id == http_id).cloned(),
            |a| (a.display_order, a.id),
        )
    }

    pub fn find_assert_override(&self, delta_http_id: Id, parent_id: Id) -> Option<HttpAssert> {
        self.asserts
            .values()
            .find(|a| a.http_id == delta_http_id && a.parent_id == Some(parent_id))
            .cloned()
    }

    pub fn create_assert(&mut self, row: HttpAssert) -> Result<(), StorageError> {
        check_child(&self.http, &self.asserts, &row, "assert")?;
        insert_unique(&mut self.asserts, row.id, row, "assert")
    }

    pub fn update_assert(&mut self, row: HttpAssert) -> Result<(), StorageError> {
        if !self.asserts.contains_key(&row.id) {
            return Err(StorageError::not_found("assert", row.id));
        }
        check_child(&self.http, &self.asserts, &row, "assert")?;
        replace_existing(&mut self.asserts, row.id, row, "assert")
    }

    pub fn delete_assert(&mut self, id: Id) -> Result<Vec<HttpAssert>, StorageError> {
        let row = self
            .asserts
            .remove(&id)
            .ok_or_else(|| StorageError::not_found("assert", id))?;
        let overrides: Vec<Id> = self
            .asserts
            .values()
            .filter(|a| a.parent_id == Some(id))
            .map(|a| a.id)
            .collect();
        let mut removed = vec![row];
        removed.extend(overrides.iter().filter_map(|oid| self.asserts.remove(oid)));
        Ok(removed)
    }

    pub fn create_version(&mut self, version: HttpVersion) -> Result<(), StorageError> {
        require(&self.http, version.http_id, "version", "http")?;
        require(&self.http, version.snapshot_id, "version", "snapshot")?;
        insert_unique(&mut self.versions, version.id, version, "version")
    }

    /// Snapshots taken of `http_id`, newest first.
    pub fn list_versions(&self, http_id: Id) -> Vec<HttpVersion> {
        let mut out: Vec<HttpVersion> = self
            .versions
            .values()
            .filter(|v| v.http_id == http_id)
            .cloned()
            .collect();
        out.reverse();
        out
    }
}
