//! YAML workspace bundles.
//!
//! A bundle holds a workspace with its environments, folder tree, requests (children and
//! deltas included) and flows. Node positions are left out and recomputed on import.
//! Every list is written in a deterministic order, so exporting a workspace imported with
//! preserved ids reproduces the original document.

use crate::graph::{self, LayoutDirection};
use crate::ids::Id;
use crate::models::{
    BodyKind, ContentKind, Edge, EdgeHandle, Environment, FileEntry, Flow, FlowVariable, Http,
    HttpAssert, HttpBodyRaw, HttpKeyValue, KeyValueKind, Node, NodeConfig, Role, Variable,
    Workspace, WorkspaceMember,
};
use crate::storage::{StorageError, Tables};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing::info;

pub const BUNDLE_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum BundleError {
    #[error("invalid bundle: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("unsupported bundle version {0}")]
    UnsupportedVersion(u32),
    #[error("workspace not found: {0}")]
    WorkspaceNotFound(Id),
    #[error("invalid bundle: {0}")]
    Invalid(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

fn is_true(v: &bool) -> bool {
    *v
}

fn yes() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceBundle {
    pub version: u32,
    pub workspace: BundleWorkspace,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub environments: Vec<BundleEnvironment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub folders: Vec<BundleFolder>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requests: Vec<BundleRequest>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flows: Vec<BundleFlow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleWorkspace {
    pub id: Id,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_environment: Option<Id>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleEnvironment {
    pub id: Id,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<BundleVariable>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleVariable {
    pub id: Id,
    pub key: String,
    pub value: String,
    #[serde(default = "yes", skip_serializing_if = "is_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

/// Folders are listed parents first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleFolder {
    pub id: Id,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<Id>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleKeyValue {
    pub id: Id,
    pub key: String,
    pub value: String,
    #[serde(default = "yes", skip_serializing_if = "is_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<Id>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta_description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleBodyRaw {
    pub id: Id,
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<Id>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta_data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleAssert {
    pub id: Id,
    pub expression: String,
    #[serde(default = "yes", skip_serializing_if = "is_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<Id>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta_expression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta_description: Option<String>,
}

/// Child collections shared by base and delta requests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BundleChildren {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<BundleKeyValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<BundleKeyValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub body_form: Vec<BundleKeyValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub body_urlencoded: Vec<BundleKeyValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_raw: Option<BundleBodyRaw>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assertions: Vec<BundleAssert>,
}

impl BundleChildren {
    fn key_values(&self, kind: KeyValueKind) -> &[BundleKeyValue] {
        match kind {
            KeyValueKind::Header => &self.headers,
            KeyValueKind::SearchParam => &self.params,
            KeyValueKind::BodyForm => &self.body_form,
            KeyValueKind::BodyUrlEncoded => &self.body_urlencoded,
        }
    }

    fn key_values_mut(&mut self, kind: KeyValueKind) -> &mut Vec<BundleKeyValue> {
        match kind {
            KeyValueKind::Header => &mut self.headers,
            KeyValueKind::SearchParam => &mut self.params,
            KeyValueKind::BodyForm => &mut self.body_form,
            KeyValueKind::BodyUrlEncoded => &mut self.body_urlencoded,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleRequest {
    pub id: Id,
    pub name: String,
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub body_kind: BodyKind,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<Id>,
    #[serde(flatten)]
    pub children: BundleChildren,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deltas: Vec<BundleDelta>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleDelta {
    pub id: Id,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_kind: Option<BodyKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub children: BundleChildren,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleNode {
    pub id: Id,
    pub name: String,
    #[serde(flatten)]
    pub config: NodeConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleEdge {
    pub id: Id,
    pub source: Id,
    pub target: Id,
    #[serde(default)]
    pub handle: EdgeHandle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleFlow {
    pub id: Id,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<Id>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<Id>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<BundleVariable>,
    /// Breadth-first from the start node.
    #[serde(default)]
    pub nodes: Vec<BundleNode>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub edges: Vec<BundleEdge>,
}

fn export_key_value(row: &HttpKeyValue) -> BundleKeyValue {
    BundleKeyValue {
        id: row.id,
        key: row.key.clone(),
        value: row.value.clone(),
        enabled: row.enabled,
        description: row.description.clone(),
        parent: row.parent_id,
        delta_key: row.delta_key.clone(),
        delta_value: row.delta_value.clone(),
        delta_enabled: row.delta_enabled,
        delta_description: row.delta_description.clone(),
    }
}

fn export_children(tables: &Tables, http_id: Id) -> BundleChildren {
    let mut children = BundleChildren::default();
    for kind in KeyValueKind::ALL {
        *children.key_values_mut(kind) = tables
            .list_key_values(http_id, kind)
            .iter()
            .map(export_key_value)
            .collect();
    }
    children.body_raw = tables.body_raw_for(http_id).map(|b| BundleBodyRaw {
        id: b.id,
        data: b.data,
        parent: b.parent_id,
        delta_data: b.delta_data,
    });
    children.assertions = tables
        .list_asserts(http_id)
        .into_iter()
        .map(|a| BundleAssert {
            id: a.id,
            expression: a.expression,
            enabled: a.enabled,
            description: a.description,
            parent: a.parent_id,
            delta_expression: a.delta_expression,
            delta_enabled: a.delta_enabled,
            delta_description: a.delta_description,
        })
        .collect();
    children
}

fn export_folders(tables: &Tables, workspace_id: Id, parent: Option<Id>, out: &mut Vec<BundleFolder>) {
    for entry in tables.list_children(workspace_id, parent) {
        if entry.kind != ContentKind::Folder {
            continue;
        }
        out.push(BundleFolder {
            id: entry.id,
            name: entry.name.clone(),
            parent,
        });
        export_folders(tables, workspace_id, Some(entry.id), out);
    }
}

fn export_variables(rows: Vec<FlowVariable>) -> Vec<BundleVariable> {
    rows.into_iter()
        .map(|v| BundleVariable {
            id: v.id,
            key: v.key,
            value: v.value,
            enabled: v.enabled,
            description: v.description,
        })
        .collect()
}

/// Snapshot a workspace into a bundle.
pub fn export(tables: &Tables, workspace_id: Id) -> Result<WorkspaceBundle, BundleError> {
    let workspace = tables
        .get_workspace(workspace_id)
        .ok_or(BundleError::WorkspaceNotFound(workspace_id))?;

    let environments = tables
        .list_environments(workspace_id)
        .into_iter()
        .map(|env| BundleEnvironment {
            variables: tables
                .list_variables(env.id)
                .into_iter()
                .map(|v| BundleVariable {
                    id: v.id,
                    key: v.key,
                    value: v.value,
                    enabled: v.enabled,
                    description: v.description,
                })
                .collect(),
            id: env.id,
            name: env.name,
            description: env.description,
        })
        .collect();

    let mut folders = Vec::new();
    export_folders(tables, workspace_id, None, &mut folders);

    let requests = tables
        .list_http(workspace_id)
        .into_iter()
        .map(|http| BundleRequest {
            children: export_children(tables, http.id),
            deltas: tables
                .list_deltas(http.id)
                .into_iter()
                .map(|d| BundleDelta {
                    children: export_children(tables, d.id),
                    id: d.id,
                    name: d.delta_name,
                    url: d.delta_url,
                    method: d.delta_method,
                    body_kind: d.delta_body_kind,
                    description: d.delta_description,
                })
                .collect(),
            id: http.id,
            name: http.name,
            method: http.method,
            url: http.url,
            body_kind: http.body_kind,
            description: http.description,
            folder: http.folder_id,
        })
        .collect();

    let flows = tables
        .list_flows(workspace_id)
        .into_iter()
        .map(|flow| {
            let nodes = tables.list_nodes(flow.id);
            let mut edges = tables.list_edges(flow.id);
            edges.sort_by_key(|e| e.id);
            let by_id: HashMap<Id, &Node> = nodes.iter().map(|n| (n.id, n)).collect();
            let start = nodes.iter().find(|n| n.is_start()).map(|n| n.id);
            let order = match start {
                Some(start) => graph::linearize(start, &nodes, &edges),
                None => {
                    let mut ids: Vec<&Node> = nodes.iter().collect();
                    ids.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
                    ids.into_iter().map(|n| n.id).collect()
                }
            };
            BundleFlow {
                id: flow.id,
                name: flow.name.clone(),
                folder: tables.file_for_content(flow.id).and_then(|f| f.parent_id),
                environment: flow.environment_id,
                variables: export_variables(tables.list_flow_variables(flow.id)),
                nodes: order
                    .iter()
                    .filter_map(|id| by_id.get(id))
                    .map(|n| BundleNode {
                        id: n.id,
                        name: n.name.clone(),
                        config: n.config.clone(),
                    })
                    .collect(),
                edges: edges
                    .iter()
                    .map(|e| BundleEdge {
                        id: e.id,
                        source: e.source_id,
                        target: e.target_id,
                        handle: e.handle,
                    })
                    .collect(),
            }
        })
        .collect();

    Ok(WorkspaceBundle {
        version: BUNDLE_VERSION,
        workspace: BundleWorkspace {
            id: workspace.id,
            name: workspace.name,
            active_environment: workspace.active_env_id,
        },
        environments,
        folders,
        requests,
        flows,
    })
}

pub fn to_yaml(bundle: &WorkspaceBundle) -> Result<String, BundleError> {
    Ok(serde_yaml::to_string(bundle)?)
}

pub fn from_yaml(input: &str) -> Result<WorkspaceBundle, BundleError> {
    let bundle: WorkspaceBundle = serde_yaml::from_str(input)?;
    if bundle.version != BUNDLE_VERSION {
        return Err(BundleError::UnsupportedVersion(bundle.version));
    }
    Ok(bundle)
}

#[derive(Debug, Clone)]
pub struct BundleImportOptions {
    /// Keep the bundle's ids instead of minting new ones.
    pub preserve_ids: bool,
    /// Becomes the owner of the imported workspace.
    pub owner: Id,
}

/// Maps bundle ids to store ids.
struct IdMap {
    preserve: bool,
    ids: HashMap<Id, Id>,
}

impl IdMap {
    fn get(&mut self, old: Id) -> Id {
        if self.preserve {
            return old;
        }
        *self.ids.entry(old).or_insert_with(Id::new)
    }

    fn opt(&mut self, old: Option<Id>) -> Option<Id> {
        old.map(|id| self.get(id))
    }
}

fn import_children(
    tables: &mut Tables,
    ids: &mut IdMap,
    http_id: Id,
    children: &BundleChildren,
    is_delta_owner: bool,
) -> Result<(), BundleError> {
    for kind in KeyValueKind::ALL {
        let rows = children
            .key_values(kind)
            .iter()
            .enumerate()
            .map(|(i, kv)| {
                let mut row = HttpKeyValue::new(ids.get(kv.id), http_id, kind, &kv.key, &kv.value);
                row.enabled = kv.enabled;
                row.description = kv.description.clone();
                row.display_order = i as f64;
                if is_delta_owner && kv.parent.is_some() {
                    row.is_delta = true;
                    row.parent_id = ids.opt(kv.parent);
                    row.delta_key = kv.delta_key.clone();
                    row.delta_value = kv.delta_value.clone();
                    row.delta_enabled = kv.delta_enabled;
                    row.delta_description = kv.delta_description.clone();
                }
                row
            })
            .collect();
        tables.create_key_values(rows)?;
    }
    if let Some(body) = &children.body_raw {
        let mut row = HttpBodyRaw::new(ids.get(body.id), http_id, &body.data);
        if is_delta_owner && body.parent.is_some() {
            row.is_delta = true;
            row.parent_id = ids.opt(body.parent);
            row.delta_data = body.delta_data.clone();
        }
        tables.create_body_raw(row)?;
    }
    for (i, a) in children.assertions.iter().enumerate() {
        let mut row = HttpAssert::new(ids.get(a.id), http_id, &a.expression);
        row.enabled = a.enabled;
        row.description = a.description.clone();
        row.display_order = i as f64;
        if is_delta_owner && a.parent.is_some() {
            row.is_delta = true;
            row.parent_id = ids.opt(a.parent);
            row.delta_expression = a.delta_expression.clone();
            row.delta_enabled = a.delta_enabled;
            row.delta_description = a.delta_description.clone();
        }
        tables.create_assert(row)?;
    }
    Ok(())
}

fn content_entry(
    workspace_id: Id,
    parent_id: Option<Id>,
    content_id: Id,
    kind: ContentKind,
    name: &str,
    display_order: f64,
) -> FileEntry {
    FileEntry {
        id: Id::new(),
        workspace_id,
        parent_id,
        content_id: Some(content_id),
        kind,
        name: name.to_string(),
        display_order,
    }
}

/// Create a workspace from a bundle. Returns the new workspace.
pub fn import(
    tables: &mut Tables,
    bundle: &WorkspaceBundle,
    options: &BundleImportOptions,
) -> Result<Workspace, BundleError> {
    let mut ids = IdMap {
        preserve: options.preserve_ids,
        ids: HashMap::new(),
    };
    let workspace_id = ids.get(bundle.workspace.id);
    let mut workspace = Workspace::new(workspace_id, &bundle.workspace.name);
    tables.create_workspace(workspace.clone())?;
    tables.add_member(WorkspaceMember {
        id: Id::new(),
        workspace_id,
        user_id: options.owner,
        role: Role::Owner,
    })?;

    for (i, env) in bundle.environments.iter().enumerate() {
        let environment_id = ids.get(env.id);
        tables.create_environment(Environment {
            id: environment_id,
            workspace_id,
            name: env.name.clone(),
            description: env.description.clone(),
            display_order: i as f64,
        })?;
        for (j, v) in env.variables.iter().enumerate() {
            tables.create_variable(Variable {
                id: ids.get(v.id),
                environment_id,
                key: v.key.clone(),
                value: v.value.clone(),
                enabled: v.enabled,
                description: v.description.clone(),
                display_order: j as f64,
            })?;
        }
    }
    if let Some(active) = bundle.workspace.active_environment {
        workspace.active_env_id = Some(ids.get(active));
        tables.update_workspace(workspace.clone())?;
    }

    let mut sibling_counts: HashMap<Option<Id>, usize> = HashMap::new();
    let mut next_order = |parent: Option<Id>| -> f64 {
        let n = sibling_counts.entry(parent).or_insert(0);
        *n += 1;
        (*n - 1) as f64
    };
    for folder in &bundle.folders {
        let parent_id = ids.opt(folder.parent);
        tables.create_file(FileEntry {
            id: ids.get(folder.id),
            workspace_id,
            parent_id,
            content_id: None,
            kind: ContentKind::Folder,
            name: folder.name.clone(),
            display_order: next_order(parent_id),
        })?;
    }

    for request in &bundle.requests {
        let http_id = ids.get(request.id);
        let mut http = Http::new(http_id, workspace_id, &request.name, &request.method, &request.url);
        http.body_kind = request.body_kind;
        http.description = request.description.clone();
        http.folder_id = ids.opt(request.folder);
        tables.create_http(http.clone())?;
        tables.create_file(content_entry(
            workspace_id,
            http.folder_id,
            http_id,
            ContentKind::Http,
            &http.name,
            next_order(http.folder_id),
        ))?;
        import_children(tables, &mut ids, http_id, &request.children, false)?;

        for delta in &request.deltas {
            let mut row = Http::new_delta(ids.get(delta.id), &http);
            row.delta_name = delta.name.clone();
            row.delta_url = delta.url.clone();
            row.delta_method = delta.method.clone();
            row.delta_body_kind = delta.body_kind;
            row.delta_description = delta.description.clone();
            tables.create_http(row.clone())?;
            import_children(tables, &mut ids, row.id, &delta.children, true)?;
        }
    }

    for bundle_flow in &bundle.flows {
        let flow_id = ids.get(bundle_flow.id);
        let mut flow = Flow::new(flow_id, workspace_id, &bundle_flow.name);
        flow.environment_id = ids.opt(bundle_flow.environment);
        tables.create_flow(flow.clone())?;
        let folder = ids.opt(bundle_flow.folder);
        tables.create_file(content_entry(
            workspace_id,
            folder,
            flow_id,
            ContentKind::Flow,
            &flow.name,
            next_order(folder),
        ))?;

        for (i, v) in bundle_flow.variables.iter().enumerate() {
            tables.create_flow_variable(FlowVariable {
                id: ids.get(v.id),
                flow_id,
                key: v.key.clone(),
                value: v.value.clone(),
                enabled: v.enabled,
                description: v.description.clone(),
                display_order: i as f64,
            })?;
        }

        let mut nodes: Vec<Node> = bundle_flow
            .nodes
            .iter()
            .map(|n| {
                let mut config = n.config.clone();
                if let NodeConfig::Request { http_id, .. } = &mut config {
                    *http_id = ids.opt(*http_id);
                }
                Node::new(ids.get(n.id), flow_id, &n.name, config)
            })
            .collect();
        let edges: Vec<Edge> = bundle_flow
            .edges
            .iter()
            .map(|e| Edge::new(ids.get(e.id), flow_id, ids.get(e.source), ids.get(e.target), e.handle))
            .collect();

        if let Some(start) = nodes.iter().find(|n| n.is_start()).map(|n| n.id) {
            let layout = graph::positions(start, &nodes, &edges, LayoutDirection::Horizontal);
            for node in &mut nodes {
                if let Some(p) = layout.get(&node.id) {
                    node.position = *p;
                }
            }
        }
        for node in nodes {
            tables.create_node(node)?;
        }
        for edge in edges {
            if graph::would_create_cycle(&tables.list_edges(flow_id), &edge) {
                return Err(BundleError::Invalid(format!(
                    "edge {} in flow {} creates a cycle",
                    edge.id, bundle_flow.name
                )));
            }
            tables.create_edge(edge)?;
        }
    }

    info!(
        "Imported bundle as workspace {} ({} requests, {} flows)",
        workspace_id,
        bundle.requests.len(),
        bundle.flows.len()
    );
    Ok(workspace)
}
