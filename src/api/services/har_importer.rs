//! HAR import: captured traffic becomes base requests, per-entry deltas and a flow.
//!
//! Import runs against an open transaction. Hosts must be covered by the caller's domain
//! substitutions; otherwise nothing is written and the missing hosts are returned so the
//! client can ask for them.

use super::delta_resolver::{self, ChildPatch, DeltaHttpPatch, ResolveError};
use super::dependency_inference::{self, Dependency, RequestTexts};
use crate::graph::{self, LayoutDirection};
use crate::ids::Id;
use crate::models::{
    BodyKind, ContentKind, Edge, EdgeHandle, FileEntry, Flow, Http, HttpBodyRaw, HttpKeyValue,
    KeyValueKind, Node, NodeConfig,
};
use crate::storage::{StorageError, Tables, ordering};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum HarImportError {
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("invalid HAR document: {0}")]
    Invalid(#[from] serde_json::Error),
    #[error("workspace not found: {0}")]
    WorkspaceNotFound(Id),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

const SUPPORTED_VERSIONS: [&str; 2] = ["1.1", "1.2"];

/// Headers the client computes itself.
const DROPPED_HEADERS: [&str; 3] = ["host", "content-length", "connection"];

#[derive(Debug, Deserialize)]
struct HarDocument {
    log: HarLog,
}

#[derive(Debug, Deserialize)]
struct HarLog {
    #[serde(default)]
    version: String,
    #[serde(default)]
    entries: Vec<HarEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HarEntry {
    #[serde(rename = "_resourceType", default)]
    resource_type: Option<String>,
    request: HarRequest,
    response: HarResponse,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HarRequest {
    method: String,
    url: String,
    #[serde(default)]
    headers: Vec<HarPair>,
    #[serde(default)]
    query_string: Vec<HarPair>,
    #[serde(default)]
    post_data: Option<HarPostData>,
}

#[derive(Debug, Deserialize)]
struct HarPair {
    name: String,
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HarPostData {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    params: Vec<HarPair>,
}

#[derive(Debug, Deserialize)]
struct HarResponse {
    #[serde(default)]
    status: u16,
    #[serde(default)]
    content: HarContent,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HarContent {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    encoding: Option<String>,
}

/// One captured request in canonical form.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedRequest {
    pub method: String,
    /// URL without query string, after domain substitution.
    pub url: String,
    /// Path part of the URL, used for naming.
    pub path: String,
    pub host: String,
    pub headers: Vec<(String, String)>,
    pub params: Vec<(String, String)>,
    pub body_kind: BodyKind,
    pub form: Vec<(String, String)>,
    pub body: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CapturedEntry {
    pub request: CapturedRequest,
    pub status: u16,
    pub response_body: String,
}

/// `https://api.example.com/...` becomes `{{variable}}/...` when enabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainSubstitution {
    pub domain: String,
    pub variable: String,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
}

fn enabled_default() -> bool {
    true
}

#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub workspace_id: Id,
    pub name: String,
    pub domains: Vec<DomainSubstitution>,
    pub min_token_len: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportResult {
    pub folder: Option<FileEntry>,
    pub flow: Option<Flow>,
    pub files: Vec<FileEntry>,
    pub bases: Vec<Http>,
    pub deltas: Vec<Http>,
    pub key_values: Vec<HttpKeyValue>,
    pub bodies: Vec<HttpBodyRaw>,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub dependencies: Vec<Dependency>,
}

#[derive(Debug, Clone)]
pub enum ImportOutcome {
    Imported(Box<ImportResult>),
    /// Hosts with no substitution entry; nothing was written.
    MissingDomains(Vec<String>),
}

fn origin_and_path(parsed: &url::Url) -> (String, String) {
    let origin = parsed.origin().ascii_serialization();
    let mut bare = parsed.clone();
    bare.set_query(None);
    bare.set_fragment(None);
    let full = bare.to_string();
    let path = full.strip_prefix(&origin).unwrap_or(parsed.path()).to_string();
    (origin, path)
}

fn capture_request(request: HarRequest) -> Result<CapturedRequest, HarImportError> {
    let parsed = url::Url::parse(&request.url).map_err(|e| {
        HarImportError::UnsupportedFormat(format!("invalid URL {}: {}", request.url, e))
    })?;
    let host = parsed.host_str().unwrap_or_default().to_ascii_lowercase();
    let (origin, path) = origin_and_path(&parsed);

    let params: Vec<(String, String)> = if request.query_string.is_empty() {
        parsed
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    } else {
        request
            .query_string
            .into_iter()
            .map(|p| (p.name, p.value))
            .collect()
    };
    let headers: Vec<(String, String)> = request
        .headers
        .into_iter()
        .filter(|h| {
            !h.name.starts_with(':')
                && !DROPPED_HEADERS
                    .iter()
                    .any(|d| h.name.eq_ignore_ascii_case(d))
        })
        .map(|h| (h.name, h.value))
        .collect();

    let (body_kind, form, body) = match request.post_data {
        None => (BodyKind::None, Vec::new(), None),
        Some(post) => {
            let mime = post.mime_type.to_ascii_lowercase();
            if mime.starts_with("application/x-www-form-urlencoded") {
                let pairs = if post.params.is_empty() {
                    url::form_urlencoded::parse(post.text.unwrap_or_default().as_bytes())
                        .map(|(k, v)| (k.into_owned(), v.into_owned()))
                        .collect()
                } else {
                    post.params.into_iter().map(|p| (p.name, p.value)).collect()
                };
                (BodyKind::UrlEncoded, pairs, None)
            } else if mime.starts_with("multipart/form-data") {
                let pairs = post.params.into_iter().map(|p| (p.name, p.value)).collect();
                (BodyKind::FormData, pairs, None)
            } else {
                match post.text {
                    Some(text) if !text.is_empty() => (BodyKind::Raw, Vec::new(), Some(text)),
                    _ => (BodyKind::None, Vec::new(), None),
                }
            }
        }
    };

    Ok(CapturedRequest {
        method: request.method.to_uppercase(),
        url: format!("{}{}", origin, path),
        path,
        host,
        headers,
        params,
        body_kind,
        form,
        body,
    })
}

/// Parse a HAR 1.1/1.2 document into captured entries, keeping XHR/fetch traffic and
/// entries without a resource type.
pub fn parse_har(input: &str) -> Result<Vec<CapturedEntry>, HarImportError> {
    let document: HarDocument = serde_json::from_str(input)?;
    if !SUPPORTED_VERSIONS.contains(&document.log.version.as_str()) {
        return Err(HarImportError::UnsupportedFormat(format!(
            "HAR version '{}'",
            document.log.version
        )));
    }
    let mut out = Vec::new();
    for entry in document.log.entries {
        let keep = match entry.resource_type.as_deref() {
            None => true,
            Some(t) => t.eq_ignore_ascii_case("xhr") || t.eq_ignore_ascii_case("fetch"),
        };
        if !keep {
            continue;
        }
        let response_body = match (entry.response.content.text, entry.response.content.encoding) {
            (Some(text), Some(enc)) if enc.eq_ignore_ascii_case("base64") => BASE64
                .decode(text.as_bytes())
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                .unwrap_or(text),
            (Some(text), _) => text,
            (None, _) => String::new(),
        };
        out.push(CapturedEntry {
            request: capture_request(entry.request)?,
            status: entry.response.status,
            response_body,
        });
    }
    Ok(out)
}

fn substitute(request: &CapturedRequest, domains: &[DomainSubstitution]) -> CapturedRequest {
    let mut out = request.clone();
    if let Some(sub) = domains
        .iter()
        .find(|d| d.enabled && d.domain.eq_ignore_ascii_case(&request.host))
    {
        out.url = format!("{{{{{}}}}}{}", sub.variable, request.path);
    }
    out
}

fn rewritten(request: &CapturedRequest, deps: &[&Dependency]) -> CapturedRequest {
    if deps.is_empty() {
        return request.clone();
    }
    let pairs = |items: &[(String, String)]| -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.clone(), dependency_inference::rewrite(v, deps)))
            .collect()
    };
    CapturedRequest {
        url: dependency_inference::rewrite(&request.url, deps),
        headers: pairs(&request.headers),
        params: pairs(&request.params),
        form: pairs(&request.form),
        body: request
            .body
            .as_ref()
            .map(|b| dependency_inference::rewrite(b, deps)),
        ..request.clone()
    }
}

fn texts(request: &CapturedRequest) -> RequestTexts {
    RequestTexts {
        url: request.url.clone(),
        header_values: request.headers.iter().map(|(_, v)| v.clone()).collect(),
        param_values: request
            .params
            .iter()
            .chain(&request.form)
            .map(|(_, v)| v.clone())
            .collect(),
        body: request.body.clone().unwrap_or_default(),
    }
}

fn pairs_for(request: &CapturedRequest, kind: KeyValueKind) -> &[(String, String)] {
    match kind {
        KeyValueKind::Header => &request.headers,
        KeyValueKind::SearchParam => &request.params,
        KeyValueKind::BodyForm if request.body_kind == BodyKind::FormData => &request.form,
        KeyValueKind::BodyUrlEncoded if request.body_kind == BodyKind::UrlEncoded => &request.form,
        _ => &[],
    }
}

fn keys_match(kind: KeyValueKind, a: &str, b: &str) -> bool {
    if kind == KeyValueKind::Header {
        a.eq_ignore_ascii_case(b)
    } else {
        a == b
    }
}

fn create_base(
    tables: &mut Tables,
    workspace_id: Id,
    folder_id: Id,
    request: &CapturedRequest,
) -> Result<Http, HarImportError> {
    let name = format!("{} {}", request.method, request.path);
    let mut base = Http::new(Id::new(), workspace_id, &name, &request.method, &request.url);
    base.folder_id = Some(folder_id);
    base.body_kind = request.body_kind;
    tables.create_http(base.clone())?;

    let mut rows = Vec::new();
    for kind in KeyValueKind::ALL {
        for (i, (key, value)) in pairs_for(request, kind).iter().enumerate() {
            let mut row = HttpKeyValue::new(Id::new(), base.id, kind, key, value);
            row.display_order = i as f64;
            rows.push(row);
        }
    }
    tables.create_key_values(rows)?;
    if let Some(data) = &request.body {
        tables.create_body_raw(HttpBodyRaw::new(Id::new(), base.id, data))?;
    }
    Ok(base)
}

/// Write the differences between `desired` and the base onto the delta.
fn apply_overrides(
    tables: &mut Tables,
    base: &Http,
    delta_id: Id,
    desired: &CapturedRequest,
) -> Result<(), HarImportError> {
    let mut patch = DeltaHttpPatch::default();
    if desired.url != base.url {
        patch.url = Some(desired.url.clone());
    }
    if desired.body_kind != base.body_kind {
        patch.body_kind = Some(desired.body_kind);
    }
    if patch.url.is_some() || patch.body_kind.is_some() {
        delta_resolver::update_delta_http(tables, delta_id, patch)?;
    }

    for kind in KeyValueKind::ALL {
        let base_rows = tables.list_key_values(base.id, kind);
        let mut matched: HashSet<Id> = HashSet::new();
        for (i, (key, value)) in pairs_for(desired, kind).iter().enumerate() {
            let existing = base_rows
                .iter()
                .find(|r| !matched.contains(&r.id) && keys_match(kind, &r.key, key));
            match existing {
                Some(row) => {
                    matched.insert(row.id);
                    if row.value != *value || !row.enabled {
                        let patch = ChildPatch {
                            value: Some(value.clone()),
                            enabled: (!row.enabled).then_some(true),
                            ..Default::default()
                        };
                        delta_resolver::override_key_value(tables, delta_id, row.id, &patch)?;
                    }
                }
                None => {
                    let mut row = HttpKeyValue::new(Id::new(), delta_id, kind, key, value);
                    row.display_order = (base_rows.len() + i) as f64;
                    tables.create_key_value(row)?;
                }
            }
        }
        for row in base_rows.iter().filter(|r| r.enabled && !matched.contains(&r.id)) {
            let patch = ChildPatch {
                enabled: Some(false),
                ..Default::default()
            };
            delta_resolver::override_key_value(tables, delta_id, row.id, &patch)?;
        }
    }

    if let Some(data) = &desired.body {
        let same = tables
            .body_raw_for(base.id)
            .is_some_and(|b| b.data == *data);
        if !same {
            delta_resolver::override_body_raw(tables, delta_id, data)?;
        }
    }
    Ok(())
}

/// Import captured entries into a workspace.
pub fn import(
    tables: &mut Tables,
    entries: &[CapturedEntry],
    options: &ImportOptions,
) -> Result<ImportOutcome, HarImportError> {
    let workspace_id = options.workspace_id;
    if tables.get_workspace(workspace_id).is_none() {
        return Err(HarImportError::WorkspaceNotFound(workspace_id));
    }

    let missing: BTreeSet<String> = entries
        .iter()
        .map(|e| e.request.host.clone())
        .filter(|host| {
            !options
                .domains
                .iter()
                .any(|d| d.domain.eq_ignore_ascii_case(host))
        })
        .collect();
    if !missing.is_empty() {
        info!("HAR import needs substitutions for {} hosts", missing.len());
        return Ok(ImportOutcome::MissingDomains(missing.into_iter().collect()));
    }

    let requests: Vec<CapturedRequest> = entries
        .iter()
        .map(|e| substitute(&e.request, &options.domains))
        .collect();
    let names: Vec<String> = (1..=requests.len()).map(|i| format!("request_{}", i)).collect();
    let tokens: Vec<_> = entries
        .iter()
        .zip(&names)
        .map(|(e, name)| {
            dependency_inference::response_tokens(name, &e.response_body, options.min_token_len)
        })
        .collect();
    let request_texts: Vec<RequestTexts> = requests.iter().map(texts).collect();
    let dependencies = dependency_inference::infer(&tokens, &request_texts);
    debug!("Inferred {} dependencies", dependencies.len());

    let mut result = ImportResult::default();
    let root_order = ordering::after_last(
        tables
            .list_children(workspace_id, None)
            .iter()
            .map(|f| f.display_order),
    );
    let folder = FileEntry {
        id: Id::new(),
        workspace_id,
        parent_id: None,
        content_id: None,
        kind: ContentKind::Folder,
        name: options.name.clone(),
        display_order: root_order,
    };
    tables.create_file(folder.clone())?;

    let mut deltas = Vec::with_capacity(requests.len());
    for (i, request) in requests.iter().enumerate() {
        let base = match tables.find_base_by_method_url(workspace_id, &request.method, &request.url) {
            Some(existing) => existing,
            None => {
                let base = create_base(tables, workspace_id, folder.id, request)?;
                let entry = FileEntry {
                    id: Id::new(),
                    workspace_id,
                    parent_id: Some(folder.id),
                    content_id: Some(base.id),
                    kind: ContentKind::Http,
                    name: base.name.clone(),
                    display_order: result.bases.len() as f64,
                };
                tables.create_file(entry.clone())?;
                result.files.push(entry);
                result.key_values.extend(
                    KeyValueKind::ALL
                        .into_iter()
                        .flat_map(|k| tables.list_key_values(base.id, k)),
                );
                result.bodies.extend(tables.body_raw_for(base.id));
                result.bases.push(base.clone());
                base
            }
        };

        let delta = delta_resolver::create_delta_http(tables, base.id, Some(names[i].clone()))?;
        let consumer_deps: Vec<&Dependency> =
            dependencies.iter().filter(|d| d.consumer == i).collect();
        apply_overrides(tables, &base, delta.id, &rewritten(request, &consumer_deps))?;

        result.key_values.extend(
            KeyValueKind::ALL
                .into_iter()
                .flat_map(|k| tables.list_key_values(delta.id, k)),
        );
        result.bodies.extend(tables.body_raw_for(delta.id));
        let delta = tables.get_http(delta.id).unwrap_or(delta);
        deltas.push(delta);
    }

    let flow = Flow::new(Id::new(), workspace_id, &options.name);
    tables.create_flow(flow.clone())?;
    let start = Node::new(Id::new(), flow.id, "start", NodeConfig::ManualStart);
    let mut nodes = vec![start.clone()];
    for (delta, name) in deltas.iter().zip(&names) {
        nodes.push(Node::new(
            Id::new(),
            flow.id,
            name,
            NodeConfig::Request {
                http_id: Some(delta.id),
                continue_on_failure: false,
            },
        ));
    }

    let mut pairs: Vec<(usize, usize)> = (0..nodes.len().saturating_sub(1)).map(|i| (i, i + 1)).collect();
    pairs.extend(dependencies.iter().map(|d| (d.producer + 1, d.consumer + 1)));
    let mut seen = HashSet::new();
    let edges: Vec<Edge> = pairs
        .into_iter()
        .filter(|p| seen.insert(*p))
        .map(|(a, b)| Edge::new(Id::new(), flow.id, nodes[a].id, nodes[b].id, EdgeHandle::Default))
        .collect();
    let edges = graph::transitive_reduction(&edges);

    let layout = graph::positions(start.id, &nodes, &edges, LayoutDirection::Horizontal);
    for node in &mut nodes {
        if let Some(position) = layout.get(&node.id) {
            node.position = *position;
        }
        tables.create_node(node.clone())?;
    }
    for edge in &edges {
        tables.create_edge(edge.clone())?;
    }

    let flow_file = FileEntry {
        id: Id::new(),
        workspace_id,
        parent_id: None,
        content_id: Some(flow.id),
        kind: ContentKind::Flow,
        name: flow.name.clone(),
        display_order: ordering::after_last([root_order]),
    };
    tables.create_file(flow_file.clone())?;
    result.files.push(flow_file);

    info!(
        "Imported {} entries into workspace {}: {} new bases, {} dependencies",
        entries.len(),
        workspace_id,
        result.bases.len(),
        dependencies.len()
    );
    result.folder = Some(folder);
    result.flow = Some(flow);
    result.deltas = deltas;
    result.nodes = nodes;
    result.edges = edges;
    result.dependencies = dependencies;
    Ok(ImportOutcome::Imported(Box::new(result)))
}
