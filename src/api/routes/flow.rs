//! Flow routes: flows, nodes, edges, flow variables, runs and layout.
//!
//! `POST /flows/{id}/run` streams node and flow status as Server-Sent Events
//! (`node`, `flow`, then one `summary` or `error`). Dropping the stream cancels the run.

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, patch, post},
};
use futures_util::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::DropGuard;
use tracing::{info, warn};

use super::app_state::{AppState, flow_for_member, require_role};
use super::auth_context::{CurrentUser, PathId};
use super::error::{ApiError, ApiResult, ErrorCode};
use super::nullable;
use super::workspace::{sibling_order, validate_name};
use crate::graph::{self, LayoutDirection};
use crate::ids::Id;
use crate::models::{
    ContentKind, Edge, EdgeHandle, FileEntry, Flow, FlowVariable, Node, NodeConfig,
    NodeExecution, Position, Role,
};
use crate::services::event_sync::{EventBatch, EventKind, SyncEvent};
use crate::services::flow_runner::{
    RunOptions, RunReceivers, RunReporter, RunSummary, RunnerError,
};
use crate::storage::Tables;
use crate::storage::ordering::after_last;

const STATUS_BUFFER: usize = 64;

/// Sub-order for node events: the node's level in its flow, so containers publish before
/// the nodes they lead to.
pub(crate) fn node_levels(tables: &Tables, flow_id: Id) -> std::collections::HashMap<Id, i64> {
    graph::node_depths(&tables.list_nodes(flow_id), &tables.list_edges(flow_id))
        .into_iter()
        .map(|(id, depth)| (id, depth as i64))
        .collect()
}

#[derive(Deserialize)]
pub struct CreateFlowRequest {
    name: String,
    #[serde(default)]
    folder_id: Option<Id>,
    #[serde(default)]
    environment_id: Option<Id>,
}

#[derive(Deserialize)]
pub struct UpdateFlowRequest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    environment_id: Option<Option<Id>>,
}

#[derive(Deserialize)]
pub struct CreateNodeRequest {
    name: String,
    #[serde(default)]
    position: Option<Position>,
    #[serde(flatten)]
    config: NodeConfig,
}

#[derive(Deserialize)]
pub struct UpdateNodeRequest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    position: Option<Position>,
    #[serde(default)]
    config: Option<NodeConfig>,
}

#[derive(Deserialize)]
pub struct CreateEdgeRequest {
    source_id: Id,
    target_id: Id,
    #[serde(default)]
    handle: EdgeHandle,
}

#[derive(Deserialize)]
pub struct CreateFlowVariableRequest {
    key: String,
    #[serde(default)]
    value: String,
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default)]
    description: String,
}

#[derive(Deserialize)]
pub struct UpdateFlowVariableRequest {
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    display_order: Option<f64>,
}

#[derive(Deserialize)]
pub struct RunQuery {
    #[serde(default)]
    timeout_secs: Option<u64>,
    #[serde(default)]
    stop_on_failure: Option<bool>,
}

#[derive(Deserialize)]
pub struct ExecutionsQuery {
    #[serde(default)]
    run_id: Option<Id>,
}

#[derive(Deserialize, Default)]
pub struct LayoutQuery {
    #[serde(default)]
    direction: LayoutDirection,
}

/// Nodes, edges and variables of one flow.
#[derive(Serialize)]
pub struct FlowGraph {
    flow: Flow,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    variables: Vec<FlowVariable>,
}

pub fn flow_router() -> Router<AppState> {
    Router::new()
        .route("/workspaces/{id}/flows", get(list_flows).post(create_flow))
        .route(
            "/flows/{id}",
            get(get_flow).patch(update_flow).delete(delete_flow),
        )
        .route("/flows/{id}/nodes", get(list_nodes).post(create_node))
        .route("/nodes/{id}", patch(update_node).delete(delete_node))
        .route("/flows/{id}/edges", get(list_edges).post(create_edge))
        .route("/edges/{id}", axum::routing::delete(delete_edge))
        .route(
            "/flows/{id}/variables",
            get(list_flow_variables).post(create_flow_variable),
        )
        .route(
            "/flow-variables/{id}",
            patch(update_flow_variable).delete(delete_flow_variable),
        )
        .route("/flows/{id}/run", post(run_flow))
        .route("/flows/{id}/executions", get(list_executions))
        .route("/flows/{id}/layout", post(layout_flow))
}

fn node_for_member(tables: &Tables, id: Id, user_id: Id) -> ApiResult<(Flow, Node)> {
    let node = tables
        .get_node(id)
        .ok_or_else(|| ApiError::not_found("node", id))?;
    let flow = flow_for_member(tables, node.flow_id, user_id)?;
    Ok((flow, node))
}

/// Request nodes may only point at requests of the flow's workspace.
fn check_node_config(tables: &Tables, flow: &Flow, config: &NodeConfig) -> ApiResult<()> {
    if let NodeConfig::Request {
        http_id: Some(http_id),
        ..
    } = config
    {
        let http = tables
            .get_http(*http_id)
            .ok_or_else(|| ApiError::new(ErrorCode::ReferentialError, format!("http {} does not exist", http_id)))?;
        if http.workspace_id != flow.workspace_id {
            return Err(ApiError::invalid_field("http_id", "belongs to another workspace"));
        }
    }
    Ok(())
}

/// GET /workspaces/{id}/flows
pub async fn list_flows(
    State(state): State<AppState>,
    user: CurrentUser,
    PathId(id): PathId,
) -> ApiResult<Json<Vec<Flow>>> {
    let reader = state.store.reader().await?;
    require_role(&reader, id, user.id(), Role::Member)?;
    Ok(Json(reader.list_flows(id)))
}

/// POST /workspaces/{id}/flows - Create a flow with its start node and tree entry
pub async fn create_flow(
    State(state): State<AppState>,
    user: CurrentUser,
    PathId(workspace_id): PathId,
    Json(request): Json<CreateFlowRequest>,
) -> ApiResult<(StatusCode, Json<FlowGraph>)> {
    let name = validate_name(&request.name)?;
    let batch = EventBatch::new();
    let (flow, start, file) = {
        let mut tx = state.store.begin().await?;
        require_role(&tx, workspace_id, user.id(), Role::Member)?;
        if let Some(env_id) = request.environment_id
            && tx
                .get_environment(env_id)
                .is_none_or(|e| e.workspace_id != workspace_id)
        {
            return Err(ApiError::invalid_field("environment_id", "is not in this workspace"));
        }
        let mut flow = Flow::new(Id::new(), workspace_id, &name);
        flow.environment_id = request.environment_id;
        tx.create_flow(flow.clone())?;
        let start = Node::new(Id::new(), flow.id, "Start", NodeConfig::ManualStart);
        tx.create_node(start.clone())?;
        let file = FileEntry {
            id: Id::new(),
            workspace_id,
            parent_id: request.folder_id,
            content_id: Some(flow.id),
            kind: ContentKind::Flow,
            name,
            display_order: sibling_order(&tx, workspace_id, request.folder_id, None, None, None)?,
        };
        tx.create_file(file.clone())?;
        tx.commit();
        (flow, start, file)
    };
    state.record(
        &batch,
        SyncEvent::insert(workspace_id, EventKind::Flow, flow.id, &flow),
        0,
    );
    state.record(
        &batch,
        SyncEvent::insert(workspace_id, EventKind::Node, start.id, &start),
        0,
    );
    state.record(
        &batch,
        SyncEvent::insert(workspace_id, EventKind::for_file(file.kind), file.id, &file),
        0,
    );
    state.publish(batch).await;
    info!("Created flow {} in {}", flow.id, workspace_id);
    Ok((
        StatusCode::CREATED,
        Json(FlowGraph {
            flow,
            nodes: vec![start],
            edges: Vec::new(),
            variables: Vec::new(),
        }),
    ))
}

/// GET /flows/{id} - The flow with its graph and variables
pub async fn get_flow(
    State(state): State<AppState>,
    user: CurrentUser,
    PathId(id): PathId,
) -> ApiResult<Json<FlowGraph>> {
    let reader = state.store.reader().await?;
    let flow = flow_for_member(&reader, id, user.id())?;
    Ok(Json(FlowGraph {
        flow,
        nodes: reader.list_nodes(id),
        edges: reader.list_edges(id),
        variables: reader.list_flow_variables(id),
    }))
}

/// PATCH /flows/{id}
pub async fn update_flow(
    State(state): State<AppState>,
    user: CurrentUser,
    PathId(id): PathId,
    Json(request): Json<UpdateFlowRequest>,
) -> ApiResult<Json<Flow>> {
    let batch = EventBatch::new();
    let flow = {
        let mut tx = state.store.begin().await?;
        let mut flow = flow_for_member(&tx, id, user.id())?;
        if let Some(name) = &request.name {
            flow.name = validate_name(name)?;
            if let Some(mut file) = tx.file_for_content(id) {
                file.name = flow.name.clone();
                tx.update_file(file.clone())?;
                state.record(
                    &batch,
                    SyncEvent::update(flow.workspace_id, EventKind::for_file(file.kind), file.id, &file),
                    0,
                );
            }
        }
        if let Some(environment_id) = request.environment_id {
            if let Some(env_id) = environment_id
                && tx
                    .get_environment(env_id)
                    .is_none_or(|e| e.workspace_id != flow.workspace_id)
            {
                return Err(ApiError::invalid_field("environment_id", "is not in this workspace"));
            }
            flow.environment_id = environment_id;
        }
        flow.updated_at = chrono::Utc::now();
        tx.update_flow(flow.clone())?;
        tx.commit();
        flow
    };
    state.record(
        &batch,
        SyncEvent::update(flow.workspace_id, EventKind::Flow, id, &flow),
        0,
    );
    state.publish(batch).await;
    Ok(Json(flow))
}

/// DELETE /flows/{id} - Remove the flow, its graph, variables, executions and tree entry
pub async fn delete_flow(
    State(state): State<AppState>,
    user: CurrentUser,
    PathId(id): PathId,
) -> ApiResult<StatusCode> {
    let batch = EventBatch::new();
    {
        let mut tx = state.store.begin().await?;
        let flow = flow_for_member(&tx, id, user.id())?;
        let ws = flow.workspace_id;
        if let Some(file) = tx.file_for_content(id) {
            state.record(&batch, SyncEvent::delete(ws, EventKind::for_file(file.kind), file.id), 0);
        }
        for edge in tx.list_edges(id) {
            state.record(&batch, SyncEvent::delete(ws, EventKind::Edge, edge.id), 0);
        }
        let levels = node_levels(&tx, id);
        for node in tx.list_nodes(id) {
            let level = levels.get(&node.id).copied().unwrap_or(0);
            state.record(&batch, SyncEvent::delete(ws, EventKind::Node, node.id), level);
        }
        for variable in tx.list_flow_variables(id) {
            state.record(&batch, SyncEvent::delete(ws, EventKind::FlowVariable, variable.id), 0);
        }
        tx.delete_flow(id)?;
        tx.commit();
        state.record(&batch, SyncEvent::delete(ws, EventKind::Flow, id), 0);
    }
    state.publish(batch).await;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /flows/{id}/nodes
pub async fn list_nodes(
    State(state): State<AppState>,
    user: CurrentUser,
    PathId(id): PathId,
) -> ApiResult<Json<Vec<Node>>> {
    let reader = state.store.reader().await?;
    flow_for_member(&reader, id, user.id())?;
    Ok(Json(reader.list_nodes(id)))
}

/// POST /flows/{id}/nodes
pub async fn create_node(
    State(state): State<AppState>,
    user: CurrentUser,
    PathId(flow_id): PathId,
    Json(request): Json<CreateNodeRequest>,
) -> ApiResult<(StatusCode, Json<Node>)> {
    let name = validate_name(&request.name)?;
    let batch = EventBatch::new();
    let (workspace_id, node, level) = {
        let mut tx = state.store.begin().await?;
        let flow = flow_for_member(&tx, flow_id, user.id())?;
        check_node_config(&tx, &flow, &request.config)?;
        let mut node = Node::new(Id::new(), flow_id, &name, request.config);
        node.position = request.position.unwrap_or_default();
        tx.create_node(node.clone())?;
        let level = node_levels(&tx, flow_id).get(&node.id).copied().unwrap_or(0);
        tx.commit();
        (flow.workspace_id, node, level)
    };
    state.record(
        &batch,
        SyncEvent::insert(workspace_id, EventKind::Node, node.id, &node),
        level,
    );
    state.publish(batch).await;
    Ok((StatusCode::CREATED, Json(node)))
}

/// PATCH /nodes/{id}
pub async fn update_node(
    State(state): State<AppState>,
    user: CurrentUser,
    PathId(id): PathId,
    Json(request): Json<UpdateNodeRequest>,
) -> ApiResult<Json<Node>> {
    let batch = EventBatch::new();
    let (workspace_id, node, level) = {
        let mut tx = state.store.begin().await?;
        let (flow, mut node) = node_for_member(&tx, id, user.id())?;
        if let Some(name) = &request.name {
            node.name = validate_name(name)?;
        }
        if let Some(position) = request.position {
            node.position = position;
        }
        if let Some(config) = request.config {
            check_node_config(&tx, &flow, &config)?;
            node.config = config;
        }
        tx.update_node(node.clone())?;
        let level = node_levels(&tx, flow.id).get(&id).copied().unwrap_or(0);
        tx.commit();
        (flow.workspace_id, node, level)
    };
    state.record(
        &batch,
        SyncEvent::update(workspace_id, EventKind::Node, id, &node),
        level,
    );
    state.publish(batch).await;
    Ok(Json(node))
}

/// DELETE /nodes/{id} - Remove a node and the edges touching it
pub async fn delete_node(
    State(state): State<AppState>,
    user: CurrentUser,
    PathId(id): PathId,
) -> ApiResult<StatusCode> {
    let batch = EventBatch::new();
    {
        let mut tx = state.store.begin().await?;
        let (flow, node) = node_for_member(&tx, id, user.id())?;
        if node.is_start() {
            return Err(ApiError::new(
                ErrorCode::FailedPrecondition,
                "the start node cannot be deleted",
            ));
        }
        let (_, edges) = tx.delete_node(id)?;
        tx.commit();
        for edge in edges {
            state.record(
                &batch,
                SyncEvent::delete(flow.workspace_id, EventKind::Edge, edge.id),
                0,
            );
        }
        state.record(
            &batch,
            SyncEvent::delete(flow.workspace_id, EventKind::Node, id),
            0,
        );
    }
    state.publish(batch).await;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /flows/{id}/edges
pub async fn list_edges(
    State(state): State<AppState>,
    user: CurrentUser,
    PathId(id): PathId,
) -> ApiResult<Json<Vec<Edge>>> {
    let reader = state.store.reader().await?;
    flow_for_member(&reader, id, user.id())?;
    Ok(Json(reader.list_edges(id)))
}

/// POST /flows/{id}/edges - Connect two nodes; edges that close a cycle are rejected
pub async fn create_edge(
    State(state): State<AppState>,
    user: CurrentUser,
    PathId(flow_id): PathId,
    Json(request): Json<CreateEdgeRequest>,
) -> ApiResult<(StatusCode, Json<Edge>)> {
    let batch = EventBatch::new();
    let (workspace_id, edge) = {
        let mut tx = state.store.begin().await?;
        let flow = flow_for_member(&tx, flow_id, user.id())?;
        let edge = Edge::new(
            Id::new(),
            flow_id,
            request.source_id,
            request.target_id,
            request.handle,
        );
        if graph::would_create_cycle(&tx.list_edges(flow_id), &edge) {
            return Err(ApiError::new(
                ErrorCode::FailedPrecondition,
                "edge would create a cycle",
            ));
        }
        tx.create_edge(edge.clone())?;
        tx.commit();
        (flow.workspace_id, edge)
    };
    state.record(
        &batch,
        SyncEvent::insert(workspace_id, EventKind::Edge, edge.id, &edge),
        0,
    );
    state.publish(batch).await;
    Ok((StatusCode::CREATED, Json(edge)))
}

/// DELETE /edges/{id}
pub async fn delete_edge(
    State(state): State<AppState>,
    user: CurrentUser,
    PathId(id): PathId,
) -> ApiResult<StatusCode> {
    let batch = EventBatch::new();
    {
        let mut tx = state.store.begin().await?;
        let edge = tx
            .get_edge(id)
            .ok_or_else(|| ApiError::not_found("edge", id))?;
        let flow = flow_for_member(&tx, edge.flow_id, user.id())?;
        tx.delete_edge(id)?;
        tx.commit();
        state.record(
            &batch,
            SyncEvent::delete(flow.workspace_id, EventKind::Edge, id),
            0,
        );
    }
    state.publish(batch).await;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /flows/{id}/variables
pub async fn list_flow_variables(
    State(state): State<AppState>,
    user: CurrentUser,
    PathId(id): PathId,
) -> ApiResult<Json<Vec<FlowVariable>>> {
    let reader = state.store.reader().await?;
    flow_for_member(&reader, id, user.id())?;
    Ok(Json(reader.list_flow_variables(id)))
}

/// POST /flows/{id}/variables
pub async fn create_flow_variable(
    State(state): State<AppState>,
    user: CurrentUser,
    PathId(flow_id): PathId,
    Json(request): Json<CreateFlowVariableRequest>,
) -> ApiResult<(StatusCode, Json<FlowVariable>)> {
    let key = request.key.trim().to_string();
    if key.is_empty() {
        return Err(ApiError::invalid_field("key", "must not be empty"));
    }
    let batch = EventBatch::new();
    let (workspace_id, variable) = {
        let mut tx = state.store.begin().await?;
        let flow = flow_for_member(&tx, flow_id, user.id())?;
        let variable = FlowVariable {
            id: Id::new(),
            flow_id,
            key,
            value: request.value,
            enabled: request.enabled.unwrap_or(true),
            description: request.description,
            display_order: after_last(
                tx.list_flow_variables(flow_id)
                    .iter()
                    .map(|v| v.display_order),
            ),
        };
        tx.create_flow_variable(variable.clone())?;
        tx.commit();
        (flow.workspace_id, variable)
    };
    state.record(
        &batch,
        SyncEvent::insert(workspace_id, EventKind::FlowVariable, variable.id, &variable),
        0,
    );
    state.publish(batch).await;
    Ok((StatusCode::CREATED, Json(variable)))
}

/// PATCH /flow-variables/{id}
pub async fn update_flow_variable(
    State(state): State<AppState>,
    user: CurrentUser,
    PathId(id): PathId,
    Json(request): Json<UpdateFlowVariableRequest>,
) -> ApiResult<Json<FlowVariable>> {
    let batch = EventBatch::new();
    let (workspace_id, variable) = {
        let mut tx = state.store.begin().await?;
        let mut variable = tx
            .get_flow_variable(id)
            .ok_or_else(|| ApiError::not_found("flow_variable", id))?;
        let flow = flow_for_member(&tx, variable.flow_id, user.id())?;
        if let Some(key) = request.key {
            let key = key.trim().to_string();
            if key.is_empty() {
                return Err(ApiError::invalid_field("key", "must not be empty"));
            }
            variable.key = key;
        }
        if let Some(value) = request.value {
            variable.value = value;
        }
        if let Some(enabled) = request.enabled {
            variable.enabled = enabled;
        }
        if let Some(description) = request.description {
            variable.description = description;
        }
        if let Some(order) = request.display_order {
            variable.display_order = order;
        }
        tx.update_flow_variable(variable.clone())?;
        tx.commit();
        (flow.workspace_id, variable)
    };
    state.record(
        &batch,
        SyncEvent::update(workspace_id, EventKind::FlowVariable, id, &variable),
        0,
    );
    state.publish(batch).await;
    Ok(Json(variable))
}

/// DELETE /flow-variables/{id}
pub async fn delete_flow_variable(
    State(state): State<AppState>,
    user: CurrentUser,
    PathId(id): PathId,
) -> ApiResult<StatusCode> {
    let batch = EventBatch::new();
    {
        let mut tx = state.store.begin().await?;
        let variable = tx
            .get_flow_variable(id)
            .ok_or_else(|| ApiError::not_found("flow_variable", id))?;
        let flow = flow_for_member(&tx, variable.flow_id, user.id())?;
        tx.delete_flow_variable(id)?;
        tx.commit();
        state.record(
            &batch,
            SyncEvent::delete(flow.workspace_id, EventKind::FlowVariable, id),
            0,
        );
    }
    state.publish(batch).await;
    Ok(StatusCode::NO_CONTENT)
}

/// Stream state: both status channels, the run task and the guard that cancels the
/// run when the client goes away.
struct RunStream {
    receivers: RunReceivers,
    nodes_open: bool,
    flow_open: bool,
    task: Option<JoinHandle<Result<RunSummary, RunnerError>>>,
    _guard: DropGuard,
}

fn json_event(name: &str, payload: &impl Serialize) -> Event {
    match Event::default().event(name).json_data(payload) {
        Ok(event) => event,
        Err(e) => Event::default().event("error").data(e.to_string()),
    }
}

fn run_events(run: RunStream) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(Some(run), |run| async move {
        let mut run = run?;
        loop {
            if !run.nodes_open && !run.flow_open {
                let task = run.task.take()?;
                let event = match task.await {
                    Ok(Ok(summary)) => json_event("summary", &summary),
                    Ok(Err(e)) => json_event("error", &ApiError::from(e)),
                    Err(e) => json_event("error", &ApiError::internal(format!("run task failed: {}", e))),
                };
                return Some((Ok(event), None));
            }
            tokio::select! {
                event = run.receivers.nodes.recv(), if run.nodes_open => match event {
                    Some(e) => return Some((Ok(json_event("node", &e)), Some(run))),
                    None => run.nodes_open = false,
                },
                event = run.receivers.flow.recv(), if run.flow_open => match event {
                    Some(e) => return Some((Ok(json_event("flow", &e)), Some(run))),
                    None => run.flow_open = false,
                },
            }
        }
    })
}

/// POST /flows/{id}/run - Run the flow, streaming status as Server-Sent Events
pub async fn run_flow(
    State(state): State<AppState>,
    user: CurrentUser,
    PathId(id): PathId,
    Query(query): Query<RunQuery>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    {
        let reader = state.store.reader().await?;
        flow_for_member(&reader, id, user.id())?;
    }
    let options = RunOptions {
        timeout: query.timeout_secs.map(Duration::from_secs),
        stop_on_failure: query.stop_on_failure.unwrap_or(true),
        user_id: Some(user.id()),
    };
    let (reporter, receivers) = RunReporter::channel(STATUS_BUFFER);
    let cancel = state.shutdown.child_token();
    let runner = state.runner.clone();
    let run_cancel = cancel.clone();
    let task = tokio::spawn(async move {
        let result = runner.run(id, options, reporter, run_cancel).await;
        if let Err(e) = &result {
            warn!("Flow {} did not start: {}", id, e);
        }
        result
    });
    info!("Started run of flow {} for {}", id, user.id());

    let stream = run_events(RunStream {
        receivers,
        nodes_open: true,
        flow_open: true,
        task: Some(task),
        _guard: cancel.drop_guard(),
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// GET /flows/{id}/executions - Node executions, optionally for one run
pub async fn list_executions(
    State(state): State<AppState>,
    user: CurrentUser,
    PathId(id): PathId,
    Query(query): Query<ExecutionsQuery>,
) -> ApiResult<Json<Vec<NodeExecution>>> {
    let reader = state.store.reader().await?;
    flow_for_member(&reader, id, user.id())?;
    let executions = match query.run_id {
        Some(run_id) => reader
            .list_run_executions(run_id)
            .into_iter()
            .filter(|e| e.flow_id == id)
            .collect(),
        None => reader.list_node_executions(id),
    };
    Ok(Json(executions))
}

/// POST /flows/{id}/layout - Recompute node positions from the start node
pub async fn layout_flow(
    State(state): State<AppState>,
    user: CurrentUser,
    PathId(id): PathId,
    Query(query): Query<LayoutQuery>,
) -> ApiResult<Json<Vec<Node>>> {
    let batch = EventBatch::new();
    let (workspace_id, nodes) = {
        let mut tx = state.store.begin().await?;
        let flow = flow_for_member(&tx, id, user.id())?;
        let mut nodes = tx.list_nodes(id);
        let start = nodes
            .iter()
            .find(|n| n.is_start())
            .map(|n| n.id)
            .ok_or_else(|| ApiError::new(ErrorCode::FailedPrecondition, "flow has no start node"))?;
        let edges = tx.list_edges(id);
        let positions = graph::positions(start, &nodes, &edges, query.direction);
        let levels = graph::levels(start, &nodes, &edges);
        for node in nodes.iter_mut() {
            if let Some(position) = positions.get(&node.id)
                && *position != node.position
            {
                node.position = *position;
                tx.update_node(node.clone())?;
                state.record(
                    &batch,
                    SyncEvent::update(flow.workspace_id, EventKind::Node, node.id, &*node),
                    levels.get(&node.id).map_or(0, |l| *l as i64),
                );
            }
        }
        tx.commit();
        (flow.workspace_id, nodes)
    };
    state.publish(batch).await;
    info!("Laid out flow {} in {}", id, workspace_id);
    Ok(Json(nodes))
}
