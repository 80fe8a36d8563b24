//! Flow runner: schedules node activations over a flow graph.
//!
//! A dispatcher keeps a frontier of ready nodes and polls their futures together. A node is
//! ready once every incoming edge inside its subgraph has resolved and at least one resolved
//! live; when they all resolve dead the node is skipped and its own outgoing edges die.
//! Loop bodies are separate subgraphs scheduled only by their loop node.

mod scope;
mod status;

pub use scope::ScopeChain;
pub use status::{FlowStatusEvent, NodeStatusEvent, RunReceivers, RunReporter};

use super::expression::{self, truthy};
use super::request_executor::{ExecutorError, RequestExecutor};
use super::script;
use crate::graph;
use crate::ids::Id;
use crate::models::{
    Edge, EdgeHandle, ErrorPolicy, FlowRunStatus, Node, NodeConfig, NodeExecution, NodeStatus,
};
use crate::storage::{StorageError, Store};
use chrono::Utc;
use futures_util::future::BoxFuture;
use futures_util::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Upper bound on iterations of a single `for` node.
pub const MAX_ITERATIONS: u64 = 10_000;

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("flow not found: {0}")]
    FlowNotFound(Id),
    #[error("invalid flow: {0}")]
    InvalidFlow(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Overrides the runner's default timeout.
    pub timeout: Option<Duration>,
    pub stop_on_failure: bool,
    pub user_id: Option<Id>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            stop_on_failure: true,
            user_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Id,
    pub flow_id: Id,
    pub status: FlowRunStatus,
    /// Last reported status of every node.
    pub node_statuses: HashMap<Id, NodeStatus>,
    pub executions: Vec<NodeExecution>,
    /// Flow-local variables at the end of the run.
    pub variables: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunSummary {
    pub fn node_status(&self, node_id: Id) -> Option<NodeStatus> {
        self.node_statuses.get(&node_id).copied()
    }

    pub fn attempts(&self, node_id: Id) -> usize {
        self.executions
            .iter()
            .filter(|e| e.node_id == node_id)
            .count()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Debug, Clone, Default)]
struct Subgraph {
    members: Arc<HashSet<Id>>,
    entries: Vec<Id>,
}

struct Plan {
    nodes: HashMap<Id, Node>,
    outgoing: HashMap<Id, Vec<Edge>>,
    incoming: HashMap<Id, Vec<Edge>>,
    loop_bodies: HashMap<Id, Subgraph>,
    top: Subgraph,
}

impl Plan {
    fn build(start: Id, nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        let body_entries = |loop_id: Id| -> Vec<Id> {
            edges
                .iter()
                .filter(|e| e.source_id == loop_id && e.handle == EdgeHandle::LoopBody)
                .map(|e| e.target_id)
                .collect()
        };

        // Everything reachable from a loop's body edges, nested bodies included.
        let mut full_bodies: HashMap<Id, HashSet<Id>> = HashMap::new();
        for node in nodes.iter().filter(|n| n.config.is_loop()) {
            let mut body = graph::reachable_from(body_entries(node.id), &edges, |_| true);
            body.remove(&node.id);
            full_bodies.insert(node.id, body);
        }

        let mut loop_bodies = HashMap::new();
        for (loop_id, body) in &full_bodies {
            let mut members = body.clone();
            for inner in body.iter().filter_map(|id| full_bodies.get(id)) {
                for id in inner {
                    members.remove(id);
                }
            }
            let entries = body_entries(*loop_id)
                .into_iter()
                .filter(|id| members.contains(id))
                .collect();
            loop_bodies.insert(
                *loop_id,
                Subgraph {
                    members: Arc::new(members),
                    entries,
                },
            );
        }

        let nested: HashSet<Id> = full_bodies.values().flatten().copied().collect();
        let top = Subgraph {
            members: Arc::new(
                nodes
                    .iter()
                    .map(|n| n.id)
                    .filter(|id| !nested.contains(id))
                    .collect(),
            ),
            entries: vec![start],
        };

        let mut outgoing: HashMap<Id, Vec<Edge>> = HashMap::new();
        let mut incoming: HashMap<Id, Vec<Edge>> = HashMap::new();
        for edge in edges {
            outgoing.entry(edge.source_id).or_default().push(edge.clone());
            incoming.entry(edge.target_id).or_default().push(edge);
        }

        Self {
            nodes: nodes.into_iter().map(|n| (n.id, n)).collect(),
            outgoing,
            incoming,
            loop_bodies,
            top,
        }
    }

    fn member_edges<'a>(
        map: &'a HashMap<Id, Vec<Edge>>,
        id: Id,
        members: &'a HashSet<Id>,
    ) -> impl Iterator<Item = &'a Edge> + 'a {
        map.get(&id)
            .into_iter()
            .flatten()
            .filter(move |e| members.contains(&e.source_id) && members.contains(&e.target_id))
    }
}

struct NodeOutcome {
    status: NodeStatus,
    /// Handles whose edges go live.
    taken: Vec<EdgeHandle>,
    /// Failed, but successors still run and the flow is not failed.
    tolerated: bool,
    output: Option<Value>,
    response_id: Option<Id>,
    error: Option<String>,
}

impl NodeOutcome {
    fn success(taken: Vec<EdgeHandle>, output: Option<Value>) -> Self {
        Self {
            status: NodeStatus::Success,
            taken,
            tolerated: false,
            output,
            response_id: None,
            error: None,
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            status: NodeStatus::Failed,
            taken: Vec::new(),
            tolerated: false,
            output: None,
            response_id: None,
            error: Some(error.into()),
        }
    }

    fn canceled() -> Self {
        Self {
            status: NodeStatus::Canceled,
            taken: Vec::new(),
            tolerated: false,
            output: None,
            response_id: None,
            error: None,
        }
    }

    fn tolerate(mut self) -> Self {
        if self.status == NodeStatus::Failed {
            self.tolerated = true;
            self.taken = vec![EdgeHandle::Default];
        }
        self
    }

    fn passes(&self) -> bool {
        self.status == NodeStatus::Success || self.tolerated
    }
}

#[derive(Debug, Default)]
struct SubgraphOutcome {
    failed: bool,
    canceled: bool,
    error: Option<String>,
}

struct RunContext {
    run_id: Id,
    flow_id: Id,
    plan: Plan,
    store: Store,
    executor: RequestExecutor,
    reporter: RunReporter,
    cancel: CancellationToken,
    request_slots: Arc<Semaphore>,
    stop_on_failure: bool,
    user_id: Option<Id>,
    attempts: Mutex<HashMap<Id, u32>>,
    statuses: Mutex<HashMap<Id, NodeStatus>>,
    executions: Mutex<Vec<NodeExecution>>,
}

impl RunContext {
    fn next_attempt(&self, node_id: Id) -> u32 {
        let mut attempts = lock(&self.attempts);
        let n = attempts.entry(node_id).or_insert(0);
        *n += 1;
        *n
    }

    async fn report(
        &self,
        node: &Node,
        status: NodeStatus,
        attempt: u32,
        payload: Option<Value>,
        error: Option<String>,
    ) {
        lock(&self.statuses).insert(node.id, status);
        self.reporter
            .node(NodeStatusEvent {
                run_id: self.run_id,
                flow_id: self.flow_id,
                node_id: node.id,
                name: node.name.clone(),
                status,
                attempt,
                payload,
                error,
            })
            .await;
    }

    async fn record(&self, execution: &NodeExecution) {
        {
            let mut all = lock(&self.executions);
            match all.iter_mut().find(|e| e.id == execution.id) {
                Some(slot) => *slot = execution.clone(),
                None => all.push(execution.clone()),
            }
        }
        let result = match self.store.begin().await {
            Ok(mut tx) => tx.upsert_node_execution(execution.clone()).map(|()| tx.commit()),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!("Failed to persist execution of node {}: {}", execution.node_id, e);
        }
    }
}

#[derive(Clone)]
pub struct FlowRunner {
    store: Store,
    executor: RequestExecutor,
    request_slots: Arc<Semaphore>,
    default_timeout: Duration,
}

impl FlowRunner {
    pub fn new(
        store: Store,
        executor: RequestExecutor,
        max_parallel_requests: usize,
        default_timeout: Duration,
    ) -> Self {
        Self {
            store,
            executor,
            request_slots: Arc::new(Semaphore::new(max_parallel_requests.max(1))),
            default_timeout,
        }
    }

    /// Run a flow to completion, reporting status as it goes.
    ///
    /// Validation failures return an error before anything is reported. Once the run has
    /// started the terminal state is carried by the summary and the flow status channel.
    pub async fn run(
        &self,
        flow_id: Id,
        options: RunOptions,
        reporter: RunReporter,
        cancel: CancellationToken,
    ) -> Result<RunSummary, RunnerError> {
        let (nodes, edges, environment, flow_variables) = {
            let reader = self.store.reader().await?;
            let flow = reader
                .get_flow(flow_id)
                .ok_or(RunnerError::FlowNotFound(flow_id))?;
            let environment_id = flow.environment_id.or_else(|| {
                reader
                    .get_workspace(flow.workspace_id)
                    .and_then(|w| w.active_env_id)
            });
            let environment: Map<String, Value> = environment_id
                .map(|id| reader.list_variables(id))
                .unwrap_or_default()
                .into_iter()
                .filter(|v| v.enabled)
                .map(|v| (v.key, Value::String(v.value)))
                .collect();
            let flow_variables: Map<String, Value> = reader
                .list_flow_variables(flow_id)
                .into_iter()
                .filter(|v| v.enabled)
                .map(|v| (v.key, Value::String(v.value)))
                .collect();
            (
                reader.list_nodes(flow_id),
                reader.list_edges(flow_id),
                environment,
                flow_variables,
            )
        };

        let run_id = Id::new();
        if nodes.is_empty() {
            reporter
                .flow(flow_event(run_id, flow_id, FlowRunStatus::Started, None))
                .await;
            reporter
                .flow(flow_event(run_id, flow_id, FlowRunStatus::Succeeded, None))
                .await;
            return Ok(RunSummary {
                run_id,
                flow_id,
                status: FlowRunStatus::Succeeded,
                node_statuses: HashMap::new(),
                executions: Vec::new(),
                variables: flow_variables,
                error: None,
            });
        }

        let starts: Vec<Id> = nodes.iter().filter(|n| n.is_start()).map(|n| n.id).collect();
        let start = match starts.as_slice() {
            [one] => *one,
            [] => return Err(RunnerError::InvalidFlow("flow has no start node".to_string())),
            _ => {
                return Err(RunnerError::InvalidFlow(
                    "flow has more than one start node".to_string(),
                ));
            }
        };
        if graph::detect_cycles(&edges) {
            return Err(RunnerError::InvalidFlow("flow graph contains a cycle".to_string()));
        }

        let run_cancel = cancel.child_token();
        let timeout = options.timeout.unwrap_or(self.default_timeout);
        let timer = {
            let token = run_cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                token.cancel();
            })
        };

        let ctx = Arc::new(RunContext {
            run_id,
            flow_id,
            plan: Plan::build(start, nodes, edges),
            store: self.store.clone(),
            executor: self.executor.clone(),
            reporter: reporter.clone(),
            cancel: run_cancel.clone(),
            request_slots: self.request_slots.clone(),
            stop_on_failure: options.stop_on_failure,
            user_id: options.user_id,
            attempts: Mutex::new(HashMap::new()),
            statuses: Mutex::new(HashMap::new()),
            executions: Mutex::new(Vec::new()),
        });
        let scope = ScopeChain::new(environment, flow_variables);

        info!("Running flow {} (run {})", flow_id, run_id);
        reporter
            .flow(flow_event(run_id, flow_id, FlowRunStatus::Started, None))
            .await;

        let outcome = run_subgraph(ctx.clone(), ctx.plan.top.clone(), scope.clone()).await;
        timer.abort();

        let (status, error) = if outcome.canceled {
            let reason = if cancel.is_cancelled() {
                "run canceled".to_string()
            } else {
                format!("run timed out after {} ms", timeout.as_millis())
            };
            (FlowRunStatus::Canceled, Some(reason))
        } else if outcome.failed {
            (FlowRunStatus::Failed, outcome.error)
        } else {
            (FlowRunStatus::Succeeded, None)
        };
        info!("Flow {} run {} finished: {:?}", flow_id, run_id, status);
        reporter
            .flow(flow_event(run_id, flow_id, status, error.clone()))
            .await;

        let node_statuses = lock(&ctx.statuses).clone();
        let executions = lock(&ctx.executions).clone();
        Ok(RunSummary {
            run_id,
            flow_id,
            status,
            node_statuses,
            executions,
            variables: scope.flow_snapshot(),
            error,
        })
    }
}

fn flow_event(run_id: Id, flow_id: Id, status: FlowRunStatus, error: Option<String>) -> FlowStatusEvent {
    FlowStatusEvent {
        run_id,
        flow_id,
        status,
        error,
    }
}

fn run_subgraph(
    ctx: Arc<RunContext>,
    subgraph: Subgraph,
    scope: ScopeChain,
) -> BoxFuture<'static, SubgraphOutcome> {
    Box::pin(async move {
        let members = subgraph.members.clone();
        let mut edge_live: HashMap<Id, bool> = HashMap::new();
        let mut ready: VecDeque<Id> = subgraph.entries.iter().copied().collect();
        // Nodes that were started or skipped.
        let mut settled: HashSet<Id> = HashSet::new();
        let mut in_flight = FuturesUnordered::new();
        let mut outcome = SubgraphOutcome::default();

        loop {
            let halted = ctx.cancel.is_cancelled() || (outcome.failed && ctx.stop_on_failure);
            if !halted {
                while let Some(id) = ready.pop_front() {
                    if settled.insert(id) {
                        in_flight.push(run_node(ctx.clone(), id, scope.clone()));
                    }
                }
            }
            let Some((id, result)) = in_flight.next().await else {
                break;
            };

            match result.status {
                NodeStatus::Canceled => outcome.canceled = true,
                NodeStatus::Failed if !result.tolerated => {
                    outcome.failed = true;
                    if outcome.error.is_none() {
                        let name = ctx.plan.nodes.get(&id).map(|n| n.name.as_str()).unwrap_or("?");
                        outcome.error = Some(format!(
                            "node {} failed: {}",
                            name,
                            result.error.as_deref().unwrap_or("unknown error")
                        ));
                    }
                }
                _ => {}
            }

            // Resolve the finished node's edges, then settle targets; skipped targets kill
            // their own edges in turn.
            let mut resolved = vec![(id, result.passes(), result.taken)];
            while let Some((source, passes, taken)) = resolved.pop() {
                let mut targets = Vec::new();
                for edge in Plan::member_edges(&ctx.plan.outgoing, source, &members) {
                    edge_live.insert(edge.id, passes && taken.contains(&edge.handle));
                    targets.push(edge.target_id);
                }
                for target in targets {
                    if settled.contains(&target) || ready.contains(&target) {
                        continue;
                    }
                    let states: Vec<Option<bool>> =
                        Plan::member_edges(&ctx.plan.incoming, target, &members)
                            .map(|e| edge_live.get(&e.id).copied())
                            .collect();
                    if states.iter().any(Option::is_none) {
                        continue;
                    }
                    if states.iter().any(|s| *s == Some(true)) {
                        ready.push_back(target);
                    } else if let Some(node) = ctx.plan.nodes.get(&target) {
                        settled.insert(target);
                        debug!("Skipping node {}: no live incoming edge", node.name);
                        ctx.report(node, NodeStatus::Skipped, 0, None, None).await;
                        resolved.push((target, false, Vec::new()));
                    }
                }
            }
        }

        let canceled = ctx.cancel.is_cancelled();
        let mut unreached: Vec<&Node> = members
            .iter()
            .filter(|id| !settled.contains(*id))
            .filter_map(|id| ctx.plan.nodes.get(id))
            .collect();
        unreached.sort_by(|a, b| a.name.cmp(&b.name));
        for node in unreached {
            let status = if canceled {
                NodeStatus::Canceled
            } else {
                NodeStatus::Skipped
            };
            ctx.report(node, status, 0, None, None).await;
        }
        outcome.canceled |= canceled;
        outcome
    })
}

fn run_node(
    ctx: Arc<RunContext>,
    node_id: Id,
    scope: ScopeChain,
) -> BoxFuture<'static, (Id, NodeOutcome)> {
    Box::pin(async move {
        let Some(node) = ctx.plan.nodes.get(&node_id).cloned() else {
            return (node_id, NodeOutcome::failed("unknown node"));
        };
        let attempt = ctx.next_attempt(node_id);
        let mut execution = NodeExecution {
            id: Id::new(),
            run_id: ctx.run_id,
            flow_id: ctx.flow_id,
            node_id,
            name: node.name.clone(),
            status: NodeStatus::Running,
            attempt,
            started_at: Utc::now(),
            completed_at: None,
            variables: Value::Null,
            response_id: None,
            error: None,
        };
        ctx.record(&execution).await;
        ctx.report(&node, NodeStatus::Running, attempt, None, None).await;

        let outcome = if ctx.cancel.is_cancelled() {
            NodeOutcome::canceled()
        } else {
            execute_node(&ctx, &node, &scope).await
        };

        execution.status = outcome.status;
        execution.completed_at = Some(Utc::now());
        execution.variables = outcome.output.clone().unwrap_or(Value::Null);
        execution.response_id = outcome.response_id;
        execution.error = outcome.error.clone();
        ctx.record(&execution).await;
        ctx.report(
            &node,
            outcome.status,
            attempt,
            outcome.output.clone(),
            outcome.error.clone(),
        )
        .await;
        (node_id, outcome)
    })
}

async fn execute_node(ctx: &Arc<RunContext>, node: &Node, scope: &ScopeChain) -> NodeOutcome {
    match &node.config {
        NodeConfig::ManualStart | NodeConfig::NoOp => {
            NodeOutcome::success(vec![EdgeHandle::Default], None)
        }
        NodeConfig::Request {
            http_id,
            continue_on_failure,
        } => {
            let outcome = run_request(ctx, node, *http_id, scope).await;
            if *continue_on_failure {
                outcome.tolerate()
            } else {
                outcome
            }
        }
        NodeConfig::Condition { expression: source } => match expression::evaluate(source, scope) {
            Ok(value) => {
                let result = truthy(&value);
                let output = json!({ "result": result });
                scope.bind_flow(&node.name, output.clone());
                let handle = if result {
                    EdgeHandle::True
                } else {
                    EdgeHandle::False
                };
                NodeOutcome::success(vec![handle], Some(output))
            }
            Err(e) => NodeOutcome::failed(format!("condition: {}", e)),
        },
        NodeConfig::Script { source } => {
            let isolated = scope.merged();
            match script::run(source, &isolated) {
                Ok(out) => {
                    // Script results are flow-local even when run inside a loop body.
                    for (key, value) in &out.values {
                        scope.bind_flow(key, value.clone());
                    }
                    let output = Value::Object(out.values);
                    scope.bind_flow(&node.name, output.clone());
                    NodeOutcome::success(vec![EdgeHandle::Default], Some(output))
                }
                Err(e) => NodeOutcome::failed(e.to_string()),
            }
        }
        NodeConfig::For {
            iterations,
            item_alias,
            error_policy,
        } => {
            let count = match expression::evaluate(iterations, scope) {
                Ok(value) => match iteration_count(&value) {
                    Some(n) if n <= MAX_ITERATIONS => n,
                    Some(n) => {
                        return NodeOutcome::failed(format!(
                            "iteration count {} exceeds {}",
                            n, MAX_ITERATIONS
                        ));
                    }
                    None => {
                        return NodeOutcome::failed(format!(
                            "iteration count is not a number: {}",
                            value
                        ));
                    }
                },
                Err(e) => return NodeOutcome::failed(format!("iterations: {}", e)),
            };
            let frames = (0..count)
                .map(|i| {
                    let mut frame = Map::new();
                    frame.insert("index".to_string(), json!(i));
                    if let Some(alias) = item_alias.as_deref().filter(|a| !a.is_empty()) {
                        frame.insert(alias.to_string(), json!(i));
                    }
                    frame
                })
                .collect();
            run_iterations(ctx, node, frames, *error_policy, false, scope).await
        }
        NodeConfig::ForEach {
            collection,
            item_name,
            index_name,
            error_policy,
            parallel,
        } => {
            let value = match expression::evaluate(collection, scope) {
                Ok(v) => v,
                Err(e) => return NodeOutcome::failed(format!("collection: {}", e)),
            };
            let frames: Vec<Map<String, Value>> = match value {
                Value::Array(items) => items
                    .into_iter()
                    .enumerate()
                    .map(|(i, item)| {
                        let mut frame = Map::new();
                        frame.insert(item_name.clone(), item);
                        frame.insert(index_name.clone(), json!(i));
                        frame
                    })
                    .collect(),
                Value::Object(entries) => entries
                    .into_iter()
                    .map(|(key, item)| {
                        let mut frame = Map::new();
                        frame.insert(item_name.clone(), item);
                        frame.insert(index_name.clone(), Value::String(key));
                        frame
                    })
                    .collect(),
                other => {
                    return NodeOutcome::failed(format!("collection is not iterable: {}", other));
                }
            };
            run_iterations(ctx, node, frames, *error_policy, *parallel, scope).await
        }
    }
}

fn iteration_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.max(0.0) as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

async fn run_request(
    ctx: &Arc<RunContext>,
    node: &Node,
    http_id: Option<Id>,
    scope: &ScopeChain,
) -> NodeOutcome {
    let Some(http_id) = http_id else {
        return NodeOutcome::failed("request node has no request attached");
    };
    let _permit = tokio::select! {
        _ = ctx.cancel.cancelled() => return NodeOutcome::canceled(),
        permit = ctx.request_slots.acquire() => match permit {
            Ok(p) => p,
            Err(_) => return NodeOutcome::canceled(),
        },
    };
    match ctx
        .executor
        .execute(http_id, scope, ctx.user_id, &ctx.cancel)
        .await
    {
        Ok(execution) => {
            let output = execution.output();
            scope.bind_flow(&node.name, output.clone());
            let mut outcome = if execution.all_assertions_passed() {
                NodeOutcome::success(vec![EdgeHandle::Default], Some(output))
            } else {
                let failed: Vec<&str> = execution
                    .assertions
                    .iter()
                    .filter(|a| !a.success)
                    .map(|a| a.expression.as_str())
                    .collect();
                NodeOutcome {
                    output: Some(output),
                    ..NodeOutcome::failed(format!("assertions failed: {}", failed.join(", ")))
                }
            };
            outcome.response_id = Some(execution.response.id);
            outcome
        }
        Err(ExecutorError::Canceled) => NodeOutcome::canceled(),
        Err(e) => NodeOutcome::failed(e.to_string()),
    }
}

async fn run_iterations(
    ctx: &Arc<RunContext>,
    node: &Node,
    frames: Vec<Map<String, Value>>,
    policy: ErrorPolicy,
    parallel: bool,
    scope: &ScopeChain,
) -> NodeOutcome {
    let body = ctx.plan.loop_bodies.get(&node.id).cloned().unwrap_or_default();
    let total = frames.len();
    let mut completed = 0usize;
    let mut failures: Vec<String> = Vec::new();
    let mut aborted = false;

    if parallel {
        let mut running: FuturesUnordered<_> = frames
            .into_iter()
            .enumerate()
            .map(|(i, frame)| {
                let iteration = run_subgraph(ctx.clone(), body.clone(), scope.with_iteration(frame));
                async move { (i, iteration.await) }
            })
            .collect();
        let mut canceled = false;
        while let Some((i, outcome)) = running.next().await {
            canceled |= outcome.canceled;
            if outcome.failed {
                failures.push(format!("iteration {}: {}", i, outcome.error.unwrap_or_default()));
            } else if !outcome.canceled {
                completed += 1;
            }
        }
        if canceled {
            return NodeOutcome::canceled();
        }
        aborted = !failures.is_empty() && policy == ErrorPolicy::Abort;
    } else {
        for (i, frame) in frames.into_iter().enumerate() {
            if ctx.cancel.is_cancelled() {
                return NodeOutcome::canceled();
            }
            let outcome = run_subgraph(ctx.clone(), body.clone(), scope.with_iteration(frame)).await;
            if outcome.canceled {
                return NodeOutcome::canceled();
            }
            if !outcome.failed {
                completed += 1;
                continue;
            }
            failures.push(format!("iteration {}: {}", i, outcome.error.unwrap_or_default()));
            match policy {
                ErrorPolicy::Continue => {}
                ErrorPolicy::Break => break,
                ErrorPolicy::Abort => {
                    aborted = true;
                    break;
                }
            }
        }
    }

    let output = json!({ "iterations": total, "completed": completed, "failures": failures });
    scope.bind_flow(&node.name, output.clone());
    if aborted {
        return NodeOutcome {
            output: Some(output),
            ..NodeOutcome::failed(failures.join("; "))
        };
    }
    NodeOutcome::success(vec![EdgeHandle::LoopAfter, EdgeHandle::Default], Some(output))
}
