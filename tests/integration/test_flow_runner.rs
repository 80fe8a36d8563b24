//! Integration tests for running flows end to end against a local upstream

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use common::{add_http, seeded_store, spawn_upstream};
use workbench_api::ids::Id;
use workbench_api::models::{
    BodyKind, Edge, EdgeHandle, Environment, ErrorPolicy, Flow, FlowRunStatus, FlowVariable,
    HttpAssert, HttpBodyRaw, HttpKeyValue, KeyValueKind, Node, NodeConfig, NodeStatus, Variable,
};
use workbench_api::services::flow_runner::{
    FlowRunner, FlowStatusEvent, NodeStatusEvent, RunOptions, RunReporter, RunSummary,
    RunnerError,
};
use workbench_api::services::request_executor::RequestExecutor;
use workbench_api::storage::Store;

/// Flow under construction; everything is written in one transaction by `save`.
struct FlowBuilder {
    flow: Flow,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
}

impl FlowBuilder {
    fn new(workspace_id: Id) -> Self {
        let flow = Flow::new(Id::new(), workspace_id, "flow under test");
        let start = Node::new(Id::new(), flow.id, "start", NodeConfig::ManualStart);
        Self {
            flow,
            nodes: vec![start],
            edges: Vec::new(),
        }
    }

    fn start(&self) -> Id {
        self.nodes[0].id
    }

    fn node(&mut self, name: &str, config: NodeConfig) -> Id {
        let node = Node::new(Id::new(), self.flow.id, name, config);
        let id = node.id;
        self.nodes.push(node);
        id
    }

    fn request(&mut self, name: &str, http_id: Id) -> Id {
        self.node(
            name,
            NodeConfig::Request {
                http_id: Some(http_id),
                continue_on_failure: false,
            },
        )
    }

    fn link(&mut self, source: Id, target: Id, handle: EdgeHandle) {
        self.edges
            .push(Edge::new(Id::new(), self.flow.id, source, target, handle));
    }

    async fn save(self, store: &Store) -> Id {
        let mut tx = store.begin().await.unwrap();
        let id = self.flow.id;
        tx.create_flow(self.flow).unwrap();
        for node in self.nodes {
            tx.create_node(node).unwrap();
        }
        for edge in self.edges {
            tx.create_edge(edge).unwrap();
        }
        tx.commit();
        id
    }
}

fn runner(store: &Store) -> FlowRunner {
    let executor = RequestExecutor::new(store.clone(), Duration::from_secs(5)).unwrap();
    FlowRunner::new(store.clone(), executor, 4, Duration::from_secs(30))
}

async fn run(
    store: &Store,
    flow_id: Id,
    options: RunOptions,
    cancel: CancellationToken,
) -> (RunSummary, Vec<NodeStatusEvent>, Vec<FlowStatusEvent>) {
    let (reporter, receivers) = RunReporter::channel(16);
    let collector = tokio::spawn(receivers.collect());
    let summary = runner(store)
        .run(flow_id, options, reporter, cancel)
        .await
        .unwrap();
    let (nodes, flows) = collector.await.unwrap();
    (summary, nodes, flows)
}

async fn add_assert(store: &Store, http_id: Id, expression: &str) {
    let mut tx = store.begin().await.unwrap();
    tx.create_assert(HttpAssert::new(Id::new(), http_id, expression))
        .unwrap();
    tx.commit();
}

#[tokio::test]
async fn test_outputs_chain_between_requests() {
    let (base, _) = spawn_upstream().await;
    let (store, ws) = seeded_store().await;
    let login = add_http(&store, ws, "login", "POST", &format!("{}/login", base)).await;
    let me = add_http(&store, ws, "me", "GET", &format!("{}/echo/me", base)).await;
    {
        let mut tx = store.begin().await.unwrap();
        let mut h = tx.get_http(login.id).unwrap();
        h.body_kind = BodyKind::Raw;
        tx.update_http(h).unwrap();
        tx.create_body_raw(HttpBodyRaw::new(Id::new(), login.id, r#"{"user": "{{user}}"}"#))
            .unwrap();
        tx.create_key_value(HttpKeyValue::new(
            Id::new(),
            me.id,
            KeyValueKind::Header,
            "Authorization",
            "Bearer {{login.response.body.token}}",
        ))
        .unwrap();
        tx.commit();
    }

    let mut flow = FlowBuilder::new(ws);
    let start = flow.start();
    let login_node = flow.request("login", login.id);
    let me_node = flow.request("me", me.id);
    flow.link(start, login_node, EdgeHandle::Default);
    flow.link(login_node, me_node, EdgeHandle::Default);
    let flow_id = flow.save(&store).await;
    {
        let mut tx = store.begin().await.unwrap();
        tx.create_flow_variable(FlowVariable {
            id: Id::new(),
            flow_id,
            key: "user".into(),
            value: "ada".into(),
            enabled: true,
            description: String::new(),
            display_order: 0.0,
        })
        .unwrap();
        tx.commit();
    }

    let (summary, node_events, flow_events) =
        run(&store, flow_id, RunOptions::default(), CancellationToken::new()).await;

    assert_eq!(summary.status, FlowRunStatus::Succeeded, "{:?}", summary.error);
    assert_eq!(summary.node_status(me_node), Some(NodeStatus::Success));
    assert_eq!(
        summary.variables["me"]["response"]["body"]["headers"]["authorization"],
        "Bearer tok-ada"
    );
    assert_eq!(summary.variables["login"]["response"]["status"], 200);

    let statuses: Vec<FlowRunStatus> = flow_events.iter().map(|e| e.status).collect();
    assert_eq!(statuses, vec![FlowRunStatus::Started, FlowRunStatus::Succeeded]);
    let login_events: Vec<NodeStatus> = node_events
        .iter()
        .filter(|e| e.node_id == login_node)
        .map(|e| e.status)
        .collect();
    assert_eq!(login_events, vec![NodeStatus::Running, NodeStatus::Success]);

    // Executions are persisted and each request node points at its recorded response.
    let reader = store.reader().await.unwrap();
    let executions = reader.list_run_executions(summary.run_id);
    assert_eq!(executions.len(), 3);
    let me_exec = executions.iter().find(|e| e.node_id == me_node).unwrap();
    let response_id = me_exec.response_id.unwrap();
    assert_eq!(reader.get_response(response_id).unwrap().http_id, me.id);
}

#[tokio::test]
async fn test_environment_feeds_templates() {
    let (base, _) = spawn_upstream().await;
    let (store, ws) = seeded_store().await;
    let http = add_http(&store, ws, "items", "GET", "{{host}}/items").await;
    {
        let mut tx = store.begin().await.unwrap();
        let env = Environment {
            id: Id::new(),
            workspace_id: ws,
            name: "local".into(),
            description: String::new(),
            display_order: 0.0,
        };
        tx.create_environment(env.clone()).unwrap();
        tx.create_variable(Variable {
            id: Id::new(),
            environment_id: env.id,
            key: "host".into(),
            value: base.clone(),
            enabled: true,
            description: String::new(),
            display_order: 0.0,
        })
        .unwrap();
        let mut workspace = tx.get_workspace(ws).unwrap();
        workspace.active_env_id = Some(env.id);
        tx.update_workspace(workspace).unwrap();
        tx.commit();
    }

    let mut flow = FlowBuilder::new(ws);
    let start = flow.start();
    let items = flow.request("items", http.id);
    flow.link(start, items, EdgeHandle::Default);
    let flow_id = flow.save(&store).await;

    let (summary, _, _) = run(&store, flow_id, RunOptions::default(), CancellationToken::new()).await;
    assert_eq!(summary.status, FlowRunStatus::Succeeded, "{:?}", summary.error);
    assert_eq!(summary.variables["items"]["response"]["body"]["items"][2]["id"], 3);
}

#[tokio::test]
async fn test_condition_takes_one_branch() {
    let (store, ws) = seeded_store().await;
    let mut flow = FlowBuilder::new(ws);
    let start = flow.start();
    let check = flow.node(
        "check",
        NodeConfig::Condition {
            expression: "len(mode) > 3".into(),
        },
    );
    let yes = flow.node("yes", NodeConfig::NoOp);
    let no = flow.node("no", NodeConfig::NoOp);
    let after_no = flow.node("after no", NodeConfig::NoOp);
    flow.link(start, check, EdgeHandle::Default);
    flow.link(check, yes, EdgeHandle::True);
    flow.link(check, no, EdgeHandle::False);
    flow.link(no, after_no, EdgeHandle::Default);
    let flow_id = flow.save(&store).await;
    {
        let mut tx = store.begin().await.unwrap();
        tx.create_flow_variable(FlowVariable {
            id: Id::new(),
            flow_id,
            key: "mode".into(),
            value: "strict".into(),
            enabled: true,
            description: String::new(),
            display_order: 0.0,
        })
        .unwrap();
        tx.commit();
    }

    let (summary, _, _) = run(&store, flow_id, RunOptions::default(), CancellationToken::new()).await;
    assert_eq!(summary.status, FlowRunStatus::Succeeded);
    assert_eq!(summary.node_status(yes), Some(NodeStatus::Success));
    assert_eq!(summary.node_status(no), Some(NodeStatus::Skipped));
    assert_eq!(summary.node_status(after_no), Some(NodeStatus::Skipped));
    assert_eq!(summary.variables["check"], json!({"result": true}));
    assert_eq!(summary.attempts(no), 0);
}

#[tokio::test]
async fn test_falsy_condition_takes_false_branch() {
    let (store, ws) = seeded_store().await;
    for expression in ["''", "0", "false", "null"] {
        let mut flow = FlowBuilder::new(ws);
        let start = flow.start();
        let check = flow.node(
            "check",
            NodeConfig::Condition {
                expression: expression.into(),
            },
        );
        let yes = flow.node("yes", NodeConfig::NoOp);
        let after_yes = flow.node("after yes", NodeConfig::NoOp);
        let no = flow.node("no", NodeConfig::NoOp);
        flow.link(start, check, EdgeHandle::Default);
        flow.link(check, yes, EdgeHandle::True);
        flow.link(yes, after_yes, EdgeHandle::Default);
        flow.link(check, no, EdgeHandle::False);
        let flow_id = flow.save(&store).await;

        let (summary, _, _) =
            run(&store, flow_id, RunOptions::default(), CancellationToken::new()).await;
        assert_eq!(summary.status, FlowRunStatus::Succeeded, "{}", expression);
        assert_eq!(summary.node_status(no), Some(NodeStatus::Success), "{}", expression);
        assert_eq!(summary.node_status(yes), Some(NodeStatus::Skipped), "{}", expression);
        assert_eq!(summary.node_status(after_yes), Some(NodeStatus::Skipped), "{}", expression);
        assert_eq!(summary.attempts(yes), 0);
        assert_eq!(summary.variables["check"], json!({"result": false}));
    }
}

#[tokio::test]
async fn test_start_only_flow_succeeds() {
    let (store, ws) = seeded_store().await;
    let flow = FlowBuilder::new(ws);
    let start = flow.start();
    let flow_id = flow.save(&store).await;

    let (summary, _, flow_events) =
        run(&store, flow_id, RunOptions::default(), CancellationToken::new()).await;
    assert_eq!(summary.status, FlowRunStatus::Succeeded, "{:?}", summary.error);
    assert_eq!(summary.node_status(start), Some(NodeStatus::Success));
    assert_eq!(summary.attempts(start), 1);
    assert_eq!(flow_events.last().unwrap().status, FlowRunStatus::Succeeded);
}

#[tokio::test]
async fn test_zero_iterations_still_take_loop_after() {
    let (store, ws) = seeded_store().await;
    let mut flow = FlowBuilder::new(ws);
    let start = flow.start();
    let repeat = flow.node(
        "repeat",
        NodeConfig::For {
            iterations: "0".into(),
            item_alias: None,
            error_policy: ErrorPolicy::Abort,
        },
    );
    let body = flow.node("body", NodeConfig::NoOp);
    let after = flow.node("after", NodeConfig::NoOp);
    flow.link(start, repeat, EdgeHandle::Default);
    flow.link(repeat, body, EdgeHandle::LoopBody);
    flow.link(repeat, after, EdgeHandle::LoopAfter);
    let flow_id = flow.save(&store).await;

    let (summary, _, _) = run(&store, flow_id, RunOptions::default(), CancellationToken::new()).await;
    assert_eq!(summary.status, FlowRunStatus::Succeeded, "{:?}", summary.error);
    assert_eq!(summary.attempts(body), 0);
    assert_eq!(summary.node_status(after), Some(NodeStatus::Success));
    assert_eq!(summary.variables["repeat"]["iterations"], 0);
}

#[tokio::test]
async fn test_script_in_loop_body_writes_flow_scope() {
    let (store, ws) = seeded_store().await;
    let mut flow = FlowBuilder::new(ws);
    let start = flow.start();
    let repeat = flow.node(
        "repeat",
        NodeConfig::For {
            iterations: "3".into(),
            item_alias: Some("i".into()),
            error_policy: ErrorPolicy::Abort,
        },
    );
    // `i` is bound by the iteration; the script result still lands in flow scope.
    let body = flow.node(
        "bump",
        NodeConfig::Script {
            source: "let i = i + 10".into(),
        },
    );
    flow.link(start, repeat, EdgeHandle::Default);
    flow.link(repeat, body, EdgeHandle::LoopBody);
    let flow_id = flow.save(&store).await;

    let (summary, _, _) = run(&store, flow_id, RunOptions::default(), CancellationToken::new()).await;
    assert_eq!(summary.status, FlowRunStatus::Succeeded, "{:?}", summary.error);
    assert_eq!(summary.attempts(body), 3);
    assert_eq!(summary.variables["i"].as_f64(), Some(12.0));
}

#[tokio::test]
async fn test_join_runs_once_after_both_parents() {
    let (store, ws) = seeded_store().await;
    let mut flow = FlowBuilder::new(ws);
    let start = flow.start();
    let left = flow.node("left", NodeConfig::NoOp);
    let right = flow.node("right", NodeConfig::NoOp);
    let join = flow.node("join", NodeConfig::NoOp);
    flow.link(start, left, EdgeHandle::Default);
    flow.link(start, right, EdgeHandle::Default);
    flow.link(left, join, EdgeHandle::Default);
    flow.link(right, join, EdgeHandle::Default);
    let flow_id = flow.save(&store).await;

    let (summary, events, _) =
        run(&store, flow_id, RunOptions::default(), CancellationToken::new()).await;
    assert_eq!(summary.status, FlowRunStatus::Succeeded);
    assert_eq!(summary.attempts(join), 1);

    let position = |id: Id, status: NodeStatus| {
        events
            .iter()
            .position(|e| e.node_id == id && e.status == status)
            .unwrap()
    };
    assert!(position(left, NodeStatus::Success) < position(join, NodeStatus::Running));
    assert!(position(right, NodeStatus::Success) < position(join, NodeStatus::Running));
}

#[tokio::test]
async fn test_for_each_runs_body_per_item() {
    let (base, upstream) = spawn_upstream().await;
    let (store, ws) = seeded_store().await;
    let counter = add_http(&store, ws, "count", "GET", &format!("{}/counter", base)).await;

    let mut flow = FlowBuilder::new(ws);
    let start = flow.start();
    let each = flow.node(
        "each",
        NodeConfig::ForEach {
            collection: "['a', 'b', 'c']".into(),
            item_name: "letter".into(),
            index_name: "i".into(),
            error_policy: ErrorPolicy::Abort,
            parallel: false,
        },
    );
    let body = flow.request("count", counter.id);
    let done = flow.node("done", NodeConfig::NoOp);
    flow.link(start, each, EdgeHandle::Default);
    flow.link(each, body, EdgeHandle::LoopBody);
    flow.link(each, done, EdgeHandle::LoopAfter);
    let flow_id = flow.save(&store).await;

    let (summary, _, _) = run(&store, flow_id, RunOptions::default(), CancellationToken::new()).await;
    assert_eq!(summary.status, FlowRunStatus::Succeeded, "{:?}", summary.error);
    assert_eq!(upstream.hits.load(Ordering::SeqCst), 3);
    assert_eq!(summary.attempts(body), 3);
    assert_eq!(summary.node_status(done), Some(NodeStatus::Success));
    assert_eq!(summary.variables["each"]["iterations"], 3);
    assert_eq!(summary.variables["each"]["completed"], 3);
    // The last iteration's output is visible after the loop.
    assert_eq!(summary.variables["count"]["response"]["body"]["count"], 3);
}

#[tokio::test]
async fn test_for_loop_error_policies() {
    let (base, _) = spawn_upstream().await;
    let (store, ws) = seeded_store().await;
    let broken = add_http(&store, ws, "broken", "GET", &format!("{}/status/500", base)).await;
    add_assert(&store, broken.id, "response.status == 200").await;

    for (policy, expected, completed_iterations) in [
        (ErrorPolicy::Continue, FlowRunStatus::Succeeded, 3),
        (ErrorPolicy::Break, FlowRunStatus::Succeeded, 1),
        (ErrorPolicy::Abort, FlowRunStatus::Failed, 1),
    ] {
        let mut flow = FlowBuilder::new(ws);
        let start = flow.start();
        let repeat = flow.node(
            "repeat",
            NodeConfig::For {
                iterations: "3".into(),
                item_alias: None,
                error_policy: policy,
            },
        );
        let body = flow.request("broken", broken.id);
        let after = flow.node("after", NodeConfig::NoOp);
        flow.link(start, repeat, EdgeHandle::Default);
        flow.link(repeat, body, EdgeHandle::LoopBody);
        flow.link(repeat, after, EdgeHandle::LoopAfter);
        let flow_id = flow.save(&store).await;

        let (summary, _, _) =
            run(&store, flow_id, RunOptions::default(), CancellationToken::new()).await;
        assert_eq!(summary.status, expected, "{:?}", policy);
        assert_eq!(summary.attempts(body), completed_iterations, "{:?}", policy);
        let after_status = if expected == FlowRunStatus::Succeeded {
            NodeStatus::Success
        } else {
            NodeStatus::Skipped
        };
        assert_eq!(summary.node_status(after), Some(after_status), "{:?}", policy);
    }
}

#[tokio::test]
async fn test_failed_assertion_stops_the_flow() {
    let (base, _) = spawn_upstream().await;
    let (store, ws) = seeded_store().await;
    let broken = add_http(&store, ws, "broken", "GET", &format!("{}/status/503", base)).await;
    add_assert(&store, broken.id, "response.status == 200").await;

    let mut flow = FlowBuilder::new(ws);
    let start = flow.start();
    let call = flow.request("call", broken.id);
    let next = flow.node("next", NodeConfig::NoOp);
    flow.link(start, call, EdgeHandle::Default);
    flow.link(call, next, EdgeHandle::Default);
    let flow_id = flow.save(&store).await;

    let (summary, node_events, flow_events) =
        run(&store, flow_id, RunOptions::default(), CancellationToken::new()).await;
    assert_eq!(summary.status, FlowRunStatus::Failed);
    assert!(summary.error.as_deref().unwrap().contains("response.status == 200"));
    assert_eq!(summary.node_status(call), Some(NodeStatus::Failed));
    assert_eq!(summary.node_status(next), Some(NodeStatus::Skipped));
    // The failed node still exposes what it saw.
    let failed = node_events
        .iter()
        .find(|e| e.node_id == call && e.status == NodeStatus::Failed)
        .unwrap();
    assert_eq!(failed.payload.as_ref().unwrap()["response"]["status"], 503);
    assert_eq!(flow_events.last().unwrap().status, FlowRunStatus::Failed);
}

#[tokio::test]
async fn test_continue_on_failure_keeps_going() {
    let (base, _) = spawn_upstream().await;
    let (store, ws) = seeded_store().await;
    let broken = add_http(&store, ws, "broken", "GET", &format!("{}/status/500", base)).await;
    add_assert(&store, broken.id, "response.status == 200").await;

    let mut flow = FlowBuilder::new(ws);
    let start = flow.start();
    let call = flow.node(
        "call",
        NodeConfig::Request {
            http_id: Some(broken.id),
            continue_on_failure: true,
        },
    );
    let next = flow.node("next", NodeConfig::NoOp);
    flow.link(start, call, EdgeHandle::Default);
    flow.link(call, next, EdgeHandle::Default);
    let flow_id = flow.save(&store).await;

    let (summary, _, _) = run(&store, flow_id, RunOptions::default(), CancellationToken::new()).await;
    assert_eq!(summary.status, FlowRunStatus::Succeeded);
    assert_eq!(summary.node_status(call), Some(NodeStatus::Failed));
    assert_eq!(summary.node_status(next), Some(NodeStatus::Success));
}

#[tokio::test]
async fn test_script_writes_flow_variables() {
    let (store, ws) = seeded_store().await;
    let mut flow = FlowBuilder::new(ws);
    let start = flow.start();
    let script = flow.node(
        "compute",
        NodeConfig::Script {
            source: "let total = int(count) * 2".into(),
        },
    );
    let gate = flow.node(
        "gate",
        NodeConfig::Condition {
            expression: "total == 6".into(),
        },
    );
    let ok = flow.node("ok", NodeConfig::NoOp);
    flow.link(start, script, EdgeHandle::Default);
    flow.link(script, gate, EdgeHandle::Default);
    flow.link(gate, ok, EdgeHandle::True);
    let flow_id = flow.save(&store).await;
    {
        let mut tx = store.begin().await.unwrap();
        tx.create_flow_variable(FlowVariable {
            id: Id::new(),
            flow_id,
            key: "count".into(),
            value: "3".into(),
            enabled: true,
            description: String::new(),
            display_order: 0.0,
        })
        .unwrap();
        tx.commit();
    }

    let (summary, _, _) = run(&store, flow_id, RunOptions::default(), CancellationToken::new()).await;
    assert_eq!(summary.status, FlowRunStatus::Succeeded, "{:?}", summary.error);
    assert_eq!(summary.variables["total"].as_f64(), Some(6.0));
    assert_eq!(summary.node_status(ok), Some(NodeStatus::Success));
}

#[tokio::test]
async fn test_timeout_cancels_the_run() {
    let (base, _) = spawn_upstream().await;
    let (store, ws) = seeded_store().await;
    let slow = add_http(&store, ws, "slow", "GET", &format!("{}/slow", base)).await;

    let mut flow = FlowBuilder::new(ws);
    let start = flow.start();
    let call = flow.request("slow", slow.id);
    let after = flow.node("after", NodeConfig::NoOp);
    flow.link(start, call, EdgeHandle::Default);
    flow.link(call, after, EdgeHandle::Default);
    let flow_id = flow.save(&store).await;

    let options = RunOptions {
        timeout: Some(Duration::from_millis(200)),
        ..RunOptions::default()
    };
    let (summary, _, flow_events) = run(&store, flow_id, options, CancellationToken::new()).await;
    assert_eq!(summary.status, FlowRunStatus::Canceled);
    assert!(summary.error.as_deref().unwrap().contains("timed out"));
    assert_eq!(summary.node_status(call), Some(NodeStatus::Canceled));
    assert_ne!(summary.node_status(after), Some(NodeStatus::Success));
    assert_eq!(flow_events.last().unwrap().status, FlowRunStatus::Canceled);
}

#[tokio::test]
async fn test_external_cancel() {
    let (base, _) = spawn_upstream().await;
    let (store, ws) = seeded_store().await;
    let slow = add_http(&store, ws, "slow", "GET", &format!("{}/slow", base)).await;

    let mut flow = FlowBuilder::new(ws);
    let start = flow.start();
    let call = flow.request("slow", slow.id);
    flow.link(start, call, EdgeHandle::Default);
    let flow_id = flow.save(&store).await;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });
    let (summary, _, _) = run(&store, flow_id, RunOptions::default(), cancel).await;
    assert_eq!(summary.status, FlowRunStatus::Canceled);
    assert_eq!(summary.error.as_deref(), Some("run canceled"));
}

#[tokio::test]
async fn test_invalid_flows_are_rejected_before_running() {
    let (store, ws) = seeded_store().await;
    let runner = runner(&store);

    let (reporter, _receivers) = RunReporter::channel(4);
    assert!(matches!(
        runner
            .run(Id::new(), RunOptions::default(), reporter, CancellationToken::new())
            .await,
        Err(RunnerError::FlowNotFound(_))
    ));

    // Nodes but no start node.
    let flow = Flow::new(Id::new(), ws, "headless");
    {
        let mut tx = store.begin().await.unwrap();
        tx.create_flow(flow.clone()).unwrap();
        tx.create_node(Node::new(Id::new(), flow.id, "lonely", NodeConfig::NoOp))
            .unwrap();
        tx.commit();
    }
    let (reporter, mut receivers) = RunReporter::channel(4);
    assert!(matches!(
        runner
            .run(flow.id, RunOptions::default(), reporter, CancellationToken::new())
            .await,
        Err(RunnerError::InvalidFlow(_))
    ));
    assert!(receivers.flow.try_recv().is_err());
}

#[tokio::test]
async fn test_empty_flow_succeeds() {
    let (store, ws) = seeded_store().await;
    let flow = Flow::new(Id::new(), ws, "empty");
    {
        let mut tx = store.begin().await.unwrap();
        tx.create_flow(flow.clone()).unwrap();
        tx.commit();
    }
    let (summary, nodes, flows) =
        run(&store, flow.id, RunOptions::default(), CancellationToken::new()).await;
    assert_eq!(summary.status, FlowRunStatus::Succeeded);
    assert!(nodes.is_empty());
    assert_eq!(flows.len(), 2);
}
