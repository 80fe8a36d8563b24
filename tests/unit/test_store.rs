//! Unit tests for the transactional entity store

use workbench_api::ids::Id;
use workbench_api::models::{
    ContentKind, Edge, EdgeHandle, Environment, FileEntry, Flow, Http, Node, NodeConfig, Role,
    Variable, Workspace, WorkspaceMember,
};
use workbench_api::storage::ordering::{after_last, between, cmp_order};
use workbench_api::storage::{StorageError, Store};

fn member(workspace_id: Id, user_id: Id, role: Role) -> WorkspaceMember {
    WorkspaceMember {
        id: Id::new(),
        workspace_id,
        user_id,
        role,
    }
}

fn environment(workspace_id: Id, name: &str) -> Environment {
    Environment {
        id: Id::new(),
        workspace_id,
        name: name.to_string(),
        description: String::new(),
        display_order: 0.0,
    }
}

fn folder(workspace_id: Id, parent_id: Option<Id>, name: &str) -> FileEntry {
    FileEntry {
        id: Id::new(),
        workspace_id,
        parent_id,
        content_id: None,
        kind: ContentKind::Folder,
        name: name.to_string(),
        display_order: 0.0,
    }
}

async fn store_with_workspace() -> (Store, Id) {
    let store = Store::new();
    let mut tx = store.begin().await.unwrap();
    let ws = Workspace::new(Id::new(), "main");
    let id = ws.id;
    tx.create_workspace(ws).unwrap();
    tx.commit();
    (store, id)
}

#[tokio::test]
async fn test_commit_makes_writes_visible() {
    let (store, ws) = store_with_workspace().await;
    let reader = store.reader().await.unwrap();
    assert_eq!(reader.get_workspace(ws).unwrap().name, "main");
}

#[tokio::test]
async fn test_failed_transaction_leaves_no_partial_writes() {
    let (store, ws) = store_with_workspace().await;
    {
        let mut tx = store.begin().await.unwrap();
        tx.create_environment(environment(ws, "dev")).unwrap();
        // Second write fails; the caller bails out without committing.
        let err = tx.create_flow(Flow::new(Id::new(), Id::new(), "orphan"));
        assert!(matches!(err, Err(StorageError::ReferentialError { .. })));
        tx.rollback();
    }
    let reader = store.reader().await.unwrap();
    assert!(reader.list_environments(ws).is_empty());
}

#[tokio::test]
async fn test_closed_store_refuses_access() {
    let store = Store::new();
    store.close();
    assert!(store.is_closed());
    assert!(matches!(
        store.begin().await,
        Err(StorageError::Unavailable(_))
    ));
    assert!(matches!(
        store.reader().await,
        Err(StorageError::Unavailable(_))
    ));
}

#[tokio::test]
async fn test_duplicate_ids_conflict() {
    let (store, ws) = store_with_workspace().await;
    let mut tx = store.begin().await.unwrap();
    let dup = tx.get_workspace(ws).unwrap();
    assert!(matches!(
        tx.create_workspace(dup),
        Err(StorageError::Conflict { .. })
    ));
}

#[tokio::test]
async fn test_membership_rules() {
    let (store, ws) = store_with_workspace().await;
    let owner = Id::new();
    let guest = Id::new();
    let mut tx = store.begin().await.unwrap();
    tx.add_member(member(ws, owner, Role::Owner)).unwrap();
    tx.add_member(member(ws, guest, Role::Member)).unwrap();
    assert!(matches!(
        tx.add_member(member(ws, guest, Role::Admin)),
        Err(StorageError::Conflict { .. })
    ));

    assert_eq!(tx.member_role(ws, guest), Some(Role::Member));
    assert!(Role::Owner.allows(Role::Admin));
    assert!(!Role::Member.allows(Role::Admin));

    assert!(matches!(
        tx.remove_member(ws, owner),
        Err(StorageError::Conflict { .. })
    ));
    tx.remove_member(ws, guest).unwrap();
    assert_eq!(tx.list_members(ws).len(), 1);
    assert_eq!(tx.list_workspaces_for_user(owner).len(), 1);
    assert!(tx.list_workspaces_for_user(guest).is_empty());
}

#[tokio::test]
async fn test_active_environment_must_belong_to_workspace() {
    let (store, ws) = store_with_workspace().await;
    let mut tx = store.begin().await.unwrap();
    let other = Workspace::new(Id::new(), "other");
    let other_id = other.id;
    tx.create_workspace(other).unwrap();
    let foreign = environment(other_id, "prod");
    tx.create_environment(foreign.clone()).unwrap();

    let mut workspace = tx.get_workspace(ws).unwrap();
    workspace.active_env_id = Some(foreign.id);
    assert!(matches!(
        tx.update_workspace(workspace.clone()),
        Err(StorageError::ReferentialError { .. })
    ));

    let local = environment(ws, "dev");
    tx.create_environment(local.clone()).unwrap();
    workspace.active_env_id = Some(local.id);
    tx.update_workspace(workspace).unwrap();

    tx.delete_environment(local.id).unwrap();
    assert_eq!(tx.get_workspace(ws).unwrap().active_env_id, None);
}

#[tokio::test]
async fn test_environment_delete_cascades_variables() {
    let (store, ws) = store_with_workspace().await;
    let mut tx = store.begin().await.unwrap();
    let env = environment(ws, "dev");
    tx.create_environment(env.clone()).unwrap();
    for (i, key) in ["host", "token"].iter().enumerate() {
        tx.create_variable(Variable {
            id: Id::new(),
            environment_id: env.id,
            key: key.to_string(),
            value: "v".into(),
            enabled: true,
            description: String::new(),
            display_order: i as f64,
        })
        .unwrap();
    }
    assert_eq!(tx.variables_by_environment(ws)[&env.id].len(), 2);
    tx.delete_environment(env.id).unwrap();
    assert!(tx.list_variables(env.id).is_empty());
}

#[tokio::test]
async fn test_file_tree_rules() {
    let (store, ws) = store_with_workspace().await;
    let mut tx = store.begin().await.unwrap();
    let root = folder(ws, None, "api");
    let child = folder(ws, Some(root.id), "users");
    tx.create_file(root.clone()).unwrap();
    tx.create_file(child.clone()).unwrap();

    // A folder cannot move under its own descendant.
    let mut moved = root.clone();
    moved.parent_id = Some(child.id);
    assert!(matches!(
        tx.update_file(moved),
        Err(StorageError::Invalid { .. })
    ));

    // Only folders can be parents.
    let http = Http::new(Id::new(), ws, "ping", "GET", "https://a.test/ping");
    tx.create_http(http.clone()).unwrap();
    let entry = FileEntry {
        id: Id::new(),
        workspace_id: ws,
        parent_id: Some(child.id),
        content_id: Some(http.id),
        kind: ContentKind::Http,
        name: "ping".into(),
        display_order: 0.0,
    };
    tx.create_file(entry.clone()).unwrap();
    let mut under_request = folder(ws, Some(entry.id), "nope");
    assert!(tx.create_file(under_request.clone()).is_err());
    under_request.parent_id = Some(Id::new());
    assert!(matches!(
        tx.create_file(under_request),
        Err(StorageError::ReferentialError { .. })
    ));

    assert_eq!(tx.file_for_content(http.id).unwrap().id, entry.id);
    assert_eq!(tx.list_children(ws, Some(child.id)).len(), 1);
    let removed = tx.delete_file_tree(root.id).unwrap();
    assert_eq!(removed.len(), 3);
    assert!(tx.list_files(ws).is_empty());
}

#[tokio::test]
async fn test_edge_constraints() {
    let (store, ws) = store_with_workspace().await;
    let mut tx = store.begin().await.unwrap();
    let flow = Flow::new(Id::new(), ws, "checkout");
    tx.create_flow(flow.clone()).unwrap();
    let start = Node::new(Id::new(), flow.id, "Start", NodeConfig::ManualStart);
    let step = Node::new(Id::new(), flow.id, "step", NodeConfig::NoOp);
    tx.create_node(start.clone()).unwrap();
    tx.create_node(step.clone()).unwrap();

    assert!(matches!(
        tx.create_node(Node::new(Id::new(), flow.id, "again", NodeConfig::ManualStart)),
        Err(StorageError::Conflict { .. })
    ));

    let edge = Edge::new(Id::new(), flow.id, start.id, step.id, EdgeHandle::Default);
    tx.create_edge(edge.clone()).unwrap();
    let dup = Edge::new(Id::new(), flow.id, start.id, step.id, EdgeHandle::Default);
    assert!(matches!(
        tx.create_edge(dup),
        Err(StorageError::Conflict { .. })
    ));
    let self_loop = Edge::new(Id::new(), flow.id, step.id, step.id, EdgeHandle::Default);
    assert!(matches!(
        tx.create_edge(self_loop),
        Err(StorageError::Invalid { .. })
    ));
    let dangling = Edge::new(Id::new(), flow.id, step.id, Id::new(), EdgeHandle::Default);
    assert!(matches!(
        tx.create_edge(dangling),
        Err(StorageError::ReferentialError { .. })
    ));

    let (_, removed) = tx.delete_node(step.id).unwrap();
    assert_eq!(removed, vec![edge]);
    assert!(tx.list_edges(flow.id).is_empty());
}

#[tokio::test]
async fn test_workspace_delete_cascades() {
    let (store, ws) = store_with_workspace().await;
    let mut tx = store.begin().await.unwrap();
    tx.add_member(member(ws, Id::new(), Role::Owner)).unwrap();
    tx.create_environment(environment(ws, "dev")).unwrap();
    let flow = Flow::new(Id::new(), ws, "f");
    tx.create_flow(flow.clone()).unwrap();
    tx.create_node(Node::new(Id::new(), flow.id, "Start", NodeConfig::ManualStart))
        .unwrap();
    let http = Http::new(Id::new(), ws, "h", "GET", "https://a.test");
    tx.create_http(http.clone()).unwrap();
    tx.commit();

    let mut tx = store.begin().await.unwrap();
    tx.delete_workspace(ws).unwrap();
    assert!(tx.get_http(http.id).is_none());
    assert!(tx.get_flow(flow.id).is_none());
    assert!(tx.list_nodes(flow.id).is_empty());
    assert!(tx.list_environments(ws).is_empty());
    assert!(tx.list_members(ws).is_empty());
    assert!(matches!(
        tx.delete_workspace(ws),
        Err(StorageError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_deleting_request_clears_node_references() {
    let (store, ws) = store_with_workspace().await;
    let mut tx = store.begin().await.unwrap();
    let http = Http::new(Id::new(), ws, "h", "GET", "https://a.test");
    tx.create_http(http.clone()).unwrap();
    let flow = Flow::new(Id::new(), ws, "f");
    tx.create_flow(flow.clone()).unwrap();
    let node = Node::new(
        Id::new(),
        flow.id,
        "call",
        NodeConfig::Request {
            http_id: Some(http.id),
            continue_on_failure: false,
        },
    );
    tx.create_node(node.clone()).unwrap();

    let cascade = tx.delete_http(http.id).unwrap();
    assert_eq!(cascade.http, vec![http.id]);
    assert_eq!(cascade.nodes.len(), 1);
    assert_eq!(cascade.nodes[0].id, node.id);
    match tx.get_node(node.id).unwrap().config {
        NodeConfig::Request { http_id, .. } => assert_eq!(http_id, None),
        other => panic!("unexpected config {:?}", other),
    }
}

#[test]
fn test_fractional_ordering() {
    assert_eq!(between(Some(1.0), Some(1.5)), 1.25);
    assert_eq!(between(None, Some(0.0)), -1.0);
    assert_eq!(after_last([0.5, -3.0]), 1.5);

    let a = Id::new();
    let b = Id::new();
    let mut rows = vec![(2.0, b), (1.0, b), (2.0, a)];
    rows.sort_by(|x, y| cmp_order(*x, *y));
    assert_eq!(rows, vec![(1.0, b), (2.0, a), (2.0, b)]);
}
