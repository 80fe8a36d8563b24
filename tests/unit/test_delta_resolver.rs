//! Unit tests for delta resolution, overrides and version snapshots

use workbench_api::ids::Id;
use workbench_api::models::{BodyKind, Http, HttpAssert, HttpBodyRaw, HttpKeyValue, KeyValueKind, Workspace};
use workbench_api::services::delta_resolver::{
    ChildPatch, DeltaHttpPatch, ResolveError, create_delta_http, override_assert,
    override_body_raw, override_key_value, resolve, snapshot, update_delta_http,
};
use workbench_api::storage::{Store, StorageError, Tables};

struct Seed {
    store: Store,
    base: Http,
    header: HttpKeyValue,
    param: HttpKeyValue,
    assert: HttpAssert,
}

async fn seed() -> Seed {
    let store = Store::new();
    let mut tx = store.begin().await.unwrap();
    let ws = Workspace::new(Id::new(), "team");
    let ws_id = ws.id;
    tx.create_workspace(ws).unwrap();

    let mut base = Http::new(Id::new(), ws_id, "create user", "post", "https://api.test/users");
    base.body_kind = BodyKind::Raw;
    tx.create_http(base.clone()).unwrap();

    let header = HttpKeyValue::new(Id::new(), base.id, KeyValueKind::Header, "Content-Type", "application/json");
    let mut param = HttpKeyValue::new(Id::new(), base.id, KeyValueKind::SearchParam, "page", "1");
    param.display_order = 1.0;
    tx.create_key_values(vec![header.clone(), param.clone()]).unwrap();
    tx.create_body_raw(HttpBodyRaw::new(Id::new(), base.id, r#"{"name":"base"}"#))
        .unwrap();
    let assert = HttpAssert::new(Id::new(), base.id, "response.status == 201");
    tx.create_assert(assert.clone()).unwrap();
    tx.commit();

    Seed {
        store,
        base,
        header,
        param,
        assert,
    }
}

#[tokio::test]
async fn test_base_resolves_to_itself() {
    let s = seed().await;
    let reader = s.store.reader().await.unwrap();
    let resolved = resolve(&reader, s.base.id).unwrap();
    assert_eq!(resolved.http, s.base);
    assert_eq!(resolved.headers, vec![s.header.clone()]);
    assert_eq!(resolved.params, vec![s.param.clone()]);
    assert_eq!(resolved.body_raw.unwrap().data, r#"{"name":"base"}"#);
    assert_eq!(resolved.asserts.len(), 1);
}

#[tokio::test]
async fn test_delta_additions_follow_inherited_rows() {
    let s = seed().await;
    let mut tx = s.store.begin().await.unwrap();
    let delta = create_delta_http(&mut tx, s.base.id, Some("staging".into())).unwrap();
    let extra = HttpKeyValue::new(Id::new(), delta.id, KeyValueKind::Header, "X-Env", "staging");
    tx.create_key_value(extra.clone()).unwrap();
    tx.commit();

    let reader = s.store.reader().await.unwrap();
    let resolved = resolve(&reader, delta.id).unwrap();
    let keys: Vec<&str> = resolved.headers.iter().map(|h| h.key.as_str()).collect();
    assert_eq!(keys, vec!["Content-Type", "X-Env"]);
    assert_eq!(resolved.http.name, "staging");
    // The base does not see delta-context additions.
    assert_eq!(resolve(&reader, s.base.id).unwrap().headers.len(), 1);
}

#[tokio::test]
async fn test_overrides_touch_only_their_fields() {
    let s = seed().await;
    let mut tx = s.store.begin().await.unwrap();
    let delta = create_delta_http(&mut tx, s.base.id, None).unwrap();
    override_key_value(
        &mut tx,
        delta.id,
        s.param.id,
        &ChildPatch {
            value: Some("7".into()),
            ..Default::default()
        },
    )
    .unwrap();
    override_assert(
        &mut tx,
        delta.id,
        s.assert.id,
        &ChildPatch {
            expression: Some("response.status == 200".into()),
            ..Default::default()
        },
    )
    .unwrap();
    override_body_raw(&mut tx, delta.id, r#"{"name":"delta"}"#).unwrap();

    let resolved = resolve(&tx, delta.id).unwrap();
    assert_eq!(resolved.params[0].key, "page");
    assert_eq!(resolved.params[0].value, "7");
    assert!(resolved.params[0].enabled);
    assert_eq!(resolved.asserts[0].expression, "response.status == 200");
    assert_eq!(resolved.body_raw.unwrap().data, r#"{"name":"delta"}"#);

    let base = resolve(&tx, s.base.id).unwrap();
    assert_eq!(base.params[0].value, "1");
    assert_eq!(base.asserts[0].expression, "response.status == 201");
    assert_eq!(base.body_raw.unwrap().data, r#"{"name":"base"}"#);
}

#[tokio::test]
async fn test_base_edits_flow_through_unshadowed_fields() {
    let s = seed().await;
    let mut tx = s.store.begin().await.unwrap();
    let delta = create_delta_http(&mut tx, s.base.id, None).unwrap();
    override_key_value(
        &mut tx,
        delta.id,
        s.header.id,
        &ChildPatch {
            value: Some("text/plain".into()),
            ..Default::default()
        },
    )
    .unwrap();

    let mut header = s.header.clone();
    header.key = "content-type".into();
    header.description = "lower-cased".into();
    tx.update_key_value(header).unwrap();
    let mut base = s.base.clone();
    base.url = "https://api.test/v2/users".into();
    tx.update_http(base).unwrap();

    let resolved = resolve(&tx, delta.id).unwrap();
    assert_eq!(resolved.http.url, "https://api.test/v2/users");
    assert_eq!(resolved.headers[0].key, "content-type");
    assert_eq!(resolved.headers[0].description, "lower-cased");
    assert_eq!(resolved.headers[0].value, "text/plain");
}

#[tokio::test]
async fn test_reset_restores_inheritance() {
    let s = seed().await;
    let mut tx = s.store.begin().await.unwrap();
    let delta = create_delta_http(&mut tx, s.base.id, None).unwrap();
    update_delta_http(
        &mut tx,
        delta.id,
        DeltaHttpPatch {
            method: Some("put".into()),
            url: Some("https://staging.test/users".into()),
            ..Default::default()
        },
    )
    .unwrap();
    let resolved = resolve(&tx, delta.id).unwrap();
    assert_eq!(resolved.http.method, "PUT");

    update_delta_http(
        &mut tx,
        delta.id,
        DeltaHttpPatch {
            reset: vec!["method".into()],
            ..Default::default()
        },
    )
    .unwrap();
    let resolved = resolve(&tx, delta.id).unwrap();
    assert_eq!(resolved.http.method, "POST");
    assert_eq!(resolved.http.url, "https://staging.test/users");

    let err = update_delta_http(
        &mut tx,
        delta.id,
        DeltaHttpPatch {
            reset: vec!["folder".into()],
            ..Default::default()
        },
    )
    .unwrap_err();
    assert!(matches!(
        err,
        ResolveError::Storage(StorageError::Invalid { .. })
    ));
}

#[tokio::test]
async fn test_delta_of_delta_is_rejected() {
    let s = seed().await;
    let mut tx = s.store.begin().await.unwrap();
    let delta = create_delta_http(&mut tx, s.base.id, None).unwrap();
    assert!(matches!(
        create_delta_http(&mut tx, delta.id, None),
        Err(ResolveError::InconsistentDelta { .. })
    ));
    assert!(matches!(
        create_delta_http(&mut tx, Id::new(), None),
        Err(ResolveError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_override_rejects_foreign_child() {
    let s = seed().await;
    let mut tx = s.store.begin().await.unwrap();
    let ws = s.base.workspace_id;
    let other = Http::new(Id::new(), ws, "other", "GET", "https://api.test/other");
    tx.create_http(other.clone()).unwrap();
    let foreign = HttpKeyValue::new(Id::new(), other.id, KeyValueKind::Header, "X", "1");
    tx.create_key_value(foreign.clone()).unwrap();
    let delta = create_delta_http(&mut tx, s.base.id, None).unwrap();

    let result = override_key_value(&mut tx, delta.id, foreign.id, &ChildPatch::default());
    assert!(matches!(result, Err(ResolveError::InconsistentDelta { .. })));
}

#[tokio::test]
async fn test_disabled_override_hides_child() {
    let s = seed().await;
    let mut tx = s.store.begin().await.unwrap();
    let delta = create_delta_http(&mut tx, s.base.id, None).unwrap();
    override_assert(
        &mut tx,
        delta.id,
        s.assert.id,
        &ChildPatch {
            enabled: Some(false),
            ..Default::default()
        },
    )
    .unwrap();
    assert!(resolve(&tx, delta.id).unwrap().asserts.is_empty());
    assert_eq!(resolve(&tx, s.base.id).unwrap().asserts.len(), 1);
}

#[tokio::test]
async fn test_deleting_base_child_drops_overrides() {
    let s = seed().await;
    let mut tx = s.store.begin().await.unwrap();
    let delta = create_delta_http(&mut tx, s.base.id, None).unwrap();
    let (over, _) = override_key_value(
        &mut tx,
        delta.id,
        s.header.id,
        &ChildPatch {
            value: Some("x".into()),
            ..Default::default()
        },
    )
    .unwrap();

    let removed = tx.delete_key_value(s.header.id).unwrap();
    assert_eq!(removed.len(), 2);
    assert!(tx.get_key_value(over.id).is_none());
    assert!(resolve(&tx, delta.id).unwrap().headers.is_empty());
}

#[tokio::test]
async fn test_deleting_base_removes_deltas_and_snapshots() {
    let s = seed().await;
    let mut tx = s.store.begin().await.unwrap();
    let delta = create_delta_http(&mut tx, s.base.id, None).unwrap();
    let resolved = resolve(&tx, delta.id).unwrap();
    let rows = snapshot(&mut tx, &resolved, None).unwrap();

    let removed = tx.delete_http(s.base.id).unwrap();
    assert!(removed.http.contains(&s.base.id));
    assert!(removed.http.contains(&delta.id));
    assert!(removed.http.contains(&rows.http.id));
    assert_eq!(removed.versions.len(), 1);
    assert!(tx.list_asserts(rows.http.id).is_empty());
}

#[tokio::test]
async fn test_snapshots_are_numbered_and_listed_newest_first() {
    let s = seed().await;
    let mut tx = s.store.begin().await.unwrap();
    let resolved = resolve(&tx, s.base.id).unwrap();
    let user = Id::new();
    let first = snapshot(&mut tx, &resolved, Some(user)).unwrap();
    let second = snapshot(&mut tx, &resolved, None).unwrap();

    assert_eq!(first.version.name, "create user #1");
    assert_eq!(second.version.name, "create user #2");
    assert_eq!(first.version.created_by, Some(user));
    let versions = tx.list_versions(s.base.id);
    assert_eq!(versions[0].id, second.version.id);
    assert_eq!(versions[1].id, first.version.id);

    // Snapshots are not editable and are hidden from the request list.
    let mut frozen = first.http.clone();
    frozen.name = "edited".into();
    assert!(tx.update_http(frozen).is_err());
    assert_eq!(tx.list_http(s.base.workspace_id).len(), 1);
}

#[test]
fn test_tables_reject_override_on_base_request() {
    let mut t = Tables::default();
    let ws = Workspace::new(Id::new(), "ws");
    let ws_id = ws.id;
    t.create_workspace(ws).unwrap();
    let base = Http::new(Id::new(), ws_id, "a", "GET", "https://a.test");
    t.create_http(base.clone()).unwrap();
    let header = HttpKeyValue::new(Id::new(), base.id, KeyValueKind::Header, "A", "1");
    t.create_key_value(header.clone()).unwrap();

    let bogus = HttpKeyValue::new_override(Id::new(), base.id, &header);
    assert!(matches!(
        t.create_key_value(bogus),
        Err(StorageError::Invalid { .. })
    ));
}
