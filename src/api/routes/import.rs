//! HAR import route.
//!
//! Every captured host needs a domain substitution entry (enabled or not). When some are
//! missing nothing is written and the reply is a `MISSING_DATA` error listing the hosts.

use axum::{Json, Router, extract::State, http::StatusCode, routing::post};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use super::app_state::{AppState, require_role};
use super::auth_context::{CurrentUser, PathId};
use super::error::{ApiError, ApiResult, ErrorCode, ErrorDetails};
use super::workspace::validate_name;
use crate::graph;
use crate::models::Role;
use crate::services::event_sync::{EventBatch, EventKind, SyncEvent};
use crate::services::har_importer::{
    self, DomainSubstitution, ImportOptions, ImportOutcome, ImportResult,
};

#[derive(Deserialize)]
pub struct HarImportRequest {
    name: String,
    /// The HAR document, either as an object or as its JSON text.
    har: Value,
    #[serde(default)]
    domains: Vec<DomainSubstitution>,
    #[serde(default)]
    min_token_len: Option<usize>,
}

pub fn import_router() -> Router<AppState> {
    Router::new().route("/workspaces/{id}/import/har", post(import_har))
}

fn missing_domains(hosts: Vec<String>) -> ApiError {
    let mut error = ApiError::new(
        ErrorCode::MissingData,
        format!("{} host(s) need a domain substitution entry", hosts.len()),
    );
    error.details = Some(ErrorDetails {
        field: Some("domains".to_string()),
        hint: Some("add an entry per host, disabled to keep the literal URL".to_string()),
        missing: hosts,
        ..ErrorDetails::default()
    });
    error
}

fn record_import(state: &AppState, batch: &EventBatch, workspace_id: crate::ids::Id, result: &ImportResult) {
    let levels = graph::node_depths(&result.nodes, &result.edges);
    let record = |event| state.record(batch, event, 0);
    if let Some(folder) = &result.folder {
        record(SyncEvent::insert(workspace_id, EventKind::Folder, folder.id, folder));
    }
    for http in result.bases.iter().chain(&result.deltas) {
        record(SyncEvent::insert(workspace_id, EventKind::Http, http.id, http));
    }
    for row in &result.key_values {
        record(SyncEvent::insert(
            workspace_id,
            EventKind::for_key_values(row.kind),
            row.id,
            row,
        ));
    }
    for body in &result.bodies {
        record(SyncEvent::insert(workspace_id, EventKind::HttpBodyRaw, body.id, body));
    }
    if let Some(flow) = &result.flow {
        record(SyncEvent::insert(workspace_id, EventKind::Flow, flow.id, flow));
    }
    for node in &result.nodes {
        let level = levels.get(&node.id).map_or(0, |l| *l as i64);
        state.record(
            batch,
            SyncEvent::insert(workspace_id, EventKind::Node, node.id, node),
            level,
        );
    }
    for edge in &result.edges {
        record(SyncEvent::insert(workspace_id, EventKind::Edge, edge.id, edge));
    }
    for file in &result.files {
        record(SyncEvent::insert(
            workspace_id,
            EventKind::for_file(file.kind),
            file.id,
            file,
        ));
    }
}

/// POST /workspaces/{id}/import/har - Import captured traffic as requests and a flow
pub async fn import_har(
    State(state): State<AppState>,
    user: CurrentUser,
    PathId(workspace_id): PathId,
    Json(request): Json<HarImportRequest>,
) -> ApiResult<(StatusCode, Json<ImportResult>)> {
    {
        let reader = state.store.reader().await?;
        require_role(&reader, workspace_id, user.id(), Role::Member)?;
    }
    let name = validate_name(&request.name)?;
    let document = match request.har {
        Value::String(text) => text,
        other => other.to_string(),
    };
    let entries = har_importer::parse_har(&document)?;
    let min_token_len = match request.min_token_len {
        Some(0) => return Err(ApiError::invalid_field("min_token_len", "must be positive")),
        Some(n) => n,
        None => state.config.dependency_min_token_len,
    };
    let options = ImportOptions {
        workspace_id,
        name,
        domains: request.domains,
        min_token_len,
    };

    let result = {
        let mut tx = state.store.begin().await?;
        require_role(&tx, workspace_id, user.id(), Role::Member)?;
        match har_importer::import(&mut tx, &entries, &options)? {
            ImportOutcome::Imported(result) => {
                tx.commit();
                result
            }
            ImportOutcome::MissingDomains(hosts) => {
                warn!("HAR import into {} is missing {} domain(s)", workspace_id, hosts.len());
                return Err(missing_domains(hosts));
            }
        }
    };

    let batch = EventBatch::new();
    record_import(&state, &batch, workspace_id, &result);
    state.publish(batch).await;
    info!(
        "Imported {} request(s) and {} dependency link(s) into {}",
        result.bases.len(),
        result.dependencies.len(),
        workspace_id
    );
    Ok((StatusCode::CREATED, Json(*result)))
}
