//! SQL persistence for the auth backend.
//!
//! The backend speaks a small JSON protocol: a model name, a verb and optional data,
//! where-clauses, sort and paging. Requests are translated into SQLite statements over
//! tables declared in [`models`].

pub mod models;
pub mod query;

use crate::ids::Id;
use models::{Bound, ModelDef};
use query::{QueryPlan, SortBy, WhereClause};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, ErrorCode, Row, params_from_iter};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, info};

pub use query::{Connector, Direction, Operator};

#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("unknown model: {0}")]
    UnknownModel(String),
    #[error("unknown field {field} on {model}")]
    UnknownField { model: String, field: String },
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("constraint violated: {0}")]
    Constraint(String),
    #[error("database error: {0}")]
    Sql(rusqlite::Error),
}

impl From<rusqlite::Error> for AdapterError {
    fn from(e: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(code, message) = &e {
            if code.code == ErrorCode::ConstraintViolation {
                return AdapterError::Constraint(message.clone().unwrap_or_else(|| e.to_string()));
            }
        }
        AdapterError::Sql(e)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Verb {
    Create,
    FindOne,
    FindMany,
    Update,
    Delete,
    DeleteMany,
    Count,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterRequest {
    pub model: String,
    pub action: Verb,
    #[serde(default)]
    pub data: Option<Map<String, Value>>,
    #[serde(default, rename = "where")]
    pub clauses: Vec<WhereClause>,
    #[serde(default)]
    pub sort_by: Option<SortBy>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: Option<u32>,
}

pub struct AuthAdapter {
    conn: Mutex<Connection>,
}

fn now_value() -> Value {
    Value::from(chrono::Utc::now().timestamp_millis())
}

fn read_row(model: &ModelDef, row: &Row<'_>) -> rusqlite::Result<Value> {
    let mut out = Map::new();
    for (i, field) in model.fields.iter().enumerate() {
        let raw: SqlValue = row.get(i)?;
        out.insert(field.name.to_string(), model.render(field, raw));
    }
    Ok(Value::Object(out))
}

impl AuthAdapter {
    /// Open (or create) the database at `path`; `None` keeps it in memory.
    pub fn open(path: Option<&Path>) -> Result<Self, AdapterError> {
        let conn = match path {
            Some(p) => Connection::open(p)?,
            None => Connection::open_in_memory()?,
        };
        let sql: String = models::MODELS
            .iter()
            .map(ModelDef::create_table_sql)
            .collect::<Vec<_>>()
            .join("\n");
        conn.execute_batch(&sql)?;
        info!("Auth adapter database initialized ({} models)", models::MODELS.len());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn handle(&self, request: &AdapterRequest) -> Result<Value, AdapterError> {
        let model = models::model(&request.model)?;
        debug!("Auth adapter {:?} on {}", request.action, model.name);
        match request.action {
            Verb::Create => {
                let data = request
                    .data
                    .as_ref()
                    .ok_or_else(|| AdapterError::InvalidRequest("create requires data".to_string()))?;
                self.create(model, data)
            }
            Verb::FindOne => Ok(self
                .find(model, &request.clauses, None, Some(1), None)?
                .into_iter()
                .next()
                .unwrap_or(Value::Null)),
            Verb::FindMany => Ok(Value::Array(self.find(
                model,
                &request.clauses,
                request.sort_by.as_ref(),
                request.limit,
                request.offset,
            )?)),
            Verb::Update => {
                let data = request
                    .data
                    .as_ref()
                    .ok_or_else(|| AdapterError::InvalidRequest("update requires data".to_string()))?;
                self.update(model, &request.clauses, data)
            }
            Verb::Delete | Verb::DeleteMany => {
                let removed = self.delete(model, &request.clauses)?;
                Ok(if request.action == Verb::Delete {
                    Value::Null
                } else {
                    Value::from(removed)
                })
            }
            Verb::Count => Ok(Value::from(self.count(model, &request.clauses)?)),
        }
    }

    fn create(&self, model: &'static ModelDef, data: &Map<String, Value>) -> Result<Value, AdapterError> {
        let mut data = data.clone();
        let id = match data.get("id").and_then(Value::as_str) {
            Some(raw) => Id::parse(raw).map_err(|_| AdapterError::InvalidValue {
                field: "id".to_string(),
                reason: "not a valid id".to_string(),
            })?,
            None => Id::new(),
        };
        data.insert("id".to_string(), Value::String(id.to_string()));
        for stamp in ["createdAt", "updatedAt"] {
            if model.has_field(stamp) && !data.contains_key(stamp) {
                data.insert(stamp.to_string(), now_value());
            }
        }

        let mut columns = Vec::new();
        let mut values = Vec::new();
        for (key, value) in &data {
            let field = model.field(key)?;
            match model.bind(field, value)? {
                Bound::Value(v) => values.push(v),
                Bound::ImpossibleId => {
                    return Err(AdapterError::InvalidValue {
                        field: field.name.to_string(),
                        reason: "not a valid id".to_string(),
                    });
                }
            }
            columns.push(field.column);
        }
        let slots: Vec<String> = (1..=values.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            model.table,
            columns.join(", "),
            slots.join(", ")
        );
        let conn = self.conn();
        conn.execute(&sql, params_from_iter(values))?;
        drop(conn);

        self.find(model, &[WhereClause::eq("id", id.to_string())], None, Some(1), None)?
            .into_iter()
            .next()
            .ok_or_else(|| AdapterError::InvalidRequest("created row vanished".to_string()))
    }

    /// Rows matching `clauses`. Paging applies to every plan.
    pub fn find(
        &self,
        model: &'static ModelDef,
        clauses: &[WhereClause],
        sort: Option<&SortBy>,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> Result<Vec<Value>, AdapterError> {
        let (mut sql, params) = match query::plan(model, clauses, sort)? {
            QueryPlan::Empty => return Ok(Vec::new()),
            QueryPlan::ById(v) => (
                format!("SELECT {} FROM {} WHERE id = ?1", model.columns(), model.table),
                vec![v],
            ),
            QueryPlan::ByUnique(field, v) => (
                format!(
                    "SELECT {} FROM {} WHERE {} = ?1",
                    model.columns(),
                    model.table,
                    field.column
                ),
                vec![v],
            ),
            QueryPlan::ByParent(field, v) => (
                format!(
                    "SELECT {} FROM {} WHERE {} = ?1 ORDER BY rowid",
                    model.columns(),
                    model.table,
                    field.column
                ),
                vec![v],
            ),
            QueryPlan::Dynamic { sql, params } => (sql, params),
        };
        match (limit, offset) {
            (Some(l), Some(o)) => sql.push_str(&format!(" LIMIT {} OFFSET {}", l, o)),
            (Some(l), None) => sql.push_str(&format!(" LIMIT {}", l)),
            (None, Some(o)) => sql.push_str(&format!(" LIMIT -1 OFFSET {}", o)),
            (None, None) => {}
        }

        let conn = self.conn();
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params_from_iter(params), |row| read_row(model, row))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn update(
        &self,
        model: &'static ModelDef,
        clauses: &[WhereClause],
        data: &Map<String, Value>,
    ) -> Result<Value, AdapterError> {
        let Some(target) = self.find(model, clauses, None, Some(1), None)?.into_iter().next() else {
            return Ok(Value::Null);
        };
        let id = target
            .get("id")
            .cloned()
            .ok_or_else(|| AdapterError::InvalidRequest("row without id".to_string()))?;

        let mut sets = Vec::new();
        let mut values = Vec::new();
        for (key, value) in data {
            let field = model.field(key)?;
            if field.name == "id" {
                continue;
            }
            match model.bind(field, value)? {
                Bound::Value(v) => values.push(v),
                Bound::ImpossibleId => {
                    return Err(AdapterError::InvalidValue {
                        field: field.name.to_string(),
                        reason: "not a valid id".to_string(),
                    });
                }
            }
            sets.push(format!("{} = ?{}", field.column, values.len()));
        }
        if !sets.is_empty() {
            values.push(SqlValue::Text(id.as_str().unwrap_or_default().to_string()));
            let sql = format!(
                "UPDATE {} SET {} WHERE id = ?{}",
                model.table,
                sets.join(", "),
                values.len()
            );
            self.conn().execute(&sql, params_from_iter(values))?;
        }
        Ok(self
            .find(model, &[WhereClause::eq("id", id)], None, Some(1), None)?
            .into_iter()
            .next()
            .unwrap_or(Value::Null))
    }

    fn delete(&self, model: &'static ModelDef, clauses: &[WhereClause]) -> Result<usize, AdapterError> {
        if matches!(query::plan(model, clauses, None)?, QueryPlan::Empty) {
            return Ok(0);
        }
        let mut params = Vec::new();
        let sql = format!(
            "DELETE FROM {} WHERE {}",
            model.table,
            query::where_sql(model, clauses, &mut params)?
        );
        Ok(self.conn().execute(&sql, params_from_iter(params))?)
    }

    fn count(&self, model: &'static ModelDef, clauses: &[WhereClause]) -> Result<i64, AdapterError> {
        if matches!(query::plan(model, clauses, None)?, QueryPlan::Empty) {
            return Ok(0);
        }
        let mut params = Vec::new();
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {}",
            model.table,
            query::where_sql(model, clauses, &mut params)?
        );
        let conn = self.conn();
        let count = conn.query_row(&sql, params_from_iter(params), |row| row.get(0))?;
        Ok(count)
    }
}
