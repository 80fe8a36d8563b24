//! Where-clause translation and statement planning.

use super::AdapterError;
use super::models::{Bound, Field, ModelDef};
use rusqlite::types::Value as SqlValue;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    #[default]
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
    Contains,
    StartsWith,
    EndsWith,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Connector {
    #[default]
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhereClause {
    pub field: String,
    #[serde(default)]
    pub operator: Operator,
    pub value: Value,
    #[serde(default)]
    pub connector: Connector,
}

impl WhereClause {
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Self {
            field: field.to_string(),
            operator: Operator::Eq,
            value: value.into(),
            connector: Connector::And,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortBy {
    pub field: String,
    #[serde(default)]
    pub direction: Direction,
}

/// Which statement serves a lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryPlan {
    /// Nothing can match (an id that does not parse).
    Empty,
    ById(SqlValue),
    ByUnique(&'static Field, SqlValue),
    ByParent(&'static Field, SqlValue),
    Dynamic { sql: String, params: Vec<SqlValue> },
}

fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A single condition with its parameters, or a constant.
fn condition(
    model: &ModelDef,
    field: &Field,
    clause: &WhereClause,
    params: &mut Vec<SqlValue>,
) -> Result<String, AdapterError> {
    let col = field.column;
    let cmp = |op: &str, params: &mut Vec<SqlValue>| -> Result<String, AdapterError> {
        match model.bind(field, &clause.value)? {
            Bound::Value(SqlValue::Null) if op == "=" => Ok(format!("{} IS NULL", col)),
            Bound::Value(SqlValue::Null) if op == "<>" => Ok(format!("{} IS NOT NULL", col)),
            Bound::Value(v) => {
                params.push(v);
                Ok(format!("{} {} ?{}", col, op, params.len()))
            }
            Bound::ImpossibleId if op == "=" => Ok("0 = 1".to_string()),
            Bound::ImpossibleId if op == "<>" => Ok("1 = 1".to_string()),
            Bound::ImpossibleId => {
                params.push(SqlValue::Text(as_text(&clause.value)));
                Ok(format!("{} {} ?{}", col, op, params.len()))
            }
        }
    };

    match clause.operator {
        Operator::Eq => cmp("=", params),
        Operator::Ne => cmp("<>", params),
        Operator::Gt => cmp(">", params),
        Operator::Gte => cmp(">=", params),
        Operator::Lt => cmp("<", params),
        Operator::Lte => cmp("<=", params),
        Operator::In | Operator::NotIn => {
            let items = clause.value.as_array().ok_or_else(|| AdapterError::InvalidValue {
                field: field.name.to_string(),
                reason: "expected an array".to_string(),
            })?;
            let mut slots = Vec::new();
            for item in items {
                if let Bound::Value(v) = model.bind(field, item)? {
                    params.push(v);
                    slots.push(format!("?{}", params.len()));
                }
            }
            Ok(match (clause.operator, slots.is_empty()) {
                (Operator::In, true) => "0 = 1".to_string(),
                (_, true) => "1 = 1".to_string(),
                (Operator::In, false) => format!("{} IN ({})", col, slots.join(", ")),
                (_, false) => format!("{} NOT IN ({})", col, slots.join(", ")),
            })
        }
        Operator::Contains | Operator::StartsWith | Operator::EndsWith => {
            let needle = escape_like(&as_text(&clause.value));
            let pattern = match clause.operator {
                Operator::Contains => format!("%{}%", needle),
                Operator::StartsWith => format!("{}%", needle),
                _ => format!("%{}", needle),
            };
            params.push(SqlValue::Text(pattern));
            Ok(format!("{} LIKE ?{} ESCAPE '\\'", col, params.len()))
        }
    }
}

/// `WHERE` body for `clauses`; each clause joins the previous one with its connector.
pub fn where_sql(
    model: &ModelDef,
    clauses: &[WhereClause],
    params: &mut Vec<SqlValue>,
) -> Result<String, AdapterError> {
    if clauses.is_empty() {
        return Ok("1 = 1".to_string());
    }
    let mut sql = String::new();
    for (i, clause) in clauses.iter().enumerate() {
        let field = model.field(&clause.field)?;
        let cond = condition(model, field, clause, params)?;
        if i > 0 {
            sql.push_str(match clause.connector {
                Connector::And => " AND ",
                Connector::Or => " OR ",
            });
        }
        sql.push('(');
        sql.push_str(&cond);
        sql.push(')');
    }
    Ok(sql)
}

/// Pick the statement for a read: single equality lookups on id, a unique key or a
/// parent reference use fixed statements; anything else is built dynamically.
pub fn plan(
    model: &'static ModelDef,
    clauses: &[WhereClause],
    sort: Option<&SortBy>,
) -> Result<QueryPlan, AdapterError> {
    let single = match clauses {
        [clause] if clause.operator == Operator::Eq && !clause.value.is_null() && sort.is_none() => {
            Some(clause)
        }
        _ => None,
    };
    if let Some(clause) = single {
        let field = model.field(&clause.field)?;
        if field.name == "id" || field.unique || field.parent {
            let value = match model.bind(field, &clause.value)? {
                Bound::Value(v) => v,
                Bound::ImpossibleId => return Ok(QueryPlan::Empty),
            };
            return Ok(if field.name == "id" {
                QueryPlan::ById(value)
            } else if field.unique {
                QueryPlan::ByUnique(field, value)
            } else {
                QueryPlan::ByParent(field, value)
            });
        }
    }

    let mut params = Vec::new();
    let mut sql = format!(
        "SELECT {} FROM {} WHERE {}",
        model.columns(),
        model.table,
        where_sql(model, clauses, &mut params)?
    );
    if let Some(sort) = sort {
        let field = model.field(&sort.field)?;
        sql.push_str(&format!(
            " ORDER BY {} {}",
            field.column,
            match sort.direction {
                Direction::Asc => "ASC",
                Direction::Desc => "DESC",
            }
        ));
    }
    Ok(QueryPlan::Dynamic { sql, params })
}
