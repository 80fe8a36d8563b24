//! Model catalogue of the auth adapter.
//!
//! Each model lists its fields once: API name (camelCase), SQL column, storage type, and
//! the lookup roles (unique key, parent reference) that get dedicated statements.

use super::AdapterError;
use crate::ids::Id;
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use rusqlite::types::Value as SqlValue;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Id,
    Text,
    Bool,
    Int,
    Date,
}

/// How a model stores its dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateFormat {
    /// RFC 3339 text with millisecond precision.
    Iso,
    /// Integer milliseconds since the epoch.
    Millis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub column: &'static str,
    pub ty: FieldType,
    pub required: bool,
    pub unique: bool,
    pub parent: bool,
}

const fn field(name: &'static str, column: &'static str, ty: FieldType) -> Field {
    Field {
        name,
        column,
        ty,
        required: false,
        unique: false,
        parent: false,
    }
}

const fn required(name: &'static str, column: &'static str, ty: FieldType) -> Field {
    Field {
        required: true,
        ..field(name, column, ty)
    }
}

const fn unique(name: &'static str, column: &'static str, ty: FieldType) -> Field {
    Field {
        unique: true,
        ..required(name, column, ty)
    }
}

const fn parent(name: &'static str, column: &'static str) -> Field {
    Field {
        parent: true,
        ..required(name, column, FieldType::Id)
    }
}

#[derive(Debug)]
pub struct ModelDef {
    pub name: &'static str,
    pub table: &'static str,
    pub dates: DateFormat,
    pub fields: &'static [Field],
}

use FieldType::{Bool, Date, Id as IdField, Text};

const ID: Field = required("id", "id", IdField);

pub static MODELS: &[ModelDef] = &[
    ModelDef {
        name: "user",
        table: "auth_user",
        dates: DateFormat::Millis,
        fields: &[
            ID,
            required("name", "name", Text),
            unique("email", "email", Text),
            field("emailVerified", "email_verified", Bool),
            field("image", "image", Text),
            required("createdAt", "created_at", Date),
            required("updatedAt", "updated_at", Date),
        ],
    },
    ModelDef {
        name: "session",
        table: "auth_session",
        dates: DateFormat::Millis,
        fields: &[
            ID,
            parent("userId", "user_id"),
            unique("token", "token", Text),
            required("expiresAt", "expires_at", Date),
            field("ipAddress", "ip_address", Text),
            field("userAgent", "user_agent", Text),
            field("activeOrganizationId", "active_organization_id", IdField),
            required("createdAt", "created_at", Date),
            required("updatedAt", "updated_at", Date),
        ],
    },
    ModelDef {
        name: "account",
        table: "auth_account",
        dates: DateFormat::Millis,
        fields: &[
            ID,
            parent("userId", "user_id"),
            required("accountId", "account_id", Text),
            required("providerId", "provider_id", Text),
            field("accessToken", "access_token", Text),
            field("refreshToken", "refresh_token", Text),
            field("idToken", "id_token", Text),
            field("accessTokenExpiresAt", "access_token_expires_at", Date),
            field("refreshTokenExpiresAt", "refresh_token_expires_at", Date),
            field("scope", "scope", Text),
            field("password", "password", Text),
            required("createdAt", "created_at", Date),
            required("updatedAt", "updated_at", Date),
        ],
    },
    ModelDef {
        name: "verification",
        table: "auth_verification",
        dates: DateFormat::Millis,
        fields: &[
            ID,
            unique("identifier", "identifier", Text),
            required("value", "value", Text),
            required("expiresAt", "expires_at", Date),
            field("createdAt", "created_at", Date),
            field("updatedAt", "updated_at", Date),
        ],
    },
    ModelDef {
        name: "organization",
        table: "auth_organization",
        dates: DateFormat::Iso,
        fields: &[
            ID,
            required("name", "name", Text),
            unique("slug", "slug", Text),
            field("logo", "logo", Text),
            field("metadata", "metadata", Text),
            required("createdAt", "created_at", Date),
        ],
    },
    ModelDef {
        name: "member",
        table: "auth_member",
        dates: DateFormat::Iso,
        fields: &[
            ID,
            parent("organizationId", "organization_id"),
            required("userId", "user_id", IdField),
            required("role", "role", Text),
            required("createdAt", "created_at", Date),
        ],
    },
    ModelDef {
        name: "invitation",
        table: "auth_invitation",
        dates: DateFormat::Iso,
        fields: &[
            ID,
            parent("organizationId", "organization_id"),
            required("email", "email", Text),
            field("role", "role", Text),
            required("status", "status", Text),
            required("expiresAt", "expires_at", Date),
            required("inviterId", "inviter_id", IdField),
            field("createdAt", "created_at", Date),
        ],
    },
    ModelDef {
        name: "jwks",
        table: "auth_jwks",
        dates: DateFormat::Millis,
        fields: &[
            ID,
            required("publicKey", "public_key", Text),
            required("privateKey", "private_key", Text),
            required("createdAt", "created_at", Date),
        ],
    },
];

pub fn model(name: &str) -> Result<&'static ModelDef, AdapterError> {
    MODELS
        .iter()
        .find(|m| m.name == name)
        .ok_or_else(|| AdapterError::UnknownModel(name.to_string()))
}

/// Outcome of converting a JSON value for an id column.
#[derive(Debug, Clone, PartialEq)]
pub enum Bound {
    Value(SqlValue),
    /// An id that cannot exist; lookups on it match nothing.
    ImpossibleId,
}

impl ModelDef {
    /// Resolve a field by API name, falling back to the raw column name.
    pub fn field(&self, name: &str) -> Result<&Field, AdapterError> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .or_else(|| self.fields.iter().find(|f| f.column == name))
            .ok_or_else(|| AdapterError::UnknownField {
                model: self.name.to_string(),
                field: name.to_string(),
            })
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }

    pub fn columns(&self) -> String {
        self.fields
            .iter()
            .map(|f| f.column)
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn create_table_sql(&self) -> String {
        let columns: Vec<String> = self
            .fields
            .iter()
            .map(|f| {
                let ty = match (f.ty, self.dates) {
                    (FieldType::Bool | FieldType::Int, _) => "INTEGER",
                    (FieldType::Date, DateFormat::Millis) => "INTEGER",
                    _ => "TEXT",
                };
                let mut col = format!("{} {}", f.column, ty);
                if f.name == "id" {
                    col.push_str(" PRIMARY KEY");
                } else {
                    if f.required {
                        col.push_str(" NOT NULL");
                    }
                    if f.unique {
                        col.push_str(" UNIQUE");
                    }
                }
                col
            })
            .collect();
        let mut sql = format!(
            "CREATE TABLE IF NOT EXISTS {} ({});",
            self.table,
            columns.join(", ")
        );
        for f in self.fields.iter().filter(|f| f.parent) {
            sql.push_str(&format!(
                " CREATE INDEX IF NOT EXISTS idx_{}_{} ON {} ({});",
                self.table, f.column, self.table, f.column
            ));
        }
        sql
    }

    /// Convert an API value into its stored form.
    pub fn bind(&self, field: &Field, value: &Value) -> Result<Bound, AdapterError> {
        if value.is_null() {
            return Ok(Bound::Value(SqlValue::Null));
        }
        let invalid = |reason: &str| AdapterError::InvalidValue {
            field: field.name.to_string(),
            reason: reason.to_string(),
        };
        let bound = match field.ty {
            FieldType::Id => match value.as_str().map(Id::parse) {
                Some(Ok(id)) => SqlValue::Text(id.to_string()),
                _ => return Ok(Bound::ImpossibleId),
            },
            FieldType::Text => match value {
                Value::String(s) => SqlValue::Text(s.clone()),
                Value::Object(_) | Value::Array(_) => SqlValue::Text(value.to_string()),
                other => SqlValue::Text(other.to_string()),
            },
            FieldType::Bool => match value {
                Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
                Value::Number(n) => SqlValue::Integer(i64::from(n.as_i64() != Some(0))),
                _ => return Err(invalid("expected a boolean")),
            },
            FieldType::Int => SqlValue::Integer(value.as_i64().ok_or_else(|| invalid("expected an integer"))?),
            FieldType::Date => {
                let at = parse_date(value).ok_or_else(|| invalid("expected an ISO-8601 date or epoch millis"))?;
                match self.dates {
                    DateFormat::Iso => SqlValue::Text(at.to_rfc3339_opts(SecondsFormat::Millis, true)),
                    DateFormat::Millis => SqlValue::Integer(at.timestamp_millis()),
                }
            }
        };
        Ok(Bound::Value(bound))
    }

    /// Convert a stored value back into its API form.
    pub fn render(&self, field: &Field, value: SqlValue) -> Value {
        match (field.ty, value) {
            (_, SqlValue::Null) => Value::Null,
            (FieldType::Bool, SqlValue::Integer(i)) => Value::Bool(i != 0),
            (FieldType::Date, SqlValue::Integer(ms)) => match self.dates {
                DateFormat::Millis => Value::from(ms),
                DateFormat::Iso => Utc
                    .timestamp_millis_opt(ms)
                    .single()
                    .map(|d| Value::String(d.to_rfc3339_opts(SecondsFormat::Millis, true)))
                    .unwrap_or(Value::Null),
            },
            (_, SqlValue::Integer(i)) => Value::from(i),
            (_, SqlValue::Real(f)) => Value::from(f),
            (_, SqlValue::Text(s)) => Value::String(s),
            (_, SqlValue::Blob(b)) => Value::String(String::from_utf8_lossy(&b).into_owned()),
        }
    }
}

pub fn parse_date(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|d| d.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}
