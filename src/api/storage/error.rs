//! Storage error types for the entity store.

use crate::ids::IdError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Storage operation errors.
///
/// A missing row on a get-one read is never an error: readers return `None`.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StorageError {
    /// Identifier of the wrong length or encoding
    #[error("Invalid id: {0}")]
    InvalidId(String),
    /// Row targeted by an update or delete does not exist
    #[error("Entity not found: {entity_type} with id {entity_id}")]
    NotFound {
        entity_type: String,
        entity_id: String,
    },
    /// Uniqueness violation
    #[error("Conflict on {entity_type}: {detail}")]
    Conflict { entity_type: String, detail: String },
    /// Referenced row does not exist (foreign-key violation)
    #[error("Referential error on {entity_type}: {detail}")]
    ReferentialError { entity_type: String, detail: String },
    /// Row violates a structural invariant (e.g. delta columns on a base row)
    #[error("Invalid {entity_type}: {detail}")]
    Invalid { entity_type: String, detail: String },
    /// Store closed or otherwise unusable
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    pub fn not_found(entity_type: &str, entity_id: impl ToString) -> Self {
        StorageError::NotFound {
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
        }
    }

    pub fn conflict(entity_type: &str, detail: impl Into<String>) -> Self {
        StorageError::Conflict {
            entity_type: entity_type.to_string(),
            detail: detail.into(),
        }
    }

    pub fn invalid(entity_type: &str, detail: impl Into<String>) -> Self {
        StorageError::Invalid {
            entity_type: entity_type.to_string(),
            detail: detail.into(),
        }
    }

    pub fn referential(entity_type: &str, detail: impl Into<String>) -> Self {
        StorageError::ReferentialError {
            entity_type: entity_type.to_string(),
            detail: detail.into(),
        }
    }
}

impl From<IdError> for StorageError {
    fn from(e: IdError) -> Self {
        StorageError::InvalidId(e.to_string())
    }
}
