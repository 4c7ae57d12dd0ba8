//! Engine error taxonomy.

use crate::{ElementId, Operation};

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("unknown index type: {0}")]
    UnknownType(String),
    #[error("index type already registered: {0}")]
    DuplicateType(String),
    #[error("reindex already in progress for type {0}")]
    ReindexInProgress(String),
    #[error("invalid reindex element {id} of type {type_name}: {reason}")]
    InvalidReindexOperation { type_name: String, id: ElementId, reason: String },
    #[error("element {id} already exists in type {type_name}")]
    DuplicateElement { type_name: String, id: ElementId },
    #[error("element {id} not found in type {type_name}")]
    NotFound { type_name: String, id: ElementId },
    #[error("element {id} belongs to type {element_type}, not {type_name}")]
    TypeMismatch { type_name: String, id: ElementId, element_type: String },
    #[error("invalid field {field} for type {type_name}: {reason}")]
    InvalidField { type_name: String, field: String, reason: String },
    #[error("reindex of type {type_name} failed")]
    ReindexFailed {
        type_name: String,
        #[source]
        source: anyhow::Error,
    },
}

impl IndexError {
    pub fn invalid_reindex_op(type_name: &str, id: &ElementId, op: Operation) -> Self {
        IndexError::InvalidReindexOperation {
            type_name: type_name.to_string(),
            id: id.clone(),
            reason: format!("operation must be insert, got {}", op),
        }
    }

    pub fn invalid_field(type_name: &str, field: &str, reason: impl Into<String>) -> Self {
        IndexError::InvalidField { type_name: type_name.to_string(), field: field.to_string(), reason: reason.into() }
    }

    /// Caller errors are never retried internally; the caller decides.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            IndexError::DuplicateElement { .. }
                | IndexError::NotFound { .. }
                | IndexError::InvalidField { .. }
                | IndexError::TypeMismatch { .. }
        )
    }
}

pub type IndexResult<T> = Result<T, IndexError>;
