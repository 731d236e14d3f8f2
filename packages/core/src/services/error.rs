//! Engine Error Types
//!
//! This module defines the error taxonomy shared by every engine operation,
//! the access filter, and the RPC boundary. Database driver messages are
//! mapped into this taxonomy by `db::error::map_store_error`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// Which access filter blocked an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockKind {
    Pre,
    Post,
}

/// A single field-level validation failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldError {
    /// Model the record was validated against
    pub model: String,
    /// Field that failed
    pub field: String,
    /// Human-readable failure description
    pub message: String,
}

/// Engine operation errors
///
/// Every variant is cloneable so failure events can carry the error in
/// addition to the operation propagating it to the caller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CrudError {
    /// The addressed document does not exist
    #[error("Document not found")]
    DocumentNotFound,

    /// An insert collided with an existing primary key
    #[error("Duplicate primary key `{primary_key}`")]
    DuplicatePrimaryKey { primary_key: String },

    /// Unmapped database failure
    #[error("Database error: {0}")]
    Database(String),

    /// Malformed arguments outside the query object itself
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// Query `type` missing or not declared in the schema
    #[error("Invalid model type: {0}")]
    InvalidModelType(String),

    /// Query shape violates the schema or the operation contract
    #[error("Invalid query parameters: {0}")]
    InvalidParams(String),

    /// Unknown or disallowed action
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Record failed model validation
    #[error("Validation failed for model {model}")]
    Validation {
        model: String,
        field_errors: Vec<FieldError>,
    },

    /// An access filter denied the invocation or subscription
    #[error("Access blocked by {kind:?} filter")]
    Blocked { kind: BlockKind },

    /// Clients may not publish onto CRUD channels directly
    #[error("Client publications to CRUD channels are not allowed")]
    PublishNotAllowed,

    /// The engine could not subscribe to a resource channel
    #[error("Failed to subscribe to resource channel {channel}")]
    FailedToSubscribe { channel: String },
}

impl CrudError {
    /// Create a database error
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Create an invalid arguments error
    pub fn invalid_arguments(msg: impl Into<String>) -> Self {
        Self::InvalidArguments(msg.into())
    }

    /// Create an invalid model type error
    pub fn invalid_model_type(msg: impl Into<String>) -> Self {
        Self::InvalidModelType(msg.into())
    }

    /// Create an invalid query parameters error
    pub fn invalid_params(msg: impl Into<String>) -> Self {
        Self::InvalidParams(msg.into())
    }

    /// Create an invalid operation error
    pub fn invalid_operation(msg: impl Into<String>) -> Self {
        Self::InvalidOperation(msg.into())
    }

    /// Create a pre-access block
    pub fn blocked_pre() -> Self {
        Self::Blocked {
            kind: BlockKind::Pre,
        }
    }

    /// Create a post-access block
    pub fn blocked_post() -> Self {
        Self::Blocked {
            kind: BlockKind::Post,
        }
    }

    /// Create a subscription failure for a resource channel
    pub fn failed_to_subscribe(channel: impl Into<String>) -> Self {
        Self::FailedToSubscribe {
            channel: channel.into(),
        }
    }

    /// Canonical wire name of the error kind
    pub fn name(&self) -> &'static str {
        match self {
            CrudError::DocumentNotFound => "DocumentNotFoundError",
            CrudError::DuplicatePrimaryKey { .. } => "DuplicatePrimaryKeyError",
            CrudError::Database(_) => "DatabaseError",
            CrudError::InvalidArguments(_) => "InvalidArgumentsError",
            CrudError::InvalidModelType(_) => "CRUDInvalidModelType",
            CrudError::InvalidParams(_) => "CRUDInvalidParams",
            CrudError::InvalidOperation(_) => "CRUDInvalidOperation",
            CrudError::Validation { .. } => "CRUDValidationError",
            CrudError::Blocked { .. } => "CRUDBlockedError",
            CrudError::PublishNotAllowed => "CRUDPublishNotAllowedError",
            CrudError::FailedToSubscribe { .. } => "FailedToSubscribeToResourceChannel",
        }
    }

    /// Serialize the error for an RPC reply
    ///
    /// The payload always carries `name` and `message`; kind-specific detail
    /// fields (`primaryKey`, `fieldErrors`, `type`) are added where they
    /// exist.
    pub fn to_client_value(&self) -> Value {
        let mut payload = json!({
            "name": self.name(),
            "message": self.to_string(),
        });
        match self {
            CrudError::DuplicatePrimaryKey { primary_key } => {
                payload["primaryKey"] = json!(primary_key);
            }
            CrudError::Validation {
                model,
                field_errors,
            } => {
                payload["model"] = json!(model);
                payload["fieldErrors"] = json!(field_errors);
            }
            CrudError::Blocked { kind } => {
                payload["type"] = json!(kind);
            }
            _ => {}
        }
        payload
    }
}
