//! Store Error Types and Driver-Message Mapping
//!
//! Database drivers report failures as message strings. This module defines
//! the raw [`StoreError`] carried across the store trait and the mapping of
//! well-known driver messages into the engine taxonomy: the missing-document
//! message becomes [`CrudError::DocumentNotFound`], the duplicate-primary-key
//! message becomes [`CrudError::DuplicatePrimaryKey`] with the key captured
//! from the message, and everything else becomes [`CrudError::Database`].

use crate::services::error::CrudError;
use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

/// Raw store failure as reported by the database driver.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Driver-level operation failure; the message drives error mapping
    #[error("{0}")]
    Operation(String),

    /// The store was called with arguments it cannot execute
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
}

impl StoreError {
    /// Create an operation failure from a driver message
    pub fn operation(message: impl Into<String>) -> Self {
        Self::Operation(message.into())
    }

    /// Create an invalid arguments failure
    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        Self::InvalidArguments(message.into())
    }

    /// The canonical missing-document failure
    pub fn missing_document() -> Self {
        Self::Operation("The query did not find a document and returned null.".to_string())
    }

    /// The canonical duplicate-primary-key failure
    pub fn duplicate_primary_key(key: &str) -> Self {
        Self::Operation(format!("Duplicate primary key `{}`.", key))
    }
}

fn missing_document_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^The query did not find a document and returned null").expect("valid regex")
    })
}

fn duplicate_primary_key_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new("Duplicate primary key `([^`]*)`").expect("valid regex"))
}

/// Map a raw store failure into the engine error taxonomy.
pub fn map_store_error(error: StoreError) -> CrudError {
    match error {
        StoreError::InvalidArguments(message) => CrudError::InvalidArguments(message),
        StoreError::Operation(message) => {
            if missing_document_regex().is_match(&message) {
                return CrudError::DocumentNotFound;
            }
            if let Some(captures) = duplicate_primary_key_regex().captures(&message) {
                return CrudError::DuplicatePrimaryKey {
                    primary_key: captures[1].to_string(),
                };
            }
            CrudError::Database(message)
        }
    }
}
