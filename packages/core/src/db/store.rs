//! DocumentStore Trait - Database Abstraction Layer
//!
//! The engine never talks to a database driver directly. Every persistence
//! concern goes through the `DocumentStore` trait: table and index management
//! for bootstrap, single-document reads, change-returning writes, and id-page
//! queries for collection views.
//!
//! # Design
//!
//! - **Async-first**: all methods are async so both embedded and networked
//!   backends fit behind the trait.
//! - **Change-returning writes**: every write returns the old/new document
//!   pair so the engine can compute publications without a second read.
//! - **Opaque view queries**: collection views are caller-supplied transform
//!   predicates over [`TableQuery`]; the store only evaluates them. There is
//!   no server-side query-language translation.
//! - **Error contract**: failures surface as [`StoreError`] whose message is
//!   mapped into the engine taxonomy by [`map_store_error`].
//!
//! [`map_store_error`]: crate::db::error::map_store_error
//! [`StoreError`]: crate::db::error::StoreError

use crate::db::error::StoreError;
use crate::models::Resource;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// Sort direction for ordered collection queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

type FilterFn = Arc<dyn Fn(&Resource) -> bool + Send + Sync>;

/// A composable collection query: caller-supplied filter predicates plus an
/// optional ordering. View transforms build these; the store evaluates them.
#[derive(Clone, Default)]
pub struct TableQuery {
    filters: Vec<FilterFn>,
    order_by: Option<(String, SortOrder)>,
}

impl TableQuery {
    /// An unfiltered query over a whole table
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a filter predicate (composes with AND)
    pub fn filter(mut self, predicate: impl Fn(&Resource) -> bool + Send + Sync + 'static) -> Self {
        self.filters.push(Arc::new(predicate));
        self
    }

    /// Order results by a field
    pub fn order_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.order_by = Some((field.into(), order));
        self
    }

    /// Whether a resource passes every filter
    pub fn matches(&self, resource: &Resource) -> bool {
        self.filters.iter().all(|filter| filter(resource))
    }

    /// The requested ordering, if any
    pub fn ordering(&self) -> Option<(&str, SortOrder)> {
        self.order_by
            .as_ref()
            .map(|(field, order)| (field.as_str(), *order))
    }
}

impl fmt::Debug for TableQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableQuery")
            .field("filters", &self.filters.len())
            .field("order_by", &self.order_by)
            .finish()
    }
}

/// How an index derives its key from a document.
#[derive(Clone)]
pub enum IndexKind {
    /// Index over a single field of the same name
    Field,
    /// Compound index over several fields
    Compound(Vec<String>),
    /// Index keyed by an arbitrary function of the document
    Custom(Arc<dyn Fn(&Resource) -> Value + Send + Sync>),
}

/// Declaration of one secondary index on a model's table.
#[derive(Clone)]
pub struct IndexSpec {
    /// Index name (also the field name for [`IndexKind::Field`])
    pub name: String,
    /// Key derivation
    pub kind: IndexKind,
    /// Whether the indexed value is a set of keys rather than one key
    pub multi: bool,
}

impl IndexSpec {
    /// Simple index over the named field
    pub fn field(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: IndexKind::Field,
            multi: false,
        }
    }

    /// Compound index over several fields
    pub fn compound<I, S>(name: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            kind: IndexKind::Compound(fields.into_iter().map(Into::into).collect()),
            multi: false,
        }
    }

    /// Index keyed by a custom function of the document
    pub fn custom(
        name: impl Into<String>,
        key: impl Fn(&Resource) -> Value + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            kind: IndexKind::Custom(Arc::new(key)),
            multi: false,
        }
    }

    /// Mark the index as multi-valued
    pub fn with_multi(mut self) -> Self {
        self.multi = true;
        self
    }
}

impl fmt::Debug for IndexSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            IndexKind::Field => "field".to_string(),
            IndexKind::Compound(fields) => format!("compound({})", fields.join(", ")),
            IndexKind::Custom(_) => "custom".to_string(),
        };
        f.debug_struct("IndexSpec")
            .field("name", &self.name)
            .field("kind", &kind)
            .field("multi", &self.multi)
            .finish()
    }
}

/// One document transition reported by a write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteChange {
    /// Document state before the write (`None` for inserts)
    pub old_val: Option<Resource>,
    /// Document state after the write (`None` for deletes)
    pub new_val: Option<Resource>,
}

/// Result of a change-returning write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteOutcome {
    /// The document transitions caused by the write
    pub changes: Vec<WriteChange>,
}

impl WriteOutcome {
    /// Build an outcome carrying a single transition
    pub fn single(old_val: Option<Resource>, new_val: Option<Resource>) -> Self {
        Self {
            changes: vec![WriteChange { old_val, new_val }],
        }
    }

    /// The first post-write document, if any
    pub fn first_new(&self) -> Option<&Resource> {
        self.changes.first().and_then(|c| c.new_val.as_ref())
    }

    /// The first pre-write document, if any
    pub fn first_old(&self) -> Option<&Resource> {
        self.changes.first().and_then(|c| c.old_val.as_ref())
    }
}

/// Abstraction over the document database.
///
/// Implementations must be `Send + Sync`; the engine shares one store across
/// all in-flight operations.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Ensure the target database exists
    async fn ensure_database(&self) -> Result<(), StoreError>;

    /// List existing tables
    async fn table_list(&self) -> Result<Vec<String>, StoreError>;

    /// Create a table
    async fn table_create(&self, table: &str) -> Result<(), StoreError>;

    /// List secondary indexes on a table
    async fn index_list(&self, table: &str) -> Result<Vec<String>, StoreError>;

    /// Create a secondary index
    async fn index_create(&self, table: &str, index: &IndexSpec) -> Result<(), StoreError>;

    /// Drop a secondary index
    async fn index_drop(&self, table: &str, index: &str) -> Result<(), StoreError>;

    /// Fetch one document by id
    ///
    /// Returns `Ok(None)` when the document does not exist; that is not an
    /// error for reads.
    async fn get(&self, table: &str, id: &str) -> Result<Option<Resource>, StoreError>;

    /// Insert a document, returning the inserted state
    ///
    /// Implementations generate an id when the document has none, and fail
    /// with a duplicate-primary-key error when the id already exists.
    async fn insert(&self, table: &str, value: Resource) -> Result<WriteOutcome, StoreError>;

    /// Merge a partial patch onto an existing document
    ///
    /// Fails with a missing-document error when the id does not exist.
    async fn update(
        &self,
        table: &str,
        id: &str,
        patch: Map<String, Value>,
    ) -> Result<WriteOutcome, StoreError>;

    /// Replace an existing document wholesale
    async fn replace(
        &self,
        table: &str,
        id: &str,
        value: Resource,
    ) -> Result<WriteOutcome, StoreError>;

    /// Delete a document by id
    async fn delete(&self, table: &str, id: &str) -> Result<WriteOutcome, StoreError>;

    /// Fetch a page of document ids matching a query
    async fn query_ids(
        &self,
        table: &str,
        query: &TableQuery,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<String>, StoreError>;

    /// Count the documents matching a query
    async fn query_count(&self, table: &str, query: &TableQuery) -> Result<u64, StoreError>;
}
