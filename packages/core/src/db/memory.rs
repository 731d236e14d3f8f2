//! In-Memory Document Store
//!
//! A complete [`DocumentStore`] implementation over process memory. Tests and
//! embedded deployments use it directly; it also pins down the driver error
//! messages the mapping layer recognises, so the full error path is exercised
//! without a database server.
//!
//! Tables are ordered maps keyed by document id, which makes paging
//! deterministic for unordered queries.

use crate::db::error::StoreError;
use crate::db::store::{DocumentStore, IndexSpec, SortOrder, TableQuery, WriteOutcome};
use crate::models::{Resource, ID_FIELD};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct MemoryInner {
    tables: BTreeMap<String, BTreeMap<String, Resource>>,
    indexes: BTreeMap<String, BTreeMap<String, IndexSpec>>,
}

/// In-memory document store.
///
/// # Examples
///
/// ```rust
/// use crudcast_core::db::{DocumentStore, MemoryStore};
/// use crudcast_core::models::Resource;
/// use serde_json::json;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let store = MemoryStore::new();
/// store.table_create("Item").await?;
///
/// let item = Resource::from_value(json!({"id": "i1", "owner": "u1"})).unwrap();
/// store.insert("Item", item).await?;
///
/// let loaded = store.get("Item", "i1").await?;
/// assert_eq!(loaded.unwrap().get("owner"), Some(&json!("u1")));
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn table_missing(table: &str) -> StoreError {
        StoreError::operation(format!("Table `{}` does not exist.", table))
    }

    /// Number of documents currently in a table (testing aid)
    pub fn table_len(&self, table: &str) -> usize {
        let inner = self.inner.lock().expect("store lock poisoned");
        inner.tables.get(table).map(|t| t.len()).unwrap_or(0)
    }
}

/// Total order over JSON values for `order_by` evaluation: nulls, then
/// booleans, numbers, strings; other value types compare by serialization.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(value: Option<&Value>) -> u8 {
        match value {
            None => 0,
            Some(Value::Null) => 1,
            Some(Value::Bool(_)) => 2,
            Some(Value::Number(_)) => 3,
            Some(Value::String(_)) => 4,
            Some(Value::Array(_)) => 5,
            Some(Value::Object(_)) => 6,
        }
    }

    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Array(_)), Some(Value::Array(_)))
        | (Some(Value::Object(_)), Some(Value::Object(_))) => {
            a.map(|v| v.to_string()).cmp(&b.map(|v| v.to_string()))
        }
        _ => rank(a).cmp(&rank(b)),
    }
}

fn run_query(table: &BTreeMap<String, Resource>, query: &TableQuery) -> Vec<Resource> {
    let mut rows: Vec<Resource> = table
        .values()
        .filter(|resource| query.matches(resource))
        .cloned()
        .collect();

    if let Some((field, order)) = query.ordering() {
        rows.sort_by(|a, b| {
            let ordering = compare_values(a.get(field), b.get(field));
            match order {
                SortOrder::Ascending => ordering,
                SortOrder::Descending => ordering.reverse(),
            }
        });
    }
    rows
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn ensure_database(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn table_list(&self) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.lock().expect("store lock poisoned");
        Ok(inner.tables.keys().cloned().collect())
    }

    async fn table_create(&self, table: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        inner.tables.entry(table.to_string()).or_default();
        inner.indexes.entry(table.to_string()).or_default();
        Ok(())
    }

    async fn index_list(&self, table: &str) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.lock().expect("store lock poisoned");
        Ok(inner
            .indexes
            .get(table)
            .map(|indexes| indexes.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn index_create(&self, table: &str, index: &IndexSpec) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        let indexes = inner
            .indexes
            .get_mut(table)
            .ok_or_else(|| Self::table_missing(table))?;
        indexes.insert(index.name.clone(), index.clone());
        Ok(())
    }

    async fn index_drop(&self, table: &str, index: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        let indexes = inner
            .indexes
            .get_mut(table)
            .ok_or_else(|| Self::table_missing(table))?;
        indexes.remove(index);
        Ok(())
    }

    async fn get(&self, table: &str, id: &str) -> Result<Option<Resource>, StoreError> {
        let inner = self.inner.lock().expect("store lock poisoned");
        Ok(inner.tables.get(table).and_then(|t| t.get(id)).cloned())
    }

    async fn insert(&self, table: &str, mut value: Resource) -> Result<WriteOutcome, StoreError> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        let rows = inner
            .tables
            .get_mut(table)
            .ok_or_else(|| Self::table_missing(table))?;

        let id = match value.id() {
            Some(id) => id.to_string(),
            None => {
                let id = Uuid::new_v4().to_string();
                value.set(ID_FIELD, Value::String(id.clone()));
                id
            }
        };

        if rows.contains_key(&id) {
            return Err(StoreError::duplicate_primary_key(&id));
        }

        rows.insert(id, value.clone());
        Ok(WriteOutcome::single(None, Some(value)))
    }

    async fn update(
        &self,
        table: &str,
        id: &str,
        patch: Map<String, Value>,
    ) -> Result<WriteOutcome, StoreError> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        let rows = inner
            .tables
            .get_mut(table)
            .ok_or_else(|| Self::table_missing(table))?;
        let row = rows.get_mut(id).ok_or_else(StoreError::missing_document)?;

        let old = row.clone();
        row.merge(&patch);
        Ok(WriteOutcome::single(Some(old), Some(row.clone())))
    }

    async fn replace(
        &self,
        table: &str,
        id: &str,
        value: Resource,
    ) -> Result<WriteOutcome, StoreError> {
        if value.id() != Some(id) {
            return Err(StoreError::invalid_arguments(
                "replacement document must keep the primary key",
            ));
        }

        let mut inner = self.inner.lock().expect("store lock poisoned");
        let rows = inner
            .tables
            .get_mut(table)
            .ok_or_else(|| Self::table_missing(table))?;
        if !rows.contains_key(id) {
            return Err(StoreError::missing_document());
        }
        let old = rows.insert(id.to_string(), value.clone());
        Ok(WriteOutcome::single(old, Some(value)))
    }

    async fn delete(&self, table: &str, id: &str) -> Result<WriteOutcome, StoreError> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        let rows = inner
            .tables
            .get_mut(table)
            .ok_or_else(|| Self::table_missing(table))?;
        let old = rows.remove(id).ok_or_else(StoreError::missing_document)?;
        Ok(WriteOutcome::single(Some(old), None))
    }

    async fn query_ids(
        &self,
        table: &str,
        query: &TableQuery,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.lock().expect("store lock poisoned");
        let rows = inner
            .tables
            .get(table)
            .ok_or_else(|| Self::table_missing(table))?;

        Ok(run_query(rows, query)
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .filter_map(|resource| resource.id().map(str::to_string))
            .collect())
    }

    async fn query_count(&self, table: &str, query: &TableQuery) -> Result<u64, StoreError> {
        let inner = self.inner.lock().expect("store lock poisoned");
        let rows = inner
            .tables
            .get(table)
            .ok_or_else(|| Self::table_missing(table))?;
        Ok(run_query(rows, query).len() as u64)
    }
}
