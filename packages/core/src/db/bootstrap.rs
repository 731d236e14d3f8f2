//! Schema Bootstrap
//!
//! One-shot, idempotent database preparation: ensure the target database
//! exists, ensure one table per declared model, and bring the secondary index
//! set in line with the schema. Indexes named in the rebuild set are dropped
//! and recreated; everything else is created only when absent.

use crate::db::error::map_store_error;
use crate::db::store::DocumentStore;
use crate::models::Schema;
use crate::services::error::CrudError;
use tracing::{debug, info};

/// Prepare tables and indexes for every model in the schema.
///
/// Safe to call repeatedly; existing tables and indexes are left alone unless
/// their name appears in `indexes_to_build`.
pub async fn init(
    store: &dyn DocumentStore,
    schema: &Schema,
    indexes_to_build: &[String],
) -> Result<(), CrudError> {
    store.ensure_database().await.map_err(map_store_error)?;
    let tables = store.table_list().await.map_err(map_store_error)?;

    for (model_name, model) in schema.models() {
        if !tables.iter().any(|table| table == model_name) {
            info!(table = %model_name, "creating table");
            store
                .table_create(model_name)
                .await
                .map_err(map_store_error)?;
        }

        let existing = store.index_list(model_name).await.map_err(map_store_error)?;
        for index in &model.indexes {
            let present = existing.iter().any(|name| name == &index.name);
            let rebuild = indexes_to_build.iter().any(|name| name == &index.name);

            if present && rebuild {
                info!(table = %model_name, index = %index.name, "rebuilding index");
                store
                    .index_drop(model_name, &index.name)
                    .await
                    .map_err(map_store_error)?;
            } else if present {
                debug!(table = %model_name, index = %index.name, "index already exists");
                continue;
            } else {
                info!(table = %model_name, index = %index.name, "creating index");
            }
            store
                .index_create(model_name, index)
                .await
                .map_err(map_store_error)?;
        }
    }
    Ok(())
}
