//! External notify API tests: writes made outside this engine are injected
//! into the publication pipeline and produce the same channel traffic a local
//! write would.

use anyhow::Result;
use crudcast_core::db::{DocumentStore, MemoryStore};
use crudcast_core::models::{CrudQuery, ModelSchema, Resource, Schema, SchemaBuilder, ViewSchema};
use crudcast_core::services::{ChangeKind, CrudEngine, CrudOptions};
use crudcast_core::socket::{ChannelSubscription, Exchange, LocalExchange};
use crudcast_core::validation::TypeConstraint;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::time::{timeout, Duration};

fn item_schema() -> Schema {
    SchemaBuilder::new()
        .model(
            "Item",
            ModelSchema::new()
                .with_field("id", TypeConstraint::string())
                .with_field("owner", TypeConstraint::string().required())
                .with_view("byOwner", ViewSchema::new().with_param_fields(["owner"])),
        )
        .build()
}

async fn next_message(subscription: &mut ChannelSubscription) -> Option<Value> {
    timeout(Duration::from_secs(1), subscription.receiver.recv())
        .await
        .expect("publication should arrive within 1 second")
        .expect("channel should stay open")
}

fn resource(value: Value) -> Resource {
    Resource::from_value(value).unwrap()
}

#[tokio::test]
async fn test_notify_update_replays_the_full_dispatcher() -> Result<()> {
    let exchange = Arc::new(LocalExchange::new());
    let engine = CrudEngine::new(
        item_schema(),
        Arc::new(MemoryStore::new()),
        Arc::clone(&exchange) as Arc<dyn Exchange>,
        CrudOptions::default(),
    );
    engine.init(&[]).await?;

    let mut resource_sub = exchange.subscribe("crud>Item/i1").await?;
    let mut field_sub = exchange.subscribe("crud>Item/i1/owner").await?;
    let mut old_view = exchange
        .subscribe(r#"crud>byOwner({"owner":"u1"}):Item"#)
        .await?;
    let mut new_view = exchange
        .subscribe(r#"crud>byOwner({"owner":"u2"}):Item"#)
        .await?;

    // The write happened in another process; this engine only observed it
    let old = resource(json!({"id": "i1", "owner": "u1"}));
    let new = resource(json!({"id": "i1", "owner": "u2"}));
    engine.notify_update("Item", Some(&old), Some(&new)).await?;

    assert_eq!(next_message(&mut resource_sub).await, None);
    assert_eq!(
        next_message(&mut field_sub).await,
        Some(json!({"type": "update", "value": "u2"}))
    );
    let membership = Some(json!({"type": "update", "value": {"id": "i1"}}));
    assert_eq!(next_message(&mut old_view).await, membership);
    assert_eq!(next_message(&mut new_view).await, membership);
    Ok(())
}

#[tokio::test]
async fn test_notify_update_requires_a_state() -> Result<()> {
    let engine = CrudEngine::new(
        item_schema(),
        Arc::new(MemoryStore::new()),
        Arc::new(LocalExchange::new()),
        CrudOptions::default(),
    );
    assert!(engine.notify_update("Item", None, None).await.is_err());
    Ok(())
}

#[tokio::test]
async fn test_notify_resource_update_publishes_names_only() -> Result<()> {
    let exchange = Arc::new(LocalExchange::new());
    let engine = CrudEngine::new(
        item_schema(),
        Arc::new(MemoryStore::new()),
        Arc::clone(&exchange) as Arc<dyn Exchange>,
        CrudOptions::default(),
    );
    engine.init(&[]).await?;

    let mut resource_sub = exchange.subscribe("crud>Item/i1").await?;
    let mut field_sub = exchange.subscribe("crud>Item/i1/owner").await?;

    engine
        .notify_resource_update("Item", "i1", &["owner".to_string()])
        .await;

    // The values were written elsewhere: both publications carry no payload
    assert_eq!(next_message(&mut resource_sub).await, None);
    assert_eq!(next_message(&mut field_sub).await, None);
    Ok(())
}

#[tokio::test]
async fn test_notify_resource_update_invalidates_cached_readers() -> Result<()> {
    let exchange = Arc::new(LocalExchange::new());
    let store = Arc::new(MemoryStore::new());
    let engine = CrudEngine::new(
        item_schema(),
        Arc::clone(&store) as Arc<dyn DocumentStore>,
        Arc::clone(&exchange) as Arc<dyn Exchange>,
        CrudOptions::default(),
    );
    engine.init(&[]).await?;

    store
        .insert("Item", resource(json!({"id": "i1", "owner": "u1"})))
        .await?;

    let read = CrudQuery::by_id("Item", "i1");
    let value = engine.read(&read, None).await?;
    assert_eq!(value["owner"], "u1");

    // An external writer mutates the document, then notifies
    store
        .update(
            "Item",
            "i1",
            json!({"owner": "u2"}).as_object().cloned().unwrap(),
        )
        .await?;
    engine
        .notify_resource_update("Item", "i1", &["owner".to_string()])
        .await;

    // The resource-channel notification clears the cached entry, so the
    // next read observes the external write.
    let deadline = Duration::from_secs(2);
    let fresh = timeout(deadline, async {
        loop {
            let value = engine.read(&read, None).await.expect("read succeeds");
            if value["owner"] == "u2" {
                return value;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("external write should become visible");
    assert_eq!(fresh["owner"], "u2");
    Ok(())
}

#[tokio::test]
async fn test_notify_view_update_targets_one_channel() -> Result<()> {
    let exchange = Arc::new(LocalExchange::new());
    let engine = CrudEngine::new(
        item_schema(),
        Arc::new(MemoryStore::new()),
        Arc::clone(&exchange) as Arc<dyn Exchange>,
        CrudOptions::default(),
    );
    engine.init(&[]).await?;

    let mut view_sub = exchange
        .subscribe(r#"crud>byOwner({"owner":"u1"}):Item"#)
        .await?;

    let params = json!({"owner": "u1"}).as_object().cloned().unwrap();
    engine
        .notify_view_update("Item", "byOwner", &params, None)
        .await;
    assert_eq!(
        next_message(&mut view_sub).await,
        Some(json!({"type": "update"}))
    );

    engine
        .notify_view_update("Item", "byOwner", &params, Some(ChangeKind::Delete))
        .await;
    assert_eq!(
        next_message(&mut view_sub).await,
        Some(json!({"type": "delete"}))
    );
    Ok(())
}
