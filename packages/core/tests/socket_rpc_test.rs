//! Socket RPC tests: the per-socket `crud` procedure consumer, in-order
//! dispatch, reply shapes, and outbound error mapping.

use anyhow::Result;
use crudcast_core::db::MemoryStore;
use crudcast_core::models::{ModelSchema, Schema, SchemaBuilder, ViewSchema};
use crudcast_core::services::{CrudEngine, CrudOptions};
use crudcast_core::socket::{LocalExchange, SocketChannel, SocketInfo};
use crudcast_core::validation::TypeConstraint;
use crudcast_core::CrudError;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;

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

fn engine_with(options: CrudOptions) -> Arc<CrudEngine> {
    CrudEngine::new(
        item_schema(),
        Arc::new(MemoryStore::new()),
        Arc::new(LocalExchange::new()),
        options,
    )
}

#[tokio::test]
async fn test_full_crud_round_trip_over_one_socket() -> Result<()> {
    let engine = engine_with(CrudOptions::default());
    engine.init(&[]).await?;

    let (channel, handle) = SocketChannel::new(SocketInfo::new("s1"));
    engine.attach_socket(channel);

    // create replies with the inserted id
    let created = handle
        .invoke(json!({
            "action": "create",
            "type": "Item",
            "value": {"id": "i1", "owner": "u1"}
        }))
        .await?;
    assert_eq!(created, json!("i1"));

    // read replies with the document
    let read = handle
        .invoke(json!({"action": "read", "type": "Item", "id": "i1"}))
        .await?;
    assert_eq!(read["owner"], "u1");

    // update replies with null and is visible on the next read
    let updated = handle
        .invoke(json!({
            "action": "update",
            "type": "Item",
            "id": "i1",
            "field": "owner",
            "value": "u2"
        }))
        .await?;
    assert_eq!(updated, Value::Null);

    let read = handle
        .invoke(json!({"action": "read", "type": "Item", "id": "i1"}))
        .await?;
    assert_eq!(read["owner"], "u2");

    // delete replies with null; the document is gone
    let deleted = handle
        .invoke(json!({"action": "delete", "type": "Item", "id": "i1"}))
        .await?;
    assert_eq!(deleted, Value::Null);

    let read = handle
        .invoke(json!({"action": "read", "type": "Item", "id": "i1"}))
        .await?;
    assert_eq!(read, Value::Null);
    Ok(())
}

#[tokio::test]
async fn test_requests_on_one_socket_are_processed_in_order() -> Result<()> {
    let engine = engine_with(CrudOptions::default());
    engine.init(&[]).await?;

    let (channel, handle) = SocketChannel::new(SocketInfo::new("s1"));
    engine.attach_socket(channel);

    // Fire a burst of dependent writes without awaiting between sends; the
    // single consumer must apply them in arrival order.
    let create = handle.invoke(json!({
        "action": "create",
        "type": "Item",
        "value": {"id": "i1", "owner": "start"}
    }));
    let first_update = handle.invoke(json!({
        "action": "update",
        "type": "Item",
        "id": "i1",
        "field": "owner",
        "value": "middle"
    }));
    let second_update = handle.invoke(json!({
        "action": "update",
        "type": "Item",
        "id": "i1",
        "field": "owner",
        "value": "final"
    }));

    let (create, first, second) = tokio::join!(create, first_update, second_update);
    create?;
    first?;
    second?;

    let read = handle
        .invoke(json!({"action": "read", "type": "Item", "id": "i1"}))
        .await?;
    assert_eq!(read["owner"], "final");
    Ok(())
}

#[tokio::test]
async fn test_missing_action_and_subscribe_are_rejected() -> Result<()> {
    let engine = engine_with(CrudOptions::default());
    engine.init(&[]).await?;

    let (channel, handle) = SocketChannel::new(SocketInfo::new("s1"));
    engine.attach_socket(channel);

    let missing = handle
        .invoke(json!({"type": "Item", "id": "i1"}))
        .await
        .unwrap_err();
    assert!(matches!(missing, CrudError::InvalidOperation(_)));

    let subscribe = handle
        .invoke(json!({"action": "subscribe", "type": "Item", "id": "i1"}))
        .await
        .unwrap_err();
    assert!(matches!(subscribe, CrudError::InvalidOperation(_)));
    Ok(())
}

#[tokio::test]
async fn test_client_error_mapper_rewrites_outbound_errors() -> Result<()> {
    let options = CrudOptions::default().with_client_error_mapper(|error, action, query| {
        CrudError::database(format!(
            "mapped {} during {} on {}",
            error.name(),
            action.map(|a| a.as_str()).unwrap_or("unknown"),
            query.model
        ))
    });
    let engine = engine_with(options);
    engine.init(&[]).await?;

    let (channel, handle) = SocketChannel::new(SocketInfo::new("s1"));
    engine.attach_socket(channel);

    let error = handle
        .invoke(json!({"action": "read", "type": "Item", "id": "missing-doc", "field": "owner"}))
        .await;
    // A field read of a missing document resolves to null, not an error
    assert_eq!(error?, Value::Null);

    let error = handle
        .invoke(json!({"action": "update", "type": "Item", "id": "nope", "field": "owner", "value": "x"}))
        .await
        .unwrap_err();
    assert_eq!(
        error,
        CrudError::Database("mapped DocumentNotFoundError during update on Item".to_string())
    );
    Ok(())
}

#[tokio::test]
async fn test_serve_attaches_handshaking_sockets() -> Result<()> {
    let engine = engine_with(CrudOptions::default());
    engine.init(&[]).await?;

    let (handshake_tx, handshake_rx) = mpsc::unbounded_channel();
    engine.serve(handshake_rx);

    let (channel, handle) = SocketChannel::new(SocketInfo::new("s1"));
    handshake_tx.send(channel).expect("handshake stream open");

    let created = handle
        .invoke(json!({
            "action": "create",
            "type": "Item",
            "value": {"owner": "u1"}
        }))
        .await?;
    // The store generated an id for the value
    assert!(created.as_str().is_some());
    Ok(())
}
