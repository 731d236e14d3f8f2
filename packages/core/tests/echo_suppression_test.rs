//! End-to-end publisher echo suppression: a socket's own write flows through
//! the engine, the raw payload carries its publisher identity, and the
//! outbound middleware silences the echo while other sockets receive a
//! sanitised payload.

use anyhow::Result;
use crudcast_core::db::MemoryStore;
use crudcast_core::models::{CrudQuery, ModelSchema, Schema, SchemaBuilder, ViewSchema};
use crudcast_core::services::{AccessController, CrudEngine, CrudOptions};
use crudcast_core::socket::{
    Exchange, LocalExchange, MiddlewareDecision, PublishOutAction, SocketInfo,
};
use crudcast_core::validation::TypeConstraint;
use serde_json::json;
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

#[tokio::test]
async fn test_writer_gets_no_echo_while_others_get_sanitised_payloads() -> Result<()> {
    let exchange = Arc::new(LocalExchange::new());
    let engine = CrudEngine::new(
        item_schema(),
        Arc::new(MemoryStore::new()),
        Arc::clone(&exchange) as Arc<dyn Exchange>,
        CrudOptions::default(),
    );
    engine.init(&[]).await?;
    let controller = AccessController::new(Arc::clone(&engine));

    let seed = CrudQuery::new("Item").with_value(json!({"id": "i1", "owner": "u1"}));
    engine.create(&seed, None).await?;

    // Both sockets are subscribed to the field channel (transport level)
    let mut transport_sub = exchange.subscribe("crud>Item/i1/owner").await?;

    // Socket S performs the write
    let writer = SocketInfo::new("s-writer");
    let update = CrudQuery::by_id("Item", "i1")
        .with_field("owner")
        .with_value(json!("u2"));
    engine.update(&update, Some(&writer)).await?;

    // The raw transport payload carries the writer's identity
    let raw = timeout(Duration::from_secs(1), transport_sub.receiver.recv())
        .await?
        .expect("channel open")
        .expect("payload present");
    assert_eq!(
        raw,
        json!({"type": "update", "value": "u2", "publisherSocketId": "s-writer"})
    );

    // Outbound middleware: delivery back to the writer is discarded
    let echo = PublishOutAction {
        socket: writer.clone(),
        channel: "crud>Item/i1/owner".to_string(),
        payload: Some(raw.clone()),
    };
    assert_eq!(
        controller.handle_publish_out(&echo),
        MiddlewareDecision::Discard
    );

    // Delivery to a second socket is allowed, with publisher ids stripped
    let other = PublishOutAction {
        socket: SocketInfo::new("s-observer"),
        channel: "crud>Item/i1/owner".to_string(),
        payload: Some(raw),
    };
    match controller.handle_publish_out(&other) {
        MiddlewareDecision::Allow(Some(payload)) => {
            assert_eq!(payload, json!({"type": "update", "value": "u2"}));
        }
        other => panic!("expected sanitised delivery, got {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_publisher_id_marker_requests_a_confirmed_echo() -> Result<()> {
    let exchange = Arc::new(LocalExchange::new());
    let engine = CrudEngine::new(
        item_schema(),
        Arc::new(MemoryStore::new()),
        Arc::clone(&exchange) as Arc<dyn Exchange>,
        CrudOptions::default(),
    );
    engine.init(&[]).await?;
    let controller = AccessController::new(Arc::clone(&engine));

    let seed = CrudQuery::new("Item").with_value(json!({"id": "i1", "owner": "u1"}));
    engine.create(&seed, None).await?;

    let mut transport_sub = exchange.subscribe("crud>Item/i1/owner").await?;

    let writer = SocketInfo::new("s-writer");
    let update = CrudQuery::by_id("Item", "i1")
        .with_field("owner")
        .with_value(json!("u2"))
        .with_publisher_id("req-7");
    engine.update(&update, Some(&writer)).await?;

    let raw = timeout(Duration::from_secs(1), transport_sub.receiver.recv())
        .await?
        .expect("channel open")
        .expect("payload present");

    // The writer asked for the echo: it arrives carrying only the marker
    let echo = PublishOutAction {
        socket: writer,
        channel: "crud>Item/i1/owner".to_string(),
        payload: Some(raw),
    };
    match controller.handle_publish_out(&echo) {
        MiddlewareDecision::Allow(Some(payload)) => {
            assert_eq!(payload["publisherId"], "req-7");
            assert!(payload.get("publisherSocketId").is_none());
        }
        other => panic!("expected marked echo, got {:?}", other),
    }
    Ok(())
}
