//! Access filter unit tests: pre/post hooks, page-size caps, publish
//! gatekeeping, and publisher echo suppression.

use crate::db::MemoryStore;
use crate::models::{AccessHooks, CrudQuery, ModelSchema, SchemaBuilder, ViewSchema};
use crate::services::access_filter::AccessController;
use crate::services::crud_service::{CrudEngine, CrudOptions};
use crate::services::error::{BlockKind, CrudError};
use crate::socket::{
    InvokeAction, LocalExchange, MiddlewareDecision, PublishInAction, PublishOutAction,
    SocketInfo, SubscribeAction,
};
use crate::validation::TypeConstraint;
use serde_json::{json, Value};
use std::sync::Arc;

fn item_model() -> ModelSchema {
    ModelSchema::new()
        .with_field("id", TypeConstraint::string())
        .with_field("owner", TypeConstraint::string())
        .with_view("byOwner", ViewSchema::new().with_param_fields(["owner"]))
        .with_max_page_size(25)
}

async fn controller_with(model: ModelSchema, options: CrudOptions) -> AccessController {
    let schema = SchemaBuilder::new().model("Item", model).build();
    let engine = CrudEngine::new(
        schema,
        Arc::new(MemoryStore::new()),
        Arc::new(LocalExchange::new()),
        options,
    );
    engine.init(&[]).await.unwrap();
    AccessController::new(engine)
}

fn invoke(data: Value) -> InvokeAction {
    InvokeAction {
        socket: SocketInfo::new("s1").with_auth_token(json!({"user": "u1"})),
        procedure: "crud".to_string(),
        data,
    }
}

#[tokio::test]
async fn test_foreign_procedures_pass_through() {
    let controller = controller_with(item_model(), CrudOptions::default()).await;
    let mut action = invoke(json!({"nonsense": true}));
    action.procedure = "chat".to_string();

    assert_eq!(
        controller.handle_invoke(&action).await,
        MiddlewareDecision::Allow(None)
    );
}

#[tokio::test]
async fn test_invalid_queries_are_blocked() {
    let controller = controller_with(item_model(), CrudOptions::default()).await;

    let decision = controller
        .handle_invoke(&invoke(json!({"action": "read", "type": "Ghost"})))
        .await;
    assert!(matches!(
        decision,
        MiddlewareDecision::Block(CrudError::InvalidModelType(_))
    ));
}

#[tokio::test]
async fn test_view_page_size_is_capped() {
    let controller = controller_with(item_model(), CrudOptions::default()).await;

    let over = invoke(json!({
        "action": "read",
        "type": "Item",
        "view": "byOwner",
        "viewParams": {"owner": "u1"},
        "pageSize": 26
    }));
    assert!(matches!(
        controller.handle_invoke(&over).await,
        MiddlewareDecision::Block(CrudError::InvalidParams(_))
    ));

    let within = invoke(json!({
        "action": "read",
        "type": "Item",
        "view": "byOwner",
        "viewParams": {"owner": "u1"},
        "pageSize": 25
    }));
    assert!(controller.handle_invoke(&within).await.is_allowed());
}

#[tokio::test]
async fn test_pre_hook_denial_is_lifted_to_blocked() {
    let model = item_model().with_access(AccessHooks::new().with_pre_fn(|request| {
        Ok(request
            .auth_token
            .as_ref()
            .and_then(|token| token.get("user"))
            .is_some())
    }));
    let controller = controller_with(model, CrudOptions::default()).await;

    // With an auth token the hook allows
    let allowed = invoke(json!({"action": "read", "type": "Item", "id": "i1"}));
    assert!(controller.handle_invoke(&allowed).await.is_allowed());

    // Without one the boolean denial becomes a canonical pre block
    let mut anonymous = invoke(json!({"action": "read", "type": "Item", "id": "i1"}));
    anonymous.socket = SocketInfo::new("s2");
    assert_eq!(
        controller.handle_invoke(&anonymous).await,
        MiddlewareDecision::Block(CrudError::Blocked {
            kind: BlockKind::Pre
        })
    );
}

#[tokio::test]
async fn test_block_pre_by_default_requires_a_hook() {
    let controller = controller_with(
        item_model(),
        CrudOptions::default().with_block_pre_by_default(),
    )
    .await;

    let action = invoke(json!({"action": "read", "type": "Item", "id": "i1"}));
    assert_eq!(
        controller.handle_invoke(&action).await,
        MiddlewareDecision::Block(CrudError::Blocked {
            kind: BlockKind::Pre
        })
    );
}

#[tokio::test]
async fn test_subscribe_prefetches_the_subject_for_the_post_hook() {
    let model = item_model().with_access(AccessHooks::new().with_post_fn(|request| {
        // The post hook sees the pre-fetched document
        let owner = request
            .resource
            .as_ref()
            .and_then(|resource| resource.get("owner"))
            .and_then(Value::as_str);
        Ok(owner == Some("u1"))
    }));
    let controller = controller_with(model, CrudOptions::default()).await;

    // Seed a document through the engine's own store
    let engine_query =
        CrudQuery::new("Item").with_value(json!({"id": "i1", "owner": "u1"}));
    controller.engine().create(&engine_query, None).await.unwrap();

    let subscribe = SubscribeAction {
        socket: SocketInfo::new("s1"),
        channel: "crud>Item/i1".to_string(),
        data: None,
    };
    match controller.handle_subscribe(&subscribe).await {
        MiddlewareDecision::Allow(Some(payload)) => {
            assert_eq!(payload["owner"], "u1");
        }
        other => panic!("expected allow with payload, got {:?}", other),
    }

    // A subject failing the hook blocks the subscription
    let other_query =
        CrudQuery::new("Item").with_value(json!({"id": "i2", "owner": "u2"}));
    controller.engine().create(&other_query, None).await.unwrap();
    let denied = SubscribeAction {
        socket: SocketInfo::new("s1"),
        channel: "crud>Item/i2".to_string(),
        data: None,
    };
    assert_eq!(
        controller.handle_subscribe(&denied).await,
        MiddlewareDecision::Block(CrudError::Blocked {
            kind: BlockKind::Post
        })
    );
}

#[tokio::test]
async fn test_subscribe_params_cannot_rewrite_routing_fields() {
    let model = item_model().with_view(
        "pinned",
        ViewSchema::new()
            .with_param_fields(["owner", "label"])
            .with_primary_fields(["owner"]),
    );
    let controller = controller_with(model, CrudOptions::default()).await;

    let subscribe = SubscribeAction {
        socket: SocketInfo::new("s1"),
        channel: r#"crud>pinned({"owner":"u1"}):Item"#.to_string(),
        data: Some(json!({"viewParams": {"owner": "u9", "label": "starred"}})),
    };
    // The subscription is allowed: the label augmentation is honoured while
    // the owner rewrite is ignored, so validation still sees owner = "u1".
    assert!(controller.handle_subscribe(&subscribe).await.is_allowed());
}

#[tokio::test]
async fn test_clients_cannot_publish_into_the_namespace() {
    let controller = controller_with(item_model(), CrudOptions::default()).await;

    let crud_channel = PublishInAction {
        socket: SocketInfo::new("s1"),
        channel: "crud>Item/i1".to_string(),
        payload: Some(json!({"type": "update"})),
    };
    assert_eq!(
        controller.handle_publish_in(&crud_channel),
        MiddlewareDecision::Block(CrudError::PublishNotAllowed)
    );

    let other_channel = PublishInAction {
        socket: SocketInfo::new("s1"),
        channel: "chat/general".to_string(),
        payload: None,
    };
    assert!(controller.handle_publish_in(&other_channel).is_allowed());
}

#[tokio::test]
async fn test_publisher_echo_is_discarded() {
    let controller = controller_with(item_model(), CrudOptions::default()).await;

    let echo = PublishOutAction {
        socket: SocketInfo::new("s1"),
        channel: "crud>Item/i1/owner".to_string(),
        payload: Some(json!({"type": "update", "value": "u2", "publisherSocketId": "s1"})),
    };
    assert_eq!(
        controller.handle_publish_out(&echo),
        MiddlewareDecision::Discard
    );
}

#[tokio::test]
async fn test_publisher_id_marker_survives_the_echo() {
    let controller = controller_with(item_model(), CrudOptions::default()).await;

    let marked = PublishOutAction {
        socket: SocketInfo::new("s1"),
        channel: "crud>Item/i1/owner".to_string(),
        payload: Some(json!({
            "type": "update",
            "value": "u2",
            "publisherSocketId": "s1",
            "publisherId": "req-42"
        })),
    };
    match controller.handle_publish_out(&marked) {
        MiddlewareDecision::Allow(Some(payload)) => {
            assert_eq!(payload["publisherId"], "req-42");
            assert!(payload.get("publisherSocketId").is_none());
        }
        other => panic!("expected allow with payload, got {:?}", other),
    }
}

#[tokio::test]
async fn test_other_receivers_get_sanitised_payloads() {
    let controller = controller_with(item_model(), CrudOptions::default()).await;

    let delivery = PublishOutAction {
        socket: SocketInfo::new("s2"),
        channel: "crud>Item/i1/owner".to_string(),
        payload: Some(json!({
            "type": "update",
            "value": "u2",
            "publisherSocketId": "s1",
            "publisherId": "req-42"
        })),
    };
    match controller.handle_publish_out(&delivery) {
        MiddlewareDecision::Allow(Some(payload)) => {
            assert_eq!(payload, json!({"type": "update", "value": "u2"}));
        }
        other => panic!("expected allow with payload, got {:?}", other),
    }
}
