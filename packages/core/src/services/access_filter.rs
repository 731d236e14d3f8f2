//! Access Filter
//!
//! The access filter sits in the socket server's inbound and outbound
//! middleware pipelines and interposes schema-declared hooks on every
//! invocation and subscription:
//!
//! - `INVOKE` of the `crud` procedure: query validation, page-size cap, then
//!   the model's pre hook (`block_pre_by_default` applies when none exists)
//! - `SUBSCRIBE` to a CRUD-shaped channel: the same pre logic, then the post
//!   hook with the subject pre-fetched (document through the cache, view page
//!   through the transformed query); the fetched subject becomes the
//!   subscription payload
//! - `PUBLISH_IN` on a CRUD channel: always blocked, clients cannot publish
//!   into the namespace
//! - `PUBLISH_OUT`: publisher echo suppression and publisher-metadata
//!   stripping
//!
//! Boolean denials from hooks are lifted to the canonical blocked error.

use crate::channel::parse_channel_resource_query;
use crate::models::{CrudAction, CrudQuery};
use crate::services::crud_service::{CrudEngine, DEFAULT_MAX_PAGE_SIZE};
use crate::services::error::CrudError;
use crate::socket::{
    InvokeAction, MiddlewareDecision, PublishInAction, PublishOutAction, SubscribeAction,
};
use crate::validation::{parse_query, validate_query};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

/// Procedure name the engine claims on every socket.
pub const CRUD_PROCEDURE: &str = "crud";

/// Middleware-facing access filter over one engine.
#[derive(Clone)]
pub struct AccessController {
    engine: Arc<CrudEngine>,
}

impl AccessController {
    /// Create a filter over the engine
    pub fn new(engine: Arc<CrudEngine>) -> Self {
        Self { engine }
    }

    /// The engine behind this filter
    pub fn engine(&self) -> &Arc<CrudEngine> {
        &self.engine
    }

    /// Gate one inbound RPC invocation.
    pub async fn handle_invoke(&self, action: &InvokeAction) -> MiddlewareDecision {
        if action.procedure != CRUD_PROCEDURE {
            return MiddlewareDecision::Allow(None);
        }

        let query = match parse_query(&action.data, self.engine.schema()) {
            Ok(query) => query,
            Err(error) => return MiddlewareDecision::Block(error),
        };
        let Some(crud_action) = query.action else {
            return MiddlewareDecision::Block(CrudError::invalid_operation(
                "request is missing an action",
            ));
        };

        if crud_action == CrudAction::Read && query.view.is_some() {
            if let Some(page_size) = query.page_size {
                let max_page_size = self
                    .engine
                    .schema()
                    .model(&query.model)
                    .and_then(|m| m.max_page_size)
                    .unwrap_or(DEFAULT_MAX_PAGE_SIZE);
                if page_size > max_page_size {
                    return MiddlewareDecision::Block(CrudError::invalid_params(format!(
                        "pageSize exceeds the maximum of {}",
                        max_page_size
                    )));
                }
            }
        }

        match self
            .engine
            .check_pre_access(&action.socket, &query, crud_action)
            .await
        {
            Ok(()) => MiddlewareDecision::Allow(None),
            Err(error) => MiddlewareDecision::Block(error),
        }
    }

    /// Gate one inbound channel subscription.
    ///
    /// The subject is pre-fetched and handed to the post hook; on allow it
    /// becomes the subscription payload. Client-supplied `viewParams` may
    /// augment the parsed channel query for non-routing fields only.
    pub async fn handle_subscribe(&self, action: &SubscribeAction) -> MiddlewareDecision {
        let Some(channel_query) = parse_channel_resource_query(&action.channel) else {
            return MiddlewareDecision::Allow(None);
        };
        let mut query = channel_query.into_query(CrudAction::Subscribe);
        self.merge_subscribe_params(&mut query, action.data.as_ref());

        if let Err(error) = validate_query(&query, self.engine.schema()) {
            return MiddlewareDecision::Block(error);
        }
        if let Err(error) = self
            .engine
            .check_pre_access(&action.socket, &query, CrudAction::Subscribe)
            .await
        {
            return MiddlewareDecision::Block(error);
        }

        let subject = match self.engine.fetch_subject(&query).await {
            Ok(subject) => subject,
            Err(error) => return MiddlewareDecision::Block(error),
        };
        match self
            .engine
            .check_post_access(
                Some(&action.socket),
                &query,
                CrudAction::Subscribe,
                Some(subject.clone()),
            )
            .await
        {
            Ok(()) => MiddlewareDecision::Allow(Some(subject)),
            Err(error) => MiddlewareDecision::Block(error),
        }
    }

    /// Merge client `viewParams` onto the parsed channel query.
    ///
    /// Routing params (the view's primary fields, or every channel param when
    /// no primary subset is declared) cannot be rewritten this way.
    fn merge_subscribe_params(&self, query: &mut CrudQuery, data: Option<&Value>) {
        let Some(view_name) = query.view.clone() else { return };
        let Some(Value::Object(augment)) = data.and_then(|d| d.get("viewParams")) else {
            return;
        };

        let routing: Vec<String> = match self
            .engine
            .schema()
            .view(&query.model, &view_name)
            .and_then(|v| v.primary_fields.clone())
        {
            Some(primary_fields) => primary_fields,
            None => query
                .view_params
                .as_ref()
                .map(|params| params.keys().cloned().collect())
                .unwrap_or_default(),
        };

        let params = query.view_params.get_or_insert_with(Map::new);
        for (field, value) in augment {
            if routing.iter().any(|routed| routed == field) {
                debug!(field = %field, "ignoring client rewrite of a routing param");
                continue;
            }
            params.insert(field.clone(), value.clone());
        }
    }

    /// Gate one inbound client publication: CRUD channels are write-protected.
    pub fn handle_publish_in(&self, action: &PublishInAction) -> MiddlewareDecision {
        if parse_channel_resource_query(&action.channel).is_some() {
            return MiddlewareDecision::Block(CrudError::PublishNotAllowed);
        }
        MiddlewareDecision::Allow(None)
    }

    /// Gate one outbound publication delivery.
    ///
    /// A payload carrying the receiving socket's own `publisherSocketId` is
    /// an echo: it is dropped silently unless a `publisherId` marker asks for
    /// delivery, in which case the marker survives. Every other receiver gets
    /// the payload with publisher identifiers stripped.
    pub fn handle_publish_out(&self, action: &PublishOutAction) -> MiddlewareDecision {
        if parse_channel_resource_query(&action.channel).is_none() {
            return MiddlewareDecision::Allow(None);
        }
        let Some(Value::Object(payload)) = &action.payload else {
            return MiddlewareDecision::Allow(None);
        };

        let is_echo = payload
            .get("publisherSocketId")
            .and_then(Value::as_str)
            .map(|publisher| publisher == action.socket.id)
            .unwrap_or(false);
        let has_publisher_id = payload.contains_key("publisherId");

        if is_echo && !has_publisher_id {
            return MiddlewareDecision::Discard;
        }

        let mut sanitized = payload.clone();
        sanitized.remove("publisherSocketId");
        if !(is_echo && has_publisher_id) {
            sanitized.remove("publisherId");
        }
        MiddlewareDecision::Allow(Some(Value::Object(sanitized)))
    }
}
