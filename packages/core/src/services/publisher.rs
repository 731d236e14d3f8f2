//! Publication Dispatcher
//!
//! Routes one completed write to its channel publications, in the order
//! clients rely on: the resource channel first (invalidation), then the
//! modified field channels, then the affected view channels.
//!
//! View publications handle three extra concerns:
//!
//! - **Param transitions**: when an update moves a resource's routing params,
//!   both the old and the new channel are notified so the resource leaves one
//!   membership and enters the other.
//! - **Multi-param expansion**: a param field with comma-separated multi
//!   semantics also publishes on each single-value variant channel (with the
//!   `"false"` sentinel variant for null values). Variants present on both
//!   sides of a move are suppressed, and total variant fanout per write is
//!   capped.
//! - **`disable_realtime`** views publish nothing.

use crate::channel::{field_channel, primary_params, resource_channel, view_channel};
use crate::models::{CrudQuery, Resource, Schema};
use crate::services::view_affect::{modified_resource_fields, ViewAffectEngine, ViewData};
use crate::socket::{Exchange, SocketInfo};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Default cap on multi-param variant publications per write.
pub const DEFAULT_MAX_MULTI_PUBLISH: usize = 20;

/// Kind tag of a change publication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
}

impl ChangeKind {
    /// Wire representation of the kind
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Create => "create",
            ChangeKind::Update => "update",
            ChangeKind::Delete => "delete",
        }
    }
}

/// Identity of the writer, echoed on its publications so the outbound
/// middleware can suppress echoes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublisherMeta {
    pub socket_id: Option<String>,
    pub publisher_id: Option<String>,
}

impl PublisherMeta {
    /// A server-origin write with no publisher identity
    pub fn server() -> Self {
        Self::default()
    }

    /// Derive the publisher identity of one invocation
    pub fn from_invocation(socket: Option<&SocketInfo>, query: &CrudQuery) -> Self {
        Self {
            socket_id: socket.map(|s| s.id.clone()),
            publisher_id: query.publisher_id.clone(),
        }
    }
}

/// Payload of a field or view publication.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangePayload {
    pub kind: ChangeKind,
    pub value: Option<Value>,
    pub publisher_socket_id: Option<String>,
    pub publisher_id: Option<String>,
}

impl ChangePayload {
    /// Build a payload of the given kind and value
    pub fn new(kind: ChangeKind, value: Option<Value>, meta: &PublisherMeta) -> Self {
        Self {
            kind,
            value,
            publisher_socket_id: meta.socket_id.clone(),
            publisher_id: meta.publisher_id.clone(),
        }
    }

    /// The `{id}` membership payload view channels carry
    pub fn membership(kind: ChangeKind, id: &str, meta: &PublisherMeta) -> Self {
        Self::new(kind, Some(json!({ "id": id })), meta)
    }

    /// Serialize for the wire
    pub fn to_value(&self) -> Value {
        let mut payload = json!({ "type": self.kind.as_str() });
        if let Some(value) = &self.value {
            payload["value"] = value.clone();
        }
        if let Some(socket_id) = &self.publisher_socket_id {
            payload["publisherSocketId"] = json!(socket_id);
        }
        if let Some(publisher_id) = &self.publisher_id {
            payload["publisherId"] = json!(publisher_id);
        }
        payload
    }
}

/// Routes completed writes to channel publications.
#[derive(Clone)]
pub struct Publisher {
    schema: Arc<Schema>,
    exchange: Arc<dyn Exchange>,
    affect: ViewAffectEngine,
    typed_view_channel_params: bool,
    max_multi_publish: usize,
}

impl Publisher {
    /// Create a dispatcher over the schema and exchange
    pub fn new(
        schema: Arc<Schema>,
        exchange: Arc<dyn Exchange>,
        typed_view_channel_params: bool,
        max_multi_publish: usize,
    ) -> Self {
        Self {
            affect: ViewAffectEngine::new(Arc::clone(&schema)),
            schema,
            exchange,
            typed_view_channel_params,
            max_multi_publish,
        }
    }

    async fn transmit(&self, channel: &str, payload: Option<Value>) {
        debug!(channel = %channel, "publishing");
        if let Err(error) = self.exchange.transmit_publish(channel, payload).await {
            warn!(channel = %channel, error = %error, "publish failed");
        }
    }

    /// Publish the resource channel of one document (no payload)
    pub async fn publish_resource(&self, model: &str, id: &str) {
        self.transmit(&resource_channel(model, id), None).await;
    }

    /// Publish field channels by name only, with no payload.
    ///
    /// Used when the written values are unknown or not representable on the
    /// wire (externally-originated writes, opaque predicates).
    pub async fn publish_field_names_only(&self, model: &str, id: &str, fields: &[String]) {
        for field in fields {
            self.transmit(&field_channel(model, id, field), None).await;
        }
    }

    /// Publish one view channel directly, without affect computation
    pub async fn publish_view(
        &self,
        model: &str,
        view: &str,
        params: &Map<String, Value>,
        kind: ChangeKind,
    ) {
        let primary_fields = self
            .schema
            .view(model, view)
            .and_then(|v| v.primary_fields.clone());
        let routed = primary_params(
            primary_fields.as_deref(),
            params,
            self.typed_view_channel_params,
        );
        let payload = ChangePayload::new(kind, None, &PublisherMeta::server());
        self.transmit(&view_channel(view, model, &routed), Some(payload.to_value()))
            .await;
    }

    /// Publications for a completed create
    pub async fn publish_create(&self, model: &str, resource: &Resource, meta: &PublisherMeta) {
        let Some(id) = resource.id() else { return };
        self.publish_resource(model, id).await;

        let mut budget = self.max_multi_publish;
        for view in self.affect.affected_views(model, resource, None) {
            if view.disable_realtime {
                continue;
            }
            let payload = ChangePayload::membership(ChangeKind::Create, id, meta);
            for channel in self.view_channels(&view, &mut budget) {
                self.transmit(&channel, Some(payload.to_value())).await;
            }
        }
    }

    /// Publications for a completed update
    pub async fn publish_update(
        &self,
        model: &str,
        id: &str,
        old: &Resource,
        new: &Resource,
        meta: &PublisherMeta,
    ) {
        self.publish_resource(model, id).await;

        let changes = modified_resource_fields(Some(old), Some(new));
        for (field, change) in &changes {
            let payload = match &change.after {
                Some(value) => ChangePayload::new(ChangeKind::Update, Some(value.clone()), meta),
                None => ChangePayload::new(ChangeKind::Delete, None, meta),
            };
            self.transmit(&field_channel(model, id, field), Some(payload.to_value()))
                .await;
        }

        let modified: BTreeSet<String> = changes.keys().cloned().collect();
        self.publish_view_transitions(model, id, old, new, &modified, meta)
            .await;
    }

    /// Publications for a whole-document delete
    pub async fn publish_delete(&self, model: &str, old: &Resource, meta: &PublisherMeta) {
        let Some(id) = old.id() else { return };
        self.publish_resource(model, id).await;

        if let Some(model_schema) = self.schema.model(model) {
            for field in model_schema.fields.keys() {
                let payload = ChangePayload::new(ChangeKind::Delete, None, meta);
                self.transmit(&field_channel(model, id, field), Some(payload.to_value()))
                    .await;
            }
        }

        let mut budget = self.max_multi_publish;
        for view in self.affect.affected_views(model, old, None) {
            if view.disable_realtime {
                continue;
            }
            let payload = ChangePayload::membership(ChangeKind::Delete, id, meta);
            for channel in self.view_channels(&view, &mut budget) {
                self.transmit(&channel, Some(payload.to_value())).await;
            }
        }
    }

    /// Publications for a single-field removal.
    ///
    /// View transitions are computed from the pre-delete snapshot against the
    /// snapshot without the field, so membership moves stay consistent even
    /// when the write result lags.
    pub async fn publish_field_removal(
        &self,
        model: &str,
        id: &str,
        field: &str,
        old: &Resource,
        new: &Resource,
        meta: &PublisherMeta,
    ) {
        self.publish_resource(model, id).await;

        let payload = ChangePayload::new(ChangeKind::Delete, None, meta);
        self.transmit(&field_channel(model, id, field), Some(payload.to_value()))
            .await;

        let modified: BTreeSet<String> = [field.to_string()].into_iter().collect();
        self.publish_view_transitions(model, id, old, new, &modified, meta)
            .await;
    }

    async fn publish_view_transitions(
        &self,
        model: &str,
        id: &str,
        old: &Resource,
        new: &Resource,
        modified: &BTreeSet<String>,
        meta: &PublisherMeta,
    ) {
        let old_views = self.affect.affected_views(model, old, Some(modified));
        let new_views = self.affect.affected_views(model, new, Some(modified));
        let mut budget = self.max_multi_publish;

        // The candidate set is schema-determined, so both enumerations pair
        // up one to one by (model, view).
        for (old_view, new_view) in old_views.iter().zip(new_views.iter()) {
            if new_view.disable_realtime {
                continue;
            }
            let payload = ChangePayload::membership(ChangeKind::Update, id, meta);

            if old_view.params == new_view.params {
                for channel in self.view_channels(new_view, &mut budget) {
                    self.transmit(&channel, Some(payload.to_value())).await;
                }
                continue;
            }

            // Param move: leave the old channel, enter the new one. Variants
            // present on both sides would observe no membership change, so
            // they are suppressed.
            let old_channels = self.view_channels(old_view, &mut budget);
            let new_channels = self.view_channels(new_view, &mut budget);
            let old_set: BTreeSet<&String> = old_channels.iter().collect();
            let new_set: BTreeSet<&String> = new_channels.iter().collect();

            let mut published: BTreeSet<&String> = BTreeSet::new();
            for channel in old_channels.iter().chain(new_channels.iter()) {
                if old_set.contains(channel) && new_set.contains(channel) {
                    continue;
                }
                if !published.insert(channel) {
                    continue;
                }
                self.transmit(channel, Some(payload.to_value())).await;
            }
        }
    }

    /// The channel names one view publication lands on: the base channel plus
    /// multi-param variants, bounded by the per-write budget.
    fn view_channels(&self, view: &ViewData, budget: &mut usize) -> Vec<String> {
        let primary = primary_params(
            view.primary_fields.as_deref(),
            &view.params,
            self.typed_view_channel_params,
        );
        let mut channels = vec![view_channel(&view.view, &view.model, &primary)];

        for (field, value) in &primary {
            if !self.schema.is_multi_field(&view.model, field) {
                continue;
            }
            let variants: Vec<Value> = match value {
                Value::String(joined) => joined
                    .split(',')
                    .map(|element| Value::String(element.to_string()))
                    .collect(),
                Value::Null => vec![Value::String("false".to_string())],
                _ => continue,
            };
            for variant_value in variants {
                if *budget == 0 {
                    warn!(
                        view = %view.view,
                        model = %view.model,
                        "multi-param fanout capped"
                    );
                    return channels;
                }
                let mut variant = primary.clone();
                variant.insert(field.clone(), variant_value);
                let name = view_channel(&view.view, &view.model, &variant);
                if !channels.contains(&name) {
                    channels.push(name);
                    *budget -= 1;
                }
            }
        }
        channels
    }
}
