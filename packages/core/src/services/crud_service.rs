//! CRUD Engine - Core Operations
//!
//! `CrudEngine` implements the four operations against the document store,
//! keeps the per-resource cache coherent, and fans every write out to channel
//! publications through the dispatcher:
//!
//! - create/read/update/delete with schema validation on every call
//! - lazy resource-channel subscriptions wired to cache invalidation, with
//!   subscription lifetime bound to cache entry lifetime
//! - collection reads over transformed view queries, paged with a probe row
//! - a strictly-ordered `crud` procedure consumer per attached socket
//! - the external notify API for writes made outside this engine
//!
//! # Concurrency
//!
//! All mutable state (cache entries, subscription table) sits behind plain
//! mutexes that are never held across a suspension point. Many operations may
//! be in flight at once; requests arriving on one socket are processed in
//! arrival order by that socket's single consumer task.

use crate::channel::{resource_channel, CHANNEL_PREFIX};
use crate::db::bootstrap;
use crate::db::error::map_store_error;
use crate::db::store::{DocumentStore, TableQuery};
use crate::models::schema::AccessRequest;
use crate::models::{CrudAction, CrudQuery, ReadPage, Resource, Schema};
use crate::services::cache::{CacheEvent, ResourceCache, DEFAULT_CACHE_DURATION};
use crate::services::error::CrudError;
use crate::services::events::CrudEvent;
use crate::services::publisher::{
    ChangeKind, Publisher, PublisherMeta, DEFAULT_MAX_MULTI_PUBLISH,
};
use crate::services::query_transform::build_view_query;
use crate::socket::{CrudRequest, Exchange, SocketChannel, SocketInfo};
use crate::validation::{validate_query, ModelValidator};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, instrument, warn};

/// Default page size for collection reads without an explicit `pageSize`.
pub const DEFAULT_PAGE_SIZE: u64 = 10;

/// Default cap on client-supplied page sizes when the model declares none.
pub const DEFAULT_MAX_PAGE_SIZE: u64 = 100;

/// Maps engine errors before they are returned to a client over the RPC.
pub type ClientErrorMapper =
    Arc<dyn Fn(CrudError, Option<CrudAction>, &CrudQuery) -> CrudError + Send + Sync>;

/// Engine configuration.
#[derive(Clone)]
pub struct CrudOptions {
    /// Cache entry lifetime
    pub cache_duration: Duration,
    /// Bypass the cache entirely
    pub cache_disabled: bool,
    /// Per-write cap on multi-param variant publications
    pub max_multi_publish: usize,
    /// Keep original JSON types in view channel params instead of coercing
    /// scalars to strings
    pub typed_view_channel_params: bool,
    /// Block invocations on models without a pre access hook
    pub block_pre_by_default: bool,
    /// Page size for collection reads without an explicit `pageSize`
    pub default_page_size: u64,
    /// Outbound error mapping on the RPC boundary (identity when unset)
    pub client_error_mapper: Option<ClientErrorMapper>,
}

impl Default for CrudOptions {
    fn default() -> Self {
        Self {
            cache_duration: DEFAULT_CACHE_DURATION,
            cache_disabled: false,
            max_multi_publish: DEFAULT_MAX_MULTI_PUBLISH,
            typed_view_channel_params: false,
            block_pre_by_default: false,
            default_page_size: DEFAULT_PAGE_SIZE,
            client_error_mapper: None,
        }
    }
}

impl CrudOptions {
    /// Set the cache entry lifetime
    pub fn with_cache_duration(mut self, duration: Duration) -> Self {
        self.cache_duration = duration;
        self
    }

    /// Disable the cache
    pub fn without_cache(mut self) -> Self {
        self.cache_disabled = true;
        self
    }

    /// Cap multi-param variant publications per write
    pub fn with_max_multi_publish(mut self, cap: usize) -> Self {
        self.max_multi_publish = cap;
        self
    }

    /// Keep original JSON types in view channel params
    pub fn with_typed_view_channel_params(mut self) -> Self {
        self.typed_view_channel_params = true;
        self
    }

    /// Block invocations on models without a pre access hook
    pub fn with_block_pre_by_default(mut self) -> Self {
        self.block_pre_by_default = true;
        self
    }

    /// Set the default collection page size
    pub fn with_default_page_size(mut self, page_size: u64) -> Self {
        self.default_page_size = page_size;
        self
    }

    /// Install an outbound error mapper
    pub fn with_client_error_mapper(
        mut self,
        mapper: impl Fn(CrudError, Option<CrudAction>, &CrudQuery) -> CrudError
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.client_error_mapper = Some(Arc::new(mapper));
        self
    }
}

impl fmt::Debug for CrudOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrudOptions")
            .field("cache_duration", &self.cache_duration)
            .field("cache_disabled", &self.cache_disabled)
            .field("max_multi_publish", &self.max_multi_publish)
            .field("typed_view_channel_params", &self.typed_view_channel_params)
            .field("block_pre_by_default", &self.block_pre_by_default)
            .field("default_page_size", &self.default_page_size)
            .field(
                "client_error_mapper",
                &self.client_error_mapper.as_ref().map(|_| "custom"),
            )
            .finish()
    }
}

enum SubscriptionState {
    Pending(Vec<oneshot::Sender<Result<(), CrudError>>>),
    Active { id: u64, listener: JoinHandle<()> },
}

fn build_model_validators(schema: &Schema) -> HashMap<String, ModelValidator> {
    schema
        .models()
        .map(|(name, model)| {
            (
                name.clone(),
                ModelValidator::new(name.clone(), model.fields.clone(), None),
            )
        })
        .collect()
}

/// The realtime CRUD coherence engine.
///
/// # Examples
///
/// ```rust
/// use crudcast_core::db::MemoryStore;
/// use crudcast_core::models::{CrudQuery, ModelSchema, SchemaBuilder};
/// use crudcast_core::services::{CrudEngine, CrudOptions};
/// use crudcast_core::socket::LocalExchange;
/// use crudcast_core::validation::TypeConstraint;
/// use serde_json::json;
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let schema = SchemaBuilder::new()
///     .model(
///         "Item",
///         ModelSchema::new()
///             .with_field("id", TypeConstraint::string())
///             .with_field("owner", TypeConstraint::string().required()),
///     )
///     .build();
///
/// let engine = CrudEngine::new(
///     schema,
///     Arc::new(MemoryStore::new()),
///     Arc::new(LocalExchange::new()),
///     CrudOptions::default(),
/// );
/// engine.init(&[]).await?;
///
/// let query = CrudQuery::new("Item").with_value(json!({"id": "i1", "owner": "u1"}));
/// let created = engine.create(&query, None).await?;
/// assert_eq!(created.id(), Some("i1"));
/// # Ok(())
/// # }
/// ```
pub struct CrudEngine {
    schema: Arc<Schema>,
    store: Arc<dyn DocumentStore>,
    exchange: Arc<dyn Exchange>,
    cache: ResourceCache,
    publisher: Publisher,
    options: CrudOptions,
    validators: HashMap<String, ModelValidator>,
    events: broadcast::Sender<CrudEvent>,
    subscriptions: Mutex<HashMap<String, SubscriptionState>>,
}

impl CrudEngine {
    /// Create an engine over a schema, store, and exchange.
    ///
    /// Spawns the background task that binds resource-channel subscriptions
    /// to cache entry lifetime.
    pub fn new(
        schema: Schema,
        store: Arc<dyn DocumentStore>,
        exchange: Arc<dyn Exchange>,
        options: CrudOptions,
    ) -> Arc<Self> {
        let schema = Arc::new(schema);
        let cache = ResourceCache::new(options.cache_duration, options.cache_disabled);
        let publisher = Publisher::new(
            Arc::clone(&schema),
            Arc::clone(&exchange),
            options.typed_view_channel_params,
            options.max_multi_publish,
        );
        let validators = build_model_validators(&schema);
        let (events, _) = broadcast::channel(256);

        let engine = Arc::new(Self {
            schema,
            store,
            exchange,
            cache,
            publisher,
            options,
            validators,
            events,
            subscriptions: Mutex::new(HashMap::new()),
        });
        engine.spawn_cache_event_loop();
        engine
    }

    /// The compiled schema
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// The per-resource read cache
    pub fn cache(&self) -> &ResourceCache {
        &self.cache
    }

    /// The engine configuration
    pub fn options(&self) -> &CrudOptions {
        &self.options
    }

    /// Subscribe to engine lifecycle events
    pub fn subscribe_to_events(&self) -> broadcast::Receiver<CrudEvent> {
        self.events.subscribe()
    }

    /// Engine lifecycle events as an async stream
    pub fn event_stream(&self) -> BroadcastStream<CrudEvent> {
        BroadcastStream::new(self.subscribe_to_events())
    }

    fn emit(&self, event: CrudEvent) {
        let _ = self.events.send(event);
    }

    fn lock_subscriptions(&self) -> MutexGuard<'_, HashMap<String, SubscriptionState>> {
        self.subscriptions.lock().expect("subscription lock poisoned")
    }

    fn validator(&self, model: &str) -> Result<&ModelValidator, CrudError> {
        self.validators
            .get(model)
            .ok_or_else(|| CrudError::invalid_model_type(format!("unknown model type: {}", model)))
    }

    /// Bootstrap the database: tables and indexes for every declared model
    #[instrument(level = "info", skip(self))]
    pub async fn init(&self, indexes_to_build: &[String]) -> Result<(), CrudError> {
        bootstrap::init(self.store.as_ref(), &self.schema, indexes_to_build).await
    }

    //
    // CREATE
    //

    /// Create a document.
    ///
    /// Returns the inserted state, including a generated id when the value
    /// carried none.
    #[instrument(level = "debug", skip(self, query, socket), fields(model = %query.model))]
    pub async fn create(
        &self,
        query: &CrudQuery,
        socket: Option<&SocketInfo>,
    ) -> Result<Resource, CrudError> {
        match self.create_inner(query, socket).await {
            Ok(resource) => {
                self.emit(CrudEvent::Create {
                    query: query.clone(),
                });
                Ok(resource)
            }
            Err(error) => {
                self.emit(CrudEvent::Error {
                    error: error.clone(),
                });
                self.emit(CrudEvent::CreateFail {
                    query: query.clone(),
                    error: error.clone(),
                });
                Err(error)
            }
        }
    }

    async fn create_inner(
        &self,
        query: &CrudQuery,
        socket: Option<&SocketInfo>,
    ) -> Result<Resource, CrudError> {
        validate_query(query, &self.schema)?;
        let value = query
            .value
            .clone()
            .ok_or_else(|| CrudError::invalid_params("create requires a value"))?;
        let record = Resource::from_value(value)
            .ok_or_else(|| CrudError::invalid_params("create value must be an object"))?;
        let sanitized = self.validator(&query.model)?.validate(&record, false, false)?;

        let outcome = self
            .store
            .insert(&query.model, sanitized)
            .await
            .map_err(map_store_error)?;
        let inserted = outcome
            .first_new()
            .cloned()
            .ok_or_else(|| CrudError::database("insert returned no changes"))?;

        let meta = PublisherMeta::from_invocation(socket, query);
        self.publisher
            .publish_create(&query.model, &inserted, &meta)
            .await;
        Ok(inserted)
    }

    //
    // READ
    //

    /// Read a document, a field, or a collection page.
    ///
    /// Dispatches on the query shape: with an id the document (or projected
    /// field) comes back as JSON with null for missing; without an id a
    /// [`ReadPage`] of ids is returned.
    #[instrument(level = "debug", skip(self, query, socket), fields(model = %query.model))]
    pub async fn read(
        &self,
        query: &CrudQuery,
        socket: Option<&SocketInfo>,
    ) -> Result<Value, CrudError> {
        match self.read_inner(query, socket).await {
            Ok(value) => Ok(value),
            Err(error) => {
                self.emit(CrudEvent::Error {
                    error: error.clone(),
                });
                Err(error)
            }
        }
    }

    async fn read_inner(
        &self,
        query: &CrudQuery,
        socket: Option<&SocketInfo>,
    ) -> Result<Value, CrudError> {
        validate_query(query, &self.schema)?;
        if query.id.is_none() {
            let page = self.read_page(query, socket).await?;
            return serde_json::to_value(page).map_err(|e| CrudError::database(e.to_string()));
        }

        let resource = self.read_resource(query, socket).await?;
        Ok(match (&query.field, resource) {
            (Some(field), Some(resource)) => {
                let value = resource.get(field).cloned().unwrap_or(Value::Null);
                match (value, query.slice_to) {
                    (Value::String(text), Some(slice_to)) => {
                        Value::String(text.chars().take(slice_to as usize).collect())
                    }
                    (value, _) => value,
                }
            }
            (None, Some(resource)) => resource.into_value(),
            (_, None) => Value::Null,
        })
    }

    /// Read one document through the cache, establishing the resource-channel
    /// subscription that keeps the cached entry stale-free.
    pub async fn read_resource(
        &self,
        query: &CrudQuery,
        socket: Option<&SocketInfo>,
    ) -> Result<Option<Resource>, CrudError> {
        let id = query
            .id
            .clone()
            .ok_or_else(|| CrudError::invalid_params("read requires a document id"))?;
        self.ensure_resource_subscription(&query.model, &id).await?;

        let store = Arc::clone(&self.store);
        let model = query.model.clone();
        let resource = self
            .cache
            .pass(query, move || async move {
                store.get(&model, &id).await.map_err(map_store_error)
            })
            .await?;

        if socket.is_some() {
            self.check_post_access(
                socket,
                query,
                query.action.unwrap_or(CrudAction::Read),
                resource.as_ref().map(Resource::to_value),
            )
            .await?;
        }
        Ok(resource)
    }

    /// Read a page of document ids from a collection or view.
    pub async fn read_page(
        &self,
        query: &CrudQuery,
        socket: Option<&SocketInfo>,
    ) -> Result<ReadPage, CrudError> {
        let table_query = match &query.view {
            Some(view) => build_view_query(
                &self.schema,
                &query.model,
                view,
                query.view_params.as_ref(),
                TableQuery::new(),
            )?,
            None => TableQuery::new(),
        };

        let offset = query.offset.unwrap_or(0);
        let page_size = query.page_size.unwrap_or(self.options.default_page_size);
        let probe = page_size + 1;

        let mut data;
        let mut count = None;
        if query.get_count.unwrap_or(false) {
            let (ids, total) = tokio::join!(
                self.store.query_ids(&query.model, &table_query, offset, probe),
                self.store.query_count(&query.model, &table_query),
            );
            data = ids.map_err(map_store_error)?;
            count = Some(total.map_err(map_store_error)?);
        } else {
            data = self
                .store
                .query_ids(&query.model, &table_query, offset, probe)
                .await
                .map_err(map_store_error)?;
        }

        let is_last_page = (data.len() as u64) < probe;
        data.truncate(page_size as usize);
        let page = ReadPage {
            data,
            count,
            is_last_page,
        };

        if socket.is_some() {
            let page_value =
                serde_json::to_value(&page).map_err(|e| CrudError::database(e.to_string()))?;
            self.check_post_access(
                socket,
                query,
                query.action.unwrap_or(CrudAction::Read),
                Some(page_value),
            )
            .await?;
        }
        Ok(page)
    }

    //
    // UPDATE
    //

    /// Update a document, either a single field or a partial value object.
    ///
    /// Returns the post-update state.
    #[instrument(level = "debug", skip(self, query, socket), fields(model = %query.model))]
    pub async fn update(
        &self,
        query: &CrudQuery,
        socket: Option<&SocketInfo>,
    ) -> Result<Resource, CrudError> {
        match self.update_inner(query, socket).await {
            Ok(resource) => {
                self.emit(CrudEvent::Update {
                    query: query.clone(),
                });
                Ok(resource)
            }
            Err(error) => {
                self.emit(CrudEvent::Error {
                    error: error.clone(),
                });
                self.emit(CrudEvent::UpdateFail {
                    query: query.clone(),
                    error: error.clone(),
                });
                Err(error)
            }
        }
    }

    async fn update_inner(
        &self,
        query: &CrudQuery,
        socket: Option<&SocketInfo>,
    ) -> Result<Resource, CrudError> {
        validate_query(query, &self.schema)?;
        let id = query
            .id
            .clone()
            .ok_or_else(|| CrudError::invalid_params("update requires a document id"))?;
        if query.field.as_deref() == Some("id") {
            return Err(CrudError::invalid_params("the id field cannot be updated"));
        }

        let loaded = self
            .store
            .get(&query.model, &id)
            .await
            .map_err(map_store_error)?
            .ok_or(CrudError::DocumentNotFound)?;

        if socket.is_some() {
            self.check_post_access(
                socket,
                query,
                CrudAction::Update,
                Some(loaded.to_value()),
            )
            .await?;
        }

        let patch: Map<String, Value> = match (&query.field, &query.value) {
            (Some(field), Some(value)) => {
                let mut patch = Map::new();
                patch.insert(field.clone(), value.clone());
                patch
            }
            (Some(_), None) => {
                return Err(CrudError::invalid_params("a field update requires a value"));
            }
            (None, Some(Value::Object(fields))) => fields.clone(),
            (None, _) => {
                return Err(CrudError::invalid_params("update requires an object value"));
            }
        };
        let sanitized = self
            .validator(&query.model)?
            .validate(&Resource::from_fields(patch), true, false)?;
        let sanitized_patch = sanitized.fields().clone();

        let outcome = self
            .store
            .update(&query.model, &id, sanitized_patch.clone())
            .await
            .map_err(map_store_error)?;
        let new = outcome
            .first_new()
            .cloned()
            .ok_or_else(|| CrudError::database("update returned no changes"))?;
        let old = outcome.first_old().cloned().unwrap_or(loaded);

        let mut cache_query = query.clone();
        cache_query.field = None;
        cache_query.value = Some(Value::Object(sanitized_patch));
        self.cache.update(&cache_query);

        let meta = PublisherMeta::from_invocation(socket, query);
        self.publisher
            .publish_update(&query.model, &id, &old, &new, &meta)
            .await;
        Ok(new)
    }

    //
    // DELETE
    //

    /// Delete a whole document, or remove a single field from it.
    #[instrument(level = "debug", skip(self, query, socket), fields(model = %query.model))]
    pub async fn delete(
        &self,
        query: &CrudQuery,
        socket: Option<&SocketInfo>,
    ) -> Result<(), CrudError> {
        match self.delete_inner(query, socket).await {
            Ok(()) => {
                self.emit(CrudEvent::Delete {
                    query: query.clone(),
                });
                Ok(())
            }
            Err(error) => {
                self.emit(CrudEvent::Error {
                    error: error.clone(),
                });
                self.emit(CrudEvent::DeleteFail {
                    query: query.clone(),
                    error: error.clone(),
                });
                Err(error)
            }
        }
    }

    async fn delete_inner(
        &self,
        query: &CrudQuery,
        socket: Option<&SocketInfo>,
    ) -> Result<(), CrudError> {
        validate_query(query, &self.schema)?;
        let id = query
            .id
            .clone()
            .ok_or_else(|| CrudError::invalid_params("delete requires a document id"))?;

        let old = self
            .store
            .get(&query.model, &id)
            .await
            .map_err(map_store_error)?
            .ok_or(CrudError::DocumentNotFound)?;

        if socket.is_some() {
            self.check_post_access(socket, query, CrudAction::Delete, Some(old.to_value()))
                .await?;
        }

        let meta = PublisherMeta::from_invocation(socket, query);
        match &query.field {
            None => {
                self.store
                    .delete(&query.model, &id)
                    .await
                    .map_err(map_store_error)?;
                self.cache.clear(query);
                self.publisher.publish_delete(&query.model, &old, &meta).await;
            }
            Some(field) => {
                if field == "id" {
                    return Err(CrudError::invalid_params("the id field cannot be removed"));
                }
                // Removing the field must leave a valid record behind.
                if let Some(constraint) =
                    self.schema.model(&query.model).and_then(|m| m.field(field))
                {
                    if let Err(field_error) = constraint.validate(None, &query.model, field) {
                        return Err(CrudError::Validation {
                            model: query.model.clone(),
                            field_errors: vec![field_error],
                        });
                    }
                }

                let mut without_field = old.clone();
                without_field.remove(field);
                self.store
                    .replace(&query.model, &id, without_field.clone())
                    .await
                    .map_err(map_store_error)?;
                self.cache.clear(query);
                self.publisher
                    .publish_field_removal(&query.model, &id, field, &old, &without_field, &meta)
                    .await;
            }
        }
        Ok(())
    }

    //
    // EXTERNAL NOTIFY API
    //

    /// Publish invalidations for a write made outside this engine.
    ///
    /// Field channels are published by name only since the written values
    /// are unknown here.
    pub async fn notify_resource_update(&self, model: &str, id: &str, fields: &[String]) {
        self.publisher.publish_resource(model, id).await;
        self.publisher
            .publish_field_names_only(model, id, fields)
            .await;
    }

    /// Publish a change notification on one view channel.
    pub async fn notify_view_update(
        &self,
        model: &str,
        view: &str,
        params: &Map<String, Value>,
        operation: Option<ChangeKind>,
    ) {
        self.publisher
            .publish_view(model, view, params, operation.unwrap_or(ChangeKind::Update))
            .await;
    }

    /// Replay the full publication dispatcher against an externally-observed
    /// (old, new) document pair.
    pub async fn notify_update(
        &self,
        model: &str,
        old: Option<&Resource>,
        new: Option<&Resource>,
    ) -> Result<(), CrudError> {
        let meta = PublisherMeta::server();
        match (old, new) {
            (None, Some(new)) => {
                self.publisher.publish_create(model, new, &meta).await;
                Ok(())
            }
            (Some(old), Some(new)) => {
                let id = new
                    .id()
                    .or_else(|| old.id())
                    .ok_or_else(|| CrudError::invalid_arguments("resources must carry an id"))?
                    .to_string();
                self.publisher
                    .publish_update(model, &id, old, new, &meta)
                    .await;
                Ok(())
            }
            (Some(old), None) => {
                self.publisher.publish_delete(model, old, &meta).await;
                Ok(())
            }
            (None, None) => Err(CrudError::invalid_arguments(
                "either an old or a new resource is required",
            )),
        }
    }

    //
    // SUBSCRIPTION LIFECYCLE
    //

    /// Ensure a subscription to the document's resource channel exists.
    ///
    /// Concurrent callers while the subscription is being established are
    /// buffered; a failure rejects them all with
    /// [`CrudError::FailedToSubscribe`] and clears the buffer so the next
    /// read retries.
    async fn ensure_resource_subscription(&self, model: &str, id: &str) -> Result<(), CrudError> {
        if self.options.cache_disabled {
            return Ok(());
        }
        let resource_path = format!("{}/{}", model, id);
        let channel = resource_channel(model, id);

        enum SubscribePlan {
            Ready,
            Wait(oneshot::Receiver<Result<(), CrudError>>),
            Establish,
        }

        let plan = {
            let mut subscriptions = self.lock_subscriptions();
            match subscriptions.get_mut(&resource_path) {
                Some(SubscriptionState::Active { .. }) => SubscribePlan::Ready,
                Some(SubscriptionState::Pending(waiters)) => {
                    let (sender, receiver) = oneshot::channel();
                    waiters.push(sender);
                    SubscribePlan::Wait(receiver)
                }
                None => {
                    subscriptions
                        .insert(resource_path.clone(), SubscriptionState::Pending(Vec::new()));
                    SubscribePlan::Establish
                }
            }
        };

        match plan {
            SubscribePlan::Ready => Ok(()),
            SubscribePlan::Wait(receiver) => receiver
                .await
                .map_err(|_| CrudError::failed_to_subscribe(&channel))?,
            SubscribePlan::Establish => {
                let result = self.exchange.subscribe(&channel).await;
                let mut subscriptions = self.lock_subscriptions();
                let waiters = match subscriptions.remove(&resource_path) {
                    Some(SubscriptionState::Pending(waiters)) => waiters,
                    _ => Vec::new(),
                };
                match result {
                    Ok(subscription) => {
                        let listener =
                            self.spawn_resource_listener(resource_path.clone(), subscription.receiver);
                        subscriptions.insert(
                            resource_path,
                            SubscriptionState::Active {
                                id: subscription.id,
                                listener,
                            },
                        );
                        for waiter in waiters {
                            let _ = waiter.send(Ok(()));
                        }
                        Ok(())
                    }
                    Err(error) => {
                        warn!(channel = %channel, error = %error, "resource subscription failed");
                        let error = CrudError::failed_to_subscribe(&channel);
                        for waiter in waiters {
                            let _ = waiter.send(Err(error.clone()));
                        }
                        Err(error)
                    }
                }
            }
        }
    }

    fn spawn_resource_listener(
        &self,
        resource_path: String,
        mut receiver: mpsc::UnboundedReceiver<Option<Value>>,
    ) -> JoinHandle<()> {
        let cache = self.cache.clone();
        tokio::spawn(async move {
            // Any publication on the resource channel means the upstream
            // document changed; the cached copy is no longer trustworthy.
            while receiver.recv().await.is_some() {
                cache.clear_path(&resource_path);
            }
        })
    }

    fn unsubscribe_resource(&self, resource_path: &str) {
        let channel = format!("{}{}", CHANNEL_PREFIX, resource_path);
        let mut subscriptions = self.lock_subscriptions();
        if matches!(
            subscriptions.get(resource_path),
            Some(SubscriptionState::Active { .. })
        ) {
            if let Some(SubscriptionState::Active { id, listener }) =
                subscriptions.remove(resource_path)
            {
                listener.abort();
                if self.exchange.is_subscribed(&channel, true) {
                    self.exchange.unsubscribe(&channel, id);
                }
                debug!(channel = %channel, "resource channel unsubscribed");
            }
        }
    }

    fn spawn_cache_event_loop(self: &Arc<Self>) {
        let mut events = self.cache.subscribe_to_events();
        let engine: Weak<CrudEngine> = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(CacheEvent::Expire { resource_path })
                    | Ok(CacheEvent::Clear { resource_path }) => {
                        let Some(engine) = engine.upgrade() else { break };
                        engine.unsubscribe_resource(&resource_path);
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "cache event loop lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    //
    // ACCESS HOOKS
    //

    /// Run the model's pre access hook for one invocation.
    pub(crate) async fn check_pre_access(
        &self,
        socket: &SocketInfo,
        query: &CrudQuery,
        action: CrudAction,
    ) -> Result<(), CrudError> {
        let model = self.schema.model(&query.model).ok_or_else(|| {
            CrudError::invalid_model_type(format!("unknown model type: {}", query.model))
        })?;
        match &model.access.pre {
            Some(pre) => {
                let request = AccessRequest {
                    socket: Some(socket.clone()),
                    action,
                    auth_token: socket.auth_token.clone(),
                    query: query.clone(),
                    resource: None,
                };
                match pre.check(&request).await {
                    Ok(true) => Ok(()),
                    Ok(false) => Err(CrudError::blocked_pre()),
                    Err(error) => Err(error),
                }
            }
            None if self.options.block_pre_by_default => Err(CrudError::blocked_pre()),
            None => Ok(()),
        }
    }

    /// Run the model's post access hook with the loaded subject attached.
    pub(crate) async fn check_post_access(
        &self,
        socket: Option<&SocketInfo>,
        query: &CrudQuery,
        action: CrudAction,
        resource: Option<Value>,
    ) -> Result<(), CrudError> {
        let Some(model) = self.schema.model(&query.model) else {
            return Ok(());
        };
        let Some(post) = &model.access.post else {
            return Ok(());
        };
        let request = AccessRequest {
            socket: socket.cloned(),
            action,
            auth_token: socket.and_then(|s| s.auth_token.clone()),
            query: query.clone(),
            resource,
        };
        match post.check(&request).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(CrudError::blocked_post()),
            Err(error) => Err(error),
        }
    }

    /// Load the subject of a subscription: the document through the cache, or
    /// a page of ids through the transformed view query.
    pub(crate) async fn fetch_subject(&self, query: &CrudQuery) -> Result<Value, CrudError> {
        if let Some(id) = query.id.clone() {
            let store = Arc::clone(&self.store);
            let model = query.model.clone();
            let resource = self
                .cache
                .pass(query, move || async move {
                    store.get(&model, &id).await.map_err(map_store_error)
                })
                .await?;
            return Ok(resource.map(Resource::into_value).unwrap_or(Value::Null));
        }
        let page = self.read_page(query, None).await?;
        serde_json::to_value(&page).map_err(|e| CrudError::database(e.to_string()))
    }

    //
    // SOCKET ATTACH
    //

    /// Consume one socket's `crud` procedure stream, strictly in order.
    pub fn attach_socket(self: &Arc<Self>, mut socket: SocketChannel) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            info!(socket_id = %socket.info.id, "socket attached");
            while let Some(request) = socket.requests.recv().await {
                engine.dispatch_request(&socket.info, request).await;
            }
            debug!(socket_id = %socket.info.id, "socket detached");
        })
    }

    /// Attach every socket arriving on a handshake stream.
    pub fn serve(
        self: &Arc<Self>,
        mut handshakes: mpsc::UnboundedReceiver<SocketChannel>,
    ) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(socket) = handshakes.recv().await {
                engine.attach_socket(socket);
            }
        })
    }

    async fn dispatch_request(&self, socket: &SocketInfo, request: CrudRequest) {
        let data = request.data.clone();
        match self.dispatch_query(socket, &data).await {
            Ok(result) => request.end(result),
            Err(error) => {
                let fallback: CrudQuery = serde_json::from_value(data).unwrap_or_default();
                let mapped = match &self.options.client_error_mapper {
                    Some(mapper) => mapper(error, fallback.action, &fallback),
                    None => error,
                };
                request.error(mapped);
            }
        }
    }

    async fn dispatch_query(
        &self,
        socket: &SocketInfo,
        data: &Value,
    ) -> Result<Value, CrudError> {
        let query = crate::validation::parse_query(data, &self.schema)?;
        let action = query
            .action
            .ok_or_else(|| CrudError::invalid_operation("request is missing an action"))?;

        match action {
            CrudAction::Create => {
                let created = self.create(&query, Some(socket)).await?;
                Ok(created
                    .id()
                    .map(|id| Value::String(id.to_string()))
                    .unwrap_or(Value::Null))
            }
            CrudAction::Read => self.read(&query, Some(socket)).await,
            CrudAction::Update => {
                self.update(&query, Some(socket)).await?;
                Ok(Value::Null)
            }
            CrudAction::Delete => {
                self.delete(&query, Some(socket)).await?;
                Ok(Value::Null)
            }
            CrudAction::Subscribe => Err(CrudError::invalid_operation(
                "subscribe is handled by the middleware pipeline",
            )),
        }
    }
}
