//! Per-Resource Read Cache
//!
//! A bounded-TTL cache keyed by `"type/id"` that coordinates concurrent reads
//! with subscription state:
//!
//! - **Single-flight**: at most one provider runs per resource path; every
//!   concurrent `pass` for the same key shares the one load.
//! - **Pending-write coalescing**: writes landing while a load is in flight
//!   accumulate in a patch that is overlaid onto the loaded document, so the
//!   stored entry never misses a write that raced the load.
//! - **Invalidation**: a `clear` during an in-flight load poisons the entry;
//!   waiters still get the loaded value, but nothing stale is stored.
//!
//! Lifecycle events (`hit`, `miss`, `set`, `update`, `expire`, `clear`) fan
//! out over a broadcast channel; the engine binds resource-channel
//! subscriptions to entry lifetime by listening for `expire` and `clear`.

use crate::models::{CrudQuery, Resource};
use crate::services::error::CrudError;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tracing::debug;

/// Default entry lifetime.
pub const DEFAULT_CACHE_DURATION: Duration = Duration::from_millis(10_000);

/// Cache lifecycle events.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent {
    /// A `pass` found an entry (resident or in flight)
    Hit { resource_path: String },
    /// A `pass` found nothing and launched the provider
    Miss { resource_path: String },
    /// A provider completed and the entry became resident
    Set { resource_path: String },
    /// A write was applied to the entry or its pending patch
    Update { resource_path: String },
    /// The entry's TTL elapsed and it was evicted
    Expire { resource_path: String },
    /// The entry was invalidated by an upstream change
    Clear { resource_path: String },
}

impl CacheEvent {
    /// String tag of the event kind
    pub fn event_type(&self) -> &'static str {
        match self {
            CacheEvent::Hit { .. } => "cache:hit",
            CacheEvent::Miss { .. } => "cache:miss",
            CacheEvent::Set { .. } => "cache:set",
            CacheEvent::Update { .. } => "cache:update",
            CacheEvent::Expire { .. } => "cache:expire",
            CacheEvent::Clear { .. } => "cache:clear",
        }
    }

    /// Resource path the event refers to
    pub fn resource_path(&self) -> &str {
        match self {
            CacheEvent::Hit { resource_path }
            | CacheEvent::Miss { resource_path }
            | CacheEvent::Set { resource_path }
            | CacheEvent::Update { resource_path }
            | CacheEvent::Expire { resource_path }
            | CacheEvent::Clear { resource_path } => resource_path,
        }
    }
}

type Waiter = oneshot::Sender<Result<Option<Resource>, CrudError>>;

enum CacheEntry {
    Pending {
        patch: Map<String, Value>,
        waiters: Vec<Waiter>,
        cleared: bool,
    },
    Resident {
        resource: Option<Resource>,
        expiry: JoinHandle<()>,
    },
}

struct CacheInner {
    entries: Mutex<HashMap<String, CacheEntry>>,
    events: broadcast::Sender<CacheEvent>,
    duration: Duration,
    disabled: bool,
}

impl CacheInner {
    fn lock_entries(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.lock().expect("cache lock poisoned")
    }

    fn emit(&self, event: CacheEvent) {
        let _ = self.events.send(event);
    }
}

fn spawn_expiry(inner: &Arc<CacheInner>, resource_path: String) -> JoinHandle<()> {
    let inner = Arc::clone(inner);
    tokio::spawn(async move {
        tokio::time::sleep(inner.duration).await;
        let mut entries = inner.lock_entries();
        if matches!(entries.get(&resource_path), Some(CacheEntry::Resident { .. })) {
            entries.remove(&resource_path);
            debug!(resource_path = %resource_path, "cache entry expired");
            inner.emit(CacheEvent::Expire { resource_path });
        }
    })
}

/// Bounded-TTL per-resource cache with single-flight loading.
///
/// # Examples
///
/// ```rust
/// use crudcast_core::models::{CrudQuery, Resource};
/// use crudcast_core::services::ResourceCache;
/// use serde_json::json;
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let cache = ResourceCache::new(Duration::from_secs(10), false);
/// let query = CrudQuery::by_id("Item", "i1");
///
/// let loaded = cache
///     .pass(&query, || async {
///         Ok(Resource::from_value(json!({"id": "i1", "owner": "u1"})))
///     })
///     .await?;
/// assert_eq!(loaded.unwrap().id(), Some("i1"));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ResourceCache {
    inner: Arc<CacheInner>,
}

enum PassPlan {
    Resolved(Option<Resource>),
    Wait(oneshot::Receiver<Result<Option<Resource>, CrudError>>),
    Load,
}

impl ResourceCache {
    /// Create a cache with the given entry lifetime
    pub fn new(duration: Duration, disabled: bool) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(CacheInner {
                entries: Mutex::new(HashMap::new()),
                events,
                duration,
                disabled,
            }),
        }
    }

    /// Subscribe to cache lifecycle events
    pub fn subscribe_to_events(&self) -> broadcast::Receiver<CacheEvent> {
        self.inner.events.subscribe()
    }

    /// Cache lifecycle events as an async stream
    pub fn event_stream(&self) -> BroadcastStream<CacheEvent> {
        BroadcastStream::new(self.subscribe_to_events())
    }

    /// Idempotent read-through.
    ///
    /// Resolves from the resident entry when one exists (refreshing its TTL),
    /// joins the in-flight load when one is pending, and otherwise launches
    /// `provider` exactly once, sharing its result with every concurrent
    /// caller. Queries without a `{type, id}` pair bypass the cache, as does
    /// a disabled cache.
    pub async fn pass<F, Fut>(
        &self,
        query: &CrudQuery,
        provider: F,
    ) -> Result<Option<Resource>, CrudError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<Resource>, CrudError>>,
    {
        let resource_path = match query.resource_path() {
            Some(path) if !self.inner.disabled => path,
            _ => return provider().await,
        };

        let plan = {
            let mut entries = self.inner.lock_entries();
            match entries.get_mut(&resource_path) {
                Some(CacheEntry::Resident { resource, expiry }) => {
                    expiry.abort();
                    *expiry = spawn_expiry(&self.inner, resource_path.clone());
                    self.inner.emit(CacheEvent::Hit {
                        resource_path: resource_path.clone(),
                    });
                    PassPlan::Resolved(resource.clone())
                }
                Some(CacheEntry::Pending { waiters, .. }) => {
                    let (sender, receiver) = oneshot::channel();
                    waiters.push(sender);
                    self.inner.emit(CacheEvent::Hit {
                        resource_path: resource_path.clone(),
                    });
                    PassPlan::Wait(receiver)
                }
                None => {
                    entries.insert(
                        resource_path.clone(),
                        CacheEntry::Pending {
                            patch: Map::new(),
                            waiters: Vec::new(),
                            cleared: false,
                        },
                    );
                    self.inner.emit(CacheEvent::Miss {
                        resource_path: resource_path.clone(),
                    });
                    PassPlan::Load
                }
            }
        };

        match plan {
            PassPlan::Resolved(resource) => Ok(resource),
            PassPlan::Wait(receiver) => receiver
                .await
                .map_err(|_| CrudError::database("cached load was abandoned"))?,
            PassPlan::Load => {
                let result = provider().await;
                self.complete_load(&resource_path, result)
            }
        }
    }

    fn complete_load(
        &self,
        resource_path: &str,
        result: Result<Option<Resource>, CrudError>,
    ) -> Result<Option<Resource>, CrudError> {
        let mut entries = self.inner.lock_entries();
        let (patch, waiters, cleared) = match entries.remove(resource_path) {
            Some(CacheEntry::Pending {
                patch,
                waiters,
                cleared,
            }) => (patch, waiters, cleared),
            // Entry replaced or evicted while loading; nothing to merge.
            other => {
                if let Some(entry) = other {
                    entries.insert(resource_path.to_string(), entry);
                }
                (Map::new(), Vec::new(), true)
            }
        };

        match result {
            Ok(mut resource) => {
                if let Some(resource) = resource.as_mut() {
                    resource.merge(&patch);
                }
                if !cleared {
                    let expiry = spawn_expiry(&self.inner, resource_path.to_string());
                    entries.insert(
                        resource_path.to_string(),
                        CacheEntry::Resident {
                            resource: resource.clone(),
                            expiry,
                        },
                    );
                    self.inner.emit(CacheEvent::Set {
                        resource_path: resource_path.to_string(),
                    });
                }
                for waiter in waiters {
                    let _ = waiter.send(Ok(resource.clone()));
                }
                Ok(resource)
            }
            Err(error) => {
                for waiter in waiters {
                    let _ = waiter.send(Err(error.clone()));
                }
                Err(error)
            }
        }
    }

    /// Reconcile a write with the cached entry.
    ///
    /// While the entry is pending, the write lands in the patch overlay so
    /// the eventual load cannot shadow it; while resident, the fields are
    /// written straight onto the cached document.
    pub fn update(&self, query: &CrudQuery) {
        let resource_path = match query.resource_path() {
            Some(path) if !self.inner.disabled => path,
            _ => return,
        };
        let fields: Map<String, Value> = match (&query.field, &query.value) {
            (Some(field), Some(value)) => {
                let mut fields = Map::new();
                fields.insert(field.clone(), value.clone());
                fields
            }
            (None, Some(Value::Object(fields))) => fields.clone(),
            _ => return,
        };

        let mut entries = self.inner.lock_entries();
        match entries.get_mut(&resource_path) {
            Some(CacheEntry::Pending { patch, .. }) => {
                for (field, value) in fields {
                    patch.insert(field, value);
                }
            }
            Some(CacheEntry::Resident {
                resource: Some(resource),
                ..
            }) => {
                resource.merge(&fields);
            }
            _ => return,
        }
        self.inner.emit(CacheEvent::Update { resource_path });
    }

    /// Invalidate the entry for a query's resource
    pub fn clear(&self, query: &CrudQuery) {
        if let Some(resource_path) = query.resource_path() {
            self.clear_path(&resource_path);
        }
    }

    /// Invalidate the entry for a resource path
    pub fn clear_path(&self, resource_path: &str) {
        let mut entries = self.inner.lock_entries();
        match entries.get_mut(resource_path) {
            Some(CacheEntry::Pending { cleared, .. }) => {
                // Poison the in-flight load: waiters still resolve, but the
                // result is not stored.
                *cleared = true;
            }
            Some(CacheEntry::Resident { expiry, .. }) => {
                expiry.abort();
                entries.remove(resource_path);
            }
            None => return,
        }
        self.inner.emit(CacheEvent::Clear {
            resource_path: resource_path.to_string(),
        });
    }

    /// Whether an entry (resident or pending) exists for the path
    pub fn contains(&self, resource_path: &str) -> bool {
        self.inner.lock_entries().contains_key(resource_path)
    }

    /// Number of entries currently held
    pub fn len(&self) -> usize {
        self.inner.lock_entries().len()
    }

    /// Whether the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
