//! Engine Services
//!
//! This module contains the realtime-coherence services:
//!
//! - `CrudEngine` - the CRUD core: operations, publications, subscriptions
//! - `ResourceCache` - single-flight per-resource read cache
//! - `ViewAffectEngine` - write → affected-view enumeration
//! - `Publisher` - ordered channel publication dispatcher
//! - `AccessController` - middleware access filtering
//! - query transformation, engine events, and the error taxonomy

pub mod access_filter;
pub mod cache;
pub mod crud_service;
pub mod error;
pub mod events;
pub mod publisher;
pub mod query_transform;
pub mod view_affect;

#[cfg(test)]
mod access_filter_test;

pub use access_filter::{AccessController, CRUD_PROCEDURE};
pub use cache::{CacheEvent, ResourceCache, DEFAULT_CACHE_DURATION};
pub use crud_service::{
    ClientErrorMapper, CrudEngine, CrudOptions, DEFAULT_MAX_PAGE_SIZE, DEFAULT_PAGE_SIZE,
};
pub use error::{BlockKind, CrudError, FieldError};
pub use events::CrudEvent;
pub use publisher::{
    ChangeKind, ChangePayload, Publisher, PublisherMeta, DEFAULT_MAX_MULTI_PUBLISH,
};
pub use query_transform::{build_view_query, sanitize_view_params};
pub use view_affect::{modified_resource_fields, FieldChange, ViewAffectEngine, ViewData};
