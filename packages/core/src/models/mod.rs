//! Data Models
//!
//! This module contains the core data structures used throughout crudcast:
//!
//! - `Resource` - one document of a typed collection
//! - `CrudQuery` - the value object every operation takes
//! - `Schema` and its builders - the process-wide declaration of models,
//!   views, relations, and access hooks

mod query;
mod resource;
pub mod schema;

pub use query::{CrudAction, CrudQuery, ReadPage};
pub use resource::{Resource, ID_FIELD};
pub use schema::{
    AccessHook, AccessHooks, AccessRequest, ForeignViewRef, ModelSchema, RelationFn, Schema,
    SchemaBuilder, ViewSchema, ViewTransform,
};
