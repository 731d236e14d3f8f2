//! Crudcast Core - Realtime CRUD Coherence Engine
//!
//! This crate sits between many connected clients (over a pub/sub-capable
//! socket server) and a document database. Clients issue CRUD operations
//! against typed collections and subscribe to channels describing a single
//! resource, a single field, or a parameterised view; every write is
//! translated into a precise set of channel publications so remote UIs stay
//! current without re-polling.
//!
//! # Architecture
//!
//! - **Schema-as-data**: models, views, relations, and access hooks are
//!   declared at runtime and compiled once into flat lookup indices
//! - **Stale-free cache**: a single-flight per-resource cache whose entry
//!   lifetime is bound to the resource-channel subscription that invalidates
//!   it
//! - **External seams**: the database ([`db::DocumentStore`]) and the socket
//!   server ([`socket::Exchange`]) are trait collaborators; in-memory
//!   implementations ship for tests and embedding
//!
//! # Modules
//!
//! - [`models`] - resources, queries, and the schema
//! - [`validation`] - constraint algebra, record and query validation
//! - [`channel`] - channel-name codec and stable JSON
//! - [`db`] - document store seam, error mapping, bootstrap
//! - [`socket`] - socket server seam: exchange, middleware, procedures
//! - [`services`] - the engine: CRUD core, cache, view affect, publisher,
//!   access filter

pub mod channel;
pub mod db;
pub mod models;
pub mod services;
pub mod socket;
pub mod validation;

// Re-exports
pub use db::{DocumentStore, MemoryStore};
pub use models::{CrudAction, CrudQuery, ModelSchema, ReadPage, Resource, Schema, SchemaBuilder, ViewSchema};
pub use services::{
    AccessController, CrudEngine, CrudError, CrudEvent, CrudOptions, ResourceCache,
};
pub use socket::{Exchange, LocalExchange, SocketChannel, SocketInfo};
pub use validation::TypeConstraint;
