//! Database Layer
//!
//! The database is an external collaborator behind the [`DocumentStore`]
//! trait: table and index management for bootstrap, change-returning writes,
//! and id-page queries for collection views. [`MemoryStore`] is the
//! in-process implementation used by tests and embedded deployments.
//!
//! Driver failures travel as [`StoreError`] messages and are mapped into the
//! engine taxonomy by [`map_store_error`].

pub mod bootstrap;
pub mod error;
pub mod memory;
pub mod store;

pub use error::{map_store_error, StoreError};
pub use memory::MemoryStore;
pub use store::{
    DocumentStore, IndexKind, IndexSpec, SortOrder, TableQuery, WriteChange, WriteOutcome,
};
