//! Validation Layer
//!
//! Everything that guards data before it reaches the database:
//!
//! - `TypeConstraint` - immutable per-field constraint algebra
//! - `ModelValidator` - record validation with bounded error accumulation
//! - `parse_query` / `validate_query` - inbound query checking

pub mod constraint;
pub mod model;
pub mod query;

pub use constraint::{ConstraintKind, FieldValidator, TypeConstraint};
pub use model::{ModelValidator, DEFAULT_MAX_ERROR_COUNT};
pub use query::{parse_query, validate_query};
