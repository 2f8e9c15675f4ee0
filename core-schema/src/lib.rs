//! # Core Schema
//!
//! Turns a GraphQL SDL document into the set of collections to mirror.
//!
//! ## Flow
//!
//! 1. [`SchemaIntrospector`] fetches the SDL and parses it into a
//!    [`SchemaDocument`] of object types.
//! 2. [`CollectionRegistry`] picks the types named `…Collection` that declare
//!    an `items` field and describes their element type as a
//!    [`CollectionDescriptor`].
//! 3. [`QueryBuilder`] renders the pagination query for a descriptor.
//!
//! Everything after the fetch is pure and deterministic for a given document.

pub mod descriptor;
pub mod error;
pub mod introspector;
pub mod query;
pub mod registry;

pub use descriptor::{is_built_in_scalar, CollectionDescriptor, FieldDescriptor, BUILT_IN_SCALARS};
pub use error::{Result, SchemaError};
pub use introspector::{unwrap_type, FieldDef, ObjectTypeDef, SchemaDocument, SchemaIntrospector, TypeRef};
pub use query::QueryBuilder;
pub use registry::CollectionRegistry;
