//! Object-graph schema and object representation.
//!
//! # Responsibility
//! - Define the immutable schema (`Model`) a stack is built with.
//! - Define managed objects and attribute values held by a context.
//! - Discover and merge models shipped with the application bundle.
//!
//! # Invariants
//! - Models are validated once and never mutated afterwards.
//! - Every managed object is identified by a stable `ObjectId`.

pub mod bundle;
pub mod object;
pub mod schema;
