//! Persistence stack for a SQLite-backed object graph.
//!
//! A [`PersistenceStack`] owns an immutable [`Model`], a [`Coordinator`]
//! bound to exactly one store, and a thread-confined [`Context`] holding
//! pending changes. Stacks are built from a [`StackConfig`]; one process-wide
//! instance is available through [`PersistenceStack::shared`].

pub mod config;
pub mod context;
pub mod coordinator;
pub mod db;
pub mod logging;
pub mod model;
pub mod paths;
pub mod stack;

pub use config::{ModelSource, StackConfig, Storage};
pub use context::{
    Context, ContextError, ContextResult, FetchRequest, PendingCounts, SaveError, SaveOutcome,
    SaveResult, ValidationError,
};
pub use coordinator::{Coordinator, SaveSummary, StoreError, StoreLocation};
pub use logging::{init_logging, logging_status, LogLevel, LoggingError};
pub use model::bundle::{load_model, Bundle};
pub use model::object::{ManagedObject, ObjectId, Value};
pub use model::schema::{
    Attribute, AttributeType, Entity, Model, ModelError, ModelResult, Relationship,
};
pub use paths::{DirectoryResolver, PathError, StoragePurpose};
pub use stack::{PersistenceStack, SharedStack, StackError, StackResult};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
