//! Persistence stack: model, coordinator and context as one owned bundle.
//!
//! # Responsibility
//! - Build a stack from a `StackConfig` (in-memory or file-backed).
//! - Provide the process-wide shared stack next to independent stacks.
//! - Expose the save operation with a single success/failure result.
//!
//! # Invariants
//! - A stack's model and coordinator never change after construction.
//! - The shared stack is created at most once per process; concurrent first
//!   calls observe the same instance.
//! - Independently built stacks never share a context, coordinator or store
//!   connection with each other or with the shared stack.
//! - Construction failures are returned, never turned into panics.

use log::{error, info};
use once_cell::sync::OnceCell;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crate::config::{StackConfig, Storage};
use crate::context::{Context, SaveError, SaveOutcome, SaveResult};
use crate::coordinator::{AttachError, Coordinator, StoreLocation};
use crate::db::DbError;
use crate::model::schema::{Model, ModelError};
use crate::paths::{PathError, StoragePurpose};

static SHARED_STACK: OnceCell<SharedStack> = OnceCell::new();

pub type StackResult<T> = Result<T, StackError>;

/// Stack construction failure.
#[derive(Debug)]
pub enum StackError {
    Model(ModelError),
    Path(PathError),
    Store(DbError),
    /// The store file was created with a different model.
    IncompatibleModel { path: Option<PathBuf> },
    SharedAlreadyInitialized,
}

impl Display for StackError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Model(err) => write!(f, "{err}"),
            Self::Path(err) => write!(f, "{err}"),
            Self::Store(err) => write!(f, "failed to open store: {err}"),
            Self::IncompatibleModel { path: Some(path) } => write!(
                f,
                "store `{}` was created with an incompatible model",
                path.display()
            ),
            Self::IncompatibleModel { path: None } => {
                write!(f, "store was created with an incompatible model")
            }
            Self::SharedAlreadyInitialized => write!(f, "shared stack is already initialized"),
        }
    }
}

impl Error for StackError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Model(err) => Some(err),
            Self::Path(err) => Some(err),
            Self::Store(err) => Some(err),
            Self::IncompatibleModel { .. } | Self::SharedAlreadyInitialized => None,
        }
    }
}

impl From<ModelError> for StackError {
    fn from(value: ModelError) -> Self {
        Self::Model(value)
    }
}

impl From<PathError> for StackError {
    fn from(value: PathError) -> Self {
        Self::Path(value)
    }
}

impl From<AttachError> for StackError {
    fn from(value: AttachError) -> Self {
        match value {
            AttachError::Db(err) => Self::Store(err),
            AttachError::IncompatibleModel(location) => Self::IncompatibleModel {
                path: location.path().map(Path::to_path_buf),
            },
        }
    }
}

/// Owned bundle of model, coordinator and context.
///
/// The stack is `Send` but not `Sync`; use [`SharedStack`] or move the stack
/// to the thread that owns it.
#[derive(Debug)]
pub struct PersistenceStack {
    model: Arc<Model>,
    context: Context,
}

impl PersistenceStack {
    /// Builds a stack exactly as `config` describes.
    ///
    /// # Errors
    /// - `StackError::Model` when no model can be loaded.
    /// - `StackError::Path` when the store directory cannot be resolved.
    /// - `StackError::Store`/`IncompatibleModel` when the store cannot be
    ///   attached.
    pub fn from_config(config: &StackConfig) -> StackResult<Self> {
        let started_at = Instant::now();
        let mode = storage_mode(&config.storage);
        info!("event=stack_init module=stack status=start mode={mode}");

        match build(config) {
            Ok(stack) => {
                info!(
                    "event=stack_init module=stack status=ok mode={mode} duration_ms={}",
                    started_at.elapsed().as_millis()
                );
                Ok(stack)
            }
            Err(err) => {
                error!(
                    "event=stack_init module=stack status=error mode={mode} duration_ms={} error={}",
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err)
            }
        }
    }

    /// Builds a stack backed by a volatile store.
    ///
    /// `None` model means the union of the bundle models.
    pub fn in_memory(model: Option<Model>) -> StackResult<Self> {
        Self::from_config(&StackConfig::in_memory().with_optional_model(model))
    }

    /// Builds a stack backed by `<cache dir>/<filename>`.
    ///
    /// `None` filename means `<app name>.sqlite`.
    pub fn in_cache_file(filename: Option<&str>, model: Option<Model>) -> StackResult<Self> {
        Self::in_purpose_file(StoragePurpose::Cache, filename, model)
    }

    /// Builds a stack backed by `<documents dir>/<filename>`.
    pub fn in_documents_file(filename: Option<&str>, model: Option<Model>) -> StackResult<Self> {
        Self::in_purpose_file(StoragePurpose::Documents, filename, model)
    }

    /// Builds a stack backed by the store file at `path`, or by the default
    /// documents file when `path` is `None`.
    pub fn open(path: Option<&Path>, model: Option<Model>) -> StackResult<Self> {
        let config = StackConfig::from_env().with_optional_model(model);
        let config = match path {
            Some(path) => config.with_storage(Storage::Path(path.to_path_buf())),
            None => config,
        };
        Self::from_config(&config)
    }

    fn in_purpose_file(
        purpose: StoragePurpose,
        filename: Option<&str>,
        model: Option<Model>,
    ) -> StackResult<Self> {
        let config = StackConfig::from_env()
            .with_optional_model(model)
            .with_storage(Storage::File {
                purpose,
                filename: filename.map(str::to_string),
            });
        Self::from_config(&config)
    }

    /// Returns the process-wide stack, building it from
    /// `StackConfig::from_env()` on first call.
    ///
    /// A failed first call leaves the shared slot empty, so a later call
    /// retries construction.
    pub fn shared() -> StackResult<&'static SharedStack> {
        SHARED_STACK.get_or_try_init(|| {
            PersistenceStack::from_config(&StackConfig::from_env()).map(SharedStack::new)
        })
    }

    /// Builds the shared stack from an explicit startup config.
    ///
    /// # Errors
    /// - `SharedAlreadyInitialized` when the shared stack already exists.
    /// - Any construction failure of `from_config`.
    pub fn init_shared(config: &StackConfig) -> StackResult<&'static SharedStack> {
        let mut created = false;
        let shared = SHARED_STACK.get_or_try_init(|| {
            created = true;
            PersistenceStack::from_config(config).map(SharedStack::new)
        })?;
        if !created {
            return Err(StackError::SharedAlreadyInitialized);
        }
        Ok(shared)
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn coordinator(&self) -> &Coordinator {
        self.context.coordinator()
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.context
    }

    pub fn location(&self) -> &StoreLocation {
        self.coordinator().location()
    }

    /// Saves pending context changes.
    ///
    /// `Ok(SaveOutcome::NoChanges)` means nothing was pending and the store
    /// was not touched.
    pub fn save(&mut self) -> SaveResult<SaveOutcome> {
        self.context.save()
    }

    /// Callback form of [`save`](Self::save): exactly one of the callbacks
    /// runs, on the calling thread, before this returns.
    pub fn save_context(
        &mut self,
        on_success: impl FnOnce(),
        on_failure: impl FnOnce(SaveError),
    ) {
        match self.save() {
            Ok(_) => on_success(),
            Err(err) => on_failure(err),
        }
    }
}

/// Process-wide stack, serialized behind a mutex.
#[derive(Debug)]
pub struct SharedStack {
    inner: Mutex<PersistenceStack>,
}

impl SharedStack {
    fn new(stack: PersistenceStack) -> Self {
        Self {
            inner: Mutex::new(stack),
        }
    }

    /// Locks the shared stack for exclusive use by the calling thread.
    ///
    /// A panic while holding the lock does not make the stack unusable;
    /// pending changes of the panicking caller stay in the context.
    pub fn lock(&self) -> MutexGuard<'_, PersistenceStack> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn build(config: &StackConfig) -> StackResult<PersistenceStack> {
    let model = Arc::new(config.resolve_model()?);
    let location = config.resolve_location()?;
    let coordinator = Coordinator::attach(Arc::clone(&model), location)?;
    Ok(PersistenceStack {
        model,
        context: Context::new(coordinator),
    })
}

fn storage_mode(storage: &Storage) -> &'static str {
    match storage {
        Storage::InMemory => "memory",
        Storage::File {
            purpose: StoragePurpose::Cache,
            ..
        } => "cache",
        Storage::File {
            purpose: StoragePurpose::Documents,
            ..
        } => "documents",
        Storage::Path(_) => "path",
    }
}

#[cfg(test)]
mod tests {
    use super::{PersistenceStack, StackError};
    use crate::config::{StackConfig, Storage};
    use crate::model::bundle::Bundle;
    use crate::model::schema::{Attribute, AttributeType, Entity, Model, ModelError};
    use std::cell::Cell;

    fn model() -> Model {
        Model::new(vec![
            Entity::new("Note").attribute(Attribute::new("title", AttributeType::Text).required())
        ])
        .unwrap()
    }

    #[test]
    fn save_context_runs_exactly_one_callback() {
        let mut stack = PersistenceStack::in_memory(Some(model())).unwrap();
        let successes = Cell::new(0);
        let failures = Cell::new(0);

        stack.save_context(
            || successes.set(successes.get() + 1),
            |_| failures.set(failures.get() + 1),
        );
        assert_eq!((successes.get(), failures.get()), (1, 0));

        stack.context_mut().insert("Note").unwrap();
        stack.save_context(
            || successes.set(successes.get() + 1),
            |_| failures.set(failures.get() + 1),
        );
        assert_eq!((successes.get(), failures.get()), (1, 1));
    }

    #[test]
    fn construction_failure_is_returned_not_raised() {
        let config = StackConfig::in_memory().with_bundle(Bundle::default());
        let err = PersistenceStack::from_config(&config).unwrap_err();
        assert!(matches!(err, StackError::Model(ModelError::NoModelsFound)));
    }

    #[test]
    fn unreadable_store_file_is_a_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.sqlite");
        std::fs::write(&path, vec![0x42_u8; 4096]).unwrap();

        let config = StackConfig::from_env()
            .with_model(model())
            .with_storage(Storage::Path(path));
        let err = PersistenceStack::from_config(&config).unwrap_err();
        assert!(matches!(err, StackError::Store(_)));
    }

    #[test]
    fn stack_model_matches_coordinator_model() {
        let stack = PersistenceStack::in_memory(Some(model())).unwrap();
        assert_eq!(stack.model(), stack.coordinator().model());
        assert_eq!(stack.model(), stack.context().model());
    }
}
