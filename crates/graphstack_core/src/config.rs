//! Stack construction configuration.
//!
//! # Responsibility
//! - Name every construction choice explicitly: model source, storage kind,
//!   store filename and base directories.
//! - Derive process defaults from the environment.
//!
//! # Invariants
//! - Resolving a config never mutates it; the same config yields the same
//!   model and store location.
//! - In-memory storage never touches the file system.

use std::path::PathBuf;

use crate::coordinator::StoreLocation;
use crate::model::bundle::{load_model, Bundle};
use crate::model::schema::{Model, ModelResult};
use crate::paths::{DirectoryResolver, PathResult, StoragePurpose};

/// Environment variable overriding the application name.
pub const APP_NAME_ENV: &str = "GRAPHSTACK_APP_NAME";
const FALLBACK_APP_NAME: &str = "graphstack";
const STORE_FILE_EXTENSION: &str = "sqlite";

/// Where the stack model comes from.
#[derive(Debug, Clone)]
pub enum ModelSource {
    /// Caller-supplied model.
    Explicit(Model),
    /// Union of the models in a caller-supplied bundle.
    Bundle(Bundle),
    /// Union of the models discovered for the running application.
    DiscoverBundle,
}

/// Backing store kind of the stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Storage {
    /// Volatile store, gone when the stack is dropped.
    InMemory,
    /// File under the purpose directory; `None` filename means
    /// `<app_name>.sqlite`.
    File {
        purpose: StoragePurpose,
        filename: Option<String>,
    },
    /// Explicit absolute store file path.
    Path(PathBuf),
}

/// Complete description of how to build a `PersistenceStack`.
#[derive(Debug, Clone)]
pub struct StackConfig {
    pub app_name: String,
    pub model: ModelSource,
    pub storage: Storage,
    /// Base directories; `None` derives them from the environment.
    pub directories: Option<DirectoryResolver>,
}

impl StackConfig {
    /// Process defaults: bundle-merged model, documents file named after the
    /// application.
    pub fn from_env() -> Self {
        Self {
            app_name: default_app_name(),
            model: ModelSource::DiscoverBundle,
            storage: Storage::File {
                purpose: StoragePurpose::Documents,
                filename: None,
            },
            directories: None,
        }
    }

    pub fn in_memory() -> Self {
        Self::from_env().with_storage(Storage::InMemory)
    }

    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = app_name.into();
        self
    }

    pub fn with_model(mut self, model: Model) -> Self {
        self.model = ModelSource::Explicit(model);
        self
    }

    /// Uses `model` when supplied, otherwise keeps the current source.
    pub fn with_optional_model(self, model: Option<Model>) -> Self {
        match model {
            Some(model) => self.with_model(model),
            None => self,
        }
    }

    pub fn with_bundle(mut self, bundle: Bundle) -> Self {
        self.model = ModelSource::Bundle(bundle);
        self
    }

    pub fn with_storage(mut self, storage: Storage) -> Self {
        self.storage = storage;
        self
    }

    pub fn with_directories(mut self, directories: DirectoryResolver) -> Self {
        self.directories = Some(directories);
        self
    }

    /// Store filename used when none is given: `<app_name>.sqlite`.
    pub fn default_filename(&self) -> String {
        format!("{}.{STORE_FILE_EXTENSION}", self.app_name)
    }

    /// Loads the model this config names.
    pub fn resolve_model(&self) -> ModelResult<Model> {
        match &self.model {
            ModelSource::Explicit(model) => load_model(Some(model.clone()), &Bundle::default()),
            ModelSource::Bundle(bundle) => load_model(None, bundle),
            ModelSource::DiscoverBundle => load_model(None, &Bundle::discover()?),
        }
    }

    /// Resolves the store location, creating purpose directories as needed.
    pub fn resolve_location(&self) -> PathResult<StoreLocation> {
        match &self.storage {
            Storage::InMemory => Ok(StoreLocation::InMemory),
            Storage::Path(path) => Ok(StoreLocation::File(path.clone())),
            Storage::File { purpose, filename } => {
                let filename = filename.clone().unwrap_or_else(|| self.default_filename());
                let directories = match &self.directories {
                    Some(directories) => directories.clone(),
                    None => DirectoryResolver::from_env(&self.app_name)?,
                };
                let path = directories.resolve_path(*purpose, &filename)?;
                Ok(StoreLocation::File(path))
            }
        }
    }
}

impl Default for StackConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Application name from `GRAPHSTACK_APP_NAME`, else the executable stem.
pub fn default_app_name() -> String {
    if let Ok(name) = std::env::var(APP_NAME_ENV) {
        let trimmed = name.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.file_stem().map(|stem| stem.to_string_lossy().into_owned()))
        .filter(|stem| !stem.is_empty())
        .unwrap_or_else(|| FALLBACK_APP_NAME.to_string())
}

#[cfg(test)]
mod tests {
    use super::{ModelSource, StackConfig, Storage};
    use crate::coordinator::StoreLocation;
    use crate::model::bundle::Bundle;
    use crate::model::schema::{Entity, Model, ModelError};
    use crate::paths::{DirectoryResolver, StoragePurpose};

    #[test]
    fn default_filename_uses_app_name() {
        let config = StackConfig::from_env().with_app_name("journal");
        assert_eq!(config.default_filename(), "journal.sqlite");
    }

    #[test]
    fn file_storage_resolves_under_purpose_directory() {
        let root = tempfile::tempdir().unwrap();
        let config = StackConfig::from_env()
            .with_app_name("journal")
            .with_directories(DirectoryResolver::new(
                root.path().join("cache"),
                root.path().join("docs"),
            ))
            .with_storage(Storage::File {
                purpose: StoragePurpose::Cache,
                filename: None,
            });

        let location = config.resolve_location().unwrap();
        assert_eq!(
            location,
            StoreLocation::File(root.path().join("cache/journal.sqlite"))
        );
    }

    #[test]
    fn in_memory_storage_needs_no_directories() {
        let location = StackConfig::in_memory().resolve_location().unwrap();
        assert_eq!(location, StoreLocation::InMemory);
    }

    #[test]
    fn model_source_resolution() {
        let model = Model::new(vec![Entity::new("Note")]).unwrap();
        let explicit = StackConfig::in_memory().with_optional_model(Some(model.clone()));
        assert!(matches!(explicit.model, ModelSource::Explicit(_)));
        assert_eq!(explicit.resolve_model().unwrap(), model);

        let empty = StackConfig::in_memory().with_bundle(Bundle::default());
        assert!(matches!(
            empty.resolve_model().unwrap_err(),
            ModelError::NoModelsFound
        ));
    }
}
