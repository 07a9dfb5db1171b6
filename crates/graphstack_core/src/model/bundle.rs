//! Model discovery and loading.
//!
//! # Responsibility
//! - Collect every model shipped with the running application (its bundle).
//! - Resolve the model a stack is built with: explicit, or bundle union.
//!
//! # Invariants
//! - Bundle directory files are read in filename order.
//! - A missing bundle directory is an empty bundle, not an error.

use log::{debug, warn};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use crate::model::schema::{Model, ModelError, ModelResult};

/// Environment variable overriding the bundle model directory.
pub const BUNDLE_DIR_ENV: &str = "GRAPHSTACK_BUNDLE_DIR";
const MODEL_FILE_EXTENSION: &str = "json";
const DEFAULT_BUNDLE_SUBDIR: &str = "models";

/// Set of models available to the running application.
#[derive(Debug, Clone, Default)]
pub struct Bundle {
    models: Vec<Model>,
}

impl Bundle {
    pub fn from_models(models: Vec<Model>) -> Self {
        Self { models }
    }

    /// Loads every `*.json` model file in `dir`.
    ///
    /// # Errors
    /// - Returns `ModelError::Io` when the directory or a file cannot be read.
    /// - Returns `ModelError::Parse` when a file is not a valid model.
    pub fn load_dir(dir: impl AsRef<Path>) -> ModelResult<Self> {
        let dir = dir.as_ref();
        let entries = std::fs::read_dir(dir).map_err(|source| ModelError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| ModelError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
            let path = entry.path();
            if path.is_file() && path.extension() == Some(OsStr::new(MODEL_FILE_EXTENSION)) {
                paths.push(path);
            }
        }
        paths.sort();

        let mut models = Vec::with_capacity(paths.len());
        for path in paths {
            models.push(load_model_file(&path)?);
        }

        debug!(
            "event=bundle_load module=model status=ok dir={} models={}",
            dir.display(),
            models.len()
        );
        Ok(Self { models })
    }

    /// Discovers the bundle of the running application.
    ///
    /// Uses `GRAPHSTACK_BUNDLE_DIR` when set, else `<executable dir>/models`.
    pub fn discover() -> ModelResult<Self> {
        let Some(dir) = default_bundle_dir() else {
            warn!("event=bundle_discover module=model status=error error_code=no_bundle_dir");
            return Ok(Self::default());
        };
        if !dir.is_dir() {
            debug!(
                "event=bundle_discover module=model status=ok dir={} models=0",
                dir.display()
            );
            return Ok(Self::default());
        }
        Self::load_dir(dir)
    }

    pub fn models(&self) -> &[Model] {
        &self.models
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

/// Returns `explicit` when supplied, otherwise the union of bundle models.
///
/// # Errors
/// - Returns `NoModelsFound` when no model is supplied and the bundle is empty.
/// - Returns `MergeConflict` when two bundle models declare the same entity.
pub fn load_model(explicit: Option<Model>, bundle: &Bundle) -> ModelResult<Model> {
    if let Some(model) = explicit {
        return Ok(model);
    }
    if bundle.is_empty() {
        return Err(ModelError::NoModelsFound);
    }
    Model::merge(bundle.models.iter().cloned())
}

/// Reads one model file.
pub fn load_model_file(path: impl AsRef<Path>) -> ModelResult<Model> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| ModelError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|err| ModelError::Parse {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}

fn default_bundle_dir() -> Option<PathBuf> {
    if let Some(dir) = std::env::var_os(BUNDLE_DIR_ENV).filter(|value| !value.is_empty()) {
        return Some(PathBuf::from(dir));
    }
    let exe = std::env::current_exe().ok()?;
    Some(exe.parent()?.join(DEFAULT_BUNDLE_SUBDIR))
}
