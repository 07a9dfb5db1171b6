//! Purpose-based store path resolution.
//!
//! # Responsibility
//! - Map a storage purpose (cache vs. documents) to a base directory.
//! - Join a store filename onto it, creating intermediate directories.
//!
//! # Invariants
//! - Filenames and app names are single path components (no separators,
//!   no `..`, no surrounding whitespace).
//! - Cache directories may be purged by the system; documents never are.

use log::debug;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

const XDG_CACHE_HOME_ENV: &str = "XDG_CACHE_HOME";
const XDG_DATA_HOME_ENV: &str = "XDG_DATA_HOME";
const HOME_ENV: &str = "HOME";

/// Intended lifetime class of a store file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoragePurpose {
    /// Regenerable data the system may purge under storage pressure.
    Cache,
    /// User documents, never purged by the system.
    Documents,
}

impl StoragePurpose {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Documents => "documents",
        }
    }
}

pub type PathResult<T> = Result<T, PathError>;

#[derive(Debug)]
pub enum PathError {
    InvalidFilename(String),
    InvalidAppName(String),
    /// Neither the XDG variable nor `HOME` is set.
    NoBaseDirectory(StoragePurpose),
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl Display for PathError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidFilename(name) => {
                write!(f, "store filename must be a single path component: `{name}`")
            }
            Self::InvalidAppName(name) => {
                write!(f, "app name must be a single path component: `{name}`")
            }
            Self::NoBaseDirectory(purpose) => {
                write!(f, "cannot determine {} directory", purpose.as_str())
            }
            Self::CreateDir { path, source } => {
                write!(f, "failed to create directory `{}`: {source}", path.display())
            }
        }
    }
}

impl Error for PathError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::CreateDir { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Base directories for each storage purpose.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryResolver {
    pub cache_dir: PathBuf,
    pub documents_dir: PathBuf,
}

impl DirectoryResolver {
    pub fn new(cache_dir: impl Into<PathBuf>, documents_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            documents_dir: documents_dir.into(),
        }
    }

    /// Builds the per-application directories from the environment.
    ///
    /// - cache: `$XDG_CACHE_HOME/<app>` or `$HOME/.cache/<app>`
    /// - documents: `$XDG_DATA_HOME/<app>` or `$HOME/.local/share/<app>`
    ///
    /// # Errors
    /// - Returns `InvalidAppName` when `app_name` is not a single component.
    /// - Returns `NoBaseDirectory` when neither variable nor `HOME` is set.
    pub fn from_env(app_name: &str) -> PathResult<Self> {
        if !is_single_component(app_name) {
            return Err(PathError::InvalidAppName(app_name.to_string()));
        }
        let cache_root = env_dir(XDG_CACHE_HOME_ENV)
            .or_else(|| env_dir(HOME_ENV).map(|home| home.join(".cache")))
            .ok_or(PathError::NoBaseDirectory(StoragePurpose::Cache))?;
        let documents_root = env_dir(XDG_DATA_HOME_ENV)
            .or_else(|| env_dir(HOME_ENV).map(|home| home.join(".local").join("share")))
            .ok_or(PathError::NoBaseDirectory(StoragePurpose::Documents))?;

        Ok(Self::new(
            cache_root.join(app_name),
            documents_root.join(app_name),
        ))
    }

    pub fn base_dir(&self, purpose: StoragePurpose) -> &Path {
        match purpose {
            StoragePurpose::Cache => &self.cache_dir,
            StoragePurpose::Documents => &self.documents_dir,
        }
    }

    /// Resolves `<purpose dir>/<filename>`, creating the directory if needed.
    ///
    /// # Errors
    /// - Returns `InvalidFilename` for empty, `.`/`..`, padded or nested names.
    /// - Returns `CreateDir` when the base directory cannot be created.
    pub fn resolve_path(&self, purpose: StoragePurpose, filename: &str) -> PathResult<PathBuf> {
        if !is_single_component(filename) {
            return Err(PathError::InvalidFilename(filename.to_string()));
        }

        let dir = self.base_dir(purpose);
        std::fs::create_dir_all(dir).map_err(|source| PathError::CreateDir {
            path: dir.to_path_buf(),
            source,
        })?;

        let path = dir.join(filename);
        debug!(
            "event=path_resolve module=paths status=ok purpose={} path={}",
            purpose.as_str(),
            path.display()
        );
        Ok(path)
    }
}

fn is_single_component(name: &str) -> bool {
    !(name.is_empty()
        || name.trim() != name
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\'))
}

fn env_dir(key: &str) -> Option<PathBuf> {
    std::env::var_os(key)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}
