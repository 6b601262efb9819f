//! Path-addressed blob storage for import sources and results artifacts.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Blob store abstraction.
pub trait BlobStore: Send + Sync {
    fn exists(&self, path: &str) -> Result<bool, BlobError>;

    /// Whole contents of `path`; `NotFound` if absent.
    fn read(&self, path: &str) -> Result<Vec<u8>, BlobError>;

    /// Create or replace `path`.
    fn write(&self, path: &str, contents: &[u8]) -> Result<(), BlobError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BlobError {
    #[error("blob not found: {0}")]
    NotFound(String),
    #[error("invalid blob path: {0}")]
    InvalidPath(String),
    #[error("blob storage error: {0}")]
    Io(String),
}

impl<T: BlobStore + ?Sized> BlobStore for Arc<T> {
    fn exists(&self, path: &str) -> Result<bool, BlobError> {
        (**self).exists(path)
    }

    fn read(&self, path: &str) -> Result<Vec<u8>, BlobError> {
        (**self).read(path)
    }

    fn write(&self, path: &str, contents: &[u8]) -> Result<(), BlobError> {
        (**self).write(path, contents)
    }
}

/// In-memory blob store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> BlobError {
    BlobError::Io("blob map lock poisoned".to_string())
}

impl BlobStore for InMemoryBlobStore {
    fn exists(&self, path: &str) -> Result<bool, BlobError> {
        Ok(self.blobs.read().map_err(poisoned)?.contains_key(path))
    }

    fn read(&self, path: &str) -> Result<Vec<u8>, BlobError> {
        self.blobs
            .read()
            .map_err(poisoned)?
            .get(path)
            .cloned()
            .ok_or_else(|| BlobError::NotFound(path.to_string()))
    }

    fn write(&self, path: &str, contents: &[u8]) -> Result<(), BlobError> {
        self.blobs
            .write()
            .map_err(poisoned)?
            .insert(path.to_string(), contents.to_vec());
        Ok(())
    }
}

/// Blob store over a directory on the local filesystem.
///
/// Paths are relative to `root`; absolute paths and `..` are rejected.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, BlobError> {
        let relative = Path::new(path);
        let clean = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if path.is_empty() || !clean {
            return Err(BlobError::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

fn io_error(path: &str, err: io::Error) -> BlobError {
    match err.kind() {
        io::ErrorKind::NotFound => BlobError::NotFound(path.to_string()),
        _ => BlobError::Io(format!("{path}: {err}")),
    }
}

impl BlobStore for FsBlobStore {
    fn exists(&self, path: &str) -> Result<bool, BlobError> {
        Ok(self.resolve(path)?.is_file())
    }

    fn read(&self, path: &str) -> Result<Vec<u8>, BlobError> {
        fs::read(self.resolve(path)?).map_err(|e| io_error(path, e))
    }

    fn write(&self, path: &str, contents: &[u8]) -> Result<(), BlobError> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| io_error(path, e))?;
        }
        fs::write(target, contents).map_err(|e| io_error(path, e))
    }
}
