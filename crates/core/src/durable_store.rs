use std::collections::HashMap;
use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;

const METADATA_KEY_PREFIX: &str = "table_meta_";

#[must_use]
pub fn metadata_key(table: &str) -> String {
    format!("{METADATA_KEY_PREFIX}{table}")
}

#[derive(Debug, Error)]
pub enum DurableStoreError {
    #[error("failed to read metadata blob at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to create metadata directory at {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write metadata blob at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to remove metadata blob at {path}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("metadata store lock was poisoned")]
    Poisoned,
}

/// Opaque key to JSON blob persistence for inferred table metadata.
pub trait DurableMetadataStore {
    fn get(&self, key: &str) -> Result<Option<String>, DurableStoreError>;
    fn put(&self, key: &str, blob: &str) -> Result<(), DurableStoreError>;
    fn remove(&self, key: &str) -> Result<(), DurableStoreError>;
}

/// Keeps one JSON file per key under a directory.
#[derive(Debug, Clone)]
pub struct FileMetadataStore {
    dir: PathBuf,
}

impl FileMetadataStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", encode_file_stem(key)))
    }
}

/// Escapes every byte outside `[A-Za-z0-9-]` as `_XX`, so distinct keys
/// never share a file.
fn encode_file_stem(key: &str) -> String {
    let mut stem = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            stem.push(char::from(byte));
        } else {
            let _ = write!(stem, "_{byte:02x}");
        }
    }
    stem
}

impl DurableMetadataStore for FileMetadataStore {
    fn get(&self, key: &str) -> Result<Option<String>, DurableStoreError> {
        let path = self.blob_path(key);
        match fs::read_to_string(&path) {
            Ok(raw) => Ok(Some(raw)),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(DurableStoreError::Read { path, source }),
        }
    }

    fn put(&self, key: &str, blob: &str) -> Result<(), DurableStoreError> {
        fs::create_dir_all(&self.dir).map_err(|source| DurableStoreError::CreateDir {
            path: self.dir.clone(),
            source,
        })?;
        let path = self.blob_path(key);
        fs::write(&path, blob).map_err(|source| DurableStoreError::Write { path, source })
    }

    fn remove(&self, key: &str) -> Result<(), DurableStoreError> {
        let path = self.blob_path(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(DurableStoreError::Remove { path, source }),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryMetadataStore {
    blobs: Mutex<HashMap<String, String>>,
}

impl MemoryMetadataStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl DurableMetadataStore for MemoryMetadataStore {
    fn get(&self, key: &str) -> Result<Option<String>, DurableStoreError> {
        let blobs = self.blobs.lock().map_err(|_| DurableStoreError::Poisoned)?;
        Ok(blobs.get(key).cloned())
    }

    fn put(&self, key: &str, blob: &str) -> Result<(), DurableStoreError> {
        let mut blobs = self.blobs.lock().map_err(|_| DurableStoreError::Poisoned)?;
        blobs.insert(key.to_string(), blob.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), DurableStoreError> {
        let mut blobs = self.blobs.lock().map_err(|_| DurableStoreError::Poisoned)?;
        blobs.remove(key);
        Ok(())
    }
}

impl<T: DurableMetadataStore + ?Sized> DurableMetadataStore for std::sync::Arc<T> {
    fn get(&self, key: &str) -> Result<Option<String>, DurableStoreError> {
        (**self).get(key)
    }

    fn put(&self, key: &str, blob: &str) -> Result<(), DurableStoreError> {
        (**self).put(key, blob)
    }

    fn remove(&self, key: &str) -> Result<(), DurableStoreError> {
        (**self).remove(key)
    }
}
