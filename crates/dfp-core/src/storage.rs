//! Pack file access
//!
//! A [`PackStorage`] hands out the raw bytes of files inside a pack.
//! [`PackFiles`] layers the pack's path conventions on top of it: paths in a
//! description are relative to the description file and may use either
//! slash direction.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::debug;
use zip::result::ZipError;
use zip::ZipArchive;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("File not found in pack: {0}")]
    NotFound(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Invalid pack archive: {0}")]
    Archive(#[from] ZipError),
}

/// Read access to the files of one pack
pub trait PackStorage: fmt::Debug + Send + Sync {
    /// Read a file by its pack-relative path
    fn read(&self, path: &str) -> Result<Vec<u8>, StorageError>;

    /// Pack-relative paths of the files a description is looked for among.
    ///
    /// Directories only list their top level; archives list every entry.
    fn list(&self) -> Result<Vec<String>, StorageError>;
}

/// An expanded pack on disk
#[derive(Debug, Clone)]
pub struct DirectoryPack {
    root: PathBuf,
}

impl DirectoryPack {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl PackStorage for DirectoryPack {
    fn read(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let full = self.root.join(path);
        std::fs::read(&full).map_err(|e| match e.kind() {
            ErrorKind::NotFound => StorageError::NotFound(path.to_string()),
            _ => StorageError::IoError(e),
        })
    }

    fn list(&self) -> Result<Vec<String>, StorageError> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}

/// A `.pack` zip archive, read without extracting it
pub struct ZipPack {
    path: PathBuf,
    archive: Mutex<ZipArchive<File>>,
}

impl ZipPack {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let archive = ZipArchive::new(File::open(&path)?)?;
        debug!(path = %path.display(), entries = archive.len(), "opened pack archive");
        Ok(Self {
            path,
            archive: Mutex::new(archive),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Debug for ZipPack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZipPack").field("path", &self.path).finish()
    }
}

impl PackStorage for ZipPack {
    fn read(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let mut archive = self.archive.lock().unwrap_or_else(PoisonError::into_inner);
        let mut file = archive.by_name(path).map_err(|e| match e {
            ZipError::FileNotFound => StorageError::NotFound(path.to_string()),
            other => StorageError::Archive(other),
        })?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        Ok(data)
    }

    fn list(&self) -> Result<Vec<String>, StorageError> {
        let archive = self.archive.lock().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = archive
            .file_names()
            .filter(|name| !name.ends_with('/'))
            .map(str::to_string)
            .collect();
        names.sort();
        Ok(names)
    }
}

/// A pack held entirely in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryPack {
    files: BTreeMap<String, Vec<u8>>,
}

impl MemoryPack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        self.insert(path, content);
        self
    }

    pub fn insert(&mut self, path: impl Into<String>, content: impl Into<Vec<u8>>) {
        self.files.insert(path.into(), content.into());
    }
}

impl PackStorage for MemoryPack {
    fn read(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }

    fn list(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.files.keys().cloned().collect())
    }
}

/// Description-relative file access for one pack
#[derive(Debug, Clone)]
pub struct PackFiles {
    storage: Arc<dyn PackStorage>,
    /// Directory of the description file inside the pack, if any
    base: Option<String>,
}

impl PackFiles {
    pub fn new(storage: Arc<dyn PackStorage>, description: &str) -> Self {
        let description = description.replace('\\', "/");
        let base = description
            .rsplit_once('/')
            .map(|(dir, _)| dir.to_string())
            .filter(|dir| !dir.is_empty());
        Self { storage, base }
    }

    /// Map a description-relative path to a pack-relative one
    pub fn resolve(&self, filename: &str) -> String {
        let filename = filename.replace('\\', "/");
        match &self.base {
            Some(base) => format!("{}/{}", base, filename),
            None => filename,
        }
    }

    pub fn read(&self, filename: &str) -> Result<Vec<u8>, StorageError> {
        self.storage.read(&self.resolve(filename))
    }

    pub fn storage(&self) -> &Arc<dyn PackStorage> {
        &self.storage
    }
}
