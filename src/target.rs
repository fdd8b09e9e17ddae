//! The [`Target`] capability the pipeline stores rendered output through.
//!
//! Targets accept concurrent writes to distinct keys. Writing a key twice with
//! the same bytes is a no-op; writing it again with different bytes fails with
//! [`TargetError::Collision`], since two outputs claiming one path means a bug
//! upstream.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use log::trace;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Durably stores named output blobs.
pub trait Target: Send + Sync {
    /// Stores `bytes` under `key`.
    fn write(&self, key: &str, bytes: &[u8]) -> Result<()>;

    /// Returns the bytes stored under `key`.
    fn read(&self, key: &str) -> Result<Vec<u8>>;
}

impl<T: Target + ?Sized> Target for Arc<T> {
    fn write(&self, key: &str, bytes: &[u8]) -> Result<()> {
        (**self).write(key, bytes)
    }

    fn read(&self, key: &str) -> Result<Vec<u8>> {
        (**self).read(key)
    }
}

/// Represents the result of a [`Target`] operation.
pub type Result<T> = std::result::Result<T, TargetError>;

/// Represents a failure to store or load output. Write failures abort the
/// phase which hit them.
#[derive(Debug, Error)]
pub enum TargetError {
    /// Returned when a key is written twice with different content.
    #[error("`{0}` was already written with different content")]
    Collision(String),

    /// Returned when a key is empty, absolute, or escapes the target root.
    #[error("invalid output key `{0}`")]
    InvalidKey(String),

    /// Returned by [`Target::read`] for keys never written.
    #[error("`{0}` not found")]
    NotFound(String),

    /// Returned for I/O failures.
    #[error("accessing `{}`: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// A [`Target`] which keeps everything in memory.
#[derive(Debug, Default)]
pub struct InMemoryTarget {
    files: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// All keys written so far, sorted.
    pub fn keys(&self) -> Vec<String> {
        let files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        let mut keys: Vec<String> = files.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Target for InMemoryTarget {
    fn write(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let mut files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        match files.get(key) {
            Some(existing) if existing.as_slice() == bytes => Ok(()),
            Some(_) => Err(TargetError::Collision(key.to_owned())),
            None => {
                files.insert(key.to_owned(), bytes.to_vec());
                Ok(())
            }
        }
    }

    fn read(&self, key: &str) -> Result<Vec<u8>> {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
            .ok_or_else(|| TargetError::NotFound(key.to_owned()))
    }
}

/// A [`Target`] writing files below a root directory. Each file is written to
/// a temporary sibling and renamed into place, so a key is either absent or
/// complete.
#[derive(Debug)]
pub struct FsTarget {
    root: PathBuf,
    // key -> SHA-256 of the content written under it during this build
    written: Mutex<HashMap<String, Vec<u8>>>,
}

impl FsTarget {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsTarget {
            root: root.into(),
            written: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let valid = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        match valid {
            true => Ok(self.root.join(relative)),
            false => Err(TargetError::InvalidKey(key.to_owned())),
        }
    }

    fn io(path: &Path) -> impl FnOnce(std::io::Error) -> TargetError + '_ {
        move |source| TargetError::Io {
            path: path.to_owned(),
            source,
        }
    }

    fn store(path: &Path, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(Self::io(parent))?;
        }
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temporary = path.with_file_name(format!(".{}.sitepress-tmp", file_name));
        std::fs::write(&temporary, bytes).map_err(Self::io(&temporary))?;
        std::fs::rename(&temporary, path).map_err(|e| {
            let _ = std::fs::remove_file(&temporary);
            Self::io(path)(e)
        })
    }
}

impl Target for FsTarget {
    fn write(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        let digest = Sha256::digest(bytes).to_vec();
        {
            let mut written = self.written.lock().unwrap_or_else(PoisonError::into_inner);
            match written.get(key) {
                Some(existing) if *existing == digest => return Ok(()),
                Some(_) => return Err(TargetError::Collision(key.to_owned())),
                None => {
                    written.insert(key.to_owned(), digest);
                }
            }
        }

        trace!("Writing {}", path.display());
        Self::store(&path, bytes).map_err(|e| {
            // Forget the key so the failure isn't mistaken for a collision.
            self.written
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(key);
            e
        })
    }

    fn read(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        std::fs::read(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => TargetError::NotFound(key.to_owned()),
            _ => TargetError::Io { path, source: e },
        })
    }
}
