//! The [`Source`] capability the pipeline reads content through, with an
//! in-memory implementation for tests and embedding and a filesystem one.

use std::path::{Path, PathBuf};

use thiserror::Error;
use walkdir::WalkDir;

/// File extensions [`FsSource`] treats as content.
pub const CONTENT_EXTENSIONS: &[&str] = &["md", "markdown"];

/// One raw content item.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceItem {
    /// A `/`-separated identifier, relative to the source root.
    pub id: String,
    pub raw: Vec<u8>,
}

impl SourceItem {
    pub fn new(id: impl Into<String>, raw: impl Into<Vec<u8>>) -> Self {
        SourceItem {
            id: id.into(),
            raw: raw.into(),
        }
    }
}

/// Enumerates raw content. Called once per build; an item's bytes must not
/// change within a build.
pub trait Source: Send + Sync {
    fn enumerate(&self) -> Result<Vec<SourceItem>>;
}

/// Represents the result of reading from a [`Source`].
pub type Result<T> = std::result::Result<T, SourceError>;

/// Represents a failure to read content. These are environment problems and
/// abort the phase which hit them.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Returned when a content file can't be read.
    #[error("reading `{}`: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Returned when the content directory can't be walked.
    #[error("walking content directory: {0}")]
    Walk(#[from] walkdir::Error),
}

/// A [`Source`] over a fixed list of items.
#[derive(Clone, Debug, Default)]
pub struct InMemorySource {
    items: Vec<SourceItem>,
}

impl InMemorySource {
    pub fn new<I, S, B>(items: I) -> Self
    where
        I: IntoIterator<Item = (S, B)>,
        S: Into<String>,
        B: Into<Vec<u8>>,
    {
        InMemorySource {
            items: items
                .into_iter()
                .map(|(id, raw)| SourceItem::new(id, raw))
                .collect(),
        }
    }

    pub fn push(&mut self, id: impl Into<String>, raw: impl Into<Vec<u8>>) {
        self.items.push(SourceItem::new(id, raw));
    }
}

impl Source for InMemorySource {
    fn enumerate(&self) -> Result<Vec<SourceItem>> {
        Ok(self.items.clone())
    }
}

/// A [`Source`] reading every content file below a directory. Identifiers are
/// paths relative to that directory, joined with `/`.
#[derive(Clone, Debug)]
pub struct FsSource {
    root: PathBuf,
}

impl FsSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsSource { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn is_content(path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| CONTENT_EXTENSIONS.iter().any(|c| c.eq_ignore_ascii_case(e)))
            .unwrap_or(false)
    }
}

impl Source for FsSource {
    fn enumerate(&self) -> Result<Vec<SourceItem>> {
        let mut items = Vec::new();
        for entry in WalkDir::new(&self.root).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() || !Self::is_content(entry.path()) {
                continue;
            }
            // strip_prefix() shouldn't fail since walkdir yields paths below
            // the root
            let relative = match entry.path().strip_prefix(&self.root) {
                Ok(relative) => relative,
                Err(_) => continue,
            };
            let id = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let raw = std::fs::read(entry.path()).map_err(|e| SourceError::Io {
                path: entry.path().to_owned(),
                source: e,
            })?;
            items.push(SourceItem { id, raw });
        }
        Ok(items)
    }
}
