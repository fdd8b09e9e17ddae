//! Maps pages to the physical paths their rendered output is stored under.
//!
//! [`resolve`] is the pure per-page policy: an explicit `url` in the front
//! matter wins, otherwise the path is derived from the source identifier and
//! the page's slug. [`assign`] applies the policy to a whole page list and
//! settles collisions deterministically, so the same content always lands at
//! the same paths no matter the order the source produced it in.

use std::collections::hash_map::{Entry, HashMap};

use thiserror::Error;

use crate::page::{FrontMatter, Page, ParseError};

/// The file name appended to explicit URLs which end in a slash.
pub const INDEX_FILE: &str = "index.html";

/// The extension for derived output paths.
pub const HTML_EXTENSION: &str = "html";

/// The largest ordinal tried when disambiguating derived paths.
pub const MAX_ORDINAL: usize = 1000;

/// Represents the result of resolving an output path.
pub type Result<T> = std::result::Result<T, PathError>;

/// Represents a page-scoped failure to resolve an output path.
#[derive(Debug, Error)]
pub enum PathError {
    /// Returned when the front matter holds an invalid `url` or `slug`.
    #[error(transparent)]
    FrontMatter(#[from] ParseError),

    /// Returned when the URL or slug normalizes to nothing.
    #[error("`{0}` does not produce an output path")]
    Empty(String),

    /// Returned when a path would escape the output root.
    #[error("`{0}` must not contain `..` segments")]
    Traversal(String),

    /// Returned when a path is already claimed by another page and can't be
    /// renamed.
    #[error("output path `{path}` is already taken by `{claimed_by}`")]
    Collision { path: String, claimed_by: String },

    /// Returned when every ordinal up to [`MAX_ORDINAL`] is taken.
    #[error("no free output path left for `{0}`")]
    Exhausted(String),

    /// Returned when a page's output path is set a second time.
    #[error("output path for `{source_path}` was already resolved; refusing `{path}`")]
    AlreadyResolved { source_path: String, path: String },
}

/// The outcome of [`resolve`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedPath {
    /// The normalized, root-relative output path.
    pub path: String,

    /// Whether the path came from the author's `url`. Explicit paths are never
    /// renamed to settle a collision.
    pub explicit: bool,
}

/// Resolves the output path for a page from its front matter and source
/// identifier. The function is pure: the same input always yields the same
/// path.
pub fn resolve(front_matter: &FrontMatter, source_path: &str) -> Result<ResolvedPath> {
    if let Some(url) = front_matter.url()? {
        return Ok(ResolvedPath {
            path: normalize_url(url)?,
            explicit: true,
        });
    }

    let (dir, file_name) = source_path.rsplit_once('/').unwrap_or(("", source_path));
    let stem = match file_name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => file_name,
    };
    let slug = slug::slugify(front_matter.slug()?.unwrap_or(stem));
    if slug.is_empty() {
        return Err(PathError::Empty(source_path.to_owned()));
    }

    let dir = normalize_dir(dir).ok_or_else(|| PathError::Traversal(source_path.to_owned()))?;
    Ok(ResolvedPath {
        path: format!("{}{}.{}", dir, slug, HTML_EXTENSION),
        explicit: false,
    })
}

/// Normalizes an author-supplied URL into an output path: leading and repeated
/// slashes and `.` segments are dropped, and a trailing slash becomes
/// `index.html`. Anything else is kept verbatim; no extension is added.
pub fn normalize_url(url: &str) -> Result<String> {
    let segments: Vec<&str> = url
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect();
    if segments.contains(&"..") {
        return Err(PathError::Traversal(url.to_owned()));
    }

    let mut path = segments.join("/");
    if url.ends_with('/') {
        if !path.is_empty() {
            path.push('/');
        }
        path.push_str(INDEX_FILE);
    }
    if path.is_empty() {
        return Err(PathError::Empty(url.to_owned()));
    }
    Ok(path)
}

// Returns `dir` with a trailing slash (or empty for the root), with empty and
// `.` segments dropped.
fn normalize_dir(dir: &str) -> Option<String> {
    let mut out = String::with_capacity(dir.len() + 1);
    for segment in dir.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return None,
            _ => {
                out.push_str(segment);
                out.push('/');
            }
        }
    }
    Some(out)
}

/// Claims output paths, renaming derived paths that collide.
#[derive(Debug, Default)]
pub struct PathAllocator {
    // path -> source path of the page which claimed it
    owners: HashMap<String, String>,
}

impl PathAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `path` has been handed out.
    pub fn is_claimed(&self, path: &str) -> bool {
        self.owners.contains_key(path)
    }

    /// Records `path` as taken by `source_path`, for paths handed out by an
    /// earlier allocation. A path reserved twice keeps its first owner.
    pub fn reserve(&mut self, source_path: &str, path: &str) {
        self.owners
            .entry(path.to_owned())
            .or_insert_with(|| source_path.to_owned());
    }

    /// Claims `resolved` for `source_path`. Explicit paths fail on collision;
    /// derived paths are retried as `<stem>-1.<ext>`, `<stem>-2.<ext>`, and so
    /// on.
    pub fn claim(&mut self, source_path: &str, resolved: ResolvedPath) -> Result<String> {
        if self.take(source_path, &resolved.path) {
            return Ok(resolved.path);
        }
        if resolved.explicit {
            return Err(self.collision(resolved.path));
        }

        let (stem, extension) = match resolved.path.rsplit_once('.') {
            Some((stem, extension)) if !stem.ends_with('/') && !extension.contains('/') => {
                (stem, Some(extension))
            }
            _ => (resolved.path.as_str(), None),
        };
        for ordinal in 1..=MAX_ORDINAL {
            let candidate = match extension {
                Some(extension) => format!("{}-{}.{}", stem, ordinal, extension),
                None => format!("{}-{}", stem, ordinal),
            };
            if self.take(source_path, &candidate) {
                return Ok(candidate);
            }
        }
        Err(PathError::Exhausted(resolved.path))
    }

    fn take(&mut self, source_path: &str, path: &str) -> bool {
        match self.owners.entry(path.to_owned()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(source_path.to_owned());
                true
            }
        }
    }

    fn collision(&self, path: String) -> PathError {
        let claimed_by = self.owners.get(&path).cloned().unwrap_or_default();
        PathError::Collision { path, claimed_by }
    }
}

/// Resolves and records the output path of every page. `pages` must already
/// be sorted by source path; explicit URLs are claimed first, then derived
/// paths, each in page order. Returns the index and error of every page that
/// couldn't be given a path; those pages keep an empty output path.
pub fn assign(pages: &[Page]) -> Vec<(usize, PathError)> {
    let mut failures = Vec::new();
    let mut explicit = Vec::new();
    let mut derived = Vec::new();
    for (i, page) in pages.iter().enumerate() {
        match resolve(page.front_matter(), page.source_path()) {
            Ok(resolved) if resolved.explicit => explicit.push((i, resolved)),
            Ok(resolved) => derived.push((i, resolved)),
            Err(e) => failures.push((i, e)),
        }
    }

    let mut allocator = PathAllocator::new();
    for (i, resolved) in explicit.into_iter().chain(derived) {
        let page = &pages[i];
        let result = allocator
            .claim(page.source_path(), resolved)
            .and_then(|path| page.set_output_path(path));
        if let Err(e) = result {
            failures.push((i, e));
        }
    }

    failures.sort_by_key(|(i, _)| *i);
    failures
}
