//! Project configuration, loaded from a `sitepress.yaml` file found in the
//! project directory or one of its ancestors.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use url::Url;

/// The name of the project file.
pub const PROJECT_FILE: &str = "sitepress.yaml";

/// What the pipeline does when a single page fails (parse, path, or template
/// error).
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PageErrorPolicy {
    /// Record the failure in the build report and carry on with the other
    /// pages.
    #[default]
    Skip,

    /// Abort the running phase on the first page failure.
    Abort,
}

fn default_true() -> bool {
    true
}

fn default_listing_limit() -> usize {
    10
}

fn default_content_dir() -> PathBuf {
    PathBuf::from("content")
}

fn default_layouts_dir() -> PathBuf {
    PathBuf::from("layouts")
}

/// Settings for a build.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// The URL the site is served from. Relative references in rendered pages
    /// are rewritten under it.
    pub base_url: Url,

    #[serde(default)]
    pub title: String,

    /// Free-form values exposed to templates as `.Site.Params`.
    #[serde(default)]
    pub params: BTreeMap<String, serde_yaml::Value>,

    /// Taxonomy singular name to the plural front-matter key holding its
    /// terms, e.g. `tag: tags`.
    #[serde(default)]
    pub taxonomies: BTreeMap<String, String>,

    /// Worker threads for ingestion and rendering. `None` uses one per core.
    #[serde(default)]
    pub threads: Option<usize>,

    #[serde(default)]
    pub on_page_error: PageErrorPolicy,

    /// The most pages listed in each of the `.Site` listings (`Recent`,
    /// every section, every taxonomy term) handed to page templates.
    #[serde(default = "default_listing_limit")]
    pub listing_limit: usize,

    /// Whether every content file must open with a front-matter block.
    #[serde(default = "default_true")]
    pub require_front_matter: bool,

    /// The content directory. Relative paths are resolved against the
    /// directory holding the project file.
    #[serde(default = "default_content_dir")]
    pub content_dir: PathBuf,

    /// The layouts (templates) directory, resolved like `content_dir`.
    #[serde(default = "default_layouts_dir")]
    pub layouts_dir: PathBuf,
}

impl Config {
    /// Creates a configuration with defaults for everything but the base URL.
    pub fn new(base_url: Url) -> Config {
        Config {
            base_url,
            title: String::new(),
            params: BTreeMap::new(),
            taxonomies: BTreeMap::new(),
            threads: None,
            on_page_error: PageErrorPolicy::default(),
            listing_limit: default_listing_limit(),
            require_front_matter: true,
            content_dir: default_content_dir(),
            layouts_dir: default_layouts_dir(),
        }
    }

    /// Looks for [`PROJECT_FILE`] in `dir` and then in each of its ancestors,
    /// and loads the first one found.
    pub fn from_directory(dir: &Path) -> Result<Config> {
        let mut current = Some(dir);
        while let Some(dir) = current {
            let path = dir.join(PROJECT_FILE);
            if path.is_file() {
                return Config::from_project_file(&path);
            }
            current = dir.parent();
        }
        Err(ConfigError::NotFound(dir.to_owned()))
    }

    /// Loads a project file. `content_dir` and `layouts_dir` are resolved
    /// against the file's directory.
    pub fn from_project_file(path: &Path) -> Result<Config> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_owned(),
            source: e,
        })?;
        let mut config = Config::from_yaml(&contents).map_err(|e| ConfigError::Yaml {
            path: path.to_owned(),
            source: e,
        })?;

        if let Some(root) = path.parent() {
            config.content_dir = root.join(&config.content_dir);
            config.layouts_dir = root.join(&config.layouts_dir);
        }
        Ok(config)
    }

    /// Parses a configuration from YAML text without resolving any paths.
    pub fn from_yaml(yaml: &str) -> std::result::Result<Config, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }
}

type Result<T> = std::result::Result<T, ConfigError>;

/// Represents an error loading a [`Config`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Returned when no project file exists in a directory or its ancestors.
    #[error("could not find `{}` in `{}` or any parent directory", PROJECT_FILE, .0.display())]
    NotFound(PathBuf),

    /// Returned when the project file can't be read.
    #[error("reading project file `{}`: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Returned when the project file isn't a valid configuration.
    #[error("parsing project file `{}`: {source}", .path.display())]
    Yaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}
