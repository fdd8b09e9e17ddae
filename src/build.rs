//! Exports [`Site`], which stitches together the phases of a build: creating
//! pages from a [`Source`] ([`Site::create_pages`]), building the site-wide
//! metadata ([`Site::build_site_meta`]), and rendering every page into a
//! [`Target`] ([`Site::render_pages`]).
//!
//! Creating and rendering pages fan out over a rayon thread pool; building
//! the metadata is the barrier between them. Page-scoped failures (bad front
//! matter, unresolvable paths, broken templates) are collected into the
//! [`BuildReport`] and don't stop sibling pages. Source and target failures
//! abort the phase.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, error, info, warn};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};
use thiserror::Error;

use crate::absurl;
use crate::alias;
use crate::config::{Config, PageErrorPolicy};
use crate::markdown::{BodyRenderer, Markdown};
use crate::meta::{MetaError, SiteMeta};
use crate::output_path::{self, PathAllocator, PathError, ResolvedPath};
use crate::page::{IngestOptions, Page, ParseError};
use crate::render::Renderer;
use crate::source::{Source, SourceError};
use crate::target::{Target, TargetError};
use crate::template::{TemplateError, TemplateRegistry};

/// Where a [`Site`] is in its build.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    New,
    PagesCreated,
    MetaBuilt,
    Rendered,

    /// A phase failed fatally or was cancelled. No further phase may run.
    Aborted,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Phase::New => "new",
            Phase::PagesCreated => "pages created",
            Phase::MetaBuilt => "site metadata built",
            Phase::Rendered => "rendered",
            Phase::Aborted => "aborted",
        })
    }
}

/// Requests that a running build stop. Clones share the same flag.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Why a single page was excluded from the build.
#[derive(Debug, Error)]
pub enum PageError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Path(#[from] PathError),

    #[error(transparent)]
    Template(#[from] TemplateError),
}

/// A page-scoped failure recorded in the [`BuildReport`].
#[derive(Debug, Error)]
#[error("`{source_path}`: {error}")]
pub struct PageFailure {
    pub source_path: String,
    #[source]
    pub error: PageError,
}

/// The outcome of a build so far.
#[derive(Debug, Default)]
pub struct BuildReport {
    pub pages_created: usize,
    pub pages_rendered: usize,
    pub aliases_written: usize,

    /// Every page-scoped failure, sorted by source path.
    pub failures: Vec<PageFailure>,
}

impl BuildReport {
    /// Whether no page failed.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// The source paths of the failed pages, in order.
    pub fn failed_sources(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.source_path.as_str()).collect()
    }

    fn record(&mut self, source_path: &str, error: impl Into<PageError>) {
        let error = error.into();
        warn!("Skipping `{}`: {}", source_path, error);
        self.failures.push(PageFailure {
            source_path: source_path.to_owned(),
            error,
        });
    }

    fn sort(&mut self) {
        // Stable, so failures of one page stay in the order they happened.
        self.failures
            .sort_by(|a, b| a.source_path.cmp(&b.source_path));
    }
}

/// Represents the result of a build phase.
pub type Result<T> = std::result::Result<T, BuildError>;

/// A failure which aborts a phase.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Returned when the source can't be enumerated.
    #[error("reading content: {0}")]
    Source(#[from] SourceError),

    /// Returned when output can't be written.
    #[error("writing output: {0}")]
    Target(#[from] TargetError),

    /// Returned when a phase is invoked out of order or after an abort.
    #[error("can't run `{attempted}`: site is {current}")]
    PhaseOrder {
        attempted: &'static str,
        current: Phase,
    },

    /// Returned when the build was cancelled through its [`CancelToken`].
    #[error("build cancelled")]
    Cancelled,

    /// Returned under [`PageErrorPolicy::Abort`] for the first failed page.
    /// The failure itself is in the report.
    #[error("aborting on failed page `{0}`")]
    Page(String),

    /// Returned when the worker pool can't be created.
    #[error("building worker pool: {0}")]
    WorkerPool(#[from] ThreadPoolBuildError),

    #[error(transparent)]
    Meta(#[from] MetaError),
}

/// The state of one build: configuration, collaborators, templates, pages,
/// and site metadata. Each phase owns the regions it writes; concurrent work
/// within a phase only reads shared state.
pub struct Site {
    config: Config,
    source: Box<dyn Source>,
    target: Box<dyn Target>,
    body_renderer: Box<dyn BodyRenderer>,
    templates: TemplateRegistry,
    pages: Vec<Page>,
    meta: Option<SiteMeta>,
    report: BuildReport,
    phase: Phase,
    cancel: CancelToken,
    pool: ThreadPool,
}

impl Site {
    /// Creates a site reading content from `source` and writing output to
    /// `target`. Bodies are rendered as Markdown unless replaced with
    /// [`Site::with_body_renderer`].
    pub fn new(config: Config, source: Box<dyn Source>, target: Box<dyn Target>) -> Result<Site> {
        // zero lets rayon pick one thread per core
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.threads.unwrap_or(0))
            .thread_name(|i| format!("sitepress-{}", i))
            .build()?;
        Ok(Site {
            config,
            source,
            target,
            body_renderer: Box::new(Markdown),
            templates: TemplateRegistry::new(),
            pages: Vec::new(),
            meta: None,
            report: BuildReport::default(),
            phase: Phase::New,
            cancel: CancelToken::default(),
            pool,
        })
    }

    pub fn with_body_renderer(mut self, body_renderer: Box<dyn BodyRenderer>) -> Site {
        self.body_renderer = body_renderer;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn templates(&self) -> &TemplateRegistry {
        &self.templates
    }

    /// The template registry, for registering templates before rendering.
    pub fn templates_mut(&mut self) -> &mut TemplateRegistry {
        &mut self.templates
    }

    /// The pages created so far, sorted by source path.
    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn meta(&self) -> Option<&SiteMeta> {
        self.meta.as_ref()
    }

    pub fn report(&self) -> &BuildReport {
        &self.report
    }

    pub fn target(&self) -> &dyn Target {
        self.target.as_ref()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// A token which cancels this site's build from any thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Runs every phase in order and returns the report. On failure the site
    /// is aborted and the partial report stays available from
    /// [`Site::report`].
    pub fn build(&mut self) -> Result<&BuildReport> {
        self.create_pages()?;
        self.build_site_meta()?;
        self.render_pages()?;
        info!(
            "Built {} pages ({} aliases); {} failed",
            self.report.pages_rendered,
            self.report.aliases_written,
            self.report.failures.len()
        );
        Ok(&self.report)
    }

    /// Enumerates the source and ingests every item in parallel. Pages which
    /// fail to parse or to get an output path are recorded in the report and
    /// left out of the site.
    pub fn create_pages(&mut self) -> Result<()> {
        self.enter(Phase::New, "create_pages")?;
        info!("Creating pages");

        let items = match self.source.enumerate() {
            Ok(items) => items,
            Err(e) => return Err(self.abort(e.into())),
        };

        let options = IngestOptions {
            require_front_matter: self.config.require_front_matter,
        };
        let body_renderer = self.body_renderer.as_ref();
        let cancel = &self.cancel;
        let mut ingested: Vec<(String, std::result::Result<Page, ParseError>)> =
            self.pool.install(|| {
                items
                    .par_iter()
                    .filter(|_| !cancel.is_cancelled())
                    .map(|item| {
                        debug!("Ingesting `{}`", item.id);
                        let page = Page::ingest(&item.id, &item.raw, body_renderer, &options);
                        (item.id.clone(), page)
                    })
                    .collect()
            });
        if self.cancel.is_cancelled() {
            return Err(self.abort(BuildError::Cancelled));
        }

        ingested.sort_by(|(a, _), (b, _)| a.cmp(b));
        let mut pages = Vec::with_capacity(ingested.len());
        for (source_path, page) in ingested {
            match page {
                Ok(page) => pages.push(page),
                Err(e) => self.report.record(&source_path, e),
            }
        }

        let mut unplaced = HashSet::new();
        for (i, e) in output_path::assign(&pages) {
            self.report.record(pages[i].source_path(), e);
            unplaced.insert(i);
        }
        self.pages = pages
            .into_iter()
            .enumerate()
            .filter(|(i, _)| !unplaced.contains(i))
            .map(|(_, page)| page)
            .collect();
        self.report.pages_created = self.pages.len();
        self.report.sort();
        info!(
            "Created {} pages; {} failed",
            self.pages.len(),
            self.report.failures.len()
        );

        self.check_page_policy()?;
        self.phase = Phase::PagesCreated;
        Ok(())
    }

    /// Builds the site metadata from the complete page list and links every
    /// page to its neighbours. Runs on the calling thread.
    pub fn build_site_meta(&mut self) -> Result<()> {
        self.enter(Phase::PagesCreated, "build_site_meta")?;
        info!("Building site metadata");
        let meta = SiteMeta::build(&self.pages, &self.config.taxonomies);
        if let Err(e) = meta.enrich(&self.pages) {
            return Err(self.abort(e.into()));
        }
        self.meta = Some(meta);
        self.phase = Phase::MetaBuilt;
        Ok(())
    }

    /// Renders every page in parallel and writes it to the target, then
    /// writes the redirect pages for their aliases. A template failure skips
    /// the page; a target failure stops scheduling further pages and is
    /// returned once in-flight pages finish.
    pub fn render_pages(&mut self) -> Result<()> {
        self.enter(Phase::MetaBuilt, "render_pages")?;
        info!("Rendering {} pages", self.pages.len());

        let stop = AtomicBool::new(false);
        let abort_on_failure = self.config.on_page_error == PageErrorPolicy::Abort;
        let renderer = Renderer::new(
            &self.templates,
            &self.config,
            &self.pages,
            self.meta.as_ref(),
        );
        let target = self.target.as_ref();
        let cancel = &self.cancel;
        let outcomes: Vec<Outcome> = self.pool.install(|| {
            self.pages
                .par_iter()
                .map(|page| {
                    if stop.load(Ordering::SeqCst) || cancel.is_cancelled() {
                        return Outcome::Skipped;
                    }
                    let path = match page.output_path() {
                        Some(path) => path,
                        None => return Outcome::Skipped,
                    };
                    let html = match renderer.render_page(page) {
                        Ok(html) => html,
                        Err(e) => {
                            if abort_on_failure {
                                stop.store(true, Ordering::SeqCst);
                            }
                            return Outcome::Failed(e);
                        }
                    };
                    if cancel.is_cancelled() {
                        return Outcome::Skipped;
                    }
                    debug!("Writing `{}` to `{}`", page.source_path(), path);
                    match target.write(path, html.as_bytes()) {
                        Ok(()) => Outcome::Written,
                        Err(e) => {
                            stop.store(true, Ordering::SeqCst);
                            Outcome::Fatal(e)
                        }
                    }
                })
                .collect()
        });

        let mut fatal = None;
        let mut rendered = Vec::with_capacity(self.pages.len());
        for (i, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                Outcome::Written => {
                    self.report.pages_rendered += 1;
                    rendered.push(i);
                }
                Outcome::Failed(e) => {
                    let source_path = self.pages[i].source_path().to_owned();
                    self.report.record(&source_path, e);
                }
                Outcome::Fatal(e) => {
                    // pages are in source order, so this keeps the first one
                    fatal.get_or_insert(e);
                }
                Outcome::Skipped => (),
            }
        }
        self.report.sort();

        if let Some(e) = fatal {
            error!("Aborting render: {}", e);
            return Err(self.abort(e.into()));
        }
        if self.cancel.is_cancelled() {
            return Err(self.abort(BuildError::Cancelled));
        }
        self.check_page_policy()?;

        if let Err(e) = self.write_aliases(&rendered) {
            return Err(self.abort(e));
        }
        self.report.sort();
        self.check_page_policy()?;

        self.phase = Phase::Rendered;
        Ok(())
    }

    /// Renders `page` with the template `name`; see
    /// [`Renderer::render_thing`].
    pub fn render_thing(&self, page: &Page, name: &str) -> std::result::Result<String, TemplateError> {
        self.renderer().render_thing(page, name)
    }

    /// Renders `page` with `preferred`, falling back to `default` only if
    /// `preferred` doesn't exist; see [`Renderer::render_thing_or_default`].
    pub fn render_thing_or_default(
        &self,
        page: &Page,
        preferred: &str,
        default: &str,
    ) -> std::result::Result<String, TemplateError> {
        self.renderer()
            .render_thing_or_default(page, preferred, default)
    }

    fn renderer(&self) -> Renderer<'_> {
        Renderer::new(
            &self.templates,
            &self.config,
            &self.pages,
            self.meta.as_ref(),
        )
    }

    // Writes a redirect page for every alias of the rendered pages. Aliases
    // may not take a page's output path or another alias's.
    fn write_aliases(&mut self, rendered: &[usize]) -> Result<()> {
        let mut allocator = PathAllocator::new();
        for page in &self.pages {
            if let Some(path) = page.output_path() {
                allocator.reserve(page.source_path(), path);
            }
        }

        let base_url = self.config.base_url.as_str();
        for &i in rendered {
            let page = &self.pages[i];
            let permalink = absurl::join(base_url, page.output_path().unwrap_or_default());
            for alias in page.front_matter().aliases() {
                let claimed = alias::alias_path(alias).and_then(|path| {
                    allocator.claim(page.source_path(), ResolvedPath {
                        path,
                        explicit: true,
                    })
                });
                let path = match claimed {
                    Ok(path) => path,
                    Err(e) => {
                        self.report.record(page.source_path(), e);
                        continue;
                    }
                };
                if self.cancel.is_cancelled() {
                    return Err(BuildError::Cancelled);
                }
                debug!("Writing alias `{}` for `{}`", path, page.source_path());
                self.target
                    .write(&path, alias::redirect_document(&permalink).as_bytes())?;
                self.report.aliases_written += 1;
            }
        }
        Ok(())
    }

    fn enter(&self, expected: Phase, attempted: &'static str) -> Result<()> {
        match self.phase == expected {
            true => Ok(()),
            false => Err(BuildError::PhaseOrder {
                attempted,
                current: self.phase,
            }),
        }
    }

    fn abort(&mut self, e: BuildError) -> BuildError {
        error!("Build aborted: {}", e);
        self.phase = Phase::Aborted;
        e
    }

    // Under the abort policy, fails on the first recorded page failure.
    fn check_page_policy(&mut self) -> Result<()> {
        if self.config.on_page_error != PageErrorPolicy::Abort {
            return Ok(());
        }
        match self.report.failures.first() {
            Some(failure) => {
                let e = BuildError::Page(failure.source_path.clone());
                Err(self.abort(e))
            }
            None => Ok(()),
        }
    }
}

// What happened to one page during rendering.
enum Outcome {
    Written,
    Failed(TemplateError),
    Fatal(TargetError),
    Skipped,
}
