//! Renders pages through the [`TemplateRegistry`].
//!
//! [`Renderer::render_thing`] executes one named template against a page;
//! [`Renderer::render_thing_or_default`] falls back to a second template, but
//! only when the first one doesn't exist. A template that exists but fails to
//! execute is reported as is, never papered over by the fallback.

use gtmpl::Value;
use log::debug;

use crate::absurl;
use crate::config::Config;
use crate::meta::SiteMeta;
use crate::page::Page;
use crate::template::{Result, TemplateError, TemplateRegistry};
use crate::value;

/// The directory of the generic templates every page can fall back to.
pub const DEFAULT_KIND: &str = "_default";

/// The layout used when a page doesn't name one.
pub const DEFAULT_LAYOUT: &str = "single";

/// The preferred and fallback template names for `page`:
/// `<type-or-section>/<layout>.html` and `_default/<layout>.html`. Pages at
/// the root without a `type` use the default directory for both.
pub fn template_names(page: &Page) -> (String, String) {
    let front_matter = page.front_matter();
    let layout = front_matter
        .layout()
        .ok()
        .flatten()
        .unwrap_or(DEFAULT_LAYOUT);
    let kind = match front_matter.kind().ok().flatten() {
        Some(kind) => kind,
        None if page.section().is_empty() => DEFAULT_KIND,
        None => page.section(),
    };
    (
        format!("{}/{}.html", kind, layout),
        format!("{}/{}.html", DEFAULT_KIND, layout),
    )
}

/// Everything rendering needs, borrowed from the site. Shared read-only
/// across rendering threads.
pub struct Renderer<'a> {
    templates: &'a TemplateRegistry,
    pages: &'a [Page],
    site: Value,
    base_url: &'a str,
}

impl<'a> Renderer<'a> {
    /// Creates a renderer. `pages` is the site's page list (used to resolve
    /// prev/next links) and `meta` its finalized metadata, if built.
    pub fn new(
        templates: &'a TemplateRegistry,
        config: &'a Config,
        pages: &'a [Page],
        meta: Option<&SiteMeta>,
    ) -> Self {
        Renderer {
            templates,
            pages,
            site: value::site_view(config, pages, meta),
            base_url: config.base_url.as_str(),
        }
    }

    /// Executes the template `name` against `page`. Fails with
    /// [`TemplateError::NotFound`] if there is no such template and with
    /// [`TemplateError::Execution`] if it fails; either way nothing is
    /// returned.
    pub fn render_thing(&self, page: &Page, name: &str) -> Result<String> {
        // Look up first so absence is reported without building a view.
        self.templates.lookup(name)?;
        let view = value::page_view(page, self.pages, &self.site, self.base_url);
        self.templates.execute(name, view)
    }

    /// Renders `page` with `preferred`, or with `default` if `preferred` isn't
    /// registered. Any other failure of `preferred` is returned without
    /// trying `default`.
    pub fn render_thing_or_default(
        &self,
        page: &Page,
        preferred: &str,
        default: &str,
    ) -> Result<String> {
        match self.render_thing(page, preferred) {
            Err(TemplateError::NotFound(_)) => {
                debug!(
                    "No template `{}` for `{}`; falling back to `{}`",
                    preferred,
                    page.source_path(),
                    default
                );
                self.render_thing(page, default)
            }
            result => result,
        }
    }

    /// Produces the final bytes for `page`: picks its templates, renders with
    /// fallback, rewrites relative references under the base URL, and wraps
    /// fragments into a document skeleton.
    pub fn render_page(&self, page: &Page) -> Result<String> {
        let (preferred, default) = template_names(page);
        let html = self.render_thing_or_default(page, &preferred, &default)?;
        let html = absurl::rewrite(&html, self.base_url);
        Ok(absurl::ensure_document(&html).into_owned())
    }
}
