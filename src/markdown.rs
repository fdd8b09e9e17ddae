//! Converts page bodies into HTML. The pipeline only knows about the
//! [`BodyRenderer`] capability; [`Markdown`] is the CommonMark implementation
//! used by default.

use pulldown_cmark::{html, Options, Parser};

/// Converts the raw body of a page (everything after the front matter) into
/// markup. The returned string is treated as already-escaped HTML by the
/// templates and is never escaped again.
pub trait BodyRenderer: Send + Sync {
    fn render(&self, raw_body: &str) -> String;
}

/// Renders bodies as CommonMark with the footnote, strikethrough, table and
/// task-list extensions enabled.
#[derive(Clone, Copy, Debug, Default)]
pub struct Markdown;

impl BodyRenderer for Markdown {
    fn render(&self, raw_body: &str) -> String {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_FOOTNOTES);
        options.insert(Options::ENABLE_STRIKETHROUGH);
        options.insert(Options::ENABLE_TABLES);
        options.insert(Options::ENABLE_TASKLISTS);

        let mut out = String::with_capacity(raw_body.len() + raw_body.len() / 2);
        html::push_html(&mut out, Parser::new_ext(raw_body, options));
        out
    }
}

/// Passes the body through untouched. Useful for sources whose bodies are
/// already HTML.
#[derive(Clone, Copy, Debug, Default)]
pub struct Verbatim;

impl BodyRenderer for Verbatim {
    fn render(&self, raw_body: &str) -> String {
        raw_body.to_owned()
    }
}
