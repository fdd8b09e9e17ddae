//! Defines the [`Page`], [`FrontMatter`], and [`ParseError`] types along with
//! the logic for ingesting a page from raw source bytes. A page is immutable
//! once ingested; the only exceptions are its output path and its
//! prev/next links, each of which is a write-once cell filled in by a later
//! pipeline phase.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Utc};
use once_cell::sync::OnceCell;
use serde_yaml::Value as Yaml;
use thiserror::Error;

use crate::markdown::BodyRenderer;
use crate::meta::PageLinks;
use crate::output_path::PathError;

/// The line which opens and closes a front-matter block.
const FENCE: &str = "---";

/// Source identifiers may be rooted in a `content/` directory; the section is
/// the first directory below it.
const CONTENT_ROOT: &str = "content/";

/// Represents the result of ingesting a [`Page`].
pub type Result<T> = std::result::Result<T, ParseError>;

/// Represents an error ingesting a [`Page`] or reading one of its validated
/// front-matter fields.
#[derive(Debug, Error)]
pub enum ParseError {
    /// Returned when the source is not valid UTF-8.
    #[error("content is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// Returned when front matter is required but the source does not begin
    /// with `---`.
    #[error("page must begin with `---`")]
    MissingStartFence,

    /// Returned when the opening fence was found but the closing one was not.
    #[error("missing closing `---`")]
    MissingEndFence,

    /// Returned when the front matter is not valid YAML.
    #[error("front matter is not valid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Returned when the front matter is valid YAML but not a mapping with
    /// string keys.
    #[error("front matter must be a mapping with string keys")]
    NotAMapping,

    /// Returned when a well-known key holds a value of the wrong type.
    #[error("front matter key `{key}` must be a {expected}")]
    InvalidField {
        key: &'static str,
        expected: &'static str,
    },

    /// Returned when `date` is not in one of the accepted formats.
    #[error("invalid date `{0}`: expected RFC 3339, `YYYY-MM-DD HH:MM:SS`, or `YYYY-MM-DD`")]
    InvalidDate(String),
}

/// The metadata block at the top of a page. Keys are case-sensitive. The
/// well-known keys (`title`, `date`, `url`, `slug`, `layout`, `type`,
/// `aliases`) have validating accessors; anything else is reachable through
/// [`FrontMatter::get`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrontMatter(BTreeMap<String, Yaml>);

impl FrontMatter {
    /// Parses a YAML front-matter block. An empty block yields empty front
    /// matter.
    pub fn from_yaml(yaml: &str) -> Result<FrontMatter> {
        match serde_yaml::from_str::<Yaml>(yaml)? {
            Yaml::Null => Ok(FrontMatter::default()),
            Yaml::Mapping(mapping) => mapping
                .into_iter()
                .map(|(key, value)| match key {
                    Yaml::String(key) => Ok((key, value)),
                    _ => Err(ParseError::NotAMapping),
                })
                .collect::<Result<BTreeMap<_, _>>>()
                .map(FrontMatter),
            _ => Err(ParseError::NotAMapping),
        }
    }

    /// Returns the raw value for an arbitrary key.
    pub fn get(&self, key: &str) -> Option<&Yaml> {
        self.0.get(key)
    }

    /// Iterates over all keys and values in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Yaml)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn title(&self) -> Result<Option<&str>> {
        self.string("title")
    }

    /// The explicit output-path override.
    pub fn url(&self) -> Result<Option<&str>> {
        self.string("url")
    }

    pub fn slug(&self) -> Result<Option<&str>> {
        self.string("slug")
    }

    pub fn layout(&self) -> Result<Option<&str>> {
        self.string("layout")
    }

    /// The content type (front-matter key `type`), which overrides the section
    /// when choosing a template.
    pub fn kind(&self) -> Result<Option<&str>> {
        self.string("type")
    }

    pub fn date(&self) -> Result<Option<DateTime<FixedOffset>>> {
        self.string("date")?.map(parse_date).transpose()
    }

    /// Alternative locations which should redirect to this page.
    pub fn aliases(&self) -> Vec<&str> {
        self.terms("aliases")
    }

    /// Reads a key holding either a single string or a list of strings.
    /// Non-string list entries are ignored.
    pub fn terms(&self, key: &str) -> Vec<&str> {
        match self.0.get(key) {
            Some(Yaml::String(s)) => vec![s.as_str()],
            Some(Yaml::Sequence(items)) => items.iter().filter_map(Yaml::as_str).collect(),
            _ => Vec::new(),
        }
    }

    fn string(&self, key: &'static str) -> Result<Option<&str>> {
        match self.0.get(key) {
            None | Some(Yaml::Null) => Ok(None),
            Some(Yaml::String(s)) => Ok(Some(s)),
            Some(_) => Err(ParseError::InvalidField {
                key,
                expected: "string",
            }),
        }
    }
}

impl FromIterator<(String, Yaml)> for FrontMatter {
    fn from_iter<I: IntoIterator<Item = (String, Yaml)>>(iter: I) -> Self {
        FrontMatter(iter.into_iter().collect())
    }
}

/// Parses a front-matter date. Timestamps without an offset are taken to be
/// UTC.
pub fn parse_date(value: &str) -> Result<DateTime<FixedOffset>> {
    let value = value.trim();
    if let Ok(date) = DateTime::parse_from_rfc3339(value) {
        return Ok(date);
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Ok(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc).into());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc).into())
        .ok_or_else(|| ParseError::InvalidDate(value.to_owned()))
}

/// Options which control ingestion.
#[derive(Clone, Copy, Debug)]
pub struct IngestOptions {
    /// When `false`, a source without an opening fence is treated as a body
    /// with empty front matter instead of failing.
    pub require_front_matter: bool,
}

impl Default for IngestOptions {
    fn default() -> Self {
        IngestOptions {
            require_front_matter: true,
        }
    }
}

/// One content item after parsing.
#[derive(Debug)]
pub struct Page {
    source_path: String,
    front_matter: FrontMatter,
    raw_body: String,
    rendered_content: String,
    title: String,
    date: Option<DateTime<FixedOffset>>,
    section: String,
    output_path: OnceCell<String>,
    links: OnceCell<PageLinks>,
}

impl Page {
    /// Parses a page from its raw bytes. `source_path` identifies the page in
    /// diagnostics and drives its section and derived output path. The body
    /// is converted with `body` and stored as pre-escaped markup.
    pub fn ingest(
        source_path: &str,
        raw: &[u8],
        body: &dyn BodyRenderer,
        options: &IngestOptions,
    ) -> Result<Page> {
        let input = std::str::from_utf8(raw)?;
        let input = input.strip_prefix('\u{feff}').unwrap_or(input);

        let (front_matter, raw_body) = match split_front_matter(input)? {
            Some((yaml, raw_body)) => (FrontMatter::from_yaml(yaml)?, raw_body),
            None if options.require_front_matter => return Err(ParseError::MissingStartFence),
            None => (FrontMatter::default(), input),
        };

        let rendered_content = body.render(raw_body);
        Page::new(source_path, front_matter, raw_body, rendered_content)
    }

    /// Assembles a page from already-parsed parts, validating the well-known
    /// front-matter keys.
    pub fn new(
        source_path: &str,
        front_matter: FrontMatter,
        raw_body: &str,
        rendered_content: String,
    ) -> Result<Page> {
        // Validate every well-known key up front so later phases can rely on
        // them.
        front_matter.url()?;
        front_matter.slug()?;
        front_matter.layout()?;
        front_matter.kind()?;

        Ok(Page {
            source_path: source_path.to_owned(),
            title: front_matter.title()?.unwrap_or_default().to_owned(),
            date: front_matter.date()?,
            section: section_of(source_path),
            front_matter,
            raw_body: raw_body.to_owned(),
            rendered_content,
            output_path: OnceCell::new(),
            links: OnceCell::new(),
        })
    }

    pub fn source_path(&self) -> &str {
        &self.source_path
    }

    pub fn front_matter(&self) -> &FrontMatter {
        &self.front_matter
    }

    pub fn raw_body(&self) -> &str {
        &self.raw_body
    }

    /// The body converted to markup. Never escaped again by the renderer.
    pub fn rendered_content(&self) -> &str {
        &self.rendered_content
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn date(&self) -> Option<&DateTime<FixedOffset>> {
        self.date.as_ref()
    }

    /// The first directory of the source path below the content root, or
    /// empty for pages at the root.
    pub fn section(&self) -> &str {
        &self.section
    }

    /// The resolved output path, or `None` before path resolution.
    pub fn output_path(&self) -> Option<&str> {
        self.output_path.get().map(String::as_str)
    }

    /// Records the output path. Fails if a path was already recorded.
    pub fn set_output_path(&self, path: String) -> std::result::Result<(), PathError> {
        self.output_path
            .set(path)
            .map_err(|path| PathError::AlreadyResolved {
                source_path: self.source_path.clone(),
                path,
            })
    }

    /// The page's neighbours within its section, or `None` before the site
    /// metadata is built.
    pub fn links(&self) -> Option<&PageLinks> {
        self.links.get()
    }

    /// Records the page's neighbours. Returns `false` if they were already
    /// recorded, in which case the existing links are kept.
    pub fn set_links(&self, links: PageLinks) -> bool {
        self.links.set(links).is_ok()
    }
}

/// Splits `input` into its front-matter block and body. Returns `None` when
/// the input does not open with a fence.
fn split_front_matter(input: &str) -> Result<Option<(&str, &str)>> {
    let mut lines = input.split_inclusive('\n');
    let first = match lines.next() {
        Some(line) if line.trim_end() == FENCE => line,
        _ => return Ok(None),
    };

    let yaml_start = first.len();
    let mut offset = yaml_start;
    for line in lines {
        if line.trim_end() == FENCE {
            return Ok(Some((&input[yaml_start..offset], &input[offset + line.len()..])));
        }
        offset += line.len();
    }
    Err(ParseError::MissingEndFence)
}

fn section_of(source_path: &str) -> String {
    let relative = source_path.strip_prefix(CONTENT_ROOT).unwrap_or(source_path);
    match relative.split_once('/') {
        Some((section, _)) => section.to_owned(),
        None => String::new(),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::markdown::{Markdown, Verbatim};

    const PAGE_SIMPLE_TITLE: &str = "---\ntitle: simple template\n---\ncontent";

    fn ingest(input: &str) -> Result<Page> {
        Page::ingest("content/a/file.md", input.as_bytes(), &Verbatim, &IngestOptions::default())
    }

    #[test]
    fn test_ingest_simple() -> Result<()> {
        let page = ingest(PAGE_SIMPLE_TITLE)?;
        assert_eq!("simple template", page.title());
        assert_eq!("content", page.raw_body());
        assert_eq!("content", page.rendered_content());
        assert_eq!("a", page.section());
        assert_eq!(None, page.output_path());
        assert_eq!(None, page.date());
        Ok(())
    }

    #[test]
    fn test_ingest_renders_body() -> Result<()> {
        let page = Page::ingest(
            "content/a/file.md",
            b"---\ntitle: page with md\n---\n# heading 1\ntext\n",
            &Markdown,
            &IngestOptions::default(),
        )?;
        assert_eq!("<h1>heading 1</h1>\n<p>text</p>\n", page.rendered_content());
        assert_eq!("# heading 1\ntext\n", page.raw_body());
        Ok(())
    }

    #[test]
    fn test_missing_start_fence() {
        assert!(matches!(ingest("title: nope\n"), Err(ParseError::MissingStartFence)));
    }

    #[test]
    fn test_front_matter_optional() -> Result<()> {
        let options = IngestOptions {
            require_front_matter: false,
        };
        let page = Page::ingest("notes.md", b"just a body", &Verbatim, &options)?;
        assert!(page.front_matter().is_empty());
        assert_eq!("just a body", page.raw_body());
        assert_eq!("", page.section());
        Ok(())
    }

    #[test]
    fn test_missing_end_fence() {
        assert!(matches!(
            ingest("---\ntitle: unterminated\ncontent"),
            Err(ParseError::MissingEndFence)
        ));
    }

    #[test]
    fn test_invalid_yaml() {
        assert!(matches!(ingest("---\ntitle: [oops\n---\n"), Err(ParseError::Yaml(_))));
    }

    #[test]
    fn test_not_a_mapping() {
        assert!(matches!(ingest("---\n- a\n- b\n---\n"), Err(ParseError::NotAMapping)));
    }

    #[test]
    fn test_title_must_be_string() {
        assert!(matches!(
            ingest("---\ntitle: [a, b]\n---\n"),
            Err(ParseError::InvalidField { key: "title", .. })
        ));
    }

    #[test]
    fn test_empty_front_matter() -> Result<()> {
        let page = ingest("---\n---\nbody")?;
        assert!(page.front_matter().is_empty());
        assert_eq!("", page.title());
        Ok(())
    }

    #[test]
    fn test_fence_must_be_whole_line() {
        assert!(matches!(ingest("----\ntitle: x\n---\n"), Err(ParseError::MissingStartFence)));
    }

    #[test]
    fn test_dates() -> Result<()> {
        let rfc3339 = ingest("---\ntitle: t\ndate: 2013-05-17T16:59:30Z\n---\n")?;
        assert_eq!(
            "2013-05-17 16:59:30 +00:00",
            rfc3339.date().map(ToString::to_string).unwrap_or_default()
        );

        let spaced = ingest("---\ndate: \"2013-05-17 16:59:30\"\n---\n")?;
        assert_eq!(rfc3339.date(), spaced.date());

        let day = ingest("---\ndate: 2021-04-16\n---\n")?;
        assert_eq!(
            "2021-04-16 00:00:00 +00:00",
            day.date().map(ToString::to_string).unwrap_or_default()
        );
        Ok(())
    }

    #[test]
    fn test_invalid_date() {
        assert!(matches!(
            ingest("---\ndate: yesterday\n---\n"),
            Err(ParseError::InvalidDate(value)) if value == "yesterday"
        ));
    }

    #[test]
    fn test_terms() -> Result<()> {
        let page = ingest("---\ntags: [rust, 3, go]\ncategory: misc\n---\n")?;
        assert_eq!(vec!["rust", "go"], page.front_matter().terms("tags"));
        assert_eq!(vec!["misc"], page.front_matter().terms("category"));
        assert!(page.front_matter().terms("missing").is_empty());
        Ok(())
    }

    #[test]
    fn test_keys_are_case_sensitive() -> Result<()> {
        let page = ingest("---\nTitle: upper\n---\n")?;
        assert_eq!("", page.title());
        assert!(page.front_matter().get("Title").is_some());
        Ok(())
    }

    #[test]
    fn test_output_path_is_write_once() -> Result<()> {
        let page = ingest(PAGE_SIMPLE_TITLE)?;
        assert!(page.set_output_path("a/file.html".to_owned()).is_ok());
        assert!(matches!(
            page.set_output_path("b/file.html".to_owned()),
            Err(PathError::AlreadyResolved { .. })
        ));
        assert_eq!(Some("a/file.html"), page.output_path());
        Ok(())
    }

    #[test]
    fn test_invalid_utf8() {
        assert!(matches!(
            Page::ingest("x.md", &[0xff, 0xfe], &Verbatim, &IngestOptions::default()),
            Err(ParseError::InvalidUtf8(_))
        ));
    }
}
