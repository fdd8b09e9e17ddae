//! The post-render pass which turns relative references in the final markup
//! into absolute URLs under the site's base URL.

use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

// A comment, or a start tag: `<name`, then attributes whose values may be
// double quoted, single quoted, or bare, then `>` or `/>`. Comments are
// matched so tags inside them are skipped.
static TAG_OR_COMMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?s)<!--.*?-->|<[A-Za-z][A-Za-z0-9:-]*(?:\s+[^\s"'<>/=]+(?:\s*=\s*(?:"[^"]*"|'[^']*'|[^\s"'=<>`]+))?)*\s*/?>"#,
    )
    .expect("start tag pattern compiles")
});

// One attribute within a start tag. Matching left to right consumes each
// value whole, so text inside a quoted value is never taken for an attribute.
static ATTRIBUTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(\s+)([^\s"'<>/=]+)(?:(\s*=\s*)(?:"([^"]*)"|'([^']*)'|([^\s"'=<>`]+)))?"#)
        .expect("attribute pattern compiles")
});

/// The attributes whose values [`rewrite`] makes absolute.
pub const URL_ATTRIBUTES: &[&str] = &["href", "src", "action", "poster"];

static SCHEME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*:").expect("scheme pattern compiles"));

/// Joins `base` and `relative` with exactly one `/` between them, whatever
/// slashes either side already carries.
pub fn join(base: &str, relative: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        relative.trim_start_matches('/')
    )
}

/// Whether a reference is left as is: absolute (`scheme:` or `//`), empty, or
/// a fragment within the same document.
pub fn is_absolute(reference: &str) -> bool {
    reference.is_empty()
        || reference.starts_with("//")
        || reference.starts_with('#')
        || SCHEME.is_match(reference)
}

/// Prefixes every relative `href`, `src`, `action`, and `poster` attribute in
/// the start tags of `markup` with `base_url`. Text content, comments, and
/// other attributes are copied through untouched.
pub fn rewrite<'a>(markup: &'a str, base_url: &str) -> Cow<'a, str> {
    TAG_OR_COMMENT.replace_all(markup, |tag: &Captures| rewrite_tag(&tag[0], base_url).into_owned())
}

fn rewrite_tag<'a>(tag: &'a str, base_url: &str) -> Cow<'a, str> {
    if tag.starts_with("<!--") {
        return Cow::Borrowed(tag);
    }
    // Split off `<name`; the pattern guarantees the name is followed by
    // whitespace, `/`, or `>`.
    let name_end = tag
        .find(|c: char| c.is_whitespace() || c == '/' || c == '>')
        .unwrap_or(tag.len());
    let attributes = ATTRIBUTE.replace_all(&tag[name_end..], |caps: &Captures| {
        let is_url = URL_ATTRIBUTES
            .iter()
            .any(|name| name.eq_ignore_ascii_case(&caps[2]));
        let (quote, value) = match (caps.get(4), caps.get(5), caps.get(6)) {
            (Some(value), _, _) => ("\"", value.as_str()),
            (_, Some(value), _) => ("'", value.as_str()),
            (_, _, Some(value)) => ("", value.as_str()),
            _ => return caps[0].to_owned(),
        };
        if !is_url || is_absolute(value) {
            return caps[0].to_owned();
        }
        format!(
            "{}{}{}{q}{}{q}",
            &caps[1],
            &caps[2],
            &caps[3],
            join(base_url, value),
            q = quote
        )
    });
    match attributes {
        Cow::Borrowed(_) => Cow::Borrowed(tag),
        Cow::Owned(attributes) => Cow::Owned(format!("{}{}", &tag[..name_end], attributes)),
    }
}

/// Wraps markup which isn't a complete document into the
/// `<html><head></head><body>…</body></html>` skeleton.
pub fn ensure_document(markup: &str) -> Cow<'_, str> {
    if markup.to_ascii_lowercase().contains("<html") {
        return Cow::Borrowed(markup);
    }
    Cow::Owned(format!(
        "<html><head></head><body>{}</body></html>",
        markup
    ))
}
