//! Conversions from pages, front matter, and site metadata into the
//! [`Value`]s templates are executed against.
//!
//! Page and site views are [`Value::Object`]s, so a template referencing a
//! field the view doesn't have fails to execute; author-defined data
//! (`.Params`, `.Site.Params`, `.Site.Taxonomies`) is a [`Value::Map`].

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, FixedOffset};
use gtmpl::Value;
use serde_yaml::Value as Yaml;

use crate::absurl;
use crate::config::Config;
use crate::meta::SiteMeta;
use crate::page::{FrontMatter, Page};

/// Converts a YAML value into a template value. Mapping keys which aren't
/// strings, booleans, or numbers are dropped.
pub fn yaml_to_value(yaml: &Yaml) -> Value {
    match yaml {
        Yaml::Null => Value::Nil,
        Yaml::Bool(b) => Value::Bool(*b),
        Yaml::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::from(i)
            } else if let Some(u) = n.as_u64() {
                Value::from(u)
            } else {
                Value::from(n.as_f64().unwrap_or_default())
            }
        }
        Yaml::String(s) => Value::String(s.clone()),
        Yaml::Sequence(items) => Value::Array(items.iter().map(yaml_to_value).collect()),
        Yaml::Mapping(mapping) => Value::Map(
            mapping
                .iter()
                .filter_map(|(key, value)| yaml_key(key).map(|key| (key, yaml_to_value(value))))
                .collect(),
        ),
        Yaml::Tagged(tagged) => yaml_to_value(&tagged.value),
    }
}

fn yaml_key(key: &Yaml) -> Option<String> {
    match key {
        Yaml::String(s) => Some(s.clone()),
        Yaml::Bool(b) => Some(b.to_string()),
        Yaml::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl From<&FrontMatter> for Value {
    /// Converts [`FrontMatter`] into a [`Value::Map`] for `.Params`.
    fn from(front_matter: &FrontMatter) -> Value {
        Value::Map(
            front_matter
                .iter()
                .map(|(key, value)| (key.to_owned(), yaml_to_value(value)))
                .collect(),
        )
    }
}

fn date_value(date: Option<&DateTime<FixedOffset>>) -> Value {
    match date {
        Some(date) => Value::String(date.to_string()),
        None => Value::Nil,
    }
}

/// The root-relative URL of an output path (`/a/b.html`).
pub fn rel_permalink(output_path: &str) -> String {
    format!("/{}", output_path)
}

/// The fields shared by full page views and page summaries.
fn summary_fields(page: &Page, base_url: &str) -> HashMap<String, Value> {
    let output_path = page.output_path().unwrap_or_default();
    let mut m: HashMap<String, Value> = HashMap::new();
    m.insert("Title".to_owned(), Value::from(page.title()));
    m.insert("Date".to_owned(), date_value(page.date()));
    m.insert("Section".to_owned(), Value::from(page.section()));
    m.insert("RelPermalink".to_owned(), Value::from(rel_permalink(output_path)));
    m.insert("Permalink".to_owned(), Value::from(absurl::join(base_url, output_path)));
    m
}

/// A short view of a page, used for listings and prev/next links: `Title`,
/// `Date`, `Section`, `RelPermalink`, and `Permalink`.
pub fn page_summary(page: &Page, base_url: &str) -> Value {
    Value::Object(summary_fields(page, base_url))
}

/// The view a page template executes against. On top of the summary fields it
/// holds `Content` (the rendered body, never re-escaped), `Params` (the front
/// matter), `Slug`, `Prev`/`Next` (summaries or nil), and `Site`.
pub fn page_view(page: &Page, pages: &[Page], site: &Value, base_url: &str) -> Value {
    let mut m = summary_fields(page, base_url);
    let neighbour = |i: Option<usize>| match i.and_then(|i| pages.get(i)) {
        Some(p) => page_summary(p, base_url),
        None => Value::Nil,
    };
    let links = page.links().copied().unwrap_or_default();

    m.insert("Content".to_owned(), Value::from(page.rendered_content()));
    m.insert("Params".to_owned(), Value::from(page.front_matter()));
    m.insert(
        "Slug".to_owned(),
        Value::from(page.front_matter().slug().ok().flatten().unwrap_or_default()),
    );
    m.insert("Prev".to_owned(), neighbour(links.prev));
    m.insert("Next".to_owned(), neighbour(links.next));
    m.insert("Site".to_owned(), site.clone());
    Value::Object(m)
}

/// The `.Site` view: `BaseUrl`, `Title`, `Params`, `PageCount`,
/// `LastChange`, `Recent`, `Sections`, and `Taxonomies`. Every page view holds
/// a copy, so each listing is cut to `config.listing_limit` pages. Without
/// metadata the listings are empty.
pub fn site_view(config: &Config, pages: &[Page], meta: Option<&SiteMeta>) -> Value {
    let base_url = config.base_url.as_str();
    let summaries = |indices: &[usize]| -> Value {
        Value::Array(
            indices
                .iter()
                .take(config.listing_limit)
                .filter_map(|&i| pages.get(i))
                .map(|p| page_summary(p, base_url))
                .collect(),
        )
    };
    let grouped = |groups: &BTreeMap<String, Vec<usize>>| -> Value {
        Value::Map(
            groups
                .iter()
                .map(|(key, indices)| (key.clone(), summaries(indices)))
                .collect(),
        )
    };

    let mut m: HashMap<String, Value> = HashMap::new();
    m.insert("BaseUrl".to_owned(), Value::from(base_url));
    m.insert("Title".to_owned(), Value::from(config.title.as_str()));
    m.insert(
        "Params".to_owned(),
        Value::Map(
            config
                .params
                .iter()
                .map(|(key, value)| (key.clone(), yaml_to_value(value)))
                .collect(),
        ),
    );

    match meta {
        Some(meta) => {
            m.insert("PageCount".to_owned(), Value::from(meta.page_count as u64));
            m.insert("LastChange".to_owned(), date_value(meta.last_change.as_ref()));
            m.insert("Recent".to_owned(), summaries(&meta.recent));
            m.insert("Sections".to_owned(), grouped(&meta.sections));
            m.insert(
                "Taxonomies".to_owned(),
                Value::Map(
                    meta.taxonomies
                        .iter()
                        .map(|(taxonomy, terms)| (taxonomy.clone(), grouped(terms)))
                        .collect(),
                ),
            );
        }
        None => {
            m.insert("PageCount".to_owned(), Value::from(pages.len() as u64));
            m.insert("LastChange".to_owned(), Value::Nil);
            m.insert("Recent".to_owned(), Value::Array(Vec::new()));
            m.insert("Sections".to_owned(), Value::Map(HashMap::new()));
            m.insert("Taxonomies".to_owned(), Value::Map(HashMap::new()));
        }
    }
    Value::Object(m)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::markdown::Verbatim;
    use crate::page::IngestOptions;
    use url::Url;

    #[test]
    fn test_yaml_to_value() {
        let yaml: Yaml = serde_yaml::from_str("a: 1\nb: [x, true]\nc: {d: 1.5}\ne: ~").unwrap();
        match yaml_to_value(&yaml) {
            Value::Map(m) => {
                assert!(matches!(m.get("a"), Some(Value::Number(_))));
                assert!(matches!(m.get("b"), Some(Value::Array(items)) if items.len() == 2));
                assert!(matches!(m.get("c"), Some(Value::Map(inner)) if inner.contains_key("d")));
                assert!(matches!(m.get("e"), Some(Value::Nil)));
            }
            other => panic!("wanted map; found {}", other),
        }
    }

    #[test]
    fn test_site_view_listings_are_bounded() {
        let mut config = Config::new(Url::parse("http://auth/bub/").unwrap());
        config.listing_limit = 2;
        config.taxonomies.insert("tag".to_owned(), "tags".to_owned());
        let pages: Vec<Page> = (0..5)
            .map(|i| {
                let raw = format!("---\ntitle: p{}\ndate: 2020-01-0{}\ntags: [x]\n---\n", i, i + 1);
                let source_path = format!("blog/p{}.md", i);
                Page::ingest(&source_path, raw.as_bytes(), &Verbatim, &IngestOptions::default())
                    .unwrap()
            })
            .collect();
        let meta = SiteMeta::build(&pages, &config.taxonomies);

        let site = match site_view(&config, &pages, Some(&meta)) {
            Value::Object(m) => m,
            other => panic!("wanted object; found {}", other),
        };
        let map = |value: Option<&Value>, key: &str| match value {
            Some(Value::Map(m)) => m.get(key).cloned(),
            other => panic!("wanted map; found {:?}", other.map(|v| v.to_string())),
        };
        let titles = |value: Option<Value>| -> Vec<String> {
            match value {
                Some(Value::Array(items)) => items
                    .iter()
                    .map(|item| match item {
                        Value::Object(o) => o.get("Title").map(|t| t.to_string()).unwrap_or_default(),
                        other => panic!("wanted object; found {}", other),
                    })
                    .collect(),
                other => panic!("wanted array; found {:?}", other.map(|v| v.to_string())),
            }
        };

        assert_eq!("5", site.get("PageCount").map(|v| v.to_string()).unwrap_or_default());
        assert_eq!(vec!["p4", "p3"], titles(site.get("Recent").cloned()));
        assert_eq!(vec!["p4", "p3"], titles(map(site.get("Sections"), "blog")));
        let tags = map(site.get("Taxonomies"), "tags");
        assert_eq!(vec!["p4", "p3"], titles(map(tags.as_ref(), "x")));
    }

    #[test]
    fn test_rel_permalink() {
        assert_eq!("/a/b.html", rel_permalink("a/b.html"));
    }
}
