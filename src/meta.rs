//! Site-wide metadata computed once every page exists and before any page is
//! rendered: the per-section page lists, the recent-pages list, taxonomy
//! groupings, and each page's neighbours within its section.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset};
use log::debug;
use thiserror::Error;

use crate::page::Page;

/// A page's neighbours within its section, as indices into the site's page
/// list. `prev` is the next-newer page and `next` the next-older one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PageLinks {
    pub prev: Option<usize>,
    pub next: Option<usize>,
}

/// Represents a failure while enriching pages.
#[derive(Debug, Error)]
pub enum MetaError {
    /// Returned when a page's links were already written.
    #[error("links for `{0}` were already set")]
    AlreadyEnriched(String),
}

/// The aggregate derived from the full page list. Page references are indices
/// into that list.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SiteMeta {
    /// Section name to its pages, newest first. Root-level pages are listed
    /// under the empty section.
    pub sections: BTreeMap<String, Vec<usize>>,

    /// All pages, newest first.
    pub recent: Vec<usize>,

    /// Taxonomy (plural front-matter key, e.g. `tags`) to term to pages,
    /// newest first. Terms are slugified.
    pub taxonomies: BTreeMap<String, BTreeMap<String, Vec<usize>>>,

    pub page_count: usize,

    /// The newest page date, if any page is dated.
    pub last_change: Option<DateTime<FixedOffset>>,
}

impl SiteMeta {
    /// Builds the aggregate from `pages`. `taxonomies` maps each taxonomy's
    /// singular name to the plural front-matter key holding its terms (e.g.
    /// `tag: tags`). Pages are not modified.
    pub fn build(pages: &[Page], taxonomies: &BTreeMap<String, String>) -> SiteMeta {
        let mut recent: Vec<usize> = (0..pages.len()).collect();
        recent.sort_by(|&a, &b| newest_first(&pages[a], &pages[b]));

        let mut meta = SiteMeta {
            page_count: pages.len(),
            last_change: pages.iter().filter_map(|p| p.date().copied()).max(),
            ..SiteMeta::default()
        };

        for &i in &recent {
            let page = &pages[i];
            meta.sections
                .entry(page.section().to_owned())
                .or_default()
                .push(i);

            for plural in taxonomies.values() {
                for term in page.front_matter().terms(plural) {
                    let term = slug::slugify(term);
                    if term.is_empty() {
                        continue;
                    }
                    meta.taxonomies
                        .entry(plural.clone())
                        .or_default()
                        .entry(term)
                        .or_default()
                        .push(i);
                }
            }
        }
        for plural in taxonomies.values() {
            meta.taxonomies.entry(plural.clone()).or_default();
        }
        meta.recent = recent;

        debug!(
            "Built site metadata: {} pages, {} sections, {} taxonomies",
            meta.page_count,
            meta.sections.len(),
            meta.taxonomies.len()
        );
        meta
    }

    /// Writes each page's [`PageLinks`] from its position in its section.
    /// Links are write-once; enriching a page twice fails.
    pub fn enrich(&self, pages: &[Page]) -> Result<(), MetaError> {
        for members in self.sections.values() {
            for (position, &i) in members.iter().enumerate() {
                let links = PageLinks {
                    prev: position.checked_sub(1).map(|p| members[p]),
                    next: members.get(position + 1).copied(),
                };
                if !pages[i].set_links(links) {
                    return Err(MetaError::AlreadyEnriched(pages[i].source_path().to_owned()));
                }
            }
        }
        Ok(())
    }
}

// Newest first; undated pages last; ties broken by source path.
fn newest_first(a: &Page, b: &Page) -> Ordering {
    b.date()
        .cmp(&a.date())
        .then_with(|| a.source_path().cmp(b.source_path()))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::markdown::Verbatim;
    use crate::page::IngestOptions;

    fn page(source_path: &str, yaml: &str) -> Page {
        let raw = format!("---\n{}\n---\n", yaml);
        Page::ingest(source_path, raw.as_bytes(), &Verbatim, &IngestOptions::default()).unwrap()
    }

    fn pages() -> Vec<Page> {
        vec![
            page("blog/a.md", "date: 2021-01-01\ntags: [Rust, go]"),
            page("blog/b.md", "date: 2022-01-01\ntags: rust"),
            page("blog/c.md", "title: undated"),
            page("docs/d.md", "date: 2020-06-01"),
            page("e.md", "title: root"),
        ]
    }

    fn taxonomies() -> BTreeMap<String, String> {
        let mut t = BTreeMap::new();
        t.insert("tag".to_owned(), "tags".to_owned());
        t.insert("category".to_owned(), "categories".to_owned());
        t
    }

    #[test]
    fn test_build() {
        let pages = pages();
        let meta = SiteMeta::build(&pages, &taxonomies());

        assert_eq!(5, meta.page_count);
        assert_eq!(vec![1, 0, 3, 2, 4], meta.recent);
        assert_eq!(Some(&vec![1, 0, 2]), meta.sections.get("blog"));
        assert_eq!(Some(&vec![3]), meta.sections.get("docs"));
        assert_eq!(Some(&vec![4]), meta.sections.get(""));
        assert_eq!(pages[1].date().copied(), meta.last_change);

        let tags = &meta.taxonomies["tags"];
        assert_eq!(Some(&vec![1, 0]), tags.get("rust"));
        assert_eq!(Some(&vec![0]), tags.get("go"));
        assert!(meta.taxonomies["categories"].is_empty());
    }

    #[test]
    fn test_build_does_not_touch_pages() {
        let pages = pages();
        let _ = SiteMeta::build(&pages, &taxonomies());
        assert!(pages.iter().all(|p| p.links().is_none()));
    }

    #[test]
    fn test_enrich() -> Result<(), MetaError> {
        let pages = pages();
        let meta = SiteMeta::build(&pages, &taxonomies());
        meta.enrich(&pages)?;

        assert_eq!(
            Some(&PageLinks {
                prev: None,
                next: Some(0)
            }),
            pages[1].links()
        );
        assert_eq!(
            Some(&PageLinks {
                prev: Some(0),
                next: None
            }),
            pages[2].links()
        );
        assert_eq!(Some(&PageLinks::default()), pages[3].links());

        assert!(matches!(meta.enrich(&pages), Err(MetaError::AlreadyEnriched(_))));
        Ok(())
    }
}
