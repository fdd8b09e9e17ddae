//! The library code for the `sitepress` static site generator. A build is
//! driven by a [`build::Site`] and runs in three phases:
//!
//! 1. Creating pages: every content item from a [`source::Source`] is parsed
//!    into a [`page::Page`] (front matter plus rendered body) and given an
//!    output path ([`output_path`]).
//! 2. Building site metadata ([`meta`]): section listings, recent pages,
//!    taxonomies, and each page's neighbours.
//! 3. Rendering pages: each page is executed against its template
//!    ([`template`], [`render`]), relative references are made absolute
//!    ([`absurl`]), and the result is written to a [`target::Target`] along
//!    with redirect pages for its aliases ([`alias`]).
//!
//! The first and last phases work on pages in parallel; the second is the
//! barrier between them, since rendering a page may refer to any other page.
//! A page which fails (bad front matter, a missing template, and so on) is
//! recorded in the [`build::BuildReport`] and skipped; failures reading
//! content or writing output abort the build.

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]

pub mod absurl;
pub mod alias;
pub mod build;
pub mod config;
pub mod markdown;
pub mod meta;
pub mod output_path;
pub mod page;
pub mod render;
pub mod source;
pub mod target;
pub mod template;
pub mod value;
