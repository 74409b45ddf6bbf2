//! Building blocks for source extensions and the host side that serves
//! them. DOM extraction stays in plugin code.

pub mod chapters;
pub mod error;
pub mod html;
pub mod limit;
pub mod pages;
pub mod search;
pub mod settings;
pub mod slug;
pub mod util;

pub use {
    chapters::{Chapter, ChapterListBuilder, ChapterSource},
    error::{Error, Result},
    html::{HtmlScraperClient, HtmlScraperOptions, ScraperClient},
    limit::run_limited,
    pages::{Page, PagePipeline, PageRequest, PageTransformer, rewrite_hosts},
    search::{FilterDescriptor, SearchController, SearchRequest},
    settings::{ResolvedSettings, SettingsBinder},
    slug::{SlugResolver, normalize_slug},
};
