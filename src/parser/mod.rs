pub mod detail;
pub mod listings;
pub mod pagination;

use scraper::Selector;

// Markup markers of the source site. CSS-module class names change when the
// site is redeployed; extraction breaks with them.
pub const PAGINATION_CONTAINER: &str = "div.pagination__pagesContainer___up6kR";
pub const LISTINGS_CONTAINER: &str = "div.search-results__itemCardList___RdWje";
pub const INITIAL_DATA_VAR: &str = "window.__INITIAL_DATA__";

pub(crate) fn selector(css: &'static str) -> Selector {
    Selector::parse(css).expect("static selector must parse")
}
