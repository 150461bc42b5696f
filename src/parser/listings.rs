use scraper::Html;

use super::{selector, LISTINGS_CONTAINER};

/// Absolute listing URLs from one search-results page. The href is appended
/// to `site_root` as-is. A page without the listings container yields nothing.
pub fn extract_listing_urls(site_root: &str, html: &str) -> Vec<String> {
    let doc = Html::parse_document(html);
    let Some(list) = doc.select(&selector(LISTINGS_CONTAINER)).next() else {
        return Vec::new();
    };

    list.select(&selector("a"))
        .filter_map(|a| a.value().attr("href"))
        .map(|href| format!("{}{}", site_root, href))
        .collect()
}

#[cfg(test)]
pub(crate) fn search_html(hrefs: &[&str]) -> String {
    let cards: String = hrefs
        .iter()
        .map(|h| format!(r#"<div class="card"><a href="{h}"><span>offer</span></a></div>"#))
        .collect();
    format!(
        r#"<html><body>
        <nav><a href="/about">About</a></nav>
        <div class="search-results__itemCardList___RdWje">{cards}</div>
        </body></html>"#
    )
}
