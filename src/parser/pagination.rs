use scraper::Html;

use super::{selector, PAGINATION_CONTAINER};
use crate::error::{Result, ScrapeError};

/// Read the last page number from the pagination control of a search page.
/// `url` is only used to label errors.
pub fn parse_last_page(url: &str, html: &str) -> Result<u32> {
    let doc = Html::parse_document(html);
    let container = doc
        .select(&selector(PAGINATION_CONTAINER))
        .next()
        .ok_or_else(|| ScrapeError::PaginationMissing { url: url.to_string() })?;

    let last = container
        .select(&selector("a"))
        .last()
        .ok_or_else(|| ScrapeError::PaginationEmpty { url: url.to_string() })?;

    let label = last.text().collect::<String>().trim().to_string();
    match label.parse::<u32>() {
        Ok(n) if n >= 1 => Ok(n),
        _ => Err(ScrapeError::PaginationLabel { label }),
    }
}

#[cfg(test)]
pub(crate) fn pagination_html(pages: &[&str]) -> String {
    let anchors: String = pages
        .iter()
        .map(|p| format!(r#"<a href="?Page={p}">{p}</a>"#))
        .collect();
    format!(
        r#"<html><body><div class="pagination__pagesContainer___up6kR">{anchors}</div></body></html>"#
    )
}
