use std::ops::RangeInclusive;
use std::sync::Arc;

use rayon::prelude::*;
use rayon::ThreadPool;
use tracing::{debug, info};

use crate::cities::City;
use crate::db::{ApartmentRecord, StorageSink};
use crate::error::{Result, ScrapeError};
use crate::fetcher::{FetchRequest, PageFetcher, Transport};
use crate::parser::detail::{extract_record, DistrictKey};
use crate::parser::listings::extract_listing_urls;
use crate::parser::pagination::parse_last_page;

/// Split `[1, last_page]` into consecutive ranges of at most `batch_size` pages.
pub fn partition_pages(last_page: u32, batch_size: usize) -> Vec<RangeInclusive<u32>> {
    let size = u32::try_from(batch_size.max(1)).unwrap_or(u32::MAX);
    let mut batches = Vec::new();
    let mut start = 1u32;
    while start <= last_page {
        let end = start.saturating_add(size - 1).min(last_page);
        batches.push(start..=end);
        match end.checked_add(1) {
            Some(next) => start = next,
            None => break,
        }
    }
    batches
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    /// 1-based.
    pub index: usize,
    pub batches: usize,
    pub pages: RangeInclusive<u32>,
    pub search_pages: usize,
    pub listings: usize,
    pub saved: usize,
    /// Accumulated percentage of the page range processed so far.
    pub progress: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub city: String,
    pub total_pages: u32,
    pub batches: usize,
    pub listings: usize,
    pub saved: usize,
    pub progress: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    Discovered { last_page: u32 },
    Batch(BatchReport),
    Finished(RunSummary),
}

/// Drives a full-refresh scrape of one city: discover, drop/recreate the
/// table, then fetch → extract → persist one batch of search pages at a time.
///
/// Fetches within a phase run concurrently on the async runtime; extraction
/// runs on a dedicated rayon pool. Each batch is committed once, so at most
/// one batch of rows is ever uncommitted.
pub struct BatchOrchestrator<T, S> {
    fetcher: PageFetcher<T>,
    storage: S,
    pool: Arc<ThreadPool>,
    batch_size: usize,
}

impl<T: Transport, S: StorageSink> BatchOrchestrator<T, S> {
    /// `workers == 0` sizes the extraction pool to the available cores.
    pub fn new(fetcher: PageFetcher<T>, storage: S, workers: usize, batch_size: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("extract-{}", i))
            .build()?;
        Ok(Self {
            fetcher,
            storage,
            pool: Arc::new(pool),
            batch_size: batch_size.max(1),
        })
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub async fn discover_last_page(&self, search_url: &str) -> Result<u32> {
        let html = self
            .fetcher
            .fetch(search_url, &[])
            .await
            .into_page()
            .ok_or_else(|| ScrapeError::PaginationUnavailable { url: search_url.to_string() })?;
        parse_last_page(search_url, &html)
    }

    pub async fn run(&mut self, city: &City, mut on_event: impl FnMut(&RunEvent)) -> Result<RunSummary> {
        let last_page = self.discover_last_page(&city.search_url).await?;
        info!("{}: {} search pages found", city.slug, last_page);
        on_event(&RunEvent::Discovered { last_page });

        // Full replace: rows from earlier runs never survive.
        self.storage.drop_table(&city.slug)?;
        self.storage.create_table(&city.slug)?;

        let batches = partition_pages(last_page, self.batch_size);
        let mut summary = RunSummary {
            city: city.slug.clone(),
            total_pages: last_page,
            batches: batches.len(),
            listings: 0,
            saved: 0,
            progress: 0.0,
        };

        let count = batches.len();
        for (i, pages) in batches.into_iter().enumerate() {
            let mut report = self.run_batch(city, pages).await?;
            let page_count = f64::from(report.pages.end() - report.pages.start() + 1);
            summary.progress += page_count * 100.0 / f64::from(last_page);
            summary.listings += report.listings;
            summary.saved += report.saved;

            report.index = i + 1;
            report.batches = count;
            report.progress = summary.progress;
            info!(
                "Batch {}/{} (pages {}-{}): {} listings, {} saved, {:.2}% done",
                report.index,
                count,
                report.pages.start(),
                report.pages.end(),
                report.listings,
                report.saved,
                report.progress
            );
            on_event(&RunEvent::Batch(report));
        }

        info!(
            "{}: finished, {} of {} listings saved",
            city.slug, summary.saved, summary.listings
        );
        on_event(&RunEvent::Finished(summary.clone()));
        Ok(summary)
    }

    async fn run_batch(&mut self, city: &City, pages: RangeInclusive<u32>) -> Result<BatchReport> {
        let search_requests: Vec<FetchRequest> = pages
            .clone()
            .map(|p| FetchRequest::page(city.search_url.as_str(), p))
            .collect();
        let search_pages = self.fetcher.fetch_all(&search_requests).await;
        debug!("{} of {} search pages fetched", search_pages.len(), search_requests.len());

        let fetched = search_pages.len();
        let urls = self.extract_urls(&city.site_root, search_pages).await?;

        let listing_requests: Vec<FetchRequest> = urls.into_iter().map(FetchRequest::plain).collect();
        let listing_pages = self.fetcher.fetch_all(&listing_requests).await;
        debug!("{} of {} listings fetched", listing_pages.len(), listing_requests.len());

        let records = self.extract_records(city.district_key, listing_pages).await?;

        for record in &records {
            self.storage.insert(&city.slug, record)?;
        }
        self.storage.commit()?;

        Ok(BatchReport {
            index: 0,
            batches: 0,
            pages,
            search_pages: fetched,
            listings: listing_requests.len(),
            saved: records.len(),
            progress: 0.0,
        })
    }

    async fn extract_urls(&self, site_root: &str, pages: Vec<String>) -> Result<Vec<String>> {
        let pool = Arc::clone(&self.pool);
        let root = site_root.to_string();
        let urls = tokio::task::spawn_blocking(move || {
            pool.install(|| {
                pages
                    .par_iter()
                    .flat_map_iter(|html| extract_listing_urls(&root, html))
                    .collect::<Vec<_>>()
            })
        })
        .await?;
        Ok(urls)
    }

    async fn extract_records(&self, key: DistrictKey, pages: Vec<String>) -> Result<Vec<ApartmentRecord>> {
        let pool = Arc::clone(&self.pool);
        let records = tokio::task::spawn_blocking(move || {
            pool.install(|| {
                pages
                    .par_iter()
                    .filter_map(|html| extract_record(key, html))
                    .collect::<Vec<_>>()
            })
        })
        .await?;
        Ok(records)
    }
}
